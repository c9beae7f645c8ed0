//! Wire references for job targets and arguments.
//!
//! A value travels in an envelope as one of three shapes:
//!
//! - `CLASS:<Name>` names a receiver type (`Billing`, `Reports::Nightly`)
//! - `ENTITY:<Kind>:<id>` names a persisted entity, looked up at execution
//! - anything else is a plain JSON value passed through unchanged
//!
//! A plain string that already has one of the first two shapes would decode
//! as a class or entity, so [`Reference::encode`] rejects it.

use crate::error::{JobError, JobResult};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Prefix of class references.
pub const CLASS_PREFIX: &str = "CLASS:";

/// Prefix of entity references.
pub const ENTITY_PREFIX: &str = "ENTITY:";

/// A persisted record that can be referenced by kind and id.
pub trait Entity: Any + Send + Sync + fmt::Debug {
    /// Type name, e.g. `Invoice`.
    fn kind(&self) -> &str;

    /// Identifier, unique within the kind.
    fn id(&self) -> String;

    /// Downcast support for receivers.
    fn as_any(&self) -> &dyn Any;
}

/// A job target or argument as it is encoded on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// A receiver type.
    Class(String),
    /// A persisted entity.
    Entity {
        /// Entity type name.
        kind: String,
        /// Entity id.
        id: String,
    },
    /// A plain value.
    Value(Value),
}

impl Reference {
    /// Reference a receiver type.
    pub fn class(name: impl Into<String>) -> Self {
        Self::Class(name.into())
    }

    /// Reference an entity by kind and id.
    pub fn entity(kind: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::Entity {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Reference a live entity.
    pub fn of(entity: &dyn Entity) -> Self {
        Self::entity(entity.kind(), entity.id())
    }

    /// Wrap a plain value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// Name used to find the receiver: the class name, the entity kind, or
    /// the JSON type name of a plain value.
    pub fn receiver_name(&self) -> &str {
        match self {
            Self::Class(name) => name,
            Self::Entity { kind, .. } => kind,
            Self::Value(value) => json_type_name(value),
        }
    }

    /// Encode for the wire.
    pub fn encode(&self) -> JobResult<Value> {
        match self {
            Self::Class(name) => {
                if !is_constant_path(name) {
                    return Err(JobError::InvalidReference(format!(
                        "class name `{}` is not a constant path",
                        name
                    )));
                }
                Ok(Value::String(format!("{}{}", CLASS_PREFIX, name)))
            }
            Self::Entity { kind, id } => {
                if !is_constant_path(kind) {
                    return Err(JobError::InvalidReference(format!(
                        "entity kind `{}` is not a constant path",
                        kind
                    )));
                }
                if !is_entity_id(id) {
                    return Err(JobError::InvalidReference(format!(
                        "entity id `{}` for {} must be alphanumeric",
                        id, kind
                    )));
                }
                Ok(Value::String(format!("{}{}:{}", ENTITY_PREFIX, kind, id)))
            }
            Self::Value(value) => {
                if !matches!(Self::parse(value), Self::Value(_)) {
                    return Err(JobError::InvalidReference(format!(
                        "plain value {} would decode as a reference",
                        value
                    )));
                }
                Ok(value.clone())
            }
        }
    }

    /// Parse a wire value. Strings that match neither prefix shape are
    /// plain values.
    pub fn parse(wire: &Value) -> Self {
        let Value::String(s) = wire else {
            return Self::Value(wire.clone());
        };

        if let Some(name) = s.strip_prefix(CLASS_PREFIX)
            && is_constant_path(name)
        {
            return Self::Class(name.to_string());
        }

        if let Some(rest) = s.strip_prefix(ENTITY_PREFIX)
            && let Some((kind, id)) = rest.rsplit_once(':')
            && is_constant_path(kind)
            && is_entity_id(id)
        {
            return Self::entity(kind, id);
        }

        Self::Value(wire.clone())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(name) => write!(f, "{}{}", CLASS_PREFIX, name),
            Self::Entity { kind, id } => write!(f, "{}{}:{}", ENTITY_PREFIX, kind, id),
            Self::Value(value) => write!(f, "{}", value),
        }
    }
}

impl From<Value> for Reference {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Reference {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<i64> for Reference {
    fn from(value: i64) -> Self {
        Self::Value(value.into())
    }
}

impl From<i32> for Reference {
    fn from(value: i32) -> Self {
        Self::Value(value.into())
    }
}

impl From<u64> for Reference {
    fn from(value: u64) -> Self {
        Self::Value(value.into())
    }
}

impl From<f64> for Reference {
    fn from(value: f64) -> Self {
        Self::Value(value.into())
    }
}

impl From<bool> for Reference {
    fn from(value: bool) -> Self {
        Self::Value(value.into())
    }
}

/// A decoded target or argument, ready to hand to a receiver.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A receiver type.
    Class(String),
    /// A loaded entity.
    Entity(Arc<dyn Entity>),
    /// A plain value.
    Value(Value),
}

impl Resolved {
    /// The reference this value was decoded from.
    pub fn reference(&self) -> Reference {
        match self {
            Self::Class(name) => Reference::Class(name.clone()),
            Self::Entity(entity) => Reference::of(entity.as_ref()),
            Self::Value(value) => Reference::Value(value.clone()),
        }
    }

    /// Receiver lookup name, see [`Reference::receiver_name`].
    pub fn receiver_name(&self) -> &str {
        match self {
            Self::Class(name) => name,
            Self::Entity(entity) => entity.kind(),
            Self::Value(value) => json_type_name(value),
        }
    }

    /// Downcast a loaded entity to its concrete type.
    pub fn entity<T: Entity>(&self) -> Option<&T> {
        match self {
            Self::Entity(entity) => entity.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// The plain value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Shorthand for an integer argument.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    /// Shorthand for a string argument.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

/// Receiver name for a plain JSON value.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

// `Billing`, `Reports::Nightly`, `V2_Export`
fn is_constant_path(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        && !name.ends_with(':')
}

fn is_entity_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
