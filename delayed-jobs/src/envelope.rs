//! The job envelope: the flat payload producers and workers exchange.

use crate::error::{JobError, JobResult};
use crate::reference::Reference;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Key of the encoded target.
pub const TARGET_KEY: &str = "obj";
/// Key of the method name.
pub const METHOD_KEY: &str = "method";
/// Key of the encoded arguments.
pub const ARGS_KEY: &str = "args";
/// Key of the enqueue timestamp.
pub const ENQUEUED_AT_KEY: &str = "t";
/// Key of the unique job instance id.
pub const JOB_ID_KEY: &str = "job_id";
/// Key of the tracking tag.
pub const TRACKED_KEY: &str = "tracked";

/// Keys extra params may not use.
pub const RESERVED_KEYS: [&str; 6] = [
    TARGET_KEY,
    METHOD_KEY,
    ARGS_KEY,
    ENQUEUED_AT_KEY,
    JOB_ID_KEY,
    TRACKED_KEY,
];

/// One deferred call.
///
/// Serializes to a flat JSON object:
///
/// ```json
/// {"obj": "CLASS:Billing", "method": "run", "args": [123], "t": 1718000000.25}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Encoded target.
    #[serde(rename = "obj")]
    pub target: Value,

    /// Method to invoke.
    pub method: String,

    /// Encoded arguments.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Enqueue time in fractional epoch seconds; only on plain, unscheduled jobs.
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<f64>,

    /// Instance id; only on unique jobs.
    #[serde(rename = "job_id", default, skip_serializing_if = "Option::is_none")]
    pub job_instance_id: Option<String>,

    /// Caller correlation tag.
    #[serde(rename = "tracked", default, skip_serializing_if = "Option::is_none")]
    pub tracking_tag: Option<String>,

    /// Caller params merged into the top level.
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl Envelope {
    /// Encode a call. Only the top level of `args` is reference-encoded.
    pub fn build(target: &Reference, method: &str, args: &[Reference]) -> JobResult<Self> {
        Ok(Self {
            target: target.encode()?,
            method: method.to_string(),
            args: args.iter().map(Reference::encode).collect::<JobResult<_>>()?,
            enqueued_at: None,
            job_instance_id: None,
            tracking_tag: None,
            params: BTreeMap::new(),
        })
    }

    /// Merge extra params, rejecting reserved keys.
    pub fn with_params(mut self, params: BTreeMap<String, Value>) -> JobResult<Self> {
        if let Some(key) = params.keys().find(|k| RESERVED_KEYS.contains(&k.as_str())) {
            return Err(JobError::InvalidParam(key.clone()));
        }
        self.params.extend(params);
        Ok(self)
    }

    /// Set the tracking tag.
    pub fn with_tracking_tag(mut self, tag: impl Into<String>) -> Self {
        self.tracking_tag = Some(tag.into());
        self
    }

    /// Stamp the current time.
    pub fn stamp_enqueued_at(&mut self) {
        self.enqueued_at = Some(enqueue_timestamp());
    }

    /// Whether this envelope belongs to a unique job.
    pub fn is_unique(&self) -> bool {
        self.job_instance_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Parsed target reference.
    pub fn target_reference(&self) -> Reference {
        Reference::parse(&self.target)
    }

    /// `Billing.run`, `Invoice#send`, or `Unknown#method`.
    pub fn display_name(&self) -> String {
        match self.target_reference() {
            Reference::Class(name) => format!("{}.{}", name, self.method),
            Reference::Entity { kind, .. } => format!("{}#{}", kind, self.method),
            Reference::Value(_) => format!("Unknown#{}", self.method),
        }
    }

    /// The identity-bearing fields: everything except `t` and `job_id`.
    pub fn identity(&self) -> Self {
        Self {
            enqueued_at: None,
            job_instance_id: None,
            ..self.clone()
        }
    }

    /// Canonical JSON value, object keys sorted at every depth.
    pub fn to_canonical_value(&self) -> JobResult<Value> {
        let value =
            serde_json::to_value(self).map_err(|e| JobError::Serialization(e.to_string()))?;
        Ok(canonicalize(value))
    }

    /// Canonical JSON text, identical for equal envelopes in every process.
    pub fn to_payload(&self) -> JobResult<String> {
        serde_json::to_string(&self.to_canonical_value()?)
            .map_err(|e| JobError::Serialization(e.to_string()))
    }

    /// Parse a payload produced by [`Envelope::to_payload`].
    pub fn from_payload(payload: &str) -> JobResult<Self> {
        serde_json::from_str(payload).map_err(|e| JobError::Deserialization(e.to_string()))
    }
}

/// Rebuild every object with its keys in sorted order.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Fractional epoch seconds, strictly increasing within the process so two
/// back-to-back enqueues of the same call never carry the same `t`.
pub fn enqueue_timestamp() -> f64 {
    let now = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
    let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
    loop {
        let candidate = if now > f64::from_bits(last) {
            now
        } else {
            f64::from_bits(last + 1)
        };
        match LAST_TIMESTAMP.compare_exchange_weak(
            last,
            candidate.to_bits(),
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(current) => last = current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn billing_run() -> Envelope {
        Envelope::build(&Reference::class("Billing"), "run", &[Reference::value(123)]).unwrap()
    }

    #[test]
    fn test_build_encodes_references() {
        let envelope = Envelope::build(
            &Reference::entity("Invoice", 7),
            "copy_from",
            &[Reference::entity("Invoice", 8), Reference::value("memo")],
        )
        .unwrap();

        assert_eq!(envelope.target, json!("ENTITY:Invoice:7"));
        assert_eq!(envelope.args, vec![json!("ENTITY:Invoice:8"), json!("memo")]);
    }

    #[test]
    fn test_wire_field_names() {
        let mut envelope = billing_run().with_tracking_tag("export-9");
        envelope.job_instance_id = Some("default_abc".into());
        envelope.enqueued_at = Some(1.5);

        let value = envelope.to_canonical_value().unwrap();
        assert_eq!(
            value,
            json!({
                "obj": "CLASS:Billing",
                "method": "run",
                "args": [123],
                "t": 1.5,
                "job_id": "default_abc",
                "tracked": "export-9"
            })
        );
    }

    #[test]
    fn test_optional_fields_omitted() {
        let payload = billing_run().to_payload().unwrap();
        assert_eq!(payload, r#"{"args":[123],"method":"run","obj":"CLASS:Billing"}"#);
    }

    #[test]
    fn test_params_flatten_and_round_trip() {
        let params = BTreeMap::from([("priority".to_string(), json!("high"))]);
        let envelope = billing_run().with_params(params).unwrap();

        let payload = envelope.to_payload().unwrap();
        assert!(payload.contains(r#""priority":"high""#));
        assert_eq!(Envelope::from_payload(&payload).unwrap(), envelope);
    }

    #[test]
    fn test_reserved_params_rejected() {
        let params = BTreeMap::from([("obj".to_string(), json!("CLASS:Other"))]);
        assert!(matches!(
            billing_run().with_params(params),
            Err(JobError::InvalidParam(key)) if key == "obj"
        ));
    }

    #[test]
    fn test_canonical_payload_ignores_insertion_order() {
        let a = Envelope::build(
            &Reference::class("Billing"),
            "run",
            &[Reference::value(json!({"b": 1, "a": {"d": 2, "c": 3}}))],
        )
        .unwrap();
        let b = Envelope::build(
            &Reference::class("Billing"),
            "run",
            &[Reference::value(json!({"a": {"c": 3, "d": 2}, "b": 1}))],
        )
        .unwrap();
        assert_eq!(a.to_payload().unwrap(), b.to_payload().unwrap());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(billing_run().display_name(), "Billing.run");
        let entity =
            Envelope::build(&Reference::entity("Invoice", 1), "deliver", &[]).unwrap();
        assert_eq!(entity.display_name(), "Invoice#deliver");
        let plain = Envelope::build(&Reference::value("text"), "upcase", &[]).unwrap();
        assert_eq!(plain.display_name(), "Unknown#upcase");
    }

    #[test]
    fn test_identity_drops_volatile_fields() {
        let mut envelope = billing_run();
        envelope.stamp_enqueued_at();
        envelope.job_instance_id = Some("default_1".into());

        let identity = envelope.identity();
        assert!(identity.enqueued_at.is_none());
        assert!(identity.job_instance_id.is_none());
        assert_eq!(identity.method, "run");
    }

    #[test]
    fn test_is_unique() {
        let mut envelope = billing_run();
        assert!(!envelope.is_unique());
        envelope.job_instance_id = Some(String::new());
        assert!(!envelope.is_unique());
        envelope.job_instance_id = Some("default_1".into());
        assert!(envelope.is_unique());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let stamps: Vec<f64> = (0..1000).map(|_| enqueue_timestamp()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }
}
