//! # Wire envelope.
//!
//! Every handshake message is a JSON object with exactly four fields:
//!
//! ```text
//! { "v": "qc-1", "pid": <worker pid>, "n": "<event name>", "m": <payload> }
//! ```
//!
//! The pid is always the **worker's** pid, whichever side sends. Anything that
//! does not match this shape is not an error, it is simply not a handshake message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lifecycle::LifecycleEvent;

/// Protocol tag carried in the `v` field.
pub const PROTOCOL_TAG: &str = "qc-1";

/// A handshake message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol tag, always [`PROTOCOL_TAG`] for valid envelopes.
    #[serde(rename = "v")]
    pub tag: String,
    /// Worker pid.
    pub pid: u32,
    /// Event name.
    #[serde(rename = "n")]
    pub name: String,
    /// Arbitrary payload (`null` when absent).
    #[serde(rename = "m", default)]
    pub payload: Value,
}

impl Envelope {
    /// Builds an envelope for the given worker pid and event name.
    pub fn new(pid: u32, name: impl Into<String>, payload: Value) -> Self {
        Self {
            tag: PROTOCOL_TAG.to_string(),
            pid,
            name: name.into(),
            payload,
        }
    }

    /// Builds an envelope for a lifecycle event.
    pub fn lifecycle(pid: u32, event: LifecycleEvent, payload: Value) -> Self {
        Self::new(pid, event.as_str(), payload)
    }

    /// Validates and decodes an inbound message.
    ///
    /// Returns `None` unless the tag matches, the pid is positive and the name is a string.
    pub fn from_value(value: &Value) -> Option<Self> {
        let env: Envelope = serde_json::from_value(value.clone()).ok()?;
        (env.tag == PROTOCOL_TAG && env.pid > 0).then_some(env)
    }

    /// Encodes the envelope as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "v": self.tag,
            "pid": self.pid,
            "n": self.name,
            "m": self.payload,
        })
    }

    /// The lifecycle event named by this envelope, if the name is in the vocabulary.
    pub fn event(&self) -> Option<LifecycleEvent> {
        LifecycleEvent::from_name(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_envelopes() {
        let v = json!({ "v": "qc-1", "pid": 123, "n": "started", "m": null });
        let env = Envelope::from_value(&v).expect("valid envelope");
        assert_eq!(env.pid, 123);
        assert_eq!(env.event(), Some(LifecycleEvent::Started));
        assert_eq!(env.to_value(), v);
    }

    #[test]
    fn payload_is_optional() {
        let v = json!({ "v": "qc-1", "pid": 9, "n": "status" });
        let env = Envelope::from_value(&v).expect("valid envelope");
        assert_eq!(env.payload, Value::Null);
        assert_eq!(env.event(), None);
    }

    #[test]
    fn rejects_malformed_shapes() {
        let bad = [
            json!(null),
            json!("started"),
            json!({ "n": "other", "m": "other" }),
            json!({ "v": "qc-2", "pid": 1, "n": "started" }),
            json!({ "v": "qc-1", "pid": 0, "n": "started" }),
            json!({ "v": "qc-1", "pid": -4, "n": "started" }),
            json!({ "v": "qc-1", "pid": 1.5, "n": "started" }),
            json!({ "v": "qc-1", "n": "started" }),
            json!({ "v": "qc-1", "pid": 1, "n": 7 }),
        ];
        for v in bad {
            assert!(Envelope::from_value(&v).is_none(), "accepted {v}");
        }
    }
}
