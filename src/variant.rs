use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// The assignment result for a flag key: an optional value plus an optional JSON payload.
///
/// Two variants are equal if their values are equal. The payload is carried data, not identity.
///
/// # Examples
/// ```
/// # use skylab::Variant;
/// let control = Variant::new("control");
/// let with_payload = Variant::with_payload("control", serde_json::json!({"color": "red"}));
/// assert_eq!(control, with_payload);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "VariantRecord")]
pub struct Variant {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

/// Wire schema of a variant.
///
/// Older servers and older persisted entries carry the assigned value under `key` instead of
/// `value`. `value` takes precedence when both are present.
#[derive(Deserialize)]
struct VariantRecord {
    value: Option<String>,
    key: Option<String>,
    payload: Option<serde_json::Value>,
}

impl From<VariantRecord> for Variant {
    fn from(record: VariantRecord) -> Variant {
        match record.value.or(record.key) {
            Some(value) => Variant {
                value: Some(value),
                payload: record.payload,
            },
            // A payload without a value is not an assignment.
            None => Variant::empty(),
        }
    }
}

impl Variant {
    /// Create a variant with the given value and no payload.
    pub fn new(value: impl Into<String>) -> Variant {
        Variant {
            value: Some(value.into()),
            payload: None,
        }
    }

    /// Create a variant with the given value and payload.
    pub fn with_payload(value: impl Into<String>, payload: serde_json::Value) -> Variant {
        Variant {
            value: Some(value.into()),
            payload: Some(payload),
        }
    }

    /// A variant with neither value nor payload. Represents "no assignment".
    pub const fn empty() -> Variant {
        Variant {
            value: None,
            payload: None,
        }
    }

    /// Assigned value, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Payload attached to the assignment, if any.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Returns `true` if this variant carries no value.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Serialize to a JSON object string, omitting absent fields.
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings and JSON values cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_owned())
    }

    /// Parse a variant from a JSON object string.
    ///
    /// Accepts `value` or the legacy `key` field. Returns an error for anything that is not a JSON
    /// object with string `value`/`key` fields.
    pub fn try_from_json(json: &str) -> serde_json::Result<Variant> {
        serde_json::from_str(json)
    }

    /// Lenient version of [`Variant::try_from_json`] that returns an empty variant for malformed
    /// input.
    pub fn from_json(json: &str) -> Variant {
        Variant::try_from_json(json).unwrap_or_else(|err| {
            log::debug!(target: "skylab", "ignoring malformed variant json: {:?}", err);
            Variant::empty()
        })
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Variant) -> bool {
        self.value == other.value
    }
}

impl Eq for Variant {}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Variant {
        Variant::new(value)
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Variant {
        Variant::new(value)
    }
}
