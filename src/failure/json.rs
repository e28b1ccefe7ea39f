//! JSON form of failure records.
//!
//! ```json
//! {
//!   "kind": "SyntaxError",
//!   "message": "expected value at line 1 column 1",
//!   "location": "src/main.rs:10:5",
//!   "createdAt": 1760000000000,
//!   "trace": null,
//!   "context": { "input": "bad" },
//!   "cause": null
//! }
//! ```
//!
//! A `cause` is either a nested record object or, for causes that are not
//! records, their display text. The authenticity tag is never serialized;
//! decoding validates the shape and issues a fresh tag.

use alloc::borrow::Cow;
use core::fmt;
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use recoil_internals::Deferred;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use triomphe::UniqueArc;

use super::{Cause, Context, Failure, FailureData, Fragment};
use crate::{Kind, authenticity::Tag, callsite::CallSite, config::Config};

/// Error returned when a JSON value is not a valid failure record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The value is not a JSON object.
    NotAnObject,
    /// A required field is absent.
    MissingField(&'static str),
    /// A field has the wrong type or an invalid value.
    InvalidField {
        /// The offending field, as a dotted path for nested causes.
        field: String,
        /// What the field was expected to contain.
        expected: &'static str,
    },
}

impl DecodeError {
    fn invalid(field: &str, expected: &'static str) -> Self {
        Self::InvalidField {
            field: field.to_owned(),
            expected,
        }
    }

    fn nested(self, parent: &str) -> Self {
        match self {
            Self::NotAnObject => Self::invalid(parent, "a failure object or a string"),
            Self::MissingField(field) => Self::InvalidField {
                field: format!("{parent}.{field}"),
                expected: "a present field",
            },
            Self::InvalidField { field, expected } => Self::InvalidField {
                field: format!("{parent}.{field}"),
                expected,
            },
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => f.write_str("a failure record must be a JSON object"),
            Self::MissingField(field) => write!(f, "missing required field `{field}`"),
            Self::InvalidField { field, expected } => {
                write!(f, "invalid field `{field}`: expected {expected}")
            }
        }
    }
}

impl core::error::Error for DecodeError {}

fn millis_since_epoch(time: SystemTime) -> Value {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => Value::from(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
        Err(_) => Value::Null,
    }
}

fn cause_to_json(cause: &Cause) -> Value {
    match cause {
        Cause::Failure(failure) => failure.to_json(),
        other => Value::String(other.to_string()),
    }
}

impl Failure {
    /// Renders the record as a JSON object.
    ///
    /// Deferred fields are resolved first.
    pub fn to_json(&self) -> Value {
        self.force();
        let mut object = Map::with_capacity(7);
        object.insert("kind".into(), Value::from(self.kind().as_str()));
        object.insert("message".into(), Value::from(self.message()));
        object.insert(
            "location".into(),
            self.location()
                .map_or(Value::Null, |location| Value::String(location.to_string())),
        );
        object.insert(
            "createdAt".into(),
            self.created_at().map_or(Value::Null, millis_since_epoch),
        );
        object.insert(
            "trace".into(),
            self.trace().map_or(Value::Null, Value::from),
        );
        object.insert(
            "context".into(),
            Value::Object(
                self.context()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
        );
        object.insert(
            "cause".into(),
            self.cause().map_or(Value::Null, cause_to_json),
        );
        Value::Object(object)
    }

    /// Rebuilds a record from its JSON form, issuing a fresh authenticity
    /// tag.
    ///
    /// `kind` and `message` must be strings. The other fields are optional but
    /// must be well formed when present.
    ///
    /// ```
    /// use recoil::{DecodeError, Failure, Kind, is_failure};
    /// use serde_json::json;
    ///
    /// let failure = Failure::from_json(&json!({
    ///     "kind": "TypeError",
    ///     "message": "expected a number",
    ///     "context": { "field": "port" },
    /// }))
    /// .unwrap();
    /// assert_eq!(failure.kind(), &Kind::TYPE);
    /// assert!(is_failure(&failure));
    ///
    /// let error = Failure::from_json(&json!({ "kind": 1, "message": "x" })).unwrap_err();
    /// assert!(matches!(error, DecodeError::InvalidField { .. }));
    /// ```
    pub fn from_json(value: &Value) -> Result<Self, DecodeError> {
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let kind = match object.get("kind") {
            Some(Value::String(kind)) => Kind::new(kind.clone()),
            Some(_) => return Err(DecodeError::invalid("kind", "a string")),
            None => return Err(DecodeError::MissingField("kind")),
        };
        let message = match object.get("message") {
            Some(Value::String(message)) => message.clone(),
            Some(_) => return Err(DecodeError::invalid("message", "a string")),
            None => return Err(DecodeError::MissingField("message")),
        };

        let location = match object.get("location") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(
                text.parse::<CallSite>()
                    .map_err(|_| DecodeError::invalid("location", "`file:line[:column]`"))?,
            ),
            Some(_) => return Err(DecodeError::invalid("location", "a string")),
        };

        let created_at = match object.get("createdAt") {
            None | Some(Value::Null) => None,
            Some(value) => {
                let millis = value.as_u64().ok_or_else(|| {
                    DecodeError::invalid("createdAt", "milliseconds since the epoch")
                })?;
                Some(UNIX_EPOCH + Duration::from_millis(millis))
            }
        };

        let trace = match object.get("trace") {
            None | Some(Value::Null) => None,
            Some(Value::String(trace)) => Some(trace.clone()),
            Some(_) => return Err(DecodeError::invalid("trace", "a string")),
        };

        let context = match object.get("context") {
            None | Some(Value::Null) => Context::new(),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            Some(_) => return Err(DecodeError::invalid("context", "an object")),
        };

        let cause = match object.get("cause") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(Cause::Message(text.clone())),
            Some(nested @ Value::Object(_)) => Some(Cause::Failure(
                Self::from_json(nested).map_err(|error| error.nested("cause"))?,
            )),
            Some(_) => return Err(DecodeError::invalid("cause", "a failure object or a string")),
        };

        Ok(Self::from_unique(UniqueArc::new(FailureData {
            tag: Tag::issue(),
            fragment: Arc::new(Fragment::new(kind, Cow::Owned(message), location)),
            location: Deferred::resolved(None),
            trace: Deferred::resolved(trace),
            context: Deferred::resolved(context),
            created_at,
            cause,
            pool: 0,
        })))
    }

    /// Serializes the record with the serializer of `config` (see
    /// [`Config::serializer`]), falling back to [`to_json`](Self::to_json).
    pub fn serialize_with(&self, config: &Config) -> Value {
        config.serialize(self)
    }
}

impl Serialize for Failure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Failure {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{create_error, is_failure, wrap_error};

    #[test]
    fn test_to_json_shape() {
        let failure = create_error(Kind::PARSE, "bad port", None, None).with_context("port", "x");
        let json = failure.to_json();
        let object = json.as_object().unwrap();

        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["cause", "context", "createdAt", "kind", "location", "message", "trace"]
        );
        assert_eq!(json["kind"], "ParseError");
        assert_eq!(json["message"], "bad port");
        assert_eq!(json["context"], json!({ "port": "x" }));
        assert!(json["location"].as_str().unwrap().contains("json.rs"));
        assert!(json["createdAt"].is_u64());
        assert!(json.get("tag").is_none());
    }

    #[test]
    fn test_json_decoding_re_tags() {
        let inner = create_error(Kind::IO, "disk", None, None);
        let outer = wrap_error(Kind::new("SaveError"), inner, Some("save failed"), None);

        let decoded = Failure::from_json(&outer.to_json()).unwrap();
        assert!(is_failure(&decoded));
        assert_eq!(decoded.kind(), outer.kind());
        assert_eq!(decoded.message(), "save failed");
        assert_eq!(decoded.location(), outer.location());
        assert_eq!(
            decoded.created_at().map(|t| t.duration_since(UNIX_EPOCH).unwrap().as_millis()),
            outer.created_at().map(|t| t.duration_since(UNIX_EPOCH).unwrap().as_millis())
        );
        let cause = decoded.cause().and_then(Cause::as_failure).unwrap();
        assert_eq!(cause.kind(), &Kind::IO);
        assert!(is_failure(cause));
    }

    #[test]
    fn test_decode_rejects_malformed_values() {
        assert_eq!(
            Failure::from_json(&json!("Error: boom")).unwrap_err(),
            DecodeError::NotAnObject
        );
        assert_eq!(
            Failure::from_json(&json!({ "message": "x" })).unwrap_err(),
            DecodeError::MissingField("kind")
        );
        assert_eq!(
            Failure::from_json(&json!({ "kind": "Error" })).unwrap_err(),
            DecodeError::MissingField("message")
        );
        assert!(matches!(
            Failure::from_json(&json!({ "kind": "E", "message": "m", "location": "nowhere" })),
            Err(DecodeError::InvalidField { ref field, .. }) if field == "location"
        ));
        assert!(matches!(
            Failure::from_json(&json!({ "kind": "E", "message": "m", "createdAt": -5 })),
            Err(DecodeError::InvalidField { ref field, .. }) if field == "createdAt"
        ));
        assert!(matches!(
            Failure::from_json(&json!({ "kind": "E", "message": "m", "context": [1] })),
            Err(DecodeError::InvalidField { ref field, .. }) if field == "context"
        ));
        assert!(matches!(
            Failure::from_json(&json!({ "kind": "E", "message": "m", "cause": { "kind": 3 } })),
            Err(DecodeError::InvalidField { ref field, .. }) if field == "cause.kind"
        ));
    }

    #[test]
    fn test_serde_traits() {
        let failure = create_error(Kind::RANGE, "overflow", None, Some(Cause::from("u8")));
        let text = serde_json::to_string(&failure).unwrap();
        let back: Failure = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind(), &Kind::RANGE);
        assert!(matches!(back.cause(), Some(Cause::Message(m)) if m == "u8"));

        let forged = serde_json::from_str::<Failure>(r#"{"kind": true}"#);
        assert!(forged.is_err());
    }
}
