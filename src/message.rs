//! The canonical wire message and its three inbound encodings.
//!
//! Clients may send a message as a tagged JSON object (`{"t": 1, ...}`), as a
//! positional array (`[t, topic?, data?, id?, to?, code?]`), or using the
//! legacy keyword form (`{"event": "broadcast", ...}`). All three normalize
//! to one canonical `Message` before the dispatcher ever sees them — the
//! dispatcher and every fan-out path operate on `Message` alone and are
//! unaware the other two encodings exist.
//!
//! `data` stays a free-form `serde_json::Value` rather than a typed enum:
//! application-defined broadcast/chat payloads are opaque to the hub by
//! design, only the envelope around them (`t`, `topic`, `to`, `id`, ...) is
//! structured.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// A message in its canonical, server-internal form.
///
/// Serializes to the object wire form (`t`, `topic`, ...); fields that are
/// `None` are omitted rather than emitted as `null`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Kind tag, see [`crate::kind::KindTag`].
    pub t: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Populated by the server on delivery; clients never need to set this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(rename = "threadId", skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Message {
    /// Builds a bare message with only a kind tag set.
    pub fn new(t: i64) -> Self {
        Self {
            t,
            ..Self::default()
        }
    }

    /// Builds a kind-8 (`error`) message. Used for protocol-shape failures
    /// that must not close the connection (spec.md §7).
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            t: crate::kind::KindTag::Error.as_i64(),
            data: Some(serde_json::json!({ "message": text.into() })),
            ..Self::default()
        }
    }

    /// Builds a kind-9 (`ack`) message carrying the given `data` payload.
    pub fn ack(data: Value) -> Self {
        Self {
            t: crate::kind::KindTag::Ack.as_i64(),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Parses an inbound JSON payload, trying the object form, then the
    /// positional-array form, then the legacy keyword form, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if none of the three encodings apply. This
    /// is never fatal to the connection — the caller replies with an
    /// `error` message and keeps reading.
    pub fn parse(raw: &Value) -> Result<Self, ProtocolError> {
        if let Value::Array(_) = raw {
            return Self::parse_positional(raw);
        }

        if let Value::Object(map) = raw {
            if map.contains_key("t") {
                return Self::parse_object(raw);
            }
            if map.contains_key("event") {
                return Self::parse_legacy(raw);
            }
        }

        Err(ProtocolError::UnknownEncoding)
    }

    fn parse_object(raw: &Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(raw.clone())
            .map_err(|e| ProtocolError::Shape(format!("object form: {e}")))
    }

    /// `[t, topic?, data?, id?, to?, code?]`. Position 5 (`code`) is
    /// reserved by the wire format but not interpreted by any routing path.
    fn parse_positional(raw: &Value) -> Result<Self, ProtocolError> {
        let arr = raw
            .as_array()
            .ok_or_else(|| ProtocolError::Shape("positional form is not an array".into()))?;

        let t = arr
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| ProtocolError::Shape("positional form missing t".into()))?;

        let topic = arr.get(1).and_then(Value::as_str).map(str::to_string);
        let data = arr.get(2).filter(|v| !v.is_null()).cloned();
        let id = arr.get(3).and_then(Value::as_str).map(str::to_string);
        let to = arr.get(4).and_then(Value::as_str).map(str::to_string);
        let code = arr.get(5).and_then(Value::as_i64);

        Ok(Self {
            t,
            topic,
            to,
            from: None,
            data,
            id,
            code,
            thread_id: None,
            reply_to: None,
        })
    }

    /// `{"event": "broadcast", "topic": ..., "data": ..., ...}`.
    fn parse_legacy(raw: &Value) -> Result<Self, ProtocolError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| ProtocolError::Shape("legacy form is not an object".into()))?;

        let event = obj
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Shape("legacy form missing event".into()))?;

        let t = crate::kind::legacy_event_to_tag(event);

        Ok(Self {
            t,
            topic: obj.get("topic").and_then(Value::as_str).map(str::to_string),
            to: obj.get("to").and_then(Value::as_str).map(str::to_string),
            from: obj.get("from").and_then(Value::as_str).map(str::to_string),
            data: obj.get("data").filter(|v| !v.is_null()).cloned(),
            id: obj.get("id").and_then(Value::as_str).map(str::to_string),
            code: obj.get("code").and_then(Value::as_i64),
            thread_id: obj
                .get("threadId")
                .and_then(Value::as_str)
                .map(str::to_string),
            reply_to: obj
                .get("replyTo")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_form() {
        let raw = json!({"t": 1, "topic": "general", "data": {"hi": true}});
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.t, 1);
        assert_eq!(msg.topic.as_deref(), Some("general"));
    }

    #[test]
    fn parses_positional_form() {
        let raw = json!([12, serde_json::Value::Null, {"text": "hey"}, "abc", "peer-1"]);
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.t, 12);
        assert!(msg.topic.is_none());
        assert_eq!(msg.id.as_deref(), Some("abc"));
        assert_eq!(msg.to.as_deref(), Some("peer-1"));
    }

    #[test]
    fn parses_legacy_form() {
        let raw = json!({"event": "ice-candidate", "to": "peer-2", "data": {"candidate": "x"}});
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.t, 20);
        assert_eq!(msg.to.as_deref(), Some("peer-2"));
    }

    #[test]
    fn legacy_subscribed_maps_to_ack() {
        let raw = json!({"event": "subscribed"});
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.t, 9);
    }

    #[test]
    fn unknown_legacy_event_defaults_to_system() {
        let raw = json!({"event": "something-nobody-heard-of"});
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.t, 3);
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let raw = json!("just a string");
        assert!(Message::parse(&raw).is_err());
    }

    #[test]
    fn three_encodings_of_same_message_agree() {
        let object = json!({"t": 1, "topic": "general", "data": {"x": 1}});
        let positional = json!([1, "general", {"x": 1}]);
        let legacy = json!({"event": "broadcast", "topic": "general", "data": {"x": 1}});

        let a = Message::parse(&object).unwrap();
        let b = Message::parse(&positional).unwrap();
        let c = Message::parse(&legacy).unwrap();

        assert_eq!(a.t, b.t);
        assert_eq!(b.t, c.t);
        assert_eq!(a.topic, b.topic);
        assert_eq!(b.topic, c.topic);
        assert_eq!(a.data, b.data);
        assert_eq!(b.data, c.data);
    }

    #[test]
    fn serialization_omits_absent_fields() {
        let msg = Message::new(6);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("topic"));
        assert!(!json.contains("threadId"));
    }
}
