//! JSON codec and validation for the wire envelope.

use serde::Serialize;

use crate::error::{ConclaveError, Result};

use super::message::Envelope;

/// Maximum payload sample carried on a dead-letter diagnostic.
const DEAD_LETTER_SAMPLE_LEN: usize = 256;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Serialize a wire value to its JSON form.
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a raw payload into the envelope. Unknown enum literals survive as
/// `Unknown` variants; structurally malformed payloads fail here and belong
/// on the dead-letter channel.
pub fn decode(raw: &str) -> Result<Envelope> {
    serde_json::from_str(raw)
        .map_err(|e| ConclaveError::Protocol(format!("undecodable payload: {e}")))
}

/// Validate a decoded envelope, collecting every violation rather than
/// stopping at the first.
pub fn validate(envelope: &Envelope) -> std::result::Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if envelope.task_id().trim().is_empty() {
        errors.push(FieldError::new("task_id", "must not be empty"));
    }
    if envelope.agent().trim().is_empty() {
        errors.push(FieldError::new("agent", "must not be empty"));
    }
    if envelope.content().trim().is_empty() {
        errors.push(FieldError::new("content", "must not be empty"));
    }

    let confidence = match envelope {
        Envelope::Task(t) => t.confidence,
        Envelope::TaskResult(r) => r.confidence,
        Envelope::Message(_) => None,
    };
    if let Some(c) = confidence {
        if !(0.0..=1.0).contains(&c) {
            errors.push(FieldError::new("confidence", "must be within [0, 1]"));
        }
    }

    if let Envelope::Task(t) = envelope {
        if t.target_agent.trim().is_empty() {
            errors.push(FieldError::new("target_agent", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Diagnostic published to the dead-letter channel for payloads that could
/// not be decoded or validated.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub receiver: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub field_errors: Vec<FieldError>,
    pub payload_sample: String,
}

impl DeadLetter {
    pub fn undecodable(receiver: &str, raw: &str, reason: impl Into<String>) -> Self {
        Self {
            receiver: receiver.to_string(),
            reason: reason.into(),
            field_errors: Vec::new(),
            payload_sample: sample(raw),
        }
    }

    pub fn invalid(receiver: &str, raw: &str, field_errors: Vec<FieldError>) -> Self {
        Self {
            receiver: receiver.to_string(),
            reason: "validation failed".to_string(),
            field_errors,
            payload_sample: sample(raw),
        }
    }
}

fn sample(raw: &str) -> String {
    if raw.len() <= DEAD_LETTER_SAMPLE_LEN {
        raw.to_string()
    } else {
        let mut end = DEAD_LETTER_SAMPLE_LEN;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        raw[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{Message, MessageIntent, Task, TaskEvent};

    #[test]
    fn test_roundtrip_identity() {
        let task = Task::new(
            "t1",
            "moderator",
            "summarize the report",
            "worker_a",
            MessageIntent::StartTask,
            TaskEvent::Plan,
        )
        .with_confidence(0.9);

        let encoded = encode(&task).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, Envelope::Task(task));
    }

    #[test]
    fn test_missing_task_id_is_protocol_error() {
        let err = decode(r#"{"agent":"a","content":"c","intent":"chat"}"#).unwrap_err();
        assert!(matches!(err, ConclaveError::Protocol(_)));
    }

    #[test]
    fn test_invalid_json_is_protocol_error() {
        assert!(decode("{not json").is_err());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let msg = Message::new("", "", "", MessageIntent::Chat);
        let errors = validate(&Envelope::Message(msg)).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "task_id"));
        assert!(errors.iter().any(|e| e.field == "content"));
    }

    #[test]
    fn test_validate_confidence_range() {
        let task = Task::new(
            "t1",
            "a",
            "c",
            "b",
            MessageIntent::StartTask,
            TaskEvent::Plan,
        )
        .with_confidence(1.5);
        let errors = validate(&Envelope::Task(task)).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "confidence");
    }

    #[test]
    fn test_dead_letter_sample_truncated() {
        let raw = "x".repeat(1000);
        let letter = DeadLetter::undecodable("worker_a", &raw, "bad json");
        assert_eq!(letter.payload_sample.len(), 256);
    }
}
