//! OCPP-J message framing
//!
//! OCPP-J carries three message shapes as JSON arrays over WebSocket:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
//!
//! The codec is stateless. It does not interpret actions or payloads; that is
//! the job of the registry and the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            2 => Some(MessageType::Call),
            3 => Some(MessageType::CallResult),
            4 => Some(MessageType::CallError),
            _ => None,
        }
    }
}

/// OCPP-J 1.6 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    /// Spelled `OccurenceConstraintViolation` on the 1.6 wire.
    #[serde(
        rename = "OccurenceConstraintViolation",
        alias = "OccurrenceConstraintViolation"
    )]
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::OccurrenceConstraintViolation => "OccurenceConstraintViolation",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::GenericError => "GenericError",
        }
    }

    /// Parse a wire error code. Unknown codes degrade to `GenericError`.
    pub fn from_wire(code: &str) -> Self {
        serde_json::from_value(Value::String(code.to_string())).unwrap_or(ErrorCode::GenericError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a frame could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The leading discriminator is not 2, 3 or 4.
    MessageTypeNotSupported,
    /// Not a JSON array, wrong arity or wrong element types.
    FormationViolation,
}

impl DecodeErrorKind {
    /// Error code used when the malformed frame is answered with a CALLERROR
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DecodeErrorKind::MessageTypeNotSupported => ErrorCode::ProtocolError,
            DecodeErrorKind::FormationViolation => ErrorCode::FormationViolation,
        }
    }
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorKind::MessageTypeNotSupported => f.write_str("MessageTypeNotSupported"),
            DecodeErrorKind::FormationViolation => f.write_str("FormationViolation"),
        }
    }
}

/// A frame that could not be decoded, with whatever could be salvaged from it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {reason}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub reason: String,
    /// Message type discriminator, if one was readable
    pub message_type: Option<i64>,
    /// Message id, if one was readable
    pub message_id: Option<String>,
}

impl DecodeError {
    fn formation(reason: impl Into<String>, message_type: Option<i64>, message_id: Option<String>) -> Self {
        Self {
            kind: DecodeErrorKind::FormationViolation,
            reason: reason.into(),
            message_type,
            message_id,
        }
    }

    /// Message id to answer with a CALLERROR, if the frame deserves an answer.
    ///
    /// Responses (types 3 and 4) are never answered, so two peers cannot
    /// bounce errors back and forth.
    pub fn reply_id(&self) -> Option<&str> {
        match self.message_type.and_then(MessageType::from_i64) {
            Some(MessageType::CallResult) | Some(MessageType::CallError) => None,
            _ => self.message_id.as_deref(),
        }
    }
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(message_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Serialize to OCPP wire format: [2, messageId, action, payload]
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let array = serde_json::json!([
            MessageType::Call as i32,
            &self.message_id,
            &self.action,
            &self.payload
        ]);
        serde_json::to_vec(&array)
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(message_id: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
        }
    }

    /// Serialize to OCPP wire format: [3, messageId, payload]
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let array = serde_json::json!([
            MessageType::CallResult as i32,
            &self.message_id,
            &self.payload
        ]);
        serde_json::to_vec(&array)
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    /// Create a CALLERROR with empty details
    pub fn new(
        message_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error_details = details;
        self
    }

    /// Serialize to OCPP wire format: [4, messageId, errorCode, errorDescription, errorDetails]
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let array = serde_json::json!([
            MessageType::CallError as i32,
            &self.message_id,
            self.error_code.as_str(),
            &self.error_description,
            &self.error_details
        ]);
        serde_json::to_vec(&array)
    }
}

/// Decoded OCPP frame (any type)
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl Frame {
    /// Decode an OCPP-J frame from JSON bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| DecodeError::formation(format!("invalid JSON: {}", e), None, None))?;

        let array = match value {
            Value::Array(array) => array,
            _ => return Err(DecodeError::formation("frame is not a JSON array", None, None)),
        };

        let message_type = array
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| DecodeError::formation("missing message type", None, None))?;

        let message_id = array.get(1).and_then(Value::as_str).map(str::to_string);

        let kind = MessageType::from_i64(message_type).ok_or_else(|| DecodeError {
            kind: DecodeErrorKind::MessageTypeNotSupported,
            reason: format!("unknown message type {}", message_type),
            message_type: Some(message_type),
            message_id: message_id.clone(),
        })?;

        let formation = |reason: &str| {
            DecodeError::formation(reason, Some(message_type), message_id.clone())
        };

        let expected_len = match kind {
            MessageType::Call => 4,
            MessageType::CallResult => 3,
            MessageType::CallError => 5,
        };
        if array.len() != expected_len {
            return Err(formation(&format!(
                "expected {} elements, found {}",
                expected_len,
                array.len()
            )));
        }

        let id = match &message_id {
            Some(id) => id.clone(),
            None => return Err(formation("message id is not a string")),
        };

        let mut elements = array.into_iter().skip(2);
        match kind {
            MessageType::Call => {
                // CALL: [2, messageId, action, payload]
                let action = match elements.next() {
                    Some(Value::String(action)) => action,
                    _ => return Err(formation("action is not a string")),
                };
                let payload = match elements.next() {
                    Some(payload @ Value::Object(_)) => payload,
                    _ => return Err(formation("payload is not an object")),
                };
                Ok(Frame::Call(Call {
                    message_id: id,
                    action,
                    payload,
                }))
            }
            MessageType::CallResult => {
                // CALLRESULT: [3, messageId, payload]
                let payload = match elements.next() {
                    Some(payload @ Value::Object(_)) => payload,
                    _ => return Err(formation("payload is not an object")),
                };
                Ok(Frame::CallResult(CallResult {
                    message_id: id,
                    payload,
                }))
            }
            MessageType::CallError => {
                // CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
                let error_code = match elements.next() {
                    Some(Value::String(code)) => ErrorCode::from_wire(&code),
                    _ => return Err(formation("error code is not a string")),
                };
                let error_description = match elements.next() {
                    Some(Value::String(description)) => description,
                    _ => return Err(formation("error description is not a string")),
                };
                let error_details = elements.next().unwrap_or(Value::Null);
                Ok(Frame::CallError(CallError {
                    message_id: id,
                    error_code,
                    error_description,
                    error_details,
                }))
            }
        }
    }

    /// Get the message ID
    pub fn message_id(&self) -> &str {
        match self {
            Frame::Call(c) => &c.message_id,
            Frame::CallResult(r) => &r.message_id,
            Frame::CallError(e) => &e.message_id,
        }
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Frame::Call(c) => c.to_bytes(),
            Frame::CallResult(r) => r.to_bytes(),
            Frame::CallError(e) => e.to_bytes(),
        }
    }
}
