//! Listener boundary
//!
//! Business code plugs in per action through a [`HandlerMap`]. A handler gets
//! the connection identity and the decoded request and returns either a
//! confirmation or a protocol error to report to the peer.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use super::messages::ErrorCode;
use crate::ocpp::{Action, Confirmation, Feature, Request};

/// Error a handler reports to the peer as a CALLERROR
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {description}")]
pub struct HandlerError {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl HandlerError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Object(Map::new()),
        }
    }

    pub fn not_supported(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, description)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, description)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Type-erased handler for one action
pub type DynHandler = dyn Fn(&str, Request) -> Result<Confirmation, HandlerError> + Send + Sync;

/// Action → handler mapping, built once and handed to an endpoint
#[derive(Default)]
pub struct HandlerMap {
    handlers: HashMap<Action, Box<DynHandler>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for feature `F`, replacing any previous one
    pub fn on<F, H>(mut self, handler: H) -> Self
    where
        F: Feature,
        H: Fn(&str, F::Request) -> Result<F::Confirmation, HandlerError> + Send + Sync + 'static,
    {
        let erased = move |connection: &str, request: Request| -> Result<Confirmation, HandlerError> {
            let action = request.action();
            let request = <F::Request as TryFrom<Request>>::try_from(request).map_err(|_| {
                HandlerError::internal(format!("{} handler received a {} request", F::ACTION, action))
            })?;
            handler(connection, request).map(Into::into)
        };
        self.handlers.insert(F::ACTION, Box::new(erased));
        self
    }

    /// Register an untyped handler for `action`
    pub fn insert<H>(&mut self, action: Action, handler: H)
    where
        H: Fn(&str, Request) -> Result<Confirmation, HandlerError> + Send + Sync + 'static,
    {
        self.handlers.insert(action, Box::new(handler));
    }

    pub fn get(&self, action: Action) -> Option<&DynHandler> {
        self.handlers.get(&action).map(|h| h.as_ref())
    }

    pub fn contains(&self, action: Action) -> bool {
        self.handlers.contains_key(&action)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::features;
    use crate::ocpp::{ResetConfirmation, ResetRequest, ResetStatus, ResetType};

    #[test]
    fn test_typed_handler_roundtrip() {
        let handlers = HandlerMap::new().on::<features::Reset, _>(|connection, request| {
            assert_eq!(connection, "CP-1");
            assert_eq!(request.reset_type, ResetType::Hard);
            Ok(ResetConfirmation {
                status: ResetStatus::Accepted,
            })
        });

        let handler = handlers.get(Action::Reset).unwrap();
        let request = Request::from(ResetRequest {
            reset_type: ResetType::Hard,
        });
        let confirmation = handler("CP-1", request).unwrap();
        assert_eq!(
            confirmation,
            Confirmation::Reset(ResetConfirmation {
                status: ResetStatus::Accepted
            })
        );
        assert!(!handlers.contains(Action::Heartbeat));
    }

    #[test]
    fn test_mismatched_request_is_internal_error() {
        let handlers = HandlerMap::new().on::<features::Reset, _>(|_, _| {
            Ok(ResetConfirmation {
                status: ResetStatus::Accepted,
            })
        });
        let handler = handlers.get(Action::Reset).unwrap();
        let err = handler("CP-1", Request::from(crate::ocpp::HeartbeatRequest {})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_handler_error_defaults() {
        let err = HandlerError::not_supported("no reset while charging");
        assert_eq!(err.code, ErrorCode::NotSupported);
        assert_eq!(err.details, serde_json::json!({}));
        assert_eq!(err.to_string(), "NotSupported: no reset while charging");
    }
}
