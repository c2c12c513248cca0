//! Inbound frame dispatch
//!
//! CALL frames go through the registry, payload validation and the handler
//! map; every CALL gets exactly one CALLRESULT or CALLERROR back. CALLRESULT
//! and CALLERROR frames go to the correlator. Nothing that arrives here can
//! take the connection down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::error::Category;
use serde_json::json;
use tracing::{debug, warn};

use super::correlator::{Correlator, RemoteError, Resolution};
use super::handler::HandlerMap;
use super::messages::{Call, CallError, CallResult, ErrorCode, Frame};
use super::registry::FeatureRegistry;
use super::transport::{ConnectionId, FrameSink};
use crate::validation::Validate;

/// Handler map shared by an endpoint and all its dispatchers
pub type SharedHandlers = Arc<RwLock<Arc<HandlerMap>>>;

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A CALL was answered with this frame
    Replied(Frame),
    /// A response was handed to the correlator
    Resolved(Resolution),
    /// Undecodable and unanswerable
    Dropped,
}

pub struct Dispatcher {
    connection: ConnectionId,
    registry: Arc<FeatureRegistry>,
    handlers: SharedHandlers,
    correlator: Arc<Correlator>,
    sink: Arc<dyn FrameSink>,
}

impl Dispatcher {
    pub fn new(
        connection: impl Into<ConnectionId>,
        registry: Arc<FeatureRegistry>,
        handlers: SharedHandlers,
        correlator: Arc<Correlator>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            connection: connection.into(),
            registry,
            handlers,
            correlator,
            sink,
        }
    }

    /// Process one inbound frame
    pub fn handle(&self, bytes: &[u8]) -> Inbound {
        debug!("[{}] received: {}", self.connection, String::from_utf8_lossy(bytes));

        match Frame::decode(bytes) {
            Ok(Frame::Call(call)) => {
                let reply = self.answer(call);
                self.reply(&reply);
                Inbound::Replied(reply)
            }
            Ok(Frame::CallResult(result)) => {
                Inbound::Resolved(self.correlator.resolve(&result.message_id, Ok(result.payload)))
            }
            Ok(Frame::CallError(error)) => {
                let remote = RemoteError {
                    code: error.error_code,
                    description: error.error_description,
                    details: error.error_details,
                };
                Inbound::Resolved(self.correlator.resolve(&error.message_id, Err(remote)))
            }
            Err(e) => match e.reply_id() {
                Some(message_id) => {
                    warn!("[{}] malformed frame {}: {}", self.connection, message_id, e);
                    let reply = Frame::CallError(CallError::new(message_id, e.kind.error_code(), e.reason.clone()));
                    self.reply(&reply);
                    Inbound::Replied(reply)
                }
                None => {
                    warn!("[{}] dropping malformed frame: {}", self.connection, e);
                    Inbound::Dropped
                }
            },
        }
    }

    /// Produce the single response to an inbound CALL
    fn answer(&self, call: Call) -> Frame {
        let message_id = call.message_id;
        let error = |code: ErrorCode, description: String| {
            Frame::CallError(CallError::new(message_id.clone(), code, description))
        };

        let descriptor = match self.registry.resolve_inbound(&call.action) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!("[{}] {}", self.connection, e);
                return error(ErrorCode::NotImplemented, format!("action {} not supported", call.action));
            }
        };
        let action = descriptor.action;

        // Unhandled actions are answered before the payload is even looked at
        let handlers = self.handlers.read().clone();
        let Some(handler) = handlers.get(action) else {
            return error(ErrorCode::NotImplemented, format!("no handler for {}", action));
        };

        let request = match (descriptor.request_shape)(call.payload) {
            Ok(request) => request,
            Err(e) => {
                return error(payload_error_code(&e), format!("invalid {} payload: {}", action, e));
            }
        };
        if let Err(e) = request.validate() {
            return Frame::CallError(
                CallError::new(message_id.clone(), e.error_code(), e.to_string())
                    .with_details(json!({ "field": e.violations.first().map(|v| v.field.as_str()) })),
            );
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&self.connection, request)));
        let confirmation = match outcome {
            Ok(Ok(confirmation)) => confirmation,
            Ok(Err(handler_error)) => {
                return Frame::CallError(
                    CallError::new(message_id.clone(), handler_error.code, handler_error.description)
                        .with_details(handler_error.details),
                );
            }
            Err(_) => {
                warn!("[{}] {} handler panicked", self.connection, action);
                return error(ErrorCode::InternalError, format!("{} handler failed", action));
            }
        };

        if confirmation.action() != action {
            warn!(
                "[{}] {} handler returned a {} confirmation",
                self.connection,
                action,
                confirmation.action()
            );
            return error(ErrorCode::InternalError, format!("{} handler returned the wrong confirmation", action));
        }
        if let Err(e) = confirmation.validate() {
            warn!("[{}] {} handler returned an invalid confirmation: {}", self.connection, action, e);
            return error(ErrorCode::InternalError, format!("invalid {} confirmation", action));
        }

        match confirmation.to_payload() {
            Ok(payload) => Frame::CallResult(CallResult::new(message_id.clone(), payload)),
            Err(e) => error(ErrorCode::InternalError, format!("failed to encode {} confirmation: {}", action, e)),
        }
    }

    fn reply(&self, frame: &Frame) {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[{}] failed to encode reply: {}", self.connection, e);
                return;
            }
        };
        if let Err(e) = self.sink.send(bytes) {
            warn!("[{}] failed to send reply {}: {}", self.connection, frame.message_id(), e);
        }
    }
}

/// CALLERROR code for a payload serde could not map onto the request type
fn payload_error_code(e: &serde_json::Error) -> ErrorCode {
    // serde_json has no category for absent fields; matches the message
    // prefix serde's derive emits for them
    match e.classify() {
        Category::Data if e.to_string().starts_with("missing field") => ErrorCode::OccurrenceConstraintViolation,
        Category::Data => ErrorCode::TypeConstraintViolation,
        _ => ErrorCode::FormationViolation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageIdGenerator;
    use crate::ocpp::{
        features, Action, Confirmation, ConfigurationKey, GetConfigurationConfirmation, HeartbeatConfirmation,
        Profile, Request,
    };
    use crate::rpc::handler::HandlerError;
    use crate::rpc::registry::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        dispatcher: Dispatcher,
        wire: mpsc::UnboundedReceiver<Vec<u8>>,
        handlers: SharedHandlers,
    }

    fn charge_point(handlers: HandlerMap) -> Fixture {
        let (tx, wire) = mpsc::unbounded_channel();
        let sink: Arc<dyn FrameSink> = Arc::new(tx);
        let registry = Arc::new(FeatureRegistry::for_role(Role::ChargePoint, Profile::ALL));
        let handlers: SharedHandlers = Arc::new(RwLock::new(Arc::new(handlers)));
        let correlator = Arc::new(Correlator::new("CP-1", Duration::from_secs(5), MessageIdGenerator::sequential()));
        let dispatcher = Dispatcher::new("CP-1", registry, handlers.clone(), correlator, sink);
        Fixture {
            dispatcher,
            wire,
            handlers,
        }
    }

    fn error_code(inbound: Inbound) -> ErrorCode {
        match inbound {
            Inbound::Replied(Frame::CallError(error)) => error.error_code,
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    fn get_configuration_handler() -> HandlerMap {
        HandlerMap::new().on::<features::GetConfiguration, _>(|_, request| {
            let known = request
                .key
                .iter()
                .map(|k| ConfigurationKey::new(k.clone(), true, Some("v".to_string())))
                .collect();
            Ok(GetConfigurationConfirmation::new(known))
        })
    }

    #[test]
    fn test_call_is_answered_with_result() {
        let mut fixture = charge_point(get_configuration_handler());
        let inbound = fixture
            .dispatcher
            .handle(br#"[2,"m1","GetConfiguration",{"key":["key1"]}]"#);

        match &inbound {
            Inbound::Replied(Frame::CallResult(result)) => {
                assert_eq!(result.message_id, "m1");
                assert_eq!(result.payload["configurationKey"][0]["key"], "key1");
            }
            other => panic!("expected CallResult, got {:?}", other),
        }

        let sent = fixture.wire.try_recv().unwrap();
        assert_eq!(Frame::decode(&sent).unwrap(), match inbound {
            Inbound::Replied(frame) => frame,
            _ => unreachable!(),
        });
    }

    #[test]
    fn test_unknown_action_never_reaches_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut handlers = HandlerMap::new();
        for action in Action::ALL {
            let counter = counter.clone();
            handlers.insert(*action, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::internal("unreachable"))
            });
        }
        let fixture = charge_point(handlers);

        // Unknown, and known but only sent by charge points
        let unknown = fixture.dispatcher.handle(br#"[2,"m1","NoSuchAction",{}]"#);
        let wrong_direction = fixture.dispatcher.handle(br#"[2,"m2","BootNotification",{}]"#);

        assert_eq!(error_code(unknown), ErrorCode::NotImplemented);
        assert_eq!(error_code(wrong_direction), ErrorCode::NotImplemented);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_handler_is_not_implemented() {
        let fixture = charge_point(HandlerMap::new());
        let inbound = fixture.dispatcher.handle(br#"[2,"m1","Reset",{"type":"Hard"}]"#);
        assert_eq!(error_code(inbound), ErrorCode::NotImplemented);
    }

    #[test]
    fn test_handlers_can_be_swapped() {
        let fixture = charge_point(HandlerMap::new());
        *fixture.handlers.write() = Arc::new(get_configuration_handler());

        let inbound = fixture
            .dispatcher
            .handle(br#"[2,"m1","GetConfiguration",{"key":["key1"]}]"#);
        assert!(matches!(inbound, Inbound::Replied(Frame::CallResult(_))));
    }

    #[test]
    fn test_payload_violations_map_to_codes() {
        let fixture = charge_point(get_configuration_handler());

        let duplicate = fixture
            .dispatcher
            .handle(br#"[2,"m1","GetConfiguration",{"key":["a","a"]}]"#);
        assert_eq!(error_code(duplicate), ErrorCode::OccurrenceConstraintViolation);

        let long_key = format!(r#"[2,"m2","GetConfiguration",{{"key":["{}"]}}]"#, "k".repeat(51));
        let too_long = fixture.dispatcher.handle(long_key.as_bytes());
        assert_eq!(error_code(too_long), ErrorCode::PropertyConstraintViolation);

        let wrong_type = fixture
            .dispatcher
            .handle(br#"[2,"m3","GetConfiguration",{"key":"key1"}]"#);
        assert_eq!(error_code(wrong_type), ErrorCode::TypeConstraintViolation);
    }

    #[test]
    fn test_missing_required_field() {
        let handlers = HandlerMap::new().on::<features::GetDiagnostics, _>(|_, _| {
            Ok(crate::ocpp::GetDiagnosticsConfirmation::default())
        });
        let fixture = charge_point(handlers);

        let inbound = fixture.dispatcher.handle(br#"[2,"m1","GetDiagnostics",{"retries":1}]"#);
        assert_eq!(error_code(inbound), ErrorCode::OccurrenceConstraintViolation);
    }

    #[test]
    fn test_serde_error_classification() {
        let missing = serde_json::from_value::<crate::ocpp::GetDiagnosticsRequest>(serde_json::json!({"retries": 1}))
            .unwrap_err();
        assert!(missing.to_string().starts_with("missing field"), "serde wording changed: {}", missing);
        assert_eq!(payload_error_code(&missing), ErrorCode::OccurrenceConstraintViolation);

        let wrong_type =
            serde_json::from_value::<crate::ocpp::GetDiagnosticsRequest>(serde_json::json!({"location": 7}))
                .unwrap_err();
        assert_eq!(payload_error_code(&wrong_type), ErrorCode::TypeConstraintViolation);

        let syntax = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        assert_eq!(payload_error_code(&syntax), ErrorCode::FormationViolation);
    }

    #[test]
    fn test_handler_faults_become_internal_error() {
        let mut handlers = HandlerMap::new().on::<features::Reset, _>(|_, _| panic!("boom"));
        handlers.insert(Action::GetConfiguration, |_, _| {
            Ok(Confirmation::Heartbeat(HeartbeatConfirmation {
                current_time: chrono::Utc::now(),
            }))
        });
        handlers.insert(Action::RemoteStopTransaction, |_, _| {
            Err(HandlerError::not_supported("no transactions here"))
        });
        let fixture = charge_point(handlers);

        let panicked = fixture.dispatcher.handle(br#"[2,"m1","Reset",{"type":"Soft"}]"#);
        assert_eq!(error_code(panicked), ErrorCode::InternalError);

        let wrong_variant = fixture
            .dispatcher
            .handle(br#"[2,"m2","GetConfiguration",{"key":["a"]}]"#);
        assert_eq!(error_code(wrong_variant), ErrorCode::InternalError);

        let refused = fixture
            .dispatcher
            .handle(br#"[2,"m3","RemoteStopTransaction",{"transactionId":7}]"#);
        assert_eq!(error_code(refused), ErrorCode::NotSupported);
    }

    #[test]
    fn test_invalid_confirmation_is_internal_error() {
        let handlers = HandlerMap::new().on::<features::GetConfiguration, _>(|_, _| {
            Ok(GetConfigurationConfirmation::default().with_unknown_keys(["k".repeat(51)]))
        });
        let fixture = charge_point(handlers);

        let inbound = fixture
            .dispatcher
            .handle(br#"[2,"m1","GetConfiguration",{"key":["a"]}]"#);
        assert_eq!(error_code(inbound), ErrorCode::InternalError);
    }

    #[test]
    fn test_malformed_frames() {
        let mut fixture = charge_point(HandlerMap::new());

        let unknown_type = fixture.dispatcher.handle(br#"[9,"m1","Heartbeat",{}]"#);
        assert_eq!(error_code(unknown_type), ErrorCode::ProtocolError);

        let bad_arity = fixture.dispatcher.handle(br#"[2,"m2","Heartbeat"]"#);
        assert_eq!(error_code(bad_arity), ErrorCode::FormationViolation);

        assert_eq!(fixture.dispatcher.handle(b"garbage"), Inbound::Dropped);
        assert_eq!(fixture.dispatcher.handle(br#"[3,"m3"]"#), Inbound::Dropped);

        // Only the two answerable frames produced output
        assert!(fixture.wire.try_recv().is_ok());
        assert!(fixture.wire.try_recv().is_ok());
        assert!(fixture.wire.try_recv().is_err());
    }

    #[test]
    fn test_unmatched_response_is_discarded() {
        let fixture = charge_point(HandlerMap::new());
        let inbound = fixture.dispatcher.handle(br#"[3,"nobody",{}]"#);
        assert_eq!(inbound, Inbound::Resolved(Resolution::Unmatched));

        let inbound = fixture
            .dispatcher
            .handle(br#"[4,"nobody","GenericError","",{}]"#);
        assert_eq!(inbound, Inbound::Resolved(Resolution::Unmatched));
    }

    #[test]
    fn test_request_variant_matches_action() {
        let request = (Action::Reset.descriptor().request_shape)(serde_json::json!({"type": "Hard"})).unwrap();
        assert!(matches!(request, Request::Reset(_)));
    }
}
