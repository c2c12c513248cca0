//! Property tests for framing, dispatch and correlation
//!
//! Tests invariants for:
//! - Codec: decode never panics, CALL frames survive encode/decode
//! - Dispatch: every CALL gets exactly one reply carrying its message id
//! - Correlation: at most one outstanding call per connection

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ocppj_core::ocpp::{Action, HeartbeatRequest, Profile, Request, ResetRequest, ResetType};
use ocppj_core::rpc::*;
use ocppj_core::MessageIdGenerator;
use parking_lot::RwLock;
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ============================================================================
// Strategies
// ============================================================================

fn message_id() -> impl Strategy<Value = String> {
    "[A-Za-z0-9-]{1,36}"
}

fn action() -> impl Strategy<Value = Action> {
    prop::sample::select(Action::ALL.to_vec())
}

fn payload() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-zA-Z]{1,12}", "[ -~]{0,24}", 0..5).prop_map(|fields: BTreeMap<String, String>| {
        Value::Object(fields.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
    })
}

fn action_name() -> impl Strategy<Value = String> {
    prop_oneof![action().prop_map(|a| a.as_str().to_string()), "[A-Za-z]{1,24}"]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn dispatcher(role: Role) -> (Dispatcher, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (sink, replies) = mpsc::unbounded_channel();
    let registry = Arc::new(FeatureRegistry::for_role(role, Profile::ALL));
    let correlator = Arc::new(Correlator::new("CP-1", Duration::from_secs(30), MessageIdGenerator::sequential()));
    let handlers = Arc::new(RwLock::new(Arc::new(HandlerMap::new())));
    let dispatcher = Dispatcher::new("CP-1", registry, handlers, correlator, Arc::new(sink));
    (dispatcher, replies)
}

// ============================================================================
// Codec Property Tests
// ============================================================================

proptest! {
    /// Decoding arbitrary bytes returns an error instead of panicking
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Frame::decode(&bytes);
    }

    /// CALL frames come back field for field
    #[test]
    fn call_survives_encoding(id in message_id(), action in action(), payload in payload()) {
        let call = Call::new(id, action.as_str(), payload);
        let decoded = Frame::decode(&call.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(decoded, Frame::Call(call));
    }

    /// Only malformed CALL-like frames are answered; responses never are
    #[test]
    fn malformed_responses_are_never_answered(id in message_id(), message_type in 3i64..=4, extra in 0usize..3) {
        let mut frame = vec![json!(message_type), json!(id)];
        frame.extend(std::iter::repeat(json!(null)).take(extra));
        let err = Frame::decode(&serde_json::to_vec(&frame).unwrap()).unwrap_err();
        prop_assert_eq!(err.reply_id(), None);
    }

    /// Unknown message types with a readable id get a ProtocolError
    #[test]
    fn unknown_message_type_is_protocol_error(id in message_id(), message_type in 5i64..100) {
        let bytes = serde_json::to_vec(&json!([message_type, id, {}])).unwrap();
        let err = Frame::decode(&bytes).unwrap_err();
        prop_assert_eq!(err.reply_id(), Some(id.as_str()));
        prop_assert_eq!(err.kind.error_code(), ErrorCode::ProtocolError);
    }

    /// Action names parse back to the same action
    #[test]
    fn action_names_round_trip(action in action()) {
        prop_assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        prop_assert_eq!(action.to_string(), action.as_str());
    }
}

// ============================================================================
// Dispatch Property Tests
// ============================================================================

proptest! {
    /// Every CALL, known action or not, gets exactly one reply with its id
    #[test]
    fn every_call_answered_once(id in message_id(), name in action_name(), payload in payload()) {
        let (dispatcher, mut replies) = dispatcher(Role::ChargePoint);
        let bytes = Call::new(id.clone(), name, payload).to_bytes().unwrap();

        let outcome = dispatcher.handle(&bytes);
        prop_assert!(matches!(outcome, Inbound::Replied(_)));

        let reply = Frame::decode(&replies.try_recv().unwrap()).unwrap();
        prop_assert_eq!(reply.message_id(), id.as_str());
        prop_assert!(replies.try_recv().is_err());
    }

    /// Without handlers every CALL is NotImplemented, whatever its payload
    #[test]
    fn no_handlers_means_not_implemented(id in message_id(), name in action_name(), payload in payload()) {
        let (dispatcher, _replies) = dispatcher(Role::CentralSystem);
        let bytes = Call::new(id, name, payload).to_bytes().unwrap();

        match dispatcher.handle(&bytes) {
            Inbound::Replied(Frame::CallError(error)) => {
                prop_assert_eq!(error.error_code, ErrorCode::NotImplemented);
            }
            other => prop_assert!(false, "expected a CALLERROR, got {:?}", other),
        }
    }

    /// Stray responses never produce outbound traffic
    #[test]
    fn stray_results_are_unmatched(id in message_id(), payload in payload()) {
        let (dispatcher, mut replies) = dispatcher(Role::CentralSystem);
        let bytes = CallResult::new(id, payload).to_bytes().unwrap();

        prop_assert_eq!(dispatcher.handle(&bytes), Inbound::Resolved(Resolution::Unmatched));
        prop_assert!(replies.try_recv().is_err());
    }
}

// ============================================================================
// Correlation Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: one outstanding call; later sends are Busy until it resolves
    #[test]
    fn single_outstanding_call(attempts in 2usize..10) {
        let rt = runtime();
        let (sent, busy, frames, first_id, resolutions) = rt.block_on(async {
            let registry = FeatureRegistry::for_role(Role::CentralSystem, Profile::ALL);
            let descriptor = registry.resolve_outbound(Action::Reset).unwrap();
            let correlator = Arc::new(Correlator::new("CP-1", Duration::from_secs(30), MessageIdGenerator::sequential()));
            let (sink, mut wire) = mpsc::unbounded_channel::<Vec<u8>>();
            let request = Request::from(ResetRequest { reset_type: ResetType::Soft });

            let mut sent = Vec::new();
            let mut busy = Vec::new();
            for _ in 0..attempts {
                match correlator.send(&request, descriptor, &sink) {
                    Ok(pending) => sent.push(pending.message_id().to_string()),
                    Err(SendError::Busy { pending }) => busy.push(pending),
                    Err(e) => panic!("unexpected send error: {}", e),
                }
            }

            let mut frames = 0;
            while wire.try_recv().is_ok() {
                frames += 1;
            }

            let first_id = sent[0].clone();
            let resolutions = (
                correlator.resolve(&first_id, Ok(json!({"status": "Accepted"}))),
                correlator.resolve(&first_id, Ok(json!({"status": "Accepted"}))),
            );
            (sent, busy, frames, first_id, resolutions)
        });

        prop_assert_eq!(sent.len(), 1);
        prop_assert_eq!(frames, 1);
        prop_assert_eq!(busy.len(), attempts - 1);
        prop_assert!(busy.iter().all(|pending| *pending == first_id));
        prop_assert_eq!(resolutions, (Resolution::Resolved, Resolution::Unmatched));
    }

    /// Sends on a closed correlator fail without touching the wire
    #[test]
    fn closed_correlator_refuses(attempts in 1usize..5) {
        let rt = runtime();
        let (refused, leaked) = rt.block_on(async {
            let registry = FeatureRegistry::for_role(Role::ChargePoint, Profile::ALL);
            let descriptor = registry.resolve_outbound(Action::Heartbeat).unwrap();
            let correlator = Arc::new(Correlator::new("CP-1", Duration::from_secs(30), MessageIdGenerator::default()));
            let (sink, mut wire) = mpsc::unbounded_channel::<Vec<u8>>();
            correlator.close();

            let request = Request::from(HeartbeatRequest {});
            let refused = (0..attempts)
                .filter(|_| matches!(correlator.send(&request, descriptor, &sink), Err(SendError::ConnectionClosed)))
                .count();
            (refused, wire.try_recv().is_ok())
        });

        prop_assert_eq!(refused, attempts);
        prop_assert!(!leaked);
    }
}
