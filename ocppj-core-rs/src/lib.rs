//! # OCPP-J Core
//!
//! OCPP-J 1.6 message exchange engine for both sides of the protocol: the
//! central system and the charge point.
//!
//! The engine frames CALL / CALLRESULT / CALLERROR arrays, validates every
//! payload in both directions, keeps at most one outstanding call per
//! connection, and dispatches inbound calls to typed handlers.
//!
//! ## Architecture
//!
//! ```text
//!  caller ──send::<F>──┐                         ┌──► handler (HandlerMap)
//!                      ▼                         │
//! ┌────────────────────────────────────────────────────────────┐
//! │ Endpoint (one per role)                                    │
//! │  ┌──────────────── ConnectionContext (per connection) ───┐ │
//! │  │ Validation ─► Correlator ─► Codec ─► FrameSink ───────┼─┼──► peer
//! │  │                  ▲                                     │ │
//! │  │                  └── Dispatcher ◄── Codec ◄── inbound ◄┼─┼─── peer
//! │  └────────────────────────────────────────────────────────┘ │
//! │  FeatureRegistry (read-only, shared)                        │
//! └────────────────────────────────────────────────────────────┘
//!                      │ Channel
//!                      ▼
//!          WebSocket (rpc::ws) or in-memory (rpc::transport)
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use ocppj_core::ocpp::{features, GetConfigurationRequest};
//! use ocppj_core::rpc::{loopback, CentralSystem, ChargePoint, HandlerMap};
//! use ocppj_core::ocpp::GetConfigurationConfirmation;
//! use ocppj_core::EngineConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central = CentralSystem::new(EngineConfig::default());
//!     let charge_point = ChargePoint::new("CP-1", EngineConfig::default());
//!     charge_point.set_handlers(HandlerMap::new().on::<features::GetConfiguration, _>(
//!         |_, request| Ok(GetConfigurationConfirmation::default().with_unknown_keys(request.key)),
//!     ));
//!
//!     let (cs_side, cp_side) = loopback("CP-1");
//!     central.connect(cs_side)?;
//!     charge_point.connect(cp_side)?;
//!
//!     let confirmation = central
//!         .send::<features::GetConfiguration>("CP-1", GetConfigurationRequest::new(["HeartbeatInterval"]))?
//!         .await?;
//!     println!("unknown keys: {:?}", confirmation.unknown_key);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ocpp;
pub mod rpc;
pub mod validation;

pub use config::{EngineConfig, MessageIdGenerator, WsConfig};
pub use validation::{Rule, Validate, ValidationError, Validator, Violation};

// Re-export key types
pub use ocpp::{features, Action, Confirmation, Feature, Profile, Request};
pub use rpc::{
    CallFailure, CentralSystem, ChargePoint, ErrorCode, HandlerError, HandlerMap, PendingCall, Role, SendError,
};
