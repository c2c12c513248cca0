//! OCPP-J RPC engine
//!
//! - `messages`: CALL / CALLRESULT / CALLERROR framing and error codes
//! - `registry`: role-scoped action registry
//! - `handler`: listener boundary for inbound calls
//! - `correlator`: single outstanding call per connection, timeouts
//! - `dispatcher`: routes inbound frames
//! - `endpoint`: per-connection engine, central system and charge point roles
//! - `transport`: abstract duplex channel
//! - `ws`: WebSocket binding

pub mod messages;
pub mod registry;
pub mod handler;
pub mod correlator;
pub mod dispatcher;
pub mod endpoint;
pub mod transport;
pub mod ws;

pub use messages::{Call, CallError, CallResult, DecodeError, DecodeErrorKind, ErrorCode, Frame, MessageType};
pub use registry::{FeatureDescriptor, FeatureRegistry, Origin, RegistryError, Role};
pub use handler::{HandlerError, HandlerMap};
pub use correlator::{CallFailure, Callback, Correlator, Outcome, PendingCall, RemoteError, Resolution, SendError};
pub use dispatcher::{Dispatcher, Inbound};
pub use endpoint::{CentralSystem, ChargePoint, ConnectError, Endpoint};
pub use transport::{channel, loopback, Channel, ConnectionId, FrameSink, Link, TransportError};
pub use ws::{WsClient, WsError, WsServer};
