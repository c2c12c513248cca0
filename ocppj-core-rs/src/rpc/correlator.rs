//! Call correlator
//!
//! Per-connection state machine enforcing one outstanding outbound call:
//!
//! ```text
//!   Idle ──send──► Awaiting ──resolve / expire──► Idle
//!     │                │
//!     └────close───────┴──────────► Closed
//! ```
//!
//! The slot mutex is the serialization boundary between senders, the reader
//! task resolving responses, and the timeout timer. Completions fire exactly
//! once, always after the slot has been released.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::messages::{Call, ErrorCode};
use super::registry::{ConfirmationShape, FeatureDescriptor};
use super::transport::{ConnectionId, FrameSink, TransportError};
use crate::config::MessageIdGenerator;
use crate::ocpp::{Action, Confirmation, Request};
use crate::validation::{Validate, ValidationError};

/// Synchronous failure of a send; nothing was put on the wire
#[derive(Debug, Error)]
pub enum SendError {
    #[error("call {pending} is still awaiting its response")]
    Busy { pending: String },

    #[error("request failed validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("action {0} is not supported by this endpoint")]
    UnsupportedAction(Action),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no tokio runtime available for the call timer")]
    NoRuntime,
}

/// Asynchronous outcome of a call that was sent
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallFailure {
    #[error("peer answered {code}: {description}")]
    Remote {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("confirmation failed validation: {0}")]
    InvalidConfirmation(ValidationError),

    #[error("confirmation could not be decoded: {0}")]
    MalformedConfirmation(String),

    #[error("confirmation of {0} does not match the request")]
    UnexpectedConfirmation(Action),

    #[error("connection closed")]
    ConnectionClosed,
}

/// CALLERROR content handed to [`Correlator::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

/// What `resolve` did with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Matched the pending call, which is now complete
    Resolved,
    /// No pending call with that id; discarded
    Unmatched,
}

/// What a finished call resolves to
pub type Outcome = Result<Confirmation, CallFailure>;

/// Callback completing a call sent with [`Correlator::send_with`]
pub type Callback = Box<dyn FnOnce(Outcome) + Send>;

/// Where the outcome of the pending call goes
enum Completion {
    Channel(oneshot::Sender<Outcome>),
    Callback(Callback),
}

/// The single in-flight call of a connection
struct PendingCallRecord {
    message_id: String,
    action: Action,
    confirmation_shape: ConfirmationShape,
    completion: Completion,
    created_at: Instant,
    timer: JoinHandle<()>,
}

enum Slot {
    Idle,
    Awaiting(PendingCallRecord),
    Closed,
}

struct State {
    slot: Slot,
    /// Id of the last call that timed out, to recognise its late response
    timed_out: Option<String>,
}

pub struct Correlator {
    connection: ConnectionId,
    timeout: Duration,
    ids: MessageIdGenerator,
    state: Mutex<State>,
}

impl Correlator {
    pub fn new(connection: impl Into<ConnectionId>, timeout: Duration, ids: MessageIdGenerator) -> Self {
        Self {
            connection: connection.into(),
            timeout,
            ids,
            state: Mutex::new(State {
                slot: Slot::Idle,
                timed_out: None,
            }),
        }
    }

    /// Validate, frame and send `request`, occupying the slot until resolved.
    ///
    /// Fails with `Busy` while another call is pending, and with the
    /// validation error before any byte is sent.
    pub fn send(
        self: &Arc<Self>,
        request: &Request,
        descriptor: &FeatureDescriptor,
        sink: &dyn FrameSink,
    ) -> Result<PendingCall<Confirmation>, SendError> {
        let (completion, receiver) = oneshot::channel();
        let message_id = self.start(request, descriptor, sink, Completion::Channel(completion))?;
        Ok(PendingCall::new(message_id, receiver))
    }

    /// Like [`send`](Self::send), but `callback` receives the outcome.
    ///
    /// The callback runs on whichever path releases the slot: the reader
    /// resolving the response, the timer, or `close`. It has run by the time
    /// `close` returns. On a synchronous error it is dropped without running.
    pub fn send_with(
        self: &Arc<Self>,
        request: &Request,
        descriptor: &FeatureDescriptor,
        sink: &dyn FrameSink,
        callback: Callback,
    ) -> Result<String, SendError> {
        self.start(request, descriptor, sink, Completion::Callback(callback))
    }

    fn start(
        self: &Arc<Self>,
        request: &Request,
        descriptor: &FeatureDescriptor,
        sink: &dyn FrameSink,
        completion: Completion,
    ) -> Result<String, SendError> {
        let mut state = self.state.lock();
        match &state.slot {
            Slot::Awaiting(record) => {
                return Err(SendError::Busy {
                    pending: record.message_id.clone(),
                })
            }
            Slot::Closed => return Err(SendError::ConnectionClosed),
            Slot::Idle => {}
        }

        request.validate()?;
        let runtime = Handle::try_current().map_err(|_| SendError::NoRuntime)?;

        let message_id = self.ids.next();
        let call = Call::new(message_id.clone(), descriptor.action.as_str(), request.to_payload()?);
        sink.send(call.to_bytes()?)?;
        debug!("[{}] sent {} ({})", self.connection, descriptor.action, message_id);

        let correlator = Arc::downgrade(self);
        let expiring = message_id.clone();
        let timeout = self.timeout;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(correlator) = correlator.upgrade() {
                correlator.expire(&expiring);
            }
        });

        state.slot = Slot::Awaiting(PendingCallRecord {
            message_id: message_id.clone(),
            action: descriptor.action,
            confirmation_shape: descriptor.confirmation_shape,
            completion,
            created_at: Instant::now(),
            timer,
        });

        Ok(message_id)
    }

    /// Complete the pending call with a CALLRESULT payload or CALLERROR.
    ///
    /// A response whose id does not match the pending call is discarded.
    pub fn resolve(&self, message_id: &str, outcome: Result<Value, RemoteError>) -> Resolution {
        let record = {
            let mut state = self.state.lock();
            let matches = matches!(&state.slot, Slot::Awaiting(record) if record.message_id == message_id);
            if !matches {
                if state.timed_out.as_deref() == Some(message_id) {
                    warn!(
                        "[{}] response for {} arrived after its timeout, discarding",
                        self.connection, message_id
                    );
                } else {
                    warn!(
                        "[{}] response for unknown message id {}, discarding",
                        self.connection, message_id
                    );
                }
                return Resolution::Unmatched;
            }
            match std::mem::replace(&mut state.slot, Slot::Idle) {
                Slot::Awaiting(record) => record,
                _ => return Resolution::Unmatched,
            }
        };
        record.timer.abort();

        let result = match outcome {
            Ok(payload) => match (record.confirmation_shape)(payload) {
                Ok(confirmation) => match confirmation.validate() {
                    Ok(()) => Ok(confirmation),
                    Err(e) => Err(CallFailure::InvalidConfirmation(e)),
                },
                Err(e) => Err(CallFailure::MalformedConfirmation(e.to_string())),
            },
            Err(remote) => Err(CallFailure::Remote {
                code: remote.code,
                description: remote.description,
                details: remote.details,
            }),
        };

        debug!(
            "[{}] {} ({}) resolved after {:?}",
            self.connection,
            record.action,
            record.message_id,
            record.created_at.elapsed()
        );
        complete(record.completion, result);
        Resolution::Resolved
    }

    /// Fail the pending call with a timeout if it is still `message_id`
    pub fn expire(&self, message_id: &str) {
        let record = {
            let mut state = self.state.lock();
            let matches = matches!(&state.slot, Slot::Awaiting(record) if record.message_id == message_id);
            if !matches {
                return;
            }
            state.timed_out = Some(message_id.to_string());
            match std::mem::replace(&mut state.slot, Slot::Idle) {
                Slot::Awaiting(record) => record,
                _ => return,
            }
        };
        warn!(
            "[{}] {} ({}) timed out after {:?}",
            self.connection, record.action, record.message_id, self.timeout
        );
        complete(record.completion, Err(CallFailure::Timeout(self.timeout)));
    }

    /// Refuse further sends and fail any pending call with `ConnectionClosed`
    pub fn close(&self) {
        let record = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut state.slot, Slot::Closed) {
                Slot::Awaiting(record) => Some(record),
                _ => None,
            }
        };
        if let Some(record) = record {
            record.timer.abort();
            debug!(
                "[{}] {} ({}) cancelled by teardown",
                self.connection, record.action, record.message_id
            );
            complete(record.completion, Err(CallFailure::ConnectionClosed));
        }
    }

    /// Message id of the pending call, if any
    pub fn pending(&self) -> Option<String> {
        match &self.state.lock().slot {
            Slot::Awaiting(record) => Some(record.message_id.clone()),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Closed)
    }
}

fn complete(completion: Completion, result: Outcome) {
    match completion {
        Completion::Channel(sender) => {
            if sender.send(result).is_err() {
                debug!("caller stopped waiting before completion");
            }
        }
        Completion::Callback(callback) => callback(result),
    }
}

/// Handle to a pending call, resolving to the typed confirmation
#[must_use = "a pending call does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingCall<C> {
    message_id: String,
    receiver: oneshot::Receiver<Outcome>,
    _confirmation: PhantomData<fn() -> C>,
}

impl<C> PendingCall<C> {
    fn new(message_id: String, receiver: oneshot::Receiver<Outcome>) -> Self {
        Self {
            message_id,
            receiver,
            _confirmation: PhantomData,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Narrow to the confirmation type of a specific feature
    pub fn typed<T>(self) -> PendingCall<T> {
        PendingCall::new(self.message_id, self.receiver)
    }
}

impl<C: TryFrom<Confirmation>> Future for PendingCall<C> {
    type Output = Result<C, CallFailure>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(confirmation))) => {
                let action = confirmation.action();
                Poll::Ready(C::try_from(confirmation).map_err(|_| CallFailure::UnexpectedConfirmation(action)))
            }
            Poll::Ready(Ok(Err(failure))) => Poll::Ready(Err(failure)),
            // The correlator was dropped with the call still pending
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallFailure::ConnectionClosed)),
        }
    }
}
