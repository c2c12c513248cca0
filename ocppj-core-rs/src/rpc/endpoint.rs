//! Connection and role endpoints
//!
//! An [`Endpoint`] owns one correlator/dispatcher pair per connection and a
//! reader task that feeds inbound frames to the dispatcher in arrival order.
//! Both roles run the same engine; [`CentralSystem`] and [`ChargePoint`] are
//! thin facades fixing the role and the number of connections.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::correlator::{CallFailure, Correlator, Outcome, PendingCall, SendError};
use super::dispatcher::{Dispatcher, SharedHandlers};
use super::handler::HandlerMap;
use super::registry::{FeatureDescriptor, FeatureRegistry, Role};
use super::transport::{Channel, ConnectionId, FrameSink};
use crate::config::EngineConfig;
use crate::ocpp::{Confirmation, Feature, Request};

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("no tokio runtime available for the connection reader")]
    NoRuntime,

    #[error("endpoint is bound to charge point {expected}, not {found}")]
    IdentityMismatch { expected: String, found: String },
}

/// Per-connection state
pub struct ConnectionContext {
    id: ConnectionId,
    correlator: Arc<Correlator>,
    sink: Arc<dyn FrameSink>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn stop_reader(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

struct Inner {
    role: Role,
    config: EngineConfig,
    registry: Arc<FeatureRegistry>,
    handlers: SharedHandlers,
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionContext>>>,
    on_connect: RwLock<Option<Hook>>,
    on_disconnect: RwLock<Option<Hook>>,
}

/// Role-parametrized exchange engine over any number of connections
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

impl Endpoint {
    pub fn new(role: Role, config: EngineConfig) -> Self {
        let registry = Arc::new(FeatureRegistry::for_role(role, &config.profiles));
        Self {
            inner: Arc::new(Inner {
                role,
                config,
                registry,
                handlers: Arc::new(RwLock::new(Arc::new(HandlerMap::new()))),
                connections: RwLock::new(HashMap::new()),
                on_connect: RwLock::new(None),
                on_disconnect: RwLock::new(None),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.inner.registry
    }

    /// Replace the handler map; applies to connections already open
    pub fn set_handlers(&self, handlers: HandlerMap) {
        *self.inner.handlers.write() = Arc::new(handlers);
    }

    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.inner.on_connect.write() = Some(Arc::new(hook));
    }

    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.inner.on_disconnect.write() = Some(Arc::new(hook));
    }

    /// Start serving an open channel. An existing connection with the same
    /// identity is torn down first.
    pub fn connect(&self, channel: Channel) -> Result<(), ConnectError> {
        let runtime = Handle::try_current().map_err(|_| ConnectError::NoRuntime)?;
        let Channel { id, sink, inbound } = channel;

        if let Some(previous) = self.context(&id) {
            info!("[{}] replacing existing connection", id);
            self.teardown(&previous);
        }

        let correlator = Arc::new(Correlator::new(
            id.clone(),
            self.inner.config.call_timeout,
            self.inner.config.message_ids.clone(),
        ));
        let dispatcher = Dispatcher::new(
            id.clone(),
            self.inner.registry.clone(),
            self.inner.handlers.clone(),
            correlator.clone(),
            sink.clone(),
        );
        let context = Arc::new(ConnectionContext {
            id: id.clone(),
            correlator,
            sink,
            reader: Mutex::new(None),
        });

        {
            // Held across the spawn so a reader that ends at once finds its context
            let mut connections = self.inner.connections.write();
            let reader = runtime.spawn(read_loop(
                Arc::downgrade(&self.inner),
                Arc::downgrade(&context),
                dispatcher,
                inbound,
            ));
            *context.reader.lock() = Some(reader);
            connections.insert(id.clone(), context);
        }

        info!("[{}] connected as {:?}", id, self.inner.role);
        let hook = self.inner.on_connect.read().clone();
        if let Some(hook) = hook {
            hook(&id);
        }
        Ok(())
    }

    /// Tear down a connection; its pending call fails with `ConnectionClosed`.
    /// Returns false if no such connection exists.
    pub fn disconnect(&self, id: &str) -> bool {
        match self.context(id) {
            Some(context) => self.teardown(&context),
            None => false,
        }
    }

    fn teardown(&self, context: &Arc<ConnectionContext>) -> bool {
        // Resolve the pending call before the context is discarded
        context.correlator.close();
        let removed = {
            let mut connections = self.inner.connections.write();
            match connections.get(&context.id) {
                Some(current) if Arc::ptr_eq(current, context) => connections.remove(&context.id).is_some(),
                _ => false,
            }
        };
        context.stop_reader();

        if removed {
            info!("[{}] disconnected", context.id);
            let hook = self.inner.on_disconnect.read().clone();
            if let Some(hook) = hook {
                hook(&context.id);
            }
        }
        removed
    }

    fn context(&self, id: &str) -> Option<Arc<ConnectionContext>> {
        self.inner.connections.read().get(id).cloned()
    }

    /// Identities of all open connections, sorted
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.inner.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.inner.connections.read().contains_key(id)
    }

    /// Message id of the call awaiting a response on `id`
    pub fn pending_call(&self, id: &str) -> Option<String> {
        self.context(id).and_then(|context| context.correlator.pending())
    }

    fn route(&self, id: &str, request: &Request) -> Result<(&FeatureDescriptor, Arc<ConnectionContext>), SendError> {
        let action = request.action();
        let descriptor = self
            .inner
            .registry
            .resolve_outbound(action)
            .map_err(|_| SendError::UnsupportedAction(action))?;
        let context = self
            .context(id)
            .ok_or_else(|| SendError::UnknownConnection(id.to_string()))?;
        Ok((descriptor, context))
    }

    /// Send a request of any action on connection `id`
    pub fn send_request(&self, id: &str, request: Request) -> Result<PendingCall<Confirmation>, SendError> {
        let (descriptor, context) = self.route(id, &request)?;
        context
            .correlator
            .send(&request, descriptor, context.sink.as_ref())
    }

    /// Send a typed request and await its typed confirmation
    pub fn send<F: Feature>(&self, id: &str, request: F::Request) -> Result<PendingCall<F::Confirmation>, SendError> {
        Ok(self.send_request(id, request.into())?.typed())
    }

    /// Send a typed request; `completion` runs exactly once with the outcome.
    ///
    /// It runs inline on the path that ends the call, so after a
    /// `disconnect` returns it has already seen `ConnectionClosed`. It is
    /// never run when this returns an error.
    pub fn send_with<F, C>(&self, id: &str, request: F::Request, completion: C) -> Result<(), SendError>
    where
        F: Feature,
        C: FnOnce(Result<F::Confirmation, CallFailure>) + Send + 'static,
    {
        let request: Request = request.into();
        let (descriptor, context) = self.route(id, &request)?;
        let callback = Box::new(move |outcome: Outcome| {
            completion(outcome.and_then(|confirmation| {
                let action = confirmation.action();
                F::Confirmation::try_from(confirmation).map_err(|_| CallFailure::UnexpectedConfirmation(action))
            }))
        });
        context
            .correlator
            .send_with(&request, descriptor, context.sink.as_ref(), callback)?;
        Ok(())
    }
}

async fn read_loop(
    endpoint: Weak<Inner>,
    context: Weak<ConnectionContext>,
    dispatcher: Dispatcher,
    mut inbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = inbound.recv().await {
        dispatcher.handle(&bytes);
    }

    debug!("inbound stream ended");
    if let (Some(inner), Some(context)) = (endpoint.upgrade(), context.upgrade()) {
        // Detach first so teardown does not abort this task mid-hook
        context.reader.lock().take();
        Endpoint { inner }.teardown(&context);
    }
}

/// Central-system role: many charge point connections
#[derive(Clone)]
pub struct CentralSystem {
    endpoint: Endpoint,
}

impl CentralSystem {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            endpoint: Endpoint::new(Role::CentralSystem, config),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn set_handlers(&self, handlers: HandlerMap) {
        self.endpoint.set_handlers(handlers);
    }

    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.endpoint.on_connect(hook);
    }

    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.endpoint.on_disconnect(hook);
    }

    /// Accept a charge point connection
    pub fn connect(&self, channel: Channel) -> Result<(), ConnectError> {
        self.endpoint.connect(channel)
    }

    pub fn disconnect(&self, charge_point: &str) -> bool {
        self.endpoint.disconnect(charge_point)
    }

    pub fn charge_points(&self) -> Vec<ConnectionId> {
        self.endpoint.connections()
    }

    pub fn send<F: Feature>(
        &self,
        charge_point: &str,
        request: F::Request,
    ) -> Result<PendingCall<F::Confirmation>, SendError> {
        self.endpoint.send::<F>(charge_point, request)
    }

    pub fn send_request(&self, charge_point: &str, request: Request) -> Result<PendingCall<Confirmation>, SendError> {
        self.endpoint.send_request(charge_point, request)
    }

    pub fn send_with<F, C>(&self, charge_point: &str, request: F::Request, completion: C) -> Result<(), SendError>
    where
        F: Feature,
        C: FnOnce(Result<F::Confirmation, CallFailure>) + Send + 'static,
    {
        self.endpoint.send_with::<F, C>(charge_point, request, completion)
    }
}

/// Charge-point role: exactly one connection, to the central system
#[derive(Clone)]
pub struct ChargePoint {
    identity: String,
    endpoint: Endpoint,
}

impl ChargePoint {
    pub fn new(identity: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            identity: identity.into(),
            endpoint: Endpoint::new(Role::ChargePoint, config),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn set_handlers(&self, handlers: HandlerMap) {
        self.endpoint.set_handlers(handlers);
    }

    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.endpoint.on_connect(hook);
    }

    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.endpoint.on_disconnect(hook);
    }

    /// Attach the channel to the central system, replacing any previous one
    pub fn connect(&self, channel: Channel) -> Result<(), ConnectError> {
        if channel.id != self.identity {
            return Err(ConnectError::IdentityMismatch {
                expected: self.identity.clone(),
                found: channel.id,
            });
        }
        self.endpoint.connect(channel)
    }

    pub fn disconnect(&self) -> bool {
        self.endpoint.disconnect(&self.identity)
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.is_connected(&self.identity)
    }

    pub fn send<F: Feature>(&self, request: F::Request) -> Result<PendingCall<F::Confirmation>, SendError> {
        self.endpoint.send::<F>(&self.identity, request)
    }

    pub fn send_request(&self, request: Request) -> Result<PendingCall<Confirmation>, SendError> {
        self.endpoint.send_request(&self.identity, request)
    }

    pub fn send_with<F, C>(&self, request: F::Request, completion: C) -> Result<(), SendError>
    where
        F: Feature,
        C: FnOnce(Result<F::Confirmation, CallFailure>) + Send + 'static,
    {
        self.endpoint.send_with::<F, C>(&self.identity, request, completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::{features, Action, HeartbeatRequest, Profile, ResetRequest, ResetType};
    use crate::rpc::transport::channel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_send_requires_known_connection() {
        let central = CentralSystem::new(EngineConfig::default());
        let result = central.send::<features::Reset>(
            "CP-404",
            ResetRequest {
                reset_type: ResetType::Soft,
            },
        );
        assert!(matches!(result, Err(SendError::UnknownConnection(id)) if id == "CP-404"));
    }

    #[tokio::test]
    async fn test_wrong_direction_is_unsupported() {
        let central = CentralSystem::new(EngineConfig::default());
        let (channel, _link) = channel("CP-1");
        central.connect(channel).unwrap();

        let result = central.send::<features::Heartbeat>("CP-1", HeartbeatRequest {});
        assert!(matches!(result, Err(SendError::UnsupportedAction(Action::Heartbeat))));
    }

    #[tokio::test]
    async fn test_unselected_profile_is_unsupported() {
        let central = CentralSystem::new(EngineConfig::default().with_profiles(&[Profile::Core]));
        let (channel, _link) = channel("CP-1");
        central.connect(channel).unwrap();

        let result = central.send::<features::GetDiagnostics>(
            "CP-1",
            crate::ocpp::GetDiagnosticsRequest::new("ftp:some/path"),
        );
        assert!(matches!(result, Err(SendError::UnsupportedAction(Action::GetDiagnostics))));
    }

    #[tokio::test]
    async fn test_charge_point_identity_is_fixed() {
        let charge_point = ChargePoint::new("CP-1", EngineConfig::default());
        let (channel, _link) = channel("CP-2");
        assert_eq!(
            charge_point.connect(channel).unwrap_err(),
            ConnectError::IdentityMismatch {
                expected: "CP-1".to_string(),
                found: "CP-2".to_string(),
            }
        );
        assert!(!charge_point.is_connected());
    }

    #[tokio::test]
    async fn test_hooks_and_connection_table() {
        let central = CentralSystem::new(EngineConfig::default());
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(AtomicUsize::new(0));
        {
            let connected = connected.clone();
            central.on_connect(move |_| {
                connected.fetch_add(1, Ordering::SeqCst);
            });
            let disconnected = disconnected.clone();
            central.on_disconnect(move |_| {
                disconnected.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (a, _a_link) = channel("CP-B");
        let (b, _b_link) = channel("CP-A");
        central.connect(a).unwrap();
        central.connect(b).unwrap();
        assert_eq!(central.charge_points(), vec!["CP-A".to_string(), "CP-B".to_string()]);
        assert_eq!(connected.load(Ordering::SeqCst), 2);

        assert!(central.disconnect("CP-A"));
        assert!(!central.disconnect("CP-A"));
        assert_eq!(central.charge_points(), vec!["CP-B".to_string()]);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_end_tears_down() {
        let charge_point = ChargePoint::new("CP-1", EngineConfig::default());
        let (channel, link) = channel("CP-1");
        charge_point.connect(channel).unwrap();
        assert!(charge_point.is_connected());

        drop(link);
        for _ in 0..100 {
            if !charge_point.is_connected() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!charge_point.is_connected());
    }

    #[tokio::test]
    async fn test_context_is_published_with_its_reader() {
        let central = CentralSystem::new(EngineConfig::default());
        let (channel, _link) = channel("CP-1");
        central.connect(channel).unwrap();

        let context = central.endpoint().context("CP-1").unwrap();
        assert!(context.reader.lock().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_already_closed_at_connect() {
        let central = CentralSystem::new(EngineConfig::default());
        let disconnected = Arc::new(AtomicUsize::new(0));
        {
            let disconnected = disconnected.clone();
            central.on_disconnect(move |_| {
                disconnected.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (channel, link) = channel("CP-1");
        drop(link);
        central.connect(channel).unwrap();

        for _ in 0..200 {
            if central.charge_points().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(central.charge_points().is_empty());
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_with_callback_has_run_when_disconnect_returns() {
        let charge_point = ChargePoint::new("CP-1", EngineConfig::default());
        let (channel, _link) = channel("CP-1");
        charge_point.connect(channel).unwrap();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        {
            let outcomes = outcomes.clone();
            charge_point
                .send_with::<features::Heartbeat, _>(HeartbeatRequest {}, move |outcome| {
                    outcomes.lock().push(outcome.map(|_| ()));
                })
                .unwrap();
        }
        assert!(outcomes.lock().is_empty());

        assert!(charge_point.disconnect());
        assert_eq!(*outcomes.lock(), vec![Err(CallFailure::ConnectionClosed)]);
    }

    #[tokio::test]
    async fn test_send_with_callback_dropped_on_sync_error() {
        let central = CentralSystem::new(EngineConfig::default());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let result = central.send_with::<features::Reset, _>(
            "CP-404",
            ResetRequest {
                reset_type: ResetType::Soft,
            },
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(matches!(result, Err(SendError::UnknownConnection(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_context() {
        let central = CentralSystem::new(EngineConfig::default());
        let (first_channel, _first_link) = channel("CP-1");
        central.connect(first_channel).unwrap();

        let first = central
            .send::<features::Reset>(
                "CP-1",
                ResetRequest {
                    reset_type: ResetType::Hard,
                },
            )
            .unwrap();
        assert!(central.endpoint().pending_call("CP-1").is_some());

        let (replacement, _link) = channel("CP-1");
        central.connect(replacement).unwrap();

        assert_eq!(first.await, Err(CallFailure::ConnectionClosed));
        assert_eq!(central.charge_points(), vec!["CP-1".to_string()]);
        assert_eq!(central.endpoint().pending_call("CP-1"), None);
    }
}
