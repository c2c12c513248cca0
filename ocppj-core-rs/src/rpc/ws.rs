//! OCPP-J over WebSocket
//!
//! Binds the abstract [`Channel`](super::transport::Channel) to
//! tokio-tungstenite:
//! - [`WsServer`] accepts charge points for a [`CentralSystem`]; the charge
//!   point identity is the last path segment of the upgrade URL
//! - [`WsClient`] connects a [`ChargePoint`] to `{url}/{identity}` and
//!   reconnects whenever the session ends, backing off exponentially while
//!   attempts fail
//!
//! Text frames carry the JSON arrays. Ping/pong is answered by tungstenite.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async_with_config, connect_async_with_config,
    tungstenite::{
        self,
        client::IntoClientRequest,
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        protocol::WebSocketConfig,
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::endpoint::{CentralSystem, ChargePoint, ConnectError};
use super::transport::{channel, Link};
use crate::config::WsConfig;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] header::InvalidHeaderValue),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

fn websocket_config(config: &WsConfig) -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_frame_size),
        ..Default::default()
    }
}

/// Build the full OCPP WebSocket URL
pub fn build_ocpp_url(base_url: &str, station_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), station_id)
}

/// Charge point identity from an upgrade path such as `/ocpp/CP-1`
pub fn identity_from_path(path: &str) -> Option<String> {
    path.split('/')
        .rev()
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn offers_subprotocol(request: &Request, subprotocol: &str) -> bool {
    request
        .headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|offered| offered.trim() == subprotocol)
}

/// Move frames between a WebSocket and an engine link until either side ends
async fn pump<S>(ws: WebSocketStream<S>, link: Link, peer: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let Link {
        to_engine,
        mut from_engine,
    } = link;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if to_engine.send(text.as_bytes().to_vec()).is_err() {
                            debug!("[{}] engine closed the connection", peer);
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("[{}] ignoring binary frame", peer);
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("[{}] WebSocket closed by peer", peer);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("[{}] WebSocket error: {}", peer, e);
                        break;
                    }
                    None => {
                        info!("[{}] WebSocket stream ended", peer);
                        break;
                    }
                }
            }

            out = from_engine.recv() => {
                match out {
                    Some(bytes) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                            error!("[{}] failed to send WebSocket message: {}", peer, e);
                            break;
                        }
                    }
                    None => {
                        debug!("[{}] engine dropped the connection", peer);
                        let _ = ws_tx.close().await;
                        break;
                    }
                }
            }
        }
    }
}

/// WebSocket listener for the central-system role
pub struct WsServer {
    central: CentralSystem,
    config: WsConfig,
}

impl WsServer {
    pub fn new(central: CentralSystem, config: WsConfig) -> Self {
        Self { central, config }
    }

    /// Accept charge points on `addr` until the listener fails
    pub async fn listen(self, addr: SocketAddr) -> Result<(), WsError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening for charge points on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), WsError> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let central = self.central.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = accept(central, config, stream).await {
                    warn!("Connection from {} failed: {}", peer, e);
                }
            });
        }
    }
}

async fn accept(central: CentralSystem, config: WsConfig, stream: TcpStream) -> Result<(), WsError> {
    let mut identity = None;
    let subprotocol = HeaderValue::from_str(&config.subprotocol)?;

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let Some(id) = identity_from_path(request.uri().path()) else {
            let mut rejection = ErrorResponse::new(Some("missing charge point identity".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        };
        if offers_subprotocol(request, &config.subprotocol) {
            response
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, subprotocol.clone());
        } else {
            warn!("[{}] did not offer the {} subprotocol", id, config.subprotocol);
        }
        identity = Some(id);
        Ok(response)
    };

    let ws = accept_hdr_async_with_config(stream, callback, Some(websocket_config(&config))).await?;
    let Some(identity) = identity else {
        return Ok(());
    };

    let (channel, link) = channel(identity.clone());
    central.connect(channel)?;
    pump(ws, link, &identity).await;
    Ok(())
}

/// Exponential reconnect delay, reset by a successful session
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// WebSocket client for the charge-point role
pub struct WsClient {
    charge_point: ChargePoint,
    base_url: String,
    config: WsConfig,
}

impl WsClient {
    pub fn new(charge_point: ChargePoint, base_url: impl Into<String>, config: WsConfig) -> Self {
        Self {
            charge_point,
            base_url: base_url.into(),
            config,
        }
    }

    /// Full URL including the charge point identity
    pub fn url(&self) -> String {
        build_ocpp_url(&self.base_url, self.charge_point.identity())
    }

    /// Keep the charge point connected until the task is cancelled.
    ///
    /// Every session end, graceful or not, is followed by a reconnect. An
    /// established session resets the delay to `reconnect_delay`.
    pub async fn run(&self) {
        let mut backoff = Backoff::new(self.config.reconnect_delay, self.config.max_reconnect_delay);

        loop {
            info!("Connecting to central system: {}", self.url());

            match self.connect_and_run().await {
                Ok(()) => {
                    info!("Connection closed");
                    backoff.reset();
                }
                Err(e) => error!("Connection error: {}", e),
            }

            let delay = backoff.next_delay();
            info!("Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Connect and run until disconnection. Ok means a session was established.
    async fn connect_and_run(&self) -> Result<(), WsError> {
        let url = self.url();
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(&self.config.subprotocol)?);

        let (ws, response) =
            connect_async_with_config(request, Some(websocket_config(&self.config)), false).await?;

        // Verify subprotocol
        let accepted = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if accepted != Some(self.config.subprotocol.as_str()) {
            warn!(
                "Central system did not accept the {} subprotocol, got: {:?}",
                self.config.subprotocol, accepted
            );
        }
        info!("WebSocket connected to {}", url);

        let identity = self.charge_point.identity().to_string();
        let (channel, link) = channel(identity.clone());
        self.charge_point.connect(channel)?;
        pump(ws, link, &identity).await;
        self.charge_point.disconnect();
        Ok(())
    }
}
