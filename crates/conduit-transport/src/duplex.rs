//! Persistent duplex adapter.
//!
//! Binds a [`DuplexConnection`] to the dispatch core: inbound frames are
//! dispatched in arrival order on the connection's own task, and outbound
//! frames are written as soon as they are produced.

use crate::traits::{DuplexConnection, Transport, TransportError};
use conduit_core::{Endpoint, QueueSink, DEFAULT_SINK_CAPACITY};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Duplex adapter configuration.
#[derive(Debug, Clone)]
pub struct DuplexConfig {
    /// Disconnect when no frame arrives for this long.
    pub idle_timeout: Duration,
    /// Outbound queue capacity; frames beyond it are dropped.
    pub outbound_capacity: usize,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            outbound_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

/// Why a duplex connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The client closed the connection.
    PeerClosed,
    /// No inbound frame within the idle timeout.
    IdleTimeout,
    /// Reading or writing failed.
    TransportFailed(String),
    /// A channel handler broke its contract.
    Terminated(String),
}

impl Disconnect {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Disconnect::PeerClosed => "peer_closed",
            Disconnect::IdleTimeout => "idle_timeout",
            Disconnect::TransportFailed(_) => "transport_failed",
            Disconnect::Terminated(_) => "terminated",
        }
    }

    fn peer_gone(&self) -> bool {
        matches!(self, Disconnect::PeerClosed | Disconnect::TransportFailed(_))
    }
}

/// Serve one duplex connection until it ends.
///
/// Teardown always runs before this returns, whatever the reason.
pub async fn run_duplex<C>(conn: &mut C, endpoint: &Endpoint, config: &DuplexConfig) -> Disconnect
where
    C: DuplexConnection + ?Sized,
{
    let (sink, mut outbound) = QueueSink::bounded(config.outbound_capacity);
    let mut connection = endpoint.connect(Arc::new(sink));
    let id = connection.id();

    debug!(socket = %id, remote = ?conn.remote_addr(), "Duplex connection started");

    let idle = time::sleep(config.idle_timeout);
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            biased;

            Some(frame) = outbound.recv() => {
                if let Err(e) = conn.send(frame).await {
                    break Disconnect::TransportFailed(e.to_string());
                }
            }

            inbound = conn.recv() => match inbound {
                Ok(Some(frame)) => {
                    idle.as_mut().reset(Instant::now() + config.idle_timeout);
                    if let Err(e) = connection.handle_frame(&frame) {
                        break Disconnect::Terminated(e.to_string());
                    }
                }
                Ok(None) => break Disconnect::PeerClosed,
                Err(e) => break Disconnect::TransportFailed(e.to_string()),
            },

            () = &mut idle => break Disconnect::IdleTimeout,
        }
    };

    if !reason.peer_gone() {
        while let Ok(frame) = outbound.try_recv() {
            if conn.send(frame).await.is_err() {
                break;
            }
        }
    }

    connection.close();

    if !reason.peer_gone() {
        if let Err(e) = conn.close().await {
            debug!(socket = %id, error = %e, "Close failed");
        }
    }

    debug!(socket = %id, reason = ?reason, "Duplex connection ended");
    reason
}

/// Accept connections from `transport` forever, one task per connection.
///
/// # Errors
///
/// Never returns on its own; accept failures are logged and skipped.
pub async fn serve(
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    config: DuplexConfig,
) -> Result<(), TransportError> {
    info!(transport = transport.name(), "Accepting duplex connections");

    loop {
        match transport.accept().await {
            Ok(mut conn) => {
                let endpoint = endpoint.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    run_duplex(conn.as_mut(), &endpoint, &config).await;
                });
            }
            Err(e) => warn!(transport = transport.name(), error = %e, "Accept failed"),
        }
    }
}
