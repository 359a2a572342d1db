//! Long-polling adapter.
//!
//! For clients that cannot hold a duplex connection. Each session buffers
//! outbound frames until the client fetches them and accepts inbound frames
//! in batches. A session that is not fetched or submitted to within the
//! configured timeout is torn down as if its connection had closed.

use conduit_core::{Connection, Endpoint, QueueSink, DEFAULT_SINK_CAPACITY};
use conduit_protocol::{codec, ProtocolError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Long-polling errors.
#[derive(Debug, Error)]
pub enum PollError {
    /// No session with this token, or it has expired.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Submission body is not a JSON array.
    #[error("Malformed submission: {0}")]
    Malformed(#[from] ProtocolError),

    /// A channel handler broke its contract; the session was closed.
    #[error("Session terminated: {0}")]
    Terminated(String),
}

/// Long-polling configuration.
#[derive(Debug, Clone)]
pub struct LongPollConfig {
    /// Close sessions with no fetch or submission for this long.
    pub session_timeout: Duration,
    /// Outbound buffer capacity per session; frames beyond it are dropped.
    pub outbound_capacity: usize,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(60),
            outbound_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

struct PollSession {
    /// Serializes dispatch for the session.
    connection: Mutex<Connection>,
    outbound: Mutex<mpsc::Receiver<String>>,
    /// Milliseconds since the adapter's epoch.
    last_seen: AtomicU64,
}

/// The long-polling adapter.
pub struct LongPoll {
    endpoint: Endpoint,
    sessions: DashMap<String, Arc<PollSession>>,
    config: LongPollConfig,
    epoch: Instant,
}

impl LongPoll {
    /// Create an adapter serving `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint, config: LongPollConfig) -> Self {
        Self {
            endpoint,
            sessions: DashMap::new(),
            config,
            epoch: Instant::now(),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &LongPollConfig {
        &self.config
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Open a session and return its token.
    pub fn open(&self) -> String {
        let token = Uuid::new_v4().to_string();
        let (sink, outbound) = QueueSink::bounded(self.config.outbound_capacity);
        let connection = self.endpoint.connect(Arc::new(sink));

        debug!(session = %token, socket = %connection.id(), "Long-poll session opened");

        let session = PollSession {
            connection: Mutex::new(connection),
            outbound: Mutex::new(outbound),
            last_seen: AtomicU64::new(self.now_ms()),
        };
        self.sessions.insert(token.clone(), Arc::new(session));
        token
    }

    /// Take every frame buffered since the last fetch.
    ///
    /// An empty result means nothing happened yet; the session stays open.
    /// A session terminated by a handler failure hands out its remaining
    /// frames once and is then removed.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::UnknownSession`] if the session does not exist.
    pub async fn fetch(&self, token: &str) -> Result<Vec<String>, PollError> {
        let session = self.session(token)?;
        // Checked before draining so nothing queued by the failing batch is missed.
        let terminated = session.connection.lock().await.is_closed();
        let mut outbound = session.outbound.lock().await;

        let mut frames = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            frames.push(frame);
        }

        if terminated {
            self.sessions.remove(token);
            debug!(session = %token, pending = frames.len(), "Terminated session drained");
        }
        Ok(frames)
    }

    /// Dispatch a JSON array of messages, in order.
    ///
    /// Malformed elements are dropped. Returns the number of messages
    /// dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error if the session does not exist, the body is not a JSON
    /// array, or a handler failed. After a failure the session is torn down
    /// but stays fetchable once, so frames queued before it are not lost.
    pub async fn submit(&self, token: &str, body: &str) -> Result<usize, PollError> {
        let session = self.session(token)?;
        let batch = codec::decode_batch(body)?;

        let mut connection = session.connection.lock().await;
        if connection.is_closed() {
            return Err(PollError::UnknownSession(token.to_string()));
        }

        let mut dispatched = 0;
        for item in batch {
            let message = match item {
                Ok(message) => message,
                Err(e) => {
                    debug!(session = %token, error = %e, "Dropping malformed message");
                    continue;
                }
            };

            if let Err(e) = connection.handle_message(message) {
                connection.close();
                debug!(session = %token, "Long-poll session terminated, pending output kept for one fetch");
                return Err(PollError::Terminated(e.to_string()));
            }
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Close a session and run teardown.
    ///
    /// Returns `false` if the session did not exist.
    pub async fn close(&self, token: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(token) else {
            return false;
        };

        session.connection.lock().await.close();
        debug!(session = %token, "Long-poll session closed");
        true
    }

    /// Close every session idle for longer than the session timeout.
    ///
    /// Returns the number of sessions closed.
    pub async fn reap_expired(&self) -> usize {
        let mut closed = 0;
        for token in self.idle_tokens() {
            if self.close_if_idle(&token).await {
                debug!(session = %token, "Long-poll session expired");
                closed += 1;
            }
        }
        closed
    }

    fn idle_tokens(&self) -> Vec<String> {
        let now = self.now_ms();
        self.sessions
            .iter()
            .filter(|e| self.is_idle(e.value(), now))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Remove the session only if it is still idle at removal time.
    async fn close_if_idle(&self, token: &str) -> bool {
        let now = self.now_ms();
        let Some((_, session)) = self
            .sessions
            .remove_if(token, |_, session| self.is_idle(session, now))
        else {
            return false;
        };

        session.connection.lock().await.close();
        true
    }

    fn is_idle(&self, session: &PollSession, now: u64) -> bool {
        let timeout = self.config.session_timeout.as_millis() as u64;
        now.saturating_sub(session.last_seen.load(Ordering::Relaxed)) > timeout
    }

    /// Run [`reap_expired`](Self::reap_expired) every `interval`.
    ///
    /// The task stops once the adapter is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        info!(interval_ms = interval.as_millis() as u64, "Starting long-poll reaper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(longpoll) = weak.upgrade() else {
                    break;
                };
                let closed = longpoll.reap_expired().await;
                if closed > 0 {
                    warn!(closed, "Reaped idle long-poll sessions");
                }
            }
        })
    }

    fn session(&self, token: &str) -> Result<Arc<PollSession>, PollError> {
        let session = self
            .sessions
            .get(token)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| PollError::UnknownSession(token.to_string()))?;

        session.last_seen.store(self.now_ms(), Ordering::Relaxed);
        Ok(session)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{
        ChannelHandler, ChannelRegistry, ChannelTopic, HandlerError, HandlerResult, JoinOutcome,
        Socket,
    };
    use conduit_protocol::{Message, Payload};

    struct Rooms;

    impl ChannelHandler for Rooms {
        fn join(&self, socket: &mut Socket, _: &str, _: &Payload) -> HandlerResult<JoinOutcome> {
            socket.reply("join", Payload::new());
            Ok(JoinOutcome::Ok)
        }

        fn event(&self, socket: &mut Socket, event: &str, payload: &Payload) -> HandlerResult {
            if event == "explode" {
                socket.reply("last:words", Payload::new());
                return Err(HandlerError::new("exploded"));
            }
            socket.broadcast(event, payload.clone());
            Ok(())
        }
    }

    fn longpoll(timeout: Duration) -> LongPoll {
        let endpoint = Endpoint::new(ChannelRegistry::new().with_channel("rooms", Rooms).unwrap());
        LongPoll::new(
            endpoint,
            LongPollConfig {
                session_timeout: timeout,
                ..Default::default()
            },
        )
    }

    fn batch(events: &[&str]) -> String {
        let frames: Vec<String> = events
            .iter()
            .map(|e| codec::encode(&Message::new("rooms", "lobby", *e, Payload::new())))
            .collect();
        codec::encode_batch(&frames)
    }

    fn events(frames: &[String]) -> Vec<String> {
        frames
            .iter()
            .map(|f| codec::decode(f).unwrap().event)
            .collect()
    }

    fn lobby() -> ChannelTopic {
        ChannelTopic::new("rooms", "lobby")
    }

    #[tokio::test]
    async fn test_empty_fetch_keeps_session() {
        let lp = longpoll(Duration::from_secs(60));
        let token = lp.open();

        assert!(lp.fetch(&token).await.unwrap().is_empty());
        assert!(lp.fetch(&token).await.unwrap().is_empty());
        assert_eq!(lp.session_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_then_fetch() {
        let lp = longpoll(Duration::from_secs(60));
        let token = lp.open();

        assert_eq!(lp.submit(&token, &batch(&["join", "new:msg"])).await.unwrap(), 2);

        let frames = lp.fetch(&token).await.unwrap();
        assert_eq!(events(&frames), vec!["join", "new:msg"]);
        assert!(lp.fetch(&token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_over_longpoll() {
        let lp = longpoll(Duration::from_secs(60));
        let token = lp.open();
        let body = codec::encode_batch(&[codec::encode(&Message::heartbeat())]);

        lp.submit(&token, &body).await.unwrap();

        let frames = lp.fetch(&token).await.unwrap();
        assert_eq!(codec::decode(&frames[0]).unwrap(), Message::heartbeat());
    }

    #[tokio::test]
    async fn test_submit_drops_malformed_elements() {
        let lp = longpoll(Duration::from_secs(60));
        let token = lp.open();
        let join = codec::encode(&Message::new("rooms", "lobby", "join", Payload::new()));
        let body = format!(r#"[{{"channel":"rooms"}}, 42, {join}]"#);

        assert_eq!(lp.submit(&token, &body).await.unwrap(), 1);
        assert!(matches!(
            lp.submit(&token, "not an array").await,
            Err(PollError::Malformed(_))
        ));
        assert_eq!(lp.session_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let lp = longpoll(Duration::from_secs(60));

        assert!(matches!(lp.fetch("nope").await, Err(PollError::UnknownSession(_))));
        assert!(matches!(
            lp.submit("nope", "[]").await,
            Err(PollError::UnknownSession(_))
        ));
        assert!(!lp.close("nope").await);
    }

    #[tokio::test]
    async fn test_broadcast_between_sessions() {
        let lp = longpoll(Duration::from_secs(60));
        let alice = lp.open();
        let bob = lp.open();

        lp.submit(&alice, &batch(&["join"])).await.unwrap();
        lp.submit(&bob, &batch(&["join"])).await.unwrap();
        lp.fetch(&bob).await.unwrap();

        lp.submit(&alice, &batch(&["new:msg"])).await.unwrap();
        assert_eq!(events(&lp.fetch(&bob).await.unwrap()), vec!["new:msg"]);

        lp.close(&alice).await;
        lp.submit(&bob, &batch(&["new:msg"])).await.unwrap();
        assert_eq!(lp.endpoint.pubsub().subscriber_count(&lobby()), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_closes_session() {
        let lp = longpoll(Duration::from_secs(60));
        let token = lp.open();

        let result = lp.submit(&token, &batch(&["join", "explode", "new:msg"])).await;

        assert!(matches!(result, Err(PollError::Terminated(_))));
        assert!(!lp.endpoint.pubsub().topic_exists(&lobby()));
        assert!(matches!(
            lp.submit(&token, &batch(&["join"])).await,
            Err(PollError::UnknownSession(_))
        ));

        // Frames queued before the failure are handed out once.
        let frames = lp.fetch(&token).await.unwrap();
        assert_eq!(events(&frames), vec!["join", "last:words"]);
        assert_eq!(lp.session_count(), 0);
        assert!(matches!(lp.fetch(&token).await, Err(PollError::UnknownSession(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_expire() {
        let lp = longpoll(Duration::from_secs(30));
        let idle = lp.open();
        let active = lp.open();
        lp.submit(&idle, &batch(&["join"])).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        lp.fetch(&active).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(lp.reap_expired().await, 1);
        assert_eq!(lp.session_count(), 1);
        assert!(matches!(lp.fetch(&idle).await, Err(PollError::UnknownSession(_))));
        assert!(lp.fetch(&active).await.is_ok());
        assert!(!lp.endpoint.pubsub().topic_exists(&lobby()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_after_idle_scan_keeps_session() {
        let lp = longpoll(Duration::from_secs(30));
        let token = lp.open();
        lp.submit(&token, &batch(&["join"])).await.unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        let idle = lp.idle_tokens();
        assert_eq!(idle, vec![token.clone()]);

        lp.fetch(&token).await.unwrap();
        assert!(!lp.close_if_idle(&token).await);

        assert_eq!(lp.session_count(), 1);
        assert!(lp.endpoint.pubsub().topic_exists(&lobby()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task() {
        let lp = Arc::new(longpoll(Duration::from_secs(10)));
        let token = lp.open();
        let reaper = lp.spawn_reaper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;

        assert!(matches!(lp.fetch(&token).await, Err(PollError::UnknownSession(_))));
        reaper.abort();
    }
}
