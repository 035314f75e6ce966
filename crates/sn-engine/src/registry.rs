//! Connection Registry (C4): tracks live socket connections per user, gates
//! them behind an injected token validator, and fans out in-app payloads to
//! whichever of a user's connections are authenticated, active, and
//! subscribed to the notification's type.
//!
//! There's no ready-made analog for this component upstream (message routing
//! over HTTP webhooks doesn't need long-lived sockets); the registry structure
//! follows axum's own idiom for `ws` handlers — a per-connection `mpsc` sender
//! stashed in a shared map, written to from any task that wants to push a
//! frame to that connection — generalized with an auth/subscription/capacity/
//! liveness lifecycle on top.

use dashmap::DashMap;
use serde_json::Value;
use sn_common::NotificationType;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Maps an opaque socket auth token to a recipient id. The wire format of the
/// token is out of scope for the engine; only this interface is.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Option<String>;
}

/// Development/test validator that treats the token as the user id verbatim.
/// Never wire this into a production deployment.
pub struct IdentityTokenValidator;

impl TokenValidator for IdentityTokenValidator {
    fn validate(&self, token: &str) -> Option<String> {
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// Reason a connection was closed, mirroring the wire protocol's close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    OverCapacity,
    AuthFailed,
    Expired,
    SlowConsumer,
    ServerShutdown,
    Normal,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OverCapacity => "over_capacity",
            Self::AuthFailed => "auth_failed",
            Self::Expired => "expired",
            Self::SlowConsumer => "slow_consumer",
            Self::ServerShutdown => "server_shutdown",
            Self::Normal => "normal",
        }
    }
}

/// What gets pushed down a connection's outbound queue: either a JSON frame
/// or an instruction to close with a given reason.
pub enum OutboundFrame {
    Json(Value),
    Close(CloseReason),
}

pub struct Connection {
    pub id: u64,
    user_id: parking_lot::Mutex<Option<String>>,
    authenticated: AtomicBool,
    active: AtomicBool,
    subscribed_types: parking_lot::Mutex<HashSet<NotificationType>>,
    sender: mpsc::Sender<OutboundFrame>,
    last_activity: parking_lot::Mutex<Instant>,
    last_pong: parking_lot::Mutex<Instant>,
}

impl Connection {
    pub fn user_id(&self) -> Option<String> {
        self.user_id.lock().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    /// Sends a JSON frame, honoring the per-connection bounded queue. Returns
    /// `false` (and schedules a `slow_consumer` close) if the queue is full —
    /// a slow reader never blocks delivery to anyone else.
    pub fn send(&self, payload: Value) -> bool {
        match self.sender.try_send(OutboundFrame::Json(payload)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.sender.try_send(OutboundFrame::Close(CloseReason::SlowConsumer));
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn close(&self, reason: CloseReason) {
        let _ = self.sender.try_send(OutboundFrame::Close(reason));
    }

    pub fn record_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn record_pong(&self) {
        let now = Instant::now();
        *self.last_pong.lock() = now;
        *self.last_activity.lock() = now;
    }

    fn is_idle(&self, threshold: Duration) -> bool {
        self.last_activity.lock().elapsed() > threshold
    }

    fn is_expired(&self, threshold: Duration) -> bool {
        self.last_pong.lock().elapsed() > threshold
    }

    fn subscribed(&self, t: NotificationType) -> bool {
        let subs = self.subscribed_types.lock();
        subs.is_empty() || subs.contains(&t)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionRegistryConfig {
    pub max_connections: usize,
    pub idle_threshold: Duration,
    pub expiry_threshold: Duration,
    pub send_queue_capacity: usize,
}

impl Default for ConnectionRegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            idle_threshold: Duration::from_secs(120),
            expiry_threshold: Duration::from_secs(90),
            send_queue_capacity: 256,
        }
    }
}

/// Registers every live real-time client connection (authenticated or not)
/// and routes in-app payloads to whichever of a user's connections are
/// currently active and subscribed to a notification's type.
pub struct ConnectionRegistry {
    config: ConnectionRegistryConfig,
    connections: DashMap<u64, Arc<Connection>>,
    by_user: DashMap<String, Vec<u64>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_config(ConnectionRegistryConfig::default())
    }

    pub fn with_config(config: ConnectionRegistryConfig) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Admits a new, as-yet-unauthenticated connection, or refuses it with
    /// `over_capacity` if the registry is already at its hard cap.
    pub fn accept(&self) -> Result<(Arc<Connection>, mpsc::Receiver<OutboundFrame>), CloseReason> {
        if self.connections.len() >= self.config.max_connections {
            return Err(CloseReason::OverCapacity);
        }

        let (tx, rx) = mpsc::channel(self.config.send_queue_capacity);
        let now = Instant::now();
        let connection = Arc::new(Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user_id: parking_lot::Mutex::new(None),
            authenticated: AtomicBool::new(false),
            active: AtomicBool::new(true),
            subscribed_types: parking_lot::Mutex::new(HashSet::new()),
            sender: tx,
            last_activity: parking_lot::Mutex::new(now),
            last_pong: parking_lot::Mutex::new(now),
        });
        self.connections.insert(connection.id, connection.clone());
        Ok((connection, rx))
    }

    /// Authenticates a connection against a resolved user id and activates
    /// its initial subscription set (empty means "all types").
    pub fn authenticate(&self, connection_id: u64, user_id: String, subscriptions: HashSet<NotificationType>) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };
        *connection.user_id.lock() = Some(user_id.clone());
        *connection.subscribed_types.lock() = subscriptions;
        connection.authenticated.store(true, Ordering::Relaxed);
        connection.record_activity();

        self.by_user.entry(user_id).or_default().push(connection_id);
    }

    pub fn subscribe(&self, connection_id: u64, types: impl IntoIterator<Item = NotificationType>) {
        if let Some(connection) = self.connections.get(&connection_id) {
            connection.subscribed_types.lock().extend(types);
            connection.record_activity();
        }
    }

    pub fn unsubscribe(&self, connection_id: u64, types: impl IntoIterator<Item = NotificationType>) {
        if let Some(connection) = self.connections.get(&connection_id) {
            let mut subs = connection.subscribed_types.lock();
            for t in types {
                subs.remove(&t);
            }
            drop(subs);
            connection.record_activity();
        }
    }

    pub fn record_activity(&self, connection_id: u64) {
        if let Some(connection) = self.connections.get(&connection_id) {
            connection.record_activity();
        }
    }

    pub fn record_pong(&self, connection_id: u64) {
        if let Some(connection) = self.connections.get(&connection_id) {
            connection.record_pong();
        }
    }

    /// Removes a connection from every index and best-effort notifies it of
    /// why, via its own outbound queue. Idempotent.
    pub fn remove(&self, connection_id: u64, reason: CloseReason) {
        if let Some((_, connection)) = self.connections.remove(&connection_id) {
            connection.close(reason);
            if let Some(user_id) = connection.user_id() {
                if let Some(mut ids) = self.by_user.get_mut(&user_id) {
                    ids.retain(|id| *id != connection_id);
                }
            }
        }
        self.by_user.retain(|_, ids| !ids.is_empty());
    }

    /// Sends `payload` to every authenticated, active connection for
    /// `user_id` subscribed to `notification_type`. Returns the number of
    /// connections it was handed to; zero means no eligible open socket.
    pub fn send_to_user(&self, user_id: &str, notification_type: NotificationType, payload: Value) -> usize {
        let Some(ids) = self.by_user.get(user_id).map(|e| e.clone()) else {
            return 0;
        };

        let mut delivered = 0;
        for id in ids {
            if let Some(connection) = self.connections.get(&id) {
                if connection.active.load(Ordering::Relaxed) && connection.subscribed(notification_type) {
                    if connection.send(payload.clone()) {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    /// Sends a ping frame to every authenticated connection, regardless of
    /// active/idle state — a pong response is what brings an idle connection
    /// back from idle.
    pub fn ping_all(&self) {
        for entry in self.connections.iter() {
            if entry.is_authenticated() {
                entry.send(serde_json::json!({"type": "ping"}));
            }
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.by_user.get(user_id).map(|ids| !ids.is_empty()).unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Marks connections idle past `idle_threshold` inactive (excluded from
    /// fanout, retained until they expire) without removing them.
    pub fn sweep_idle(&self) {
        for entry in self.connections.iter() {
            if entry.is_idle(self.config.idle_threshold) {
                entry.active.store(false, Ordering::Relaxed);
            } else {
                entry.active.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Closes connections whose last pong predates `expiry_threshold`.
    pub fn sweep_expired(&self) {
        let expired: Vec<u64> = self
            .connections
            .iter()
            .filter(|e| e.is_expired(self.config.expiry_threshold))
            .map(|e| e.id)
            .collect();
        for id in expired {
            self.remove(id, CloseReason::Expired);
        }
    }

    /// Closes every connection with `server_shutdown`, for graceful drain.
    pub fn close_all(&self, reason: CloseReason) {
        let ids: Vec<u64> = self.connections.iter().map(|e| e.id).collect();
        for id in ids {
            self.remove(id, reason);
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn authed(registry: &ConnectionRegistry, user_id: &str) -> Arc<Connection> {
        let (conn, _rx) = registry.accept().unwrap();
        registry.authenticate(conn.id, user_id.to_string(), HashSet::new());
        conn
    }

    #[test]
    fn send_to_user_reaches_all_open_connections() {
        let registry = ConnectionRegistry::new();
        authed(&registry, "u1");
        authed(&registry, "u1");

        let delivered = registry.send_to_user("u1", NotificationType::Like, json!({"hello": "world"}));
        assert_eq!(delivered, 2);
    }

    #[test]
    fn unauthenticated_connection_is_not_reachable() {
        let registry = ConnectionRegistry::new();
        let (_conn, _rx) = registry.accept().unwrap();
        assert!(!registry.is_connected("u1"));
    }

    #[test]
    fn remove_stops_further_delivery() {
        let registry = ConnectionRegistry::new();
        let conn = authed(&registry, "u1");
        registry.remove(conn.id, CloseReason::Normal);
        assert!(!registry.is_connected("u1"));
    }

    #[test]
    fn subscription_filters_fanout_by_type() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = registry.accept().unwrap();
        let mut subs = HashSet::new();
        subs.insert(NotificationType::Mention);
        registry.authenticate(conn.id, "u1".to_string(), subs);

        assert_eq!(registry.send_to_user("u1", NotificationType::Like, json!({})), 0);
        assert_eq!(registry.send_to_user("u1", NotificationType::Mention, json!({})), 1);
    }

    #[test]
    fn capacity_cap_refuses_new_connections_without_affecting_existing() {
        let registry = ConnectionRegistry::with_config(ConnectionRegistryConfig {
            max_connections: 1,
            ..ConnectionRegistryConfig::default()
        });
        let conn = authed(&registry, "u1");
        assert!(registry.accept().is_err());
        assert!(registry.is_connected("u1"));
        assert_eq!(registry.connection_count(), 1);
        let _ = conn;
    }

    #[test]
    fn expired_connections_are_swept() {
        let registry = ConnectionRegistry::with_config(ConnectionRegistryConfig {
            expiry_threshold: Duration::from_millis(0),
            ..ConnectionRegistryConfig::default()
        });
        authed(&registry, "u1");
        std::thread::sleep(Duration::from_millis(5));
        registry.sweep_expired();
        assert!(!registry.is_connected("u1"));
    }

    #[test]
    fn idle_connections_are_excluded_from_fanout_but_not_removed() {
        let registry = ConnectionRegistry::with_config(ConnectionRegistryConfig {
            idle_threshold: Duration::from_millis(0),
            ..ConnectionRegistryConfig::default()
        });
        authed(&registry, "u1");
        std::thread::sleep(Duration::from_millis(5));
        registry.sweep_idle();

        assert!(registry.is_connected("u1"));
        assert_eq!(registry.send_to_user("u1", NotificationType::Like, json!({})), 0);
    }

    #[test]
    fn overflowing_send_queue_closes_as_slow_consumer() {
        let registry = ConnectionRegistry::with_config(ConnectionRegistryConfig {
            send_queue_capacity: 1,
            ..ConnectionRegistryConfig::default()
        });
        let conn = authed(&registry, "u1");
        // fill the queue, then overflow it
        assert!(conn.send(json!({"n": 1})));
        assert!(!conn.send(json!({"n": 2})));
    }
}
