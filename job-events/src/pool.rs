//! Connection pool and per-connection bounded queue for the event bus.
//!
//! Grounded in `feature-flags::sse_redis_manager::SseRedisSubscriptionManager`:
//! a `RwLock<HashMap<key, Vec<ClientSender>>>` registry, dead-sender cleanup
//! on broadcast, and a `stats()` accessor. Reworked here from a per-team
//! `UnboundedSender` into a per-connection bounded FIFO with an explicit
//! drop-oldest overflow policy, since an unbounded channel would let one slow
//! reader grow without limit and the bus needs a global/per-client admission
//! cap the teacher's manager doesn't have.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use envconfig::Envconfig;
use job_common::duration::EnvMsDuration;
use job_common::error::SubscriptionError;
use job_common::event::Event;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Envconfig, Clone, Debug)]
pub struct BusConfig {
    #[envconfig(default = "500")]
    pub sse_max_connections: usize,

    #[envconfig(default = "10")]
    pub sse_max_per_client: usize,

    #[envconfig(default = "30000")]
    pub sse_heartbeat_interval: EnvMsDuration,

    #[envconfig(default = "300000")]
    pub sse_idle_timeout: EnvMsDuration,

    #[envconfig(default = "256")]
    pub sse_queue_capacity: usize,

    #[envconfig(default = "1024")]
    pub sse_compression_threshold: usize,

    /// Consecutive heartbeats a connection may overflow on before it is
    /// reaped.
    #[envconfig(default = "2")]
    pub overflow_strike_limit: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            sse_max_connections: 500,
            sse_max_per_client: 10,
            sse_heartbeat_interval: EnvMsDuration(std::time::Duration::from_millis(30_000)),
            sse_idle_timeout: EnvMsDuration(std::time::Duration::from_millis(300_000)),
            sse_queue_capacity: 256,
            sse_compression_threshold: 1024,
            overflow_strike_limit: 2,
        }
    }
}

pub type ConnectionId = Uuid;

/// A bounded FIFO of undelivered events for one connection. When full, the
/// oldest event is dropped and `overflow` increments; the connection is
/// never closed just for overflowing.
pub struct ConnectionQueue {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    overflow: AtomicUsize,
    consecutive_heartbeat_overflows: AtomicU32,
}

impl ConnectionQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity,
            overflow: AtomicUsize::new(0),
            consecutive_heartbeat_overflows: AtomicU32::new(0),
        }
    }

    async fn push(&self, event: Event) {
        let mut events = self.events.lock().await;
        if events.len() >= self.capacity {
            events.pop_front();
            self.overflow.fetch_add(1, Ordering::Relaxed);
            job_common::metrics::record_sse_event_dropped();
        }
        events.push_back(event);
        drop(events);
        self.notify.notify_one();
    }

    /// Wait for the next event, or return `None` once `deadline` elapses.
    pub async fn next(&self, deadline: std::time::Duration) -> Option<Event> {
        loop {
            {
                let mut events = self.events.lock().await;
                if let Some(event) = events.pop_front() {
                    return Some(event);
                }
            }
            if tokio::time::timeout(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Record whether a heartbeat tick found the queue already over the
    /// overflow threshold; the bus uses consecutive strikes to decide when a
    /// stuck connection should be reaped.
    fn record_heartbeat_strike(&self, overflowed: bool) -> u32 {
        if overflowed {
            self.consecutive_heartbeat_overflows
                .fetch_add(1, Ordering::SeqCst)
                + 1
        } else {
            self.consecutive_heartbeat_overflows.store(0, Ordering::SeqCst);
            0
        }
    }
}

pub struct Connection {
    pub id: ConnectionId,
    pub client_id: String,
    pub subscriptions: Vec<String>,
    pub queue: Arc<ConnectionQueue>,
    last_activity: Mutex<std::time::Instant>,
}

impl Connection {
    pub async fn touch(&self) {
        *self.last_activity.lock().await = std::time::Instant::now();
    }

    pub async fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().await.elapsed()
    }
}

/// The event bus's connection registry and broadcast entry point.
pub struct EventBus {
    config: BusConfig,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    per_client_counts: Mutex<HashMap<String, usize>>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            per_client_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new subscriber. Returns the connection so the caller can
    /// immediately send it a `connected` event and start consuming its
    /// queue.
    pub async fn register(
        &self,
        client_id: String,
        subscriptions: Vec<String>,
    ) -> Result<Arc<Connection>, SubscriptionError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.sse_max_connections {
            return Err(SubscriptionError::PoolFull);
        }

        let mut per_client = self.per_client_counts.lock().await;
        let count = per_client.entry(client_id.clone()).or_insert(0);
        if *count >= self.config.sse_max_per_client {
            return Err(SubscriptionError::PerClientLimit);
        }
        *count += 1;
        drop(per_client);

        let id = Uuid::now_v7();
        let connection = Arc::new(Connection {
            id,
            client_id,
            subscriptions,
            queue: Arc::new(ConnectionQueue::new(self.config.sse_queue_capacity)),
            last_activity: Mutex::new(std::time::Instant::now()),
        });

        connections.insert(id, connection.clone());
        info!(
            "registered sse connection {id}, {} total, {} for client {}",
            connections.len(),
            *per_client.get(&connection.client_id).unwrap_or(&0),
            connection.client_id
        );
        job_common::metrics::set_sse_connections_active(connections.len());

        Ok(connection)
    }

    pub async fn unregister(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.remove(&id) {
            let mut per_client = self.per_client_counts.lock().await;
            if let Some(count) = per_client.get_mut(&connection.client_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    per_client.remove(&connection.client_id);
                }
            }
            info!("unregistered sse connection {id}, {} remaining", connections.len());
            job_common::metrics::set_sse_connections_active(connections.len());
        }
    }

    /// Fan out `event` to every connection subscribed to its type and whose
    /// `subscriber_key` matches `event.target_subscriber_key`, if set.
    pub async fn publish(&self, event: Event) {
        let connections = self.connections.read().await;
        let wire_type = event.event_type.as_wire_str();

        for connection in connections.values() {
            let subscribed = connection.subscriptions.is_empty()
                || connection
                    .subscriptions
                    .iter()
                    .any(|s| s == wire_type);
            if !subscribed {
                continue;
            }
            if let Some(target) = &event.target_subscriber_key {
                if target != &connection.client_id {
                    continue;
                }
            }
            connection.queue.push(event.clone()).await;
        }
    }

    /// Enqueue a heartbeat on every open connection, reaping any connection
    /// whose queue has overflowed on `overflow_strike_limit` consecutive
    /// heartbeats or that has been idle past `sse_idle_timeout`.
    pub async fn heartbeat_tick(&self) {
        let heartbeat = Event::new(
            job_common::event::EventType::Heartbeat,
            job_common::event::EventPayload::Heartbeat { at: chrono::Utc::now() },
        );

        let idle_timeout = self.config.sse_idle_timeout.as_duration();
        let mut to_reap = Vec::new();

        let connections = self.connections.read().await;
        for connection in connections.values() {
            if connection.idle_for().await >= idle_timeout {
                to_reap.push(connection.id);
                continue;
            }

            let overflowed_before = connection.queue.overflow_count();
            connection.queue.push(heartbeat.clone()).await;
            let overflowed_now = connection.queue.overflow_count() > overflowed_before;
            let strikes = connection
                .queue
                .record_heartbeat_strike(overflowed_now);

            if strikes >= self.config.overflow_strike_limit {
                warn!(
                    "connection {} overflowed {} consecutive heartbeats, reaping",
                    connection.id, strikes
                );
                to_reap.push(connection.id);
            }
        }
        drop(connections);

        for id in to_reap {
            self.unregister(id).await;
        }
    }

    /// Send a terminal `system:shutdown` event to every connection. Called
    /// once, immediately before the bus stops serving.
    pub async fn broadcast_shutdown(&self) {
        self.publish(Event::system("shutdown")).await;
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub fn compression_threshold(&self) -> usize {
        self.config.sse_compression_threshold
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        self.config.sse_heartbeat_interval.as_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_common::event::EventType;

    #[tokio::test]
    async fn register_rejects_past_global_cap() {
        let bus = EventBus::new(BusConfig {
            sse_max_connections: 1,
            ..BusConfig::default()
        });

        bus.register("client-a".into(), vec![]).await.unwrap();
        let result = bus.register("client-b".into(), vec![]).await;
        assert_eq!(result.unwrap_err(), SubscriptionError::PoolFull);
    }

    #[tokio::test]
    async fn register_rejects_past_per_client_cap() {
        let bus = EventBus::new(BusConfig {
            sse_max_per_client: 1,
            ..BusConfig::default()
        });

        bus.register("client-a".into(), vec![]).await.unwrap();
        let result = bus.register("client-a".into(), vec![]).await;
        assert_eq!(result.unwrap_err(), SubscriptionError::PerClientLimit);
    }

    #[tokio::test]
    async fn unregister_frees_a_global_slot() {
        let bus = EventBus::new(BusConfig {
            sse_max_connections: 1,
            ..BusConfig::default()
        });

        let connection = bus.register("client-a".into(), vec![]).await.unwrap();
        bus.unregister(connection.id).await;

        let result = bus.register("client-b".into(), vec![]).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn publish_only_reaches_subscribed_connections() {
        let bus = EventBus::new(BusConfig::default());
        let subscribed = bus
            .register("client-a".into(), vec!["job_complete".into()])
            .await
            .unwrap();
        let unsubscribed = bus
            .register("client-b".into(), vec!["job_progress".into()])
            .await
            .unwrap();

        bus.publish(Event::job_complete(
            Uuid::now_v7(),
            "summary".into(),
            None,
            job_common::event::ResultSource::Generated,
        ))
        .await;

        let received = subscribed
            .queue
            .next(std::time::Duration::from_millis(50))
            .await;
        assert!(matches!(
            received.map(|e| e.event_type),
            Some(EventType::JobComplete)
        ));

        let not_received = unsubscribed
            .queue
            .next(std::time::Duration::from_millis(20))
            .await;
        assert!(not_received.is_none());
    }

    #[tokio::test]
    async fn queue_drops_oldest_on_overflow() {
        let queue = ConnectionQueue::new(2);
        queue.push(Event::system("a")).await;
        queue.push(Event::system("b")).await;
        queue.push(Event::system("c")).await;

        assert_eq!(queue.overflow_count(), 1);
        let first = queue.next(std::time::Duration::from_millis(10)).await;
        match first.unwrap().payload {
            job_common::event::EventPayload::System { message } => assert_eq!(message, "b"),
            _ => panic!("expected system event"),
        }
    }
}
