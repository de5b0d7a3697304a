use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::{EventKind, MissionEvent};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MissionLog {
    events: Vec<MissionEvent>,
    closed: bool,
}

struct MissionChannel {
    log: Mutex<MissionLog>,
    sender: broadcast::Sender<MissionEvent>,
}

impl MissionChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            log: Mutex::new(MissionLog::default()),
            sender,
        }
    }
}

/// Per-mission publish point with an append-only log.
pub struct EventBus {
    channels: Mutex<HashMap<String, Arc<MissionChannel>>>,
    heartbeat_interval: Duration,
    capacity: usize,
}

impl EventBus {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self::with_capacity(heartbeat_interval, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(heartbeat_interval: Duration, capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            heartbeat_interval,
            capacity: capacity.max(1),
        }
    }

    fn channel(&self, mission_id: &str) -> Arc<MissionChannel> {
        let mut channels = lock(&self.channels);
        channels
            .entry(mission_id.to_string())
            .or_insert_with(|| Arc::new(MissionChannel::new(self.capacity)))
            .clone()
    }

    /// Append an event and notify live subscribers. Returns the assigned
    /// sequence number, or `None` once the mission's terminal event was
    /// published. Never waits on subscribers.
    pub fn publish(
        &self,
        mission_id: &str,
        kind: EventKind,
        data: serde_json::Value,
    ) -> Option<u64> {
        if kind == EventKind::Heartbeat {
            warn!(mission_id, "Heartbeats are generated by subscribers, not published");
            return None;
        }

        let channel = self.channel(mission_id);
        let mut log = lock(&channel.log);
        if log.closed {
            warn!(mission_id, kind = %kind, "Dropping event published after terminal event");
            return None;
        }

        let seq = log.events.len() as u64 + 1;
        let event = MissionEvent {
            seq,
            mission_id: mission_id.to_string(),
            kind,
            data,
            timestamp: Utc::now(),
        };
        log.closed = event.is_terminal();
        log.events.push(event.clone());
        // No receivers is fine: the log keeps the event for late joiners.
        let _ = channel.sender.send(event);
        debug!(mission_id, seq, kind = %kind, "Event published");
        Some(seq)
    }

    /// Replay from `from_seq` (inclusive, sequence numbers start at 1) and
    /// then tail live events.
    pub fn subscribe(&self, mission_id: &str, from_seq: u64) -> EventSubscription {
        let channel = self.channel(mission_id);
        let (backlog, receiver, finished) = {
            let log = lock(&channel.log);
            let backlog: VecDeque<MissionEvent> = log
                .events
                .iter()
                .filter(|e| e.seq >= from_seq)
                .cloned()
                .collect();
            let finished = log.closed && backlog.is_empty();
            (backlog, channel.sender.subscribe(), finished)
        };

        EventSubscription {
            mission_id: mission_id.to_string(),
            channel,
            receiver,
            backlog,
            next_seq: from_seq.max(1),
            finished,
            heartbeat_interval: self.heartbeat_interval,
        }
    }

    /// Pull consumer: events with `seq >= from_seq`, at most `limit`.
    pub fn history(&self, mission_id: &str, from_seq: u64, limit: usize) -> Vec<MissionEvent> {
        let channels = lock(&self.channels);
        let Some(channel) = channels.get(mission_id) else {
            return Vec::new();
        };
        let log = lock(&channel.log);
        log.events
            .iter()
            .filter(|e| e.seq >= from_seq)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn last_seq(&self, mission_id: &str) -> u64 {
        let channels = lock(&self.channels);
        channels
            .get(mission_id)
            .map(|c| lock(&c.log).events.len() as u64)
            .unwrap_or(0)
    }

    pub fn is_closed(&self, mission_id: &str) -> bool {
        let channels = lock(&self.channels);
        channels
            .get(mission_id)
            .map(|c| lock(&c.log).closed)
            .unwrap_or(false)
    }

    /// Seed a mission's log from a persisted snapshot. Ignored when the log
    /// already holds events.
    pub fn restore(&self, mission_id: &str, events: Vec<MissionEvent>) {
        let channel = self.channel(mission_id);
        let mut log = lock(&channel.log);
        if !log.events.is_empty() {
            return;
        }
        log.closed = events.last().map(|e| e.is_terminal()).unwrap_or(false);
        log.events = events;
    }

    /// Drop a mission's log. Live subscriptions keep their channel alive
    /// until they are dropped.
    pub fn remove(&self, mission_id: &str) {
        lock(&self.channels).remove(mission_id);
    }
}

/// One consumer's cursor into a mission's event log.
pub struct EventSubscription {
    mission_id: String,
    channel: Arc<MissionChannel>,
    receiver: broadcast::Receiver<MissionEvent>,
    backlog: VecDeque<MissionEvent>,
    next_seq: u64,
    finished: bool,
    heartbeat_interval: Duration,
}

impl EventSubscription {
    /// Next event in sequence order, a heartbeat after an idle interval, or
    /// `None` after the terminal event was delivered.
    pub async fn next(&mut self) -> Option<MissionEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                if event.seq < self.next_seq {
                    continue;
                }
                return Some(self.deliver(event));
            }
            if self.finished {
                return None;
            }

            match tokio::time::timeout(self.heartbeat_interval, self.receiver.recv()).await {
                Ok(Ok(event)) => {
                    if event.seq < self.next_seq {
                        continue;
                    }
                    if event.seq > self.next_seq {
                        self.refill();
                        continue;
                    }
                    return Some(self.deliver(event));
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!(
                        mission_id = %self.mission_id,
                        skipped,
                        "Subscriber lagged, replaying from log"
                    );
                    self.refill();
                }
                Ok(Err(RecvError::Closed)) => {
                    self.refill();
                    if self.backlog.is_empty() {
                        self.finished = true;
                    }
                }
                Err(_) => return Some(self.heartbeat()),
            }
        }
    }

    /// Sequence number the next domain event will carry.
    pub fn offset(&self) -> u64 {
        self.next_seq
    }

    pub fn into_stream(self) -> impl Stream<Item = MissionEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }

    fn deliver(&mut self, event: MissionEvent) -> MissionEvent {
        self.next_seq = event.seq + 1;
        if event.is_terminal() {
            self.finished = true;
        }
        event
    }

    fn refill(&mut self) {
        let log = lock(&self.channel.log);
        let next = self.next_seq;
        self.backlog
            .extend(log.events.iter().filter(|e| e.seq >= next).cloned());
    }

    fn heartbeat(&self) -> MissionEvent {
        MissionEvent {
            seq: self.next_seq.saturating_sub(1),
            mission_id: self.mission_id.clone(),
            kind: EventKind::Heartbeat,
            data: serde_json::json!({ "timestamp": Utc::now().to_rfc3339() }),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn bus() -> EventBus {
        EventBus::new(Duration::from_millis(50))
    }

    #[test]
    fn test_sequence_numbers_are_monotonic() {
        let bus = bus();
        assert_eq!(bus.publish("m1", EventKind::Status, json!({})), Some(1));
        assert_eq!(bus.publish("m1", EventKind::Progress, json!({})), Some(2));
        assert_eq!(bus.publish("m2", EventKind::Status, json!({})), Some(1));
        assert_eq!(bus.last_seq("m1"), 2);
    }

    #[test]
    fn test_nothing_published_after_terminal_event() {
        let bus = bus();
        bus.publish("m1", EventKind::Status, json!({}));
        assert_eq!(bus.publish("m1", EventKind::Error, json!({"error": "boom"})), Some(2));
        assert!(bus.is_closed("m1"));
        assert_eq!(bus.publish("m1", EventKind::Complete, json!({})), None);
        assert_eq!(bus.history("m1", 0, 100).len(), 2);
    }

    #[test]
    fn test_history_window() {
        let bus = bus();
        for i in 0..5 {
            bus.publish("m1", EventKind::Progress, json!({ "i": i }));
        }
        let window = bus.history("m1", 3, 2);
        assert_eq!(window.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4]);
        assert!(bus.history("unknown", 0, 10).is_empty());
    }

    #[test]
    fn test_scoped_errors_do_not_close_the_log() {
        let bus = bus();
        bus.publish("m1", EventKind::Error, json!({"scope": "entity", "entity": "Linear"}));
        assert!(!bus.is_closed("m1"));
        assert_eq!(bus.publish("m1", EventKind::Progress, json!({})), Some(2));
    }

    #[tokio::test]
    async fn test_replay_then_live_tail() {
        let bus = Arc::new(bus());
        bus.publish("m1", EventKind::Status, json!({"state": "planning"}));
        bus.publish("m1", EventKind::Progress, json!({}));

        let mut sub = bus.subscribe("m1", 0);
        assert_eq!(sub.next().await.unwrap().seq, 1);
        assert_eq!(sub.next().await.unwrap().seq, 2);

        bus.publish("m1", EventKind::Finding, json!({"name": "Linear"}));
        let live = sub.next().await.unwrap();
        assert_eq!(live.seq, 3);
        assert_eq!(live.kind, EventKind::Finding);
    }

    #[tokio::test]
    async fn test_resume_from_last_seen_sequence() {
        let bus = bus();
        for _ in 0..4 {
            bus.publish("m1", EventKind::Progress, json!({}));
        }
        let mut sub = bus.subscribe("m1", 3);
        assert_eq!(sub.next().await.unwrap().seq, 3);
        assert_eq!(sub.next().await.unwrap().seq, 4);
        assert_eq!(sub.offset(), 5);
    }

    #[tokio::test]
    async fn test_heartbeat_when_idle() {
        let bus = bus();
        bus.publish("m1", EventKind::Status, json!({}));
        let mut sub = bus.subscribe("m1", 2);
        let event = sub.next().await.unwrap();
        assert_eq!(event.kind, EventKind::Heartbeat);
        assert_eq!(event.seq, 1);
        assert_eq!(bus.last_seq("m1"), 1);
    }

    #[tokio::test]
    async fn test_stream_ends_after_terminal_event() {
        let bus = bus();
        bus.publish("m1", EventKind::Status, json!({}));
        bus.publish("m1", EventKind::Complete, json!({"findings_count": 3}));

        let events: Vec<MissionEvent> = bus.subscribe("m1", 0).into_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Complete);

        let mut late = bus.subscribe("m1", 10);
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn test_independent_subscribers() {
        let bus = bus();
        let mut a = bus.subscribe("m1", 0);
        let mut b = bus.subscribe("m1", 0);
        bus.publish("m1", EventKind::Status, json!({}));
        bus.publish("m1", EventKind::Complete, json!({}));

        assert_eq!(a.next().await.unwrap().seq, 1);
        assert_eq!(a.next().await.unwrap().seq, 2);
        assert!(a.next().await.is_none());
        assert_eq!(b.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_restored_log_continues_sequence() {
        let source = bus();
        source.publish("m1", EventKind::Status, json!({}));
        source.publish("m1", EventKind::Progress, json!({}));

        let target = bus();
        target.restore("m1", source.history("m1", 0, usize::MAX));
        assert_eq!(target.publish("m1", EventKind::Status, json!({})), Some(3));
        let mut sub = target.subscribe("m1", 0);
        assert_eq!(sub.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_recovers_from_log() {
        let bus = EventBus::with_capacity(Duration::from_millis(50), 2);
        let mut sub = bus.subscribe("m1", 0);
        for i in 0..10 {
            bus.publish("m1", EventKind::Progress, json!({ "i": i }));
        }
        for expected in 1..=10 {
            assert_eq!(sub.next().await.unwrap().seq, expected);
        }
    }
}
