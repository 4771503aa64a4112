//! Lifecycle event bus
//!
//! A single bounded, append-only, multi-consumer event log. One log for all
//! scopes keeps consumer discovery O(1). Bounded by count, not time, to cap
//! memory under load; entries trimmed before consumption are counted, and
//! the reconciliation sweep guarantees the work still happens. The bus is a
//! latency optimization, never the source of correctness.
//!
//! Consumers are named groups with durable cursors: poll returns entries
//! past the cursor, ack advances it, and a consumer that crashes between
//! the two re-reads the same entries on restart.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::BusConfig;
use crate::error::{LetheError, Result};
use crate::memory::types::LifecycleEvent;

struct LogInner {
    entries: VecDeque<(u64, LifecycleEvent)>,
    next_offset: u64,
    trimmed_unconsumed: u64,
}

/// Bounded multi-consumer lifecycle event log
pub struct LifecycleBus {
    log: Mutex<LogInner>,
    cursors: DashMap<String, u64>,
    capacity: usize,
    notify: Arc<Notify>,
}

/// An event with its log offset, as returned by poll
#[derive(Debug, Clone)]
pub struct PolledEvent {
    pub offset: u64,
    pub event: LifecycleEvent,
}

impl LifecycleBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            log: Mutex::new(LogInner {
                entries: VecDeque::new(),
                next_offset: 0,
                trimmed_unconsumed: 0,
            }),
            cursors: DashMap::new(),
            capacity: config.capacity.max(1),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Append an event; trims the oldest entries past capacity. Returns the
    /// assigned offset.
    pub fn publish(&self, event: LifecycleEvent) -> Result<u64> {
        let offset = {
            let mut log = self
                .log
                .lock()
                .map_err(|_| LetheError::Bus("log lock poisoned".to_string()))?;
            let offset = log.next_offset;
            log.next_offset += 1;
            log.entries.push_back((offset, event));

            while log.entries.len() > self.capacity {
                if let Some((trimmed_offset, trimmed)) = log.entries.pop_front() {
                    let consumed_by_all = self
                        .cursors
                        .iter()
                        .all(|cursor| *cursor.value() > trimmed_offset);
                    if !consumed_by_all || self.cursors.is_empty() {
                        log.trimmed_unconsumed += 1;
                        warn!(
                            "Trimmed unconsumed {} event at offset {trimmed_offset}; \
                             reconciliation sweep will cover it",
                            trimmed.event_type.as_str()
                        );
                    }
                }
            }
            offset
        };

        self.notify.notify_waiters();
        Ok(offset)
    }

    /// Register a consumer group starting after the current tail, if it is
    /// not already known. Existing groups keep their cursor.
    pub fn register_group(&self, group: &str) -> Result<()> {
        if !self.cursors.contains_key(group) {
            self.cursors.insert(group.to_string(), 0);
            debug!("Registered consumer group '{group}'");
        }
        Ok(())
    }

    /// Read up to `max` events past the group's cursor without advancing it
    pub fn poll(&self, group: &str, max: usize) -> Result<Vec<PolledEvent>> {
        self.register_group(group)?;
        let cursor = self.cursors.get(group).map(|c| *c.value()).unwrap_or(0);

        let log = self
            .log
            .lock()
            .map_err(|_| LetheError::Bus("log lock poisoned".to_string()))?;
        Ok(log
            .entries
            .iter()
            .filter(|(offset, _)| *offset >= cursor)
            .take(max)
            .map(|(offset, event)| PolledEvent {
                offset: *offset,
                event: event.clone(),
            })
            .collect())
    }

    /// Advance the group's cursor past `offset`. Events at or before the
    /// cursor are considered consumed.
    pub fn ack(&self, group: &str, offset: u64) -> Result<()> {
        self.register_group(group)?;
        if let Some(mut cursor) = self.cursors.get_mut(group) {
            if offset + 1 > *cursor {
                *cursor = offset + 1;
            }
        }
        Ok(())
    }

    /// Handle used by consumers to wait for new events
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Events trimmed before every group had consumed them
    pub fn trimmed_unconsumed(&self) -> u64 {
        self.log.lock().map(|l| l.trimmed_unconsumed).unwrap_or(0)
    }

    /// Number of events currently retained
    pub fn len(&self) -> usize {
        self.log.lock().map(|l| l.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::EventKind;

    fn event(kind: EventKind) -> LifecycleEvent {
        LifecycleEvent::new(kind, "scope-1", serde_json::json!({}))
    }

    fn small_bus(capacity: usize) -> LifecycleBus {
        LifecycleBus::new(&BusConfig { capacity })
    }

    #[test]
    fn test_publish_assigns_increasing_offsets() {
        let bus = small_bus(10);
        let a = bus.publish(event(EventKind::FactPromoted)).unwrap();
        let b = bus.publish(event(EventKind::FactPromoted)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_poll_then_ack_advances_cursor() {
        let bus = small_bus(10);
        bus.publish(event(EventKind::FactPromoted)).unwrap();
        bus.publish(event(EventKind::EpisodeConsolidated)).unwrap();

        let polled = bus.poll("group", 10).unwrap();
        assert_eq!(polled.len(), 2);

        bus.ack("group", polled[0].offset).unwrap();
        let remaining = bus.poll("group", 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event.event_type, EventKind::EpisodeConsolidated);
    }

    #[test]
    fn test_unacked_events_are_redelivered() {
        let bus = small_bus(10);
        bus.publish(event(EventKind::FactPromoted)).unwrap();

        // A consumer crashing after poll but before ack sees the event again.
        let first = bus.poll("group", 10).unwrap();
        let second = bus.poll("group", 10).unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].offset, second[0].offset);
    }

    #[test]
    fn test_groups_have_independent_cursors() {
        let bus = small_bus(10);
        bus.publish(event(EventKind::FactPromoted)).unwrap();

        let polled = bus.poll("a", 10).unwrap();
        bus.ack("a", polled[0].offset).unwrap();

        assert!(bus.poll("a", 10).unwrap().is_empty());
        assert_eq!(bus.poll("b", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_bounded_by_count() {
        let bus = small_bus(3);
        for _ in 0..10 {
            bus.publish(event(EventKind::FactPromoted)).unwrap();
        }
        assert_eq!(bus.len(), 3);
    }

    #[test]
    fn test_trim_counts_unconsumed_losses() {
        let bus = small_bus(2);
        bus.register_group("slow").unwrap();
        for _ in 0..5 {
            bus.publish(event(EventKind::FactPromoted)).unwrap();
        }
        // Capacity 2, five published, none consumed: three were lost.
        assert_eq!(bus.trimmed_unconsumed(), 3);

        // The slow consumer only sees what survived the trim.
        assert_eq!(bus.poll("slow", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_trim_after_consumption_is_not_a_loss() {
        let bus = small_bus(2);
        let offset = bus.publish(event(EventKind::FactPromoted)).unwrap();
        let polled = bus.poll("fast", 10).unwrap();
        assert_eq!(polled[0].offset, offset);
        bus.ack("fast", offset).unwrap();

        bus.publish(event(EventKind::FactPromoted)).unwrap();
        bus.publish(event(EventKind::FactPromoted)).unwrap();
        assert_eq!(bus.trimmed_unconsumed(), 0);
    }

    #[tokio::test]
    async fn test_notify_wakes_waiters() {
        let bus = Arc::new(small_bus(10));
        let notifier = bus.notifier();

        let waiter = tokio::spawn(async move {
            notifier.notified().await;
        });
        // Give the waiter a chance to park before publishing.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.publish(event(EventKind::BufferThresholdReached)).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap();
    }
}
