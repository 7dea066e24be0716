use std::collections::HashMap;

use dashmap::DashMap;

/// One included event's raw Kafka record, keyed by correlation id.
#[derive(Debug, Clone)]
pub struct RegisteredEvent {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, String>,
}

/// Per-consumer `correlationid → record` map (§3, §4.3.2). First-write-wins;
/// mutated only through the owning consumer supervisor's mailbox, never
/// shared directly across threads.
#[derive(Default)]
pub struct EventRegistry {
    entries: DashMap<String, RegisteredEvent>,
}

pub enum RegisterOutcome {
    Stored,
    AlreadyPresent,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, correlation_id: String, event: RegisteredEvent) -> RegisterOutcome {
        match self.entries.entry(correlation_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => RegisterOutcome::AlreadyPresent,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(event);
                RegisterOutcome::Stored
            }
        }
    }

    pub fn get(&self, correlation_id: &str) -> Option<RegisteredEvent> {
        self.entries.get(correlation_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
