use dashmap::DashMap;

use crate::ids::TestId;

use super::registry::RegisteredEvent;
use super::supervisor::StreamSupervisor;

/// Index of running streaming supervisors keyed by `(testId, topic)`, used
/// by the Gherkin step bridge to reach a specific test's producer/consumer
/// without threading handles through every step definition (§4.6).
#[derive(Default)]
pub struct StreamIndex {
    supervisors: DashMap<(TestId, String), StreamSupervisor>,
}

impl StreamIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, test_id: TestId, topic: String, supervisor: StreamSupervisor) {
        self.supervisors.insert((test_id, topic), supervisor);
    }

    pub fn produce(&self, test_id: TestId, topic: &str, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.supervisors
            .get(&(test_id, topic.to_string()))
            .map(|entry| entry.produce(key, value))
            .unwrap_or(false)
    }

    pub async fn lookup_registered(
        &self,
        test_id: TestId,
        topic: &str,
        correlation_id: &str,
    ) -> Option<RegisteredEvent> {
        let entry = self.supervisors.get(&(test_id, topic.to_string()))?;
        entry.lookup(correlation_id).await
    }

    pub fn remove_all_for_test(&self, test_id: TestId) -> Vec<StreamSupervisor> {
        let keys: Vec<_> = self
            .supervisors
            .iter()
            .filter(|e| e.key().0 == test_id)
            .map(|e| e.key().clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.supervisors.remove(&key).map(|(_, v)| v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entry_produce_returns_false() {
        let index = StreamIndex::new();
        let test_id = TestId::new();
        assert!(!index.produce(test_id, "orders", vec![1], vec![2]));
    }
}
