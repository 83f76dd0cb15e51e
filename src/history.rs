use std::collections::{HashMap, VecDeque};

use crate::models::Identity;

/// Samples retained per device
pub const HISTORY_LEN: usize = 20;

/// Bounded per-device signal history
///
/// Kept apart from the registry so a sparkline query never contends with a
/// reconcile holding the registry lock. Strict FIFO: the oldest sample is
/// evicted first, no averaging or bucketing.
#[derive(Debug, Default)]
pub struct SignalHistory {
    samples: HashMap<Identity, VecDeque<i16>>,
}

impl SignalHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, identity: &Identity, score: i16) {
        let ring = self.samples.entry(identity.clone()).or_default();
        if ring.len() >= HISTORY_LEN {
            ring.pop_front();
        }
        ring.push_back(score);
    }

    /// Most recent samples, oldest first
    pub fn get(&self, identity: &Identity) -> Vec<i16> {
        self.samples
            .get(identity)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn tracked_devices(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(mac: &str) -> Identity {
        Identity::Physical(mac.to_string())
    }

    #[test]
    fn test_append_and_get_in_order() {
        let mut history = SignalHistory::new();
        let device = id("aa:bb:cc:11:22:33");

        history.append(&device, -40);
        history.append(&device, -50);
        history.append(&device, -45);

        assert_eq!(history.get(&device), vec![-40, -50, -45]);
    }

    #[test]
    fn test_ring_bounded_at_twenty_with_fifo_eviction() {
        let mut history = SignalHistory::new();
        let device = id("aa:bb:cc:11:22:33");

        for i in 0..50 {
            history.append(&device, -30 - i);
        }

        let samples = history.get(&device);
        assert_eq!(samples.len(), HISTORY_LEN);
        // Exactly the 20 most recent, in order
        assert_eq!(samples[0], -60);
        assert_eq!(samples[19], -79);
    }

    #[test]
    fn test_unknown_identity_is_empty() {
        let history = SignalHistory::new();
        assert!(history.get(&id("ff:ee:dd:00:11:22")).is_empty());
    }
}
