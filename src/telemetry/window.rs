use std::collections::VecDeque;

use crate::models::TelemetrySample;

/// Bounded rolling window of samples for charting.
///
/// Always ordered by ascending timestamp and never longer than its
/// capacity; once full, the oldest sample is evicted.
#[derive(Debug, Clone)]
pub struct TelemetryWindow {
    capacity: usize,
    samples: VecDeque<TelemetrySample>,
}

impl TelemetryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Add one sample, keeping timestamp order. Samples with equal
    /// timestamps are all kept, in arrival order.
    pub fn push(&mut self, sample: TelemetrySample) {
        match self.samples.back() {
            Some(last) if sample.ts < last.ts => {
                let at = self.samples.partition_point(|s| s.ts <= sample.ts);
                self.samples.insert(at, sample);
            }
            _ => self.samples.push_back(sample),
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Replace the contents with `samples`, keeping the newest that fit.
    pub fn replace(&mut self, mut samples: Vec<TelemetrySample>) {
        samples.sort_by(|a, b| a.ts.cmp(&b.ts));
        let skip = samples.len().saturating_sub(self.capacity);
        self.samples = samples.into_iter().skip(skip).collect();
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    pub fn newest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    pub fn to_vec(&self) -> Vec<TelemetrySample> {
        self.samples.iter().cloned().collect()
    }
}
