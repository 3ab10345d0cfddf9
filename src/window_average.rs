use std::collections::VecDeque;

/// Average over the last `capacity` samples, kept as a ring buffer with a
/// running sum.
#[derive(Clone, Debug)]
pub struct WindowAverage<T> {
    window: VecDeque<T>,
    capacity: usize,
    sum: f64,
    count: u64,
}

impl<T> WindowAverage<T>
where
    T: Copy + Into<f64>,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn add(&mut self, value: T) {
        if self.window.len() == self.capacity {
            if let Some(oldest) = self.window.pop_front() {
                self.sum -= oldest.into();
            }
        }
        self.window.push_back(value);
        self.sum += value.into();
        self.count += 1;
    }

    /// 0.0 while empty.
    pub fn average(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.sum / self.window.len() as f64
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.window.iter().map(|v| (*v).into()).reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.window.iter().map(|v| (*v).into()).reduce(f64::max)
    }

    pub fn last(&self) -> Option<T> {
        self.window.back().copied()
    }

    /// Samples currently inside the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Samples added since creation or the last reset.
    pub fn counts(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
        self.count = 0;
    }
}
