use crate::prelude::*;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Readings older than this are treated as absent.
pub const MAX_AGE: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Reading(String, f32), // source, watts
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeterReading {
    pub watts: f32,
    pub received: Instant,
}

impl MeterReading {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.received) < MAX_AGE
    }
}

/// Latest reading per meter source. Each reading is replaced as a whole, so
/// readers never see a value without its timestamp.
#[derive(Clone, Debug, Default)]
pub struct PowerMeters {
    readings: Arc<Mutex<HashMap<String, MeterReading>>>,
}

impl PowerMeters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, source: &str, watts: f32, now: Instant) {
        let mut readings = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        readings.insert(
            source.to_string(),
            MeterReading {
                watts,
                received: now,
            },
        );
    }

    pub fn reading(&self, source: &str) -> Option<MeterReading> {
        let readings = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        readings.get(source).copied()
    }

    /// Sum of all fresh readings, or `None` when every reading is stale.
    pub fn fresh_total(&self, now: Instant) -> Option<f32> {
        let readings = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh: Vec<f32> = readings
            .values()
            .filter(|r| r.is_fresh(now))
            .map(|r| r.watts)
            .collect();

        if fresh.is_empty() {
            None
        } else {
            Some(fresh.iter().sum())
        }
    }

    pub fn is_data_valid(&self, now: Instant) -> bool {
        self.fresh_total(now).is_some()
    }
}
