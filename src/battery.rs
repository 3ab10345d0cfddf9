use crate::prelude::*;

use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Soc(f32),     // percent
    Current(f32), // amps, negative while discharging
    Voltage(f32),
    Shutdown,
}

/// A battery value together with how old it is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub value: f32,
    pub age: Duration,
}

#[derive(Clone, Copy, Debug)]
struct Stamped {
    value: f32,
    received: Instant,
}

impl Stamped {
    fn reading(&self, now: Instant) -> Reading {
        Reading {
            value: self.value,
            age: now.saturating_duration_since(self.received),
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    soc: Option<Stamped>,
    current: Option<Stamped>,
    voltage: Option<Stamped>,
}

/// Latest battery monitor readings.
#[derive(Clone, Debug, Default)]
pub struct Battery {
    stats: Arc<Mutex<Stats>>,
}

impl Battery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, data: &ChannelData, now: Instant) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match *data {
            ChannelData::Soc(value) => {
                if (0.0..=100.0).contains(&value) {
                    stats.soc = Some(Stamped { value, received: now });
                } else {
                    warn!("ignoring battery SoC {} outside 0..100", value);
                }
            }
            ChannelData::Current(value) => stats.current = Some(Stamped { value, received: now }),
            ChannelData::Voltage(value) => stats.voltage = Some(Stamped { value, received: now }),
            ChannelData::Shutdown => {}
        }
    }

    pub fn soc(&self, now: Instant) -> Option<Reading> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.soc.map(|s| s.reading(now))
    }

    pub fn current(&self, now: Instant) -> Option<Reading> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.current.map(|s| s.reading(now))
    }

    pub fn voltage(&self, now: Instant) -> Option<Reading> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.voltage.map(|s| s.reading(now))
    }
}
