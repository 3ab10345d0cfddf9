use crate::prelude::*;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

/// Controller data older than this is ignored.
pub const MAX_AGE: Duration = Duration::from_secs(10);

/// Minimum charge current kept for every controller when distributing a
/// limit [A].
pub const RESERVED_CHARGE_CURRENT: f32 = 0.5;

/// Charge controller state of operation, as reported over VE.Direct.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u8)]
pub enum OperatingMode {
    Off = 0,
    LowPower = 1,
    Fault = 2,
    Bulk = 3,
    Absorption = 4,
    Float = 5,
    Storage = 6,
    Equalize = 7,
    Inverting = 9,
    PowerSupply = 11,
    StartingUp = 245,
    RepeatedAbsorption = 246,
    AutoEqualize = 247,
    BatterySafe = 248,
    ExternalControl = 252,
}

impl OperatingMode {
    pub fn text(&self) -> &'static str {
        use OperatingMode::*;

        match self {
            Off => "Off",
            LowPower => "Low power",
            Fault => "Fault",
            Bulk => "Bulk",
            Absorption => "Absorption",
            Float => "Float",
            Storage => "Storage",
            Equalize => "Equalize",
            Inverting => "Inverting",
            PowerSupply => "Power supply",
            StartingUp => "Starting up",
            RepeatedAbsorption => "Repeated absorption",
            AutoEqualize => "Auto equalize",
            BatterySafe => "Battery safe",
            ExternalControl => "External control",
        }
    }
}

/// One frame of readings from a charge controller. Voltages in V, current in
/// A (positive into the battery), power in W.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerUpdate {
    pub serial: String,
    pub mode: Option<OperatingMode>,
    pub absorption_voltage: Option<f32>,
    pub float_voltage: Option<f32>,
    pub battery_voltage: Option<f32>,
    pub battery_current: f32,
    pub panel_power: Option<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Update(ControllerUpdate),
    ChargeLimit(f32, f32), // total limit, actual charge current [A]
    Shutdown,
}

#[derive(Clone, Debug)]
struct Controller {
    data: ControllerUpdate,
    received: Instant,
    charge_limit: Option<f32>,
}

impl Controller {
    fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.received) < MAX_AGE
    }
}

#[derive(Debug, Default)]
struct Inner {
    controllers: Vec<Controller>,
    charge_limit: Option<f32>,
    charge_current: f32,
}

/// Readings the surplus regulator needs, aggregated over all controllers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChargerReadings {
    pub mode: Option<OperatingMode>,
    pub absorption_voltage: Option<f32>,
    pub float_voltage: Option<f32>,
    pub battery_voltage: Option<f32>,
    pub panel_power: Option<f32>,
}

/// All known charge controllers plus the shared charge limit. One lock
/// guards both for the duration of an update.
#[derive(Clone, Debug, Default)]
pub struct SolarChargers {
    inner: Arc<Mutex<Inner>>,
}

impl SolarChargers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, update: ControllerUpdate, now: Instant) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner
            .controllers
            .iter_mut()
            .find(|c| c.data.serial == update.serial)
        {
            Some(controller) => {
                controller.data = update;
                controller.received = now;
            }
            None => {
                info!("new charge controller {}", update.serial);
                inner.controllers.push(Controller {
                    data: update,
                    received: now,
                    charge_limit: None,
                });
            }
        }
    }

    pub fn set_charge_limit(&self, limit: f32, actual_charge_current: f32) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.charge_limit = Some(limit);
        inner.charge_current = actual_charge_current;
    }

    pub fn controller_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.controllers.len()
    }

    /// Splits the total charge-current limit over the controllers.
    ///
    /// The limit is first raised by the current drawn by the inverters (the
    /// difference between what the controllers deliver and what reaches the
    /// battery). Every controller keeps `RESERVED_CHARGE_CURRENT`, the rest is
    /// shared in proportion to each controller's part of the total current.
    /// Returns `(serial, limit)` per controller; empty if no limit is set.
    pub fn distribute_charge_limit(&self) -> Vec<(String, f32)> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(limit) = inner.charge_limit else {
            return Vec::new();
        };
        if inner.controllers.is_empty() {
            return Vec::new();
        }

        let count = inner.controllers.len() as f32;
        let overall_current: f32 = inner
            .controllers
            .iter()
            .map(|c| c.data.battery_current)
            .sum();

        let mut overall_limit = limit + (overall_current - inner.charge_current);
        let mut reserved = RESERVED_CHARGE_CURRENT;
        let overall_reserved = reserved * count;
        if overall_limit > overall_reserved {
            overall_limit -= overall_reserved;
        } else {
            reserved = overall_limit.max(0.0) / count;
            overall_limit = 0.0;
        }

        let mut limits = Vec::with_capacity(inner.controllers.len());
        for controller in inner.controllers.iter_mut() {
            let factor = if overall_current > 0.0 {
                controller.data.battery_current / overall_current
            } else {
                1.0 / count
            };
            let controller_limit = factor * overall_limit + reserved;
            controller.charge_limit = Some(controller_limit);
            limits.push((controller.data.serial.clone(), controller_limit));
        }

        limits
    }

    pub fn charge_limit_of(&self, serial: &str) -> Option<f32> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .controllers
            .iter()
            .find(|c| c.data.serial == serial)
            .and_then(|c| c.charge_limit)
    }

    /// Mode and voltages come from the first controller with valid data,
    /// panel power is summed over all valid controllers.
    pub fn readings(&self, now: Instant) -> ChargerReadings {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let valid: Vec<&Controller> = inner
            .controllers
            .iter()
            .filter(|c| c.is_valid(now))
            .collect();

        let Some(first) = valid.first() else {
            return ChargerReadings::default();
        };

        let panel_power: Option<f32> = valid.iter().map(|c| c.data.panel_power).sum();

        ChargerReadings {
            mode: first.data.mode,
            absorption_voltage: first.data.absorption_voltage,
            float_voltage: first.data.float_voltage,
            battery_voltage: first.data.battery_voltage,
            panel_power,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(serial: &str, current: f32) -> ControllerUpdate {
        ControllerUpdate {
            serial: serial.to_string(),
            mode: Some(OperatingMode::Bulk),
            absorption_voltage: Some(28.8),
            float_voltage: Some(27.6),
            battery_voltage: Some(27.0),
            battery_current: current,
            panel_power: Some(300.0),
        }
    }

    #[test]
    fn splits_limit_by_share_of_current() {
        let chargers = SolarChargers::new();
        let now = Instant::now();
        chargers.update(update("A", 6.0), now);
        chargers.update(update("B", 2.0), now);
        chargers.set_charge_limit(10.0, 8.0);

        let limits = chargers.distribute_charge_limit();
        // 10 A + 0 A drawn by inverters - 2 * 0.5 A reserved = 9 A shared 3:1
        assert_eq!(limits.len(), 2);
        assert!((limits[0].1 - (9.0 * 0.75 + 0.5)).abs() < 1e-4);
        assert!((limits[1].1 - (9.0 * 0.25 + 0.5)).abs() < 1e-4);
    }

    #[test]
    fn limit_below_reserve_is_shared_equally() {
        let chargers = SolarChargers::new();
        let now = Instant::now();
        chargers.update(update("A", 1.0), now);
        chargers.update(update("B", 1.0), now);
        chargers.set_charge_limit(0.6, 2.0);

        let limits = chargers.distribute_charge_limit();
        assert!((limits[0].1 - 0.3).abs() < 1e-4);
        assert!((limits[1].1 - 0.3).abs() < 1e-4);
    }

    #[test]
    fn readings_sum_panel_power() {
        let chargers = SolarChargers::new();
        let now = Instant::now();
        chargers.update(update("A", 1.0), now);
        chargers.update(update("B", 1.0), now);

        let readings = chargers.readings(now);
        assert_eq!(readings.mode, Some(OperatingMode::Bulk));
        assert_eq!(readings.panel_power, Some(600.0));

        let stale = chargers.readings(now + Duration::from_secs(11));
        assert_eq!(stale, ChargerReadings::default());
    }
}
