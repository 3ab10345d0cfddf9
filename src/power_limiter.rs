use crate::prelude::*;
use crate::command::PowerLimitControl;
use crate::hoymiles::fields::{FieldId, CH0, CH1};
use crate::hoymiles::inverter::InverterState;
use crate::power_meter::PowerMeters;

/// Inverter telemetry older than this stops the loop.
pub const TELEMETRY_MAX_AGE: Duration = Duration::from_secs(10);

/// What one limiter tick did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Stopped { limit: u16 },
    Started,
    Limited { limit: u16 },
}

/// Everything a tick reads that the limiter does not own.
pub struct LimiterContext<'a> {
    pub link_up: bool,
    pub radio_idle: bool,
    pub inverter: Option<&'a InverterState>,
    pub meters: &'a PowerMeters,
}

/// Zero feed-in loop: keeps the inverter output at the household consumption
/// reported by the power meters, and starts or stops the inverter on the DC
/// (battery) voltage.
pub struct PowerLimiter {
    config: config::PowerLimiter,
    channels: Channels,
    last_loop: Option<Instant>,
    last_command_sent: Option<Instant>,
    last_requested_limit: u16,
}

impl PowerLimiter {
    pub fn new(config: config::PowerLimiter, channels: Channels) -> Self {
        Self {
            config,
            channels,
            last_loop: None,
            last_command_sent: None,
            last_requested_limit: 0,
        }
    }

    pub fn update_settings(&mut self, config: config::PowerLimiter) {
        self.config = config;
    }

    pub fn settings(&self) -> &config::PowerLimiter {
        &self.config
    }

    pub fn last_requested_limit(&self) -> u16 {
        self.last_requested_limit
    }

    fn within_interval(&self, last: Option<Instant>, now: Instant) -> bool {
        last.map_or(false, |t| now.saturating_duration_since(t) < self.config.interval())
    }

    /// Runs one iteration. `adjust` may raise the computed limit (surplus
    /// regulation); the result is clamped to the configured bounds again.
    pub fn tick<F>(&mut self, now: Instant, ctx: &LimiterContext, adjust: F) -> Option<Action>
    where
        F: FnOnce(u16) -> u16,
    {
        if !self.config.enabled()
            || !ctx.link_up
            || !ctx.radio_idle
            || self.within_interval(self.last_command_sent, now)
            || self.within_interval(self.last_loop, now)
        {
            return None;
        }
        self.last_loop = Some(now);

        let inverter = ctx.inverter.filter(|i| i.is_reachable())?;
        let statistics = inverter.statistics();

        let fresh = statistics
            .last_update()
            .map_or(false, |t| now.saturating_duration_since(t) <= TELEMETRY_MAX_AGE);
        if !fresh {
            debug!("[PowerLimiter] telemetry of {} is stale", inverter.serial());
            return None;
        }

        let Some(dc_voltage) = statistics.field_value(CH1, FieldId::Udc) else {
            debug!("[PowerLimiter] DC voltage of {} not available", inverter.serial());
            return None;
        };
        let meter_total = ctx.meters.fresh_total(now);

        if meter_total.is_some() {
            debug!(
                "[PowerLimiter] dcVoltage: {:.2} V, start threshold: {} V, stop threshold: {} V, producing: {}",
                dc_voltage,
                self.config.voltage_start_threshold(),
                self.config.voltage_stop_threshold(),
                inverter.is_producing()
            );
        }

        let serial = inverter.serial();
        let lower = self.config.lower_power_limit();
        let upper = self.config.upper_power_limit();

        if inverter.is_producing() {
            let ac_power = statistics.field_value(CH0, FieldId::Pac).unwrap_or(0.0);
            let corrected = dc_voltage + ac_power * self.config.voltage_load_correction_factor();
            let stop = self.config.voltage_stop_threshold();

            if dc_voltage > 0.0 && stop > 0.0 && corrected <= stop {
                info!(
                    "[PowerLimiter] DC voltage: {:.2} V, corrected: {:.2} V, stopping inverter {}",
                    dc_voltage, corrected, serial
                );
                self.send(Command::Power(serial, false));
                self.send(Command::PowerLimit(
                    serial,
                    lower,
                    PowerLimitControl::AbsoluteNonPersistent,
                ));
                self.last_requested_limit = lower;
                self.last_command_sent = Some(now);

                return Some(Action::Stopped { limit: lower });
            }
        } else {
            let start = self.config.voltage_start_threshold();
            if dc_voltage > 0.0 && start > 0.0 && dc_voltage >= start {
                info!("[PowerLimiter] DC voltage: {:.2} V, starting inverter {}", dc_voltage, serial);
                self.last_command_sent = Some(now);
                self.send(Command::Power(serial, true));

                return Some(Action::Started);
            }

            return None;
        }

        let limit = match meter_total {
            Some(total) => {
                let mut limit = total as i32;
                if self.config.is_inverter_behind_power_meter() {
                    // the inverter's own output is part of the measurement; the
                    // last requested limit is newer than its AC statistics
                    limit += self.last_requested_limit as i32;
                }
                limit -= self.config.target_margin() as i32;
                let limit = limit.max(lower as i32).min(upper as i32).max(0) as u16;

                debug!(
                    "[PowerLimiter] powerMeter: {} W, lastRequestedPowerLimit: {} W",
                    total as i32, self.last_requested_limit
                );

                adjust(limit).max(lower).min(upper)
            }
            None => {
                debug!("[PowerLimiter] power meter data is stale, using lower limit");
                lower
            }
        };

        info!("[PowerLimiter] Limit Non-Persistent: {} W", limit);
        self.send(Command::PowerLimit(
            serial,
            limit,
            PowerLimitControl::AbsoluteNonPersistent,
        ));
        self.last_requested_limit = limit;
        self.last_command_sent = Some(now);

        Some(Action::Limited { limit })
    }

    fn send(&self, command: Command) {
        debug!("[PowerLimiter] sending {}", command);
        if let Err(err) = self.channels.to_inverter.send(command) {
            warn!("[PowerLimiter] send to inverter failed: {}", err);
        }
    }
}
