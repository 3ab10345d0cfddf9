//! Surplus power regulation.
//!
//! Raises the inverter output above the zero feed-in value while the battery
//! is (nearly) full and the panels could deliver more than the household uses.
//!
//! Stage I runs while the charge controller is in bulk mode. The controller
//! acts as a current source, so the panel power it reports is the real solar
//! capacity. Part of it is reserved so the battery still reaches absorption
//! before sunset; the rest goes to the inverter.
//!
//! Stage II runs in absorption and float mode. The controller now regulates
//! its output voltage and the reported panel power no longer tells how much
//! could be harvested, so the regulator searches for it: it adds power step
//! by step until the battery voltage falls under the controller's set-point,
//! then backs off until the voltage recovers.
//!
//! Regulation quality counts the direction changes of the power steps before
//! the voltage settles. One change per search is ideal; a rolling average
//! above two means the system cannot be regulated this way.

use crate::prelude::*;
use crate::battery::Reading;
use crate::solar_charger::{ChargerReadings, OperatingMode};
use crate::window_average::WindowAverage;

use log::{log, Level};

/// Surplus is recomputed at most this often.
pub const RECALC_INTERVAL: Duration = Duration::from_secs(5);
/// Battery reserve is recomputed at most this often.
pub const RESERVE_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Time spent in target before probing for more power.
pub const IN_TARGET_DWELL: Duration = Duration::from_secs(60);
pub const SOC_MAX_AGE: Duration = Duration::from_secs(60);
pub const CURRENT_MAX_AGE: Duration = Duration::from_secs(5);

/// Reserve used when the absorption deadline has passed [W].
pub const RESERVE_POWER_MAX: i32 = 99_999;
/// Target voltage sits this far below the controller set-point [V].
pub const TARGET_VOLTAGE_MARGIN: f32 = 0.1;

const VOLTAGE_WINDOW: usize = 5;
const QUALITY_WINDOW: usize = 20;

const HEAD: &str = "[Surplus]";
const HEAD_I: &str = "[Surplus I]";
const HEAD_II: &str = "[Surplus II]";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    TryMore,
    ReducePower,
    InTarget,
    MaximumPower,
    KeepLastPower,
    BulkPower,
}

impl State {
    pub fn text(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::TryMore => "Try more power",
            State::ReducePower => "Reduce power",
            State::InTarget => "In target range",
            State::MaximumPower => "Maximum power",
            State::KeepLastPower => "Keep last power",
            State::BulkPower => "Reserve battery power",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Quality {
    NoData,
    Excellent,
    Good,
    Bad,
}

impl Quality {
    pub fn from_average(average: f64) -> Self {
        if average <= 0.0 {
            Quality::NoData
        } else if average <= 1.1 {
            Quality::Excellent
        } else if average <= 1.8 {
            Quality::Good
        } else {
            Quality::Bad
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Quality::NoData => "Insufficient data",
            Quality::Excellent => "Excellent",
            Quality::Good => "Good",
            Quality::Bad => "Bad",
        }
    }
}

/// Runtime on/off switches, on top of the configured enable flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageSwitch {
    StageIOn,
    StageIOff,
    StageIAsk,
    StageIIOn,
    StageIIOff,
    StageIIAsk,
}

/// External readings for one calculation.
#[derive(Clone, Debug, Default)]
pub struct SurplusInputs {
    pub charger: ChargerReadings,
    /// `None` when no battery monitor is enabled.
    pub soc: Option<Reading>,
    pub battery_current: Option<Reading>,
    /// `None` when the sunset time cannot be determined.
    pub minutes_to_sunset: Option<i32>,
}

#[derive(Clone, Debug, PartialEq)]
struct Settings {
    stage_i_enabled: bool,
    stage_ii_enabled: bool,
    start_soc: f32,
    battery_capacity: i32,
    battery_safety_percent: f32,
    duration_absorption_to_sunset: i32,
    upper_power_limit: i32,
    mppt_efficiency: f32,
    inverter_efficiency: f32,
    verbose: bool,
}

impl Settings {
    fn new(surplus: &config::Surplus, limiter: &config::PowerLimiter) -> Self {
        let mut start_soc = surplus.start_soc;
        if !(40.0..=100.0).contains(&start_soc) {
            start_soc = 70.0;
        }
        let mut battery_capacity = surplus.battery_capacity;
        if !(100..=40_000).contains(&battery_capacity) {
            battery_capacity = 2500;
        }
        let mut battery_safety_percent = surplus.battery_safety_percent;
        if !(0.0..=100.0).contains(&battery_safety_percent) {
            battery_safety_percent = 20.0;
        }
        let mut duration_absorption_to_sunset = surplus.duration_absorption_to_sunset;
        if !(0..=4 * 60).contains(&duration_absorption_to_sunset) {
            duration_absorption_to_sunset = 60;
        }
        let mut mppt_efficiency = surplus.mppt_efficiency;
        if !(mppt_efficiency > 0.0 && mppt_efficiency <= 1.0) {
            mppt_efficiency = 0.97;
        }
        let mut inverter_efficiency = surplus.inverter_efficiency;
        if !(inverter_efficiency > 0.0 && inverter_efficiency <= 1.0) {
            inverter_efficiency = 0.94;
        }

        let upper_power_limit = match surplus.upper_power_limit {
            0 => limiter.upper_power_limit(),
            limit => limit,
        };

        Self {
            stage_i_enabled: surplus.stage_i_enabled,
            stage_ii_enabled: surplus.stage_ii_enabled,
            start_soc,
            battery_capacity,
            battery_safety_percent,
            duration_absorption_to_sunset,
            upper_power_limit: upper_power_limit as i32,
            mppt_efficiency,
            inverter_efficiency,
            verbose: limiter.verbose_logging(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SurplusPower {
    settings: Settings,
    step_size: i32,

    stage_i_temp_off: bool,
    stage_ii_temp_off: bool,

    state: State,
    surplus_power: i32,
    last_calc: Option<Instant>,
    error_counter: u32,

    // stage I
    solar_power: f32,
    battery_reserve: i32,
    last_reserve_calc: Option<Instant>,
    duration_now_to_absorption: i32,

    // stage II
    avg_voltage: WindowAverage<f32>,
    last_in_target: Option<Instant>,
    last_add_power: i32,
    quality_counter: u32,
    quality_avg: WindowAverage<u32>,
    overrule_counter: u32,
}

impl SurplusPower {
    pub fn new(surplus: &config::Surplus, limiter: &config::PowerLimiter) -> Self {
        let settings = Settings::new(surplus, limiter);
        let mut new = Self {
            settings,
            step_size: 0,
            stage_i_temp_off: false,
            stage_ii_temp_off: false,
            state: State::Idle,
            surplus_power: 0,
            last_calc: None,
            error_counter: 0,
            solar_power: 0.0,
            battery_reserve: RESERVE_POWER_MAX,
            last_reserve_calc: None,
            duration_now_to_absorption: 0,
            avg_voltage: WindowAverage::new(VOLTAGE_WINDOW),
            last_in_target: None,
            last_add_power: 0,
            quality_counter: 0,
            quality_avg: WindowAverage::new(QUALITY_WINDOW),
            overrule_counter: 0,
        };
        new.update_settings(surplus, limiter);
        new
    }

    /// Re-reads the settings. Call after the limiter settings change, the
    /// step size depends on its upper limit and hysteresis.
    pub fn update_settings(&mut self, surplus: &config::Surplus, limiter: &config::PowerLimiter) {
        self.settings = Settings::new(surplus, limiter);

        // a step below the hysteresis would have no effect
        let hysteresis = limiter.target_power_consumption_hysteresis() as i32;
        self.step_size = (self.settings.upper_power_limit / 20).max(hysteresis) + 1;

        debug!(
            "{} upper limit {} W, step size {} W",
            HEAD, self.settings.upper_power_limit, self.step_size
        );
    }

    fn level(&self) -> Level {
        if self.settings.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }

    /// Returns the surplus power or `requested`, whichever is higher.
    pub fn calculate(&mut self, requested: u16, now: Instant, inputs: &SurplusInputs) -> u16 {
        // the loop inverter -> charger -> panels -> measurement needs time
        if let Some(last) = self.last_calc {
            if now.saturating_duration_since(last) < RECALC_INTERVAL {
                let surplus = self.clamped_surplus();
                if surplus <= requested {
                    return requested;
                }
                log!(
                    self.level(),
                    "{} State: {}, Surplus power: {}W, Requested power: {}W, Returned power: {}W",
                    HEAD,
                    self.state,
                    self.surplus_power,
                    requested,
                    surplus
                );
                return surplus;
            }
        }
        self.last_calc = Some(now);

        let Some(mode) = inputs.charger.mode else {
            self.error_counter += 1;
            warn!("{} Error, charge controller operating mode is not available", HEAD);
            return requested;
        };

        let stage_i = self.settings.stage_i_enabled && !self.stage_i_temp_off;
        let stage_ii = self.settings.stage_ii_enabled && !self.stage_ii_temp_off;

        if stage_i && mode == OperatingMode::Bulk {
            return self.calc_bulk(requested, now, inputs);
        }
        if stage_ii && matches!(mode, OperatingMode::Absorption | OperatingMode::Float) {
            return self.calc_absorption_float(requested, mode, now, inputs);
        }

        self.state = State::Idle;
        self.surplus_power = 0;

        log!(
            self.level(),
            "{} State: {}, Stage-I: {}, Stage-II: {}, Charger mode: {}",
            HEAD,
            self.state,
            if stage_i { "On" } else { "Off" },
            if stage_ii { "On" } else { "Off" },
            mode.text()
        );
        requested
    }

    fn clamped_surplus(&self) -> u16 {
        self.surplus_power
            .clamp(0, self.settings.upper_power_limit.max(0)) as u16
    }

    /// Stage I: the charge controller is in bulk mode.
    pub fn calc_bulk(&mut self, requested: u16, now: Instant, inputs: &SurplusInputs) -> u16 {
        let start = self.settings.start_soc;
        let stop = start - 2.0;

        let soc = match inputs.soc {
            Some(soc) if soc.age < SOC_MAX_AGE => soc.value,
            _ => {
                self.error_counter += 1;
                warn!("{} Error, battery SoC not available", HEAD_I);
                return requested;
            }
        };

        if soc <= stop || (soc < start && self.state == State::Idle) {
            if self.state != State::Idle {
                self.reset_reserve();
            }
            self.surplus_power = 0;
            self.state = State::Idle;
            log!(
                self.level(),
                "{} State: {}, SoC: {:.1}%, start: {:.1}%, stop: {:.1}%",
                HEAD_I,
                self.state,
                soc,
                start,
                stop
            );
            return requested;
        }

        let Some(solar_power) = inputs.charger.panel_power else {
            self.error_counter += 1;
            warn!("{} Error, solar panel power not available", HEAD_I);
            return requested;
        };
        self.solar_power = solar_power;

        if self.state == State::Idle {
            self.reset_reserve();
        }
        self.state = State::BulkPower;

        let due = self
            .last_reserve_calc
            .map_or(true, |last| now.saturating_duration_since(last) > RESERVE_INTERVAL);
        if due {
            self.last_reserve_calc = Some(now);

            let minutes_to_sunset = match inputs.minutes_to_sunset {
                Some(minutes) => minutes.max(0),
                None => {
                    self.error_counter += 1;
                    warn!("{} Error, sunset time not available", HEAD_I);
                    0
                }
            };

            self.duration_now_to_absorption =
                minutes_to_sunset - self.settings.duration_absorption_to_sunset;
            if self.duration_now_to_absorption > 0 {
                self.battery_reserve = Self::battery_reserve(
                    self.settings.battery_capacity,
                    soc,
                    self.duration_now_to_absorption,
                    self.settings.battery_safety_percent,
                );
            } else {
                // too late to reach absorption, keep everything for the battery
                self.battery_reserve = RESERVE_POWER_MAX;
                self.duration_now_to_absorption = 0;
            }
        }

        let surplus = (solar_power * self.settings.mppt_efficiency - self.battery_reserve as f32)
            * self.settings.inverter_efficiency;
        self.surplus_power = (surplus as i32).clamp(0, self.settings.upper_power_limit.max(0));

        let back = (self.surplus_power as u16).max(requested);

        let level = self.level();
        log!(
            level,
            "{} State: {}, Surplus power: {}W, Requested power: {}W, Returned power: {}W",
            HEAD_I,
            self.state,
            self.surplus_power,
            requested,
            back
        );
        log!(
            level,
            "{} Solar power: {:.0}W, Reserved power: {}W, Time to absorption: {:02}:{:02}, SoC: {:.2}%, Errors: {}",
            HEAD_I,
            solar_power,
            self.battery_reserve,
            self.duration_now_to_absorption / 60,
            self.duration_now_to_absorption % 60,
            soc,
            self.error_counter
        );

        back
    }

    fn reset_reserve(&mut self) {
        self.battery_reserve = RESERVE_POWER_MAX;
        self.last_reserve_calc = None;
        self.surplus_power = 0;
        self.error_counter = 0;
    }

    /// Power [W] that has to go into the battery so it reaches absorption in
    /// `minutes`, never negative.
    pub fn battery_reserve(capacity: i32, soc: f32, minutes: i32, safety_percent: f32) -> i32 {
        if minutes <= 0 {
            return RESERVE_POWER_MAX;
        }
        let reserve = capacity as f32 * (0.998 - soc / 100.0) / minutes as f32
            * 60.0
            * (1.0 + safety_percent / 100.0);
        (reserve as i32).max(0)
    }

    /// Stage II: the charge controller is in absorption or float mode.
    pub fn calc_absorption_float(
        &mut self,
        requested: u16,
        mode: OperatingMode,
        now: Instant,
        inputs: &SurplusInputs,
    ) -> u16 {
        let charger = &inputs.charger;
        let (Some(absorption), Some(float)) = (charger.absorption_voltage, charger.float_voltage)
        else {
            self.error_counter += 1;
            warn!("{} Error, absorption or float voltage not available", HEAD_II);
            return requested;
        };

        let set_point = if mode == OperatingMode::Absorption {
            absorption
        } else {
            float
        };
        let target = set_point - TARGET_VOLTAGE_MARGIN;

        let Some(voltage) = charger.battery_voltage else {
            self.error_counter += 1;
            warn!("{} Error, battery voltage not available", HEAD_II);
            return requested;
        };

        self.avg_voltage.add(voltage);
        let avg_voltage = self.avg_voltage.average() as f32;

        let step = self.step_size;
        let mut add_power: i32 = 0;
        match self.state {
            State::Idle | State::BulkPower => {
                if self.state == State::Idle {
                    self.error_counter = 0;
                }
                // coming from stage I we may start with the same power
                self.surplus_power = self.surplus_power.max(requested as i32);
                self.state = State::TryMore;
                self.quality_counter = 0;
                self.overrule_counter = 0;
                self.quality_avg.reset();
            }
            State::KeepLastPower => {
                if voltage >= target {
                    self.state = State::TryMore;
                    add_power = step;
                } else {
                    self.state = State::ReducePower;
                }
            }
            State::TryMore => {
                if avg_voltage >= target {
                    add_power = 2 * step;
                } else {
                    add_power = -step;
                    self.state = State::ReducePower;
                }
            }
            State::ReducePower => {
                if voltage >= target {
                    self.last_in_target = Some(now);
                    self.state = State::InTarget;
                } else {
                    add_power = -step;
                }
            }
            State::InTarget | State::MaximumPower => {
                if avg_voltage >= target || voltage >= target {
                    let dwelled = self
                        .last_in_target
                        .map_or(true, |t| now.saturating_duration_since(t) > IN_TARGET_DWELL);
                    if dwelled {
                        add_power = step;
                        self.state = State::TryMore;
                    }
                    if self.quality_counter != 0 {
                        self.quality_avg.add(self.quality_counter);
                    }
                    self.quality_counter = 0;
                } else {
                    add_power = -step;
                    self.state = State::ReducePower;
                }
            }
        }

        // a discharging battery overrules the voltage search
        if add_power >= 0 && self.surplus_power > 0 {
            if let Some(current) = inputs.battery_current {
                if current.age < CURRENT_MAX_AGE && current.value < 0.0 {
                    add_power = -step;
                    self.state = State::ReducePower;
                    self.overrule_counter += 1;
                }
            }
        }

        self.surplus_power = (self.surplus_power + add_power).max(0);
        if self.surplus_power > self.settings.upper_power_limit {
            self.surplus_power = self.settings.upper_power_limit.max(0);
            self.state = State::MaximumPower;
        }

        let back = if requested as i32 > self.surplus_power {
            self.quality_counter = 0;
            self.state = State::KeepLastPower;
            requested
        } else {
            if (self.last_add_power < 0 && add_power > 0)
                || (self.last_add_power > 0 && add_power < 0)
            {
                self.quality_counter += 1;
            }
            self.last_add_power = add_power;
            self.surplus_power as u16
        };

        let level = self.level();
        log!(
            level,
            "{} State: {}, Surplus power: {}W, Requested power: {}W, Returned power: {}W",
            HEAD_II,
            self.state,
            self.surplus_power,
            requested,
            back
        );
        log!(
            level,
            "{} Regulation quality: {}, (Average: {:.2}, Min: {:.0}, Max: {:.0}, Amount: {})",
            HEAD_II,
            self.quality().text(),
            self.quality_avg.average(),
            self.quality_avg.min().unwrap_or(0.0),
            self.quality_avg.max().unwrap_or(0.0),
            self.quality_avg.counts()
        );
        log!(
            level,
            "{} Target voltage: {:.2}V, Battery voltage: {:.2}V, Average battery voltage: {:.3}V",
            HEAD_II,
            target,
            voltage,
            avg_voltage
        );
        log!(
            level,
            "{} Battery current overrule counter: {}, Error counter: {}",
            HEAD_II,
            self.overrule_counter,
            self.error_counter
        );

        back
    }

    /// Switches a stage on or off at runtime, or asks whether it is on.
    pub fn switch(&mut self, switch: StageSwitch) -> bool {
        match switch {
            StageSwitch::StageIOn => {
                self.stage_i_temp_off = false;
                true
            }
            StageSwitch::StageIIOn => {
                self.stage_ii_temp_off = false;
                true
            }
            StageSwitch::StageIOff => {
                self.stage_i_temp_off = true;
                self.surplus_power = 0;
                self.state = State::Idle;
                false
            }
            StageSwitch::StageIIOff => {
                self.stage_ii_temp_off = true;
                self.surplus_power = 0;
                self.state = State::Idle;
                false
            }
            StageSwitch::StageIAsk => !self.stage_i_temp_off,
            StageSwitch::StageIIAsk => !self.stage_ii_temp_off,
        }
    }

    /// True if stage I or stage II is configured.
    pub fn is_enabled(&self) -> bool {
        self.settings.stage_i_enabled || self.settings.stage_ii_enabled
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn surplus_power(&self) -> i32 {
        self.surplus_power
    }

    pub fn step_size(&self) -> i32 {
        self.step_size
    }

    pub fn upper_power_limit(&self) -> i32 {
        self.settings.upper_power_limit
    }

    pub fn error_counter(&self) -> u32 {
        self.error_counter
    }

    pub fn overrule_counter(&self) -> u32 {
        self.overrule_counter
    }

    pub fn quality_counter(&self) -> u32 {
        self.quality_counter
    }

    pub fn quality_average(&self) -> f64 {
        self.quality_avg.average()
    }

    pub fn quality(&self) -> Quality {
        Quality::from_average(self.quality_avg.average())
    }

    pub fn battery_reserve_power(&self) -> i32 {
        self.battery_reserve
    }

    pub fn solar_power(&self) -> f32 {
        self.solar_power
    }
}
