use crate::prelude::*;
use crate::hoymiles::fields::{Channel, FieldId};
use crate::hoymiles::models::Model;

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Vec::new")]
    pub inverters: Vec<Inverter>,

    #[serde(default)]
    pub power_limiter: PowerLimiter,

    #[serde(default)]
    pub power_meter: PowerMeter,

    #[serde(default)]
    pub battery: Battery,

    #[serde(default)]
    pub surplus: Surplus,

    pub location: Option<Location>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde_as(as = "DisplayFromStr")]
    pub serial: Serial,
    pub name: Option<String>,
    pub model: Option<Model>,

    /// Peak power of the panels on each DC channel [Wp], channel 1 first.
    #[serde(default = "Vec::new")]
    pub channel_max_power: Vec<u16>,

    #[serde(default = "Vec::new")]
    pub field_offsets: Vec<FieldOffset>,
}
impl Inverter {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn model(&self) -> Option<Model> {
        self.model
    }

    pub fn channel_max_power(&self) -> &[u16] {
        &self.channel_max_power
    }

    pub fn field_offsets(&self) -> &[FieldOffset] {
        &self.field_offsets
    }
}

/// Additive calibration for one decoded field.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct FieldOffset {
    pub channel: Channel,
    pub field: FieldId,
    pub offset: f32,
} // }}}

// PowerLimiter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PowerLimiter {
    pub enabled: bool,
    pub verbose_logging: bool,

    /// Minimum time between two loop iterations, in seconds.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub interval: Duration,

    /// Target inverter; the first enabled inverter when unset.
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub inverter: Option<Serial>,

    pub is_inverter_behind_power_meter: bool,
    pub lower_power_limit: u16,
    pub upper_power_limit: u16,

    /// 0 disables the threshold.
    pub voltage_start_threshold: f32,
    /// 0 disables the threshold.
    pub voltage_stop_threshold: f32,
    pub voltage_load_correction_factor: f32,

    pub target_power_consumption_hysteresis: u16,
    pub target_margin: u16,
}

impl Default for PowerLimiter {
    fn default() -> Self {
        Self {
            enabled: false,
            verbose_logging: false,
            interval: Duration::from_secs(10),
            inverter: None,
            is_inverter_behind_power_meter: true,
            lower_power_limit: 10,
            upper_power_limit: 800,
            voltage_start_threshold: 50.0,
            voltage_stop_threshold: 49.0,
            voltage_load_correction_factor: 0.001,
            target_power_consumption_hysteresis: 0,
            target_margin: 10,
        }
    }
}

impl PowerLimiter {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn verbose_logging(&self) -> bool {
        self.verbose_logging
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn inverter(&self) -> Option<Serial> {
        self.inverter
    }

    pub fn is_inverter_behind_power_meter(&self) -> bool {
        self.is_inverter_behind_power_meter
    }

    pub fn lower_power_limit(&self) -> u16 {
        self.lower_power_limit
    }

    pub fn upper_power_limit(&self) -> u16 {
        self.upper_power_limit
    }

    pub fn voltage_start_threshold(&self) -> f32 {
        self.voltage_start_threshold
    }

    pub fn voltage_stop_threshold(&self) -> f32 {
        self.voltage_stop_threshold
    }

    pub fn voltage_load_correction_factor(&self) -> f32 {
        self.voltage_load_correction_factor
    }

    pub fn target_power_consumption_hysteresis(&self) -> u16 {
        self.target_power_consumption_hysteresis
    }

    pub fn target_margin(&self) -> u16 {
        self.target_margin
    }
} // }}}

// PowerMeter {{{
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PowerMeter {
    /// Meter sources to sum; every source counts when empty.
    pub sources: Vec<String>,
}
impl PowerMeter {
    pub fn sources(&self) -> &[String] {
        &self.sources
    }
} // }}}

// Battery {{{
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Battery {
    pub enabled: bool,
}
impl Battery {
    pub fn enabled(&self) -> bool {
        self.enabled
    }
} // }}}

// Surplus {{{
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Surplus {
    pub stage_i_enabled: bool,
    pub stage_ii_enabled: bool,

    /// SoC [%] at which stage I starts.
    pub start_soc: f32,
    /// [Wh]
    pub battery_capacity: i32,
    pub battery_safety_percent: f32,
    /// Minutes between reaching absorption and sunset.
    pub duration_absorption_to_sunset: i32,

    /// 0 means "use power_limiter.upper_power_limit".
    pub upper_power_limit: u16,

    pub mppt_efficiency: f32,
    pub inverter_efficiency: f32,
}

impl Default for Surplus {
    fn default() -> Self {
        Self {
            stage_i_enabled: false,
            stage_ii_enabled: true,
            start_soc: 80.0,
            battery_capacity: 2500,
            battery_safety_percent: 30.0,
            duration_absorption_to_sunset: 30,
            upper_power_limit: 0,
            mppt_efficiency: 0.97,
            inverter_efficiency: 0.94,
        }
    }
}

impl Surplus {
    pub fn is_enabled(&self) -> bool {
        self.stage_i_enabled || self.stage_ii_enabled
    }
} // }}}

// Location {{{
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
} // }}}

#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn inverters(&self) -> Vec<Inverter> {
        self.lock().inverters.clone()
    }

    pub fn enabled_inverters(&self) -> Vec<Inverter> {
        self.inverters().into_iter().filter(|i| i.enabled()).collect()
    }

    pub fn enabled_inverter_with_serial(&self, serial: Serial) -> Option<Inverter> {
        self.enabled_inverters()
            .into_iter()
            .find(|i| i.serial() == serial)
    }

    /// The inverter the power limiter drives, `None` if the configured one is
    /// not enabled.
    pub fn limiter_inverter(&self) -> Option<Serial> {
        let configured = self.lock().power_limiter.inverter;
        match configured {
            Some(serial) => self.enabled_inverter_with_serial(serial).map(|i| i.serial()),
            None => self.enabled_inverters().first().map(|i| i.serial()),
        }
    }

    pub fn power_limiter(&self) -> PowerLimiter {
        self.lock().power_limiter.clone()
    }

    pub fn set_power_limiter(&self, new: PowerLimiter) {
        self.lock().power_limiter = new;
    }

    pub fn power_meter(&self) -> PowerMeter {
        self.lock().power_meter.clone()
    }

    pub fn battery(&self) -> Battery {
        self.lock().battery.clone()
    }

    pub fn surplus(&self) -> Surplus {
        self.lock().surplus.clone()
    }

    pub fn location(&self) -> Option<Location> {
        self.lock().location
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|err| anyhow!("config.rs:error parsing config: {}", err))?;

        config.log();
        config.validate()?;
        Ok(config)
    }

    fn log(&self) {
        info!("Configuration loaded:");
        info!(
            "  Inverters: {} configured, {} enabled",
            self.inverters.len(),
            self.inverters.iter().filter(|i| i.enabled).count()
        );
        for (i, inv) in self.inverters.iter().enumerate() {
            info!("    Inverter[{}]:", i);
            info!("      Enabled: {}", inv.enabled);
            info!("      Serial: {}", inv.serial);
            info!("      Name: {}", inv.name.as_deref().unwrap_or("-"));
            match inv.model {
                Some(model) => info!("      Model: {}", model),
                None => info!("      Model: detect from serial"),
            }
            if !inv.channel_max_power.is_empty() {
                info!("      Channel Max Power: {:?} Wp", inv.channel_max_power);
            }
        }

        let pl = &self.power_limiter;
        info!("  Power Limiter: {}", if pl.enabled { "enabled" } else { "disabled" });
        if pl.enabled {
            info!("    Interval: {}s", pl.interval.as_secs());
            info!(
                "    Inverter: {}",
                pl.inverter.map(|s| s.to_string()).unwrap_or_else(|| "first enabled".to_string())
            );
            info!("    Behind Power Meter: {}", pl.is_inverter_behind_power_meter);
            info!("    Limits: {} W .. {} W", pl.lower_power_limit, pl.upper_power_limit);
            info!(
                "    Voltage Start/Stop: {} V / {} V",
                pl.voltage_start_threshold, pl.voltage_stop_threshold
            );
            info!("    Load Correction: {}", pl.voltage_load_correction_factor);
            info!("    Target Margin: {} W", pl.target_margin);
        }

        info!("  Power Meter Sources: {:?}", self.power_meter.sources);
        info!("  Battery: {}", if self.battery.enabled { "enabled" } else { "disabled" });

        let s = &self.surplus;
        info!(
            "  Surplus: stage I {}, stage II {}",
            if s.stage_i_enabled { "on" } else { "off" },
            if s.stage_ii_enabled { "on" } else { "off" }
        );
        if s.stage_i_enabled {
            info!("    Start SoC: {}%", s.start_soc);
            info!("    Battery Capacity: {} Wh", s.battery_capacity);
            info!("    Safety: {}%", s.battery_safety_percent);
            info!("    Absorption To Sunset: {} min", s.duration_absorption_to_sunset);
        }

        if let Some(location) = &self.location {
            info!("  Location: {}, {}", location.latitude, location.longitude);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        let pl = &self.power_limiter;
        if pl.lower_power_limit > pl.upper_power_limit {
            return Err(anyhow!(
                "config.rs:power_limiter.lower_power_limit {} is above upper_power_limit {}",
                pl.lower_power_limit,
                pl.upper_power_limit
            ));
        }
        if pl.interval.is_zero() {
            return Err(anyhow!("config.rs:power_limiter.interval must not be 0"));
        }

        if pl.enabled {
            match pl.inverter {
                Some(serial) => {
                    if !self.inverters.iter().any(|i| i.enabled && i.serial == serial) {
                        return Err(anyhow!(
                            "config.rs:power_limiter.inverter {} is not an enabled inverter",
                            serial
                        ));
                    }
                }
                None => {
                    if !self.inverters.iter().any(|i| i.enabled) {
                        return Err(anyhow!(
                            "config.rs:power_limiter is enabled but no inverter is"
                        ));
                    }
                }
            }
        }

        for (i, inv) in self.inverters.iter().enumerate() {
            if inv.model.is_none() && Model::from_serial(inv.serial).is_none() {
                return Err(anyhow!(
                    "config.rs:inverters[{}]: unknown model for serial {}, set `model`",
                    i,
                    inv.serial
                ));
            }
        }

        if self.surplus.stage_i_enabled && self.location.is_none() {
            return Err(anyhow!(
                "config.rs:surplus.stage_i_enabled needs a location for the sunset time"
            ));
        }

        Ok(())
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
