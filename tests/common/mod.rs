#![allow(dead_code)]

use dtu_limiter::battery::Reading;
use dtu_limiter::hoymiles::inverter::InverterState;
use dtu_limiter::hoymiles::models::Model;
use dtu_limiter::prelude::*;
use dtu_limiter::solar_charger::{ChargerReadings, OperatingMode};
use dtu_limiter::surplus::SurplusInputs;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writes `value` big-endian at `offset`.
pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub struct Factory();
impl Factory {
    /// An HM-600 (two DC channels).
    pub fn serial() -> Serial {
        Serial::new(0x1141_7260_7952)
    }

    pub fn config_yaml() -> &'static str {
        r#"
loglevel: debug
inverters:
  - serial: "114172607952"
    name: garage
    channel_max_power: [400, 400]
power_limiter:
  enabled: true
  interval: 10
  lower_power_limit: 10
  upper_power_limit: 800
  voltage_start_threshold: 50.0
  voltage_stop_threshold: 49.0
  voltage_load_correction_factor: 0.001
power_meter:
  sources: [grid]
battery:
  enabled: true
surplus:
  stage_i_enabled: false
  stage_ii_enabled: true
location:
  latitude: 48.1
  longitude: 11.6
"#
    }

    pub fn config() -> Result<ConfigWrapper> {
        Ok(ConfigWrapper::from_config(config::Config::from_yaml(
            Self::config_yaml(),
        )?))
    }

    pub fn limiter_config() -> config::PowerLimiter {
        config::PowerLimiter {
            enabled: true,
            interval: Duration::from_secs(10),
            lower_power_limit: 10,
            upper_power_limit: 800,
            voltage_start_threshold: 50.0,
            voltage_stop_threshold: 49.0,
            voltage_load_correction_factor: 0.001,
            is_inverter_behind_power_meter: true,
            target_power_consumption_hysteresis: 0,
            target_margin: 10,
            ..Default::default()
        }
    }

    pub fn surplus_config() -> config::Surplus {
        config::Surplus {
            stage_i_enabled: false,
            stage_ii_enabled: true,
            ..Default::default()
        }
    }

    /// Statistics payload of an HM-600 with the given DC voltage on
    /// channel 1 and AC power.
    pub fn hm600_payload(udc: f32, pac: f32) -> Vec<u8> {
        let mut payload = vec![0; 42];
        put_u16(&mut payload, 2, (udc * 10.0).round() as u16);
        put_u16(&mut payload, 30, (pac * 10.0).round() as u16);
        payload
    }

    /// A reachable HM-600 with fresh telemetry as of `updated`.
    pub fn inverter(udc: f32, pac: f32, producing: bool, updated: Instant) -> InverterState {
        let mut state = InverterState::new(Self::serial(), "test", Model::Hm2Ch);
        state.set_reachable(true);
        state.set_producing(producing);
        state
            .statistics_mut()
            .append_fragment(0, &Self::hm600_payload(udc, pac));
        state.statistics_mut().set_last_update(updated);
        state
    }

    pub fn reading(value: f32, age_secs: u64) -> Reading {
        Reading {
            value,
            age: Duration::from_secs(age_secs),
        }
    }

    pub fn absorption_inputs(battery_voltage: f32) -> SurplusInputs {
        SurplusInputs {
            charger: ChargerReadings {
                mode: Some(OperatingMode::Absorption),
                absorption_voltage: Some(28.8),
                float_voltage: Some(27.6),
                battery_voltage: Some(battery_voltage),
                panel_power: Some(600.0),
            },
            ..Default::default()
        }
    }

    pub fn bulk_inputs(soc: f32, panel_power: f32, minutes_to_sunset: i32) -> SurplusInputs {
        SurplusInputs {
            charger: ChargerReadings {
                mode: Some(OperatingMode::Bulk),
                absorption_voltage: Some(28.8),
                float_voltage: Some(27.6),
                battery_voltage: Some(26.4),
                panel_power: Some(panel_power),
            },
            soc: Some(Self::reading(soc, 1)),
            battery_current: None,
            minutes_to_sunset: Some(minutes_to_sunset),
        }
    }
}
