mod common;
use common::*;

use dtu_limiter::hoymiles::fields::{FieldId, CH1};
use dtu_limiter::hoymiles::inverter::InverterState;
use dtu_limiter::prelude::*;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    Ok(file)
}

fn load(content: &str) -> Result<ConfigWrapper> {
    let file = write_config(content)?;
    ConfigWrapper::new(file.path().to_string_lossy().to_string())
}

#[test]
fn defaults() -> Result<()> {
    common_setup();

    let config = load(
        r#"
inverters:
  - serial: "114172607952"
"#,
    )?;

    let limiter = config.power_limiter();
    assert!(!limiter.enabled());
    assert_eq!(limiter.interval(), Duration::from_secs(10));
    assert!(limiter.is_inverter_behind_power_meter());
    assert_eq!(limiter.lower_power_limit(), 10);
    assert_eq!(limiter.upper_power_limit(), 800);
    assert_eq!(limiter.target_margin(), 10);

    let surplus = config.surplus();
    assert!(!surplus.stage_i_enabled);
    assert!(surplus.stage_ii_enabled);
    assert!(surplus.is_enabled());

    assert!(config.power_meter().sources().is_empty());
    assert!(!config.battery().enabled());
    assert!(config.location().is_none());
    assert_eq!(config.loglevel(), "info");

    let inverters = config.inverters();
    assert_eq!(inverters.len(), 1);
    assert!(inverters[0].enabled());
    assert_eq!(inverters[0].name(), None);
    assert_eq!(config.limiter_inverter(), Some(Factory::serial()));

    Ok(())
}

#[test]
fn full_config() -> Result<()> {
    let config = load(Factory::config_yaml())?;

    let limiter = config.power_limiter();
    assert!(limiter.enabled());
    assert_eq!(limiter.voltage_start_threshold(), 50.0);
    assert_eq!(limiter.voltage_stop_threshold(), 49.0);
    assert_eq!(config.power_meter().sources(), ["grid".to_string()]);
    assert!(config.battery().enabled());
    assert_eq!(config.loglevel(), "debug");

    let location = config.location().expect("location");
    assert_eq!(location.latitude, 48.1);

    let inverter = config
        .enabled_inverter_with_serial(Factory::serial())
        .expect("inverter");
    assert_eq!(inverter.name(), Some("garage"));
    assert_eq!(inverter.channel_max_power(), [400, 400]);

    Ok(())
}

#[test]
fn field_offsets_are_applied() -> Result<()> {
    let config = load(
        r#"
inverters:
  - serial: "114172607952"
    field_offsets:
      - channel: 1
        field: udc
        offset: 0.5
"#,
    )?;

    let inverters = config.inverters();
    let inverter = &inverters[0];
    assert_eq!(
        inverter.field_offsets(),
        [config::FieldOffset {
            channel: CH1,
            field: FieldId::Udc,
            offset: 0.5
        }]
    );

    let mut state = InverterState::from_config(inverter)?;
    state
        .statistics_mut()
        .append_fragment(0, &Factory::hm600_payload(30.0, 0.0));
    assert_eq!(state.statistics().field_value(CH1, FieldId::Udc), Some(30.5));

    Ok(())
}

#[test]
fn explicit_model() -> Result<()> {
    let config = load(
        r#"
inverters:
  - serial: "99991234"
    model: hm4ch
"#,
    )?;

    let state = InverterState::from_config(&config.inverters()[0])?;
    assert_eq!(state.statistics().channel_count(), 4);

    Ok(())
}

#[test]
fn limiter_inverter_selection() -> Result<()> {
    let config = load(
        r#"
inverters:
  - serial: "114172607952"
    enabled: false
  - serial: "116172607953"
  - serial: "112172607954"
"#,
    )?;
    assert_eq!(
        config.limiter_inverter(),
        Some(Serial::new(0x1161_7260_7953))
    );
    assert_eq!(config.enabled_inverters().len(), 2);
    assert!(config.enabled_inverter_with_serial(Factory::serial()).is_none());

    let config = load(
        r#"
inverters:
  - serial: "116172607953"
  - serial: "112172607954"
power_limiter:
  enabled: true
  inverter: "112172607954"
"#,
    )?;
    assert_eq!(
        config.limiter_inverter(),
        Some(Serial::new(0x1121_7260_7954))
    );

    Ok(())
}

#[test]
fn disabled_limiter_inverter_is_not_driven() -> Result<()> {
    let mut raw = config::Config::from_yaml(Factory::config_yaml())?;
    raw.power_limiter.inverter = Some(Factory::serial());
    raw.inverters[0].enabled = false;

    let config = ConfigWrapper::from_config(raw);
    assert_eq!(config.limiter_inverter(), None);

    Ok(())
}

#[test]
fn settings_can_be_replaced() -> Result<()> {
    let config = Factory::config()?;
    let copy = config.clone();

    let mut limiter = config.power_limiter();
    limiter.upper_power_limit = 600;
    config.set_power_limiter(limiter);

    assert_eq!(copy.power_limiter().upper_power_limit(), 600);

    Ok(())
}

#[test]
fn rejects_invalid_configs() {
    common_setup();

    let lower_above_upper = r#"
power_limiter:
  lower_power_limit: 900
  upper_power_limit: 800
"#;
    let err = config::Config::from_yaml(lower_above_upper).unwrap_err();
    assert!(err.to_string().contains("lower_power_limit"), "{}", err);

    let zero_interval = r#"
power_limiter:
  interval: 0
"#;
    assert!(config::Config::from_yaml(zero_interval).is_err());

    let unknown_target = r#"
inverters:
  - serial: "114172607952"
power_limiter:
  enabled: true
  inverter: "116172607953"
"#;
    let err = config::Config::from_yaml(unknown_target).unwrap_err();
    assert!(err.to_string().contains("116172607953"), "{}", err);

    let no_inverter = r#"
power_limiter:
  enabled: true
"#;
    assert!(config::Config::from_yaml(no_inverter).is_err());

    let unknown_model = r#"
inverters:
  - serial: "99991234"
"#;
    let err = config::Config::from_yaml(unknown_model).unwrap_err();
    assert!(err.to_string().contains("model"), "{}", err);

    let stage_i_without_location = r#"
surplus:
  stage_i_enabled: true
"#;
    assert!(config::Config::from_yaml(stage_i_without_location).is_err());

    for yaml in [
        lower_above_upper,
        zero_interval,
        unknown_target,
        no_inverter,
        unknown_model,
        stage_i_without_location,
    ] {
        let err = config::Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().starts_with("config.rs:"), "{}", err);
    }

    let bad_serial = r#"
inverters:
  - serial: "xyz"
"#;
    assert!(config::Config::from_yaml(bad_serial).is_err());
}

#[test]
fn missing_file() {
    let result = ConfigWrapper::new("/nonexistent/dtu-limiter.yaml".to_string());
    assert!(result.is_err());
}
