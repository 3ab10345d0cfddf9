mod common;
use common::*;

use dtu_limiter::hoymiles::fields::{ChannelKind, FieldSource};
use dtu_limiter::hoymiles::models::{Model, MODELS};
use dtu_limiter::hoymiles::statistics::{Statistics, STATISTIC_PACKET_SIZE};
use dtu_limiter::prelude::*;
use std::collections::HashSet;

#[test]
fn channel_and_field_are_unique_per_model() {
    for model in MODELS {
        let mut seen = HashSet::new();
        for d in model.descriptors() {
            assert!(
                seen.insert((d.channel, d.field)),
                "{} has {:?} on channel {} twice",
                model,
                d.field,
                d.channel
            );
        }
    }
}

#[test]
fn raw_fields_fit_the_buffer() {
    for model in MODELS {
        for d in model.descriptors() {
            if let FieldSource::Raw {
                offset,
                length,
                divisor,
            } = d.source
            {
                assert!(offset + length <= STATISTIC_PACKET_SIZE, "{} {:?}", model, d);
                assert!((1..=4).contains(&length), "{} {:?}", model, d);
                assert!(divisor > 0, "{} {:?}", model, d);
            }
        }
    }
}

#[test]
fn dc_channels_match_model() {
    for model in MODELS {
        let stats = Statistics::for_model(model);
        assert_eq!(stats.channel_count(), model.dc_channel_count(), "{}", model);

        let ac_on_ch0 = model
            .descriptors()
            .iter()
            .filter(|d| d.kind != ChannelKind::Dc)
            .all(|d| d.channel == 0);
        assert!(ac_on_ch0, "{}", model);
    }
}

#[test]
fn model_from_serial_prefix() -> Result<()> {
    assert_eq!(Model::from_serial(Factory::serial()), Some(Model::Hm2Ch));
    assert_eq!(
        Model::from_serial(Serial::from_str("112172607952")?),
        Some(Model::Hm1Ch)
    );
    assert_eq!(
        Model::from_serial(Serial::from_str("116172607952")?),
        Some(Model::Hm4Ch)
    );
    assert_eq!(
        Model::from_serial(Serial::from_str("138272607952")?),
        Some(Model::Hmt6Ch)
    );
    assert_eq!(Model::from_serial(Serial::from_str("999972607952")?), None);

    Ok(())
}

#[test]
fn model_from_hm_prefix_family() -> Result<()> {
    for serial in ["114272607952", "114372607952", "114f72607952", "104272607952"] {
        assert_eq!(
            Model::from_serial(Serial::from_str(serial)?),
            Some(Model::Hm2Ch),
            "{}",
            serial
        );
    }
    assert_eq!(
        Model::from_serial(Serial::from_str("112572607952")?),
        Some(Model::Hm1Ch)
    );
    assert_eq!(
        Model::from_serial(Serial::from_str("102172607952")?),
        Some(Model::Hm1Ch)
    );
    assert_eq!(
        Model::from_serial(Serial::from_str("116372607952")?),
        Some(Model::Hm4Ch)
    );

    // HMS share the middle byte but have their own layout
    assert_eq!(
        Model::from_serial(Serial::from_str("114472607952")?),
        Some(Model::Hms2Ch)
    );
    assert_eq!(Model::from_serial(Serial::from_str("112472607952")?), None);
    assert_eq!(Model::from_serial(Serial::from_str("116472607952")?), None);
    assert_eq!(Model::from_serial(Serial::from_str("115072607952")?), None);

    Ok(())
}

#[test]
fn serial_parsing() -> Result<()> {
    let serial = Serial::from_str("114172607952")?;
    assert_eq!(serial, Factory::serial());
    assert_eq!(serial.to_string(), "114172607952");

    assert!(Serial::from_str("").is_err());
    assert!(Serial::from_str("1141726079521").is_err());
    assert!(Serial::from_str("xyz").is_err());

    Ok(())
}
