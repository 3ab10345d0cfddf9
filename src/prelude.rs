pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use std::time::{Duration, Instant};
pub use tokio::sync::broadcast;

pub use crate::{
    battery, channels::Channels, command::Command, config, config::ConfigWrapper, coordinator,
    hoymiles, hoymiles::inverter::Serial, power_limiter, power_meter, solar_charger, surplus,
};
