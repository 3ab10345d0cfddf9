use crate::prelude::*;
use crate::hoymiles::inverter::ChannelData;

#[derive(Debug, Clone)]
pub struct Channels {
    pub from_inverter: broadcast::Sender<ChannelData>,
    pub to_inverter: broadcast::Sender<Command>,
    pub from_power_meter: broadcast::Sender<power_meter::ChannelData>,
    pub from_solar_charger: broadcast::Sender<solar_charger::ChannelData>,
    pub from_battery: broadcast::Sender<battery::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_inverter: Self::channel(),
            to_inverter: Self::channel(),
            from_power_meter: Self::channel(),
            from_solar_charger: Self::channel(),
            from_battery: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
