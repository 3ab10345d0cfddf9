use crate::prelude::*;
use crate::hoymiles::models::Model;
use crate::hoymiles::statistics::Statistics;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Events delivered by the radio transport.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Fragment(Serial, u8, Bytes), // offset into the statistics buffer + payload
    ClearBuffer(Serial),         // a new transmission cycle starts
    StatisticsComplete(Serial),  // all fragments of a cycle arrived
    RxFailure(Serial),
    Reachable(Serial, bool),
    Producing(Serial, bool),
    LinkStatus(bool),
    RadioIdle(bool),
    Shutdown,
}
pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

pub type InverterStore = Arc<Mutex<HashMap<Serial, InverterState>>>;

// Serial {{{
/// 48-bit inverter serial, written as 12 hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Serial(u64);

impl Serial {
    pub fn new(value: u64) -> Self {
        Self(value & 0xffff_ffff_ffff)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Upper 16 bits, which encode the hardware type.
    pub fn type_prefix(&self) -> u16 {
        ((self.0 >> 32) & 0xffff) as u16
    }
}

impl From<u64> for Serial {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:012x}", self.0)
    }
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:012x}", self.0)
    }
}

impl Serialize for Serial {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::str::FromStr for Serial {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 12 {
            return Err(anyhow!("inverter.rs:serial {} must be 1 to 12 hex digits", s));
        }

        let value = u64::from_str_radix(s, 16)
            .map_err(|err| anyhow!("inverter.rs:serial {} is not hex: {}", s, err))?;
        Ok(Self(value))
    }
} // }}}

// LinkStatus {{{
/// Transport health flags, written by the coordinator and read by the
/// control loop.
#[derive(Clone, Debug, Default)]
pub struct LinkStatus {
    link_up: Arc<AtomicBool>,
    radio_idle: Arc<AtomicBool>,
}

impl LinkStatus {
    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::Release);
    }

    pub fn set_radio_idle(&self, idle: bool) {
        self.radio_idle.store(idle, Ordering::Release);
    }

    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    pub fn radio_idle(&self) -> bool {
        self.radio_idle.load(Ordering::Acquire)
    }
} // }}}

/// Live state of one physical inverter: identity, reachability and the
/// decoded statistics snapshot.
#[derive(Clone, Debug)]
pub struct InverterState {
    serial: Serial,
    name: String,
    model: Model,
    statistics: Statistics,
    reachable: bool,
    producing: bool,
}

impl InverterState {
    pub fn new(serial: Serial, name: &str, model: Model) -> Self {
        Self {
            serial,
            name: name.to_string(),
            model,
            statistics: Statistics::for_model(model),
            reachable: false,
            producing: false,
        }
    }

    pub fn from_config(inverter: &config::Inverter) -> Result<Self> {
        let model = match inverter.model() {
            Some(model) => model,
            None => Model::from_serial(inverter.serial()).ok_or_else(|| {
                anyhow!(
                    "inverter.rs:cannot detect model of inverter {}, set `model` in the config",
                    inverter.serial()
                )
            })?,
        };

        let name = inverter
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| inverter.serial().to_string());
        let mut state = Self::new(inverter.serial(), &name, model);

        for (index, power) in inverter.channel_max_power().iter().enumerate() {
            state.statistics.set_channel_max_power(index as u8 + 1, *power);
        }
        for offset in inverter.field_offsets() {
            state
                .statistics
                .set_field_offset(offset.channel, offset.field, offset.offset);
        }

        Ok(state)
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn statistics_mut(&mut self) -> &mut Statistics {
        &mut self.statistics
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    pub fn is_producing(&self) -> bool {
        self.producing
    }

    pub fn set_producing(&mut self, producing: bool) {
        self.producing = producing;
    }
}

/// Builds the shared store for every enabled inverter in the config.
pub fn inverter_store(config: &ConfigWrapper) -> Result<InverterStore> {
    let mut store = HashMap::new();
    for inverter in config.enabled_inverters() {
        let state = InverterState::from_config(&inverter)?;
        info!(
            "inverter {} ({}) uses the {} field table",
            state.serial(),
            state.name(),
            state.model()
        );
        store.insert(state.serial(), state);
    }

    Ok(Arc::new(Mutex::new(store)))
}
