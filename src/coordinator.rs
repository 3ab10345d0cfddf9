use crate::prelude::*;
use crate::hoymiles::inverter::{self, InverterStore};
use crate::power_meter::PowerMeters;
use crate::solar_charger::SolarChargers;

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;

#[derive(Default, Debug)]
pub struct RxStats {
    pub fragments_received: u64,
    pub unknown_inverter: u64,
    pub cycles_completed: u64,
    pub rx_failures: u64,
    pub meter_readings: u64,
    pub meter_readings_ignored: u64,
    pub charger_updates: u64,
    pub battery_updates: u64,
    pub lagged_messages: u64,
}

impl RxStats {
    pub fn print_summary(&self) {
        info!("Receive Statistics:");
        info!("  Inverter:");
        info!("    Fragments received: {}", self.fragments_received);
        info!("    Messages for unknown inverters: {}", self.unknown_inverter);
        info!("    Completed cycles: {}", self.cycles_completed);
        info!("    Rx failures: {}", self.rx_failures);
        info!("  Power meter:");
        info!("    Readings: {}", self.meter_readings);
        info!("    Ignored readings: {}", self.meter_readings_ignored);
        info!("  Charge controllers:");
        info!("    Updates: {}", self.charger_updates);
        info!("  Battery:");
        info!("    Updates: {}", self.battery_updates);
        info!("  Lagged messages: {}", self.lagged_messages);
    }
}

/// State shared between the receive path and the control loop.
#[derive(Clone, Debug)]
pub struct Stores {
    pub inverters: InverterStore,
    pub link: inverter::LinkStatus,
    pub meters: PowerMeters,
    pub chargers: SolarChargers,
    pub battery: battery::Battery,
}

impl Stores {
    pub fn new(inverters: InverterStore) -> Self {
        Self {
            inverters,
            link: inverter::LinkStatus::default(),
            meters: PowerMeters::new(),
            chargers: SolarChargers::new(),
            battery: battery::Battery::new(),
        }
    }

    pub fn from_config(config: &ConfigWrapper) -> Result<Self> {
        Ok(Self::new(inverter::inverter_store(config)?))
    }
}

/// Receive path: applies transport, meter, charger and battery messages to
/// the shared stores.
#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    stores: Stores,
    pub stats: Arc<Mutex<RxStats>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels, stores: Stores) -> Self {
        Self {
            config,
            channels,
            stores,
            stats: Arc::new(Mutex::new(RxStats::default())),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub async fn start(&self) -> Result<()> {
        futures::try_join!(
            self.inverter_receiver(),
            self.power_meter_receiver(),
            self.solar_charger_receiver(),
            self.battery_receiver()
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self
            .channels
            .from_inverter
            .send(inverter::ChannelData::Shutdown);
        let _ = self
            .channels
            .from_power_meter
            .send(power_meter::ChannelData::Shutdown);
        let _ = self
            .channels
            .from_solar_charger
            .send(solar_charger::ChannelData::Shutdown);
        let _ = self.channels.from_battery.send(battery::ChannelData::Shutdown);
    }

    fn with_stats<F: FnOnce(&mut RxStats)>(&self, f: F) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    fn lagged(&self, source: &str, skipped: u64) {
        warn!("{} receiver lagged, {} messages skipped", source, skipped);
        self.with_stats(|s| s.lagged_messages += skipped);
    }

    async fn inverter_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_inverter.subscribe();

        loop {
            match receiver.recv().await {
                Ok(inverter::ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                Ok(data) => self.handle_inverter_data(&data, Instant::now()),
                Err(RecvError::Lagged(skipped)) => self.lagged("inverter", skipped),
            }
        }

        info!("inverter receiver exiting");
        Ok(())
    }

    async fn power_meter_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_power_meter.subscribe();

        loop {
            match receiver.recv().await {
                Ok(power_meter::ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                Ok(data) => self.handle_power_meter_data(&data, Instant::now()),
                Err(RecvError::Lagged(skipped)) => self.lagged("power meter", skipped),
            }
        }

        info!("power meter receiver exiting");
        Ok(())
    }

    async fn solar_charger_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_solar_charger.subscribe();

        loop {
            match receiver.recv().await {
                Ok(solar_charger::ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                Ok(data) => self.handle_solar_charger_data(&data, Instant::now()),
                Err(RecvError::Lagged(skipped)) => self.lagged("solar charger", skipped),
            }
        }

        info!("solar charger receiver exiting");
        Ok(())
    }

    async fn battery_receiver(&self) -> Result<()> {
        let mut receiver = self.channels.from_battery.subscribe();

        loop {
            match receiver.recv().await {
                Ok(battery::ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                Ok(data) => self.handle_battery_data(&data, Instant::now()),
                Err(RecvError::Lagged(skipped)) => self.lagged("battery", skipped),
            }
        }

        info!("battery receiver exiting");
        Ok(())
    }

    pub fn handle_inverter_data(&self, data: &inverter::ChannelData, now: Instant) {
        use inverter::ChannelData::*;

        match data {
            LinkStatus(up) => {
                info!("transport link {}", if *up { "up" } else { "down" });
                self.stores.link.set_link_up(*up);
                return;
            }
            RadioIdle(idle) => {
                self.stores.link.set_radio_idle(*idle);
                return;
            }
            _ => {}
        }

        let serial = match data {
            Fragment(serial, _, _)
            | ClearBuffer(serial)
            | StatisticsComplete(serial)
            | RxFailure(serial)
            | Reachable(serial, _)
            | Producing(serial, _) => *serial,
            LinkStatus(_) | RadioIdle(_) | Shutdown => return,
        };

        let mut store = self
            .stores
            .inverters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(state) = store.get_mut(&serial) else {
            warn!("ignoring data for unknown inverter {}", serial);
            self.with_stats(|s| s.unknown_inverter += 1);
            return;
        };

        match data {
            Fragment(_, offset, payload) => {
                state
                    .statistics_mut()
                    .append_fragment(*offset as usize, payload);
                self.with_stats(|s| s.fragments_received += 1);
            }
            ClearBuffer(_) => state.statistics_mut().clear_buffer(),
            StatisticsComplete(_) => {
                state.statistics_mut().set_last_update(now);
                self.with_stats(|s| s.cycles_completed += 1);

                match serde_json::to_string(&state.statistics().readings()) {
                    Ok(json) => debug!("{} statistics: {}", serial, json),
                    Err(err) => warn!("{} statistics not serializable: {}", serial, err),
                }
            }
            RxFailure(_) => {
                state.statistics_mut().increment_rx_failure_count();
                self.with_stats(|s| s.rx_failures += 1);
                debug!(
                    "{} rx failure, {} so far",
                    serial,
                    state.statistics().rx_failure_count()
                );
            }
            Reachable(_, reachable) => {
                if state.is_reachable() != *reachable {
                    info!("inverter {} reachable: {}", serial, reachable);
                }
                state.set_reachable(*reachable);
            }
            Producing(_, producing) => {
                if state.is_producing() != *producing {
                    info!("inverter {} producing: {}", serial, producing);
                }
                state.set_producing(*producing);
            }
            LinkStatus(_) | RadioIdle(_) | Shutdown => {}
        }
    }

    pub fn handle_power_meter_data(&self, data: &power_meter::ChannelData, now: Instant) {
        let power_meter::ChannelData::Reading(source, watts) = data else {
            return;
        };

        let config = self.config.power_meter();
        if !config.sources().is_empty() && !config.sources().iter().any(|s| s == source) {
            debug!("ignoring reading from unconfigured meter {}", source);
            self.with_stats(|s| s.meter_readings_ignored += 1);
            return;
        }

        trace!("meter {}: {} W", source, watts);
        self.stores.meters.update(source, *watts, now);
        self.with_stats(|s| s.meter_readings += 1);
    }

    pub fn handle_solar_charger_data(&self, data: &solar_charger::ChannelData, now: Instant) {
        match data {
            solar_charger::ChannelData::Update(update) => {
                self.stores.chargers.update(update.clone(), now);
                self.with_stats(|s| s.charger_updates += 1);
            }
            solar_charger::ChannelData::ChargeLimit(limit, charge_current) => {
                debug!("charge limit {:.2} A, charging with {:.2} A", limit, charge_current);
                self.stores.chargers.set_charge_limit(*limit, *charge_current);
            }
            solar_charger::ChannelData::Shutdown => {}
        }
    }

    pub fn handle_battery_data(&self, data: &battery::ChannelData, now: Instant) {
        if !self.config.battery().enabled() {
            return;
        }

        self.stores.battery.handle(data, now);
        self.with_stats(|s| s.battery_updates += 1);
    }
}
