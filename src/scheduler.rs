use crate::prelude::*;
use crate::coordinator::Stores;
use crate::power_limiter::{Action, LimiterContext, PowerLimiter};
use crate::sun_position::SunPosition;
use crate::surplus::{SurplusInputs, SurplusPower};

use chrono::{DateTime, Utc};
use std::sync::PoisonError;

/// Period of the control tick. The limiter applies its own, longer interval.
pub const TICK: Duration = Duration::from_secs(1);

/// Periodic control loop: base limiter, surplus regulation and the split of
/// the charge limit over the charge controllers.
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
    stores: Stores,
    limiter: PowerLimiter,
    surplus: SurplusPower,
    sun: Option<SunPosition>,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels, stores: Stores) -> Self {
        let limiter_config = config.power_limiter();
        let limiter = PowerLimiter::new(limiter_config.clone(), channels.clone());
        let surplus = SurplusPower::new(&config.surplus(), &limiter_config);
        let sun = config
            .location()
            .map(|l| SunPosition::new(l.latitude, l.longitude));

        Self {
            config,
            channels,
            stores,
            limiter,
            surplus,
            sun,
        }
    }

    pub fn limiter(&self) -> &PowerLimiter {
        &self.limiter
    }

    pub fn surplus(&self) -> &SurplusPower {
        &self.surplus
    }

    pub fn surplus_mut(&mut self) -> &mut SurplusPower {
        &mut self.surplus
    }

    /// Re-reads limiter and surplus settings from the config.
    pub fn update_settings(&mut self) {
        let limiter_config = self.config.power_limiter();
        self.surplus
            .update_settings(&self.config.surplus(), &limiter_config);
        self.limiter.update_settings(limiter_config);
    }

    pub async fn start(&mut self) -> Result<()> {
        let mut shutdown = self.channels.from_inverter.subscribe();
        let mut interval = tokio::time::interval(TICK);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Instant::now(), Utc::now());
                }
                message = shutdown.recv() => {
                    match message {
                        Ok(hoymiles::inverter::ChannelData::Shutdown)
                        | Err(broadcast::error::RecvError::Closed) => break,
                        _ => {}
                    }
                }
            }
        }

        info!("scheduler exiting");
        Ok(())
    }

    /// One control iteration. `now` drives every staleness check, `wall` is
    /// only used for the sunset time.
    pub fn tick(&mut self, now: Instant, wall: DateTime<Utc>) -> Option<Action> {
        for (serial, limit) in self.stores.chargers.distribute_charge_limit() {
            debug!("charge controller {}: charge limit {:.2} A", serial, limit);
        }

        let target = self.config.limiter_inverter();
        let battery_enabled = self.config.battery().enabled();

        let inverters = self
            .stores
            .inverters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ctx = LimiterContext {
            link_up: self.stores.link.link_up(),
            radio_idle: self.stores.link.radio_idle(),
            inverter: target.and_then(|serial| inverters.get(&serial)),
            meters: &self.stores.meters,
        };

        let stores = &self.stores;
        let sun = self.sun;
        let surplus = &mut self.surplus;

        let action = self.limiter.tick(now, &ctx, |requested| {
            if !surplus.is_enabled() {
                return requested;
            }
            let inputs = surplus_inputs(stores, sun, battery_enabled, now, wall);
            surplus.calculate(requested, now, &inputs)
        });

        if let Some(action) = action {
            debug!("limiter: {:?}", action);
        }
        action
    }
}

fn surplus_inputs(
    stores: &Stores,
    sun: Option<SunPosition>,
    battery_enabled: bool,
    now: Instant,
    wall: DateTime<Utc>,
) -> SurplusInputs {
    let (soc, battery_current) = if battery_enabled {
        (stores.battery.soc(now), stores.battery.current(now))
    } else {
        (None, None)
    };

    SurplusInputs {
        charger: stores.chargers.readings(now),
        soc,
        battery_current,
        minutes_to_sunset: sun.and_then(|sun| sun.minutes_to_sunset(wall)),
    }
}
