mod common;
use common::*;

use dtu_limiter::prelude::*;
use dtu_limiter::solar_charger::OperatingMode;
use dtu_limiter::surplus::{
    Quality, StageSwitch, State, SurplusInputs, SurplusPower, RESERVE_POWER_MAX,
};

fn stage_ii() -> SurplusPower {
    SurplusPower::new(&Factory::surplus_config(), &Factory::limiter_config())
}

fn stage_i() -> SurplusPower {
    let surplus = config::Surplus {
        stage_i_enabled: true,
        stage_ii_enabled: false,
        start_soc: 40.0,
        battery_capacity: 2500,
        battery_safety_percent: 30.0,
        duration_absorption_to_sunset: 30,
        ..Default::default()
    };
    let limiter = config::PowerLimiter {
        upper_power_limit: 1500,
        ..Factory::limiter_config()
    };
    SurplusPower::new(&surplus, &limiter)
}

/// Calls `calculate` every 5 s starting at `start`.
struct Clock {
    start: Instant,
    ticks: u64,
}

impl Clock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            ticks: 0,
        }
    }

    fn next(&mut self) -> Instant {
        let now = self.start + Duration::from_secs(5 * self.ticks);
        self.ticks += 1;
        now
    }
}

const HIGH: f32 = 28.8;
const LOW: f32 = 27.0;

#[test]
fn reserve_for_half_full_battery() {
    let reserve = SurplusPower::battery_reserve(2500, 50.0, 120, 30.0);
    assert!((805..=812).contains(&reserve), "{}", reserve);

    assert_eq!(SurplusPower::battery_reserve(2500, 100.0, 120, 30.0), 0);
    assert_eq!(SurplusPower::battery_reserve(2500, 50.0, 0, 30.0), RESERVE_POWER_MAX);
}

#[test]
fn stage_i_reserves_power_for_battery() {
    common_setup();

    let mut surplus = stage_i();
    let now = Instant::now();

    let back = surplus.calculate(100, now, &Factory::bulk_inputs(50.0, 2000.0, 150));
    assert_eq!(surplus.state(), State::BulkPower);
    let reserve = surplus.battery_reserve_power();
    assert!((805..=812).contains(&reserve), "{}", reserve);

    // (2000 W * 0.97 - reserve) * 0.94
    let expected = ((2000.0 * 0.97 - reserve as f32) * 0.94) as i32;
    assert!((surplus.surplus_power() - expected).abs() <= 1);
    assert_eq!(back as i32, surplus.surplus_power());
}

#[test]
fn stage_i_reserve_is_recomputed_every_five_minutes() {
    let mut surplus = stage_i();
    let start = Instant::now();

    surplus.calculate(0, start, &Factory::bulk_inputs(50.0, 2000.0, 150));
    let first = surplus.battery_reserve_power();

    let t = start + Duration::from_secs(60);
    surplus.calculate(0, t, &Factory::bulk_inputs(50.0, 2000.0, 60));
    assert_eq!(surplus.battery_reserve_power(), first);

    // 90 min to sunset - 30 min = 60 min to absorption
    let t = start + Duration::from_secs(301);
    surplus.calculate(0, t, &Factory::bulk_inputs(50.0, 2000.0, 90));
    let second = surplus.battery_reserve_power();
    assert!((1615..=1622).contains(&second), "{}", second);
}

#[test]
fn stage_i_after_deadline_keeps_all_for_battery() {
    let mut surplus = stage_i();
    let now = Instant::now();

    let back = surplus.calculate(120, now, &Factory::bulk_inputs(60.0, 2000.0, 20));
    assert_eq!(surplus.battery_reserve_power(), RESERVE_POWER_MAX);
    assert_eq!(surplus.surplus_power(), 0);
    assert_eq!(back, 120);
}

#[test]
fn stage_i_soc_window() {
    let config = config::Surplus {
        stage_i_enabled: true,
        stage_ii_enabled: false,
        start_soc: 80.0,
        ..Default::default()
    };
    let mut surplus = SurplusPower::new(&config, &Factory::limiter_config());
    let mut clock = Clock::new();

    // below start while idle
    surplus.calculate(50, clock.next(), &Factory::bulk_inputs(79.0, 1000.0, 300));
    assert_eq!(surplus.state(), State::Idle);

    surplus.calculate(50, clock.next(), &Factory::bulk_inputs(85.0, 1000.0, 300));
    assert_eq!(surplus.state(), State::BulkPower);

    // between stop and start while running
    surplus.calculate(50, clock.next(), &Factory::bulk_inputs(79.0, 1000.0, 300));
    assert_eq!(surplus.state(), State::BulkPower);

    let back = surplus.calculate(50, clock.next(), &Factory::bulk_inputs(78.0, 1000.0, 300));
    assert_eq!(surplus.state(), State::Idle);
    assert_eq!(surplus.surplus_power(), 0);
    assert_eq!(back, 50);
}

#[test]
fn stage_i_needs_fresh_soc_and_sunset() {
    let mut surplus = stage_i();
    let mut clock = Clock::new();

    let mut inputs = Factory::bulk_inputs(50.0, 2000.0, 150);
    inputs.soc = Some(Factory::reading(50.0, 61));
    assert_eq!(surplus.calculate(30, clock.next(), &inputs), 30);
    assert_eq!(surplus.error_counter(), 1);

    inputs.soc = None;
    assert_eq!(surplus.calculate(30, clock.next(), &inputs), 30);
    assert_eq!(surplus.error_counter(), 2);

    // leaving idle resets the error counter, a missing sunset counts again
    let mut inputs = Factory::bulk_inputs(50.0, 2000.0, 150);
    inputs.minutes_to_sunset = None;
    let back = surplus.calculate(30, clock.next(), &inputs);
    assert_eq!(surplus.error_counter(), 1);
    assert_eq!(surplus.battery_reserve_power(), RESERVE_POWER_MAX);
    assert_eq!(back, 30);
}

#[test]
fn missing_operating_mode_is_counted() {
    let mut surplus = stage_ii();
    let inputs = SurplusInputs::default();

    assert_eq!(surplus.calculate(200, Instant::now(), &inputs), 200);
    assert_eq!(surplus.error_counter(), 1);
    assert_eq!(surplus.state(), State::Idle);
}

#[test]
fn other_modes_go_idle() {
    let mut surplus = stage_ii();
    let mut inputs = Factory::absorption_inputs(HIGH);
    inputs.charger.mode = Some(OperatingMode::Bulk);

    assert_eq!(surplus.calculate(200, Instant::now(), &inputs), 200);
    assert_eq!(surplus.state(), State::Idle);
    assert_eq!(surplus.surplus_power(), 0);
}

#[test]
fn try_more_below_target_reduces_by_one_step() {
    common_setup();

    let mut surplus = stage_ii();
    let mut clock = Clock::new();
    let step = surplus.step_size();
    assert_eq!(step, 41);

    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::TryMore);
    assert_eq!(surplus.surplus_power(), 0);

    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::TryMore);
    assert_eq!(surplus.surplus_power(), 4 * step);

    let before = surplus.surplus_power();
    let back = surplus.calculate(0, clock.next(), &Factory::absorption_inputs(LOW));
    assert_eq!(surplus.state(), State::ReducePower);
    assert_eq!(surplus.surplus_power(), before - step);
    assert_eq!(back as i32, before - step);
    assert_eq!(surplus.quality_counter(), 1);
}

#[test]
fn reduce_then_in_target() {
    let mut surplus = stage_ii();
    let mut clock = Clock::new();
    let step = surplus.step_size();

    for _ in 0..4 {
        surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    }
    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(LOW));
    assert_eq!(surplus.state(), State::ReducePower);
    let reduced = surplus.surplus_power();

    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(LOW));
    assert_eq!(surplus.surplus_power(), reduced - step);

    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::InTarget);
    assert_eq!(surplus.surplus_power(), reduced - step);

    // holding; the completed search is recorded once
    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::InTarget);
    assert_eq!(surplus.quality_counter(), 0);
    assert!(surplus.quality_average() > 0.0);
    assert_ne!(surplus.quality(), Quality::NoData);
}

#[test]
fn in_target_rises_after_dwell() {
    let mut surplus = stage_ii();
    let start = Instant::now();
    let step = surplus.step_size();

    let mut t = start;
    let mut next = |secs: u64| {
        t += Duration::from_secs(secs);
        t
    };

    surplus.calculate(0, next(0), &Factory::absorption_inputs(HIGH));
    surplus.calculate(0, next(5), &Factory::absorption_inputs(HIGH));
    surplus.calculate(0, next(5), &Factory::absorption_inputs(LOW));
    surplus.calculate(0, next(5), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::InTarget);
    let held = surplus.surplus_power();

    surplus.calculate(0, next(30), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::InTarget);
    assert_eq!(surplus.surplus_power(), held);

    surplus.calculate(0, next(31), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::TryMore);
    assert_eq!(surplus.surplus_power(), held + step);
}

#[test]
fn keep_last_power_resets_quality_counter() {
    let mut surplus = stage_ii();
    let mut clock = Clock::new();

    for _ in 0..3 {
        surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    }
    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(LOW));
    assert_eq!(surplus.quality_counter(), 1);

    let back = surplus.calculate(500, clock.next(), &Factory::absorption_inputs(LOW));
    assert_eq!(back, 500);
    assert_eq!(surplus.state(), State::KeepLastPower);
    assert_eq!(surplus.quality_counter(), 0);

    surplus.calculate(500, clock.next(), &Factory::absorption_inputs(LOW));
    assert_eq!(surplus.state(), State::KeepLastPower);

    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::TryMore);
}

#[test]
fn fresh_start_seeds_with_requested_power() {
    let mut surplus = stage_ii();
    let back = surplus.calculate(300, Instant::now(), &Factory::absorption_inputs(HIGH));

    assert_eq!(back, 300);
    assert_eq!(surplus.surplus_power(), 300);
    assert_eq!(surplus.state(), State::TryMore);
    assert_eq!(surplus.quality_counter(), 0);
}

#[test]
fn discharging_battery_overrules_increase() {
    common_setup();

    let mut surplus = stage_ii();
    let mut clock = Clock::new();
    let step = surplus.step_size();

    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.surplus_power(), 2 * step);

    let mut inputs = Factory::absorption_inputs(HIGH);
    inputs.battery_current = Some(Factory::reading(-2.0, 1));
    surplus.calculate(0, clock.next(), &inputs);
    assert_eq!(surplus.state(), State::ReducePower);
    assert_eq!(surplus.surplus_power(), step);
    assert_eq!(surplus.overrule_counter(), 1);

    // an old reading does not count
    let mut inputs = Factory::absorption_inputs(HIGH);
    inputs.battery_current = Some(Factory::reading(-2.0, 6));
    surplus.calculate(0, clock.next(), &inputs);
    assert_eq!(surplus.overrule_counter(), 1);
}

#[test]
fn clamps_at_upper_limit() {
    let mut surplus = stage_ii();
    let mut clock = Clock::new();

    let mut back = 0;
    for _ in 0..15 {
        back = surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    }

    assert_eq!(surplus.state(), State::MaximumPower);
    assert_eq!(surplus.surplus_power(), 800);
    assert_eq!(back, 800);
}

#[test]
fn throttles_between_calculations() {
    let mut surplus = stage_ii();
    let start = Instant::now();

    surplus.calculate(0, start, &Factory::absorption_inputs(HIGH));
    surplus.calculate(0, start + Duration::from_secs(5), &Factory::absorption_inputs(HIGH));
    let power = surplus.surplus_power();
    assert!(power > 0);

    let soon = start + Duration::from_secs(7);
    assert_eq!(surplus.calculate(10, soon, &Factory::absorption_inputs(LOW)), power as u16);
    assert_eq!(surplus.calculate(700, soon, &Factory::absorption_inputs(LOW)), 700);
    assert_eq!(surplus.surplus_power(), power);
    assert_eq!(surplus.state(), State::TryMore);
}

#[test]
fn output_bounds_hold_for_any_sequence() {
    let mut surplus = stage_ii();
    let mut clock = Clock::new();
    let mut seed: u32 = 0x2545_f491;

    for _ in 0..500 {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;

        let requested = (seed % 801) as u16;
        let voltage = if seed & 0x100 == 0 { HIGH } else { LOW };
        let mut inputs = Factory::absorption_inputs(voltage);
        if seed & 0x1000 != 0 {
            inputs.battery_current = Some(Factory::reading(-1.0, 1));
        }

        let back = surplus.calculate(requested, clock.next(), &inputs);
        assert!(back >= requested, "{} < {}", back, requested);
        assert!(back <= 800, "{}", back);
        assert!((0..=800).contains(&surplus.surplus_power()));
    }
}

#[test]
fn stage_switches() {
    let mut surplus = stage_ii();
    let mut clock = Clock::new();

    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    assert!(surplus.surplus_power() > 0);

    assert!(!surplus.switch(StageSwitch::StageIIOff));
    assert_eq!(surplus.state(), State::Idle);
    assert_eq!(surplus.surplus_power(), 0);
    assert!(!surplus.switch(StageSwitch::StageIIAsk));
    assert!(surplus.switch(StageSwitch::StageIAsk));

    assert_eq!(surplus.calculate(42, clock.next(), &Factory::absorption_inputs(HIGH)), 42);
    assert_eq!(surplus.state(), State::Idle);

    assert!(surplus.switch(StageSwitch::StageIIOn));
    assert!(surplus.switch(StageSwitch::StageIIAsk));
    surplus.calculate(0, clock.next(), &Factory::absorption_inputs(HIGH));
    assert_eq!(surplus.state(), State::TryMore);
    assert!(surplus.is_enabled());
}

#[test]
fn texts() {
    assert_eq!(State::Idle.text(), "Idle");
    assert_eq!(State::BulkPower.text(), "Reserve battery power");
    assert_eq!(State::KeepLastPower.to_string(), "Keep last power");
    assert_eq!(Quality::NoData.text(), "Insufficient data");
    assert_eq!(Quality::Bad.text(), "Bad");
}

/// Drives a stage II regulator through complete search cycles with a known
/// number of direction changes each. Every cycle starts in `InTarget` and ends
/// with a hold tick that books the cycle into the quality window.
struct Cycles {
    surplus: SurplusPower,
    now: Instant,
    in_target_since: Instant,
}

impl Cycles {
    const KEEP: u16 = 700;

    fn new() -> Self {
        let mut cycles = Self {
            surplus: stage_ii(),
            now: Instant::now(),
            in_target_since: Instant::now(),
        };

        // Idle -> TryMore, +2 steps, discharge overrule (one change), InTarget
        cycles.step(0, false);
        cycles.step(0, false);
        cycles.step(0, true);
        cycles.step(0, false);
        assert_eq!(cycles.surplus.state(), State::InTarget);
        cycles.in_target_since = cycles.now;
        cycles.hold();

        cycles
    }

    fn step(&mut self, requested: u16, discharging: bool) -> u16 {
        self.now += Duration::from_secs(5);
        let mut inputs = Factory::absorption_inputs(HIGH);
        if discharging {
            inputs.battery_current = Some(Factory::reading(-2.0, 1));
        }
        self.surplus.calculate(requested, self.now, &inputs)
    }

    fn rise(&mut self) {
        self.now = self.in_target_since + Duration::from_secs(56);
        self.step(0, false);
        assert_eq!(self.surplus.state(), State::TryMore);
    }

    fn enter_target(&mut self) {
        self.step(0, false);
        assert_eq!(self.surplus.state(), State::InTarget);
        self.in_target_since = self.now;
    }

    fn hold(&mut self) {
        self.step(0, false);
        assert_eq!(self.surplus.state(), State::InTarget);
        assert_eq!(self.surplus.quality_counter(), 0);
    }

    /// Probe up, get overruled down, settle: one change.
    fn single(&mut self) {
        self.rise();
        self.step(0, true);
        assert_eq!(self.surplus.quality_counter(), 1);
        self.enter_target();
        self.hold();
    }

    /// As `single`, but a higher request interrupts the search and it
    /// resumes upward before being overruled again: two changes.
    fn double(&mut self) {
        self.rise();
        self.step(0, true);
        assert_eq!(self.step(Self::KEEP, false), Self::KEEP);
        assert_eq!(self.surplus.state(), State::KeepLastPower);
        self.step(0, false);
        self.step(0, true);
        assert_eq!(self.surplus.quality_counter(), 2);
        self.enter_target();
        self.hold();
    }
}

#[test]
fn quality_follows_rolling_window() {
    common_setup();

    let mut cycles = Cycles::new();
    let power = cycles.surplus.surplus_power();
    assert_eq!(cycles.surplus.quality(), Quality::Excellent);
    assert_eq!(cycles.surplus.quality_average(), 1.0);

    // 21 booked cycles: the first one has left the window
    for _ in 0..20 {
        cycles.double();
    }
    assert_eq!(cycles.surplus.quality_average(), 2.0);
    assert_eq!(cycles.surplus.quality(), Quality::Bad);
    assert_eq!(cycles.surplus.quality().text(), "Bad");
    assert_eq!(cycles.surplus.surplus_power(), power);

    for _ in 0..10 {
        cycles.single();
    }
    assert_eq!(cycles.surplus.quality_average(), 1.5);
    assert_eq!(cycles.surplus.quality(), Quality::Good);
    assert_eq!(cycles.surplus.quality().text(), "Good");

    for _ in 0..10 {
        cycles.single();
    }
    assert_eq!(cycles.surplus.quality_average(), 1.0);
    assert_eq!(cycles.surplus.quality(), Quality::Excellent);
    assert_eq!(cycles.surplus.quality().text(), "Excellent");
}

#[test]
fn quality_window_restarts_from_idle() {
    let mut cycles = Cycles::new();
    cycles.double();
    assert!(cycles.surplus.quality_average() > 1.0);

    let mut inputs = Factory::absorption_inputs(HIGH);
    inputs.charger.mode = Some(OperatingMode::Bulk);
    cycles.now += Duration::from_secs(5);
    cycles.surplus.calculate(0, cycles.now, &inputs);
    assert_eq!(cycles.surplus.state(), State::Idle);

    cycles.step(0, false);
    assert_eq!(cycles.surplus.state(), State::TryMore);
    assert_eq!(cycles.surplus.quality(), Quality::NoData);
}
