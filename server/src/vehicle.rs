//! Simulated vehicle shared by every connection
//!
//! Battery and temperature are not ticked by a timer. They are recomputed
//! from the real time elapsed since the previous recomputation whenever
//! telemetry is read, so readings always reflect wall-clock time no matter
//! how rarely anyone asks.

use crate::clock::Clock;
use crate::error::VehicleError;
use shared::{
    Direction, Telemetry, AMBIENT_TEMPERATURE, MAX_BATTERY, MAX_SPEED, MAX_TEMPERATURE, MIN_SPEED,
    SPEED_STEP,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Plain vehicle fields, mutated only through [`Vehicle`]'s lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleState {
    pub speed_kmh: u32,
    pub battery_pct: u32,
    pub temperature_c: u32,
    pub direction: Direction,
    /// Unix seconds of the last battery/temperature recomputation
    pub last_update: u64,
}

impl VehicleState {
    pub fn new(now: u64) -> Self {
        Self {
            speed_kmh: MIN_SPEED,
            battery_pct: MAX_BATTERY,
            temperature_c: AMBIENT_TEMPERATURE,
            direction: Direction::Straight,
            last_update: now,
        }
    }

    /// Raises speed by one step. Nothing changes when already at the top.
    pub fn speed_up(&mut self) -> Result<u32, VehicleError> {
        if self.speed_kmh >= MAX_SPEED {
            return Err(VehicleError::AtMaximum);
        }
        self.speed_kmh = (self.speed_kmh + SPEED_STEP).min(MAX_SPEED);
        Ok(self.speed_kmh)
    }

    pub fn slow_down(&mut self) -> Result<u32, VehicleError> {
        if self.speed_kmh <= MIN_SPEED {
            return Err(VehicleError::AtMinimum);
        }
        self.speed_kmh = self.speed_kmh.saturating_sub(SPEED_STEP).max(MIN_SPEED);
        Ok(self.speed_kmh)
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn recharge(&mut self, now: u64) {
        self.battery_pct = MAX_BATTERY;
        self.last_update = self.last_update.max(now);
    }

    /// Applies battery drain and heating/cooling for the time since
    /// `last_update`.
    ///
    /// Battery loses `floor(elapsed/60 + speed*elapsed/600)` points. While
    /// moving the temperature rises by `floor(elapsed*speed/1000)`; while
    /// stopped it falls by `floor(elapsed/10)` toward ambient.
    pub fn decay(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_update);
        if elapsed == 0 {
            return;
        }

        let speed = u64::from(self.speed_kmh);

        // elapsed/60 + speed*elapsed/600 == elapsed*(10 + speed)/600
        let drain = elapsed.saturating_mul(10 + speed) / 600;
        self.battery_pct = u64::from(self.battery_pct).saturating_sub(drain) as u32;

        if speed > 0 {
            let heat = elapsed.saturating_mul(speed) / 1000;
            let temperature = u64::from(self.temperature_c).saturating_add(heat);
            self.temperature_c = temperature.min(u64::from(MAX_TEMPERATURE)) as u32;
        } else {
            let cooling = elapsed / 10;
            let temperature = u64::from(self.temperature_c).saturating_sub(cooling);
            self.temperature_c = temperature.max(u64::from(AMBIENT_TEMPERATURE)) as u32;
        }

        self.last_update = now;
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            speed_kmh: self.speed_kmh,
            battery_pct: self.battery_pct,
            temperature_c: self.temperature_c,
            direction: self.direction,
        }
    }
}

/// The single shared vehicle. Every operation takes the vehicle lock for
/// exactly one state transition and never performs I/O while holding it.
pub struct Vehicle {
    state: Mutex<VehicleState>,
    clock: Arc<dyn Clock>,
}

impl Vehicle {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let state = VehicleState::new(clock.now());
        Self {
            state: Mutex::new(state),
            clock,
        }
    }

    pub async fn speed_up(&self) -> Result<u32, VehicleError> {
        self.state.lock().await.speed_up()
    }

    pub async fn slow_down(&self) -> Result<u32, VehicleError> {
        self.state.lock().await.slow_down()
    }

    pub async fn set_direction(&self, direction: Direction) {
        self.state.lock().await.set_direction(direction);
    }

    pub async fn recharge(&self) {
        let now = self.clock.now();
        self.state.lock().await.recharge(now);
    }

    /// Runs the simulation step and returns the resulting telemetry, both
    /// under one lock acquisition.
    pub async fn decay_and_snapshot(&self) -> Telemetry {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.decay(now);
        state.telemetry()
    }

    /// Copy of the raw state without advancing the simulation
    pub async fn state(&self) -> VehicleState {
        self.state.lock().await.clone()
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }
}
