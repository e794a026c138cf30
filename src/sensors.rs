use crate::clock::{elapsed, Clock};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A single sensor value together with the time it was read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorData<T> {
    pub value: T,
    pub time: DateTime<Utc>,
}

impl<T> SensorData<T> {
    pub fn new(value: T, time: DateTime<Utc>) -> Self {
        Self { value, time }
    }
}

/// Latest readings from remote (Bluetooth) sensors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorDataSet {
    /// Beats per minute
    pub heart_rate: Option<SensorData<f32>>,
    /// Revolutions per minute
    pub cadence: Option<SensorData<f32>>,
    /// Watts
    pub power: Option<SensorData<f32>>,
    /// m/s
    pub cycling_speed: Option<SensorData<f32>>,
    /// Percent
    pub battery_level: Option<SensorData<u8>>,
}

impl SensorDataSet {
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none()
            && self.cadence.is_none()
            && self.power.is_none()
            && self.cycling_speed.is_none()
            && self.battery_level.is_none()
    }

    /// Copy with every reading older than `max_age` removed
    pub fn without_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Self {
        fn fresh<T: Copy>(
            data: Option<SensorData<T>>,
            now: DateTime<Utc>,
            max_age: Duration,
        ) -> Option<SensorData<T>> {
            data.filter(|d| elapsed(d.time, now) <= max_age)
        }

        Self {
            heart_rate: fresh(self.heart_rate, now, max_age),
            cadence: fresh(self.cadence, now, max_age),
            power: fresh(self.power, now, max_age),
            cycling_speed: fresh(self.cycling_speed, now, max_age),
            battery_level: fresh(self.battery_level, now, max_age),
        }
    }
}

/// One reading pushed by the platform sensor bridge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor", content = "value", rename_all = "snake_case")]
pub enum SensorReading {
    HeartRate(f32),
    Cadence(f32),
    Power(f32),
    CyclingSpeed(f32),
    BatteryLevel(u8),
}

/// Collaborator that owns the connections to remote sensors
pub trait RemoteSensorManager: Send {
    fn start(&mut self);

    fn stop(&mut self);

    fn is_started(&self) -> bool;

    /// Current readings, `None` if nothing is connected
    fn sensor_data(&self) -> Option<SensorDataSet>;
}

/// Sensor manager fed by an external bridge.
///
/// Clones share the same readings: the bridge keeps one handle and pushes
/// readings while the recording service owns another.
#[derive(Clone)]
pub struct SharedSensorManager {
    data: Arc<Mutex<SensorDataSet>>,
    started: Arc<Mutex<bool>>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
}

impl SharedSensorManager {
    pub fn new(clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            data: Arc::new(Mutex::new(SensorDataSet::default())),
            started: Arc::new(Mutex::new(false)),
            clock,
            max_age,
        }
    }

    /// Store a reading; ignored while the manager is stopped.
    pub fn push(&self, reading: SensorReading) {
        if !self.is_started() {
            debug!("[SENSOR] dropping {:?}, manager stopped", reading);
            return;
        }
        let now = self.clock.now();
        if let Ok(mut data) = self.data.lock() {
            match reading {
                SensorReading::HeartRate(v) => data.heart_rate = Some(SensorData::new(v, now)),
                SensorReading::Cadence(v) => data.cadence = Some(SensorData::new(v, now)),
                SensorReading::Power(v) => data.power = Some(SensorData::new(v, now)),
                SensorReading::CyclingSpeed(v) => {
                    data.cycling_speed = Some(SensorData::new(v, now))
                }
                SensorReading::BatteryLevel(v) => {
                    data.battery_level = Some(SensorData::new(v.min(100), now))
                }
            }
        }
    }
}

impl RemoteSensorManager for SharedSensorManager {
    fn start(&mut self) {
        if let Ok(mut started) = self.started.lock() {
            if !*started {
                info!("[SENSOR] remote sensor manager started");
                *started = true;
            }
        }
    }

    fn stop(&mut self) {
        if let Ok(mut started) = self.started.lock() {
            if *started {
                info!("[SENSOR] remote sensor manager stopped");
                *started = false;
            }
        }
        if let Ok(mut data) = self.data.lock() {
            *data = SensorDataSet::default();
        }
    }

    fn is_started(&self) -> bool {
        self.started.lock().map(|s| *s).unwrap_or(false)
    }

    fn sensor_data(&self) -> Option<SensorDataSet> {
        if !self.is_started() {
            return None;
        }
        let data = self.data.lock().ok()?;
        let fresh = data.without_stale(self.clock.now(), self.max_age);
        if fresh.is_empty() {
            None
        } else {
            Some(fresh)
        }
    }
}
