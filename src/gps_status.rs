use crate::clock::elapsed;
use crate::data::Location;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// GPS fix quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GpsStatusValue {
    /// Status not known yet
    None,
    /// Provider enabled, waiting for first location
    Enabled,
    Disabled,
    /// Locations arrive but accuracy is too poor to record
    SignalBad,
    /// No location for longer than the signal-lost threshold
    SignalLost,
    SignalFix,
}

impl GpsStatusValue {
    pub fn is_gps_started(&self) -> bool {
        !matches!(self, GpsStatusValue::None | GpsStatusValue::Disabled)
    }

    pub fn has_fix(&self) -> bool {
        *self == GpsStatusValue::SignalFix
    }
}

/// Derives the GPS status from incoming locations and fix age.
///
/// Every method returns `Some(status)` only when the status changed.
#[derive(Debug, Clone)]
pub struct GpsStatus {
    status: GpsStatusValue,
    accuracy_threshold_m: f64,
    signal_lost_after: Duration,
    last_location_time: Option<DateTime<Utc>>,
}

impl GpsStatus {
    pub fn new(accuracy_threshold_m: f64, signal_lost_after: Duration) -> Self {
        Self {
            status: GpsStatusValue::None,
            accuracy_threshold_m,
            signal_lost_after,
            last_location_time: None,
        }
    }

    pub fn status(&self) -> GpsStatusValue {
        self.status
    }

    pub fn set_thresholds(&mut self, accuracy_threshold_m: f64, signal_lost_after: Duration) {
        self.accuracy_threshold_m = accuracy_threshold_m;
        self.signal_lost_after = signal_lost_after;
    }

    pub fn on_gps_enabled(&mut self) -> Option<GpsStatusValue> {
        if self.status.is_gps_started() {
            return None;
        }
        self.last_location_time = None;
        self.change(GpsStatusValue::Enabled)
    }

    pub fn on_gps_disabled(&mut self) -> Option<GpsStatusValue> {
        self.last_location_time = None;
        self.change(GpsStatusValue::Disabled)
    }

    pub fn on_location_changed(&mut self, location: &Location) -> Option<GpsStatusValue> {
        if !self.status.is_gps_started() {
            return None;
        }
        if !location.is_valid() {
            debug!("[GPS] ignoring malformed location {:?}", location);
            return None;
        }
        self.last_location_time = Some(location.time);

        if location.accuracy <= self.accuracy_threshold_m {
            self.change(GpsStatusValue::SignalFix)
        } else {
            debug!(
                "[GPS] accuracy {:.1}m above threshold {:.1}m",
                location.accuracy, self.accuracy_threshold_m
            );
            self.change(GpsStatusValue::SignalBad)
        }
    }

    /// Checks fix age against the signal-lost threshold.
    ///
    /// Waiting for a first fix (`Enabled`) is measured from `enabled_at`.
    pub fn check(&mut self, now: DateTime<Utc>, enabled_at: DateTime<Utc>) -> Option<GpsStatusValue> {
        if !self.status.is_gps_started() || self.status == GpsStatusValue::SignalLost {
            return None;
        }
        let since = self.last_location_time.unwrap_or(enabled_at);
        if elapsed(since, now) > self.signal_lost_after {
            self.change(GpsStatusValue::SignalLost)
        } else {
            None
        }
    }

    fn change(&mut self, next: GpsStatusValue) -> Option<GpsStatusValue> {
        if self.status == next {
            return None;
        }
        info!("[GPS] status {:?} -> {:?}", self.status, next);
        self.status = next;
        Some(next)
    }
}
