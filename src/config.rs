use crate::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Recording settings
///
/// Durations are stored as seconds so settings files stay hand-editable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Locations with worse horizontal accuracy are not recorded (m)
    pub recording_gps_accuracy_m: f64,
    /// Minimum time between two recorded points (s)
    pub min_recording_interval_secs: f64,
    /// Minimum distance between two recorded points (m)
    pub min_recording_distance_m: f64,
    /// A jump larger than this starts a new segment (m)
    pub max_recording_distance_m: f64,
    /// No fix for this long means the signal is lost (s)
    pub gps_signal_lost_after_secs: f64,
    /// Altitude change needed before gain/loss is counted (m)
    pub altitude_threshold_m: f64,
    /// Remote sensor readings older than this are dropped (s)
    pub sensor_data_max_age_secs: f64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            recording_gps_accuracy_m: 50.0,
            min_recording_interval_secs: 1.0,
            min_recording_distance_m: 5.0,
            max_recording_distance_m: 200.0,
            gps_signal_lost_after_secs: 30.0,
            altitude_threshold_m: 3.0,
            sensor_data_max_age_secs: 5.0,
        }
    }
}

impl RecordingSettings {
    /// Load settings from a JSON file; missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> RecorderResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RecorderError::InvalidSettings(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> RecorderResult<Self> {
        let settings: Self = serde_json::from_str(text)
            .map_err(|e| RecorderError::InvalidSettings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> RecorderResult<()> {
        let non_negative = [
            ("recording_gps_accuracy_m", self.recording_gps_accuracy_m),
            ("min_recording_interval_secs", self.min_recording_interval_secs),
            ("min_recording_distance_m", self.min_recording_distance_m),
            ("altitude_threshold_m", self.altitude_threshold_m),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(RecorderError::InvalidSettings(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        let positive = [
            ("gps_signal_lost_after_secs", self.gps_signal_lost_after_secs),
            ("sensor_data_max_age_secs", self.sensor_data_max_age_secs),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(RecorderError::InvalidSettings(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if !(self.max_recording_distance_m > self.min_recording_distance_m) {
            return Err(RecorderError::InvalidSettings(format!(
                "max_recording_distance_m ({}) must exceed min_recording_distance_m ({})",
                self.max_recording_distance_m, self.min_recording_distance_m
            )));
        }

        Ok(())
    }

    pub fn min_recording_interval(&self) -> Duration {
        secs(self.min_recording_interval_secs)
    }

    pub fn gps_signal_lost_after(&self) -> Duration {
        secs(self.gps_signal_lost_after_secs)
    }

    pub fn sensor_data_max_age(&self) -> Duration {
        secs(self.sensor_data_max_age_secs)
    }
}

/// Seconds to `Duration`; values `validate` rejects map to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
