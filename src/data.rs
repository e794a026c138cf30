use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Identifier of a stored track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(u64);

impl TrackId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(u64);

impl MarkerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location fix as delivered by the platform location provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    pub time: DateTime<Utc>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, time: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy,
            speed: None,
            bearing: None,
            time,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Finite, in-range coordinates and a finite, non-negative accuracy
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.accuracy.is_finite()
            && self.accuracy >= 0.0
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Great-circle distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackPointType {
    /// Regular sample
    TrackPoint,
    /// User started or resumed recording
    SegmentStartManual,
    /// User paused or ended recording
    SegmentEndManual,
    /// Gap detected between two samples (distance jump)
    SegmentStartAutomatic,
}

impl TrackPointType {
    pub fn is_segment_start(&self) -> bool {
        matches!(
            self,
            TrackPointType::SegmentStartManual | TrackPointType::SegmentStartAutomatic
        )
    }
}

/// One recorded sample of a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub point_type: TrackPointType,
    pub time: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
}

impl TrackPoint {
    /// Marker point without a position (segment boundaries)
    pub fn new(point_type: TrackPointType, time: DateTime<Utc>) -> Self {
        Self {
            point_type,
            time,
            latitude: None,
            longitude: None,
            altitude: None,
            accuracy: None,
            speed: None,
            bearing: None,
        }
    }

    pub fn from_location(location: &Location, point_type: TrackPointType) -> Self {
        Self {
            point_type,
            time: location.time,
            latitude: Some(location.latitude),
            longitude: Some(location.longitude),
            altitude: location.altitude,
            accuracy: Some(location.accuracy),
            speed: location.speed,
            bearing: location.bearing,
        }
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Position as a location, if the point carries one
    pub fn location(&self) -> Option<Location> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        Some(Location {
            latitude,
            longitude,
            altitude: self.altitude,
            accuracy: self.accuracy.unwrap_or(0.0),
            speed: self.speed,
            bearing: self.bearing,
            time: self.time,
        })
    }
}

/// Aggregate values of a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStatistics {
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    /// Recording time excluding pauses
    #[serde(with = "duration_secs")]
    pub total_time: Duration,
    pub total_distance_m: f64,
    pub max_speed_ms: f64,
    pub altitude_gain_m: f64,
    pub altitude_loss_m: f64,
}

impl Default for TrackStatistics {
    fn default() -> Self {
        Self {
            start_time: None,
            stop_time: None,
            total_time: Duration::ZERO,
            total_distance_m: 0.0,
            max_speed_ms: 0.0,
            altitude_gain_m: 0.0,
            altitude_loss_m: 0.0,
        }
    }
}

impl TrackStatistics {
    /// Average speed over recording time, m/s
    pub fn average_speed_ms(&self) -> Option<f64> {
        let secs = self.total_time.as_secs_f64();
        if secs > 0.0 {
            Some(self.total_distance_m / secs)
        } else {
            None
        }
    }
}

/// A recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub statistics: TrackStatistics,
}

impl Track {
    pub fn new(id: TrackId, name: String, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            category: String::new(),
            statistics: TrackStatistics {
                start_time: Some(start_time),
                ..TrackStatistics::default()
            },
        }
    }

    pub fn is_ended(&self) -> bool {
        self.statistics.stop_time.is_some()
    }
}

/// A user-annotated point of interest within a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: MarkerId,
    pub track_id: TrackId,
    pub name: String,
    pub category: String,
    pub description: String,
    pub photo_url: Option<String>,
    pub location: Location,
}

/// Serializes a `Duration` as fractional seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
