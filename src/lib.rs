// Track Recorder
// Background recording service for GPS tracks: lifecycle, markers, sensor and GPS status

pub mod altitude;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod gps_status;
pub mod listener;
pub mod sensors;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RecordingSettings;
pub use data::{Location, Marker, MarkerId, Track, TrackId, TrackPoint, TrackPointType, TrackStatistics};
pub use error::{RecorderError, RecorderResult};
pub use export::TrackExport;
pub use gps_status::GpsStatusValue;
pub use listener::{RecordingState, RecordingStatus, StatusEvent, StatusListener};
pub use sensors::{RemoteSensorManager, SensorData, SensorDataSet, SensorReading, SharedSensorManager};
pub use service::{gps_watchdog, TrackRecordingService};
pub use store::{MemoryTrackStore, TrackStore};
