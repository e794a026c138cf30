use crate::altitude::AltitudeAccumulator;
use crate::clock::{elapsed, Clock, SystemClock};
use crate::config::RecordingSettings;
use crate::data::{Location, MarkerId, Track, TrackId, TrackPoint, TrackPointType};
use crate::error::{RecorderError, RecorderResult};
use crate::gps_status::{GpsStatus, GpsStatusValue};
use crate::listener::{
    ListenerRegistry, RecordingState, RecordingStatus, StatusEvent, StatusListener,
};
use crate::sensors::{RemoteSensorManager, SensorDataSet};
use crate::store::{MemoryTrackStore, NewMarker, TrackStore};
use chrono::{DateTime, Utc};
use crossbeam::channel::Receiver;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Track currently open for recording
struct ActiveTrack {
    track: Track,
    paused: bool,
    /// Start of the running segment, `None` while paused
    segment_started_at: Option<DateTime<Utc>>,
    /// Last point recorded in the running segment
    last_recorded: Option<Location>,
    /// Last location good enough to record, used for markers
    last_valid: Option<Location>,
    altitude: AltitudeAccumulator,
    marker_count: usize,
}

impl ActiveTrack {
    fn new(track: Track, now: DateTime<Utc>, altitude: AltitudeAccumulator, marker_count: usize) -> Self {
        Self {
            track,
            paused: false,
            segment_started_at: Some(now),
            last_recorded: None,
            last_valid: None,
            altitude,
            marker_count,
        }
    }

    fn total_time(&self, now: DateTime<Utc>) -> Duration {
        let running = self
            .segment_started_at
            .map(|start| elapsed(start, now))
            .unwrap_or(Duration::ZERO);
        self.track.statistics.total_time + running
    }

    /// Track with statistics brought up to `now`
    fn snapshot(&self, now: DateTime<Utc>) -> Track {
        let mut track = self.track.clone();
        track.statistics.total_time = self.total_time(now);
        track.statistics.altitude_gain_m = self.altitude.gain_m();
        track.statistics.altitude_loss_m = self.altitude.loss_m();
        track
    }

    fn close_segment(&mut self, now: DateTime<Utc>) {
        if let Some(start) = self.segment_started_at.take() {
            self.track.statistics.total_time += elapsed(start, now);
        }
    }

    fn open_segment(&mut self, now: DateTime<Utc>) {
        self.segment_started_at = Some(now);
        self.last_recorded = None;
        self.altitude.reset_reference();
    }

    fn persist(&mut self, store: &dyn TrackStore, now: DateTime<Utc>) -> RecorderResult<()> {
        self.track.statistics.altitude_gain_m = self.altitude.gain_m();
        self.track.statistics.altitude_loss_m = self.altitude.loss_m();
        let snapshot = self.snapshot(now);
        store.update_track(&snapshot)
    }

    /// Runs a point through the recording filter, returns whether it was stored.
    ///
    /// Regular points are thinned by interval and distance and may open a new
    /// segment on a jump. Segment boundaries keep their type and skip thinning.
    fn consider_point(
        &mut self,
        store: &dyn TrackStore,
        settings: &RecordingSettings,
        mut point: TrackPoint,
        accuracy_threshold_m: f64,
    ) -> RecorderResult<bool> {
        let Some(location) = point.location() else {
            if point.point_type != TrackPointType::TrackPoint {
                self.last_recorded = None;
                self.altitude.reset_reference();
            }
            store.insert_track_point(self.track.id, point)?;
            return Ok(true);
        };

        if !location.is_valid() {
            debug!("[RECORD] dropping malformed location {:?}", location);
            return Ok(false);
        }
        if !(location.accuracy <= accuracy_threshold_m) {
            debug!(
                "[RECORD] dropping location, accuracy {:.1}m > {:.1}m",
                location.accuracy, accuracy_threshold_m
            );
            return Ok(false);
        }
        self.last_valid = Some(location.clone());

        let last = self.last_recorded.clone();
        let distance = last.as_ref().map(|last| last.distance_to(&location));

        match point.point_type {
            TrackPointType::TrackPoint => {
                let (Some(last), Some(distance)) = (last, distance) else {
                    self.record(store, point, &location, None)?;
                    return Ok(true);
                };
                if elapsed(last.time, location.time) < settings.min_recording_interval() {
                    return Ok(false);
                }
                if distance < settings.min_recording_distance_m {
                    return Ok(false);
                }

                if distance > settings.max_recording_distance_m {
                    info!(
                        "[RECORD] {:.0}m jump, starting new segment in track {}",
                        distance, self.track.id
                    );
                    self.altitude.reset_reference();
                    point.point_type = TrackPointType::SegmentStartAutomatic;
                    self.record(store, point, &location, None)?;
                } else {
                    self.record(store, point, &location, Some((&last, distance)))?;
                }
            }
            TrackPointType::SegmentStartManual | TrackPointType::SegmentStartAutomatic => {
                self.altitude.reset_reference();
                self.record(store, point, &location, None)?;
            }
            TrackPointType::SegmentEndManual => {
                let previous = match (&last, distance) {
                    (Some(last), Some(d)) if d <= settings.max_recording_distance_m => Some((last, d)),
                    _ => None,
                };
                self.record(store, point, &location, previous)?;
                self.last_recorded = None;
            }
        }
        Ok(true)
    }

    fn record(
        &mut self,
        store: &dyn TrackStore,
        point: TrackPoint,
        location: &Location,
        previous: Option<(&Location, f64)>,
    ) -> RecorderResult<()> {
        store.insert_track_point(self.track.id, point)?;

        let stats = &mut self.track.statistics;
        if let Some((last, distance)) = previous {
            stats.total_distance_m += distance;
            let dt = elapsed(last.time, location.time).as_secs_f64();
            let derived_speed = if dt > 0.0 { distance / dt } else { 0.0 };
            let speed = location.speed.unwrap_or(derived_speed);
            if speed > stats.max_speed_ms {
                stats.max_speed_ms = speed;
            }
        } else if let Some(speed) = location.speed {
            stats.max_speed_ms = stats.max_speed_ms.max(speed);
        }

        if let Some(altitude) = location.altitude {
            self.altitude.add(altitude);
        }
        self.last_recorded = Some(location.clone());
        self.persist(store, location.time)
    }
}

struct ServiceState {
    settings: RecordingSettings,
    gps_enabled: bool,
    gps_enabled_at: DateTime<Utc>,
    gps: GpsStatus,
    active: Option<ActiveTrack>,
}

impl ServiceState {
    fn status(&self) -> RecordingStatus {
        match &self.active {
            None => RecordingStatus::idle(),
            Some(active) => RecordingStatus {
                state: if active.paused {
                    RecordingState::Paused
                } else {
                    RecordingState::Recording
                },
                track_id: Some(active.track.id),
            },
        }
    }

    fn enable_gps(&mut self, now: DateTime<Utc>, events: &mut Vec<StatusEvent>) {
        if !self.gps_enabled {
            self.gps_enabled = true;
            self.gps_enabled_at = now;
        }
        if let Some(status) = self.gps.on_gps_enabled() {
            events.push(StatusEvent::Gps(status));
        }
    }
}

/// The recording service: owns the active track and its state machine.
///
/// All methods take `&self`; the service can be shared between the platform
/// location callback, the UI and a watchdog task.
pub struct TrackRecordingService {
    state: Mutex<ServiceState>,
    sensor_manager: Mutex<Option<Box<dyn RemoteSensorManager>>>,
    listeners: ListenerRegistry,
    store: Arc<dyn TrackStore>,
    clock: Arc<dyn Clock>,
}

impl TrackRecordingService {
    /// Service with an in-memory store and the system clock
    pub fn new(settings: RecordingSettings) -> RecorderResult<Self> {
        Self::with_parts(settings, Arc::new(MemoryTrackStore::new()), Arc::new(SystemClock))
    }

    pub fn with_parts(
        settings: RecordingSettings,
        store: Arc<dyn TrackStore>,
        clock: Arc<dyn Clock>,
    ) -> RecorderResult<Self> {
        settings.validate()?;
        let gps = GpsStatus::new(settings.recording_gps_accuracy_m, settings.gps_signal_lost_after());
        let state = ServiceState {
            settings,
            gps_enabled: false,
            gps_enabled_at: clock.now(),
            gps,
            active: None,
        };
        Ok(Self {
            state: Mutex::new(state),
            sensor_manager: Mutex::new(None),
            listeners: ListenerRegistry::new(),
            store,
            clock,
        })
    }

    pub fn store(&self) -> Arc<dyn TrackStore> {
        Arc::clone(&self.store)
    }

    /// Lock the state, run `f`, then deliver the events it queued.
    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut ServiceState, &mut Vec<StatusEvent>) -> RecorderResult<R>,
    ) -> RecorderResult<R> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock().map_err(|_| RecorderError::lock("state"))?;
            f(&mut state, &mut events)
        };
        // The change is committed; a broken listener must not turn it into an error
        for event in events {
            if let Err(e) = self.listeners.notify(event) {
                warn!("[RECORD] failed to deliver {:?}: {}", event, e);
            }
        }
        result
    }

    fn read_state<R>(&self, f: impl FnOnce(&ServiceState) -> R) -> RecorderResult<R> {
        let state = self.state.lock().map_err(|_| RecorderError::lock("state"))?;
        Ok(f(&state))
    }

    fn set_sensors_started(&self, started: bool) -> RecorderResult<()> {
        let mut manager = self
            .sensor_manager
            .lock()
            .map_err(|_| RecorderError::lock("sensor manager"))?;
        if let Some(manager) = manager.as_mut() {
            if started {
                manager.start();
            } else {
                manager.stop();
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> RecorderResult<RecordingSettings> {
        self.read_state(|state| state.settings.clone())
    }

    /// Apply new settings; they take effect with the next location, also in
    /// the open track.
    pub fn update_settings(&self, settings: RecordingSettings) -> RecorderResult<()> {
        settings.validate()?;
        self.with_state(|state, _| {
            state
                .gps
                .set_thresholds(settings.recording_gps_accuracy_m, settings.gps_signal_lost_after());
            if let Some(active) = state.active.as_mut() {
                active.altitude.set_threshold(settings.altitude_threshold_m);
            }
            info!("[RECORD] settings updated");
            state.settings = settings;
            Ok(())
        })
    }

    pub fn start_gps(&self) -> RecorderResult<()> {
        let now = self.clock.now();
        self.with_state(|state, events| {
            state.enable_gps(now, events);
            Ok(())
        })
    }

    /// Stop location updates. Ignored while a track is open.
    pub fn stop_gps(&self) -> RecorderResult<()> {
        self.with_state(|state, events| {
            if let Some(active) = &state.active {
                warn!("[GPS] not stopping GPS, track {} is open", active.track.id);
                return Ok(());
            }
            state.gps_enabled = false;
            if let Some(status) = state.gps.on_gps_disabled() {
                events.push(StatusEvent::Gps(status));
            }
            Ok(())
        })
    }

    /// Transition Idle → Recording with a fresh track
    pub fn start_new_track(&self) -> RecorderResult<TrackId> {
        let now = self.clock.now();
        let store = Arc::clone(&self.store);
        self.with_state(|state, events| {
            if state.active.is_some() {
                return Err(RecorderError::AlreadyRecording);
            }
            state.enable_gps(now, events);

            let name = format!("Track {}", now.format("%Y-%m-%d %H:%M"));
            let track = store.create_track(&name, now)?;
            let id = track.id;
            store.insert_track_point(id, TrackPoint::new(TrackPointType::SegmentStartManual, now))?;

            let altitude = AltitudeAccumulator::new(state.settings.altitude_threshold_m);
            state.active = Some(ActiveTrack::new(track, now, altitude, 0));
            self.set_sensors_started(true)?;

            info!("[RECORD] started track {}", id);
            events.push(StatusEvent::Recording(state.status()));
            Ok(id)
        })
    }

    /// Transition Recording → Paused
    pub fn pause_current_track(&self) -> RecorderResult<()> {
        let now = self.clock.now();
        let store = Arc::clone(&self.store);
        self.with_state(|state, events| {
            let active = state.active.as_mut().ok_or(RecorderError::NotRecording)?;
            if active.paused {
                return Err(RecorderError::AlreadyPaused);
            }
            store.insert_track_point(
                active.track.id,
                TrackPoint::new(TrackPointType::SegmentEndManual, now),
            )?;
            active.close_segment(now);
            active.paused = true;
            active.persist(store.as_ref(), now)?;

            info!("[RECORD] paused track {}", active.track.id);
            events.push(StatusEvent::Recording(state.status()));
            Ok(())
        })
    }

    /// Transition Paused → Recording
    pub fn resume_current_track(&self) -> RecorderResult<()> {
        let now = self.clock.now();
        let store = Arc::clone(&self.store);
        self.with_state(|state, events| {
            let active = state.active.as_mut().ok_or(RecorderError::NotRecording)?;
            if !active.paused {
                return Err(RecorderError::NotPaused);
            }
            store.insert_track_point(
                active.track.id,
                TrackPoint::new(TrackPointType::SegmentStartManual, now),
            )?;
            active.open_segment(now);
            active.paused = false;

            info!("[RECORD] resumed track {}", active.track.id);
            events.push(StatusEvent::Recording(state.status()));
            Ok(())
        })
    }

    /// Reopen an ended track and continue recording into it
    pub fn resume_track(&self, track_id: TrackId) -> RecorderResult<()> {
        let now = self.clock.now();
        let store = Arc::clone(&self.store);
        self.with_state(|state, events| {
            if state.active.is_some() {
                return Err(RecorderError::AlreadyRecording);
            }
            let mut track = store
                .track(track_id)?
                .ok_or(RecorderError::TrackNotFound(track_id))?;
            let marker_count = store.markers(track_id)?.len();
            track.statistics.stop_time = None;

            state.enable_gps(now, events);
            store.insert_track_point(track_id, TrackPoint::new(TrackPointType::SegmentStartManual, now))?;

            let altitude = AltitudeAccumulator::with_totals(
                state.settings.altitude_threshold_m,
                track.statistics.altitude_gain_m,
                track.statistics.altitude_loss_m,
            );
            let mut active = ActiveTrack::new(track, now, altitude, marker_count);
            active.persist(store.as_ref(), now)?;
            state.active = Some(active);
            self.set_sensors_started(true)?;

            info!("[RECORD] resumed ended track {}", track_id);
            events.push(StatusEvent::Recording(state.status()));
            Ok(())
        })
    }

    /// Close the open track; returns its id.
    pub fn end_current_track(&self) -> RecorderResult<TrackId> {
        let now = self.clock.now();
        let store = Arc::clone(&self.store);
        self.with_state(|state, events| {
            let mut active = state.active.take().ok_or(RecorderError::NotRecording)?;
            if !active.paused {
                store.insert_track_point(
                    active.track.id,
                    TrackPoint::new(TrackPointType::SegmentEndManual, now),
                )?;
                active.close_segment(now);
            }
            active.track.statistics.stop_time = Some(now);
            active.persist(store.as_ref(), now)?;
            self.set_sensors_started(false)?;

            let id = active.track.id;
            info!(
                "[RECORD] ended track {} ({:.0}m in {}s)",
                id,
                active.track.statistics.total_distance_m,
                active.track.statistics.total_time.as_secs()
            );
            events.push(StatusEvent::Recording(state.status()));
            Ok(id)
        })
    }

    pub fn recording_status(&self) -> RecorderResult<RecordingStatus> {
        self.read_state(|state| state.status())
    }

    /// True while a track is open, paused or not.
    pub fn is_recording(&self) -> RecorderResult<bool> {
        Ok(self.recording_status()?.is_recording())
    }

    /// True if the open track is paused, and also when no track is open.
    pub fn is_paused(&self) -> RecorderResult<bool> {
        Ok(self.recording_status()?.is_paused())
    }

    /// Recording time of the open track excluding pauses; zero when idle.
    pub fn total_time(&self) -> RecorderResult<Duration> {
        let now = self.clock.now();
        self.read_state(|state| {
            state
                .active
                .as_ref()
                .map(|active| active.total_time(now))
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Snapshot of the open track
    pub fn current_track(&self) -> RecorderResult<Option<Track>> {
        let now = self.clock.now();
        self.read_state(|state| state.active.as_ref().map(|active| active.snapshot(now)))
    }

    /// Add a marker at the last valid location of the recording track.
    ///
    /// An empty name becomes "Marker N".
    pub fn insert_marker(
        &self,
        name: &str,
        category: &str,
        description: &str,
        photo_url: Option<&str>,
    ) -> RecorderResult<MarkerId> {
        let store = Arc::clone(&self.store);
        self.with_state(|state, _| {
            let active = match state.active.as_mut() {
                Some(active) if !active.paused => active,
                _ => return Err(RecorderError::NotRecording),
            };
            let location = active.last_valid.clone().ok_or(RecorderError::NoLocation)?;

            let number = active.marker_count + 1;
            let name = if name.trim().is_empty() {
                format!("Marker {}", number)
            } else {
                name.to_string()
            };
            let marker = store.insert_marker(NewMarker {
                track_id: active.track.id,
                name,
                category: category.to_string(),
                description: description.to_string(),
                photo_url: photo_url.filter(|url| !url.is_empty()).map(str::to_string),
                location,
            })?;
            active.marker_count = number;

            info!("[RECORD] marker {} '{}' in track {}", marker.id, marker.name, marker.track_id);
            Ok(marker.id)
        })
    }

    /// Readings from the remote sensor manager, if one is installed.
    pub fn sensor_data(&self) -> RecorderResult<Option<SensorDataSet>> {
        let manager = self
            .sensor_manager
            .lock()
            .map_err(|_| RecorderError::lock("sensor manager"))?;
        Ok(manager.as_ref().and_then(|m| m.sensor_data()))
    }

    pub fn altitude_gain_m(&self) -> RecorderResult<Option<f32>> {
        self.read_state(|state| state.active.as_ref().map(|a| a.altitude.gain_m() as f32))
    }

    pub fn altitude_loss_m(&self) -> RecorderResult<Option<f32>> {
        self.read_state(|state| state.active.as_ref().map(|a| a.altitude.loss_m() as f32))
    }

    /// Replace the remote sensor manager. The old one is stopped; the new one
    /// is started when a track is open.
    pub fn set_remote_sensor_manager(
        &self,
        mut manager: Box<dyn RemoteSensorManager>,
    ) -> RecorderResult<()> {
        self.with_state(|state, _| {
            let mut slot = self
                .sensor_manager
                .lock()
                .map_err(|_| RecorderError::lock("sensor manager"))?;
            if let Some(old) = slot.as_mut() {
                old.stop();
            }
            if state.active.is_some() {
                manager.start();
            }
            *slot = Some(manager);
            Ok(())
        })
    }

    /// Insert a track point into the recording track, bypassing the GPS
    /// status handler.
    ///
    /// Meant for special points and tests; platform locations go through
    /// [`on_location_changed`](Self::on_location_changed). The point keeps its
    /// type. Positioned points must be valid and within
    /// `recording_gps_accuracy_m`; only regular points are thinned by
    /// interval and distance. Returns whether the point was stored.
    pub fn new_track_point(
        &self,
        point: TrackPoint,
        recording_gps_accuracy_m: f64,
    ) -> RecorderResult<bool> {
        let store = Arc::clone(&self.store);
        self.with_state(|state, _| {
            let settings = state.settings.clone();
            let active = match state.active.as_mut() {
                Some(active) if !active.paused => active,
                _ => return Ok(false),
            };
            active.consider_point(store.as_ref(), &settings, point, recording_gps_accuracy_m)
        })
    }

    /// Register a listener; it is told the current status right away.
    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) -> RecorderResult<()> {
        let (recording, gps) = self.read_state(|state| (state.status(), state.gps.status()))?;
        self.listeners.add(Arc::clone(&listener))?;
        listener.on_recording_status(recording);
        listener.on_gps_status(gps);
        Ok(())
    }

    /// Channel receiving every status change from now on
    pub fn subscribe(&self) -> RecorderResult<Receiver<StatusEvent>> {
        self.listeners.subscribe()
    }

    pub fn gps_status(&self) -> RecorderResult<GpsStatusValue> {
        self.read_state(|state| state.gps.status())
    }

    /// Feed a location from the platform provider.
    ///
    /// Returns whether it was stored as a track point.
    pub fn on_location_changed(&self, location: &Location) -> RecorderResult<bool> {
        let store = Arc::clone(&self.store);
        self.with_state(|state, events| {
            if !state.gps_enabled {
                debug!("[GPS] location ignored, GPS stopped");
                return Ok(false);
            }
            if !location.is_valid() {
                debug!("[GPS] location ignored, malformed {:?}", location);
                return Ok(false);
            }
            if let Some(status) = state.gps.on_location_changed(location) {
                events.push(StatusEvent::Gps(status));
            }

            let settings = &state.settings;
            match state.active.as_mut() {
                Some(active) if !active.paused => active.consider_point(
                    store.as_ref(),
                    settings,
                    TrackPoint::from_location(location, TrackPointType::TrackPoint),
                    settings.recording_gps_accuracy_m,
                ),
                _ => Ok(false),
            }
        })
    }

    /// Re-evaluate fix age; reports `SignalLost` when locations stopped.
    pub fn check_gps_signal(&self) -> RecorderResult<GpsStatusValue> {
        let now = self.clock.now();
        self.with_state(|state, events| {
            if state.gps_enabled {
                if let Some(status) = state.gps.check(now, state.gps_enabled_at) {
                    warn!("[GPS] no location for {:?}", state.settings.gps_signal_lost_after());
                    events.push(StatusEvent::Gps(status));
                }
            }
            Ok(state.gps.status())
        })
    }
}

/// Periodically checks the GPS signal until the task is aborted.
pub async fn gps_watchdog(service: Arc<TrackRecordingService>, check_interval: Duration) {
    let mut ticker = tokio::time::interval(check_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = service.check_gps_signal() {
            warn!("[GPS] watchdog check failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::export::TrackExport;
    use crate::sensors::{SensorReading, SharedSensorManager};
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn setup() -> (Arc<ManualClock>, TrackRecordingService) {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = TrackRecordingService::with_parts(
            RecordingSettings::default(),
            Arc::new(MemoryTrackStore::new()),
            clock.clone(),
        )
        .unwrap();
        (clock, service)
    }

    /// Location `north_m` meters north of the origin, `secs` after t0
    fn loc(north_m: f64, secs: i64) -> Location {
        let lat = 46.0 + north_m / 111_194.9;
        Location::new(lat, 7.0, 5.0, t0() + chrono::Duration::seconds(secs))
    }

    /// Advance the clock to the location time and feed it
    fn feed(clock: &ManualClock, service: &TrackRecordingService, location: Location) -> bool {
        clock.set(location.time);
        service.on_location_changed(&location).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        recording: Mutex<Vec<RecordingStatus>>,
        gps: Mutex<Vec<GpsStatusValue>>,
    }

    impl StatusListener for Recorder {
        fn on_recording_status(&self, status: RecordingStatus) {
            self.recording.lock().unwrap().push(status);
        }

        fn on_gps_status(&self, status: GpsStatusValue) {
            self.gps.lock().unwrap().push(status);
        }
    }

    #[test]
    fn test_state_transitions() {
        let (_clock, service) = setup();

        assert!(!service.is_recording().unwrap());
        assert!(service.is_paused().unwrap());

        let id = service.start_new_track().unwrap();
        assert!(service.is_recording().unwrap());
        assert!(!service.is_paused().unwrap());

        service.pause_current_track().unwrap();
        assert!(service.is_recording().unwrap());
        assert!(service.is_paused().unwrap());

        service.resume_current_track().unwrap();
        assert!(!service.is_paused().unwrap());

        assert_eq!(service.end_current_track().unwrap(), id);
        assert!(!service.is_recording().unwrap());
        assert_eq!(service.recording_status().unwrap(), RecordingStatus::idle());
    }

    #[test]
    fn test_invalid_state_transitions() {
        let (_clock, service) = setup();

        assert_eq!(service.pause_current_track(), Err(RecorderError::NotRecording));
        assert_eq!(service.resume_current_track(), Err(RecorderError::NotRecording));
        assert_eq!(service.end_current_track(), Err(RecorderError::NotRecording));

        service.start_new_track().unwrap();
        assert_eq!(service.start_new_track(), Err(RecorderError::AlreadyRecording));
        assert_eq!(service.resume_current_track(), Err(RecorderError::NotPaused));

        service.pause_current_track().unwrap();
        assert_eq!(service.pause_current_track(), Err(RecorderError::AlreadyPaused));
        assert_eq!(service.start_new_track(), Err(RecorderError::AlreadyRecording));

        // Ending from paused is allowed
        assert!(service.end_current_track().is_ok());
    }

    #[test]
    fn test_idle_queries_are_empty() {
        let (_clock, service) = setup();
        assert_eq!(service.total_time().unwrap(), Duration::ZERO);
        assert_eq!(service.altitude_gain_m().unwrap(), None);
        assert_eq!(service.altitude_loss_m().unwrap(), None);
        assert_eq!(service.sensor_data().unwrap(), None);
        assert_eq!(service.current_track().unwrap(), None);
        assert_eq!(service.gps_status().unwrap(), GpsStatusValue::None);
    }

    #[test]
    fn test_total_time_excludes_pause() {
        let (clock, service) = setup();
        service.start_new_track().unwrap();
        clock.advance(Duration::from_secs(60));
        assert_eq!(service.total_time().unwrap(), Duration::from_secs(60));

        service.pause_current_track().unwrap();
        clock.advance(Duration::from_secs(300));
        assert_eq!(service.total_time().unwrap(), Duration::from_secs(60));

        service.resume_current_track().unwrap();
        clock.advance(Duration::from_secs(30));
        assert_eq!(service.total_time().unwrap(), Duration::from_secs(90));

        let id = service.end_current_track().unwrap();
        assert_eq!(service.total_time().unwrap(), Duration::ZERO);

        let stored = service.store().track(id).unwrap().unwrap();
        assert_eq!(stored.statistics.total_time, Duration::from_secs(90));
        assert_eq!(stored.statistics.stop_time, Some(t0() + chrono::Duration::seconds(390)));
    }

    #[test]
    fn test_segment_points_written() {
        let (clock, service) = setup();
        let id = service.start_new_track().unwrap();
        clock.advance(Duration::from_secs(5));
        service.pause_current_track().unwrap();
        clock.advance(Duration::from_secs(5));
        service.resume_current_track().unwrap();
        clock.advance(Duration::from_secs(5));
        service.end_current_track().unwrap();

        let types: Vec<TrackPointType> = service
            .store()
            .track_points(id)
            .unwrap()
            .iter()
            .map(|p| p.point_type)
            .collect();
        assert_eq!(
            types,
            vec![
                TrackPointType::SegmentStartManual,
                TrackPointType::SegmentEndManual,
                TrackPointType::SegmentStartManual,
                TrackPointType::SegmentEndManual,
            ]
        );
    }

    #[test]
    fn test_location_filter() {
        let (clock, service) = setup();
        let id = service.start_new_track().unwrap();

        // First point of a segment is always taken
        assert!(feed(&clock, &service, loc(0.0, 1)));
        // Too soon
        assert!(!feed(&clock, &service, loc(20.0, 1)));
        // Too close
        assert!(!feed(&clock, &service, loc(2.0, 3)));
        // Too inaccurate
        let mut fuzzy = loc(40.0, 4);
        fuzzy.accuracy = 120.0;
        assert!(!feed(&clock, &service, fuzzy));
        // Good
        assert!(feed(&clock, &service, loc(30.0, 5)));
        assert!(feed(&clock, &service, loc(60.0, 8)));

        let track = service.current_track().unwrap().unwrap();
        assert_relative_eq!(track.statistics.total_distance_m, 60.0, max_relative = 1e-3);
        // 30m in 3s
        assert_relative_eq!(track.statistics.max_speed_ms, 10.0, max_relative = 1e-3);

        let positioned = service
            .store()
            .track_points(id)
            .unwrap()
            .into_iter()
            .filter(|p| p.has_position())
            .count();
        assert_eq!(positioned, 3);
    }

    #[test]
    fn test_distance_jump_starts_segment() {
        let (clock, service) = setup();
        let id = service.start_new_track().unwrap();
        feed(&clock, &service, loc(0.0, 1));
        feed(&clock, &service, loc(50.0, 10));
        assert!(feed(&clock, &service, loc(5_000.0, 20)));

        let points = service.store().track_points(id).unwrap();
        assert_eq!(points.last().unwrap().point_type, TrackPointType::SegmentStartAutomatic);

        let track = service.current_track().unwrap().unwrap();
        assert_relative_eq!(track.statistics.total_distance_m, 50.0, max_relative = 1e-3);
    }

    #[test]
    fn test_locations_ignored_while_paused_or_idle() {
        let (clock, service) = setup();
        // GPS off: nothing happens
        assert!(!feed(&clock, &service, loc(0.0, 1)));
        assert_eq!(service.gps_status().unwrap(), GpsStatusValue::None);

        service.start_gps().unwrap();
        assert!(!feed(&clock, &service, loc(0.0, 2)));
        assert_eq!(service.gps_status().unwrap(), GpsStatusValue::SignalFix);

        service.start_new_track().unwrap();
        service.pause_current_track().unwrap();
        assert!(!feed(&clock, &service, loc(10.0, 5)));
    }

    #[test]
    fn test_altitude_gain_and_loss() {
        let (clock, service) = setup();
        service.start_new_track().unwrap();
        assert_eq!(service.altitude_gain_m().unwrap(), Some(0.0));

        let altitudes = [500.0, 510.0, 520.0, 512.0];
        for (i, alt) in altitudes.iter().enumerate() {
            let location = loc(20.0 * i as f64, 2 * i as i64 + 1).with_altitude(*alt);
            assert!(feed(&clock, &service, location));
        }
        assert_eq!(service.altitude_gain_m().unwrap(), Some(20.0));
        assert_eq!(service.altitude_loss_m().unwrap(), Some(8.0));

        service.end_current_track().unwrap();
        assert_eq!(service.altitude_gain_m().unwrap(), None);
    }

    #[test]
    fn test_insert_marker() {
        let (clock, service) = setup();
        assert_eq!(
            service.insert_marker("x", "", "", None),
            Err(RecorderError::NotRecording)
        );

        let id = service.start_new_track().unwrap();
        assert_eq!(
            service.insert_marker("x", "", "", None),
            Err(RecorderError::NoLocation)
        );

        feed(&clock, &service, loc(0.0, 1));
        service.insert_marker("", "", "", Some("")).unwrap();
        service
            .insert_marker("Bridge", "poi", "old stone bridge", Some("file:///bridge.jpg"))
            .unwrap();

        let markers = service.store().markers(id).unwrap();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].name, "Marker 1");
        assert_eq!(markers[0].photo_url, None);
        assert_eq!(markers[1].name, "Bridge");
        assert_eq!(markers[1].photo_url.as_deref(), Some("file:///bridge.jpg"));

        service.pause_current_track().unwrap();
        assert_eq!(
            service.insert_marker("late", "", "", None),
            Err(RecorderError::NotRecording)
        );
    }

    #[test]
    fn test_resume_ended_track() {
        let (clock, service) = setup();
        assert_eq!(
            service.resume_track(TrackId::new(99)),
            Err(RecorderError::TrackNotFound(TrackId::new(99)))
        );

        let id = service.start_new_track().unwrap();
        feed(&clock, &service, loc(0.0, 1));
        service.insert_marker("first", "", "", None).unwrap();
        clock.advance(Duration::from_secs(9));
        service.end_current_track().unwrap();

        clock.advance(Duration::from_secs(3600));
        service.resume_track(id).unwrap();
        assert_eq!(service.recording_status().unwrap().track_id, Some(id));
        assert_eq!(service.total_time().unwrap(), Duration::from_secs(10));
        assert_eq!(service.start_new_track(), Err(RecorderError::AlreadyRecording));

        feed(&clock, &service, loc(100.0, 3700));
        service.insert_marker("", "", "", None).unwrap();
        let names: Vec<String> = service
            .store()
            .markers(id)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["first".to_string(), "Marker 2".to_string()]);

        let track = service.current_track().unwrap().unwrap();
        assert!(!track.is_ended());
    }

    #[test]
    fn test_listeners_notified() {
        let (_clock, service) = setup();
        let listener = Arc::new(Recorder::default());
        service.add_listener(listener.clone()).unwrap();
        let rx = service.subscribe().unwrap();

        // Registration delivers the current status
        assert_eq!(listener.recording.lock().unwrap().as_slice(), &[RecordingStatus::idle()]);
        assert_eq!(listener.gps.lock().unwrap().as_slice(), &[GpsStatusValue::None]);

        let id = service.start_new_track().unwrap();
        service.pause_current_track().unwrap();

        let states: Vec<RecordingState> = listener
            .recording
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.state)
            .collect();
        assert_eq!(
            states,
            vec![RecordingState::Idle, RecordingState::Recording, RecordingState::Paused]
        );
        assert_eq!(
            listener.gps.lock().unwrap().last(),
            Some(&GpsStatusValue::Enabled)
        );

        let events: Vec<StatusEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                StatusEvent::Gps(GpsStatusValue::Enabled),
                StatusEvent::Recording(RecordingStatus {
                    state: RecordingState::Recording,
                    track_id: Some(id)
                }),
                StatusEvent::Recording(RecordingStatus {
                    state: RecordingState::Paused,
                    track_id: Some(id)
                }),
            ]
        );
    }

    #[test]
    fn test_stop_gps_ignored_while_recording() {
        let (_clock, service) = setup();
        service.start_new_track().unwrap();
        service.stop_gps().unwrap();
        assert_eq!(service.gps_status().unwrap(), GpsStatusValue::Enabled);

        service.end_current_track().unwrap();
        service.stop_gps().unwrap();
        assert_eq!(service.gps_status().unwrap(), GpsStatusValue::Disabled);
    }

    #[test]
    fn test_gps_signal_lost() {
        let (clock, service) = setup();
        service.start_gps().unwrap();
        feed(&clock, &service, loc(0.0, 1));
        clock.advance(Duration::from_secs(10));
        assert_eq!(service.check_gps_signal().unwrap(), GpsStatusValue::SignalFix);
        clock.advance(Duration::from_secs(25));
        assert_eq!(service.check_gps_signal().unwrap(), GpsStatusValue::SignalLost);
    }

    #[test]
    fn test_sensor_manager_follows_recording() {
        let (clock, service) = setup();
        let manager = SharedSensorManager::new(clock.clone(), Duration::from_secs(5));
        let bridge = manager.clone();
        service.set_remote_sensor_manager(Box::new(manager)).unwrap();

        bridge.push(SensorReading::HeartRate(130.0));
        assert_eq!(service.sensor_data().unwrap(), None);

        service.start_new_track().unwrap();
        bridge.push(SensorReading::HeartRate(131.0));
        let data = service.sensor_data().unwrap().unwrap();
        assert_eq!(data.heart_rate.unwrap().value, 131.0);

        service.end_current_track().unwrap();
        assert!(!bridge.is_started());
        assert_eq!(service.sensor_data().unwrap(), None);
    }

    #[test]
    fn test_replacing_sensor_manager_stops_old() {
        let (clock, service) = setup();
        let first = SharedSensorManager::new(clock.clone(), Duration::from_secs(5));
        let first_handle = first.clone();
        service.set_remote_sensor_manager(Box::new(first)).unwrap();
        service.start_new_track().unwrap();
        assert!(first_handle.is_started());

        let second = SharedSensorManager::new(clock.clone(), Duration::from_secs(5));
        let second_handle = second.clone();
        service.set_remote_sensor_manager(Box::new(second)).unwrap();
        assert!(!first_handle.is_started());
        assert!(second_handle.is_started());
    }

    #[test]
    fn test_new_track_point() {
        let (clock, service) = setup();
        let point = TrackPoint::from_location(&loc(0.0, 0), TrackPointType::TrackPoint);
        assert!(!service.new_track_point(point.clone(), 50.0).unwrap());

        let id = service.start_new_track().unwrap();
        assert!(!service.new_track_point(point.clone(), 2.0).unwrap());
        assert!(service.new_track_point(point, 50.0).unwrap());

        clock.advance(Duration::from_secs(2));
        let special = TrackPoint::new(TrackPointType::SegmentStartAutomatic, clock.now());
        assert!(service.new_track_point(special, 50.0).unwrap());
        assert_eq!(service.store().track_points(id).unwrap().len(), 3);
    }

    #[test]
    fn test_new_track_point_keeps_segment_types() {
        let (clock, service) = setup();
        let id = service.start_new_track().unwrap();
        assert!(feed(&clock, &service, loc(0.0, 1)));
        assert!(feed(&clock, &service, loc(30.0, 5)));

        // Closer and sooner than the thinning limits, still kept
        clock.set(t0() + chrono::Duration::seconds(5));
        let end = TrackPoint::from_location(&loc(32.0, 5), TrackPointType::SegmentEndManual);
        assert!(service.new_track_point(end, 50.0).unwrap());

        clock.set(t0() + chrono::Duration::seconds(20));
        let start = TrackPoint::from_location(&loc(80.0, 20), TrackPointType::SegmentStartManual);
        assert!(service.new_track_point(start, 50.0).unwrap());
        assert!(feed(&clock, &service, loc(110.0, 25)));

        let points = service.store().track_points(id).unwrap();
        let types: Vec<TrackPointType> = points.iter().map(|p| p.point_type).collect();
        assert_eq!(
            types,
            vec![
                TrackPointType::SegmentStartManual,
                TrackPointType::TrackPoint,
                TrackPointType::TrackPoint,
                TrackPointType::SegmentEndManual,
                TrackPointType::SegmentStartManual,
                TrackPointType::TrackPoint,
            ]
        );

        // 30m + 2m to the end point, nothing across the gap, 30m after it
        let track = service.current_track().unwrap().unwrap();
        assert_relative_eq!(track.statistics.total_distance_m, 62.0, max_relative = 1e-3);

        let export = TrackExport::from_store(service.store().as_ref(), id).unwrap();
        let sizes: Vec<usize> = export.segments().iter().map(|s| s.len()).collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[test]
    fn test_malformed_locations_rejected() {
        let (clock, service) = setup();
        let id = service.start_new_track().unwrap();
        assert!(feed(&clock, &service, loc(0.0, 1)));

        let mut no_latitude = loc(30.0, 5);
        no_latitude.latitude = f64::NAN;
        assert!(!feed(&clock, &service, no_latitude));

        let mut no_accuracy = loc(60.0, 8);
        no_accuracy.accuracy = f64::NAN;
        assert!(!feed(&clock, &service, no_accuracy));

        let mut bad_point = TrackPoint::from_location(&loc(90.0, 10), TrackPointType::TrackPoint);
        bad_point.accuracy = Some(f64::NAN);
        assert!(!service.new_track_point(bad_point, 50.0).unwrap());

        assert_eq!(service.gps_status().unwrap(), GpsStatusValue::SignalFix);
        assert_eq!(service.store().track_points(id).unwrap().len(), 2);

        // The next good fix still measures from the last recorded point
        assert!(feed(&clock, &service, loc(30.0, 12)));
        let track = service.current_track().unwrap().unwrap();
        assert!(track.statistics.total_distance_m.is_finite());
        assert_relative_eq!(track.statistics.total_distance_m, 30.0, max_relative = 1e-3);
    }

    #[test]
    fn test_update_settings_applies_to_open_track() {
        let (clock, service) = setup();
        service.start_new_track().unwrap();
        assert!(feed(&clock, &service, loc(0.0, 1).with_altitude(500.0)));

        let mut settings = RecordingSettings::default();
        settings.min_recording_distance_m = 50.0;
        settings.altitude_threshold_m = 20.0;
        service.update_settings(settings).unwrap();

        // 30m would pass the default 5m limit
        assert!(!feed(&clock, &service, loc(30.0, 5).with_altitude(510.0)));
        assert!(feed(&clock, &service, loc(60.0, 10).with_altitude(510.0)));
        // 10m climb is inside the new 20m dead band
        assert_eq!(service.altitude_gain_m().unwrap(), Some(0.0));
        assert!(feed(&clock, &service, loc(120.0, 15).with_altitude(525.0)));
        assert_eq!(service.altitude_gain_m().unwrap(), Some(25.0));
    }

    #[test]
    fn test_broken_listener_does_not_fail_committed_change() {
        let (_clock, service) = setup();
        service.add_listener(Arc::new(Recorder::default())).unwrap();
        service.listeners.poison();

        let id = service.start_new_track().unwrap();
        assert!(service.is_recording().unwrap());
        assert_eq!(service.recording_status().unwrap().track_id, Some(id));
        assert!(service.pause_current_track().is_ok());
        assert_eq!(service.end_current_track(), Ok(id));
    }

    #[test]
    fn test_update_settings_validates() {
        let (_clock, service) = setup();
        let mut settings = RecordingSettings::default();
        settings.min_recording_distance_m = -1.0;
        assert!(service.update_settings(settings).is_err());

        let mut settings = RecordingSettings::default();
        settings.min_recording_distance_m = 25.0;
        service.update_settings(settings).unwrap();
        assert_eq!(service.settings().unwrap().min_recording_distance_m, 25.0);
    }

    #[tokio::test]
    async fn test_gps_watchdog_reports_signal_lost() {
        let (clock, service) = setup();
        let service = Arc::new(service);
        let rx = service.subscribe().unwrap();
        service.start_gps().unwrap();
        clock.advance(Duration::from_secs(120));

        let handle = tokio::spawn(gps_watchdog(service.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(service.gps_status().unwrap(), GpsStatusValue::SignalLost);
        assert!(rx.try_iter().any(|e| e == StatusEvent::Gps(GpsStatusValue::SignalLost)));
    }
}
