use crate::data::{Location, Marker, MarkerId, Track, TrackId, TrackPoint};
use crate::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Marker fields supplied by the caller; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMarker {
    pub track_id: TrackId,
    pub name: String,
    pub category: String,
    pub description: String,
    pub photo_url: Option<String>,
    pub location: Location,
}

/// Persistence for tracks, their points and markers
pub trait TrackStore: Send + Sync {
    fn create_track(&self, name: &str, start_time: DateTime<Utc>) -> RecorderResult<Track>;

    fn update_track(&self, track: &Track) -> RecorderResult<()>;

    fn track(&self, id: TrackId) -> RecorderResult<Option<Track>>;

    fn tracks(&self) -> RecorderResult<Vec<Track>>;

    fn insert_track_point(&self, id: TrackId, point: TrackPoint) -> RecorderResult<()>;

    fn track_points(&self, id: TrackId) -> RecorderResult<Vec<TrackPoint>>;

    fn insert_marker(&self, marker: NewMarker) -> RecorderResult<Marker>;

    fn markers(&self, id: TrackId) -> RecorderResult<Vec<Marker>>;
}

#[derive(Default)]
struct Tables {
    next_track_id: u64,
    next_marker_id: u64,
    tracks: BTreeMap<TrackId, Track>,
    points: HashMap<TrackId, Vec<TrackPoint>>,
    markers: HashMap<TrackId, Vec<Marker>>,
}

/// Track store kept in memory
#[derive(Default)]
pub struct MemoryTrackStore {
    tables: RwLock<Tables>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RecorderResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| RecorderError::lock("store"))
    }

    fn write(&self) -> RecorderResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| RecorderError::lock("store"))
    }
}

impl TrackStore for MemoryTrackStore {
    fn create_track(&self, name: &str, start_time: DateTime<Utc>) -> RecorderResult<Track> {
        let mut tables = self.write()?;
        tables.next_track_id += 1;
        let id = TrackId::new(tables.next_track_id);
        let track = Track::new(id, name.to_string(), start_time);
        tables.tracks.insert(id, track.clone());
        Ok(track)
    }

    fn update_track(&self, track: &Track) -> RecorderResult<()> {
        let mut tables = self.write()?;
        match tables.tracks.get_mut(&track.id) {
            Some(stored) => {
                *stored = track.clone();
                Ok(())
            }
            None => Err(RecorderError::TrackNotFound(track.id)),
        }
    }

    fn track(&self, id: TrackId) -> RecorderResult<Option<Track>> {
        Ok(self.read()?.tracks.get(&id).cloned())
    }

    fn tracks(&self) -> RecorderResult<Vec<Track>> {
        Ok(self.read()?.tracks.values().cloned().collect())
    }

    fn insert_track_point(&self, id: TrackId, point: TrackPoint) -> RecorderResult<()> {
        let mut tables = self.write()?;
        if !tables.tracks.contains_key(&id) {
            return Err(RecorderError::TrackNotFound(id));
        }
        tables.points.entry(id).or_default().push(point);
        Ok(())
    }

    fn track_points(&self, id: TrackId) -> RecorderResult<Vec<TrackPoint>> {
        let tables = self.read()?;
        if !tables.tracks.contains_key(&id) {
            return Err(RecorderError::TrackNotFound(id));
        }
        Ok(tables.points.get(&id).cloned().unwrap_or_default())
    }

    fn insert_marker(&self, marker: NewMarker) -> RecorderResult<Marker> {
        let mut tables = self.write()?;
        if !tables.tracks.contains_key(&marker.track_id) {
            return Err(RecorderError::TrackNotFound(marker.track_id));
        }
        tables.next_marker_id += 1;
        let stored = Marker {
            id: MarkerId::new(tables.next_marker_id),
            track_id: marker.track_id,
            name: marker.name,
            category: marker.category,
            description: marker.description,
            photo_url: marker.photo_url,
            location: marker.location,
        };
        tables
            .markers
            .entry(stored.track_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn markers(&self, id: TrackId) -> RecorderResult<Vec<Marker>> {
        let tables = self.read()?;
        if !tables.tracks.contains_key(&id) {
            return Err(RecorderError::TrackNotFound(id));
        }
        Ok(tables.markers.get(&id).cloned().unwrap_or_default())
    }
}
