use crate::data::TrackId;
use crate::error::{RecorderError, RecorderResult};
use crate::gps_status::GpsStatusValue;
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Recording state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    /// No track open
    Idle,
    /// Track open and collecting points
    Recording,
    /// Track open, collection suspended
    Paused,
}

/// Snapshot of what the recorder is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub state: RecordingState,
    pub track_id: Option<TrackId>,
}

impl RecordingStatus {
    pub fn idle() -> Self {
        Self {
            state: RecordingState::Idle,
            track_id: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.track_id.is_some()
    }

    /// Also true when no track is open.
    pub fn is_paused(&self) -> bool {
        self.state != RecordingState::Recording
    }
}

/// Events delivered to channel subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Recording(RecordingStatus),
    Gps(GpsStatusValue),
}

/// Receives recording service status updates
pub trait StatusListener: Send + Sync {
    fn on_recording_status(&self, _status: RecordingStatus) {}

    fn on_gps_status(&self, _status: GpsStatusValue) {}
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn StatusListener>>>,
    subscribers: Mutex<Vec<Sender<StatusEvent>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn StatusListener>) -> RecorderResult<()> {
        self.listeners
            .lock()
            .map_err(|_| RecorderError::lock("listener"))?
            .push(listener);
        Ok(())
    }

    pub fn subscribe(&self) -> RecorderResult<Receiver<StatusEvent>> {
        let (tx, rx) = channel::unbounded();
        self.subscribers
            .lock()
            .map_err(|_| RecorderError::lock("subscriber"))?
            .push(tx);
        Ok(rx)
    }

    pub fn len(&self) -> usize {
        let listeners = self.listeners.lock().map(|l| l.len()).unwrap_or(0);
        let subscribers = self.subscribers.lock().map(|s| s.len()).unwrap_or(0);
        listeners + subscribers
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, event: StatusEvent) -> RecorderResult<()> {
        // Snapshot so callbacks may register further listeners
        let listeners: Vec<Arc<dyn StatusListener>> = self
            .listeners
            .lock()
            .map_err(|_| RecorderError::lock("listener"))?
            .clone();

        for listener in &listeners {
            match event {
                StatusEvent::Recording(status) => listener.on_recording_status(status),
                StatusEvent::Gps(status) => listener.on_gps_status(status),
            }
        }

        self.subscribers
            .lock()
            .map_err(|_| RecorderError::lock("subscriber"))?
            .retain(|tx| tx.send(event).is_ok());

        Ok(())
    }

    /// Poison the listener lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| {
                let _guard = self.listeners.lock();
                panic!("listener callback panicked");
            });
            assert!(handle.join().is_err());
        });
    }
}
