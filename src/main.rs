use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use track_recorder::{
    Location, ManualClock, MemoryTrackStore, RecordingSettings, SensorDataSet, SensorReading,
    SharedSensorManager, TrackExport, TrackRecordingService,
};

#[derive(Parser, Debug)]
#[command(name = "track_recorder")]
#[command(about = "Replay a recorded location log through the track recording service", long_about = None)]
struct Args {
    /// JSON array of replay events
    #[arg(value_name = "LOG")]
    log: PathBuf,

    /// Recording settings JSON (missing keys use defaults)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = "recorded_tracks")]
    output_dir: PathBuf,

    /// Export format
    #[arg(long, value_enum, default_value = "both")]
    format: ExportFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Gpx,
    Both,
}

/// One entry of the replay log
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ReplayEvent {
    Location(Location),
    Pause {
        time: DateTime<Utc>,
    },
    Resume {
        time: DateTime<Utc>,
    },
    Marker {
        time: DateTime<Utc>,
        #[serde(default)]
        name: String,
        #[serde(default)]
        category: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        photo_url: Option<String>,
    },
    Sensor {
        time: DateTime<Utc>,
        reading: SensorReading,
    },
}

impl ReplayEvent {
    fn time(&self) -> DateTime<Utc> {
        match self {
            ReplayEvent::Location(location) => location.time,
            ReplayEvent::Pause { time }
            | ReplayEvent::Resume { time }
            | ReplayEvent::Marker { time, .. }
            | ReplayEvent::Sensor { time, .. } => *time,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => RecordingSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => RecordingSettings::default(),
    };

    let text = fs::read_to_string(&args.log)
        .with_context(|| format!("reading {}", args.log.display()))?;
    let events: Vec<ReplayEvent> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", args.log.display()))?;
    let Some(first) = events.first() else {
        anyhow::bail!("{} contains no events", args.log.display());
    };

    println!("Track Recorder replay");
    println!("  Log: {} ({} events)", args.log.display(), events.len());
    println!("  Output Dir: {}", args.output_dir.display());

    let clock = Arc::new(ManualClock::new(first.time()));
    let store = Arc::new(MemoryTrackStore::new());
    let service = TrackRecordingService::with_parts(settings.clone(), store.clone(), clock.clone())?;

    let sensors = SharedSensorManager::new(clock.clone(), settings.sensor_data_max_age());
    service.set_remote_sensor_manager(Box::new(sensors.clone()))?;

    let track_id = service.start_new_track()?;
    let mut recorded = 0usize;
    let mut last_sensors: Option<SensorDataSet> = None;

    for event in &events {
        clock.set(event.time());
        let outcome = match event {
            ReplayEvent::Location(location) => service.on_location_changed(location).map(|stored| {
                if stored {
                    recorded += 1;
                }
            }),
            ReplayEvent::Pause { .. } => service.pause_current_track(),
            ReplayEvent::Resume { .. } => service.resume_current_track(),
            ReplayEvent::Marker {
                name,
                category,
                description,
                photo_url,
                ..
            } => service
                .insert_marker(name, category, description, photo_url.as_deref())
                .map(|id| info!("marker {} inserted", id)),
            ReplayEvent::Sensor { reading, .. } => {
                sensors.push(*reading);
                Ok(())
            }
        };
        // A bad event in a log should not abort the whole replay
        if let Err(e) = outcome {
            warn!("skipping {:?} at {}: {}", event, event.time(), e);
        }
        service.check_gps_signal()?;
        if let Some(data) = service.sensor_data()? {
            last_sensors = Some(data);
        }
    }

    service.end_current_track()?;

    let export = TrackExport::from_store(store.as_ref(), track_id)?;
    let stats = &export.track.statistics;
    println!("Track {} finished", track_id);
    println!("  Points recorded: {}", recorded);
    println!("  Markers: {}", export.markers.len());
    println!("  Distance: {:.1} m", stats.total_distance_m);
    println!("  Recording time: {} s", stats.total_time.as_secs());
    println!("  Max speed: {:.1} km/h", stats.max_speed_ms * 3.6);
    println!(
        "  Altitude: +{:.0} m / -{:.0} m",
        stats.altitude_gain_m, stats.altitude_loss_m
    );
    match &last_sensors {
        Some(data) => println!("  Sensors: {}", describe_sensors(data)),
        None => println!("  Sensors: none"),
    }

    write_export(&export, &args.output_dir, args.format)
}

/// One-line summary of the latest sensor readings
fn describe_sensors(data: &SensorDataSet) -> String {
    let mut parts = Vec::new();
    if let Some(hr) = &data.heart_rate {
        parts.push(format!("{:.0} bpm", hr.value));
    }
    if let Some(cadence) = &data.cadence {
        parts.push(format!("{:.0} rpm", cadence.value));
    }
    if let Some(power) = &data.power {
        parts.push(format!("{:.0} W", power.value));
    }
    if let Some(speed) = &data.cycling_speed {
        parts.push(format!("{:.1} km/h", speed.value * 3.6));
    }
    if let Some(battery) = &data.battery_level {
        parts.push(format!("battery {}%", battery.value));
    }
    if parts.is_empty() {
        "none".to_string()
    } else {
        parts.join(", ")
    }
}

fn write_export(export: &TrackExport, dir: &Path, format: ExportFormat) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let stem = format!("track_{}", export.track.id);

    if matches!(format, ExportFormat::Json | ExportFormat::Both) {
        let path = dir.join(format!("{}.json", stem));
        fs::write(&path, export.to_json_bytes()?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("  Wrote {}", path.display());
    }
    if matches!(format, ExportFormat::Gpx | ExportFormat::Both) {
        let path = dir.join(format!("{}.gpx", stem));
        fs::write(&path, export.to_gpx_xml())
            .with_context(|| format!("writing {}", path.display()))?;
        println!("  Wrote {}", path.display());
    }
    Ok(())
}
