use crate::data::{Marker, Track, TrackId, TrackPoint, TrackPointType};
use crate::error::{RecorderError, RecorderResult};
use crate::store::TrackStore;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Complete track export (JSON-serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackExport {
    pub track: Track,
    pub track_points: Vec<TrackPoint>,
    pub markers: Vec<Marker>,
}

impl TrackExport {
    pub fn from_store(store: &dyn TrackStore, id: TrackId) -> RecorderResult<Self> {
        let track = store.track(id)?.ok_or(RecorderError::TrackNotFound(id))?;
        Ok(Self {
            track,
            track_points: store.track_points(id)?,
            markers: store.markers(id)?,
        })
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serialize to JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Positioned points split into segments.
    ///
    /// A segment start opens a new segment, a manual end closes the current
    /// one after itself; empty segments are dropped.
    pub fn segments(&self) -> Vec<Vec<&TrackPoint>> {
        let mut segments: Vec<Vec<&TrackPoint>> = Vec::new();
        let mut current: Vec<&TrackPoint> = Vec::new();

        for point in &self.track_points {
            if point.point_type.is_segment_start() && !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            if point.has_position() {
                current.push(point);
            }
            if point.point_type == TrackPointType::SegmentEndManual && !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            segments.push(current);
        }
        segments
    }

    /// Generate GPX 1.1 document
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"track_recorder\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n");
        xml.push_str("  <metadata>\n");
        let _ = writeln!(xml, "    <name>{}</name>", escape_xml(&self.track.name));
        if !self.track.description.is_empty() {
            let _ = writeln!(xml, "    <desc>{}</desc>", escape_xml(&self.track.description));
        }
        if let Some(start) = self.track.statistics.start_time {
            let _ = writeln!(xml, "    <time>{}</time>", start.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        xml.push_str("  </metadata>\n");

        for marker in &self.markers {
            let loc = &marker.location;
            let _ = writeln!(xml, "  <wpt lat=\"{}\" lon=\"{}\">", loc.latitude, loc.longitude);
            if let Some(ele) = loc.altitude {
                let _ = writeln!(xml, "    <ele>{}</ele>", ele);
            }
            let _ = writeln!(xml, "    <time>{}</time>", loc.time.to_rfc3339_opts(SecondsFormat::Millis, true));
            let _ = writeln!(xml, "    <name>{}</name>", escape_xml(&marker.name));
            if !marker.description.is_empty() {
                let _ = writeln!(xml, "    <desc>{}</desc>", escape_xml(&marker.description));
            }
            if !marker.category.is_empty() {
                let _ = writeln!(xml, "    <type>{}</type>", escape_xml(&marker.category));
            }
            xml.push_str("  </wpt>\n");
        }

        xml.push_str("  <trk>\n");
        let _ = writeln!(xml, "    <name>{}</name>", escape_xml(&self.track.name));
        if !self.track.category.is_empty() {
            let _ = writeln!(xml, "    <type>{}</type>", escape_xml(&self.track.category));
        }

        for segment in self.segments() {
            xml.push_str("    <trkseg>\n");
            for point in segment {
                let (Some(lat), Some(lon)) = (point.latitude, point.longitude) else {
                    continue;
                };
                let _ = writeln!(xml, "      <trkpt lat=\"{}\" lon=\"{}\">", lat, lon);
                if let Some(ele) = point.altitude {
                    let _ = writeln!(xml, "        <ele>{}</ele>", ele);
                }
                let _ = writeln!(xml, "        <time>{}</time>", point.time.to_rfc3339_opts(SecondsFormat::Millis, true));
                xml.push_str("      </trkpt>\n");
            }
            xml.push_str("    </trkseg>\n");
        }

        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
