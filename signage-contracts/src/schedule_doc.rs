use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{LayoutId, ScheduleEntryId};

/// Schedule document shape, independent of wire serialisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleDocument {
    pub default_layout_id: Option<LayoutId>,
    pub entries: Vec<ScheduleEntry>,
}

/// One schedule entry. `kind` carries the per-variant payload (the
/// `{standalone-layout, campaign, overlay, interrupt}` union); everything
/// else is common to all four.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: ScheduleEntryId,
    pub priority: i32,
    pub window: Option<TimeWindow>,
    pub geo_fence: Option<GeoFence>,
    pub criteria: Option<CriteriaPredicate>,
    pub kind: ScheduleEntryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScheduleEntryKind {
    /// A standalone layout is a campaign of size one.
    Layout { layout_id: LayoutId },
    /// An ordered list of layouts competing as one unit.
    Campaign { layouts: Vec<LayoutId> },
    /// Plays simultaneously atop the main selection, own z-layer.
    Overlay { layout_id: LayoutId },
    /// Share-of-voice content; pre-empts main content for a fraction of
    /// every hour.
    Interrupt {
        layout_id: LayoutId,
        percentage_of_hour: u8,
    },
}

impl ScheduleEntryKind {
    pub fn is_overlay(&self) -> bool {
        matches!(self, ScheduleEntryKind::Overlay { .. })
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, ScheduleEntryKind::Interrupt { .. })
    }

    /// Layouts this entry would contribute to the main/overlay/interrupt
    /// selection, in schedule order (campaign expansion).
    pub fn layouts(&self) -> Vec<LayoutId> {
        match self {
            ScheduleEntryKind::Layout { layout_id } => vec![layout_id.clone()],
            ScheduleEntryKind::Campaign { layouts } => layouts.clone(),
            ScheduleEntryKind::Overlay { layout_id } => vec![layout_id.clone()],
            ScheduleEntryKind::Interrupt { layout_id, .. } => vec![layout_id.clone()],
        }
    }
}

/// Either an absolute interval or, for a recurring entry, a time-of-day
/// window plus day-of-week recurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TimeWindow {
    Absolute {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    Recurring {
        from_time_of_day: NaiveTime,
        to_time_of_day: NaiveTime,
        /// ISO day-of-week numbers, 1 (Monday) through 7 (Sunday).
        repeats_on: Vec<u8>,
        /// Hard stop: once past this moment the entry never matches again,
        /// regardless of time-of-day.
        range: Option<DateTime<Utc>>,
    },
}

/// Geo-fence gating: either a polygon (lon/lat vertices) or a
/// point-plus-radius circle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GeoFence {
    Polygon(Vec<(f64, f64)>),
    Circle { center: (f64, f64), radius_m: f64 },
}

impl GeoFence {
    /// Point-in-polygon via ray casting; point-in-circle via haversine
    /// distance. `point` is `(lon, lat)` to match `center`/`Polygon`.
    pub fn contains(&self, point: (f64, f64)) -> bool {
        match self {
            GeoFence::Polygon(vertices) => point_in_polygon(point, vertices),
            GeoFence::Circle { center, radius_m } => {
                haversine_meters(point, *center) <= *radius_m
            }
        }
    }
}

fn point_in_polygon(point: (f64, f64), vertices: &[(f64, f64)]) -> bool {
    let (x, y) = point;
    let mut inside = false;
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn haversine_meters(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lon1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lon2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// A flat key/value criteria predicate, evaluated against whatever context
/// the display publishes (tags, audience segment, etc). The CMS's actual
/// criteria language is out of scope; this is the typed shape the
/// core evaluates once parsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriteriaPredicate {
    pub requires: Vec<(String, String)>,
}

impl CriteriaPredicate {
    pub fn matches(&self, context: &std::collections::HashMap<String, String>) -> bool {
        self.requires
            .iter()
            .all(|(key, value)| context.get(key).map(|v| v == value).unwrap_or(false))
    }
}
