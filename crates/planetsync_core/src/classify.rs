use std::fmt;

use serde::Serialize;

use crate::geometry::{Point, distance};
use crate::markup::{extract_coordinates, has_system_marker, is_disambiguation};
use crate::records::SystemRecord;

/// Coordinates closer than this are corrected automatically.
pub const CLOSE_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    MissingSarnaLink,
    Missing,
    Disambiguation,
    NotAPlanet,
    NoCoordinates,
    Ok,
    RoundedCoordinates,
    CloseCoordinates,
    MismatchedCoordinates,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Self::MissingSarnaLink,
        Self::Missing,
        Self::Disambiguation,
        Self::NotAPlanet,
        Self::NoCoordinates,
        Self::Ok,
        Self::RoundedCoordinates,
        Self::CloseCoordinates,
        Self::MismatchedCoordinates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingSarnaLink => "missing-sarna-link",
            Self::Missing => "missing",
            Self::Disambiguation => "disambiguation",
            Self::NotAPlanet => "not-a-planet",
            Self::NoCoordinates => "no-coordinates",
            Self::Ok => "ok",
            Self::RoundedCoordinates => "rounded-coordinates",
            Self::CloseCoordinates => "close-coordinates",
            Self::MismatchedCoordinates => "mismatched-coordinates",
        }
    }

    pub fn is_auto_fixable(self) -> bool {
        matches!(self, Self::RoundedCoordinates | Self::CloseCoordinates)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RemoteCoordinate {
    /// No remote document to read from.
    Absent,
    /// A document exists but carries no usable coordinates.
    NotApplicable,
    Value(f64),
}

/// What the remote store produced for a record.
#[derive(Debug, Clone, Copy)]
pub enum RemoteLookup<'a> {
    Unlinked,
    Missing,
    Document(&'a str),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationOutcome {
    pub source_name: String,
    pub remote_id: String,
    pub category: Category,
    pub source_x: f64,
    pub source_y: f64,
    pub remote_x: RemoteCoordinate,
    pub remote_y: RemoteCoordinate,
    pub distance: Option<f64>,
}

/// Steps 6-9 of the decision tree for two known coordinate pairs.
pub fn classify_coordinates(source: Point, remote: Point) -> (Category, Option<f64>) {
    if source.x == remote.x && source.y == remote.y {
        return (Category::Ok, None);
    }
    if round_hundredths(source.x) == round_hundredths(remote.x)
        && round_hundredths(source.y) == round_hundredths(remote.y)
    {
        return (Category::RoundedCoordinates, None);
    }
    let gap = distance(source, remote);
    if gap < CLOSE_THRESHOLD {
        (Category::CloseCoordinates, None)
    } else {
        (Category::MismatchedCoordinates, Some(gap))
    }
}

/// Steps 1-9 for one record. Unreadable source coordinates cannot be compared and
/// are reported as `mismatched-coordinates` with a NaN distance.
pub fn classify(
    record: &SystemRecord,
    remote_id: &str,
    lookup: RemoteLookup<'_>,
) -> ReconciliationOutcome {
    let outcome = |category, remote_x, remote_y, distance| ReconciliationOutcome {
        source_name: record.name.clone(),
        remote_id: remote_id.to_string(),
        category,
        source_x: record.x,
        source_y: record.y,
        remote_x,
        remote_y,
        distance,
    };
    let absent = RemoteCoordinate::Absent;
    let not_applicable = RemoteCoordinate::NotApplicable;

    let body = match (record.sarna_id.as_deref(), lookup) {
        (None, _) | (_, RemoteLookup::Unlinked) => {
            return outcome(Category::MissingSarnaLink, absent, absent, None);
        }
        (Some(""), _) | (_, RemoteLookup::Missing) => {
            return outcome(Category::Missing, absent, absent, None);
        }
        (Some(_), RemoteLookup::Document(body)) => body,
    };

    if !has_system_marker(body) {
        let category = if is_disambiguation(body) {
            Category::Disambiguation
        } else {
            Category::NotAPlanet
        };
        return outcome(category, not_applicable, not_applicable, None);
    }

    let Some(remote) = extract_coordinates(body) else {
        return outcome(Category::NoCoordinates, not_applicable, not_applicable, None);
    };

    let (category, gap) = match record.coordinates() {
        Ok(source) => classify_coordinates(source, remote),
        Err(error) => {
            log::warn!("{error}");
            (Category::MismatchedCoordinates, Some(f64::NAN))
        }
    };
    outcome(
        category,
        RemoteCoordinate::Value(remote.x),
        RemoteCoordinate::Value(remote.y),
        gap,
    )
}

/// `Math.round(value * 100) / 100`: halves round toward positive infinity.
fn round_hundredths(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}
