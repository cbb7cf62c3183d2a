use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{PlanetError, Result};
use crate::geometry::Point;

pub const COL_NAME: usize = 1;
pub const COL_ALT_NAME: usize = 2;
pub const COL_X: usize = 3;
pub const COL_Y: usize = 4;
pub const COL_LINK: usize = 6;

const MIN_FIELDS: usize = 6;
const LINK_PREFIXES: [&str; 2] = ["https://www.sarna.net/wiki/", "http://www.sarna.net/wiki/"];

/// One row of the reference table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemRecord {
    pub name: String,
    pub alt_name: String,
    pub x: f64,
    pub y: f64,
    /// Column text behind `x`/`y`, kept for error reports.
    #[serde(skip)]
    pub raw_x: String,
    #[serde(skip)]
    pub raw_y: String,
    /// `None` when the row carries no link at all; `Some("")` when the link
    /// normalizes to nothing.
    pub sarna_id: Option<String>,
}

impl SystemRecord {
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || (!self.alt_name.is_empty() && self.alt_name == name)
    }

    /// Coordinates for geometry and patching; rejects unparseable values.
    pub fn coordinates(&self) -> Result<Point> {
        for (field, value, raw) in [("x", self.x, &self.raw_x), ("y", self.y, &self.raw_y)] {
            if !value.is_finite() {
                return Err(PlanetError::Parse {
                    record: self.name.clone(),
                    field,
                    value: raw.clone(),
                });
            }
        }
        Ok(Point::new(self.x, self.y))
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

pub fn parse_table(content: &str) -> Vec<SystemRecord> {
    content.lines().filter_map(parse_line).collect()
}

pub fn parse_line(line: &str) -> Option<SystemRecord> {
    let fields = line.split('\t').collect::<Vec<_>>();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let sarna_id = fields
        .get(COL_LINK)
        .map(|link| link.trim())
        .filter(|link| !link.is_empty())
        .map(normalize_link);

    Some(SystemRecord {
        name: fields[COL_NAME].trim().to_string(),
        alt_name: fields[COL_ALT_NAME].trim().to_string(),
        x: parse_number(fields[COL_X]),
        y: parse_number(fields[COL_Y]),
        raw_x: fields[COL_X].to_string(),
        raw_y: fields[COL_Y].to_string(),
        sarna_id,
    })
}

/// Strip the wiki host prefix and percent-decode what is left.
pub fn normalize_link(link: &str) -> String {
    let mut stripped = link.trim();
    for prefix in LINK_PREFIXES {
        if let Some(rest) = stripped.strip_prefix(prefix) {
            stripped = rest;
            break;
        }
    }
    match percent_decode(stripped) {
        Some(decoded) => decoded,
        None => {
            log::warn!("malformed percent-encoding in link {link:?}; keeping it undecoded");
            stripped.to_string()
        }
    }
}

/// Lenient number parsing: drops quotes and thousands separators, then reads the
/// longest leading decimal literal. Anything else is NaN.
pub fn parse_number(raw: &str) -> f64 {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let pattern = NUMBER.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("number pattern")
    });

    let cleaned = raw.replace(['"', ','], "");
    pattern
        .find(cleaned.trim())
        .and_then(|found| found.as_str().parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

pub(crate) fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = (*bytes.get(i + 1)? as char).to_digit(16)? as u8;
                let lo = (*bytes.get(i + 2)? as char).to_digit(16)? as u8;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

/// Same unreserved set as `encodeURIComponent`.
pub(crate) fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    First(usize),
    From(String),
    Only(String),
}

impl Selection {
    pub fn parse(directive: Option<&str>) -> Self {
        let Some(directive) = directive.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::All;
        };
        if let Ok(count) = directive.parse::<usize>() {
            return Self::First(count);
        }
        match directive.strip_prefix('+') {
            Some(name) => Self::From(name.to_string()),
            None => Self::Only(directive.to_string()),
        }
    }
}

pub fn select_systems<'a>(
    records: &'a [SystemRecord],
    selection: &Selection,
) -> Result<&'a [SystemRecord]> {
    match selection {
        Selection::All => Ok(records),
        Selection::First(count) => Ok(&records[..(*count).min(records.len())]),
        Selection::From(name) => records
            .iter()
            .position(|record| record.matches(name))
            .map(|start| &records[start..])
            .ok_or_else(|| PlanetError::NotFound(name.clone())),
        Selection::Only(name) => records
            .iter()
            .position(|record| record.matches(name))
            .map(|index| &records[index..=index])
            .ok_or_else(|| PlanetError::NotFound(name.clone())),
    }
}
