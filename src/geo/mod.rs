//! # Offline Geo Lookup
//!
//! Resolves German postal codes and dialling prefixes to coordinates without any
//! network access. The table is built once from a CSV export (see [`store`]) and kept
//! in memory for the lifetime of the bot.
//!
//! Distances use the haversine great-circle formula on a spherical Earth with a radius
//! of 6371 km. A coordinate pair of exactly `(0, 0)` is the mesh convention for
//! "no position fix" and never yields a distance.

pub mod errors;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub use errors::GeoError;
pub use store::GeoStore;

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// `(0, 0)` is what nodes advertise when they have no location.
    pub fn is_unset(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// One row of the postal code table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub zipcode: String,
    pub place: String,
    pub extra: String,
    pub prefix: String,
    pub state: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl GeoRecord {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        }
    }
}

/// Result of a dialling prefix lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMatch {
    pub zipcode: String,
    pub place: String,
}

/// Read-only lookups the dispatcher needs from the geo table.
pub trait GeoLookup {
    /// Coordinates for an exact postal code, if the table has them.
    fn coordinates_for_zipcode(&self, zipcode: &str) -> Option<Coordinates>;

    /// First postal code (in table order) served by a dialling prefix.
    fn zipcode_for_prefix(&self, prefix: &str) -> Option<PrefixMatch>;
}

/// In-memory lookup table keyed by postal code and by dialling prefix.
///
/// Several places usually share one dialling prefix. The first record seen for a prefix
/// wins, so the answer depends only on the order records were imported in.
#[derive(Debug, Clone, Default)]
pub struct GeoTable {
    by_zipcode: HashMap<String, Coordinates>,
    by_prefix: HashMap<String, PrefixMatch>,
    seen: HashSet<String>,
    records: usize,
}

impl GeoTable {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = GeoRecord>,
    {
        let mut table = GeoTable::default();
        for record in records {
            table.insert(record);
        }
        table
    }

    fn insert(&mut self, record: GeoRecord) {
        self.records += 1;
        // Later rows for a known postal code are ignored entirely.
        if !self.seen.insert(record.zipcode.clone()) {
            return;
        }
        if let Some(coords) = record.coordinates() {
            self.by_zipcode
                .entry(record.zipcode.clone())
                .or_insert(coords);
        }
        if !record.prefix.is_empty() {
            self.by_prefix
                .entry(record.prefix.clone())
                .or_insert(PrefixMatch {
                    zipcode: record.zipcode,
                    place: record.place,
                });
        }
    }

    /// Number of rows the table was built from.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Number of distinct postal codes carrying coordinates.
    pub fn located_zipcodes(&self) -> usize {
        self.by_zipcode.len()
    }
}

impl GeoLookup for GeoTable {
    fn coordinates_for_zipcode(&self, zipcode: &str) -> Option<Coordinates> {
        self.by_zipcode.get(zipcode).copied()
    }

    fn zipcode_for_prefix(&self, prefix: &str) -> Option<PrefixMatch> {
        self.by_prefix.get(prefix).cloned()
    }
}

/// Great-circle distance in kilometres, or `None` when either side has no fix.
pub fn distance_km(a: Coordinates, b: Coordinates) -> Option<f64> {
    if a.is_unset() || b.is_unset() {
        return None;
    }

    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    Some(EARTH_RADIUS_KM * c)
}
