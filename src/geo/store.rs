//! Persistent geo table backed by sled.
//!
//! Rows live in a single `rows` tree keyed by their big-endian import sequence number,
//! so iterating the tree replays the CSV order exactly. That order is what makes
//! "first place for a prefix wins" deterministic.
//!
//! The importer reads the semicolon separated German postal code export:
//!
//! ```text
//! Plz;Ort;Zusatz;Vorwahl;Bundesland;Latitude;Longitude
//! 22767;Hamburg;Altona;040;Hamburg;53.5522;9.9350
//! ```
//!
//! `Latitude`/`Longitude` are optional; rows without them still resolve prefixes.

use log::{debug, info, warn};
use std::io::BufRead;
use std::path::Path;

use super::{GeoError, GeoRecord, GeoTable};

const ROWS_TREE: &str = "rows";

/// Counts reported after a CSV import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub with_coordinates: usize,
}

/// Handle to the on-disk geo database.
pub struct GeoStore {
    db: sled::Db,
    rows: sled::Tree,
}

impl GeoStore {
    /// Open (or create) the database directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GeoError> {
        let db = sled::open(path.as_ref())?;
        let rows = db.open_tree(ROWS_TREE)?;
        Ok(Self { db, rows })
    }

    /// Replace every stored row with `records`, keeping their order.
    pub fn replace_all<I>(&self, records: I) -> Result<usize, GeoError>
    where
        I: IntoIterator<Item = GeoRecord>,
    {
        self.rows.clear()?;
        let mut count: u32 = 0;
        for record in records {
            let bytes = bincode::serialize(&record)?;
            self.rows.insert(count.to_be_bytes(), bytes)?;
            count += 1;
        }
        self.db.flush()?;
        Ok(count as usize)
    }

    /// Import a CSV export, replacing the current table.
    pub fn import_csv<R: BufRead>(&self, reader: R) -> Result<ImportSummary, GeoError> {
        let (records, skipped) = read_csv_records(reader)?;
        let with_coordinates = records.iter().filter(|r| r.coordinates().is_some()).count();
        let imported = self.replace_all(records)?;
        info!(
            "Imported {} geo rows ({} with coordinates, {} skipped)",
            imported, with_coordinates, skipped
        );
        Ok(ImportSummary {
            imported,
            skipped,
            with_coordinates,
        })
    }

    /// Read every row back in import order.
    pub fn records(&self) -> Result<Vec<GeoRecord>, GeoError> {
        let mut out = Vec::with_capacity(self.rows.len());
        for entry in self.rows.iter() {
            let (_, value) = entry?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Build the in-memory lookup table.
    pub fn load_table(&self) -> Result<GeoTable, GeoError> {
        Ok(GeoTable::from_records(self.records()?))
    }
}

/// Load the table at `path`, or an empty one when the database does not exist yet.
pub fn load_table_or_empty<P: AsRef<Path>>(path: P) -> Result<GeoTable, GeoError> {
    let path = path.as_ref();
    if !path.exists() {
        warn!("Database not found: {}", path.display());
        warn!("Zipcode/prefix lookups will be disabled");
        return Ok(GeoTable::default());
    }
    let table = GeoStore::open(path)?.load_table()?;
    info!(
        "✅ Database ready: {} ({} rows)",
        path.display(),
        table.len()
    );
    Ok(table)
}

struct Columns {
    zipcode: usize,
    place: usize,
    extra: Option<usize>,
    prefix: usize,
    state: Option<usize>,
    lat: Option<usize>,
    lon: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self, GeoError> {
        let names: Vec<String> = header
            .trim_start_matches('\u{feff}')
            .split(';')
            .map(|h| clean_field(h).to_ascii_lowercase())
            .collect();
        let find = |candidates: &[&str]| names.iter().position(|n| candidates.contains(&n.as_str()));

        Ok(Columns {
            zipcode: find(&["plz", "zipcode"]).ok_or(GeoError::MissingColumn("Plz"))?,
            place: find(&["ort", "city"]).ok_or(GeoError::MissingColumn("Ort"))?,
            extra: find(&["zusatz", "additional"]),
            prefix: find(&["vorwahl", "prefix"]).ok_or(GeoError::MissingColumn("Vorwahl"))?,
            state: find(&["bundesland", "state"]),
            lat: find(&["latitude", "lat"]),
            lon: find(&["longitude", "lon"]),
        })
    }
}

fn clean_field(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim()
}

/// Parse CSV rows into records. Returns the records plus the number of skipped lines.
pub fn read_csv_records<R: BufRead>(reader: R) -> Result<(Vec<GeoRecord>, usize), GeoError> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Err(GeoError::EmptySource),
    };
    let columns = Columns::from_header(&header)?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (idx, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(';').map(clean_field).collect();
        let get = |i: usize| fields.get(i).copied().unwrap_or("");
        let opt = |i: Option<usize>| i.map(get).unwrap_or("");

        let zipcode = get(columns.zipcode);
        if zipcode.is_empty() {
            debug!("Skipping geo row {}: no zipcode", idx + 2);
            skipped += 1;
            continue;
        }

        records.push(GeoRecord {
            zipcode: zipcode.to_string(),
            place: get(columns.place).to_string(),
            extra: opt(columns.extra).to_string(),
            prefix: get(columns.prefix).to_string(),
            state: opt(columns.state).to_string(),
            lat: opt(columns.lat).parse().ok(),
            lon: opt(columns.lon).parse().ok(),
        });
    }
    Ok((records, skipped))
}
