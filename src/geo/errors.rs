use thiserror::Error;

/// Errors that can arise while building or loading the geo lookup table.
#[derive(Debug, Error)]
pub enum GeoError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (reading the CSV source, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV header lacks a column the importer cannot do without.
    #[error("csv header is missing required column '{0}'")]
    MissingColumn(&'static str),

    /// The CSV source has no header line at all.
    #[error("csv source is empty")]
    EmptySource,
}
