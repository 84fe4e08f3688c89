//! Binary bundle persistence for records and cluster assignments.

use crate::error::Result;
use bincode::Options;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Fixed-width little-endian encoding; floats are stored bit-exact.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

pub(crate) fn save<T: serde::Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    codec().serialize_into(&mut writer, value)?;
    writer.flush()?;
    tracing::debug!("saved bundle to {}", path.as_ref().display());
    Ok(())
}

pub(crate) fn load<T: serde::de::DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    Ok(codec().deserialize_from(reader)?)
}
