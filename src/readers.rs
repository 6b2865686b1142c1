//! # CSV ingestion
//!
//! * [`read_samples_csv`] – load the key columns of a sample dump into a [`SampleTable`].
//! * [`read_run_metadata_csv`] – load a run-database dump into a [`RunMetadataTable`].
//!
//! Sample columns are typed per column: a column whose every field parses as an integer is
//! stored as integers, otherwise as floats. Only the columns named by the [`ColumnKeys`] are
//! kept; absent ones are reported later by the operation that needs them.
use camino::Utf8Path;

use crate::{
    metadata::{RunMetadata, RunMetadataTable},
    ratescan_errors::RatescanError,
    samples::{Column, ColumnKeys, SampleTable},
};

/// Read a sample table from a CSV file with a header row.
///
/// Arguments
/// -----------------
/// * `path` – CSV file.
/// * `keys` – names of the columns to load; other columns are ignored.
///
/// Return
/// ----------
/// * The table, [`RatescanError::InvalidValue`] for a field that is not a number,
///   [`RatescanError::IoError`] / [`RatescanError::CsvError`] for unreadable files.
pub fn read_samples_csv(path: &Utf8Path, keys: &ColumnKeys) -> Result<SampleTable, RatescanError> {
    let mut reader = csv::Reader::from_path(path)?;
    let wanted: Vec<(usize, String)> = reader
        .headers()?
        .iter()
        .enumerate()
        .filter(|(_, name)| keys.all().contains(name))
        .map(|(i, name)| (i, name.to_string()))
        .collect();

    let mut raw: Vec<Vec<String>> = vec![Vec::new(); wanted.len()];
    for record in reader.records() {
        let record = record?;
        for (slot, (idx, _)) in raw.iter_mut().zip(&wanted) {
            slot.push(record.get(*idx).unwrap_or_default().trim().to_string());
        }
    }

    let mut table = SampleTable::new();
    for ((_, name), fields) in wanted.into_iter().zip(raw) {
        let column = parse_column(&name, &fields)?;
        table = table.with_column(name, column)?;
    }
    log::debug!("read {} samples from {path}", table.len());
    Ok(table)
}

fn parse_column(name: &str, fields: &[String]) -> Result<Column, RatescanError> {
    if let Ok(ints) = fields
        .iter()
        .map(|f| f.parse::<i64>())
        .collect::<Result<Vec<i64>, _>>()
    {
        return Ok(Column::Int(ints));
    }
    fields
        .iter()
        .enumerate()
        .map(|(row, f)| {
            f.parse::<f64>().map_err(|_| RatescanError::InvalidValue {
                column: name.to_string(),
                row,
                value: f.clone(),
            })
        })
        .collect::<Result<Vec<f64>, _>>()
        .map(Column::Float)
}

/// Read run metadata from a CSV file with columns `night`, `run_id`, `ontime` and
/// `current_at_start` (the last two may be empty).
pub fn read_run_metadata_csv(path: &Utf8Path) -> Result<RunMetadataTable, RatescanError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize::<RunMetadata>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RunMetadataTable::new(rows))
}
