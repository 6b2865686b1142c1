use thiserror::Error;

use crate::{fit::levenberg_marquardt::LmFailure, ranges::FitWindow, samples::RunKey};

#[derive(Error, Debug)]
pub enum RatescanError {
    #[error("Missing column in the sample table: {0}")]
    MissingColumn(String),

    #[error("Invalid value in column {column} at row {row}: {value}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("No run metadata (ontime) found for {0}")]
    MissingMetadata(RunKey),

    #[error("Invalid ontime {ontime} for {key}")]
    InvalidOntime { key: RunKey, ontime: f64 },

    #[error("No zero-threshold sample to count the events of {0}")]
    MissingEventCount(RunKey),

    #[error("Run metadata query failed: {0}")]
    MetadataQuery(String),

    #[error("The {0} window of the ratescan contains no rows")]
    EmptyWindow(FitWindow),

    #[error("The {window} fit did not converge: {reason}")]
    FitConvergence { window: FitWindow, reason: LmFailure },

    #[error("ROOTS finding error: {0}")]
    RootFindingError(#[from] roots::SearchError),

    #[error("No threshold with a rate below {0} to seed the root finder")]
    NoSeedThreshold(f64),

    #[error("Root finder returned a non-finite threshold: {0}")]
    NonFiniteRoot(f64),

    #[error("Invalid ratescan parameter: {0}")]
    InvalidRatescanParameter(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

impl RatescanError {
    /// True for failures of the threshold solver (no seed, no convergence, non-finite root).
    pub fn is_root_finding(&self) -> bool {
        matches!(
            self,
            RatescanError::RootFindingError(_)
                | RatescanError::NoSeedThreshold(_)
                | RatescanError::NonFiniteRoot(_)
        )
    }
}

impl PartialEq for RatescanError {
    fn eq(&self, other: &Self) -> bool {
        use RatescanError::*;
        match (self, other) {
            (MissingColumn(a), MissingColumn(b)) => a == b,
            (
                InvalidValue {
                    column: c1,
                    row: r1,
                    value: v1,
                },
                InvalidValue {
                    column: c2,
                    row: r2,
                    value: v2,
                },
            ) => c1 == c2 && r1 == r2 && v1 == v2,
            (MissingMetadata(a), MissingMetadata(b)) => a == b,
            (
                InvalidOntime {
                    key: k1,
                    ontime: o1,
                },
                InvalidOntime {
                    key: k2,
                    ontime: o2,
                },
            ) => k1 == k2 && (o1 == o2 || (o1.is_nan() && o2.is_nan())),
            (MissingEventCount(a), MissingEventCount(b)) => a == b,
            (MetadataQuery(a), MetadataQuery(b)) => a == b,
            (EmptyWindow(a), EmptyWindow(b)) => a == b,
            (
                FitConvergence {
                    window: w1,
                    reason: r1,
                },
                FitConvergence {
                    window: w2,
                    reason: r2,
                },
            ) => w1 == w2 && r1 == r2,
            (RootFindingError(a), RootFindingError(b)) => a == b,
            (NoSeedThreshold(a), NoSeedThreshold(b)) => a == b,
            (NonFiniteRoot(a), NonFiniteRoot(b)) => a.to_bits() == b.to_bits(),
            (InvalidRatescanParameter(a), InvalidRatescanParameter(b)) => a == b,

            // Not comparable: same variant is enough
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,

            _ => false,
        }
    }
}
