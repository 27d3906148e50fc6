//! Reading the raw indicator tables and writing CSV tables to disk.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use polars::prelude::*;

use crate::error::Co2castError;

/// This module contains the names of the raw files that make up a dataset.
pub mod paths {
    pub const CO2_EMISSIONS: &str = "owid-co2-data.csv";
    pub const DEFORESTATION: &str = "annual-deforestation.csv";
    pub const TEMPERATURE: &str = "annual-temperature-anomalies.csv";
    pub const PRECIPITATION: &str = "average-precipitation-per-year.csv";
    pub const CO2_FOSSIL_LAND: &str = "co2-fossil-plus-land-use.csv";
    pub const DROUGHT: &str = "Drought affected annual number.csv";
    pub const GDP: &str = "GDP By Country.csv";
    pub const LAND_USAGE: &str = "land-use-over-the-long-term.csv";
    pub const CO2_SECTOR: &str = "per-capita-co2-sector.csv";
    pub const ALLOW_LIST: &str = "refined_countries.csv";
}
use paths as PATHS;

/// Read a CSV file with a header row, inferring the schema from the whole file.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
    debug!("read {} with shape {:?}", path.display(), df.shape());
    Ok(df)
}

/// Write a table as CSV, creating parent directories as needed.
pub fn save_csv<P: AsRef<Path>>(df: &mut DataFrame, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// The raw tables that the master panel is assembled from, as read from disk.
#[derive(Debug, Clone)]
pub struct RawSources {
    pub co2_emissions: DataFrame,
    pub deforestation: DataFrame,
    pub temperature: DataFrame,
    pub precipitation: DataFrame,
    pub co2_fossil_land: DataFrame,
    /// Wide table: one row per country, one column per year
    pub drought_wide: DataFrame,
    /// Wide table: one row per country, one column per year
    pub gdp_wide: DataFrame,
    pub land_usage: DataFrame,
    pub co2_sector: DataFrame,
    /// Countries allowed into the cohort
    pub allow_list: DataFrame,
}

fn read_source(raw_dir: &Path, file_name: &str) -> Result<DataFrame> {
    let path = raw_dir.join(file_name);
    if !path.is_file() {
        return Err(Co2castError::MissingSourceFile(path.display().to_string()).into());
    }
    read_csv(path)
}

impl RawSources {
    /// Read every raw table from `raw_dir`
    pub fn load<P: AsRef<Path>>(raw_dir: P) -> Result<Self> {
        let raw_dir = raw_dir.as_ref();
        info!("Reading raw sources from {}", raw_dir.display());
        Ok(Self {
            co2_emissions: read_source(raw_dir, PATHS::CO2_EMISSIONS)?,
            deforestation: read_source(raw_dir, PATHS::DEFORESTATION)?,
            temperature: read_source(raw_dir, PATHS::TEMPERATURE)?,
            precipitation: read_source(raw_dir, PATHS::PRECIPITATION)?,
            co2_fossil_land: read_source(raw_dir, PATHS::CO2_FOSSIL_LAND)?,
            drought_wide: read_source(raw_dir, PATHS::DROUGHT)?,
            gdp_wide: read_source(raw_dir, PATHS::GDP)?,
            land_usage: read_source(raw_dir, PATHS::LAND_USAGE)?,
            co2_sector: read_source(raw_dir, PATHS::CO2_SECTOR)?,
            allow_list: read_source(raw_dir, PATHS::ALLOW_LIST)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_df() -> DataFrame {
        df!(
            "country" => ["A", "A", "B"],
            "year" => [1990i64, 1991, 1990],
            "Annual CO₂ emissions" => [Some(1.5), None, Some(3.25)],
        )
        .unwrap()
    }

    #[test]
    fn csv_written_then_read_keeps_nulls_and_headers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("out.csv");
        let mut df = example_df();
        save_csv(&mut df, &path)?;
        let read = read_csv(&path)?;
        assert_eq!(read.shape(), (3, 3));
        assert_eq!(
            read.get_column_names(),
            vec!["country", "year", "Annual CO₂ emissions"]
        );
        assert_eq!(read.column("Annual CO₂ emissions")?.null_count(), 1);
        Ok(())
    }

    #[test]
    fn missing_raw_file_is_named_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RawSources::load(dir.path()).unwrap_err();
        let err = err.downcast::<Co2castError>().unwrap();
        match err {
            Co2castError::MissingSourceFile(path) => assert!(path.ends_with(PATHS::CO2_EMISSIONS)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
