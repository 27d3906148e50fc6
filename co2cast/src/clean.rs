use anyhow::Result;
use itertools::Itertools;
use log::{debug, info, warn};
use polars::prelude::*;

use crate::COL;

/// Columns the cleaned panel is restricted to, in output order
pub const COLUMNS_TO_KEEP: [&str; 19] = [
    COL::COUNTRY,
    COL::YEAR,
    COL::DEFORESTATION,
    COL::TEMPERATURE_ANOMALY,
    COL::ANNUAL_PRECIPITATION,
    COL::CO2,
    COL::CO2_INCLUDING_LAND_USE,
    COL::CO2_FROM_LAND_USE,
    COL::ANNUAL_CO2_EMISSIONS,
    COL::POPULATION,
    COL::GDP,
    COL::PER_CAPITA_BUILDINGS,
    COL::PER_CAPITA_ELECTRICITY_AND_HEAT,
    COL::PER_CAPITA_INDUSTRY,
    COL::PER_CAPITA_BUNKER_FUELS,
    COL::PER_CAPITA_LAND_USE_CHANGE_AND_FORESTRY,
    COL::PER_CAPITA_TRANSPORT,
    COL::PER_CAPITA_MANUFACTURING_AND_CONSTRUCTION,
    COL::PER_CAPITA_OTHER_FUEL_COMBUSTION,
];

/// The one kept column that is allowed to stay sparse through cleaning
const SPARSE_COLUMN: &str = COL::DEFORESTATION;

/// Restrict the master panel to the `[year_min, year_max]` window and to the `keep_cols` that
/// exist in it. Spaces in column names are replaced by underscores first.
pub fn filter_years_and_columns(
    master: &DataFrame,
    year_min: i64,
    year_max: i64,
    keep_cols: &[&str],
) -> Result<DataFrame> {
    let mut df = master.clone();
    for name in df
        .get_column_names()
        .into_iter()
        .filter(|name| name.contains(' '))
        .map(str::to_string)
        .collect_vec()
    {
        df.rename(&name, &name.replace(' ', "_"))?;
    }

    let available = keep_cols
        .iter()
        .filter(|name| df.column(name).is_ok())
        .map(|name| col(name))
        .collect_vec();
    let missing = keep_cols
        .iter()
        .filter(|name| df.column(name).is_err())
        .collect_vec();
    if !missing.is_empty() {
        warn!("columns not present in master panel: {:?}", missing);
    }

    let filtered = df
        .lazy()
        .with_column(col(COL::YEAR).cast(DataType::Int64))
        .filter(
            col(COL::YEAR)
                .gt_eq(lit(year_min))
                .and(col(COL::YEAR).lt_eq(lit(year_max))),
        )
        .select(available)
        .collect()?;
    info!(
        "filtered panel to {year_min}-{year_max}: {} rows, {} columns",
        filtered.height(),
        filtered.width()
    );
    Ok(filtered)
}

/// Linear interpolation over positions. Gaps before the first or after the last known value
/// take that value. A series with no known values is returned unchanged.
pub fn interpolate_linear(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let known = values
        .iter()
        .enumerate()
        .filter_map(|(idx, value)| value.filter(|v| !v.is_nan()).map(|v| (idx, v)))
        .collect_vec();
    let (Some(&(first_idx, first)), Some(&(last_idx, last))) = (known.first(), known.last())
    else {
        return values.to_vec();
    };

    let mut out = Vec::with_capacity(values.len());
    let mut segment = known.iter().tuple_windows::<(_, _)>().peekable();
    for idx in 0..values.len() {
        let value = if idx <= first_idx {
            first
        } else if idx >= last_idx {
            last
        } else {
            while let Some(&(_, &(right_idx, _))) = segment.peek() {
                if right_idx >= idx {
                    break;
                }
                segment.next();
            }
            match segment.peek() {
                Some(&(&(left_idx, left), &(right_idx, right))) => {
                    let t = (idx - left_idx) as f64 / (right_idx - left_idx) as f64;
                    left + t * (right - left)
                }
                None => last,
            }
        };
        out.push(Some(value));
    }
    out
}

/// Drop rows with a null in any column other than `Deforestation`, round the float columns to
/// `round_decimals`, then linearly interpolate whatever gaps remain.
pub fn clean_interpolate(df: &DataFrame, round_decimals: u32) -> Result<DataFrame> {
    let required = df
        .get_column_names()
        .into_iter()
        .filter(|name| *name != SPARSE_COLUMN)
        .map(str::to_string)
        .collect_vec();
    let complete = df.drop_nulls(Some(required.as_slice()))?;
    if complete.height() < df.height() {
        warn!(
            "dropped {} rows with missing required values",
            df.height() - complete.height()
        );
    }

    let float_columns = complete
        .get_columns()
        .iter()
        .filter(|series| series.dtype().is_float())
        .map(|series| series.name().to_string())
        .collect_vec();
    let mut rounded = complete
        .lazy()
        .with_columns(
            float_columns
                .iter()
                .map(|name| col(name).cast(DataType::Float64).round(round_decimals))
                .collect_vec(),
        )
        .collect()?;

    for name in &float_columns {
        let series = rounded.column(name)?;
        if series.null_count() == 0 {
            continue;
        }
        debug!("interpolating {} gaps in '{}'", series.null_count(), name);
        let values = series.f64()?.into_iter().collect_vec();
        rounded.with_column(Series::new(name, interpolate_linear(&values)))?;
    }
    info!("cleaned panel has {} rows", rounded.height());
    Ok(rounded)
}

/// Draw up to `n` rows without replacement.
pub fn sample_rows(df: &DataFrame, n: usize, seed: u64) -> PolarsResult<DataFrame> {
    df.sample_n_literal(n.min(df.height()), false, false, Some(seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> DataFrame {
        df!(
            "country" => ["X", "X", "X", "X", "Y"],
            "year" => [1989i64, 1990, 1991, 2016, 1990],
            "Deforestation" => [None, Some(1.0), None, None, Some(4.0)],
            "Annual CO₂ emissions" => [1.0, 2.0, 3.0, 4.0, 5.0],
            "population" => [10.0, 11.0, 12.0, 13.0, 14.0],
            "Land use" => [1.0, 1.0, 1.0, 1.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn filter_stays_within_allowlist_and_years() -> Result<()> {
        let filtered = filter_years_and_columns(&master(), 1990, 2015, &COLUMNS_TO_KEEP)?;
        assert!(filtered
            .get_column_names()
            .iter()
            .all(|name| COLUMNS_TO_KEEP.contains(name)));
        assert_eq!(
            filtered.get_column_names(),
            vec!["country", "year", "Deforestation", "Annual_CO₂_emissions", "population"]
        );
        let years = filtered.column("year")?.i64()?;
        assert!(years
            .into_no_null_iter()
            .all(|year| (1990..=2015).contains(&year)));
        assert_eq!(filtered.height(), 3);
        Ok(())
    }

    #[test]
    fn interpolation_fills_interior_and_edges() {
        let values = [None, Some(1.0), None, None, Some(4.0), None];
        assert_eq!(
            interpolate_linear(&values),
            vec![Some(1.0), Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(4.0)]
        );
        assert_eq!(interpolate_linear(&[None, None]), vec![None, None]);
        assert_eq!(interpolate_linear(&[]), Vec::<Option<f64>>::new());
    }

    #[test]
    fn interpolation_spans_several_segments() {
        let values = [Some(0.0), None, Some(2.0), None, None, Some(8.0)];
        assert_eq!(
            interpolate_linear(&values),
            vec![Some(0.0), Some(1.0), Some(2.0), Some(4.0), Some(6.0), Some(8.0)]
        );
    }

    #[test]
    fn clean_drops_incomplete_rows_but_keeps_sparse_deforestation() -> Result<()> {
        let df = df!(
            "country" => ["X", "X", "X", "X"],
            "year" => [1990i64, 1991, 1992, 1993],
            "Deforestation" => [Some(1.0), None, Some(3.0), None],
            "population" => [Some(1.004), Some(2.0), None, Some(4.0)],
        )?;
        let cleaned = clean_interpolate(&df, 2)?;
        assert_eq!(cleaned.height(), 3);
        let population = cleaned.column("population")?.f64()?.into_iter().collect_vec();
        assert_eq!(population, vec![Some(1.0), Some(2.0), Some(4.0)]);
        let deforestation = cleaned
            .column("Deforestation")?
            .f64()?
            .into_iter()
            .collect_vec();
        assert_eq!(deforestation, vec![Some(1.0), Some(1.0), Some(1.0)]);
        Ok(())
    }

    #[test]
    fn clean_is_idempotent_on_clean_panel() -> Result<()> {
        let df = df!(
            "country" => ["X", "X", "Y"],
            "year" => [1990i64, 1991, 1990],
            "Deforestation" => [1.25, 2.5, 3.75],
            "population" => [100.0, 110.0, 121.0],
        )?;
        let once = clean_interpolate(&df, 2)?;
        let twice = clean_interpolate(&once, 2)?;
        assert!(once.equals_missing(&df));
        assert!(twice.equals_missing(&once));
        Ok(())
    }

    #[test]
    fn sample_never_exceeds_height() -> Result<()> {
        let df = master();
        assert_eq!(sample_rows(&df, 500, 42)?.height(), df.height());
        assert_eq!(sample_rows(&df, 2, 42)?.height(), 2);
        assert!(sample_rows(&df, 3, 7)?.equals_missing(&sample_rows(&df, 3, 7)?));
        Ok(())
    }
}
