use anyhow::Result;
use itertools::Itertools;
use log::debug;
use polars::prelude::*;

use crate::error::Co2castError;
use crate::COL;

/// Natural log where it is defined. Missing, non-positive and NaN inputs map to `None`.
pub fn log_safe(values: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|value| value.filter(|v| *v > 0.0).map(f64::ln))
        .collect()
}

/// [`log_safe`] over a numeric series, keeping its name.
pub fn log_safe_series(series: &Series) -> Result<Series> {
    let values = series
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .collect_vec();
    Ok(Series::new(series.name(), log_safe(&values)))
}

/// Add `deforestation_intensity = Deforestation / Annual_CO₂_emissions_including_land-use_change`.
/// A zero denominator gives null.
pub fn add_deforestation_intensity(df: &DataFrame) -> Result<DataFrame> {
    let denominator = col(COL::CO2_INCLUDING_LAND_USE).cast(DataType::Float64);
    Ok(df
        .clone()
        .lazy()
        .with_column(
            when(denominator.clone().eq(lit(0.0)))
                .then(lit(NULL).cast(DataType::Float64))
                .otherwise(col(COL::DEFORESTATION).cast(DataType::Float64) / denominator)
                .alias(COL::DEFORESTATION_INTENSITY),
        )
        .collect()?)
}

/// One country's rows of the panel, ordered by year.
#[derive(Debug, Clone)]
pub struct CountryPanel {
    pub country: String,
    pub df: DataFrame,
}

impl CountryPanel {
    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub fn years(&self) -> Result<Vec<i64>> {
        let years = self.df.column(COL::YEAR)?.cast(&DataType::Int64)?;
        years
            .i64()?
            .into_iter()
            .map(|year| year.ok_or_else(|| Co2castError::MissingValue(COL::YEAR.into()).into()))
            .collect()
    }

    /// Values of `column` as floats; errors if the column is absent.
    pub fn values(&self, column: &str) -> Result<Vec<Option<f64>>> {
        let series = self
            .df
            .column(column)
            .map_err(|_| Co2castError::MissingColumn(column.into()))?
            .cast(&DataType::Float64)?;
        Ok(series.f64()?.into_iter().collect())
    }

    pub fn log_values(&self, column: &str) -> Result<Vec<Option<f64>>> {
        Ok(log_safe(&self.values(column)?))
    }
}

/// Slice the panel to `country` and sort by year. Errors when the country has no rows.
pub fn country_panel(df: &DataFrame, country: &str) -> Result<CountryPanel> {
    let rows = df
        .clone()
        .lazy()
        .filter(col(COL::COUNTRY).eq(lit(country)))
        .sort([COL::YEAR], SortMultipleOptions::default())
        .collect()?;
    if rows.height() == 0 {
        return Err(Co2castError::UnknownCountry(country.into()).into());
    }
    debug!("panel for {country} has {} rows", rows.height());
    Ok(CountryPanel {
        country: country.into(),
        df: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel() -> DataFrame {
        df!(
            "country" => ["X", "Y", "X", "X"],
            "year" => [1992i64, 1990, 1990, 1991],
            "population" => [121.0, 5.0, 100.0, 110.0],
            "Deforestation" => [Some(2.0), None, Some(4.0), Some(1.0)],
            "Annual_CO₂_emissions_including_land-use_change" => [4.0, 1.0, 0.0, 2.0],
        )
        .unwrap()
    }

    #[test]
    fn log_of_growing_population_is_increasing() -> Result<()> {
        let panel = country_panel(&panel(), "X")?;
        assert_eq!(panel.years()?, vec![1990, 1991, 1992]);
        let logs = panel.log_values("population")?;
        assert_eq!(
            logs,
            vec![
                Some(100f64.ln()),
                Some(110f64.ln()),
                Some(121f64.ln())
            ]
        );
        assert!(logs.iter().tuple_windows().all(|(a, b)| a < b));
        Ok(())
    }

    #[test]
    fn log_of_non_positive_is_missing() {
        assert_eq!(
            log_safe(&[Some(0.0), Some(-3.0), None, Some(1.0)]),
            vec![None, None, None, Some(0.0)]
        );
    }

    #[test]
    fn log_series_keeps_name_and_nulls() -> Result<()> {
        let series = Series::new("GDP", [Some(1i64), Some(0), None]);
        let logged = log_safe_series(&series)?;
        assert_eq!(logged.name(), "GDP");
        assert_eq!(logged.null_count(), 2);
        Ok(())
    }

    #[test]
    fn unknown_country_is_an_error() {
        let err = country_panel(&panel(), "Atlantis").unwrap_err();
        assert!(matches!(
            err.downcast::<Co2castError>().unwrap(),
            Co2castError::UnknownCountry(_)
        ));
    }

    #[test]
    fn missing_column_is_an_error() -> Result<()> {
        let panel = country_panel(&panel(), "Y")?;
        let err = panel.values("GDP").unwrap_err();
        assert!(matches!(
            err.downcast::<Co2castError>().unwrap(),
            Co2castError::MissingColumn(_)
        ));
        Ok(())
    }

    #[test]
    fn deforestation_intensity_nulls_zero_denominator() -> Result<()> {
        let df = add_deforestation_intensity(&panel())?;
        let intensity = df
            .column("deforestation_intensity")?
            .f64()?
            .into_iter()
            .collect_vec();
        assert_eq!(intensity, vec![Some(0.5), None, None, Some(0.5)]);
        Ok(())
    }
}
