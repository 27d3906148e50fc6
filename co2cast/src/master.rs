//! Assembly of the master country-year panel from the raw indicator tables.

use anyhow::Result;
use itertools::Itertools;
use log::{debug, info, warn};
use polars::prelude::*;

use crate::error::Co2castError;
use crate::sources::RawSources;
use crate::COL;

/// Generic code columns that collide between tables during merges. `iso_code` is retained.
const CODE_COLUMNS: [&str; 5] = ["code", "code_x", "code_y", "country code", "indicator code"];

/// Suffix polars gives to right-hand columns that collide with a left-hand column in a join
const COLLISION_SUFFIX: &str = "_right";

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

/// Drop generic 'Code' columns that collide during merges (retains `iso_code`).
pub fn drop_code_cols(df: DataFrame) -> PolarsResult<DataFrame> {
    let keep = column_names(&df)
        .into_iter()
        .filter(|name| !CODE_COLUMNS.contains(&name.to_lowercase().as_str()))
        .collect_vec();
    df.select(keep)
}

/// Rename `Entity`/`Year` to the canonical join keys and cast them to string and integer.
/// Year values that are not integers become null.
pub fn normalize_keys(mut df: DataFrame) -> Result<DataFrame> {
    for (raw, canonical) in [(COL::RAW_ENTITY, COL::COUNTRY), (COL::RAW_YEAR, COL::YEAR)] {
        if has_column(&df, raw) && !has_column(&df, canonical) {
            df.rename(raw, canonical)?;
        }
    }
    for key in [COL::COUNTRY, COL::YEAR] {
        if !has_column(&df, key) {
            return Err(Co2castError::MissingColumn(key.into()).into());
        }
    }
    Ok(df
        .lazy()
        .with_columns([
            col(COL::COUNTRY).cast(DataType::String),
            col(COL::YEAR).cast(DataType::Int64),
        ])
        .collect()?)
}

/// Unpivot a wide table with one column per year into `(country, year, value_name)` rows.
///
/// Every column whose header parses as an integer is treated as a year; other columns apart
/// from `id_col` are discarded. Values that cannot be read as numbers become null.
pub fn melt_wide_year(df: &DataFrame, id_col: &str, value_name: &str) -> Result<DataFrame> {
    let ids = df.column(id_col)?.cast(&DataType::String)?;
    let ids = ids.str()?;
    let year_columns = df
        .get_columns()
        .iter()
        .filter_map(|series| {
            series
                .name()
                .trim()
                .parse::<i64>()
                .ok()
                .map(|year| (year, series))
        })
        .collect_vec();
    debug!(
        "melting {} year columns of '{}' into '{}'",
        year_columns.len(),
        id_col,
        value_name
    );

    let capacity = year_columns.len() * df.height();
    let mut countries: Vec<Option<&str>> = Vec::with_capacity(capacity);
    let mut years: Vec<i64> = Vec::with_capacity(capacity);
    let mut values: Vec<Option<f64>> = Vec::with_capacity(capacity);
    for (year, series) in year_columns {
        let series = series.cast(&DataType::Float64)?;
        for (id, value) in ids.into_iter().zip(series.f64()?.into_iter()) {
            countries.push(id);
            years.push(year);
            values.push(value);
        }
    }
    Ok(DataFrame::new(vec![
        Series::new(COL::COUNTRY, countries),
        Series::new(COL::YEAR, years),
        Series::new(value_name, values),
    ])?)
}

/// Build the cohort of `(country, year, iso_code)` rows that every indicator is joined onto:
/// years within `[year_min, year_max]`, countries from the allow-list, deduplicated and sorted.
pub fn build_master_cohort(
    co2_emissions: &DataFrame,
    allow_list: &DataFrame,
    year_min: i64,
    year_max: i64,
) -> Result<DataFrame> {
    let allowed = allow_list
        .column(COL::RAW_ALLOW_LIST_COUNTRY)?
        .cast(&DataType::String)?;
    let cohort = co2_emissions
        .select([COL::COUNTRY, COL::YEAR, COL::ISO_CODE])?
        .lazy()
        .with_columns([
            col(COL::COUNTRY).cast(DataType::String),
            col(COL::YEAR).cast(DataType::Int64),
            col(COL::ISO_CODE).cast(DataType::String),
        ])
        .filter(
            col(COL::YEAR)
                .gt_eq(lit(year_min))
                .and(col(COL::YEAR).lt_eq(lit(year_max))),
        )
        .filter(col(COL::COUNTRY).is_in(lit(allowed)))
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?
        .sort([COL::COUNTRY, COL::YEAR], SortMultipleOptions::default())?;
    info!(
        "cohort has {} rows for {} countries",
        cohort.height(),
        cohort.column(COL::COUNTRY)?.n_unique()?
    );
    Ok(cohort)
}

/// Fail if any non-null `(country, year)` key appears more than once.
pub fn check_unique_keys(table: &str, df: &DataFrame) -> Result<()> {
    let countries = df.column(COL::COUNTRY)?.str()?;
    let years = df.column(COL::YEAR)?.i64()?;
    let duplicated: usize = countries
        .into_iter()
        .zip(years.into_iter())
        .filter_map(|(country, year)| Some((country?, year?)))
        .counts()
        .into_values()
        .filter(|&count| count > 1)
        .map(|count| count - 1)
        .sum();
    if duplicated > 0 {
        return Err(Co2castError::DuplicateKeys {
            table: table.into(),
            count: duplicated,
        }
        .into());
    }
    Ok(())
}

/// Drop both copies of every column that collided in the last join, like a suffixed merge
/// whose `_x`/`_y` columns are discarded.
fn drop_collision_columns(df: DataFrame) -> PolarsResult<DataFrame> {
    let names = column_names(&df);
    let collided = names
        .iter()
        .filter_map(|name| name.strip_suffix(COLLISION_SUFFIX))
        .map(str::to_string)
        .collect_vec();
    if collided.is_empty() {
        return Ok(df);
    }
    warn!("dropping columns duplicated by merge: {:?}", collided);
    let keep = names
        .into_iter()
        .filter(|name| {
            !name.ends_with(COLLISION_SUFFIX) && !collided.iter().any(|c| c == name)
        })
        .collect_vec();
    df.select(keep)
}

fn prepare_indicator(table: &str, df: DataFrame) -> Result<DataFrame> {
    let df = normalize_keys(drop_code_cols(df)?)?;
    check_unique_keys(table, &df)?;
    Ok(df)
}

/// Left-join every indicator table onto the cohort. The result has exactly one row per cohort
/// row; indicators without a match are null.
pub fn assemble_master(cohort: &DataFrame, sources: &RawSources) -> Result<DataFrame> {
    let drought = melt_wide_year(&sources.drought_wide, COL::RAW_DROUGHT_COUNTRY, COL::DROUGHT)?;
    let gdp = melt_wide_year(&sources.gdp_wide, COL::RAW_GDP_COUNTRY, COL::GDP)?;

    let country_year = vec![COL::COUNTRY, COL::YEAR];
    let country_year_iso = vec![COL::COUNTRY, COL::YEAR, COL::ISO_CODE];
    let indicators = [
        ("deforestation", sources.deforestation.clone(), &country_year),
        ("co2_emissions", sources.co2_emissions.clone(), &country_year_iso),
        ("temperature", sources.temperature.clone(), &country_year),
        ("precipitation", sources.precipitation.clone(), &country_year),
        ("co2_fossil_land", sources.co2_fossil_land.clone(), &country_year),
        ("drought", drought, &country_year),
        ("gdp", gdp, &country_year),
        ("land_usage", sources.land_usage.clone(), &country_year),
        ("co2_sector", sources.co2_sector.clone(), &country_year),
    ];

    let mut master = drop_code_cols(cohort.clone())?;
    for (table, df, keys) in indicators {
        let mut df = prepare_indicator(table, df)?;
        if keys.contains(&COL::ISO_CODE) {
            df = df
                .lazy()
                .with_column(col(COL::ISO_CODE).cast(DataType::String))
                .collect()?;
        }
        let on = keys.iter().map(|key| col(key)).collect_vec();
        // Aggregates such as "World" have no iso_code; null keys must still match
        let args = JoinArgs {
            join_nulls: keys.contains(&COL::ISO_CODE),
            ..JoinArgs::new(JoinType::Left)
        };
        master = master
            .lazy()
            .join(df.lazy(), on.clone(), on, args)
            .collect()?;
        master = drop_collision_columns(master)?;
        debug!("after joining '{table}': {:?}", master.shape());
    }

    let master = master.sort([COL::COUNTRY, COL::YEAR], SortMultipleOptions::default())?;
    info!(
        "master panel has {} rows and {} columns",
        master.height(),
        master.width()
    );
    Ok(master)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn co2_table() -> DataFrame {
        df!(
            "country" => ["X", "X", "X", "X", "X", "Y", "Y", "Z"],
            "year" => [1989i64, 1990, 1991, 1992, 2016, 1990, 1991, 1990],
            "iso_code" => ["XXX", "XXX", "XXX", "XXX", "XXX", "YYY", "YYY", "ZZZ"],
            "population" => [90.0, 100.0, 110.0, 121.0, 200.0, 5.0, 6.0, 7.0],
            "Annual CO₂ emissions" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        )
        .unwrap()
    }

    fn allow_list() -> DataFrame {
        df!("Country" => ["X", "Y"]).unwrap()
    }

    fn sources() -> RawSources {
        RawSources {
            co2_emissions: co2_table(),
            deforestation: df!(
                "Entity" => ["X", "Y"],
                "Code" => ["XXX", "YYY"],
                "Year" => [1990i64, 1991],
                "Deforestation" => [12.5, 3.0],
            )
            .unwrap(),
            temperature: df!(
                "Entity" => ["X", "X", "X"],
                "Code" => ["XXX", "XXX", "XXX"],
                "Year" => [1990i64, 1991, 1992],
                "Temperature anomaly" => [0.1, 0.2, 0.3],
            )
            .unwrap(),
            precipitation: df!(
                "Entity" => ["X"],
                "Code" => ["XXX"],
                "Year" => [1990i64],
                "Annual precipitation" => [800.0],
            )
            .unwrap(),
            co2_fossil_land: df!(
                "Entity" => ["X", "Y"],
                "Code" => ["XXX", "YYY"],
                "Year" => [1990i64, 1990],
                "Annual CO₂ emissions including land-use change" => [3.0, 7.0],
            )
            .unwrap(),
            drought_wide: df!(
                "Drought affected" => ["X", "Y"],
                "1990" => [Some(1.0), None],
                "1991" => [Some(2.0), Some(4.0)],
            )
            .unwrap(),
            gdp_wide: df!(
                "Country Name" => ["X", "Y"],
                "Country Code" => ["XXX", "YYY"],
                "Indicator Name" => ["GDP", "GDP"],
                "Indicator Code" => ["NY.GDP", "NY.GDP"],
                "1990" => [1000.0, 50.0],
                "1991" => [1100.0, 55.0],
                "1992" => [1210.0, 60.0],
            )
            .unwrap(),
            land_usage: df!(
                "Entity" => ["X"],
                "Code" => ["XXX"],
                "Year" => [1991i64],
                "Land use" => [42.0],
            )
            .unwrap(),
            co2_sector: df!(
                "Entity" => ["Y"],
                "Code" => ["YYY"],
                "Year" => [1990i64],
                "Per capita carbon dioxide emissions from transport" => [0.5],
            )
            .unwrap(),
            allow_list: allow_list(),
        }
    }

    fn key_pairs(df: &DataFrame) -> Vec<(String, i64)> {
        let countries = df.column(COL::COUNTRY).unwrap().str().unwrap();
        let years = df.column(COL::YEAR).unwrap().i64().unwrap();
        countries
            .into_iter()
            .zip(years.into_iter())
            .map(|(c, y)| (c.unwrap().to_string(), y.unwrap()))
            .collect()
    }

    #[test]
    fn cohort_respects_year_bounds_and_allow_list() -> Result<()> {
        let cohort = build_master_cohort(&co2_table(), &allow_list(), 1990, 2015)?;
        let pairs = key_pairs(&cohort);
        assert_eq!(
            pairs,
            vec![
                ("X".to_string(), 1990),
                ("X".to_string(), 1991),
                ("X".to_string(), 1992),
                ("Y".to_string(), 1990),
                ("Y".to_string(), 1991),
            ]
        );
        assert!(pairs.iter().all(|(_, year)| *year != 1989 && *year != 2016));
        assert!(pairs.iter().all(|(country, _)| country != "Z"));
        Ok(())
    }

    #[test]
    fn cohort_is_deduplicated() -> Result<()> {
        let co2 = df!(
            "country" => ["X", "X"],
            "year" => [1990i64, 1990],
            "iso_code" => ["XXX", "XXX"],
        )?;
        let cohort = build_master_cohort(&co2, &allow_list(), 1980, 2018)?;
        assert_eq!(cohort.height(), 1);
        Ok(())
    }

    #[test]
    fn melt_turns_year_columns_into_rows() -> Result<()> {
        let gdp = sources().gdp_wide;
        let long = melt_wide_year(&gdp, "Country Name", "GDP")?;
        assert_eq!(long.shape(), (6, 3));
        assert_eq!(long.get_column_names(), vec!["country", "year", "GDP"]);
        let years = long.column("year")?.i64()?.into_no_null_iter().collect_vec();
        assert_eq!(years, vec![1990, 1990, 1991, 1991, 1992, 1992]);
        Ok(())
    }

    #[test]
    fn code_columns_are_dropped_but_iso_code_kept() -> Result<()> {
        let df = df!(
            "country" => ["X"],
            "Code" => ["XXX"],
            "Country Code" => ["XXX"],
            "iso_code" => ["XXX"],
        )?;
        let dropped = drop_code_cols(df)?;
        assert_eq!(dropped.get_column_names(), vec!["country", "iso_code"]);
        Ok(())
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let df = df!(
            "country" => ["X", "X", "Y"],
            "year" => [1990i64, 1990, 1990],
        )
        .unwrap();
        let err = check_unique_keys("dupes", &df).unwrap_err();
        match err.downcast::<Co2castError>().unwrap() {
            Co2castError::DuplicateKeys { table, count } => {
                assert_eq!(table, "dupes");
                assert_eq!(count, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn aggregate_without_iso_code_keeps_its_indicators() -> Result<()> {
        let mut sources = sources();
        sources.co2_emissions = df!(
            "country" => ["W", "W"],
            "year" => [1990i64, 1991],
            "iso_code" => [None::<&str>, None],
            "population" => [100.0, 110.0],
        )?;
        sources.allow_list = df!("Country" => ["W"])?;
        let cohort = build_master_cohort(&sources.co2_emissions, &sources.allow_list, 1990, 2015)?;
        assert_eq!(cohort.height(), 2);
        let master = assemble_master(&cohort, &sources)?;
        let population = master.column("population")?.f64()?.into_iter().collect_vec();
        assert_eq!(population, vec![Some(100.0), Some(110.0)]);
        Ok(())
    }

    #[test]
    fn colliding_columns_are_dropped_on_both_sides() -> Result<()> {
        let mut sources = sources();
        sources.temperature = df!(
            "Entity" => ["X"],
            "Year" => [1990i64],
            "population" => [1.0],
            "Temperature anomaly" => [0.1],
        )?;
        let cohort = build_master_cohort(&sources.co2_emissions, &sources.allow_list, 1990, 2015)?;
        let master = assemble_master(&cohort, &sources)?;
        assert_eq!(master.height(), cohort.height());
        assert!(master.column("population").is_err());
        assert!(master.column("Temperature anomaly").is_ok());
        Ok(())
    }

    #[test]
    fn master_keeps_every_cohort_row_and_nothing_else() -> Result<()> {
        let sources = sources();
        let cohort = build_master_cohort(&sources.co2_emissions, &sources.allow_list, 1990, 2015)?;
        let master = assemble_master(&cohort, &sources)?;

        assert_eq!(master.height(), cohort.height());
        let cohort_keys: HashSet<_> = key_pairs(&cohort).into_iter().collect();
        assert!(key_pairs(&master)
            .into_iter()
            .all(|key| cohort_keys.contains(&key)));

        // Unmatched indicators surface as nulls, not zeros
        let deforestation = master.column("Deforestation")?.f64()?;
        assert_eq!(deforestation.null_count(), 3);
        let gdp = master.column("GDP")?.f64()?.into_iter().collect_vec();
        assert_eq!(
            gdp,
            vec![Some(1000.0), Some(1100.0), Some(1210.0), Some(50.0), Some(55.0)]
        );
        assert!(!master
            .get_column_names()
            .iter()
            .any(|name| name.ends_with(COLLISION_SUFFIX) || name.to_lowercase() == "code"));
        Ok(())
    }
}
