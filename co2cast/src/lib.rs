use std::path::{Path, PathBuf};

use anyhow::Result;
use itertools::Itertools;
use log::{debug, info, warn};
use polars::prelude::*;

use crate::clean::{clean_interpolate, filter_years_and_columns, sample_rows, COLUMNS_TO_KEEP};
use crate::config::Config;
use crate::distribution::{fit_student_t, ks_two_sample, synthetic_from_t};
use crate::features::{country_panel, log_safe};
use crate::forecast::Forecast;
use crate::master::{assemble_master, build_master_cohort};
use crate::modeling::ModelKind;
use crate::sources::{read_csv, save_csv, RawSources};
use crate::trace::PosteriorTrace;

// Re-exports
pub use column_names as COL;

// Modules
pub mod clean;
pub mod column_names;
pub mod config;
pub mod distribution;
pub mod error;
pub mod features;
pub mod forecast;
pub mod master;
pub mod modeling;
pub mod sampler;
pub mod sources;
pub mod trace;
pub mod viz;

/// File name of the cleaned panel written by [`Co2cast::make_dataset`]
pub const CLEANED_PANEL_FILE: &str = "Master_filtered_df_cleaned.csv";
/// File name of the random sample of the cleaned panel
pub const SAMPLE_FILE: &str = "sample.csv";
/// File name of the Student-t reference fits written by [`Co2cast::explore`]
pub const DISTRIBUTION_FITS_FILE: &str = "distribution_fits.csv";

const TOP_EMITTERS: usize = 10;
const GRID_COLUMNS: usize = 3;

/// What [`Co2cast::make_dataset`] wrote
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub cleaned_path: PathBuf,
    pub sample_path: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub countries: usize,
    pub sample_rows: usize,
}

/// What [`Co2cast::explore`] wrote
#[derive(Debug, Clone)]
pub struct ExploreReport {
    pub figures: Vec<PathBuf>,
    /// One row per numeric indicator: the Student-t fit of its log values and a
    /// Kolmogorov-Smirnov comparison against synthetic draws from that fit
    pub fits: DataFrame,
    pub fits_path: PathBuf,
}

/// Type for the co2cast pipeline
#[derive(Debug, Clone, Default)]
pub struct Co2cast {
    pub config: Config,
}

impl Co2cast {
    /// Setup the pipeline with default configuration
    pub fn new() -> Self {
        Self::new_with_config(Config::default())
    }

    /// Setup the pipeline with custom configuration
    pub fn new_with_config(config: Config) -> Self {
        debug!("config: {config:?}");
        Self { config }
    }

    /// Merge the raw tables in `raw_dir` into the cleaned country-year panel and write it, plus a
    /// random sample of it, to `out_dir`.
    pub fn make_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        raw_dir: P,
        out_dir: Q,
    ) -> Result<DatasetSummary> {
        let sources = RawSources::load(raw_dir)?;
        let (cohort_min, cohort_max) = self.config.cohort_years;
        let cohort =
            build_master_cohort(&sources.co2_emissions, &sources.allow_list, cohort_min, cohort_max)?;
        let master = assemble_master(&cohort, &sources)?;
        let (year_min, year_max) = self.config.panel_years;
        let filtered = filter_years_and_columns(&master, year_min, year_max, &COLUMNS_TO_KEEP)?;
        let mut cleaned = clean_interpolate(&filtered, self.config.round_decimals)?;
        if cleaned.height() == 0 {
            warn!("the cleaned panel is empty");
        }

        let out_dir = out_dir.as_ref();
        let cleaned_path = out_dir.join(CLEANED_PANEL_FILE);
        save_csv(&mut cleaned, &cleaned_path)?;
        let mut sample = sample_rows(&cleaned, self.config.sample_rows, self.config.sample_seed)?;
        let sample_path = out_dir.join(SAMPLE_FILE);
        save_csv(&mut sample, &sample_path)?;
        info!(
            "Saved {} ({} rows) and {}",
            cleaned_path.display(),
            cleaned.height(),
            sample_path.display()
        );

        Ok(DatasetSummary {
            cleaned_path,
            sample_path,
            rows: cleaned.height(),
            columns: cleaned.width(),
            countries: cleaned.column(COL::COUNTRY)?.n_unique()?,
            sample_rows: sample.height(),
        })
    }

    /// Fit `kind` for `country` on the panel at `data` and save the trace into `models_dir`.
    pub fn train<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        data: P,
        models_dir: Q,
        country: &str,
        kind: ModelKind,
    ) -> Result<(PosteriorTrace, PathBuf)> {
        let df = read_csv(data)?;
        let panel = country_panel(&df, country)?;
        let trace = modeling::fit(kind, &panel, &self.config.sampler)?;
        let path = trace.save(models_dir)?;
        Ok((trace, path))
    }

    /// Extend the trend stored in the trace at `trace_path` over `country` by `horizon` years.
    pub fn forecast<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        data: P,
        trace_path: Q,
        country: &str,
        horizon: usize,
    ) -> Result<Forecast> {
        let df = read_csv(data)?;
        let panel = country_panel(&df, country)?;
        let trace = PosteriorTrace::load(trace_path)?;
        forecast::forecast(&panel, &trace, horizon)
    }

    /// Write the forecast chart as `forecast_{country}_{model_tag}.png` into `save_dir`.
    pub fn save_forecast_plot<P: AsRef<Path>>(
        &self,
        forecast: &Forecast,
        save_dir: P,
    ) -> Result<PathBuf> {
        viz::save_png(
            save_dir.as_ref().join(forecast.file_name()),
            viz::FORECAST_SIZE,
            |area| viz::draw_forecast(area, forecast),
        )
    }

    /// Write the exploratory charts of the panel at `data` into `out_dir`, along with a table of
    /// Student-t reference fits for every numeric indicator.
    pub fn explore<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        data: P,
        out_dir: Q,
    ) -> Result<ExploreReport> {
        let df = read_csv(data)?;
        let out_dir = out_dir.as_ref();
        let n_grid = viz::numeric_columns(&df).len().div_ceil(GRID_COLUMNS).max(1) as u32;
        let grid_size = (GRID_COLUMNS as u32 * 400, n_grid * 320);

        let figures = vec![
            viz::save_png(out_dir.join("null_counts.png"), viz::CHART_SIZE, |area| {
                viz::draw_null_counts(area, &df)
            })?,
            viz::save_png(
                out_dir.join("correlation_heatmap.png"),
                viz::HEATMAP_SIZE,
                |area| viz::draw_correlation_heatmap(area, &df),
            )?,
            viz::save_png(out_dir.join("distributions.png"), grid_size, |area| {
                viz::draw_distributions_grid(area, &df, GRID_COLUMNS)
            })?,
            viz::save_png(out_dir.join("log_distributions.png"), grid_size, |area| {
                viz::draw_log_distributions_grid(area, &df, GRID_COLUMNS)
            })?,
            viz::save_png(out_dir.join("global_trend.png"), viz::CHART_SIZE, |area| {
                viz::draw_global_trend(area, &df, COL::ANNUAL_CO2_EMISSIONS)
            })?,
            viz::save_png(out_dir.join("top_emitters.png"), viz::CHART_SIZE, |area| {
                viz::draw_top_emitters(area, &df, TOP_EMITTERS, COL::ANNUAL_CO2_EMISSIONS)
            })?,
        ];

        let mut fits = self.distribution_fits(&df)?;
        let fits_path = out_dir.join(DISTRIBUTION_FITS_FILE);
        save_csv(&mut fits, &fits_path)?;
        Ok(ExploreReport {
            figures,
            fits,
            fits_path,
        })
    }

    /// Student-t fit of the log values of every numeric indicator, compared against synthetic
    /// draws of the same size. Columns with too few positive values are skipped.
    pub fn distribution_fits(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut names = vec![];
        let mut counts = vec![];
        let mut dfs = vec![];
        let mut locs = vec![];
        let mut scales = vec![];
        let mut statistics = vec![];
        let mut p_values = vec![];
        for column in viz::numeric_columns(df)
            .into_iter()
            .filter(|column| column != COL::YEAR)
        {
            let values = df.column(&column)?.cast(&DataType::Float64)?;
            let logged = log_safe(&values.f64()?.into_iter().collect_vec());
            let observed = logged.iter().flatten().copied().collect_vec();
            let params = match fit_student_t(&logged) {
                Ok(params) if params.scale > 0.0 => params,
                _ => {
                    debug!("skipping the reference fit of '{column}'");
                    continue;
                }
            };
            let synthetic = synthetic_from_t(&params, observed.len(), self.config.sample_seed)?;
            let ks = ks_two_sample(&observed, &synthetic)?;
            names.push(column);
            counts.push(observed.len() as u64);
            dfs.push(params.df);
            locs.push(params.loc);
            scales.push(params.scale);
            statistics.push(ks.statistic);
            p_values.push(ks.p_value);
        }
        Ok(DataFrame::new(vec![
            Series::new("column", names),
            Series::new("n", counts),
            Series::new("df", dfs),
            Series::new("loc", locs),
            Series::new("scale", scales),
            Series::new("ks_statistic", statistics),
            Series::new("p_value", p_values),
        ])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_fits_skip_year_and_constant_columns() -> Result<()> {
        let n = 200;
        let df = df!(
            "country" => vec!["A"; n],
            "year" => (0..n as i64).collect_vec(),
            "GDP" => (1..=n).map(|i| (i as f64 * 0.37).sin().abs() * 100.0 + 1.0).collect_vec(),
            "flat" => vec![5.0; n],
        )?;
        let fits = Co2cast::new().distribution_fits(&df)?;
        assert_eq!(fits.height(), 1);
        assert_eq!(fits.column("column")?.str()?.get(0), Some("GDP"));
        assert_eq!(fits.column("n")?.u64()?.get(0), Some(n as u64));
        Ok(())
    }
}
