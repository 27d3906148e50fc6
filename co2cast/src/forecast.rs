use anyhow::Result;
use itertools::Itertools;
use log::{info, warn};
use polars::prelude::*;

use crate::error::Co2castError;
use crate::features::CountryPanel;
use crate::modeling::{nan_mean, ModelKind};
use crate::trace::PosteriorTrace;
use crate::COL;

/// Growth of log GDP assumed over the whole horizon
const GDP_HORIZON_GROWTH: f64 = 1.05;

/// Posterior-mean trend over the observed years, extended `horizon` years forward.
///
/// All series are on the log scale. The prediction band is `mean_pred ± pi_sigma` over the
/// future years only and does not widen with the horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub kind: ModelKind,
    pub country: String,
    /// Observed years
    pub years: Vec<i64>,
    /// Observed response on the log scale
    pub hist_log: Vec<Option<f64>>,
    /// Observed followed by future years
    pub all_years: Vec<i64>,
    /// Mean prediction for every entry of `all_years`
    pub mean_pred: Vec<Option<f64>>,
    /// Half-width of the prediction band on the log scale
    pub pi_sigma: f64,
}

/// Evenly spaced values from `start` to `end` inclusive, like `numpy.linspace`
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

impl Forecast {
    pub fn last_observed_year(&self) -> Option<i64> {
        self.years.last().copied()
    }

    /// `forecast_{country}_{model_tag}.png`
    pub fn file_name(&self) -> String {
        format!("forecast_{}_{}.png", self.country, self.kind.tag())
    }

    pub fn title(&self) -> String {
        self.kind.title(&self.country)
    }

    /// Observed values on the original scale; missing years are skipped
    pub fn historical(&self) -> Vec<(i64, f64)> {
        self.years
            .iter()
            .zip(&self.hist_log)
            .filter_map(|(year, value)| value.map(|v| (*year, v.exp())))
            .collect()
    }

    /// Mean prediction on the original scale; years without a prediction are skipped
    pub fn mean(&self) -> Vec<(i64, f64)> {
        self.all_years
            .iter()
            .zip(&self.mean_pred)
            .filter_map(|(year, value)| value.map(|v| (*year, v.exp())))
            .collect()
    }

    /// `(year, low, high)` of the prediction band on the original scale, future years only
    pub fn band(&self) -> Vec<(i64, f64, f64)> {
        let last = self.last_observed_year().unwrap_or(i64::MIN);
        self.all_years
            .iter()
            .zip(&self.mean_pred)
            .filter(|(year, _)| **year > last)
            .filter_map(|(year, value)| {
                value.map(|v| (*year, (v - self.pi_sigma).exp(), (v + self.pi_sigma).exp()))
            })
            .collect()
    }

    /// One row per year of `all_years` with observed, predicted and band values on the
    /// original scale
    pub fn to_df(&self) -> PolarsResult<DataFrame> {
        let last = self.last_observed_year().unwrap_or(i64::MIN);
        let observed = self
            .all_years
            .iter()
            .map(|year| {
                self.years
                    .iter()
                    .position(|y| y == year)
                    .and_then(|idx| self.hist_log[idx])
                    .map(f64::exp)
            })
            .collect_vec();
        let mean = self.mean_pred.iter().map(|v| v.map(f64::exp)).collect_vec();
        let band = |sign: f64| {
            self.all_years
                .iter()
                .zip(&self.mean_pred)
                .map(|(year, value)| {
                    value
                        .filter(|_| *year > last)
                        .map(|v| (v + sign * self.pi_sigma).exp())
                })
                .collect_vec()
        };
        DataFrame::new(vec![
            Series::new(COL::YEAR, self.all_years.clone()),
            Series::new("observed", observed),
            Series::new("forecast", mean),
            Series::new("lower", band(-1.0)),
            Series::new("upper", band(1.0)),
        ])
    }
}

/// Extend the posterior-mean trend of `trace` over `panel` by `horizon` years.
pub fn forecast(panel: &CountryPanel, trace: &PosteriorTrace, horizon: usize) -> Result<Forecast> {
    if trace.country != panel.country {
        warn!(
            "applying the trace fitted for {} to the panel of {}",
            trace.country, panel.country
        );
    }
    let years = panel.years()?;
    let (Some(&first), Some(&last)) = (years.first(), years.last()) else {
        return Err(Co2castError::UnknownCountry(panel.country.clone()).into());
    };
    let year_mean = years.iter().sum::<i64>() as f64 / years.len() as f64;
    let kind = trace.kind;
    let intercept = trace.posterior_mean(COL::PARAM_INTERCEPT)?;
    let pi_sigma = trace.posterior_mean(COL::PARAM_SIGMA)?;
    let hist_log = panel.log_values(kind.response_column())?;

    let (all_years, mean_pred) = match kind {
        ModelKind::PopTrend => {
            let slope = trace.posterior_mean(COL::PARAM_SLOPE)?;
            let all_years = (first..=last + horizon as i64).collect_vec();
            let mean_pred = all_years
                .iter()
                .map(|year| Some(intercept + slope * (*year as f64 - year_mean)))
                .collect_vec();
            (all_years, mean_pred)
        }
        ModelKind::CO2Gdp => {
            let slope_year = trace.posterior_mean(COL::PARAM_SLOPE_YEAR)?;
            let slope_gdp = trace.posterior_mean(COL::PARAM_SLOPE_GDP)?;
            let log_gdp = panel.log_values(COL::GDP)?;
            let last_log_gdp = log_gdp
                .last()
                .copied()
                .flatten()
                .ok_or_else(|| Co2castError::MissingValue(format!("{} in {last}", COL::GDP)))?;
            let gdp_mean = nan_mean(&log_gdp)
                .ok_or_else(|| Co2castError::MissingValue(COL::GDP.into()))?;

            let all_years = years
                .iter()
                .copied()
                .chain(last + 1..=last + horizon as i64)
                .collect_vec();
            let all_gdp = log_gdp
                .iter()
                .copied()
                .chain(
                    linspace(last_log_gdp, last_log_gdp * GDP_HORIZON_GROWTH, horizon)
                        .into_iter()
                        .map(Some),
                )
                .collect_vec();
            let mean_pred = all_years
                .iter()
                .zip(&all_gdp)
                .map(|(year, gdp)| {
                    gdp.map(|gdp| {
                        intercept
                            + slope_year * (*year as f64 - year_mean)
                            + slope_gdp * (gdp - gdp_mean)
                    })
                })
                .collect_vec();
            (all_years, mean_pred)
        }
    };
    info!(
        "{kind} forecast for {} from {first} to {}",
        panel.country,
        all_years.last().copied().unwrap_or(last)
    );
    Ok(Forecast {
        kind,
        country: panel.country.clone(),
        years,
        hist_log,
        all_years,
        mean_pred,
        pi_sigma,
    })
}
