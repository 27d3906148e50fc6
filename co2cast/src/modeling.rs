//! The two robust regressions fitted per country and the glue that turns a country panel into a
//! posterior trace.
//!
//! Both models put a Student-t likelihood on a log-scale response:
//!
//! - [`ModelKind::PopTrend`]: `log(population) ~ StudentT(nu, intercept + slope * year_c, sigma)`
//! - [`ModelKind::CO2Gdp`]: `log(CO₂) ~ StudentT(nu, intercept + slope_year * year_c +
//!   slope_gdp * log_gdp_c, sigma)`
//!
//! where `_c` marks covariates centred on their mean. Priors are `intercept ~ Normal(mean(y), 5)`,
//! `slope* ~ Normal(0, 1)`, `sigma ~ HalfNormal(1)` and `nu ~ Exponential(1)`. Sampling happens on
//! `[intercept, slopes.., ln sigma, ln nu]` with the log-Jacobian of the transform added.

use std::f64::consts::PI;
use std::str::FromStr;

use anyhow::Result;
use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::{digamma, ln_gamma};
use strum_macros::{Display, EnumIter};

use crate::error::Co2castError;
use crate::features::CountryPanel;
use crate::sampler::{sample, LogDensity, SamplerConfig};
use crate::trace::{PosteriorTrace, SamplerReport};
use crate::COL;

const INTERCEPT_PRIOR_SD: f64 = 5.0;
const SLOPE_PRIOR_SD: f64 = 1.0;
const SIGMA_PRIOR_SD: f64 = 1.0;
const NU_PRIOR_RATE: f64 = 1.0;
/// Fewer complete observations than this cannot identify the regression
const MIN_OBSERVATIONS: usize = 3;

/// Which of the two regressions a trace belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum ModelKind {
    #[strum(serialize = "pop-trend")]
    #[serde(rename = "pop-trend")]
    PopTrend,
    #[strum(serialize = "co2-gdp")]
    #[serde(rename = "co2-gdp")]
    CO2Gdp,
}

impl FromStr for ModelKind {
    type Err = Co2castError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pop-trend" => Ok(Self::PopTrend),
            "co2-gdp" => Ok(Self::CO2Gdp),
            other => Err(Co2castError::InvalidModel(other.to_string())),
        }
    }
}

impl ModelKind {
    /// Tag used in file names and stored with the trace
    pub fn tag(&self) -> &'static str {
        match self {
            Self::PopTrend => "pop_trend",
            Self::CO2Gdp => "co2_gdp",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, Co2castError> {
        match tag {
            "pop_trend" => Ok(Self::PopTrend),
            "co2_gdp" => Ok(Self::CO2Gdp),
            other => Err(Co2castError::InvalidModel(other.to_string())),
        }
    }

    /// Panel column whose log is modelled
    pub fn response_column(&self) -> &'static str {
        match self {
            Self::PopTrend => COL::POPULATION,
            Self::CO2Gdp => COL::ANNUAL_CO2_EMISSIONS,
        }
    }

    /// Names of the slope parameters, in covariate order
    pub fn slope_names(&self) -> &'static [&'static str] {
        match self {
            Self::PopTrend => &[COL::PARAM_SLOPE],
            Self::CO2Gdp => &[COL::PARAM_SLOPE_YEAR, COL::PARAM_SLOPE_GDP],
        }
    }

    /// Every parameter, in the order they appear in a draw
    pub fn parameter_names(&self) -> Vec<&'static str> {
        std::iter::once(COL::PARAM_INTERCEPT)
            .chain(self.slope_names().iter().copied())
            .chain([COL::PARAM_SIGMA, COL::PARAM_NU])
            .collect()
    }

    pub fn title(&self, country: &str) -> String {
        match self {
            Self::PopTrend => format!("Population Forecast: {country}"),
            Self::CO2Gdp => format!("CO₂ Forecast w/ GDP: {country}"),
        }
    }
}

/// Mean of the present, finite values
pub fn nan_mean(values: &[Option<f64>]) -> Option<f64> {
    let present = values
        .iter()
        .flatten()
        .filter(|v| v.is_finite())
        .collect_vec();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().copied().sum::<f64>() / present.len() as f64)
    }
}

/// Subtract the mean of the present values; missing stays missing.
pub fn centre(values: &[Option<f64>]) -> Vec<Option<f64>> {
    match nan_mean(values) {
        Some(mean) => values.iter().map(|v| v.map(|v| v - mean)).collect(),
        None => values.to_vec(),
    }
}

/// Student-t regression with the priors above, as a density on the unconstrained space
#[derive(Debug, Clone)]
pub struct StudentTRegression {
    pub kind: ModelKind,
    response: Vec<f64>,
    /// Centred covariates, one row per complete observation
    covariates: Vec<Vec<f64>>,
    intercept_prior_mean: f64,
}

impl StudentTRegression {
    /// Build the model from a response and its centred covariates. Observations with any value
    /// missing are left out of the likelihood.
    pub fn new(
        kind: ModelKind,
        response: &[Option<f64>],
        covariates: &[Vec<Option<f64>>],
    ) -> Result<Self> {
        let intercept_prior_mean = nan_mean(response).unwrap_or(0.0);
        let (response, covariates): (Vec<f64>, Vec<Vec<f64>>) = response
            .iter()
            .enumerate()
            .filter_map(|(idx, y)| {
                let y = y.filter(|y| y.is_finite())?;
                let x = covariates
                    .iter()
                    .map(|column| column.get(idx).copied().flatten())
                    .collect::<Option<Vec<f64>>>()?;
                Some((y, x))
            })
            .unzip();
        if response.len() < MIN_OBSERVATIONS {
            return Err(Co2castError::InsufficientData(response.len()).into());
        }
        Ok(Self {
            kind,
            response,
            covariates,
            intercept_prior_mean,
        })
    }

    /// Build the model for `kind` from one country's panel
    pub fn from_panel(kind: ModelKind, panel: &CountryPanel) -> Result<Self> {
        let years = panel
            .years()?
            .into_iter()
            .map(|year| Some(year as f64))
            .collect_vec();
        let response = panel.log_values(kind.response_column())?;
        let covariates = match kind {
            ModelKind::PopTrend => vec![centre(&years)],
            ModelKind::CO2Gdp => vec![centre(&years), centre(&panel.log_values(COL::GDP)?)],
        };
        let model = Self::new(kind, &response, &covariates)?;
        if model.n_observations() < panel.len() {
            warn!(
                "{}: {} of {} rows have missing values and are left out of the fit",
                panel.country,
                panel.len() - model.n_observations(),
                panel.len()
            );
        }
        Ok(model)
    }

    pub fn n_observations(&self) -> usize {
        self.response.len()
    }

    fn n_slopes(&self) -> usize {
        self.kind.slope_names().len()
    }

    /// Map an unconstrained position to `[intercept, slopes.., sigma, nu]`
    pub fn constrain(&self, position: &[f64]) -> Vec<f64> {
        let k = self.n_slopes();
        position[..=k]
            .iter()
            .copied()
            .chain([position[k + 1].exp(), position[k + 2].exp()])
            .collect()
    }
}

impl LogDensity for StudentTRegression {
    fn dim(&self) -> usize {
        self.n_slopes() + 3
    }

    fn log_density(&self, position: &[f64], gradient: &mut [f64]) -> f64 {
        let k = self.n_slopes();
        let intercept = position[0];
        let slopes = &position[1..=k];
        let (log_sigma, log_nu) = (position[k + 1], position[k + 2]);
        let (sigma, nu) = (log_sigma.exp(), log_nu.exp());
        gradient.iter_mut().for_each(|g| *g = 0.0);

        // Priors, with the log-Jacobians of sigma = exp(s) and nu = exp(u)
        let offset = intercept - self.intercept_prior_mean;
        let mut log_density = -0.5 * (offset / INTERCEPT_PRIOR_SD).powi(2);
        gradient[0] = -offset / INTERCEPT_PRIOR_SD.powi(2);
        for (j, slope) in slopes.iter().enumerate() {
            log_density -= 0.5 * (slope / SLOPE_PRIOR_SD).powi(2);
            gradient[1 + j] = -slope / SLOPE_PRIOR_SD.powi(2);
        }
        log_density += -0.5 * (sigma / SIGMA_PRIOR_SD).powi(2) + log_sigma;
        gradient[k + 1] = -(sigma / SIGMA_PRIOR_SD).powi(2) + 1.0;
        log_density += -NU_PRIOR_RATE * nu + log_nu;
        gradient[k + 2] = -NU_PRIOR_RATE * nu + 1.0;

        // Likelihood
        let n = self.response.len() as f64;
        let scale2 = nu * sigma * sigma;
        log_density += n
            * (ln_gamma(0.5 * (nu + 1.0)) - ln_gamma(0.5 * nu) - 0.5 * (nu * PI).ln() - log_sigma);
        let mut d_nu = n * (0.5 * digamma(0.5 * (nu + 1.0)) - 0.5 * digamma(0.5 * nu) - 0.5 / nu);
        let mut d_log_sigma = -n;
        for (y, x) in self.response.iter().zip(&self.covariates) {
            let mean = intercept + slopes.iter().zip(x).map(|(b, x)| b * x).sum::<f64>();
            let residual = y - mean;
            let r2 = residual * residual;
            let z = r2 / scale2;
            log_density -= 0.5 * (nu + 1.0) * z.ln_1p();

            let d_mean = (nu + 1.0) * residual / (scale2 + r2);
            gradient[0] += d_mean;
            for (g, x) in gradient[1..=k].iter_mut().zip(x) {
                *g += d_mean * x;
            }
            d_log_sigma += (nu + 1.0) * r2 / (scale2 + r2);
            d_nu += -0.5 * z.ln_1p() + 0.5 * (nu + 1.0) * z / (nu * (1.0 + z));
        }
        gradient[k + 1] += d_log_sigma;
        gradient[k + 2] += nu * d_nu;
        log_density
    }

    fn initial_point(&self) -> Vec<f64> {
        let n = self.response.len() as f64;
        let mean = self.response.iter().sum::<f64>() / n;
        let sd = (self.response.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / n).sqrt();
        std::iter::once(self.intercept_prior_mean)
            .chain(std::iter::repeat(0.0).take(self.n_slopes()))
            .chain([sd.max(1e-3).ln(), 0.0])
            .collect()
    }
}

/// Fit `kind` to one country's panel and collect the draws as a trace.
pub fn fit(kind: ModelKind, panel: &CountryPanel, config: &SamplerConfig) -> Result<PosteriorTrace> {
    let model = StudentTRegression::from_panel(kind, panel)?;
    info!(
        "fitting {kind} for {} on {} observations",
        panel.country,
        model.n_observations()
    );
    let chains = sample(&model, config)?;
    let draws = chains
        .iter()
        .map(|chain| {
            chain
                .draws
                .iter()
                .map(|position| model.constrain(position))
                .collect_vec()
        })
        .collect_vec();
    let report = SamplerReport {
        kind,
        country: panel.country.clone(),
        n_observations: model.n_observations(),
        config: config.clone(),
        chains: chains.into_iter().map(|chain| chain.stats).collect(),
    };
    Ok(PosteriorTrace::new(kind, &panel.country, &draws)?.with_report(report))
}
