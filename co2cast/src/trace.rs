//! Posterior draws, their persistence and convergence diagnostics.
//!
//! A trace is stored as a NetCDF classic file with a `chain` and a `draw` dimension and one
//! `(chain, draw)` variable per model parameter. The model tag, the country and the sampler
//! report (as JSON) are global attributes.

use std::path::{Path, PathBuf};

use anyhow::Result;
use itertools::Itertools;
use log::{debug, info, warn};
use netcdf3::{DataSet, FileReader, FileWriter, Version};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Co2castError;
use crate::modeling::ModelKind;
use crate::sampler::{ChainStats, SamplerConfig};
use crate::COL;

/// Probability mass of the reported highest density interval
pub const HDI_PROB: f64 = 0.94;

/// How a trace was produced. Stored as a JSON file next to the draws.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SamplerReport {
    pub kind: ModelKind,
    pub country: String,
    pub n_observations: usize,
    pub config: SamplerConfig,
    pub chains: Vec<ChainStats>,
}

/// Posterior draws for one country and model. `samples` has a `chain` and a `draw` column
/// followed by one column per parameter of `kind`.
#[derive(Debug, Clone)]
pub struct PosteriorTrace {
    pub kind: ModelKind,
    pub country: String,
    pub samples: DataFrame,
    pub report: Option<SamplerReport>,
}

/// Per-parameter posterior summary
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub hdi_low: f64,
    pub hdi_high: f64,
    pub r_hat: f64,
    pub ess: f64,
}

/// Global attribute holding the JSON encoded [`SamplerReport`]
const REPORT_ATTR: &str = "sampler_report";

/// `{country}_{model_tag}.nc`
pub fn trace_file_name(country: &str, kind: ModelKind) -> String {
    format!("{country}_{}.nc", kind.tag())
}

fn netcdf_error<E: std::fmt::Debug>(err: E) -> Co2castError {
    Co2castError::TraceFormat(format!("{err:?}"))
}

impl PosteriorTrace {
    /// Build a trace from constrained draws indexed as `draws[chain][draw][parameter]`, with
    /// parameters in [`ModelKind::parameter_names`] order.
    pub fn new(kind: ModelKind, country: &str, draws: &[Vec<Vec<f64>>]) -> Result<Self> {
        let names = kind.parameter_names();
        let mut chain_ids: Vec<i64> = vec![];
        let mut draw_ids: Vec<i64> = vec![];
        let mut values: Vec<Vec<f64>> = vec![vec![]; names.len()];
        for (chain, chain_draws) in draws.iter().enumerate() {
            for (draw, params) in chain_draws.iter().enumerate() {
                if params.len() != names.len() {
                    return Err(Co2castError::SamplerFailure(format!(
                        "expected {} parameters per draw, got {}",
                        names.len(),
                        params.len()
                    ))
                    .into());
                }
                chain_ids.push(chain as i64);
                draw_ids.push(draw as i64);
                for (column, value) in values.iter_mut().zip(params) {
                    column.push(*value);
                }
            }
        }
        let mut columns = vec![
            Series::new(COL::TRACE_CHAIN, chain_ids),
            Series::new(COL::TRACE_DRAW, draw_ids),
        ];
        columns.extend(
            names
                .iter()
                .zip(values)
                .map(|(name, column)| Series::new(name, column)),
        );
        Ok(Self {
            kind,
            country: country.into(),
            samples: DataFrame::new(columns)?,
            report: None,
        })
    }

    pub fn with_report(mut self, report: SamplerReport) -> Self {
        self.report = Some(report);
        self
    }

    pub fn file_name(&self) -> String {
        trace_file_name(&self.country, self.kind)
    }

    /// Write the draws to `models_dir` as `{country}_{model_tag}.nc`, with the model kind,
    /// country and sampler report as global attributes. Returns the path written.
    pub fn save<P: AsRef<Path>>(&self, models_dir: P) -> Result<PathBuf> {
        let models_dir = models_dir.as_ref();
        std::fs::create_dir_all(models_dir)?;
        let path = models_dir.join(self.file_name());

        let variables = self
            .kind
            .parameter_names()
            .into_iter()
            .map(|name| Ok((name, self.chain_values(name)?)))
            .collect::<Result<Vec<_>>>()?;
        let n_chains = variables.first().map_or(0, |(_, chains)| chains.len());
        let n_draws = variables
            .first()
            .and_then(|(_, chains)| chains.first())
            .map_or(0, Vec::len);
        if n_draws == 0 {
            return Err(Co2castError::InsufficientData(0).into());
        }
        if variables
            .iter()
            .flat_map(|(_, chains)| chains)
            .any(|chain| chain.len() != n_draws)
        {
            return Err(Co2castError::TraceFormat(
                "every chain must hold the same number of draws".into(),
            )
            .into());
        }

        let mut data_set = DataSet::new();
        data_set
            .add_fixed_dim(COL::TRACE_CHAIN, n_chains)
            .map_err(netcdf_error)?;
        data_set
            .add_fixed_dim(COL::TRACE_DRAW, n_draws)
            .map_err(netcdf_error)?;
        for (name, _) in &variables {
            data_set
                .add_var_f64(name, &[COL::TRACE_CHAIN, COL::TRACE_DRAW])
                .map_err(netcdf_error)?;
        }
        data_set
            .add_global_attr_string(COL::TRACE_MODEL, self.kind.tag())
            .map_err(netcdf_error)?;
        data_set
            .add_global_attr_string(COL::COUNTRY, &self.country)
            .map_err(netcdf_error)?;
        if let Some(report) = &self.report {
            data_set
                .add_global_attr_string(REPORT_ATTR, serde_json::to_string(report)?)
                .map_err(netcdf_error)?;
        }

        let mut writer = FileWriter::open(&path).map_err(netcdf_error)?;
        writer
            .set_def(&data_set, Version::Offset64Bit, 0)
            .map_err(netcdf_error)?;
        for (name, chains) in &variables {
            writer
                .write_var_f64(name, &chains.concat())
                .map_err(netcdf_error)?;
        }
        writer.close().map_err(netcdf_error)?;
        info!("saved trace to {}", path.display());
        Ok(path)
    }

    /// Read a trace written by [`PosteriorTrace::save`]. The model kind comes from the stored
    /// tag; the sampler report is read when present.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = FileReader::open(path).map_err(netcdf_error)?;
        let (tag, country, report, n_chains, n_draws) = {
            let data_set = reader.data_set();
            let attr = |name: &str| {
                data_set
                    .get_global_attr_as_string(name)
                    .ok_or_else(|| Co2castError::MissingValue(name.into()))
            };
            let dim = |name: &str| {
                data_set
                    .dim_size(name)
                    .ok_or_else(|| Co2castError::MissingColumn(name.into()))
            };
            (
                attr(COL::TRACE_MODEL)?,
                attr(COL::COUNTRY)?,
                data_set.get_global_attr_as_string(REPORT_ATTR),
                dim(COL::TRACE_CHAIN)?,
                dim(COL::TRACE_DRAW)?,
            )
        };
        let kind = ModelKind::from_tag(&tag)?;

        let mut columns = vec![
            Series::new(
                COL::TRACE_CHAIN,
                (0..n_chains as i64)
                    .flat_map(|chain| std::iter::repeat(chain).take(n_draws))
                    .collect_vec(),
            ),
            Series::new(
                COL::TRACE_DRAW,
                (0..n_chains)
                    .flat_map(|_| 0..n_draws as i64)
                    .collect_vec(),
            ),
        ];
        for name in kind.parameter_names() {
            let values = reader
                .read_var_f64(name)
                .map_err(|_| Co2castError::MissingColumn(name.into()))?;
            columns.push(Series::new(name, values));
        }

        let report = match report {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => {
                debug!("no sampler report in {}", path.display());
                None
            }
        };
        Ok(Self {
            kind,
            country,
            samples: DataFrame::new(columns)?,
            report,
        })
    }

    pub fn n_chains(&self) -> Result<usize> {
        Ok(self.samples.column(COL::TRACE_CHAIN)?.n_unique()?)
    }

    /// All draws of `param`, chain after chain
    pub fn values(&self, param: &str) -> Result<Vec<f64>> {
        let series = self
            .samples
            .column(param)
            .map_err(|_| Co2castError::MissingColumn(param.into()))?;
        Ok(series.f64()?.into_no_null_iter().collect())
    }

    /// Draws of `param` grouped by chain, in chain order
    pub fn chain_values(&self, param: &str) -> Result<Vec<Vec<f64>>> {
        let chains = self.samples.column(COL::TRACE_CHAIN)?.i64()?;
        let values = self.values(param)?;
        let mut grouped: Vec<Vec<f64>> = vec![];
        for (chain, value) in chains.into_no_null_iter().zip(values) {
            let chain = chain as usize;
            if grouped.len() <= chain {
                grouped.resize_with(chain + 1, Vec::new);
            }
            grouped[chain].push(value);
        }
        Ok(grouped)
    }

    pub fn posterior_mean(&self, param: &str) -> Result<f64> {
        let values = self.values(param)?;
        if values.is_empty() {
            return Err(Co2castError::MissingValue(param.into()).into());
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Posterior means of every parameter, in model order
    pub fn posterior_means(&self) -> Result<Vec<(&'static str, f64)>> {
        self.kind
            .parameter_names()
            .into_iter()
            .map(|name| Ok((name, self.posterior_mean(name)?)))
            .collect()
    }

    pub fn summary(&self) -> Result<Vec<ParameterSummary>> {
        let summaries = self
            .kind
            .parameter_names()
            .into_iter()
            .map(|name| {
                let chains = self.chain_values(name)?;
                let all = chains.iter().flatten().copied().collect_vec();
                let (mean, sd) = mean_sd(&all);
                let (hdi_low, hdi_high) = hdi(&all, HDI_PROB);
                let halves = split_chains(&chains);
                Ok(ParameterSummary {
                    name: name.to_string(),
                    mean,
                    sd,
                    hdi_low,
                    hdi_high,
                    r_hat: split_r_hat(&halves),
                    ess: effective_sample_size(&halves),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        for summary in summaries.iter().filter(|s| s.r_hat > 1.01) {
            warn!(
                "{} for {}: r_hat of {} is {:.3}",
                self.kind, self.country, summary.name, summary.r_hat
            );
        }
        Ok(summaries)
    }
}

fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    (mean, var.sqrt())
}

/// Narrowest interval holding `prob` of the draws
pub fn hdi(values: &[f64], prob: f64) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let sorted = values.iter().copied().sorted_by(f64::total_cmp).collect_vec();
    let n = sorted.len();
    let included = ((prob * n as f64).floor() as usize).min(n - 1);
    let start = (0..n - included)
        .min_by(|&a, &b| {
            (sorted[a + included] - sorted[a]).total_cmp(&(sorted[b + included] - sorted[b]))
        })
        .unwrap_or(0);
    (sorted[start], sorted[start + included])
}

/// Split every chain into its first and second half, dropping the middle draw of odd chains
fn split_chains(chains: &[Vec<f64>]) -> Vec<&[f64]> {
    chains
        .iter()
        .flat_map(|chain| {
            let half = chain.len() / 2;
            [&chain[..half], &chain[chain.len() - half..]]
        })
        .filter(|half| half.len() >= 2)
        .collect()
}

/// Gelman-Rubin potential scale reduction on already split chains
pub fn split_r_hat(chains: &[&[f64]]) -> f64 {
    let Some(n) = chains.iter().map(|c| c.len()).min() else {
        return f64::NAN;
    };
    if chains.len() < 2 || n < 2 {
        return f64::NAN;
    }
    let n_f = n as f64;
    let stats = chains.iter().map(|c| mean_sd(&c[..n])).collect_vec();
    let within = stats.iter().map(|(_, sd)| sd * sd).sum::<f64>() / stats.len() as f64;
    let (_, between_sd) = mean_sd(&stats.iter().map(|(mean, _)| *mean).collect_vec());
    let between = n_f * between_sd * between_sd;
    if within <= 0.0 {
        return if between <= 0.0 { 1.0 } else { f64::INFINITY };
    }
    let var_plus = (n_f - 1.0) / n_f * within + between / n_f;
    (var_plus / within).sqrt()
}

fn autocovariance(chain: &[f64], mean: f64, lag: usize) -> f64 {
    let n = chain.len();
    chain[..n - lag]
        .iter()
        .zip(&chain[lag..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum::<f64>()
        / n as f64
}

/// Effective sample size across chains using Geyer's initial monotone sequence
pub fn effective_sample_size(chains: &[&[f64]]) -> f64 {
    let Some(n) = chains.iter().map(|c| c.len()).min() else {
        return f64::NAN;
    };
    if n < 4 {
        return f64::NAN;
    }
    let m = chains.len() as f64;
    let n_f = n as f64;
    let chains = chains.iter().map(|c| &c[..n]).collect_vec();
    let means = chains.iter().map(|c| c.iter().sum::<f64>() / n_f).collect_vec();
    let mean_acov = |lag: usize| {
        chains
            .iter()
            .zip(&means)
            .map(|(c, mean)| autocovariance(c, *mean, lag))
            .sum::<f64>()
            / m
    };

    let mean_var = mean_acov(0) * n_f / (n_f - 1.0);
    let var_plus = if chains.len() > 1 {
        let (_, between_sd) = mean_sd(&means);
        mean_var * (n_f - 1.0) / n_f + between_sd * between_sd
    } else {
        mean_var * (n_f - 1.0) / n_f
    };
    if var_plus <= 0.0 {
        return f64::NAN;
    }
    let rho = |lag: usize| 1.0 - (mean_var - mean_acov(lag)) / var_plus;

    let mut tau = -1.0;
    let mut previous_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(previous_pair);
        tau += 2.0 * pair;
        previous_pair = pair;
        lag += 2;
    }
    m * n_f / tau.max(1.0 / (m * n_f).log10())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_trace() -> PosteriorTrace {
        let draws = (0..2)
            .map(|chain| {
                (0..100)
                    .map(|draw| {
                        let wiggle = ((chain * 100 + draw) as f64 * 0.37).sin();
                        vec![1.0 + wiggle, 0.02 + 0.01 * wiggle, 0.1, 3.0]
                    })
                    .collect_vec()
            })
            .collect_vec();
        PosteriorTrace::new(ModelKind::PopTrend, "X", &draws).unwrap()
    }

    #[test]
    fn samples_have_chain_draw_and_parameter_columns() {
        let trace = example_trace();
        assert_eq!(
            trace.samples.get_column_names(),
            vec!["chain", "draw", "intercept", "slope", "sigma", "nu"]
        );
        assert_eq!(trace.samples.height(), 200);
        assert_eq!(trace.n_chains().unwrap(), 2);
        assert_eq!(trace.chain_values("sigma").unwrap()[1].len(), 100);
    }

    #[test]
    fn wrong_number_of_parameters_is_rejected() {
        let draws = vec![vec![vec![1.0, 2.0]]];
        assert!(PosteriorTrace::new(ModelKind::CO2Gdp, "X", &draws).is_err());
    }

    #[test]
    fn round_trip_preserves_kind_and_means() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let report = SamplerReport {
            kind: ModelKind::PopTrend,
            country: "X".into(),
            n_observations: 26,
            config: SamplerConfig::default(),
            chains: vec![],
        };
        let trace = example_trace().with_report(report.clone());
        let path = trace.save(dir.path())?;
        assert_eq!(path, dir.path().join("X_pop_trend.nc"));

        let loaded = PosteriorTrace::load(&path)?;
        assert_eq!(loaded.kind, ModelKind::PopTrend);
        assert_eq!(loaded.country, "X");
        assert_eq!(loaded.report, Some(report));
        assert!(loaded.samples.equals(&trace.samples));
        assert_eq!(loaded.posterior_means()?, trace.posterior_means()?);
        Ok(())
    }

    #[test]
    fn saved_file_has_chain_and_draw_dimensions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = example_trace().save(dir.path())?;
        let mut reader = FileReader::open(&path).map_err(netcdf_error)?;
        let data_set = reader.data_set();
        assert_eq!(data_set.dim_size("chain"), Some(2));
        assert_eq!(data_set.dim_size("draw"), Some(100));
        assert_eq!(
            data_set.get_global_attr_as_string("model"),
            Some("pop_trend".to_string())
        );
        assert_eq!(data_set.get_global_attr_as_string("country"), Some("X".to_string()));
        assert_eq!(reader.read_var_f64("nu").map_err(netcdf_error)?, vec![3.0; 200]);
        Ok(())
    }

    #[test]
    fn trace_without_report_loads() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = example_trace().save(dir.path())?;
        let loaded = PosteriorTrace::load(path)?;
        assert_eq!(loaded.report, None);
        assert_eq!(loaded.n_chains()?, 2);
        Ok(())
    }

    #[test]
    fn hdi_of_uniform_grid_is_central() {
        let values = (0..=100).map(f64::from).collect_vec();
        let (low, high) = hdi(&values, 0.94);
        assert_eq!(high - low, 94.0);
        let (low, high) = hdi(&[5.0, 0.0, 1.0, 1.1, 1.2, 0.9], 0.5);
        assert!(low >= 0.9 && high <= 1.2);
    }

    #[test]
    fn r_hat_flags_disagreeing_chains() {
        let a = (0..200).map(|i| (i as f64 * 0.7).sin()).collect_vec();
        let b = a.iter().map(|v| v + 5.0).collect_vec();
        let same = split_r_hat(&split_chains(&[a.clone(), a.clone()]));
        let different = split_r_hat(&split_chains(&[a, b]));
        assert!(same < 1.05, "r_hat {same}");
        assert!(different > 1.5, "r_hat {different}");
    }

    #[test]
    fn ess_of_autocorrelated_chain_is_smaller() {
        let alternating = (0..400)
            .map(|i| ((i * 7919) % 101) as f64)
            .collect_vec();
        let sticky = (0..400).map(|i| (i / 40) as f64).collect_vec();
        let ess_alternating = effective_sample_size(&split_chains(&[alternating]));
        let ess_sticky = effective_sample_size(&split_chains(&[sticky]));
        assert!(ess_sticky < ess_alternating);
        assert!(ess_sticky < 100.0, "ess {ess_sticky}");
    }

    #[test]
    fn summary_reports_every_parameter() -> Result<()> {
        let summary = example_trace().summary()?;
        assert_eq!(
            summary.iter().map(|s| s.name.as_str()).collect_vec(),
            vec!["intercept", "slope", "sigma", "nu"]
        );
        let sigma = &summary[2];
        assert!((sigma.mean - 0.1).abs() < 1e-12);
        assert!(sigma.sd.abs() < 1e-12);
        assert!(summary[0].hdi_low < summary[0].mean && summary[0].mean < summary[0].hdi_high);
        Ok(())
    }
}
