use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sampler::SamplerConfig;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub models_dir: PathBuf,
    pub reports_dir: PathBuf,
    /// Inclusive year bounds of the cohort the master panel is built on
    pub cohort_years: (i64, i64),
    /// Inclusive year bounds of the cleaned panel
    pub panel_years: (i64, i64),
    pub round_decimals: u32,
    pub sample_rows: usize,
    pub sample_seed: u64,
    pub sampler: SamplerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            raw_dir: "data/raw".into(),
            processed_dir: "data/processed".into(),
            models_dir: "models".into(),
            reports_dir: "reports/results".into(),
            cohort_years: (1980, 2018),
            panel_years: (1990, 2015),
            round_decimals: 2,
            sample_rows: 500,
            sample_seed: 42,
            sampler: SamplerConfig::default(),
        }
    }
}

impl Config {
    /// Path of the cleaned panel inside the processed directory
    pub fn cleaned_panel_path(&self) -> PathBuf {
        self.processed_dir.join(crate::CLEANED_PANEL_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            models_dir = "/tmp/models"
            panel_years = [2000, 2010]

            [sampler]
            draws = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.models_dir, PathBuf::from("/tmp/models"));
        assert_eq!(config.panel_years, (2000, 2010));
        assert_eq!(config.cohort_years, (1980, 2018));
        assert_eq!(config.sampler.draws, 100);
        assert_eq!(config.sampler.tune, SamplerConfig::default().tune);
    }
}
