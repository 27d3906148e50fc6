use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use co2cast::{config::Config, modeling::ModelKind, Co2cast};
use enum_dispatch::enum_dispatch;
use log::{debug, info};
use spinners::{Spinner, Spinners};

use crate::display::{
    display_chain_stats, display_dataset_summary, display_distribution_fits, display_forecast,
    display_posterior_summary,
};
use crate::error::Co2castCliResult;

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";

fn start_spinner(quiet: bool, message: &str) -> Option<Spinner> {
    (!quiet).then(|| {
        Spinner::with_timer(
            DEFAULT_PROGRESS_SPINNER,
            message.to_string() + RUNNING_TAIL_STRING,
        )
    })
}

fn stop_spinner(spinner: Option<Spinner>) {
    if let Some(mut s) = spinner {
        s.stop_with_symbol(COMPLETE_PROGRESS_STRING);
    }
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    fn run(&self, config: Config) -> Co2castCliResult<()>;
}

/// Where the cleaned panel is read from. Falls back to the processed directory of the config.
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    #[arg(
        long,
        help = "Cleaned panel CSV [default: data/processed/Master_filtered_df_cleaned.csv]"
    )]
    data: Option<PathBuf>,
}

impl DataArgs {
    fn path(&self, config: &Config) -> PathBuf {
        self.data
            .clone()
            .unwrap_or_else(|| config.cleaned_panel_path())
    }
}

/// The `make-dataset` command merges the raw indicator tables into the cleaned panel.
#[derive(Args, Debug)]
pub struct MakeDatasetCommand {
    #[arg(long, help = "Directory of the raw CSV files [default: data/raw]")]
    source: Option<PathBuf>,
    #[arg(long, help = "Directory to write the cleaned panel to [default: data/processed]")]
    out: Option<PathBuf>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for MakeDatasetCommand {
    fn run(&self, config: Config) -> Co2castCliResult<()> {
        info!("Running `make-dataset` subcommand");
        let source = self.source.clone().unwrap_or_else(|| config.raw_dir.clone());
        let out = self
            .out
            .clone()
            .unwrap_or_else(|| config.processed_dir.clone());
        let co2cast = Co2cast::new_with_config(config);

        let sp = start_spinner(self.quiet, "Merging and cleaning raw tables");
        let summary = co2cast.make_dataset(&source, &out)?;
        stop_spinner(sp);

        display_dataset_summary(&summary);
        println!(
            "Saved: {}  (rows={})",
            summary.cleaned_path.display(),
            summary.rows
        );
        Ok(())
    }
}

/// The `train` command fits one model for one country and saves the posterior trace.
#[derive(Args, Debug)]
pub struct TrainCommand {
    #[command(flatten)]
    data: DataArgs,
    #[arg(long, help = "Directory to save traces in [default: models]")]
    models: Option<PathBuf>,
    #[arg(long, default_value = "China")]
    country: String,
    #[arg(long, value_name = "pop-trend|co2-gdp", default_value = "co2-gdp")]
    model: ModelKind,
    #[arg(long, help = "Draws kept per chain")]
    draws: Option<usize>,
    #[arg(long, help = "Warm-up iterations per chain")]
    tune: Option<usize>,
    #[arg(long, help = "Number of chains")]
    chains: Option<usize>,
    #[arg(long, help = "Random seed of the sampler")]
    seed: Option<u64>,
    #[arg(from_global)]
    quiet: bool,
}

impl TrainCommand {
    fn apply_overrides(&self, config: &mut Config) {
        let sampler = &mut config.sampler;
        sampler.draws = self.draws.unwrap_or(sampler.draws);
        sampler.tune = self.tune.unwrap_or(sampler.tune);
        sampler.chains = self.chains.unwrap_or(sampler.chains);
        sampler.seed = self.seed.unwrap_or(sampler.seed);
    }
}

impl RunCommand for TrainCommand {
    fn run(&self, mut config: Config) -> Co2castCliResult<()> {
        info!("Running `train` subcommand");
        self.apply_overrides(&mut config);
        debug!("sampler: {:?}", config.sampler);
        let data = self.data.path(&config);
        let models = self
            .models
            .clone()
            .unwrap_or_else(|| config.models_dir.clone());
        let co2cast = Co2cast::new_with_config(config);

        let sp = start_spinner(
            self.quiet,
            &format!("Sampling {} for {}", self.model, self.country),
        );
        let (trace, path) = co2cast.train(&data, &models, &self.country, self.model)?;
        stop_spinner(sp);

        display_posterior_summary(&trace.summary()?);
        if let Some(report) = &trace.report {
            display_chain_stats(&report.chains);
        }
        println!("Saved trace → {}", path.display());
        Ok(())
    }
}

/// The `forecast` command extends a fitted trend and saves it as a chart.
#[derive(Args, Debug)]
pub struct ForecastCommand {
    #[command(flatten)]
    data: DataArgs,
    #[arg(long, help = "Trace written by `train`")]
    trace: PathBuf,
    #[arg(long, default_value = "China")]
    country: String,
    #[arg(long, default_value_t = 10, help = "Years to forecast beyond the last observation")]
    horizon: usize,
    #[arg(
        long = "save_dir",
        help = "Directory to save the chart in [default: reports/results]"
    )]
    save_dir: Option<PathBuf>,
    #[arg(long = "no_show", help = "Save the chart without printing the forecast table")]
    no_show: bool,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for ForecastCommand {
    fn run(&self, config: Config) -> Co2castCliResult<()> {
        info!("Running `forecast` subcommand");
        let data = self.data.path(&config);
        let save_dir = self
            .save_dir
            .clone()
            .unwrap_or_else(|| config.reports_dir.clone());
        let co2cast = Co2cast::new_with_config(config);

        let sp = start_spinner(self.quiet, "Forecasting");
        let forecast = co2cast.forecast(&data, &self.trace, &self.country, self.horizon)?;
        let path = co2cast.save_forecast_plot(&forecast, &save_dir)?;
        stop_spinner(sp);

        println!("Saved figure → {}", path.display());
        if !self.no_show {
            display_forecast(&forecast)?;
        }
        Ok(())
    }
}

/// The `explore` command writes exploratory charts of the cleaned panel.
#[derive(Args, Debug)]
pub struct ExploreCommand {
    #[command(flatten)]
    data: DataArgs,
    #[arg(long, help = "Directory to save the charts in [default: reports/results]")]
    out: Option<PathBuf>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for ExploreCommand {
    fn run(&self, config: Config) -> Co2castCliResult<()> {
        info!("Running `explore` subcommand");
        let data = self.data.path(&config);
        let out = self
            .out
            .clone()
            .unwrap_or_else(|| config.reports_dir.clone());
        let co2cast = Co2cast::new_with_config(config);

        let sp = start_spinner(self.quiet, "Drawing exploratory charts");
        let report = co2cast.explore(&data, &out)?;
        stop_spinner(sp);

        for figure in &report.figures {
            println!("Saved figure → {}", figure.display());
        }
        display_distribution_fits(&report.fits)?;
        println!("Saved table → {}", report.fits_path.display());
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about="co2cast builds a country-year climate panel and forecasts it with Bayesian trend models", long_about = None, name="co2cast")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "\
            Do not print progress spinners to stdout. Results and logs (when `RUST_LOG`\n\
            is set) will still be printed.",
        global = true
    )]
    quiet: bool,
}

/// Commands contains the list of subcommands avaliable for use in the CLI.
/// Each command should implmement the RunCommand trait and specify the list
/// of required args for that command.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Merge the raw tables into the cleaned country-year panel
    MakeDataset(MakeDatasetCommand),
    /// Fit a Bayesian trend model for one country
    Train(TrainCommand),
    /// Forecast a fitted trend and save the chart
    Forecast(ForecastCommand),
    /// Draw exploratory charts of the cleaned panel
    Explore(ExploreCommand),
}
