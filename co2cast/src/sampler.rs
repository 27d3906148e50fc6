//! Hamiltonian Monte Carlo over an unconstrained parameter vector.
//!
//! Each chain runs a warm-up phase that adapts the leapfrog step size by dual averaging towards
//! the target acceptance rate and estimates a diagonal mass matrix from the draws collected in a
//! series of doubling windows. The trajectory length is jittered per transition. Chains are
//! seeded from `(seed, chain)` so the output does not depend on how they are scheduled.

use anyhow::Result;
use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::error::Co2castError;

/// A differentiable log density on an unconstrained space.
pub trait LogDensity: Sync {
    fn dim(&self) -> usize;

    /// Log density at `position` up to an additive constant. The gradient is written into
    /// `gradient`, which has length [`LogDensity::dim`].
    fn log_density(&self, position: &[f64], gradient: &mut [f64]) -> f64;

    /// Where chains start before jitter is applied
    fn initial_point(&self) -> Vec<f64>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SamplerConfig {
    /// Draws kept per chain
    pub draws: usize,
    /// Warm-up iterations per chain, discarded
    pub tune: usize,
    pub chains: usize,
    pub target_accept: f64,
    pub seed: u64,
    /// Integration time of a trajectory before jitter
    pub path_length: f64,
    pub max_leapfrog_steps: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            draws: 2000,
            tune: 1000,
            chains: 4,
            target_accept: 0.9,
            seed: 42,
            path_length: 2.0,
            max_leapfrog_steps: 1024,
        }
    }
}

/// Statistics of the kept draws of one chain
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChainStats {
    pub chain: usize,
    pub mean_accept: f64,
    pub divergences: usize,
    pub step_size: f64,
    pub mean_leapfrog_steps: f64,
}

#[derive(Debug, Clone)]
pub struct Chain {
    pub stats: ChainStats,
    /// One unconstrained position per kept draw
    pub draws: Vec<Vec<f64>>,
}

// Energy error beyond which a trajectory is counted as divergent
const MAX_ENERGY_ERROR: f64 = 1000.0;
const MAX_INIT_ATTEMPTS: usize = 100;
const INIT_JITTER: f64 = 0.5;

/// Step size adaptation by dual averaging (Hoffman & Gelman, 2014).
struct DualAveraging {
    mu: f64,
    target: f64,
    iteration: f64,
    h_bar: f64,
    log_step_bar: f64,
}

impl DualAveraging {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    fn new(step_size: f64, target: f64) -> Self {
        Self {
            mu: (10.0 * step_size).ln(),
            target,
            iteration: 0.0,
            h_bar: 0.0,
            log_step_bar: 0.0,
        }
    }

    /// Feed the acceptance probability of the last transition, returning the next step size
    fn update(&mut self, accept_prob: f64) -> f64 {
        self.iteration += 1.0;
        let t = self.iteration;
        let weight = 1.0 / (t + Self::T0);
        self.h_bar = (1.0 - weight) * self.h_bar + weight * (self.target - accept_prob);
        let log_step = self.mu - t.sqrt() / Self::GAMMA * self.h_bar;
        let eta = t.powf(-Self::KAPPA);
        self.log_step_bar = eta * log_step + (1.0 - eta) * self.log_step_bar;
        log_step.exp()
    }

    fn final_step_size(&self) -> f64 {
        self.log_step_bar.exp()
    }
}

/// Welford accumulator for per-coordinate variances
struct RunningVariance {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningVariance {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn add(&mut self, x: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &value) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let delta = value - *mean;
            *mean += delta / n;
            *m2 += delta * (value - *mean);
        }
    }

    /// Variances shrunk towards a small constant, as the inverse mass matrix diagonal
    fn regularized(&self) -> Vec<f64> {
        let n = self.count as f64;
        self.m2
            .iter()
            .map(|m2| {
                let variance = m2 / (n - 1.0).max(1.0);
                (n / (n + 5.0)) * variance + 1e-3 * (5.0 / (n + 5.0))
            })
            .collect()
    }
}

/// Warm-up windows `[start, end)` in which draws are collected for the mass matrix. The
/// matrix is updated at the end of each window. Very short warm-ups adapt the step size only.
pub(crate) fn adaptation_windows(tune: usize) -> Vec<(usize, usize)> {
    if tune < 20 {
        return vec![];
    }
    let (init_buffer, term_buffer, base_window) = if tune < 75 + 50 + 25 {
        let init = (0.15 * tune as f64) as usize;
        let term = (0.1 * tune as f64) as usize;
        (init, term, tune - init - term)
    } else {
        (75, 50, 25)
    };
    let last = tune - term_buffer;
    let mut windows = vec![];
    let mut start = init_buffer;
    let mut size = base_window;
    while start < last {
        let mut end = start + size;
        if end + 2 * size > last {
            end = last;
        }
        windows.push((start, end));
        start = end;
        size *= 2;
    }
    windows
}

#[derive(Debug, Clone)]
struct State {
    position: Vec<f64>,
    gradient: Vec<f64>,
    log_density: f64,
}

struct Transition {
    state: State,
    accept_prob: f64,
    divergent: bool,
}

struct Hamiltonian<'a, M: LogDensity> {
    model: &'a M,
    inv_mass: Vec<f64>,
}

impl<'a, M: LogDensity> Hamiltonian<'a, M> {
    fn new(model: &'a M) -> Self {
        Self {
            model,
            inv_mass: vec![1.0; model.dim()],
        }
    }

    fn evaluate(&self, position: Vec<f64>) -> State {
        let mut gradient = vec![0.0; position.len()];
        let log_density = self.model.log_density(&position, &mut gradient);
        State {
            position,
            gradient,
            log_density,
        }
    }

    fn kinetic_energy(&self, momentum: &[f64]) -> f64 {
        0.5 * momentum
            .iter()
            .zip(&self.inv_mass)
            .map(|(p, m)| p * p * m)
            .sum::<f64>()
    }

    fn sample_momentum(&self, rng: &mut ChaCha8Rng) -> Vec<f64> {
        let normal = Normal::standard();
        self.inv_mass
            .iter()
            .map(|m| rng.sample::<f64, _>(&normal) / m.sqrt())
            .collect()
    }

    /// Integrate `n_steps` leapfrog steps. Returns `None` once the density stops being finite.
    fn leapfrog(
        &self,
        start: &State,
        momentum: &mut [f64],
        step_size: f64,
        n_steps: usize,
    ) -> Option<State> {
        let mut position = start.position.clone();
        let mut gradient = start.gradient.clone();
        let mut log_density = start.log_density;
        for _ in 0..n_steps {
            for (p, g) in momentum.iter_mut().zip(&gradient) {
                *p += 0.5 * step_size * g;
            }
            for ((q, p), m) in position.iter_mut().zip(momentum.iter()).zip(&self.inv_mass) {
                *q += step_size * m * p;
            }
            log_density = self.model.log_density(&position, &mut gradient);
            if !log_density.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
                return None;
            }
            for (p, g) in momentum.iter_mut().zip(&gradient) {
                *p += 0.5 * step_size * g;
            }
        }
        Some(State {
            position,
            gradient,
            log_density,
        })
    }

    fn transition(
        &self,
        state: &State,
        step_size: f64,
        n_steps: usize,
        rng: &mut ChaCha8Rng,
    ) -> Transition {
        let mut momentum = self.sample_momentum(rng);
        let initial_energy = -state.log_density + self.kinetic_energy(&momentum);
        let proposal = self.leapfrog(state, &mut momentum, step_size, n_steps);
        let (accept_prob, divergent) = match &proposal {
            Some(proposal) => {
                let energy = -proposal.log_density + self.kinetic_energy(&momentum);
                let energy_error = energy - initial_energy;
                if !energy_error.is_finite() || energy_error > MAX_ENERGY_ERROR {
                    (0.0, true)
                } else {
                    ((-energy_error).exp().min(1.0), false)
                }
            }
            None => (0.0, true),
        };
        let accepted = accept_prob > 0.0 && rng.gen::<f64>() < accept_prob;
        let state = match proposal {
            Some(proposal) if accepted => proposal,
            _ => state.clone(),
        };
        Transition {
            state,
            accept_prob,
            divergent,
        }
    }

    /// Double or halve the step size until a single leapfrog step crosses acceptance 0.5.
    fn find_reasonable_step_size(
        &self,
        state: &State,
        initial: f64,
        rng: &mut ChaCha8Rng,
    ) -> f64 {
        let mut step_size = initial;
        let mut direction = 0.0;
        for _ in 0..50 {
            let mut momentum = self.sample_momentum(rng);
            let initial_energy = -state.log_density + self.kinetic_energy(&momentum);
            let accept_prob = match self.leapfrog(state, &mut momentum, step_size, 1) {
                Some(proposal) => {
                    let energy = -proposal.log_density + self.kinetic_energy(&momentum);
                    (initial_energy - energy).exp().min(1.0)
                }
                None => 0.0,
            };
            if direction == 0.0 {
                direction = if accept_prob > 0.5 { 1.0 } else { -1.0 };
            }
            if (direction > 0.0 && accept_prob <= 0.5) || (direction < 0.0 && accept_prob >= 0.5)
            {
                break;
            }
            step_size *= 2f64.powf(direction);
        }
        step_size
    }
}

fn initial_state<M: LogDensity>(
    hamiltonian: &Hamiltonian<M>,
    rng: &mut ChaCha8Rng,
) -> Result<State> {
    let init = hamiltonian.model.initial_point();
    for _ in 0..MAX_INIT_ATTEMPTS {
        let position = init
            .iter()
            .map(|x| x + rng.gen_range(-INIT_JITTER..INIT_JITTER))
            .collect();
        let state = hamiltonian.evaluate(position);
        if state.log_density.is_finite() && state.gradient.iter().all(|g| g.is_finite()) {
            return Ok(state);
        }
    }
    Err(Co2castError::SamplerFailure(format!(
        "no finite starting point found in {MAX_INIT_ATTEMPTS} attempts"
    ))
    .into())
}

fn n_leapfrog_steps(config: &SamplerConfig, step_size: f64, rng: &mut ChaCha8Rng) -> usize {
    let length = config.path_length * rng.gen_range(0.5..1.5);
    ((length / step_size).ceil() as usize).clamp(1, config.max_leapfrog_steps.max(1))
}

fn run_chain<M: LogDensity>(model: &M, config: &SamplerConfig, chain: usize) -> Result<Chain> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    rng.set_stream(chain as u64);

    let mut hamiltonian = Hamiltonian::new(model);
    let mut state = initial_state(&hamiltonian, &mut rng)?;
    let mut step_size = hamiltonian.find_reasonable_step_size(&state, 1.0, &mut rng);
    let mut adaptation = DualAveraging::new(step_size, config.target_accept);

    let windows = adaptation_windows(config.tune);
    let mut variance = RunningVariance::new(model.dim());
    for iteration in 0..config.tune {
        let n_steps = n_leapfrog_steps(config, step_size, &mut rng);
        let transition = hamiltonian.transition(&state, step_size, n_steps, &mut rng);
        state = transition.state;
        step_size = adaptation.update(transition.accept_prob);

        if let Some(&(_, end)) = windows
            .iter()
            .find(|(start, end)| (*start..*end).contains(&iteration))
        {
            variance.add(&state.position);
            if iteration + 1 == end {
                hamiltonian.inv_mass = variance.regularized();
                variance = RunningVariance::new(model.dim());
                step_size = hamiltonian.find_reasonable_step_size(&state, step_size, &mut rng);
                adaptation = DualAveraging::new(step_size, config.target_accept);
                debug!(
                    "chain {chain}: mass matrix updated at iteration {}, step size {step_size:.4}",
                    iteration + 1
                );
            }
        }
    }
    if config.tune > 0 {
        step_size = adaptation.final_step_size();
    }

    let mut draws = Vec::with_capacity(config.draws);
    let mut accept_sum = 0.0;
    let mut divergences = 0;
    let mut steps_sum = 0;
    for _ in 0..config.draws {
        let n_steps = n_leapfrog_steps(config, step_size, &mut rng);
        let transition = hamiltonian.transition(&state, step_size, n_steps, &mut rng);
        state = transition.state;
        accept_sum += transition.accept_prob;
        steps_sum += n_steps;
        if transition.divergent {
            divergences += 1;
        }
        draws.push(state.position.clone());
    }

    let n = config.draws.max(1) as f64;
    let stats = ChainStats {
        chain,
        mean_accept: accept_sum / n,
        divergences,
        step_size,
        mean_leapfrog_steps: steps_sum as f64 / n,
    };
    if divergences > 0 {
        warn!("chain {chain}: {divergences} divergent transitions after tuning");
    }
    debug!("chain {chain}: {stats:?}");
    Ok(Chain { stats, draws })
}

/// Run `config.chains` chains in parallel. Chains are returned in index order.
pub fn sample<M: LogDensity>(model: &M, config: &SamplerConfig) -> Result<Vec<Chain>> {
    if config.chains == 0 || config.draws == 0 {
        return Err(Co2castError::SamplerFailure(
            "at least one chain and one draw are required".into(),
        )
        .into());
    }
    info!(
        "sampling {} chains: {} tuning + {} draws each",
        config.chains, config.tune, config.draws
    );
    (0..config.chains)
        .into_par_iter()
        .map(|chain| run_chain(model, config, chain))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Independent normals with the given standard deviations
    struct Gaussian {
        sd: Vec<f64>,
    }

    impl LogDensity for Gaussian {
        fn dim(&self) -> usize {
            self.sd.len()
        }

        fn log_density(&self, position: &[f64], gradient: &mut [f64]) -> f64 {
            let mut log_density = 0.0;
            for ((x, sd), g) in position.iter().zip(&self.sd).zip(gradient.iter_mut()) {
                log_density -= 0.5 * (x / sd).powi(2);
                *g = -x / (sd * sd);
            }
            log_density
        }

        fn initial_point(&self) -> Vec<f64> {
            vec![0.0; self.sd.len()]
        }
    }

    fn config(draws: usize, tune: usize, chains: usize) -> SamplerConfig {
        SamplerConfig {
            draws,
            tune,
            chains,
            ..SamplerConfig::default()
        }
    }

    fn moments(chains: &[Chain], coord: usize) -> (f64, f64) {
        let values: Vec<f64> = chains
            .iter()
            .flat_map(|chain| chain.draws.iter().map(|draw| draw[coord]))
            .collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (mean, var)
    }

    #[test]
    fn windows_double_and_fill_warmup() {
        assert_eq!(
            adaptation_windows(1000),
            vec![(75, 100), (100, 150), (150, 250), (250, 450), (450, 950)]
        );
        assert_eq!(adaptation_windows(100), vec![(15, 90)]);
        assert!(adaptation_windows(10).is_empty());
    }

    #[test]
    fn dual_averaging_shrinks_step_when_rejecting() {
        let mut adaptation = DualAveraging::new(1.0, 0.9);
        let first = adaptation.update(0.0);
        let second = adaptation.update(0.0);
        assert!(second < first);
        assert!(adaptation.final_step_size() > 0.0);
    }

    #[test]
    fn recovers_moments_of_scaled_gaussian() -> Result<()> {
        let model = Gaussian {
            sd: vec![1.0, 10.0],
        };
        let chains = sample(&model, &config(1000, 500, 2))?;
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().all(|chain| chain.draws.len() == 1000));

        let (mean, var) = moments(&chains, 0);
        assert!(mean.abs() < 0.2, "mean {mean}");
        assert!((0.7..1.3).contains(&var), "var {var}");
        let (mean, var) = moments(&chains, 1);
        assert!(mean.abs() < 2.0, "mean {mean}");
        assert!((70.0..130.0).contains(&var), "var {var}");

        for chain in &chains {
            assert!(chain.stats.mean_accept > 0.6);
            assert_eq!(chain.stats.divergences, 0);
        }
        Ok(())
    }

    #[test]
    fn same_seed_gives_same_draws() -> Result<()> {
        let model = Gaussian { sd: vec![1.0] };
        let first = sample(&model, &config(50, 30, 3))?;
        let second = sample(&model, &config(50, 30, 3))?;
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.draws, b.draws);
            assert_eq!(a.stats, b.stats);
        }
        assert_ne!(first[0].draws, first[1].draws);
        Ok(())
    }

    #[test]
    fn zero_chains_is_an_error() {
        let model = Gaussian { sd: vec![1.0] };
        let err = sample(&model, &config(10, 10, 0)).unwrap_err();
        assert!(matches!(
            err.downcast::<Co2castError>().unwrap(),
            Co2castError::SamplerFailure(_)
        ));
    }
}
