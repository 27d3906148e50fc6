//! Student-t reference distributions for the exploratory comparison of indicator columns.

use anyhow::Result;
use itertools::Itertools;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, StudentsT};

use crate::error::Co2castError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StudentTParams {
    /// Degrees of freedom
    pub df: f64,
    pub loc: f64,
    pub scale: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct KsResult {
    pub statistic: f64,
    pub p_value: f64,
}

const NELDER_MEAD_MAX_ITER: usize = 5000;
const NELDER_MEAD_TOLERANCE: f64 = 1e-10;

/// `a + t * (b - a)`
fn point_between(a: &[f64], b: &[f64], t: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(a, b)| a + t * (b - a)).collect()
}

/// Minimise `f` with the Nelder-Mead simplex method starting from `start`, with initial edge
/// lengths `steps`.
fn nelder_mead<F: Fn(&[f64]) -> f64>(f: F, start: &[f64], steps: &[f64]) -> Vec<f64> {
    let dim = start.len();
    let mut simplex: Vec<(Vec<f64>, f64)> = std::iter::once(start.to_vec())
        .chain((0..dim).map(|i| {
            let mut vertex = start.to_vec();
            vertex[i] += steps[i];
            vertex
        }))
        .map(|vertex| {
            let value = f(vertex.as_slice());
            (vertex, value)
        })
        .collect();

    for iteration in 0..NELDER_MEAD_MAX_ITER {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (best, worst) = (simplex[0].1, simplex[dim].1);
        if (worst - best).abs() <= NELDER_MEAD_TOLERANCE * (1.0 + best.abs()) {
            debug!("nelder-mead converged after {iteration} iterations");
            break;
        }
        let centroid = (0..dim)
            .map(|i| simplex[..dim].iter().map(|(v, _)| v[i]).sum::<f64>() / dim as f64)
            .collect_vec();
        let worst_vertex = simplex[dim].0.clone();

        // Reflection, expansion and contraction all lie on the line through the worst vertex
        // and the centroid of the others.
        let reflected = point_between(&worst_vertex, &centroid, 2.0);
        let reflected_value = f(&reflected);
        if reflected_value < simplex[0].1 {
            let expanded = point_between(&worst_vertex, &centroid, 3.0);
            let expanded_value = f(&expanded);
            simplex[dim] = if expanded_value < reflected_value {
                (expanded, expanded_value)
            } else {
                (reflected, reflected_value)
            };
        } else if reflected_value < simplex[dim - 1].1 {
            simplex[dim] = (reflected, reflected_value);
        } else {
            let (contracted, contracted_value) = if reflected_value < worst {
                let outside = point_between(&worst_vertex, &centroid, 1.5);
                let value = f(&outside);
                (outside, value)
            } else {
                let inside = point_between(&worst_vertex, &centroid, 0.5);
                let value = f(&inside);
                (inside, value)
            };
            if contracted_value < reflected_value.min(worst) {
                simplex[dim] = (contracted, contracted_value);
            } else {
                let best_vertex = simplex[0].0.clone();
                for (vertex, value) in simplex.iter_mut().skip(1) {
                    *vertex = point_between(&best_vertex, vertex, 0.5);
                    *value = f(vertex.as_slice());
                }
            }
        }
    }
    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    simplex.swap_remove(0).0
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Maximum likelihood fit of a location-scale Student-t. Missing values are dropped.
pub fn fit_student_t(values: &[Option<f64>]) -> Result<StudentTParams> {
    let data = values
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .sorted_by(f64::total_cmp)
        .collect_vec();
    if data.len() < 2 {
        return Err(Co2castError::InsufficientData(data.len()).into());
    }

    let loc = median(&data);
    let (lowest, highest) = (data[0], data[data.len() - 1]);
    if highest - lowest <= f64::EPSILON * lowest.abs().max(highest.abs()) {
        // Every value is identical
        return Ok(StudentTParams {
            df: f64::INFINITY,
            loc,
            scale: 0.0,
        });
    }

    let deviations = data
        .iter()
        .map(|v| (v - loc).abs())
        .sorted_by(f64::total_cmp)
        .collect_vec();
    let mut scale = 1.4826 * median(&deviations);
    if scale <= 0.0 {
        let mean = data.iter().sum::<f64>() / data.len() as f64;
        scale = (data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / data.len() as f64).sqrt();
    }

    let negative_log_likelihood = |theta: &[f64]| -> f64 {
        match StudentsT::new(theta[1], theta[2].exp(), theta[0].exp()) {
            Ok(dist) => -data.iter().map(|x| dist.ln_pdf(*x)).sum::<f64>(),
            Err(_) => f64::INFINITY,
        }
    };
    let theta = nelder_mead(
        negative_log_likelihood,
        &[5f64.ln(), loc, scale.ln()],
        &[0.5, 0.5 * scale, 0.5],
    );
    let params = StudentTParams {
        df: theta[0].exp(),
        loc: theta[1],
        scale: theta[2].exp(),
    };
    debug!("fitted {params:?} to {} values", data.len());
    Ok(params)
}

/// `size` seeded draws from the fitted distribution
pub fn synthetic_from_t(params: &StudentTParams, size: usize, seed: u64) -> Result<Vec<f64>> {
    let dist = StudentsT::new(params.loc, params.scale, params.df)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Ok((0..size).map(|_| rng.sample::<f64, _>(&dist)).collect())
}

/// Asymptotic Kolmogorov distribution survival function
fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let term = sign * (-2.0 * (j * j) as f64 * lambda * lambda).exp();
        sum += term;
        if term.abs() < 1e-12 {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

/// Two-sample Kolmogorov-Smirnov test. Non-finite values are ignored.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> Result<KsResult> {
    let sorted = |values: &[f64]| {
        values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .sorted_by(f64::total_cmp)
            .collect_vec()
    };
    let (a, b) = (sorted(a), sorted(b));
    if a.is_empty() || b.is_empty() {
        return Err(Co2castError::InsufficientData(a.len().min(b.len())).into());
    }
    let (n, m) = (a.len() as f64, b.len() as f64);

    let (mut i, mut j) = (0, 0);
    let mut statistic: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        statistic = statistic.max((i as f64 / n - j as f64 / m).abs());
    }

    let effective = (n * m / (n + m)).sqrt();
    let p_value = kolmogorov_survival((effective + 0.12 + 0.11 / effective) * statistic);
    Ok(KsResult { statistic, p_value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_recovers_location_of_synthetic_sample() -> Result<()> {
        let truth = StudentTParams {
            df: 4.0,
            loc: 10.0,
            scale: 2.0,
        };
        let sample = synthetic_from_t(&truth, 4000, 7)?;
        let values = sample.iter().map(|v| Some(*v)).collect_vec();
        let fitted = fit_student_t(&values)?;
        assert!((fitted.loc - 10.0).abs() < 0.2, "{fitted:?}");
        assert!((fitted.scale - 2.0).abs() < 0.3, "{fitted:?}");
        assert!(fitted.df > 2.0 && fitted.df < 8.0, "{fitted:?}");
        Ok(())
    }

    #[test]
    fn fit_ignores_missing_values() -> Result<()> {
        let fitted = fit_student_t(&[Some(1.0), None, Some(2.0), Some(3.0), None])?;
        assert!((fitted.loc - 2.0).abs() < 0.5);
        assert!(fit_student_t(&[None, Some(1.0)]).is_err());
        Ok(())
    }

    #[test]
    fn constant_values_have_zero_scale() -> Result<()> {
        let values = vec![Some(5f64.ln()); 200];
        let params = fit_student_t(&values)?;
        assert_eq!(params.scale, 0.0);
        assert_eq!(params.loc, 5f64.ln());
        Ok(())
    }

    #[test]
    fn synthetic_draws_are_seeded() -> Result<()> {
        let params = StudentTParams {
            df: 3.0,
            loc: 0.0,
            scale: 1.0,
        };
        assert_eq!(
            synthetic_from_t(&params, 10, 1)?,
            synthetic_from_t(&params, 10, 1)?
        );
        assert_ne!(
            synthetic_from_t(&params, 10, 1)?,
            synthetic_from_t(&params, 10, 2)?
        );
        Ok(())
    }

    #[test]
    fn ks_of_identical_samples_is_zero() -> Result<()> {
        let sample = [3.0, 1.0, 2.0, 2.0, 5.0];
        let result = ks_two_sample(&sample, &sample)?;
        assert_eq!(result.statistic, 0.0);
        assert_eq!(result.p_value, 1.0);
        Ok(())
    }

    #[test]
    fn ks_separates_shifted_samples() -> Result<()> {
        let a = (0..200).map(|i| i as f64 / 200.0).collect_vec();
        let b = (0..200).map(|i| (i + 100) as f64 / 200.0).collect_vec();
        let result = ks_two_sample(&a, &b)?;
        assert!((result.statistic - 0.5).abs() < 1e-9);
        assert!(result.p_value < 1e-6);
        Ok(())
    }
}
