//! Post-processing of sampled chains.
//!
//! None of this is used while sampling. The closed-form posterior in
//! particular is only there to check a sampler against, since computing it
//! is exactly what the Metropolis chain avoids.

use std::{fmt::Debug, hash::Hash};

use itertools::Itertools;

use crate::{
    model::{Model, StateIdx},
    trace::{Histogram, Trace},
};

/// Normalized posterior `prior * likelihood / Σ prior * likelihood`.
///
/// Returns `None` if every state has zero posterior mass.
pub fn exact_posterior<M: Model + ?Sized>(model: &M) -> Option<Vec<f64>> {
    let numerators = (0..model.num_states())
        .map(|idx| model.unnormalized(idx))
        .collect_vec();
    let total: f64 = numerators.iter().sum();
    if total <= 0. || !total.is_finite() {
        return None;
    }
    Some(numerators.into_iter().map(|n| n / total).collect())
}

/// Fraction of proposals that were accepted, pooled over all chains.
pub fn acceptance_rate(trace: &Trace) -> f64 {
    let (proposed, accepted) = trace
        .chains
        .iter()
        .flat_map(|chain| chain.proposals().iter().zip(chain.accepted()))
        .filter(|(proposal, _)| proposal.is_some())
        .fold((0usize, 0usize), |(p, a), (_, &acc)| (p + 1, a + acc as usize));
    if proposed == 0 {
        return 0.;
    }
    accepted as f64 / proposed as f64
}

/// Total variation distance between two distributions over the same states.
///
/// # Panics
///
/// If `p` and `q` have different lengths.
pub fn total_variation(p: &[f64], q: &[f64]) -> f64 {
    assert_eq!(p.len(), q.len(), "distributions over different states");
    0.5 * p.iter().zip(q).map(|(a, b)| (a - b).abs()).sum::<f64>()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub df: usize,
    pub pvalue: f64,
}

/// Pearson chi-square test that two histograms come from the same
/// distribution.
///
/// States that neither histogram visited are left out, and the degrees of
/// freedom shrink accordingly. The test assumes independent draws, so thin
/// autocorrelated chains before using it.
///
/// Returns `None` if the histograms cover different states, if either is
/// empty, or if fewer than two states were visited.
pub fn chi_square_homogeneity<S>(a: &Histogram<S>, b: &Histogram<S>) -> Option<ChiSquareResult>
where
    S: Clone + Eq + Hash + Debug,
{
    if a.labels() != b.labels() {
        return None;
    }
    let (n_a, n_b) = (a.total() as f64, b.total() as f64);
    if n_a == 0. || n_b == 0. {
        return None;
    }
    let n = n_a + n_b;

    let mut statistic = 0.;
    let mut cells = 0usize;
    for (&count_a, &count_b) in a.counts().iter().zip(b.counts()) {
        let row = (count_a + count_b) as f64;
        if row == 0. {
            continue;
        }
        cells += 1;
        let expected_a = row * n_a / n;
        let expected_b = row * n_b / n;
        statistic += (count_a as f64 - expected_a).powi(2) / expected_a;
        statistic += (count_b as f64 - expected_b).powi(2) / expected_b;
    }
    if cells < 2 {
        return None;
    }
    let df = cells - 1;
    Some(ChiSquareResult {
        statistic,
        df,
        pvalue: chi_square_sf(statistic, df),
    })
}

/// Survival function of the chi-square distribution.
fn chi_square_sf(x: f64, df: usize) -> f64 {
    1. - regularized_lower_gamma(df as f64 / 2., x / 2.)
}

/// Regularized lower incomplete gamma function P(a, x).
fn regularized_lower_gamma(a: f64, x: f64) -> f64 {
    if x <= 0. {
        return 0.;
    }
    if x < a + 1. {
        // Series expansion
        let mut sum = 1. / a;
        let mut term = sum;
        for n in 1..500 {
            term *= x / (a + n as f64);
            sum += term;
            if term.abs() < sum.abs() * 1e-15 {
                break;
            }
        }
        (sum.ln() - x + a * x.ln() - ln_gamma(a)).exp().clamp(0., 1.)
    } else {
        // Continued fraction for the upper tail (modified Lentz)
        let tiny = 1e-300;
        let mut b = x + 1. - a;
        let mut c = 1. / tiny;
        let mut d = 1. / b;
        let mut h = d;
        for i in 1..500 {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.;
            d = an * d + b;
            if d.abs() < tiny {
                d = tiny;
            }
            c = b + an / c;
            if c.abs() < tiny {
                c = tiny;
            }
            d = 1. / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.).abs() < 1e-15 {
                break;
            }
        }
        let upper = (-x + a * x.ln() - ln_gamma(a)).exp() * h;
        (1. - upper).clamp(0., 1.)
    }
}

/// Lanczos approximation of ln Γ(x) for x > 0.
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1. - x);
    }
    let x = x - 1.;
    let t = x + 7.5;
    let series = COEFFS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFS[0], |acc, (i, c)| acc + c / (x + i as f64));
    0.5 * (2. * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Sample autocorrelation of `values` at `lag`.
pub fn autocorrelation(values: &[f64], lag: usize) -> f64 {
    let n = values.len();
    if lag >= n {
        return 0.;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    if variance < 1e-15 {
        return 0.;
    }
    let covariance = values[..n - lag]
        .iter()
        .zip(&values[lag..])
        .map(|(x, y)| (x - mean) * (y - mean))
        .sum::<f64>()
        / n as f64;
    covariance / variance
}

/// Effective sample size `n / (1 + 2 Σ ρ_k)`, summing autocorrelations
/// until they drop below 0.05.
pub fn effective_sample_size(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 4 {
        return n as f64;
    }
    let max_lag = (n / 2).min(1000);
    let mut sum_rho = 0.;
    for lag in 1..max_lag {
        let rho = autocorrelation(values, lag);
        if rho.abs() < 0.05 {
            break;
        }
        sum_rho += rho;
    }
    let tau = 1. + 2. * sum_rho;
    if tau > 0. {
        (n as f64 / tau).min(n as f64)
    } else {
        n as f64
    }
}

/// Split R-hat of the indicator `1[chain == state]`.
///
/// Every chain is cut in half and the halves are treated as separate
/// chains. Values close to one mean the chains agree on how much time they
/// spend in `state`. Returns `None` if there are fewer than four draws per
/// chain, or if no half-chain varies at all and the means agree.
pub fn split_rhat(trace: &Trace, state: StateIdx) -> Option<f64> {
    let min_len = trace.chains.iter().map(|chain| chain.len()).min()?;
    let half = min_len / 2;
    if half < 2 {
        return None;
    }
    let halves = trace
        .chains
        .iter()
        .flat_map(|chain| {
            let indicator = chain.indicator(state);
            [indicator[..half].to_vec(), indicator[half..2 * half].to_vec()]
        })
        .collect_vec();

    let m = halves.len() as f64;
    let n = half as f64;
    let means = halves
        .iter()
        .map(|h| h.iter().sum::<f64>() / n)
        .collect_vec();
    let grand_mean = means.iter().sum::<f64>() / m;
    let between = n / (m - 1.) * means.iter().map(|mu| (mu - grand_mean).powi(2)).sum::<f64>();
    let within = halves
        .iter()
        .zip(&means)
        .map(|(h, mu)| h.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / (n - 1.))
        .sum::<f64>()
        / m;
    if within == 0. {
        return if between == 0. { None } else { Some(f64::INFINITY) };
    }
    let var_plus = (n - 1.) / n * within + between / n;
    Some((var_plus / within).sqrt())
}
