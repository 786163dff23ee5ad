use std::time::{Duration, Instant};

use discrete_metropolis::{
    diagnostics::{chi_square_homogeneity, exact_posterior, split_rhat, total_variation},
    sample_chain, sample_parallel, ConfigError, DiscretePosterior, MetropolisError,
    MetropolisSettings, Model, Sampler, SamplerWaitResult, StateIdx, Trace,
};
use pretty_assertions::assert_eq;
use rand::{rngs::StdRng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const STATES: [&str; 4] = ["Texas", "Montana", "California", "Virginia"];

fn cowboy_hat() -> DiscretePosterior<&'static str> {
    DiscretePosterior::from_entries(
        STATES,
        STATES.into_iter().zip([0.7, 0.1, 0.15, 0.05]),
        STATES.into_iter().zip([0.10, 0.09, 0.01, 0.0001]),
    )
    .expect("valid model")
}

fn texas(model: &DiscretePosterior<&'static str>) -> StateIdx {
    model.space().initial(&"Texas").expect("Texas is a state")
}

#[test]
fn converges_to_closed_form() -> anyhow::Result<()> {
    let model = cowboy_hat();
    let settings = MetropolisSettings {
        num_draws: 200_000,
        ..Default::default()
    };
    let start = Instant::now();
    let trace = sample_chain(&model, settings, texas(&model), 0, StdRng::seed_from_u64(42))?;
    dbg!(start.elapsed());

    let total: f64 = (0..4).map(|idx| model.unnormalized(idx)).sum();
    let expected = 0.7 * 0.10 / total;

    let hist = trace.histogram(model.space());
    assert_eq!(hist.total(), 200_000);
    let texas = hist.frequency(&"Texas").unwrap();
    assert!(
        (texas - expected).abs() < 0.03,
        "Texas frequency {texas} too far from {expected}"
    );

    let exact = exact_posterior(&model).unwrap();
    let estimated: Vec<_> = (0..4).map(|idx| hist.frequency_at(idx)).collect();
    assert!(total_variation(&exact, &estimated) < 0.03);
    Ok(())
}

#[test]
fn chain_shape() -> anyhow::Result<()> {
    let model = cowboy_hat();
    for num_draws in [1, 2, 17, 5000] {
        let settings = MetropolisSettings {
            num_draws,
            ..Default::default()
        };
        let trace = sample_chain(&model, settings, 2, 0, StdRng::seed_from_u64(num_draws))?;
        assert_eq!(trace.len() as u64, num_draws);
        assert_eq!(trace.states()[0], 2);
        assert_eq!(trace.proposals()[0], None);
        assert!(trace.is_complete());

        for i in 1..trace.len() {
            let state = trace.states()[i];
            let proposal = trace.proposals()[i].expect("every later step proposes");
            if trace.accepted()[i] {
                assert_eq!(state, proposal);
            } else {
                assert_eq!(state, trace.states()[i - 1]);
            }
        }

        for entry in trace.entries() {
            assert_eq!(entry.prior, model.prior(entry.state));
            assert_eq!(entry.likelihood, model.likelihood(entry.state));
        }
    }
    Ok(())
}

#[test]
fn same_seed_same_chain() -> anyhow::Result<()> {
    let model = cowboy_hat();
    let settings = MetropolisSettings {
        num_draws: 20_000,
        ..Default::default()
    };
    let a = sample_chain(&model, settings, 1, 0, ChaCha8Rng::seed_from_u64(7))?;
    let b = sample_chain(&model, settings, 1, 0, ChaCha8Rng::seed_from_u64(7))?;
    assert_eq!(a, b);

    let c = sample_chain(&model, settings, 1, 0, ChaCha8Rng::seed_from_u64(8))?;
    assert_ne!(a.states(), c.states());
    Ok(())
}

#[test]
fn dominating_proposals_always_accepted() -> anyhow::Result<()> {
    let model = cowboy_hat();
    for seed in 0..20 {
        let settings = MetropolisSettings {
            num_draws: 5_000,
            ..Default::default()
        };
        let trace = sample_chain(&model, settings, 3, 0, StdRng::seed_from_u64(seed))?;
        let states = trace.states();
        for i in 1..trace.len() {
            let proposal = trace.proposals()[i].unwrap();
            if model.unnormalized(proposal) > model.unnormalized(states[i - 1]) {
                assert!(trace.accepted()[i]);
                assert_eq!(states[i], proposal);
            }
        }
    }
    Ok(())
}

#[test]
fn zero_over_zero_fails_fast() {
    let model = DiscretePosterior::from_entries(
        STATES,
        STATES.into_iter().zip([0.7, 0.1, 0.2, 0.]),
        STATES.into_iter().zip([0.10, 0.09, 0.01, 0.]),
    )
    .unwrap();
    let settings = MetropolisSettings {
        num_draws: 100,
        ..Default::default()
    };

    let failures = (0..200)
        .filter_map(|seed| sample_chain(&model, settings, 3, 0, StdRng::seed_from_u64(seed)).err())
        .collect::<Vec<_>>();
    // The first proposal hits Virginia again with probability 1/4.
    assert!(!failures.is_empty());
    for err in failures {
        match err {
            MetropolisError::DegenerateRatio {
                draw,
                current,
                proposed,
            } => {
                assert_eq!(draw, 1);
                assert_eq!(current, "\"Virginia\"");
                assert_eq!(proposed, "\"Virginia\"");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[test]
fn rescaling_does_not_change_the_posterior() -> anyhow::Result<()> {
    let model = cowboy_hat();
    let prior_scaled = model.with_prior(model.prior_table().scaled(13.)?)?;
    let likelihood = model.likelihood_table().scaled(model.space(), 0.3)?;
    let likelihood_scaled = model.with_likelihood(likelihood)?;

    // Thinning makes the kept draws close to independent.
    let settings = MetropolisSettings {
        num_draws: 20_000,
        thin: 25,
        num_chains: 1,
        ..Default::default()
    };
    let start = texas(&model);
    let base = sample_chain(&model, settings, start, 0, StdRng::seed_from_u64(1))?;
    let base = base.histogram(model.space());

    // Scaling by a power of two is exact, so the very same chain comes out.
    let doubled = model.with_prior(model.prior_table().scaled(2.)?)?;
    let a = sample_chain(&model, settings, start, 0, StdRng::seed_from_u64(9))?;
    let b = sample_chain(&doubled, settings, start, 0, StdRng::seed_from_u64(9))?;
    assert_eq!(a.states(), b.states());

    for (seed, scaled) in [(2, &prior_scaled), (3, &likelihood_scaled)] {
        let trace = sample_chain(scaled, settings, start, 0, StdRng::seed_from_u64(seed))?;
        let hist = trace.histogram(scaled.space());
        let result = chi_square_homogeneity(&base, &hist).unwrap();
        assert!(result.pvalue > 1e-4, "histograms differ: {result:?}");
    }
    Ok(())
}

#[test]
fn montana_hats_shift_the_posterior() -> anyhow::Result<()> {
    let mut model = cowboy_hat();
    model.set_likelihood(&"Montana", 1.)?;
    let exact = exact_posterior(&model).unwrap();
    assert!(exact[1] > exact[0]);

    let settings = MetropolisSettings {
        num_draws: 50_000,
        num_chains: 4,
        seed: 5,
        ..Default::default()
    };
    let trace = sample_parallel(&model, settings, 0)?;
    let hist = trace.histogram(model.space());
    approx::assert_abs_diff_eq!(hist.frequency(&"Montana").unwrap(), exact[1], epsilon = 0.03);
    Ok(())
}

#[test]
fn unknown_start() {
    let model = cowboy_hat();
    assert!(model.space().initial(&"Ohio").is_err());
    let err = sample_chain(
        &model,
        MetropolisSettings::default(),
        4,
        0,
        StdRng::seed_from_u64(0),
    )
    .unwrap_err();
    assert!(matches!(err, MetropolisError::Config(_)));
}

/// A model that reports raw numbers without any checks.
struct Unchecked {
    prior: [f64; 2],
    likelihood: [f64; 2],
}

impl Model for Unchecked {
    fn num_states(&self) -> usize {
        2
    }

    fn prior(&self, state: StateIdx) -> f64 {
        self.prior[state]
    }

    fn likelihood(&self, state: StateIdx) -> f64 {
        self.likelihood[state]
    }
}

#[test]
fn invalid_models_fail_before_sampling() {
    let settings = MetropolisSettings {
        num_draws: 1000,
        ..Default::default()
    };
    let negative = Unchecked {
        prior: [-1., -2.],
        likelihood: [1., 0.5],
    };
    let err = sample_chain(&negative, settings, 0, 0, StdRng::seed_from_u64(0)).unwrap_err();
    assert_eq!(
        err,
        MetropolisError::Config(ConfigError::InvalidPrior {
            state: "#0".into(),
            value: -1.
        })
    );

    let too_likely = Unchecked {
        prior: [0.5, 0.5],
        likelihood: [1., 5.],
    };
    let err = sample_chain(&too_likely, settings, 0, 0, StdRng::seed_from_u64(0)).unwrap_err();
    assert_eq!(
        err,
        MetropolisError::Config(ConfigError::InvalidLikelihood {
            state: "#1".into(),
            value: 5.
        })
    );
    assert!(sample_parallel(&too_likely, settings, 0).is_err());
    assert!(Sampler::new(too_likely, settings, 0, 1, None).is_err());

    let valid = Unchecked {
        prior: [0.5, 0.5],
        likelihood: [1., 0.5],
    };
    let trace = sample_chain(&valid, settings, 0, 0, StdRng::seed_from_u64(0)).unwrap();
    assert!(trace.is_complete());
}

fn sample_threaded(settings: MetropolisSettings) -> anyhow::Result<Trace> {
    let model = cowboy_hat();
    let start = texas(&model);
    let mut sampler = Sampler::new(model, settings, start, 4, None)?;

    let trace = loop {
        match sampler.wait_timeout(Duration::from_secs(1)) {
            SamplerWaitResult::Trace(trace) => break trace,
            SamplerWaitResult::Timeout(new_sampler) => sampler = new_sampler,
            SamplerWaitResult::Err(err, _trace) => return Err(err),
        };
    };
    Ok(trace)
}

#[test]
fn run_threaded() -> anyhow::Result<()> {
    let start = Instant::now();
    let settings = MetropolisSettings {
        num_draws: 50_000,
        num_tune: 1_000,
        num_chains: 6,
        seed: 42,
        ..Default::default()
    };
    let trace = sample_threaded(settings)?;
    dbg!(start.elapsed());
    assert_eq!(trace.chains.len(), 6);
    assert!(trace.is_complete());
    assert_eq!(trace.total_draws(), 6 * 50_000);

    let rhat = split_rhat(&trace, 0).unwrap();
    assert!(rhat < 1.05, "chains disagree, R-hat {rhat}");
    Ok(())
}
