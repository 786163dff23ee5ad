//! Core abstractions for discrete posterior models.
//!
//! Provides the `Model` trait, the unnormalized target a Metropolis chain
//! walks over, and `DiscretePosterior`, which builds that target from a
//! prior and a likelihood table.

use std::{fmt::Debug, hash::Hash};

use crate::{
    metropolis::ConfigError,
    state_space::StateSpace,
    table::{valid_likelihood, valid_prior, Likelihood, Prior},
};

pub use crate::state_space::StateIdx;

/// An unnormalized posterior over a finite set of states.
///
/// Only ratios of `unnormalized` values are ever used by the sampler, so
/// implementations are free to drop any constant factor.
///
/// The trait is thread-safe to enable parallel sampling scenarios.
pub trait Model: Send + Sync {
    /// Number of states. Valid state indices are `0..num_states()`.
    fn num_states(&self) -> usize;

    /// Prior mass of a state.
    fn prior(&self, state: StateIdx) -> f64;

    /// Probability of the evidence given a state.
    fn likelihood(&self, state: StateIdx) -> f64;

    /// `prior * likelihood`, proportional to the posterior.
    fn unnormalized(&self, state: StateIdx) -> f64 {
        self.prior(state) * self.likelihood(state)
    }

    /// Human readable name of a state, used in error messages.
    fn describe(&self, state: StateIdx) -> String {
        format!("#{}", state)
    }
}

/// Check every value a model reports before a chain runs on it.
///
/// `DiscretePosterior` already validates its tables, other implementations
/// are only checked here.
pub(crate) fn check_values<M: Model + ?Sized>(model: &M) -> Result<(), ConfigError> {
    let mut any_mass = false;
    for state in 0..model.num_states() {
        let prior = model.prior(state);
        if !valid_prior(prior) {
            return Err(ConfigError::InvalidPrior {
                state: model.describe(state),
                value: prior,
            });
        }
        let likelihood = model.likelihood(state);
        if !valid_likelihood(likelihood) {
            return Err(ConfigError::InvalidLikelihood {
                state: model.describe(state),
                value: likelihood,
            });
        }
        let value = model.unnormalized(state);
        if !valid_prior(value) {
            return Err(ConfigError::InvalidPosterior {
                state: model.describe(state),
                value,
            });
        }
        any_mass |= prior > 0.;
    }
    if !any_mass {
        return Err(ConfigError::ZeroPrior);
    }
    Ok(())
}

/// Posterior built from a state space, a prior and a likelihood.
#[derive(Debug, Clone)]
pub struct DiscretePosterior<S> {
    space: StateSpace<S>,
    prior: Prior,
    likelihood: Likelihood,
}

impl<S> DiscretePosterior<S>
where
    S: Clone + Eq + Hash + Debug,
{
    pub fn new(
        space: StateSpace<S>,
        prior: Prior,
        likelihood: Likelihood,
    ) -> Result<Self, ConfigError> {
        for len in [prior.len(), likelihood.len()] {
            if len != space.len() {
                return Err(ConfigError::SizeMismatch {
                    expected: space.len(),
                    got: len,
                });
            }
        }
        Ok(Self {
            space,
            prior,
            likelihood,
        })
    }

    /// Build the posterior straight from `(state, value)` pairs.
    pub fn from_entries(
        labels: impl IntoIterator<Item = S>,
        prior: impl IntoIterator<Item = (S, f64)>,
        likelihood: impl IntoIterator<Item = (S, f64)>,
    ) -> Result<Self, ConfigError> {
        let space = StateSpace::new(labels)?;
        let prior = Prior::new(&space, prior)?;
        let likelihood = Likelihood::new(&space, likelihood)?;
        Self::new(space, prior, likelihood)
    }

    pub fn space(&self) -> &StateSpace<S> {
        &self.space
    }

    pub fn prior_table(&self) -> &Prior {
        &self.prior
    }

    pub fn likelihood_table(&self) -> &Likelihood {
        &self.likelihood
    }

    /// Change the likelihood of one state between runs.
    pub fn set_likelihood(&mut self, state: &S, value: f64) -> Result<(), ConfigError> {
        self.likelihood.set(&self.space, state, value)
    }

    pub fn with_prior(&self, prior: Prior) -> Result<Self, ConfigError> {
        Self::new(self.space.clone(), prior, self.likelihood.clone())
    }

    pub fn with_likelihood(&self, likelihood: Likelihood) -> Result<Self, ConfigError> {
        Self::new(self.space.clone(), self.prior.clone(), likelihood)
    }
}

impl<S> Model for DiscretePosterior<S>
where
    S: Clone + Eq + Hash + Debug + Send + Sync,
{
    fn num_states(&self) -> usize {
        self.space.len()
    }

    fn prior(&self, state: StateIdx) -> f64 {
        self.prior.at(state)
    }

    fn likelihood(&self, state: StateIdx) -> f64 {
        self.likelihood.at(state)
    }

    fn describe(&self, state: StateIdx) -> String {
        self.space.describe(state)
    }
}

#[cfg(test)]
pub(crate) mod test_models {
    use super::DiscretePosterior;

    pub const STATES: [&str; 4] = ["Texas", "Montana", "California", "Virginia"];
    pub const PRIOR: [f64; 4] = [0.7, 0.1, 0.15, 0.05];
    pub const LIKELIHOOD: [f64; 4] = [0.10, 0.09, 0.01, 0.0001];

    /// Where does someone wearing a cowboy hat come from?
    pub fn cowboy_hat() -> DiscretePosterior<&'static str> {
        DiscretePosterior::from_entries(
            STATES,
            STATES.into_iter().zip(PRIOR),
            STATES.into_iter().zip(LIKELIHOOD),
        )
        .expect("valid cowboy hat model")
    }

    /// Like `cowboy_hat`, but Virginia can never be reached.
    pub fn with_dead_state() -> DiscretePosterior<&'static str> {
        DiscretePosterior::from_entries(
            STATES,
            STATES.into_iter().zip([0.7, 0.1, 0.2, 0.]),
            STATES.into_iter().zip([0.10, 0.09, 0.01, 0.]),
        )
        .expect("valid model")
    }
}

#[cfg(test)]
mod tests {
    use super::{test_models::*, *};
    use pretty_assertions::assert_eq;

    #[test]
    fn unnormalized_is_product() {
        let model = cowboy_hat();
        assert_eq!(model.num_states(), 4);
        for idx in 0..4 {
            assert_eq!(model.unnormalized(idx), PRIOR[idx] * LIKELIHOOD[idx]);
        }
        assert_eq!(model.describe(1), "\"Montana\"");
    }

    #[test]
    fn montana_hats() {
        let mut model = cowboy_hat();
        model.set_likelihood(&"Montana", 1.).unwrap();
        assert_eq!(model.unnormalized(1), 0.1);
        assert!(model.set_likelihood(&"Montana", 2.).is_err());
    }

    struct Raw {
        prior: Vec<f64>,
        likelihood: Vec<f64>,
    }

    impl Model for Raw {
        fn num_states(&self) -> usize {
            self.prior.len()
        }

        fn prior(&self, state: StateIdx) -> f64 {
            self.prior[state]
        }

        fn likelihood(&self, state: StateIdx) -> f64 {
            self.likelihood[state]
        }
    }

    #[test]
    fn hand_written_models_are_checked() {
        let raw = |prior: &[f64], likelihood: &[f64]| Raw {
            prior: prior.to_vec(),
            likelihood: likelihood.to_vec(),
        };
        assert_eq!(check_values(&raw(&[0.5, 0.5], &[0.2, 1.])), Ok(()));
        assert_eq!(
            check_values(&raw(&[-1., -2.], &[1., 0.5])),
            Err(ConfigError::InvalidPrior {
                state: "#0".into(),
                value: -1.
            })
        );
        assert_eq!(
            check_values(&raw(&[1., 2.], &[1., 5.])),
            Err(ConfigError::InvalidLikelihood {
                state: "#1".into(),
                value: 5.
            })
        );
        assert!(matches!(
            check_values(&raw(&[1., f64::NAN], &[0.5, 0.5])),
            Err(ConfigError::InvalidPrior { .. })
        ));
        assert_eq!(
            check_values(&raw(&[0., 0.], &[0.5, 0.5])),
            Err(ConfigError::ZeroPrior)
        );
        assert_eq!(check_values(&cowboy_hat()), Ok(()));
        assert_eq!(check_values(&with_dead_state()), Ok(()));
    }

    #[test]
    fn tables_must_match_space() {
        let model = cowboy_hat();
        let small = StateSpace::new(["a", "b"]).unwrap();
        let prior = Prior::uniform(&small);
        assert_eq!(
            model.with_prior(prior).unwrap_err(),
            ConfigError::SizeMismatch {
                expected: 4,
                got: 2
            }
        );
    }
}
