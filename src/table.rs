//! Validated per-state probability tables.
//!
//! Both tables store one value per state, in state space order. Every value
//! is checked when the table is built or changed, so the sampler can use
//! them without further checks.

use std::{fmt::Debug, hash::Hash};

use crate::{
    metropolis::ConfigError,
    state_space::{StateIdx, StateSpace},
};

fn collect_table<S, F>(
    space: &StateSpace<S>,
    table: &'static str,
    entries: impl IntoIterator<Item = (S, f64)>,
    check: F,
) -> Result<Box<[f64]>, ConfigError>
where
    S: Clone + Eq + Hash + Debug,
    F: Fn(&S, f64) -> Result<(), ConfigError>,
{
    let mut values: Vec<Option<f64>> = vec![None; space.len()];
    for (state, value) in entries {
        let Some(idx) = space.index_of(&state) else {
            return Err(ConfigError::UnknownState {
                table,
                state: format!("{:?}", state),
            });
        };
        check(&state, value)?;
        if values[idx].replace(value).is_some() {
            return Err(ConfigError::DuplicateEntry {
                table,
                state: format!("{:?}", state),
            });
        }
    }
    values
        .into_iter()
        .enumerate()
        .map(|(idx, value)| {
            value.ok_or_else(|| ConfigError::MissingEntry {
                table,
                state: space.describe(idx),
            })
        })
        .collect()
}

pub(crate) fn valid_prior(value: f64) -> bool {
    value.is_finite() && value >= 0.
}

pub(crate) fn valid_likelihood(value: f64) -> bool {
    (0. ..=1.).contains(&value)
}

fn check_prior<S: Debug>(state: &S, value: f64) -> Result<(), ConfigError> {
    if valid_prior(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidPrior {
            state: format!("{:?}", state),
            value,
        })
    }
}

fn check_likelihood<S: Debug>(state: &S, value: f64) -> Result<(), ConfigError> {
    if valid_likelihood(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidLikelihood {
            state: format!("{:?}", state),
            value,
        })
    }
}

fn check_scale(factor: f64) -> Result<(), ConfigError> {
    if factor.is_finite() && factor > 0. {
        Ok(())
    } else {
        Err(ConfigError::InvalidScale(factor))
    }
}

/// Prior mass per state. Values are finite and non-negative, with at least
/// one positive value. They do not have to sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct Prior {
    mass: Box<[f64]>,
}

impl Prior {
    pub fn new<S>(
        space: &StateSpace<S>,
        entries: impl IntoIterator<Item = (S, f64)>,
    ) -> Result<Self, ConfigError>
    where
        S: Clone + Eq + Hash + Debug,
    {
        let mass = collect_table(space, "prior", entries, check_prior)?;
        if mass.iter().all(|&m| m == 0.) {
            return Err(ConfigError::ZeroPrior);
        }
        Ok(Self { mass })
    }

    /// Equal mass on every state.
    pub fn uniform<S>(space: &StateSpace<S>) -> Self
    where
        S: Clone + Eq + Hash + Debug,
    {
        let mass = vec![1. / space.len() as f64; space.len()].into();
        Self { mass }
    }

    /// Multiply every mass by `factor`. The posterior does not change.
    pub fn scaled(&self, factor: f64) -> Result<Self, ConfigError> {
        check_scale(factor)?;
        let mass: Box<[f64]> = self.mass.iter().map(|m| m * factor).collect();
        if mass.iter().any(|m| !m.is_finite()) {
            return Err(ConfigError::InvalidScale(factor));
        }
        Ok(Self { mass })
    }

    pub fn get<S>(&self, space: &StateSpace<S>, state: &S) -> Option<f64>
    where
        S: Clone + Eq + Hash + Debug,
    {
        space.index_of(state).map(|idx| self.mass[idx])
    }

    pub fn at(&self, idx: StateIdx) -> f64 {
        self.mass[idx]
    }

    pub fn len(&self) -> usize {
        self.mass.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.mass
    }
}

/// Probability of the observed evidence for each state, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Likelihood {
    values: Box<[f64]>,
}

impl Likelihood {
    pub fn new<S>(
        space: &StateSpace<S>,
        entries: impl IntoIterator<Item = (S, f64)>,
    ) -> Result<Self, ConfigError>
    where
        S: Clone + Eq + Hash + Debug,
    {
        let values = collect_table(space, "likelihood", entries, check_likelihood)?;
        Ok(Self { values })
    }

    /// Replace the likelihood of one state, e.g. after new evidence came in.
    pub fn set<S>(
        &mut self,
        space: &StateSpace<S>,
        state: &S,
        value: f64,
    ) -> Result<(), ConfigError>
    where
        S: Clone + Eq + Hash + Debug,
    {
        let Some(idx) = space.index_of(state) else {
            return Err(ConfigError::UnknownState {
                table: "likelihood",
                state: format!("{:?}", state),
            });
        };
        if idx >= self.values.len() {
            return Err(ConfigError::SizeMismatch {
                expected: space.len(),
                got: self.values.len(),
            });
        }
        check_likelihood(state, value)?;
        self.values[idx] = value;
        Ok(())
    }

    /// Multiply every value by `factor`. Fails if a value leaves `[0, 1]`.
    pub fn scaled<S>(&self, space: &StateSpace<S>, factor: f64) -> Result<Self, ConfigError>
    where
        S: Clone + Eq + Hash + Debug,
    {
        check_scale(factor)?;
        if self.values.len() != space.len() {
            return Err(ConfigError::SizeMismatch {
                expected: space.len(),
                got: self.values.len(),
            });
        }
        let values: Box<[f64]> = self.values.iter().map(|v| v * factor).collect();
        for (label, &value) in space.labels().iter().zip(values.iter()) {
            check_likelihood(label, value)?;
        }
        Ok(Self { values })
    }

    pub fn get<S>(&self, space: &StateSpace<S>, state: &S) -> Option<f64>
    where
        S: Clone + Eq + Hash + Debug,
    {
        space.index_of(state).map(|idx| self.values[idx])
    }

    pub fn at(&self, idx: StateIdx) -> f64 {
        self.values[idx]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}
