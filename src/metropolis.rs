use rand::Rng;
use rand_distr::{Distribution, Uniform};
use thiserror::Error;

use crate::model::{Model, StateIdx};

/// Problems with the sampler inputs. These are all detected before the
/// first draw.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("state space needs at least two states, got {0}")]
    TooFewStates(usize),
    #[error("state {0} appears more than once in the state space")]
    DuplicateState(String),
    #[error("state {state} in the {table} table is not part of the state space")]
    UnknownState { table: &'static str, state: String },
    #[error("the {table} table has more than one value for state {state}")]
    DuplicateEntry { table: &'static str, state: String },
    #[error("the {table} table has no value for state {state}")]
    MissingEntry { table: &'static str, state: String },
    #[error("prior mass {value} for state {state} must be finite and non-negative")]
    InvalidPrior { state: String, value: f64 },
    #[error("prior mass is zero for every state")]
    ZeroPrior,
    #[error("likelihood {value} for state {state} must lie in [0, 1]")]
    InvalidLikelihood { state: String, value: f64 },
    #[error("prior times likelihood {value} for state {state} must be finite and non-negative")]
    InvalidPosterior { state: String, value: f64 },
    #[error("scale factor {0} must be finite and positive")]
    InvalidScale(f64),
    #[error("the initial state {0} is not part of the state space")]
    UnknownInitialState(String),
    #[error("table covers {got} states but the state space has {expected}")]
    SizeMismatch { expected: usize, got: usize },
    #[error("number of draws must be at least 1")]
    ZeroDraws,
    #[error("thinning interval must be at least 1")]
    ZeroThin,
    #[error("number of chains must be at least 1")]
    ZeroChains,
    #[error(
        "{num_draws} draws with burn-in {num_tune} and thinning {thin} \
         need more iterations than fit in a u64"
    )]
    TooManyIterations {
        num_draws: u64,
        num_tune: u64,
        thin: u64,
    },
    #[error("state index {state} is outside a state space of {num_states} states")]
    StateOutOfRange { state: StateIdx, num_states: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetropolisError {
    #[error("invalid sampler configuration: {0}")]
    Config(#[from] ConfigError),
    /// Both the current and the proposed state have a zero unnormalized
    /// posterior, so the acceptance ratio is 0/0.
    #[error(
        "acceptance ratio is 0/0 at draw {draw}: states {current} and {proposed} \
         both have zero prior times likelihood"
    )]
    DegenerateRatio {
        draw: u64,
        current: String,
        proposed: String,
    },
}

pub type Result<T> = std::result::Result<T, MetropolisError>;

/// Uniform proposal over every state, independent of the current one.
///
/// The proposal density is the same in both directions, so the
/// Metropolis-Hastings correction cancels and the plain Metropolis rule
/// applies.
#[derive(Debug, Clone)]
pub struct UniformProposal {
    dist: Uniform<StateIdx>,
    num_states: usize,
}

impl UniformProposal {
    pub fn new(num_states: usize) -> std::result::Result<Self, ConfigError> {
        if num_states < 2 {
            return Err(ConfigError::TooFewStates(num_states));
        }
        let dist =
            Uniform::new(0, num_states).map_err(|_| ConfigError::TooFewStates(num_states))?;
        Ok(Self { dist, num_states })
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn propose<R: Rng + ?Sized>(&self, rng: &mut R) -> StateIdx {
        self.dist.sample(rng)
    }
}

/// Outcome of the acceptance test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acceptance {
    /// The proposal strictly dominates, no uniform was drawn.
    Uphill,
    /// A uniform was drawn and compared against `ratio`.
    Accepted { ratio: f64 },
    Rejected { ratio: f64 },
    /// `num_old` and `num_new` are both zero.
    Degenerate,
}

impl Acceptance {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Acceptance::Uphill | Acceptance::Accepted { .. })
    }
}

/// Metropolis rule for a symmetric proposal.
///
/// Accepts unconditionally when `num_new > num_old`. Otherwise accepts with
/// probability `num_new / num_old`, consuming exactly one uniform draw.
/// Both arguments are unnormalized posterior values and must be finite and
/// non-negative.
pub fn accept<R: Rng + ?Sized>(num_old: f64, num_new: f64, rng: &mut R) -> Acceptance {
    if num_new > num_old {
        return Acceptance::Uphill;
    }
    // num_new <= num_old == 0, so num_new is zero as well.
    if num_old == 0. {
        return Acceptance::Degenerate;
    }
    let ratio = num_new / num_old;
    let u: f64 = rng.random();
    if u < ratio {
        Acceptance::Accepted { ratio }
    } else {
        Acceptance::Rejected { ratio }
    }
}

/// One proposal and its fate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub proposed: StateIdx,
    pub next: StateIdx,
    pub accepted: bool,
}

/// Run a single Metropolis step from `current`.
///
/// `draw` is only used to label a degenerate-ratio error. Fails with a
/// [`ConfigError`] if `proposal` was built for a different number of states
/// than `model` has, or if `current` is not a state of `model`.
pub fn transition<M, R>(
    model: &M,
    proposal: &UniformProposal,
    current: StateIdx,
    draw: u64,
    rng: &mut R,
) -> Result<Transition>
where
    M: Model + ?Sized,
    R: Rng + ?Sized,
{
    let num_states = model.num_states();
    if proposal.num_states() != num_states {
        return Err(ConfigError::SizeMismatch {
            expected: num_states,
            got: proposal.num_states(),
        }
        .into());
    }
    if current >= num_states {
        return Err(ConfigError::StateOutOfRange {
            state: current,
            num_states,
        }
        .into());
    }
    let proposed = proposal.propose(rng);
    let num_old = model.unnormalized(current);
    let num_new = model.unnormalized(proposed);

    match accept(num_old, num_new, rng) {
        Acceptance::Degenerate => Err(MetropolisError::DegenerateRatio {
            draw,
            current: model.describe(current),
            proposed: model.describe(proposed),
        }),
        acceptance => {
            let accepted = acceptance.is_accepted();
            Ok(Transition {
                proposed,
                next: if accepted { proposed } else { current },
                accepted,
            })
        }
    }
}
