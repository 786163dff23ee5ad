//! Sample posteriors over finite sets of categorical states.
//!
//! The target is the unnormalized product `prior * likelihood` of each
//! state. A Metropolis chain with a uniform independence proposal visits
//! the states, and its visitation frequencies converge to the normalized
//! posterior without the normalizing sum ever being computed.
//!
//! ```
//! use discrete_metropolis::{sample_chain, DiscretePosterior, MetropolisSettings};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let states = ["Texas", "Montana", "California", "Virginia"];
//! let model = DiscretePosterior::from_entries(
//!     states,
//!     states.into_iter().zip([0.7, 0.1, 0.15, 0.05]),
//!     states.into_iter().zip([0.10, 0.09, 0.01, 0.0001]),
//! )?;
//! let settings = MetropolisSettings { num_draws: 1000, ..Default::default() };
//! let start = model.space().initial(&"Texas")?;
//! let trace = sample_chain(&model, settings, start, 0, StdRng::seed_from_u64(42))?;
//! let hist = trace.histogram(model.space());
//! assert_eq!(hist.total(), 1000);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub(crate) mod chain;
pub mod diagnostics;
pub(crate) mod metropolis;
pub(crate) mod model;
pub(crate) mod sampler;
pub(crate) mod state_space;
pub(crate) mod table;
pub(crate) mod trace;

pub use chain::{Chain, MetropolisChain};
pub use metropolis::{
    accept, transition, Acceptance, ConfigError, MetropolisError, Transition, UniformProposal,
};
pub use model::{DiscretePosterior, Model};
pub use sampler::{
    sample_chain, sample_parallel, sample_sequentially, ChainProgress, MetropolisSettings,
    Progress, ProgressCallback, ProgressFn, Sampler, SamplerWaitResult,
};
pub use state_space::{StateIdx, StateSpace};
pub use table::{Likelihood, Prior};
pub use trace::{ChainEntry, ChainTrace, Histogram, Trace};
