use rand::Rng;

use crate::{
    metropolis::{transition, ConfigError, Result, UniformProposal},
    model::{check_values, Model, StateIdx},
    sampler::Progress,
};

/// Draw states from a discrete posterior, one step at a time.
pub trait Chain {
    /// Move the chain to `state`. The next call to `draw` returns this
    /// state again without making a proposal.
    fn set_position(&mut self, state: StateIdx) -> Result<()>;

    /// Make one Metropolis step and return the new state together with
    /// some diagnostic information.
    fn draw(&mut self) -> Result<(StateIdx, Progress)>;

    /// The size of the state space.
    fn num_states(&self) -> usize;

    /// The state the chain currently sits in.
    fn current(&self) -> StateIdx;
}

pub struct MetropolisChain<'model, M, R>
where
    M: Model + ?Sized,
    R: Rng,
{
    model: &'model M,
    proposal: UniformProposal,
    rng: R,
    current: StateIdx,
    pinned: bool,
    chain: u64,
    draw_count: u64,
    num_tune: u64,
}

impl<'model, M, R> MetropolisChain<'model, M, R>
where
    M: Model + ?Sized,
    R: Rng,
{
    /// Fails if the model reports an invalid prior or likelihood for any
    /// state, or if `start` is not a state of the model.
    pub fn new(model: &'model M, start: StateIdx, rng: R, chain: u64) -> Result<Self> {
        check_values(model)?;
        let proposal = UniformProposal::new(model.num_states())?;
        let mut sampler = MetropolisChain {
            model,
            proposal,
            rng,
            current: 0,
            pinned: true,
            chain,
            draw_count: 0,
            num_tune: 0,
        };
        sampler.set_position(start)?;
        Ok(sampler)
    }

    /// Mark the first `num_tune` draws as burn-in in the returned progress.
    pub fn with_tune(mut self, num_tune: u64) -> Self {
        self.num_tune = num_tune;
        self
    }

    pub fn draw_count(&self) -> u64 {
        self.draw_count
    }
}

impl<M, R> Chain for MetropolisChain<'_, M, R>
where
    M: Model + ?Sized,
    R: Rng,
{
    fn set_position(&mut self, state: StateIdx) -> Result<()> {
        if state >= self.model.num_states() {
            return Err(ConfigError::UnknownInitialState(format!("#{}", state)).into());
        }
        self.current = state;
        self.pinned = true;
        Ok(())
    }

    fn draw(&mut self) -> Result<(StateIdx, Progress)> {
        let (proposed, accepted) = if self.pinned {
            self.pinned = false;
            (None, false)
        } else {
            let step = transition(
                self.model,
                &self.proposal,
                self.current,
                self.draw_count,
                &mut self.rng,
            )?;
            self.current = step.next;
            (Some(step.proposed), step.accepted)
        };

        let progress = Progress {
            draw: self.draw_count,
            chain: self.chain,
            state: self.current,
            proposed,
            accepted,
            tuning: self.draw_count < self.num_tune,
        };
        self.draw_count += 1;
        Ok((self.current, progress))
    }

    fn num_states(&self) -> usize {
        self.model.num_states()
    }

    fn current(&self) -> StateIdx {
        self.current
    }
}
