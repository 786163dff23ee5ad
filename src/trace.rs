use std::{fmt::Debug, hash::Hash};

use itertools::izip;

use crate::state_space::{StateIdx, StateSpace};

const MAX_PREALLOCATED_DRAWS: usize = 1 << 16;

/// One kept step of a chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainEntry {
    pub state: StateIdx,
    pub prior: f64,
    pub likelihood: f64,
}

/// The kept draws of a single chain.
///
/// Besides the visited state and the prior and likelihood at that step, the
/// trace records what was proposed and whether it was accepted. The first
/// entry of a chain without burn-in has no proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTrace {
    pub chain_id: u64,
    pub(crate) states: Vec<StateIdx>,
    pub(crate) priors: Vec<f64>,
    pub(crate) likelihoods: Vec<f64>,
    pub(crate) proposals: Vec<Option<StateIdx>>,
    pub(crate) accepted: Vec<bool>,
    pub(crate) expected_draws: usize,
}

impl ChainTrace {
    pub(crate) fn with_capacity(chain_id: u64, expected_draws: usize) -> Self {
        let capacity = expected_draws.min(MAX_PREALLOCATED_DRAWS);
        Self {
            chain_id,
            states: Vec::with_capacity(capacity),
            priors: Vec::with_capacity(capacity),
            likelihoods: Vec::with_capacity(capacity),
            proposals: Vec::with_capacity(capacity),
            accepted: Vec::with_capacity(capacity),
            expected_draws,
        }
    }

    pub(crate) fn push(&mut self, entry: ChainEntry, proposal: Option<StateIdx>, accepted: bool) {
        self.states.push(entry.state);
        self.priors.push(entry.prior);
        self.likelihoods.push(entry.likelihood);
        self.proposals.push(proposal);
        self.accepted.push(accepted);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// False if sampling stopped before all requested draws were made.
    pub fn is_complete(&self) -> bool {
        self.len() == self.expected_draws
    }

    pub fn states(&self) -> &[StateIdx] {
        &self.states
    }

    /// The proposal made at each kept step, `None` for the fixed first step.
    pub fn proposals(&self) -> &[Option<StateIdx>] {
        &self.proposals
    }

    pub fn accepted(&self) -> &[bool] {
        &self.accepted
    }

    pub fn entries(&self) -> impl Iterator<Item = ChainEntry> + '_ {
        izip!(&self.states, &self.priors, &self.likelihoods).map(
            |(&state, &prior, &likelihood)| ChainEntry {
                state,
                prior,
                likelihood,
            },
        )
    }

    pub fn labels<'a, S>(&'a self, space: &'a StateSpace<S>) -> impl Iterator<Item = &'a S> + 'a
    where
        S: Clone + Eq + Hash + Debug,
    {
        self.states.iter().map(move |&idx| space.label(idx))
    }

    /// Fraction of kept steps whose proposal was accepted. The fixed first
    /// step does not count.
    pub fn acceptance_rate(&self) -> f64 {
        let (proposed, accepted) = self
            .proposals
            .iter()
            .zip(&self.accepted)
            .filter(|(proposal, _)| proposal.is_some())
            .fold((0usize, 0usize), |(p, a), (_, &acc)| (p + 1, a + acc as usize));
        if proposed == 0 {
            return 0.;
        }
        accepted as f64 / proposed as f64
    }

    /// Visitation counts of this chain.
    ///
    /// # Panics
    ///
    /// If `space` has fewer states than the model the chain was sampled from.
    pub fn histogram<S>(&self, space: &StateSpace<S>) -> Histogram<S>
    where
        S: Clone + Eq + Hash + Debug,
    {
        let mut hist = Histogram::empty(space);
        hist.extend(self.states.iter().copied());
        hist
    }

    /// `1.0` where the chain sits in `state`, `0.0` elsewhere.
    pub fn indicator(&self, state: StateIdx) -> Vec<f64> {
        self.states
            .iter()
            .map(|&s| if s == state { 1. } else { 0. })
            .collect()
    }
}

/// Traces of all chains of a run, sorted by chain id.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub chains: Vec<ChainTrace>,
}

impl<I: Iterator<Item = ChainTrace>> From<I> for Trace {
    fn from(value: I) -> Self {
        let mut chains: Vec<_> = value.collect();
        chains.sort_unstable_by_key(|x| x.chain_id);
        Trace { chains }
    }
}

impl Trace {
    /// Visitation counts pooled over all chains.
    ///
    /// # Panics
    ///
    /// If `space` has fewer states than the model the chains were sampled
    /// from.
    pub fn histogram<S>(&self, space: &StateSpace<S>) -> Histogram<S>
    where
        S: Clone + Eq + Hash + Debug,
    {
        let mut hist = Histogram::empty(space);
        for chain in self.chains.iter() {
            hist.extend(chain.states.iter().copied());
        }
        hist
    }

    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|chain| chain.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.chains.iter().all(|chain| chain.is_complete())
    }
}

/// Number of chain steps spent in each state.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram<S> {
    labels: Box<[S]>,
    counts: Box<[u64]>,
    total: u64,
}

impl<S> Histogram<S>
where
    S: Clone + Eq + Hash + Debug,
{
    pub fn empty(space: &StateSpace<S>) -> Self {
        Self {
            labels: space.labels().into(),
            counts: vec![0; space.len()].into(),
            total: 0,
        }
    }

    /// Count each of `states` once.
    ///
    /// # Panics
    ///
    /// If a state index is outside the state space of the histogram.
    pub fn extend(&mut self, states: impl IntoIterator<Item = StateIdx>) {
        for state in states {
            self.counts[state] += 1;
            self.total += 1;
        }
    }

    /// Add the counts of another histogram over the same states.
    ///
    /// # Panics
    ///
    /// If the two histograms have different state labels.
    pub fn merge(&mut self, other: &Histogram<S>) {
        assert_eq!(self.labels, other.labels, "histograms over different states");
        for (count, other) in self.counts.iter_mut().zip(other.counts.iter()) {
            *count += other;
        }
        self.total += other.total;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn labels(&self) -> &[S] {
        &self.labels
    }

    pub fn count(&self, state: &S) -> Option<u64> {
        self.position(state).map(|idx| self.counts[idx])
    }

    /// Estimated posterior probability of `state`.
    pub fn frequency(&self, state: &S) -> Option<f64> {
        self.position(state).map(|idx| self.frequency_at(idx))
    }

    pub fn frequency_at(&self, idx: StateIdx) -> f64 {
        if self.total == 0 {
            return 0.;
        }
        self.counts[idx] as f64 / self.total as f64
    }

    pub fn frequencies(&self) -> Vec<(S, f64)> {
        (0..self.labels.len())
            .map(|idx| (self.labels[idx].clone(), self.frequency_at(idx)))
            .collect()
    }

    fn position(&self, state: &S) -> Option<usize> {
        self.labels.iter().position(|label| label == state)
    }
}
