use anyhow::{Context, Result};
use itertools::Itertools;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::{prelude::*, ScopeFifo, ThreadPoolBuilder};
use std::{
    sync::{
        mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{spawn, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    chain::{Chain, MetropolisChain},
    metropolis::{ConfigError, MetropolisError},
    model::{check_values, Model, StateIdx},
    trace::{ChainEntry, ChainTrace, Trace},
};

/// Settings for the Metropolis sampler.
#[derive(Debug, Clone, Copy)]
pub struct MetropolisSettings {
    /// The number of draws kept per chain.
    pub num_draws: u64,
    /// The number of burn-in iterations discarded before the first kept
    /// draw. With zero burn-in the first kept draw is the initial state.
    pub num_tune: u64,
    /// Keep only every `thin`-th iteration after burn-in.
    pub thin: u64,
    pub num_chains: usize,
    pub seed: u64,
}

impl Default for MetropolisSettings {
    fn default() -> Self {
        Self {
            num_draws: 10_000,
            num_tune: 0,
            thin: 1,
            num_chains: 4,
            seed: 0,
        }
    }
}

impl MetropolisSettings {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.num_draws < 1 {
            return Err(ConfigError::ZeroDraws);
        }
        if self.thin < 1 {
            return Err(ConfigError::ZeroThin);
        }
        if self.num_chains < 1 {
            return Err(ConfigError::ZeroChains);
        }
        if self.checked_iterations().is_none() {
            return Err(ConfigError::TooManyIterations {
                num_draws: self.num_draws,
                num_tune: self.num_tune,
                thin: self.thin,
            });
        }
        Ok(())
    }

    fn checked_iterations(&self) -> Option<u64> {
        self.num_draws
            .checked_sub(1)?
            .checked_mul(self.thin)?
            .checked_add(self.num_tune)?
            .checked_add(1)
    }

    /// Number of Metropolis steps a chain makes, burn-in included.
    ///
    /// Saturates at `u64::MAX` for settings that `validate` rejects.
    pub fn total_iterations(&self) -> u64 {
        self.checked_iterations().unwrap_or(u64::MAX)
    }

    /// Whether iteration `draw` ends up in the trace.
    pub fn keeps(&self, draw: u64) -> bool {
        draw >= self.num_tune && (draw - self.num_tune) % self.thin == 0
    }

    pub fn new_chain<'model, M, R>(
        &self,
        chain: u64,
        model: &'model M,
        start: StateIdx,
        rng: R,
    ) -> std::result::Result<MetropolisChain<'model, M, R>, MetropolisError>
    where
        M: Model + ?Sized,
        R: Rng,
    {
        self.validate()?;
        Ok(MetropolisChain::new(model, start, rng, chain)?.with_tune(self.num_tune))
    }

    /// The random number generator of chain `chain`. Every chain reads its
    /// own stream of the same seeded generator.
    pub fn chain_rng(&self, chain: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(chain);
        rng
    }
}

/// Information about a single Metropolis step.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Progress {
    pub draw: u64,
    pub chain: u64,
    pub state: StateIdx,
    /// `None` for a step that was pinned to the initial state.
    pub proposed: Option<StateIdx>,
    pub accepted: bool,
    pub tuning: bool,
}

/// Iterator over the kept draws of a chain. Stops after the first error.
struct KeptDraws<C> {
    chain: C,
    settings: MetropolisSettings,
    remaining: u64,
    failed: bool,
}

impl<C: Chain> Iterator for KeptDraws<C> {
    type Item = std::result::Result<(StateIdx, Progress), MetropolisError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        loop {
            match self.chain.draw() {
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
                Ok((state, info)) => {
                    if self.settings.keeps(info.draw) {
                        self.remaining -= 1;
                        return Some(Ok((state, info)));
                    }
                }
            }
        }
    }
}

/// Lazily sample a single chain starting at `start`.
///
/// Burn-in and thinned iterations are skipped. The iterator yields at most
/// one error and stops afterwards, so everything yielded before it is a
/// valid partial chain.
pub fn sample_sequentially<'model, M, R>(
    model: &'model M,
    settings: MetropolisSettings,
    start: StateIdx,
    chain: u64,
    rng: R,
) -> std::result::Result<
    impl Iterator<Item = std::result::Result<(StateIdx, Progress), MetropolisError>> + 'model,
    MetropolisError,
>
where
    M: Model + ?Sized,
    R: Rng + 'model,
{
    let sampler = settings.new_chain(chain, model, start, rng)?;
    Ok(KeptDraws {
        chain: sampler,
        settings,
        remaining: settings.num_draws,
        failed: false,
    })
}

fn entry<M: Model + ?Sized>(model: &M, state: StateIdx) -> ChainEntry {
    ChainEntry {
        state,
        prior: model.prior(state),
        likelihood: model.likelihood(state),
    }
}

/// Sample a full chain. Returns no trace at all if a step fails.
pub fn sample_chain<M, R>(
    model: &M,
    settings: MetropolisSettings,
    start: StateIdx,
    chain: u64,
    rng: R,
) -> std::result::Result<ChainTrace, MetropolisError>
where
    M: Model + ?Sized,
    R: Rng,
{
    let mut trace = ChainTrace::with_capacity(chain, settings.num_draws as usize);
    for draw in sample_sequentially(model, settings, start, chain, rng)? {
        let (state, info) = draw?;
        trace.push(entry(model, state), info.proposed, info.accepted);
    }
    Ok(trace)
}

/// Sample `settings.num_chains` chains on the global rayon pool and wait
/// for all of them.
///
/// Uses the same per-chain generators as [`Sampler`], so both produce the
/// same trace for the same settings.
pub fn sample_parallel<M>(
    model: &M,
    settings: MetropolisSettings,
    start: StateIdx,
) -> std::result::Result<Trace, MetropolisError>
where
    M: Model + ?Sized,
{
    settings.validate()?;
    let chains: Vec<_> = (0..settings.num_chains as u64)
        .into_par_iter()
        .map(|chain| sample_chain(model, settings, start, chain, settings.chain_rng(chain)))
        .collect::<std::result::Result<_, _>>()?;
    Ok(chains.into_iter().into())
}

#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct ChainProgress {
    pub finished_draws: usize,
    pub total_draws: usize,
    pub accepted_draws: usize,
    pub proposed_draws: usize,
    pub tuning: bool,
    pub started: bool,
    pub finished: bool,
    pub runtime: Duration,
}

impl ChainProgress {
    fn new(total: usize) -> Self {
        Self {
            finished_draws: 0,
            total_draws: total,
            accepted_draws: 0,
            proposed_draws: 0,
            tuning: true,
            started: false,
            finished: false,
            runtime: Duration::ZERO,
        }
    }

    fn update(&mut self, stats: &Progress, draw_duration: Duration) {
        if stats.proposed.is_some() {
            self.proposed_draws += 1;
        }
        if stats.accepted {
            self.accepted_draws += 1;
        }
        self.finished_draws += 1;
        self.tuning = stats.tuning;
        self.runtime += draw_duration;
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed_draws == 0 {
            return 0.;
        }
        self.accepted_draws as f64 / self.proposed_draws as f64
    }
}

pub type ProgressFn = dyn FnMut(Duration, Box<[ChainProgress]>) + Send;

pub struct ProgressCallback {
    pub callback: Box<ProgressFn>,
    pub rate: Duration,
}

enum ChainCommand {
    Resume,
    Pause,
}

type ChainResult = (u64, std::result::Result<ChainTrace, MetropolisError>);

struct ChainProcess {
    stop_marker: Sender<ChainCommand>,
    progress: Arc<Mutex<ChainProgress>>,
}

impl ChainProcess {
    fn progress(&self) -> ChainProgress {
        self.progress.lock().expect("Poisoned lock").clone()
    }

    fn pause(&self) -> Result<()> {
        self.stop_marker.send(ChainCommand::Pause)?;
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.stop_marker.send(ChainCommand::Resume)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn start<'scope, M: Model + ?Sized>(
        model: &'scope M,
        chain_id: u64,
        start: StateIdx,
        settings: &'scope MetropolisSettings,
        commands: Receiver<ChainCommand>,
        progress: Arc<Mutex<ChainProgress>>,
        scope: &ScopeFifo<'scope>,
        results: Sender<ChainResult>,
        finished: Sender<()>,
    ) {
        scope.spawn_fifo(move |_| {
            let sample = || -> std::result::Result<ChainTrace, MetropolisError> {
                let rng = settings.chain_rng(chain_id);
                let mut sampler = settings.new_chain(chain_id, model, start, rng)?;
                progress.lock().expect("Poisoned mutex").started = true;

                let mut trace = ChainTrace::with_capacity(chain_id, settings.num_draws as usize);
                let iterations = settings.total_iterations();

                let mut msg = commands.try_recv();
                let mut draw = 0;
                while draw < iterations {
                    match msg {
                        // The sampler was aborted, keep what we have
                        Err(TryRecvError::Disconnected) => break,
                        Err(TryRecvError::Empty) => {}
                        Ok(ChainCommand::Pause) => {
                            msg = commands.recv().map_err(|e| e.into());
                            continue;
                        }
                        Ok(ChainCommand::Resume) => {}
                    }

                    let now = Instant::now();
                    let (state, info) = sampler.draw()?;
                    if settings.keeps(info.draw) {
                        trace.push(entry(model, state), info.proposed, info.accepted);
                    }
                    progress
                        .lock()
                        .expect("Poisoned mutex")
                        .update(&info, now.elapsed());
                    draw += 1;

                    msg = commands.try_recv();
                }
                Ok(trace)
            };

            let result = sample();
            progress.lock().expect("Poisoned mutex").finished = true;

            // The receiving side may already be gone after an abort.
            let _ = results.send((chain_id, result));
            let _ = finished.send(());
        });
    }
}

pub enum SamplerWaitResult {
    Trace(Trace),
    Timeout(Sampler),
    Err(anyhow::Error, Option<Trace>),
}

/// Runs several independent chains in a background thread pool.
///
/// Chains can be paused, resumed and aborted between steps. An aborted
/// chain keeps the draws it made so far; check [`ChainTrace::is_complete`].
pub struct Sampler {
    main_thread: JoinHandle<Result<()>>,
    chains: Vec<ChainProcess>,
    results: Receiver<ChainResult>,
    collected: Vec<ChainResult>,
}

impl Sampler {
    pub fn new<M: Model + 'static>(
        model: M,
        settings: MetropolisSettings,
        start: StateIdx,
        num_cores: usize,
        callback: Option<ProgressCallback>,
    ) -> Result<Self> {
        settings.validate().context("Invalid sampler settings")?;
        check_values(&model).context("Invalid model")?;
        if start >= model.num_states() {
            return Err(ConfigError::UnknownInitialState(format!("#{}", start)).into());
        }

        let (results_tx, results_rx) = channel();
        let mut chains = Vec::with_capacity(settings.num_chains);
        let mut receivers = Vec::with_capacity(settings.num_chains);
        for _ in 0..settings.num_chains {
            let (stop_marker_tx, stop_marker_rx) = channel();
            let progress = Arc::new(Mutex::new(ChainProgress::new(
                settings.total_iterations() as usize,
            )));
            receivers.push((stop_marker_rx, progress.clone()));
            chains.push(ChainProcess {
                stop_marker: stop_marker_tx,
                progress,
            });
        }

        let main_thread = spawn(move || {
            // One more thread because the controller also uses one
            let pool = ThreadPoolBuilder::new()
                .num_threads(num_cores.max(1) + 1)
                .thread_name(|i| format!("metropolis-worker-{}", i))
                .build()
                .context("Could not start thread pool")?;

            let settings_ref = &settings;
            let model_ref = &model;
            let mut callback = callback;

            pool.scope_fifo(move |scope| {
                let (finished_tx, finished_rx) = channel();
                let progress = receivers
                    .iter()
                    .map(|(_, progress)| progress.clone())
                    .collect_vec();

                for (chain_id, (commands, progress)) in receivers.into_iter().enumerate() {
                    ChainProcess::start(
                        model_ref,
                        chain_id as u64,
                        start,
                        settings_ref,
                        commands,
                        progress,
                        scope,
                        results_tx.clone(),
                        finished_tx.clone(),
                    );
                }
                drop(results_tx);
                drop(finished_tx);

                let Some(ProgressCallback { callback, rate }) = &mut callback else {
                    return;
                };
                let start_time = Instant::now();
                let report = |callback: &mut Box<ProgressFn>| {
                    let progress = progress
                        .iter()
                        .map(|p| p.lock().expect("Poisoned mutex").clone())
                        .collect_vec();
                    callback(start_time.elapsed(), progress.into());
                };

                report(&mut *callback);
                loop {
                    match finished_rx.recv_timeout(*rate) {
                        Ok(()) => {}
                        Err(RecvTimeoutError::Timeout) => report(&mut *callback),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                report(&mut *callback);
            });
            Ok(())
        });

        Ok(Self {
            main_thread,
            chains,
            results: results_rx,
            collected: Vec::new(),
        })
    }

    /// Ask all chains to stop after their current step.
    pub fn pause(&mut self) -> Result<()> {
        for chain in self.chains.iter() {
            // This fails if the chain is done. We just ignore those.
            let _ = chain.pause();
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        for chain in self.chains.iter() {
            let _ = chain.resume();
        }
        Ok(())
    }

    pub fn progress(&self) -> Box<[ChainProgress]> {
        self.chains.iter().map(|chain| chain.progress()).collect()
    }

    /// Stop all chains and return whatever they sampled so far.
    pub fn abort(self) -> (Result<()>, Option<Trace>) {
        let Sampler {
            main_thread,
            chains,
            results,
            mut collected,
        } = self;
        drop(chains);
        collected.extend(results.iter());
        Self::finish(main_thread, collected)
    }

    /// Wait until all chains are done or `timeout` passed.
    pub fn wait_timeout(mut self, timeout: Duration) -> SamplerWaitResult {
        let start = Instant::now();
        loop {
            let Some(remaining) = timeout.checked_sub(start.elapsed()) else {
                return SamplerWaitResult::Timeout(self);
            };
            let received = self.results.recv_timeout(remaining);
            match received {
                Ok(result) => self.collected.push(result),
                Err(RecvTimeoutError::Timeout) => return SamplerWaitResult::Timeout(self),
                Err(RecvTimeoutError::Disconnected) => {
                    let Sampler {
                        main_thread,
                        collected,
                        ..
                    } = self;
                    return match Self::finish(main_thread, collected) {
                        (Ok(()), Some(trace)) => SamplerWaitResult::Trace(trace),
                        (Ok(()), None) => SamplerWaitResult::Err(
                            anyhow::anyhow!("Sampler finished without chains"),
                            None,
                        ),
                        (Err(err), trace) => SamplerWaitResult::Err(err, trace),
                    };
                }
            }
        }
    }

    fn finish(
        main_thread: JoinHandle<Result<()>>,
        collected: Vec<ChainResult>,
    ) -> (Result<()>, Option<Trace>) {
        match main_thread.join() {
            Err(payload) => std::panic::resume_unwind(payload),
            Ok(Err(err)) => (Err(err), None),
            Ok(Ok(())) => {
                let (traces, errors): (Vec<_>, Vec<_>) = collected
                    .into_iter()
                    .map(|(chain_id, result)| {
                        result.with_context(|| format!("Chain {} failed", chain_id))
                    })
                    .partition_result();
                let trace: Trace = traces.into_iter().into();
                match errors.into_iter().next() {
                    Some(err) => (Err(err), Some(trace)),
                    None => (Ok(()), Some(trace)),
                }
            }
        }
    }
}
