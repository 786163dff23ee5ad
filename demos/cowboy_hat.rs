//! Someone walks by wearing a cowboy hat. Which state are they from?

use std::time::Duration;

use discrete_metropolis::{
    diagnostics::{acceptance_rate, exact_posterior, split_rhat},
    DiscretePosterior, MetropolisSettings, ProgressCallback, Sampler, SamplerWaitResult, Trace,
};

const STATES: [&str; 4] = ["Texas", "Montana", "California", "Virginia"];

fn run(
    model: &DiscretePosterior<&'static str>,
    settings: MetropolisSettings,
) -> anyhow::Result<Trace> {
    let callback = ProgressCallback {
        callback: Box::new(|elapsed, progress| {
            let done: usize = progress.iter().map(|p| p.finished_draws).sum();
            let total: usize = progress.iter().map(|p| p.total_draws).sum();
            eprintln!("{:>8.2?}  {done}/{total} draws", elapsed);
        }),
        rate: Duration::from_millis(200),
    };
    let start = model.space().initial(&"Texas")?;
    let mut sampler = Sampler::new(model.clone(), settings, start, 4, Some(callback))?;
    loop {
        match sampler.wait_timeout(Duration::from_secs(1)) {
            SamplerWaitResult::Trace(trace) => return Ok(trace),
            SamplerWaitResult::Timeout(new_sampler) => sampler = new_sampler,
            SamplerWaitResult::Err(err, _trace) => return Err(err),
        }
    }
}

fn report(title: &str, model: &DiscretePosterior<&'static str>, trace: &Trace) {
    let hist = trace.histogram(model.space());
    let exact = exact_posterior(model).unwrap_or_default();
    println!("{title}");
    println!("  acceptance rate {:.3}", acceptance_rate(trace));
    for (idx, (state, freq)) in hist.frequencies().into_iter().enumerate() {
        let rhat = split_rhat(trace, idx).unwrap_or(f64::NAN);
        println!(
            "  {state:<12} sampled {freq:.4}  exact {:.4}  R-hat {rhat:.3}",
            exact.get(idx).copied().unwrap_or(f64::NAN)
        );
    }
}

fn main() -> anyhow::Result<()> {
    let mut model = DiscretePosterior::from_entries(
        STATES,
        STATES.into_iter().zip([0.7, 0.1, 0.15, 0.05]),
        STATES.into_iter().zip([0.10, 0.09, 0.01, 0.0001]),
    )?;
    let settings = MetropolisSettings {
        num_draws: 200_000,
        num_tune: 1_000,
        seed: 42,
        ..Default::default()
    };

    let trace = run(&model, settings)?;
    report("Cowboy hat", &model, &trace);

    // New evidence: every Montanan wears a hat.
    model.set_likelihood(&"Montana", 1.)?;
    let trace = run(&model, settings)?;
    report("Cowboy hat, all Montanans wear hats", &model, &trace);
    Ok(())
}
