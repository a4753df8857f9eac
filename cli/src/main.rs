//! marshal-demo - worker threads driving an owner-thread run-loop.
//!
//! ```text
//! main thread: RunLoop::poll(budget) until quit
//!      ^
//!      |  notifications (call event, <<progress>>)
//!      |
//! worker-0..N: kitchen.ham / kitchen.square (blocking)
//!              audit.spoil (fire-and-forget, errors logged on owner)
//!              schedule_event(<<progress>>)
//! joiner:      join workers -> LoopHandle::quit
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use marshal_config::MarshalConfig;
use marshal_core::{
    ContextId, Event, EventName, ExceptionHandler, Marshal, MarshalOptions, MethodTable,
    MuteProxy, RunLoop, SyncProxy, TargetError, Value, args,
};

/// Env var holding a tracing filter; overrides `[log] filter`.
const LOG_ENV: &str = "MARSHAL_LOG";

/// Idle sleep between polls when nothing was handled.
const IDLE_TICK: Duration = Duration::from_millis(8);

const STEPS_PER_WORKER: i64 = 3;

fn init_tracing(config: Option<&MarshalConfig>) {
    let fallback = config.and_then(MarshalConfig::log_filter).unwrap_or("info");
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

#[derive(Default)]
struct Kitchen {
    served: AtomicU64,
}

impl Kitchen {
    fn serve(&self) {
        self.served.fetch_add(1, Ordering::Relaxed);
    }
}

type KitchenTable = MethodTable<Kitchen>;

fn kitchen_table() -> KitchenTable {
    MethodTable::new(Kitchen::default())
        .with_method("ham", |kitchen, mut args| {
            let foo: String = args.take()?;
            let bar: String = args.take_or(String::new())?;
            kitchen.serve();
            Ok(Box::new(format!("{bar}{foo}{bar}")) as Value)
        })
        .with_method("square", |kitchen, mut args| {
            let n: i64 = args.take()?;
            kitchen.serve();
            Ok(Box::new(n * n) as Value)
        })
        .with_method("spoil", |_, mut args| {
            let dish: String = args.take()?;
            Err(format!("{dish} went off").into())
        })
}

#[derive(Debug)]
struct Progress {
    worker: usize,
    step: i64,
}

struct Worker {
    id: usize,
    marshal: Marshal,
    kitchen: SyncProxy<KitchenTable>,
    audit: MuteProxy<KitchenTable>,
    progress: EventName,
}

impl Worker {
    fn run(&self) -> Result<()> {
        let greeting = self
            .kitchen
            .method("ham")
            .invoke(args![format!("worker-{}", self.id), "**".to_string()])
            .context("ham failed")?;
        let greeting = greeting
            .downcast::<String>()
            .map_err(|_| anyhow!("ham returned a non-string"))?;
        tracing::info!(worker = self.id, "{greeting}");

        for step in 1..=STEPS_PER_WORKER {
            let square = self
                .kitchen
                .method("square")
                .invoke(args![step])
                .context("square failed")?
                .downcast::<i64>()
                .map_err(|_| anyhow!("square returned a non-integer"))?;
            tracing::debug!(worker = self.id, step, square = *square, "Squared");

            self.marshal.schedule_event(
                ContextId::ROOT,
                &self.progress,
                Progress {
                    worker: self.id,
                    step,
                },
            )?;
        }

        self.audit
            .method("spoil")
            .invoke(args![format!("batch-{}", self.id)]);
        self.marshal.release_return_cell();
        Ok(())
    }
}

fn on_progress(event: Event) {
    match event.data_ref::<Progress>() {
        Some(progress) => tracing::info!(
            worker = progress.worker,
            step = progress.step,
            index = %event.index(),
            "Progress"
        ),
        None => tracing::warn!(index = %event.index(), "Unexpected progress payload"),
    }
}

fn run(config: &MarshalConfig) -> Result<()> {
    let mut run_loop = RunLoop::new();
    let handle = run_loop.handle();
    let marshal = Marshal::with_options(
        Arc::new(handle.clone()),
        MarshalOptions::from_config(&config.marshal),
    );

    let progress = EventName::new("<<progress>>")?;
    marshal.bind(ContextId::ROOT, &progress, on_progress);

    let table = Arc::new(kitchen_table());
    let on_error: ExceptionHandler = Arc::new(|err: TargetError| {
        tracing::warn!("Audit call failed: {err}");
    });
    let builder = marshal.build_proxy(ContextId::ROOT);
    let kitchen = builder.proxy(Arc::clone(&table));
    let audit = builder.mute_proxy(Arc::clone(&table), Some(on_error));

    let workers = config.demo_workers();
    tracing::info!(workers, call_event = %marshal.options().call_event, "Starting workers");
    let handles = (0..workers)
        .map(|id| {
            let worker = Worker {
                id,
                marshal: marshal.clone(),
                kitchen: kitchen.clone(),
                audit: audit.clone(),
                progress: progress.clone(),
            };
            thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker.run())
                .context("failed to spawn worker")
        })
        .collect::<Result<Vec<_>>>()?;

    let joiner = thread::spawn(move || {
        let mut failures = 0_usize;
        for worker in handles {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    tracing::error!("Worker failed: {err:#}");
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!("Worker panicked");
                }
            }
        }
        handle.quit();
        failures
    });

    let budget = config.marshal.poll_budget.max(1);
    while !run_loop.is_quit() {
        if run_loop.poll(budget) == 0 {
            thread::sleep(IDLE_TICK);
        }
    }

    let failures = joiner
        .join()
        .map_err(|_| anyhow!("joiner thread panicked"))?;
    let abandoned = marshal.abandon_pending();
    tracing::info!(
        served = table.target().served.load(Ordering::Relaxed),
        scheduled = marshal.scheduled_count(),
        abandoned,
        "Run-loop finished"
    );

    if failures > 0 {
        return Err(anyhow!("{failures} worker(s) failed"));
    }
    Ok(())
}

fn main() -> Result<()> {
    let (config, load_error) = match MarshalConfig::load() {
        Ok(config) => (config, None),
        Err(err) => (None, Some(err)),
    };
    init_tracing(config.as_ref());
    if let Some(err) = load_error {
        tracing::warn!(path = %err.path().display(), "Ignoring config: {err}");
    }

    run(&config.unwrap_or_default())
}
