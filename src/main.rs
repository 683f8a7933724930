//! taskweave - CLI

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use taskweave::tasks::{
    IncrementTask, Matrix, MaxTask, MergeSortTask, SumTask, DEFAULT_THRESHOLD,
};
use taskweave::util::config::RuntimeConfig;
use taskweave::util::logger::{self, LogLevel};
use taskweave::{
    ExecutorService, ForkJoinPool, PoolStatsSnapshot, ScheduleMode, ScheduledExecutor,
    ThreadPoolExecutor, NAME, VERSION,
};

/// Run fork/join workloads and scheduled jobs on the taskweave runtime
#[derive(Parser, Debug)]
#[command(name = "taskweave")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Worker threads for the fork/join pool (overrides the config file)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Runtime config file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print pool statistics after the run
    #[arg(long, global = true)]
    stats: bool,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct Workload {
    /// Number of input elements
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    len: usize,

    /// Largest piece solved sequentially
    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: usize,

    /// Seed for the generated input
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sum random integers
    Sum {
        #[command(flatten)]
        workload: Workload,
    },

    /// Find the largest of random integers
    Max {
        #[command(flatten)]
        workload: Workload,
    },

    /// Merge sort random integers and verify the order
    Sort {
        #[command(flatten)]
        workload: Workload,
    },

    /// Add a constant to every element of an array in place
    Increment {
        #[command(flatten)]
        workload: Workload,

        /// Value added to each element
        #[arg(short, long, default_value_t = 1)]
        delta: i64,
    },

    /// Multiply two random square matrices
    Matmul {
        /// Matrix dimension
        #[arg(short = 'n', long, default_value_t = 256)]
        size: usize,

        /// Rows per leaf task
        #[arg(short, long, default_value_t = 16)]
        threshold: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Run a periodic job on the scheduled executor
    Schedule {
        /// Period between runs in milliseconds
        #[arg(short, long, default_value_t = 100)]
        period_ms: u64,

        /// Number of runs before shutting down
        #[arg(short, long, default_value_t = 5)]
        runs: usize,

        #[arg(short, long, value_enum, default_value_t = Cadence::Rate)]
        mode: Cadence,
    },

    /// Submit independent jobs to a thread-pool executor
    Batch {
        /// Number of jobs
        #[arg(short, long, default_value_t = 32)]
        jobs: usize,

        /// Simulated work per job in milliseconds
        #[arg(long, default_value_t = 10)]
        work_ms: u64,
    },

    /// Print the effective runtime configuration
    Config {
        /// Write it to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Rate,
    Delay,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        logger::init_with_level(LogLevel::Debug);
    } else {
        logger::init_from_env();
    }

    let mut config = RuntimeConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(workers) = args.workers {
        config.fork_join.workers = Some(workers);
    }

    match args.command {
        Commands::Sum { workload } => {
            let data: Arc<[i64]> = random_values(&workload).into();
            let expected: i64 = data.iter().sum();
            let pool = fork_join_pool(&config)?;
            let (total, elapsed) =
                timed(|| pool.invoke(SumTask::new(data).with_threshold(workload.threshold)));
            let total = total?;
            if total != expected {
                bail!("parallel sum {} differs from sequential sum {}", total, expected);
            }
            println!("sum = {} ({:?})", total, elapsed);
            finish(&pool, args.stats);
        },
        Commands::Max { workload } => {
            let data: Arc<[i64]> = random_values(&workload).into();
            let pool = fork_join_pool(&config)?;
            let (max, elapsed) =
                timed(|| pool.invoke(MaxTask::new(data).with_threshold(workload.threshold)));
            match max? {
                Some(max) => println!("max = {} ({:?})", max, elapsed),
                None => println!("max = <empty> ({:?})", elapsed),
            }
            finish(&pool, args.stats);
        },
        Commands::Sort { workload } => {
            let data = random_values(&workload);
            let pool = fork_join_pool(&config)?;
            let (sorted, elapsed) = timed(|| {
                pool.invoke(MergeSortTask::new(data).with_threshold(workload.threshold))
            });
            let sorted = sorted?;
            if let Some(pos) = sorted.windows(2).position(|w| w[0] > w[1]) {
                bail!("output out of order at index {}", pos);
            }
            println!("sorted {} values ({:?})", sorted.len(), elapsed);
            finish(&pool, args.stats);
        },
        Commands::Increment { workload, delta } => {
            let cells = IncrementTask::atomics(random_values(&workload));
            let before: i64 = cells.iter().map(|c| c.load(Ordering::Relaxed)).sum();
            let pool = fork_join_pool(&config)?;
            let task = IncrementTask::new(cells.clone(), delta).with_threshold(workload.threshold);
            let (done, elapsed) = timed(|| pool.invoke(task));
            done?;
            let after: i64 = cells.iter().map(|c| c.load(Ordering::Relaxed)).sum();
            println!(
                "incremented {} values by {}: sum {} -> {} ({:?})",
                cells.len(),
                delta,
                before,
                after,
                elapsed
            );
            finish(&pool, args.stats);
        },
        Commands::Matmul {
            size,
            threshold,
            seed,
        } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let lhs = Arc::new(Matrix::from_fn(size, size, |_, _| rng.random_range(-1.0..1.0)));
            let rhs = Arc::new(Matrix::from_fn(size, size, |_, _| rng.random_range(-1.0..1.0)));
            let pool = fork_join_pool(&config)?;
            let (product, elapsed) =
                timed(|| Matrix::par_multiply(lhs.clone(), rhs.clone(), &pool, threshold));
            let product = product?;
            let trace: f64 = (0..size).map(|i| product.get(i, i)).sum();
            println!("{0}x{0} product, trace = {1:.6} ({2:?})", size, trace, elapsed);
            finish(&pool, args.stats);
        },
        Commands::Schedule {
            period_ms,
            runs,
            mode,
        } => run_schedule(Duration::from_millis(period_ms), runs, mode)?,
        Commands::Batch { jobs, work_ms } => {
            let executor = ThreadPoolExecutor::with_config(config.executor_config()?)?;
            let work = Duration::from_millis(work_ms);
            let started = Instant::now();
            let handles = (0..jobs)
                .map(|i| {
                    executor.submit(move || {
                        std::thread::sleep(work);
                        i
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut total = 0;
            for handle in handles {
                total += handle.get()?;
            }
            println!(
                "{} jobs done (checksum {}) in {:?}, largest pool size {}",
                jobs,
                total,
                started.elapsed(),
                executor.largest_pool_size()
            );
            executor.shutdown();
            executor.await_termination(Duration::from_secs(5));
        },
        Commands::Config { output } => match output {
            Some(path) => {
                config
                    .save_to_path(&path)
                    .with_context(|| format!("Failed to write: {}", path.display()))?;
                eprintln!("wrote {}", path.display());
            },
            None => print!("{}", toml::to_string_pretty(&config)?),
        },
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        },
    }

    Ok(())
}

fn fork_join_pool(config: &RuntimeConfig) -> Result<ForkJoinPool> {
    let pool = ForkJoinPool::with_config(config.scheduler_config()?)?;
    info!(workers = pool.parallelism(), "fork/join pool started");
    Ok(pool)
}

fn random_values(workload: &Workload) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(workload.seed);
    (0..workload.len)
        .map(|_| rng.random_range(-1_000_000..=1_000_000))
        .collect()
}

fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}

fn finish(
    pool: &ForkJoinPool,
    show_stats: bool,
) {
    pool.shutdown();
    pool.await_termination(Duration::from_secs(5));
    if show_stats {
        print_stats(&pool.stats());
    }
}

fn print_stats(stats: &PoolStatsSnapshot) {
    println!("submitted:    {}", stats.submitted);
    println!("forked:       {}", stats.forked);
    println!("completed:    {}", stats.completed);
    println!("failed:       {}", stats.failed);
    println!("cancelled:    {}", stats.cancelled);
    println!("steals:       {} ({} sweeps)", stats.steals, stats.steal_sweeps);
    println!("parks:        {}", stats.parks);
    println!("exec time:    {:?}", stats.exec_time);
}

fn run_schedule(
    period: Duration,
    runs: usize,
    cadence: Cadence,
) -> Result<()> {
    if runs == 0 {
        bail!("--runs must be at least 1");
    }
    let scheduler = ScheduledExecutor::new(1)?;
    let fired = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();
    let mode = match cadence {
        Cadence::Rate => ScheduleMode::FixedRate(period),
        Cadence::Delay => ScheduleMode::FixedDelay(period),
    };
    let counter = fired.clone();
    let handle = scheduler.schedule_entry(
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            println!("run {} at {:?}", n, started.elapsed());
        },
        Duration::ZERO,
        mode,
    )?;
    while fired.load(Ordering::SeqCst) < runs {
        std::thread::sleep(period / 4);
    }
    handle.cancel(false);
    scheduler.shutdown();
    if !scheduler.await_termination(Duration::from_secs(5)) {
        bail!("scheduler did not terminate");
    }
    Ok(())
}
