//! CLI for the loomfuzz guidance engine.
//!
//! ```bash
//! # Fuzz a reference target for 30 seconds
//! loomfuzz run --class demo/Calculator --method divide --time 30s --out results/
//!
//! # Behavioral-diversity engine with seeds and a trial cap
//! loomfuzz run --class demo/TreeParser --method parse \
//!     --engine bedivfuzz --in seeds/ --trials 100000 --out results/
//!
//! # Re-execute a saved input and report its classification
//! loomfuzz repro --class demo/Calculator --method divide results/failures/id_000000
//! ```
//!
//! The binary ships a small registry of reference targets selected by
//! `--class`/`--method`. Real programs embed the engine through
//! [`loomfuzz_guidance::session::TestHarness`] instead; the reference
//! targets exist so the whole loop can be driven and demonstrated from the
//! command line.
//!
//! Exit codes: 0 clean, 1 failures were found, 2 configuration or internal
//! error.

use clap::{Parser, Subcommand};
use loomfuzz_guidance::choice::{ChoiceSource, LinearSource, SplitSource};
use loomfuzz_guidance::config::{parse_duration, Config, Engine, Instrumentation, StatsStyle};
use loomfuzz_guidance::coverage::CoverageMap;
use loomfuzz_guidance::failures::FailureInfo;
use loomfuzz_guidance::guidance::{FuzzGuidance, GuidanceError, TraceCallback, TrialInput};
use loomfuzz_guidance::report::format_report;
use loomfuzz_guidance::session::{run_session, HarnessOutcome};
use loomfuzz_trace::{Instruction, MethodId, ThreadTracer, TraceEvent};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(name = "loomfuzz")]
#[command(about = "Coverage-guided generator-based fuzzing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a fuzzing campaign.
    Run {
        /// Entry-point class identifier.
        #[arg(long)]
        class: String,

        /// Entry-point method name.
        #[arg(long)]
        method: String,

        /// Guidance engine: zest, zeal, or bedivfuzz.
        #[arg(long, default_value = "zest")]
        engine: String,

        /// Run duration in [Nh][Nm][Ns] form, e.g. 60s or 2h30m.
        #[arg(long)]
        time: Option<String>,

        /// Trial cap.
        #[arg(long)]
        trials: Option<u64>,

        /// Seed for all randomness; omit for an entropy seed.
        #[arg(long)]
        random_seed: Option<u64>,

        /// Disable the novelty filter; every input is random.
        #[arg(long)]
        blind: bool,

        /// Skip coverage collection (requires --blind).
        #[arg(long)]
        no_cov: bool,

        /// Seed input directory.
        #[arg(long = "in")]
        input_dir: Option<PathBuf>,

        /// Output directory.
        #[arg(long = "out", default_value = "fuzz-results")]
        output_dir: PathBuf,

        /// Save redundant inputs too.
        #[arg(long)]
        save_all: bool,

        /// Persist the cumulative branch-hit-count snapshot.
        #[arg(long)]
        save_branch_hit_counts: bool,

        /// Milliseconds between stats lines.
        #[arg(long, default_value = "300")]
        stats_refresh: u64,

        /// Stop after the first failure.
        #[arg(long)]
        exit_on_crash: bool,

        /// Per-trial time limit in milliseconds.
        #[arg(long)]
        run_timeout: Option<u64>,

        /// Disable stream extension.
        #[arg(long)]
        fixed_size: bool,

        /// Instrumentation backend: fast or janala (forwarded to the
        /// harness).
        #[arg(long, default_value = "fast")]
        instrumentation: String,

        /// Comma-separated class-prefix excludes for instrumentation.
        #[arg(long)]
        excludes: Option<String>,

        /// Comma-separated class-prefix includes for instrumentation.
        #[arg(long)]
        includes: Option<String>,

        /// Stats line style: afl or libfuzzer.
        #[arg(long, default_value = "afl")]
        stats_style: String,

        /// Admit inputs on H1 growth alone (bedivfuzz).
        #[arg(long)]
        admit_on_diversity_gain: bool,
    },

    /// Re-execute one saved input and report its classification.
    Repro {
        /// Entry-point class identifier.
        #[arg(long)]
        class: String,

        /// Entry-point method name.
        #[arg(long)]
        method: String,

        /// Engine the input was saved under.
        #[arg(long, default_value = "zest")]
        engine: String,

        /// Path to the saved input (for split inputs, the .structure file).
        input: PathBuf,
    },
}

/// Built-in reference targets.
#[derive(Clone, Copy)]
enum DemoTarget {
    /// `demo/Calculator#divide` — 8-bit division with an assumption and a
    /// planted failure.
    CalculatorDivide,
    /// `demo/TreeParser#parse` — structure/value list parser with a planted
    /// depth failure.
    TreeParse,
}

fn resolve_target(class: &str, method: &str) -> Option<DemoTarget> {
    match (class, method) {
        ("demo/Calculator", "divide") => Some(DemoTarget::CalculatorDivide),
        ("demo/TreeParser", "parse") => Some(DemoTarget::TreeParse),
        _ => None,
    }
}

fn run_target(
    target: DemoTarget,
    source: &mut dyn ChoiceSource,
    trace: &mut dyn FnMut(TraceEvent),
) -> Result<HarnessOutcome, GuidanceError> {
    match target {
        DemoTarget::CalculatorDivide => {
            let a = match source.read_byte() {
                Some(b) => b,
                None => return Ok(HarnessOutcome::Invalid),
            };
            let b = match source.read_byte() {
                Some(b) => b,
                None => return Ok(HarnessOutcome::Invalid),
            };
            if b == 0 {
                return Ok(HarnessOutcome::Invalid);
            }
            let q = a / b;
            trace(TraceEvent::Branch {
                iid: 100,
                arm: (q > 0) as u32,
            });
            trace(TraceEvent::Branch {
                iid: 101,
                arm: (q > 16) as u32,
            });
            if a == 0xff && b == 0x01 {
                return Ok(HarnessOutcome::Failure(FailureInfo {
                    class: "ArithmeticError".to_string(),
                    frame: "demo::calculator::divide".to_string(),
                    message: "quotient out of range".to_string(),
                    stacktrace: "demo::calculator::divide\ndemo::calculator::entry".to_string(),
                }));
            }
            Ok(HarnessOutcome::Success)
        }
        DemoTarget::TreeParse => run_tree_parse(source, trace),
    }
}

/// The tree parser routes its instrumentation through a [`ThreadTracer`],
/// the same way an instrumented target thread would: the backend reports
/// low-level instructions, and only events scoped to the entry point reach
/// the guidance callback.
fn run_tree_parse(
    source: &mut dyn ChoiceSource,
    trace: &mut dyn FnMut(TraceEvent),
) -> Result<HarnessOutcome, GuidanceError> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let entry = MethodId::parse("demo/TreeParser#parse")
        .map_err(|_| GuidanceError::Protocol("bad tree parser entry point"))?;
    let mut tracer = ThreadTracer::new(
        Some(entry),
        Box::new(move |event| {
            if let Ok(mut buf) = sink.lock() {
                buf.push(event);
            }
        }),
    );
    let mut emit = |tracer: &mut ThreadTracer, inst: Instruction| {
        tracer
            .consume(&inst)
            .map_err(|_| GuidanceError::Protocol("unbalanced instrumentation stream"))
    };

    emit(
        &mut tracer,
        Instruction::MethodBegin {
            iid: 1,
            owner: "demo/TreeParser".to_string(),
            name: "parse".to_string(),
        },
    )?;

    // Structural choices shape the tree, value choices fill leaves.
    let mut outcome = HarnessOutcome::Success;
    let mut depth = 0u32;
    loop {
        let tag = match source.read_structure_byte() {
            Some(t) => t % 3,
            None => break,
        };
        emit(
            &mut tracer,
            Instruction::BranchTaken {
                iid: 200,
                arm: tag as u32,
            },
        )?;
        match tag {
            0 => break,
            1 => {
                let leaf = source.read_value_byte().unwrap_or(0);
                emit(
                    &mut tracer,
                    Instruction::BranchTaken {
                        iid: 201,
                        arm: (leaf > 0x7f) as u32,
                    },
                )?;
            }
            _ => {
                depth += 1;
                if depth > 6 {
                    outcome = HarnessOutcome::Failure(FailureInfo {
                        class: "RecursionError".to_string(),
                        frame: "demo::tree_parser::descend".to_string(),
                        message: format!("nesting depth {} exceeds limit", depth),
                        stacktrace: "demo::tree_parser::descend\ndemo::tree_parser::parse"
                            .to_string(),
                    });
                    break;
                }
            }
        }
    }
    emit(&mut tracer, Instruction::MethodReturn { iid: 2 })?;

    let collected = match events.lock() {
        Ok(mut buf) => std::mem::take(&mut *buf),
        Err(_) => Vec::new(),
    };
    for event in collected {
        trace(event);
    }
    Ok(outcome)
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { .. } => cmd_run(cli.command),
        Commands::Repro {
            class,
            method,
            engine,
            input,
        } => cmd_repro(class, method, engine, input),
    }
}

fn build_config(command: Commands) -> Result<(Config, DemoTarget), String> {
    let Commands::Run {
        class,
        method,
        engine,
        time,
        trials,
        random_seed,
        blind,
        no_cov,
        input_dir,
        output_dir,
        save_all,
        save_branch_hit_counts,
        stats_refresh,
        exit_on_crash,
        run_timeout,
        fixed_size,
        instrumentation,
        excludes,
        includes,
        stats_style,
        admit_on_diversity_gain,
    } = command
    else {
        return Err("not a run command".to_string());
    };

    let target =
        resolve_target(&class, &method).ok_or_else(|| format!("unknown target {}#{}", class, method))?;
    let engine: Engine = engine.parse().map_err(|e| format!("{}", e))?;
    let instrumentation: Instrumentation =
        instrumentation.parse().map_err(|e| format!("{}", e))?;
    let stats_style: StatsStyle = stats_style.parse().map_err(|e| format!("{}", e))?;
    let duration = match time {
        Some(text) => Some(parse_duration(&text).map_err(|e| format!("{}", e))?),
        None => None,
    };
    let split_csv = |s: Option<String>| {
        s.map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    };

    let config = Config {
        test_class: class,
        test_method: method,
        engine,
        duration,
        trials,
        random_seed,
        blind,
        no_cov,
        input_dir,
        output_dir,
        save_all,
        save_branch_hit_counts,
        stats_refresh: std::time::Duration::from_millis(stats_refresh),
        exit_on_crash,
        run_timeout: run_timeout.map(std::time::Duration::from_millis),
        fixed_size,
        instrumentation,
        excludes: split_csv(excludes),
        includes: split_csv(includes),
        admit_on_diversity_gain,
        stats_style,
        ..Default::default()
    };
    config.validate().map_err(|e| format!("{}", e))?;
    Ok((config, target))
}

fn cmd_run(command: Commands) -> ExitCode {
    let (config, target) = match build_config(command) {
        Ok(built) => built,
        Err(message) => {
            eprintln!("Error: {}", message);
            return ExitCode::from(2);
        }
    };

    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!("  loomfuzz");
    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!();
    eprintln!("  Target:  {}#{}", config.test_class, config.test_method);
    eprintln!("  Engine:  {}", config.engine);
    eprintln!("  Instr:   {:?}", config.instrumentation);
    eprintln!("  Output:  {}", config.output_dir.display());
    if let Some(duration) = config.duration {
        eprintln!("  Time:    {}s", duration.as_secs());
    }
    if let Some(trials) = config.trials {
        eprintln!("  Trials:  {}", trials);
    }
    eprintln!();

    let mut guidance = match FuzzGuidance::new(config) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };
    let failures_dir = guidance.failures_dir();

    let mut harness = |input: &mut TrialInput,
                       trace: &mut TraceCallback|
     -> Result<HarnessOutcome, GuidanceError> {
        run_target(target, input, &mut *trace)
    };

    match run_session(&mut guidance, &mut harness) {
        Ok(summary) => {
            println!("{}", format_report(&summary, &failures_dir));
            if summary.unique_failures > 0 {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Fuzzing aborted: {}", e);
            ExitCode::from(2)
        }
    }
}

fn cmd_repro(class: String, method: String, engine: String, input: PathBuf) -> ExitCode {
    let Some(target) = resolve_target(&class, &method) else {
        eprintln!("Error: unknown target {}#{}", class, method);
        return ExitCode::from(2);
    };
    let engine: Engine = match engine.parse() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let mut coverage = CoverageMap::new();
    let mut trace = |event: TraceEvent| {
        if let Some(idx) = event.branch_index() {
            coverage.increment(idx);
        }
    };
    let rng = ChaCha8Rng::seed_from_u64(0);

    let outcome = if engine.is_split() {
        let structure = match fs::read(&input) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Error: cannot read {}: {}", input.display(), e);
                return ExitCode::from(2);
            }
        };
        let value = match fs::read(input.with_extension("value")) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Error: cannot read value stream: {}", e);
                return ExitCode::from(2);
            }
        };
        let mut source = SplitSource::new(structure, value, true, rng);
        run_target(target, &mut source, &mut trace)
    } else {
        let bytes = match fs::read(&input) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Error: cannot read {}: {}", input.display(), e);
                return ExitCode::from(2);
            }
        };
        let mut source = LinearSource::new(bytes, true, rng);
        run_target(target, &mut source, &mut trace)
    };
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    match outcome {
        HarnessOutcome::Success => {
            println!(
                "SUCCESS: {} branches covered",
                coverage.non_zero_count()
            );
            ExitCode::SUCCESS
        }
        HarnessOutcome::Invalid => {
            println!("INVALID: input violates a target assumption");
            ExitCode::SUCCESS
        }
        HarnessOutcome::Failure(info) => {
            println!("FAILURE: {}: {}", info.class, info.message);
            if !info.stacktrace.is_empty() {
                println!("{}", info.stacktrace);
            }
            ExitCode::from(1)
        }
    }
}
