use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickwire_config::{StopReason, SystemManifest, TestAssertion, TestScript};
use tickwire_core::bus::SystemBus;
use tickwire_core::clock::SimClock;
use tickwire_core::hal::ClockDivisor;
use tickwire_core::metrics::InterruptMetrics;
use tickwire_core::vector::{Isr, VectorTable, DEFAULT_BODY_CYCLES};
use tickwire_core::Machine;
use tracing::{error, info};

const EXIT_PASS: i32 = 0;
const EXIT_ASSERT_FAIL: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_RUNTIME_ERROR: i32 = 3;

const MAX_ALLOWED_CYCLES: u64 = 50_000_000;

const DEFAULT_CLOCK_HZ: u32 = 1_000_000;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tickwire timer-interrupt simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot the timer-interrupt program and run it for a number of cycles
    Run(RunArgs),
    /// Run a test script and check its assertions
    Test(TestArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the system manifest (YAML)
    #[arg(short, long)]
    system: Option<PathBuf>,

    /// Clock cycles to simulate
    #[arg(long, default_value = "100000")]
    max_cycles: u64,

    /// Log every overflow and handler entry
    #[arg(short, long)]
    trace: bool,

    /// Write a JSON machine snapshot here when the run ends
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TestArgs {
    /// Path to the test script (YAML)
    #[arg(long)]
    script: PathBuf,

    /// Directory for result.json and junit.xml
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Write a JUnit report to this path
    #[arg(long)]
    junit: Option<PathBuf>,

    #[arg(short, long)]
    trace: bool,
}

/// Overflow handler of the timer-interrupt program.
fn timer_overflow() {}

struct Simulation {
    machine: Machine,
    metrics: Arc<InterruptMetrics>,
    divisor: ClockDivisor,
}

fn init_tracing(trace: bool) {
    let level = if trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_simulation(system: Option<&Path>) -> anyhow::Result<Simulation> {
    let (bus, clock_hz, divisor, body_cycles) = if let Some(sys_path) = system {
        info!("Loading system manifest: {:?}", sys_path);
        let manifest = SystemManifest::from_file(sys_path)?;
        let chip_path = sys_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&manifest.chip);
        info!("Loading chip descriptor: {:?}", chip_path);
        let chip = tickwire_config::ChipDescriptor::from_file(&chip_path)?;
        let bus = SystemBus::from_config(&chip)?;
        let divisor = ClockDivisor::try_from(manifest.prescaler)
            .with_context(|| format!("Manifest '{}'", manifest.name))?;
        (bus, manifest.clock_hz()?, divisor, manifest.handler_cycles)
    } else {
        info!("Using default hardware configuration");
        (
            SystemBus::new(),
            DEFAULT_CLOCK_HZ,
            ClockDivisor::Div64,
            DEFAULT_BODY_CYCLES,
        )
    };

    let layout = bus.timer_layout()?;
    let mut vectors = VectorTable::new();
    vectors.try_bind(
        layout.overflow,
        Isr {
            handler: timer_overflow,
            body_cycles,
        },
    )?;

    let clock = SimClock::new(clock_hz)?;
    let mut machine = Machine::new(bus, clock, vectors);
    let metrics = Arc::new(InterruptMetrics::new());
    machine.observers.push(metrics.clone());

    machine.boot(divisor)?;

    Ok(Simulation {
        machine,
        metrics,
        divisor,
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_interactive(args),
        Commands::Test(args) => std::process::exit(run_test(args)),
    }
}

fn run_interactive(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.trace);
    info!("Starting Tickwire Simulator");

    if args.max_cycles > MAX_ALLOWED_CYCLES {
        anyhow::bail!(
            "max_cycles {} exceeds the allowed maximum of {}",
            args.max_cycles,
            MAX_ALLOWED_CYCLES
        );
    }

    let mut sim = load_simulation(args.system.as_deref())?;
    let layout = sim.machine.bus.timer_layout()?;
    info!(
        "Running {} at {} Hz, {} {}-bit counter, for {} cycles",
        layout.overflow,
        sim.machine.clock.frequency_hz(),
        sim.divisor,
        layout.width.bits(),
        args.max_cycles
    );

    let ran = sim.machine.run_cycles(args.max_cycles)?;
    sim.machine.stop();

    println!("Simulation complete");
    println!("  Cycles:              {}", ran);
    println!("  Simulated time:      {:?}", sim.machine.clock.elapsed());
    println!(
        "  Overflow period:     {:?}",
        sim.machine.clock.overflow_period(sim.divisor, layout.width)
    );
    println!("  Overflows:           {}", sim.metrics.get_overflows());
    println!("  Handler invocations: {}", sim.metrics.get_invocations());
    println!("  Coalesced overflows: {}", sim.metrics.get_coalesced());
    println!(
        "  Max latency:         {} cycles",
        sim.metrics.get_max_latency()
    );
    if let Some(mean) = sim.metrics.mean_period_cycles() {
        println!("  Mean period:         {:.1} cycles", mean);
    }

    if let Some(path) = args.snapshot {
        let snapshot = sim.machine.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write snapshot to {:?}", path))?;
        info!("Snapshot written to {:?}", path);
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct AssertionResult {
    assertion: serde_json::Value,
    passed: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct TestConfig {
    script: String,
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct TestResult {
    status: String,
    stop_reason: Option<StopReason>,
    cycles: u64,
    simulated_ns: u64,
    overflows: u64,
    invocations: u64,
    coalesced: u64,
    max_latency_cycles: u64,
    assertions: Vec<AssertionResult>,
    config: TestConfig,
    config_hash: String,
    error: Option<String>,
}

fn run_test(args: TestArgs) -> i32 {
    init_tracing(args.trace);

    let script = match TestScript::from_file(&args.script) {
        Ok(script) => script,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    if script.limits.max_cycles > MAX_ALLOWED_CYCLES {
        error!(
            "max_cycles {} exceeds the allowed maximum of {}",
            script.limits.max_cycles, MAX_ALLOWED_CYCLES
        );
        return EXIT_CONFIG_ERROR;
    }

    let script_dir = args
        .script
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let system = script.inputs.system.as_ref().map(|s| script_dir.join(s));

    let config_hash = match hash_inputs(&args.script, system.as_deref()) {
        Ok(hash) => hash,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let mut sim = match load_simulation(system.as_deref()) {
        Ok(sim) => sim,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let wall_limit = script.limits.wall_time_ms.map(Duration::from_millis);
    let started = Instant::now();
    let mut stop_reason = None;
    let mut runtime_error = None;

    loop {
        if sim.machine.clock.cycles() >= script.limits.max_cycles {
            stop_reason = Some(StopReason::MaxCycles);
            break;
        }
        if let Some(limit) = wall_limit {
            if started.elapsed() >= limit {
                stop_reason = Some(StopReason::WallTime);
                break;
            }
        }
        if let Err(e) = sim.machine.step() {
            error!("Simulation error at cycle {}: {}", sim.machine.clock.cycles(), e);
            runtime_error = Some(e.to_string());
            break;
        }
    }
    sim.machine.stop();

    let assertions: Vec<AssertionResult> = script
        .assertions
        .iter()
        .map(|assertion| evaluate(assertion, &sim.metrics, stop_reason))
        .collect();

    let status = if runtime_error.is_some() {
        "error"
    } else if assertions.iter().all(|a| a.passed) {
        "pass"
    } else {
        "fail"
    };
    info!(
        "Test {}: {} cycles, {} handler invocations",
        status,
        sim.machine.clock.cycles(),
        sim.metrics.get_invocations()
    );

    let result = TestResult {
        status: status.to_string(),
        stop_reason,
        cycles: sim.machine.clock.cycles(),
        simulated_ns: sim.machine.clock.elapsed().as_nanos() as u64,
        overflows: sim.metrics.get_overflows(),
        invocations: sim.metrics.get_invocations(),
        coalesced: sim.metrics.get_coalesced(),
        max_latency_cycles: sim.metrics.get_max_latency(),
        assertions,
        config: TestConfig {
            script: args.script.display().to_string(),
            system: system.as_ref().map(|p| p.display().to_string()),
        },
        config_hash,
        error: runtime_error,
    };

    if let Err(e) = write_reports(&result, args.output_dir.as_deref(), args.junit.as_deref()) {
        error!("{:#}", e);
        return EXIT_RUNTIME_ERROR;
    }

    match result.status.as_str() {
        "pass" => EXIT_PASS,
        "fail" => EXIT_ASSERT_FAIL,
        _ => EXIT_RUNTIME_ERROR,
    }
}

fn evaluate(
    assertion: &TestAssertion,
    metrics: &InterruptMetrics,
    stop_reason: Option<StopReason>,
) -> AssertionResult {
    let (passed, message) = match assertion {
        TestAssertion::HandlerInvocations(a) => {
            let count = metrics.get_invocations();
            let range = &a.handler_invocations;
            (
                range.contains(count),
                format!(
                    "{} handler invocations (expected {} +/- {})",
                    count, range.expected, range.tolerance
                ),
            )
        }
        TestAssertion::NoCoalescedOverflows(a) => {
            let coalesced = metrics.get_coalesced();
            (
                !a.no_coalesced_overflows || coalesced == 0,
                format!("{} coalesced overflows", coalesced),
            )
        }
        TestAssertion::ExpectedStopReason(a) => (
            stop_reason == Some(a.expected_stop_reason),
            format!(
                "stopped on {:?} (expected {:?})",
                stop_reason, a.expected_stop_reason
            ),
        ),
    };

    if !passed {
        error!("Assertion failed: {}", message);
    }
    AssertionResult {
        assertion: serde_json::to_value(assertion).unwrap_or(serde_json::Value::Null),
        passed,
        message,
    }
}

fn hash_inputs(script: &Path, system: Option<&Path>) -> anyhow::Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(
        std::fs::read(script).with_context(|| format!("Failed to read {:?}", script))?,
    );
    if let Some(system) = system {
        hasher.update(
            std::fs::read(system).with_context(|| format!("Failed to read {:?}", system))?,
        );
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn write_reports(
    result: &TestResult,
    output_dir: Option<&Path>,
    junit: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(dir.join("result.json"), json)
            .context("Failed to write result.json")?;
        std::fs::write(dir.join("junit.xml"), junit_xml(result))
            .context("Failed to write junit.xml")?;
    }
    if let Some(path) = junit {
        std::fs::write(path, junit_xml(result))
            .with_context(|| format!("Failed to write JUnit report to {:?}", path))?;
    }
    Ok(())
}

fn junit_xml(result: &TestResult) -> String {
    let failures = result.assertions.iter().filter(|a| !a.passed).count();
    let errors = usize::from(result.error.is_some());
    let seconds = result.simulated_ns as f64 / 1e9;

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"tickwire test\" tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.6}\">\n",
        result.assertions.len().max(1),
        failures,
        errors,
        seconds
    ));

    if let Some(err) = &result.error {
        xml.push_str(&format!(
            "  <testcase name=\"simulation\" classname=\"tickwire\">\n    <error message=\"{}\"/>\n  </testcase>\n",
            xml_escape(err)
        ));
    } else if result.assertions.is_empty() {
        xml.push_str("  <testcase name=\"simulation\" classname=\"tickwire\"/>\n");
    }

    for (i, assertion) in result.assertions.iter().enumerate() {
        let name = xml_escape(&format!("assertion {}: {}", i, assertion.assertion));
        if assertion.passed {
            xml.push_str(&format!(
                "  <testcase name=\"{}\" classname=\"tickwire\"/>\n",
                name
            ));
        } else {
            xml.push_str(&format!(
                "  <testcase name=\"{}\" classname=\"tickwire\">\n    <failure message=\"{}\"/>\n  </testcase>\n",
                name,
                xml_escape(&assertion.message)
            ));
        }
    }

    xml.push_str("</testsuite>\n");
    xml
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
