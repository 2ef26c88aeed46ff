//! Valvebench command-line interface.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use valvebench_analyser::{
    Analyser, AnalyserClient, SerialTransport, TestPlan, HEATER_POLL_PERIOD, HEATER_WARMUP,
};
use valvebench_core::{
    AxisRange, Calibration, DeviceType, Electrode, Measurement, TestType, UnitConverter,
};
use valvebench_models::{
    kind_from_str, model_for_kind, model_from_json, model_to_json, solve_in_background,
    CohenHelieTriode, Estimate, GardinerPentode, Model, ModelJson, ModelKind,
};

#[derive(Parser)]
#[command(name = "valvebench")]
#[command(about = "Vacuum-tube analyser control and device model fitting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fit a device model to a measurement JSON file
    Fit {
        /// Measurement JSON, as produced by `run`
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Model family: simple, koren, cohenHelie, reefmanDerk,
        /// reefmanDerkE, gardiner
        #[arg(short, long, default_value = "cohenHelie")]
        model: String,

        /// Output path for the fitted model JSON
        #[arg(short, long)]
        output: PathBuf,

        /// Cohen-Helie triode model JSON to seed a pentode fit
        #[arg(long)]
        triode_seed: Option<PathBuf>,

        /// Fit the secondary-emission terms (Gardiner pentode only)
        #[arg(long)]
        secondary_emission: bool,
    },

    /// Convert between converter codes and physical volts
    Convert {
        /// Electrode: heater, grid, anode, screen
        #[arg(short, long)]
        electrode: String,

        /// Voltage to encode as a DAC code
        #[arg(short, long)]
        volts: Option<f64>,

        /// ADC code to decode to volts
        #[arg(short, long)]
        code: Option<i32>,

        /// Assume Mega-revision hardware
        #[arg(long)]
        mega: bool,
    },

    /// Run a characteristic-curve test on a connected analyser
    Run {
        /// Serial port path, e.g. /dev/ttyUSB0
        #[arg(short, long)]
        port: String,

        #[arg(long, default_value_t = 115_200)]
        baud: u32,

        /// Device under test: triode, doubleTriode, pentode
        #[arg(short, long)]
        device: String,

        /// Test: anode, transfer, screen
        #[arg(short, long, default_value = "anode")]
        test: String,

        /// Heater voltage
        #[arg(long)]
        heater: f64,

        /// Anode axis as start:stop:step volts
        #[arg(long)]
        anode: String,

        /// Grid axis as start:stop:step volts (magnitudes)
        #[arg(long)]
        grid: String,

        /// Screen axis as start:stop:step volts
        #[arg(long, default_value = "0:0:0")]
        screen: String,

        /// Anode current safety limit, mA
        #[arg(long)]
        ia_max: f64,

        /// Anode dissipation safety limit, W
        #[arg(long)]
        p_max: f64,

        /// Inner-axis sweep points (each family captures points + 1)
        #[arg(long, default_value_t = 30)]
        points: usize,

        /// Heater soak time before the test starts, seconds
        #[arg(long, default_value_t = 15)]
        warmup: u64,

        /// Output path for the measurement JSON
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Fit {
            input,
            model,
            output,
            triode_seed,
            secondary_emission,
        } => run_fit(&input, &model, &output, triode_seed.as_deref(), secondary_emission),
        Command::Convert {
            electrode,
            volts,
            code,
            mega,
        } => run_convert(&electrode, volts, code, mega),
        Command::Run {
            port,
            baud,
            device,
            test,
            heater,
            anode,
            grid,
            screen,
            ia_max,
            p_max,
            points,
            warmup,
            output,
        } => {
            let plan = TestPlan {
                device_type: parse_device(&device)?,
                test_type: parse_test(&test)?,
                heater_voltage: heater,
                anode: parse_range(&anode)?,
                grid: parse_range(&grid)?,
                screen: parse_range(&screen)?,
                ia_max,
                p_max,
                sweep_points: points,
            };
            run_test(&port, baud, &plan, Duration::from_secs(warmup), &output)
        }
    }
}

// ---- fit -------------------------------------------------------------------

fn run_fit(
    input: &Path,
    family: &str,
    output: &Path,
    triode_seed: Option<&Path>,
    secondary_emission: bool,
) -> Result<()> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("reading measurement {}", input.display()))?;
    let (measurement, warnings) =
        Measurement::from_json_str(&text).context("parsing measurement")?;
    for w in &warnings {
        warn!("{w}");
    }
    info!(
        "loaded {}: {} sweeps, {} samples",
        measurement.name(),
        measurement.sweep_count(),
        measurement.sample_count()
    );

    let kind = kind_from_str(family).context("unknown model family")?;
    let model = build_model(kind, secondary_emission);
    let model = seed_model(model, kind, &measurement, triode_seed, secondary_emission)?;

    let started = Instant::now();
    let handle = solve_in_background(model, measurement);
    let outcome = handle.recv().context("fit worker died")?;
    info!("fit finished in {:.1} s", started.elapsed().as_secs_f64());

    if !outcome.converged {
        bail!("fit did not converge; model discarded");
    }

    let json = model_to_json(outcome.model.as_ref());
    let text = serde_json::to_string_pretty(&json)?;
    fs::write(output, text).with_context(|| format!("writing {}", output.display()))?;
    info!("wrote {}", output.display());
    Ok(())
}

fn build_model(kind: ModelKind, secondary_emission: bool) -> Box<dyn Model> {
    if kind == ModelKind::GardinerPentode {
        let mut model = GardinerPentode::new();
        model.set_secondary_emission(secondary_emission);
        return Box::new(model);
    }
    model_for_kind(kind)
}

fn seed_model(
    mut model: Box<dyn Model>,
    kind: ModelKind,
    measurement: &Measurement,
    triode_seed: Option<&Path>,
    secondary_emission: bool,
) -> Result<Box<dyn Model>> {
    let mut estimate = Estimate::new();
    if kind.is_pentode() {
        let seed = triode_seed.map(load_triode_seed).transpose()?;
        estimate.estimate_pentode(measurement, seed.as_ref(), secondary_emission);
    } else {
        estimate.estimate_triode(measurement);
    }
    estimate.apply(model.as_mut());
    Ok(model)
}

fn load_triode_seed(path: &Path) -> Result<CohenHelieTriode> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading triode seed {}", path.display()))?;
    let json: ModelJson = serde_json::from_str(&text).context("parsing triode seed")?;
    if json.kind != "cohenHelie" {
        bail!("triode seed must be a cohenHelie model, got {}", json.kind);
    }
    let parsed = model_from_json(&json)?;
    let mut seed = CohenHelieTriode::new();
    for &id in parsed.json_params() {
        seed.params_mut().set(id, parsed.params().get(id));
    }
    Ok(seed)
}

// ---- convert ---------------------------------------------------------------

fn run_convert(electrode: &str, volts: Option<f64>, code: Option<i32>, mega: bool) -> Result<()> {
    let electrode = parse_electrode(electrode)?;
    let converter = UnitConverter::new(Calibration {
        is_mega: mega,
        ..Calibration::default()
    });

    match (volts, code) {
        (Some(v), None) => println!("{}", converter.target_code(electrode, v)),
        (None, Some(c)) => println!("{:.4} V", converter.measured_voltage(electrode, c)),
        _ => bail!("pass exactly one of --volts or --code"),
    }
    Ok(())
}

// ---- run -------------------------------------------------------------------

#[derive(Default)]
struct ConsoleClient {
    vh: f64,
    ih: f64,
    last_percent: u32,
}

impl AnalyserClient for ConsoleClient {
    fn update_heater(&mut self, volts: Option<f64>, amps: Option<f64>) {
        if let Some(v) = volts {
            self.vh = v;
        }
        if let Some(i) = amps {
            self.ih = i;
        }
        info!("heater: {:.2} V, {:.0} mA", self.vh, self.ih * 1000.0);
    }

    fn test_progress(&mut self, percent: u32) {
        if percent != self.last_percent {
            self.last_percent = percent;
            info!("progress {percent}%");
        }
    }

    fn test_finished(&mut self) {
        info!("test finished");
    }

    fn test_aborted(&mut self) {
        warn!("test aborted");
    }
}

type Session = Analyser<SerialTransport, ConsoleClient>;

fn run_test(
    port: &str,
    baud: u32,
    plan: &TestPlan,
    warmup: Duration,
    output: &Path,
) -> Result<()> {
    let transport = SerialTransport::open(port, baud)
        .with_context(|| format!("opening serial port {port}"))?;
    let mut analyser = Analyser::new(transport, ConsoleClient::default());

    info!("heaters to {:.2} V, soaking for {} s", plan.heater_voltage, warmup.as_secs());
    analyser.set_heaters(true, plan.heater_voltage);
    thread::sleep(HEATER_WARMUP);

    let soak_end = Instant::now() + warmup;
    while Instant::now() < soak_end {
        analyser.on_heater_tick();
        pump_until_idle(&mut analyser)?;
        thread::sleep(HEATER_POLL_PERIOD);
    }

    analyser.start_test(plan)?;
    while analyser.is_test_running() {
        pump(&mut analyser)?;
        if let Some(deadline) = analyser.command_deadline() {
            if Instant::now() >= deadline {
                analyser.handle_command_timeout();
            }
        }
        thread::sleep(Duration::from_millis(20));
    }
    // Trailing discharge acknowledgement, then heaters off.
    pump_until_idle(&mut analyser)?;
    analyser.set_heaters(false, 0.0);
    pump_until_idle(&mut analyser)?;

    let measurement = analyser
        .take_result()
        .context("test did not complete; no data written")?;
    let text = serde_json::to_string_pretty(&measurement.to_json())?;
    fs::write(output, text).with_context(|| format!("writing {}", output.display()))?;
    info!(
        "wrote {} ({} sweeps, {} samples)",
        output.display(),
        measurement.sweep_count(),
        measurement.sample_count()
    );
    Ok(())
}

fn pump(analyser: &mut Session) -> Result<()> {
    for line in analyser.transport_mut().read_lines()? {
        analyser.check_response(&line);
    }
    Ok(())
}

/// Pump until the command queue drains or the in-flight command times out.
fn pump_until_idle(analyser: &mut Session) -> Result<()> {
    while analyser.awaiting_response() {
        pump(analyser)?;
        if let Some(deadline) = analyser.command_deadline() {
            if Instant::now() >= deadline {
                analyser.handle_command_timeout();
                break;
            }
        }
        thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

// ---- argument parsing ------------------------------------------------------

fn parse_electrode(name: &str) -> Result<Electrode> {
    match name.to_lowercase().as_str() {
        "heater" => Ok(Electrode::Heater),
        "grid" => Ok(Electrode::Grid),
        "anode" => Ok(Electrode::Anode),
        "screen" => Ok(Electrode::Screen),
        other => bail!("unknown electrode {other}; expected heater, grid, anode or screen"),
    }
}

fn parse_device(name: &str) -> Result<DeviceType> {
    match name {
        "triode" => Ok(DeviceType::Triode),
        "doubleTriode" => Ok(DeviceType::DoubleTriode),
        "pentode" => Ok(DeviceType::Pentode),
        other => bail!("unknown device {other}; expected triode, doubleTriode or pentode"),
    }
}

fn parse_test(name: &str) -> Result<TestType> {
    match name {
        "anode" => Ok(TestType::AnodeCharacteristics),
        "transfer" => Ok(TestType::TransferCharacteristics),
        "screen" => Ok(TestType::ScreenCharacteristics),
        other => bail!("unknown test {other}; expected anode, transfer or screen"),
    }
}

/// Parse a `start:stop:step` voltage axis.
fn parse_range(text: &str) -> Result<AxisRange> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        bail!("axis must be start:stop:step, got {text}");
    }
    let mut values = [0.0f64; 3];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .with_context(|| format!("bad axis value {part}"))?;
    }
    Ok(AxisRange::new(values[0], values[1], values[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let r = parse_range("0:300:10").unwrap();
        assert_eq!((r.start, r.stop, r.step), (0.0, 300.0, 10.0));
        assert!(parse_range("0:300").is_err());
        assert!(parse_range("a:b:c").is_err());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!(parse_electrode("Anode").unwrap(), Electrode::Anode);
        assert!(parse_electrode("cathode").is_err());
        assert_eq!(parse_device("pentode").unwrap(), DeviceType::Pentode);
        assert_eq!(parse_test("transfer").unwrap(), TestType::TransferCharacteristics);
    }
}
