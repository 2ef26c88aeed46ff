//! Protocol engine scenarios against a scripted mock transport.

use valvebench_analyser::{Analyser, AnalyserClient, TestPlan, Transport};
use valvebench_core::{AxisRange, DeviceType, Electrode, TestType};

struct MockTransport {
    writes: Vec<String>,
}

impl MockTransport {
    fn new() -> Self {
        Self { writes: Vec::new() }
    }
}

impl Transport for MockTransport {
    fn write_line(&mut self, line: &str) -> valvebench_analyser::Result<()> {
        self.writes.push(line.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingClient {
    heater: Vec<(Option<f64>, Option<f64>)>,
    progress: Vec<u32>,
    finished: usize,
    aborted: usize,
}

impl AnalyserClient for RecordingClient {
    fn update_heater(&mut self, volts: Option<f64>, amps: Option<f64>) {
        self.heater.push((volts, amps));
    }
    fn test_progress(&mut self, percent: u32) {
        self.progress.push(percent);
    }
    fn test_finished(&mut self) {
        self.finished += 1;
    }
    fn test_aborted(&mut self) {
        self.aborted += 1;
    }
}

type TestAnalyser = Analyser<MockTransport, RecordingClient>;

fn analyser() -> TestAnalyser {
    Analyser::new(MockTransport::new(), RecordingClient::default())
}

/// A 10-field Mode(2) payload with fixed heater/grid codes and the given
/// anode voltage/current codes. The current rides the mid-gain channel.
fn mode2_line(va_code: i32, ia_code: i32) -> String {
    format!("OK: Mode(2) 200,150,100,{va_code},{ia_code},0,0,0,0,0")
}

/// Answer every outstanding command until the engine goes quiet. `respond`
/// maps each written command to the hardware's reply line.
fn drive<F>(a: &mut TestAnalyser, mut respond: F)
where
    F: FnMut(&str) -> String,
{
    let mut answered = 0;
    while answered < a.transport().writes.len() {
        let cmd = a.transport().writes[answered].clone();
        answered += 1;
        let reply = respond(&cmd);
        a.check_response(&reply);
    }
}

fn triode_anode_plan() -> TestPlan {
    TestPlan {
        device_type: DeviceType::Triode,
        test_type: TestType::AnodeCharacteristics,
        heater_voltage: 6.3,
        anode: AxisRange::new(0.0, 300.0, 0.0),
        grid: AxisRange::new(0.0, 4.0, 2.0),
        screen: AxisRange::default(),
        ia_max: 50.0,
        p_max: 1000.0,
        sweep_points: 10,
    }
}

#[test]
fn test_at_most_one_command_outstanding() {
    let mut a = analyser();

    // Version queries: I0 transmits, I1 buffers behind it.
    a.on_heater_tick();
    assert_eq!(a.transport().writes, vec!["I0"], "only one command on the wire");
    assert!(a.awaiting_response());

    a.check_response("OK: Info(0) = VT-2");
    assert_eq!(a.transport().writes.len(), 2, "I1 dispatched after the response");
    assert_eq!(a.transport().writes[1], "I1");

    a.check_response("OK: Info(1) = fw 2.4");
    assert_eq!(a.transport().writes.len(), 2, "nothing left to dispatch");
    assert!(!a.awaiting_response());
}

#[test]
fn test_sweep_grid_completeness() {
    let mut a = analyser();
    a.start_test(&triode_anode_plan()).unwrap();

    let mut sample_no = 0;
    drive(&mut a, |cmd| {
        if cmd == "M2" {
            sample_no += 1;
            mode2_line(500, 80)
        } else {
            "OK: Set".to_string()
        }
    });

    assert_eq!(a.client().finished, 1, "test must run to completion");
    assert_eq!(sample_no, 33, "3 grid families of 11 samples each");

    // Each family's inner axis hits both endpoints exactly.
    let lo = a.converter().target_code(Electrode::Anode, 0.0);
    let hi = a.converter().target_code(Electrode::Anode, 300.0);
    let s3: Vec<i32> = a
        .transport()
        .writes
        .iter()
        .filter_map(|w| w.strip_prefix("S3 "))
        .map(|c| c.parse().unwrap())
        .collect();
    assert_eq!(s3.len(), 33);
    for family in s3.chunks(11) {
        assert_eq!(family[0], lo, "sweep starts at anodeStart");
        assert_eq!(family[10], hi, "sweep ends at anodeStop");
    }

    let m = a.take_result().expect("finished test yields a measurement");
    assert_eq!(m.sweep_count(), 3);
    assert!(m.sweeps().iter().all(|s| s.len() == 11));

    // Grid nominals are stored negated.
    let nominals: Vec<f64> = m.sweeps().iter().map(|s| s.vg1_nominal()).collect();
    assert_eq!(nominals, vec![0.0, -2.0, -4.0]);

    // Samples carry converted physical values, not raw codes.
    let first = &m.sweeps()[0].samples()[0];
    let va = a.converter().measured_voltage(Electrode::Anode, 500);
    assert!((first.va - va).abs() < 1e-9, "va from code 500: {}", first.va);
    assert!(first.ia > 0.0 && first.ia < 50.0, "plausible ia: {}", first.ia);
}

#[test]
fn test_safety_cutoff_is_family_scoped() {
    let mut a = analyser();
    a.start_test(&triode_anode_plan()).unwrap();

    // Code 900 on the mid channel converts to ~54 mA, over the 50 mA
    // limit. Trip it on the second sample of the first family only.
    let mut sample_no = 0;
    drive(&mut a, |cmd| {
        if cmd == "M2" {
            sample_no += 1;
            if sample_no == 2 {
                mode2_line(500, 900)
            } else {
                mode2_line(500, 80)
            }
        } else {
            "OK: Set".to_string()
        }
    });

    assert_eq!(a.client().finished, 1, "cutoff must not abort the test");
    assert_eq!(a.client().aborted, 0);

    let m = a.take_result().unwrap();
    let lens: Vec<usize> = m.sweeps().iter().map(|s| s.len()).collect();
    assert_eq!(
        lens,
        vec![2, 11, 11],
        "first family ends at the cutoff, later families run in full"
    );
}

#[test]
fn test_protocol_abort_mid_sweep() {
    let mut a = analyser();
    a.start_test(&triode_anode_plan()).unwrap();

    let mut m2_count = 0;
    drive(&mut a, |cmd| {
        if cmd == "M2" {
            m2_count += 1;
            if m2_count == 3 {
                "ERROR: HV fault".to_string()
            } else {
                mode2_line(500, 80)
            }
        } else {
            "OK: Set".to_string()
        }
    });

    assert_eq!(a.client().aborted, 1, "abort notification raised");
    assert_eq!(a.client().finished, 0);
    assert!(!a.is_test_running());
    assert!(a.take_result().is_none(), "aborted dataset is invalid");

    // The buffer was cleared; no commands follow the error response.
    let writes_after_abort = a.transport().writes.len();
    a.check_response("OK: Get(0) = 0");
    assert_eq!(a.transport().writes.len(), writes_after_abort);
}

#[test]
fn test_stop_request_keeps_collected_data() {
    let mut a = analyser();
    a.start_test(&triode_anode_plan()).unwrap();

    // Run the first family, then request a stop; the next response is
    // swallowed and the test halts without an abort.
    let mut sample_no = 0;
    let mut answered = 0;
    loop {
        let pending = a.transport().writes.len();
        if answered >= pending {
            break;
        }
        let cmd = a.transport().writes[answered].clone();
        answered += 1;
        if sample_no == 11 {
            a.stop_test();
        }
        let reply = if cmd == "M2" {
            sample_no += 1;
            mode2_line(500, 80)
        } else {
            "OK: Set".to_string()
        };
        a.check_response(&reply);
    }

    assert!(!a.is_test_running());
    assert_eq!(a.client().aborted, 0, "stop is not an abort");
    assert_eq!(a.client().finished, 0, "stop is not a completion");

    let m = a.take_result().expect("stopped test keeps its data");
    assert_eq!(m.sweeps()[0].len(), 11, "first family was fully collected");
}

#[test]
fn test_heater_telemetry_smoothing() {
    let mut a = analyser();
    a.set_heaters(true, 6.3);
    a.check_response("OK: Set");

    // First tick also reads versions, once per session.
    a.on_heater_tick();
    drive(&mut a, |cmd| match cmd {
        "I0" => "OK: Info(0) = VT-2".to_string(),
        "I1" => "OK: Info(1) = fw 2.4".to_string(),
        "G0" => "OK: Get(0) = 512".to_string(),
        "G1" => "OK: Get(1) = 200".to_string(),
        _ => "OK: Set".to_string(),
    });
    a.on_heater_tick();
    drive(&mut a, |cmd| match cmd {
        "G0" => "OK: Get(0) = 512".to_string(),
        _ => "OK: Get(1) = 200".to_string(),
    });

    let i0_count = a.transport().writes.iter().filter(|w| *w == "I0").count();
    assert_eq!(i0_count, 1, "version is read once per session");
    assert_eq!(a.hardware_version(), "VT-2");
    assert_eq!(a.software_version(), "fw 2.4");

    // ave = ave*0.75 + measured, displayed as ave/4.
    let vh = a.converter().measured_voltage(Electrode::Heater, 512);
    let volts: Vec<f64> = a
        .client()
        .heater
        .iter()
        .filter_map(|(v, _)| *v)
        .collect();
    assert!((volts[0] - vh / 4.0).abs() < 1e-9, "first reading: {}", volts[0]);
    assert!(
        (volts[1] - vh * 1.75 / 4.0).abs() < 1e-9,
        "second reading: {}",
        volts[1]
    );
}

#[test]
fn test_mega_revision_latch() {
    let mut a = analyser();
    assert!(!a.converter().calibration().is_mega);

    a.on_heater_tick();
    drive(&mut a, |cmd| match cmd {
        "I0" => "OK: Info(0) = VT-2 Mega".to_string(),
        _ => "OK: Info(1) = fw 3.0".to_string(),
    });

    assert!(
        a.converter().calibration().is_mega,
        "Info(0) naming Mega hardware flips the calibration"
    );
}

#[test]
fn test_transfer_sweep_runs_toward_start_bias() {
    let mut a = analyser();
    a.start_test(&TestPlan {
        device_type: DeviceType::Triode,
        test_type: TestType::TransferCharacteristics,
        heater_voltage: 6.3,
        anode: AxisRange::new(100.0, 200.0, 100.0),
        grid: AxisRange::new(0.0, 8.0, 0.0),
        screen: AxisRange::default(),
        ia_max: 50.0,
        p_max: 1000.0,
        sweep_points: 4,
    })
    .unwrap();

    drive(&mut a, |cmd| {
        if cmd == "M2" {
            mode2_line(500, 80)
        } else {
            "OK: Set".to_string()
        }
    });
    assert_eq!(a.client().finished, 1);

    // Grid axis is reversed: each family begins at gridStop and finishes
    // on the gridStart bias.
    let hi = a.converter().target_code(Electrode::Grid, 8.0);
    let lo = a.converter().target_code(Electrode::Grid, 0.0);
    let s2: Vec<i32> = a
        .transport()
        .writes
        .iter()
        .filter_map(|w| w.strip_prefix("S2 "))
        .map(|c| c.parse().unwrap())
        .collect();
    assert_eq!(s2.len(), 10, "2 anode steps of 5 grid points");
    for family in s2.chunks(5) {
        assert_eq!(family[0], hi, "family starts at gridStop");
        assert_eq!(family[4], lo, "family ends at gridStart");
    }

    let m = a.take_result().unwrap();
    let nominals: Vec<f64> = m.sweeps().iter().map(|s| s.va_nominal()).collect();
    assert_eq!(nominals, vec![100.0, 200.0], "anode is the stepped axis");
}

#[test]
fn test_command_timeout_aborts() {
    let mut a = analyser();
    a.start_test(&triode_anode_plan()).unwrap();
    assert!(a.command_deadline().is_some());

    a.handle_command_timeout();
    assert_eq!(a.client().aborted, 1);
    assert!(!a.is_test_running());
    assert!(a.command_deadline().is_none());
    assert!(a.take_result().is_none());
}

#[test]
fn test_progress_is_monotonic_to_one_hundred() {
    let mut a = analyser();
    a.start_test(&triode_anode_plan()).unwrap();
    drive(&mut a, |cmd| {
        if cmd == "M2" {
            mode2_line(500, 80)
        } else {
            "OK: Set".to_string()
        }
    });

    let progress = &a.client().progress;
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "monotonic: {progress:?}");
    assert_eq!(*progress.last().unwrap(), 100);
}
