//! Integration tests for sample capture and the console front end.
//!
//! # Purpose
//!
//! These tests check the two ends of a capture: the bytes the session sends
//! to start and stop streaming, and the capture file that comes out.  They
//! also run short console scripts end to end, the way an operator would.

use std::io::Write;

use edb_core::protocol::{Channel, Descriptor};
use edb_core::{encode_message, read_capture, Calibration, CaptureWriter};
use edb_monitor::application::session::Session;
use edb_monitor::application::stream::StopReason;
use edb_monitor::cli::console::{Console, ConsoleOut, SharedBuffer};
use edb_monitor::infrastructure::transport::mock::{MockConnector, MockDevice};

fn msg(descriptor: Descriptor, payload: &[u8]) -> Vec<u8> {
    encode_message(descriptor, payload).unwrap()
}

fn samples(pairs: &[(u32, Descriptor, u16)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (cycles, channel, raw) in pairs {
        bytes.extend(msg(Descriptor::Time, &cycles.to_le_bytes()));
        bytes.extend(msg(*channel, &raw.to_le_bytes()));
    }
    bytes
}

fn console(device: &MockDevice) -> (Console<MockConnector>, SharedBuffer) {
    let buffer = SharedBuffer::new();
    let session = Session::new(MockConnector::new(device.clone()), Calibration::default());
    let console = Console::new(session, ConsoleOut::new(buffer.clone()), None);
    device.cancel_when_idle(console.cancel_token());
    (console, buffer)
}

// ── Capture file ──────────────────────────────────────────────────────────────

/// Two channels streamed into the binary capture format read back with
/// elapsed time measured from the first TIME sample.
#[test]
fn test_two_channel_capture_reads_back() {
    // Arrange
    let device = MockDevice::new();
    let mut session = Session::new(MockConnector::new(device.clone()), Calibration::default());
    session.attach().unwrap();
    device.cancel_when_idle(session.cancel_token());
    device.push_chunk(&msg(Descriptor::Ack, &[]));
    device.push_split(
        &samples(&[
            (500, Descriptor::Vcap, 100),
            (800, Descriptor::Vboost, 200),
            (1100, Descriptor::Vcap, 300),
        ]),
        5,
    );
    device.push_idle();
    device.push_chunk(&msg(Descriptor::Ack, &[]));
    let mut sink = CaptureWriter::new(Vec::new());

    // Act
    let report = session
        .stream(&[Channel::Vcap, Channel::Vboost], None, &mut sink)
        .unwrap();
    let records = read_capture(&sink.into_inner()).unwrap();

    // Assert
    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.records, 3);
    assert_eq!(
        records
            .iter()
            .map(|r| (r.elapsed_cycles, r.channel, r.sample_value))
            .collect::<Vec<_>>(),
        vec![
            (0, Channel::Vcap, 100),
            (300, Channel::Vboost, 200),
            (600, Channel::Vcap, 300),
        ]
    );
    assert_eq!(device.written(), vec![vec![0x16, 0x03], vec![0x17, 0x03]]);
}

// ── Console scripts ───────────────────────────────────────────────────────────

/// `stream -` prints one `seconds,channel,volts` line per record and stops
/// once the requested device time has passed.
#[test]
fn test_console_stream_to_terminal_stops_after_duration() {
    // Arrange: 1 ms is 3000 cycles at 3 MHz
    let device = MockDevice::new();
    let (mut console, buffer) = console(&device);
    device.push_chunk(&msg(Descriptor::Ack, &[]));
    device.push_chunk(&samples(&[
        (0, Descriptor::Vcap, 2048),
        (3000, Descriptor::Vcap, 1024),
    ]));
    device.push_chunk(&msg(Descriptor::Ack, &[]));

    // Act
    console.execute_line("attach; stream - 0.001 VCAP");

    // Assert
    assert_eq!(buffer.contents(), "0.000000,VCAP,1.5000\n");
    assert_eq!(device.written().last(), Some(&vec![0x17, 0x01]));
}

/// A script file drives a whole session: halt, inspect, resume, capture to
/// a file, quit.
#[test]
fn test_console_script_session() {
    // Arrange
    let device = MockDevice::new();
    let (mut console, buffer) = console(&device);
    let capture = std::env::temp_dir().join(format!("edb_it_{}_capture.bin", std::process::id()));
    device.push_chunk(&msg(Descriptor::Ack, &[]));
    device.push_chunk(&msg(Descriptor::VcapSaved, &2048u16.to_le_bytes()));
    device.push_chunk(&msg(Descriptor::Pc, &0x4402u32.to_le_bytes()));
    device.push_chunk(&msg(Descriptor::VcapRestored, &2048u16.to_le_bytes()));
    device.push_chunk(&msg(Descriptor::Ack, &[]));
    device.push_chunk(&samples(&[(10, Descriptor::Vinj, 7), (20, Descriptor::Vinj, 8)]));
    device.push_idle();
    device.push_chunk(&msg(Descriptor::Ack, &[]));

    let mut script = Vec::new();
    writeln!(script, "# bring-up").unwrap();
    writeln!(script, "attach; power on").unwrap();
    writeln!(script, "int; pc").unwrap();
    writeln!(script, "cont").unwrap();
    writeln!(script, "stream {} - VINJ", capture.display()).unwrap();
    writeln!(script, "quit").unwrap();
    writeln!(script, "echo never reached").unwrap();

    // Act
    console.run(script.as_slice(), false).unwrap();

    // Assert
    let out = buffer.contents();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "Vcap_saved = 1.5000");
    assert_eq!(lines[1], "0x00004402");
    assert_eq!(lines[2], "Vcap_restored = 1.5000");
    assert!(lines[3].starts_with("2 records"), "got {:?}", lines[3]);
    assert!(!out.contains("never reached"));

    let records = read_capture(&std::fs::read(&capture).unwrap()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].elapsed_cycles, 10);
    assert_eq!(device.close_count(), 1);

    std::fs::remove_file(&capture).ok();
}
