//! End-to-end protocol exchanges over a scripted transport: handshake,
//! peripheral hot-plug and the register access API.

use motion_remote::input::ButtonFlags;
use motion_remote::output::Addressing;
use motion_remote::prelude::*;
use motion_remote::transport::ScriptedTransport;

fn init_logging() {
    _ = env_logger::builder().is_test(true).try_init();
}

/// Builds a read-data reply carrying `data` reported at `address`.
fn memory_reply(address: u16, data: &[u8]) -> Vec<u8> {
    assert!(!data.is_empty() && data.len() <= 16);
    let mut report = vec![0u8; 22];
    report[0] = 0x21;
    report[3] = ((data.len() as u8) - 1) << 4;
    report[4..6].copy_from_slice(&address.to_be_bytes());
    report[6..6 + data.len()].copy_from_slice(data);
    report
}

/// Builds a read-data reply flagging an error for the pending read.
fn memory_error(address: u16, error: u8) -> Vec<u8> {
    let mut report = memory_reply(address, &[0u8; 16]);
    report[3] |= error & 0x0F;
    report
}

fn acknowledge(report_id: u8, error: u8) -> Vec<u8> {
    vec![0x22, 0, 0, report_id, error]
}

fn status(flags: u8, battery: u8) -> Vec<u8> {
    vec![0x20, 0, 0, flags, 0, 0, battery]
}

const FACTORY_CALIBRATION: [u8; 8] = [0x80, 0x80, 0x80, 0x00, 0xA0, 0xA0, 0xA0, 0x00];
const STATUS_EXPANSION: u8 = 0x02;

/// Queues the three handshake replies: calibration block and the two
/// expansion-disable acknowledgments.
fn push_handshake_replies(transport: &ScriptedTransport) {
    transport.push_report(&memory_reply(0x0016, &FACTORY_CALIBRATION));
    transport.push_report(&acknowledge(0x16, 0));
    transport.push_report(&acknowledge(0x16, 0));
}

/// Opens a session and drives it to the connect event.
fn connected_remote() -> (Remote<ScriptedTransport>, ScriptedTransport) {
    init_logging();
    let transport = ScriptedTransport::new("remote-under-test");
    push_handshake_replies(&transport);
    let mut remote = Remote::new(transport.clone()).expect("session open failed");

    assert_eq!(remote.poll(), Event::None); // calibration consumed
    assert_eq!(remote.poll(), Event::None); // first disable acknowledged
    assert_eq!(remote.poll(), Event::Connect);
    assert!(remote.is_connected());

    transport.clear_written();
    (remote, transport)
}

/// Walks the session through the expansion handshake for the given
/// identification block, returning the resulting event.
fn hotplug(
    remote: &mut Remote<ScriptedTransport>,
    transport: &ScriptedTransport,
    identification: &[u8; 6],
) -> Event {
    transport.push_report(&status(STATUS_EXPANSION, 0xC8));
    assert_eq!(remote.poll(), Event::Status);

    transport.push_report(&acknowledge(0x16, 0)); // init 0x55
    assert_eq!(remote.poll(), Event::None);
    transport.push_report(&acknowledge(0x16, 0)); // init 0x00
    assert_eq!(remote.poll(), Event::None);

    transport.push_report(&memory_reply(0x00FA, identification));
    remote.poll()
}

#[test]
fn test_handshake_reaches_connect_and_reads_calibration() {
    let (remote, transport) = connected_remote();

    let calibration = remote.accel_calibration();
    assert_eq!(calibration.x_zero, 0x80);
    assert_eq!(calibration.z_gravity, 0xA0);

    // No stray traffic after the handshake settled.
    assert!(transport.written().is_empty());
}

#[test]
fn test_handshake_write_sequence() {
    init_logging();
    let transport = ScriptedTransport::new("remote-under-test");
    push_handshake_replies(&transport);
    let mut remote = Remote::new(transport.clone()).expect("session open failed");
    let connected = (0..8).any(|_| remote.poll() == Event::Connect);
    assert!(connected);

    let written = transport.written();
    // Report mode reset, calibration read, the 0x55/0x00 disable pair and
    // the final status request.
    assert_eq!(written[0][0], 0x12);
    assert_eq!(written[1][0], 0x17);
    assert_eq!(written[1][2..5], [0x00, 0x00, 0x16]);
    assert_eq!(written[2][0], 0x16);
    assert_eq!(written[2][2..5], [0xA4, 0x00, 0xF0]);
    assert_eq!(written[2][6], 0x55);
    assert_eq!(written[3][0], 0x16);
    assert_eq!(written[3][2..5], [0xA4, 0x00, 0xFB]);
    assert_eq!(written[3][6], 0x00);
    assert_eq!(written[4][0], 0x15);
    assert_eq!(written.len(), 5);
}

#[test]
fn test_handshake_is_idempotent_once_complete() {
    let (mut remote, transport) = connected_remote();

    remote.start().expect("re-entry failed");
    assert_eq!(remote.poll(), Event::None);
    assert!(transport.written().is_empty());
}

#[test]
fn test_handshake_proceeds_without_calibration() {
    init_logging();
    let transport = ScriptedTransport::new("remote-under-test");
    transport.push_report(&memory_error(0x0016, 8));
    transport.push_report(&acknowledge(0x16, 0));
    transport.push_report(&acknowledge(0x16, 0));
    let mut remote = Remote::new(transport.clone()).expect("session open failed");

    assert_eq!(remote.poll(), Event::None);
    assert_eq!(remote.poll(), Event::None);
    assert_eq!(remote.poll(), Event::Connect);

    assert!(!remote.accel_calibration().is_populated());
    assert!(matches!(
        remote.last_error(),
        Some(RemoteError::CalibrationUnavailable)
    ));
    // Zeroed calibration yields nominal, zero-valued gravity.
    assert_eq!(remote.gravity_force(), GravityForce::default());
}

#[test]
fn test_nunchuk_hotplug_and_decode() {
    let (mut remote, transport) = connected_remote();

    let event = hotplug(&mut remote, &transport, &[0x00, 0x00, 0xA4, 0x20, 0x00, 0x00]);
    assert_eq!(event, Event::None); // identification done, calibration pending

    let mut calibration = [0u8; 16];
    calibration[..8].copy_from_slice(&FACTORY_CALIBRATION);
    calibration[8..14].copy_from_slice(&[0xE0, 0x20, 0x80, 0xE0, 0x20, 0x80]);
    transport.push_report(&memory_reply(0x0020, &calibration));
    assert_eq!(remote.poll(), Event::NunchukInserted);
    assert_eq!(remote.expansion().kind(), Some(ExpansionKind::Nunchuk));

    // Buttons-plus-expansion mode was selected after activation.
    assert!(transport
        .written()
        .iter()
        .any(|report| report[0] == 0x12 && report[2] == 0x34));

    // Expansion data arrives in mode 0x34 at offset 2: stick up, both
    // buttons pressed.
    let mut report = vec![0x34, 0, 0];
    report.extend_from_slice(&[0x80, 0xE0, 0x80, 0x80, 0xB0, 0b0000_0000]);
    report.resize(22, 0);
    transport.push_report(&report);
    assert_eq!(remote.poll(), Event::Update);

    let Expansion::Nunchuk(nunchuk) = remote.expansion() else {
        panic!("nunchuk not active");
    };
    assert_eq!(nunchuk.pressed(), NunchukButtons::Z | NunchukButtons::C);
    assert_eq!(nunchuk.joystick.angle, 0.0);
    assert!((nunchuk.joystick.magnitude - 1.0).abs() < 1e-4);
}

#[test]
fn test_expansion_removal_resets_state() {
    let (mut remote, transport) = connected_remote();

    let event = hotplug(&mut remote, &transport, &[0x00, 0x00, 0xA4, 0x20, 0x01, 0x01]);
    assert_eq!(event, Event::None);
    let mut calibration = [0x80u8; 16];
    calibration[0] = 0xFC;
    transport.push_report(&memory_reply(0x0020, &calibration));
    assert_eq!(remote.poll(), Event::ClassicInserted);

    // The removal event fires before any further report is decoded.
    transport.push_report(&status(0x00, 0xC8));
    assert_eq!(remote.poll(), Event::ClassicRemoved);
    assert_eq!(remote.expansion().kind(), None);
}

#[test]
fn test_unknown_identity_leaves_port_disabled() {
    let (mut remote, transport) = connected_remote();

    let event = hotplug(&mut remote, &transport, &[0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(event, Event::None);
    assert_eq!(remote.expansion().kind(), None);
    assert!(remote.expansion_failed());
    assert!(matches!(
        remote.last_error(),
        Some(RemoteError::UnknownExpansionIdentity(0xDEAD_BEEF))
    ));

    // Still attached: no retry is scheduled while the failure is latched.
    transport.clear_written();
    transport.push_report(&status(STATUS_EXPANSION, 0xC8));
    assert_eq!(remote.poll(), Event::Status);
    assert!(transport
        .written()
        .iter()
        .all(|report| report[0] != 0x16 && report[0] != 0x17));

    // A removal edge clears the latch, the next insertion identifies again.
    transport.push_report(&status(0x00, 0xC8));
    assert_eq!(remote.poll(), Event::Status);
    assert!(!remote.expansion_failed());
    transport.clear_written();
    transport.push_report(&status(STATUS_EXPANSION, 0xC8));
    assert_eq!(remote.poll(), Event::Status);
    assert!(transport.written().iter().any(|report| report[0] == 0x16));
}

#[test]
fn test_motion_sensor_activation() {
    let (mut remote, transport) = connected_remote();

    remote.set_motion_sensor(true).expect("activation failed");
    let written = transport.written();
    assert_eq!(written[0][0], 0x16);
    assert_eq!(written[0][2..5], [0xA6, 0x00, 0xFE]);
    assert_eq!(written[0][6], 0x04);

    transport.push_report(&acknowledge(0x16, 0));
    assert_eq!(remote.poll(), Event::None);
    transport.clear_written();

    transport.push_report(&memory_reply(0x00FA, &[0x00, 0x00, 0xA4, 0x20, 0x04, 0x05]));
    assert_eq!(remote.poll(), Event::MotionSensorActivated);
    assert_eq!(remote.expansion().kind(), Some(ExpansionKind::MotionSensor));

    // The plain motion sensor needs no further identification read.
    assert!(transport
        .written()
        .iter()
        .all(|report| report[0] != 0x17));
}

#[test]
fn test_motion_sensor_gyro_frames_flow_through() {
    let (mut remote, transport) = connected_remote();

    remote.set_motion_sensor(true).expect("activation failed");
    transport.push_report(&acknowledge(0x16, 0));
    remote.poll();
    transport.push_report(&memory_reply(0x00FA, &[0x00, 0x00, 0xA4, 0x20, 0x04, 0x05]));
    assert_eq!(remote.poll(), Event::MotionSensorActivated);

    // Resting frame: 0x1F7F on every axis, all slow bits set, latches the
    // zero-rate calibration.
    let mut report = vec![0x34, 0, 0];
    report.extend_from_slice(&[0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x7E]);
    report.resize(22, 0);
    transport.push_report(&report);
    assert_eq!(remote.poll(), Event::Update);

    let Expansion::MotionSensor(sensor) = remote.expansion() else {
        panic!("motion sensor not active");
    };
    assert_eq!(
        sensor.calibration,
        GyroSample {
            yaw: 0x1F7F,
            roll: 0x1F7F,
            pitch: 0x1F7F
        }
    );
    assert_eq!(sensor.angular_rate, Default::default());
}

#[test]
fn test_interleaved_requests_complete_independently() {
    let (mut remote, transport) = connected_remote();

    let read_handle = remote
        .read_data(Addressing::registers(0xA4_00FA, 6))
        .expect("read failed");
    let write_handle = remote
        .write_data(Addressing::registers(0xA4_00F0, 7), &[1, 2, 3, 4, 5, 6, 7])
        .expect("write failed");

    // The write acknowledgment arrives while the read is still pending;
    // each request fires its own completion with its own payload.
    transport.push_report(&acknowledge(0x16, 0));
    assert_eq!(
        remote.poll(),
        Event::WriteCompleted {
            handle: write_handle
        }
    );

    transport.push_report(&memory_reply(0x00FA, &[9, 8, 7, 6, 5, 4]));
    assert_eq!(
        remote.poll(),
        Event::ReadCompleted {
            handle: read_handle,
            data: vec![9, 8, 7, 6, 5, 4],
        }
    );
}

#[test]
fn test_chunked_user_read() {
    let (mut remote, transport) = connected_remote();

    let handle = remote
        .read_data(Addressing::eeprom(0x0020, 32))
        .expect("read failed");

    transport.push_report(&memory_reply(0x0020, &[0xAA; 16]));
    assert_eq!(remote.poll(), Event::None);
    transport.push_report(&memory_reply(0x0030, &[0xBB; 16]));

    let mut expected = vec![0xAA; 16];
    expected.extend_from_slice(&[0xBB; 16]);
    assert_eq!(
        remote.poll(),
        Event::ReadCompleted {
            handle,
            data: expected
        }
    );
}

#[test]
fn test_transport_failure_surfaces_once() {
    let (mut remote, transport) = connected_remote();

    let pending = remote.read_data(Addressing::eeprom(0x0016, 8));
    assert!(pending.is_ok());

    transport.close();
    assert_eq!(remote.poll(), Event::UnexpectedDisconnect);
    assert!(!remote.is_connected());

    // Inert afterwards: no events, no panics, queued continuations dropped.
    assert_eq!(remote.poll(), Event::None);
    assert!(remote.read_data(Addressing::eeprom(0x0016, 8)).is_err());
}

#[test]
fn test_explicit_disconnect_reports_once() {
    let (mut remote, _transport) = connected_remote();

    remote.disconnect();
    assert_eq!(remote.poll(), Event::Disconnect);
    assert_eq!(remote.poll(), Event::None);
    assert!(!remote.is_connected());
}

#[test]
fn test_data_report_updates_buttons_and_motion() {
    let (mut remote, transport) = connected_remote();

    remote.set_accelerometer(true).expect("mode change failed");

    // Mode 0x31: buttons plus accelerometer, A pressed, one gravity on Z.
    let report = vec![0x31, 0b0000_1000, 0b0000_1000, 0x80, 0x80, 0xA0];
    transport.push_report(&report);
    assert_eq!(remote.poll(), Event::Update);

    assert!(remote.buttons().is_just_pressed(ButtonFlags::UP | ButtonFlags::A));
    assert_eq!(remote.gravity_force().z, 1.0);
    assert_eq!(remote.orientation().roll, 0.0);
}
