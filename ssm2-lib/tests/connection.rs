//! Tests for the connection state machine over an in-memory transport

mod common;

use common::*;
use ssm2_lib::device::{ConnectionState, InitResponse, Ssm2Connection};
use std::thread;
use std::io::ErrorKind;
use std::sync::mpsc;
use std::time::{Duration, Instant};

fn open(transport: MockTransport) -> Ssm2Connection<MockTransport> {
    init_logging();
    let mut connection = Ssm2Connection::new();
    connection.attach(transport).expect("attach");
    assert_eq!(connection.state(), ConnectionState::Open);
    connection
}

#[test]
fn test_init_engine_sends_request_and_parses_response() {
    let transport = MockTransport::new(&init_response_frame());
    let mut connection = open(transport.clone());

    let init = connection.init_engine().unwrap();
    assert_eq!(transport.written(), vec![0x80, 0x10, 0xf0, 0x01, 0xbf, 0x40]);
    assert_eq!(init.ssm_id_hex(), "a21011");
    assert_eq!(init.rom_id_hex(), "3a54504007");
    assert_eq!(init.capabilities, vec![0xF3, 0xFA, 0xC9, 0x8E, 0x00]);
    assert_eq!(connection.state(), ConnectionState::Initialized);
    assert_eq!(connection.init_response(), Some(&init));
}

#[test]
fn test_init_engine_skips_echo() {
    let transport = MockTransport::new(&init_response_frame()).with_echo();
    let mut connection = open(transport);
    let init = connection.init_engine().unwrap();
    assert_eq!(init.rom_id_hex(), "3a54504007");
}

#[test]
fn test_init_engine_rejects_short_payload() {
    let frame = Packet::new(
        DeviceAddress::DiagnosticTool,
        DeviceAddress::Engine,
        Command::InitResponse,
        &[0xA2, 0x10, 0x11, 0x3A],
    );
    let mut connection = open(MockTransport::new(frame.as_bytes()));
    assert!(matches!(
        connection.init_engine(),
        Err(Ssm2Error::InsufficientData { expected: 8, actual: 4 })
    ));
    assert_eq!(connection.state(), ConnectionState::Open);
}

#[test]
fn test_init_engine_rejects_wrong_command() {
    let mut connection = open(MockTransport::new(&read_response_frame(&[0x00; 8])));
    assert!(matches!(
        connection.init_engine(),
        Err(Ssm2Error::UnexpectedCommand {
            expected: 0xFF,
            actual: 0xE8
        })
    ));
}

#[test]
fn test_init_engine_propagates_framing_errors() {
    let mut connection = open(MockTransport::new(&[0x00, 0x80]));
    assert!(matches!(
        connection.init_engine(),
        Err(Ssm2Error::HeaderMismatch { actual: 0x00, .. })
    ));

    let mut connection = open(MockTransport::new(&[]));
    assert!(matches!(connection.init_engine(), Err(Ssm2Error::Io(_))));
}

#[test]
fn test_init_response_with_no_capabilities() {
    let init = InitResponse::from_payload(&INIT_RESPONSE_PAYLOAD[..8]).unwrap();
    assert!(init.capabilities.is_empty());
}

#[test]
fn test_continuous_read_and_streaming() {
    let transport = MockTransport::new(&init_response_frame()).with_echo();
    let mut connection = open(transport.clone());
    connection.init_engine().unwrap();

    transport.push(&read_response_frame(&[0x2E, 0xE0, 0x64]));
    transport.push(&read_response_frame(&[0x2F, 0x00, 0x65]));

    let addresses = [
        MemoryAddress::new([0x00, 0x00, 0x0E]),
        MemoryAddress::new([0x00, 0x00, 0x0F]),
        MemoryAddress::new([0x00, 0x00, 0x08]),
    ];
    connection.activate_continuous_read(&addresses).unwrap();
    assert_eq!(connection.state(), ConnectionState::Streaming);

    let expected_request = Packet::read_address_request(DeviceAddress::Engine, DeviceAddress::DiagnosticTool, &addresses, true);
    let written = transport.written();
    assert_eq!(&written[6..], expected_request.as_bytes());

    let first = connection.next_packet().unwrap();
    assert_eq!(first.payload().as_ref(), &[0x2E, 0xE0, 0x64]);
    let second = connection.next_packet().unwrap();
    assert_eq!(second.payload().as_ref(), &[0x2F, 0x00, 0x65]);
    assert!(matches!(connection.next_packet(), Err(Ssm2Error::Io(_))));
}

#[test]
fn test_operations_require_state() {
    let mut connection: Ssm2Connection<MockTransport> = Ssm2Connection::new();
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(matches!(
        connection.init_engine(),
        Err(Ssm2Error::InvalidState {
            expected: ConnectionState::Open,
            actual: ConnectionState::Closed
        })
    ));

    let mut connection = open(MockTransport::new(&init_response_frame()));
    assert!(matches!(
        connection.next_packet(),
        Err(Ssm2Error::InvalidState {
            expected: ConnectionState::Streaming,
            ..
        })
    ));
    assert!(matches!(
        connection.activate_continuous_read(&[MemoryAddress::new([0, 0, 8])]),
        Err(Ssm2Error::InvalidState { .. })
    ));
    assert!(matches!(
        connection.attach(MockTransport::default()),
        Err(Ssm2Error::InvalidState { .. })
    ));
}

#[test]
fn test_activation_rejects_empty_and_oversized_requests() {
    let mut connection = open(MockTransport::new(&init_response_frame()));
    connection.init_engine().unwrap();

    assert!(matches!(
        connection.activate_continuous_read(&[]),
        Err(Ssm2Error::InvalidPacket(_))
    ));
    let too_many = vec![MemoryAddress::new([0, 0, 8]); 85];
    assert!(matches!(
        connection.activate_continuous_read(&too_many),
        Err(Ssm2Error::InvalidPacket(_))
    ));
    assert_eq!(connection.state(), ConnectionState::Initialized);

    let max = vec![MemoryAddress::new([0, 0, 8]); 84];
    connection.activate_continuous_read(&max).unwrap();
}

#[test]
fn test_close_is_idempotent() {
    let mut connection = open(MockTransport::new(&init_response_frame()));
    connection.init_engine().unwrap();
    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(matches!(
        connection.attach(MockTransport::default()),
        Err(Ssm2Error::TransportClosed)
    ));
}

#[test]
fn test_close_handle_interrupts_blocked_read() {
    let transport = MockTransport::new(&init_response_frame()).timing_out();
    let mut connection = open(transport);
    connection.init_engine().unwrap();
    connection
        .activate_continuous_read(&[MemoryAddress::new([0, 0, 8])])
        .unwrap();

    let handle = connection.close_handle();
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.close();
    });

    assert!(matches!(connection.next_packet(), Err(Ssm2Error::TransportClosed)));
    closer.join().unwrap();

    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[test]
fn test_transmission_destination() {
    let transport = MockTransport::default();
    let mut connection = Ssm2Connection::with_devices(DeviceAddress::DiagnosticTool, DeviceAddress::Transmission);
    transport.push(
        Packet::new(
            DeviceAddress::DiagnosticTool,
            DeviceAddress::Transmission,
            Command::InitResponse,
            INIT_RESPONSE_PAYLOAD,
        )
        .as_bytes(),
    );
    connection.attach(transport.clone()).unwrap();
    connection.init_engine().unwrap();
    assert_eq!(transport.written()[1], 0x18);
}

#[test]
fn test_init_engine_gives_up_on_silent_ecu() {
    init_logging();
    let mut connection = Ssm2Connection::new().with_response_timeout(Duration::from_millis(100));
    connection.attach(MockTransport::default().timing_out()).unwrap();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let started = Instant::now();
        let result = connection.init_engine();
        let _ = tx.send((result.map(|_| ()), connection.state(), started.elapsed()));
    });

    let (result, state, elapsed) = rx
        .recv_timeout(Duration::from_secs(3))
        .expect("handshake against a silent ECU should fail, not block");
    match result {
        Err(Ssm2Error::Io(e)) => assert_eq!(e.kind(), ErrorKind::TimedOut),
        other => panic!("Expected timed-out I/O error, got {:?}", other),
    }
    assert_eq!(state, ConnectionState::Open);
    assert!(elapsed >= Duration::from_millis(100));
}

#[test]
fn test_init_engine_waits_for_slow_ecu_within_timeout() {
    let transport = MockTransport::default().timing_out();
    let mut connection = Ssm2Connection::new().with_response_timeout(Duration::from_secs(2));
    connection.attach(transport.clone()).unwrap();

    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        transport.push(&init_response_frame());
    });
    let init = connection.init_engine().unwrap();
    feeder.join().unwrap();
    assert_eq!(init.rom_id_hex(), "3a54504007");
}
