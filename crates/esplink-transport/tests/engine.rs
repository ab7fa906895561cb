//! Engine-thread behavior against a scriptable mock UART.
//!
//! The port under these tests never answers on its own; each test injects
//! receive bytes straight into the DMA ring when (and only when) the
//! scenario calls for them. That makes the timing-sensitive paths (command
//! timeouts, late frames, mode gating) deterministic.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use esplink_protocol::{slip, LoaderCommand, LoaderResponse, CMD_READ_REG, CMD_SYNC};
use esplink_transport::{
    DmaProducer, DmaRing, OperatingMode, Request, RxNotifier, TransportConfig, TransportError,
    TransportHandle, UartPort,
};

/// Observable side of the mock port, shared with the test body.
#[derive(Clone, Default)]
struct PortState {
    written: Arc<Mutex<Vec<u8>>>,
    idle_interrupt: Arc<Mutex<bool>>,
}

impl PortState {
    fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }
}

/// A UART that records writes and never produces receive traffic.
struct SilentPort {
    state: PortState,
}

impl UartPort for SilentPort {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.state.written.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn set_idle_interrupt(&mut self, enabled: bool) {
        *self.state.idle_interrupt.lock() = enabled;
    }
}

struct Harness {
    transport: TransportHandle,
    port: PortState,
    producer: DmaProducer,
    notifier: RxNotifier,
}

impl Harness {
    fn new() -> Self {
        let ring = DmaRing::new(1024);
        let (notifier, notify_rx) = RxNotifier::channel();
        let port = PortState::default();
        let transport = TransportHandle::spawn(
            Box::new(SilentPort { state: port.clone() }),
            ring.clone(),
            notify_rx,
            TransportConfig::default(),
        );
        Self {
            transport,
            port,
            producer: ring.producer(),
            notifier,
        }
    }

    /// Inject a framed bootloader response as if the peer had sent it.
    fn inject(&self, response: LoaderResponse) {
        self.producer.write(&slip::encode(&response.encode()));
        self.notifier.notify();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}

#[test]
fn test_raw_send_bypasses_mode_gate() {
    let harness = Harness::new();
    // No set_mode: raw sends are legal even before initialization.
    assert_eq!(harness.transport.mode(), OperatingMode::Uninitialized);
    let written = harness.transport.send(b"+++").unwrap();
    assert_eq!(written, 3);
    assert_eq!(harness.port.written(), b"+++");
}

#[test]
fn test_mode_gate_rejects_mismatched_family() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Running).unwrap();

    let err = harness
        .transport
        .submit_loader(LoaderCommand::Sync, Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::WrongMode {
            mode: OperatingMode::Running,
            request: "bootloader",
        }
    ));
    // The rejected command never touched the wire.
    assert!(harness.port.written().is_empty());

    harness.transport.set_mode(OperatingMode::Flashing).unwrap();
    let err = harness
        .transport
        .submit(
            Request::At(b"AT".to_vec()),
            Duration::from_millis(100),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::WrongMode {
            mode: OperatingMode::Flashing,
            request: "AT",
        }
    ));
}

#[test]
fn test_set_mode_routes_idle_interrupt() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Running).unwrap();
    assert!(*harness.port.idle_interrupt.lock());
    harness.transport.set_mode(OperatingMode::Flashing).unwrap();
    assert!(!*harness.port.idle_interrupt.lock());
}

#[test]
fn test_command_times_out_on_silent_port() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Flashing).unwrap();

    let err = harness
        .transport
        .submit_loader(LoaderCommand::Sync, Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
    // The request itself was transmitted before the deadline hit.
    assert!(!harness.port.written().is_empty());
}

#[test]
fn test_late_frame_is_discarded() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Flashing).unwrap();

    // The SYNC times out; its reply arrives afterwards and must not be
    // matched to anything.
    let err = harness
        .transport
        .submit_loader(LoaderCommand::Sync, Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
    harness.inject(LoaderResponse::ok(CMD_SYNC));
    thread::sleep(Duration::from_millis(50));

    // The next command gets its own reply, not the stale SYNC frame.
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    harness
        .transport
        .submit_with_callback(
            Request::Loader(LoaderCommand::ReadReg { addr: 0x1000 }),
            Duration::from_millis(500),
            move |result| {
                let _ = done_tx.send(result);
            },
        )
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    harness.inject(LoaderResponse::ok(CMD_READ_REG).with_value(7));

    let outcome = done_rx
        .recv_timeout(Duration::from_millis(500))
        .unwrap()
        .unwrap();
    assert_eq!(outcome.value, Some(7));
}

#[test]
fn test_stale_ring_bytes_skipped_after_timeout() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Flashing).unwrap();

    // A register read whose reply lands in the ring while the command is
    // still pending, but whose wake-up never fires: the command times out
    // with its reply sitting undrained.
    let (first_tx, first_rx) = crossbeam_channel::bounded(1);
    harness
        .transport
        .submit_with_callback(
            Request::Loader(LoaderCommand::ReadReg { addr: 0x1000 }),
            Duration::from_millis(100),
            move |result| {
                let _ = first_tx.send(result);
            },
        )
        .unwrap();
    thread::sleep(Duration::from_millis(30));
    harness.producer.write(&slip::encode(
        &LoaderResponse::ok(CMD_READ_REG).with_value(0xAAAA_AAAA).encode(),
    ));
    let err = first_rx
        .recv_timeout(Duration::from_millis(500))
        .unwrap()
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);

    // The next read must get its own reply, not the dead command's stale
    // register value still in the ring.
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    harness
        .transport
        .submit_with_callback(
            Request::Loader(LoaderCommand::ReadReg { addr: 0x2000 }),
            Duration::from_millis(500),
            move |result| {
                let _ = done_tx.send(result);
            },
        )
        .unwrap();
    thread::sleep(Duration::from_millis(30));
    harness.notifier.notify();
    thread::sleep(Duration::from_millis(30));
    harness.inject(LoaderResponse::ok(CMD_READ_REG).with_value(0x5555_5555));

    let outcome = done_rx
        .recv_timeout(Duration::from_millis(500))
        .unwrap()
        .unwrap();
    assert_eq!(outcome.value, Some(0x5555_5555));
}

#[test]
fn test_mismatched_opcode_fails_command() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Flashing).unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    harness
        .transport
        .submit_with_callback(
            Request::Loader(LoaderCommand::ReadReg { addr: 0x1000 }),
            Duration::from_millis(500),
            move |result| {
                let _ = done_tx.send(result);
            },
        )
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    harness.inject(LoaderResponse::ok(CMD_SYNC));

    let err = done_rx
        .recv_timeout(Duration::from_millis(500))
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Protocol(esplink_protocol::ProtocolError::UnexpectedOpcode {
            expected: CMD_READ_REG,
            actual: CMD_SYNC,
        })
    ));
}

#[test]
fn test_no_device_rejects_submission() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Flashing).unwrap();
    harness.transport.set_device_present(false);

    let err = harness
        .transport
        .submit_loader(LoaderCommand::Sync, Duration::from_millis(100))
        .unwrap_err();
    assert_eq!(err, TransportError::NoDevice);
    assert!(harness.port.written().is_empty());

    harness.transport.set_device_present(true);
    let err = harness
        .transport
        .submit_loader(LoaderCommand::Sync, Duration::from_millis(50))
        .unwrap_err();
    // Back in business: the command transmits and times out normally.
    assert_eq!(err, TransportError::Timeout);
}

#[test]
fn test_shutdown_resolves_pending_commands() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Flashing).unwrap();

    let transport = harness.transport.clone();
    let waiter = thread::spawn(move || {
        transport.submit_loader(LoaderCommand::Sync, Duration::from_secs(30))
    });
    thread::sleep(Duration::from_millis(50));
    harness.transport.shutdown();

    let result = waiter.join().unwrap();
    assert_eq!(result.unwrap_err(), TransportError::Shutdown);
}

#[test]
fn test_at_terminal_lines_delivered() {
    let harness = Harness::new();
    harness.transport.set_mode(OperatingMode::Running).unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    harness
        .transport
        .submit_with_callback(
            Request::At(b"AT+GMR".to_vec()),
            Duration::from_millis(500),
            move |result| {
                let _ = done_tx.send(result);
            },
        )
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    harness.producer.write(b"AT version:1.7.0\r\n\r\nOK\r\n");
    harness.notifier.notify();

    let outcome = done_rx
        .recv_timeout(Duration::from_millis(500))
        .unwrap()
        .unwrap();
    assert_eq!(outcome.lines, vec!["AT version:1.7.0".to_string()]);
}
