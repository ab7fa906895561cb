//! Transport behavior over the simulated device.
//!
//! These tests cover what the mock-port unit tests cannot: a peer that
//! actually answers, personality switches across resets, and many caller
//! threads hammering the single-command engine at once.

use std::thread;
use std::time::Duration;

use esplink_protocol::{LoaderCommand, LoaderResponse, CMD_READ_REG, CMD_SYNC};
use esplink_sim::{PeerScript, SimDevice};
use esplink_transport::{
    DmaRing, OperatingMode, Request, RxNotifier, TransportConfig, TransportError, TransportHandle,
};

fn harness() -> (TransportHandle, SimDevice) {
    let ring = DmaRing::new(4096);
    let (notifier, notify_rx) = RxNotifier::channel();
    let device = SimDevice::new(ring.producer(), notifier);
    let transport = TransportHandle::spawn(
        device.uart_port(),
        ring,
        notify_rx,
        TransportConfig::default(),
    );
    (transport, device)
}

#[test]
fn test_concurrent_submissions_are_serialized() {
    let (transport, device) = harness();
    device.reset_control().enter_bootloader();
    transport.set_mode(OperatingMode::Flashing).unwrap();

    // Each thread reads its own register; the register file maps the
    // address to a derived value so cross-matched responses would show up
    // as wrong values.
    let mut script = PeerScript::default();
    for i in 0..8u32 {
        script.registers.insert(0x4000_0000 + i * 4, !i);
    }
    device.set_script(script);

    let workers: Vec<_> = (0..8u32)
        .map(|i| {
            let transport = transport.clone();
            thread::spawn(move || {
                let addr = 0x4000_0000 + i * 4;
                let outcome = transport
                    .submit_loader(
                        LoaderCommand::ReadReg { addr },
                        Duration::from_secs(5),
                    )
                    .unwrap();
                assert_eq!(outcome.value, Some(!i));
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // One request per thread reached the peer, each one intact.
    device.with_rom(|rom| {
        assert_eq!(rom.opcodes_seen().len(), 8);
        assert!(rom.opcodes_seen().iter().all(|&op| op == CMD_READ_REG));
    });

    transport.shutdown();
}

#[test]
fn test_mode_switch_reroutes_traffic() {
    let (transport, device) = harness();
    transport.set_mode(OperatingMode::Running).unwrap();

    // Running mode: text goes to the AT firmware.
    let outcome = transport
        .submit(Request::At(b"AT+GMR".to_vec()), Duration::from_secs(1))
        .unwrap();
    assert_eq!(outcome.lines, vec!["AT+GMR".to_string()]);
    device.with_at(|at| assert_eq!(at.commands_seen(), ["AT+GMR"]));

    // Into the bootloader: binary goes to the ROM.
    device.reset_control().enter_bootloader();
    transport.set_mode(OperatingMode::Flashing).unwrap();
    transport
        .submit_loader(LoaderCommand::Sync, Duration::from_secs(1))
        .unwrap();
    device.with_rom(|rom| assert_eq!(rom.syncs_seen(), 1));

    // And back again.
    device.reset_control().reboot();
    transport.set_mode(OperatingMode::Running).unwrap();
    let outcome = transport
        .submit(Request::At(b"AT+CIPSTATUS".to_vec()), Duration::from_secs(1))
        .unwrap();
    assert_eq!(outcome.lines, vec!["AT+CIPSTATUS".to_string()]);

    transport.shutdown();
}

#[test]
fn test_at_error_line_fails_command() {
    let (transport, device) = harness();
    transport.set_mode(OperatingMode::Running).unwrap();

    let err = transport
        .submit(Request::At(b"NONSENSE".to_vec()), Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(err, TransportError::AtCommandFailed { .. }));
    device.with_at(|at| assert_eq!(at.commands_seen(), ["NONSENSE"]));

    transport.shutdown();
}

#[test]
fn test_timed_out_reply_does_not_poison_next_command() {
    let (transport, device) = harness();
    device.reset_control().enter_bootloader();
    transport.set_mode(OperatingMode::Flashing).unwrap();

    // The peer sits on every SYNC, so the command times out...
    device.set_script(PeerScript {
        ignore_syncs: u32::MAX,
        ..PeerScript::default()
    });
    let err = transport
        .submit_loader(LoaderCommand::Sync, Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);

    // ...and its reply shows up late, after the caller has moved on.
    device.inject_response(LoaderResponse::ok(CMD_SYNC));
    thread::sleep(Duration::from_millis(50));

    // The next exchange is clean: the stale SYNC frame was discarded
    // rather than matched against the register read.
    let mut script = PeerScript::default();
    script.registers.insert(0x1000, 0x55AA_55AA);
    device.set_script(script);
    let outcome = transport
        .submit_loader(
            LoaderCommand::ReadReg { addr: 0x1000 },
            Duration::from_secs(1),
        )
        .unwrap();
    assert_eq!(outcome.value, Some(0x55AA_55AA));

    transport.shutdown();
}

#[test]
fn test_reset_into_bootloader_switches_personality() {
    let (transport, device) = harness();
    assert!(!device.in_bootloader());
    device.reset_control().enter_bootloader();
    assert!(device.in_bootloader());
    device.reset_control().reboot();
    assert!(!device.in_bootloader());
    transport.shutdown();
}
