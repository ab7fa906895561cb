//! Command-line demonstrator for the co-processor flashing stack.
//!
//! Wires a real transport engine to the simulated peer and drives it the way
//! the firmware would: AT traffic in running mode, bootloader sessions for
//! flashing. Useful for watching a full session with logging turned up:
//!
//! ```text
//! esplink -v flash firmware.bin --offset 0x80000
//! esplink read-reg 0x3FF0005C
//! esplink at AT+GMR
//! ```

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};

use esplink_flasher::{
    FirmwareImage, FirmwarePart, FlashConfig, FlashError, FlashEvent, FlashSession, CHIP_ID_REG,
};
use esplink_sim::{PeerScript, SimDevice};
use esplink_transport::{
    DmaRing, OperatingMode, Request, RxNotifier, TransportConfig, TransportError, TransportHandle,
};

/// Flashing and diagnostics for the ESP co-processor link, run against the
/// simulated peer.
#[derive(Parser, Debug)]
#[command(name = "esplink", version)]
struct Cli {
    /// Increase log verbosity (repeatable).
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// SYNC attempts the simulated peer ignores while "settling" after
    /// reset.
    #[arg(long, global = true, default_value_t = 1)]
    settle_syncs: u32,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a full bootloader session and flash an image file.
    Flash {
        /// Raw image to write.
        image: PathBuf,
        /// Destination offset in flash.
        #[arg(long, value_parser = parse_u32, default_value = "0x80000")]
        offset: u32,
        /// SYNC attempts before giving up.
        #[arg(long, default_value_t = 6)]
        sync_retries: u32,
        /// Retransmissions allowed per data block.
        #[arg(long, default_value_t = 3)]
        block_retries: u32,
    },
    /// Read a 32-bit register through the ROM loader.
    ReadReg {
        #[arg(value_parser = parse_u32)]
        addr: u32,
    },
    /// Write a 32-bit register through the ROM loader.
    WriteReg {
        #[arg(value_parser = parse_u32)]
        addr: u32,
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Send one AT command to the normal firmware and print its reply.
    At {
        /// Command line, e.g. `AT+GMR`.
        command: String,
    },
}

#[derive(Error, Debug)]
enum RunnerError {
    #[error("cannot read image: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RunnerError> {
    // The full production plumbing, with the simulator standing in for the
    // co-processor on the far end of the ring.
    let ring = DmaRing::new(4096);
    let (notifier, notify_rx) = RxNotifier::channel();
    let device = SimDevice::new(ring.producer(), notifier);
    let mut script = PeerScript {
        ignore_syncs: cli.settle_syncs,
        ..PeerScript::default()
    };
    script.registers.insert(CHIP_ID_REG, 0x0006_2000);
    device.set_script(script);

    let transport = TransportHandle::spawn(
        device.uart_port(),
        ring,
        notify_rx,
        TransportConfig::default(),
    );

    let result = dispatch(&cli.cmd, &transport, &device);
    transport.shutdown();
    result
}

fn dispatch(
    cmd: &Cmd,
    transport: &TransportHandle,
    device: &SimDevice,
) -> Result<(), RunnerError> {
    match cmd {
        Cmd::Flash {
            image,
            offset,
            sync_retries,
            block_retries,
        } => {
            let data = fs::read(image)?;
            info!("image: {} bytes -> flash offset 0x{:08X}", data.len(), offset);
            let image = FirmwareImage::new(vec![FirmwarePart {
                address: *offset,
                data,
            }]);

            let config = FlashConfig {
                sync_retries: *sync_retries,
                block_retries: *block_retries,
                ..FlashConfig::default()
            };
            let mut session =
                FlashSession::with_config(transport.clone(), device.reset_control(), config);

            let attempts = session.start()?;
            info!("bootloader up after {attempts} sync attempt(s)");
            let summary = session.flash_image_with_events(&image, |event| match event {
                FlashEvent::BlockWritten {
                    sequence, offset, ..
                } => info!("block {sequence} acked, {offset} bytes written"),
                FlashEvent::PartBegin { address, size, .. } => {
                    info!("writing {size} bytes at 0x{address:08X}")
                }
                _ => {}
            })?;
            session.finish()?;
            info!(
                "done: {} part(s), {} bytes, final offset {}",
                summary.parts_written, summary.bytes_written, summary.final_offset
            );
            Ok(())
        }
        Cmd::ReadReg { addr } => {
            let mut session = FlashSession::new(transport.clone(), device.reset_control());
            session.start()?;
            let value = session.read_register(*addr)?;
            println!("0x{addr:08X} = 0x{value:08X}");
            session.finish()?;
            Ok(())
        }
        Cmd::WriteReg { addr, value } => {
            let mut session = FlashSession::new(transport.clone(), device.reset_control());
            session.start()?;
            session.write_register(*addr, *value)?;
            info!("wrote 0x{value:08X} to 0x{addr:08X}");
            session.finish()?;
            Ok(())
        }
        Cmd::At { command } => {
            transport.set_mode(OperatingMode::Running)?;
            let outcome = transport.submit(
                Request::At(command.clone().into_bytes()),
                Duration::from_secs(5),
            )?;
            for line in &outcome.lines {
                println!("{line}");
            }
            println!("OK");
            Ok(())
        }
    }
}
