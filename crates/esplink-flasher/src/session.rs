//! The flashing session: sync, write, finish.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use esplink_protocol::{block_count, LoaderCommand, ProtocolError, FLASH_BLOCK_SIZE};
use esplink_transport::{
    CommandOutcome, OperatingMode, Request, ResetControl, TransportError, TransportHandle,
};

use crate::error::FlashError;
use crate::image::{FirmwareImage, FirmwarePart};

/// Register holding the chip revision word, readable from the ROM loader.
/// Used only to log what we are talking to.
pub const CHIP_ID_REG: u32 = 0x3FF0_005C;

/// Tunables of a flashing session.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// SYNC attempts before the session gives up.
    pub sync_retries: u32,
    /// Retransmissions allowed per FLASH_DATA block, on top of the first
    /// attempt.
    pub block_retries: u32,
    /// Timeout for every command except SYNC. Flash erase inside
    /// FLASH_BEGIN can be slow, so this is deliberately generous.
    pub command_timeout: Duration,
    /// Per-attempt SYNC timeout. Short: the ROM answers quickly once it is
    /// listening, and attempts are cheap.
    pub sync_timeout: Duration,
    /// Read the chip revision register after sync and log it.
    pub identify: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            sync_retries: 6,
            block_retries: 3,
            command_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_millis(100),
            identify: true,
        }
    }
}

/// Progress notifications emitted while an image is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    /// The bootloader answered SYNC.
    SessionStarted {
        /// SYNC attempts that were needed.
        sync_attempts: u32,
    },
    /// A part's write session opened.
    PartBegin {
        /// Index in the image table.
        part_index: usize,
        /// Destination flash address.
        address: u32,
        /// Part size in bytes.
        size: u32,
    },
    /// One block was acknowledged.
    BlockWritten {
        /// Index in the image table.
        part_index: usize,
        /// Zero-based block sequence number.
        sequence: u32,
        /// Bytes of this part written so far.
        offset: u32,
    },
    /// A part's write session closed.
    PartEnd {
        /// Index in the image table.
        part_index: usize,
    },
    /// The whole image is written.
    Finished(FlashSummary),
    /// The session aborted; earlier parts stay written.
    Failed {
        /// Index of the part that failed.
        part_index: usize,
        /// Bytes of that part written before the failure.
        offset: u32,
    },
}

/// What a completed flashing pass wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashSummary {
    /// Parts written.
    pub parts_written: usize,
    /// Total payload bytes written across all parts.
    pub bytes_written: u64,
    /// Bytes written into the final part.
    pub final_offset: u32,
}

/// A flashing session over a running transport.
///
/// The session owns the mode switches: [`start`](FlashSession::start) puts
/// the transport into flashing mode and resets the device into its ROM
/// loader; [`finish`](FlashSession::finish) reboots it back into the normal
/// firmware and restores running mode. Between the two, the image is written
/// part by part with [`flash_image`](FlashSession::flash_image).
pub struct FlashSession {
    transport: TransportHandle,
    reset: Box<dyn ResetControl>,
    config: FlashConfig,
}

impl FlashSession {
    /// Create a session with default tunables.
    pub fn new(transport: TransportHandle, reset: Box<dyn ResetControl>) -> Self {
        Self::with_config(transport, reset, FlashConfig::default())
    }

    /// Create a session with explicit tunables.
    pub fn with_config(
        transport: TransportHandle,
        reset: Box<dyn ResetControl>,
        config: FlashConfig,
    ) -> Self {
        Self {
            transport,
            reset,
            config,
        }
    }

    /// Enter the bootloader: switch the transport to flashing mode, reset
    /// the device with the boot strap asserted, and SYNC until it answers.
    ///
    /// Returns the number of SYNC attempts that were needed.
    pub fn start(&mut self) -> Result<u32, FlashError> {
        self.transport.set_mode(OperatingMode::Flashing)?;
        self.reset.enter_bootloader();

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .transport
                .submit_loader(LoaderCommand::Sync, self.config.sync_timeout)
            {
                Ok(_) => break,
                Err(err) if retryable(&err) && attempts < self.config.sync_retries => {
                    log::debug!("sync attempt {} failed: {}", attempts, err);
                }
                Err(err) => {
                    return Err(FlashError::SyncFailed {
                        attempts,
                        source: err,
                    })
                }
            }
        }
        log::info!("bootloader synced after {} attempt(s)", attempts);

        if self.config.identify {
            // Advisory only: an unreadable chip id must not abort the
            // session.
            match self.read_register(CHIP_ID_REG) {
                Ok(id) => log::info!("chip id register: 0x{:08X}", id),
                Err(err) => log::warn!("chip id read failed: {}", err),
            }
        }
        Ok(attempts)
    }

    /// Read a 32-bit register through the ROM loader.
    pub fn read_register(&self, addr: u32) -> Result<u32, FlashError> {
        let outcome = self
            .transport
            .submit_loader(LoaderCommand::ReadReg { addr }, self.config.command_timeout)?;
        let value = outcome
            .value
            .ok_or(TransportError::Protocol(ProtocolError::MissingValue))?;
        Ok(value)
    }

    /// Read a register without blocking; `callback` runs on the transport's
    /// engine thread and must not block.
    pub fn read_register_with_callback(
        &self,
        addr: u32,
        callback: impl FnOnce(Result<u32, TransportError>) + Send + 'static,
    ) -> Result<(), FlashError> {
        self.transport.submit_with_callback(
            Request::Loader(LoaderCommand::ReadReg { addr }),
            self.config.command_timeout,
            move |result| {
                callback(result.and_then(|outcome: CommandOutcome| {
                    outcome
                        .value
                        .ok_or(TransportError::Protocol(ProtocolError::MissingValue))
                }))
            },
        )?;
        Ok(())
    }

    /// Write a 32-bit register through the ROM loader.
    pub fn write_register(&self, addr: u32, value: u32) -> Result<(), FlashError> {
        self.transport.submit_loader(
            LoaderCommand::WriteReg {
                addr,
                value,
                mask: u32::MAX,
                delay_us: 0,
            },
            self.config.command_timeout,
        )?;
        Ok(())
    }

    /// Write every part of `image`, in table order.
    pub fn flash_image(&mut self, image: &FirmwareImage) -> Result<FlashSummary, FlashError> {
        self.flash_image_with_events(image, |_| {})
    }

    /// Write every part of `image`, reporting progress through `on_event`.
    ///
    /// The first unrecoverable failure aborts the remaining parts; blocks
    /// already acknowledged stay written.
    pub fn flash_image_with_events(
        &mut self,
        image: &FirmwareImage,
        mut on_event: impl FnMut(FlashEvent),
    ) -> Result<FlashSummary, FlashError> {
        image.validate()?;

        let mut summary = FlashSummary::default();
        for (part_index, part) in image.parts().iter().enumerate() {
            match self.flash_part(part_index, part, &mut on_event) {
                Ok(()) => {
                    summary.parts_written += 1;
                    summary.bytes_written += u64::from(part.size());
                    summary.final_offset = part.size();
                }
                Err(err) => {
                    if let FlashError::Part { offset, .. } = err {
                        on_event(FlashEvent::Failed { part_index, offset });
                    }
                    return Err(err);
                }
            }
        }
        on_event(FlashEvent::Finished(summary));
        Ok(summary)
    }

    /// Leave the bootloader: reset into the normal firmware and put the
    /// transport back into running mode.
    pub fn finish(&mut self) -> Result<(), FlashError> {
        self.reset.reboot();
        self.transport.set_mode(OperatingMode::Running)?;
        Ok(())
    }

    /// Run a complete session (start, flash, finish) on a dedicated thread,
    /// reporting progress and the final result through `on_event`.
    pub fn run_in_background(
        mut self,
        image: FirmwareImage,
        mut on_event: impl FnMut(FlashEvent) + Send + 'static,
    ) -> JoinHandle<Result<FlashSummary, FlashError>> {
        thread::Builder::new()
            .name("esplink-flash".to_string())
            .spawn(move || {
                let sync_attempts = self.start()?;
                on_event(FlashEvent::SessionStarted { sync_attempts });
                let summary = self.flash_image_with_events(&image, &mut on_event)?;
                self.finish()?;
                Ok(summary)
            })
            .expect("failed to spawn flashing thread")
    }

    fn flash_part(
        &mut self,
        part_index: usize,
        part: &FirmwarePart,
        on_event: &mut impl FnMut(FlashEvent),
    ) -> Result<(), FlashError> {
        let total = part.size();
        log::info!(
            "part {}: {} bytes ({} blocks) at 0x{:08X}",
            part_index,
            total,
            block_count(total),
            part.address
        );

        self.part_command(
            part_index,
            0,
            LoaderCommand::FlashBegin {
                total_size: total,
                offset: part.address,
            },
        )?;
        on_event(FlashEvent::PartBegin {
            part_index,
            address: part.address,
            size: total,
        });

        let mut offset: u32 = 0;
        for (sequence, chunk) in part.data.chunks(FLASH_BLOCK_SIZE).enumerate() {
            let sequence = sequence as u32;
            // The ROM expects full blocks; the tail is zero-padded and the
            // true size was declared in FLASH_BEGIN.
            let mut block = chunk.to_vec();
            block.resize(FLASH_BLOCK_SIZE, 0);
            self.write_block(part_index, offset, sequence, block)?;
            offset += chunk.len() as u32;
            on_event(FlashEvent::BlockWritten {
                part_index,
                sequence,
                offset,
            });
        }

        self.part_command(part_index, offset, LoaderCommand::FlashEnd { reboot: false })?;
        on_event(FlashEvent::PartEnd { part_index });
        Ok(())
    }

    /// One FLASH_DATA block with the per-block retry budget. Retries cover
    /// timeouts and wire corruption; a status failure from the ROM is
    /// retried too, since the original transport re-sends on NACK.
    fn write_block(
        &mut self,
        part_index: usize,
        offset: u32,
        sequence: u32,
        block: Vec<u8>,
    ) -> Result<(), FlashError> {
        let attempts = self.config.block_retries + 1;
        for attempt in 1..=attempts {
            let command = LoaderCommand::FlashData {
                sequence,
                block: block.clone(),
            };
            match self
                .transport
                .submit_loader(command, self.config.command_timeout)
            {
                Ok(_) => return Ok(()),
                Err(err) if retryable(&err) && attempt < attempts => {
                    log::warn!(
                        "part {} block {} attempt {}/{} failed: {}",
                        part_index,
                        sequence,
                        attempt,
                        attempts,
                        err
                    );
                }
                Err(err) => {
                    return Err(FlashError::Part {
                        part_index,
                        offset,
                        source: err,
                    })
                }
            }
        }
        unreachable!("retry loop returns on its final attempt")
    }

    /// A non-retried command within a part, mapped to a part-scoped error.
    fn part_command(
        &mut self,
        part_index: usize,
        offset: u32,
        command: LoaderCommand,
    ) -> Result<(), FlashError> {
        self.transport
            .submit_loader(command, self.config.command_timeout)
            .map_err(|err| FlashError::Part {
                part_index,
                offset,
                source: err,
            })?;
        Ok(())
    }
}

/// Whether a command failure is worth a retransmission. Mode and shutdown
/// errors are terminal; timeouts, wire corruption, and ROM status failures
/// are transient.
fn retryable(err: &TransportError) -> bool {
    matches!(
        err,
        TransportError::Timeout | TransportError::Protocol(_)
    )
}
