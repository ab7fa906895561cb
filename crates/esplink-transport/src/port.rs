//! Hardware seams.
//!
//! The transport talks to the board through two narrow traits so that unit
//! tests and the simulator can stand in for the real peripherals.

use crate::error::TransportError;

/// The transmit half of the UART plus its interrupt configuration.
///
/// The engine thread is the exclusive owner of writes; implementations do
/// not need internal locking for the write path.
pub trait UartPort: Send {
    /// Write bytes to the transmitter, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Block until previously written bytes have left the transmitter.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Enable or disable the idle-line interrupt used by the AT engine to
    /// detect end-of-response gaps.
    fn set_idle_interrupt(&mut self, enabled: bool);
}

/// Reset and boot-strap control for the co-processor.
///
/// Asserting the boot-select pin across a reset pulse forces the peer into
/// its ROM bootloader instead of the normal AT firmware.
pub trait ResetControl: Send {
    /// Reset the co-processor into its ROM bootloader.
    fn enter_bootloader(&mut self);

    /// Reset the co-processor into its normal firmware.
    fn reboot(&mut self);
}
