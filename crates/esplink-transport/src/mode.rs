//! Transport operating mode.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Selects which wire protocol owns the UART.
///
/// Exactly one mode is active per transport. Transitions are explicit and
/// caller-initiated; the transport never infers a mode from traffic content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperatingMode {
    /// No transport configured yet; drained bytes are discarded.
    Uninitialized = 0,
    /// AT engine active. The UART idle-line interrupt is enabled so the AT
    /// engine can detect end-of-response gaps.
    Running = 1,
    /// ROM bootloader session active. The idle-line interrupt is disabled;
    /// the SLIP protocol has explicit frame delimiters and does not rely on
    /// idle timing.
    Flashing = 2,
}

impl OperatingMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => OperatingMode::Running,
            2 => OperatingMode::Flashing,
            _ => OperatingMode::Uninitialized,
        }
    }
}

/// Shared read view of the operating mode.
///
/// The engine thread is the only writer; every other context reads.
#[derive(Debug, Clone, Default)]
pub struct ModeFlag(Arc<AtomicU8>);

impl ModeFlag {
    /// Create a flag starting in [`OperatingMode::Uninitialized`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode.
    pub fn get(&self) -> OperatingMode {
        OperatingMode::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, mode: OperatingMode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_flag_round_trip() {
        let flag = ModeFlag::new();
        assert_eq!(flag.get(), OperatingMode::Uninitialized);
        flag.set(OperatingMode::Running);
        assert_eq!(flag.get(), OperatingMode::Running);
        flag.set(OperatingMode::Flashing);
        assert_eq!(flag.get(), OperatingMode::Flashing);
    }
}
