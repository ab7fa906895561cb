//! The simulated device: UART port, strap pins, and personality switch.

use parking_lot::Mutex;
use std::sync::Arc;

use esplink_protocol::{slip, LoaderResponse};
use esplink_transport::{DmaProducer, ResetControl, RxNotifier, TransportError, UartPort};

use crate::at::AtPeer;
use crate::rom::{PeerScript, RomBootloaderPeer};

/// Personality the peer booted into at the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootMode {
    AtFirmware,
    RomBootloader,
}

struct DeviceState {
    boot_mode: BootMode,
    rom: RomBootloaderPeer,
    at: AtPeer,
    producer: DmaProducer,
    notifier: RxNotifier,
    idle_interrupt: bool,
}

impl DeviceState {
    fn emit(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        // Same hand-off as the hardware: bytes land in the DMA ring, then
        // the interrupt pokes the engine.
        self.producer.write(bytes);
        self.notifier.notify();
    }
}

/// A simulated co-processor wired to a transport's DMA ring.
///
/// Hand [`uart_port`](SimDevice::uart_port) and
/// [`reset_control`](SimDevice::reset_control) to the code under test; keep
/// the device itself for scripting and inspection.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimDevice {
    /// Create a device writing its output through `producer` and signalling
    /// via `notifier`. Boots into the AT firmware.
    pub fn new(producer: DmaProducer, notifier: RxNotifier) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                boot_mode: BootMode::AtFirmware,
                rom: RomBootloaderPeer::default(),
                at: AtPeer::default(),
                producer,
                notifier,
                idle_interrupt: false,
            })),
        }
    }

    /// The UART port for the transport side.
    pub fn uart_port(&self) -> Box<dyn UartPort> {
        Box::new(SimUartPort {
            state: Arc::clone(&self.state),
        })
    }

    /// The reset/boot-strap control for the flasher side.
    pub fn reset_control(&self) -> Box<dyn ResetControl> {
        Box::new(SimResetControl {
            state: Arc::clone(&self.state),
        })
    }

    /// Replace the bootloader behavior script.
    pub fn set_script(&self, script: PeerScript) {
        self.state.lock().rom.set_script(script);
    }

    /// Run a closure against the bootloader peer (scripting, inspection).
    pub fn with_rom<R>(&self, f: impl FnOnce(&mut RomBootloaderPeer) -> R) -> R {
        f(&mut self.state.lock().rom)
    }

    /// Run a closure against the AT peer.
    pub fn with_at<R>(&self, f: impl FnOnce(&mut AtPeer) -> R) -> R {
        f(&mut self.state.lock().at)
    }

    /// Whether the transport currently has the idle-line interrupt enabled.
    pub fn idle_interrupt_enabled(&self) -> bool {
        self.state.lock().idle_interrupt
    }

    /// Whether the device is sitting in its ROM bootloader.
    pub fn in_bootloader(&self) -> bool {
        self.state.lock().boot_mode == BootMode::RomBootloader
    }

    /// Inject raw bytes into the receive path, bypassing the peer models
    /// (line noise, late frames).
    pub fn inject_raw(&self, bytes: &[u8]) {
        self.state.lock().emit(bytes);
    }

    /// Inject a SLIP-framed bootloader response, bypassing the peer models.
    pub fn inject_response(&self, response: LoaderResponse) {
        self.inject_raw(&slip::encode(&response.encode()));
    }
}

struct SimUartPort {
    state: Arc<Mutex<DeviceState>>,
}

impl UartPort for SimUartPort {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        let reply = match state.boot_mode {
            BootMode::RomBootloader => state.rom.feed(bytes),
            BootMode::AtFirmware => state.at.feed(bytes),
        };
        state.emit(&reply);
        Ok(bytes.len())
    }

    fn set_idle_interrupt(&mut self, enabled: bool) {
        self.state.lock().idle_interrupt = enabled;
    }
}

struct SimResetControl {
    state: Arc<Mutex<DeviceState>>,
}

impl ResetControl for SimResetControl {
    fn enter_bootloader(&mut self) {
        let mut state = self.state.lock();
        log::debug!("sim: reset with boot-select asserted -> ROM bootloader");
        state.boot_mode = BootMode::RomBootloader;
        state.rom.reset_session();
        state.at.reset_session();
    }

    fn reboot(&mut self) {
        let mut state = self.state.lock();
        log::debug!("sim: reset with boot-select released -> AT firmware");
        state.boot_mode = BootMode::AtFirmware;
        state.rom.reset_session();
        state.at.reset_session();
    }
}
