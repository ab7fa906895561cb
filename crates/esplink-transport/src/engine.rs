//! Command dispatch and correlation.
//!
//! All traffic, AT or bootloader, funnels through one engine thread. The
//! thread drains the receive-notification queue and the command queue, keeps
//! at most one command in flight, and resolves each pending command exactly
//! once: with the decoded terminal reply, with a wire-format failure, or
//! with a timeout. Because the engine is the only writer of the UART, the
//! frame buffers, and the mode flag, the rest of the crate needs no locking
//! beyond the channels themselves.

use crossbeam_channel::{bounded, never, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use esplink_protocol::{LoaderCommand, RX_FRAME_CAPACITY};

use crate::error::TransportError;
use crate::mode::{ModeFlag, OperatingMode};
use crate::port::UartPort;
use crate::ring::DmaRing;
use crate::wire::{
    AtTextProtocol, ProtocolFamily, Request, SlipBinaryProtocol, WireEvent, WireProtocol,
};

/// Result of a completed command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutcome {
    /// 32-bit value carried by the reply (register reads, raw byte counts).
    pub value: Option<u32>,
    /// Response lines (AT commands only).
    pub lines: Vec<String>,
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Capacity of the SLIP receive frame buffer.
    pub frame_capacity: usize,
    /// Initial state of the device-present flag.
    pub device_present: bool,
    /// Timeout applied to raw sends submitted through
    /// [`TransportHandle::send`].
    pub send_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame_capacity: RX_FRAME_CAPACITY,
            device_present: true,
            send_timeout: Duration::from_secs(5),
        }
    }
}

type CommandResult = Result<CommandOutcome, TransportError>;

/// How a pending command reports back to its caller.
enum Completion {
    /// Blocking caller parked on a private one-shot channel.
    Channel(Sender<CommandResult>),
    /// Event-style caller; invoked from the engine thread.
    Callback(Box<dyn FnOnce(CommandResult) + Send>),
}

impl Completion {
    fn resolve(self, result: CommandResult) {
        match self {
            Completion::Channel(tx) => {
                let _ = tx.send(result);
            }
            Completion::Callback(callback) => callback(result),
        }
    }
}

/// A command queued for the engine thread.
struct PendingCommand {
    id: u64,
    request: Request,
    deadline: Instant,
    completion: Completion,
}

enum EngineMsg {
    Command(PendingCommand),
    SetMode(OperatingMode, Sender<()>),
    Shutdown,
}

struct SharedState {
    msg_tx: Sender<EngineMsg>,
    mode: ModeFlag,
    device_present: Arc<AtomicBool>,
    next_id: AtomicU64,
    send_timeout: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running transport.
///
/// Cloning is cheap; all clones drive the same engine thread. Dropping the
/// last clone disconnects the command queue, which stops the engine.
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<SharedState>,
}

impl TransportHandle {
    /// Spawn the engine thread over a UART port and its DMA receive ring.
    ///
    /// `notify_rx` is the receiver half of an [`RxNotifier`] channel; the
    /// interrupt/DMA side keeps the sender and pokes it whenever bytes land
    /// in the ring.
    ///
    /// [`RxNotifier`]: crate::ring::RxNotifier
    pub fn spawn(
        port: Box<dyn UartPort>,
        ring: DmaRing,
        notify_rx: Receiver<()>,
        config: TransportConfig,
    ) -> Self {
        let (msg_tx, msg_rx) = unbounded();
        let mode = ModeFlag::new();
        let device_present = Arc::new(AtomicBool::new(config.device_present));
        let shared = Arc::new(SharedState {
            msg_tx,
            mode: mode.clone(),
            device_present: Arc::clone(&device_present),
            next_id: AtomicU64::new(1),
            send_timeout: config.send_timeout,
            thread: Mutex::new(None),
        });

        let context = TransportContext {
            port,
            ring,
            last_pos: 0,
            mode,
            device_present,
            slip: SlipBinaryProtocol::new(config.frame_capacity),
            at: AtTextProtocol::new(),
            inflight: None,
        };

        let thread = thread::Builder::new()
            .name("esplink-engine".to_string())
            .spawn(move || context.run(msg_rx, notify_rx))
            .expect("failed to spawn transport engine thread");
        *shared.thread.lock() = Some(thread);

        Self { shared }
    }

    /// Current operating mode.
    pub fn mode(&self) -> OperatingMode {
        self.shared.mode.get()
    }

    /// Switch the operating mode. Blocks until the engine has applied the
    /// switch (interrupt routing and deframer reset included); commands
    /// queued before this call are transmitted under the old mode.
    pub fn set_mode(&self, mode: OperatingMode) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = bounded(1);
        self.shared
            .msg_tx
            .send(EngineMsg::SetMode(mode, ack_tx))
            .map_err(|_| TransportError::Shutdown)?;
        ack_rx.recv().map_err(|_| TransportError::Shutdown)
    }

    /// Mark the co-processor present or absent. While absent, submissions
    /// and drains fail with [`TransportError::NoDevice`].
    pub fn set_device_present(&self, present: bool) {
        self.shared.device_present.store(present, Ordering::Release);
    }

    /// Submit a request and block until it completes, fails, or times out.
    pub fn submit(&self, request: Request, timeout: Duration) -> CommandResult {
        if !self.shared.device_present.load(Ordering::Acquire) {
            return Err(TransportError::NoDevice);
        }
        let (done_tx, done_rx) = bounded(1);
        self.enqueue(request, timeout, Completion::Channel(done_tx))?;
        done_rx.recv().map_err(|_| TransportError::Shutdown)?
    }

    /// Submit a request and deliver the result to `callback` from the
    /// engine thread. The callback must not block.
    pub fn submit_with_callback(
        &self,
        request: Request,
        timeout: Duration,
        callback: impl FnOnce(CommandResult) + Send + 'static,
    ) -> Result<(), TransportError> {
        if !self.shared.device_present.load(Ordering::Acquire) {
            return Err(TransportError::NoDevice);
        }
        self.enqueue(request, timeout, Completion::Callback(Box::new(callback)))
    }

    /// Submit a bootloader command (blocking).
    pub fn submit_loader(&self, command: LoaderCommand, timeout: Duration) -> CommandResult {
        self.submit(Request::Loader(command), timeout)
    }

    /// Raw transmit entry point used by the AT engine; returns the number
    /// of bytes written. The bytes bypass correlation and are not framed.
    pub fn send(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let outcome = self.submit(Request::Raw(bytes.to_vec()), self.shared.send_timeout)?;
        Ok(outcome.value.unwrap_or(0) as usize)
    }

    /// Stop the engine thread and wait for it to exit. Commands still queued
    /// resolve with [`TransportError::Shutdown`].
    pub fn shutdown(&self) {
        let _ = self.shared.msg_tx.send(EngineMsg::Shutdown);
        if let Some(thread) = self.shared.thread.lock().take() {
            let _ = thread.join();
        }
    }

    fn enqueue(
        &self,
        request: Request,
        timeout: Duration,
        completion: Completion,
    ) -> Result<(), TransportError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = PendingCommand {
            id,
            request,
            deadline: Instant::now() + timeout,
            completion,
        };
        self.shared
            .msg_tx
            .send(EngineMsg::Command(pending))
            .map_err(|_| TransportError::Shutdown)
    }
}

/// A transmitted command awaiting its terminal reply.
struct Inflight {
    id: u64,
    expected_opcode: Option<u8>,
    deadline: Instant,
    completion: Completion,
}

/// Engine-side state: the mode flag, the frame buffers (inside the protocol
/// implementations), and the in-flight command slot. Owned exclusively by
/// the engine thread.
struct TransportContext {
    port: Box<dyn UartPort>,
    ring: DmaRing,
    last_pos: usize,
    mode: ModeFlag,
    device_present: Arc<AtomicBool>,
    slip: SlipBinaryProtocol,
    at: AtTextProtocol,
    inflight: Option<Inflight>,
}

impl TransportContext {
    fn run(mut self, msg_rx: Receiver<EngineMsg>, notify_rx: Receiver<()>) {
        let mut notify_rx = notify_rx;
        let mut live_msg_rx = msg_rx.clone();
        // Messages received while a command is on the wire; replayed in
        // arrival order once the in-flight slot frees up. This keeps the
        // FIFO contract (mode switches apply after earlier commands) while
        // letting shutdown interrupt a waiting command immediately.
        let mut stashed: VecDeque<EngineMsg> = VecDeque::new();
        let mut handles_gone = false;
        loop {
            if let Some(deadline) = self.inflight.as_ref().map(|i| i.deadline) {
                let wait = deadline.saturating_duration_since(Instant::now());
                crossbeam_channel::select! {
                    recv(live_msg_rx) -> msg => match msg {
                        Ok(EngineMsg::Shutdown) => break,
                        Ok(msg) => stashed.push_back(msg),
                        Err(_) => {
                            handles_gone = true;
                            live_msg_rx = never();
                        }
                    },
                    recv(notify_rx) -> res => match res {
                        Ok(()) => self.drain(),
                        Err(_) => {
                            // Notification source is gone; the command can
                            // only time out.
                            notify_rx = never();
                        }
                    },
                    default(wait) => self.timeout_inflight(),
                }
            } else if let Some(msg) = stashed.pop_front() {
                if !self.handle_msg(msg) {
                    break;
                }
            } else if handles_gone {
                break;
            } else {
                crossbeam_channel::select! {
                    recv(live_msg_rx) -> msg => match msg {
                        Ok(msg) => {
                            if !self.handle_msg(msg) {
                                break;
                            }
                        }
                        Err(_) => break, // all handles dropped
                    },
                    recv(notify_rx) -> res => match res {
                        Ok(()) => self.drain(),
                        Err(_) => notify_rx = never(),
                    },
                }
            }
        }
        self.drain_queue_on_shutdown(&msg_rx, stashed);
    }

    /// Returns false when the engine should stop.
    fn handle_msg(&mut self, msg: EngineMsg) -> bool {
        match msg {
            EngineMsg::Command(pending) => {
                self.transmit(pending);
                true
            }
            EngineMsg::SetMode(mode, ack) => {
                self.apply_mode(mode);
                let _ = ack.send(());
                true
            }
            EngineMsg::Shutdown => false,
        }
    }

    fn apply_mode(&mut self, mode: OperatingMode) {
        log::debug!("operating mode -> {:?}", mode);
        self.mode.set(mode);
        // The AT engine needs the idle-line interrupt to spot response
        // boundaries; SLIP frames carry their own delimiters.
        self.port
            .set_idle_interrupt(mode == OperatingMode::Running);
        self.slip.reset();
        self.at.reset();
    }

    fn transmit(&mut self, pending: PendingCommand) {
        let now = Instant::now();
        if now >= pending.deadline {
            // Spent its entire budget waiting in the queue.
            pending.completion.resolve(Err(TransportError::Timeout));
            return;
        }

        // Raw sends complete as soon as the bytes are on the wire.
        if let Request::Raw(bytes) = &pending.request {
            let result = self.write_all(bytes).map(|written| CommandOutcome {
                value: Some(written as u32),
                lines: Vec::new(),
            });
            pending.completion.resolve(result);
            return;
        }

        let family = pending
            .request
            .family()
            .expect("non-raw request has a family");
        let mode = self.mode.get();
        if mode != family.required_mode() {
            pending.completion.resolve(Err(TransportError::WrongMode {
                mode,
                request: pending.request.describe(),
            }));
            return;
        }

        let protocol: &dyn WireProtocol = match family {
            ProtocolFamily::SlipBinary => &self.slip,
            ProtocolFamily::AtText => &self.at,
        };
        let bytes = match protocol.encode_request(&pending.request) {
            Ok(bytes) => bytes,
            Err(err) => {
                pending.completion.resolve(Err(err));
                return;
            }
        };
        if let Err(err) = self.write_all(&bytes) {
            pending.completion.resolve(Err(err));
            return;
        }

        let expected_opcode = match &pending.request {
            Request::Loader(command) => Some(command.opcode()),
            _ => None,
        };
        log::debug!(
            "command {} ({}) transmitted, {} bytes",
            pending.id,
            pending.request.describe(),
            bytes.len()
        );
        self.inflight = Some(Inflight {
            id: pending.id,
            expected_opcode,
            deadline: pending.deadline,
            completion: pending.completion,
        });
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut written = 0;
        while written < bytes.len() {
            written += self.port.write(&bytes[written..])?;
        }
        self.port.flush()?;
        Ok(written)
    }

    /// Feed newly arrived ring bytes to the deframer selected by the current
    /// operating mode.
    fn drain(&mut self) {
        if !self.device_present.load(Ordering::Acquire) {
            log::warn!("rx drain rejected: no device present");
            if let Some(inflight) = self.inflight.take() {
                inflight.completion.resolve(Err(TransportError::NoDevice));
            }
            // Skip the stale bytes so a later reattach starts clean.
            self.last_pos = self.ring.write_index();
            return;
        }

        let mut bytes = Vec::new();
        self.last_pos = self
            .ring
            .read_range(self.last_pos, |chunk| bytes.extend_from_slice(chunk));

        for byte in bytes {
            let event = match self.mode.get() {
                OperatingMode::Flashing => self.slip.feed_byte(byte),
                OperatingMode::Running => self.at.feed_byte(byte),
                OperatingMode::Uninitialized => {
                    log::trace!("dropping rx byte 0x{:02X} (transport uninitialized)", byte);
                    continue;
                }
            };
            match event {
                None => {}
                Some(Ok(event)) => self.complete(event),
                Some(Err(err)) => {
                    // Framing/protocol errors are recovered locally unless a
                    // command is waiting on this very exchange.
                    match self.inflight.take() {
                        Some(inflight) => inflight.completion.resolve(Err(err.into())),
                        None => log::warn!("wire error on idle link: {}", err),
                    }
                }
            }
        }
    }

    fn complete(&mut self, event: WireEvent) {
        let Some(inflight) = self.inflight.take() else {
            log::debug!("discarding terminal event with no command outstanding");
            return;
        };

        let result = match event {
            WireEvent::Loader(response) => {
                if let Some(expected) = inflight.expected_opcode {
                    if response.opcode != expected {
                        log::warn!(
                            "response opcode 0x{:02X} does not match request 0x{:02X}",
                            response.opcode,
                            expected
                        );
                        inflight.completion.resolve(Err(
                            esplink_protocol::ProtocolError::UnexpectedOpcode {
                                expected,
                                actual: response.opcode,
                            }
                            .into(),
                        ));
                        return;
                    }
                }
                response.check().map(|_| CommandOutcome {
                    value: response.value,
                    lines: Vec::new(),
                }).map_err(Into::into)
            }
            WireEvent::AtTerminal { ok, lines } => {
                if ok {
                    Ok(CommandOutcome { value: None, lines })
                } else {
                    Err(TransportError::AtCommandFailed { lines })
                }
            }
        };

        log::debug!("command {} resolved: {:?}", inflight.id, result.is_ok());
        inflight.completion.resolve(result);
    }

    fn timeout_inflight(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            log::warn!("command {} timed out", inflight.id);
            // Anything already in the ring belongs to the dead command.
            // Skip it and drop partial frames so a reply that raced the
            // deadline cannot resolve the next exchange.
            self.last_pos = self.ring.write_index();
            self.slip.reset();
            self.at.reset();
            inflight.completion.resolve(Err(TransportError::Timeout));
        }
    }

    /// Fail everything still queued once shutdown begins.
    fn drain_queue_on_shutdown(mut self, msg_rx: &Receiver<EngineMsg>, stashed: VecDeque<EngineMsg>) {
        if let Some(inflight) = self.inflight.take() {
            inflight.completion.resolve(Err(TransportError::Shutdown));
        }
        let remaining = stashed.into_iter().chain(std::iter::from_fn(|| msg_rx.try_recv().ok()));
        for msg in remaining {
            match msg {
                EngineMsg::Command(pending) => {
                    pending.completion.resolve(Err(TransportError::Shutdown));
                }
                EngineMsg::SetMode(_, ack) => {
                    let _ = ack.send(());
                }
                EngineMsg::Shutdown => {}
            }
        }
    }
}
