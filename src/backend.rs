//! OPL chip backend interface
//!
//! The driver never touches hardware or an emulator directly. It writes
//! registers and starts a periodic timer through [`OplBackend`]. The backend
//! owns sample generation and calls the timer callback from its own thread.
//!
//! [`RecordingBackend`] is an in-memory implementation that logs every
//! register write and lets the owner fire the timer by hand. It is used by the
//! tests and is handy for offline register dumps.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::opl::registers::OPL_REGISTER_COUNT;
use crate::opl::OplType;
use crate::Result;

/// Periodic callback invoked by the backend timer
pub type TimerCallback = Box<dyn FnMut() + Send>;

/// OPL chip (hardware or emulator) driven by the driver
pub trait OplBackend: Send {
    /// Whether this backend can provide the given chip type
    fn supports(&self, _opl_type: OplType) -> bool {
        true
    }

    /// Prepare the chip for use
    fn init(&mut self) -> Result<()>;

    /// Reset the chip to its power-on state
    fn reset(&mut self);

    /// Write a register; registers 0x100 and above select the second set
    fn write_reg(&mut self, reg: u16, value: u8);

    /// Read a status port
    fn read(&mut self, _port: u16) -> u8 {
        0
    }

    /// Render samples; returns the number of samples written
    fn read_buffer(&mut self, _buffer: &mut [i16]) -> usize {
        0
    }

    /// Whether rendered output is stereo
    fn is_stereo(&self) -> bool;

    /// Start calling `callback` at `frequency` Hz
    fn start(&mut self, callback: TimerCallback, frequency: u32);

    /// Stop the timer callbacks.
    ///
    /// May wait for a running callback to return. A callback that starts
    /// after the driver is closed returns without touching the chip.
    fn stop(&mut self);

    /// Change the timer callback frequency
    fn set_callback_frequency(&mut self, frequency: u32);
}

/// A single register write captured by [`RecordingBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Register address (0x000-0x1FF)
    pub reg: u16,
    /// Written value
    pub value: u8,
}

struct RecorderState {
    writes: Vec<RegisterWrite>,
    registers: [u8; OPL_REGISTER_COUNT],
    callback: Option<TimerCallback>,
    timer_frequency: Option<u32>,
    initialized: bool,
    firing: bool,
}

/// Backend that records register writes instead of producing sound
pub struct RecordingBackend {
    state: Arc<Mutex<RecorderState>>,
    supported: Vec<OplType>,
    fail_init: bool,
}

/// Shared view on a [`RecordingBackend`] after it has been moved into a driver
#[derive(Clone)]
pub struct RecorderHandle {
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingBackend {
    /// Create a backend supporting every chip type, plus a handle to inspect it
    pub fn new() -> (Self, RecorderHandle) {
        let state = Arc::new(Mutex::new(RecorderState {
            writes: Vec::new(),
            registers: [0; OPL_REGISTER_COUNT],
            callback: None,
            timer_frequency: None,
            initialized: false,
            firing: false,
        }));
        let handle = RecorderHandle {
            state: Arc::clone(&state),
        };
        (
            RecordingBackend {
                state,
                supported: vec![OplType::Opl2, OplType::DualOpl2, OplType::Opl3],
                fail_init: false,
            },
            handle,
        )
    }

    /// Restrict the chip types this backend reports as supported
    pub fn with_supported(mut self, supported: &[OplType]) -> Self {
        self.supported = supported.to_vec();
        self
    }

    /// Make `init` fail, simulating a missing device
    pub fn with_failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }
}

impl OplBackend for RecordingBackend {
    fn supports(&self, opl_type: OplType) -> bool {
        self.supported.contains(&opl_type)
    }

    fn init(&mut self) -> Result<()> {
        if self.fail_init {
            return Err(crate::AdlibError::CannotConnect(
                "recording backend configured to fail".into(),
            ));
        }
        self.state.lock().initialized = true;
        Ok(())
    }

    fn reset(&mut self) {
        let mut state = self.state.lock();
        state.registers = [0; OPL_REGISTER_COUNT];
    }

    fn write_reg(&mut self, reg: u16, value: u8) {
        let mut state = self.state.lock();
        state.registers[reg as usize & (OPL_REGISTER_COUNT - 1)] = value;
        state.writes.push(RegisterWrite { reg, value });
    }

    fn is_stereo(&self) -> bool {
        self.supported.contains(&OplType::Opl3)
    }

    fn start(&mut self, callback: TimerCallback, frequency: u32) {
        let mut state = self.state.lock();
        state.callback = Some(callback);
        state.timer_frequency = Some(frequency);
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.callback = None;
        state.timer_frequency = None;
    }

    fn set_callback_frequency(&mut self, frequency: u32) {
        let mut state = self.state.lock();
        if state.timer_frequency.is_some() {
            state.timer_frequency = Some(frequency);
        }
    }
}

impl RecorderHandle {
    /// All register writes so far, oldest first
    pub fn writes(&self) -> Vec<RegisterWrite> {
        self.state.lock().writes.clone()
    }

    /// Writes to one register, oldest first
    pub fn writes_to(&self, reg: u16) -> Vec<u8> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|write| write.reg == reg)
            .map(|write| write.value)
            .collect()
    }

    /// Forget recorded writes; chip register state is kept
    pub fn clear(&self) {
        self.state.lock().writes.clear();
    }

    /// Current chip value of a register
    pub fn register(&self, reg: u16) -> u8 {
        self.state.lock().registers[reg as usize & (OPL_REGISTER_COUNT - 1)]
    }

    /// Whether `init` succeeded
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Timer frequency while the timer runs
    pub fn timer_frequency(&self) -> Option<u32> {
        self.state.lock().timer_frequency
    }

    /// Invoke the timer callback once, as the backend timer thread would.
    ///
    /// Returns false if the timer is not running.
    pub fn fire_timer(&self) -> bool {
        // The callback re-enters the driver, which writes registers through
        // this same state, so it must run without the lock held.
        let callback = {
            let mut state = self.state.lock();
            if state.firing {
                return false;
            }
            let callback = state.callback.take();
            state.firing = callback.is_some();
            callback
        };
        let Some(mut callback) = callback else {
            return false;
        };
        callback();

        let mut state = self.state.lock();
        state.firing = false;
        // A stop() during the callback clears the frequency; drop the callback then
        if state.timer_frequency.is_some() && state.callback.is_none() {
            state.callback = Some(callback);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_records_writes_in_order() {
        let (mut backend, handle) = RecordingBackend::new();
        backend.write_reg(0x20, 0x01);
        backend.write_reg(0x120, 0x02);
        backend.write_reg(0x20, 0x03);

        assert_eq!(handle.writes().len(), 3);
        assert_eq!(handle.writes_to(0x20), vec![0x01, 0x03]);
        assert_eq!(handle.register(0x120), 0x02);

        handle.clear();
        assert!(handle.writes().is_empty());
        assert_eq!(handle.register(0x20), 0x03);
    }

    #[test]
    fn test_fire_timer() {
        let (mut backend, handle) = RecordingBackend::new();
        assert!(!handle.fire_timer(), "timer not started");

        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        backend.start(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            250,
        );
        assert_eq!(handle.timer_frequency(), Some(250));
        assert!(handle.fire_timer());
        assert!(handle.fire_timer());
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        backend.stop();
        assert!(!handle.fire_timer());
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_supported_types() {
        let (backend, _) = RecordingBackend::new();
        let backend = backend.with_supported(&[OplType::Opl2]);
        assert!(backend.supports(OplType::Opl2));
        assert!(!backend.supports(OplType::Opl3));
        assert!(!backend.is_stereo());
    }

    #[test]
    fn test_failing_init() {
        let (backend, handle) = RecordingBackend::new();
        let mut backend = backend.with_failing_init();
        assert!(backend.init().is_err());
        assert!(!handle.is_initialized());
    }
}
