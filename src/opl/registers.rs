//! Register shadowing
//!
//! Keeps the last value written to each of the 512 OPL registers so that
//! writes which would not change the chip state can be skipped.

use super::OplType;
use crate::backend::OplBackend;

/// Number of shadowed registers (two register sets of 256)
pub const OPL_REGISTER_COUNT: usize = 0x200;

/// Backend wrapper that suppresses redundant register writes
pub struct RegisterShadow<B> {
    backend: B,
    opl_type: OplType,
    shadow: [u8; OPL_REGISTER_COUNT],
}

impl<B: OplBackend> RegisterShadow<B> {
    /// Wrap a backend; all shadow registers start at zero.
    pub fn new(backend: B, opl_type: OplType) -> Self {
        RegisterShadow {
            backend,
            opl_type,
            shadow: [0; OPL_REGISTER_COUNT],
        }
    }

    /// Write a register through to the backend if it is a timer register,
    /// `force` is set or the value differs from the shadowed one.
    pub fn write(&mut self, reg: u16, value: u8, force: bool) {
        let index = reg as usize & (OPL_REGISTER_COUNT - 1);
        if self.is_timer_register(reg) || force || self.shadow[index] != value {
            log::trace!("OPL write {:03X} = {:02X}", reg, value);
            self.shadow[index] = value;
            self.backend.write_reg(reg, value);
        }
    }

    /// Last value written to a register
    pub fn value(&self, reg: u16) -> u8 {
        self.shadow[reg as usize & (OPL_REGISTER_COUNT - 1)]
    }

    /// Chip type the shadow was created for
    pub fn opl_type(&self) -> OplType {
        self.opl_type
    }

    /// Access the wrapped backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the wrapped backend.
    ///
    /// Register writes made directly through the backend bypass the shadow.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn is_timer_register(&self, reg: u16) -> bool {
        (1..=3).contains(&reg)
            || (self.opl_type == OplType::DualOpl2 && (0x101..=0x103).contains(&reg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn test_duplicate_write_suppressed() {
        let (backend, handle) = RecordingBackend::new();
        let mut shadow = RegisterShadow::new(backend, OplType::Opl2);

        shadow.write(0xA0, 0x42, false);
        shadow.write(0xA0, 0x42, false);

        assert_eq!(handle.writes().len(), 1, "second identical write should be elided");
        assert_eq!(shadow.value(0xA0), 0x42);
    }

    #[test]
    fn test_forced_write_passes_through() {
        let (backend, handle) = RecordingBackend::new();
        let mut shadow = RegisterShadow::new(backend, OplType::Opl2);

        // Shadow starts at zero, so an unforced zero write is skipped
        shadow.write(0x40, 0, false);
        assert!(handle.writes().is_empty());

        shadow.write(0x40, 0, true);
        assert_eq!(handle.writes().len(), 1);
    }

    #[test]
    fn test_timer_registers_always_written() {
        let (backend, handle) = RecordingBackend::new();
        let mut shadow = RegisterShadow::new(backend, OplType::DualOpl2);

        for _ in 0..2 {
            shadow.write(0x02, 0, false);
            shadow.write(0x102, 0, false);
        }
        assert_eq!(handle.writes().len(), 4);
    }

    #[test]
    fn test_second_set_timer_not_special_on_opl3() {
        let (backend, handle) = RecordingBackend::new();
        let mut shadow = RegisterShadow::new(backend, OplType::Opl3);

        shadow.write(0x102, 0, false);
        assert!(handle.writes().is_empty());
    }
}
