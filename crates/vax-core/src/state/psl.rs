//! Processor Status Longword model and access-mode primitives.

/// `PSL` bit for carry/borrow.
pub const PSL_C: u32 = 1 << 0;
/// `PSL` bit for signed overflow.
pub const PSL_V: u32 = 1 << 1;
/// `PSL` bit for zero result.
pub const PSL_Z: u32 = 1 << 2;
/// `PSL` bit for negative result.
pub const PSL_N: u32 = 1 << 3;
/// Mask of the four condition-code bits.
pub const PSL_CC_MASK: u32 = PSL_N | PSL_Z | PSL_V | PSL_C;
/// `PSL` bit for trace enable.
pub const PSL_T: u32 = 1 << 4;
/// `PSL` bit for integer-overflow trap enable.
pub const PSL_IV: u32 = 1 << 5;
/// `PSL` bit for floating-underflow trap enable.
pub const PSL_FU: u32 = 1 << 6;
/// `PSL` bit for decimal-overflow trap enable.
pub const PSL_DV: u32 = 1 << 7;
/// `PSL` bit for the interrupt-stack flag.
pub const PSL_IS: u32 = 1 << 26;
/// `PSL` bit for the first-part-done flag.
pub const PSL_FPD: u32 = 1 << 27;
/// `PSL` bit for trace pending.
pub const PSL_TP: u32 = 1 << 30;
/// `PSL` bit for compatibility mode.
pub const PSL_CM: u32 = 1 << 31;
/// Shift of the 5-bit interrupt priority level field.
pub const PSL_IPL_SHIFT: u32 = 16;
/// Mask of the interrupt priority level field in place.
pub const PSL_IPL_MASK: u32 = 0x1F << PSL_IPL_SHIFT;
/// Shift of the 2-bit previous-mode field.
pub const PSL_PRVMOD_SHIFT: u32 = 22;
/// Shift of the 2-bit current-mode field.
pub const PSL_CURMOD_SHIFT: u32 = 24;
/// Must-be-zero `PSL` bits (8..=15, 21, 28, 29).
pub const PSL_MBZ: u32 = 0x3020_FF00;
/// Must-be-zero bits of the 16-bit PSW image stored in call frames.
pub const PSW_MBZ: u32 = 0xFF00;

/// Four-level privilege mode ordering; kernel is numerically lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum AccessMode {
    /// Most privileged mode; required for MTPR/MFPR.
    Kernel = 0,
    /// Executive mode.
    Executive = 1,
    /// Supervisor mode.
    Supervisor = 2,
    /// Least privileged mode.
    User = 3,
}

impl AccessMode {
    /// Ordered list of the four access modes, most privileged first.
    pub const ALL: [Self; 4] = [Self::Kernel, Self::Executive, Self::Supervisor, Self::User];

    /// Decodes a 2-bit mode field.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Kernel,
            1 => Self::Executive,
            2 => Self::Supervisor,
            _ => Self::User,
        }
    }

    /// Returns the mode-indexed bit used in protection masks.
    #[must_use]
    pub const fn mask_bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Picks the more privileged (numerically smaller) of two modes.
    #[must_use]
    pub const fn more_privileged(self, other: Self) -> Self {
        if (self as u8) <= (other as u8) {
            self
        } else {
            other
        }
    }
}

/// Processor Status Longword with typed field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Psl(u32);

impl Psl {
    /// Wraps a raw longword without validation.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw longword value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` when any must-be-zero bit is set.
    #[must_use]
    pub const fn has_mbz_bits(self) -> bool {
        self.0 & PSL_MBZ != 0
    }

    /// Returns `true` when the given flag bit is set.
    #[must_use]
    pub const fn is_set(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Sets or clears a single flag bit.
    pub const fn set_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    /// Reads the current access mode field.
    #[must_use]
    pub const fn current_mode(self) -> AccessMode {
        AccessMode::from_bits(self.0 >> PSL_CURMOD_SHIFT)
    }

    /// Writes the current access mode field.
    pub const fn set_current_mode(&mut self, mode: AccessMode) {
        self.0 = (self.0 & !(3 << PSL_CURMOD_SHIFT)) | ((mode as u32) << PSL_CURMOD_SHIFT);
    }

    /// Reads the previous access mode field.
    #[must_use]
    pub const fn previous_mode(self) -> AccessMode {
        AccessMode::from_bits(self.0 >> PSL_PRVMOD_SHIFT)
    }

    /// Writes the previous access mode field.
    pub const fn set_previous_mode(&mut self, mode: AccessMode) {
        self.0 = (self.0 & !(3 << PSL_PRVMOD_SHIFT)) | ((mode as u32) << PSL_PRVMOD_SHIFT);
    }

    /// Reads the interrupt priority level (0..=31).
    #[must_use]
    pub const fn ipl(self) -> u32 {
        (self.0 & PSL_IPL_MASK) >> PSL_IPL_SHIFT
    }

    /// Writes the interrupt priority level.
    pub const fn set_ipl(&mut self, ipl: u32) {
        self.0 = (self.0 & !PSL_IPL_MASK) | ((ipl & 0x1F) << PSL_IPL_SHIFT);
    }

    /// Reads the four condition-code bits.
    #[must_use]
    pub const fn condition_codes(self) -> u32 {
        self.0 & PSL_CC_MASK
    }

    /// Replaces the four condition-code bits.
    pub const fn set_condition_codes(&mut self, cc: u32) {
        self.0 = (self.0 & !PSL_CC_MASK) | (cc & PSL_CC_MASK);
    }

    /// Sets N and Z from a 32-bit result, clearing V and C.
    pub const fn set_nz_from(&mut self, value: u32) {
        let mut cc = 0;
        if value == 0 {
            cc |= PSL_Z;
        }
        if value & 0x8000_0000 != 0 {
            cc |= PSL_N;
        }
        self.set_condition_codes(cc);
    }

    /// Reads the 16-bit PSW image (low half of the PSL).
    #[must_use]
    pub const fn psw(self) -> u32 {
        self.0 & 0xFFFF
    }
}
