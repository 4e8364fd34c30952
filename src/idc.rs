use log::debug;

use crate::consts::*;
use crate::layout;
use crate::utils::RegisterIo;

/// Interrupt identity and priority as reported by topi/claimi.
///
/// Identity 0 means nothing was eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Claim {
    pub identity: u32,
    pub priority: u32,
}

impl Claim {
    pub const NONE: Self = Self {
        identity: 0,
        priority: 0,
    };

    /// Decodes a topi/claimi word: identity in bits 25:16, priority in 7:0.
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            identity: (raw >> APLIC_TOPI_ID_SHIFT) & APLIC_TOPI_ID_MASK,
            priority: raw & APLIC_TOPI_PRIO_MASK,
        }
    }

    pub const fn is_spurious(&self) -> bool {
        self.identity == 0
    }
}

/// Interrupt delivery control of one hart.
///
/// At run time only the owning hart touches its IDC.
pub struct Idc<'a, R: RegisterIo> {
    regs: &'a R,
    index: usize,
}

impl<'a, R: RegisterIo> Idc<'a, R> {
    pub(crate) fn new(regs: &'a R, index: usize) -> Self {
        Self { regs, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Accept every priority, no forced interrupt, delivery on.
    pub fn init(&self) {
        self.regs.write(layout::ithreshold(self.index), 0);
        self.regs.write(layout::iforce(self.index), 0);
        self.regs.write(layout::idelivery(self.index), 1);
    }

    pub fn set_delivery(&self, enabled: bool) {
        self.regs
            .write(layout::idelivery(self.index), enabled as u32);
    }

    pub fn delivery(&self) -> bool {
        self.regs.read(layout::idelivery(self.index)) & 1 != 0
    }

    /// Forces an interrupt signal to the hart. Test use only.
    pub fn set_force(&self, enabled: bool) {
        self.regs.write(layout::iforce(self.index), enabled as u32);
    }

    pub fn force(&self) -> bool {
        self.regs.read(layout::iforce(self.index)) & 1 != 0
    }

    /// Interrupts with a priority number `>= threshold` are masked; 0 masks
    /// nothing. Values above the maximum priority are dropped.
    pub fn set_threshold(&self, threshold: u32) {
        if threshold > APLIC_MAX_PRIORITY {
            debug!("APLIC: IDC {} threshold {threshold} dropped", self.index);
            return;
        }
        self.regs.write(layout::ithreshold(self.index), threshold);
    }

    pub fn threshold(&self) -> u32 {
        self.regs.read(layout::ithreshold(self.index))
    }

    /// Peeks at the highest-priority eligible interrupt without claiming it.
    pub fn topi(&self) -> Claim {
        Claim::from_raw(self.regs.read(layout::topi(self.index)))
    }

    /// Claims the highest-priority eligible interrupt.
    ///
    /// The read itself clears the pending bit of the returned source, so the
    /// value must be used exactly once.
    pub fn claim(&self) -> Claim {
        Claim::from_raw(self.regs.read(layout::claimi(self.index)))
    }
}
