//! Per-source configuration: mode, enable, pending and target.
//!
//! Source IDs are 1-based, as in the hardware identity numbering. Calls with
//! an ID outside `[1, num_sources)` are dropped, and setters never report
//! failure: invalid writes simply do not take effect, like on the hardware.

use bitmaps::Bitmap;
use log::{debug, warn};

use crate::consts::*;
use crate::domain::{Aplic, DeliveryMode};
use crate::layout::{self, bit_position};
use crate::utils::RegisterIo;

/// sourcecfg.SM values. 2 and 3 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SourceMode {
    /// Inactive in this domain.
    Inactive = 0,
    /// Active, detached from the source wire.
    Detached = 1,
    /// Edge-sensitive, asserted on rising edge.
    EdgeRise = 4,
    /// Edge-sensitive, asserted on falling edge.
    EdgeFall = 5,
    /// Level-sensitive, asserted when high.
    LevelHigh = 6,
    /// Level-sensitive, asserted when low.
    LevelLow = 7,
}

impl SourceMode {
    pub fn is_active(self) -> bool {
        self != Self::Inactive
    }
}

impl TryFrom<u32> for SourceMode {
    type Error = u32;

    fn try_from(sm: u32) -> Result<Self, Self::Error> {
        match sm {
            0 => Ok(Self::Inactive),
            1 => Ok(Self::Detached),
            4 => Ok(Self::EdgeRise),
            5 => Ok(Self::EdgeFall),
            6 => Ok(Self::LevelHigh),
            7 => Ok(Self::LevelLow),
            other => Err(other),
        }
    }
}

impl<R: RegisterIo> Aplic<R> {
    #[inline]
    fn valid_source(&self, id: u32) -> bool {
        id != 0 && (id as usize) < self.config.num_sources
    }

    #[inline]
    /// Value of the target hart field that routes to `hart`.
    ///
    /// Direct delivery addresses IDCs, so the hart goes through the platform
    /// mapping; MSI delivery addresses the hart's interrupt file directly.
    fn target_hart_field(&self, hart: usize) -> Option<u32> {
        let index = match self.config.delivery_mode {
            DeliveryMode::Direct => self.idc_index(hart)?,
            DeliveryMode::Msi => hart,
        };
        (index < self.config.num_idcs).then_some(index as u32)
    }

    /// Writes a raw sourcecfg word.
    ///
    /// Words delegating the source to a child domain (D set) or using a
    /// reserved source mode are dropped.
    pub fn set_source_config(&self, id: u32, val: u32) {
        if !self.valid_source(id) {
            debug!("APLIC: sourcecfg write to invalid source {id}");
            return;
        }
        if val & APLIC_SOURCECFG_D != 0 {
            debug!("APLIC: source {id} delegation not supported, sourcecfg {val:#x} dropped");
            return;
        }
        if SourceMode::try_from(val & APLIC_SOURCECFG_SM_MASK).is_err() {
            debug!("APLIC: reserved source mode in sourcecfg {val:#x} for source {id}");
            return;
        }
        self.regs
            .write(layout::sourcecfg(id), val & APLIC_SOURCECFG_SM_MASK);
    }

    pub fn get_source_config(&self, id: u32) -> u32 {
        if !self.valid_source(id) {
            return 0;
        }
        self.regs.read(layout::sourcecfg(id))
    }

    pub fn set_source_mode(&self, id: u32, mode: SourceMode) {
        self.set_source_config(id, mode as u32);
    }

    pub fn source_mode(&self, id: u32) -> Option<SourceMode> {
        if !self.valid_source(id) {
            return None;
        }
        SourceMode::try_from(self.get_source_config(id) & APLIC_SOURCECFG_SM_MASK).ok()
    }

    /// Enables exactly source `id` with one write to setienum.
    pub fn enable_source(&self, id: u32) {
        if self.valid_source(id) {
            self.regs.write(layout::SETIENUM, id);
        }
    }

    pub fn disable_source(&self, id: u32) {
        if self.valid_source(id) {
            self.regs.write(layout::CLRIENUM, id);
        }
    }

    pub fn is_source_enabled(&self, id: u32) -> bool {
        if !self.valid_source(id) {
            return false;
        }
        let (word, mask) = bit_position(id);
        self.regs.read(layout::setie(word)) & mask != 0
    }

    pub fn set_pending(&self, id: u32) {
        if self.valid_source(id) {
            self.regs.write(layout::SETIPNUM, id);
        }
    }

    pub fn clear_pending(&self, id: u32) {
        if self.valid_source(id) {
            self.regs.write(layout::CLRIPNUM, id);
        }
    }

    pub fn is_pending(&self, id: u32) -> bool {
        if !self.valid_source(id) {
            return false;
        }
        let (word, mask) = bit_position(id);
        self.regs.read(layout::setip(word)) & mask != 0
    }

    /// Rectified input value of source `id`, as reported by in_clrip.
    pub fn input_level(&self, id: u32) -> bool {
        if !self.valid_source(id) {
            return false;
        }
        let (word, mask) = bit_position(id);
        self.regs.read(layout::in_clrip(word)) & mask != 0
    }

    pub fn get_target(&self, id: u32) -> u32 {
        if !self.valid_source(id) {
            return 0;
        }
        self.regs.read(layout::target(id))
    }

    /// Routes source `id` to `hart` with priority `prio` in one write.
    ///
    /// A priority of 0 is written as 1, the most urgent level. Direct
    /// delivery only; see [`Aplic::set_target_msi`].
    pub fn set_target(&self, id: u32, hart: usize, prio: u32) {
        if self.config.delivery_mode != DeliveryMode::Direct {
            debug!("APLIC: priority target write in MSI mode dropped");
            return;
        }
        let field = match self.target_hart_field(hart) {
            Some(field) if self.valid_source(id) && prio <= APLIC_MAX_PRIORITY => field,
            _ => {
                debug!("APLIC: target ({hart}, {prio}) for source {id} dropped");
                return;
            }
        };
        let prio = prio.max(1);
        self.regs
            .write(layout::target(id), (field << APLIC_TARGET_HART_SHIFT) | prio);
    }

    /// Changes only the priority field of source `id`'s target.
    ///
    /// Only 1..=255 is accepted; anything else leaves the register untouched.
    pub fn set_target_priority(&self, id: u32, prio: u32) {
        if !self.valid_source(id) || prio == 0 || prio > APLIC_MAX_PRIORITY {
            debug!("APLIC: priority {prio} for source {id} dropped");
            return;
        }
        if self.config.delivery_mode != DeliveryMode::Direct {
            return;
        }
        let val = self.regs.read(layout::target(id)) & !APLIC_TARGET_IPRIO_MASK;
        self.regs.write(layout::target(id), val | prio);
    }

    pub fn target_priority(&self, id: u32) -> u32 {
        self.get_target(id) & APLIC_TARGET_IPRIO_MASK
    }

    /// Routes source `id` to `hart`, keeping the rest of its target.
    pub fn set_target_hart(&self, id: u32, hart: usize) {
        let field = match self.target_hart_field(hart) {
            Some(field) if self.valid_source(id) => field,
            _ => {
                debug!("APLIC: hart {hart} for source {id} dropped");
                return;
            }
        };
        let val = self.regs.read(layout::target(id))
            & !(APLIC_TARGET_HART_MASK << APLIC_TARGET_HART_SHIFT);
        self.regs
            .write(layout::target(id), val | (field << APLIC_TARGET_HART_SHIFT));
    }

    /// Raw hart index field of source `id`'s target: an IDC index in direct
    /// mode, a hart index in MSI mode.
    pub fn target_hart(&self, id: u32) -> usize {
        ((self.get_target(id) >> APLIC_TARGET_HART_SHIFT) & APLIC_TARGET_HART_MASK) as usize
    }

    /// Routes source `id` as an MSI carrying `eiid` to `hart`'s interrupt file.
    ///
    /// Guest interrupt files are not supported; a non-zero `guest` is dropped.
    pub fn set_target_msi(&self, id: u32, hart: usize, guest: u32, eiid: u32) {
        if !self.valid_source(id) || hart >= self.config.num_idcs || eiid > APLIC_TARGET_EIID_MASK {
            debug!("APLIC: MSI target ({hart}, {eiid}) for source {id} dropped");
            return;
        }
        if guest != 0 {
            warn!("APLIC: guest index {guest} for source {id} not supported");
            return;
        }
        if self.config.delivery_mode != DeliveryMode::Msi {
            debug!("APLIC: MSI target write in direct mode dropped");
            return;
        }
        self.regs.write(
            layout::target(id),
            ((hart as u32) << APLIC_TARGET_HART_SHIFT) | eiid,
        );
    }

    /// Finds which sources the domain implements.
    ///
    /// Meant for bring-up, before sources are routed. Each inactive source is
    /// made detached, enabled through setienum and read back; unimplemented
    /// sources keep their enable bit at zero. The previous configuration and
    /// enable state are restored afterwards. Sources that are already active
    /// are implemented by definition and left untouched, so a live source is
    /// never briefly enabled.
    pub fn probe_implemented(&self) -> Bitmap<APLIC_MAX_SOURCES> {
        let mut implemented = Bitmap::new();
        for id in 1..self.config.num_sources as u32 {
            let saved = self.regs.read(layout::sourcecfg(id));
            if saved != SourceMode::Inactive as u32 {
                implemented.set(id as usize, true);
                continue;
            }
            let was_enabled = self.is_source_enabled(id);

            self.regs
                .write(layout::sourcecfg(id), SourceMode::Detached as u32);
            self.regs.write(layout::SETIENUM, id);
            if self.is_source_enabled(id) {
                implemented.set(id as usize, true);
            }
            if !was_enabled {
                self.regs.write(layout::CLRIENUM, id);
            }
            self.regs.write(layout::sourcecfg(id), saved);
        }
        debug!("APLIC: {} implemented sources", implemented.len());
        implemented
    }
}
