use axaddrspace::{device::AccessWidth, GuestPhysAddr, GuestPhysAddrRange};
use axdevice_base::{BaseDeviceOps, EmuDeviceType};
use axerrno::{AxError, AxResult};
use bitmaps::Bitmap;
use log::warn;
use spin::Mutex;

use crate::consts::*;
use crate::domain::DomainCfg;
use crate::source::SourceMode;
use crate::utils::RegisterIo;

/// Most IDCs a [`VAplic`] can model.
pub const VAPLIC_MAX_IDCS: usize = 32;

const SOURCECFG_END: usize = APLIC_SOURCECFG_OFFSET + (APLIC_MAX_SOURCES - 1) * 4;
const SETIP_END: usize = APLIC_SETIP_OFFSET + APLIC_NUM_BIT_WORDS * 4;
const IN_CLRIP_END: usize = APLIC_IN_CLRIP_OFFSET + APLIC_NUM_BIT_WORDS * 4;
const SETIE_END: usize = APLIC_SETIE_OFFSET + APLIC_NUM_BIT_WORDS * 4;
const CLRIE_END: usize = APLIC_CLRIE_OFFSET + APLIC_NUM_BIT_WORDS * 4;
const TARGET_END: usize = APLIC_TARGET_OFFSET + (APLIC_MAX_SOURCES - 1) * 4;

#[derive(Debug, Clone, Copy, Default)]
struct VIdc {
    idelivery: u32,
    iforce: u32,
    ithreshold: u32,
}

struct VAplicState {
    domaincfg: u32,
    /// Indexed by source ID; slot 0 is unused.
    sourcecfg: [u32; APLIC_MAX_SOURCES],
    target: [u32; APLIC_MAX_SOURCES],
    pending_irqs: Bitmap<APLIC_MAX_SOURCES>,
    enabled_irqs: Bitmap<APLIC_MAX_SOURCES>,
    idcs: [VIdc; VAPLIC_MAX_IDCS],
}

/// An emulated APLIC domain in direct or MSI delivery mode.
///
/// It has no source wires: pending bits only change through register writes
/// and claims. Sources that are inactive ignore pending and enable writes.
pub struct VAplic {
    /// The address of the VAplic in the guest physical address space.
    pub addr: GuestPhysAddr,
    /// The size of the VAplic in bytes.
    pub size: usize,
    /// Number of source slots, including the reserved source 0.
    pub num_sources: usize,
    /// Num of IDCs.
    pub num_idcs: usize,
    state: Mutex<VAplicState>,
}

impl VAplic {
    pub fn new(addr: GuestPhysAddr, num_sources: usize, num_idcs: usize) -> AxResult<Self> {
        if !(2..=APLIC_MAX_SOURCES).contains(&num_sources) {
            warn!("VAplic: invalid number of sources {num_sources}");
            return Err(AxError::InvalidInput);
        }
        if !(1..=VAPLIC_MAX_IDCS).contains(&num_idcs) {
            warn!("VAplic: invalid number of IDCs {num_idcs}");
            return Err(AxError::InvalidInput);
        }
        Ok(Self {
            addr,
            size: APLIC_IDC_OFFSET + num_idcs * APLIC_IDC_STRIDE,
            num_sources,
            num_idcs,
            state: Mutex::new(VAplicState {
                domaincfg: 0,
                sourcecfg: [0; APLIC_MAX_SOURCES],
                target: [0; APLIC_MAX_SOURCES],
                pending_irqs: Bitmap::new(),
                enabled_irqs: Bitmap::new(),
                idcs: [VIdc::default(); VAPLIC_MAX_IDCS],
            }),
        })
    }

    /// Marks source `id` pending, as an edge on its wire would.
    pub fn inject(&self, id: u32) {
        let mut state = self.state.lock();
        self.set_pending(&mut state, id as usize, true);
    }

    fn valid_source(&self, id: usize) -> bool {
        id != 0 && id < self.num_sources
    }

    fn is_active(state: &VAplicState, id: usize) -> bool {
        state.sourcecfg[id] != SourceMode::Inactive as u32
    }

    fn set_pending(&self, state: &mut VAplicState, id: usize, pending: bool) {
        if self.valid_source(id) && (!pending || Self::is_active(state, id)) {
            state.pending_irqs.set(id, pending);
        }
    }

    fn set_enabled(&self, state: &mut VAplicState, id: usize, enabled: bool) {
        if self.valid_source(id) && (!enabled || Self::is_active(state, id)) {
            state.enabled_irqs.set(id, enabled);
        }
    }

    fn direct_mode(state: &VAplicState) -> bool {
        state.domaincfg & DomainCfg::DM.bits() == 0
    }

    /// Collects one 32-bit word of a source bitmap.
    fn bitmap_word(bitmap: &Bitmap<APLIC_MAX_SOURCES>, word: usize) -> u32 {
        let bit_index_start = word * 32;
        let mut val: u32 = 0;
        let mut bit_mask: u32 = 1;
        for i in 0..32 {
            if bitmap.get(bit_index_start + i) {
                val |= bit_mask;
            }
            bit_mask <<= 1;
        }
        val
    }

    /// Applies `f` to every source whose bit is set in `val`.
    fn for_each_bit(word: usize, val: u32, mut f: impl FnMut(usize)) {
        let mut bit_mask: u32 = 1;
        for i in 0..32 {
            if (val & bit_mask) != 0 {
                f(word * 32 + i);
            }
            bit_mask <<= 1;
        }
    }

    /// Highest-priority pending and enabled source routed to `idc`.
    ///
    /// Lower priority numbers win; ties go to the lower source ID.
    fn top(&self, state: &VAplicState, idc: usize) -> Option<(u32, u32)> {
        if !Self::direct_mode(state) {
            return None;
        }
        let threshold = state.idcs[idc].ithreshold;
        let mut best: Option<(u32, u32)> = None;
        for id in &state.pending_irqs {
            if !self.valid_source(id) || !state.enabled_irqs.get(id) {
                continue;
            }
            let target = state.target[id];
            let hart = ((target >> APLIC_TARGET_HART_SHIFT) & APLIC_TARGET_HART_MASK) as usize;
            let prio = target & APLIC_TARGET_IPRIO_MASK;
            if hart != idc || (threshold != 0 && prio >= threshold) {
                continue;
            }
            match best {
                Some((_, best_prio)) if best_prio <= prio => {}
                _ => best = Some((id as u32, prio)),
            }
        }
        best
    }

    fn encode_top(top: Option<(u32, u32)>) -> usize {
        top.map_or(0, |(id, prio)| ((id << APLIC_TOPI_ID_SHIFT) | prio) as usize)
    }

    fn read_idc(&self, state: &mut VAplicState, idc: usize, reg: usize) -> usize {
        match reg {
            APLIC_IDC_IDELIVERY_OFFSET => state.idcs[idc].idelivery as usize,
            APLIC_IDC_IFORCE_OFFSET => state.idcs[idc].iforce as usize,
            APLIC_IDC_ITHRESHOLD_OFFSET => state.idcs[idc].ithreshold as usize,
            APLIC_IDC_TOPI_OFFSET => Self::encode_top(self.top(state, idc)),
            APLIC_IDC_CLAIMI_OFFSET => {
                let top = self.top(state, idc);
                if let Some((id, _)) = top {
                    state.pending_irqs.set(id as usize, false);
                } else {
                    // A spurious claim consumes a forced interrupt.
                    state.idcs[idc].iforce = 0;
                }
                Self::encode_top(top)
            }
            _ => 0,
        }
    }

    fn write_idc(state: &mut VAplicState, idc: usize, reg: usize, val: u32) {
        match reg {
            APLIC_IDC_IDELIVERY_OFFSET => state.idcs[idc].idelivery = val & 1,
            APLIC_IDC_IFORCE_OFFSET => state.idcs[idc].iforce = val & 1,
            APLIC_IDC_ITHRESHOLD_OFFSET => state.idcs[idc].ithreshold = val & APLIC_MAX_PRIORITY,
            // topi and claimi are read-only.
            _ => {}
        }
    }

    fn write_sourcecfg(&self, state: &mut VAplicState, id: usize, val: u32) {
        // No child domains: delegation and reserved modes do not take effect.
        if val & APLIC_SOURCECFG_D != 0 {
            return;
        }
        let Ok(mode) = SourceMode::try_from(val & APLIC_SOURCECFG_SM_MASK) else {
            return;
        };
        state.sourcecfg[id] = mode as u32;
        if !mode.is_active() {
            state.pending_irqs.set(id, false);
            state.enabled_irqs.set(id, false);
        }
    }

    fn write_target(state: &mut VAplicState, id: usize, val: u32) {
        let hart = val & (APLIC_TARGET_HART_MASK << APLIC_TARGET_HART_SHIFT);
        state.target[id] = if Self::direct_mode(state) {
            // IPRIO reads as 1 when written with 0.
            hart | (val & APLIC_TARGET_IPRIO_MASK).max(1)
        } else {
            hart | (val
                & ((APLIC_TARGET_GUEST_MASK << APLIC_TARGET_GUEST_SHIFT)
                    | APLIC_TARGET_EIID_MASK))
        };
    }

    /// Splits an IDC-area offset into (IDC index, register offset).
    fn idc_reg(&self, reg: usize) -> Option<(usize, usize)> {
        let rel = reg.checked_sub(APLIC_IDC_OFFSET)?;
        let idc = rel / APLIC_IDC_STRIDE;
        (idc < self.num_idcs).then_some((idc, rel % APLIC_IDC_STRIDE))
    }
}

impl BaseDeviceOps<GuestPhysAddrRange> for VAplic {
    fn emu_type(&self) -> axdevice_base::EmuDeviceType {
        EmuDeviceType::InterruptController
    }

    fn address_range(&self) -> GuestPhysAddrRange {
        GuestPhysAddrRange::from_start_size(self.addr, self.size)
    }

    fn handle_read(
        &self,
        addr: <GuestPhysAddrRange as axaddrspace::device::DeviceAddrRange>::Addr,
        width: axaddrspace::device::AccessWidth,
    ) -> axerrno::AxResult<usize> {
        if width != AccessWidth::Dword || addr < self.addr || addr - self.addr >= self.size {
            warn!("VAplic: bad read at {addr:?} width {width:?}");
            return Err(AxError::InvalidInput);
        }
        let reg = addr - self.addr;
        let mut state = self.state.lock();
        let val = match reg {
            APLIC_DOMAINCFG_OFFSET => (APLIC_DOMAINCFG_RO80 | state.domaincfg) as usize,
            APLIC_SOURCECFG_OFFSET..SOURCECFG_END => {
                let id = (reg - APLIC_SOURCECFG_OFFSET) / 4 + 1;
                if self.valid_source(id) {
                    state.sourcecfg[id] as usize
                } else {
                    0
                }
            }
            APLIC_SETIP_OFFSET..SETIP_END => {
                Self::bitmap_word(&state.pending_irqs, (reg - APLIC_SETIP_OFFSET) / 4) as usize
            }
            APLIC_SETIE_OFFSET..SETIE_END => {
                Self::bitmap_word(&state.enabled_irqs, (reg - APLIC_SETIE_OFFSET) / 4) as usize
            }
            APLIC_TARGET_OFFSET..TARGET_END => {
                let id = (reg - APLIC_TARGET_OFFSET) / 4 + 1;
                if self.valid_source(id) {
                    state.target[id] as usize
                } else {
                    0
                }
            }
            offset if offset >= APLIC_IDC_OFFSET => match self.idc_reg(offset) {
                Some((idc, field)) => self.read_idc(&mut state, idc, field),
                None => 0,
            },
            // in_clrip (no wires to rectify), clrie, *num and reserved words.
            _ => 0,
        };
        Ok(val)
    }

    fn handle_write(
        &self,
        addr: <GuestPhysAddrRange as axaddrspace::device::DeviceAddrRange>::Addr,
        width: axaddrspace::device::AccessWidth,
        val: usize,
    ) -> axerrno::AxResult {
        if width != AccessWidth::Dword || addr < self.addr || addr - self.addr >= self.size {
            warn!("VAplic: bad write at {addr:?} width {width:?}");
            return Err(AxError::InvalidInput);
        }
        let reg = addr - self.addr;
        let val = val as u32;
        let mut state = self.state.lock();
        match reg {
            APLIC_DOMAINCFG_OFFSET => {
                state.domaincfg = val & (DomainCfg::IE | DomainCfg::DM | DomainCfg::BE).bits()
            }
            APLIC_SOURCECFG_OFFSET..SOURCECFG_END => {
                let id = (reg - APLIC_SOURCECFG_OFFSET) / 4 + 1;
                if self.valid_source(id) {
                    self.write_sourcecfg(&mut state, id, val);
                }
            }
            APLIC_SETIP_OFFSET..SETIP_END => {
                Self::for_each_bit((reg - APLIC_SETIP_OFFSET) / 4, val, |id| {
                    self.set_pending(&mut state, id, true)
                })
            }
            APLIC_SETIPNUM_OFFSET | APLIC_SETIPNUM_LE_OFFSET => {
                self.set_pending(&mut state, val as usize, true)
            }
            APLIC_SETIPNUM_BE_OFFSET => {
                self.set_pending(&mut state, val.swap_bytes() as usize, true)
            }
            APLIC_IN_CLRIP_OFFSET..IN_CLRIP_END => {
                Self::for_each_bit((reg - APLIC_IN_CLRIP_OFFSET) / 4, val, |id| {
                    self.set_pending(&mut state, id, false)
                })
            }
            APLIC_CLRIPNUM_OFFSET => self.set_pending(&mut state, val as usize, false),
            APLIC_SETIE_OFFSET..SETIE_END => {
                Self::for_each_bit((reg - APLIC_SETIE_OFFSET) / 4, val, |id| {
                    self.set_enabled(&mut state, id, true)
                })
            }
            APLIC_SETIENUM_OFFSET => self.set_enabled(&mut state, val as usize, true),
            APLIC_CLRIE_OFFSET..CLRIE_END => {
                Self::for_each_bit((reg - APLIC_CLRIE_OFFSET) / 4, val, |id| {
                    self.set_enabled(&mut state, id, false)
                })
            }
            APLIC_CLRIENUM_OFFSET => self.set_enabled(&mut state, val as usize, false),
            APLIC_TARGET_OFFSET..TARGET_END => {
                let id = (reg - APLIC_TARGET_OFFSET) / 4 + 1;
                if self.valid_source(id) {
                    Self::write_target(&mut state, id, val);
                }
            }
            offset if offset >= APLIC_IDC_OFFSET => {
                if let Some((idc, field)) = self.idc_reg(offset) {
                    Self::write_idc(&mut state, idc, field, val);
                }
            }
            // MSI address configuration, genmsi and reserved words.
            _ => {}
        }
        Ok(())
    }
}

impl RegisterIo for VAplic {
    fn read(&self, offset: usize) -> u32 {
        self.handle_read(self.addr + offset, AccessWidth::Dword)
            .unwrap_or(0) as u32
    }

    fn write(&self, offset: usize, val: u32) {
        let _ = self.handle_write(self.addr + offset, AccessWidth::Dword, val as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout;

    fn vaplic() -> VAplic {
        VAplic::new(GuestPhysAddr::from_usize(0xd00_0000), 64, 2).unwrap()
    }

    fn activate(dev: &VAplic, id: u32, hart: u32, prio: u32) {
        dev.write(layout::sourcecfg(id), SourceMode::EdgeRise as u32);
        dev.write(layout::target(id), (hart << APLIC_TARGET_HART_SHIFT) | prio);
        dev.write(layout::SETIENUM, id);
    }

    #[test]
    fn device_window() {
        let dev = vaplic();
        assert_eq!(dev.emu_type(), EmuDeviceType::InterruptController);
        assert_eq!(dev.size, 0x4000 + 2 * 0x20);

        let past_end = dev.addr + dev.size;
        assert!(dev.handle_read(past_end, AccessWidth::Dword).is_err());
        assert!(dev.handle_read(dev.addr, AccessWidth::Byte).is_err());
        assert!(dev
            .handle_write(dev.addr, AccessWidth::Qword, 0)
            .is_err());
    }

    #[test]
    fn rejects_bad_geometry() {
        let addr = GuestPhysAddr::from_usize(0xd00_0000);
        assert!(VAplic::new(addr, 1, 1).is_err());
        assert!(VAplic::new(addr, APLIC_MAX_SOURCES + 1, 1).is_err());
        assert!(VAplic::new(addr, 64, VAPLIC_MAX_IDCS + 1).is_err());
    }

    #[test]
    fn bit_array_words() {
        let dev = vaplic();
        for id in [1, 31, 33] {
            dev.write(layout::sourcecfg(id), SourceMode::Detached as u32);
        }
        dev.write(layout::setip(0), (1 << 1) | (1 << 31) | (1 << 2));
        dev.write(layout::setip(1), 1 << 1);

        // Source 2 is inactive.
        assert_eq!(dev.read(layout::setip(0)), (1 << 1) | (1 << 31));
        assert_eq!(dev.read(layout::setip(1)), 1 << 1);

        dev.write(layout::in_clrip(0), u32::MAX);
        assert_eq!(dev.read(layout::setip(0)), 0);
        assert_eq!(dev.read(layout::setip(1)), 1 << 1);
    }

    #[test]
    fn big_endian_setipnum() {
        let dev = vaplic();
        dev.write(layout::sourcecfg(3), SourceMode::EdgeFall as u32);
        dev.write(layout::SETIPNUM_BE, 3u32.swap_bytes());
        assert_eq!(dev.read(layout::setip(0)), 1 << 3);
    }

    #[test]
    fn going_inactive_drops_pending_and_enable() {
        let dev = vaplic();
        activate(&dev, 8, 0, 4);
        dev.inject(8);

        dev.write(layout::sourcecfg(8), SourceMode::Inactive as u32);
        assert_eq!(dev.read(layout::setip(0)), 0);
        assert_eq!(dev.read(layout::setie(0)), 0);
    }

    #[test]
    fn topi_prefers_low_priority_number_then_low_id() {
        let dev = vaplic();
        activate(&dev, 10, 1, 5);
        activate(&dev, 4, 1, 5);
        activate(&dev, 20, 1, 6);
        for id in [10, 4, 20] {
            dev.inject(id);
        }

        assert_eq!(dev.read(layout::topi(1)), (4 << 16) | 5);
        assert_eq!(dev.read(layout::claimi(1)), (4 << 16) | 5);
        assert_eq!(dev.read(layout::claimi(1)), (10 << 16) | 5);
        assert_eq!(dev.read(layout::claimi(1)), (20 << 16) | 6);
        assert_eq!(dev.read(layout::claimi(1)), 0);
        assert_eq!(dev.read(layout::topi(0)), 0);
    }

    #[test]
    fn spurious_claim_clears_iforce() {
        let dev = vaplic();
        dev.write(layout::iforce(0), 1);
        assert_eq!(dev.read(layout::iforce(0)), 1);
        assert_eq!(dev.read(layout::claimi(0)), 0);
        assert_eq!(dev.read(layout::iforce(0)), 0);
    }

    #[test]
    fn msi_mode_has_no_idc_delivery() {
        let dev = vaplic();
        dev.write(layout::DOMAINCFG, DomainCfg::DM.bits());
        activate(&dev, 6, 1, 0x7FF);
        dev.inject(6);

        assert_eq!(dev.read(layout::target(6)), (1 << 18) | 0x7FF);
        assert_eq!(dev.read(layout::claimi(1)), 0);
    }

    #[test]
    fn zero_priority_reads_as_one() {
        let dev = vaplic();
        dev.write(layout::target(2), 3 << APLIC_TARGET_HART_SHIFT);
        assert_eq!(dev.read(layout::target(2)), (3 << APLIC_TARGET_HART_SHIFT) | 1);
    }
}
