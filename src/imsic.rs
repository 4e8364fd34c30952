//! IMSIC: the per-hart MSI receiver used instead of the APLIC IDCs when the
//! domain delivers MSIs.
//!
//! Interrupt-file state is reached through the `siselect`/`sireg` indirect
//! CSR window of the local hart, so everything except [`Imsic::send_msi`]
//! acts on the calling hart only.

use axerrno::{AxError, AxResult};
use log::{debug, info, warn};

use crate::consts::IMSIC_IPI_ID;
use crate::dispatch::{CauseSource, IrqController, SourceSetup};
use crate::idc::Claim;
use crate::utils::RegisterIo;

pub const IMSIC_EIDELIVERY: usize = 0x70;
pub const IMSIC_EITHRESHOLD: usize = 0x72;
pub const IMSIC_EIE0: usize = 0xC0;

/// Little-endian set-pending register of an interrupt file.
pub const IMSIC_SETEIPNUM_LE: usize = 0x000;

/// stopei identity, bits 26:16, and priority, bits 10:0.
const STOPEI_ID_SHIFT: u32 = 16;
const STOPEI_MASK: u32 = 0x7FF;

pub const IMSIC_MAX_IDS: u32 = 2047;

/// Indirect-access CSRs of the local hart's S-level interrupt file.
pub trait ImsicCsrs {
    /// `siselect = reg; sireg`
    fn read_indirect(&self, reg: usize) -> usize;
    /// `siselect = reg; sireg = val`
    fn write_indirect(&self, reg: usize, val: usize);
    /// Atomic `csrrw stopei`; any write claims the reported identity.
    fn swap_stopei(&self, val: usize) -> usize;
}

#[derive(Debug, Clone, Copy)]
pub struct ImsicConfig {
    pub num_harts: usize,
    /// Distance between two harts' S-level interrupt files.
    pub hart_stride: usize,
    /// Number of implemented identities: 63, 127, ... 2047.
    pub num_ids: u32,
    /// Index of the hart executing the call. When set, source setup aimed
    /// at another hart is dropped instead of enabling the wrong file.
    pub current_hart: Option<fn() -> usize>,
}

impl Default for ImsicConfig {
    fn default() -> Self {
        Self {
            num_harts: 1,
            hart_stride: 0x1000,
            num_ids: 255,
            current_hart: None,
        }
    }
}

pub struct Imsic<C: ImsicCsrs, R: RegisterIo> {
    csrs: C,
    files: R,
    config: ImsicConfig,
}

/// eie/eip hold XLEN bits each; on RV64 only even register numbers exist.
const EIX_BITS: usize = usize::BITS as usize;
const EIX_STRIDE: usize = EIX_BITS / 32;

impl<C: ImsicCsrs, R: RegisterIo> Imsic<C, R> {
    pub fn new(csrs: C, files: R, config: ImsicConfig) -> AxResult<Self> {
        if config.num_ids < 63 || config.num_ids > IMSIC_MAX_IDS || (config.num_ids + 1) % 64 != 0
        {
            warn!("IMSIC: invalid number of identities {}", config.num_ids);
            return Err(AxError::InvalidInput);
        }
        if config.num_harts == 0 || config.hart_stride < 0x1000 {
            warn!("IMSIC: invalid file layout {config:?}");
            return Err(AxError::InvalidInput);
        }
        Ok(Self {
            csrs,
            files,
            config,
        })
    }

    fn eie_position(id: u32) -> (usize, usize) {
        let id = id as usize;
        (IMSIC_EIE0 + (id / EIX_BITS) * EIX_STRIDE, 1 << (id % EIX_BITS))
    }

    fn valid_id(&self, id: u32) -> bool {
        id != 0 && id <= self.config.num_ids
    }

    /// Turns on delivery for the local interrupt file and enables every
    /// identity with no threshold.
    pub fn init_local(&self) {
        self.csrs.write_indirect(IMSIC_EIDELIVERY, 1);
        if self.csrs.read_indirect(IMSIC_EIDELIVERY) & 1 == 0 {
            warn!("IMSIC: interrupt delivery did not stick");
        }
        self.csrs.write_indirect(IMSIC_EITHRESHOLD, 0);

        let words = (self.config.num_ids as usize + 1) / EIX_BITS;
        for word in 0..words.max(1) {
            self.csrs
                .write_indirect(IMSIC_EIE0 + word * EIX_STRIDE, usize::MAX);
        }
    }

    pub fn enable_id(&self, id: u32) {
        if !self.valid_id(id) {
            return;
        }
        let (reg, mask) = Self::eie_position(id);
        let val = self.csrs.read_indirect(reg);
        self.csrs.write_indirect(reg, val | mask);
    }

    pub fn disable_id(&self, id: u32) {
        if !self.valid_id(id) {
            return;
        }
        let (reg, mask) = Self::eie_position(id);
        let val = self.csrs.read_indirect(reg);
        self.csrs.write_indirect(reg, val & !mask);
    }

    pub fn is_id_enabled(&self, id: u32) -> bool {
        if !self.valid_id(id) {
            return false;
        }
        let (reg, mask) = Self::eie_position(id);
        self.csrs.read_indirect(reg) & mask != 0
    }

    /// Identities `>= threshold` are masked; 0 masks nothing.
    pub fn set_threshold(&self, threshold: u32) {
        if threshold > self.config.num_ids {
            debug!("IMSIC: threshold {threshold} dropped");
            return;
        }
        self.csrs
            .write_indirect(IMSIC_EITHRESHOLD, threshold as usize);
    }

    pub fn threshold(&self) -> u32 {
        self.csrs.read_indirect(IMSIC_EITHRESHOLD) as u32
    }

    /// Claims the top pending identity of the local interrupt file.
    pub fn claim_local(&self) -> Claim {
        let raw = self.csrs.swap_stopei(0) as u32;
        Claim {
            identity: (raw >> STOPEI_ID_SHIFT) & STOPEI_MASK,
            priority: raw & STOPEI_MASK,
        }
    }

    /// Raises identity `data` in `hart`'s S-level interrupt file.
    pub fn send_msi(&self, hart: usize, data: u32) {
        if hart >= self.config.num_harts {
            debug!("IMSIC: MSI to hart {hart} dropped");
            return;
        }
        self.files
            .write(hart * self.config.hart_stride + IMSIC_SETEIPNUM_LE, data);
    }

    pub fn send_ipi(&self, hart: usize) {
        self.send_msi(hart, IMSIC_IPI_ID);
    }
}

impl<C: ImsicCsrs, R: RegisterIo> IrqController for Imsic<C, R> {
    fn init(&self) {
        info!(
            "IMSIC: {} harts, {} identities per file",
            self.config.num_harts, self.config.num_ids
        );
    }

    fn init_hart(&self, hart: usize) {
        self.init_local();
        debug!("IMSIC: hart {hart} interrupt file initialized");
    }

    /// Enables the identity in the calling hart's file; run it on `setup.hart`.
    ///
    /// Identities have no trigger mode, so `setup.mode` is not used.
    fn configure_source(&self, id: u32, setup: SourceSetup) {
        if let Some(current_hart) = self.config.current_hart {
            let hart = current_hart();
            if hart != setup.hart {
                warn!(
                    "IMSIC: identity {id} for hart {} configured on hart {hart}, dropped",
                    setup.hart
                );
                return;
            }
        }
        debug!(
            "IMSIC: identity {id} for hart {} ({:?} ignored)",
            setup.hart, setup.mode
        );
        self.enable_id(id);
    }

    fn claim(&self, _hart: usize) -> Claim {
        self.claim_local()
    }

    fn cause_source(&self) -> CauseSource {
        CauseSource::Stopi
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::dispatch::HandlerTable;
    use crate::source::SourceMode;

    const NUM_IDS: usize = 255;

    /// One S-level interrupt file, reached through its indirect CSRs.
    struct FakeFile {
        regs: Mutex<[usize; 0x100]>,
        pending: Mutex<[bool; NUM_IDS + 1]>,
    }

    impl FakeFile {
        fn new() -> Self {
            Self {
                regs: Mutex::new([0; 0x100]),
                pending: Mutex::new([false; NUM_IDS + 1]),
            }
        }

        fn raise(&self, id: usize) {
            self.pending.lock().unwrap()[id] = true;
        }

        fn enabled(&self, regs: &[usize; 0x100], id: usize) -> bool {
            let reg = IMSIC_EIE0 + (id / EIX_BITS) * EIX_STRIDE;
            regs[reg] & (1 << (id % EIX_BITS)) != 0
        }

        fn top(&self) -> usize {
            let regs = self.regs.lock().unwrap();
            let threshold = regs[IMSIC_EITHRESHOLD];
            let pending = self.pending.lock().unwrap();
            (1..=NUM_IDS)
                .find(|&id| {
                    pending[id]
                        && self.enabled(&regs, id)
                        && (threshold == 0 || id < threshold)
                })
                .unwrap_or(0)
        }
    }

    impl ImsicCsrs for &FakeFile {
        fn read_indirect(&self, reg: usize) -> usize {
            self.regs.lock().unwrap()[reg]
        }

        fn write_indirect(&self, reg: usize, val: usize) {
            self.regs.lock().unwrap()[reg] = val;
        }

        fn swap_stopei(&self, _val: usize) -> usize {
            let id = self.top();
            if id == 0 {
                return 0;
            }
            self.pending.lock().unwrap()[id] = false;
            (id << 16) | id
        }
    }

    /// Records MMIO writes to the interrupt-file window.
    #[derive(Default)]
    struct Window(Mutex<Vec<(usize, u32)>>);

    impl RegisterIo for Window {
        fn read(&self, _offset: usize) -> u32 {
            0
        }

        fn write(&self, offset: usize, val: u32) {
            self.0.lock().unwrap().push((offset, val));
        }
    }

    fn imsic<'a>(file: &'a FakeFile, msi: &'a Window) -> Imsic<&'a FakeFile, &'a Window> {
        Imsic::new(
            file,
            msi,
            ImsicConfig {
                num_harts: 2,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn window() -> Window {
        Window::default()
    }

    #[test]
    fn rejects_bad_identity_count() {
        let file = FakeFile::new();
        let win = window();
        for num_ids in [0, 62, 64, 4095] {
            let config = ImsicConfig {
                num_ids,
                ..Default::default()
            };
            assert!(Imsic::new(&file, &win, config).is_err());
        }
    }

    #[test]
    fn init_enables_every_identity() {
        let file = FakeFile::new();
        let win = window();
        let imsic = imsic(&file, &win);
        imsic.init_hart(0);

        assert_eq!(imsic.csrs.read_indirect(IMSIC_EIDELIVERY), 1);
        assert_eq!(imsic.threshold(), 0);
        for id in [1, 63, 64, 200, 255] {
            assert!(imsic.is_id_enabled(id));
        }
    }

    #[test]
    fn enable_disable_single_identity() {
        let file = FakeFile::new();
        let win = window();
        let imsic = imsic(&file, &win);

        imsic.enable_id(70);
        assert!(imsic.is_id_enabled(70));
        assert!(!imsic.is_id_enabled(71));
        imsic.disable_id(70);
        assert!(!imsic.is_id_enabled(70));

        imsic.enable_id(0);
        imsic.enable_id(256);
        assert!(!imsic.is_id_enabled(256));
    }

    #[test]
    fn drain_claims_lowest_identity_first() {
        static ORDER: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn record(id: u32) {
            ORDER.lock().unwrap().push(id);
        }

        let file = FakeFile::new();
        let win = window();
        let imsic = imsic(&file, &win);
        let handlers = HandlerTable::new();
        imsic.init_hart(0);
        for id in [9, 3, 100] {
            handlers.set_handler(id, record);
            file.raise(id as usize);
        }

        imsic.handle(0, &handlers);

        assert_eq!(*ORDER.lock().unwrap(), vec![3, 9, 100]);
        assert!(imsic.claim(0).is_spurious());
    }

    #[test]
    fn threshold_masks_high_identities() {
        let file = FakeFile::new();
        let win = window();
        let imsic = imsic(&file, &win);
        imsic.init_hart(0);
        file.raise(50);

        imsic.set_threshold(50);
        assert!(imsic.claim_local().is_spurious());
        imsic.set_threshold(0);
        assert_eq!(imsic.claim_local().identity, 50);

        imsic.set_threshold(256);
        assert_eq!(imsic.threshold(), 0);
    }

    #[test]
    fn configure_source_enables_identity() {
        let file = FakeFile::new();
        let win = window();
        let imsic = imsic(&file, &win);

        imsic.configure_source(
            3,
            SourceSetup {
                mode: SourceMode::EdgeRise,
                hart: 0,
                priority: 3,
            },
        );
        assert!(imsic.is_id_enabled(3));
    }

    #[test]
    fn configure_source_on_other_hart_is_dropped() {
        fn on_hart_one() -> usize {
            1
        }

        let file = FakeFile::new();
        let win = window();
        let imsic = Imsic::new(
            &file,
            &win,
            ImsicConfig {
                num_harts: 2,
                current_hart: Some(on_hart_one),
                ..Default::default()
            },
        )
        .unwrap();
        let setup = |hart| SourceSetup {
            mode: SourceMode::LevelHigh,
            hart,
            priority: 5,
        };

        imsic.configure_source(5, setup(0));
        assert!(!imsic.is_id_enabled(5));

        imsic.configure_source(5, setup(1));
        assert!(imsic.is_id_enabled(5));
    }

    #[test]
    fn msi_lands_in_target_file() {
        let file = FakeFile::new();
        let win = window();
        let imsic = imsic(&file, &win);

        imsic.send_ipi(0);
        imsic.send_msi(1, 42);
        // Past the last hart.
        imsic.send_msi(2, 7);

        assert_eq!(
            *win.0.lock().unwrap(),
            vec![(IMSIC_SETEIPNUM_LE, IMSIC_IPI_ID), (0x1000 + IMSIC_SETEIPNUM_LE, 42)]
        );
    }
}
