use axerrno::{AxError, AxResult};
use bitflags::bitflags;
use log::{debug, info, warn};

use crate::consts::*;
use crate::dispatch::{IrqController, SourceSetup};
use crate::idc::{Claim, Idc};
use crate::layout::{self, verify_layout};
use crate::source::SourceMode;
use crate::utils::RegisterIo;

bitflags! {
    /// Writable bits of `domaincfg`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DomainCfg: u32 {
        /// Big-endian byte order for in-memory data structures.
        const BE = 1 << 0;
        /// Delivery mode: 0 = direct (IDCs), 1 = MSI.
        const DM = 1 << 2;
        /// Interrupt enable for the whole domain.
        const IE = 1 << 8;
    }
}

/// How the domain forwards interrupts to harts. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Through the per-hart IDC structures (claimi/topi).
    Direct,
    /// As MSIs written to the harts' IMSIC interrupt files.
    Msi,
}

/// Maps a hart index to its IDC index. `None` means the hart has no IDC.
pub type HartToIdc = fn(usize) -> Option<usize>;

/// Default mapping: hart N owns IDC N.
pub fn identity_hart_to_idc(hart: usize) -> Option<usize> {
    Some(hart)
}

#[derive(Debug, Clone, Copy)]
pub struct AplicConfig {
    /// Number of source slots, including the reserved source 0.
    pub num_sources: usize,
    /// Number of IDC structures implemented by the domain.
    pub num_idcs: usize,
    pub delivery_mode: DeliveryMode,
    pub hart_to_idc: HartToIdc,
}

impl Default for AplicConfig {
    fn default() -> Self {
        Self {
            num_sources: APLIC_MAX_SOURCES,
            num_idcs: 8,
            delivery_mode: DeliveryMode::Direct,
            hart_to_idc: identity_hart_to_idc,
        }
    }
}

impl AplicConfig {
    fn validate(&self) -> AxResult {
        if self.num_sources < 2 || self.num_sources > APLIC_MAX_SOURCES {
            warn!("APLIC: invalid number of sources {}", self.num_sources);
            return Err(AxError::InvalidInput);
        }
        // Hart index field of target is 14 bits wide.
        if self.num_idcs == 0 || self.num_idcs > APLIC_TARGET_HART_MASK as usize + 1 {
            warn!("APLIC: invalid number of IDCs {}", self.num_idcs);
            return Err(AxError::InvalidInput);
        }
        Ok(())
    }
}

/// Handle on one APLIC interrupt domain.
///
/// All accesses go through `regs`; nothing is cached, so several handles on
/// the same window observe the same state.
pub struct Aplic<R: RegisterIo> {
    pub(crate) regs: R,
    pub(crate) config: AplicConfig,
}

impl<R: RegisterIo> Aplic<R> {
    pub fn new(regs: R, config: AplicConfig) -> AxResult<Self> {
        config.validate()?;
        if !verify_layout() {
            warn!("APLIC: register layout does not match the AIA map");
        }
        Ok(Self { regs, config })
    }

    pub fn config(&self) -> &AplicConfig {
        &self.config
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.config.delivery_mode
    }

    fn mode_bits(&self) -> DomainCfg {
        match self.config.delivery_mode {
            DeliveryMode::Direct => DomainCfg::empty(),
            DeliveryMode::Msi => DomainCfg::DM,
        }
    }

    /// Resets the domain: every source inactive, nothing pending or enabled.
    ///
    /// Must run once, on one hart, before any hart initializes its IDC. The
    /// caller fences this against every other hart.
    pub fn init(&self) {
        let mode = self.mode_bits();
        self.regs.write(layout::DOMAINCFG, mode.bits());

        for word in 0..APLIC_NUM_BIT_WORDS {
            self.regs.write(layout::in_clrip(word), u32::MAX);
            self.regs.write(layout::clrie(word), u32::MAX);
        }

        for id in 1..self.config.num_sources as u32 {
            self.regs
                .write(layout::sourcecfg(id), SourceMode::Inactive as u32);
            if self.config.delivery_mode == DeliveryMode::Direct {
                self.regs.write(layout::target(id), APLIC_DEFAULT_PRIORITY);
            }
        }

        self.regs
            .write(layout::DOMAINCFG, (mode | DomainCfg::IE).bits());
        info!(
            "APLIC: domain initialized, {} sources, {:?} delivery",
            self.config.num_sources - 1,
            self.config.delivery_mode
        );
    }

    pub fn set_domain_config(&self, val: u32) {
        self.regs.write(layout::DOMAINCFG, val);
    }

    pub fn get_domain_config(&self) -> u32 {
        self.regs.read(layout::DOMAINCFG)
    }

    /// Whether the domain is currently forwarding interrupts.
    pub fn is_enabled(&self) -> bool {
        DomainCfg::from_bits_truncate(self.get_domain_config()).contains(DomainCfg::IE)
    }

    /// Index of the IDC owned by `hart` under the platform mapping.
    pub(crate) fn idc_index(&self, hart: usize) -> Option<usize> {
        let index = (self.config.hart_to_idc)(hart)?;
        if index >= self.config.num_idcs {
            debug!("APLIC: hart {hart} maps to IDC {index}, out of range");
            return None;
        }
        Some(index)
    }

    /// The IDC owned by `hart`, if the platform mapping gives it one.
    pub fn idc(&self, hart: usize) -> Option<Idc<'_, R>> {
        self.idc_index(hart).map(|index| Idc::new(&self.regs, index))
    }
}

impl<R: RegisterIo> IrqController for Aplic<R> {
    fn init(&self) {
        Aplic::init(self)
    }

    fn init_hart(&self, hart: usize) {
        match self.idc(hart) {
            Some(idc) => {
                idc.init();
                debug!("APLIC: hart {hart} IDC {} initialized", idc.index());
            }
            None => warn!("APLIC: hart {hart} has no IDC"),
        }
    }

    fn configure_source(&self, id: u32, setup: SourceSetup) {
        self.set_source_mode(id, setup.mode);
        match self.config.delivery_mode {
            DeliveryMode::Direct => self.set_target(id, setup.hart, setup.priority),
            DeliveryMode::Msi => self.set_target_msi(id, setup.hart, 0, setup.priority),
        }
        self.enable_source(id);
    }

    fn claim(&self, hart: usize) -> Claim {
        self.idc(hart).map_or(Claim::NONE, |idc| idc.claim())
    }
}
