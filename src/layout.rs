//! In-memory shape of the APLIC register file.
//!
//! Every address the driver touches is derived from the two `#[repr(C)]`
//! blocks below, so a packing mistake in them would silently redirect writes
//! to unrelated registers. [`verify_layout`] checks the derived addresses
//! against the published offsets in [`crate::consts`].

use core::mem::{offset_of, size_of};

use log::error;

use crate::consts::*;

const NUM_SOURCE_REGS: usize = APLIC_MAX_SOURCES - 1;

/// Domain-wide register block of an interrupt domain.
#[repr(C)]
pub struct AplicDomainRegs {
    pub domaincfg: u32,
    pub sourcecfg: [u32; NUM_SOURCE_REGS],
    _reserved0: [u32; 752],
    pub mmsiaddrcfg: u32,
    pub mmsiaddrcfgh: u32,
    pub smsiaddrcfg: u32,
    pub smsiaddrcfgh: u32,
    _reserved1: [u32; 12],
    pub setip: [u32; APLIC_NUM_BIT_WORDS],
    _reserved2: [u32; 23],
    pub setipnum: u32,
    _reserved3: [u32; 8],
    pub in_clrip: [u32; APLIC_NUM_BIT_WORDS],
    _reserved4: [u32; 23],
    pub clripnum: u32,
    _reserved5: [u32; 8],
    pub setie: [u32; APLIC_NUM_BIT_WORDS],
    _reserved6: [u32; 23],
    pub setienum: u32,
    _reserved7: [u32; 8],
    pub clrie: [u32; APLIC_NUM_BIT_WORDS],
    _reserved8: [u32; 23],
    pub clrienum: u32,
    _reserved9: [u32; 8],
    pub setipnum_le: u32,
    pub setipnum_be: u32,
    _reserved10: [u32; 1022],
    pub genmsi: u32,
    pub target: [u32; NUM_SOURCE_REGS],
}

/// Interrupt delivery control structure of one hart.
#[repr(C)]
pub struct AplicIdcRegs {
    pub idelivery: u32,
    pub iforce: u32,
    pub ithreshold: u32,
    _reserved: [u32; 3],
    pub topi: u32,
    pub claimi: u32,
}

pub const DOMAINCFG: usize = offset_of!(AplicDomainRegs, domaincfg);
pub const MMSIADDRCFG: usize = offset_of!(AplicDomainRegs, mmsiaddrcfg);
pub const MMSIADDRCFGH: usize = offset_of!(AplicDomainRegs, mmsiaddrcfgh);
pub const SMSIADDRCFG: usize = offset_of!(AplicDomainRegs, smsiaddrcfg);
pub const SMSIADDRCFGH: usize = offset_of!(AplicDomainRegs, smsiaddrcfgh);
pub const SETIPNUM: usize = offset_of!(AplicDomainRegs, setipnum);
pub const CLRIPNUM: usize = offset_of!(AplicDomainRegs, clripnum);
pub const SETIENUM: usize = offset_of!(AplicDomainRegs, setienum);
pub const CLRIENUM: usize = offset_of!(AplicDomainRegs, clrienum);
pub const SETIPNUM_LE: usize = offset_of!(AplicDomainRegs, setipnum_le);
pub const SETIPNUM_BE: usize = offset_of!(AplicDomainRegs, setipnum_be);
pub const GENMSI: usize = offset_of!(AplicDomainRegs, genmsi);

/// sourcecfg of source `id`. The array starts at source 1.
#[inline]
pub const fn sourcecfg(id: u32) -> usize {
    offset_of!(AplicDomainRegs, sourcecfg) + (id as usize - 1) * 4
}

/// target of source `id`. The array starts at source 1.
#[inline]
pub const fn target(id: u32) -> usize {
    offset_of!(AplicDomainRegs, target) + (id as usize - 1) * 4
}

#[inline]
pub const fn setip(word: usize) -> usize {
    offset_of!(AplicDomainRegs, setip) + word * 4
}

#[inline]
pub const fn in_clrip(word: usize) -> usize {
    offset_of!(AplicDomainRegs, in_clrip) + word * 4
}

#[inline]
pub const fn setie(word: usize) -> usize {
    offset_of!(AplicDomainRegs, setie) + word * 4
}

#[inline]
pub const fn clrie(word: usize) -> usize {
    offset_of!(AplicDomainRegs, clrie) + word * 4
}

/// Start of the IDC structure with index `idc`.
#[inline]
pub const fn idc(idc: usize) -> usize {
    size_of::<AplicDomainRegs>() + idc * size_of::<AplicIdcRegs>()
}

#[inline]
pub const fn idelivery(idc: usize) -> usize {
    self::idc(idc) + offset_of!(AplicIdcRegs, idelivery)
}

#[inline]
pub const fn iforce(idc: usize) -> usize {
    self::idc(idc) + offset_of!(AplicIdcRegs, iforce)
}

#[inline]
pub const fn ithreshold(idc: usize) -> usize {
    self::idc(idc) + offset_of!(AplicIdcRegs, ithreshold)
}

#[inline]
pub const fn topi(idc: usize) -> usize {
    self::idc(idc) + offset_of!(AplicIdcRegs, topi)
}

#[inline]
pub const fn claimi(idc: usize) -> usize {
    self::idc(idc) + offset_of!(AplicIdcRegs, claimi)
}

/// Word index and bit mask of source `id` inside a pending/enable bit array.
#[inline]
pub const fn bit_position(id: u32) -> (usize, u32) {
    ((id / 32) as usize, 1 << (id % 32))
}

/// Checks every derived register address against the published APLIC map.
///
/// Each mismatch is reported through `log::error!`; nothing panics. Returns
/// `true` when the layout matches.
pub fn verify_layout() -> bool {
    let last = (APLIC_MAX_SOURCES - 1) as u32;
    let checks: [(&str, usize, usize); 27] = [
        ("domaincfg", DOMAINCFG, APLIC_DOMAINCFG_OFFSET),
        ("sourcecfg[1]", sourcecfg(1), APLIC_SOURCECFG_OFFSET),
        ("sourcecfg[1023]", sourcecfg(last), APLIC_SOURCECFG_OFFSET + (last as usize - 1) * 4),
        ("mmsiaddrcfg", MMSIADDRCFG, APLIC_MMSIADDRCFG_OFFSET),
        ("mmsiaddrcfgh", MMSIADDRCFGH, APLIC_MMSIADDRCFGH_OFFSET),
        ("smsiaddrcfg", SMSIADDRCFG, APLIC_SMSIADDRCFG_OFFSET),
        ("smsiaddrcfgh", SMSIADDRCFGH, APLIC_SMSIADDRCFGH_OFFSET),
        ("setip[0]", setip(0), APLIC_SETIP_OFFSET),
        ("setipnum", SETIPNUM, APLIC_SETIPNUM_OFFSET),
        ("in_clrip[0]", in_clrip(0), APLIC_IN_CLRIP_OFFSET),
        ("clripnum", CLRIPNUM, APLIC_CLRIPNUM_OFFSET),
        ("setie[0]", setie(0), APLIC_SETIE_OFFSET),
        ("setienum", SETIENUM, APLIC_SETIENUM_OFFSET),
        ("clrie[0]", clrie(0), APLIC_CLRIE_OFFSET),
        ("clrienum", CLRIENUM, APLIC_CLRIENUM_OFFSET),
        ("setipnum_le", SETIPNUM_LE, APLIC_SETIPNUM_LE_OFFSET),
        ("setipnum_be", SETIPNUM_BE, APLIC_SETIPNUM_BE_OFFSET),
        ("genmsi", GENMSI, APLIC_GENMSI_OFFSET),
        ("target[1]", target(1), APLIC_TARGET_OFFSET),
        ("target[1023]", target(last), APLIC_TARGET_OFFSET + (last as usize - 1) * 4),
        ("idc[0]", idc(0), APLIC_IDC_OFFSET),
        ("idc[1]", idc(1), APLIC_IDC_OFFSET + APLIC_IDC_STRIDE),
        ("idelivery", idelivery(0) - idc(0), APLIC_IDC_IDELIVERY_OFFSET),
        ("iforce", iforce(0) - idc(0), APLIC_IDC_IFORCE_OFFSET),
        ("ithreshold", ithreshold(0) - idc(0), APLIC_IDC_ITHRESHOLD_OFFSET),
        ("topi", topi(0) - idc(0), APLIC_IDC_TOPI_OFFSET),
        ("claimi", claimi(0) - idc(0), APLIC_IDC_CLAIMI_OFFSET),
    ];

    let mut ok = true;
    for (name, computed, expected) in checks {
        if computed != expected {
            error!("APLIC layout drift: {name} at {computed:#x}, expected {expected:#x}");
            ok = false;
        }
    }
    ok
}
