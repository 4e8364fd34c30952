//! CSR backends for RISC-V harts running in S-mode.

use core::arch::asm;

use riscv::register::{scause, sie};

use crate::imsic::ImsicCsrs;
use crate::trap::TrapCsrs;

// siselect = 0x150, sireg = 0x151, stopei = 0x15C, stopi = 0xDB0.
const SIP_SSIP: usize = 1 << 1;

/// The trap CSRs of the current hart.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiscvCsrs;

impl TrapCsrs for RiscvCsrs {
    #[inline]
    fn scause(&self) -> usize {
        scause::read().bits()
    }

    #[inline]
    fn stopi(&self) -> usize {
        let val: usize;
        unsafe { asm!("csrr {0}, 0xDB0", out(reg) val) };
        val
    }

    #[inline]
    fn clear_soft_pending(&self) {
        unsafe { asm!("csrc sip, {0}", in(reg) SIP_SSIP) };
    }

    #[inline]
    fn set_external_enabled(&self, enabled: bool) {
        unsafe {
            if enabled {
                sie::set_sext();
            } else {
                sie::clear_sext();
            }
        }
    }
}

/// The S-level IMSIC interrupt file of the current hart.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiscvImsicCsrs;

impl ImsicCsrs for RiscvImsicCsrs {
    #[inline]
    fn read_indirect(&self, reg: usize) -> usize {
        let val: usize;
        unsafe {
            asm!(
                "csrw 0x150, {sel}",
                "csrr {val}, 0x151",
                sel = in(reg) reg,
                val = out(reg) val,
            )
        };
        val
    }

    #[inline]
    fn write_indirect(&self, reg: usize, val: usize) {
        unsafe {
            asm!(
                "csrw 0x150, {sel}",
                "csrw 0x151, {val}",
                sel = in(reg) reg,
                val = in(reg) val,
            )
        };
    }

    #[inline]
    fn swap_stopei(&self, val: usize) -> usize {
        let old: usize;
        unsafe {
            asm!(
                "csrrw {old}, 0x15C, {val}",
                old = lateout(reg) old,
                val = in(reg) val,
            )
        };
        old
    }
}
