#![cfg_attr(not(test), no_std)]

//! RISC-V AIA interrupt controller driver: APLIC domains in direct delivery
//! mode, the IMSIC as the MSI alternative, handler dispatch and the S-mode
//! trap entry that ties them together.
//!
//! Typical bring-up:
//!
//! 1. the boot hart builds an [`Aplic`] over the mapped register window and
//!    calls [`Aplic::init`], then releases the other harts;
//! 2. every hart calls [`IrqController::init_hart`] with its own index;
//! 3. drivers register handlers in a [`HandlerTable`] and configure their
//!    sources;
//! 4. the trap vector calls [`TrapEntry::handle`].

mod consts;
mod dispatch;
mod domain;
mod idc;
mod imsic;
mod layout;
mod source;
mod trap;
mod utils;
mod vaplic;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
mod arch;

pub use consts::*;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub use arch::{RiscvCsrs, RiscvImsicCsrs};
pub use dispatch::{CauseSource, HandlerTable, IrqController, IrqHandler, SourceSetup};
pub use domain::{identity_hart_to_idc, Aplic, AplicConfig, DeliveryMode, DomainCfg, HartToIdc};
pub use idc::{Claim, Idc};
pub use imsic::{Imsic, ImsicConfig, ImsicCsrs};
pub use layout::{verify_layout, AplicDomainRegs, AplicIdcRegs};
pub use source::SourceMode;
pub use trap::{classify, TrapCause, TrapCsrs, TrapEntry, TrapState};
pub use utils::{MmioRegs, RegisterIo};
pub use vaplic::{VAplic, VAPLIC_MAX_IDCS};
