//! Supervisor trap entry: classify the cause, then drain the controller or
//! dispatch the local interrupt.
//!
//! The assembly vector that saves the interrupted context lives with the
//! platform; it calls [`TrapEntry::handle`] with the current hart index.

use core::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use crate::consts::*;
use crate::dispatch::{CauseSource, HandlerTable, IrqController};

/// Highest hart index the trap entry keeps state for, plus one.
pub const MAX_HARTS: usize = 64;

pub const IRQ_S_SOFT: usize = 1;
pub const IRQ_S_TIMER: usize = 5;
pub const IRQ_U_EXT: usize = 8;
pub const IRQ_S_EXT: usize = 9;

/// stopi/mtopi interrupt identity, bits 27:16.
pub const TOPI_IID_SHIFT: usize = 16;
const TOPI_IID_MASK: usize = 0xFFF;

const SCAUSE_INTERRUPT: usize = 1 << (usize::BITS - 1);

/// CSR accessors the trap entry needs from the architecture layer.
pub trait TrapCsrs {
    fn scause(&self) -> usize;
    /// `stopi`; only read for core-level controllers.
    fn stopi(&self) -> usize;
    /// Clears `sip.SSIP`, which no controller clears on its own.
    fn clear_soft_pending(&self);
    /// Sets or clears `sie.SEIE`.
    fn set_external_enabled(&self, enabled: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    /// Supervisor or user external interrupt, owned by the controller.
    External,
    /// Any other interrupt, with its cause code.
    Local(usize),
    /// Synchronous exception, with its cause code.
    Exception(usize),
}

pub fn classify(scause: usize) -> TrapCause {
    let code = scause & !SCAUSE_INTERRUPT;
    if scause & SCAUSE_INTERRUPT == 0 {
        return TrapCause::Exception(code);
    }
    if is_external(code) {
        TrapCause::External
    } else {
        TrapCause::Local(code)
    }
}

fn is_external(code: usize) -> bool {
    matches!(code, IRQ_S_EXT | IRQ_U_EXT)
}

/// Dispatch identity of a local interrupt cause.
fn local_irq_id(code: usize) -> Option<u32> {
    u32::try_from(code).ok()?.checked_add(LOCAL_IRQ_BASE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapState {
    Normal,
    InTrap,
}

pub struct TrapEntry<'a, C: IrqController, A: TrapCsrs> {
    controller: &'a C,
    handlers: &'a HandlerTable,
    csrs: &'a A,
    in_trap: [AtomicBool; MAX_HARTS],
}

impl<'a, C: IrqController, A: TrapCsrs> TrapEntry<'a, C, A> {
    pub fn new(controller: &'a C, handlers: &'a HandlerTable, csrs: &'a A) -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const NORMAL: AtomicBool = AtomicBool::new(false);
        Self {
            controller,
            handlers,
            csrs,
            in_trap: [NORMAL; MAX_HARTS],
        }
    }

    pub fn state(&self, hart: usize) -> TrapState {
        match self.in_trap.get(hart) {
            Some(flag) if flag.load(Ordering::Acquire) => TrapState::InTrap,
            _ => TrapState::Normal,
        }
    }

    /// Handles one asynchronous trap on `hart`.
    ///
    /// Nesting is not supported: a trap arriving while `hart` is still in
    /// here is dropped. Interrupts raised during the drain loop are picked up
    /// by that loop instead.
    pub fn handle(&self, hart: usize) {
        let Some(flag) = self.in_trap.get(hart) else {
            warn!("trap: hart {hart} out of range");
            return;
        };
        if flag.swap(true, Ordering::Acquire) {
            warn!("trap: nested trap on hart {hart} dropped");
            return;
        }

        match self.controller.cause_source() {
            CauseSource::Scause => self.handle_scause(hart),
            CauseSource::Stopi => self.handle_stopi(hart),
        }

        flag.store(false, Ordering::Release);
    }

    fn handle_scause(&self, hart: usize) {
        let scause = self.csrs.scause();
        match classify(scause) {
            TrapCause::External => self.controller.handle(hart, self.handlers),
            TrapCause::Local(code) => self.dispatch_local(code),
            TrapCause::Exception(code) => {
                warn!("trap: unexpected exception {code} on hart {hart}")
            }
        }
    }

    fn handle_stopi(&self, hart: usize) {
        let stopi = self.csrs.stopi();
        if stopi == 0 {
            return;
        }

        self.csrs.set_external_enabled(false);
        let iid = (stopi >> TOPI_IID_SHIFT) & TOPI_IID_MASK;
        if is_external(iid) {
            self.controller.handle(hart, self.handlers);
        } else {
            self.dispatch_local(iid);
        }
        self.csrs.set_external_enabled(true);
    }

    /// Dispatches a core-local cause. The software-interrupt pending bit is
    /// not cleared by any controller, so it is cleared here after an IPI.
    fn dispatch_local(&self, code: usize) {
        let Some(id) = local_irq_id(code) else {
            return;
        };
        self.handlers.dispatch(id);
        if id == IPI_IRQ_ID {
            self.csrs.clear_soft_pending();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::Mutex;

    use axaddrspace::GuestPhysAddr;
    use test_case::test_case;

    use super::*;
    use crate::dispatch::SourceSetup;
    use crate::domain::{Aplic, AplicConfig};
    use crate::idc::Claim;
    use crate::source::SourceMode;
    use crate::VAplic;

    #[derive(Default)]
    struct FakeCsrs {
        scause: Cell<usize>,
        stopi: Cell<usize>,
        soft_cleared: Cell<bool>,
        seie_toggles: Cell<usize>,
    }

    impl TrapCsrs for FakeCsrs {
        fn scause(&self) -> usize {
            self.scause.get()
        }

        fn stopi(&self) -> usize {
            self.stopi.get()
        }

        fn clear_soft_pending(&self) {
            self.soft_cleared.set(true);
        }

        fn set_external_enabled(&self, _enabled: bool) {
            self.seie_toggles.set(self.seie_toggles.get() + 1);
        }
    }

    /// Counts drain requests instead of talking to hardware.
    #[derive(Default)]
    struct CountingController {
        drains: Cell<usize>,
        core_level: bool,
    }

    impl IrqController for CountingController {
        fn init(&self) {}

        fn init_hart(&self, _hart: usize) {}

        fn configure_source(&self, _id: u32, _setup: SourceSetup) {}

        fn claim(&self, _hart: usize) -> Claim {
            Claim::NONE
        }

        fn cause_source(&self) -> CauseSource {
            if self.core_level {
                CauseSource::Stopi
            } else {
                CauseSource::Scause
            }
        }

        fn handle(&self, _hart: usize, _handlers: &HandlerTable) {
            self.drains.set(self.drains.get() + 1);
        }
    }

    #[test_case(SCAUSE_INTERRUPT | IRQ_S_EXT, TrapCause::External ; "supervisor external")]
    #[test_case(SCAUSE_INTERRUPT | IRQ_U_EXT, TrapCause::External ; "user external")]
    #[test_case(SCAUSE_INTERRUPT | IRQ_S_TIMER, TrapCause::Local(5) ; "timer")]
    #[test_case(SCAUSE_INTERRUPT | IRQ_S_SOFT, TrapCause::Local(1) ; "software")]
    #[test_case(13, TrapCause::Exception(13) ; "load page fault")]
    fn cause_classification(scause: usize, expected: TrapCause) {
        assert_eq!(classify(scause), expected);
    }

    #[test]
    fn external_cause_drains_controller() {
        let controller = CountingController::default();
        let csrs = FakeCsrs::default();
        csrs.scause.set(SCAUSE_INTERRUPT | IRQ_S_EXT);
        let handlers = HandlerTable::new();
        let entry = TrapEntry::new(&controller, &handlers, &csrs);

        entry.handle(0);

        assert_eq!(controller.drains.get(), 1);
        assert!(!csrs.soft_cleared.get());
        assert_eq!(entry.state(0), TrapState::Normal);
    }

    #[test]
    fn timer_cause_dispatches_local_id() {
        static SEEN: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn record(id: u32) {
            SEEN.lock().unwrap().push(id);
        }

        let controller = CountingController::default();
        let csrs = FakeCsrs::default();
        csrs.scause.set(SCAUSE_INTERRUPT | IRQ_S_TIMER);
        let handlers = HandlerTable::new();
        handlers.set_handler(TIMER_IRQ_ID, record);
        let entry = TrapEntry::new(&controller, &handlers, &csrs);

        entry.handle(1);

        assert_eq!(*SEEN.lock().unwrap(), vec![TIMER_IRQ_ID]);
        assert_eq!(controller.drains.get(), 0);
        assert!(!csrs.soft_cleared.get());
    }

    #[test]
    fn ipi_cause_clears_soft_pending() {
        static SEEN: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn record(id: u32) {
            SEEN.lock().unwrap().push(id);
        }

        let controller = CountingController::default();
        let csrs = FakeCsrs::default();
        csrs.scause.set(SCAUSE_INTERRUPT | IRQ_S_SOFT);
        let handlers = HandlerTable::new();
        handlers.set_handler(IPI_IRQ_ID, record);
        let entry = TrapEntry::new(&controller, &handlers, &csrs);

        entry.handle(0);

        assert_eq!(*SEEN.lock().unwrap(), vec![IPI_IRQ_ID]);
        assert!(csrs.soft_cleared.get());
    }

    #[test]
    fn exception_is_dropped() {
        let controller = CountingController::default();
        let csrs = FakeCsrs::default();
        csrs.scause.set(2);
        let handlers = HandlerTable::new();
        let entry = TrapEntry::new(&controller, &handlers, &csrs);

        entry.handle(0);

        assert_eq!(controller.drains.get(), 0);
        assert!(!csrs.soft_cleared.get());
    }

    #[test]
    fn nested_trap_is_refused() {
        let controller = CountingController::default();
        let csrs = FakeCsrs::default();
        csrs.scause.set(SCAUSE_INTERRUPT | IRQ_S_EXT);
        let handlers = HandlerTable::new();
        let entry = TrapEntry::new(&controller, &handlers, &csrs);

        entry.in_trap[2].store(true, Ordering::Release);
        assert_eq!(entry.state(2), TrapState::InTrap);
        entry.handle(2);
        assert_eq!(controller.drains.get(), 0);

        entry.handle(MAX_HARTS);
        assert_eq!(controller.drains.get(), 0);
    }

    #[test]
    fn core_level_cause_uses_stopi() {
        static SEEN: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn record(id: u32) {
            SEEN.lock().unwrap().push(id);
        }

        let controller = CountingController {
            core_level: true,
            ..Default::default()
        };
        let csrs = FakeCsrs::default();
        let handlers = HandlerTable::new();
        handlers.set_handler(TIMER_IRQ_ID, record);
        handlers.set_handler(IPI_IRQ_ID, record);
        let entry = TrapEntry::new(&controller, &handlers, &csrs);

        // Nothing pending: SEIE untouched.
        entry.handle(0);
        assert_eq!(csrs.seie_toggles.get(), 0);

        csrs.stopi.set(IRQ_S_EXT << TOPI_IID_SHIFT);
        entry.handle(0);
        assert_eq!(controller.drains.get(), 1);
        assert_eq!(csrs.seie_toggles.get(), 2);

        csrs.stopi.set(IRQ_S_TIMER << TOPI_IID_SHIFT);
        entry.handle(0);
        assert_eq!(*SEEN.lock().unwrap(), vec![TIMER_IRQ_ID]);
        assert!(!csrs.soft_cleared.get());

        csrs.stopi.set(IRQ_S_SOFT << TOPI_IID_SHIFT);
        entry.handle(0);
        assert_eq!(*SEEN.lock().unwrap(), vec![TIMER_IRQ_ID, IPI_IRQ_ID]);
        assert!(csrs.soft_cleared.get());
        assert_eq!(csrs.seie_toggles.get(), 6);
    }

    #[test]
    fn trap_drains_aplic_in_priority_order() {
        static ORDER: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn record(id: u32) {
            ORDER.lock().unwrap().push(id);
        }

        let dev = VAplic::new(GuestPhysAddr::from_usize(0xd00_0000), 32, 2).unwrap();
        let aplic = Aplic::new(
            &dev,
            AplicConfig {
                num_sources: 32,
                num_idcs: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let handlers = HandlerTable::new();
        let csrs = FakeCsrs::default();
        csrs.scause.set(SCAUSE_INTERRUPT | IRQ_S_EXT);

        aplic.init();
        aplic.init_hart(0);
        for (id, priority) in [(7, 9), (3, 2)] {
            aplic.configure_source(
                id,
                SourceSetup {
                    mode: SourceMode::EdgeRise,
                    hart: 0,
                    priority,
                },
            );
            handlers.set_handler(id, record);
            aplic.set_pending(id);
        }

        TrapEntry::new(&aplic, &handlers, &csrs).handle(0);

        assert_eq!(*ORDER.lock().unwrap(), vec![3, 7]);
        assert!(!aplic.is_pending(3));
        assert!(!aplic.is_pending(7));
    }
}
