//! Handler registration and the controller-independent dispatch path.

use core::sync::atomic::{AtomicPtr, Ordering};

use log::{debug, warn};

use crate::consts::IRQ_NUM;
use crate::idc::Claim;
use crate::source::SourceMode;

/// Handler function signature: receives the interrupt identity.
pub type IrqHandler = fn(u32);

/// One slot of the handler table: null or a valid [`IrqHandler`].
#[repr(transparent)]
struct HandlerSlot(AtomicPtr<()>);

impl HandlerSlot {
    const EMPTY: Self = Self(AtomicPtr::new(core::ptr::null_mut()));

    fn set(&self, handler: IrqHandler) {
        self.0.store(handler as *mut (), Ordering::Release);
    }

    fn clear(&self) {
        self.0.store(core::ptr::null_mut(), Ordering::Release);
    }

    fn get(&self) -> Option<IrqHandler> {
        let ptr = self.0.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        // SAFETY: `set` is the only writer of non-null values and it only
        // stores `IrqHandler` pointers.
        Some(unsafe { core::mem::transmute::<*mut (), IrqHandler>(ptr) })
    }
}

/// Interrupt identity → handler table.
///
/// Lock-free, so it can be read from trap context while another hart
/// registers handlers.
pub struct HandlerTable {
    slots: [HandlerSlot; IRQ_NUM],
}

impl HandlerTable {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const INIT: HandlerSlot = HandlerSlot::EMPTY;
        Self {
            slots: [INIT; IRQ_NUM],
        }
    }

    /// Registers `handler` for `id`, replacing any previous one.
    pub fn set_handler(&self, id: u32, handler: IrqHandler) {
        match self.slots.get(id as usize) {
            Some(slot) => slot.set(handler),
            None => warn!("irq: no handler slot for identity {id}"),
        }
    }

    pub fn clear_handler(&self, id: u32) {
        if let Some(slot) = self.slots.get(id as usize) {
            slot.clear();
        }
    }

    pub fn has_handler(&self, id: u32) -> bool {
        self.slots
            .get(id as usize)
            .is_some_and(|slot| slot.get().is_some())
    }

    /// Runs the handler registered for `id`. Unknown identities are dropped.
    pub fn dispatch(&self, id: u32) {
        match self.slots.get(id as usize).and_then(HandlerSlot::get) {
            Some(handler) => handler(id),
            None => debug!("irq: unhandled identity {id}"),
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// How a source is wired up by [`IrqController::configure_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSetup {
    pub mode: SourceMode,
    pub hart: usize,
    /// Priority with direct delivery, EIID when the domain sends MSIs.
    pub priority: u32,
}

/// Where the trap entry reads the interrupt cause from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseSource {
    /// `scause`, for platform-level controllers.
    Scause,
    /// `stopi`, for core-level controllers such as the IMSIC.
    Stopi,
}

/// The capability set shared by the controller variants.
///
/// The trap entry only depends on this trait.
pub trait IrqController {
    /// Global initialization, once, on the boot hart.
    fn init(&self);

    /// Per-hart initialization, on `hart` itself.
    fn init_hart(&self, hart: usize);

    fn configure_source(&self, id: u32, setup: SourceSetup);

    /// Claims the next interrupt for `hart`; identity 0 when none.
    fn claim(&self, hart: usize) -> Claim;

    fn cause_source(&self) -> CauseSource {
        CauseSource::Scause
    }

    /// Drains every eligible interrupt of `hart` in priority order.
    fn handle(&self, hart: usize, handlers: &HandlerTable) {
        loop {
            let claim = self.claim(hart);
            if claim.is_spurious() {
                break;
            }
            handlers.dispatch(claim.identity);
        }
    }
}
