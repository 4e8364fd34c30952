use axaddrspace::{device::AccessWidth, HostVirtAddr};

/// 32-bit register access relative to the start of a register window.
///
/// The driver never touches memory directly; it goes through this seam so the
/// same code can run against real MMIO or against [`crate::VAplic`].
pub trait RegisterIo {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, val: u32);
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    #[inline]
    fn write(&self, offset: usize, val: u32) {
        (**self).write(offset, val)
    }
}

/// A memory-mapped register window, already mapped into the host address space.
#[derive(Debug, Clone, Copy)]
pub struct MmioRegs {
    base: HostVirtAddr,
}

impl MmioRegs {
    /// # Safety
    ///
    /// `base` must be the mapped, device-memory view of the register window and
    /// stay valid for as long as the returned value is used.
    pub const unsafe fn new(base: HostVirtAddr) -> Self {
        Self { base }
    }

    pub fn base(&self) -> HostVirtAddr {
        self.base
    }
}

impl RegisterIo for MmioRegs {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        perform_mmio_read(self.base + offset, AccessWidth::Dword) as u32
    }

    #[inline]
    fn write(&self, offset: usize, val: u32) {
        perform_mmio_write(self.base + offset, AccessWidth::Dword, val as usize)
    }
}

pub(crate) fn perform_mmio_read(addr: HostVirtAddr, width: AccessWidth) -> usize {
    let addr = addr.as_ptr();

    match width {
        AccessWidth::Byte => unsafe { addr.read_volatile() as _ },
        AccessWidth::Word => unsafe { (addr as *const u16).read_volatile() as _ },
        AccessWidth::Dword => unsafe { (addr as *const u32).read_volatile() as _ },
        AccessWidth::Qword => unsafe { (addr as *const u64).read_volatile() as _ },
    }
}

pub(crate) fn perform_mmio_write(addr: HostVirtAddr, width: AccessWidth, val: usize) {
    let addr = addr.as_mut_ptr();

    match width {
        AccessWidth::Byte => unsafe {
            addr.write_volatile(val as _);
        },
        AccessWidth::Word => unsafe {
            (addr as *mut u16).write_volatile(val as _);
        },
        AccessWidth::Dword => unsafe {
            (addr as *mut u32).write_volatile(val as _);
        },
        AccessWidth::Qword => unsafe {
            (addr as *mut u64).write_volatile(val as _);
        },
    }
}
