//! Tessera memory core
//!
//! Три уровня / Three layers:
//!   pmm  — интерфейс физических страниц / physical page-run interface
//!   vmm  — таблицы страниц + page fault / page tables + page-fault decode
//!   heap — куча ядра (first-fit + split/merge) / kernel heap
//!
//! Крейт собирается как `no_std` для ядра и со `std` для тестов на хосте.
//! The crate builds as `no_std` for the kernel and with `std` for host tests.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod context;
pub mod error;
pub mod fault;
pub mod heap;
pub mod hw;
pub mod paging;
pub mod pmm;
pub mod vmm;

#[cfg(test)]
mod testing;

pub use context::{KernelMemory, MemoryInit, PagingReady};
pub use error::{HeapError, VmmError};
pub use fault::{FaultAction, FaultPolicy, InterruptController, InterruptFrame, PageFaultInfo};
pub use heap::{HeapConfig, LockedHeap, SlabHeap};
pub use hw::PagingHardware;
pub use paging::{PageDirectory, PageFlags};
pub use pmm::{FrameAllocator, PAGE_SIZE};
pub use vmm::{KernelRegion, Vmm, VmmConfig};

/// Физический адрес / Physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// Виртуальный адрес / Virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

impl PhysAddr {
    pub const fn new(addr: u64) -> Self { Self(addr) }
    pub const fn as_u64(self) -> u64   { self.0 }
    pub const fn is_null(self) -> bool { self.0 == 0 }

    /// Начало страницы, содержащей адрес.
    /// Start of the page containing this address.
    pub const fn page_base(self) -> Self { Self(self.0 & !PAGE_MASK) }
    pub const fn is_page_aligned(self) -> bool { self.0 & PAGE_MASK == 0 }
}

impl VirtAddr {
    pub const fn new(addr: u64) -> Self { Self(addr) }
    pub const fn as_u64(self) -> u64   { self.0 }
    pub const fn as_usize(self) -> usize { self.0 as usize }

    pub const fn page_base(self) -> Self { Self(self.0 & !PAGE_MASK) }
    pub const fn page_offset(self) -> u64 { self.0 & PAGE_MASK }
    pub const fn is_page_aligned(self) -> bool { self.0 & PAGE_MASK == 0 }

    pub fn as_mut_ptr<T>(self) -> *mut T { self.0 as *mut T }
}

impl core::fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl core::fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_base_truncates_to_containing_page() {
        assert_eq!(VirtAddr::new(0x1234).page_base(), VirtAddr::new(0x1000));
        assert_eq!(VirtAddr::new(0x1234).page_offset(), 0x234);
        assert_eq!(PhysAddr::new(0x5fff).page_base(), PhysAddr::new(0x5000));
        assert!(PhysAddr::new(0x5000).is_page_aligned());
        assert!(!VirtAddr::new(0x5001).is_page_aligned());
    }

    #[test]
    fn hex_formatting_uses_raw_value() {
        assert_eq!(format!("{:#x}", VirtAddr::new(0xdead_b000)), "0xdeadb000");
        assert_eq!(format!("{:x}", PhysAddr::new(0x1000)), "1000");
    }
}
