//! Аппаратура страничной адресации / Paging hardware
//!
//! Всё, что VMM делает с регистрами процессора, идёт через этот трейт.
//! Everything the VMM does to CPU registers goes through this trait:
//! on x86_64 that is CR2 (fault address), CR3 (translation root), CR0.PG
//! and `invlpg`. Tests substitute an in-memory fake.

use super::{PhysAddr, VirtAddr};

pub trait PagingHardware {
    /// Адрес, вызвавший page fault (CR2).
    /// Address that caused the last page fault (CR2).
    fn read_fault_address(&self) -> VirtAddr;

    /// Текущий корень трансляции (CR3) / Current translation root.
    fn translation_root(&self) -> PhysAddr;

    /// Загрузить корень (CR3 / TTBR0 / SATP).
    /// Load a translation root (CR3 / TTBR0 / SATP).
    fn load_translation_root(&mut self, root: PhysAddr);

    fn paging_enabled(&self) -> bool;

    /// Read-modify-write of the paging-enable control bit.
    fn set_paging_enabled(&mut self, enabled: bool);

    /// Сбросить закешированную трансляцию (TLB) для `virt`.
    /// Drop any cached translation for `virt`.
    fn invalidate(&mut self, virt: VirtAddr);
}
