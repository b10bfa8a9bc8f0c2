//! x86_64 регистры страничной адресации / x86_64 paging registers
//!
//!   CR2 — адрес page fault / faulting address
//!   CR3 — корень PML4 / PML4 root
//!   CR0.PG (бит 31) — paging включён / paging enabled
//!   invlpg — сброс одной записи TLB / drop one TLB entry

use core::arch::asm;

use tessera_mm::paging::ADDR_MASK;
use tessera_mm::{PagingHardware, PhysAddr, VirtAddr};

const CR0_PG: u64 = 1 << 31;

#[derive(Debug, Default, Clone, Copy)]
pub struct X86Paging;

impl X86Paging {
    fn read_cr0() -> u64 {
        let cr0: u64;
        // SAFETY: reading CR0 has no side effects.
        unsafe { asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack)) };
        cr0
    }
}

impl PagingHardware for X86Paging {
    fn read_fault_address(&self) -> VirtAddr {
        let cr2: u64;
        // SAFETY: reading CR2 has no side effects.
        unsafe { asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack)) };
        VirtAddr::new(cr2)
    }

    fn translation_root(&self) -> PhysAddr {
        let cr3: u64;
        // SAFETY: reading CR3 has no side effects.
        unsafe { asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack)) };
        PhysAddr::new(cr3 & ADDR_MASK)
    }

    fn load_translation_root(&mut self, root: PhysAddr) {
        // SAFETY: the VMM only passes roots that map the running kernel
        // (image, stack and direct map).
        unsafe { asm!("mov cr3, {}", in(reg) root.as_u64(), options(nostack)) };
    }

    fn paging_enabled(&self) -> bool {
        Self::read_cr0() & CR0_PG != 0
    }

    /// В long mode снять PG нельзя (#GP), поэтому выключение игнорируется.
    /// Long mode cannot clear PG (#GP), so turning it off is ignored.
    fn set_paging_enabled(&mut self, enabled: bool) {
        if !enabled {
            log::warn!("paging: cannot leave long mode, CR0.PG stays set");
            return;
        }
        let cr0 = Self::read_cr0() | CR0_PG;
        // SAFETY: only PG is touched, and it is already set in long mode.
        unsafe { asm!("mov cr0, {}", in(reg) cr0, options(nostack)) };
    }

    fn invalidate(&mut self, virt: VirtAddr) {
        // SAFETY: invlpg only drops a cached translation.
        unsafe { asm!("invlpg [{}]", in(reg) virt.as_u64(), options(nostack)) };
    }
}
