//! x86_64 Page Tables (4-level paging)
//!
//! Структура: PML4 → PDPT → PD → PT → физический адрес
//! Structure:  PML4 → PDPT → PD → PT → physical address
//!
//! «Каталог» (directory) — корневая таблица PML4, «таблицы» — все уровни ниже.
//! The "directory" is the root PML4 table; "tables" are every level below it.

use core::ops::{Index, IndexMut};

use bitflags::bitflags;
use super::{PhysAddr, VirtAddr};

bitflags! {
    /// Флаги страницы / Page flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        /// 2 MiB (PD) или 1 GiB (PDPT) страница / 2 MiB or 1 GiB page
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
        const NO_EXEC       = 1 << 63;
    }
}

impl PageFlags {
    /// Present + writable + kernel-only: every kernel-region entry carries these.
    pub const KERNEL_DATA: Self = Self::PRESENT.union(Self::WRITABLE);
}

/// Биты физического адреса в записи / Physical address bits of an entry
pub const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Записей в таблице / Entries per table
pub const ENTRY_COUNT: usize = 512;

/// Запись таблицы страниц / Page table entry
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    pub const fn empty() -> Self { Self(0) }

    pub const fn new(addr: PhysAddr, flags: PageFlags) -> Self {
        Self((addr.as_u64() & ADDR_MASK) | flags.bits())
    }

    pub const fn is_present(self) -> bool { self.0 & PageFlags::PRESENT.bits() != 0 }
    pub const fn is_empty(self) -> bool   { self.0 == 0 }
    pub const fn is_huge(self) -> bool    { self.0 & PageFlags::HUGE.bits() != 0 }

    pub const fn addr(self) -> PhysAddr { PhysAddr::new(self.0 & ADDR_MASK) }
    pub const fn flags(self) -> PageFlags { PageFlags::from_bits_truncate(self.0 & !ADDR_MASK) }
    pub const fn bits(self) -> u64 { self.0 }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("flags", &self.flags())
            .finish()
    }
}

/// Одна таблица любого уровня (4 KiB) / One table of any level (4 KiB)
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRY_COUNT],
}

impl PageTable {
    pub const fn new() -> Self {
        Self { entries: [PageTableEntry::empty(); ENTRY_COUNT] }
    }

    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::empty());
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }

    /// Число присутствующих записей / Number of present entries.
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }
}

impl Default for PageTable {
    fn default() -> Self { Self::new() }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, i: usize) -> &PageTableEntry { &self.entries[i] }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, i: usize) -> &mut PageTableEntry { &mut self.entries[i] }
}

/// Уровень таблицы / Table level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Pml4,
    Pdpt,
    Pd,
    Pt,
}

impl Level {
    const fn shift(self) -> u32 {
        match self {
            Level::Pml4 => 39,
            Level::Pdpt => 30,
            Level::Pd   => 21,
            Level::Pt   => 12,
        }
    }

    /// Индекс записи для `virt` на этом уровне.
    /// Entry index for `virt` at this level.
    pub const fn index(self, virt: VirtAddr) -> usize {
        ((virt.as_u64() >> self.shift()) & (ENTRY_COUNT as u64 - 1)) as usize
    }

    /// Bytes covered by one entry at this level.
    pub const fn span(self) -> u64 {
        1 << self.shift()
    }
}

/// Корень адресного пространства / Address-space root
///
/// Физический адрес таблицы PML4; то, что загружается в CR3.
/// Physical address of the PML4 table; what gets loaded into CR3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDirectory(PhysAddr);

impl PageDirectory {
    pub const fn from_root(root: PhysAddr) -> Self { Self(root) }
    pub const fn root(self) -> PhysAddr { self.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_keeps_address_and_flags_apart() {
        let e = PageTableEntry::new(PhysAddr::new(0x1234_5000), PageFlags::KERNEL_DATA);
        assert!(e.is_present());
        assert!(!e.is_huge());
        assert_eq!(e.addr(), PhysAddr::new(0x1234_5000));
        assert_eq!(e.flags(), PageFlags::PRESENT | PageFlags::WRITABLE);
        assert!(!e.flags().contains(PageFlags::USER));
    }

    #[test]
    fn entry_drops_low_address_bits() {
        let e = PageTableEntry::new(PhysAddr::new(0x2fff), PageFlags::PRESENT);
        assert_eq!(e.addr(), PhysAddr::new(0x2000));
    }

    #[test]
    fn no_exec_survives_round_trip() {
        let e = PageTableEntry::new(PhysAddr::new(0x3000), PageFlags::PRESENT | PageFlags::NO_EXEC);
        assert!(e.flags().contains(PageFlags::NO_EXEC));
        assert_eq!(e.addr(), PhysAddr::new(0x3000));
    }

    #[test]
    fn level_indices() {
        // 0xffff_8000_4020_3000: PML4 256, PDPT 1, PD 1, PT 3
        let v = VirtAddr::new(0xffff_8000_4020_3000);
        assert_eq!(Level::Pml4.index(v), 256);
        assert_eq!(Level::Pdpt.index(v), 1);
        assert_eq!(Level::Pd.index(v), 1);
        assert_eq!(Level::Pt.index(v), 3);
    }

    #[test]
    fn table_is_one_page() {
        assert_eq!(core::mem::size_of::<PageTable>(), crate::PAGE_SIZE);
        assert_eq!(core::mem::align_of::<PageTable>(), crate::PAGE_SIZE);
        let mut t = PageTable::new();
        t[7] = PageTableEntry::new(PhysAddr::new(0x7000), PageFlags::PRESENT);
        assert_eq!(t.present_count(), 1);
        t.zero();
        assert_eq!(t.present_count(), 0);
    }
}
