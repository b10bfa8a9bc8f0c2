//! Таблица блоков кучи / Heap block table
//!
//! Заголовки блоков хранятся не внутри кучи, а в отдельном массиве слотов
//! на страницах PMM; кольцо связано индексами `prev`/`next`. Когда слоты
//! кончаются, массив переезжает в run вдвое большего размера.
//! Block headers live in a slot array on their own PMM pages instead of in
//! front of the payload; the ring is linked through `prev`/`next` slot
//! indices. When the slots run out the array moves to a run twice the size.
//! The bytes in front of every payload are still reserved (`HEADER_SIZE`), so
//! the heap's byte accounting is that of an intrusive header.

use core::mem::size_of;
use core::ptr::{self, NonNull};
use core::slice;

use crate::pmm::{FrameAllocator, PAGE_SIZE};
use crate::{PhysAddr, VirtAddr};

/// Состояние блока / Block state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BlockState {
    Used   = 0x00,
    Unused = 0x01,
}

/// Заголовок блока / Block header
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BlockHeader {
    pub state: BlockState,
    /// Длина без заголовка / Payload length, header excluded.
    pub len:   usize,
    pub next:  usize,
    pub prev:  usize,
}

/// Байт, зарезервированных перед каждым payload.
/// Bytes reserved in front of every payload.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Индекс слота / Slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(usize);

#[derive(Clone, Copy)]
struct Slot {
    occupied: bool,
    /// Адрес заголовка / Address of the header bytes.
    start:    VirtAddr,
    header:   BlockHeader,
}

impl Slot {
    const VACANT: Self = Self {
        occupied: false,
        start:    VirtAddr::new(0),
        header:   BlockHeader { state: BlockState::Unused, len: 0, next: 0, prev: 0 },
    };
}

/// Слотов на одной странице / Slots per page of table storage.
pub const SLOTS_PER_PAGE: usize = PAGE_SIZE / size_of::<Slot>();

pub struct BlockTable {
    slots:       NonNull<Slot>,
    capacity:    usize,
    /// Run страниц под слотами / Page run holding the slots.
    phys:        PhysAddr,
    pages:       usize,
    phys_offset: u64,
    live:        usize,
}

// SAFETY: the table is the only owner of its page run; nothing else holds a
// pointer into it.
unsafe impl Send for BlockTable {}

impl BlockTable {
    /// Одна страница слотов / One page worth of slots.
    pub fn new<P: FrameAllocator + ?Sized>(frames: &mut P, phys_offset: u64) -> Option<Self> {
        let phys = frames.allocate_pages(1)?;
        let Some(slots) = Self::slots_at(phys, phys_offset) else {
            frames.free_pages(phys, 1);
            return None;
        };
        // SAFETY: a fresh page from the PMM holds `SLOTS_PER_PAGE` slots.
        unsafe { Self::format(slots, 0, SLOTS_PER_PAGE) };
        Some(Self { slots, capacity: SLOTS_PER_PAGE, phys, pages: 1, phys_offset, live: 0 })
    }

    pub fn live(&self) -> usize { self.live }
    pub fn capacity(&self) -> usize { self.capacity }
    pub fn pages(&self) -> usize { self.pages }
    pub fn is_full(&self) -> bool { self.live == self.capacity }

    /// Переехать в run вдвое большего размера; старый run уходит в PMM.
    /// Move into a run twice the size and hand the old run back to the PMM.
    ///
    /// Индексы слотов не меняются / Slot indices are preserved.
    pub fn grow<P: FrameAllocator + ?Sized>(&mut self, frames: &mut P) -> bool {
        let Some(pages) = self.pages.checked_mul(2) else {
            return false;
        };
        let Some(phys) = frames.allocate_pages(pages) else {
            log::warn!("heap: PMM refused {} pages for the block table", pages);
            return false;
        };
        let Some(slots) = Self::slots_at(phys, self.phys_offset) else {
            frames.free_pages(phys, pages);
            return false;
        };
        let capacity = pages * SLOTS_PER_PAGE;

        // SAFETY: the new run was just handed over by the PMM, so it is
        // exclusively ours and disjoint from the old one. It holds
        // `capacity` slots, more than the `self.capacity` being copied.
        unsafe {
            ptr::copy_nonoverlapping(self.slots.as_ptr(), slots.as_ptr(), self.capacity);
            Self::format(slots, self.capacity, capacity);
        }

        frames.free_pages(self.phys, self.pages);
        log::debug!("heap: block table {} -> {} slots at {:#x}", self.capacity, capacity, phys);

        self.slots = slots;
        self.capacity = capacity;
        self.phys = phys;
        self.pages = pages;
        true
    }

    /// Вернуть страницы таблицы / Hand the table's pages back.
    pub fn release<P: FrameAllocator + ?Sized>(self, frames: &mut P) {
        frames.free_pages(self.phys, self.pages);
    }

    /// Первый блок: кольцо из одного узла.
    /// First block: a ring of one node.
    pub fn init_ring(&mut self, start: VirtAddr, len: usize) -> Option<BlockId> {
        let i = self.vacant()?;
        self.slots_mut()[i] = Slot {
            occupied: true,
            start,
            header: BlockHeader { state: BlockState::Unused, len, next: i, prev: i },
        };
        self.live += 1;
        Some(BlockId(i))
    }

    /// Вставить новый UNUSED блок сразу после `prev`.
    /// Splice a new UNUSED block in right after `prev`.
    pub fn insert_after(&mut self, prev: BlockId, start: VirtAddr, len: usize) -> Option<BlockId> {
        let i = self.vacant()?;
        let slots = self.slots_mut();
        let next = slots[prev.0].header.next;
        slots[i] = Slot {
            occupied: true,
            start,
            header: BlockHeader { state: BlockState::Unused, len, next, prev: prev.0 },
        };
        slots[next].header.prev = i;
        slots[prev.0].header.next = i;
        self.live += 1;
        Some(BlockId(i))
    }

    /// Выкинуть узел из кольца и освободить слот.
    /// Unlink a node from the ring and release its slot.
    pub fn unlink(&mut self, id: BlockId) {
        let slots = self.slots_mut();
        let BlockHeader { next, prev, .. } = slots[id.0].header;
        slots[prev].header.next = next;
        slots[next].header.prev = prev;
        slots[id.0] = Slot::VACANT;
        self.live -= 1;
    }

    pub fn next(&self, id: BlockId) -> BlockId { BlockId(self.slots()[id.0].header.next) }
    pub fn prev(&self, id: BlockId) -> BlockId { BlockId(self.slots()[id.0].header.prev) }

    pub fn state(&self, id: BlockId) -> BlockState { self.slots()[id.0].header.state }
    pub fn set_state(&mut self, id: BlockId, state: BlockState) { self.slots_mut()[id.0].header.state = state; }

    pub fn len(&self, id: BlockId) -> usize { self.slots()[id.0].header.len }
    pub fn set_len(&mut self, id: BlockId, len: usize) { self.slots_mut()[id.0].header.len = len; }

    pub fn start(&self, id: BlockId) -> VirtAddr { self.slots()[id.0].start }

    pub fn payload(&self, id: BlockId) -> VirtAddr {
        VirtAddr::new(self.start(id).as_u64() + HEADER_SIZE as u64)
    }

    /// Первый байт после payload / First byte past the payload.
    pub fn end(&self, id: BlockId) -> VirtAddr {
        VirtAddr::new(self.payload(id).as_u64() + self.len(id) as u64)
    }

    /// Поиск занятого слота по предикату / Find an occupied slot by predicate.
    pub fn find(&self, mut pred: impl FnMut(BlockId) -> bool) -> Option<BlockId> {
        self.slots()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupied)
            .map(|(i, _)| BlockId(i))
            .find(|&id| pred(id))
    }

    fn vacant(&self) -> Option<usize> {
        self.slots().iter().position(|s| !s.occupied)
    }

    /// Записать пустые слоты `[from, to)` / Write vacant slots over `[from, to)`.
    ///
    /// # Safety
    /// `slots` must point at writable storage for at least `to` slots.
    unsafe fn format(slots: NonNull<Slot>, from: usize, to: usize) {
        for i in from..to {
            // SAFETY: in bounds per the caller's contract.
            unsafe { slots.as_ptr().add(i).write(Slot::VACANT) };
        }
    }

    fn slots_at(phys: PhysAddr, phys_offset: u64) -> Option<NonNull<Slot>> {
        NonNull::new((phys.as_u64() + phys_offset) as *mut Slot)
    }

    fn slots(&self) -> &[Slot] {
        // SAFETY: `slots` points at `capacity` initialised slots on pages
        // this table owns.
        unsafe { slice::from_raw_parts(self.slots.as_ptr(), self.capacity) }
    }

    fn slots_mut(&mut self) -> &mut [Slot] {
        // SAFETY: as in `slots`, and `&mut self` makes the access unique.
        unsafe { slice::from_raw_parts_mut(self.slots.as_ptr(), self.capacity) }
    }
}
