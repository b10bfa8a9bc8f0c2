//! Куча ядра / Kernel heap
//!
//! First-fit по кольцу блоков, деление больших блоков и слияние соседей по
//! адресу при освобождении. Память берётся у PMM страницами и назад не отдаётся:
//! `total` только растёт.
//!
//! First-fit over a ring of blocks, splitting large blocks on allocation and
//! merging address neighbours on free. Memory comes from the PMM in page runs and is
//! never handed back, so `total` only grows.
//!
//! Учёт / Accounting:
//!   total = Σ (HEADER_SIZE + len) по всем блокам / over all blocks
//!   free  = Σ len по UNUSED блокам / over UNUSED blocks

mod block;
mod global;

pub use block::{BlockHeader, BlockState, HEADER_SIZE, SLOTS_PER_PAGE};
pub use global::LockedHeap;

use block::{BlockId, BlockTable};

use crate::error::{HeapError, HeapResult};
use crate::pmm::{pages_for, FrameAllocator, PAGE_SIZE};
use crate::VirtAddr;

/// Минимальный payload блока / Smallest payload a block is given.
pub const MIN_PAYLOAD: usize = 0xFF;

/// Потолок роста кучи / Heap growth ceiling (4 MiB).
pub const MAX_HEAP_SIZE: usize = 0x40_0000;

// ── Конфигурация / Configuration ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub min_payload: usize,
    /// Предел `total` в байтах / Upper bound on `total`, in bytes.
    pub max_size:    usize,
    /// Смещение прямого отображения / Direct-map offset for PMM pages.
    pub phys_offset: u64,
}

impl HeapConfig {
    pub const DEFAULT: Self = Self {
        min_payload: MIN_PAYLOAD,
        max_size:    MAX_HEAP_SIZE,
        phys_offset: 0,
    };

    pub const fn with_phys_offset(self, phys_offset: u64) -> Self {
        Self { phys_offset, ..self }
    }
}

impl Default for HeapConfig {
    fn default() -> Self { Self::DEFAULT }
}

// ── Статистика / Statistics ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub total:       usize,
    pub free:        usize,
    pub blocks:      usize,
    pub used_blocks: usize,
}

/// Снимок одного блока / Snapshot of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub start:   VirtAddr,
    pub payload: VirtAddr,
    pub len:     usize,
    pub state:   BlockState,
}

// ── Куча / Heap ───────────────────────────────────────────────────────────────

pub struct SlabHeap<P: FrameAllocator> {
    pages:  P,
    config: HeapConfig,
    /// Заголовки на своих страницах / Headers, on pages of their own.
    table:  BlockTable,
    /// Начало обхода first-fit / Where first-fit scans start.
    head:   BlockId,
    total:  usize,
    free:   usize,
}

impl<P: FrameAllocator> SlabHeap<P> {
    /// Одна страница из PMM → один UNUSED блок.
    /// One PMM page becomes a single UNUSED block.
    ///
    /// Страница таблицы блоков берётся первой, чтобы страницы кучи шли подряд.
    /// The block-table page is taken first so heap pages can follow on.
    pub fn init(mut pages: P, config: HeapConfig) -> HeapResult<Self> {
        let mut table = BlockTable::new(&mut pages, config.phys_offset).ok_or(HeapError::InitExhausted)?;
        let Some(phys) = pages.allocate_pages(1) else {
            table.release(&mut pages);
            return Err(HeapError::InitExhausted);
        };
        let start = VirtAddr::new(phys.as_u64() + config.phys_offset);

        let len = PAGE_SIZE - HEADER_SIZE;
        let Some(head) = table.init_ring(start, len) else {
            table.release(&mut pages);
            pages.free_pages(phys, 1);
            return Err(HeapError::InitExhausted);
        };

        log::info!("heap: {} bytes at {:#x}, limit {} bytes", PAGE_SIZE, start, config.max_size);

        Ok(Self { pages, config, table, head, total: PAGE_SIZE, free: len })
    }

    /// Выделить `bytes` байт (не меньше `min_payload`).
    /// Allocate `bytes` bytes, rounded up to `min_payload`.
    pub fn alloc(&mut self, bytes: usize) -> HeapResult<VirtAddr> {
        let len = bytes.max(self.config.min_payload);

        let id = match self.first_fit(len) {
            Some(id) => id,
            None     => self.grow(len)?,
        };

        self.split(id, len);
        self.table.set_state(id, BlockState::Used);
        self.free -= self.table.len(id);

        let payload = self.table.payload(id);
        log::trace!("heap: alloc {} -> {:#x} ({} bytes)", bytes, payload, self.table.len(id));
        Ok(payload)
    }

    /// Освободить блок по адресу его payload.
    /// Release the block whose payload starts at `addr`.
    pub fn free(&mut self, addr: VirtAddr) -> HeapResult<()> {
        let id = self
            .table
            .find(|id| self.table.payload(id) == addr)
            .filter(|&id| self.table.state(id) == BlockState::Used)
            .ok_or_else(|| {
                log::error!("heap: invalid free of {:#x}", addr);
                HeapError::InvalidFree(addr)
            })?;

        self.table.set_state(id, BlockState::Unused);
        self.free += self.table.len(id);
        log::trace!("heap: free {:#x} ({} bytes)", addr, self.table.len(id));

        // Соседи по адресу, а не по кольцу: run из PMM может лечь ниже
        // уже имеющихся.
        // Neighbours by address, not by ring position: a PMM run may land
        // below the ones already in the ring.
        let end = self.table.end(id);
        if let Some(next) = self.table.find(|b| self.table.start(b) == end) {
            if self.mergeable(id, next) {
                self.absorb(id, next);
            }
        }
        let start = self.table.start(id);
        if let Some(prev) = self.table.find(|b| self.table.end(b) == start) {
            if self.mergeable(prev, id) {
                self.absorb(prev, id);
            }
        }
        Ok(())
    }

    pub fn total(&self) -> usize { self.total }
    pub fn free_bytes(&self) -> usize { self.free }
    pub fn block_count(&self) -> usize { self.table.live() }
    /// Слотов до следующего роста таблицы / Slots before the table grows.
    pub fn block_capacity(&self) -> usize { self.table.capacity() }
    pub fn config(&self) -> &HeapConfig { &self.config }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            total:       self.total,
            free:        self.free,
            blocks:      self.table.live(),
            used_blocks: self.blocks().filter(|b| b.state == BlockState::Used).count(),
        }
    }

    /// Обход кольца от головы / Walk the ring from its head.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks { table: &self.table, at: self.head, left: self.table.live() }
    }

    /// Payload занятого блока, содержащего `addr`.
    /// Payload of the USED block whose bytes contain `addr`.
    pub fn owner_of(&self, addr: VirtAddr) -> Option<VirtAddr> {
        self.table
            .find(|id| {
                self.table.state(id) == BlockState::Used
                    && self.table.payload(id) <= addr
                    && addr < self.table.end(id)
            })
            .map(|id| self.table.payload(id))
    }

    pub fn source_mut(&mut self) -> &mut P { &mut self.pages }

    // ── Внутреннее / Internals ────────────────────────────────────────────────

    fn first_fit(&self, len: usize) -> Option<BlockId> {
        let mut id = self.head;
        for _ in 0..self.table.live() {
            if self.table.state(id) == BlockState::Unused && self.table.len(id) >= len {
                return Some(id);
            }
            id = self.table.next(id);
        }
        None
    }

    /// Новый run страниц из PMM, вставленный в хвост кольца.
    /// Take a fresh page run from the PMM and append it at the ring's tail.
    ///
    /// Все проверки идут до запроса к PMM, чтобы отказ не терял страниц.
    /// All checks run before asking the PMM so a refusal leaks no pages.
    fn grow(&mut self, len: usize) -> HeapResult<BlockId> {
        let bytes = HEADER_SIZE
            .checked_add(len)
            .and_then(|need| pages_for(need).checked_mul(PAGE_SIZE))
            .ok_or(HeapError::Exhausted { bytes: len })?;
        let pages = bytes / PAGE_SIZE;

        let total = self.total.saturating_add(bytes);
        if total > self.config.max_size {
            log::warn!("heap: growth to {} bytes refused, limit {}", total, self.config.max_size);
            return Err(HeapError::LimitReached { total, limit: self.config.max_size });
        }
        if !self.reserve_slot() {
            return Err(HeapError::Exhausted { bytes });
        }

        let phys = self.pages.allocate_pages(pages).ok_or_else(|| {
            log::warn!("heap: PMM refused {} pages", pages);
            HeapError::Exhausted { bytes }
        })?;
        let start = VirtAddr::new(phys.as_u64() + self.config.phys_offset);

        let tail = self.table.prev(self.head);
        let Some(id) = self.table.insert_after(tail, start, bytes - HEADER_SIZE) else {
            self.pages.free_pages(phys, pages);
            return Err(HeapError::Exhausted { bytes });
        };

        self.total += bytes;
        self.free += bytes - HEADER_SIZE;
        log::debug!("heap: grew by {} pages at {:#x}, total {}", pages, start, self.total);
        Ok(id)
    }

    /// Отрезать хвост, если он вмещает заголовок и минимальный payload.
    /// Cut off the tail when it can hold a header plus a minimum payload.
    fn split(&mut self, id: BlockId, len: usize) {
        let have = self.table.len(id);
        if have - len <= HEADER_SIZE + self.config.min_payload {
            return;
        }
        if !self.reserve_slot() {
            log::trace!("heap: no block slot, {} bytes handed out whole", have);
            return;
        }
        let start = VirtAddr::new(self.table.payload(id).as_u64() + len as u64);
        if self.table.insert_after(id, start, have - len - HEADER_SIZE).is_some() {
            self.table.set_len(id, len);
            self.free -= HEADER_SIZE;
        }
    }

    /// Свободный слот есть или таблица выросла.
    /// A vacant slot exists, or the table grew to make one.
    fn reserve_slot(&mut self) -> bool {
        !self.table.is_full() || self.table.grow(&mut self.pages)
    }

    /// Оба UNUSED и `b` лежит сразу за `a` в памяти.
    /// Both UNUSED and `b` starts right where `a` ends.
    fn mergeable(&self, a: BlockId, b: BlockId) -> bool {
        a != b
            && self.table.state(a) == BlockState::Unused
            && self.table.state(b) == BlockState::Unused
            && self.table.end(a) == self.table.start(b)
    }

    fn absorb(&mut self, into: BlockId, victim: BlockId) {
        let len = self.table.len(into) + HEADER_SIZE + self.table.len(victim);
        self.table.set_len(into, len);
        if self.head == victim {
            self.head = into;
        }
        self.table.unlink(victim);
        self.free += HEADER_SIZE;
    }
}

/// Итератор по кольцу / Ring iterator
pub struct Blocks<'a> {
    table: &'a BlockTable,
    at:    BlockId,
    left:  usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        let id = self.at;
        self.at = self.table.next(id);
        Some(BlockInfo {
            start:   self.table.start(id),
            payload: self.table.payload(id),
            len:     self.table.len(id),
            state:   self.table.state(id),
        })
    }
}
