//! In-memory stand-ins for the PMM, paging registers and IDT.
//!
//! "Physical" addresses handed out by [`FramePool`] are host addresses of a
//! page-aligned buffer, so a `phys_offset` of 0 makes them directly
//! dereferenceable.

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::rc::Rc;

use crate::fault::{InterruptController, InterruptFrame, TrapHandler};
use crate::hw::PagingHardware;
use crate::pmm::{FrameAllocator, PAGE_SIZE};
use crate::{PhysAddr, VirtAddr};

struct Pool {
    base:   *mut u8,
    layout: Layout,
    used:   Vec<bool>,
    /// Pages still allowed to be handed out; `None` = unlimited.
    budget: Option<usize>,
}

impl Drop for Pool {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated with exactly this layout.
        unsafe { alloc::dealloc(self.base, self.layout) };
    }
}

/// First-fit page pool over one host allocation. Clones share the pool.
#[derive(Clone)]
pub struct FramePool(Rc<RefCell<Pool>>);

impl FramePool {
    pub fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
        // SAFETY: non-zero size, valid alignment.
        let base = unsafe { alloc::alloc_zeroed(layout) };
        assert!(!base.is_null());
        Self(Rc::new(RefCell::new(Pool { base, layout, used: vec![false; pages], budget: None })))
    }

    pub fn handle(&self) -> FramePool {
        self.clone()
    }

    /// Allow only `pages` more pages to be allocated.
    pub fn set_budget(&self, pages: usize) {
        self.0.borrow_mut().budget = Some(pages);
    }

    pub fn base(&self) -> PhysAddr {
        PhysAddr::new(self.0.borrow().base as u64)
    }
}

impl FrameAllocator for FramePool {
    fn allocate_pages(&mut self, count: usize) -> Option<PhysAddr> {
        let mut pool = self.0.borrow_mut();
        if count == 0 || pool.budget.is_some_and(|b| b < count) {
            return None;
        }
        let total = pool.used.len();
        let mut start = 0;
        while start + count <= total {
            match pool.used[start..start + count].iter().position(|&u| u) {
                Some(busy) => start += busy + 1,
                None => {
                    pool.used[start..start + count].fill(true);
                    if let Some(b) = pool.budget.as_mut() {
                        *b -= count;
                    }
                    return Some(PhysAddr::new(pool.base as u64 + (start * PAGE_SIZE) as u64));
                }
            }
        }
        None
    }

    fn free_pages(&mut self, base: PhysAddr, count: usize) {
        let mut pool = self.0.borrow_mut();
        let first = (base.as_u64() - pool.base as u64) as usize / PAGE_SIZE;
        pool.used[first..first + count].fill(false);
    }

    fn free_page_count(&self) -> usize {
        self.0.borrow().used.iter().filter(|&&u| !u).count()
    }
}

/// Регистры в памяти / Registers kept in memory.
#[derive(Debug, Default)]
pub struct FakePaging {
    pub fault_address: VirtAddr,
    pub root:          PhysAddr,
    pub enabled:       bool,
    pub root_loads:    usize,
    pub invalidated:   Vec<VirtAddr>,
}

impl PagingHardware for FakePaging {
    fn read_fault_address(&self) -> VirtAddr { self.fault_address }
    fn translation_root(&self) -> PhysAddr { self.root }

    fn load_translation_root(&mut self, root: PhysAddr) {
        self.root = root;
        self.root_loads += 1;
    }

    fn paging_enabled(&self) -> bool { self.enabled }
    fn set_paging_enabled(&mut self, enabled: bool) { self.enabled = enabled; }

    fn invalidate(&mut self, virt: VirtAddr) {
        self.invalidated.push(virt);
    }
}

/// Remembers every registration.
#[derive(Default)]
pub struct RecordingIdt {
    pub handlers: Vec<(u8, TrapHandler)>,
}

impl InterruptController for RecordingIdt {
    fn register_handler(&mut self, vector: u8, handler: TrapHandler) {
        self.handlers.push((vector, handler));
    }
}

pub fn noop_trap(_frame: &InterruptFrame, _error: u64) {}
