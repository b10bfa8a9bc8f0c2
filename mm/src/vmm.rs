//! Virtual Memory Manager
//!
//! Строит таблицы страниц ядра из страниц PMM, включает paging и
//! обслуживает map/unmap/translate для любого адресного пространства.
//! Builds the kernel page tables out of PMM pages, turns paging on and
//! serves map/unmap/translate for any address space.
//!
//! Таблицы адресуются через прямое отображение физической памяти:
//! `virt = phys + phys_offset` (HHDM у Limine, 0 в тестах).
//! Tables are reached through the direct physical map:
//! `virt = phys + phys_offset` (Limine's HHDM, 0 in host tests).

use super::error::{VmmError, VmmResult};
use super::fault::{
    FaultAction, FaultPolicy, InterruptController, InterruptFrame, PageFaultInfo, TrapHandler,
    ABORT_POLICY, PAGE_FAULT_VECTOR,
};
use super::hw::PagingHardware;
use super::paging::{Level, PageDirectory, PageFlags, PageTable, PageTableEntry};
use super::pmm::{FrameAllocator, PAGE_SIZE};
use super::{PhysAddr, VirtAddr};

/// Статически заданный регион ядра / Statically configured kernel region
///
/// Отображается при `init` с флагами [`PageFlags::KERNEL_DATA`].
/// Mapped at `init` with [`PageFlags::KERNEL_DATA`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelRegion {
    pub virt: VirtAddr,
    pub phys: PhysAddr,
    pub size: usize,
}

impl KernelRegion {
    pub fn pages(&self) -> usize {
        self.size.div_ceil(PAGE_SIZE)
    }
}

#[derive(Clone, Copy)]
pub struct VmmConfig<'a> {
    /// Смещение прямого отображения / Direct-map offset.
    pub phys_offset:    u64,
    pub kernel_regions: &'a [KernelRegion],
    /// Registered for [`PAGE_FAULT_VECTOR`]; it must reach
    /// [`Vmm::handle_page_fault`] on the live instance.
    pub fault_entry:    TrapHandler,
}

/// Результат спуска по таблицам / Outcome of a table walk
enum Walk {
    /// Запись последнего уровня (может быть пустой) / Leaf PT entry, maybe empty.
    Leaf(*mut PageTableEntry),
    /// Huge page at a higher level.
    Huge(PageTableEntry, Level),
}

pub struct Vmm<H: PagingHardware> {
    hw:           H,
    phys_offset:  u64,
    kernel_dir:   PageDirectory,
    current:      PageDirectory,
    policy:       &'static dyn FaultPolicy,
    /// Страниц PMM, отданных под таблицы / PMM pages spent on tables.
    table_frames: usize,
}

impl<H: PagingHardware> Vmm<H> {
    /// Построить каталог ядра, зарегистрировать #PF, загрузить CR3, включить paging.
    /// Build the kernel directory, register #PF, load the root, enable paging.
    ///
    /// Ошибка здесь фатальна для загрузки / An error here is fatal for boot.
    pub fn init<F, I>(config: &VmmConfig<'_>, hw: H, frames: &mut F, idt: &mut I) -> VmmResult<Self>
    where
        F: FrameAllocator + ?Sized,
        I: InterruptController + ?Sized,
    {
        let mut vmm = Self {
            hw,
            phys_offset:  config.phys_offset,
            kernel_dir:   PageDirectory::from_root(PhysAddr::new(0)),
            current:      PageDirectory::from_root(PhysAddr::new(0)),
            policy:       &ABORT_POLICY,
            table_frames: 0,
        };

        let root = vmm.alloc_table(frames).map_err(|_| VmmError::InitExhausted)?;
        vmm.kernel_dir = PageDirectory::from_root(root);

        for region in config.kernel_regions {
            log::debug!(
                "vmm: kernel region {:#x} -> {:#x} ({} pages)",
                region.virt, region.phys, region.pages()
            );
            for i in 0..region.pages() as u64 {
                let offset = i * PAGE_SIZE as u64;
                vmm.map(
                    vmm.kernel_dir,
                    VirtAddr::new(region.virt.as_u64() + offset),
                    PhysAddr::new(region.phys.as_u64() + offset),
                    PageFlags::KERNEL_DATA,
                    frames,
                )
                .map_err(|e| match e {
                    VmmError::OutOfFrames => VmmError::InitExhausted,
                    other => other,
                })?;
            }
        }

        idt.register_handler(PAGE_FAULT_VECTOR, config.fault_entry);

        let kernel_dir = vmm.kernel_dir;
        vmm.switch_directory(kernel_dir);
        vmm.enable_paging()?;

        log::info!(
            "vmm: kernel directory at {:#x}, {} table pages",
            root, vmm.table_frames
        );
        Ok(vmm)
    }

    // ── Отображение / Mapping ─────────────────────────────────────────────────

    /// Отобразить страницу `virt` → `phys` в каталоге `dir`.
    /// Map the page containing `virt` onto the frame containing `phys`.
    ///
    /// Невыровненные адреса усекаются до страницы. PRESENT добавляется всегда.
    /// Misaligned addresses are truncated to their page; PRESENT is implied.
    /// Missing intermediate tables are taken from `frames` and zeroed.
    pub fn map<F>(
        &mut self,
        dir:    PageDirectory,
        virt:   VirtAddr,
        phys:   PhysAddr,
        flags:  PageFlags,
        frames: &mut F,
    ) -> VmmResult<()>
    where
        F: FrameAllocator + ?Sized,
    {
        let virt = virt.page_base();
        let phys = phys.page_base();
        let leaf_flags = (flags - PageFlags::HUGE) | PageFlags::PRESENT;

        let mut table = dir.root();
        for level in [Level::Pml4, Level::Pdpt, Level::Pd] {
            let idx = level.index(virt);
            // SAFETY: `table` is a table frame owned by this VMM (root or an
            // entry it installed), reachable through the direct map.
            let t = unsafe { &mut *self.table_ptr(table) };
            let entry = t[idx];

            table = if entry.is_present() {
                if entry.is_huge() {
                    return Err(VmmError::HugePageConflict(virt));
                }
                if flags.contains(PageFlags::USER) && !entry.flags().contains(PageFlags::USER) {
                    t[idx] = PageTableEntry::new(entry.addr(), entry.flags() | PageFlags::USER);
                }
                entry.addr()
            } else {
                let next = self.alloc_table(frames)?;
                t[idx] = PageTableEntry::new(next, Self::table_flags(flags));
                next
            };
        }

        // SAFETY: as above, `table` is the PT for `virt`.
        let pt = unsafe { &mut *self.table_ptr(table) };
        let idx = Level::Pt.index(virt);
        let old = pt[idx];
        pt[idx] = PageTableEntry::new(phys, leaf_flags);

        if old.is_present() && dir == self.current {
            self.hw.invalidate(virt);
        }
        log::trace!("vmm: map {:#x} -> {:#x} {:?}", virt, phys, leaf_flags);
        Ok(())
    }

    /// Снять отображение; возвращает бывший фрейм.
    /// Clear the mapping for `virt`; returns the frame it pointed at.
    pub fn unmap(&mut self, dir: PageDirectory, virt: VirtAddr) -> VmmResult<PhysAddr> {
        let virt = virt.page_base();
        match self.walk(dir, virt)? {
            Walk::Huge(..) => Err(VmmError::HugePageConflict(virt)),
            Walk::Leaf(entry) => {
                // SAFETY: `walk` only returns pointers into live PT frames.
                let entry = unsafe { &mut *entry };
                if !entry.is_present() {
                    return Err(VmmError::NotMapped(virt));
                }
                let frame = entry.addr();
                *entry = PageTableEntry::empty();
                if dir == self.current {
                    self.hw.invalidate(virt);
                }
                log::trace!("vmm: unmap {:#x} (was {:#x})", virt, frame);
                Ok(frame)
            }
        }
    }

    /// Физический адрес для `virt` (со смещением внутри страницы).
    /// Physical address behind `virt`, including the in-page offset.
    pub fn translate(&self, dir: PageDirectory, virt: VirtAddr) -> VmmResult<PhysAddr> {
        self.query(dir, virt).map(|(phys, _)| phys)
    }

    /// Like [`translate`](Self::translate), plus the flags of the final entry.
    pub fn query(&self, dir: PageDirectory, virt: VirtAddr) -> VmmResult<(PhysAddr, PageFlags)> {
        match self.walk(dir, virt)? {
            Walk::Huge(entry, level) => {
                let mask = level.span() - 1;
                let base = entry.addr().as_u64() & !mask;
                Ok((PhysAddr::new(base + (virt.as_u64() & mask)), entry.flags()))
            }
            Walk::Leaf(entry) => {
                // SAFETY: `walk` only returns pointers into live PT frames.
                let entry = unsafe { *entry };
                if !entry.is_present() {
                    return Err(VmmError::NotMapped(virt));
                }
                Ok((PhysAddr::new(entry.addr().as_u64() + virt.page_offset()), entry.flags()))
            }
        }
    }

    // ── Адресные пространства / Address spaces ────────────────────────────────

    /// Загрузить другой каталог (смена процесса). Не синхронизировано.
    /// Load another directory (process switch hook). Not synchronised.
    pub fn switch_directory(&mut self, dir: PageDirectory) {
        self.hw.load_translation_root(dir.root());
        self.current = dir;
        log::debug!("vmm: translation root -> {:#x}", dir.root());
    }

    /// Установить бит включения paging (CR0.PG).
    /// Set the paging-enable bit.
    pub fn enable_paging(&mut self) -> VmmResult<()> {
        if self.hw.translation_root().is_null() {
            log::error!("vmm: translation root not set, refusing to enable paging");
            return Err(VmmError::NoTranslationRoot);
        }
        if self.hw.paging_enabled() {
            log::debug!("vmm: paging already enabled");
            return Ok(());
        }
        self.hw.set_paging_enabled(true);
        log::debug!("vmm: paging enabled, root {:#x}", self.hw.translation_root());
        Ok(())
    }

    /// Новый каталог, разделяющий отображение ядра.
    /// New directory sharing the kernel mapping.
    ///
    /// Every present root entry of the kernel directory is copied, so the
    /// lower-level kernel tables are shared rather than duplicated.
    pub fn new_directory<F>(&mut self, frames: &mut F) -> VmmResult<PageDirectory>
    where
        F: FrameAllocator + ?Sized,
    {
        let root = self.alloc_table(frames)?;
        // SAFETY: both are root tables owned by this VMM, and `root` is a
        // fresh frame distinct from the kernel root.
        let (kernel, table) = unsafe {
            (&*self.table_ptr(self.kernel_dir.root()), &mut *self.table_ptr(root))
        };
        for (i, entry) in kernel.iter().enumerate() {
            if entry.is_present() {
                table[i] = *entry;
            }
        }
        Ok(PageDirectory::from_root(root))
    }

    pub fn kernel_directory(&self) -> PageDirectory { self.kernel_dir }
    pub fn current_directory(&self) -> PageDirectory { self.current }
    pub fn table_frames(&self) -> usize { self.table_frames }

    pub fn hardware(&self) -> &H { &self.hw }
    pub fn hardware_mut(&mut self) -> &mut H { &mut self.hw }

    // ── Page fault ────────────────────────────────────────────────────────────

    pub fn set_fault_policy(&mut self, policy: &'static dyn FaultPolicy) {
        self.policy = policy;
    }

    /// Разобрать #PF и спросить политику, что делать.
    /// Decode a #PF and ask the policy what to do.
    ///
    /// Вызывается из обработчика ловушки; сам ничего не останавливает.
    /// Called from the trap entry; never halts by itself.
    pub fn handle_page_fault(&self, frame: &InterruptFrame, error_code: u64) -> (PageFaultInfo, FaultAction) {
        let info = PageFaultInfo::decode(self.hw.read_fault_address(), frame.rip, error_code);
        log::error!("{}", info);
        let action = self.policy.decide(&info);
        log::error!("page fault policy: {:?}", action);
        (info, action)
    }

    // ── Внутреннее / Internals ────────────────────────────────────────────────

    fn table_ptr(&self, phys: PhysAddr) -> *mut PageTable {
        (phys.as_u64() + self.phys_offset) as *mut PageTable
    }

    /// Взять страницу у PMM под таблицу и обнулить её.
    /// Take a page from the PMM for a table and zero it.
    fn alloc_table<F>(&mut self, frames: &mut F) -> VmmResult<PhysAddr>
    where
        F: FrameAllocator + ?Sized,
    {
        let phys = frames.allocate_pages(1).ok_or(VmmError::OutOfFrames)?;
        // SAFETY: the PMM just handed this page over exclusively.
        unsafe { (&mut *self.table_ptr(phys)).zero() };
        self.table_frames += 1;
        Ok(phys)
    }

    /// Flags for intermediate entries: the leaf decides the real permissions.
    fn table_flags(leaf: PageFlags) -> PageFlags {
        PageFlags::PRESENT | PageFlags::WRITABLE | (leaf & PageFlags::USER)
    }

    fn walk(&self, dir: PageDirectory, virt: VirtAddr) -> VmmResult<Walk> {
        let mut table = dir.root();
        for level in [Level::Pml4, Level::Pdpt, Level::Pd] {
            // SAFETY: `table` is the root or came out of a present entry
            // this VMM installed.
            let entry = unsafe { (&*self.table_ptr(table))[level.index(virt)] };
            if !entry.is_present() {
                return Err(VmmError::NotMapped(virt));
            }
            if entry.is_huge() && level != Level::Pml4 {
                return Ok(Walk::Huge(entry, level));
            }
            table = entry.addr();
        }
        // SAFETY: `table` is a live PT frame.
        let pt = unsafe { &mut *self.table_ptr(table) };
        Ok(Walk::Leaf(&mut pt[Level::Pt.index(virt)] as *mut PageTableEntry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultAction, KillUserPolicy};
    use crate::testing::{noop_trap, FakePaging, FramePool, RecordingIdt};

    const KERNEL_VIRT: u64 = 0xffff_ffff_8000_0000;
    const KERNEL_PHYS: u64 = 0x0010_0000;

    static REGIONS: [KernelRegion; 1] = [KernelRegion {
        virt: VirtAddr::new(KERNEL_VIRT),
        phys: PhysAddr::new(KERNEL_PHYS),
        size: 6 * PAGE_SIZE,
    }];

    fn config() -> VmmConfig<'static> {
        VmmConfig { phys_offset: 0, kernel_regions: &REGIONS, fault_entry: noop_trap }
    }

    fn boot(pool: &FramePool) -> Vmm<FakePaging> {
        let mut frames = pool.handle();
        let mut idt = RecordingIdt::default();
        Vmm::init(&config(), FakePaging::default(), &mut frames, &mut idt).unwrap()
    }

    #[test]
    fn init_maps_kernel_region_with_kernel_flags() {
        let pool = FramePool::new(32);
        let vmm = boot(&pool);
        let dir = vmm.kernel_directory();

        for i in 0..6u64 {
            let virt = VirtAddr::new(KERNEL_VIRT + i * PAGE_SIZE as u64);
            let (phys, flags) = vmm.query(dir, virt).unwrap();
            assert_eq!(phys, PhysAddr::new(KERNEL_PHYS + i * PAGE_SIZE as u64));
            assert_eq!(flags, PageFlags::KERNEL_DATA);
        }
        let past_end = VirtAddr::new(KERNEL_VIRT + 6 * PAGE_SIZE as u64);
        assert_eq!(vmm.translate(dir, past_end), Err(VmmError::NotMapped(past_end)));
    }

    #[test]
    fn init_spends_one_root_and_three_tables() {
        let pool = FramePool::new(32);
        let before = pool.handle().free_page_count();
        let vmm = boot(&pool);
        assert_eq!(vmm.table_frames(), 4);
        assert_eq!(pool.handle().free_page_count(), before - 4);
    }

    #[test]
    fn init_registers_fault_entry_and_enables_paging() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut idt = RecordingIdt::default();
        let vmm = Vmm::init(&config(), FakePaging::default(), &mut frames, &mut idt).unwrap();

        assert_eq!(idt.handlers.len(), 1);
        let (vector, handler) = idt.handlers[0];
        assert_eq!(vector, PAGE_FAULT_VECTOR);
        assert_eq!(handler as usize, noop_trap as TrapHandler as usize);

        let hw = vmm.hardware();
        assert!(hw.paging_enabled());
        assert_eq!(hw.root_loads, 1);
        assert_eq!(hw.root, vmm.kernel_directory().root());
        assert_eq!(vmm.current_directory(), vmm.kernel_directory());
    }

    #[test]
    fn init_fails_without_frames() {
        let pool = FramePool::new(32);
        pool.set_budget(2);
        let mut frames = pool.handle();
        let mut idt = RecordingIdt::default();
        let result = Vmm::init(&config(), FakePaging::default(), &mut frames, &mut idt);
        assert_eq!(result.err(), Some(VmmError::InitExhausted));
        assert!(idt.handlers.is_empty());
    }

    #[test]
    fn map_translate_unmap_round_trip() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        let dir = vmm.kernel_directory();

        let virt = VirtAddr::new(0xa000_0000);
        let phys = frames.allocate_pages(1).unwrap();
        vmm.map(dir, virt, phys, PageFlags::KERNEL_DATA, &mut frames).unwrap();
        assert_eq!(vmm.translate(dir, virt), Ok(phys));
        assert_eq!(
            vmm.translate(dir, VirtAddr::new(0xa000_0123)),
            Ok(PhysAddr::new(phys.as_u64() + 0x123))
        );

        assert_eq!(vmm.unmap(dir, virt), Ok(phys));
        assert_eq!(vmm.translate(dir, virt), Err(VmmError::NotMapped(virt)));
        assert!(vmm.hardware().invalidated.contains(&virt));
    }

    #[test]
    fn misaligned_input_is_truncated() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        let dir = vmm.kernel_directory();

        vmm.map(dir, VirtAddr::new(0x40_0abc), PhysAddr::new(0x77_7123), PageFlags::PRESENT, &mut frames)
            .unwrap();
        assert_eq!(vmm.translate(dir, VirtAddr::new(0x40_0000)), Ok(PhysAddr::new(0x77_7000)));
        assert_eq!(vmm.unmap(dir, VirtAddr::new(0x40_0fff)), Ok(PhysAddr::new(0x77_7000)));
    }

    #[test]
    fn neighbouring_pages_share_tables() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        let dir = vmm.kernel_directory();

        let before = vmm.table_frames();
        vmm.map(dir, VirtAddr::new(0x40_0000), PhysAddr::new(0x1000), PageFlags::PRESENT, &mut frames).unwrap();
        assert_eq!(vmm.table_frames(), before + 3);
        vmm.map(dir, VirtAddr::new(0x40_1000), PhysAddr::new(0x2000), PageFlags::PRESENT, &mut frames).unwrap();
        assert_eq!(vmm.table_frames(), before + 3);
    }

    #[test]
    fn map_reports_exhaustion() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        pool.set_budget(1);
        let virt = VirtAddr::new(0x8000_0000_0000 - PAGE_SIZE as u64);
        let result = vmm.map(vmm.kernel_directory(), virt, PhysAddr::new(0x1000), PageFlags::PRESENT, &mut frames);
        assert_eq!(result, Err(VmmError::OutOfFrames));
    }

    #[test]
    fn remapping_active_directory_invalidates() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        let dir = vmm.kernel_directory();
        let virt = VirtAddr::new(0x40_0000);

        vmm.map(dir, virt, PhysAddr::new(0x1000), PageFlags::PRESENT, &mut frames).unwrap();
        assert!(vmm.hardware().invalidated.is_empty());
        vmm.map(dir, virt, PhysAddr::new(0x2000), PageFlags::PRESENT, &mut frames).unwrap();
        assert_eq!(vmm.hardware().invalidated, [virt]);
        assert_eq!(vmm.translate(dir, virt), Ok(PhysAddr::new(0x2000)));
    }

    #[test]
    fn unmap_of_unmapped_address_fails() {
        let pool = FramePool::new(32);
        let mut vmm = boot(&pool);
        let virt = VirtAddr::new(0x1234_5000);
        assert_eq!(vmm.unmap(vmm.kernel_directory(), virt), Err(VmmError::NotMapped(virt)));
    }

    #[test]
    fn user_mapping_widens_intermediate_entries() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        let dir = vmm.kernel_directory();

        vmm.map(dir, VirtAddr::new(0x40_0000), PhysAddr::new(0x1000), PageFlags::KERNEL_DATA, &mut frames).unwrap();
        let user = PageFlags::PRESENT | PageFlags::USER;
        vmm.map(dir, VirtAddr::new(0x40_1000), PhysAddr::new(0x2000), user, &mut frames).unwrap();

        // SAFETY: phys_offset is 0, so the root is a host pointer.
        let root = unsafe { &*(dir.root().as_u64() as *const PageTable) };
        assert!(root[0].flags().contains(PageFlags::USER));
        let (_, flags) = vmm.query(dir, VirtAddr::new(0x40_0000)).unwrap();
        assert!(!flags.contains(PageFlags::USER));
    }

    #[test]
    fn new_directory_shares_kernel_mapping_only() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        let kernel = vmm.kernel_directory();
        let task = vmm.new_directory(&mut frames).unwrap();
        assert_ne!(task, kernel);

        let kvirt = VirtAddr::new(KERNEL_VIRT + PAGE_SIZE as u64);
        assert_eq!(vmm.translate(task, kvirt), vmm.translate(kernel, kvirt));

        let uvirt = VirtAddr::new(0x40_0000);
        vmm.map(task, uvirt, PhysAddr::new(0x9000), PageFlags::PRESENT | PageFlags::USER, &mut frames).unwrap();
        assert_eq!(vmm.translate(task, uvirt), Ok(PhysAddr::new(0x9000)));
        assert_eq!(vmm.translate(kernel, uvirt), Err(VmmError::NotMapped(uvirt)));
        // Not the active directory: nothing to invalidate.
        vmm.unmap(task, uvirt).unwrap();
        assert!(vmm.hardware().invalidated.is_empty());
    }

    #[test]
    fn switch_directory_loads_root() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        let task = vmm.new_directory(&mut frames).unwrap();

        vmm.switch_directory(task);
        assert_eq!(vmm.hardware().root, task.root());
        assert_eq!(vmm.hardware().root_loads, 2);
        assert_eq!(vmm.current_directory(), task);
    }

    #[test]
    fn enable_paging_requires_root() {
        let pool = FramePool::new(32);
        let mut vmm = boot(&pool);
        vmm.hardware_mut().root = PhysAddr::new(0);
        vmm.hardware_mut().enabled = false;
        assert_eq!(vmm.enable_paging(), Err(VmmError::NoTranslationRoot));
        assert!(!vmm.hardware().enabled);
    }

    #[test]
    fn translate_follows_huge_pages() {
        let pool = FramePool::new(32);
        let mut frames = pool.handle();
        let mut vmm = boot(&pool);
        let dir = vmm.kernel_directory();

        // Build the PML4 → PDPT → PD path, then turn the PD entry into a 2 MiB page.
        let virt = VirtAddr::new(0x20_0000);
        vmm.map(dir, virt, PhysAddr::new(0x1000), PageFlags::PRESENT, &mut frames).unwrap();
        // SAFETY: phys_offset is 0; every table is a host page from the pool.
        unsafe {
            let pml4 = &*(dir.root().as_u64() as *const PageTable);
            let pdpt = &*(pml4[0].addr().as_u64() as *const PageTable);
            let pd = &mut *(pdpt[0].addr().as_u64() as *mut PageTable);
            pd[1] = PageTableEntry::new(PhysAddr::new(0x4000_0000), PageFlags::PRESENT | PageFlags::HUGE);
        }

        assert_eq!(
            vmm.translate(dir, VirtAddr::new(0x21_2345)),
            Ok(PhysAddr::new(0x4001_2345))
        );
        let inside = VirtAddr::new(0x20_1000);
        assert_eq!(
            vmm.map(dir, inside, PhysAddr::new(0x5000), PageFlags::PRESENT, &mut frames),
            Err(VmmError::HugePageConflict(inside))
        );
        assert_eq!(vmm.unmap(dir, inside), Err(VmmError::HugePageConflict(inside)));
    }

    #[test]
    fn page_fault_reads_fault_register_and_asks_policy() {
        static KILL_USER: KillUserPolicy = KillUserPolicy;

        let pool = FramePool::new(32);
        let mut vmm = boot(&pool);
        vmm.hardware_mut().fault_address = VirtAddr::new(0xdead_0000);
        let frame = InterruptFrame { rip: 0x40_1000, ..Default::default() };

        let (info, action) = vmm.handle_page_fault(&frame, 0x6);
        assert_eq!(info.fault_address, VirtAddr::new(0xdead_0000));
        assert_eq!(info.instruction_pointer, 0x40_1000);
        assert!(info.is_write && info.from_user && info.was_present);
        assert_eq!(action, FaultAction::Halt);

        vmm.set_fault_policy(&KILL_USER);
        let (_, action) = vmm.handle_page_fault(&frame, 0x6);
        assert_eq!(action, FaultAction::KillFaultingTask);
    }
}
