//! Global Descriptor Table (GDT) — x86_64
//!
//! GDT загрузчика лежит в памяти, которую наши таблицы страниц не отображают,
//! поэтому до смены CR3 ядро ставит свою.
//! The bootloader's GDT lives in memory our page tables do not map, so the
//! kernel installs its own before the CR3 switch.
//!
//!  Индекс / Index  Сегмент / Segment
//!  ─────────────────────────────────
//!  0               Null descriptor (обязателен / required)
//!  1               Kernel Code  (ring 0, execute)
//!  2               Kernel Data  (ring 0, read/write)
//!  3               TSS          (IST для #DF / IST for #DF)

use core::mem::size_of;

use spin::Once;

// ── Селекторы сегментов / Segment selectors ───────────────────────────────────
pub const KERNEL_CODE: u16 = 0x08;
pub const KERNEL_DATA: u16 = 0x10;
pub const TSS_SEL:     u16 = 0x18;

/// IST-слот для Double Fault / IST slot used by the double-fault gate.
pub const DOUBLE_FAULT_IST: u8 = 1;

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low:   u16,
    base_low:    u16,
    base_mid:    u8,
    access:      u8,
    granularity: u8,
    base_high:   u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_mid: 0,
               access: 0, granularity: 0, base_high: 0 }
    }
    const fn new(access: u8, granularity: u8) -> Self {
        Self { limit_low: 0xFFFF, base_low: 0, base_mid: 0,
               access, granularity, base_high: 0 }
    }
}

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct TssEntry {
    limit_low:   u16,
    base_low:    u16,
    base_mid:    u8,
    access:      u8,
    granularity: u8,
    base_high:   u8,
    base_upper:  u32,
    reserved:    u32,
}

impl TssEntry {
    fn new(tss_addr: u64) -> Self {
        let size = (size_of::<Tss>() - 1) as u64;
        Self {
            limit_low:   (size & 0xFFFF) as u16,
            base_low:    (tss_addr & 0xFFFF) as u16,
            base_mid:    ((tss_addr >> 16) & 0xFF) as u8,
            access:      0x89,
            granularity: ((size >> 16) & 0x0F) as u8,
            base_high:   ((tss_addr >> 24) & 0xFF) as u8,
            base_upper:  (tss_addr >> 32) as u32,
            reserved:    0,
        }
    }
}

#[repr(C, packed)]
struct Tss {
    reserved0:  u32,
    rsp:        [u64; 3],
    reserved1:  u64,
    /// IST — 7 стеков для критических прерываний / 7 stacks for critical interrupts
    ist:        [u64; 7],
    reserved2:  u64,
    reserved3:  u16,
    iomap_base: u16,
}

#[repr(C, packed)]
struct Gdt {
    null:        GdtEntry,
    kernel_code: GdtEntry,
    kernel_data: GdtEntry,
    tss:         TssEntry,
}

#[repr(C, packed)]
struct GdtDescriptor {
    size:   u16,
    offset: u64,
}

/// Стек для Double Fault (16KB): переполнение стека ядра даёт #PF → #DF,
/// и обработчику нужен исправный стек.
/// Double-fault stack (16KB): a kernel stack overflow turns a #PF into a #DF,
/// whose handler needs a stack that still works.
#[repr(align(16))]
struct Stack([u8; 16 * 1024]);

static mut DOUBLE_FAULT_STACK: Stack = Stack([0; 16 * 1024]);

static TSS: Once<Tss> = Once::new();
static GDT: Once<Gdt> = Once::new();

/// Инициализировать и загрузить GDT + TSS.
/// Initialize and load GDT + TSS.
pub fn init() {
    // Только адрес, без ссылки / Address only, no reference is formed.
    let top = (&raw const DOUBLE_FAULT_STACK) as u64 + size_of::<Stack>() as u64;

    let tss = TSS.call_once(|| {
        let mut ist = [0; 7];
        ist[DOUBLE_FAULT_IST as usize - 1] = top;
        Tss {
            reserved0: 0, rsp: [0; 3], reserved1: 0, ist,
            reserved2: 0, reserved3: 0,
            iomap_base: size_of::<Tss>() as u16,
        }
    });

    let gdt = GDT.call_once(|| Gdt {
        null:        GdtEntry::null(),
        kernel_code: GdtEntry::new(0x9A, 0xA0), // ring 0, code, 64-bit
        kernel_data: GdtEntry::new(0x92, 0xC0), // ring 0, data
        tss:         TssEntry::new(tss as *const Tss as u64),
    });

    let descriptor = GdtDescriptor {
        size:   (size_of::<Gdt>() - 1) as u16,
        offset: gdt as *const Gdt as u64,
    };

    // SAFETY: the GDT and TSS are 'static; the selectors below match
    // the layout of `Gdt`.
    unsafe {
        core::arch::asm!(
            "lgdt [{desc}]",
            // Обновить регистры данных / Update data registers
            "mov ax, {kdata}",
            "mov ds, ax",
            "mov es, ax",
            "mov ss, ax",
            // Обновить CS через far return / Update CS via far return
            "push {kcode}",
            "lea rax, [rip + 1f]",
            "push rax",
            "retfq",
            "1:",
            // Загрузить TSS / Load TSS
            "ltr {tss:x}",
            desc  = in(reg) &descriptor,
            kcode = const KERNEL_CODE as u64,
            kdata = const KERNEL_DATA,
            tss   = in(reg) TSS_SEL,
            out("rax") _,
        );
    }
    log::debug!("gdt: loaded, #DF stack top {:#x}", top);
}
