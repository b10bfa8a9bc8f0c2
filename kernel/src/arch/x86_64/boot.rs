//! x86_64 boot entry point + Limine requests
//!
//! Limine прыгает в `_start` в 64-битном режиме с выключенными прерываниями.
//! Переключаемся на свой стек (он лежит в образе ядра и будет отображён
//! нашими таблицами), обнуляем BSS и зовём kernel_main.
//! Limine jumps to `_start` in 64-bit long mode with interrupts disabled.
//! We switch to our own stack (inside the kernel image, so it stays mapped
//! under our page tables), zero BSS, then call kernel_main.

use core::arch::global_asm;

use limine::memory_map::EntryType;
use limine::request::{
    ExecutableAddressRequest, HhdmRequest, MemoryMapRequest, RequestsEndMarker,
    RequestsStartMarker,
};
use limine::BaseRevision;

global_asm!(
    r#"
.section .text
.global _start
_start:
    cli

    /* Switch to our 64KB boot stack */
    leaq boot_stack_top(%rip), %rsp
    andq $-16, %rsp

    /* Zero BSS: rdi = __bss_start, rcx = byte count, al = 0 */
    leaq __bss_start(%rip), %rdi
    leaq __bss_end(%rip),   %rcx
    subq %rdi, %rcx
    xorl %eax, %eax
    rep stosb

    callq kernel_main

    /* kernel_main never returns — halt just in case */
.hang:
    cli
    hlt
    jmp .hang

.section .bss
.balign 16
boot_stack_bottom:
    .skip 65536
boot_stack_top:
"#,
    options(att_syntax)
);

// ── Запросы Limine / Limine requests ──────────────────────────────────────────
//
// BSS обнуляется в `_start`, поэтому запросы живут в своей секции (.requests),
// ответы загрузчика в них не затираются.
// `_start` zeroes BSS, so the requests live in their own section and the
// bootloader's answers survive.

#[used]
#[link_section = ".requests_start_marker"]
static _START_MARKER: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[link_section = ".requests"]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[link_section = ".requests"]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[link_section = ".requests"]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
static EXECUTABLE_ADDRESS_REQUEST: ExecutableAddressRequest = ExecutableAddressRequest::new();

#[used]
#[link_section = ".requests_end_marker"]
static _END_MARKER: RequestsEndMarker = RequestsEndMarker::new();

extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}

pub fn base_revision_supported() -> bool {
    BASE_REVISION.is_supported()
}

/// Смещение прямого отображения (HHDM) / Direct-map offset.
pub fn hhdm_offset() -> Option<u64> {
    HHDM_REQUEST.get_response().map(|r| r.offset())
}

/// Самый большой USABLE регион: (база, длина).
/// Largest USABLE region as (base, length).
pub fn largest_usable_region() -> Option<(u64, u64)> {
    let response = MEMORY_MAP_REQUEST.get_response()?;
    response
        .entries()
        .iter()
        .filter(|e| e.entry_type == EntryType::USABLE)
        .max_by_key(|e| e.length)
        .map(|e| (e.base, e.length))
}

/// Где загружен образ ядра / Where the kernel image was loaded.
#[derive(Debug, Clone, Copy)]
pub struct KernelImage {
    pub phys: u64,
    pub virt: u64,
    pub size: u64,
}

pub fn kernel_image() -> Option<KernelImage> {
    let response = EXECUTABLE_ADDRESS_REQUEST.get_response()?;
    // SAFETY: linker-provided symbols; only their addresses are taken.
    let (start, end) = unsafe {
        (&raw const __kernel_start as u64, &raw const __kernel_end as u64)
    };
    Some(KernelImage {
        phys: response.physical_base(),
        virt: response.virtual_base(),
        size: end - start,
    })
}
