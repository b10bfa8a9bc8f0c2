//! Tessera Kernel — точка входа / entry point
//!
//! Собирается под `x86_64-unknown-none`; на хосте остаётся только
//! заглушка `main`, чтобы тесты чистой логики (битовая карта PMM) шли
//! через обычный `cargo test`.
//! Builds for `x86_64-unknown-none`; on the host only a stub `main` remains
//! so the pure-logic tests (the PMM bitmap) run under plain `cargo test`.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
mod arch;
#[cfg(target_os = "none")]
mod drivers;
#[cfg(target_os = "none")]
mod klog;
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
mod mm;

/// Точка входа ядра — вызывается из `_start` после смены стека.
/// Kernel entry point — called from `_start` once the boot stack is live.
#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    // 0. UART + log — первым делом / first of all
    drivers::uart::init();
    klog::init();
    kprintln!("Tessera booting...");

    if !arch::x86_64::boot::base_revision_supported() {
        panic!("Limine base revision not supported");
    }

    // 1. GDT + IDT (прерывания остаются выключены / interrupts stay masked)
    log::info!("arch: loading GDT + IDT");
    arch::init();

    // 2–4. PMM → VMM → heap
    mm::init();

    // После этого работают Box<T>, Vec<T> / Box<T>, Vec<T> work from here on
    mm::selftest::run();

    kprintln!("");
    kprintln!("  Tessera memory core ready.");
    kprintln!("");

    arch::x86_64::halt_forever();
}

/// Panic handler — выводим в UART и halt.
#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    drivers::uart::_print_unlocked(format_args!("\n[KERNEL PANIC] {}\n", info));
    arch::x86_64::halt_forever();
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("tessera-kernel only boots on x86_64-unknown-none");
}
