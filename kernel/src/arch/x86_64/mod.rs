//! x86_64 platform initialization

pub mod boot;
pub mod gdt;
pub mod idt;
pub mod mm;

/// x86_64 init sequence
pub fn init() {
    gdt::init();   // Global Descriptor Table + TSS
    idt::init();   // Interrupt Descriptor Table
}

/// Остановить CPU навсегда / Park the CPU for good.
pub fn halt_forever() -> ! {
    loop {
        // SAFETY: `cli; hlt` only stops this CPU.
        unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) };
    }
}
