//! HAL — Hardware Abstraction Layer
//!
//! Пока только x86_64 / x86_64 only for now.

pub mod x86_64;

/// Инициализация платформы — вызывается первой из kernel_main.
/// Platform initialization — called first from kernel_main.
pub fn init() {
    x86_64::init();
}
