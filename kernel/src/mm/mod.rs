//! Memory Management subsystem
//!
//! Логика памяти живёт в `tessera-mm`; здесь то, что привязано к железу:
//! PMM над картой Limine, глобальная куча, глобальный VMM и вход #PF.
//! The memory logic lives in `tessera-mm`; this is the hardware-bound part:
//! the PMM over the Limine map, the global heap, the global VMM and the #PF
//! entry.

pub mod pmm;

#[cfg(target_os = "none")]
pub mod selftest;
#[cfg(target_os = "none")]
mod setup;

#[cfg(target_os = "none")]
pub use setup::{init, HEAP, VMM};
