//! Ошибки подсистемы памяти / Memory subsystem errors

use core::fmt;

use super::VirtAddr;

/// Ошибки VMM / VMM errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmmError {
    /// PMM не дал страниц для таблиц ядра; без paging ядра нет.
    /// PMM could not back the kernel tables during init; boot cannot continue.
    InitExhausted,
    /// No frame for an intermediate table.
    OutOfFrames,
    /// Адрес не отображён / No valid entry on the walk.
    NotMapped(VirtAddr),
    /// A huge-page entry sits where a table was expected.
    HugePageConflict(VirtAddr),
    /// Attempted to enable paging with an empty translation root.
    NoTranslationRoot,
}

impl fmt::Display for VmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitExhausted       => write!(f, "out of frames while building kernel page tables"),
            Self::OutOfFrames         => write!(f, "out of frames for a page table"),
            Self::NotMapped(v)        => write!(f, "virtual address {:#x} is not mapped", v),
            Self::HugePageConflict(v) => write!(f, "huge page in the way of {:#x}", v),
            Self::NoTranslationRoot   => write!(f, "translation root is not loaded"),
        }
    }
}

/// Ошибки кучи / Heap errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// PMM не дал страниц при init / No page for the first block or the block table.
    InitExhausted,
    /// PMM не дал страниц для роста (кучи или таблицы блоков).
    /// PMM refused a growth run, for the heap or for its block table.
    Exhausted { bytes: usize },
    /// Growth would exceed `HeapConfig::max_size`.
    LimitReached { total: usize, limit: usize },
    /// `free` on an address that is not the payload of a USED block.
    InvalidFree(VirtAddr),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitExhausted => write!(f, "no page for the initial heap block"),
            Self::Exhausted { bytes } => write!(f, "no physical memory to grow heap by {} bytes", bytes),
            Self::LimitReached { total, limit } => {
                write!(f, "heap growth to {} bytes exceeds the {} byte limit", total, limit)
            }
            Self::InvalidFree(addr) => write!(f, "invalid free of {:#x}", addr),
        }
    }
}

pub type VmmResult<T> = core::result::Result<T, VmmError>;
pub type HeapResult<T> = core::result::Result<T, HeapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_address() {
        let e = VmmError::NotMapped(VirtAddr::new(0xa000_0000));
        assert_eq!(e.to_string(), "virtual address 0xa0000000 is not mapped");

        let e = HeapError::InvalidFree(VirtAddr::new(0x1020));
        assert_eq!(e.to_string(), "invalid free of 0x1020");
    }

    #[test]
    fn limit_message_reports_both_sides() {
        let e = HeapError::LimitReached { total: 8192, limit: 4096 };
        assert_eq!(e.to_string(), "heap growth to 8192 bytes exceeds the 4096 byte limit");
    }
}
