//! Page Fault — декодирование и политика / decode and policy
//!
//! Обработчик ловушки читает CR2 и error code, раскладывает пять битов
//! независимо друг от друга и отдаёт отчёт политике. Политика по умолчанию:
//! остановить ядро; восстановления (подкачки) нет.
//!
//! The trap handler reads CR2 and the error code, decodes five bits
//! independently and hands the report to a [`FaultPolicy`]. The default policy
//! halts the kernel; there is no page-in path.

use core::fmt;

use bitflags::bitflags;
use super::VirtAddr;

/// Вектор #PF / Page-fault vector
pub const PAGE_FAULT_VECTOR: u8 = 0x0E;

// ── Контекст прерывания / Interrupt frame ─────────────────────────────────────

/// CPU автоматически помещает на стек при прерывании.
/// CPU automatically pushes on the stack on interrupt.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct InterruptFrame {
    pub rip:    u64,
    pub cs:     u64,
    pub rflags: u64,
    pub rsp:    u64,
    pub ss:     u64,
}

/// Обработчик ловушки: кадр + error code (0, если CPU его не кладёт).
/// Trap handler: frame + error code (0 for vectors without one).
pub type TrapHandler = fn(&InterruptFrame, u64);

/// Регистрация обработчиков по номеру вектора.
/// Handler registration by vector number.
pub trait InterruptController {
    fn register_handler(&mut self, vector: u8, handler: TrapHandler);
}

// ── Error code ────────────────────────────────────────────────────────────────

bitflags! {
    /// Биты error code, которые мы разбираем.
    /// Error-code bits this kernel decodes. Higher bits (protection keys,
    /// shadow stack, SGX) are ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultErrorCode: u64 {
        /// Отчитывается как «страница отсутствует» / Reported as not-present.
        const NOT_PRESENT       = 1 << 0;
        /// 1 = запись, 0 = чтение / 1 = write access, 0 = read access.
        const WRITE             = 1 << 1;
        /// 1 = user mode, 0 = kernel mode.
        const USER              = 1 << 2;
        /// Reserved bit set in a paging-structure entry.
        const RESERVED_WRITE    = 1 << 3;
        /// Fault during an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// Разобранный page fault / Decoded page fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFaultInfo {
    pub fault_address:          VirtAddr,
    pub instruction_pointer:    u64,
    pub error_code:             u64,
    /// `false` when bit 0 is set (reported as a not-present page),
    /// `true` for a protection violation on a present page.
    pub was_present:            bool,
    pub is_write:               bool,
    pub from_user:              bool,
    pub reserved_bit_violation: bool,
    pub from_instruction_fetch: bool,
}

impl PageFaultInfo {
    pub fn decode(fault_address: VirtAddr, instruction_pointer: u64, error_code: u64) -> Self {
        let code = PageFaultErrorCode::from_bits_truncate(error_code);
        Self {
            fault_address,
            instruction_pointer,
            error_code,
            was_present:            !code.contains(PageFaultErrorCode::NOT_PRESENT),
            is_write:               code.contains(PageFaultErrorCode::WRITE),
            from_user:              code.contains(PageFaultErrorCode::USER),
            reserved_bit_violation: code.contains(PageFaultErrorCode::RESERVED_WRITE),
            from_instruction_fetch: code.contains(PageFaultErrorCode::INSTRUCTION_FETCH),
        }
    }
}

impl fmt::Display for PageFaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "page fault at RIP={:#x}, faulting address {:#x}",
            self.instruction_pointer, self.fault_address
        )?;
        writeln!(f, "  error code: {:#x}", self.error_code)?;
        if self.was_present {
            writeln!(f, "  protection violation")?;
        } else {
            writeln!(f, "  page was not present")?;
        }
        writeln!(f, "  {} access", if self.is_write { "write" } else { "read" })?;
        write!(f, "  in {} mode", if self.from_user { "user" } else { "kernel" })?;
        if self.reserved_bit_violation {
            write!(f, "\n  reserved bits overwritten")?;
        }
        if self.from_instruction_fetch {
            write!(f, "\n  during instruction fetch")?;
        }
        Ok(())
    }
}

// ── Политика / Policy ─────────────────────────────────────────────────────────

/// Что сделать с ловушкой / What to do about the trap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Остановить ядро / Halt the kernel.
    Halt,
    /// Убить виновную задачу, ядро продолжает работу.
    /// Kill the faulting task; the kernel keeps running.
    KillFaultingTask,
}

pub trait FaultPolicy: Sync {
    fn decide(&self, info: &PageFaultInfo) -> FaultAction;
}

/// Любой fault фатален / Every fault is fatal.
#[derive(Debug, Default)]
pub struct AbortPolicy;

impl FaultPolicy for AbortPolicy {
    fn decide(&self, _info: &PageFaultInfo) -> FaultAction {
        FaultAction::Halt
    }
}

/// Faults from user mode kill the task; kernel faults and corrupted
/// page tables still halt.
#[derive(Debug, Default)]
pub struct KillUserPolicy;

impl FaultPolicy for KillUserPolicy {
    fn decide(&self, info: &PageFaultInfo) -> FaultAction {
        if info.from_user && !info.reserved_bit_violation {
            FaultAction::KillFaultingTask
        } else {
            FaultAction::Halt
        }
    }
}

pub static ABORT_POLICY: AbortPolicy = AbortPolicy;
