//! Interrupt Descriptor Table (IDT) — x86_64
//!
//! Каждый вектор с заглушкой попадает в общий `dispatch`, который зовёт
//! обработчик, зарегистрированный через [`InterruptController`].
//! Every vector that has a stub lands in a common `dispatch`, which calls the
//! handler registered through [`InterruptController`].
//!
//! Векторы с заглушками / Vectors with stubs:
//!   0x00 #DE  — Division Error
//!   0x06 #UD  — Invalid Opcode
//!   0x08 #DF  — Double Fault     (IST 1)
//!   0x0D #GP  — General Protection Fault
//!   0x0E #PF  — Page Fault       → VMM
//!
//! PIC не трогаем, `sti` не делаем: ядру нужны только исключения.
//! The PIC is left alone and `sti` is never issued; only exceptions are used.

use core::arch::{asm, naked_asm};
use core::mem::size_of;

use spin::Mutex;
use tessera_mm::fault::{InterruptController, InterruptFrame, TrapHandler, PAGE_FAULT_VECTOR};

use super::gdt::{DOUBLE_FAULT_IST, KERNEL_CODE};

// ── Дескриптор прерывания / Interrupt descriptor (16 байт) ───────────────────

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low:  u16, // биты 0–15 обработчика  / handler bits 0–15
    selector:    u16, // сегмент кода / code segment (KERNEL_CODE)
    ist:         u8,  // Interrupt Stack Table index (0 = не использовать)
    type_attr:   u8,  // тип + атрибуты / type + attributes
    offset_mid:  u16, // биты 16–31 обработчика / handler bits 16–31
    offset_high: u32, // биты 32–63 обработчика / handler bits 32–63
    reserved:    u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0, selector: 0, ist: 0,
            type_attr: 0, offset_mid: 0,
            offset_high: 0, reserved: 0,
        }
    }

    /// Шлюз прерывания / Interrupt gate.
    ///
    /// 0x8E = Present | ring 0 | Interrupt Gate (IF сбрасывается / IF cleared)
    fn new(handler: u64, selector: u16, ist: u8) -> Self {
        Self {
            offset_low:  (handler & 0xFFFF) as u16,
            selector,
            ist,
            type_attr:   0x8E,
            offset_mid:  ((handler >> 16) & 0xFFFF) as u16,
            offset_high: (handler >> 32) as u32,
            reserved:    0,
        }
    }
}

// ── IDTR ─────────────────────────────────────────────────────────────────────

#[repr(C, packed)]
struct IdtDescriptor {
    size:   u16,
    offset: u64,
}

// ── Таблицы / Tables ─────────────────────────────────────────────────────────

const IDT_SIZE: usize = 256;

static IDT: Mutex<[IdtEntry; IDT_SIZE]> = Mutex::new([IdtEntry::missing(); IDT_SIZE]);
static HANDLERS: Mutex<[Option<TrapHandler>; IDT_SIZE]> = Mutex::new([None; IDT_SIZE]);

// ── Naked заглушки / Naked stubs ──────────────────────────────────────────────
//
// Стек после сохранения / Stack after the saves:
//   [rsp +  0 .. 72)  r11 … rax (9 scratch registers)
//   [rsp + 72]        error code (CPU или наш 0 / from the CPU or our 0)
//   [rsp + 80]        InterruptFrame { rip, cs, rflags, rsp, ss }
// 48 + 72 = 120 байт, ещё 8 выравнивают стек для call.
// 48 + 72 = 120 bytes; 8 more keep the call 16-byte aligned.

macro_rules! trap_stub {
    ($name:ident, $vector:expr $(, $dummy_error:literal)?) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                $($dummy_error,)?
                "push rax",
                "push rcx",
                "push rdx",
                "push rsi",
                "push rdi",
                "push r8",
                "push r9",
                "push r10",
                "push r11",
                "lea rdi, [rsp + 80]",
                "mov rsi, [rsp + 72]",
                "mov edx, {vector}",
                "sub rsp, 8",
                "call {dispatch}",
                "add rsp, 8",
                "pop r11",
                "pop r10",
                "pop r9",
                "pop r8",
                "pop rdi",
                "pop rsi",
                "pop rdx",
                "pop rcx",
                "pop rax",
                "add rsp, 8",
                "iretq",
                vector   = const $vector,
                dispatch = sym dispatch,
            );
        }
    };
}

trap_stub!(stub_divide_error,    0x00, "push 0");
trap_stub!(stub_invalid_opcode,  0x06, "push 0");
trap_stub!(stub_double_fault,    0x08);
trap_stub!(stub_gp_fault,        0x0D);
trap_stub!(stub_page_fault,      PAGE_FAULT_VECTOR);

/// (вектор, заглушка, IST) / (vector, stub, IST)
const STUBS: [(u8, unsafe extern "C" fn(), u8); 5] = [
    (0x00,              stub_divide_error,   0),
    (0x06,              stub_invalid_opcode, 0),
    (0x08,              stub_double_fault,   DOUBLE_FAULT_IST),
    (0x0D,              stub_gp_fault,       0),
    (PAGE_FAULT_VECTOR, stub_page_fault,     0),
];

extern "C" fn dispatch(frame: &InterruptFrame, error: u64, vector: u64) {
    let handler = HANDLERS.lock()[vector as usize];
    match handler {
        Some(handler) => handler(frame, error),
        None => panic!(
            "unhandled exception {:#x} (error={:#x}) at RIP={:#x}",
            vector, error, frame.rip
        ),
    }
}

// ── Обработчики исключений / Exception handlers ───────────────────────────────

fn handle_divide_error(frame: &InterruptFrame, _error: u64) {
    panic!("Division Error at RIP={:#x}", frame.rip);
}

fn handle_invalid_opcode(frame: &InterruptFrame, _error: u64) {
    panic!("Invalid Opcode at RIP={:#x}", frame.rip);
}

fn handle_double_fault(frame: &InterruptFrame, error: u64) {
    panic!("Double Fault (error={:#x}) at RIP={:#x}", error, frame.rip);
}

fn handle_general_protection(frame: &InterruptFrame, error: u64) {
    panic!("General Protection Fault (error={:#x}) at RIP={:#x}", error, frame.rip);
}

// ── Контроллер / Controller ───────────────────────────────────────────────────

/// Доступ к IDT ядра / Handle to the kernel IDT.
pub struct Idt;

impl InterruptController for Idt {
    fn register_handler(&mut self, vector: u8, handler: TrapHandler) {
        let Some(&(_, stub, ist)) = STUBS.iter().find(|(v, _, _)| *v == vector) else {
            log::warn!("idt: no entry stub for vector {:#x}, handler ignored", vector);
            return;
        };
        HANDLERS.lock()[vector as usize] = Some(handler);
        IDT.lock()[vector as usize] = IdtEntry::new(stub as usize as u64, KERNEL_CODE, ist);
        log::debug!("idt: vector {:#x} registered", vector);
    }
}

// ── Инициализация / Initialization ───────────────────────────────────────────

/// Заполнить исключения и загрузить IDTR.
/// Install the exception handlers and load IDTR.
pub fn init() {
    let mut idt = Idt;
    idt.register_handler(0x00, handle_divide_error);
    idt.register_handler(0x06, handle_invalid_opcode);
    idt.register_handler(0x08, handle_double_fault);
    idt.register_handler(0x0D, handle_general_protection);

    let descriptor = IdtDescriptor {
        size:   (size_of::<[IdtEntry; IDT_SIZE]>() - 1) as u16,
        offset: IDT.lock().as_ptr() as u64,
    };
    // SAFETY: IDT is a 'static table; later registrations edit it in place.
    unsafe { asm!("lidt [{desc}]", desc = in(reg) &descriptor) };
}
