//! UART Serial driver — COM1 (0x3F8)
//!
//! Используется для отладочного вывода в QEMU.
//! Used for debug output in QEMU: -serial stdio

use core::fmt;
use spin::Mutex;

const COM1: u16 = 0x3F8;

/// Line Status Register: THR пуст / transmit holding register empty.
const LSR_THR_EMPTY: u8 = 0x20;

unsafe fn outb(port: u16, val: u8) {
    // SAFETY: callers only pass COM1 register ports.
    unsafe { core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack)) };
}

unsafe fn inb(port: u16) -> u8 {
    let val: u8;
    // SAFETY: as for `outb`.
    unsafe { core::arch::asm!("in al, dx", out("al") val, in("dx") port, options(nomem, nostack)) };
    val
}

/// Инициализировать COM1 на 115200 baud, без прерываний.
/// Initialize COM1 at 115200 baud, polled.
pub fn init() {
    // SAFETY: standard 16550 programming sequence on COM1.
    unsafe {
        outb(COM1 + 1, 0x00); // Отключить прерывания / Disable interrupts
        outb(COM1 + 3, 0x80); // Включить DLAB (Divisor Latch)
        outb(COM1,     0x01); // Делитель 1 → 115200 baud
        outb(COM1 + 1, 0x00);
        outb(COM1 + 3, 0x03); // 8 бит, нет чётности, 1 стоп-бит
        outb(COM1 + 2, 0xC7); // Enable FIFO, clear, 14-byte threshold
        outb(COM1 + 4, 0x03); // DTR + RTS, IRQ выключен / IRQ line off
    }
}

/// Ждать пока буфер передачи свободен и отправить байт.
/// Wait for transmit buffer empty and send byte.
fn send_byte(byte: u8) {
    // SAFETY: polling LSR and writing THR of COM1.
    unsafe {
        while inb(COM1 + 5) & LSR_THR_EMPTY == 0 {
            core::hint::spin_loop();
        }
        outb(COM1, byte);
    }
}

struct UartWriter;

impl fmt::Write for UartWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                send_byte(b'\r');
            }
            send_byte(byte);
        }
        Ok(())
    }
}

static UART_LOCK: Mutex<UartWriter> = Mutex::new(UartWriter);

/// Внутренняя функция для макроса kprint!
/// Internal function for kprint! macro
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    UART_LOCK.lock().write_fmt(args).ok();
}

/// Вывод из паники: не ждём лок, если его держит упавший код.
/// Panic-path output: does not wait on a lock held by the code that died.
pub fn _print_unlocked(args: fmt::Arguments) {
    use fmt::Write;
    UartWriter.write_fmt(args).ok();
}
