//! `log` → UART
//!
//! Строки вида `[LEVEL target] message` в COM1.
//! Lines of the form `[LEVEL target] message` on COM1.

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Уровень по умолчанию / Default level.
const MAX_LEVEL: LevelFilter = if cfg!(debug_assertions) {
    LevelFilter::Debug
} else {
    LevelFilter::Info
};

struct UartLogger;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= MAX_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn  => "WARN ",
            Level::Info  => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        crate::kprintln!("[{} {}] {}", tag, record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: UartLogger = UartLogger;

pub fn init() {
    // Повторная установка — не ошибка для нас / A second install is harmless.
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(MAX_LEVEL);
    }
}
