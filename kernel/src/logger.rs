//! Kernel logger
//!
//! Routes the `log` facade to a console sink (serial port, debug console)
//! registered by the platform at boot.

use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

/// Output device for formatted log lines.
pub trait ConsoleSink: Sync {
    fn write_bytes(&self, bytes: &[u8]);
}

/// Logger that formats into a stack buffer and hands it to the sink
struct ConsoleLogger {
    sink: &'static dyn ConsoleSink,
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: [LEVEL] target: message
        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        use core::fmt::Write;
        let mut buf = [0u8; 512];
        let pos = {
            let mut writer = BufferWriter { buffer: &mut buf, pos: 0 };
            let _ = core::write!(
                &mut writer,
                "[{}] {}: {}\n",
                level_str,
                record.target(),
                record.args()
            );
            writer.pos
        };
        self.sink.write_bytes(&buf[..pos]);
    }

    fn flush(&self) {}
}

/// Simple buffer writer for formatting without alloc
///
/// Output past the end of the buffer is silently truncated.
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl<'a> core::fmt::Write for BufferWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}

static LOGGER: Once<ConsoleLogger> = Once::new();

/// Initialize the logger
///
/// Called by the platform once during boot, before `KernelContext::init`
/// (which then applies `KernelConfig::log_level`). Returns `false` when
/// another logger was already installed.
pub fn init(sink: &'static dyn ConsoleSink, level: LevelFilter) -> bool {
    let logger = LOGGER.call_once(|| ConsoleLogger { sink });
    match log::set_logger(logger) {
        Ok(()) => {
            log::set_max_level(level);
            true
        }
        Err(_) => {
            sink.write_bytes(b"[LOGGER] logger already installed\n");
            false
        }
    }
}

/// Change the maximum level at runtime
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Log at DEBUG level
#[inline]
pub fn debug(msg: &str) {
    log::debug!("{}", msg);
}

/// Log at INFO level
#[inline]
pub fn info(msg: &str) {
    log::info!("{}", msg);
}

/// Log at WARN level
#[inline]
pub fn warn(msg: &str) {
    log::warn!("{}", msg);
}

/// Log at ERROR level
#[inline]
pub fn error(msg: &str) {
    log::error!("{}", msg);
}
