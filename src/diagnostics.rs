//! Logging setup and crash diagnostics.
//!
//! - [`init_logging`]: fmt subscriber filtered by `RUST_LOG`
//! - [`install_crash_handler`]: panic hook logging a backtrace and the
//!   process memory map
//! - [`fatal`]: log and exit with status 1
//! - [`hexdump`]: offset/hex/ASCII rendering for rejected frames

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::sync::Once;

use tracing_subscriber::EnvFilter;

static CRASH_HANDLER: Once = Once::new();

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns `false` if a
/// subscriber was already installed, in which case the existing one stays.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok();

    if !installed {
        tracing::debug!("Global tracing subscriber already initialized");
    }
    installed
}

/// Register a panic hook that logs the panic with a backtrace and, on Linux,
/// the memory map. The previous hook still runs afterwards.
///
/// Only the first call has any effect.
pub fn install_crash_handler() {
    CRASH_HANDLER.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown".to_string());
            let thread = std::thread::current();

            tracing::error!(
                thread = thread.name().unwrap_or("unnamed"),
                location = %location,
                "Panic: {}\n{}",
                panic_message(info.payload()),
                Backtrace::force_capture()
            );
            if let Some(maps) = memory_map() {
                tracing::error!("Memory map:\n{}", maps);
            }

            previous(info);
        }));
    });
}

/// Log an unrecoverable error with a backtrace and exit with status 1.
pub fn fatal(message: &str) -> ! {
    tracing::error!("FATAL: {}\n{}", message, Backtrace::force_capture());
    std::process::exit(1)
}

/// Text of a panic payload, if it carried one.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Render bytes as `offset: hex | ascii` lines, 16 bytes per line.
///
/// ```
/// let dump = korra_node::diagnostics::hexdump(b"KRRA");
/// assert!(dump.starts_with("0000: 4b 52 52 41 "));
/// assert!(dump.trim_end().ends_with("| KRRA"));
/// ```
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() / 16 + 1) * 76);

    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}: ", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str(" | ");
        for &byte in chunk {
            out.push(if (32..=126).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}

#[cfg(target_os = "linux")]
fn memory_map() -> Option<String> {
    std::fs::read_to_string("/proc/self/maps").ok()
}

#[cfg(not(target_os = "linux"))]
fn memory_map() -> Option<String> {
    None
}
