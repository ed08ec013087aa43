//! Logging host function implementation.
//!
//! Guest modules emit logs through `env.log`; they are captured in the
//! call's [`CallContext`] and returned with the call outcome.

use modhost_core::store::{CallContext, LogLevel};
use tracing::{debug, error, info, warn};

/// Host implementation for guest logging.
///
/// Logs are both:
/// 1. Stored in the [`CallContext`] for the caller
/// 2. Emitted via the `tracing` crate for observability
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    pub fn log(ctx: &mut CallContext, level: LogLevel, message: &str) {
        ctx.log(level, message.to_string());

        let call_id = &ctx.call_id;
        match level {
            LogLevel::Debug => debug!(call_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(call_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(call_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(call_id, guest_log = true, "{}", message),
        }
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// 0=debug, 1=info, 2=warn, 3=error; unknown values map to info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Convert a [`LogLevel`] to a numeric value.
pub fn level_to_i32(level: LogLevel) -> i32 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
    }
}

/// Read a UTF-8 message of `len` bytes at `ptr` from guest memory.
///
/// Returns `None` (after logging why) for negative or out-of-bounds ranges.
/// Invalid UTF-8 is replaced rather than rejected.
#[allow(clippy::cast_sign_loss)]
pub(crate) fn read_message(memory: &[u8], ptr: i32, len: i32) -> Option<String> {
    if ptr < 0 || len < 0 {
        warn!(ptr, len, "Invalid pointer or length (negative value)");
        return None;
    }

    let start = ptr as usize;
    let Some(end) = start.checked_add(len as usize) else {
        warn!(ptr, len, "Pointer + length overflow");
        return None;
    };

    if end > memory.len() {
        warn!(
            start,
            end,
            memory_size = memory.len(),
            "Memory access out of bounds"
        );
        return None;
    }

    Some(String::from_utf8_lossy(&memory[start..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_stores_in_context() {
        let mut ctx = CallContext::with_call_id("call-123".into());

        LoggingHost::log(&mut ctx, LogLevel::Info, "Hello");
        LoggingHost::log(&mut ctx, LogLevel::Error, "World");

        assert_eq!(ctx.logs.len(), 2);
        assert_eq!(ctx.logs[0].message, "Hello");
        assert_eq!(ctx.logs[0].level, LogLevel::Info);
        assert_eq!(ctx.logs[1].level, LogLevel::Error);
    }

    #[test]
    fn test_level_round_trip() {
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert_eq!(level_from_i32(level_to_i32(level)), level);
        }
        assert_eq!(level_from_i32(99), LogLevel::Info);
    }

    #[test]
    fn test_read_message_bounds() {
        let memory = b"hello world";

        assert_eq!(read_message(memory, 0, 5).as_deref(), Some("hello"));
        assert_eq!(read_message(memory, 6, 5).as_deref(), Some("world"));
        assert_eq!(read_message(memory, 6, 6), None);
        assert_eq!(read_message(memory, -1, 2), None);
        assert_eq!(read_message(memory, i32::MAX, i32::MAX), None);
    }

    #[test]
    fn test_read_message_invalid_utf8() {
        let memory = [0xff, 0xfe, b'o', b'k'];
        let message = read_message(&memory, 0, 4).unwrap();
        assert!(message.ends_with("ok"));
    }
}
