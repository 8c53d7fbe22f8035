// Fatal misuse policy
//
// Misuse of the recording API or the frame loop (illegal layout transitions,
// commands without pipeline state, double begin/end) is a programming error.
// These checks stay on in every build profile: the message goes to the log
// first, then the thread panics. Device call failures are not routed through
// here; they travel as `anyhow::Error` to whoever drives the frame loop.

use std::fmt;

/// Log `message` at error level and panic with it.
#[cold]
#[track_caller]
pub fn fatal(message: impl fmt::Display) -> ! {
    log::error!("{}", message);
    panic!("{}", message);
}

/// `assert!` that reports through [`fatal`].
#[macro_export]
macro_rules! fatal_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::error::fatal(format_args!($($arg)+));
        }
    };
}
