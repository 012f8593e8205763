//! Logging facilities.
//!
//! The macros mirror the usual simulation log layout `[<time> <LEVEL> <component>] <message>`,
//! where time is the simulated time in milliseconds.

use atty::Stream;
use colored::{Color, ColoredString, Colorize};

use crate::frequency::Time;

/// Applies the color to the string if stderr (log) goes to console.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

/// Converts simulated time in microseconds to milliseconds for log output.
pub fn millis(time: Time) -> f64 {
    time as f64 / 1000.
}

/// Logs a message at the info level.
#[macro_export]
macro_rules! log_info {
    ($name:expr, $time:expr, $msg:expr) => (
        ::log::info!(
            target: $name,
            "[{:.3} {}  {}] {}",
            $crate::log::millis($time), $crate::log::get_colored("INFO", $crate::colored::Color::Green), $name, $msg
        )
    );
    ($name:expr, $time:expr, $format:expr, $($arg:tt)+) => (
        ::log::info!(
            target: $name,
            concat!("[{:.3} {}  {}] ", $format),
            $crate::log::millis($time), $crate::log::get_colored("INFO", $crate::colored::Color::Green), $name, $($arg)+
        )
    );
}

/// Logs a message at the debug level.
#[macro_export]
macro_rules! log_debug {
    ($name:expr, $time:expr, $msg:expr) => (
        ::log::debug!(
            target: $name,
            "[{:.3} {} {}] {}",
            $crate::log::millis($time), $crate::log::get_colored("DEBUG", $crate::colored::Color::Blue), $name, $msg
        )
    );
    ($name:expr, $time:expr, $format:expr, $($arg:tt)+) => (
        ::log::debug!(
            target: $name,
            concat!("[{:.3} {} {}] ", $format),
            $crate::log::millis($time), $crate::log::get_colored("DEBUG", $crate::colored::Color::Blue), $name, $($arg)+
        )
    );
}

/// Logs a message at the trace level.
#[macro_export]
macro_rules! log_trace {
    ($name:expr, $time:expr, $msg:expr) => (
        ::log::trace!(
            target: $name,
            "[{:.3} {} {}] {}",
            $crate::log::millis($time), $crate::log::get_colored("TRACE", $crate::colored::Color::Cyan), $name, $msg
        )
    );
    ($name:expr, $time:expr, $format:expr, $($arg:tt)+) => (
        ::log::trace!(
            target: $name,
            concat!("[{:.3} {} {}] ", $format),
            $crate::log::millis($time), $crate::log::get_colored("TRACE", $crate::colored::Color::Cyan), $name, $($arg)+
        )
    );
}

/// Logs a message at the warn level.
#[macro_export]
macro_rules! log_warn {
    ($name:expr, $time:expr, $msg:expr) => (
        ::log::warn!(
            target: $name,
            "[{:.3} {}  {}] {}",
            $crate::log::millis($time), $crate::log::get_colored("WARN", $crate::colored::Color::Yellow), $name, $msg
        )
    );
    ($name:expr, $time:expr, $format:expr, $($arg:tt)+) => (
        ::log::warn!(
            target: $name,
            concat!("[{:.3} {}  {}] ", $format),
            $crate::log::millis($time), $crate::log::get_colored("WARN", $crate::colored::Color::Yellow), $name, $($arg)+
        )
    );
}

/// Logs a message at the error level.
#[macro_export]
macro_rules! log_error {
    ($name:expr, $time:expr, $msg:expr) => (
        ::log::error!(
            target: $name,
            "[{:.3} {} {}] {}",
            $crate::log::millis($time), $crate::log::get_colored("ERROR", $crate::colored::Color::Red), $name, $msg
        )
    );
    ($name:expr, $time:expr, $format:expr, $($arg:tt)+) => (
        ::log::error!(
            target: $name,
            concat!("[{:.3} {} {}] ", $format),
            $crate::log::millis($time), $crate::log::get_colored("ERROR", $crate::colored::Color::Red), $name, $($arg)+
        )
    );
}
