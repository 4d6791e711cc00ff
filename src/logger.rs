use chrono::Local;
use std::fmt;
use std::sync::OnceLock;

fn threshold() -> u8 {
    static LEVEL: OnceLock<u8> = OnceLock::new();
    *LEVEL.get_or_init(|| match std::env::var("ROWBIT_LOG").as_deref() {
        Ok("off") => 4,
        Ok("error") => 3,
        Ok("warn") => 2,
        Ok("debug") => 0,
        _ => 1,
    })
}

fn emit(rank: u8, level: &str, args: fmt::Arguments) {
    if rank >= threshold() {
        let now = Local::now();
        println!("[{}] {} {}", now.format("%Y-%m-%d %H:%M:%S"), level, args);
    }
}

pub fn debug(args: fmt::Arguments) {
    emit(0, "DEBUG", args);
}

pub fn info(args: fmt::Arguments) {
    emit(1, "INFO", args);
}

pub fn warn(args: fmt::Arguments) {
    emit(2, "WARN", args);
}

pub fn error(args: fmt::Arguments) {
    emit(3, "ERROR", args);
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::logger::debug(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::logger::info(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::logger::warn(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::logger::error(format_args!($($arg)*))
    };
}
