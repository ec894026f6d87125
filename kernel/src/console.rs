use spin::Once;

/// Byte sink behind `print!`. The board layer installs the UART or SBI
/// console; until then output is dropped.
pub trait ConsoleSink: Send + Sync {
    fn write_str(&self, s: &str);
}

static SINK: Once<&'static dyn ConsoleSink> = Once::new();

/// Install the console sink. Only the first call takes effect.
pub fn set_sink(sink: &'static dyn ConsoleSink) {
    SINK.call_once(|| sink);
}

pub fn print_str(s: &str) {
    if let Some(sink) = SINK.get() {
        sink.write_str(s);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::_print_fmt(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::console::print_str("\n");
    };
    ($($arg:tt)*) => {
        $crate::console::_print_fmt(format_args!($($arg)*));
        $crate::console::print_str("\n");
    };
}

pub fn _print_fmt(args: core::fmt::Arguments) {
    use core::fmt::Write;
    let mut writer = ConsoleWriter;
    if writer.write_fmt(args).is_err() {
        print_str("Error: ");
        print_str(args.as_str().unwrap_or("Unknown error"));
    }
}

/// `fmt::Write` adapter over the installed sink.
pub struct ConsoleWriter;

impl core::fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        print_str(s);
        Ok(())
    }
}
