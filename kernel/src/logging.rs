//! Console backend for the `log` facade.
//!
//! Lines look like `[CPU-n] [LEVEL] [module] message`. Modules can be
//! switched on and off individually at run time.

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

/// Maximum number of module filters
const MAX_MODULE_FILTERS: usize = 32;

fn colored_str(level: Level) -> &'static str {
    match level {
        Level::Trace => "\x1b[90mTRACE\x1b[0m", // Grey
        Level::Debug => "\x1b[36mDEBUG\x1b[0m", // Cyan
        Level::Info => "\x1b[32mINFO\x1b[0m",   // Green
        Level::Warn => "\x1b[33mWARN\x1b[0m",   // Yellow
        Level::Error => "\x1b[31mERROR\x1b[0m", // Red
    }
}

#[derive(Debug, Clone, Copy)]
struct ModuleFilter {
    name: [u8; 32],
    name_len: usize,
    enabled: bool,
}

impl ModuleFilter {
    const fn new() -> Self {
        Self {
            name: [0; 32],
            name_len: 0,
            enabled: true,
        }
    }

    fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = core::cmp::min(bytes.len(), self.name.len());
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name_len = len;
    }

    fn matches(&self, module: &str) -> bool {
        self.name_len != 0 && &self.name[..self.name_len] == module.as_bytes()
    }
}

struct Filters {
    level: LevelFilter,
    modules: [ModuleFilter; MAX_MODULE_FILTERS],
    count: usize,
    default_enabled: bool,
}

impl Filters {
    const fn new() -> Self {
        Self {
            level: LevelFilter::Info,
            modules: [ModuleFilter::new(); MAX_MODULE_FILTERS],
            count: 0,
            default_enabled: true,
        }
    }

    fn set_module(&mut self, module: &str, enabled: bool) -> bool {
        if let Some(filter) = self.modules[..self.count]
            .iter_mut()
            .find(|f| f.matches(module))
        {
            filter.enabled = enabled;
            return true;
        }
        if self.count == MAX_MODULE_FILTERS {
            return false;
        }
        let filter = &mut self.modules[self.count];
        filter.set_name(module);
        filter.enabled = enabled;
        self.count += 1;
        true
    }

    fn is_module_enabled(&self, module: &str) -> bool {
        self.modules[..self.count]
            .iter()
            .find(|f| f.matches(module))
            .map_or(self.default_enabled, |f| f.enabled)
    }
}

struct KernelLogger {
    filters: Mutex<Filters>,
    cpu_id: Once<fn() -> usize>,
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let filters = self.filters.lock();
        metadata.level() <= filters.level && filters.is_module_enabled(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let cpu = self.cpu_id.get().map(|f| f()).unwrap_or(0);
        println!(
            "[\x1b[35mCPU-{}\x1b[0m] [{}] [\x1b[34m{}\x1b[0m] {}",
            cpu,
            colored_str(record.level()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger {
    filters: Mutex::new(Filters::new()),
    cpu_id: Once::new(),
};

/// Install the logger (first call only) and set the level.
pub fn init(level: LevelFilter, cpu_id: fn() -> usize) {
    LOGGER.cpu_id.call_once(|| cpu_id);
    // A second kernel instance keeps the logger that is already installed.
    let _ = log::set_logger(&LOGGER);
    set_log_level(level);
}

pub fn set_log_level(level: LevelFilter) {
    LOGGER.filters.lock().level = level;
    log::set_max_level(level);
}

/// Set the default enabled state for modules not in filter list
pub fn set_default_module_enabled(enabled: bool) {
    LOGGER.filters.lock().default_enabled = enabled;
}

pub fn enable_module(module: &str) -> bool {
    LOGGER.filters.lock().set_module(module, true)
}

pub fn disable_module(module: &str) -> bool {
    LOGGER.filters.lock().set_module(module, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_filters_override_default() {
        let mut filters = Filters::new();
        assert!(filters.is_module_enabled("ckernel::task"));
        assert!(filters.set_module("ckernel::task", false));
        assert!(!filters.is_module_enabled("ckernel::task"));
        assert!(filters.is_module_enabled("ckernel::container"));
        filters.default_enabled = false;
        assert!(!filters.is_module_enabled("ckernel::container"));
        assert!(filters.set_module("ckernel::task", true));
        assert!(filters.is_module_enabled("ckernel::task"));
        assert_eq!(filters.count, 1);
    }

    #[test]
    fn filter_table_is_bounded() {
        let mut filters = Filters::new();
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        for i in 0..MAX_MODULE_FILTERS {
            let name = names[i % names.len()];
            let mut buf = [0u8; 8];
            buf[0] = name.as_bytes()[0];
            buf[1] = b'0' + (i / names.len()) as u8;
            let module = core::str::from_utf8(&buf[..2]).unwrap();
            assert!(filters.set_module(module, false));
        }
        assert!(!filters.set_module("overflow", false));
    }
}
