//! Debug logging for vmm-loader.
//!
//! All crate code logs through the `log` facade. [`init`] installs a
//! stderr logger whose verbosity comes from the `VMM_LOADER_DEBUG`
//! environment variable:
//! - `VMM_LOADER_DEBUG=1` - Enable all debug output
//! - `VMM_LOADER_DEBUG=elf` - Enable only ELF parsing logs
//! - `VMM_LOADER_DEBUG=mapper` - Enable only page mapping logs
//! - `VMM_LOADER_DEBUG=elf,loader` - Enable multiple categories
//!
//! Without the variable only warnings and errors are printed.

use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Debug categories that can be enabled. Each one is a `log` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCategory {
    Elf,
    Mapper,
    Loader,
    Hypervisor,
}

impl DebugCategory {
    fn from_target(target: &str) -> Option<Self> {
        match target {
            "elf" => Some(DebugCategory::Elf),
            "mapper" => Some(DebugCategory::Mapper),
            "loader" => Some(DebugCategory::Loader),
            "hypervisor" => Some(DebugCategory::Hypervisor),
            _ => None,
        }
    }
}

static LOGGER: OnceLock<DebugLogger> = OnceLock::new();

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DebugConfig {
    enabled: bool,
    elf: bool,
    mapper: bool,
    loader: bool,
    hypervisor: bool,
}

impl DebugConfig {
    fn from_env() -> Self {
        match std::env::var("VMM_LOADER_DEBUG") {
            Ok(val) => Self::parse(&val),
            Err(_) => Self::default(),
        }
    }

    /// Parse a `VMM_LOADER_DEBUG` value.
    pub fn parse(val: &str) -> Self {
        let val = val.trim().to_lowercase();
        if val.is_empty() || val == "0" {
            return Self::default();
        }
        if val == "1" || val == "all" {
            return Self {
                enabled: true,
                elf: true,
                mapper: true,
                loader: true,
                hypervisor: true,
            };
        }
        Self {
            enabled: true,
            elf: val.contains("elf"),
            mapper: val.contains("mapper"),
            loader: val.contains("loader"),
            hypervisor: val.contains("hypervisor"),
        }
    }

    /// Check if debug logging is enabled for a category.
    pub fn is_enabled(&self, category: DebugCategory) -> bool {
        if !self.enabled {
            return false;
        }
        match category {
            DebugCategory::Elf => self.elf,
            DebugCategory::Mapper => self.mapper,
            DebugCategory::Loader => self.loader,
            DebugCategory::Hypervisor => self.hypervisor,
        }
    }

    fn allows(&self, metadata: &Metadata<'_>) -> bool {
        if metadata.level() <= Level::Warn {
            return true;
        }
        let category = metadata
            .target()
            .split("::")
            .next()
            .and_then(DebugCategory::from_target);
        match category {
            Some(category) => self.is_enabled(category),
            None => false,
        }
    }
}

struct DebugLogger {
    config: DebugConfig,
}

impl Log for DebugLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.config.allows(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the stderr logger. Subsequent calls are no-ops.
pub fn init() {
    let logger = LOGGER.get_or_init(|| DebugLogger {
        config: DebugConfig::from_env(),
    });
    let max = if logger.config.enabled {
        LevelFilter::Trace
    } else {
        LevelFilter::Warn
    };
    if log::set_logger(logger).is_ok() {
        log::set_max_level(max);
    }
}
