//! Library configuration, read from the environment or built programmatically.

use crate::consts::DEFAULT_INTERVAL_US;
use crate::{Error, Result};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the software multiplexing time slice in microseconds.
pub const ENV_MULTIPLEX_INTERVAL: &str = "PAPI_MULTIPLEX_INTERVAL_US";
/// Environment variable holding the software overflow polling interval in microseconds.
pub const ENV_OVERFLOW_INTERVAL: &str = "PAPI_OVERFLOW_INTERVAL_US";
/// Environment variable naming an extra preset/user event definition file.
pub const ENV_EVENTS: &str = "PAPI_EVENTS";
/// Environment variable naming a directory of JSON PMU event descriptions.
pub const ENV_PMU_EVENTS: &str = "PAPI_PMU_EVENTS";
/// Environment variable listing components to disable, comma separated.
pub const ENV_DISABLE_COMPONENTS: &str = "PAPI_DISABLE_COMPONENTS";
/// Environment variable enabling the emulated `example` component.
pub const ENV_EXAMPLE_COMPONENT: &str = "PAPI_EXAMPLE_COMPONENT";

/// Configuration of a [`crate::Library`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Time slice of software multiplexing.
    pub multiplex_interval: Duration,
    /// Polling interval of software overflow detection.
    pub overflow_interval: Duration,
    /// Extra preset and user event definitions.
    pub events_file: Option<PathBuf>,
    /// Directory of JSON PMU event descriptions for the perf_event component.
    pub pmu_events: Option<PathBuf>,
    /// Names of components that must not be initialised.
    pub disabled_components: Vec<String>,
    /// Register the emulated `example` component.
    pub example_component: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            multiplex_interval: Duration::from_micros(DEFAULT_INTERVAL_US),
            overflow_interval: Duration::from_micros(DEFAULT_INTERVAL_US),
            events_file: None,
            pmu_events: None,
            disabled_components: vec![],
            example_component: false,
        }
    }
}

/// Parse an interval in microseconds, which must be positive.
fn _parse_interval(val: &str) -> Result<Duration> {
    let us = val.trim().parse::<u64>().map_err(|_| Error::Invalid)?;
    if us == 0 {
        return Err(Error::Invalid);
    }
    Ok(Duration::from_micros(us))
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Config::from_vars(|k| std::env::var(k).ok())
    }

    /// Read the configuration through `var`, which returns the value of a variable if it is set.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        if let Some(v) = var(ENV_MULTIPLEX_INTERVAL) {
            config.multiplex_interval = _parse_interval(&v)?;
        }
        if let Some(v) = var(ENV_OVERFLOW_INTERVAL) {
            config.overflow_interval = _parse_interval(&v)?;
        }
        config.events_file = var(ENV_EVENTS).filter(|v| !v.is_empty()).map(PathBuf::from);
        config.pmu_events = var(ENV_PMU_EVENTS).filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(v) = var(ENV_DISABLE_COMPONENTS) {
            config.disabled_components = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        config.example_component = var(ENV_EXAMPLE_COMPONENT).is_some();
        debug!("Configuration {:?}", config);
        Ok(config)
    }
}
