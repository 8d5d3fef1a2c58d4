//! Coordinator and stage configuration.
//!
//! [`RepaintConfig`] controls a single
//! [`RepaintCoordinator`](crate::render::RepaintCoordinator): how long it waits
//! to absorb bursts of paint requests, how it is named in logs, and how many
//! events its broadcast bus buffers. [`StageConfig`] does the same for a
//! [`StageWorker`](crate::worker::StageWorker).
//!
//! Both provide defaults via [`Default`] and a fluent builder with validation.
//! Nothing here is process-wide: every coordinator receives its own copy.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use canvas_repaint::config::RepaintConfig;
//! let cfg = RepaintConfig::default();
//! assert_eq!(cfg.debounce.as_millis(), 10);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use std::time::Duration;
//! use canvas_repaint::config::RepaintConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = RepaintConfig::builder()
//!     .name("navigator")
//!     .debounce(Duration::from_millis(25))
//!     .event_capacity(64)
//!     .build()?;
//! # Ok(()) }
//! ```
//!
//! # Errors
//!
//! Builder validation returns [`ConfigError`] for an empty name, a debounce
//! window above [`MAX_DEBOUNCE`], or a zero event capacity.

use std::fmt;
use std::time::Duration;

/// Debounce window used when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(10);

/// Upper bound for any debounce window. Anything longer is a timer, not a debounce.
pub const MAX_DEBOUNCE: Duration = Duration::from_secs(1);

/// Default capacity for the repaint event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct RepaintConfig {
    /// Name used in log lines and task names
    pub name: String,
    /// Time to wait after the first request of a burst before merging
    pub debounce: Duration,
    /// Number of events buffered for slow subscribers
    pub event_capacity: usize,
}

impl Default for RepaintConfig {
    fn default() -> Self {
        Self {
            name: "canvas-repainter".to_string(),
            debounce: DEFAULT_DEBOUNCE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RepaintConfig {
    pub fn builder() -> RepaintConfigBuilder {
        RepaintConfigBuilder::default()
    }

    /// Checks a config that was assembled without the builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.name)?;
        validate_debounce(self.debounce)?;
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }
}

/// Builder for [`RepaintConfig`].
#[derive(Debug, Clone, Default)]
pub struct RepaintConfigBuilder {
    inner: RepaintConfig,
}

impl RepaintConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut RepaintConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn name<S: Into<String>>(self, name: S) -> Self { self.map(|c| c.name = name.into()) }
    pub fn debounce(self, window: Duration) -> Self { self.map(|c| c.debounce = window) }
    pub fn event_capacity(self, n: usize) -> Self { self.map(|c| c.event_capacity = n) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<RepaintConfig, ConfigError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

/// Configuration for a single [`StageWorker`](crate::worker::StageWorker).
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub name: String,
    /// Stages run as soon as they are signalled unless a window is set.
    pub debounce: Duration,
}

impl StageConfig {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            debounce: Duration::ZERO,
        }
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.name)?;
        validate_debounce(self.debounce)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyName,
    DebounceTooLong(Duration),
    ZeroEventCapacity,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyName => write!(f, "name must not be empty"),
            ConfigError::DebounceTooLong(d) => write!(
                f,
                "debounce window {d:?} is too long (expected at most {MAX_DEBOUNCE:?})"
            ),
            ConfigError::ZeroEventCapacity => write!(f, "event_capacity must be at least 1"),
        }
    }
}
impl std::error::Error for ConfigError {}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }
    Ok(())
}

fn validate_debounce(window: Duration) -> Result<(), ConfigError> {
    if window > MAX_DEBOUNCE {
        return Err(ConfigError::DebounceTooLong(window));
    }
    Ok(())
}
