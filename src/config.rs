//! Configuration for Vimana
//!
//! Loads tunables from a TOML file. Every section has defaults, so a file
//! only needs to name the values it overrides.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub flight: FlightConfig,
    pub streaming: StreamingConfig,
    pub video: VideoConfig,
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

/// Flight command and state machine tunables
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlightConfig {
    /// Window for a hardware acknowledgement before a dispatched command
    /// (and its optimistic transition) is treated as failed
    pub confirmation_timeout_ms: u64,

    /// Telemetry older than this forces the link to be considered lost
    pub link_stale_ms: u64,

    /// Movement commands are followed by an automatic stop after this
    /// long unless superseded by another movement
    pub movement_safety_stop_ms: u64,

    /// Period of the supervisor's deadline scan
    pub supervisor_tick_ms: u64,

    /// Battery percentage at or below which the level is reported low
    pub low_battery_percent: u8,

    /// Battery percentage at or below which the level is reported critical
    pub critical_battery_percent: u8,
}

impl FlightConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn link_stale(&self) -> Duration {
        Duration::from_millis(self.link_stale_ms)
    }

    pub fn movement_safety_stop(&self) -> Duration {
        Duration::from_millis(self.movement_safety_stop_ms)
    }

    pub fn supervisor_tick(&self) -> Duration {
        Duration::from_millis(self.supervisor_tick_ms.max(1))
    }
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: 5000,
            link_stale_ms: 3000,
            movement_safety_stop_ms: 1200,
            supervisor_tick_ms: 20,
            low_battery_percent: 30,
            critical_battery_percent: 15,
        }
    }
}

/// Outbound re-broadcast configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Endpoint used by the first `start()`, injected by the settings layer
    pub default_url: String,

    /// A session still connecting after this long moves to `Error`
    pub connect_timeout_ms: u64,

    /// Ask the publisher to mute audio before starting
    pub mute_audio: bool,
}

impl StreamingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            default_url: "rtmp://localhost:1935/live/drone".to_string(),
            connect_timeout_ms: 10_000,
            mute_audio: true,
        }
    }
}

/// Local preview configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Depth of the bounded queue between the frame callback and the decoder.
    /// Frames arriving while the queue is full are dropped.
    pub frame_queue_depth: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_queue_depth: 8,
        }
    }
}

/// Mock vehicle parameters used by the simulation daemon
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Telemetry sample rate
    pub telemetry_hz: f32,
    /// Delay before the simulated flight controller acknowledges a command
    pub ack_latency_ms: u64,
    /// Video frame rate of the simulated camera feed
    pub frame_hz: f32,
    /// Size in bytes of each simulated encoded frame
    pub frame_size: usize,
    /// Home position latitude (degrees)
    pub start_latitude: f64,
    /// Home position longitude (degrees)
    pub start_longitude: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            telemetry_hz: 10.0,
            ack_latency_ms: 300,
            frame_hz: 30.0,
            frame_size: 4096,
            start_latitude: -23.5505,
            start_longitude: -46.6333,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// ```no_run
    /// use vimana::Config;
    ///
    /// let config = Config::load("vimana.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.flight.critical_battery_percent > self.flight.low_battery_percent {
            return Err(crate::error::Error::Config(format!(
                "critical_battery_percent ({}) must not exceed low_battery_percent ({})",
                self.flight.critical_battery_percent, self.flight.low_battery_percent
            )));
        }
        if self.video.frame_queue_depth == 0 {
            return Err(crate::error::Error::Config(
                "frame_queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
