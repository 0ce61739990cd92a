//! Server configuration.

use std::time::Duration;

use switchyard_proto::MAX_ENVELOPE_SIZE;

use crate::error::ServerError;

/// Default bind host (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default port for the stream variant
pub const DEFAULT_STREAM_PORT: u16 = 20060;

/// Default port for the datagram variant
pub const DEFAULT_DATAGRAM_PORT: u16 = 20070;

/// Idle time after which a connection is evicted
pub const DEFAULT_TIMEOUT_THRESHOLD: Duration = Duration::from_millis(10_000);

/// Interval between idle-timer ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Number of concurrently outstanding accept operations
pub const DEFAULT_ACCEPT_POOL_SIZE: usize = 100;

/// Time `stop` waits for tasks before aborting them
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Granularity of the runtime timer driving ticks
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// Server configuration.
///
/// Fields are plain data; [`ServerConfig::validate`] runs when the server
/// starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host or IP to bind
    pub host: String,
    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,
    /// Idle time at which a connection is evicted
    pub timeout_threshold: Duration,
    /// Idle-timer tick interval in whole milliseconds; every pooled
    /// connection ages by exactly this much per tick
    pub tick_interval: Duration,
    /// Concurrent accept operations (stream variant)
    pub accept_pool_size: usize,
    /// Largest envelope body accepted off the wire
    pub max_envelope_size: usize,
    /// Time `stop` waits for in-flight work before aborting it
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_STREAM_PORT,
            timeout_threshold: DEFAULT_TIMEOUT_THRESHOLD,
            tick_interval: DEFAULT_TICK_INTERVAL,
            accept_pool_size: DEFAULT_ACCEPT_POOL_SIZE,
            max_envelope_size: MAX_ENVELOPE_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ServerConfig {
    /// `host:port` string passed to the socket bind.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Check that the configuration can run.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.host.is_empty() {
            return Err(ServerError::Config("host must not be empty".to_string()));
        }
        if self.tick_interval < TIMER_RESOLUTION
            || self.tick_interval.subsec_nanos() % TIMER_RESOLUTION.subsec_nanos() != 0
        {
            return Err(ServerError::Config(format!(
                "tick interval must be a whole number of milliseconds, got {:?}",
                self.tick_interval
            )));
        }
        if self.timeout_threshold.is_zero() {
            return Err(ServerError::Config("timeout threshold must be non-zero".to_string()));
        }
        if self.accept_pool_size == 0 {
            return Err(ServerError::Config("accept pool size must be non-zero".to_string()));
        }
        if self.max_envelope_size == 0 || self.max_envelope_size > i32::MAX as usize {
            return Err(ServerError::Config(format!(
                "max envelope size must be in 1..={}, got {}",
                i32::MAX,
                self.max_envelope_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 20060);
        assert_eq!(config.timeout_threshold, Duration::from_secs(10));
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.accept_pool_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_tick_is_rejected() {
        let config = ServerConfig { tick_interval: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn sub_millisecond_tick_is_rejected() {
        for tick in [Duration::from_micros(500), Duration::from_micros(1_500)] {
            let config = ServerConfig {
                tick_interval: tick,
                timeout_threshold: Duration::from_millis(5),
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(ServerError::Config(_))), "{tick:?}");
        }
    }

    #[test]
    fn zero_accept_pool_is_rejected() {
        let config = ServerConfig { accept_pool_size: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let config = ServerConfig { host: "::1".to_string(), port: 9, ..Default::default() };
        assert_eq!(config.bind_address(), "[::1]:9");

        let config = ServerConfig { host: "127.0.0.1".to_string(), port: 9, ..Default::default() };
        assert_eq!(config.bind_address(), "127.0.0.1:9");
    }

    #[test]
    fn non_zero_settings_validate() {
        proptest!(|(
            timeout_ms in 1u64..100_000,
            tick_ms in 1u64..10_000,
            pool in 1usize..1_000,
            max in 1usize..=MAX_ENVELOPE_SIZE,
        )| {
            let config = ServerConfig {
                timeout_threshold: Duration::from_millis(timeout_ms),
                tick_interval: Duration::from_millis(tick_ms),
                accept_pool_size: pool,
                max_envelope_size: max,
                ..Default::default()
            };
            prop_assert!(config.validate().is_ok());
        });
    }
}
