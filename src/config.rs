//! Runtime configuration for the bridge. See [`BridgeConfig`].

use std::time::Duration;

/// The baud rate the robot's microcontroller firmware listens at.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// The substring used to pick the default device from the candidate list.
pub const DEFAULT_PREFERRED_DEVICE: &str = "ARDUINO";

/// Settings for the serial link and its worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// The baud rate used both for probing and for the long-lived connection.
    pub baud_rate: u32,
    /// A device whose descriptor contains this substring is selected by default.
    pub preferred_device: String,
    /// The timeout applied to blocking serial port reads and writes.
    pub read_timeout: Duration,
    /// How long the worker waits when an iteration neither wrote nor read anything.
    pub poll_interval: Duration,
    /// How long the worker sleeps per iteration while exclusive playback is active.
    pub backpressure_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            baud_rate: DEFAULT_BAUD_RATE,
            preferred_device: DEFAULT_PREFERRED_DEVICE.to_string(),
            read_timeout: Duration::from_millis(10),
            poll_interval: Duration::from_millis(1),
            backpressure_interval: Duration::from_millis(100),
        }
    }
}

impl BridgeConfig {
    /// Returns the longest time the worker can take to notice a stop request, which bounds the
    /// latency of a disconnect.
    pub fn max_stop_latency(&self) -> Duration {
        self.read_timeout + self.poll_interval.max(self.backpressure_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = BridgeConfig::default();

        assert_eq!(115_200, config.baud_rate);
        assert_eq!("ARDUINO", config.preferred_device);
        assert_eq!(Duration::from_millis(100), config.backpressure_interval);
    }

    #[test]
    fn test_max_stop_latency() {
        let config = BridgeConfig {
            read_timeout: Duration::from_millis(10),
            poll_interval: Duration::from_millis(1),
            backpressure_interval: Duration::from_millis(100),
            ..Default::default()
        };

        assert_eq!(Duration::from_millis(110), config.max_stop_latency());
    }
}
