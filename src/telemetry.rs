//! Parsing of inbound telemetry lines and the last-known robot status they update.

use tracing::{debug, info};

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// The marker that identifies a battery level message.
const BATTERY_MARKER: &str = "Battery";

/// The battery level reported while no telemetry has been received on the current link.
pub const BATTERY_UNKNOWN: i32 = -999;
/// Battery levels above this value mean the robot is charging.
pub const BATTERY_CHARGING_THRESHOLD: i32 = 110;

/// An event parsed from a single inbound line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// A new battery level.
    Battery(i32),
}

/// Parses a complete inbound line (without its terminator) into a telemetry event.
///
/// Battery messages look like `Battery_87`. Lines that are not recognized, including battery
/// messages whose level is missing or not an integer, produce `None`.
pub fn parse_line(line: &str) -> Option<TelemetryEvent> {
    if !line.contains(BATTERY_MARKER) {
        return None;
    }

    let mut fields = line.split('_');
    let _marker = fields.next()?;
    let level = fields.next()?.trim().parse().ok()?;

    // Exactly one level field is accepted
    if fields.next().is_some() {
        return None;
    }

    Some(TelemetryEvent::Battery(level))
}

/// A battery level interpreted for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatteryStatus {
    /// No level has been received, or the robot is not connected.
    Unknown,
    /// The robot is charging. Holds the raw reported value.
    Charging(i32),
    /// The charge level in percent.
    Level(u8),
}

impl BatteryStatus {
    /// Interprets a raw battery level.
    pub fn from_level(level: i32) -> Self {
        if level < 0 {
            BatteryStatus::Unknown
        } else if level > BATTERY_CHARGING_THRESHOLD {
            BatteryStatus::Charging(level)
        } else {
            BatteryStatus::Level(level.min(100) as u8)
        }
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryStatus::Unknown => f.write_str("unknown"),
            BatteryStatus::Charging(_) => f.write_str("charging"),
            BatteryStatus::Level(l) => write!(f, "{}%", l),
        }
    }
}

/// A hook invoked with the new battery level after every telemetry update, used by the display to
/// redraw itself.
pub type RefreshHook = Arc<dyn Fn(i32) + Send + Sync>;

/// The last-known robot status. Cloning returns another handle to the same state.
///
/// Reads may be stale; the last write wins.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<Inner>,
}

struct Inner {
    battery: AtomicI32,
    refresh_hook: RwLock<Option<RefreshHook>>,
}

impl Telemetry {
    /// Returns a new `Telemetry` with an unknown battery level and no refresh hook.
    pub fn new() -> Self {
        Telemetry {
            inner: Arc::new(Inner {
                battery: AtomicI32::new(BATTERY_UNKNOWN),
                refresh_hook: RwLock::new(None),
            }),
        }
    }

    /// Returns the last-known raw battery level, or [`BATTERY_UNKNOWN`].
    pub fn battery(&self) -> i32 {
        self.inner.battery.load(Ordering::SeqCst)
    }

    /// Returns the last-known battery level interpreted for display.
    pub fn status(&self) -> BatteryStatus {
        BatteryStatus::from_level(self.battery())
    }

    /// Installs the hook to call after each update, replacing any previous one.
    ///
    /// The hook runs on the link worker thread. It may replace itself, but it must not connect or
    /// disconnect the link: a disconnect waits for the worker, which is still inside the hook.
    pub fn set_refresh_hook<F: Fn(i32) + Send + Sync + 'static>(&self, hook: F) {
        *self.inner.refresh_hook.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(hook));
    }

    /// Applies a parsed event and triggers a display refresh.
    pub fn apply(&self, event: &TelemetryEvent) {
        match *event {
            TelemetryEvent::Battery(level) => {
                info!("Battery level: {}", level);
                self.inner.battery.store(level, Ordering::SeqCst);
                self.refresh(level);
            }
        }
    }

    /// Resets the battery level to [`BATTERY_UNKNOWN`]. The display is not refreshed.
    pub fn reset(&self) {
        debug!("Battery level reset");
        self.inner.battery.store(BATTERY_UNKNOWN, Ordering::SeqCst);
    }

    fn refresh(&self, level: i32) {
        // The lock is released before calling the hook
        let hook = self.inner.refresh_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(h) = hook {
            h(level);
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Telemetry::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_parse_battery() {
        assert_eq!(Some(TelemetryEvent::Battery(87)), parse_line("Battery_87"));
        assert_eq!(Some(TelemetryEvent::Battery(0)), parse_line("Battery_0"));
        assert_eq!(Some(TelemetryEvent::Battery(120)), parse_line("Battery_120"));
        assert_eq!(Some(TelemetryEvent::Battery(-1)), parse_line("Battery_-1"));
        // The marker may appear anywhere in the first field
        assert_eq!(Some(TelemetryEvent::Battery(55)), parse_line("Main Battery_55"));
        // Surrounding whitespace in the level is tolerated
        assert_eq!(Some(TelemetryEvent::Battery(64)), parse_line("Battery_64 "));
    }

    #[test]
    fn test_parse_malformed_battery() {
        assert_eq!(None, parse_line("Battery_"));
        assert_eq!(None, parse_line("Battery"));
        assert_eq!(None, parse_line("Battery_abc"));
        assert_eq!(None, parse_line("Battery_4.5"));
        assert_eq!(None, parse_line("Battery_12_34"));
        assert_eq!(None, parse_line("Battery_99999999999"));
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(None, parse_line(""));
        assert_eq!(None, parse_line("Servo_12"));
        assert_eq!(None, parse_line("battery_50"));
        assert_eq!(None, parse_line("Ready"));
    }

    #[test]
    fn test_battery_status() {
        assert_eq!(BatteryStatus::Unknown, BatteryStatus::from_level(BATTERY_UNKNOWN));
        assert_eq!(BatteryStatus::Unknown, BatteryStatus::from_level(-1));
        assert_eq!(BatteryStatus::Level(0), BatteryStatus::from_level(0));
        assert_eq!(BatteryStatus::Level(87), BatteryStatus::from_level(87));
        assert_eq!(BatteryStatus::Level(100), BatteryStatus::from_level(105));
        assert_eq!(BatteryStatus::Level(100), BatteryStatus::from_level(110));
        assert_eq!(BatteryStatus::Charging(111), BatteryStatus::from_level(111));

        assert_eq!("87%", BatteryStatus::Level(87).to_string());
        assert_eq!("charging", BatteryStatus::Charging(120).to_string());
        assert_eq!("unknown", BatteryStatus::Unknown.to_string());
    }

    #[test]
    fn test_telemetry_apply_and_reset() {
        let telemetry = Telemetry::new();
        assert_eq!(BATTERY_UNKNOWN, telemetry.battery());
        assert_eq!(BatteryStatus::Unknown, telemetry.status());

        telemetry.apply(&TelemetryEvent::Battery(42));
        assert_eq!(42, telemetry.battery());

        // Handles share state
        let handle = telemetry.clone();
        handle.apply(&TelemetryEvent::Battery(43));
        assert_eq!(43, telemetry.battery());

        telemetry.reset();
        assert_eq!(BATTERY_UNKNOWN, handle.battery());
    }

    #[test]
    fn test_telemetry_refresh_hook() {
        let telemetry = Telemetry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        // Updates before a hook is installed are still stored
        telemetry.apply(&TelemetryEvent::Battery(10));

        let seen_clone = seen.clone();
        telemetry.set_refresh_hook(move |level| seen_clone.lock().unwrap().push(level));

        telemetry.apply(&TelemetryEvent::Battery(20));
        telemetry.apply(&TelemetryEvent::Battery(30));
        // Resetting does not redraw
        telemetry.reset();

        assert_eq!(vec![20, 30], *seen.lock().unwrap());
    }

    #[test]
    fn test_telemetry_hook_replaces_itself() {
        let telemetry = Telemetry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = telemetry.clone();
        let seen_clone = seen.clone();
        telemetry.set_refresh_hook(move |_| {
            let seen = seen_clone.clone();
            handle.set_refresh_hook(move |level| seen.lock().unwrap().push(level));
        });

        // The first update swaps the hook; only the second reaches the new one
        telemetry.apply(&TelemetryEvent::Battery(1));
        telemetry.apply(&TelemetryEvent::Battery(2));

        assert_eq!(vec![2], *seen.lock().unwrap());
    }
}
