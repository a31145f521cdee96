//! ==============================================================================
//! domain.rs - value types shared by every stage of the bridge
//! ==============================================================================
//!
//! purpose:
//!     - Reading: one decoded sensor frame (eight f32 values)
//!     - ConnectionState: where the device link currently is in its lifecycle
//!
//! relationships:
//!     - produced by: frame.rs (Reading), supervisor.rs (ConnectionState)
//!     - consumed by: queue.rs, forward.rs
//!
//! ==============================================================================

use std::fmt;

/// a decoded air-quality reading
///
/// field order matches the wire layout of the notification frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// mass concentration pm1.0 [ug/m3]
    pub pm1: f32,
    /// mass concentration pm2.5 [ug/m3]
    pub pm25: f32,
    /// mass concentration pm4.0 [ug/m3]
    pub pm4: f32,
    /// mass concentration pm10 [ug/m3]
    pub pm10: f32,
    /// relative humidity [%RH]
    pub humidity: f32,
    /// ambient temperature [C]
    pub temperature: f32,
    /// voc index
    pub voc: f32,
    /// nox index
    pub nox: f32,
}

impl Reading {
    /// field names as the state store knows them, in wire order
    pub const FIELD_NAMES: [&'static str; 8] = [
        "pm1",
        "pm25",
        "pm4",
        "pm10",
        "humidity",
        "temperature",
        "voc",
        "nox",
    ];

    /// build a reading from values in wire order
    pub fn from_values(v: [f32; 8]) -> Self {
        Self {
            pm1: v[0],
            pm25: v[1],
            pm4: v[2],
            pm10: v[3],
            humidity: v[4],
            temperature: v[5],
            voc: v[6],
            nox: v[7],
        }
    }

    /// values in wire order
    pub fn values(&self) -> [f32; 8] {
        [
            self.pm1,
            self.pm25,
            self.pm4,
            self.pm10,
            self.humidity,
            self.temperature,
            self.voc,
            self.nox,
        ]
    }

    /// (name, value) pairs in wire order
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, f32)> {
        Self::FIELD_NAMES.into_iter().zip(self.values())
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PM1={} PM2.5={} PM4={} PM10={} Humidity={} Temp={} VOC={} NOx={}",
            self.pm1,
            self.pm25,
            self.pm4,
            self.pm10,
            self.humidity,
            self.temperature,
            self.voc,
            self.nox
        )
    }
}

/// lifecycle of the device link
///
/// Disconnected -> Connecting -> Connected -> Subscribed, and back to
/// Disconnected on any link failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribed => "subscribed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_follow_wire_order() {
        let r = Reading::from_values([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let names: Vec<_> = r.fields().map(|(k, _)| k).collect();
        assert_eq!(names, Reading::FIELD_NAMES);
        assert_eq!(r.pm10, 4.0);
        assert_eq!(r.nox, 8.0);
        assert_eq!(r.values(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn state_starts_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Subscribed.to_string(), "subscribed");
    }
}
