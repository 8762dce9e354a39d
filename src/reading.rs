use crate::classify::ColorLabel;
use crate::color::Gain;
use crate::config::OUT_OF_RANGE_MM;

/// Raw value the ranging driver reports when the device never became ready.
pub const TIMEOUT_SENTINEL: u16 = 0xFFFF;

/// One sample of the four color channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Channels {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub clear: u16,
}

impl Channels {
    pub const fn new(red: u16, green: u16, blue: u16, clear: u16) -> Self {
        Self {
            red,
            green,
            blue,
            clear,
        }
    }
}

/// Outcome of one ranging cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Millimeters(u16),
    Timeout,
}

impl Distance {
    pub fn from_raw(raw: u16) -> Self {
        if raw == TIMEOUT_SENTINEL {
            Distance::Timeout
        } else {
            Distance::Millimeters(raw)
        }
    }

    /// Value as carried on the wire, the sentinel for a timeout.
    pub fn raw(self) -> u16 {
        match self {
            Distance::Millimeters(mm) => mm,
            Distance::Timeout => TIMEOUT_SENTINEL,
        }
    }

    /// Millimeters, if the reading may drive the proximity decision.
    pub fn in_range(self) -> Option<u16> {
        match self {
            Distance::Millimeters(mm) if mm < OUT_OF_RANGE_MM => Some(mm),
            _ => None,
        }
    }
}

/// Composite reading produced once per accepted acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub channels: Channels,
    pub distance: Distance,
    pub label: ColorLabel,
    pub gain: Gain,
}
