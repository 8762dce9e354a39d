use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::reading::SensorReading;

/// Depth-1 overwrite channel between acquisition and reporting.
///
/// `push` never blocks and replaces any reading the consumer has not taken
/// yet; `pop` waits until a reading is present and removes it.
pub struct TelemetryQueue {
    slot: Signal<CriticalSectionRawMutex, SensorReading>,
}

impl TelemetryQueue {
    pub const fn new() -> Self {
        Self { slot: Signal::new() }
    }

    /// Stores `reading`, returning the unconsumed reading it replaced.
    pub fn push(&self, reading: SensorReading) -> Option<SensorReading> {
        // Single producer: nothing else can fill the slot between take and signal.
        let superseded = self.slot.try_take();
        self.slot.signal(reading);
        if superseded.is_some() {
            log::debug!("telemetry: unconsumed reading superseded");
        }
        superseded
    }

    pub async fn pop(&self) -> SensorReading {
        self.slot.wait().await
    }

    pub fn try_pop(&self) -> Option<SensorReading> {
        self.slot.try_take()
    }

    pub fn is_empty(&self) -> bool {
        !self.slot.signaled()
    }
}

impl Default for TelemetryQueue {
    fn default() -> Self {
        Self::new()
    }
}
