//! Composition root.
//!
//! [`Pipeline`] owns the state shared between the units: the telemetry
//! queue, the published link state and the in-flight guard. It lives in a
//! `static` on the device and hands out the acquisition, reporting and
//! connectivity units, each borrowing only what it needs.

use embedded_hal_async::delay::DelayNs;

use crate::classify::ClassifierPolicy;
use crate::clock::Clock;
use crate::color::{AutoGain, ColorSensor, Gain, Sample};
use crate::config::{AcquisitionConfig, ReporterConfig};
use crate::distance::Ranging;
use crate::indicator::{Indicator, LedState};
use crate::link::{Connectivity, LinkState, Radio};
use crate::queue::TelemetryQueue;
use crate::reading::{Distance, SensorReading};
use crate::report::{InFlightGuard, Reporter, Transport};

pub struct Pipeline {
    queue: TelemetryQueue,
    link: LinkState,
    guard: InFlightGuard,
}

impl Pipeline {
    pub const fn new() -> Self {
        Self {
            queue: TelemetryQueue::new(),
            link: LinkState::new(),
            guard: InFlightGuard::new(),
        }
    }

    pub fn queue(&self) -> &TelemetryQueue {
        &self.queue
    }

    pub fn link(&self) -> &LinkState {
        &self.link
    }

    pub fn guard(&self) -> &InFlightGuard {
        &self.guard
    }

    pub fn acquisition<R, S, P, I>(
        &self,
        ranging: R,
        color: S,
        auto_gain: AutoGain,
        policy: P,
        indicator: I,
    ) -> Acquisition<'_, R, S, P, I> {
        Acquisition {
            queue: &self.queue,
            ranging,
            color,
            auto_gain,
            policy,
            indicator,
            ranging_healthy: true,
        }
    }

    pub fn reporter<T, D, C>(&self, transport: T, delay: D, clock: C, config: ReporterConfig) -> Reporter<'_, T, D, C>
    where
        T: Transport,
        D: DelayNs,
        C: Clock,
    {
        Reporter::new(&self.queue, &self.link, &self.guard, transport, delay, clock, config)
    }

    pub fn connectivity<R: Radio>(&self, radio: R) -> Connectivity<'_, R> {
        Connectivity::new(radio, &self.link)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(SensorReading),
    /// The color sample was discarded for a gain change.
    GainAdjusted { from: Gain, to: Gain },
    ColorFault,
}

/// The sensor-acquisition unit, sole producer of the telemetry queue.
pub struct Acquisition<'a, R, S, P, I> {
    queue: &'a TelemetryQueue,
    ranging: R,
    color: S,
    auto_gain: AutoGain,
    policy: P,
    indicator: I,
    ranging_healthy: bool,
}

impl<R, S, P, I> Acquisition<'_, R, S, P, I>
where
    R: Ranging,
    S: ColorSensor,
    P: ClassifierPolicy,
    I: Indicator,
{
    pub fn gain(&self) -> Gain {
        self.auto_gain.gain()
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    /// Distance, then color with auto-gain, then classification, LED and
    /// queue push. Sensor errors end the cycle early but never the loop.
    pub async fn cycle(&mut self) -> CycleOutcome {
        let distance = self.measure_distance().await;
        let sample = self.auto_gain.sample(&mut self.color).await;
        self.indicator.show(LedState::for_distance(distance));

        let channels = match sample {
            Ok(Sample::Accepted(channels)) => channels,
            Ok(Sample::Adjusted { from, to }) => return CycleOutcome::GainAdjusted { from, to },
            Err(err) => {
                log::warn!("TCS3472 read failed: {:?}", err);
                return CycleOutcome::ColorFault;
            }
        };

        let reading = SensorReading {
            channels,
            distance,
            label: self.policy.classify(&channels),
            gain: self.auto_gain.gain(),
        };
        log::info!(
            "R={} G={} B={} C={} gain={}x dist={} -> {}",
            channels.red,
            channels.green,
            channels.blue,
            channels.clear,
            reading.gain.multiplier(),
            distance.raw(),
            reading.label
        );
        self.queue.push(reading);
        CycleOutcome::Published(reading)
    }

    /// Runs forever, pausing one period per cycle, or only the settle time
    /// after a gain change.
    pub async fn run<D: DelayNs>(&mut self, delay: &mut D, config: AcquisitionConfig) {
        loop {
            let pause = match self.cycle().await {
                CycleOutcome::GainAdjusted { .. } => config.gain_settle_ms,
                _ => config.period_ms,
            };
            delay.delay_ms(pause).await;
        }
    }

    async fn measure_distance(&mut self) -> Distance {
        match self.ranging.measure().await {
            Ok(distance) => {
                if !self.ranging_healthy {
                    log::info!("VL53L0X ranging recovered");
                    self.ranging_healthy = true;
                }
                distance
            }
            Err(err) => {
                if self.ranging_healthy {
                    log::warn!("VL53L0X ranging failed: {:?}", err);
                    self.ranging_healthy = false;
                }
                Distance::Timeout
            }
        }
    }
}
