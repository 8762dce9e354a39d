use core::fmt::Debug;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use tcs3472::{RgbCGain, Tcs3472};

use crate::reading::Channels;

/// Above this clear count the sample is over-exposed and gain steps down.
pub const GAIN_DOWN_ABOVE: u16 = 30000;
/// Below this clear count the sample is under-exposed and gain steps up.
pub const GAIN_UP_BELOW: u16 = 2000;
pub const INITIAL_GAIN: Gain = Gain::X16;

// 10 cycles of 2.4 ms, ATIME 0xF6
const INTEGRATION_CYCLES: u16 = 10;
const KNOWN_DEVICE_IDS: [u8; 3] = [0x44, 0x4D, 0x10];
const BOOT_DELAY_MS: u32 = 100;
const ENABLE_SETTLE_MS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ColorError<E: Debug> {
    #[error("i2c bus error: {0:?}")]
    Bus(tcs3472::Error<E>),
}

/// Rung on the analog gain ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Gain {
    X1,
    X4,
    X16,
    X60,
}

impl Gain {
    pub const LADDER: [Gain; 4] = [Gain::X1, Gain::X4, Gain::X16, Gain::X60];

    pub fn multiplier(self) -> u8 {
        match self {
            Gain::X1 => 1,
            Gain::X4 => 4,
            Gain::X16 => 16,
            Gain::X60 => 60,
        }
    }

    pub fn lower(self) -> Option<Gain> {
        match self {
            Gain::X1 => None,
            Gain::X4 => Some(Gain::X1),
            Gain::X16 => Some(Gain::X4),
            Gain::X60 => Some(Gain::X16),
        }
    }

    pub fn higher(self) -> Option<Gain> {
        match self {
            Gain::X1 => Some(Gain::X4),
            Gain::X4 => Some(Gain::X16),
            Gain::X16 => Some(Gain::X60),
            Gain::X60 => None,
        }
    }
}

impl From<Gain> for RgbCGain {
    fn from(gain: Gain) -> Self {
        match gain {
            Gain::X1 => RgbCGain::_1x,
            Gain::X4 => RgbCGain::_4x,
            Gain::X16 => RgbCGain::_16x,
            Gain::X60 => RgbCGain::_60x,
        }
    }
}

/// A color sensor delivering red, green, blue and clear counts.
#[allow(async_fn_in_trait)]
pub trait ColorSensor {
    type Error: Debug;

    async fn read_channels(&mut self) -> Result<Channels, Self::Error>;

    async fn set_gain(&mut self, gain: Gain) -> Result<(), Self::Error>;
}

pub struct Tcs3472Sensor<I2C> {
    sensor: Tcs3472<I2C>,
}

impl<I2C, E> Tcs3472Sensor<I2C>
where
    I2C: I2c<Error = E>,
    E: Debug,
{
    pub fn new(i2c: I2C) -> Self {
        Self {
            sensor: Tcs3472::new(i2c),
        }
    }

    /// Power-on, then ADC enable, each followed by its settle time.
    ///
    /// An unknown device id is only logged, initialization carries on.
    pub async fn init<D: DelayNs>(&mut self, delay: &mut D, gain: Gain) -> Result<(), ColorError<E>> {
        delay.delay_ms(BOOT_DELAY_MS).await;

        let id = self.sensor.read_device_id().await.map_err(ColorError::Bus)?;
        if KNOWN_DEVICE_IDS.contains(&id) {
            log::info!("TCS3472 device id {:#04x}", id);
        } else {
            log::warn!("TCS3472 unexpected device id {:#04x}, continuing", id);
        }

        self.sensor.enable().await.map_err(ColorError::Bus)?;
        delay.delay_ms(ENABLE_SETTLE_MS).await;
        self.sensor.enable_rgbc().await.map_err(ColorError::Bus)?;
        delay.delay_ms(ENABLE_SETTLE_MS).await;
        self.sensor
            .set_integration_cycles(INTEGRATION_CYCLES)
            .await
            .map_err(ColorError::Bus)?;
        self.set_gain(gain).await
    }
}

impl<I2C, E> ColorSensor for Tcs3472Sensor<I2C>
where
    I2C: I2c<Error = E>,
    E: Debug,
{
    type Error = ColorError<E>;

    async fn read_channels(&mut self) -> Result<Channels, Self::Error> {
        let m = self.sensor.read_all_channels().await.map_err(ColorError::Bus)?;
        Ok(Channels::new(m.red, m.green, m.blue, m.clear))
    }

    async fn set_gain(&mut self, gain: Gain) -> Result<(), Self::Error> {
        self.sensor
            .set_rgbc_gain(gain.into())
            .await
            .map_err(ColorError::Bus)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainDecision {
    Keep,
    StepDown(Gain),
    StepUp(Gain),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// Exposure is fine, the channels may be classified.
    Accepted(Channels),
    /// Gain moved one rung, the sample was discarded.
    Adjusted { from: Gain, to: Gain },
}

/// Exposure control for the color sensor.
///
/// Owns the current gain rung. The gain moves at most one rung per sample,
/// and a sample that triggered a change is never handed on.
pub struct AutoGain {
    gain: Gain,
}

impl AutoGain {
    pub fn new(gain: Gain) -> Self {
        Self { gain }
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn evaluate(&self, clear: u16) -> GainDecision {
        if clear > GAIN_DOWN_ABOVE {
            if let Some(lower) = self.gain.lower() {
                return GainDecision::StepDown(lower);
            }
        } else if clear < GAIN_UP_BELOW {
            if let Some(higher) = self.gain.higher() {
                return GainDecision::StepUp(higher);
            }
        }
        GainDecision::Keep
    }

    pub async fn sample<S: ColorSensor>(&mut self, sensor: &mut S) -> Result<Sample, S::Error> {
        let channels = sensor.read_channels().await?;
        let target = match self.evaluate(channels.clear) {
            GainDecision::Keep => return Ok(Sample::Accepted(channels)),
            GainDecision::StepDown(gain) => {
                log::info!(
                    "AutoGain: clear {} too bright, gain {}x -> {}x",
                    channels.clear,
                    self.gain.multiplier(),
                    gain.multiplier()
                );
                gain
            }
            GainDecision::StepUp(gain) => {
                log::info!(
                    "AutoGain: clear {} too dark, gain {}x -> {}x",
                    channels.clear,
                    self.gain.multiplier(),
                    gain.multiplier()
                );
                gain
            }
        };

        sensor.set_gain(target).await?;
        let from = self.gain;
        self.gain = target;
        Ok(Sample::Adjusted { from, to: target })
    }
}

impl Default for AutoGain {
    fn default() -> Self {
        Self::new(INITIAL_GAIN)
    }
}
