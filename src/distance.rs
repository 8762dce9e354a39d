//! VL53L0X single-shot ranging.
//!
//! Each ranging cycle is a small state machine: the trigger sequence moves
//! the driver from `Idle` to `Measuring`, the status register is polled every
//! [`POLL_INTERVAL_MS`] until the data-ready bit shows up or [`POLL_BUDGET`]
//! polls have passed, and the driver always ends the call back in `Idle`.

use core::fmt::Debug;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::reading::Distance;

pub const ADDRESS: u8 = 0x29;

const REG_SYSRANGE_START: u8 = 0x00;
const REG_SYSTEM_INTERRUPT_CLEAR: u8 = 0x0B;
const REG_RESULT_RANGE_STATUS: u8 = 0x14;
const REG_RESULT_RANGE_MM: u8 = 0x1E;
const REG_IDENTIFICATION_MODEL_ID: u8 = 0xC0;

const MODEL_ID: u8 = 0xEE;
const STATUS_DATA_READY: u8 = 0x01;

pub const POLL_INTERVAL_MS: u32 = 10;
pub const POLL_BUDGET: u16 = 100;

const BOOT_DELAY_MS: u32 = 100;
const INIT_PAUSE_MS: u32 = 10;
const INIT_SETTLE_MS: u32 = 100;

const INIT_HEAD: [(u8, u8); 4] = [(0x88, 0x00), (0x80, 0x01), (0xFF, 0x01), (0x00, 0x00)];
const INIT_TAIL: [(u8, u8); 4] = [(0x00, 0x01), (0xFF, 0x00), (0x80, 0x00), (0x00, 0x02)];
const TRIGGER: [(u8, u8); 8] = [
    (0x80, 0x01),
    (0xFF, 0x01),
    (0x00, 0x00),
    (0x91, 0x3C),
    (0x00, 0x01),
    (0xFF, 0x00),
    (0x80, 0x00),
    (REG_SYSRANGE_START, 0x01),
];

#[derive(Debug, thiserror::Error)]
pub enum DistanceError<E> {
    #[error("i2c bus error: {0:?}")]
    Bus(E),
    #[error("unexpected model id {found:#04x}")]
    UnexpectedModel { found: u8 },
    #[error("sensor not identified, ranging disabled")]
    NotIdentified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingState {
    Idle,
    Measuring { polls: u16 },
    Done(u16),
    TimedOut,
}

/// Anything that can perform one ranging cycle.
#[allow(async_fn_in_trait)]
pub trait Ranging {
    type Error: Debug;

    async fn measure(&mut self) -> Result<Distance, Self::Error>;
}

pub struct Vl53l0x<I2C, D> {
    i2c: I2C,
    delay: D,
    identified: bool,
    state: RangingState,
    last_polls: u16,
}

impl<I2C, D> Vl53l0x<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            identified: false,
            state: RangingState::Idle,
            last_polls: 0,
        }
    }

    /// Checks the model id and runs the power-up sequence.
    ///
    /// A model id mismatch is fatal to the driver: ranging is never
    /// attempted and every later [`Ranging::measure`] fails with
    /// [`DistanceError::NotIdentified`].
    pub async fn init(&mut self) -> Result<(), DistanceError<I2C::Error>> {
        self.delay.delay_ms(BOOT_DELAY_MS).await;

        let found = self.read_reg(REG_IDENTIFICATION_MODEL_ID).await?;
        if found != MODEL_ID {
            log::error!("VL53L0X model id {:#04x}, expected {:#04x}", found, MODEL_ID);
            return Err(DistanceError::UnexpectedModel { found });
        }
        log::info!("VL53L0X model id {:#04x}", found);

        self.write_sequence(&INIT_HEAD).await?;
        self.delay.delay_ms(INIT_PAUSE_MS).await;
        self.write_sequence(&INIT_TAIL).await?;
        self.delay.delay_ms(INIT_SETTLE_MS).await;

        self.identified = true;
        Ok(())
    }

    pub fn state(&self) -> RangingState {
        self.state
    }

    /// Status polls spent by the last ranging cycle.
    pub fn last_polls(&self) -> u16 {
        self.last_polls
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    async fn cycle(&mut self) -> Result<Distance, DistanceError<I2C::Error>> {
        self.write_sequence(&TRIGGER).await?;

        for polls in 0..POLL_BUDGET {
            self.state = RangingState::Measuring { polls };
            let status = self.read_reg(REG_RESULT_RANGE_STATUS).await?;
            self.last_polls = polls + 1;
            if status & STATUS_DATA_READY != 0 {
                let mm = self.read_reg16(REG_RESULT_RANGE_MM).await?;
                self.write_reg(REG_SYSTEM_INTERRUPT_CLEAR, 0x01).await?;
                self.state = RangingState::Done(mm);
                return Ok(Distance::from_raw(mm));
            }
            self.delay.delay_ms(POLL_INTERVAL_MS).await;
        }

        // No interrupt clear here, the next trigger re-initializes the device.
        self.state = RangingState::TimedOut;
        log::warn!("VL53L0X not ready after {} polls", POLL_BUDGET);
        Ok(Distance::Timeout)
    }

    async fn write_sequence(&mut self, sequence: &[(u8, u8)]) -> Result<(), DistanceError<I2C::Error>> {
        for &(reg, value) in sequence {
            self.write_reg(reg, value).await?;
        }
        Ok(())
    }

    async fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), DistanceError<I2C::Error>> {
        self.i2c
            .write(ADDRESS, &[reg, value])
            .await
            .map_err(DistanceError::Bus)
    }

    async fn read_reg(&mut self, reg: u8) -> Result<u8, DistanceError<I2C::Error>> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(ADDRESS, &[reg], &mut buf)
            .await
            .map_err(DistanceError::Bus)?;
        Ok(buf[0])
    }

    async fn read_reg16(&mut self, reg: u8) -> Result<u16, DistanceError<I2C::Error>> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(ADDRESS, &[reg], &mut buf)
            .await
            .map_err(DistanceError::Bus)?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<I2C, D> Ranging for Vl53l0x<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    type Error = DistanceError<I2C::Error>;

    async fn measure(&mut self) -> Result<Distance, Self::Error> {
        if !self.identified {
            return Err(DistanceError::NotIdentified);
        }
        self.last_polls = 0;
        let result = self.cycle().await;
        self.state = RangingState::Idle;
        result
    }
}
