//! Host-side fakes shared by the unit tests.

use core::cell::Cell;
use core::convert::Infallible;

use embassy_futures::yield_now;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation, SevenBitAddress};

pub use embassy_futures::block_on;

use crate::classify::ColorLabel;
use crate::clock::Clock;
use crate::color::{ColorSensor, Gain};
use crate::distance::Ranging;
use crate::indicator::{Indicator, LedState};
use crate::link::{LinkState, Radio, RadioError};
use crate::reading::{Channels, Distance, SensorReading};
use crate::report::{ReportRequest, Ticket, Transport, TransportError};

/// Time that only moves when a [`SimDelay`] is awaited.
#[derive(Default)]
pub struct SimClock {
    now_ns: Cell<u64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ns.get() / 1_000_000
    }

    pub fn delay(&self) -> SimDelay<'_> {
        SimDelay { clock: self }
    }

    fn advance_ns(&self, ns: u64) {
        self.now_ns.set(self.now_ns.get() + ns);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        SimClock::now_ms(self)
    }
}

pub struct SimDelay<'a> {
    clock: &'a SimClock,
}

impl DelayNs for SimDelay<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.clock.advance_ns(u64::from(ns));
        yield_now().await;
    }

    async fn delay_us(&mut self, us: u32) {
        self.clock.advance_ns(u64::from(us) * 1_000);
        yield_now().await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.clock.advance_ns(u64::from(ms) * 1_000_000);
        yield_now().await;
    }
}

/// Runs until the simulated clock reaches `ms`.
pub async fn until(clock: &SimClock, ms: u64) {
    while clock.now_ms() < ms {
        yield_now().await;
    }
}

pub fn reading(mm: u16) -> SensorReading {
    SensorReading {
        channels: Channels::new(8000, 2000, 1500, 12000),
        distance: Distance::from_raw(mm),
        label: ColorLabel::Red,
        gain: Gain::X16,
    }
}

pub fn bring_up(link: &LinkState) {
    link.publish(true);
}

/// Register-level model of a VL53L0X.
pub struct FakeVl53 {
    model: u8,
    ready_after: usize,
    range_mm: u16,
    pointer: u8,
    status_reads: usize,
    writes: Vec<(u8, u8)>,
}

impl FakeVl53 {
    pub fn with_model(model: u8) -> Self {
        Self {
            model,
            ready_after: 1,
            range_mm: 0,
            pointer: 0,
            status_reads: 0,
            writes: Vec::new(),
        }
    }

    /// Data becomes ready on the `polls`-th status read.
    pub fn ready_after(polls: usize, range_mm: u16) -> Self {
        Self {
            ready_after: polls,
            range_mm,
            ..Self::with_model(0xEE)
        }
    }

    pub fn never_ready() -> Self {
        Self::ready_after(usize::MAX, 0)
    }

    /// Register writes in order, pointer-only writes excluded.
    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads
    }

    fn read_register(&mut self, reg: u8) -> u8 {
        let [hi, lo] = self.range_mm.to_be_bytes();
        match reg {
            0xC0 => self.model,
            0x14 => {
                self.status_reads += 1;
                u8::from(self.status_reads >= self.ready_after)
            }
            0x1E => hi,
            0x1F => lo,
            _ => 0,
        }
    }
}

impl ErrorType for FakeVl53 {
    type Error = Infallible;
}

impl I2c<SevenBitAddress> for FakeVl53 {
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        assert_eq!(address, crate::distance::ADDRESS);
        for op in operations {
            match op {
                Operation::Write(bytes) => match **bytes {
                    [reg] => self.pointer = reg,
                    [reg, value] => {
                        self.pointer = reg;
                        self.writes.push((reg, value));
                    }
                    _ => panic!("unexpected write of {} bytes", bytes.len()),
                },
                Operation::Read(buf) => {
                    for byte in buf.iter_mut() {
                        *byte = self.read_register(self.pointer);
                        self.pointer = self.pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Ranging stand-in returning a scripted series, repeating the last entry.
pub struct FakeRanging {
    script: Vec<Distance>,
    next: usize,
}

impl FakeRanging {
    pub fn fixed(distance: Distance) -> Self {
        Self::scripted(&[distance])
    }

    pub fn scripted(script: &[Distance]) -> Self {
        Self {
            script: script.to_vec(),
            next: 0,
        }
    }
}

impl Ranging for FakeRanging {
    type Error = Infallible;

    async fn measure(&mut self) -> Result<Distance, Self::Error> {
        let index = self.next.min(self.script.len() - 1);
        self.next += 1;
        Ok(self.script[index])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeBusError;

enum Scene {
    Fixed(Channels),
    /// Clear counts per unit of gain, channels scale with the gain.
    Lit(u32),
}

pub struct FakeColorSensor {
    scene: Scene,
    gain: Gain,
    applied: Vec<Gain>,
    fail_gain_writes: bool,
    fail_reads: bool,
}

impl FakeColorSensor {
    pub fn fixed(channels: Channels) -> Self {
        Self {
            scene: Scene::Fixed(channels),
            gain: Gain::X16,
            applied: Vec::new(),
            fail_gain_writes: false,
            fail_reads: false,
        }
    }

    pub fn lit(flux: u32, start: Gain) -> Self {
        Self {
            scene: Scene::Lit(flux),
            gain: start,
            ..Self::fixed(Channels::default())
        }
    }

    pub fn applied_gains(&self) -> &[Gain] {
        &self.applied
    }

    pub fn fail_gain_writes(&mut self) {
        self.fail_gain_writes = true;
    }

    pub fn fail_reads(&mut self) {
        self.fail_reads = true;
    }
}

impl ColorSensor for FakeColorSensor {
    type Error = FakeBusError;

    async fn read_channels(&mut self) -> Result<Channels, Self::Error> {
        if self.fail_reads {
            return Err(FakeBusError);
        }
        Ok(match self.scene {
            Scene::Fixed(channels) => channels,
            Scene::Lit(flux) => {
                let counts = |share: u32| {
                    let raw = flux * share / 4 * u32::from(self.gain.multiplier());
                    raw.min(u32::from(u16::MAX)) as u16
                };
                Channels::new(counts(2), counts(1), counts(1), counts(4))
            }
        })
    }

    async fn set_gain(&mut self, gain: Gain) -> Result<(), Self::Error> {
        if self.fail_gain_writes {
            return Err(FakeBusError);
        }
        self.gain = gain;
        self.applied.push(gain);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingIndicator {
    pub shown: Vec<LedState>,
}

impl RecordingIndicator {
    pub fn current(&self) -> Option<LedState> {
        self.shown.last().copied()
    }
}

impl Indicator for RecordingIndicator {
    fn show(&mut self, state: LedState) {
        self.shown.push(state);
    }
}

/// Transport that keeps every request it accepts and never completes them.
pub struct RecordingTransport {
    issued: Vec<(ReportRequest, Ticket)>,
    reject_with: Option<TransportError>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            issued: Vec::new(),
            reject_with: None,
        }
    }

    pub fn rejecting(err: TransportError) -> Self {
        Self {
            reject_with: Some(err),
            ..Self::new()
        }
    }

    pub fn issued(&self) -> &[(ReportRequest, Ticket)] {
        &self.issued
    }
}

impl Transport for RecordingTransport {
    fn issue(&mut self, request: ReportRequest, ticket: Ticket) -> Result<(), TransportError> {
        if let Some(err) = self.reject_with {
            return Err(err);
        }
        self.issued.push((request, ticket));
        Ok(())
    }
}

pub struct FakeRadio {
    failure: Option<RadioError>,
    dropped: Cell<bool>,
}

impl FakeRadio {
    pub fn connecting() -> Self {
        Self {
            failure: None,
            dropped: Cell::new(false),
        }
    }

    pub fn failing(err: RadioError) -> Self {
        Self {
            failure: Some(err),
            ..Self::connecting()
        }
    }

    pub fn drop_link(&self) {
        self.dropped.set(true);
    }
}

impl Radio for &FakeRadio {
    async fn connect(&mut self) -> Result<(), RadioError> {
        yield_now().await;
        match self.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn wait_disconnected(&mut self) {
        while !self.dropped.get() {
            yield_now().await;
        }
    }
}

impl Radio for FakeRadio {
    async fn connect(&mut self) -> Result<(), RadioError> {
        let mut radio: &FakeRadio = self;
        <&FakeRadio as Radio>::connect(&mut radio).await
    }

    async fn wait_disconnected(&mut self) {
        let mut radio: &FakeRadio = self;
        <&FakeRadio as Radio>::wait_disconnected(&mut radio).await
    }
}

/// In-memory byte stream standing in for a TCP socket.
pub struct FakeStream {
    response: Vec<u8>,
    chunk: usize,
    read_pos: usize,
    written: Vec<u8>,
}

impl FakeStream {
    /// Serves `response` at most `chunk` bytes per read.
    pub fn responding(response: &[u8], chunk: usize) -> Self {
        Self {
            response: response.to_vec(),
            chunk,
            read_pos: 0,
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &str {
        core::str::from_utf8(&self.written).unwrap()
    }
}

impl embedded_io_async::ErrorType for FakeStream {
    type Error = Infallible;
}

impl embedded_io_async::Read for FakeStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let remaining = &self.response[self.read_pos..];
        let n = remaining.len().min(self.chunk).min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl embedded_io_async::Write for FakeStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
