use embedded_hal_async::delay::DelayNs;

use crate::config::NEAR_THRESHOLD_MM;
use crate::reading::Distance;

const BLINK_MS: u32 = 200;
const BLINK_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proximity {
    OutOfRange,
    Near,
    Far,
}

impl Proximity {
    pub fn of(distance: Distance) -> Self {
        match distance.in_range() {
            None => Proximity::OutOfRange,
            Some(mm) if mm < NEAR_THRESHOLD_MM => Proximity::Near,
            Some(_) => Proximity::Far,
        }
    }
}

/// Levels of the three independent LED outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedState {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
}

impl LedState {
    pub const OFF: LedState = LedState::new(false, false, false);
    pub const RED: LedState = LedState::new(true, false, false);
    pub const GREEN: LedState = LedState::new(false, true, false);
    pub const BLUE: LedState = LedState::new(false, false, true);

    pub const fn new(red: bool, green: bool, blue: bool) -> Self {
        Self { red, green, blue }
    }

    pub fn for_proximity(proximity: Proximity) -> Self {
        match proximity {
            Proximity::OutOfRange => LedState::OFF,
            Proximity::Near => LedState::RED,
            Proximity::Far => LedState::GREEN,
        }
    }

    pub fn for_distance(distance: Distance) -> Self {
        Self::for_proximity(Proximity::of(distance))
    }
}

pub trait Indicator {
    fn show(&mut self, state: LedState);
}

impl<T: Indicator + ?Sized> Indicator for &mut T {
    fn show(&mut self, state: LedState) {
        (**self).show(state)
    }
}

/// Startup blink: blue three times, 200 ms on and off, then dark.
pub async fn self_test<I: Indicator, D: DelayNs>(led: &mut I, delay: &mut D) {
    for _ in 0..BLINK_COUNT {
        led.show(LedState::BLUE);
        delay.delay_ms(BLINK_MS).await;
        led.show(LedState::OFF);
        delay.delay_ms(BLINK_MS).await;
    }
}
