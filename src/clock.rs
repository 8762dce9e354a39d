/// Monotonic millisecond time source.
///
/// The firmware backs this with `embassy_time::Instant`; tests use a
/// simulated clock that only moves when a delay is awaited.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
