//! Network reporting.
//!
//! The reporter takes the latest reading off the telemetry queue once the
//! link is up and hands one HTTP request at a time to a [`Transport`]. The
//! transport answers asynchronously through [`InFlightGuard::complete`].
//! A request that never completes is force-cleared after the stall budget
//! so reporting keeps moving.

use core::cell::Cell;
use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal_async::delay::DelayNs;
use heapless::String;

use crate::clock::Clock;
use crate::config::ReporterConfig;
use crate::http::TransferError;
use crate::link::LinkState;
use crate::queue::TelemetryQueue;
use crate::reading::SensorReading;

pub const URI_CAPACITY: usize = 96;

/// Identifies one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u32);

impl Ticket {
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Result delivered by the transport when a request finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The server answered with this status code.
    Delivered { status: u16 },
    Failed(TransferError),
}

impl Completion {
    pub fn is_success(&self) -> bool {
        matches!(self, Completion::Delivered { status } if (200..300).contains(status))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportStats {
    pub issued: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub rejected: u32,
    pub stalls: u32,
    pub stale_completions: u32,
}

#[derive(Debug, Clone, Copy)]
struct GuardState {
    busy: bool,
    sent_at_ms: u64,
    ticket: u32,
    stats: ReportStats,
}

impl GuardState {
    const fn new() -> Self {
        Self {
            busy: false,
            sent_at_ms: 0,
            ticket: 0,
            stats: ReportStats {
                issued: 0,
                succeeded: 0,
                failed: 0,
                skipped: 0,
                rejected: 0,
                stalls: 0,
                stale_completions: 0,
            },
        }
    }
}

/// Single-flight flag and send timestamp for outbound requests.
///
/// Mutated by the reporter and by the transport's completion path, which
/// run at different points of the schedule; every update is one short
/// critical section.
pub struct InFlightGuard {
    state: Mutex<CriticalSectionRawMutex, Cell<GuardState>>,
}

impl InFlightGuard {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(GuardState::new())),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut GuardState) -> R) -> R {
        self.state.lock(|cell| {
            let mut state = cell.get();
            let result = f(&mut state);
            cell.set(state);
            result
        })
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock(|cell| cell.get().busy)
    }

    /// Send time of the request in flight.
    pub fn sent_at_ms(&self) -> Option<u64> {
        self.state.lock(|cell| {
            let state = cell.get();
            state.busy.then_some(state.sent_at_ms)
        })
    }

    pub fn stats(&self) -> ReportStats {
        self.state.lock(|cell| cell.get().stats)
    }

    /// Marks a request in flight. Refused while another one is.
    fn begin(&self, now_ms: u64) -> Option<Ticket> {
        self.update(|state| {
            if state.busy {
                return None;
            }
            state.ticket = state.ticket.wrapping_add(1);
            state.busy = true;
            state.sent_at_ms = now_ms;
            state.stats.issued += 1;
            Some(Ticket(state.ticket))
        })
    }

    /// Completion callback for the transport.
    ///
    /// Only the request currently in flight can clear the guard; returns
    /// `false` for a completion that arrives after its request was
    /// force-cleared.
    pub fn complete(&self, ticket: Ticket, completion: Completion) -> bool {
        let current = self.update(|state| {
            if !state.busy || state.ticket != ticket.0 {
                state.stats.stale_completions += 1;
                return false;
            }
            state.busy = false;
            if completion.is_success() {
                state.stats.succeeded += 1;
            } else {
                state.stats.failed += 1;
            }
            true
        });

        match (current, completion) {
            (false, _) => log::warn!("HTTP: stale completion for request {} ignored", ticket.0),
            (true, Completion::Delivered { status }) if completion.is_success() => {
                log::info!("HTTP: OK (status {})", status)
            }
            (true, Completion::Delivered { status }) => log::warn!("HTTP: server answered {}", status),
            (true, Completion::Failed(err)) => log::warn!("HTTP: failed, {}", err),
        }
        current
    }

    /// Releases a request the transport refused to take.
    fn abort(&self, ticket: Ticket) {
        self.update(|state| {
            if state.busy && state.ticket == ticket.0 {
                state.busy = false;
                state.stats.issued -= 1;
                state.stats.rejected += 1;
            }
        });
    }

    /// Stall recovery. Returns the send time of the abandoned request.
    fn force_clear(&self) -> Option<u64> {
        self.update(|state| {
            if !state.busy {
                return None;
            }
            state.busy = false;
            state.stats.stalls += 1;
            Some(state.sent_at_ms)
        })
    }

    fn note_skipped(&self) {
        self.update(|state| state.stats.skipped += 1);
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Query for one reading, `/data?r=..&g=..&b=..&c=..&dist=..[&cor=..]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    uri: String<URI_CAPACITY>,
}

impl ReportRequest {
    pub fn for_reading(reading: &SensorReading, include_label: bool) -> Self {
        let mut uri: String<URI_CAPACITY> = String::new();
        let c = reading.channels;
        // Capacity covers five u16 fields and the longest label.
        let written = write!(
            uri,
            "/data?r={}&g={}&b={}&c={}&dist={}",
            c.red,
            c.green,
            c.blue,
            c.clear,
            reading.distance.raw()
        )
        .and_then(|()| {
            if include_label {
                write!(uri, "&cor={}", reading.label.as_str())
            } else {
                Ok(())
            }
        });
        debug_assert!(written.is_ok(), "report query overflows {} bytes", URI_CAPACITY);
        if written.is_err() {
            log::error!("report: query truncated to {}", uri);
        }
        Self { uri }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("a request is already in progress")]
    Busy,
    #[error("network link is down")]
    LinkDown,
}

/// Outbound side of the network stack.
pub trait Transport {
    /// Queues `request` and returns at once. The outcome is reported later
    /// through [`InFlightGuard::complete`] with the same `ticket`.
    fn issue(&mut self, request: ReportRequest, ticket: Ticket) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn issue(&mut self, request: ReportRequest, ticket: Ticket) -> Result<(), TransportError> {
        (**self).issue(request, ticket)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    WaitingLink,
    Idle,
    /// A request is in flight and its completion has not arrived yet.
    Sending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Distance was the timeout sentinel or out of range.
    Skipped,
    NoLink,
    Issued(Ticket),
    Rejected(TransportError),
}

pub struct Reporter<'a, T, D, C> {
    queue: &'a TelemetryQueue,
    link: &'a LinkState,
    guard: &'a InFlightGuard,
    transport: T,
    delay: D,
    clock: C,
    config: ReporterConfig,
    waiting_link: bool,
}

impl<'a, T, D, C> Reporter<'a, T, D, C>
where
    T: Transport,
    D: DelayNs,
    C: Clock,
{
    pub fn new(
        queue: &'a TelemetryQueue,
        link: &'a LinkState,
        guard: &'a InFlightGuard,
        transport: T,
        delay: D,
        clock: C,
        config: ReporterConfig,
    ) -> Self {
        Self {
            queue,
            link,
            guard,
            transport,
            delay,
            clock,
            config,
            waiting_link: true,
        }
    }

    pub fn state(&self) -> ReporterState {
        if self.waiting_link {
            ReporterState::WaitingLink
        } else if self.guard.is_busy() {
            ReporterState::Sending
        } else {
            ReporterState::Idle
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consumes readings forever. Nothing is taken off the queue while the
    /// link is down, so after a reconnect only the latest reading goes out.
    pub async fn run(&mut self) {
        loop {
            self.wait_for_link().await;
            let reading = self.queue.pop().await;
            self.report(reading).await;
        }
    }

    pub async fn wait_for_link(&mut self) {
        if !self.link.is_up() {
            log::info!("report: waiting for link");
            self.waiting_link = true;
            while !self.link.is_up() {
                self.delay.delay_ms(self.config.link_poll_ms).await;
            }
            log::info!("report: link up, starting reports");
        }
        self.waiting_link = false;
    }

    /// One send attempt for `reading`, followed by the inter-report pause.
    pub async fn report(&mut self, reading: SensorReading) -> ReportOutcome {
        self.expire_stalled();

        if reading.distance.in_range().is_none() {
            log::info!("report: distance out of range, skipping");
            self.guard.note_skipped();
            self.pause(self.config.skip_backoff_ms).await;
            return ReportOutcome::Skipped;
        }

        self.await_guard().await;

        let outcome = if self.link.is_up() {
            self.send(&reading)
        } else {
            log::warn!("report: no connection");
            ReportOutcome::NoLink
        };

        self.pause(self.config.report_interval_ms).await;
        outcome
    }

    /// Instant at which the request in flight counts as stalled.
    fn stall_deadline(&self) -> Option<u64> {
        self.guard
            .sent_at_ms()
            .map(|sent_at| sent_at + self.config.stall_timeout_ms())
    }

    /// Force-clears the guard once its request has been out longer than the
    /// stall budget. Returns whether the guard is free afterwards.
    fn expire_stalled(&mut self) -> bool {
        match self.stall_deadline() {
            None => true,
            Some(deadline) if self.clock.now_ms() >= deadline => {
                if let Some(sent_at) = self.guard.force_clear() {
                    log::warn!(
                        "HTTP: request from {} ms stalled for {} ms, resetting",
                        sent_at,
                        self.clock.now_ms().saturating_sub(sent_at)
                    );
                }
                true
            }
            Some(_) => false,
        }
    }

    /// Waits for the previous request to complete or to run past its stall
    /// deadline.
    async fn await_guard(&mut self) {
        while !self.expire_stalled() {
            let now = self.clock.now_ms();
            let wait = self
                .stall_deadline()
                .map_or(0, |deadline| deadline.saturating_sub(now))
                .min(u64::from(self.config.stall_poll_ms));
            self.delay.delay_ms(wait as u32).await;
        }
    }

    /// Sleeps `ms`, waking early to clear a request that stalls meanwhile.
    async fn pause(&mut self, ms: u32) {
        let end = self.clock.now_ms() + u64::from(ms);
        loop {
            self.expire_stalled();
            let now = self.clock.now_ms();
            if now >= end {
                return;
            }
            let wake = self.stall_deadline().map_or(end, |deadline| deadline.min(end));
            self.delay.delay_ms((wake - now) as u32).await;
        }
    }

    fn send(&mut self, reading: &SensorReading) -> ReportOutcome {
        let Some(ticket) = self.guard.begin(self.clock.now_ms()) else {
            return ReportOutcome::Rejected(TransportError::Busy);
        };

        let request = ReportRequest::for_reading(reading, self.config.include_label);
        log::info!(
            "HTTP: sending {} dist={}mm",
            reading.label,
            reading.distance.raw()
        );
        match self.transport.issue(request, ticket) {
            Ok(()) => ReportOutcome::Issued(ticket),
            Err(err) => {
                log::warn!("HTTP: request not issued, {}", err);
                self.guard.abort(ticket);
                ReportOutcome::Rejected(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ColorLabel;
    use crate::reading::{Channels, Distance};
    use crate::testing::{block_on, reading, until, RecordingTransport, SimClock, SimDelay};
    use embassy_futures::join::join;
    use embassy_futures::select::{select, Either};
    use embassy_futures::yield_now;

    struct Rig {
        queue: TelemetryQueue,
        link: LinkState,
        guard: InFlightGuard,
        clock: SimClock,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                queue: TelemetryQueue::new(),
                link: LinkState::new(),
                guard: InFlightGuard::new(),
                clock: SimClock::new(),
            }
        }

        fn online() -> Self {
            let rig = Self::new();
            crate::testing::bring_up(&rig.link);
            rig
        }

        fn reporter(&self, transport: RecordingTransport) -> Reporter<'_, RecordingTransport, SimDelay<'_>, &SimClock> {
            Reporter::new(
                &self.queue,
                &self.link,
                &self.guard,
                transport,
                self.clock.delay(),
                &self.clock,
                ReporterConfig::default(),
            )
        }
    }

    #[test]
    fn request_carries_channels_distance_and_label() {
        let reading = SensorReading {
            channels: Channels::new(8000, 2000, 1500, 12000),
            distance: Distance::Millimeters(100),
            label: ColorLabel::Red,
            gain: crate::color::Gain::X4,
        };
        let with_label = ReportRequest::for_reading(&reading, true);
        assert_eq!(with_label.uri(), "/data?r=8000&g=2000&b=1500&c=12000&dist=100&cor=RED");
        let without = ReportRequest::for_reading(&reading, false);
        assert_eq!(without.uri(), "/data?r=8000&g=2000&b=1500&c=12000&dist=100");
    }

    #[test]
    fn longest_request_fits() {
        let reading = SensorReading {
            channels: Channels::new(u16::MAX, u16::MAX, u16::MAX, u16::MAX),
            distance: Distance::Millimeters(60000),
            label: ColorLabel::Unclassified,
            gain: crate::color::Gain::X1,
        };
        let request = ReportRequest::for_reading(&reading, true);
        assert_eq!(
            request.uri(),
            "/data?r=65535&g=65535&b=65535&c=65535&dist=60000&cor=UNCLASSIFIED"
        );
        assert!(request.uri().len() < URI_CAPACITY);
    }

    #[test]
    fn out_of_range_readings_are_skipped() {
        let rig = Rig::online();
        let mut reporter = rig.reporter(RecordingTransport::new());

        assert_eq!(block_on(reporter.report(reading(0xFFFF))), ReportOutcome::Skipped);
        assert_eq!(block_on(reporter.report(reading(2000))), ReportOutcome::Skipped);
        assert!(reporter.transport().issued().is_empty());
        assert_eq!(rig.guard.stats().skipped, 2);
        assert_eq!(rig.clock.now_ms(), 2000);
    }

    #[test]
    fn issues_and_pauses_between_reports() {
        let rig = Rig::online();
        let mut reporter = rig.reporter(RecordingTransport::new());

        let outcome = block_on(reporter.report(reading(100)));
        let ReportOutcome::Issued(ticket) = outcome else {
            panic!("expected an issued request, got {:?}", outcome);
        };
        assert!(rig.guard.is_busy());
        assert_eq!(rig.guard.sent_at_ms(), Some(0));
        assert_eq!(rig.clock.now_ms(), 3000);
        assert!(reporter.transport().issued()[0].0.uri().contains("dist=100"));

        assert!(rig.guard.complete(ticket, Completion::Delivered { status: 200 }));
        assert!(!rig.guard.is_busy());
        assert_eq!(rig.guard.stats().succeeded, 1);
    }

    #[test]
    fn waits_for_prior_completion() {
        let rig = Rig::online();
        let mut reporter = rig.reporter(RecordingTransport::new());
        let ReportOutcome::Issued(first) = block_on(reporter.report(reading(100))) else {
            panic!("first request not issued");
        };
        let before = rig.clock.now_ms();

        let (outcome, ()) = block_on(join(reporter.report(reading(120)), async {
            for _ in 0..3 {
                yield_now().await;
            }
            rig.guard.complete(first, Completion::Delivered { status: 200 });
        }));

        assert!(matches!(outcome, ReportOutcome::Issued(_)));
        assert_eq!(rig.guard.stats().stalls, 0);
        assert!(rig.clock.now_ms() - before < 5000 + 3000);
        assert_eq!(reporter.transport().issued().len(), 2);
    }

    #[test]
    fn stalled_request_is_force_cleared() {
        let rig = Rig::online();
        let mut reporter = rig.reporter(RecordingTransport::new());
        let ReportOutcome::Issued(first) = block_on(reporter.report(reading(100))) else {
            panic!("first request not issued");
        };
        let before = rig.clock.now_ms();

        let outcome = block_on(reporter.report(reading(110)));
        let ReportOutcome::Issued(second) = outcome else {
            panic!("expected stall recovery to let the send through, got {:?}", outcome);
        };
        assert_ne!(first, second);
        // Budget runs from the first send at 0 ms, not from when the wait began.
        assert_eq!(before, 3000);
        assert_eq!(rig.guard.sent_at_ms(), Some(5000));
        assert_eq!(rig.clock.now_ms(), 5000 + 3000);
        assert_eq!(rig.guard.stats().stalls, 1);

        // The abandoned request finally answers; it must not release the new one.
        assert!(!rig.guard.complete(first, Completion::Delivered { status: 200 }));
        assert!(rig.guard.is_busy());
        assert_eq!(rig.guard.stats().stale_completions, 1);

        assert!(rig.guard.complete(second, Completion::Failed(TransferError::Timeout)));
        assert!(!rig.guard.is_busy());
        assert_eq!(rig.guard.stats().failed, 1);
    }

    #[test]
    fn stall_clears_while_only_skipping() {
        let rig = Rig::online();
        let mut reporter = rig.reporter(RecordingTransport::new());
        assert!(matches!(block_on(reporter.report(reading(100))), ReportOutcome::Issued(_)));

        assert_eq!(block_on(reporter.report(reading(0xFFFF))), ReportOutcome::Skipped);
        assert!(rig.guard.is_busy());
        assert_eq!(block_on(reporter.report(reading(0xFFFF))), ReportOutcome::Skipped);
        assert!(!rig.guard.is_busy());
        assert_eq!(rig.clock.now_ms(), 5000);

        for _ in 0..18 {
            block_on(reporter.report(reading(0xFFFF)));
        }
        assert!(!rig.guard.is_busy());
        assert_eq!(rig.guard.stats().stalls, 1);
        assert_eq!(rig.guard.stats().skipped, 20);
        assert_eq!(reporter.transport().issued().len(), 1);
    }

    #[test]
    fn state_follows_link_and_request() {
        let rig = Rig::new();
        let mut reporter = rig.reporter(RecordingTransport::new());
        assert_eq!(reporter.state(), ReporterState::WaitingLink);

        let stopped = block_on(select(reporter.wait_for_link(), until(&rig.clock, 2500)));
        assert!(matches!(stopped, Either::Second(())));
        assert_eq!(reporter.state(), ReporterState::WaitingLink);

        crate::testing::bring_up(&rig.link);
        block_on(reporter.wait_for_link());
        assert_eq!(reporter.state(), ReporterState::Idle);

        let ReportOutcome::Issued(ticket) = block_on(reporter.report(reading(100))) else {
            panic!("request not issued");
        };
        assert_eq!(reporter.state(), ReporterState::Sending);
        rig.guard.complete(ticket, Completion::Delivered { status: 204 });
        assert_eq!(reporter.state(), ReporterState::Idle);
    }

    #[test]
    fn link_already_up_is_idle() {
        let rig = Rig::online();
        let mut reporter = rig.reporter(RecordingTransport::new());
        block_on(reporter.wait_for_link());
        assert_eq!(reporter.state(), ReporterState::Idle);
        assert_eq!(rig.clock.now_ms(), 0);
    }

    #[test]
    fn stall_reset_returns_to_idle() {
        let rig = Rig::online();
        let mut reporter = rig.reporter(RecordingTransport::new());
        block_on(reporter.wait_for_link());
        block_on(reporter.report(reading(100)));
        assert_eq!(reporter.state(), ReporterState::Sending);

        block_on(reporter.report(reading(0xFFFF)));
        block_on(reporter.report(reading(0xFFFF)));
        assert_eq!(reporter.state(), ReporterState::Idle);
    }

    #[test]
    fn never_two_requests_in_flight() {
        let guard = InFlightGuard::new();
        let first = guard.begin(0);
        assert!(first.is_some());
        assert_eq!(guard.begin(10), None);
        assert_eq!(guard.sent_at_ms(), Some(0));
    }

    #[test]
    fn refused_request_releases_guard() {
        let rig = Rig::online();
        let mut reporter = rig.reporter(RecordingTransport::rejecting(TransportError::Busy));

        let outcome = block_on(reporter.report(reading(100)));
        assert_eq!(outcome, ReportOutcome::Rejected(TransportError::Busy));
        assert!(!rig.guard.is_busy());
        assert_eq!(rig.guard.stats().rejected, 1);
        assert_eq!(rig.guard.stats().issued, 0);
    }

    #[test]
    fn no_send_without_link() {
        let rig = Rig::new();
        let mut reporter = rig.reporter(RecordingTransport::new());

        assert_eq!(block_on(reporter.report(reading(100))), ReportOutcome::NoLink);
        assert!(reporter.transport().issued().is_empty());
        assert!(!rig.guard.is_busy());
    }

    #[test]
    fn server_error_counts_as_failure() {
        let guard = InFlightGuard::new();
        let ticket = guard.begin(0).unwrap();
        assert!(guard.complete(ticket, Completion::Delivered { status: 500 }));
        assert_eq!(guard.stats().failed, 1);
        assert_eq!(guard.stats().succeeded, 0);
    }
}
