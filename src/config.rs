// Timing, thresholds and endpoints for the telemetry pipeline.

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------
pub const SENSOR_PERIOD_MS: u32 = 1500;
/// Wait after a gain change before the next sample, at least one integration.
pub const GAIN_SETTLE_MS: u32 = 100;

// ---------------------------------------------------------------------------
// Proximity
// ---------------------------------------------------------------------------
pub const NEAR_THRESHOLD_MM: u16 = 150;
pub const OUT_OF_RANGE_MM: u16 = 2000;

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------
pub const REPORT_INTERVAL_MS: u32 = 3000;
pub const SKIP_BACKOFF_MS: u32 = 1000;
pub const STALL_POLL_MS: u32 = 500;
pub const STALL_POLLS: u32 = 10;
pub const LINK_POLL_MS: u32 = 1000;
pub const HTTP_TIMEOUT_MS: u64 = 5000;

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------
pub const WIFI_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
pub const WIFI_PASSWORD: &str = match option_env!("WIFI_PASSWORD") {
    Some(password) => password,
    None => "",
};
pub const SERVER_ADDRESS: [u8; 4] = [192, 168, 1, 100];
pub const SERVER_PORT: u16 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub period_ms: u32,
    pub gain_settle_ms: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            period_ms: SENSOR_PERIOD_MS,
            gain_settle_ms: GAIN_SETTLE_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterConfig {
    /// Pause after every send attempt, successful or not.
    pub report_interval_ms: u32,
    /// Pause after a reading was skipped for being out of range.
    pub skip_backoff_ms: u32,
    pub stall_poll_ms: u32,
    pub stall_polls: u32,
    pub link_poll_ms: u32,
    /// Append the color label to the query string.
    pub include_label: bool,
}

impl ReporterConfig {
    /// Longest time a request may stay in flight before it is force-cleared.
    pub fn stall_timeout_ms(&self) -> u64 {
        u64::from(self.stall_poll_ms) * u64::from(self.stall_polls)
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: REPORT_INTERVAL_MS,
            skip_backoff_ms: SKIP_BACKOFF_MS,
            stall_poll_ms: STALL_POLL_MS,
            stall_polls: STALL_POLLS,
            link_poll_ms: LINK_POLL_MS,
            include_label: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub address: [u8; 4],
    pub port: u16,
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        Self {
            address: SERVER_ADDRESS,
            port: SERVER_PORT,
        }
    }
}

impl core::fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d] = self.address;
        write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
    }
}
