//! Device-side implementations of the library's seams.

use embassy_net::tcp::TcpSocket;
use embassy_net::{Ipv4Address, Stack};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::{with_timeout, Duration, Instant};
use esp_hal::gpio::{Level, Output};
use esp_wifi::wifi::{ClientConfiguration, Configuration, WifiController, WifiEvent};

use colorsense::clock::Clock;
use colorsense::config::{ServerEndpoint, HTTP_TIMEOUT_MS, WIFI_CONNECT_TIMEOUT_MS, WIFI_PASSWORD, WIFI_SSID};
use colorsense::http::{self, TransferError};
use colorsense::indicator::{Indicator, LedState};
use colorsense::link::{LinkState, Radio, RadioError};
use colorsense::report::{Completion, ReportRequest, Ticket, Transport, TransportError};

const SOCKET_BUFFER: usize = 512;

/// Requests handed from the reporter to the HTTP task.
pub static REQUESTS: Channel<CriticalSectionRawMutex, (ReportRequest, Ticket), 1> = Channel::new();

pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}

/// Three discrete LEDs, active high.
pub struct RgbLed {
    red: Output<'static>,
    green: Output<'static>,
    blue: Output<'static>,
}

impl RgbLed {
    pub fn new(red: Output<'static>, green: Output<'static>, blue: Output<'static>) -> Self {
        let mut led = Self { red, green, blue };
        led.show(LedState::OFF);
        led
    }
}

impl Indicator for RgbLed {
    fn show(&mut self, state: LedState) {
        self.red.set_level(Level::from(state.red));
        self.green.set_level(Level::from(state.green));
        self.blue.set_level(Level::from(state.blue));
    }
}

pub struct ChannelTransport {
    link: &'static LinkState,
}

impl ChannelTransport {
    pub fn new(link: &'static LinkState) -> Self {
        Self { link }
    }
}

impl Transport for ChannelTransport {
    fn issue(&mut self, request: ReportRequest, ticket: Ticket) -> Result<(), TransportError> {
        if !self.link.is_up() {
            return Err(TransportError::LinkDown);
        }
        REQUESTS.try_send((request, ticket)).map_err(|TrySendError::Full(_)| TransportError::Busy)
    }
}

/// Performs one request on a fresh socket.
pub async fn transfer(stack: Stack<'static>, server: &ServerEndpoint, request: &ReportRequest) -> Completion {
    let mut rx_buffer = [0u8; SOCKET_BUFFER];
    let mut tx_buffer = [0u8; SOCKET_BUFFER];
    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    socket.set_timeout(Some(Duration::from_millis(HTTP_TIMEOUT_MS)));

    let [a, b, c, d] = server.address;
    let remote = (Ipv4Address::new(a, b, c, d), server.port);
    if let Err(err) = socket.connect(remote).await {
        log::warn!("HTTP: connect to {} failed: {:?}", server, err);
        return Completion::Failed(TransferError::Connect);
    }

    let completion = match with_timeout(Duration::from_millis(HTTP_TIMEOUT_MS), http::get(&mut socket, server, request)).await {
        Ok(completion) => completion,
        Err(_) => Completion::Failed(TransferError::Timeout),
    };
    socket.close();
    completion
}

pub struct EspRadio {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl EspRadio {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self { controller, stack }
    }

    async fn associate(&mut self) -> Result<(), RadioError> {
        if !matches!(self.controller.is_started(), Ok(true)) {
            let client = Configuration::Client(ClientConfiguration {
                ssid: WIFI_SSID.try_into().unwrap_or_default(),
                password: WIFI_PASSWORD.try_into().unwrap_or_default(),
                ..Default::default()
            });
            self.controller
                .set_configuration(&client)
                .map_err(|_| RadioError::Association)?;
            self.controller.start_async().await.map_err(|_| RadioError::Association)?;
            log::info!("WiFi started, joining {}", WIFI_SSID);
        }
        self.controller.connect_async().await.map_err(|err| {
            log::warn!("WiFi connect failed: {:?}", err);
            RadioError::Association
        })?;
        self.stack.wait_config_up().await;
        Ok(())
    }
}

impl Radio for EspRadio {
    async fn connect(&mut self) -> Result<(), RadioError> {
        let budget = Duration::from_millis(WIFI_CONNECT_TIMEOUT_MS);
        let started = Instant::now();
        match with_timeout(budget, self.associate()).await {
            Ok(Ok(())) => {
                if let Some(config) = self.stack.config_v4() {
                    log::info!(
                        "WiFi connected in {} ms, address {}",
                        started.elapsed().as_millis(),
                        config.address
                    );
                }
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) if self.controller.is_connected().unwrap_or(false) => Err(RadioError::Dhcp),
            Err(_) => Err(RadioError::Timeout),
        }
    }

    async fn wait_disconnected(&mut self) {
        self.controller.wait_for_event(WifiEvent::StaDisconnected).await;
    }
}
