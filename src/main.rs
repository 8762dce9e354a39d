#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod board;

#[cfg(not(target_os = "none"))]
fn main() {
    println!("firmware target only: cargo build --release --target xtensa-esp32s3-none-elf");
}

#[cfg(target_os = "none")]
mod firmware {
    use embassy_executor::Spawner;
    use embassy_net::{Runner, Stack, StackResources};
    use embassy_time::Delay;
    use esp_backtrace as _;
    use esp_hal::{
        gpio::{Level, Output, OutputConfig},
        i2c,
        interrupt::{software::SoftwareInterruptControl, Priority},
        rng::Rng,
        time::Rate,
        timer::timg::TimerGroup,
        Async,
    };
    use esp_hal_embassy::InterruptExecutor;
    use esp_wifi::wifi::WifiDevice;
    use esp_wifi::EspWifiController;
    use static_cell::StaticCell;

    use esp_alloc as _;

    use colorsense::classify::ClearNormalized;
    use colorsense::color::{AutoGain, Tcs3472Sensor, INITIAL_GAIN};
    use colorsense::config::{AcquisitionConfig, ReporterConfig, ServerEndpoint};
    use colorsense::distance::Vl53l0x;
    use colorsense::indicator;
    use colorsense::pipeline::Pipeline;

    use crate::board::{self, ChannelTransport, EmbassyClock, EspRadio, RgbLed, REQUESTS};

    type Bus = i2c::master::I2c<'static, Async>;

    static PIPELINE: Pipeline = Pipeline::new();

    #[embassy_executor::task]
    async fn acquisition_task(ranging: Vl53l0x<Bus, Delay>, color: Tcs3472Sensor<Bus>, led: RgbLed) {
        log::info!("Starting acquisition task");
        let mut unit = PIPELINE.acquisition(ranging, color, AutoGain::new(INITIAL_GAIN), ClearNormalized::default(), led);
        unit.run(&mut Delay, AcquisitionConfig::default()).await;
    }

    #[embassy_executor::task]
    async fn connection_task(radio: EspRadio) {
        let mut connectivity = PIPELINE.connectivity(radio);
        if let Err(err) = connectivity.run().await {
            log::error!("WiFi unavailable ({}), sensors keep running", err);
        }
    }

    #[embassy_executor::task]
    async fn reporter_task() {
        let transport = ChannelTransport::new(PIPELINE.link());
        let mut reporter = PIPELINE.reporter(transport, Delay, EmbassyClock, ReporterConfig::default());
        reporter.run().await;
    }

    #[embassy_executor::task]
    async fn http_task(stack: Stack<'static>) {
        let server = ServerEndpoint::default();
        loop {
            let (request, ticket) = REQUESTS.receive().await;
            let completion = board::transfer(stack, &server, &request).await;
            PIPELINE.guard().complete(ticket, completion);
        }
    }

    #[embassy_executor::task]
    async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
        runner.run().await
    }

    #[esp_hal_embassy::main]
    async fn main(spawner: Spawner) {
        esp_println::logger::init_logger_from_env();
        esp_alloc::heap_allocator!(size: 72 * 1024);

        let peripherals = esp_hal::init(esp_hal::Config::default());
        let timg0 = TimerGroup::new(peripherals.TIMG0);
        esp_hal_embassy::init(timg0.timer0);

        let mut led = RgbLed::new(
            Output::new(peripherals.GPIO13, Level::Low, OutputConfig::default()),
            Output::new(peripherals.GPIO11, Level::Low, OutputConfig::default()),
            Output::new(peripherals.GPIO12, Level::Low, OutputConfig::default()),
        );
        log::info!("LED self-test");
        indicator::self_test(&mut led, &mut Delay).await;

        let bus_config = i2c::master::Config::default().with_frequency(Rate::from_khz(100));
        let color_bus = i2c::master::I2c::new(peripherals.I2C0, bus_config)
            .unwrap()
            .with_sda(peripherals.GPIO8)
            .with_scl(peripherals.GPIO9)
            .into_async();
        let distance_bus = i2c::master::I2c::new(peripherals.I2C1, bus_config)
            .unwrap()
            .with_sda(peripherals.GPIO17)
            .with_scl(peripherals.GPIO18)
            .into_async();

        let mut color = Tcs3472Sensor::new(color_bus);
        if let Err(err) = color.init(&mut Delay, INITIAL_GAIN).await {
            log::error!("TCS3472 init failed: {}", err);
        }
        let mut ranging = Vl53l0x::new(distance_bus, Delay);
        if let Err(err) = ranging.init().await {
            log::error!("VL53L0X init failed: {}, running without distance", err);
        }

        let timg1 = TimerGroup::new(peripherals.TIMG1);
        let mut rng = Rng::new(peripherals.RNG);
        let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
        static WIFI: StaticCell<EspWifiController<'static>> = StaticCell::new();
        let wifi = WIFI.init(esp_wifi::init(timg1.timer0, rng, peripherals.RADIO_CLK).unwrap());
        let (controller, interfaces) = esp_wifi::wifi::new(wifi, peripherals.WIFI).unwrap();

        static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
        let (stack, runner) = embassy_net::new(
            interfaces.sta,
            embassy_net::Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            seed,
        );

        let sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
        static SENSORS: StaticCell<InterruptExecutor<2>> = StaticCell::new();
        let sensors = SENSORS.init(InterruptExecutor::new(sw_ints.software_interrupt2));
        sensors
            .start(Priority::Priority2)
            .spawn(acquisition_task(ranging, color, led))
            .unwrap();

        spawner.spawn(net_task(runner)).unwrap();
        spawner.spawn(connection_task(EspRadio::new(controller, stack))).unwrap();
        spawner.spawn(http_task(stack)).unwrap();
        spawner.spawn(reporter_task()).unwrap();

        log::info!("Server {}", ServerEndpoint::default());
    }
}
