#![no_std]
#![no_main]

use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use core::panic::PanicInfo;

use embassy_executor::Spawner;
use embassy_net::{Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4};
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, rng::Rng, rtc_cntl::Rtc, timer::timg::TimerGroup};
use esp_radio::{Controller, wifi::WifiDevice};
use log::{info, warn};
use static_cell::StaticCell;

use nimbus::{
    boot::{BootOrchestrator, CycleOutcome},
    config::ConfigStore,
    constants::FALLBACK_SLEEP_MS,
    hardware::{self, Bme280Sensor, FlashConfigFile, Led, RtcClock, RtcRetained},
    network::{MqttPublisher, Radio, SetupSocket},
};

// Board wiring: BME280 SDA on GPIO8, SCL on GPIO9, status LED on GPIO2.

const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
const SOCKET_BUFFER: usize = 1536;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    esp_println::println!("[PANIC] {:?}", info);
    hardware::deep_sleep_detached(FALLBACK_SLEEP_MS)
}

esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task]
async fn sta_net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[embassy_executor::task]
async fn ap_net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Hands out addresses to phones joining the setup access point.
#[embassy_executor::task]
async fn run_dhcp(stack: Stack<'static>) {
    use edge_dhcp::{
        io::{self, DEFAULT_SERVER_PORT},
        server::{Server, ServerOptions},
    };
    use edge_nal::UdpBind;
    use edge_nal_embassy::{Udp, UdpBuffers};

    let mut buf = [0u8; 1500];
    let mut gateways = [AP_ADDRESS];

    let buffers = UdpBuffers::<2, 1024, 1024, 4>::new();
    let udp = Udp::new(stack, &buffers);
    let mut socket = match udp
        .bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            DEFAULT_SERVER_PORT,
        )))
        .await
    {
        Ok(socket) => socket,
        Err(e) => {
            warn!("dhcp: bind failed: {:?}", e);
            return;
        }
    };

    loop {
        _ = io::server::run(
            &mut Server::<_, 8>::new_with_et(AP_ADDRESS),
            &ServerOptions::new(AP_ADDRESS, Some(&mut gateways)),
            &mut socket,
            &mut buf,
        )
        .await
        .inspect_err(|e| warn!("dhcp: server error: {:?}", e));
        Timer::after(Duration::from_millis(500)).await;
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    esp_alloc::heap_allocator!(size: 96 * 1024);

    esp_println::println!("=== nimbus ===");

    let wake = hardware::wake_cause();
    let mut rtc = Rtc::new(peripherals.LPWR);

    // Initialize RTOS timer for embassy
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    static RADIO_CONTROLLER: StaticCell<Controller<'static>> = StaticCell::new();
    let radio_controller =
        &*RADIO_CONTROLLER.init(esp_radio::init().expect("radio init failed"));
    let (controller, interfaces) =
        esp_radio::wifi::new(radio_controller, peripherals.WIFI, Default::default())
            .expect("wifi init failed");

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;

    static STA_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
    let (sta_stack, sta_runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        STA_RESOURCES.init(StackResources::new()),
        seed,
    );

    static AP_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
    let (ap_stack, ap_runner) = embassy_net::new(
        interfaces.ap,
        embassy_net::Config::ipv4_static(StaticConfigV4 {
            address: Ipv4Cidr::new(AP_ADDRESS, 24),
            gateway: Some(AP_ADDRESS),
            dns_servers: Default::default(),
        }),
        AP_RESOURCES.init(StackResources::new()),
        seed,
    );

    for spawned in [
        spawner.spawn(sta_net_task(sta_runner)),
        spawner.spawn(ap_net_task(ap_runner)),
        spawner.spawn(run_dhcp(ap_stack)),
    ] {
        if let Err(e) = spawned {
            esp_println::println!("[ERROR] Failed to spawn task: {:?}", e);
        }
    }

    static SETUP_RX: StaticCell<[u8; SOCKET_BUFFER]> = StaticCell::new();
    static SETUP_TX: StaticCell<[u8; SOCKET_BUFFER]> = StaticCell::new();
    static MQTT_RX: StaticCell<[u8; SOCKET_BUFFER]> = StaticCell::new();
    static MQTT_TX: StaticCell<[u8; SOCKET_BUFFER]> = StaticCell::new();

    let retained = RtcRetained::take().expect("retained memory already taken");

    let outcome = {
        let mut node = BootOrchestrator {
            retained,
            store: ConfigStore::new(FlashConfigFile::new(peripherals.FLASH)),
            sensor: Bme280Sensor::new(peripherals.I2C0, peripherals.GPIO8, peripherals.GPIO9),
            led: Led::new(peripherals.GPIO2),
            radio: Radio::new(controller, sta_stack, ap_stack),
            socket: SetupSocket::new(
                ap_stack,
                SETUP_RX.init([0; SOCKET_BUFFER]),
                SETUP_TX.init([0; SOCKET_BUFFER]),
            ),
            publisher: MqttPublisher::new(
                sta_stack,
                MQTT_RX.init([0; SOCKET_BUFFER]),
                MQTT_TX.init([0; SOCKET_BUFFER]),
            ),
            clock: RtcClock::new(&rtc),
        };
        node.run(wake).await
    };

    info!("boot: cycle finished with {:?}", outcome);
    match outcome {
        CycleOutcome::Sleep { ms } => hardware::deep_sleep(&mut rtc, ms),
        CycleOutcome::Restart => hardware::restart(),
    }
}
