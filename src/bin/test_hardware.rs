#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::{delay::Delay, timer::timg::TimerGroup};

use nimbus::{
    batch,
    config::{self, ConfigStore},
    constants::RETAINED_CAPACITY,
    error::ConfigError,
    hardware::{Bme280Sensor, FlashConfigFile, RtcRetained},
    model::{Reading, RetainedState},
    network::link_status_for,
    provisioning::FormFields,
    retained,
    traits::{ConfigFile, EnvironmentSensor, LinkStatus, RetainedMemory},
};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    esp_println::println!("[PANIC] {:?}", info);
    let delay = Delay::new();
    loop {
        delay.delay_millis(1_000);
    }
}

esp_bootloader_esp_idf::esp_app_desc!();

// Test result tracking
struct TestResults {
    passed: u32,
    failed: u32,
    total: u32,
}

impl TestResults {
    fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            total: 0,
        }
    }

    fn assert(&mut self, condition: bool, test_name: &str) {
        self.total += 1;
        if condition {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED", test_name);
        }
    }

    fn assert_eq<T: PartialEq + core::fmt::Debug>(&mut self, left: T, right: T, test_name: &str) {
        self.total += 1;
        if left == right {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED: {:?} != {:?}", test_name, left, right);
        }
    }

    fn assert_close(&mut self, value: f32, expected: f32, tolerance: f32, test_name: &str) {
        self.total += 1;
        if (value - expected).abs() < tolerance {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!(
                "  ✗ {} FAILED: {:.2} not close to {:.2} (tolerance: {:.2})",
                test_name,
                value,
                expected,
                tolerance
            );
        }
    }

    fn print_summary(&self) {
        esp_println::println!("\n==========================================");
        esp_println::println!("Test Summary:");
        esp_println::println!("  Total:  {}", self.total);
        esp_println::println!("  Passed: {}", self.passed);
        esp_println::println!("  Failed: {}", self.failed);
        if self.failed == 0 {
            esp_println::println!("\n✓ ALL TESTS PASSED!");
        } else {
            esp_println::println!("\n✗ SOME TESTS FAILED");
        }
        esp_println::println!("==========================================");
    }
}

fn sample(timestamp: u64) -> Reading {
    Reading {
        timestamp,
        temperature_c: 21.5,
        pressure_hpa: 1013.2,
        humidity_pct: 40.0,
    }
}

fn test_policy_logic(results: &mut TestResults) {
    esp_println::println!("\n[TEST] Policy Logic Tests");

    // Batch threshold
    let mut state = RetainedState::default();
    results.assert(!batch::accumulate(&mut state, sample(1), 3), "first reading below threshold");
    results.assert(!batch::accumulate(&mut state, sample(2), 3), "second reading below threshold");
    results.assert(batch::accumulate(&mut state, sample(3), 3), "third reading reaches threshold");
    results.assert_eq(state.readings.len(), 3, "three readings held");

    // Retained codec
    let bytes = retained::encode(&state, RETAINED_CAPACITY);
    results.assert(bytes.is_ok(), "batch encodes within capacity");
    if let Ok(bytes) = bytes {
        results.assert_eq(bytes[0], 3, "count byte leads the buffer");
        results.assert_eq(retained::decode(&bytes), state.clone(), "decode restores batch");
    }
    results.assert_eq(
        retained::decode(&[7, b'{', b'x']),
        RetainedState::default(),
        "garbage decodes empty",
    );

    // Setup form
    let form = FormFields::parse(
        "ssid=Home+Net&password=pw&device=Node1&broker=10.0.0.5&port=1883\
         &mqqtuser=&mqqtpass=&mqqttopic=sensors/t&readingsnum=3&readingssleep=10",
    );
    results.assert_eq(form.get("ssid"), Some("Home Net"), "form decodes plus as space");
    results.assert_eq(form.get("mqqtuser"), Some(""), "empty field kept");
    match config::validate(&form.to_candidate()) {
        Ok(config) => {
            results.assert_eq(config.readings.number, 3, "form batch size");
            results.assert_eq(config.readings.sleep, 600_000, "form sleep in milliseconds");
        }
        Err(e) => {
            esp_println::println!("    validation failed: {}", e);
            results.assert(false, "form yields valid configuration");
        }
    }

    // Disconnect reasons
    results.assert_eq(link_status_for(0), LinkStatus::Connecting, "no reason yet");
    results.assert_eq(link_status_for(15), LinkStatus::WrongPassword, "handshake timeout");
    results.assert_eq(link_status_for(201), LinkStatus::NoApFound, "no ap found");
    results.assert_eq(link_status_for(8), LinkStatus::Failed, "other reason");
}

fn test_retained_memory(results: &mut TestResults) {
    esp_println::println!("\n[TEST] Retained Memory Tests");

    let Some(mut memory) = RtcRetained::take() else {
        results.assert(false, "retained region available");
        return;
    };
    results.assert(RtcRetained::take().is_none(), "region handed out once");

    let payload = [3u8, b'[', b']'];
    results.assert(memory.store(&payload).is_ok(), "store small payload");
    results.assert_eq(memory.load(), &payload[..], "load returns stored bytes");

    let oversized = [0u8; RETAINED_CAPACITY + 1];
    results.assert(memory.store(&oversized).is_err(), "oversized payload refused");
    results.assert_eq(memory.load(), &payload[..], "refused store keeps contents");

    let mut state = RetainedState {
        count: 2,
        readings: alloc::vec![sample(100), sample(200)],
    };
    let persisted = retained::persist(&mut memory, &mut state, RETAINED_CAPACITY);
    results.assert_eq(persisted, Ok(0), "persist batch without drops");
    results.assert_eq(retained::load(&memory), state, "batch reloads from rtc memory");

    memory.clear();
    results.assert(memory.load().is_empty(), "clear empties region");
}

// Overwrites any stored configuration.
fn test_flash_config(results: &mut TestResults, flash: esp_hal::peripherals::FLASH<'static>) {
    esp_println::println!("\n[TEST] Flash Config Tests");

    let mut file = FlashConfigFile::new(flash);
    results.assert(file.remove().is_ok(), "remove record");
    results.assert_eq(file.read(), Ok(None), "removed record reads as absent");

    let contents = b"{\"probe\":true}";
    results.assert(file.write(contents).is_ok(), "write record");
    match file.read() {
        Ok(Some(read_back)) => results.assert_eq(&read_back[..], &contents[..], "record reads back"),
        other => {
            esp_println::println!("    read returned {:?}", other);
            results.assert(false, "record reads back");
        }
    }

    let mut store = ConfigStore::new(file);
    results.assert(store.load().is_err(), "non-configuration record rejected");
    results.assert_eq(store.load(), Err(ConfigError::Absent), "rejected record removed");
}

async fn test_bme280_sensor<SDA, SCL>(
    results: &mut TestResults,
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: SDA,
    scl: SCL,
) where
    SDA: Into<esp_hal::gpio::AnyPin<'static>>,
    SCL: Into<esp_hal::gpio::AnyPin<'static>>,
{
    esp_println::println!("\n[TEST] BME280 Sensor Tests");

    let mut sensor = Bme280Sensor::new(i2c0, sda, scl);
    if !sensor.is_ready() {
        results.assert(false, "BME280 initialization");
        return;
    }
    results.assert(true, "BME280 initialization");

    esp_println::println!("  Reading sensor (5 samples)...");
    let mut samples = heapless::Vec::<(f32, f32, f32), 5>::new();
    for i in 0..5 {
        Timer::after(Duration::from_millis(100)).await;
        match sensor.read() {
            Ok((temp, pressure, humidity)) => {
                esp_println::println!(
                    "    Sample {}: {:.2}°C {:.1} hPa {:.1}%",
                    i + 1,
                    temp,
                    pressure,
                    humidity
                );
                let _ = samples.push((temp, pressure, humidity));
            }
            Err(e) => esp_println::println!("    Failed to read sensor: {}", e),
        }
    }

    results.assert_eq(samples.len(), 5, "collected 5 samples");
    if samples.len() != 5 {
        return;
    }

    for (temp, pressure, humidity) in samples.iter() {
        results.assert(*temp > -40.0 && *temp < 85.0, "temperature in valid range");
        results.assert(*pressure > 300.0 && *pressure < 1100.0, "pressure in hPa range");
        results.assert((0.0..=100.0).contains(humidity), "humidity in percent range");
    }

    // Readings a few hundred ms apart should barely move
    let first = samples[0].0;
    let last = samples[4].0;
    results.assert_close(last, first, 2.0, "temperature readings stable (within 2°C)");
}

#[esp_rtos::main]
async fn main(_spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_alloc::heap_allocator!(size: 32 * 1024);

    esp_println::println!("\n==========================================");
    esp_println::println!("=== nimbus Hardware Test Runner ===");
    esp_println::println!("==========================================");

    let mut results = TestResults::new();

    // Run tests that don't need hardware
    test_policy_logic(&mut results);
    test_retained_memory(&mut results);
    test_flash_config(&mut results, peripherals.FLASH);

    let i2c0 = peripherals.I2C0;
    let gpio8 = peripherals.GPIO8;
    let gpio9 = peripherals.GPIO9;

    // Initialize RTOS timer for embassy (this consumes TIMG0)
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    test_bme280_sensor(&mut results, i2c0, gpio8, gpio9).await;

    results.print_summary();

    esp_println::println!("\nTest run complete. Looping...");
    loop {
        if results.failed == 0 {
            Timer::after(Duration::from_millis(200)).await;
        } else {
            Timer::after(Duration::from_millis(1000)).await;
        }
    }
}
