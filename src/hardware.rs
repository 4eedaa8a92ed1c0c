//! Board adapters for the ESP32-S3 node.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use bme280::i2c::BME280;
use embedded_storage::{ReadStorage, Storage};
use esp_hal::{
    delay::Delay,
    gpio::{AnyPin, Level, Output, OutputConfig},
    i2c::master::{Config as I2cConfig, I2c},
    peripherals::{FLASH, I2C0, LPWR},
    ram,
    rtc_cntl::{Rtc, SocResetReason, reset_reason, sleep::TimerWakeupSource},
    system::Cpu,
    time::Rate,
};
use esp_storage::FlashStorage;
use log::{info, warn};

use crate::boot::WakeCause;
use crate::constants::{RETAINED_CAPACITY, SENSOR_WARMUP_DELAY_MS, SENSOR_WARMUP_READS};
use crate::traits::{Clock, ConfigFile, EnvironmentSensor, Indicator, ReadError, RetainedMemory};

/// BME280 on I2C0 at the secondary address (0x77). A sensor that failed to
/// initialise stays unusable and every read reports it.
pub struct Bme280Sensor<'a> {
    device: Option<BME280<I2c<'a, esp_hal::Blocking>>>,
    delay: Delay,
}

impl<'a> Bme280Sensor<'a> {
    pub fn new<SDA, SCL>(i2c_periph: I2C0<'a>, sda: SDA, scl: SCL) -> Self
    where
        SDA: Into<AnyPin<'a>>,
        SCL: Into<AnyPin<'a>>,
    {
        let mut delay = Delay::new();
        let device = match I2c::new(
            i2c_periph,
            I2cConfig::default().with_frequency(Rate::from_khz(100)),
        ) {
            Ok(i2c) => {
                let i2c = i2c.with_sda(sda.into()).with_scl(scl.into());
                let mut bme = BME280::new_secondary(i2c);
                match bme.init(&mut delay) {
                    Ok(()) => Some(bme),
                    Err(e) => {
                        warn!("bme280: init failed: {:?}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("bme280: i2c config rejected: {:?}", e);
                None
            }
        };

        let mut sensor = Self { device, delay };
        sensor.warm_up();
        sensor
    }

    pub fn is_ready(&self) -> bool {
        self.device.is_some()
    }

    /// The first conversions after power-up are off; read and discard a few.
    fn warm_up(&mut self) {
        for _ in 0..SENSOR_WARMUP_READS {
            let _ = self.read();
            self.delay.delay_millis(SENSOR_WARMUP_DELAY_MS);
        }
    }
}

impl EnvironmentSensor for Bme280Sensor<'_> {
    fn read(&mut self) -> Result<(f32, f32, f32), &'static str> {
        let device = self.device.as_mut().ok_or("sensor not initialised")?;
        let m = device
            .measure(&mut self.delay)
            .map_err(|_| "bme280 measurement failed")?;
        // Driver reports pascal
        Ok((m.temperature, m.pressure / 100.0, m.humidity))
    }
}

pub struct Led<'a> {
    pin: Output<'a>,
}

impl<'a> Led<'a> {
    pub fn new<P: Into<AnyPin<'a>>>(pin: P) -> Self {
        Self {
            pin: Output::new(pin.into(), Level::Low, OutputConfig::default()),
        }
    }
}

impl Indicator for Led<'_> {
    fn set(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    fn toggle(&mut self) {
        self.pin.toggle();
    }
}

const RETAINED_HEADER: usize = 2;

#[ram(unstable(rtc_fast, persistent))]
static mut RETAINED_REGION: [u8; RETAINED_HEADER + RETAINED_CAPACITY] =
    [0; RETAINED_HEADER + RETAINED_CAPACITY];

static RETAINED_TAKEN: AtomicBool = AtomicBool::new(false);

/// RTC fast memory kept through deep sleep. Layout: little-endian u16 length,
/// then the payload.
pub struct RtcRetained {
    region: &'static mut [u8; RETAINED_HEADER + RETAINED_CAPACITY],
}

impl RtcRetained {
    /// Hand out the region once per boot.
    pub fn take() -> Option<Self> {
        if RETAINED_TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        // SAFETY: guarded by RETAINED_TAKEN, so this is the only reference.
        let region = unsafe { &mut *(&raw mut RETAINED_REGION) };
        Some(Self { region })
    }

    fn len(&self) -> usize {
        usize::from(u16::from_le_bytes([self.region[0], self.region[1]]))
    }
}

impl RetainedMemory for RtcRetained {
    fn load(&self) -> &[u8] {
        let len = self.len();
        if len > RETAINED_CAPACITY {
            return &[];
        }
        &self.region[RETAINED_HEADER..RETAINED_HEADER + len]
    }

    fn store(&mut self, bytes: &[u8]) -> Result<(), &'static str> {
        if bytes.len() > RETAINED_CAPACITY {
            return Err("larger than retained region");
        }
        self.region[RETAINED_HEADER..RETAINED_HEADER + bytes.len()].copy_from_slice(bytes);
        self.region[..RETAINED_HEADER].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
        Ok(())
    }

    fn clear(&mut self) {
        self.region[..RETAINED_HEADER].copy_from_slice(&0u16.to_le_bytes());
    }
}

const CONFIG_MAGIC: u32 = 0x4e42_4346;
const CONFIG_HEADER: usize = 12;

/// Configuration record in the last flash sector: magic, length, checksum,
/// then the JSON bytes.
pub struct FlashConfigFile<'d> {
    flash: FlashStorage<'d>,
    offset: u32,
}

impl<'d> FlashConfigFile<'d> {
    pub fn new(flash_peripheral: FLASH<'d>) -> Self {
        let flash = FlashStorage::new(flash_peripheral).multicore_auto_park();
        let capacity = flash.capacity() as u32;
        let offset = capacity.saturating_sub(FlashStorage::SECTOR_SIZE);
        Self { flash, offset }
    }

    fn max_len() -> usize {
        FlashStorage::SECTOR_SIZE as usize - CONFIG_HEADER
    }
}

fn checksum32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |acc, &byte| {
        (acc ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

impl ConfigFile for FlashConfigFile<'_> {
    fn read(&mut self) -> Result<Option<Vec<u8>>, ReadError> {
        let mut header = [0u8; CONFIG_HEADER];
        self.flash
            .read(self.offset, &mut header)
            .map_err(|_| ReadError::Io("flash read failed"))?;
        if header.iter().all(|&byte| byte == 0xFF) {
            return Ok(None);
        }

        let word = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
        if word(0) != CONFIG_MAGIC {
            return Err(ReadError::Damaged("unknown record"));
        }
        let len = word(4) as usize;
        if len > Self::max_len() {
            return Err(ReadError::Damaged("record length out of range"));
        }

        let mut contents = alloc::vec![0u8; len];
        self.flash
            .read(self.offset + CONFIG_HEADER as u32, &mut contents)
            .map_err(|_| ReadError::Io("flash read failed"))?;
        if checksum32(&contents) != word(8) {
            return Err(ReadError::Damaged("checksum mismatch"));
        }
        Ok(Some(contents))
    }

    fn write(&mut self, contents: &[u8]) -> Result<(), &'static str> {
        if contents.len() > Self::max_len() {
            return Err("configuration too large for flash sector");
        }
        let mut record = Vec::with_capacity(CONFIG_HEADER + contents.len());
        record.extend_from_slice(&CONFIG_MAGIC.to_le_bytes());
        record.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        record.extend_from_slice(&checksum32(contents).to_le_bytes());
        record.extend_from_slice(contents);
        self.flash
            .write(self.offset, &record)
            .map_err(|_| "flash write failed")
    }

    fn remove(&mut self) -> Result<(), &'static str> {
        self.flash
            .write(self.offset, &[0xFF; CONFIG_HEADER])
            .map_err(|_| "flash erase failed")
    }
}

/// RTC-backed time. The RTC keeps counting through deep sleep, so reading
/// timestamps from successive wakes stay ordered.
pub struct RtcClock<'r, 'd> {
    rtc: &'r Rtc<'d>,
}

impl<'r, 'd> RtcClock<'r, 'd> {
    pub fn new(rtc: &'r Rtc<'d>) -> Self {
        Self { rtc }
    }
}

impl Clock for RtcClock<'_, '_> {
    fn now_ms(&self) -> u64 {
        self.rtc.current_time_us() / 1_000
    }

    async fn delay_ms(&self, ms: u64) {
        embassy_time::Timer::after_millis(ms).await;
    }
}

pub fn wake_cause() -> WakeCause {
    let reason = reset_reason(Cpu::ProCpu);
    info!("hardware: reset reason {:?}", reason);
    match reason {
        Some(SocResetReason::CoreDeepSleep) => WakeCause::DeepSleep,
        Some(SocResetReason::CoreSw) | Some(SocResetReason::Cpu0Sw) => WakeCause::Restart,
        _ => WakeCause::PowerOn,
    }
}

pub fn deep_sleep(rtc: &mut Rtc<'_>, ms: u64) -> ! {
    info!("hardware: deep sleep for {} ms", ms);
    let timer = TimerWakeupSource::new(core::time::Duration::from_millis(ms));
    rtc.sleep_deep(&[&timer])
}

pub fn restart() -> ! {
    info!("hardware: restarting");
    esp_hal::system::software_reset()
}

/// Deep sleep from a context that no longer owns the `Rtc`, such as the panic
/// handler.
pub fn deep_sleep_detached(ms: u64) -> ! {
    // SAFETY: only called once nothing else will touch the RTC again.
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    deep_sleep(&mut rtc, ms)
}
