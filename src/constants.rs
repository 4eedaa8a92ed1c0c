// Device-wide constants. Runtime settings live in the configuration record.

/// Bytes available in RTC fast memory for the retained batch.
pub const RETAINED_CAPACITY: usize = 2048;

/// Access point brought up when the node has no usable configuration.
pub const AP_SSID: &str = "WeatherStation";
pub const AP_PASSWORD: &str = "setupmode";
pub const AP_START_TIMEOUT_MS: u64 = 10_000;
pub const AP_POLL_MS: u64 = 10;

pub const PROVISIONING_PORT: u16 = 80;
pub const PROVISIONING_TIMEOUT_SECS: u64 = 300;
pub const ACCEPT_TIMEOUT_MS: u64 = 2_000;
pub const ACCEPT_LOOP_PAUSE_MS: u64 = 100;
/// Time the success page stays up before the server returns.
pub const SUCCESS_LINGER_MS: u64 = 3_000;
/// Pause between persisting a new configuration and restarting.
pub const POST_SAVE_SETTLE_MS: u64 = 1_000;

/// Largest request head (request line + headers) accepted by the setup server.
pub const REQUEST_HEAD_MAX: usize = 1024;
/// Largest form body accepted by the setup server.
pub const FORM_BODY_MAX: usize = 1024;

pub const WIFI_CONNECT_TIMEOUT_SECS: u64 = 20;
pub const WIFI_POLL_MS: u64 = 1_000;

/// Sleep used after a fatal cycle error.
pub const FALLBACK_SLEEP_MS: u64 = 5_000;

pub const SENSOR_WARMUP_READS: usize = 3;
pub const SENSOR_WARMUP_DELAY_MS: u32 = 10;
