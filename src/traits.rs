//! Hardware abstraction traits
//!
//! Each collaborator of a boot cycle is a handle passed in by the caller. The
//! firmware implements them on top of esp-hal and esp-radio; tests use
//! in-memory fakes.

use alloc::vec::Vec;

use crate::transport::BrokerSession;

/// Memory region that survives deep sleep but not a power-on reset.
pub trait RetainedMemory {
    /// Bytes last stored. Contents are untrusted.
    fn load(&self) -> &[u8];

    /// Replace the stored bytes. Fails if `bytes` exceeds the region.
    fn store(&mut self, bytes: &[u8]) -> Result<(), &'static str>;

    fn clear(&mut self);
}

/// Calibrated environmental sensor
pub trait EnvironmentSensor {
    /// Read temperature (Celsius), pressure (hPa) and relative humidity (%)
    fn read(&mut self) -> Result<(f32, f32, f32), &'static str>;
}

/// Single status LED
pub trait Indicator {
    fn set(&mut self, on: bool);
    fn toggle(&mut self);
}

/// Why a stored record could not be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The storage access itself failed. The record may still be intact.
    Io(&'static str),
    /// The bytes were read but do not form an intact record.
    Damaged(&'static str),
}

/// Durable storage for the configuration record.
pub trait ConfigFile {
    /// `Ok(None)` when nothing is stored.
    fn read(&mut self) -> Result<Option<Vec<u8>>, ReadError>;

    fn write(&mut self, contents: &[u8]) -> Result<(), &'static str>;

    fn remove(&mut self) -> Result<(), &'static str>;
}

/// Time source. `now_secs` must keep counting across deep sleep so reading
/// timestamps stay ordered.
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now_ms(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_ms() / 1_000
    }

    async fn delay_ms(&self, ms: u64);
}

impl<T: Clock> Clock for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    async fn delay_ms(&self, ms: u64) {
        (**self).delay_ms(ms).await
    }
}

/// Association state reported by the radio while in station mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected,
    WrongPassword,
    NoApFound,
    Failed,
}

/// Radio in station (client) mode
#[allow(async_fn_in_trait)]
pub trait Station {
    async fn is_connected(&mut self) -> bool;

    /// Start associating. Returns once the attempt is under way.
    async fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), &'static str>;

    async fn status(&mut self) -> LinkStatus;

    async fn disconnect(&mut self);
}

/// Radio in access-point mode
#[allow(async_fn_in_trait)]
pub trait AccessPoint {
    async fn start(&mut self, ssid: &str, password: &str) -> Result<(), &'static str>;

    async fn is_active(&mut self) -> bool;

    async fn stop(&mut self);
}

/// Reason a socket operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    Timeout,
    Closed,
    Io(&'static str),
}

/// One listening TCP socket serving a single connection at a time.
#[allow(async_fn_in_trait)]
pub trait ConfigSocket {
    /// Wait up to `timeout_ms` for a client on `port`.
    async fn accept(&mut self, port: u16, timeout_ms: u64) -> Result<(), SocketError>;

    /// Read into `buf`. `Ok(0)` means the peer closed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError>;

    async fn write_all(&mut self, data: &[u8]) -> Result<(), SocketError>;

    /// Finish the current connection so the next `accept` can run.
    async fn close(&mut self);
}

/// Broker client performing connect, publish, disconnect as one attempt.
#[allow(async_fn_in_trait)]
pub trait Publisher {
    async fn publish(
        &mut self,
        session: &BrokerSession<'_>,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), &'static str>;
}
