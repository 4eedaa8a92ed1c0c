// In-memory stand-ins for the board, shared by the unit tests.

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::Cell;

use serde_json::{Value, json};

use crate::model::Reading;
use crate::traits::{
    AccessPoint, Clock, ConfigFile, ConfigSocket, EnvironmentSensor, Indicator, LinkStatus,
    Publisher, ReadError, RetainedMemory, SocketError, Station,
};
use crate::transport::BrokerSession;

pub fn reading(timestamp: u64, temperature_c: f32) -> Reading {
    Reading {
        timestamp,
        temperature_c,
        pressure_hpa: 1013.25,
        humidity_pct: 45.5,
    }
}

pub fn candidate() -> Value {
    json!({
        "wifi": { "ssid": "MyNet", "password": "secret" },
        "device": { "name": "Node1" },
        "mqtt": {
            "broker": "10.0.0.5",
            "port": 1883,
            "username": "u",
            "password": "p",
            "topic": "sensors/t"
        },
        "readings": { "sleep": 600000, "number": 3 }
    })
}

/// Clock that only moves when something sleeps on it.
#[derive(Default)]
pub struct FakeClock {
    now: Cell<u64>,
}

impl FakeClock {
    pub fn starting_at(ms: u64) -> Self {
        Self { now: Cell::new(ms) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    async fn delay_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

pub struct MemoryRetained {
    bytes: Vec<u8>,
    capacity: usize,
    pub fail_writes: bool,
}

impl MemoryRetained {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::new(),
            capacity,
            fail_writes: false,
        }
    }
}

impl RetainedMemory for MemoryRetained {
    fn load(&self) -> &[u8] {
        &self.bytes
    }

    fn store(&mut self, bytes: &[u8]) -> Result<(), &'static str> {
        if self.fail_writes {
            return Err("write refused");
        }
        if bytes.len() > self.capacity {
            return Err("too large");
        }
        self.bytes = bytes.to_vec();
        Ok(())
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }
}

#[derive(Default)]
pub struct MemoryConfigFile {
    pub contents: Option<Vec<u8>>,
    pub unreadable: bool,
    pub read_fails: bool,
    pub removals: usize,
    pub writes: usize,
}

impl MemoryConfigFile {
    pub fn holding(contents: &[u8]) -> Self {
        Self {
            contents: Some(contents.to_vec()),
            ..Self::default()
        }
    }

    pub fn holding_value(value: &Value) -> Self {
        Self::holding(&serde_json::to_vec(value).unwrap())
    }
}

impl ConfigFile for MemoryConfigFile {
    fn read(&mut self) -> Result<Option<Vec<u8>>, ReadError> {
        if self.read_fails {
            return Err(ReadError::Io("spi timeout"));
        }
        if self.unreadable && self.contents.is_some() {
            return Err(ReadError::Damaged("checksum mismatch"));
        }
        Ok(self.contents.clone())
    }

    fn write(&mut self, contents: &[u8]) -> Result<(), &'static str> {
        self.writes += 1;
        self.unreadable = false;
        self.contents = Some(contents.to_vec());
        Ok(())
    }

    fn remove(&mut self) -> Result<(), &'static str> {
        self.removals += 1;
        self.unreadable = false;
        self.contents = None;
        Ok(())
    }
}

pub struct FakeSensor {
    pub values: Result<(f32, f32, f32), &'static str>,
    pub reads: usize,
}

impl FakeSensor {
    pub fn reporting(temperature_c: f32) -> Self {
        Self {
            values: Ok((temperature_c, 1013.25, 45.5)),
            reads: 0,
        }
    }

    pub fn broken() -> Self {
        Self {
            values: Err("no ack"),
            reads: 0,
        }
    }
}

impl EnvironmentSensor for FakeSensor {
    fn read(&mut self) -> Result<(f32, f32, f32), &'static str> {
        self.reads += 1;
        self.values
    }
}

#[derive(Default)]
pub struct FakeIndicator {
    pub on: bool,
    pub changes: usize,
}

impl FakeIndicator {
    /// Number of complete on-off flashes seen, assuming it started off.
    pub fn flashes(&self) -> usize {
        self.changes / 2
    }
}

impl Indicator for FakeIndicator {
    fn set(&mut self, on: bool) {
        if self.on != on {
            self.changes += 1;
        }
        self.on = on;
    }

    fn toggle(&mut self) {
        self.on = !self.on;
        self.changes += 1;
    }
}

/// Radio that joins after a fixed number of status polls, or fails with a
/// given status.
pub struct FakeRadio {
    pub connected: bool,
    pub joins_after_polls: Option<u32>,
    pub failure: LinkStatus,
    pub polls: u32,
    pub connect_attempts: u32,
    pub disconnects: u32,
    pub ap_started: bool,
    pub ap_active_after_polls: u32,
    pub ap_polls: u32,
    pub ap_stopped: bool,
}

impl FakeRadio {
    pub fn joining_after(polls: u32) -> Self {
        Self {
            joins_after_polls: Some(polls),
            ..Self::failing(LinkStatus::Failed)
        }
    }

    pub fn failing(failure: LinkStatus) -> Self {
        Self {
            connected: false,
            joins_after_polls: None,
            failure,
            polls: 0,
            connect_attempts: 0,
            disconnects: 0,
            ap_started: false,
            ap_active_after_polls: 2,
            ap_polls: 0,
            ap_stopped: false,
        }
    }
}

impl Station for FakeRadio {
    async fn is_connected(&mut self) -> bool {
        self.connected
    }

    async fn begin_connect(&mut self, _ssid: &str, _password: &str) -> Result<(), &'static str> {
        self.connect_attempts += 1;
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        self.polls += 1;
        match self.joins_after_polls {
            Some(n) if self.polls >= n => {
                self.connected = true;
                LinkStatus::Connected
            }
            Some(_) => LinkStatus::Connecting,
            None => self.failure,
        }
    }

    async fn disconnect(&mut self) {
        self.disconnects += 1;
        self.connected = false;
    }
}

impl AccessPoint for FakeRadio {
    async fn start(&mut self, _ssid: &str, _password: &str) -> Result<(), &'static str> {
        self.ap_started = true;
        Ok(())
    }

    async fn is_active(&mut self) -> bool {
        self.ap_polls += 1;
        self.ap_started && self.ap_polls > self.ap_active_after_polls
    }

    async fn stop(&mut self) {
        self.ap_stopped = true;
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub fail: bool,
    pub sent: Vec<(String, String, Vec<u8>)>,
}

impl Publisher for FakePublisher {
    async fn publish(
        &mut self,
        session: &BrokerSession<'_>,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), &'static str> {
        if self.fail {
            return Err("broker unreachable");
        }
        self.sent
            .push((session.client_id.to_string(), topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Socket replaying scripted client connections. Each connection is a list
/// of chunks returned by successive reads.
#[derive(Default)]
pub struct ScriptedSocket {
    pending: VecDeque<Vec<Vec<u8>>>,
    current: VecDeque<Vec<u8>>,
    pub responses: Vec<Vec<u8>>,
    pub accepts: usize,
    pub closes: usize,
    pub failing_accepts: usize,
}

impl ScriptedSocket {
    pub fn with_connections(connections: &[&[&[u8]]]) -> Self {
        let mut socket = Self::default();
        for chunks in connections {
            socket.push_connection(chunks);
        }
        socket
    }

    pub fn push_connection(&mut self, chunks: &[&[u8]]) {
        self.pending
            .push_back(chunks.iter().map(|chunk| chunk.to_vec()).collect());
    }

    pub fn response_text(&self, index: usize) -> String {
        String::from_utf8_lossy(&self.responses[index]).into_owned()
    }
}

impl ConfigSocket for ScriptedSocket {
    async fn accept(&mut self, _port: u16, _timeout_ms: u64) -> Result<(), SocketError> {
        if self.failing_accepts > 0 {
            self.failing_accepts -= 1;
            return Err(SocketError::Io("reset"));
        }
        match self.pending.pop_front() {
            Some(chunks) => {
                self.accepts += 1;
                self.current = chunks.into();
                self.responses.push(Vec::new());
                Ok(())
            }
            None => Err(SocketError::Timeout),
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let Some(mut chunk) = self.current.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.current.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), SocketError> {
        match self.responses.last_mut() {
            Some(response) => {
                response.extend_from_slice(data);
                Ok(())
            }
            None => Err(SocketError::Closed),
        }
    }

    async fn close(&mut self) {
        self.closes += 1;
        self.current.clear();
    }
}
