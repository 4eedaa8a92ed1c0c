//! Access point and setup web server used when the node has no configuration.
//!
//! One client at a time, one request per connection. A `POST /save` with a
//! non-empty SSID ends the server and hands back the submitted fields as a
//! configuration candidate. Anything that goes wrong with a single connection
//! is logged and the loop carries on until the deadline.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::constants::{
    ACCEPT_LOOP_PAUSE_MS, ACCEPT_TIMEOUT_MS, AP_PASSWORD, AP_POLL_MS, AP_SSID, AP_START_TIMEOUT_MS,
    FORM_BODY_MAX, PROVISIONING_PORT, PROVISIONING_TIMEOUT_SECS, REQUEST_HEAD_MAX,
    SUCCESS_LINGER_MS,
};
use crate::error::ProvisioningError;
use crate::traits::{AccessPoint, Clock, ConfigSocket, SocketError};

pub const SETUP_PAGE: &str = include_str!("../assets/setup.html");
pub const SAVED_PAGE: &str = include_str!("../assets/saved.html");

const DEFAULT_READINGS_NUMBER: u64 = 10;
const DEFAULT_SLEEP_MINUTES: u64 = 60;

/// Submitted form fields in arrival order. Later duplicates win on lookup.
#[derive(Debug, Default, PartialEq)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    /// Split an `application/x-www-form-urlencoded` body. Only `+` is decoded;
    /// percent escapes are kept as sent.
    pub fn parse(body: &str) -> Self {
        let fields = body
            .split('&')
            .filter_map(|field| field.split_once('='))
            .map(|(key, value)| (key.to_string(), value.replace('+', " ")))
            .collect();
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn text(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Integer field, falling back to `default` when absent. Unparseable
    /// values become null so validation rejects them.
    fn integer(&self, key: &str, default: Option<u64>) -> Value {
        match self.get(key) {
            Some(raw) => raw.trim().parse::<u64>().map(Value::from).unwrap_or(Value::Null),
            None => default.map(Value::from).unwrap_or(Value::Null),
        }
    }

    /// Map the form onto the nested configuration shape. The result is not
    /// validated.
    pub fn to_candidate(&self) -> Value {
        let sleep_ms = match self.integer("readingssleep", Some(DEFAULT_SLEEP_MINUTES)) {
            Value::Number(minutes) => minutes
                .as_u64()
                .and_then(|m| m.checked_mul(60 * 1000))
                .map(Value::from)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };

        json!({
            "wifi": {
                "ssid": self.text("ssid"),
                "password": self.text("password"),
            },
            "device": {
                "name": self.text("device"),
            },
            "mqtt": {
                "broker": self.text("broker"),
                "port": self.integer("port", None),
                "username": self.text("mqqtuser"),
                "password": self.text("mqqtpass"),
                "topic": self.text("mqqttopic"),
            },
            "readings": {
                "number": self.integer("readingsnum", Some(DEFAULT_READINGS_NUMBER)),
                "sleep": sleep_ms,
            }
        })
    }
}

/// Request line and headers of one HTTP request, plus any body bytes that
/// arrived with them.
#[derive(Debug, PartialEq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub content_length: usize,
    pub body_prefix: Vec<u8>,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl RequestHead {
    pub fn parse(raw: &[u8]) -> Result<Self, &'static str> {
        let (head, body_prefix) = match find(raw, b"\r\n\r\n") {
            Some(end) => (&raw[..end], &raw[end + 4..]),
            None => (raw, &raw[raw.len()..]),
        };
        let head = core::str::from_utf8(head).map_err(|_| "request head is not utf-8")?;

        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap_or("").split_whitespace();
        let (Some(method), Some(path)) = (request_line.next(), request_line.next()) else {
            return Err("malformed request line");
        };

        let mut content_length = 0;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().map_err(|_| "bad content-length")?;
                }
            }
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            content_length,
            body_prefix: body_prefix.to_vec(),
        })
    }

    /// `POST /save`, ignoring any query string.
    pub fn is_save(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or("");
        self.method == "POST" && path == "/save"
    }
}

fn response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}

#[derive(Debug)]
enum ConnectionError {
    Socket(SocketError),
    Request(&'static str),
}

impl From<SocketError> for ConnectionError {
    fn from(e: SocketError) -> Self {
        ConnectionError::Socket(e)
    }
}

pub struct ProvisioningServer<'a, A: AccessPoint, S: ConfigSocket> {
    ap: &'a mut A,
    socket: &'a mut S,
    timeout_secs: u64,
}

impl<'a, A: AccessPoint, S: ConfigSocket> ProvisioningServer<'a, A, S> {
    pub fn new(ap: &'a mut A, socket: &'a mut S) -> Self {
        Self {
            ap,
            socket,
            timeout_secs: PROVISIONING_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Bring up the setup access point and wait until the radio reports it
    /// active.
    pub async fn start_access_point<C: Clock>(&mut self, clock: &C) -> Result<(), ProvisioningError> {
        self.ap
            .start(AP_SSID, AP_PASSWORD)
            .await
            .map_err(ProvisioningError::AccessPoint)?;

        let started = clock.now_ms();
        while !self.ap.is_active().await {
            if clock.now_ms() - started >= AP_START_TIMEOUT_MS {
                return Err(ProvisioningError::AccessPoint("not active after start"));
            }
            clock.delay_ms(AP_POLL_MS).await;
        }

        info!("provisioning: access point '{}' up", AP_SSID);
        Ok(())
    }

    /// Serve the setup page until a configuration is submitted or the
    /// deadline passes. The deadline is fixed at entry.
    pub async fn run_config_server<C: Clock>(&mut self, clock: &C) -> Result<Value, ProvisioningError> {
        let started = clock.now_ms();
        let deadline_ms = self.timeout_secs * 1_000;
        info!(
            "provisioning: listening on port {} for {} s",
            PROVISIONING_PORT, self.timeout_secs
        );

        loop {
            if clock.now_ms() - started >= deadline_ms {
                warn!("provisioning: timed out");
                return Err(ProvisioningError::Timeout);
            }

            match self.socket.accept(PROVISIONING_PORT, ACCEPT_TIMEOUT_MS).await {
                Ok(()) => {
                    let handled = self.handle_connection().await;
                    self.socket.close().await;
                    match handled {
                        Ok(Some(candidate)) => {
                            info!("provisioning: configuration received");
                            clock.delay_ms(SUCCESS_LINGER_MS).await;
                            return Ok(candidate);
                        }
                        Ok(None) => {}
                        Err(e) => debug!("provisioning: dropped connection: {:?}", e),
                    }
                }
                Err(SocketError::Timeout) => {}
                Err(e) => debug!("provisioning: accept failed: {:?}", e),
            }

            clock.delay_ms(ACCEPT_LOOP_PAUSE_MS).await;
        }
    }

    pub async fn stop_access_point(&mut self) {
        self.ap.stop().await;
        info!("provisioning: access point stopped");
    }

    /// Start the access point, run the server, and stop the access point
    /// again whatever the outcome.
    pub async fn provision<C: Clock>(&mut self, clock: &C) -> Result<Value, ProvisioningError> {
        if let Err(e) = self.start_access_point(clock).await {
            self.stop_access_point().await;
            return Err(e);
        }
        let result = self.run_config_server(clock).await;
        self.stop_access_point().await;
        result
    }

    async fn handle_connection(&mut self) -> Result<Option<Value>, ConnectionError> {
        let head = self.read_head().await?;
        debug!("provisioning: {} {}", head.method, head.path);

        if !head.is_save() {
            self.socket
                .write_all(response("200 OK", SETUP_PAGE).as_bytes())
                .await?;
            return Ok(None);
        }

        let body = self.read_body(&head).await?;
        let body = core::str::from_utf8(&body).map_err(|_| ConnectionError::Request("form is not utf-8"))?;
        let fields = FormFields::parse(body);

        if fields.text("ssid").is_empty() {
            warn!("provisioning: submission without ssid");
            self.socket
                .write_all(response("400 Bad Request", SETUP_PAGE).as_bytes())
                .await?;
            return Ok(None);
        }

        self.socket
            .write_all(response("200 OK", SAVED_PAGE).as_bytes())
            .await?;
        Ok(Some(fields.to_candidate()))
    }

    async fn read_head(&mut self) -> Result<RequestHead, ConnectionError> {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 256];
        while find(&raw, b"\r\n\r\n").is_none() {
            if raw.len() >= REQUEST_HEAD_MAX {
                return Err(ConnectionError::Request("request head too large"));
            }
            let n = self.socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }
        RequestHead::parse(&raw).map_err(ConnectionError::Request)
    }

    /// Collect exactly `content_length` body bytes, reading as many times as
    /// the client needs. A peer that closes early leaves a short body.
    async fn read_body(&mut self, head: &RequestHead) -> Result<Vec<u8>, ConnectionError> {
        if head.content_length > FORM_BODY_MAX {
            return Err(ConnectionError::Request("form body too large"));
        }

        let mut body = head.body_prefix.clone();
        let mut chunk = [0u8; 256];
        while body.len() < head.content_length {
            let n = self.socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(head.content_length);
        Ok(body)
    }
}
