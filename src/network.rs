//! Radio, setup socket and MQTT publisher on top of esp-radio and
//! embassy-net.

use alloc::vec;
use core::sync::atomic::{AtomicU8, Ordering};

use embassy_net::{IpAddress, Ipv4Address, Stack, dns::DnsQueryType, tcp::TcpSocket};
use embassy_time::{Duration, with_timeout};
use embedded_io_async::Write;
use esp_radio::wifi::{
    AccessPointConfig, AuthMethod, ClientConfig, ModeConfig, WifiController,
    event::{self, EventExt},
};
use log::{debug, info, warn};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig as MqttClientConfig, MqttVersion},
    },
    packet::v5::{publish_packet::QualityOfService, reason_codes::ReasonCode},
    utils::rng_generator::CountingRng,
};

use crate::traits::{AccessPoint, ConfigSocket, LinkStatus, Publisher, SocketError, Station};
use crate::transport::BrokerSession;

const SOCKET_TIMEOUT_SECS: u64 = 10;
const CLOSE_FLUSH_MS: u64 = 250;
const MQTT_BUFFER: usize = 4096;
const MQTT_KEEP_ALIVE_SECS: u16 = 30;

/// Reason code of the last station disconnect, 0 while none has been seen
/// since the current attempt started.
static LAST_DISCONNECT: AtomicU8 = AtomicU8::new(0);

pub fn link_status_for(reason: u8) -> LinkStatus {
    match reason {
        0 => LinkStatus::Connecting,
        // 4-way handshake timeout, auth fail, handshake timeout
        15 | 202 | 204 => LinkStatus::WrongPassword,
        // no AP found, none with compatible security or auth mode
        201 | 210 | 211 => LinkStatus::NoApFound,
        _ => LinkStatus::Failed,
    }
}

/// The wifi controller with both of its network stacks.
pub struct Radio {
    controller: WifiController<'static>,
    sta: Stack<'static>,
    ap: Stack<'static>,
}

impl Radio {
    pub fn new(controller: WifiController<'static>, sta: Stack<'static>, ap: Stack<'static>) -> Self {
        event::StaDisconnected::update_handler(|event| {
            LAST_DISCONNECT.store(event.reason(), Ordering::Relaxed);
        });
        Self { controller, sta, ap }
    }

    async fn ensure_started(&mut self) -> Result<(), &'static str> {
        if matches!(self.controller.is_started(), Ok(true)) {
            return Ok(());
        }
        self.controller
            .start_async()
            .await
            .map_err(|_| "wifi start failed")
    }
}

impl Station for Radio {
    async fn is_connected(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true)) && self.sta.is_config_up()
    }

    async fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), &'static str> {
        LAST_DISCONNECT.store(0, Ordering::Relaxed);
        let config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(ssid.into())
                .with_password(password.into()),
        );
        self.controller
            .set_config(&config)
            .map_err(|_| "wifi client config rejected")?;
        self.ensure_started().await?;
        self.controller.connect().map_err(|_| "wifi connect failed")
    }

    async fn status(&mut self) -> LinkStatus {
        if self.is_connected().await {
            return LinkStatus::Connected;
        }
        let reason = LAST_DISCONNECT.load(Ordering::Relaxed);
        if reason != 0 {
            debug!("wifi: last disconnect reason {}", reason);
        }
        link_status_for(reason)
    }

    async fn disconnect(&mut self) {
        let _ = self.controller.disconnect_async().await;
        let _ = self.controller.stop_async().await;
        info!("wifi: disconnected");
    }
}

impl AccessPoint for Radio {
    async fn start(&mut self, ssid: &str, password: &str) -> Result<(), &'static str> {
        let config = ModeConfig::AccessPoint(
            AccessPointConfig::default()
                .with_ssid(ssid.into())
                .with_password(password.into())
                .with_auth_method(AuthMethod::Wpa2Personal),
        );
        self.controller
            .set_config(&config)
            .map_err(|_| "access point config rejected")?;
        self.ensure_started().await
    }

    async fn is_active(&mut self) -> bool {
        matches!(self.controller.is_started(), Ok(true)) && self.ap.is_link_up()
    }

    async fn stop(&mut self) {
        let _ = self.controller.stop_async().await;
    }
}

/// Listening socket for the setup page. Reused for every client.
pub struct SetupSocket {
    socket: TcpSocket<'static>,
}

impl SetupSocket {
    pub fn new(stack: Stack<'static>, rx: &'static mut [u8], tx: &'static mut [u8]) -> Self {
        let mut socket = TcpSocket::new(stack, rx, tx);
        socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));
        Self { socket }
    }
}

impl ConfigSocket for SetupSocket {
    async fn accept(&mut self, port: u16, timeout_ms: u64) -> Result<(), SocketError> {
        match with_timeout(Duration::from_millis(timeout_ms), self.socket.accept(port)).await {
            Ok(Ok(())) => {
                debug!("provisioning: client {:?}", self.socket.remote_endpoint());
                Ok(())
            }
            Ok(Err(e)) => {
                self.socket.abort();
                debug!("provisioning: accept error {:?}", e);
                Err(SocketError::Io("accept failed"))
            }
            Err(_) => {
                // Leave the listen state so the next accept starts clean
                self.socket.abort();
                Err(SocketError::Timeout)
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        self.socket
            .read(buf)
            .await
            .map_err(|_| SocketError::Io("read failed"))
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), SocketError> {
        self.socket
            .write_all(data)
            .await
            .map_err(|_| SocketError::Io("write failed"))
    }

    async fn close(&mut self) {
        self.socket.close();
        let _ = with_timeout(Duration::from_millis(CLOSE_FLUSH_MS), self.socket.flush()).await;
        self.socket.abort();
    }
}

/// rust-mqtt v5 client over a fresh TCP connection per publish.
pub struct MqttPublisher {
    stack: Stack<'static>,
    rx: &'static mut [u8],
    tx: &'static mut [u8],
}

impl MqttPublisher {
    pub fn new(stack: Stack<'static>, rx: &'static mut [u8], tx: &'static mut [u8]) -> Self {
        Self { stack, rx, tx }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddress, &'static str> {
        if let Ok(ipv4) = host.parse::<Ipv4Address>() {
            return Ok(IpAddress::Ipv4(ipv4));
        }
        let addresses = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|_| "broker name lookup failed")?;
        addresses.first().copied().ok_or("broker name has no address")
    }
}

fn reason_text(code: &ReasonCode) -> &'static str {
    match code {
        ReasonCode::NetworkError => "network error",
        ReasonCode::BadUserNameOrPassword => "bad username or password",
        ReasonCode::NotAuthorized => "not authorized",
        ReasonCode::ClientIdNotValid => "client id not valid",
        ReasonCode::ServerUnavailable => "server unavailable",
        ReasonCode::ServerBusy => "server busy",
        ReasonCode::TopicNameInvalid => "topic name invalid",
        ReasonCode::PacketTooLarge => "packet too large",
        _ => "broker refused",
    }
}

impl Publisher for MqttPublisher {
    async fn publish(
        &mut self,
        session: &BrokerSession<'_>,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), &'static str> {
        let address = self.resolve(session.broker).await?;

        let mut socket = TcpSocket::new(self.stack, self.rx, self.tx);
        socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));
        info!("mqtt: connecting to {}:{}", session.broker, session.port);
        socket
            .connect((address, session.port))
            .await
            .map_err(|_| "broker tcp connect failed")?;

        let mut config = MqttClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
        config.add_client_id(session.client_id);
        config.keep_alive = MQTT_KEEP_ALIVE_SECS;
        config.max_packet_size = MQTT_BUFFER as u32;
        if !session.username.is_empty() {
            config.add_username(session.username);
            if !session.password.is_empty() {
                config.add_password(session.password);
            }
        }

        let mut write_buffer = vec![0u8; MQTT_BUFFER];
        let mut recv_buffer = vec![0u8; MQTT_BUFFER];
        let mut client = MqttClient::<_, 5, _>::new(
            socket,
            &mut write_buffer,
            MQTT_BUFFER,
            &mut recv_buffer,
            MQTT_BUFFER,
            config,
        );

        client.connect_to_broker().await.map_err(|e| {
            warn!("mqtt: connect refused: {:?}", e);
            reason_text(&e)
        })?;

        let sent = match client
            .send_message(topic, payload, QualityOfService::QoS0, false)
            .await
        {
            Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => Ok(()),
            Err(e) => {
                warn!("mqtt: publish refused: {:?}", e);
                Err(reason_text(&e))
            }
        };

        let _ = client.disconnect().await;
        sent
    }
}
