//! Station association and the one-shot broker publish.
//!
//! Neither operation retries. A failed attempt leaves the batch in retained
//! memory and the next wake tries again.

use log::{info, warn};

use crate::constants::{WIFI_CONNECT_TIMEOUT_SECS, WIFI_POLL_MS};
use crate::error::{PublishError, WifiError};
use crate::model::Configuration;
use crate::traits::{Clock, LinkStatus, Publisher, Station};

/// Broker coordinates for one publish attempt.
#[derive(Debug, Clone, Copy)]
pub struct BrokerSession<'a> {
    pub client_id: &'a str,
    pub broker: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub password: &'a str,
}

impl<'a> BrokerSession<'a> {
    pub fn from_config(config: &'a Configuration) -> Self {
        Self {
            client_id: &config.device.name,
            broker: &config.mqtt.broker,
            port: config.mqtt.port,
            username: &config.mqtt.username,
            password: &config.mqtt.password,
        }
    }
}

/// Wrong password and unknown network mean the stored credentials are bad.
pub fn classify(status: LinkStatus) -> WifiError {
    match status {
        LinkStatus::WrongPassword | LinkStatus::NoApFound => WifiError::Credential,
        _ => WifiError::Transient,
    }
}

pub struct TransportClient<'a, S: Station, P: Publisher> {
    station: &'a mut S,
    publisher: &'a mut P,
    timeout_secs: u64,
}

impl<'a, S: Station, P: Publisher> TransportClient<'a, S, P> {
    pub fn new(station: &'a mut S, publisher: &'a mut P) -> Self {
        Self {
            station,
            publisher,
            timeout_secs: WIFI_CONNECT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Join `ssid`, polling once per second until the timeout runs out.
    pub async fn connect_wifi<C: Clock>(
        &mut self,
        clock: &C,
        ssid: &str,
        password: &str,
    ) -> Result<(), WifiError> {
        if self.station.is_connected().await {
            return Ok(());
        }

        info!("wifi: connecting to '{}'", ssid);
        if let Err(e) = self.station.begin_connect(ssid, password).await {
            warn!("wifi: could not start association: {}", e);
            return Err(WifiError::Transient);
        }

        let polls = self.timeout_secs * 1_000 / WIFI_POLL_MS;
        for _ in 0..polls {
            if self.station.status().await == LinkStatus::Connected {
                info!("wifi: connected");
                return Ok(());
            }
            clock.delay_ms(WIFI_POLL_MS).await;
        }

        let status = self.station.status().await;
        if status == LinkStatus::Connected {
            info!("wifi: connected");
            return Ok(());
        }

        let error = classify(status);
        warn!("wifi: connection failed, status {:?} ({})", status, error);
        Err(error)
    }

    /// Connect, publish and disconnect. No retry.
    pub async fn publish(
        &mut self,
        session: &BrokerSession<'_>,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        self.publisher
            .publish(session, topic, payload)
            .await
            .map_err(|e| {
                warn!("mqtt: publish to '{}' failed: {}", topic, e);
                PublishError(e)
            })?;
        info!("mqtt: published {} bytes to '{}'", payload.len(), topic);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.station.disconnect().await;
    }
}
