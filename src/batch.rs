//! Batch accumulation and send policy.
//!
//! One call per wake: add the new reading, bound the stored list to the batch
//! threshold, and once enough wakes have passed try to publish everything.
//! A failed send keeps the data for the next wake; there is no retry within a
//! wake.

use alloc::vec::Vec;

use log::{info, warn};

use crate::model::{Configuration, Reading, RetainedState};
use crate::traits::{Clock, Publisher, Station};
use crate::transport::{BrokerSession, TransportClient};

/// Result of one batch step. The state has already been updated accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Threshold not reached, reading stored.
    Stored,
    /// Batch published, state cleared.
    Sent,
    /// Send attempted and failed, data kept.
    SendFailed,
    /// The network refused the stored wifi credentials. Data kept; the
    /// configuration must be discarded.
    CredentialsRejected,
}

/// Append `reading`, bump the wake count and drop the oldest readings beyond
/// `threshold`. Returns whether a send is due.
pub fn accumulate(state: &mut RetainedState, reading: Reading, threshold: u8) -> bool {
    state.readings.push(reading);
    state.count = state.count.saturating_add(1);

    let limit = usize::from(threshold);
    if state.readings.len() > limit {
        let excess = state.readings.len() - limit;
        state.readings.drain(..excess);
    }

    state.count >= threshold
}

pub fn payload(readings: &[Reading]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(readings)
}

pub struct BatchEngine<'a> {
    config: &'a Configuration,
}

impl<'a> BatchEngine<'a> {
    pub fn new(config: &'a Configuration) -> Self {
        Self { config }
    }

    pub async fn step<S: Station, P: Publisher, C: Clock>(
        &self,
        state: &mut RetainedState,
        reading: Reading,
        transport: &mut TransportClient<'_, S, P>,
        clock: &C,
    ) -> BatchOutcome {
        let threshold = self.config.readings.number;
        if !accumulate(state, reading, threshold) {
            info!("batch: {} of {} readings", state.count, threshold);
            return BatchOutcome::Stored;
        }

        info!("batch: sending {} readings", state.readings.len());
        let outcome = self.send(state, transport, clock).await;
        if outcome == BatchOutcome::Sent {
            *state = RetainedState::default();
        } else {
            warn!(
                "batch: send failed, keeping {} readings (count {})",
                state.readings.len(),
                state.count
            );
        }
        outcome
    }

    async fn send<S: Station, P: Publisher, C: Clock>(
        &self,
        state: &RetainedState,
        transport: &mut TransportClient<'_, S, P>,
        clock: &C,
    ) -> BatchOutcome {
        let wifi = &self.config.wifi;
        if let Err(e) = transport.connect_wifi(clock, &wifi.ssid, &wifi.password).await {
            return if e.is_fatal() {
                BatchOutcome::CredentialsRejected
            } else {
                BatchOutcome::SendFailed
            };
        }

        let Ok(body) = payload(&state.readings) else {
            warn!("batch: readings could not be serialized");
            return BatchOutcome::SendFailed;
        };

        let session = BrokerSession::from_config(self.config);
        match transport.publish(&session, &self.config.mqtt.topic, &body).await {
            Ok(()) => {
                transport.disconnect().await;
                BatchOutcome::Sent
            }
            Err(_) => BatchOutcome::SendFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate;
    use crate::testing::{FakeClock, FakePublisher, FakeRadio, candidate, reading};
    use crate::traits::LinkStatus;
    use embassy_futures::block_on;
    use serde_json::json;

    fn config_with_threshold(number: u8) -> Configuration {
        let mut value = candidate();
        value["readings"]["number"] = json!(number);
        validate(&value).unwrap()
    }

    fn run_step(
        config: &Configuration,
        state: &mut RetainedState,
        reading: Reading,
        radio: &mut FakeRadio,
        publisher: &mut FakePublisher,
    ) -> BatchOutcome {
        let clock = FakeClock::default();
        let mut transport = TransportClient::new(radio, publisher);
        block_on(BatchEngine::new(config).step(state, reading, &mut transport, &clock))
    }

    #[test]
    fn sends_exactly_when_count_reaches_threshold() {
        for threshold in [1u8, 2, 3, 5] {
            let config = config_with_threshold(threshold);
            let mut state = RetainedState::default();
            let mut radio = FakeRadio::joining_after(1);
            let mut publisher = FakePublisher::default();

            for cycle in 1..=u64::from(threshold) * 3 {
                let outcome = run_step(
                    &config,
                    &mut state,
                    reading(cycle, 20.0),
                    &mut radio,
                    &mut publisher,
                );
                if cycle % u64::from(threshold) == 0 {
                    assert_eq!(outcome, BatchOutcome::Sent, "T={} cycle={}", threshold, cycle);
                    assert_eq!(state, RetainedState::default());
                } else {
                    assert_eq!(outcome, BatchOutcome::Stored, "T={} cycle={}", threshold, cycle);
                }
            }
            assert_eq!(publisher.sent.len(), 3);
        }
    }

    #[test]
    fn published_payload_is_the_batch_in_order() {
        let config = config_with_threshold(3);
        let mut state = RetainedState::default();
        let mut radio = FakeRadio::joining_after(1);
        let mut publisher = FakePublisher::default();

        for t in 1..=3 {
            run_step(&config, &mut state, reading(t, t as f32), &mut radio, &mut publisher);
        }

        let (client_id, topic, body) = &publisher.sent[0];
        assert_eq!(client_id, "Node1");
        assert_eq!(topic, "sensors/t");
        let sent: Vec<Reading> = serde_json::from_slice(body).unwrap();
        assert_eq!(sent, vec![reading(1, 1.0), reading(2, 2.0), reading(3, 3.0)]);
        assert_eq!(radio.disconnects, 1);
    }

    #[test]
    fn trims_to_most_recent_threshold_readings() {
        let mut state = RetainedState {
            count: 1,
            readings: (0..6).map(|t| reading(t, 0.0)).collect(),
        };
        assert!(!accumulate(&mut state, reading(6, 0.0), 4));
        assert_eq!(state.count, 2);
        let kept: Vec<u64> = state.readings.iter().map(|r| r.timestamp).collect();
        assert_eq!(kept, vec![3, 4, 5, 6]);
    }

    #[test]
    fn transient_failure_keeps_data_and_stays_bounded() {
        let config = config_with_threshold(2);
        let mut state = RetainedState::default();
        let mut radio = FakeRadio::failing(LinkStatus::Failed);
        let mut publisher = FakePublisher::default();

        for t in 1..=6 {
            let outcome = run_step(&config, &mut state, reading(t, 0.0), &mut radio, &mut publisher);
            if t >= 2 {
                assert_eq!(outcome, BatchOutcome::SendFailed);
            }
        }

        assert_eq!(state.count, 6);
        let kept: Vec<u64> = state.readings.iter().map(|r| r.timestamp).collect();
        assert_eq!(kept, vec![5, 6]);
        assert!(publisher.sent.is_empty());
    }

    #[test]
    fn publish_failure_keeps_data() {
        let config = config_with_threshold(1);
        let mut state = RetainedState::default();
        let mut radio = FakeRadio::joining_after(1);
        let mut publisher = FakePublisher {
            fail: true,
            ..FakePublisher::default()
        };

        let outcome = run_step(&config, &mut state, reading(9, 0.0), &mut radio, &mut publisher);
        assert_eq!(outcome, BatchOutcome::SendFailed);
        assert_eq!(state.count, 1);
        assert_eq!(state.readings, vec![reading(9, 0.0)]);
    }

    #[test]
    fn wrong_password_reports_rejected_credentials() {
        let config = config_with_threshold(1);
        let mut state = RetainedState::default();
        let mut radio = FakeRadio::failing(LinkStatus::WrongPassword);
        let mut publisher = FakePublisher::default();

        let outcome = run_step(&config, &mut state, reading(1, 0.0), &mut radio, &mut publisher);
        assert_eq!(outcome, BatchOutcome::CredentialsRejected);
        assert_eq!(state.readings.len(), 1);
    }

    #[test]
    fn count_saturates_and_still_triggers_send() {
        let mut state = RetainedState {
            count: 255,
            readings: Vec::new(),
        };
        assert!(accumulate(&mut state, reading(1, 0.0), 255));
        assert_eq!(state.count, 255);
    }
}
