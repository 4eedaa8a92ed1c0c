//! One boot cycle, from wake to the decision to sleep or restart.
//!
//! Nothing here survives the cycle except what goes through the retained
//! memory and the configuration record. The caller performs the returned
//! [`CycleOutcome`].

use log::{error, info, warn};

use crate::batch::{BatchEngine, BatchOutcome};
use crate::config::ConfigStore;
use crate::constants::{FALLBACK_SLEEP_MS, POST_SAVE_SETTLE_MS, RETAINED_CAPACITY};
use crate::error::{ConfigError, CycleError};
use crate::feedback::{self, Signal};
use crate::model::{Configuration, Reading};
use crate::provisioning::ProvisioningServer;
use crate::retained;
use crate::traits::{
    AccessPoint, Clock, ConfigFile, ConfigSocket, EnvironmentSensor, Indicator, Publisher,
    RetainedMemory, Station,
};
use crate::transport::TransportClient;

/// Why the chip is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// Timer wake from deep sleep.
    DeepSleep,
    /// Software restart requested by a previous cycle.
    Restart,
    /// Power-on, reset pin, brownout or anything else. Retained memory from
    /// before belongs to another session.
    PowerOn,
}

/// Terminal action for the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Sleep { ms: u64 },
    Restart,
}

/// Every handle a cycle needs. `radio` serves both station and access-point
/// roles.
pub struct BootOrchestrator<M, F, E, I, R, K, P, C>
where
    F: ConfigFile,
{
    pub retained: M,
    pub store: ConfigStore<F>,
    pub sensor: E,
    pub led: I,
    pub radio: R,
    pub socket: K,
    pub publisher: P,
    pub clock: C,
}

impl<M, F, E, I, R, K, P, C> BootOrchestrator<M, F, E, I, R, K, P, C>
where
    M: RetainedMemory,
    F: ConfigFile,
    E: EnvironmentSensor,
    I: Indicator,
    R: Station + AccessPoint,
    K: ConfigSocket,
    P: Publisher,
    C: Clock,
{
    pub async fn run(&mut self, wake: WakeCause) -> CycleOutcome {
        info!("boot: wake cause {:?}", wake);
        if wake == WakeCause::PowerOn {
            info!("boot: fresh start, clearing retained memory");
            self.retained.clear();
        }

        let config = match self.store.load() {
            Ok(config) => config,
            Err(e @ ConfigError::Storage(_)) => {
                error!("boot: {}", e);
                feedback::show(&mut self.led, &self.clock, Signal::Fatal).await;
                return CycleOutcome::Sleep {
                    ms: FALLBACK_SLEEP_MS,
                };
            }
            Err(e) => {
                info!("boot: {}, entering setup mode", e);
                return self.provision().await;
            }
        };

        match self.measure(&config).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("boot: cycle failed: {}", e);
                feedback::show(&mut self.led, &self.clock, Signal::Fatal).await;
                CycleOutcome::Sleep {
                    ms: FALLBACK_SLEEP_MS,
                }
            }
        }
    }

    /// Collect a configuration over the setup access point. Always ends in a
    /// restart, saved or not.
    async fn provision(&mut self) -> CycleOutcome {
        let mut server = ProvisioningServer::new(&mut self.radio, &mut self.socket);
        let candidate = match server.provision(&self.clock).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("boot: provisioning failed: {}", e);
                return CycleOutcome::Restart;
            }
        };

        match self.store.create(&candidate) {
            Ok(_) => self.clock.delay_ms(POST_SAVE_SETTLE_MS).await,
            Err(e) => warn!("boot: submitted configuration not saved: {}", e),
        }
        CycleOutcome::Restart
    }

    async fn measure(&mut self, config: &Configuration) -> Result<CycleOutcome, CycleError> {
        let sleep = CycleOutcome::Sleep {
            ms: config.readings.sleep,
        };
        info!("boot: '{}' measuring", config.device.name);
        feedback::show(&mut self.led, &self.clock, Signal::Awake).await;

        let mut state = retained::load(&self.retained);
        info!(
            "boot: count {}, {} stored readings",
            state.count,
            state.readings.len()
        );

        let reading = match self.sensor.read() {
            Ok((temperature_c, pressure_hpa, humidity_pct)) => Reading {
                timestamp: self.clock.now_secs(),
                temperature_c,
                pressure_hpa,
                humidity_pct,
            },
            Err(e) => {
                warn!("boot: sensor unavailable: {}", e);
                feedback::show(&mut self.led, &self.clock, Signal::SensorFault).await;
                return Ok(sleep);
            }
        };
        if !reading.is_finite() {
            warn!("boot: sensor returned a non-finite value, reading discarded");
            feedback::show(&mut self.led, &self.clock, Signal::SensorFault).await;
            return Ok(sleep);
        }
        info!(
            "boot: T {:.1} C, P {:.1} hPa, H {:.1} %",
            reading.temperature_c, reading.pressure_hpa, reading.humidity_pct
        );

        let mut transport = TransportClient::new(&mut self.radio, &mut self.publisher);
        let outcome = BatchEngine::new(config)
            .step(&mut state, reading, &mut transport, &self.clock)
            .await;

        match outcome {
            BatchOutcome::Stored => {}
            BatchOutcome::Sent => feedback::show(&mut self.led, &self.clock, Signal::Sent).await,
            BatchOutcome::SendFailed | BatchOutcome::CredentialsRejected => {
                feedback::show(&mut self.led, &self.clock, Signal::SendFailed).await
            }
        }

        retained::persist(&mut self.retained, &mut state, RETAINED_CAPACITY)?;

        if outcome == BatchOutcome::CredentialsRejected {
            warn!("boot: wifi credentials rejected, discarding configuration");
            self.store.factory_reset()?;
            return Ok(CycleOutcome::Restart);
        }

        info!("boot: sleeping {} ms", config.readings.sleep);
        Ok(sleep)
    }
}
