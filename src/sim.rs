// src/sim.rs - Simulated host link and controller for demo configurations
//
// No sockets and no hardware: the host "connects" when the transport starts
// and completes its handshake after a fixed delay.

use crate::alarm::{PRESSURE_ADDRESS, TEMPERATURE_ADDRESS, TOOL_LIMIT_ADDRESS, TOOL_USAGE_ADDRESS};
use crate::config::DeviceConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::controller::MemoryController;
use crate::coordinator::{DeviceDriverFactory, DeviceDrivers};
use crate::error::Result;
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{interval, sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_HANDSHAKE_DELAY: Duration = Duration::from_secs(2);
const NOMINAL_TEMPERATURE: f64 = 25.0;
const NOMINAL_PRESSURE: f64 = 1.0;
const TOOL_LIMIT: f64 = 10_000.0;

/// Host peer that answers every request locally
pub struct SimulatedHostConnection {
    device_id: String,
    handshake_delay: Duration,
    online_ack: AtomicU8,
    /// When the session becomes selected; `None` while disconnected
    selected_at: RwLock<Option<Instant>>,
}

impl SimulatedHostConnection {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self::with_handshake_delay(device_id, DEFAULT_HANDSHAKE_DELAY)
    }

    pub fn with_handshake_delay(device_id: impl Into<String>, handshake_delay: Duration) -> Self {
        Self {
            device_id: device_id.into(),
            handshake_delay,
            online_ack: AtomicU8::new(0),
            selected_at: RwLock::new(None),
        }
    }

    /// ONLACK code returned to subsequent online requests
    pub fn set_online_ack(&self, code: u8) {
        self.online_ack.store(code, Ordering::Relaxed);
    }

    fn selected_at(&self) -> Option<Instant> {
        *self.selected_at.read()
    }
}

#[async_trait]
impl ConnectionManager for SimulatedHostConnection {
    async fn start(&self) -> Result<()> {
        let mut selected = self.selected_at.write();
        if selected.is_none() {
            *selected = Some(Instant::now() + self.handshake_delay);
            info!(device = %self.device_id, "Simulated host connected");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.selected_at.write() = None;
        debug!(device = %self.device_id, "Simulated host disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.selected_at.read().is_some()
    }

    async fn establish_communication(&self, _device_id: &str) -> Result<bool> {
        let mut selected = self.selected_at.write();
        match selected.as_mut() {
            Some(at) => {
                // the explicit exchange selects the session right away
                *at = Instant::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn request_online(&self, _device_id: &str) -> Result<u8> {
        Ok(self.online_ack.load(Ordering::Relaxed))
    }

    fn connection_state(&self) -> ConnectionState {
        match self.selected_at() {
            Some(at) if Instant::now() >= at => ConnectionState::Selected,
            Some(_) => ConnectionState::Connected,
            None => ConnectionState::NotConnected,
        }
    }

    fn communication_established(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if let Some(at) = self.selected_at() {
            tokio::spawn(async move {
                sleep_until(at).await;
                let _ = tx.send(());
            });
        }
        rx
    }
}

/// Seed a controller image with nominal process values and clear alarm bits
pub fn seed_controller(controller: &MemoryController) {
    controller.set(TEMPERATURE_ADDRESS, Value::Float(NOMINAL_TEMPERATURE));
    controller.set(PRESSURE_ADDRESS, Value::Float(NOMINAL_PRESSURE));
    controller.set(TOOL_USAGE_ADDRESS, Value::Float(0.0));
    controller.set(TOOL_LIMIT_ADDRESS, Value::Float(TOOL_LIMIT));
    for source in crate::alarm::DIGITAL_SOURCES {
        controller.set(source.address, Value::Bool(false));
    }
}

/// Random walk of the analog values until cancelled
pub async fn drift(controller: Arc<MemoryController>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let (dt, dp) = {
                    let mut rng = rand::thread_rng();
                    (rng.gen_range(-0.5..0.5), rng.gen_range(-0.02..0.02))
                };
                let read = |address: &str, default: f64| {
                    controller.get(address).and_then(|v| v.as_float()).unwrap_or(default)
                };
                let temperature = (read(TEMPERATURE_ADDRESS, NOMINAL_TEMPERATURE) + dt).clamp(15.0, 40.0);
                let pressure = (read(PRESSURE_ADDRESS, NOMINAL_PRESSURE) + dp).clamp(0.8, 1.2);
                let usage = read(TOOL_USAGE_ADDRESS, 0.0) + 1.0;

                controller.set(TEMPERATURE_ADDRESS, Value::Float(temperature));
                controller.set(PRESSURE_ADDRESS, Value::Float(pressure));
                controller.set(TOOL_USAGE_ADDRESS, Value::Float(usage));
            }
        }
    }
}

/// Builds simulated drivers for every configured device
pub struct SimulatedDriverFactory {
    handshake_delay: Duration,
    drift_period: Duration,
    cancel: CancellationToken,
}

impl SimulatedDriverFactory {
    pub fn new() -> Self {
        Self {
            handshake_delay: DEFAULT_HANDSHAKE_DELAY,
            drift_period: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    /// Stop every drift task started by this factory
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Default for SimulatedDriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDriverFactory for SimulatedDriverFactory {
    async fn create(&self, config: &DeviceConfig) -> Result<DeviceDrivers> {
        let controller = Arc::new(MemoryController::new());
        seed_controller(&controller);
        tokio::spawn(drift(
            Arc::clone(&controller),
            self.drift_period,
            self.cancel.child_token(),
        ));

        let connection =
            SimulatedHostConnection::with_handshake_delay(config.device_id.clone(), self.handshake_delay);
        Ok(DeviceDrivers {
            connection: Arc::new(connection),
            controller,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_handshake_after_delay() {
        let conn = SimulatedHostConnection::with_handshake_delay("EQ1", Duration::from_secs(2));
        assert_eq!(conn.connection_state(), ConnectionState::NotConnected);

        conn.start().await.unwrap();
        assert_eq!(conn.connection_state(), ConnectionState::Connected);

        conn.communication_established().await.unwrap();
        assert_eq!(conn.connection_state(), ConnectionState::Selected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_pending_before_delay() {
        let conn = SimulatedHostConnection::with_handshake_delay("EQ1", Duration::from_secs(2));
        conn.start().await.unwrap();

        let mut handshake = tokio_test::task::spawn(conn.communication_established());
        tokio_test::assert_pending!(handshake.poll());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handshake.is_woken());
        tokio_test::assert_ready_ok!(handshake.poll());
    }

    #[tokio::test]
    async fn test_stopped_host_never_handshakes() {
        let conn = SimulatedHostConnection::new("EQ1");
        assert!(conn.communication_established().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_selects_immediately() {
        let conn = SimulatedHostConnection::with_handshake_delay("EQ1", Duration::from_secs(60));
        assert!(!conn.establish_communication("EQ1").await.unwrap());
        conn.start().await.unwrap();
        assert!(conn.establish_communication("EQ1").await.unwrap());
        assert_eq!(conn.connection_state(), ConnectionState::Selected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_stays_in_band() {
        let controller = Arc::new(MemoryController::new());
        seed_controller(&controller);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drift(Arc::clone(&controller), Duration::from_millis(10), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.unwrap();

        let temperature = controller.get(TEMPERATURE_ADDRESS).unwrap().as_float().unwrap();
        assert!((15.0..=40.0).contains(&temperature));
        assert!(controller.get(TOOL_USAGE_ADDRESS).unwrap().as_float().unwrap() > 0.0);
    }
}
