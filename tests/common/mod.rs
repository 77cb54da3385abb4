// tests/common/mod.rs
//! Scriptable host connection and driver factory shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use gemlink::config::TransportConfig;
use gemlink::{
    ConnectionManager, ConnectionState, DeviceConfig, DeviceDriverFactory, DeviceDrivers,
    GemError, MemoryController, Result,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Host connection whose behaviour is set by the test
#[derive(Default)]
pub struct ScriptedConnection {
    pub connected: AtomicBool,
    pub fail_start: AtomicBool,
    /// Keep handshake registrations pending forever
    pub never_handshake: AtomicBool,
    pub starts: AtomicUsize,
    pub online_codes: Mutex<Vec<u8>>,
    pending: Mutex<Vec<oneshot::Sender<()>>>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn silent_host() -> Self {
        let conn = Self::default();
        conn.never_handshake.store(true, Ordering::SeqCst);
        conn
    }

    /// Complete every pending handshake registration
    pub fn complete_handshake(&self) {
        for tx in self.pending.lock().drain(..) {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl ConnectionManager for ScriptedConnection {
    async fn start(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(GemError::Transport("connection refused".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn establish_communication(&self, _device_id: &str) -> Result<bool> {
        Ok(self.is_connected())
    }

    async fn request_online(&self, _device_id: &str) -> Result<u8> {
        let mut codes = self.online_codes.lock();
        Ok(if codes.is_empty() { 0 } else { codes.remove(0) })
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::NotConnected
        }
    }

    fn communication_established(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.never_handshake.load(Ordering::SeqCst) {
            self.pending.lock().push(tx);
        } else {
            let _ = tx.send(());
        }
        rx
    }
}

/// Factory handing out [`ScriptedConnection`]s; listed ids refuse to start
#[derive(Default)]
pub struct ScriptedFactory {
    pub failing: HashSet<String>,
}

impl ScriptedFactory {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[async_trait]
impl DeviceDriverFactory for ScriptedFactory {
    async fn create(&self, config: &DeviceConfig) -> Result<DeviceDrivers> {
        let connection = ScriptedConnection::new();
        if self.failing.contains(&config.device_id) {
            connection.fail_start.store(true, Ordering::SeqCst);
        }
        Ok(DeviceDrivers {
            connection: Arc::new(connection),
            controller: Arc::new(MemoryController::new()),
        })
    }
}

pub fn device_config(id: &str) -> DeviceConfig {
    DeviceConfig::new(id, TransportConfig::new("127.0.0.1", 5000))
}
