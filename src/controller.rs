// src/controller.rs - Programmable controller data provider interface
use crate::{
    error::{GemError, Result},
    value::Value,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Callback invoked with `(id, value)` when a monitored controller bit changes
pub type EventCallback = Arc<dyn Fn(u32, Value) + Send + Sync>;

/// Register-level access to the programmable controller.
///
/// Transport (S7, Modbus, ...) lives behind this trait. Implementations
/// return errors for read faults; callers in this crate log and skip them.
#[async_trait]
pub trait ControllerDataProvider: Send + Sync {
    /// Whether the controller link is currently up
    fn is_connected(&self) -> bool;

    /// Read a value by logical id, optionally at an explicit address
    async fn read_value(&self, id: &str, address: Option<&str>) -> Result<Value>;

    /// Write a value by logical id, optionally at an explicit address
    async fn write_value(&self, id: &str, address: Option<&str>, value: Value) -> Result<()>;

    /// Execute a controller command (remote command / program select)
    async fn execute(&self, command: &str, params: &HashMap<String, Value>) -> Result<Value>;

    /// Watch the given `id → address` bits and call back on rising edges
    async fn monitor_events(
        &self,
        sources: HashMap<u32, String>,
        callback: EventCallback,
    ) -> Result<()>;

    /// Driver name for diagnostics
    fn name(&self) -> &'static str {
        "controller"
    }
}

/// In-memory controller image.
///
/// Backs the simulation driver and the test suites; also useful as a
/// loopback when bringing up a host link without hardware.
#[derive(Default)]
pub struct MemoryController {
    image: DashMap<String, Value>,
    connected: AtomicBool,
    read_fault: AtomicBool,
    monitors: Mutex<Vec<(HashMap<u32, String>, EventCallback)>>,
}

impl MemoryController {
    pub fn new() -> Self {
        let controller = Self::default();
        controller.connected.store(true, Ordering::Relaxed);
        controller
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Make every read fail until cleared
    pub fn set_read_fault(&self, fault: bool) {
        self.read_fault.store(fault, Ordering::Relaxed);
    }

    /// Write into the image and fire monitors on rising edges
    pub fn set(&self, address: &str, value: Value) {
        let rising = value.as_bool() == Some(true);
        let previous = self.image.insert(address.to_string(), value.clone());
        let was_high = previous.and_then(|v| v.as_bool()).unwrap_or(false);
        trace!("controller image {} = {}", address, value);

        if rising && !was_high {
            let callbacks: Vec<(u32, EventCallback)> = self
                .monitors
                .lock()
                .iter()
                .flat_map(|(sources, cb)| {
                    sources
                        .iter()
                        .filter(|(_, addr)| addr.as_str() == address)
                        .map(|(id, _)| (*id, Arc::clone(cb)))
                        .collect::<Vec<_>>()
                })
                .collect();
            for (id, callback) in callbacks {
                callback(id, value.clone());
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<Value> {
        self.image.get(address).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl ControllerDataProvider for MemoryController {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn read_value(&self, id: &str, address: Option<&str>) -> Result<Value> {
        if !self.is_connected() {
            return Err(GemError::Controller("controller not connected".into()));
        }
        if self.read_fault.load(Ordering::Relaxed) {
            return Err(GemError::Controller(format!("read fault on {}", id)));
        }
        let key = address.unwrap_or(id);
        self.get(key)
            .ok_or_else(|| GemError::NotFound(format!("controller address {}", key)))
    }

    async fn write_value(&self, id: &str, address: Option<&str>, value: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(GemError::Controller("controller not connected".into()));
        }
        self.set(address.unwrap_or(id), value);
        Ok(())
    }

    async fn execute(&self, command: &str, params: &HashMap<String, Value>) -> Result<Value> {
        if !self.is_connected() {
            return Err(GemError::Controller("controller not connected".into()));
        }
        debug!("controller execute {} ({} params)", command, params.len());
        Ok(Value::Bool(true))
    }

    async fn monitor_events(
        &self,
        sources: HashMap<u32, String>,
        callback: EventCallback,
    ) -> Result<()> {
        debug!("monitoring {} controller event sources", sources.len());
        self.monitors.lock().push((sources, callback));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_read_write_roundtrip_by_address() {
        let plc = MemoryController::new();
        plc.write_value("temp", Some("DB10.DBD0"), Value::Float(21.5))
            .await
            .unwrap();
        assert_eq!(
            plc.read_value("temp", Some("DB10.DBD0")).await.unwrap(),
            Value::Float(21.5)
        );
        assert!(matches!(
            plc.read_value("DB10.DBD0", None).await,
            Ok(Value::Float(_))
        ));
    }

    #[tokio::test]
    async fn test_faults_surface_as_errors() {
        let plc = MemoryController::new();
        plc.set("M0.0", Value::Bool(false));
        plc.set_read_fault(true);
        assert!(matches!(
            plc.read_value("M0.0", None).await,
            Err(GemError::Controller(_))
        ));
        plc.set_read_fault(false);
        plc.set_connected(false);
        assert!(plc.read_value("M0.0", None).await.is_err());
    }

    #[tokio::test]
    async fn test_monitor_fires_on_rising_edge_only() {
        let plc = MemoryController::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let mut sources = HashMap::new();
        sources.insert(30, "M20.0".to_string());
        plc.monitor_events(
            sources,
            Arc::new(move |id, _| {
                assert_eq!(id, 30);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        plc.set("M20.0", Value::Bool(true));
        plc.set("M20.0", Value::Bool(true));
        plc.set("M20.0", Value::Bool(false));
        plc.set("M20.0", Value::Bool(true));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
