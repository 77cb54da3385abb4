// src/coordinator/batch.rs - Operations across a subset of devices
//
// Every device gets its own task so a failure, panic or deadline expiry on
// one device becomes that device's result and never aborts the others.

use super::instance::{DeviceInstance, DeviceInstanceEvent};
use super::DeviceCoordinator;
use crate::error::OperationResult;
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchOperation {
    Start,
    Stop,
    Initialize,
    RequestOnline,
    RequestOffline,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BatchMode {
    /// Bounded concurrency under one overall deadline
    #[default]
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceResult {
    pub device_id: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<DeviceResult>,
}

impl BatchResult {
    fn from_results(results: Vec<DeviceResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn result_for(&self, device_id: &str) -> Option<&DeviceResult> {
        self.results.iter().find(|r| r.device_id == device_id)
    }
}

impl DeviceCoordinator {
    /// Run one of the predefined operations over `device_ids`
    pub async fn batch(
        &self,
        operation: BatchOperation,
        device_ids: &[String],
        mode: BatchMode,
    ) -> BatchResult {
        info!(?operation, ?mode, devices = device_ids.len(), "Batch operation");
        let gate = Arc::clone(&self.gate);
        let events = self.events.clone();

        self.batch_with(device_ids, mode, move |device| {
            let gate = Arc::clone(&gate);
            let events = events.clone();
            async move {
                match operation {
                    BatchOperation::Start => {
                        let _guard = gate.lock().await;
                        let result = OperationResult::from(device.start().await);
                        if result.success {
                            Self::publish_instance_event(&events, &device, DeviceInstanceEvent::Started);
                        }
                        result
                    }
                    BatchOperation::Stop => {
                        let _guard = gate.lock().await;
                        let result = OperationResult::from(device.stop().await);
                        if result.success {
                            Self::publish_instance_event(&events, &device, DeviceInstanceEvent::Stopped);
                        }
                        result
                    }
                    BatchOperation::Initialize => {
                        let outcome = device.initialize().await;
                        OperationResult {
                            success: outcome.success,
                            message: outcome.message,
                        }
                    }
                    BatchOperation::RequestOnline => device.request_online().await,
                    BatchOperation::RequestOffline => device.request_offline(),
                    BatchOperation::Reconnect => {
                        let result = OperationResult::from(device.reconnect().await);
                        if result.success {
                            Self::publish_instance_event(
                                &events,
                                &device,
                                DeviceInstanceEvent::Reconnected,
                            );
                        }
                        result
                    }
                }
            }
        })
        .await
    }

    /// Run an arbitrary operation over `device_ids` with the batch guarantees
    pub async fn batch_with<F, Fut>(
        &self,
        device_ids: &[String],
        mode: BatchMode,
        operation: F,
    ) -> BatchResult
    where
        F: Fn(Arc<DeviceInstance>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        let deadline = Instant::now() + self.config.batch_deadline();
        let operation = Arc::new(operation);
        let permits = Arc::new(Semaphore::new(self.config.max_parallel_operations.max(1)));

        let mut results = Vec::with_capacity(device_ids.len());
        let mut pending: Vec<(String, JoinHandle<OperationResult>)> = Vec::new();

        for device_id in device_ids {
            let Some(device) = self.device(device_id) else {
                results.push(DeviceResult {
                    device_id: device_id.clone(),
                    success: false,
                    message: format!("device '{}' not found", device_id),
                });
                continue;
            };

            let operation = Arc::clone(&operation);
            let permits = Arc::clone(&permits);
            let handle = tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return OperationResult::fail("batch closed"),
                };
                operation(device).await
            });

            match mode {
                BatchMode::Parallel => pending.push((device_id.clone(), handle)),
                BatchMode::Sequential => {
                    results.push(Self::collect(device_id.clone(), handle, deadline).await);
                }
            }
        }

        results.extend(
            join_all(
                pending
                    .into_iter()
                    .map(|(device_id, handle)| Self::collect(device_id, handle, deadline)),
            )
            .await,
        );

        // keep the caller's ordering
        results.sort_by_key(|r| {
            device_ids
                .iter()
                .position(|id| *id == r.device_id)
                .unwrap_or(usize::MAX)
        });

        let batch = BatchResult::from_results(results);
        info!(
            total = batch.total,
            succeeded = batch.succeeded,
            failed = batch.failed,
            "Batch complete"
        );
        batch
    }

    async fn collect(
        device_id: String,
        mut handle: JoinHandle<OperationResult>,
        deadline: Instant,
    ) -> DeviceResult {
        let (success, message) = match timeout_at(deadline, &mut handle).await {
            Ok(Ok(result)) => (result.success, result.message),
            Ok(Err(e)) if e.is_panic() => {
                warn!(device = %device_id, "Batch operation panicked");
                (false, "operation panicked".to_string())
            }
            Ok(Err(e)) => (false, format!("operation aborted: {}", e)),
            Err(_) => {
                handle.abort();
                warn!(device = %device_id, "Batch deadline exceeded");
                (false, "batch deadline exceeded".to_string())
            }
        };
        DeviceResult {
            device_id,
            success,
            message,
        }
    }
}
