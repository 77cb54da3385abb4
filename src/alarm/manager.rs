use super::sources::{
    evaluate, AnalogReadings, DIGITAL_SOURCES, PRESSURE_ADDRESS, TEMPERATURE_ADDRESS,
    TOOL_LIMIT_ADDRESS, TOOL_USAGE_ADDRESS,
};
use crate::catalog::{AlarmCategory, AlarmPriority, DefinitionCatalog};
use crate::config::AlarmConfig;
use crate::controller::ControllerDataProvider;
use crate::events::{EventBus, EventKind, GemEvent};
use crate::state::AlarmCounter;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Invoked once each time a Critical alarm becomes active
pub type CriticalAlarmHook = Arc<dyn Fn(&AlarmRecord) + Send + Sync>;

/// An active alarm
#[derive(Debug, Clone, Serialize)]
pub struct AlarmRecord {
    pub id: u32,
    pub text: String,
    pub set_time: DateTime<Utc>,
    pub priority: AlarmPriority,
    pub category: AlarmCategory,
    pub acknowledged: bool,
    pub ack_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmAction {
    Set,
    Cleared,
    Acknowledged,
    /// Low priority alarm cleared by the staleness policy
    AutoCleared,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmHistoryRecord {
    pub id: u32,
    pub action: AlarmAction,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub pruned: usize,
    pub auto_cleared: usize,
}

/// Per-device alarm manager
pub struct AlarmManager {
    device_id: String,
    config: AlarmConfig,
    catalog: Arc<DefinitionCatalog>,
    controller: Arc<dyn ControllerDataProvider>,
    events: EventBus,
    active: DashMap<u32, AlarmRecord>,
    history: RwLock<VecDeque<AlarmHistoryRecord>>,
    critical_hook: RwLock<Option<CriticalAlarmHook>>,
}

impl AlarmManager {
    pub fn new(
        device_id: impl Into<String>,
        config: AlarmConfig,
        catalog: Arc<DefinitionCatalog>,
        controller: Arc<dyn ControllerDataProvider>,
        events: EventBus,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            config,
            catalog,
            controller,
            events,
            active: DashMap::new(),
            history: RwLock::new(VecDeque::new()),
            critical_hook: RwLock::new(None),
        }
    }

    pub fn set_critical_hook(&self, hook: CriticalAlarmHook) {
        *self.critical_hook.write() = Some(hook);
    }

    fn classify(&self, id: u32) -> (AlarmPriority, AlarmCategory) {
        match self.catalog.alarm(id) {
            Some(def) => (def.priority, def.category),
            None => (AlarmPriority::Medium, AlarmCategory::from_alarm_id(id)),
        }
    }

    fn record_history(&self, id: u32, action: AlarmAction, text: &str, timestamp: DateTime<Utc>) {
        self.history.write().push_back(AlarmHistoryRecord {
            id,
            action,
            text: text.to_string(),
            timestamp,
        });
    }

    /// Raise an alarm. Returns `false` if it is already active.
    pub fn set_alarm(&self, id: u32, text: &str) -> bool {
        let (priority, category) = self.classify(id);
        let now = Utc::now();
        let record = AlarmRecord {
            id,
            text: text.to_string(),
            set_time: now,
            priority,
            category,
            acknowledged: false,
            ack_time: None,
        };

        match self.active.entry(id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }

        self.record_history(id, AlarmAction::Set, text, now);
        warn!(
            device = %self.device_id,
            alarm = id,
            priority = ?priority,
            "Alarm set: {}",
            text
        );
        self.events.publish(
            GemEvent::new(&self.device_id, EventKind::AlarmOccurred)
                .with_new(id)
                .with_reason(text),
        );

        if priority == AlarmPriority::Critical {
            let hook = self.critical_hook.read().clone();
            match hook {
                Some(hook) => hook(&record),
                None => error!(device = %self.device_id, alarm = id, "Critical alarm with no handler"),
            }
        }
        true
    }

    /// Clear an alarm. Returns `false` if it was not active.
    pub fn clear_alarm(&self, id: u32) -> bool {
        self.remove_alarm(id, AlarmAction::Cleared)
    }

    fn remove_alarm(&self, id: u32, action: AlarmAction) -> bool {
        let Some((_, record)) = self.active.remove(&id) else {
            return false;
        };

        self.record_history(id, action, &record.text, Utc::now());
        info!(device = %self.device_id, alarm = id, "Alarm {:?}: {}", action, record.text);
        self.events.publish(
            GemEvent::new(&self.device_id, EventKind::AlarmCleared)
                .with_new(id)
                .with_reason(record.text),
        );
        true
    }

    /// Mark an active alarm acknowledged; it stays active until cleared.
    pub fn acknowledge_alarm(&self, id: u32) -> bool {
        let text = {
            let Some(mut record) = self.active.get_mut(&id) else {
                return false;
            };
            if record.acknowledged {
                return true;
            }
            record.acknowledged = true;
            record.ack_time = Some(Utc::now());
            record.text.clone()
        };

        self.record_history(id, AlarmAction::Acknowledged, &text, Utc::now());
        info!(device = %self.device_id, alarm = id, "Alarm acknowledged");
        true
    }

    pub fn is_active(&self, id: u32) -> bool {
        self.active.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active alarms, most urgent first, then by id
    pub fn get_active_alarms(&self) -> Vec<AlarmRecord> {
        let mut alarms: Vec<AlarmRecord> =
            self.active.iter().map(|entry| entry.value().clone()).collect();
        alarms.sort_by_key(|a| (a.priority, a.id));
        alarms
    }

    /// History records at or after `since` (all when `None`), oldest first
    pub fn history(&self, since: Option<DateTime<Utc>>) -> Vec<AlarmHistoryRecord> {
        let history = self.history.read();
        match since {
            Some(since) => history
                .iter()
                .filter(|r| r.timestamp >= since)
                .cloned()
                .collect(),
            None => history.iter().cloned().collect(),
        }
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Level-triggered scan of the digital sources. Returns the number of
    /// alarms that changed level.
    pub async fn poll_digital(&self) -> usize {
        if !self.controller.is_connected() {
            return 0;
        }

        let mut changed = 0;
        for source in DIGITAL_SOURCES {
            let value = match self
                .controller
                .read_value(source.address, Some(source.address))
                .await
            {
                Ok(value) => value,
                Err(e) => {
                    debug!(device = %self.device_id, address = source.address, "digital read skipped: {}", e);
                    continue;
                }
            };

            let high = match value.expect_bool() {
                Ok(high) => high,
                Err(e) => {
                    warn!(device = %self.device_id, address = source.address, "{}", e);
                    continue;
                }
            };

            let flipped = if high {
                self.set_alarm(source.alarm_id, source.text)
            } else {
                self.clear_alarm(source.alarm_id)
            };
            if flipped {
                changed += 1;
            }
        }
        changed
    }

    async fn read_analog(&self, address: &str) -> Option<f64> {
        match self.controller.read_value(address, Some(address)).await {
            Ok(value) => match value.expect_float() {
                Ok(reading) => Some(reading),
                Err(e) => {
                    warn!(device = %self.device_id, address, "{}", e);
                    None
                }
            },
            Err(e) => {
                debug!(device = %self.device_id, address, "analog read skipped: {}", e);
                None
            }
        }
    }

    /// Evaluate analog bands. Returns the number of alarms that changed level.
    pub async fn poll_analog(&self) -> usize {
        if !self.controller.is_connected() {
            return 0;
        }

        let readings = AnalogReadings {
            temperature: self.read_analog(TEMPERATURE_ADDRESS).await,
            pressure: self.read_analog(PRESSURE_ADDRESS).await,
            tool_usage: self.read_analog(TOOL_USAGE_ADDRESS).await,
            tool_limit: self.read_analog(TOOL_LIMIT_ADDRESS).await,
        };

        evaluate(&readings, &self.config.thresholds)
            .into_iter()
            .filter(|verdict| {
                if verdict.active {
                    self.set_alarm(verdict.alarm_id, &verdict.text)
                } else {
                    self.clear_alarm(verdict.alarm_id)
                }
            })
            .count()
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.maintain_at(Utc::now())
    }

    /// Prune history past retention and auto-clear stale Low priority alarms
    pub fn maintain_at(&self, now: DateTime<Utc>) -> MaintenanceReport {
        // out-of-range windows disable that half of the pass
        let stale_before = ChronoDuration::try_hours(self.config.low_priority_auto_clear_hours)
            .and_then(|window| now.checked_sub_signed(window));
        let stale: Vec<u32> = match stale_before {
            Some(stale_before) => self
                .active
                .iter()
                .filter(|e| e.priority == AlarmPriority::Low && e.set_time < stale_before)
                .map(|e| e.id)
                .collect(),
            None => Vec::new(),
        };

        let auto_cleared = stale
            .into_iter()
            .filter(|id| self.remove_alarm(*id, AlarmAction::AutoCleared))
            .count();

        let cutoff = ChronoDuration::try_days(self.config.history_retention_days)
            .and_then(|window| now.checked_sub_signed(window));
        let pruned = match cutoff {
            Some(cutoff) => {
                let mut history = self.history.write();
                let before = history.len();
                history.retain(|r| r.timestamp >= cutoff);
                before - history.len()
            }
            None => 0,
        };

        if pruned > 0 || auto_cleared > 0 {
            info!(
                device = %self.device_id,
                pruned,
                auto_cleared,
                "Alarm maintenance complete"
            );
        }
        MaintenanceReport { pruned, auto_cleared }
    }

    /// Drive the digital, analog and maintenance cadences until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(e) = self.config.validate() {
            error!(device = %self.device_id, "Alarm manager not started: {}", e);
            return;
        }

        let mut digital = interval(self.config.digital_poll());
        let mut analog = interval(self.config.analog_poll());
        let mut maintenance = interval(self.config.maintenance_interval());
        for ticker in [&mut digital, &mut analog, &mut maintenance] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        info!(device = %self.device_id, "Alarm manager started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = digital.tick() => {
                    self.poll_digital().await;
                }
                _ = analog.tick() => {
                    self.poll_analog().await;
                }
                _ = maintenance.tick() => {
                    self.run_maintenance();
                }
            }
        }

        info!(device = %self.device_id, "Alarm manager stopped");
    }
}

impl AlarmCounter for AlarmManager {
    fn active_alarm_count(&self) -> usize {
        self.active_count()
    }
}
