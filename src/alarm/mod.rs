//! Alarm lifecycle: set, clear and acknowledge, polling of controller
//! sources, and history retention.

mod manager;
mod sources;

pub use manager::{
    AlarmAction, AlarmHistoryRecord, AlarmManager, AlarmRecord, CriticalAlarmHook,
    MaintenanceReport,
};
pub use sources::{
    evaluate, AnalogReadings, AnalogThresholds, AnalogVerdict, DigitalSource, DIGITAL_SOURCES,
    PRESSURE_ADDRESS, TEMPERATURE_ADDRESS, TOOL_LIMIT_ADDRESS, TOOL_USAGE_ADDRESS,
};
