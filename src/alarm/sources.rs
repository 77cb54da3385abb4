// src/alarm/sources.rs - Controller-side alarm sources and analog bands

use serde::{Deserialize, Serialize};

/// A boolean controller bit that raises an alarm while high
#[derive(Debug, Clone, Copy)]
pub struct DigitalSource {
    pub alarm_id: u32,
    pub address: &'static str,
    pub text: &'static str,
}

/// Fixed table of digital alarm sources polled every cycle
pub const DIGITAL_SOURCES: &[DigitalSource] = &[
    DigitalSource { alarm_id: 1001, address: "M0.0", text: "Emergency stop activated" },
    DigitalSource { alarm_id: 1002, address: "M0.1", text: "Controller fault" },
    DigitalSource { alarm_id: 1003, address: "M0.2", text: "Safety door open" },
    DigitalSource { alarm_id: 1004, address: "M0.3", text: "Main air pressure low" },
    DigitalSource { alarm_id: 4001, address: "M1.0", text: "Wafer missing" },
    DigitalSource { alarm_id: 4002, address: "M1.1", text: "Carrier not present" },
    DigitalSource { alarm_id: 6002, address: "M2.0", text: "Filter replacement due" },
];

pub const TEMPERATURE_ADDRESS: &str = "DB10.DBD0";
pub const PRESSURE_ADDRESS: &str = "DB10.DBD4";
pub const TOOL_USAGE_ADDRESS: &str = "DB10.DBD8";
pub const TOOL_LIMIT_ADDRESS: &str = "DB10.DBD12";

pub const ALARM_TEMPERATURE_HIGH: u32 = 2001;
pub const ALARM_TEMPERATURE_CRITICAL: u32 = 2002;
pub const ALARM_PRESSURE_RANGE: u32 = 2003;
pub const ALARM_TOOL_LIFE_WARNING: u32 = 3001;
pub const ALARM_TOOL_LIFE_EXCEEDED: u32 = 3002;

/// Bands for the synthetic analog alarms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogThresholds {
    /// Chamber temperature (°C) raising the high alarm
    #[serde(default = "default_temperature_high")]
    pub temperature_high: f64,

    #[serde(default = "default_temperature_critical")]
    pub temperature_critical: f64,

    /// Chamber pressure window (bar)
    #[serde(default = "default_pressure_min")]
    pub pressure_min: f64,

    #[serde(default = "default_pressure_max")]
    pub pressure_max: f64,

    /// Fraction of the tool usage limit that raises the warning
    #[serde(default = "default_tool_life_warning_ratio")]
    pub tool_life_warning_ratio: f64,
}

impl Default for AnalogThresholds {
    fn default() -> Self {
        Self {
            temperature_high: default_temperature_high(),
            temperature_critical: default_temperature_critical(),
            pressure_min: default_pressure_min(),
            pressure_max: default_pressure_max(),
            tool_life_warning_ratio: default_tool_life_warning_ratio(),
        }
    }
}

fn default_temperature_high() -> f64 {
    80.0
}

fn default_temperature_critical() -> f64 {
    95.0
}

fn default_pressure_min() -> f64 {
    0.5
}

fn default_pressure_max() -> f64 {
    2.5
}

fn default_tool_life_warning_ratio() -> f64 {
    0.9
}

/// One analog poll worth of readings; `None` when the read failed
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalogReadings {
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub tool_usage: Option<f64>,
    pub tool_limit: Option<f64>,
}

/// Desired level of one synthetic alarm
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogVerdict {
    pub alarm_id: u32,
    pub active: bool,
    pub text: String,
}

impl AnalogVerdict {
    fn new(alarm_id: u32, active: bool, text: String) -> Self {
        Self { alarm_id, active, text }
    }
}

/// Evaluate the bands. Alarms whose inputs are missing get no verdict and
/// keep their current level.
pub fn evaluate(readings: &AnalogReadings, thresholds: &AnalogThresholds) -> Vec<AnalogVerdict> {
    let mut verdicts = Vec::with_capacity(5);

    if let Some(t) = readings.temperature {
        let critical = t >= thresholds.temperature_critical;
        verdicts.push(AnalogVerdict::new(
            ALARM_TEMPERATURE_CRITICAL,
            critical,
            format!("Chamber temperature critical: {:.1}", t),
        ));
        verdicts.push(AnalogVerdict::new(
            ALARM_TEMPERATURE_HIGH,
            !critical && t >= thresholds.temperature_high,
            format!("Chamber temperature high: {:.1}", t),
        ));
    }

    if let Some(p) = readings.pressure {
        verdicts.push(AnalogVerdict::new(
            ALARM_PRESSURE_RANGE,
            p < thresholds.pressure_min || p > thresholds.pressure_max,
            format!("Chamber pressure out of range: {:.2}", p),
        ));
    }

    if let (Some(usage), Some(limit)) = (readings.tool_usage, readings.tool_limit) {
        if limit > 0.0 {
            let exceeded = usage >= limit;
            verdicts.push(AnalogVerdict::new(
                ALARM_TOOL_LIFE_EXCEEDED,
                exceeded,
                format!("Tool life exceeded: {:.0}/{:.0}", usage, limit),
            ));
            verdicts.push(AnalogVerdict::new(
                ALARM_TOOL_LIFE_WARNING,
                !exceeded && usage >= limit * thresholds.tool_life_warning_ratio,
                format!("Tool life warning: {:.0}/{:.0}", usage, limit),
            ));
        }
    }

    verdicts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_ids(verdicts: &[AnalogVerdict]) -> Vec<u32> {
        verdicts.iter().filter(|v| v.active).map(|v| v.alarm_id).collect()
    }

    #[test]
    fn test_nominal_readings_raise_nothing() {
        let readings = AnalogReadings {
            temperature: Some(25.0),
            pressure: Some(1.0),
            tool_usage: Some(10.0),
            tool_limit: Some(1000.0),
        };
        let verdicts = evaluate(&readings, &AnalogThresholds::default());
        assert_eq!(verdicts.len(), 5);
        assert!(active_ids(&verdicts).is_empty());
    }

    #[test]
    fn test_critical_temperature_supersedes_high() {
        let readings = AnalogReadings {
            temperature: Some(99.0),
            ..Default::default()
        };
        let verdicts = evaluate(&readings, &AnalogThresholds::default());
        assert_eq!(active_ids(&verdicts), vec![ALARM_TEMPERATURE_CRITICAL]);
    }

    #[test]
    fn test_tool_life_bands() {
        let thresholds = AnalogThresholds::default();
        let warn = AnalogReadings {
            tool_usage: Some(950.0),
            tool_limit: Some(1000.0),
            ..Default::default()
        };
        assert_eq!(active_ids(&evaluate(&warn, &thresholds)), vec![ALARM_TOOL_LIFE_WARNING]);

        let over = AnalogReadings {
            tool_usage: Some(1000.0),
            tool_limit: Some(1000.0),
            ..Default::default()
        };
        assert_eq!(active_ids(&evaluate(&over, &thresholds)), vec![ALARM_TOOL_LIFE_EXCEEDED]);
    }

    #[test]
    fn test_missing_inputs_give_no_verdict() {
        let readings = AnalogReadings {
            pressure: Some(3.0),
            tool_usage: Some(5.0),
            ..Default::default()
        };
        let verdicts = evaluate(&readings, &AnalogThresholds::default());
        assert_eq!(verdicts.len(), 1);
        assert_eq!(active_ids(&verdicts), vec![ALARM_PRESSURE_RANGE]);
    }
}
