// src/catalog.rs - Static SVID/CEID/ALID/ECID definition catalogs

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ============================================================================
// ALARM CLASSIFICATION
// ============================================================================

/// Alarm priority. Lower numeric value is more urgent, so ascending order
/// lists the alarms an operator must handle first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmPriority {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
}

/// Alarm category, bucketed by numeric ALID range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCategory {
    System,
    Process,
    Tooling,
    Material,
    Communication,
    Maintenance,
    Unknown,
}

impl AlarmCategory {
    /// Category for an ALID: 1000s System, 2000s Process, 3000s Tooling,
    /// 4000s Material, 5000s Communication, 6000s Maintenance.
    pub fn from_alarm_id(id: u32) -> Self {
        match id {
            1000..=1999 => AlarmCategory::System,
            2000..=2999 => AlarmCategory::Process,
            3000..=3999 => AlarmCategory::Tooling,
            4000..=4999 => AlarmCategory::Material,
            5000..=5999 => AlarmCategory::Communication,
            6000..=6999 => AlarmCategory::Maintenance,
            _ => AlarmCategory::Unknown,
        }
    }
}

impl fmt::Display for AlarmCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub category: AlarmCategory,
    pub priority: AlarmPriority,
}

impl AlarmDefinition {
    pub fn new(id: u32, name: &str, description: &str, priority: AlarmPriority) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            category: AlarmCategory::from_alarm_id(id),
            priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusVariableDefinition {
    pub id: u32,
    pub name: String,
    pub units: String,
    /// Controller address backing the variable, if it is read from the controller
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: u32,
    pub name: String,
    /// Controller bit whose rising edge raises the event
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentConstantDefinition {
    pub id: u32,
    pub name: String,
    pub units: String,
    pub default_value: f64,
    pub min: f64,
    pub max: f64,
}

/// Counts published when catalogs are reported ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub status_variables: usize,
    pub events: usize,
    pub alarms: usize,
    pub equipment_constants: usize,
}

// ============================================================================
// CATALOG
// ============================================================================

/// Id → metadata lookups for one equipment type
#[derive(Debug, Clone, Default)]
pub struct DefinitionCatalog {
    status_variables: BTreeMap<u32, StatusVariableDefinition>,
    events: BTreeMap<u32, EventDefinition>,
    alarms: BTreeMap<u32, AlarmDefinition>,
    equipment_constants: BTreeMap<u32, EquipmentConstantDefinition>,
}

impl DefinitionCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog shipped with the standard equipment model
    pub fn standard() -> Self {
        use AlarmPriority::*;

        let mut catalog = Self::empty();

        for (id, name, units, address) in [
            (1, "Clock", "", None),
            (2, "ControlState", "", None),
            (3, "ControlMode", "", None),
            (4, "ProcessState", "", None),
            (5, "PreviousProcessState", "", None),
            (6, "EquipmentState", "", None),
            (7, "CommunicationState", "", None),
            (10, "AlarmsEnabled", "", None),
            (11, "AlarmsSet", "", None),
            (100, "ChamberTemperature", "degC", Some("DB10.DBD0")),
            (101, "ChamberPressure", "bar", Some("DB10.DBD4")),
            (102, "ToolUsageCount", "cycles", Some("DB10.DBD8")),
            (103, "ToolUsageLimit", "cycles", Some("DB10.DBD12")),
            (104, "PPExecName", "", None),
        ] {
            catalog.add_status_variable(StatusVariableDefinition {
                id,
                name: name.to_string(),
                units: units.to_string(),
                address: address.map(str::to_string),
            });
        }

        for (id, name, address) in [
            (1, "EquipmentOffline", None),
            (2, "ControlStateLocal", None),
            (3, "ControlStateRemote", None),
            (10, "ProcessStarted", None),
            (11, "ProcessCompleted", None),
            (12, "ProcessAborted", None),
            (20, "AlarmSet", None),
            (21, "AlarmCleared", None),
            (30, "MaterialReceived", Some("M20.0")),
            (31, "MaterialRemoved", Some("M20.1")),
            (40, "ChamberDoorOpened", Some("M21.0")),
        ] {
            catalog.add_event(EventDefinition {
                id,
                name: name.to_string(),
                address: address.map(str::to_string),
            });
        }

        for def in [
            AlarmDefinition::new(1001, "EmergencyStop", "Emergency stop circuit activated", Critical),
            AlarmDefinition::new(1002, "ControllerFault", "Controller reports a CPU fault", Critical),
            AlarmDefinition::new(1003, "SafetyDoorOpen", "Safety interlock door open", High),
            AlarmDefinition::new(1004, "MainAirPressureLow", "Main air supply below minimum", High),
            AlarmDefinition::new(2001, "ChamberTemperatureHigh", "Chamber temperature above warning band", High),
            AlarmDefinition::new(2002, "ChamberTemperatureCritical", "Chamber temperature above trip limit", Critical),
            AlarmDefinition::new(2003, "ChamberPressureOutOfRange", "Chamber pressure outside operating band", High),
            AlarmDefinition::new(2004, "ProcessTimeout", "Process step exceeded its time limit", Medium),
            AlarmDefinition::new(3001, "ToolLifeWarning", "Tool usage approaching limit", Low),
            AlarmDefinition::new(3002, "ToolLifeExceeded", "Tool usage reached limit", High),
            AlarmDefinition::new(4001, "WaferMissing", "Expected wafer not detected", Medium),
            AlarmDefinition::new(4002, "CarrierNotPresent", "Load port carrier not present", Low),
            AlarmDefinition::new(5001, "HostCommunicationLost", "Host link dropped", Medium),
            AlarmDefinition::new(6001, "PreventiveMaintenanceDue", "Preventive maintenance interval reached", Low),
            AlarmDefinition::new(6002, "FilterReplacementDue", "Exhaust filter replacement due", Low),
        ] {
            catalog.add_alarm(def);
        }

        for (id, name, units, default_value, min, max) in [
            (1, "EstablishCommunicationsTimeout", "s", 10.0, 1.0, 120.0),
            (2, "TimeFormat", "", 1.0, 0.0, 2.0),
            (10, "ChamberTemperatureLimit", "degC", 85.0, 0.0, 200.0),
            (11, "ChamberPressureMax", "bar", 8.0, 0.0, 20.0),
        ] {
            catalog.add_equipment_constant(EquipmentConstantDefinition {
                id,
                name: name.to_string(),
                units: units.to_string(),
                default_value,
                min,
                max,
            });
        }

        catalog
    }

    pub fn add_status_variable(&mut self, def: StatusVariableDefinition) {
        self.status_variables.insert(def.id, def);
    }

    pub fn add_event(&mut self, def: EventDefinition) {
        self.events.insert(def.id, def);
    }

    pub fn add_alarm(&mut self, def: AlarmDefinition) {
        self.alarms.insert(def.id, def);
    }

    pub fn add_equipment_constant(&mut self, def: EquipmentConstantDefinition) {
        self.equipment_constants.insert(def.id, def);
    }

    pub fn status_variable(&self, id: u32) -> Option<&StatusVariableDefinition> {
        self.status_variables.get(&id)
    }

    pub fn event(&self, id: u32) -> Option<&EventDefinition> {
        self.events.get(&id)
    }

    pub fn alarm(&self, id: u32) -> Option<&AlarmDefinition> {
        self.alarms.get(&id)
    }

    pub fn equipment_constant(&self, id: u32) -> Option<&EquipmentConstantDefinition> {
        self.equipment_constants.get(&id)
    }

    pub fn alarms(&self) -> impl Iterator<Item = &AlarmDefinition> {
        self.alarms.values()
    }

    pub fn alarms_in(&self, category: AlarmCategory) -> Vec<&AlarmDefinition> {
        self.alarms.values().filter(|a| a.category == category).collect()
    }

    /// CEIDs raised by controller edges, keyed to their controller address
    pub fn event_sources(&self) -> HashMap<u32, String> {
        self.events
            .values()
            .filter_map(|e| e.address.clone().map(|addr| (e.id, addr)))
            .collect()
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            status_variables: self.status_variables.len(),
            events: self.events.len(),
            alarms: self.alarms.len(),
            equipment_constants: self.equipment_constants.len(),
        }
    }
}
