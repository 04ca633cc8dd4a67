use serde::{Deserialize, Serialize};

use crate::error::DocumentError;

/// Scheduling trigger attached to a flow.
///
/// The graph core never inspects a schedule beyond round-tripping it
/// through [`serialize`]/[`deserialize`]; deciding when a flow starts is
/// the scheduler's concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Schedule {
    #[default]
    Never,
    Cron {
        expression: String,
    },
}

impl Schedule {
    /// Marshal this schedule to its wire form.
    pub fn serialize(&self) -> Result<serde_json::Value, DocumentError> {
        serialize(self)
    }
}

/// Marshal a schedule to its wire form.
pub fn serialize(schedule: &Schedule) -> Result<serde_json::Value, DocumentError> {
    Ok(serde_json::to_value(schedule)?)
}

/// Rebuild a schedule from its wire form.
pub fn deserialize(data: &serde_json::Value) -> Result<Schedule, DocumentError> {
    Ok(serde_json::from_value(data.clone())?)
}
