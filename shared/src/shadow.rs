//! Device shadow documents
//!
//! The shadow pairs a backend-owned `desired` section (commands to run) with
//! a device-owned `reported` section (device info, module inventory and task
//! results). A `null` task result is a tombstone: it tells a partial-update
//! consumer to delete the key, whereas an absent key means "leave as is".

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::module::ModuleInfo;
use crate::task::{Command, CommandResult};
use crate::ModelError;

/// Desired section of the shadow, as delivered by deltas
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Desired {
    #[serde(default, deserialize_with = "deserialize_tasks")]
    pub tasks: BTreeMap<String, Command>,
}

impl Desired {
    /// Parse a delta notification
    ///
    /// Accepts both the bare `{"tasks": {...}}` form and the enveloped
    /// `{"state": {"tasks": {...}}, "version": ..}` form.
    pub fn from_delta(payload: &[u8]) -> Result<Self, ModelError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let state = match value.get("state") {
            Some(state) if state.is_object() => state.clone(),
            _ => value,
        };
        Ok(serde_json::from_value(state)?)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }
}

/// Decode the task map one entry at a time
///
/// A malformed or `null` entry is dropped on its own so that one bad command
/// doesn't hide the rest of the snapshot. Entries without an `id` take the
/// map key.
fn deserialize_tasks<'de, D>(deserializer: D) -> Result<BTreeMap<String, Command>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    let mut tasks = BTreeMap::new();

    for (key, value) in raw.unwrap_or_default() {
        if value.is_null() {
            continue;
        }
        match serde_json::from_value::<Command>(value) {
            Ok(mut command) => {
                if command.id.is_empty() {
                    command.id = key.clone();
                }
                tasks.insert(key, command);
            }
            Err(e) => {
                tracing::warn!(task_id = %key, "Dropping malformed task: {}", e);
            }
        }
    }

    Ok(tasks)
}

/// Reported section of the shadow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reported {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<ModuleInfo>>,
    /// `None` values are tombstones and serialize as `null`
    #[serde(default)]
    pub task_results: BTreeMap<String, Option<CommandResult>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    #[serde(default)]
    pub desired: Desired,
    #[serde(default)]
    pub reported: Reported,
}

/// Full shadow document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    #[serde(default)]
    pub state: ShadowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Shadow {
    pub fn parse(payload: &[u8]) -> Result<Self, ModelError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Update document carrying only the reported section
///
/// Serializes as `{"state": {"reported": {...}}}` so that the desired
/// section of the cloud copy is never touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportedUpdate {
    pub state: ReportedUpdateState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportedUpdateState {
    pub reported: Reported,
}

impl ReportedUpdate {
    pub fn new(reported: Reported) -> Self {
        Self {
            state: ReportedUpdateState { reported },
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec(self)?)
    }
}
