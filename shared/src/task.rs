//! Task (command) and task result types
//!
//! Both are tagged unions keyed by a `type` discriminant. Fields common to
//! every variant live on the outer struct; variant payloads are flattened in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::module::ModuleRef;

/// A command issued by the backend, either through the desired state or a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Caller-assigned id, unique within a desired-state snapshot
    #[serde(default)]
    pub id: String,
    /// Issue time in milliseconds since Unix epoch
    #[serde(default)]
    pub timestamp: u64,
    /// API version the command was written against
    #[serde(
        default,
        rename = "apiVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_version: Option<String>,
    #[serde(flatten)]
    pub kind: CommandKind,
}

/// Variant-specific command payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandKind {
    #[serde(rename = "module-action")]
    ModuleAction(ModuleActionTask),
    #[serde(rename = "new-deploy")]
    NewDeploy(NewDeployTask),
    #[serde(rename = "config")]
    Config(ConfigTask),
    #[serde(rename = "launch")]
    Launch(LaunchTask),
    #[serde(rename = "sensor")]
    Sensor(SensorTask),
}

/// Discriminant of a command, used as the handler registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskType {
    ModuleAction,
    NewDeploy,
    Config,
    Launch,
    Sensor,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ModuleAction => "module-action",
            TaskType::NewDeploy => "new-deploy",
            TaskType::Config => "config",
            TaskType::Launch => "launch",
            TaskType::Sensor => "sensor",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle action on a single module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleAction {
    Start,
    Stop,
    Uninstall,
    List,
}

impl fmt::Display for ModuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleAction::Start => "START",
            ModuleAction::Stop => "STOP",
            ModuleAction::Uninstall => "UNINSTALL",
            ModuleAction::List => "LIST",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleActionTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbolic_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub action: ModuleAction,
}

impl ModuleActionTask {
    /// The targeted module, if both name and version are given
    pub fn target(&self) -> Option<ModuleRef> {
        match (&self.symbolic_name, &self.version) {
            (Some(name), Some(version)) => Some(ModuleRef::new(name.clone(), version.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeployTask {
    #[serde(default)]
    pub installs: Vec<ModuleRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<u64>,
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTask {
    #[serde(default)]
    pub symbolic_name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorAction {
    List,
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorTask {
    pub action: SensorAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl Command {
    /// Create a command with default timestamp and no declared version
    pub fn new(id: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            id: id.into(),
            timestamp: 0,
            api_version: None,
            kind,
        }
    }

    /// Set the declared api version
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn task_type(&self) -> TaskType {
        match self.kind {
            CommandKind::ModuleAction(_) => TaskType::ModuleAction,
            CommandKind::NewDeploy(_) => TaskType::NewDeploy,
            CommandKind::Config(_) => TaskType::Config,
            CommandKind::Launch(_) => TaskType::Launch,
            CommandKind::Sensor(_) => TaskType::Sensor,
        }
    }
}

/// Outcome of a task execution
///
/// Only terminal values are ever reported: the engine never publishes
/// `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    InProgress,
    Rejected,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Result of executing a [`Command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    #[serde(default)]
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub detail: ResultDetail,
}

/// Variant-specific result payloads, with a basic fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResultDetail {
    #[serde(rename = "basic-result")]
    Basic,
    #[serde(rename = "module-action-result")]
    ModuleAction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modules: Option<Vec<String>>,
    },
    #[serde(rename = "new-deploy-result")]
    NewDeploy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unsatisfied: Option<Vec<String>>,
    },
    #[serde(rename = "config-result")]
    Config {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<BTreeMap<String, serde_json::Value>>,
    },
    #[serde(rename = "launch-result")]
    Launch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results: Option<Vec<String>>,
    },
    #[serde(rename = "sensor-result")]
    Sensor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sensors: Option<String>,
    },
}

impl CommandResult {
    /// Create a result with the given status and payload
    pub fn new(task_id: impl Into<String>, status: TaskStatus, detail: ResultDetail) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            message: None,
            started: None,
            finished: None,
            detail,
        }
    }

    /// A basic result carrying only a status and a message
    pub fn basic(task_id: impl Into<String>, status: TaskStatus, message: impl Into<String>) -> Self {
        Self::new(task_id, status, ResultDetail::Basic).with_message(message)
    }

    pub fn succeeded(task_id: impl Into<String>, detail: ResultDetail) -> Self {
        Self::new(task_id, TaskStatus::Succeeded, detail)
    }

    pub fn failed(task_id: impl Into<String>, detail: ResultDetail, message: impl Into<String>) -> Self {
        Self::new(task_id, TaskStatus::Failed, detail).with_message(message)
    }

    pub fn rejected(task_id: impl Into<String>, detail: ResultDetail, message: impl Into<String>) -> Self {
        Self::new(task_id, TaskStatus::Rejected, detail).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_module_action_without_id() {
        let cmd: Command = serde_json::from_value(json!({
            "type": "module-action",
            "action": "START",
            "symbolicName": "m",
            "version": "1.0.0"
        }))
        .unwrap();

        assert_eq!(cmd.id, "");
        assert_eq!(cmd.task_type(), TaskType::ModuleAction);
        match cmd.kind {
            CommandKind::ModuleAction(t) => {
                assert_eq!(t.action, ModuleAction::Start);
                assert_eq!(t.target(), Some(ModuleRef::new("m", "1.0.0")));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_decode_new_deploy_with_api_version() {
        let cmd: Command = serde_json::from_value(json!({
            "id": "d1",
            "type": "new-deploy",
            "apiVersion": "1.2",
            "installs": [{"symbolicName": "a", "version": "2.0.0"}]
        }))
        .unwrap();

        assert_eq!(cmd.api_version.as_deref(), Some("1.2"));
        assert!(matches!(cmd.kind, CommandKind::NewDeploy(ref d) if d.installs.len() == 1));
    }

    #[test]
    fn test_unknown_type_is_rejected_by_decoder() {
        let result = serde_json::from_value::<Command>(json!({"id": "x", "type": "reboot"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_result_wire_shape() {
        let result = CommandResult::rejected("t1", ResultDetail::Basic, "Unsupported task type: launch");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["type"], "basic-result");
        assert_eq!(value["taskId"], "t1");
        assert_eq!(value["status"], "REJECTED");
        assert!(value.get("started").is_none());
    }

    #[test]
    fn test_list_result_carries_modules() {
        let result = CommandResult::succeeded(
            "t2",
            ResultDetail::ModuleAction {
                modules: Some(vec!["a".into(), "b".into()]),
            },
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "module-action-result");
        assert_eq!(value["modules"], json!(["a", "b"]));

        let back: CommandResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_in_progress_is_not_terminal() {
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());
    }
}
