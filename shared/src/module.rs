//! Deployable module identity, state and inventory entries

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// Identity of a deployable module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRef {
    #[serde(default)]
    pub symbolic_name: String,
    #[serde(default)]
    pub version: String,
}

impl ModuleRef {
    pub fn new(symbolic_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbolic_name, self.version)
    }
}

/// Lifecycle state of a module, with its numeric wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleState {
    Uninstalled,
    Installed,
    Resolved,
    Starting,
    Stopping,
    Active,
}

impl ModuleState {
    pub fn code(&self) -> u32 {
        match self {
            ModuleState::Uninstalled => 1,
            ModuleState::Installed => 2,
            ModuleState::Resolved => 4,
            ModuleState::Starting => 8,
            ModuleState::Stopping => 16,
            ModuleState::Active => 32,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ModuleState::Uninstalled),
            2 => Some(ModuleState::Installed),
            4 => Some(ModuleState::Resolved),
            8 => Some(ModuleState::Starting),
            16 => Some(ModuleState::Stopping),
            32 => Some(ModuleState::Active),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Uninstalled => "UNINSTALLED",
            ModuleState::Installed => "INSTALLED",
            ModuleState::Resolved => "RESOLVED",
            ModuleState::Starting => "STARTING",
            ModuleState::Stopping => "STOPPING",
            ModuleState::Active => "ACTIVE",
        };
        f.write_str(s)
    }
}

/// Lifecycle events emitted by the module runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEventKind {
    Installed,
    Started,
    Stopped,
    Updated,
    Uninstalled,
    Resolved,
    Unresolved,
    Starting,
    Stopping,
    LazyActivation,
}

/// A module as installed on the device
///
/// Serialized in reported state as `"<id>:<stateCode>:<symbolicName>:<version>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: u64,
    pub symbolic_name: String,
    pub version: String,
    pub state: ModuleState,
}

impl ModuleInfo {
    pub fn module_ref(&self) -> ModuleRef {
        ModuleRef::new(self.symbolic_name.clone(), self.version.clone())
    }

    pub fn matches(&self, module: &ModuleRef) -> bool {
        self.symbolic_name == module.symbolic_name && self.version == module.version
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.id,
            self.state.code(),
            self.symbolic_name,
            self.version
        )
    }
}

impl FromStr for ModuleInfo {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(4, ':').collect();
        if parts.len() != 4 {
            return Err(ModelError::InvalidModuleInfo(s.to_string()));
        }
        let id = parts[0]
            .parse::<u64>()
            .map_err(|_| ModelError::InvalidModuleInfo(s.to_string()))?;
        let state = parts[1]
            .parse::<u32>()
            .ok()
            .and_then(ModuleState::from_code)
            .ok_or_else(|| ModelError::InvalidModuleInfo(s.to_string()))?;

        Ok(Self {
            id,
            state,
            symbolic_name: parts[2].to_string(),
            version: parts[3].to_string(),
        })
    }
}

impl Serialize for ModuleInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModuleInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hardware acceleration profile used to select the right artifact build
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccelerationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicore: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi_number: Option<u32>,
}

impl fmt::Display for AccelerationInfo {
    /// Formats as `<target>_<m|s><abi>`, e.g. `linux_x86_64_m1`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}{}",
            self.target.as_deref().unwrap_or("unknown"),
            if self.multicore.unwrap_or(false) { "m" } else { "s" },
            self.abi_number.unwrap_or(0)
        )
    }
}
