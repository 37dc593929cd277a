//! Combined settings for a store plus registrar.

use serde::{Deserialize, Serialize};

use crate::{persist::sqlite::StoreConfig, runtime::handle::RegistrarConfig};

/// Top-level settings. Every field is optional in the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Connection settings.
    pub store: StoreConfig,
    /// Registrar settings.
    pub registrar: RegistrarConfig,
}

impl Settings {
    /// Parses settings from JSON, filling gaps with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
