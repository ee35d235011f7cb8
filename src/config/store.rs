use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The token store backends, selected by a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Durable JSON document on disk; survives restarts.
    #[serde(rename = "file")]
    File(FileStoreConfig),
    /// Volatile in-process storage.
    #[serde(rename = "memory")]
    Memory,
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct FileStoreConfig {
    pub path: String,
}
