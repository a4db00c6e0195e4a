use crate::DEFAULT_REGISTRY_PORT;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize)]
pub struct Registry {
    pub address: String,
    pub port: u16,
    /// Deadline for a single registry call, in milliseconds.
    pub timeout_ms: u64,
}

#[derive(Serialize, Deserialize)]
pub struct Node {
    pub verbose: bool,
}

/// Per-process configuration, loaded from a TOML file. Every field has a
/// default so the configuration file is optional.
#[derive(Serialize, Deserialize)]
pub struct NodeConfig {
    pub registry: Registry,
    pub node: Node,
}

impl Default for NodeConfig {
    fn default() -> NodeConfig {
        NodeConfig {
            registry: Registry {
                address: "127.0.0.1".to_string(),
                port: DEFAULT_REGISTRY_PORT,
                timeout_ms: 5000,
            },
            node: Node { verbose: false },
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> NodeConfig {
        serdeconv::from_toml_file(path).expect("Error loading node configuration file")
    }

    /// Loads the configuration from the supplied path, or falls back to the
    /// defaults when no path was given.
    pub fn load_or_default(path: Option<&str>) -> NodeConfig {
        match path {
            Some(path) => NodeConfig::load(path),
            None => NodeConfig::default(),
        }
    }
}
