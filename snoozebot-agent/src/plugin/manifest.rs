//! Signed plugin manifest.

use super::versioning::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub plugin_name: String,
    pub plugin_version: String,
    pub api_version: String,
    pub capabilities: BTreeSet<String>,
    pub min_host_version: String,
}

impl PluginManifest {
    pub fn api_version(&self) -> crate::error::AgentResult<Version> {
        Version::parse(&self.api_version)
    }

    pub fn min_host_version(&self) -> crate::error::AgentResult<Version> {
        Version::parse(&self.min_host_version)
    }
}
