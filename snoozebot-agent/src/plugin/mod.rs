//! Plugin Runtime: discovery, signature/TLS/auth-gated loading, crash
//! supervision with restart backoff, and operation routing for
//! cloud-provider plugin subprocesses.

pub mod client;
pub mod manifest;
pub mod process;
pub mod supervisor;
pub mod versioning;

pub use manifest::PluginManifest;
pub use supervisor::{LoadedPluginInfo, PluginHealth, PluginRuntime, HOST_API_VERSION};
