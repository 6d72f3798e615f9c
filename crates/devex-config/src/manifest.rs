//! Plugin manifests (`plugin.kdl`).
//!
//! A manifest is optional. It can point at a non-default entrypoint, declare
//! stages beyond `plan` and `deploy`, and set a per-stage timeout:
//!
//! ```kdl
//! entrypoint "run.sh"
//! capabilities "plan" "deploy" "output"
//! timeout-secs 600
//! ```

use devex_core::plugin::PluginStage;
use kdl::KdlDocument;
use std::path::Path;
use std::time::Duration;

use crate::nodes::{get_all_string_args, get_u64_arg, require_string_arg};
use crate::{ConfigError, ConfigResult};

/// File name looked up in each plugin directory.
pub const MANIFEST_FILE: &str = "plugin.kdl";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginManifest {
    /// Entrypoint relative to the plugin directory.
    pub entrypoint: Option<String>,
    pub capabilities: Vec<PluginStage>,
    pub timeout: Option<Duration>,
}

pub fn parse_plugin_manifest(kdl: &str) -> ConfigResult<PluginManifest> {
    let doc: KdlDocument = kdl.parse()?;
    let mut manifest = PluginManifest::default();

    for node in doc.nodes() {
        match node.name().value() {
            "entrypoint" => manifest.entrypoint = Some(require_string_arg(node)?),
            "capabilities" => {
                for name in get_all_string_args(node) {
                    let stage: PluginStage = name.parse().map_err(|message| {
                        ConfigError::InvalidValue {
                            field: "capabilities".to_string(),
                            message,
                        }
                    })?;
                    if !manifest.capabilities.contains(&stage) {
                        manifest.capabilities.push(stage);
                    }
                }
            }
            "timeout-secs" => manifest.timeout = Some(Duration::from_secs(get_u64_arg(node)?)),
            _ => {}
        }
    }

    Ok(manifest)
}

/// Load `plugin.kdl` from a plugin directory, if present.
pub fn load_plugin_manifest(plugin_root: &Path) -> ConfigResult<Option<PluginManifest>> {
    let path = plugin_root.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    parse_plugin_manifest(&content).map(Some)
}
