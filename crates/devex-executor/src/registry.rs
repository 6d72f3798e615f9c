//! Resource kind → plugin executable bindings.
//!
//! Bindings come from two places. Explicit `plugin "<kind>" path=".."` entries
//! in the worker config win; every other kind is looked up under the plugin
//! directory as `<plugin-dir>/<kind>/plugin.sh` (or `plugin`), where the kind
//! may contain `/`. A `plugin.kdl` manifest next to the entrypoint can declare
//! extra capabilities and a timeout.

use devex_config::WorkerConfig;
use devex_config::manifest::{PluginManifest, load_plugin_manifest};
use devex_core::plugin::{PluginBinding, PluginStage};
use devex_core::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path};
use tracing::{debug, warn};

/// Entrypoint names tried, in order, when no manifest names one.
const DEFAULT_ENTRYPOINTS: &[&str] = &["plugin.sh", "plugin"];

#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    bindings: HashMap<String, PluginBinding>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, binding: PluginBinding) {
        self.bindings.insert(binding.kind.clone(), binding);
    }

    pub fn get(&self, kind: &str) -> Option<&PluginBinding> {
        self.bindings.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.bindings.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Resolve bindings for the given kinds.
    ///
    /// Kinds without a plugin are left unbound and logged; the engine fails
    /// those resources individually. A plugin directory that does not exist
    /// while some kind still needs it is an error for the whole deployment.
    pub fn resolve<'a>(
        config: &WorkerConfig,
        kinds: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut registry = Self::new();

        // Plugins run inside their scratch directory, so every path handed to
        // them is anchored to the worker's cwd here
        for plugin in &config.plugins {
            let binding = PluginBinding::new(&plugin.kind, std::path::absolute(&plugin.path)?)
                .with_timeout(config.plugin_timeout);
            let binding = match read_manifest(&binding.root) {
                Some(manifest) => apply_manifest(binding, &manifest),
                None => binding,
            };
            debug!(kind = %binding.kind, executable = %binding.executable.display(), "Registered plugin override");
            registry.register(binding);
        }

        let wanted: BTreeSet<&str> = kinds
            .into_iter()
            .filter(|kind| !registry.contains(kind))
            .collect();
        if wanted.is_empty() {
            return Ok(registry);
        }

        if !config.plugin_dir.is_dir() {
            return Err(Error::PluginDirectory(format!(
                "{} is not a directory",
                config.plugin_dir.display()
            )));
        }
        let plugin_dir = std::path::absolute(&config.plugin_dir)?;

        for kind in wanted {
            match discover(&plugin_dir, kind, config) {
                Some(binding) => {
                    debug!(kind = %kind, executable = %binding.executable.display(), "Discovered plugin");
                    registry.register(binding);
                }
                None => warn!(kind = %kind, plugin_dir = %config.plugin_dir.display(), "No plugin found for kind"),
            }
        }

        Ok(registry)
    }
}

/// Kinds map onto relative paths; anything that could escape the plugin
/// directory is never bound.
fn is_safe_kind(kind: &str) -> bool {
    !kind.is_empty()
        && Path::new(kind)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn discover(plugin_dir: &Path, kind: &str, config: &WorkerConfig) -> Option<PluginBinding> {
    if !is_safe_kind(kind) {
        warn!(kind = %kind, "Ignoring plugin kind that is not a relative path");
        return None;
    }

    let root = plugin_dir.join(kind);
    if !root.is_dir() {
        return None;
    }

    let manifest = read_manifest(&root);
    let executable = match manifest.as_ref().and_then(|m| m.entrypoint.as_deref()) {
        Some(entrypoint) => Some(root.join(entrypoint)).filter(|p| p.is_file()),
        None => DEFAULT_ENTRYPOINTS
            .iter()
            .map(|name| root.join(name))
            .find(|p| p.is_file()),
    }?;

    let binding = PluginBinding {
        kind: kind.to_string(),
        executable,
        root,
        capabilities: vec![PluginStage::Plan, PluginStage::Deploy],
        timeout: config.plugin_timeout,
    };
    Some(match manifest {
        Some(manifest) => apply_manifest(binding, &manifest),
        None => binding,
    })
}

fn read_manifest(root: &Path) -> Option<PluginManifest> {
    match load_plugin_manifest(root) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Ignoring invalid plugin manifest");
            None
        }
    }
}

fn apply_manifest(mut binding: PluginBinding, manifest: &PluginManifest) -> PluginBinding {
    for stage in &manifest.capabilities {
        binding = binding.with_capability(*stage);
    }
    if manifest.timeout.is_some() {
        binding.timeout = manifest.timeout;
    }
    binding
}

#[cfg(test)]
mod tests {
    use super::*;
    use devex_config::PluginOverride;
    use std::path::PathBuf;
    use std::time::Duration;

    fn write_plugin(dir: &Path, kind: &str, file: &str) -> PathBuf {
        let root = dir.join(kind);
        std::fs::create_dir_all(&root).unwrap();
        let path = root.join(file);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        path
    }

    fn config_for(dir: &Path) -> WorkerConfig {
        WorkerConfig {
            plugin_dir: dir.to_path_buf(),
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn test_discovers_nested_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let s3 = write_plugin(dir.path(), "aws/s3_bucket", "plugin.sh");
        let gcs = write_plugin(dir.path(), "gcp/bucket", "plugin");

        let registry =
            PluginRegistry::resolve(&config_for(dir.path()), ["aws/s3_bucket", "gcp/bucket"])
                .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("aws/s3_bucket").unwrap().executable, s3);
        let binding = registry.get("gcp/bucket").unwrap();
        assert_eq!(binding.executable, gcs);
        assert_eq!(binding.root, dir.path().join("gcp/bucket"));
        assert!(!binding.supports(PluginStage::Output));
    }

    #[test]
    fn test_missing_kind_left_unbound() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "gcp/bucket", "plugin.sh");

        let registry =
            PluginRegistry::resolve(&config_for(dir.path()), ["gcp/bucket", "gcp/queue"]).unwrap();

        assert!(registry.contains("gcp/bucket"));
        assert!(!registry.contains("gcp/queue"));
    }

    #[test]
    fn test_missing_plugin_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir.path().join("nope"));

        let result = PluginRegistry::resolve(&config, ["gcp/bucket"]);
        assert!(matches!(result, Err(Error::PluginDirectory(_))));
    }

    #[test]
    fn test_missing_plugin_dir_ok_when_nothing_needed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir.path().join("nope"));

        let registry = PluginRegistry::resolve(&config, std::iter::empty()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_manifest_capabilities_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_plugin(dir.path(), "terraform/aws", "run.sh");
        std::fs::write(
            dir.path().join("terraform/aws/plugin.kdl"),
            "entrypoint \"run.sh\"\ncapabilities \"output\"\ntimeout-secs 60\n",
        )
        .unwrap();

        let mut config = config_for(dir.path());
        config.plugin_timeout = Some(Duration::from_secs(900));
        let registry = PluginRegistry::resolve(&config, ["terraform/aws"]).unwrap();

        let binding = registry.get("terraform/aws").unwrap();
        assert_eq!(binding.executable, exe);
        assert!(binding.supports(PluginStage::Output));
        assert!(binding.supports(PluginStage::Plan));
        assert_eq!(binding.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_default_timeout_applied() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "gcp/bucket", "plugin.sh");

        let mut config = config_for(dir.path());
        config.plugin_timeout = Some(Duration::from_secs(30));
        let registry = PluginRegistry::resolve(&config, ["gcp/bucket"]).unwrap();

        assert_eq!(
            registry.get("gcp/bucket").unwrap().timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_override_wins_over_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "gcp/bucket", "plugin.sh");
        let custom = dir.path().join("custom.sh");
        std::fs::write(&custom, "#!/bin/sh\n").unwrap();

        let mut config = config_for(dir.path());
        config.plugins.push(PluginOverride {
            kind: "gcp/bucket".to_string(),
            path: custom.clone(),
        });
        let registry = PluginRegistry::resolve(&config, ["gcp/bucket"]).unwrap();

        assert_eq!(registry.get("gcp/bucket").unwrap().executable, custom);
    }

    #[test]
    fn test_path_escaping_kinds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir_all(&plugins).unwrap();
        write_plugin(dir.path(), "evil", "plugin.sh");

        let registry = PluginRegistry::resolve(&config_for(&plugins), ["../evil", "/etc"]).unwrap();
        assert!(registry.is_empty());
        assert!(!is_safe_kind(""));
        assert!(is_safe_kind("aws/s3_bucket"));
    }

    #[test]
    fn test_relative_paths_anchored_to_cwd() {
        let dir = tempfile::Builder::new()
            .prefix("devex-registry-")
            .tempdir_in(".")
            .unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap());
        write_plugin(&relative, "gcp/bucket", "plugin.sh");
        let custom = relative.join("custom.sh");
        std::fs::write(&custom, "#!/bin/sh\n").unwrap();

        let mut config = config_for(&relative);
        config.plugins.push(PluginOverride {
            kind: "gcp/queue".to_string(),
            path: custom,
        });
        let registry = PluginRegistry::resolve(&config, ["gcp/bucket", "gcp/queue"]).unwrap();

        let cwd = std::env::current_dir().unwrap();
        let bucket = registry.get("gcp/bucket").unwrap();
        assert_eq!(bucket.executable, cwd.join(&relative).join("gcp/bucket/plugin.sh"));
        assert_eq!(bucket.root, cwd.join(&relative).join("gcp/bucket"));
        let queue = registry.get("gcp/queue").unwrap();
        assert_eq!(queue.executable, cwd.join(&relative).join("custom.sh"));
        assert!(queue.root.is_absolute());
    }
}
