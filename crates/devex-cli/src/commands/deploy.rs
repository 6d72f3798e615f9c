//! Local deployment command.

use anyhow::{Context, Result};
use devex_config::WorkerConfig;
use devex_config::document::load_document;
use devex_core::plugin::LogStream;
use devex_core::{Application, Configuration, RecordId, ResourceStatus};
use devex_executor::ProcessExecutor;
use devex_scheduler::{DeploymentEngine, EngineEvent};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Deploy an application from local YAML files using plugin processes.
pub async fn run(
    config: WorkerConfig,
    application_path: &Path,
    configuration_path: &Path,
    plan_only: bool,
) -> Result<()> {
    let definition = load_document(application_path).with_context(|| {
        format!("Failed to read application: {}", application_path.display())
    })?;
    let values = load_document(configuration_path).with_context(|| {
        format!(
            "Failed to read configuration: {}",
            configuration_path.display()
        )
    })?;

    let application = named_application(application_path, definition);
    let configuration = Configuration::new(application.id, values);
    let deployment_id = RecordId::new();

    println!("Deploying application: {}", application.name);
    println!("Deployment: {}", deployment_id);
    println!("Plugin directory: {}", config.plugin_dir.display());
    if plan_only {
        println!("Plan only: no resource will be changed");
    }

    let engine = DeploymentEngine::new(Arc::new(ProcessExecutor::new()), Arc::new(config))
        .plan_only(plan_only);

    println!("\n--- Starting deployment ---\n");

    let (mut rx, report_handle) = engine.execute(deployment_id, application, Some(configuration));

    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::PhaseChanged { .. } => {}
            EngineEvent::ResourceStarted { resource } => {
                println!("▶ Resource '{}' started", resource);
            }
            EngineEvent::ResourceLog { resource, line } => {
                let marker = match line.stream {
                    LogStream::Stdout => " ",
                    LogStream::Stderr => "!",
                    LogStream::System => "*",
                };
                println!("  [{}]{} {}", resource, marker, line.content);
            }
            EngineEvent::ResourceCompleted { resource, state } => match state.status {
                ResourceStatus::Deployed => println!("✓ Resource '{}' deployed\n", resource),
                _ => println!(
                    "✗ Resource '{}' failed: {}\n",
                    resource,
                    state.reason.as_deref().unwrap_or("unknown error")
                ),
            },
            EngineEvent::DeploymentCompleted { state } => {
                println!("--- Deployment {} ---", state);
            }
        }
    }

    let report = report_handle
        .await
        .context("Deployment task failed")?;

    println!("\n--- Resource Summary ---");
    for (name, state) in &report.resources {
        match &state.reason {
            Some(reason) => println!("  {} - {}: {}", name, state.status, reason),
            None => println!("  {} - {}", name, state.status),
        }
        if let Some(output) = &state.output {
            println!("      output: {}", Value::Object(output.clone()));
        }
    }

    if let Some(error) = &report.error {
        anyhow::bail!("Deployment aborted: {}", error);
    }
    if report.is_success() {
        println!("\n✓ Deployment succeeded!");
        Ok(())
    } else {
        anyhow::bail!("Deployment failed");
    }
}

/// Named by `metadata.name`, falling back to the file name.
fn named_application(path: &Path, definition: Value) -> Application {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "application".to_string());
    let mut application = Application::new(stem, definition);
    let declared = application
        .metadata()
        .and_then(|metadata| metadata.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(name) = declared {
        application.name = name;
    }
    application
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_application_named_from_metadata() {
        let app = named_application(
            Path::new("apps/web.yaml"),
            json!({"metadata": {"name": "storefront"}, "resources": []}),
        );
        assert_eq!(app.name, "storefront");
    }

    #[test]
    fn test_application_name_falls_back_to_file_stem() {
        let app = named_application(Path::new("apps/web.yaml"), json!({"resources": []}));
        assert_eq!(app.name, "web");
        let app = named_application(Path::new("/"), json!({"resources": []}));
        assert_eq!(app.name, "application");
    }
}
