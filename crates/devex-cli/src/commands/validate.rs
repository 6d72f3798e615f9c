//! Static checks of an application definition.

use anyhow::{Context, Result};
use devex_config::Reference;
use devex_config::document::load_document;
use devex_config::references::find_references;
use devex_core::{Application, Resource};
use devex_scheduler::graph::{cycle_members, unknown_dependencies};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn run(path: &Path) -> Result<()> {
    let definition = load_document(path)
        .with_context(|| format!("Failed to read application: {}", path.display()))?;
    let application = Application::new(path.display().to_string(), definition);
    let resources = application
        .resources()
        .with_context(|| format!("Invalid application: {}", path.display()))?;

    println!("Resources: {}", resources.len());
    for resource in &resources {
        println!("  {} ({})", resource.name, resource.kind);
    }

    let findings = check(&resources);
    for warning in &findings.warnings {
        println!("warning: {}", warning);
    }
    for error in &findings.errors {
        println!("error: {}", error);
    }

    if findings.is_valid() {
        println!("Application is valid");
        Ok(())
    } else {
        anyhow::bail!("{} problem(s) found", findings.errors.len());
    }
}

fn check(resources: &[Resource]) -> Findings {
    let mut findings = Findings::default();
    let names: BTreeSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();

    for (resource, dependency) in unknown_dependencies(resources) {
        findings.errors.push(format!(
            "resource '{}' depends on unknown resource '{}'",
            resource, dependency
        ));
    }

    let cycle = cycle_members(resources);
    if !cycle.is_empty() {
        let members: Vec<&str> = cycle.iter().map(String::as_str).collect();
        findings
            .errors
            .push(format!("dependency cycle between: {}", members.join(", ")));
    }

    for resource in resources {
        let properties = Value::Object(resource.properties.clone());
        for placeholder in find_references(&properties) {
            // Single-segment placeholders are configuration keys
            if !placeholder.contains('.') {
                continue;
            }
            match Reference::parse(&placeholder) {
                Ok(reference) if !names.contains(reference.resource.as_str()) => {
                    findings.errors.push(format!(
                        "resource '{}' references unknown resource in '${{{}}}'",
                        resource.name, reference
                    ));
                }
                Ok(reference) if !resource.depends_on.contains(&reference.resource) => {
                    findings.warnings.push(format!(
                        "resource '{}' references '{}' without depending on it",
                        resource.name, reference.resource
                    ));
                }
                Ok(_) => {}
                Err(e) => findings
                    .errors
                    .push(format!("resource '{}': {}", resource.name, e)),
            }
        }
    }

    findings
}
