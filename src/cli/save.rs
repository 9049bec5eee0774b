//! `stx save`: capture stack outputs as importable cue files.

use super::{StackAction, Toolbox};
use crate::auth::SessionBroker;
use crate::core::artifact::{package_name, write_artifact, ArtifactPaths};
use crate::core::config::Settings;
use crate::core::error::StxError;
use crate::core::events::{Event, Reporter};
use crate::core::stacks::StackView;
use crate::core::types::ConfigurationUnit;
use crate::transport::aws::{CloudFormation, StackOutput};
use crate::transport::local;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub(super) struct SaveAction {
    paths: ArtifactPaths,
    broker: Arc<SessionBroker>,
    cloudformation: Arc<dyn CloudFormation>,
    hook_timeout: Duration,
    reporter: Reporter,
}

impl SaveAction {
    pub(super) fn new(settings: &Settings, tools: &Toolbox, reporter: Reporter) -> Self {
        Self {
            paths: ArtifactPaths::new(
                settings.export.yml_path.clone(),
                settings.save.outputs_path.clone(),
            ),
            broker: Arc::clone(&tools.broker),
            cloudformation: Arc::clone(&tools.cloudformation),
            hook_timeout: settings.timeouts.external(),
            reporter,
        }
    }
}

/// Render outputs as a cue file declaring one struct named after the stack.
/// Keys and values are emitted as JSON string literals, which cue accepts.
pub fn render_outputs(package: &str, stack: &str, outputs: &[StackOutput]) -> String {
    let quote = |s: &str| serde_json::Value::from(s).to_string();
    let mut body = format!("package {}\n\n{}: {{\n", package, quote(stack));
    for output in outputs {
        body.push_str(&format!(
            "\t{}: {}\n",
            quote(&output.output_key),
            quote(&output.output_value)
        ));
    }
    body.push_str("}\n");
    body
}

#[async_trait]
impl StackAction for SaveAction {
    async fn on_stack(
        &self,
        unit: &ConfigurationUnit,
        view: &StackView<'_>,
    ) -> Result<(), StxError> {
        let stack = view.decode()?;
        let session = self.broker.session(&stack.profile).await?;
        let described = self
            .cloudformation
            .describe_stack(&session, &stack.region, &stack.name)
            .await
            .map_err(|message| StxError::CloudApi {
                stack: stack.name.clone(),
                message,
            })?;

        if described.outputs.is_empty() {
            self.reporter.emit(Event::StackSkipped {
                stack: stack.name.clone(),
                reason: "with no outputs.".to_string(),
            });
            return Ok(());
        }

        let file = self.paths.outputs_file(unit, &stack)?;
        let package = file
            .parent()
            .map(package_name)
            .unwrap_or_else(|| "outputs".to_string());
        write_artifact(&file, render_outputs(&package, &stack.name, &described.outputs).as_bytes())?;
        self.reporter.emit(Event::StackWritten {
            verb: "Saved",
            stack: stack.name.clone(),
            path: file.display().to_string(),
        });

        if !stack.hooks.is_empty() {
            let ran = local::exec_hooks(&stack.hooks, &unit.dir, self.hook_timeout)
                .await
                .map_err(|message| StxError::External {
                    command: "hook".to_string(),
                    message,
                })?;
            tracing::debug!(stack = %stack.name, ran, "hooks finished");
        }
        Ok(())
    }
}
