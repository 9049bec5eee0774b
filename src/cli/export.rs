//! `stx export`: write each stack's Template as CloudFormation YAML.

use super::{StackAction, Toolbox};
use crate::auth::SessionBroker;
use crate::core::artifact::{write_artifact, ArtifactPaths};
use crate::core::config::Settings;
use crate::core::error::StxError;
use crate::core::events::{Event, Reporter};
use crate::core::secrets::{resolve_overrides, SecretDecrypter};
use crate::core::stacks::StackView;
use crate::core::types::ConfigurationUnit;
use async_trait::async_trait;
use std::sync::Arc;

pub(super) struct ExportAction {
    paths: ArtifactPaths,
    broker: Arc<SessionBroker>,
    decrypter: Arc<dyn SecretDecrypter>,
    reporter: Reporter,
}

impl ExportAction {
    pub(super) fn new(settings: &Settings, tools: &Toolbox, reporter: Reporter) -> Self {
        Self {
            paths: ArtifactPaths::new(
                settings.export.yml_path.clone(),
                settings.save.outputs_path.clone(),
            ),
            broker: Arc::clone(&tools.broker),
            decrypter: Arc::clone(&tools.decrypter),
            reporter,
        }
    }
}

#[async_trait]
impl StackAction for ExportAction {
    async fn on_stack(
        &self,
        unit: &ConfigurationUnit,
        view: &StackView<'_>,
    ) -> Result<(), StxError> {
        let stack = view.decode()?;
        let template = view
            .current()
            .and_then(|v| v.get("Template"))
            .ok_or_else(|| StxError::Decode {
                label: stack.name.clone(),
                message: "Template is undefined".to_string(),
            })?;

        let yml = serde_yaml_ng::to_string(template)?;
        let file = self.paths.template_file(&unit.root, &stack)?;
        write_artifact(&file, yml.as_bytes())?;
        self.reporter.emit(Event::StackWritten {
            verb: "Exported",
            stack: stack.name.clone(),
            path: file.display().to_string(),
        });

        if !stack.overrides.is_empty() {
            let params =
                resolve_overrides(&stack, &unit.dir, &self.broker, self.decrypter.as_ref()).await?;
            let file = self.paths.overrides_file(&unit.root, &stack)?;
            write_artifact(&file, serde_json::to_string_pretty(&params)?.as_bytes())?;
            self.reporter.emit(Event::StackWritten {
                verb: "Overrides",
                stack: stack.name.clone(),
                path: file.display().to_string(),
            });
        }
        Ok(())
    }
}
