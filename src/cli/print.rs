//! `stx print`: evaluated stacks as YAML.

use super::StackAction;
use crate::core::error::StxError;
use crate::core::events::{Event, Reporter};
use crate::core::stacks::StackView;
use crate::core::tree;
use crate::core::types::ConfigurationUnit;
use async_trait::async_trait;

pub(super) struct PrintAction {
    path: Option<(String, Vec<String>)>,
    reporter: Reporter,
}

impl PrintAction {
    pub(super) fn new(path: Option<&str>, reporter: Reporter) -> Self {
        Self {
            path: path
                .filter(|p| !p.is_empty())
                .map(|p| (p.to_string(), tree::split_path(p))),
            reporter,
        }
    }
}

#[async_trait]
impl StackAction for PrintAction {
    async fn on_stack(
        &self,
        unit: &ConfigurationUnit,
        view: &StackView<'_>,
    ) -> Result<(), StxError> {
        let (Some(label), Some(value)) = (view.label(), view.current()) else {
            return Ok(());
        };
        let (heading, value) = match &self.path {
            Some((dotted, segments)) => match tree::lookup(value, segments.as_slice()) {
                Some(v) => (format!("Stacks.{}.{}", label, dotted), v),
                None => {
                    tracing::debug!(stack = label, path = %dotted, "path not present");
                    return Ok(());
                }
            },
            None => (format!("Stacks.{}", label), value),
        };
        let yml = serde_yaml_ng::to_string(value)?;
        self.reporter.emit(Event::Document {
            unit: unit.display_path.clone(),
            body: format!("{}:\n{}", heading, yml),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use super::super::Commands;
    use crate::core::types::Flags;
    use serde_json::json;

    fn print(path: Option<&str>, only_errors: bool, hide_errors: bool) -> Commands {
        Commands::Print {
            paths: vec![],
            path: path.map(String::from),
            only_errors,
            hide_errors,
        }
    }

    fn trees() -> Vec<(&'static str, serde_json::Value)> {
        vec![(
            "./vpc",
            json!({ "Stacks": {
                "a": { "Environment": "dev", "Template": { "Outputs": { "VpcId": { "Value": "x" } } } },
                "b": { "Environment": "prod", "Template": { "Resources": {} } }
            } }),
        )]
    }

    #[tokio::test]
    async fn test_print_whole_stack() {
        let dir = project(&["vpc"]);
        let (tools, _) = tools(&trees(), FakeCloudFormation::default());
        let flags = Flags {
            environment: Some("prod".into()),
            ..Flags::default()
        };
        let (result, out) = run(print(None, false, false), flags, dir.path(), tools).await;
        assert_eq!(result.unwrap().errors, 0);
        let text = out.text();
        assert!(text.starts_with("./vpc\nStacks.b:\n"));
        assert!(text.contains("Environment: prod"));
        assert!(!text.contains("Stacks.a"));
    }

    #[tokio::test]
    async fn test_print_path_skips_missing() {
        let dir = project(&["vpc"]);
        let (tools, _) = tools(&trees(), FakeCloudFormation::default());
        let (result, out) = run(
            print(Some("Template.Outputs"), false, false),
            Flags::default(),
            dir.path(),
            tools,
        )
        .await;
        assert_eq!(result.unwrap().errors, 0);
        let text = out.text();
        assert!(text.contains("Stacks.a.Template.Outputs:\nVpcId:"));
        assert!(!text.contains("Stacks.b"));
    }

    #[tokio::test]
    async fn test_only_errors_suppresses_documents() {
        let dir = project(&["vpc", "bad"]);
        let (tools, _) = tools(&trees(), FakeCloudFormation::default());
        let (result, out) = run(print(None, true, false), Flags::default(), dir.path(), tools).await;
        assert_eq!(result.unwrap().errors, 1);
        let text = out.text();
        assert!(text.contains("./bad: no tree"));
        assert!(!text.contains("Stacks.a"));
    }

    #[tokio::test]
    async fn test_hide_errors_still_counts() {
        let dir = project(&["vpc", "bad"]);
        let (tools, _) = tools(&trees(), FakeCloudFormation::default());
        let (result, out) = run(print(None, false, true), Flags::default(), dir.path(), tools).await;
        assert_eq!(result.unwrap().errors, 1);
        let text = out.text();
        assert!(!text.contains("no tree"));
        assert!(text.contains("Stacks.a"));
    }
}
