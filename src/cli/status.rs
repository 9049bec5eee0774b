//! `stx status`: live CloudFormation status per stack.

use super::{StackAction, Toolbox};
use crate::auth::SessionBroker;
use crate::core::error::StxError;
use crate::core::events::{Event, Reporter};
use crate::core::stacks::StackView;
use crate::core::types::ConfigurationUnit;
use crate::transport::aws::CloudFormation;
use async_trait::async_trait;
use std::sync::Arc;

pub(super) struct StatusAction {
    broker: Arc<SessionBroker>,
    cloudformation: Arc<dyn CloudFormation>,
    reporter: Reporter,
}

impl StatusAction {
    pub(super) fn new(tools: &Toolbox, reporter: Reporter) -> Self {
        Self {
            broker: Arc::clone(&tools.broker),
            cloudformation: Arc::clone(&tools.cloudformation),
            reporter,
        }
    }
}

#[async_trait]
impl StackAction for StatusAction {
    fn begin_unit(&self, unit: &ConfigurationUnit) {
        self.reporter.emit(Event::StatusHeader {
            unit: unit.display_path.clone(),
        });
    }

    async fn on_stack(
        &self,
        _unit: &ConfigurationUnit,
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
        self.reporter.emit(Event::StackStatus {
            stack: stack.name,
            status: described.stack_status,
            created: described.creation_time.unwrap_or_default(),
            updated: described.last_updated_time.unwrap_or_else(|| "-".to_string()),
            reason: described.stack_status_reason.unwrap_or_default(),
        });
        Ok(())
    }
}
