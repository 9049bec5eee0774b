//! CloudFormation queries through the `aws` CLI.
//!
//! Uses the `aws` binary directly, no SDK dependency. A session either
//! carries resolved credentials (injected into the child environment) or
//! defers to the CLI's provider chain with `--profile`.

use super::{run, Invocation};
use crate::auth::Session;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// One `Outputs` entry of a described stack.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackOutput {
    pub output_key: String,
    #[serde(default)]
    pub output_value: String,
}

/// The subset of `describe-stacks` the drivers consume.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribedStack {
    pub stack_name: String,
    pub stack_status: String,
    #[serde(default)]
    pub stack_status_reason: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub last_updated_time: Option<String>,
    #[serde(default)]
    pub outputs: Vec<StackOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksResponse {
    #[serde(default)]
    stacks: Vec<DescribedStack>,
}

/// Read access to live CloudFormation state.
#[async_trait]
pub trait CloudFormation: Send + Sync {
    async fn describe_stack(
        &self,
        session: &Session,
        region: &str,
        stack_name: &str,
    ) -> Result<DescribedStack, String>;
}

/// [`CloudFormation`] backed by the `aws` executable.
#[derive(Debug, Clone)]
pub struct AwsCli {
    pub command: String,
    pub timeout: Duration,
}

impl AwsCli {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CloudFormation for AwsCli {
    async fn describe_stack(
        &self,
        session: &Session,
        region: &str,
        stack_name: &str,
    ) -> Result<DescribedStack, String> {
        let mut inv = Invocation::new(&self.command, self.timeout).args([
            "cloudformation",
            "describe-stacks",
            "--stack-name",
            stack_name,
            "--output",
            "json",
        ]);
        if !region.is_empty() {
            inv = inv.args(["--region", region]);
        }
        inv = session.apply(inv);

        let out = run(&inv).await?;
        if !out.success() {
            return Err(out.failure_message());
        }
        parse_describe_stacks(&out.stdout)
    }
}

/// Parse `describe-stacks` JSON and take the first stack.
pub fn parse_describe_stacks(json: &str) -> Result<DescribedStack, String> {
    let resp: DescribeStacksResponse =
        serde_json::from_str(json).map_err(|e| format!("invalid describe-stacks output: {}", e))?;
    resp.stacks
        .into_iter()
        .next()
        .ok_or_else(|| "describe-stacks returned no stacks".to_string())
}
