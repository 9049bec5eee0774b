//! CLI subcommands: export, save, print, status.
//!
//! Every driver follows the same pipeline: discover units, evaluate them
//! concurrently, then walk each tree's filtered stacks with a per-stack
//! action. Fatal errors raised while walking (credentials) are collected and
//! end the run once the batch settles.

mod export;
mod print;
mod save;
mod status;

use crate::auth::SessionBroker;
use crate::core::config::Settings;
use crate::core::discovery;
use crate::core::error::StxError;
use crate::core::evaluator::{CueCli, Evaluator};
use crate::core::events::{Event, RenderOptions, Reporter, ReporterHandle, Summary};
use crate::core::process::{ConcurrentEvaluator, ProcessReport, UnitHandler};
use crate::core::secrets::{SecretDecrypter, SopsCli};
use crate::core::stacks::{StackFilter, StackView};
use crate::core::tree::EvaluatedTree;
use crate::core::types::{ConfigurationUnit, Flags};
use crate::transport::aws::{AwsCli, CloudFormation};
use async_trait::async_trait;
use clap::{Args, Subcommand};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stack selection flags accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalFlags {
    /// Only stacks whose Environment equals this value
    #[arg(short, long, global = true)]
    pub environment: Option<String>,

    /// Only stacks whose Profile equals this value
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Only stacks whose RegionCode equals this value
    #[arg(short, long, global = true)]
    pub region_code: Option<String>,

    /// Regex over stack names
    #[arg(short, long, global = true)]
    pub stacks: Option<String>,

    /// Only stacks where this dotted path exists, e.g. Template.Outputs
    #[arg(long, global = true)]
    pub has: Option<String>,

    /// Regex over unit paths to skip
    #[arg(short = 'x', long, global = true)]
    pub exclude: Option<String>,
}

impl From<GlobalFlags> for Flags {
    fn from(g: GlobalFlags) -> Self {
        Flags {
            environment: g.environment,
            profile: g.profile,
            region_code: g.region_code,
            stacks: g.stacks,
            has: g.has,
            exclude: g.exclude,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Render each stack's Template as CloudFormation YAML
    Export {
        /// Directories to evaluate; `dir/...` recurses (default: ./...)
        paths: Vec<String>,
    },

    /// Save stack outputs as importable cue files under cue.mod
    Save {
        /// Directories to evaluate; `dir/...` recurses (default: ./...)
        paths: Vec<String>,
    },

    /// Print evaluated stacks as YAML
    Print {
        /// Directories to evaluate; `dir/...` recurses (default: ./...)
        paths: Vec<String>,

        /// Dotted path under each stack to print, e.g. Template.Outputs
        #[arg(short = 'P', long)]
        path: Option<String>,

        /// Only print errors
        #[arg(long, conflicts_with = "hide_errors")]
        only_errors: bool,

        /// Hide errors
        #[arg(long)]
        hide_errors: bool,
    },

    /// Show CloudFormation status of each stack
    Status {
        /// Directories to evaluate; `dir/...` recurses (default: ./...)
        paths: Vec<String>,
    },
}

impl Commands {
    fn paths(&self) -> &[String] {
        match self {
            Commands::Export { paths }
            | Commands::Save { paths }
            | Commands::Print { paths, .. }
            | Commands::Status { paths } => paths,
        }
    }

    fn render_options(&self) -> RenderOptions {
        match self {
            Commands::Print {
                only_errors,
                hide_errors,
                ..
            } => RenderOptions {
                only_errors: *only_errors,
                hide_errors: *hide_errors,
            },
            _ => RenderOptions::default(),
        }
    }
}

/// External collaborators a run talks to.
#[derive(Clone)]
pub struct Toolbox {
    pub evaluator: Arc<dyn Evaluator>,
    pub cloudformation: Arc<dyn CloudFormation>,
    pub broker: Arc<SessionBroker>,
    pub decrypter: Arc<dyn SecretDecrypter>,
}

impl Toolbox {
    pub fn from_settings(settings: &Settings) -> Self {
        let timeout = settings.timeouts.external();
        Self {
            evaluator: Arc::new(CueCli::new(settings.cue.command.clone(), timeout)),
            cloudformation: Arc::new(AwsCli::new(settings.aws.command.clone(), timeout)),
            broker: Arc::new(SessionBroker::from_settings(settings)),
            decrypter: Arc::new(SopsCli::new(settings.sops.command.clone(), timeout)),
        }
    }
}

/// Dispatch a CLI command from the current directory.
pub async fn dispatch(cmd: Commands, flags: Flags) -> Result<(), StxError> {
    let cwd = std::env::current_dir()?;
    let root = discovery::find_root(&cwd)?;
    let settings = Settings::load(&root)?;
    let tools = Toolbox::from_settings(&settings);

    let hide_errors = matches!(cmd, Commands::Print { hide_errors: true, .. });
    let summary = execute(
        &cmd,
        &flags,
        &cwd,
        &settings,
        tools,
        std::io::stdout(),
        shutdown_signal(),
    )
    .await?;

    if summary.errors > 0 && !hide_errors {
        println!("Total errors: {}", summary.errors);
    }
    if !summary.fatal.is_empty() {
        return Err(StxError::Aborted(summary.fatal.join("\n")));
    }
    Ok(())
}

/// Resolves on Ctrl-C; never resolves where signals are unavailable.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::debug!("ctrl-c handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Run `cmd` against units under `cwd`, rendering events into `out`.
pub async fn execute<W, F>(
    cmd: &Commands,
    flags: &Flags,
    cwd: &Path,
    settings: &Settings,
    tools: Toolbox,
    out: W,
    shutdown: F,
) -> Result<Summary, StxError>
where
    W: Write + Send + 'static,
    F: std::future::Future<Output = ()>,
{
    if let Commands::Save { .. } = cmd {
        if settings.auth.aws_vault.enabled {
            crate::auth::vault::ensure_not_nested(crate::auth::vault::NESTED_SESSION_VAR)?;
        }
    }

    let filter = Arc::new(StackFilter::from_flags(flags)?);
    let units = discovery::discover(cwd, cmd.paths(), &settings.cue.package)?;

    let handle = ReporterHandle::spawn(cmd.render_options(), out);
    let reporter = handle.reporter();
    let handler: Arc<dyn UnitHandler> = match cmd {
        Commands::Export { .. } => StackDriver::shared(
            export::ExportAction::new(settings, &tools, reporter.clone()),
            &filter,
            &reporter,
        ),
        Commands::Save { .. } => StackDriver::shared(
            save::SaveAction::new(settings, &tools, reporter.clone()),
            &filter,
            &reporter,
        ),
        Commands::Print { path, .. } => StackDriver::shared(
            print::PrintAction::new(path.as_deref(), reporter.clone()),
            &filter,
            &reporter,
        ),
        Commands::Status { .. } => StackDriver::shared(
            status::StatusAction::new(&tools, reporter.clone()),
            &filter,
            &reporter,
        ),
    };

    let report: ProcessReport = ConcurrentEvaluator::new(tools.evaluator.clone(), reporter)
        .run_until(units, flags.exclude.as_deref(), handler, shutdown)
        .await?;
    tracing::debug!(?report, "batch settled");
    let mut summary = handle.finish().await;
    if report.cancelled > 0 {
        summary
            .fatal
            .push(format!("interrupted: {} unit(s) cancelled", report.cancelled));
    }
    Ok(summary)
}

/// What a driver does with one selected stack.
#[async_trait]
trait StackAction: Send + Sync + 'static {
    /// Called once per unit that has a `Stacks` struct, before its stacks.
    fn begin_unit(&self, _unit: &ConfigurationUnit) {}

    async fn on_stack(
        &self,
        unit: &ConfigurationUnit,
        view: &StackView<'_>,
    ) -> Result<(), StxError>;
}

/// Walks a tree's filtered stacks and applies an action to each.
struct StackDriver<A> {
    action: A,
    filter: Arc<StackFilter>,
    reporter: Reporter,
    aborted: AtomicBool,
}

impl<A: StackAction> StackDriver<A> {
    fn shared(action: A, filter: &Arc<StackFilter>, reporter: &Reporter) -> Arc<dyn UnitHandler> {
        Arc::new(Self {
            action,
            filter: Arc::clone(filter),
            reporter: reporter.clone(),
            aborted: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl<A: StackAction> UnitHandler for StackDriver<A> {
    async fn handle(&self, unit: &ConfigurationUnit, tree: EvaluatedTree) {
        let mut view = match StackView::new(&tree, &self.filter) {
            Ok(view) => view,
            Err(e) => {
                self.reporter.emit(Event::UnitSkipped {
                    unit: unit.display_path.clone(),
                    reason: e.to_string(),
                });
                return;
            }
        };
        self.action.begin_unit(unit);
        while view.advance() {
            if self.aborted.load(Ordering::SeqCst) {
                return;
            }
            let Err(e) = self.action.on_stack(unit, &view).await else {
                continue;
            };
            if e.is_fatal() {
                self.aborted.store(true, Ordering::SeqCst);
                self.reporter.emit(Event::Fatal {
                    message: e.to_string(),
                });
            } else {
                self.reporter.emit(Event::StackError {
                    unit: unit.display_path.clone(),
                    stack: view.label().unwrap_or_default().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
}
