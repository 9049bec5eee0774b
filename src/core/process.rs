//! Concurrent evaluation: one task per configuration unit, joined before
//! returning.
//!
//! Each unit is evaluated independently. A failed evaluation is reported and
//! the handler is skipped; a successful one hands the tree to the handler
//! exactly once, inside the unit's task. Panics are contained to the unit.

use super::error::StxError;
use super::evaluator::Evaluator;
use super::events::{Event, Reporter};
use super::tree::EvaluatedTree;
use super::types::ConfigurationUnit;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// Per-unit work run after a successful evaluation.
#[async_trait]
pub trait UnitHandler: Send + Sync {
    async fn handle(&self, unit: &ConfigurationUnit, tree: EvaluatedTree);
}

/// Counts gathered once every task settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Units dispatched (after exclusion)
    pub units: usize,
    /// Units whose handler ran to completion
    pub evaluated: usize,
    /// Evaluation failures and panics
    pub failed: usize,
    pub cancelled: usize,
}

enum Outcome {
    Handled,
    Failed,
}

/// Aborts the wrapped task when dropped, so cancelling the outer task also
/// stops the work it is waiting on.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(&mut self) -> Result<T, JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fan-out/join driver over an [`Evaluator`].
#[derive(Clone)]
pub struct ConcurrentEvaluator {
    evaluator: Arc<dyn Evaluator>,
    reporter: Reporter,
}

impl ConcurrentEvaluator {
    pub fn new(evaluator: Arc<dyn Evaluator>, reporter: Reporter) -> Self {
        Self { evaluator, reporter }
    }

    /// Evaluate every unit not matching `exclude` and run `handler` on each
    /// success.
    pub async fn run(
        &self,
        units: Vec<ConfigurationUnit>,
        exclude: Option<&str>,
        handler: Arc<dyn UnitHandler>,
    ) -> Result<ProcessReport, StxError> {
        self.run_until(units, exclude, handler, std::future::pending())
            .await
    }

    /// Like [`run`](Self::run), aborting outstanding units once `shutdown`
    /// resolves.
    pub async fn run_until<F>(
        &self,
        units: Vec<ConfigurationUnit>,
        exclude: Option<&str>,
        handler: Arc<dyn UnitHandler>,
        shutdown: F,
    ) -> Result<ProcessReport, StxError>
    where
        F: Future<Output = ()>,
    {
        let units = exclude_units(units, exclude)?;
        let mut report = ProcessReport {
            units: units.len(),
            ..Default::default()
        };

        let mut pending = BTreeSet::new();
        let mut set = JoinSet::new();
        for unit in units {
            pending.insert(unit.display_path.clone());
            let evaluator = Arc::clone(&self.evaluator);
            let handler = Arc::clone(&handler);
            let reporter = self.reporter.clone();
            set.spawn(async move {
                let path = unit.display_path.clone();
                let panic_reporter = reporter.clone();
                let mut inner = AbortOnDrop(tokio::spawn(evaluate_unit(
                    unit, evaluator, handler, reporter,
                )));
                let outcome = match inner.join().await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        panic_reporter.emit(Event::UnitFailed {
                            unit: path.clone(),
                            message: format!("task failed: {}", e),
                            position: None,
                        });
                        Outcome::Failed
                    }
                };
                (path, outcome)
            });
        }

        tokio::pin!(shutdown);
        let mut shutting_down = false;
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((path, outcome))) => {
                        pending.remove(&path);
                        match outcome {
                            Outcome::Handled => report.evaluated += 1,
                            Outcome::Failed => report.failed += 1,
                        }
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => tracing::warn!("unit task failed: {}", e),
                },
                () = &mut shutdown, if !shutting_down => {
                    tracing::info!(outstanding = set.len(), "shutdown requested");
                    shutting_down = true;
                    set.abort_all();
                }
            }
        }

        for unit in pending {
            self.reporter.emit(Event::UnitCancelled { unit });
            report.cancelled += 1;
        }
        tracing::debug!(?report, "process finished");
        Ok(report)
    }
}

/// Drop units whose display path matches the exclude regex.
pub fn exclude_units(
    units: Vec<ConfigurationUnit>,
    exclude: Option<&str>,
) -> Result<Vec<ConfigurationUnit>, StxError> {
    let Some(pattern) = exclude.filter(|p| !p.is_empty()) else {
        return Ok(units);
    };
    let re = Regex::new(pattern).map_err(|source| StxError::FilterCompile {
        flag: "--exclude",
        source,
    })?;
    Ok(units
        .into_iter()
        .filter(|u| {
            let excluded = re.is_match(&u.display_path);
            if excluded {
                tracing::debug!(unit = %u, "excluded");
            }
            !excluded
        })
        .collect())
}

async fn evaluate_unit(
    unit: ConfigurationUnit,
    evaluator: Arc<dyn Evaluator>,
    handler: Arc<dyn UnitHandler>,
    reporter: Reporter,
) -> Outcome {
    tracing::debug!(unit = %unit, "evaluating unit");
    match evaluator.evaluate(&unit).await {
        Ok(tree) => {
            handler.handle(&unit, tree).await;
            Outcome::Handled
        }
        Err(e) => {
            reporter.emit(Event::UnitFailed {
                unit: unit.display_path.clone(),
                message: e.message,
                position: e.position,
            });
            Outcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EvaluationError;
    use crate::core::events::{RenderOptions, ReporterHandle};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails units whose path contains "bad"; hangs on "slow".
    struct MockEvaluator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Evaluator for MockEvaluator {
        async fn evaluate(
            &self,
            unit: &ConfigurationUnit,
        ) -> Result<EvaluatedTree, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if unit.display_path.contains("slow") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            tokio::task::yield_now().await;
            if unit.display_path.contains("bad") {
                return Err(EvaluationError::new(format!("{} is invalid", unit)));
            }
            Ok(EvaluatedTree::new(
                serde_json::json!({ "Unit": unit.display_path }),
            ))
        }
    }

    fn mock() -> Arc<MockEvaluator> {
        Arc::new(MockEvaluator {
            calls: AtomicUsize::new(0),
        })
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UnitHandler for Recorder {
        async fn handle(&self, unit: &ConfigurationUnit, tree: EvaluatedTree) {
            assert_eq!(tree.lookup(&["Unit"]).unwrap(), unit.display_path.as_str());
            self.seen.lock().unwrap().push(unit.display_path.clone());
        }
    }

    struct Panicker;

    #[async_trait]
    impl UnitHandler for Panicker {
        async fn handle(&self, unit: &ConfigurationUnit, _tree: EvaluatedTree) {
            if unit.display_path.contains("boom") {
                panic!("handler exploded");
            }
        }
    }

    fn units(paths: &[&str]) -> Vec<ConfigurationUnit> {
        paths
            .iter()
            .map(|p| ConfigurationUnit {
                dir: PathBuf::from(p),
                root: PathBuf::from("/"),
                display_path: p.to_string(),
                package: "cfn".into(),
            })
            .collect()
    }

    fn sink() -> ReporterHandle {
        ReporterHandle::spawn(RenderOptions::default(), std::io::sink())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handler_runs_once_per_valid_unit() {
        let handle = sink();
        let eval = mock();
        let recorder = Arc::new(Recorder::default());
        let all = units(&["./a", "./bad1", "./b", "./c", "./bad2", "./d"]);
        let report = ConcurrentEvaluator::new(eval.clone(), handle.reporter())
            .run(all, None, recorder.clone())
            .await
            .unwrap();

        assert_eq!(report.units, 6);
        assert_eq!(report.evaluated, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(report.cancelled, 0);

        let mut seen = recorder.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["./a", "./b", "./c", "./d"]);

        let summary = handle.finish().await;
        assert_eq!(summary.errors, 2);
    }

    #[tokio::test]
    async fn test_exclude_regex() {
        let handle = sink();
        let eval = mock();
        let recorder = Arc::new(Recorder::default());
        let report = ConcurrentEvaluator::new(eval.clone(), handle.reporter())
            .run(units(&["./vpc/dev", "./vpc/prod", "./eks/dev"]), Some("prod$"), recorder.clone())
            .await
            .unwrap();
        assert_eq!(report.units, 2);
        assert_eq!(eval.calls.load(Ordering::SeqCst), 2);
        assert!(!recorder.seen.lock().unwrap().contains(&"./vpc/prod".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_exclude_is_fatal_before_dispatch() {
        let handle = sink();
        let eval = mock();
        let err = ConcurrentEvaluator::new(eval.clone(), handle.reporter())
            .run(units(&["./a"]), Some("("), Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, StxError::FilterCompile { flag: "--exclude", .. }));
        assert!(err.is_fatal());
        assert_eq!(eval.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handler_panic_is_contained() {
        let handle = sink();
        let report = ConcurrentEvaluator::new(mock(), handle.reporter())
            .run(units(&["./ok", "./boom", "./fine"]), None, Arc::new(Panicker))
            .await
            .unwrap();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(handle.finish().await.errors, 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_outstanding_units() {
        let handle = sink();
        let recorder = Arc::new(Recorder::default());
        let report = ConcurrentEvaluator::new(mock(), handle.reporter())
            .run_until(
                units(&["./a", "./slow1", "./slow2"]),
                None,
                recorder.clone(),
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.cancelled, 2);
        assert_eq!(recorder.seen.lock().unwrap().as_slice(), ["./a"]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let handle = sink();
        let report = ConcurrentEvaluator::new(mock(), handle.reporter())
            .run(Vec::new(), None, Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(report, ProcessReport::default());
    }

    #[test]
    fn test_exclude_units_empty_pattern_keeps_all() {
        let kept = exclude_units(units(&["./a", "./b"]), Some("")).unwrap();
        assert_eq!(kept.len(), 2);
    }
}
