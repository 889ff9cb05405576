use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use uuid::Uuid;

use crate::data::DataSet;
use crate::error::EngineError;
use crate::executor::Executor;
use crate::report::{ExecutionReport, RunSummary};
use crate::repo::RuleRepository;
use crate::scheduler::RunScheduler;
use crate::task::{RunRecord, RunRequest, RunState};

/// Executes one queued run. Implementations must be stateless across
/// runs: every run owns its private context and trace.
#[async_trait]
pub trait RunHandler: Send + Sync + 'static {
    async fn handle(&self, request: RunRequest) -> Result<RunSummary, String>;
}

/// Default handler: seeds a context from the data set and drives the
/// compute-then-route executor over the shared read-only repository.
pub struct EngineRunHandler {
    repo: Arc<RuleRepository>,
    data: Arc<DataSet>,
}

impl EngineRunHandler {
    pub fn new(repo: Arc<RuleRepository>, data: Arc<DataSet>) -> Self {
        Self { repo, data }
    }
}

#[async_trait]
impl RunHandler for EngineRunHandler {
    async fn handle(&self, request: RunRequest) -> Result<RunSummary, String> {
        if !self.repo.contains(&request.start_rule) {
            return Err(format!(
                "starting rule not found: {}",
                request.start_rule
            ));
        }
        let seed = self
            .data
            .seed(&[request.start_rule.as_str()], request.row_index);
        let executor = Executor::new(&self.repo);
        let result = executor.run(
            &request.start_rule,
            seed.clone(),
            Some(&self.data),
            request.row_index,
        );
        Ok(RunSummary::from_result(
            request.start_rule.clone(),
            request.row_index,
            &seed,
            result,
        ))
    }
}

type ArcRegistry = Arc<RwLock<HashMap<Uuid, RunRecord>>>;

/// Handle used to submit runs and inspect their records while the
/// runtime is up.
#[derive(Clone)]
pub struct RuntimeHandle {
    scheduler: RunScheduler,
    registry: ArcRegistry,
    notify: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
}

impl RuntimeHandle {
    pub fn submit(&self, request: RunRequest) -> Result<Uuid, EngineError> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(EngineError::ShuttingDown);
        }

        let run_id = request.id;
        {
            let mut registry = self.registry.write();
            registry.insert(run_id, RunRecord::new(request.clone()));
        }

        self.scheduler.enqueue(request);
        self.notify.notify_one();
        Ok(run_id)
    }

    pub fn get(&self, run_id: &Uuid) -> Result<RunRecord, EngineError> {
        self.registry
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.registry.read().values().cloned().collect()
    }

    pub fn list_for_rule(&self, start_rule: &str) -> Vec<RunRecord> {
        self.registry
            .read()
            .values()
            .filter(|record| record.request.start_rule == start_rule)
            .cloned()
            .collect()
    }

    pub fn pending_runs(&self) -> usize {
        self.scheduler.pending()
    }
}

/// Worker-pool runtime for batch execution. Runs are embarrassingly
/// parallel: workers share only the scheduler and the record registry.
pub struct BatchRuntime {
    scheduler: RunScheduler,
    registry: ArcRegistry,
    notify: Arc<Notify>,
    completion: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

impl Default for BatchRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRuntime {
    pub fn new() -> Self {
        Self {
            scheduler: RunScheduler::new(),
            registry: Arc::new(RwLock::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            completion: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            workers: Vec::new(),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            scheduler: self.scheduler.clone(),
            registry: self.registry.clone(),
            notify: self.notify.clone(),
            shutting_down: self.shutting_down.clone(),
        }
    }

    pub fn start<H>(&mut self, handler: Arc<H>, worker_count: usize)
    where
        H: RunHandler,
    {
        let worker_count = worker_count.max(1);
        for worker_index in 0..worker_count {
            let scheduler = self.scheduler.clone();
            let registry = self.registry.clone();
            let notify = self.notify.clone();
            let completion = self.completion.clone();
            let shutting_down = self.shutting_down.clone();
            let in_flight = self.in_flight.clone();
            let handler = handler.clone();

            let handle = tokio::spawn(async move {
                worker_loop(
                    worker_index,
                    scheduler,
                    registry,
                    notify,
                    completion,
                    shutting_down,
                    in_flight,
                    handler,
                )
                .await;
            });

            self.workers.push(handle);
        }
    }

    /// Waits until every submitted run has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.completion.notified();
            if self.scheduler.pending() == 0 && self.in_flight.load(Ordering::Relaxed) == 0 {
                break;
            }
            notified.await;
        }
    }

    pub async fn shutdown(self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
        for handle in self.workers {
            if let Err(err) = handle.await {
                error!("worker crashed: {:?}", err);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop<H>(
    worker_index: usize,
    scheduler: RunScheduler,
    registry: ArcRegistry,
    notify: Arc<Notify>,
    completion: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    handler: Arc<H>,
) where
    H: RunHandler,
{
    loop {
        if shutting_down.load(Ordering::Relaxed) {
            break;
        }

        // The in-flight count rises before the queue pop so drain()
        // never observes an empty queue while a run is being claimed.
        let request = loop {
            in_flight.fetch_add(1, Ordering::Relaxed);
            if let Some(request) = scheduler.next_run() {
                break request;
            }
            in_flight.fetch_sub(1, Ordering::Relaxed);
            completion.notify_waiters();

            if shutting_down.load(Ordering::Relaxed) {
                return;
            }

            notify.notified().await;
        };

        let start = chrono::Utc::now();
        {
            let mut registry = registry.write();
            if let Some(record) = registry.get_mut(&request.id) {
                record.state = RunState::Running;
                record.started_at = Some(start);
                record.last_error = None;
            }
        }

        info!(worker = worker_index, run_id = %request.id,
              start_rule = %request.start_rule, row = request.row_index, "executing run");

        let outcome = handler.handle(request.clone()).await;

        {
            let mut registry = registry.write();
            if let Some(record) = registry.get_mut(&request.id) {
                record.finished_at = Some(chrono::Utc::now());
                match outcome {
                    Ok(summary) => {
                        record.state = RunState::Completed;
                        record.summary = Some(summary);
                    }
                    Err(message) => {
                        record.state = RunState::Failed;
                        record.last_error = Some(message.clone());
                        error!(run_id = %request.id, error = %message, "run failed");
                    }
                }
            }
        }

        in_flight.fetch_sub(1, Ordering::Relaxed);
        completion.notify_waiters();
    }
}

/// Convenience wrapper for the batch tools: submits one run per
/// (starting rule, data row), drains the pool and assembles the report.
pub async fn run_batch(
    repo: Arc<RuleRepository>,
    data: Arc<DataSet>,
    starting_rules: &[String],
    num_rows: usize,
    worker_count: usize,
) -> ExecutionReport {
    let mut runtime = BatchRuntime::new();
    let handler = Arc::new(EngineRunHandler::new(repo.clone(), data.clone()));
    runtime.start(handler, worker_count);
    let handle = runtime.handle();

    let mut submitted = 0usize;
    for start_rule in starting_rules {
        if !repo.contains(start_rule) {
            tracing::warn!(rule_id = %start_rule, "starting rule not in repository, skipping");
            continue;
        }
        let available_rows = data.rows_for(start_rule);
        let rows_to_run = num_rows.min(available_rows.max(1)).max(1);
        for row_index in 0..rows_to_run {
            if handle.submit(RunRequest::new(start_rule.clone(), row_index)).is_ok() {
                submitted += 1;
            }
        }
    }

    if submitted > 0 {
        runtime.drain().await;
    }
    let results: Vec<RunSummary> = handle
        .records()
        .into_iter()
        .filter_map(|record| record.summary)
        .collect();
    runtime.shutdown().await;

    ExecutionReport::new(starting_rules.len(), results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleflow_core::Rule;

    fn rule(raw: serde_json::Value) -> Rule {
        serde_json::from_value(raw).expect("rule")
    }

    fn fixture() -> (Arc<RuleRepository>, Arc<DataSet>) {
        let repo = RuleRepository::from_rules(vec![
            rule(serde_json::json!({
                "rule_id": "R001",
                "rule_name": "Grades Served",
                "calculation_cel":
                    "EPS.is_public_school == true ? 'PK-12' : 'Not Applicable'",
                "output_variable": "derived.grades_served",
            })),
        ])
        .expect("repo");
        let data: DataSet = serde_json::from_value(serde_json::json!({
            "R001": {"data": [
                {"EPS": {"is_public_school": true}},
                {"EPS": {"is_public_school": false}},
            ]},
        }))
        .expect("data");
        (Arc::new(repo), Arc::new(data))
    }

    #[tokio::test]
    async fn runs_every_row_and_reports() {
        let (repo, data) = fixture();
        let report = run_batch(repo, data, &["R001".to_string()], 2, 2).await;

        assert_eq!(report.total_runs, 2);
        assert_eq!(report.total_steps, 2);
        let values: Vec<Option<&ruleflow_core::Value>> = report
            .results
            .iter()
            .map(|summary| summary.context_variables.get("derived.grades_served"))
            .collect();
        assert_eq!(
            values,
            vec![
                Some(&ruleflow_core::Value::from("PK-12")),
                Some(&ruleflow_core::Value::from("Not Applicable")),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_starting_rules_are_skipped() {
        let (repo, data) = fixture();
        let report = run_batch(repo, data, &["R999".to_string()], 1, 1).await;
        assert_eq!(report.total_runs, 0);
    }
}
