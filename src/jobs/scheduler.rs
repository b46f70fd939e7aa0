// Sweep Scheduler - registers the periodic sweeps with tokio-cron-scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::{DocumentSweep, InactivitySweep, StageSweep, SweepResult, TaskSweep};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Stage and inactivity sweeps run on an hourly cadence.
    pub stage_sweep_interval_hours: u32,
    pub inactivity_sweep_interval_hours: u32,
    /// Document and task sweeps look at concrete due dates and run more
    /// often.
    pub document_sweep_interval_hours: u32,
    pub task_sweep_interval_minutes: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            stage_sweep_interval_hours: 6,
            inactivity_sweep_interval_hours: 12,
            document_sweep_interval_hours: 4,
            task_sweep_interval_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepLog {
    pub id: Uuid,
    pub sweep_name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub result: SweepResult,
}

const SWEEP_LOG_CAPACITY: usize = 100;

pub struct SweepScheduler {
    scheduler: TokioScheduler,
    config: JobConfig,
    stage: Arc<StageSweep>,
    document: Arc<DocumentSweep>,
    task: Arc<TaskSweep>,
    inactivity: Arc<InactivitySweep>,
    logs: Arc<RwLock<Vec<SweepLog>>>,
}

impl SweepScheduler {
    pub async fn new(
        config: JobConfig,
        stage: Arc<StageSweep>,
        document: Arc<DocumentSweep>,
        task: Arc<TaskSweep>,
        inactivity: Arc<InactivitySweep>,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;
        Ok(Self {
            scheduler,
            config,
            stage,
            document,
            task,
            inactivity,
            logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("starting sweep scheduler");

        self.schedule(
            "stage sweep",
            format!("0 0 */{} * * *", self.config.stage_sweep_interval_hours),
            {
                let sweep = self.stage.clone();
                move || {
                    let sweep = sweep.clone();
                    async move { sweep.run().await }
                }
            },
        )
        .await?;

        self.schedule(
            "document sweep",
            format!("0 0 */{} * * *", self.config.document_sweep_interval_hours),
            {
                let sweep = self.document.clone();
                move || {
                    let sweep = sweep.clone();
                    async move { sweep.run().await }
                }
            },
        )
        .await?;

        self.schedule(
            "task sweep",
            format!("0 */{} * * * *", self.config.task_sweep_interval_minutes),
            {
                let sweep = self.task.clone();
                move || {
                    let sweep = sweep.clone();
                    async move { sweep.run().await }
                }
            },
        )
        .await?;

        self.schedule(
            "inactivity sweep",
            format!("0 0 */{} * * *", self.config.inactivity_sweep_interval_hours),
            {
                let sweep = self.inactivity.clone();
                move || {
                    let sweep = sweep.clone();
                    async move { sweep.run().await }
                }
            },
        )
        .await?;

        self.scheduler.start().await?;
        info!("sweep scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("shutting down sweep scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule<F, Fut>(&self, name: &'static str, cron_expr: String, run: F) -> JobResult<()>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = SweepResult> + Send + 'static,
    {
        let logs = self.logs.clone();
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let run = run.clone();
            let logs = logs.clone();
            Box::pin(async move {
                let started_at = Utc::now();
                let result = run().await;
                let duration_ms = (Utc::now() - started_at).num_milliseconds();

                if !result.errors.is_empty() {
                    error!(sweep = name, errors = result.errors.len(), "sweep had failures");
                }

                let mut logs = logs.write().await;
                logs.push(SweepLog {
                    id: Uuid::new_v4(),
                    sweep_name: name.to_string(),
                    started_at,
                    duration_ms,
                    result,
                });
                if logs.len() > SWEEP_LOG_CAPACITY {
                    logs.remove(0);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!(sweep = name, cron = %cron_expr, "sweep scheduled");
        Ok(())
    }

    pub async fn recent_logs(&self) -> Vec<SweepLog> {
        self.logs.read().await.clone()
    }

    /// Manual trigger, used by ops tooling.
    pub async fn run_now(&self, name: &str) -> JobResult<SweepResult> {
        match name {
            "stage" => Ok(self.stage.run().await),
            "document" => Ok(self.document.run().await),
            "task" => Ok(self.task.run().await),
            "inactivity" => Ok(self.inactivity.run().await),
            other => Err(JobError::Config(format!("unknown sweep '{other}'"))),
        }
    }
}
