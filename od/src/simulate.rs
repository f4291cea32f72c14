//! Synthetic workload driver
//!
//! Fires a batch of concurrent sleep-only tasks through a dispatcher so its
//! admission, backlog and quarantine behavior can be watched from the CLI.

use std::time::{Duration, Instant};

use eyre::{Result, eyre};
use serde::Serialize;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::instance::{Instance, InstanceSnapshot};

/// What to run
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    /// Number of concurrent tasks
    pub tasks: usize,

    /// How long each task occupies its instance
    pub work: Duration,

    /// Addresses to quarantine before the tasks start
    pub block: Vec<String>,

    /// Give up on tasks still queued after this long
    pub deadline: Duration,
}

/// How a single task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TaskOutcome {
    Dispatched { address: String },
    Rejected { reason: String },
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub index: usize,
    pub task_id: String,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub tasks: Vec<TaskReport>,
    pub instances: Vec<InstanceSnapshot>,
    pub backlog_len: usize,
}

impl SimulationReport {
    pub fn dispatched(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Dispatched { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Rejected { .. }))
    }

    pub fn pending(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Pending))
    }

    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.tasks.iter().filter(|t| pred(&t.outcome)).count()
    }
}

/// Run the plan against an already populated dispatcher
pub async fn run(dispatcher: &Dispatcher, plan: &SimulationPlan) -> Result<SimulationReport> {
    debug!(?plan, "simulate::run: called");

    for address in &plan.block {
        let instance = dispatcher
            .instance(address)
            .await
            .ok_or_else(|| eyre!("Cannot block unknown instance: {}", address))?;
        dispatcher.block_instance(&instance).await;
    }

    let handles: Vec<_> = (0..plan.tasks)
        .map(|index| {
            let dispatcher = dispatcher.clone();
            let work = plan.work;
            let deadline = plan.deadline;
            tokio::spawn(async move {
                let started = Instant::now();
                let allocation = dispatcher
                    .allocate(move |instance: Instance| async move {
                        debug!(index, address = %instance.address(), "simulated task running");
                        tokio::time::sleep(work).await;
                    })
                    .await;
                let task_id = allocation.task_id().to_string();

                let outcome = match tokio::time::timeout(deadline, allocation.outcome()).await {
                    Ok(Ok(dispatched)) => TaskOutcome::Dispatched {
                        address: dispatched.address,
                    },
                    Ok(Err(err)) => TaskOutcome::Rejected {
                        reason: err.to_string(),
                    },
                    Err(_) => TaskOutcome::Pending,
                };

                TaskReport {
                    index,
                    task_id,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    outcome,
                }
            })
        })
        .collect();

    let mut tasks = Vec::with_capacity(handles.len());
    for result in futures::future::join_all(handles).await {
        tasks.push(result.map_err(|e| eyre!("Simulated task failed: {}", e))?);
    }
    tasks.sort_by_key(|t| t.index);

    let state = dispatcher.snapshot().await;
    let report = SimulationReport {
        tasks,
        instances: state.instances,
        backlog_len: state.backlog_len,
    };
    info!(
        dispatched = report.dispatched(),
        rejected = report.rejected(),
        pending = report.pending(),
        "Simulation complete"
    );
    Ok(report)
}
