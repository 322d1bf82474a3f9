//! Plan-driven task loop.
//!
//! The scheduler is responsible for:
//! - importing the first proposal when a plan has no tasks,
//! - picking the current task from the dependency order,
//! - obtaining concrete instructions and executing them,
//! - recording the outcome and merging the planner's revised proposal,
//! - stopping on the interaction budget, an empty frontier, or Ctrl-C.
//!
//! The planner itself is external; it is reached through
//! [`PlanningCollaborator`], text in and text out.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::ExecutionMode;
use crate::executor::{ExecuteResult, ExecuteTask, OperatorPrompt};
use crate::log::{ExecutionLog, LogEvent, record};
use crate::merge::MergeOutcome;
use crate::orchestrator::CommandOrchestrator;
use crate::task::{Plan, Task};

/// The planning side of the loop.
pub trait PlanningCollaborator {
    /// First proposal for a plan with no tasks.
    fn write_plan(&mut self, plan: &Plan) -> Result<String>;

    /// Concrete instruction text (with `<execute>` blocks) for `task`.
    fn next_task_details(&mut self, plan: &Plan, task: &Task) -> Result<String>;

    /// Judge whether `task` achieved its goal.
    fn check_success(&mut self, task: &Task, result: &ExecuteResult) -> Result<bool>;

    /// Revised proposal after a task finished. Empty text keeps the plan.
    fn update_plan(&mut self, plan: &Plan, result: &ExecuteResult) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: ExecutionMode,
    pub max_interactions: u32,
    pub result_limit: usize,
    /// Where to save the plan after every step, if anywhere.
    pub plan_path: Option<PathBuf>,
}

/// Why [`Scheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No unfinished task is left.
    Completed,
    /// The interaction budget ran out with work remaining.
    InteractionLimit,
    /// The stop flag was raised.
    Stopped,
}

pub struct Scheduler<'a> {
    config: SchedulerConfig,
    orchestrator: &'a CommandOrchestrator<'a>,
    operator: &'a dyn OperatorPrompt,
    log: Option<Arc<ExecutionLog>>,
    stop: Arc<AtomicBool>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        config: SchedulerConfig,
        orchestrator: &'a CommandOrchestrator<'a>,
        operator: &'a dyn OperatorPrompt,
        log: Option<Arc<ExecutionLog>>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            operator,
            log,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a stop flag (raised by the Ctrl-C handler).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    fn save(&self, plan: &Plan) -> Result<()> {
        match &self.config.plan_path {
            Some(path) => plan.save(path),
            None => Ok(()),
        }
    }

    /// Drive `plan` until it completes, the budget runs out, or a stop is
    /// requested. A cyclic plan aborts the run with an error.
    pub fn run(
        &self,
        plan: &mut Plan,
        planner: &mut dyn PlanningCollaborator,
    ) -> Result<RunOutcome> {
        let outcome = self.drive(plan, planner);
        match &outcome {
            Ok(result) => record(
                self.log.as_deref(),
                LogEvent::RunCompleted {
                    summary: format!("{result:?}"),
                },
            ),
            Err(e) => record(
                self.log.as_deref(),
                LogEvent::RunFailed {
                    reason: format!("{e:#}"),
                },
            ),
        }
        outcome
    }

    fn drive(&self, plan: &mut Plan, planner: &mut dyn PlanningCollaborator) -> Result<RunOutcome> {
        if plan.tasks.is_empty() {
            let proposal = planner.write_plan(plan).context("planner failed to write a plan")?;
            let count = plan
                .import_proposal(&proposal)
                .context("initial plan proposal is unusable")?;
            info!(plan = %plan.id, tasks = count, "plan written");
            record(
                self.log.as_deref(),
                LogEvent::PlanWritten {
                    plan_id: plan.id.clone(),
                    tasks: count,
                },
            );
            self.save(plan)?;
        }

        for round in 0..self.config.max_interactions {
            if self.stop.load(Ordering::SeqCst) {
                warn!(round, "stop requested; leaving the task loop");
                return Ok(RunOutcome::Stopped);
            }

            let Some(task) = plan.current_task()?.cloned() else {
                info!(plan = %plan.id, "no unfinished tasks left");
                return Ok(RunOutcome::Completed);
            };
            self.step(plan, planner, &task)?;
        }

        if plan.current_task()?.is_none() {
            return Ok(RunOutcome::Completed);
        }
        info!(
            budget = self.config.max_interactions,
            "interaction budget exhausted"
        );
        Ok(RunOutcome::InteractionLimit)
    }

    fn step(
        &self,
        plan: &mut Plan,
        planner: &mut dyn PlanningCollaborator,
        task: &Task,
    ) -> Result<()> {
        let sequence = task.sequence;
        plan.current_task_sequence = sequence;
        info!(sequence, instruction = %task.instruction, "starting task");
        record(
            self.log.as_deref(),
            LogEvent::TaskStarted {
                sequence,
                instruction: task.instruction.clone(),
            },
        );

        let instruction = planner
            .next_task_details(plan, task)
            .with_context(|| format!("planner failed to detail task #{sequence}"))?;
        let result = ExecuteTask::new(&task.action, &instruction).run(
            self.config.mode,
            self.orchestrator,
            self.operator,
        )?;

        if let Some(stored) = plan.task_mut(sequence) {
            stored.code = result.context.code.clone();
        }
        let success = planner.check_success(task, &result)?;
        plan.update_task_status(
            sequence,
            true,
            success,
            &result.response,
            self.config.result_limit,
        );
        info!(sequence, success, "task finished");
        record(
            self.log.as_deref(),
            LogEvent::TaskFinished {
                sequence,
                success,
                commands: result.context.code.len(),
            },
        );

        let revision = planner.update_plan(plan, &result)?;
        if let MergeOutcome::Merged { retained, proposed } = plan.apply_update(&revision) {
            record(
                self.log.as_deref(),
                LogEvent::PlanMerged {
                    plan_id: plan.id.clone(),
                    retained,
                    proposed,
                },
            );
        }
        self.save(plan)
    }
}
