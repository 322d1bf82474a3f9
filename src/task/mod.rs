//! Plan and task records.
//!
//! A plan holds the task graph for one phase of the engagement. Tasks are
//! addressed by their dense `sequence` within the plan and list the
//! sequences they wait on in `dependencies`. Execution order is never
//! stored; every ordered view is recomputed through [`crate::dag`].

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dag::{self, PlanError};

/// Default bound on the transcript text kept per task (characters).
pub const DEFAULT_RESULT_LIMIT: usize = 8192;

const TRUNCATION_MARKER: &str = "\n[... output truncated ...]";

/// One schedulable unit of work inside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub plan_id: String,
    pub sequence: usize,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub instruction: String,
    /// Literal commands actually run for this task, in order.
    #[serde(default)]
    pub code: Vec<String>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub is_success: bool,
    #[serde(default)]
    pub is_finished: bool,
    #[serde(default)]
    pub dependencies: Vec<usize>,
}

impl Task {
    /// A fresh, unstarted task with a newly generated id.
    pub fn new(
        plan_id: &str,
        sequence: usize,
        action: &str,
        instruction: &str,
        dependencies: Vec<usize>,
    ) -> Self {
        Self {
            id: new_id(),
            plan_id: plan_id.to_string(),
            sequence,
            action: action.to_string(),
            instruction: instruction.to_string(),
            code: Vec::new(),
            result: String::new(),
            is_success: false,
            is_finished: false,
            dependencies,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match (self.is_finished, self.is_success) {
            (false, _) => "pending",
            (true, true) => "success",
            (true, false) => "failed",
        }
    }
}

/// 32 hex characters, the id width the planning side stores.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Bound `text` to `limit` characters, marking the cut.
pub fn truncate_result(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// A phase's task graph plus the conversation handles used to route
/// planning and execution requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub current_task_sequence: usize,
    #[serde(default)]
    pub plan_chat_id: String,
    #[serde(default)]
    pub react_chat_id: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(goal: &str) -> Self {
        Self {
            id: new_id(),
            goal: goal.to_string(),
            ..Self::default()
        }
    }

    /// Read a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse plan file: {}", path.display()))
    }

    /// Write the plan as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create plan directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize plan")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write plan file: {}", path.display()))
    }

    pub fn sorted_tasks(&self) -> Result<Vec<&Task>, PlanError> {
        dag::topological_order(&self.tasks)
    }

    /// First unfinished task in topological order, if any.
    pub fn current_task(&self) -> Result<Option<&Task>, PlanError> {
        Ok(self
            .sorted_tasks()?
            .into_iter()
            .find(|task| !task.is_finished))
    }

    pub fn finished_successful(&self) -> Result<Vec<&Task>, PlanError> {
        Ok(self
            .sorted_tasks()?
            .into_iter()
            .filter(|task| task.is_finished && task.is_success)
            .collect())
    }

    pub fn finished_failed(&self) -> Result<Vec<&Task>, PlanError> {
        Ok(self
            .sorted_tasks()?
            .into_iter()
            .filter(|task| task.is_finished && !task.is_success)
            .collect())
    }

    pub fn successful_instructions(&self) -> Result<Vec<String>, PlanError> {
        Ok(self
            .finished_successful()?
            .into_iter()
            .map(|task| task.instruction.clone())
            .collect())
    }

    pub fn failed_instructions(&self) -> Result<Vec<String>, PlanError> {
        Ok(self
            .finished_failed()?
            .into_iter()
            .map(|task| task.instruction.clone())
            .collect())
    }

    pub fn task(&self, sequence: usize) -> Option<&Task> {
        self.tasks.iter().find(|task| task.sequence == sequence)
    }

    pub fn task_mut(&mut self, sequence: usize) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.sequence == sequence)
    }

    /// Mark a task finished (or not) and record its transcript.
    ///
    /// An empty `result` leaves the previous transcript in place.
    pub fn update_task_status(
        &mut self,
        sequence: usize,
        is_finished: bool,
        is_success: bool,
        result: &str,
        result_limit: usize,
    ) -> Option<&Task> {
        let task = self.task_mut(sequence)?;
        task.is_finished = is_finished;
        task.is_success = is_success;
        if !result.is_empty() {
            task.result = truncate_result(result, result_limit);
        }
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_task(sequence: usize, finished: bool, success: bool, deps: Vec<usize>) -> Task {
        let mut task = Task::new("plan", sequence, "Shell", &format!("step {sequence}"), deps);
        task.is_finished = finished;
        task.is_success = success;
        task
    }

    fn plan_with(tasks: Vec<Task>) -> Plan {
        let mut plan = Plan::new("own the box");
        plan.tasks = tasks;
        plan
    }

    #[test]
    fn new_ids_are_32_hex_chars() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_id());
    }

    #[test]
    fn current_task_follows_dependency_order() {
        let plan = plan_with(vec![
            mk_task(0, false, false, vec![1]),
            mk_task(1, false, false, vec![]),
        ]);
        assert_eq!(plan.current_task().unwrap().unwrap().sequence, 1);
    }

    #[test]
    fn current_task_skips_finished_tasks() {
        let plan = plan_with(vec![
            mk_task(0, true, true, vec![]),
            mk_task(1, true, false, vec![0]),
            mk_task(2, false, false, vec![0]),
        ]);
        assert_eq!(plan.current_task().unwrap().unwrap().sequence, 2);
    }

    #[test]
    fn current_task_is_none_when_all_finished_or_empty() {
        let done = plan_with(vec![
            mk_task(0, true, true, vec![]),
            mk_task(1, true, false, vec![0]),
        ]);
        assert!(done.current_task().unwrap().is_none());
        assert!(Plan::new("empty").current_task().unwrap().is_none());
    }

    #[test]
    fn current_task_propagates_cycles() {
        let plan = plan_with(vec![
            mk_task(0, false, false, vec![1]),
            mk_task(1, false, false, vec![0]),
        ]);
        assert!(matches!(
            plan.current_task(),
            Err(PlanError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn finished_views_split_by_outcome_in_topological_order() {
        let plan = plan_with(vec![
            mk_task(0, true, true, vec![2]),
            mk_task(1, true, false, vec![]),
            mk_task(2, true, true, vec![]),
            mk_task(3, false, false, vec![]),
        ]);
        let ok: Vec<_> = plan
            .finished_successful()
            .unwrap()
            .iter()
            .map(|t| t.sequence)
            .collect();
        assert_eq!(ok, vec![2, 0]);
        assert_eq!(plan.failed_instructions().unwrap(), vec!["step 1"]);
        assert_eq!(plan.successful_instructions().unwrap(), vec!["step 2", "step 0"]);
    }

    #[test]
    fn update_task_status_records_truncated_result() {
        let mut plan = plan_with(vec![mk_task(0, false, false, vec![])]);
        let long = "x".repeat(20);
        let task = plan.update_task_status(0, true, true, &long, 8).unwrap();
        assert!(task.is_finished && task.is_success);
        assert!(task.result.starts_with("xxxxxxxx\n"));
        assert!(task.result.ends_with("truncated ...]"));

        plan.update_task_status(0, true, false, "", 8).unwrap();
        assert!(plan.task(0).unwrap().result.starts_with("xxxxxxxx"));
        assert!(plan.update_task_status(9, true, true, "", 8).is_none());
    }

    #[test]
    fn truncate_result_respects_char_boundaries() {
        assert_eq!(truncate_result("héllo", 10), "héllo");
        assert!(truncate_result("héllo", 2).starts_with("hé\n"));
    }

    #[test]
    fn plan_round_trips_through_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("plans").join("phase-1.json");
        let plan = plan_with(vec![mk_task(0, true, true, vec![])]);
        plan.save(&path).unwrap();

        let loaded = Plan::load(&path).unwrap();
        assert_eq!(loaded, plan);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"is_finished\": true"));
        assert!(raw.contains("\"dependencies\": []"));
    }

    #[test]
    fn load_accepts_minimal_task_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"id": "p1", "tasks": [{"id": "a", "sequence": 0, "instruction": "scan"}]}"#,
        )
        .unwrap();
        let plan = Plan::load(&path).unwrap();
        assert_eq!(plan.tasks[0].instruction, "scan");
        assert!(!plan.tasks[0].is_finished);
        assert!(plan.tasks[0].code.is_empty());
    }
}
