//! Plan proposals and incremental re-planning.
//!
//! The planning side answers with a JSON list of task descriptors, usually
//! wrapped in `<json>...</json>` inside free text. The first proposal of a
//! phase is imported as-is; every later one is merged into the existing
//! task list so that work already finished successfully is never lost.
//!
//! Tasks are re-identified across rounds by exact instruction text. A model
//! that rephrases a completed step therefore produces a second, unstarted
//! task rather than reusing the finished one.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::dag::PlanError;
use crate::task::{Plan, Task};

static JSON_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<json>(.*?)</json>").expect("valid json block regex"));

static INVALID_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\\+)([@!])").expect("valid escape regex"));

/// One task as proposed by the planning collaborator.
///
/// Ids are free-form labels; planners send them as strings or as ordinals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProposal {
    #[serde(deserialize_with = "label")]
    pub id: String,
    #[serde(default, deserialize_with = "labels")]
    pub dependent_task_ids: Vec<String>,
    pub instruction: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Label {
    Text(String),
    Number(serde_json::Number),
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        match label {
            Label::Text(text) => text,
            Label::Number(n) => n.to_string(),
        }
    }
}

fn label<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Label::deserialize(de).map(String::from)
}

fn labels<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    let labels = Option::<Vec<Label>>::deserialize(de)?;
    Ok(labels
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect())
}

/// What [`Plan::apply_update`] did with a planning response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The response carried no usable proposal; the plan is untouched.
    Unchanged,
    /// The task list was replaced by the merge result.
    Merged { retained: usize, proposed: usize },
}

/// Body of the first `<json>` block, or the whole text when there is none.
pub fn extract_proposal(text: &str) -> &str {
    JSON_BLOCK_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str())
        .trim()
}

/// Repair escapes models emit that JSON does not allow (`\@`, `\!`).
fn repair_escapes(json: &str) -> String {
    INVALID_ESCAPE_RE
        .replace_all(json, |caps: &regex::Captures<'_>| {
            let slashes = &caps[1];
            if slashes.len() % 2 == 1 {
                format!("{slashes}\\{}", &caps[2])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Extract and parse a proposal list from a planning response.
pub fn parse_proposal(text: &str) -> Result<Vec<TaskProposal>, PlanError> {
    let body = extract_proposal(text);
    if body.is_empty() {
        return Err(PlanError::MalformedProposal("empty response".to_string()));
    }
    serde_json::from_str(&repair_escapes(body))
        .map_err(|e| PlanError::MalformedProposal(e.to_string()))
}

/// Build the initial task list of a plan from its first proposal.
pub fn import_tasks(plan_id: &str, proposals: &[TaskProposal]) -> Vec<Task> {
    proposals
        .iter()
        .enumerate()
        .map(|(sequence, proposal)| {
            let dependencies = proposals
                .iter()
                .enumerate()
                .filter(|(idx, other)| {
                    *idx != sequence && proposal.dependent_task_ids.contains(&other.id)
                })
                .map(|(idx, _)| idx)
                .collect();
            Task::new(
                plan_id,
                sequence,
                &proposal.action,
                &proposal.instruction,
                dependencies,
            )
        })
        .collect()
}

/// Reconcile a fresh proposal with the tasks of the previous round.
///
/// Output order: successful tasks the proposal no longer mentions (with
/// their dependencies cleared), then one task per proposal entry, reusing
/// the successful task with the same instruction when there is one.
/// Unfinished and failed tasks of the previous round are dropped.
pub fn merge_tasks(plan_id: &str, proposals: &[TaskProposal], old_tasks: Vec<Task>) -> Vec<Task> {
    let mut completed: Vec<(String, Task)> = Vec::new();
    for task in old_tasks
        .into_iter()
        .filter(|task| task.is_finished && task.is_success)
    {
        match completed.iter_mut().find(|(instr, _)| *instr == task.instruction) {
            Some(slot) => slot.1 = task,
            None => completed.push((task.instruction.clone(), task)),
        }
    }

    let mut merged: Vec<Task> = Vec::with_capacity(completed.len() + proposals.len());
    let mut matched: HashMap<String, Task> = HashMap::new();
    for (instruction, mut task) in completed {
        if proposals.iter().any(|p| p.instruction == instruction) {
            matched.insert(instruction, task);
        } else {
            task.sequence = merged.len();
            task.dependencies.clear();
            merged.push(task);
        }
    }

    let offset = merged.len();
    let sequence_of: HashMap<&str, usize> = proposals
        .iter()
        .enumerate()
        .map(|(idx, proposal)| (proposal.id.as_str(), idx + offset))
        .collect();

    for proposal in proposals {
        let sequence = merged.len();
        let dependencies: Vec<usize> = proposal
            .dependent_task_ids
            .iter()
            .filter_map(|dep| sequence_of.get(dep.as_str()).copied())
            .filter(|dep| *dep != sequence)
            .collect();

        let task = match matched.remove(&proposal.instruction) {
            Some(mut existing) => {
                existing.sequence = sequence;
                existing.dependencies = dependencies;
                existing
            }
            None => Task::new(
                plan_id,
                sequence,
                &proposal.action,
                &proposal.instruction,
                dependencies,
            ),
        };
        merged.push(task);
    }

    debug!(
        retained = offset,
        proposed = proposals.len(),
        total = merged.len(),
        "merged plan proposal"
    );
    merged
}

impl Plan {
    /// Replace the task list with the tasks of the first proposal.
    pub fn import_proposal(&mut self, text: &str) -> Result<usize, PlanError> {
        let proposals = parse_proposal(text)?;
        self.tasks = import_tasks(&self.id, &proposals);
        self.current_task_sequence = 0;
        Ok(self.tasks.len())
    }

    /// Merge a re-planning response into the plan.
    ///
    /// Empty or malformed responses leave the plan untouched.
    pub fn apply_update(&mut self, text: &str) -> MergeOutcome {
        if text.trim().is_empty() {
            return MergeOutcome::Unchanged;
        }
        let proposals = match parse_proposal(text) {
            Ok(proposals) => proposals,
            Err(e) => {
                warn!(plan = %self.id, error = %e, "ignoring unusable plan update");
                return MergeOutcome::Unchanged;
            }
        };

        let old = std::mem::take(&mut self.tasks);
        self.tasks = merge_tasks(&self.id, &proposals, old);
        let retained = self
            .tasks
            .iter()
            .filter(|task| task.is_finished && task.is_success)
            .count();
        MergeOutcome::Merged {
            retained,
            proposed: proposals.len(),
        }
    }
}
