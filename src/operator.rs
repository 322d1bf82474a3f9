//! Terminal operator: a human standing in for the planning side.
//!
//! Proposals and instruction text are typed into `$EDITOR`; verdicts and
//! short answers are read with line prompts.

use anyhow::{Context, Result};
use dialoguer::{Confirm, Editor, Input};

use crate::executor::{ExecuteResult, OperatorPrompt};
use crate::scheduler::PlanningCollaborator;
use crate::task::{Plan, Task};

const PROPOSAL_TEMPLATE: &str = r#"<json>
[
  {"id": "1", "dependent_task_ids": [], "instruction": "", "action": "Shell"}
]
</json>
"#;

/// Plan listing shown before asking the operator for a revision.
pub fn plan_overview(plan: &Plan) -> String {
    let mut out = format!("Goal: {}\n", plan.goal);
    for task in &plan.tasks {
        let deps = if task.dependencies.is_empty() {
            String::new()
        } else {
            let list: Vec<String> = task.dependencies.iter().map(|d| format!("#{d}")).collect();
            format!(" (after {})", list.join(", "))
        };
        out.push_str(&format!(
            "  #{} [{}] {}{}\n",
            task.sequence,
            task.status_label(),
            task.instruction,
            deps
        ));
    }
    out
}

/// Brief for a single task: what to do and what already worked.
pub fn task_brief(plan: &Plan, task: &Task) -> String {
    let mut out = format!(
        "Task #{} ({}): {}\n",
        task.sequence,
        if task.action.is_empty() { "-" } else { task.action.as_str() },
        task.instruction
    );
    if let Ok(done) = plan.successful_instructions()
        && !done.is_empty()
    {
        out.push_str("Already done:\n");
        for instruction in done {
            out.push_str(&format!("  - {instruction}\n"));
        }
    }
    out
}

/// Editor contents with `#` comment lines removed.
fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn commented(text: &str) -> String {
    text.lines().map(|line| format!("# {line}\n")).collect()
}

fn edit(initial: &str) -> Result<String> {
    let edited = Editor::new()
        .edit(initial)
        .context("failed to open editor")?;
    Ok(edited.map(|text| strip_comments(&text)).unwrap_or_default())
}

/// Operator prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl OperatorPrompt for TerminalPrompt {
    fn manual_result(&self, action: &str, instruction: &str) -> Result<String> {
        eprintln!("\n[{action}] {instruction}\n");
        let done = Confirm::new()
            .with_prompt("Record a result for this task now?")
            .default(true)
            .interact()
            .context("failed to read confirmation")?;
        if !done {
            return Ok(String::new());
        }
        edit(&commented(&format!(
            "Describe the outcome of:\n{instruction}\nLines starting with # are ignored."
        )))
    }
}

/// Planning collaborator driven by the operator.
#[derive(Debug, Default)]
pub struct OperatorPlanner;

impl PlanningCollaborator for OperatorPlanner {
    fn write_plan(&mut self, plan: &Plan) -> Result<String> {
        let header = commented(&format!(
            "Goal: {}\nWrite the task list as a JSON array inside <json> tags.",
            plan.goal
        ));
        edit(&format!("{header}{PROPOSAL_TEMPLATE}"))
    }

    fn next_task_details(&mut self, plan: &Plan, task: &Task) -> Result<String> {
        eprintln!("\n{}", task_brief(plan, task));
        let header = commented(
            "Write the instruction for this task. Wrap each shell command in\n<execute>...</execute>.",
        );
        let text = edit(&format!("{header}{}\n", task.instruction))?;
        if text.is_empty() {
            return Ok(task.instruction.clone());
        }
        Ok(text)
    }

    fn check_success(&mut self, task: &Task, result: &ExecuteResult) -> Result<bool> {
        eprintln!("\n{}", result.response);
        Confirm::new()
            .with_prompt(format!("Did task #{} succeed?", task.sequence))
            .default(!result.response.is_empty())
            .interact()
            .context("failed to read verdict")
    }

    fn update_plan(&mut self, plan: &Plan, _result: &ExecuteResult) -> Result<String> {
        eprintln!("\n{}", plan_overview(plan));
        let revise: String = Input::new()
            .with_prompt("Revise the plan? [y/N]")
            .allow_empty(true)
            .interact_text()
            .context("failed to read answer")?;
        if !revise.trim().eq_ignore_ascii_case("y") {
            return Ok(String::new());
        }
        edit(&format!(
            "{}{PROPOSAL_TEMPLATE}",
            commented(&plan_overview(plan))
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        let mut plan = Plan::new("root the box");
        plan.tasks = vec![
            Task::new(&plan.id, 0, "Shell", "scan ports", vec![]),
            Task::new(&plan.id, 1, "Browser", "check the web app", vec![0]),
        ];
        plan.update_task_status(0, true, true, "22/tcp open", 8192);
        plan
    }

    #[test]
    fn overview_lists_status_and_dependencies() {
        let overview = plan_overview(&plan());
        assert!(overview.starts_with("Goal: root the box\n"));
        assert!(overview.contains("#1 [pending] check the web app (after #0)"));
        assert!(!overview.contains("scan ports (after"));
    }

    #[test]
    fn brief_mentions_completed_work() {
        let plan = plan();
        let brief = task_brief(&plan, &plan.tasks[1]);
        assert!(brief.starts_with("Task #1 (Browser): check the web app"));
        assert!(brief.contains("Already done:\n  - scan ports\n"));
    }

    #[test]
    fn comment_lines_are_dropped_from_editor_text() {
        let text = format!("{}\n<execute>id</execute>\n", commented("header\nmore"));
        assert_eq!(strip_comments(&text), "<execute>id</execute>");
        assert_eq!(strip_comments(&commented("only comments")), "");
    }

    #[test]
    fn proposal_template_parses_once_filled() {
        let filled = PROPOSAL_TEMPLATE.replace(r#""instruction": """#, r#""instruction": "scan""#);
        let proposals = crate::merge::parse_proposal(&filled).unwrap();
        assert_eq!(proposals[0].instruction, "scan");
    }
}
