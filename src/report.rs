//! Human and JSON renderings for `config` and `plan show`.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::{ExecutionMode, ProjectConfig, TransportKind};
use crate::dag::PlanError;
use crate::task::Plan;

fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Auto => "auto",
        ExecutionMode::Manual => "manual",
        ExecutionMode::Semi => "semi",
    }
}

fn transport_label(transport: TransportKind) -> &'static str {
    match transport {
        TransportKind::Ssh => "ssh",
        TransportKind::Local => "local",
    }
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults: no .deeppentest/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<22} {value}\n"));
}

fn push_list(output: &mut String, key: &str, values: &[String]) {
    if values.is_empty() {
        push_kv(output, key, "(none)");
    } else {
        push_kv(output, key, values.join(", "));
    }
}

pub fn render_config_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Defaults\n");
    push_kv(&mut output, "mode", mode_label(config.defaults.mode));
    push_kv(&mut output, "max_interactions", config.defaults.max_interactions);
    push_kv(&mut output, "result_limit", config.defaults.result_limit);
    output.push('\n');

    let session = &config.session;
    output.push_str("Session\n");
    push_kv(&mut output, "transport", transport_label(session.transport));
    match session.transport {
        TransportKind::Ssh => {
            push_kv(
                &mut output,
                "target",
                format!("{}@{}:{}", session.username, session.host, session.port),
            );
            let password = if session.resolved_password().is_some() {
                "(set)"
            } else {
                "(prompt)"
            };
            push_kv(&mut output, "password", password);
        }
        TransportKind::Local => push_kv(&mut output, "local_shell", &session.local_shell),
    }
    push_kv(
        &mut output,
        "command_timeout",
        format!("{}s", session.command_timeout_secs),
    );
    push_kv(
        &mut output,
        "connect_timeout",
        format!("{}s", session.connect_timeout_secs),
    );
    push_kv(
        &mut output,
        "poll_interval",
        format!("{}ms", session.poll_interval_millis),
    );
    push_kv(
        &mut output,
        "settle_delay",
        format!("{}ms", session.settle_delay_millis),
    );
    push_kv(&mut output, "max_ambiguous_polls", session.max_ambiguous_polls);
    push_list(&mut output, "forbidden_commands", &session.forbidden_commands);
    push_list(&mut output, "setup_commands", &session.setup_commands);
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

pub fn render_config_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let session = &config.session;
    let payload = serde_json::json!({
        "defaults": {
            "mode": mode_label(config.defaults.mode),
            "max_interactions": config.defaults.max_interactions,
            "result_limit": config.defaults.result_limit
        },
        "session": {
            "transport": transport_label(session.transport),
            "host": &session.host,
            "port": session.port,
            "username": &session.username,
            "password_set": session.resolved_password().is_some(),
            "local_shell": &session.local_shell,
            "command_timeout_secs": session.command_timeout_secs,
            "connect_timeout_secs": session.connect_timeout_secs,
            "poll_interval_millis": session.poll_interval_millis,
            "settle_delay_millis": session.settle_delay_millis,
            "max_ambiguous_polls": session.max_ambiguous_polls,
            "forbidden_commands": &session.forbidden_commands,
            "setup_commands": &session.setup_commands
        },
        "source_path": config_source_label(config_path)
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

/// Tasks in execution order, one per line, with the current task marked.
pub fn render_plan(plan: &Plan) -> Result<String, PlanError> {
    let current = plan.current_task()?.map(|task| task.sequence);
    let mut output = format!("Plan {}\nGoal: {}\n\n", plan.id, plan.goal);
    let ordered = plan.sorted_tasks()?;
    if ordered.is_empty() {
        output.push_str("  (no tasks)\n");
        return Ok(output);
    }
    for task in ordered {
        let marker = if Some(task.sequence) == current { ">" } else { " " };
        let deps = if task.dependencies.is_empty() {
            String::new()
        } else {
            let list: Vec<String> = task.dependencies.iter().map(|d| format!("#{d}")).collect();
            format!("  <- {}", list.join(" "))
        };
        output.push_str(&format!(
            "{marker} #{:<3} {:<8} {}{deps}\n",
            task.sequence,
            task.status_label(),
            task.instruction
        ));
    }
    Ok(output)
}
