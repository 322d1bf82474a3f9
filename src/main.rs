use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use deeppentest::cli::{Cli, Command, PlanCommand, RecordArgs};
use deeppentest::config::{ExecutionMode, PASSWORD_ENV, ProjectConfig, TransportKind};
use deeppentest::executor::ExecuteTask;
use deeppentest::log::ExecutionLog;
use deeppentest::merge::MergeOutcome;
use deeppentest::operator::{OperatorPlanner, TerminalPrompt};
use deeppentest::orchestrator::CommandOrchestrator;
use deeppentest::scheduler::{Scheduler, SchedulerConfig};
use deeppentest::session::SessionSettings;
use deeppentest::session::manager::SessionManager;
use deeppentest::task::Plan;
use deeppentest::transport::Connector;
use deeppentest::transport::local::LocalConnector;
use deeppentest::transport::ssh::{SshConnector, SshTarget};
use deeppentest::{paths, report, shell_completion};

/// Text from a file, or from stdin for "-".
fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))
}

fn build_connector(config: &ProjectConfig) -> Result<Box<dyn Connector>> {
    let session = &config.session;
    match session.transport {
        TransportKind::Local => Ok(Box::new(LocalConnector::new(&session.local_shell))),
        TransportKind::Ssh => {
            let password = match session.resolved_password() {
                Some(password) => Some(password),
                None => {
                    info!(env = PASSWORD_ENV, "no ssh password configured; asking");
                    let password = dialoguer::Password::new()
                        .with_prompt(format!(
                            "Password for {}@{}",
                            session.username, session.host
                        ))
                        .allow_empty_password(true)
                        .interact()
                        .context("failed to read ssh password")?;
                    (!password.is_empty()).then_some(password)
                }
            };
            let target = SshTarget {
                host: session.host.clone(),
                port: session.port,
                username: session.username.clone(),
                password,
            };
            Ok(Box::new(SshConnector::new(
                target,
                session.connect_timeout(),
                session.poll_interval(),
            )))
        }
    }
}

/// Everything a session-backed command needs.
struct Runtime {
    manager: SessionManager,
    log: Arc<ExecutionLog>,
}

impl Runtime {
    fn open(config: &ProjectConfig, project_root: &Path) -> Result<Self> {
        let log_path = paths::run_log_path(project_root, chrono::Local::now());
        let log = Arc::new(ExecutionLog::new(&log_path)?);
        info!(path = %log_path.display(), "execution log");
        let manager = SessionManager::new(
            build_connector(config)?,
            SessionSettings::from(&config.session),
            Some(Arc::clone(&log)),
        );
        Ok(Self { manager, log })
    }
}

fn install_stop_handler(stop: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        if stop.swap(true, Ordering::SeqCst) {
            // Second Ctrl-C: give up waiting for the current task.
            std::process::exit(130);
        }
        eprintln!("\n[deeppentest] stopping after the current task (Ctrl-C again to abort)");
    })
    .context("failed to install Ctrl-C handler")
}

fn exec(config: &ProjectConfig, project_root: &Path, input: &str, action: &str, json: bool) -> Result<()> {
    let instruction = read_input(input)?;
    let runtime = Runtime::open(config, project_root)?;
    let orchestrator = CommandOrchestrator::new(&runtime.manager, Some(Arc::clone(&runtime.log)));

    let outcome = ExecuteTask::new(action, &instruction).run(
        ExecutionMode::Auto,
        &orchestrator,
        &TerminalPrompt,
    );
    runtime.manager.close();
    let result = outcome?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize result")?
        );
    } else {
        print!("{}", result.response);
    }
    Ok(())
}

fn run(
    config: &ProjectConfig,
    project_root: &Path,
    plan_path: PathBuf,
    goal: Option<String>,
) -> Result<()> {
    let mut plan = if plan_path.exists() {
        Plan::load(&plan_path)?
    } else {
        let Some(goal) = goal else {
            bail!(
                "plan file {} does not exist; pass --goal to start a new plan",
                plan_path.display()
            );
        };
        Plan::new(&goal)
    };

    let stop = Arc::new(AtomicBool::new(false));
    install_stop_handler(Arc::clone(&stop))?;

    let runtime = Runtime::open(config, project_root)?;
    let orchestrator = CommandOrchestrator::new(&runtime.manager, Some(Arc::clone(&runtime.log)));
    let operator = TerminalPrompt;
    let scheduler = Scheduler::new(
        SchedulerConfig {
            mode: config.defaults.mode,
            max_interactions: config.defaults.max_interactions,
            result_limit: config.defaults.result_limit,
            plan_path: Some(plan_path.clone()),
        },
        &orchestrator,
        &operator,
        Some(Arc::clone(&runtime.log)),
    )
    .with_stop_flag(stop);

    let outcome = scheduler.run(&mut plan, &mut OperatorPlanner);
    runtime.manager.close();
    let outcome = outcome?;

    println!("[deeppentest] run finished: {outcome:?}");
    println!("[deeppentest] plan: {}", plan_path.display());
    println!("[deeppentest] log:  {}", runtime.log.path().display());
    Ok(())
}

fn plan_command(command: PlanCommand, result_limit: usize) -> Result<()> {
    match command {
        PlanCommand::Show { plan } => {
            let plan = Plan::load(&plan)?;
            print!("{}", report::render_plan(&plan)?);
        }
        PlanCommand::Init {
            plan: path,
            goal,
            proposal,
        } => {
            if path.exists() {
                bail!("plan file {} already exists", path.display());
            }
            let mut plan = Plan::new(&goal);
            let count = plan.import_proposal(&read_input(&proposal)?)?;
            plan.save(&path)?;
            println!("[deeppentest] created {} with {count} tasks", path.display());
        }
        PlanCommand::Merge {
            plan: path,
            proposal,
        } => {
            let mut plan = Plan::load(&path)?;
            match plan.apply_update(&read_input(&proposal)?) {
                MergeOutcome::Unchanged => {
                    warn!(plan = %path.display(), "proposal carried no usable tasks");
                    println!("[deeppentest] plan unchanged");
                }
                MergeOutcome::Merged { retained, proposed } => {
                    plan.save(&path)?;
                    println!(
                        "[deeppentest] merged: {retained} completed kept, {proposed} proposed"
                    );
                }
            }
        }
        PlanCommand::Record(RecordArgs {
            plan: path,
            sequence,
            success,
            failed: _,
            result,
        }) => {
            let mut plan = Plan::load(&path)?;
            let text = match result {
                Some(file) => std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?,
                None => String::new(),
            };
            if plan
                .update_task_status(sequence, true, success, &text, result_limit)
                .is_none()
            {
                bail!("plan {} has no task #{sequence}", path.display());
            }
            plan.save(&path)?;
            println!(
                "[deeppentest] task #{sequence} recorded as {}",
                if success { "success" } else { "failed" }
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "deeppentest=warn",
        0 => "deeppentest=info,deeppentest::config=warn",
        1 => "deeppentest=debug",
        _ => "deeppentest=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;
    let project_root = paths::project_root(config_path.as_deref(), &cwd);

    match cli.command {
        Command::Exec {
            input,
            action,
            json,
        } => exec(&config, &project_root, &input, &action, json)?,
        Command::Plan { command } => plan_command(command, config.defaults.result_limit)?,
        Command::Run { plan, goal } => run(&config, &project_root, plan, goal)?,
        Command::Completions { shell } => shell_completion::print(shell)?,
        Command::Config { json } => {
            if json {
                println!(
                    "{}",
                    report::render_config_json(&config, config_path.as_deref())?
                );
            } else {
                print!(
                    "{}",
                    report::render_config_human(&config, config_path.as_deref())
                );
            }
        }
    }

    Ok(())
}
