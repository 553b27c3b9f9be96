//! plugins::command
//!
//! Shell command and package script checks.
//!
//! # API
//!
//! ```text
//! command("cargo fmt --check").runs()
//! command("./serve").outputs(/listening on/, { timeoutMs: 5000 })
//! command.runs("make lint", { expectExitCode: 0 })
//! script("build").runs({ cwd: "web" })
//! script.outputs("dev", /ready/)
//! ```
//!
//! # Options
//!
//! | Key              | `runs` | `outputs` | Meaning                                 |
//! |------------------|--------|-----------|-----------------------------------------|
//! | `cwd`            | yes    | yes       | Working directory, relative to the file |
//! | `env`            | yes    | yes       | Extra environment variables             |
//! | `timeoutMs`      | yes    | yes       | Kill the process after this long        |
//! | `expectExitCode` | yes    | no        | Expected exit code (default 0)          |
//!
//! Commands run through `sh -c` (`cmd /C` on Windows). Spawned processes
//! are killed when their check finishes or times out.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tracing::debug;

use crate::core::types::{PackageManager, TestId};
use crate::engine::entry::{max_args, options_arg, regex_arg, str_arg};
use crate::engine::{
    plugin_fn, Arg, Chained, CheckOutcome, DeclarationError, FnPlugin, PluginApi, PluginEntry,
    RegexArg, VerificationContext,
};
use crate::plugins::{meta, outcome};

/// Timeout applied to `outputs` when none is given.
pub const DEFAULT_OUTPUT_TIMEOUT: Duration = Duration::from_millis(15_000);

pub fn plugin() -> FnPlugin {
    plugin_fn(|options| {
        let package_manager = options.package_manager;
        Ok(PluginApi::new()
            .entrypoint("command", |ctx| Ok(runnable_root(ctx, Kind::Command)))
            .entrypoint("script", move |ctx| {
                Ok(runnable_root(ctx, Kind::Script(package_manager)))
            }))
    })
    .named("Command runner")
    .described("Execute shell commands and assert on exit codes or streamed output.")
    .doc(
        "verify.command(\"<cmd>\").runs(options?)",
        "Runs the command and expects the configured exit code (default 0). Options support cwd, env, timeoutMs, and expectExitCode.",
    )
    .doc(
        "verify.command(\"<cmd>\").outputs(/pattern/, options?)",
        "Streams stdout and resolves when the provided pattern matches before the optional timeout (default 15s). Options support cwd, env, and timeoutMs.",
    )
    .doc(
        "verify.command.runs(\"<cmd>\", options?)",
        "Shortcut that schedules a .runs() check without creating an intermediate chain.",
    )
    .doc(
        "verify.command.outputs(\"<cmd>\", /pattern/, options?)",
        "Shortcut that schedules an output check in one call.",
    )
    .doc(
        "verify.script(\"<script>\").runs(options?)",
        "Runs the npm/yarn/pnpm/bun script and expects the configured exit code (default 0). Uses the configured package manager (default npm). Options support cwd, env, timeoutMs, and expectExitCode.",
    )
    .doc(
        "verify.script(\"<script>\").outputs(/pattern/, options?)",
        "Streams stdout from the npm/yarn/pnpm/bun script and resolves when the provided pattern matches before the optional timeout (default 15s). Options support cwd, env, and timeoutMs.",
    )
    .doc(
        "verify.script.runs(\"<script>\", options?)",
        "Shortcut that schedules a .runs() check for a script without creating an intermediate chain.",
    )
    .doc(
        "verify.script.outputs(\"<script>\", /pattern/, options?)",
        "Shortcut that schedules an output check for a script in one call.",
    )
}

/// What an entrypoint runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Command,
    Script(PackageManager),
}

impl Kind {
    fn entrypoint(&self) -> &'static str {
        match self {
            Kind::Command => "command",
            Kind::Script(_) => "script",
        }
    }
}

/// A command line plus the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Runnable {
    /// `Command` or `Script`.
    entity: &'static str,
    display: String,
    command_line: String,
}

impl Runnable {
    fn new(kind: Kind, name: &str) -> Self {
        match kind {
            Kind::Command => Self {
                entity: "Command",
                display: name.to_string(),
                command_line: name.to_string(),
            },
            Kind::Script(package_manager) => Self {
                entity: "Script",
                display: name.to_string(),
                command_line: package_manager.script_command(name),
            },
        }
    }
}

/// Parsed `runs` / `outputs` options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RunOptions {
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    expect_exit_code: i32,
}

impl RunOptions {
    fn parse(
        member: &str,
        options: Option<&BTreeMap<String, Arg>>,
        allow_exit_code: bool,
    ) -> Result<Self, DeclarationError> {
        let mut parsed = RunOptions::default();
        let Some(options) = options else {
            return Ok(parsed);
        };

        for (key, value) in options {
            match (key.as_str(), value) {
                ("cwd", Arg::Str(dir)) => parsed.cwd = Some(PathBuf::from(dir)),
                ("env", Arg::Options(vars)) => {
                    for (name, value) in vars {
                        let value = match value {
                            Arg::Str(s) => s.clone(),
                            Arg::Int(n) => n.to_string(),
                            Arg::Bool(b) => b.to_string(),
                            other => {
                                return Err(DeclarationError::invalid_args(
                                    member,
                                    format!("env.{} must be a string, got {}", name, other.kind()),
                                ))
                            }
                        };
                        parsed.env.insert(name.clone(), value);
                    }
                }
                ("timeoutMs", Arg::Int(ms)) if *ms >= 0 => {
                    parsed.timeout = Some(Duration::from_millis(*ms as u64));
                }
                ("expectExitCode", Arg::Int(code)) if allow_exit_code => {
                    parsed.expect_exit_code = i32::try_from(*code).map_err(|_| {
                        DeclarationError::invalid_args(member, "expectExitCode is out of range")
                    })?;
                }
                (key @ ("cwd" | "env" | "timeoutMs" | "expectExitCode"), value)
                    if key != "expectExitCode" || allow_exit_code =>
                {
                    return Err(DeclarationError::invalid_args(
                        member,
                        format!("invalid value for {}: {}", key, value),
                    ))
                }
                (key, _) => {
                    return Err(DeclarationError::invalid_args(
                        member,
                        format!("unknown option \"{}\"", key),
                    ))
                }
            }
        }
        Ok(parsed)
    }
}

fn runnable_root(ctx: VerificationContext, kind: Kind) -> PluginEntry {
    let name = kind.entrypoint();
    PluginEntry::new(ctx)
        .callable(move |ctx, args| {
            max_args(name, args, 1)?;
            let target = str_arg(name, args, 0)?;
            let child = ctx.extend(meta(name, target))?;
            Ok(Chained::Entry(runnable_entry(child, Runnable::new(kind, target))))
        })
        .check("runs", move |ctx, args| {
            max_args("runs", args, 2)?;
            let target = str_arg("runs", args, 0)?;
            let child = ctx.extend(meta(name, target))?;
            register_runs(&child, Runnable::new(kind, target), &args[1..])
        })
        .check("outputs", move |ctx, args| {
            max_args("outputs", args, 3)?;
            let target = str_arg("outputs", args, 0)?;
            let child = ctx.extend(meta(name, target))?;
            register_outputs(&child, Runnable::new(kind, target), &args[1..])
        })
}

fn runnable_entry(ctx: VerificationContext, runnable: Runnable) -> PluginEntry {
    let outputs = runnable.clone();
    PluginEntry::new(ctx)
        .check("runs", move |ctx, args| register_runs(ctx, runnable.clone(), args))
        .check("outputs", move |ctx, args| register_outputs(ctx, outputs.clone(), args))
}

fn register_runs(
    ctx: &VerificationContext,
    runnable: Runnable,
    args: &[Arg],
) -> Result<TestId, DeclarationError> {
    max_args("runs", args, 1)?;
    let options = RunOptions::parse("runs", options_arg("runs", args, 0)?, true)?;
    let base = ctx.cwd();
    ctx.register(
        format!("{} \"{}\" should run successfully", runnable.entity, runnable.display),
        outcome(move || {
            let (runnable, options, base) = (runnable.clone(), options.clone(), base.clone());
            async move { check_runs(&runnable, &options, base).await }
        }),
    )
}

fn register_outputs(
    ctx: &VerificationContext,
    runnable: Runnable,
    args: &[Arg],
) -> Result<TestId, DeclarationError> {
    max_args("outputs", args, 2)?;
    let pattern = regex_arg("outputs", args, 0)?.clone();
    let options = RunOptions::parse("outputs", options_arg("outputs", args, 1)?, false)?;
    let base = ctx.cwd();
    ctx.register(
        format!(
            "{} \"{}\" output should match {}",
            runnable.entity, runnable.display, pattern
        ),
        outcome(move || {
            let (runnable, pattern, options, base) =
                (runnable.clone(), pattern.clone(), options.clone(), base.clone());
            async move { check_outputs(&runnable, &pattern, &options, base).await }
        }),
    )
}

fn shell(command_line: &str, options: &RunOptions, base: PathBuf) -> Command {
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C");
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c");
        c
    };
    let dir = match &options.cwd {
        Some(cwd) => base.join(cwd),
        None => base,
    };
    command
        .arg(command_line)
        .current_dir(dir)
        .envs(&options.env)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    command
}

async fn check_runs(runnable: &Runnable, options: &RunOptions, base: PathBuf) -> CheckOutcome {
    let output = match run_to_completion(runnable, options, base).await {
        Ok(output) => output,
        Err(err) => return CheckOutcome::fail_with(format!("Failed to run \"{}\"", runnable.display), err),
    };

    let expected = options.expect_exit_code;
    if output.status.code() == Some(expected) {
        return CheckOutcome::pass(if expected == 0 {
            format!("{} \"{}\" exited successfully.", runnable.entity, runnable.display)
        } else {
            format!(
                "{} \"{}\" exited with expected code {}.",
                runnable.entity, runnable.display, expected
            )
        });
    }

    let code = output
        .status
        .code()
        .map_or_else(|| "a signal".to_string(), |c| c.to_string());
    CheckOutcome::fail(format!(
        "{} \"{}\" exited with {}. Expected {}.\nSTDOUT:\n{}\nSTDERR:\n{}",
        runnable.entity,
        runnable.display,
        code,
        expected,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    ))
}

async fn run_to_completion(
    runnable: &Runnable,
    options: &RunOptions,
    base: PathBuf,
) -> anyhow::Result<std::process::Output> {
    debug!(command = %runnable.command_line, "running command");
    let child = shell(&runnable.command_line, options, base)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn \"{}\"", runnable.command_line))?;

    let waiting = child.wait_with_output();
    let output = match options.timeout {
        // Dropping the timed-out future drops the child, which kills it.
        Some(limit) => tokio::time::timeout(limit, waiting).await.map_err(|_| {
            anyhow!(
                "Command \"{}\" timed out after {}ms.",
                runnable.command_line,
                limit.as_millis()
            )
        })??,
        None => waiting.await?,
    };
    Ok(output)
}

async fn check_outputs(
    runnable: &Runnable,
    pattern: &RegexArg,
    options: &RunOptions,
    base: PathBuf,
) -> CheckOutcome {
    let failure = format!(
        "Failed to validate output from \"{}\" against {}",
        runnable.display, pattern
    );

    debug!(command = %runnable.command_line, "streaming command output");
    let spawned = shell(&runnable.command_line, options, base)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => return CheckOutcome::fail_with(failure, err),
    };
    let Some(stdout) = child.stdout.take() else {
        return CheckOutcome::fail(format!("{} stdout stream is not available.", runnable.entity));
    };

    let mut lines = BufReader::new(stdout).lines();
    let mut collected = Vec::new();
    let limit = options.timeout.unwrap_or(DEFAULT_OUTPUT_TIMEOUT);
    let matched = tokio::time::timeout(limit, scan_lines(&mut lines, pattern, &mut collected))
        .await
        .unwrap_or(false);

    if let Err(err) = child.start_kill() {
        debug!(error = %err, "command already exited");
    }

    if matched {
        CheckOutcome::pass(format!("Output contained a line matching {}.", pattern))
    } else {
        CheckOutcome::fail(format!(
            "Expected output to contain a matching line: {}\n\nOutput:\n{}",
            pattern,
            collected.join("\n")
        ))
    }
}

/// Read until a line matches. End of stream and read errors count as no match.
async fn scan_lines(
    lines: &mut Lines<BufReader<ChildStdout>>,
    pattern: &RegexArg,
    collected: &mut Vec<String>,
) -> bool {
    while let Ok(Some(line)) = lines.next_line().await {
        let found = pattern.is_match(&line);
        collected.push(line);
        if found {
            return true;
        }
    }
    false
}
