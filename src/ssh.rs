//! Remote `sqlite3` execution over OpenSSH.
//!
//! A session is an OpenSSH control master: the first command opens the
//! channel and later commands are multiplexed over it until [`SshSession::close`]
//! runs `ssh -O exit`. SQL text travels on stdin, so nothing but the file path
//! is ever placed on the remote command line.

use crate::error::{AdapterError, AdapterResult};
use crate::models::{Row, SqlValue, SshConfig};
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How long an idle control master stays up.
const CONTROL_PERSIST_SECS: u64 = 60;

/// Output format requested from the remote `sqlite3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// `-json`, available since sqlite3 3.33.
    Json,
    /// Default `|`-separated list mode with a header line.
    List,
}

/// A fully resolved local command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment, e.g. `SSHPASS`.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Spawn the command, write `input` to its stdin and collect its output.
    ///
    /// Writing and reading happen concurrently; a child that fills its stdout
    /// pipe before consuming all of stdin would otherwise never finish.
    pub async fn run_with_input(&self, input: &str) -> AdapterResult<std::process::Output> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AdapterError::remote_exec(
                    format!("Failed to start {}: {}", self.program, e),
                    None,
                    String::new(),
                )
            })?;

        let stdin = child.stdin.take();
        let write = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output
            .map_err(|e| AdapterError::remote_exec(format!("Remote command failed: {}", e), None, ""))?;

        // A child that exits early (sqlite3 -bail) closes stdin; its exit
        // status carries the real error.
        if let Err(e) = written {
            if output.status.success() {
                return Err(AdapterError::remote_exec(format!("Failed to write SQL: {}", e), None, ""));
            }
            debug!(program = %self.program, error = %e, "stdin closed by failing command");
        }
        Ok(output)
    }
}

/// Captured output of a remote command that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Quote a word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Remote command line running `sqlite3` against `path`.
pub fn sqlite_command(sqlite_bin: &str, path: &str, mode: OutputMode) -> String {
    let flags = match mode {
        OutputMode::Json => "-bail -json",
        OutputMode::List => "-bail -header -list",
    };
    format!("{} {} {}", shell_quote(sqlite_bin), flags, shell_quote(path))
}

/// One OpenSSH connection to a remote host.
#[derive(Debug)]
pub struct SshSession {
    config: SshConfig,
    connect_timeout: Duration,
    control_path: PathBuf,
    opened: bool,
}

impl SshSession {
    pub fn new(config: SshConfig, connect_timeout: Duration) -> Self {
        // Unix socket paths are short; keep the name compact.
        let id = uuid::Uuid::new_v4().simple().to_string();
        let control_path = std::env::temp_dir().join(format!("dba-ssh-{}", &id[..12]));
        Self {
            config,
            connect_timeout,
            control_path,
            opened: false,
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    fn ssh_options(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.config.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if self.config.password.is_none() {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        if let Some(key) = &self.config.private_key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        args.push("-o".to_string());
        args.push(format!("ControlPath={}", self.control_path.display()));
        args
    }

    /// Command line that runs `remote_command` on the host.
    pub fn command(&self, remote_command: &str) -> CommandSpec {
        let mut ssh_args = self.ssh_options();
        ssh_args.extend([
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPersist={}", CONTROL_PERSIST_SECS),
            self.config.destination(),
            "--".to_string(),
            remote_command.to_string(),
        ]);
        self.wrap(ssh_args)
    }

    /// Command line that stops the control master.
    pub fn exit_command(&self) -> CommandSpec {
        let mut ssh_args = self.ssh_options();
        ssh_args.extend([
            "-O".to_string(),
            "exit".to_string(),
            self.config.destination(),
        ]);
        self.wrap(ssh_args)
    }

    /// Route through `sshpass -e` when a password is configured.
    fn wrap(&self, ssh_args: Vec<String>) -> CommandSpec {
        match &self.config.password {
            Some(password) => {
                let mut args = vec!["-e".to_string(), "ssh".to_string()];
                args.extend(ssh_args);
                CommandSpec {
                    program: "sshpass".to_string(),
                    args,
                    env: vec![("SSHPASS".to_string(), password.clone())],
                }
            }
            None => CommandSpec {
                program: "ssh".to_string(),
                args: ssh_args,
                env: Vec::new(),
            },
        }
    }

    /// Run `remote_command`, feeding `input` on stdin.
    ///
    /// A non-zero exit becomes [`AdapterError::RemoteExec`] carrying stderr.
    pub async fn run(&mut self, remote_command: &str, input: &str) -> AdapterResult<CommandOutput> {
        let spec = self.command(remote_command);
        if !self.opened {
            info!(host = %self.config.host, user = %self.config.username, "Opening SSH session");
        }
        debug!(host = %self.config.host, command = %remote_command, "Running remote command");

        let output = spec.run_with_input(input).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code();
            // 255 is ssh's own failure; anything else came from the remote side.
            if code != Some(255) {
                self.opened = true;
            }
            let first_line = stderr.lines().next().unwrap_or("no error output").to_string();
            return Err(AdapterError::remote_exec(first_line, code, stderr));
        }

        self.opened = true;
        Ok(CommandOutput { stdout, stderr })
    }

    /// Stop the control master. Never fails.
    pub async fn close(&mut self) {
        if !self.opened {
            return;
        }
        self.opened = false;
        let spec = self.exit_command();
        let result = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => {
                info!(host = %self.config.host, "Closed SSH session");
            }
            Ok(out) => warn!(
                host = %self.config.host,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "Ignoring error while closing SSH session"
            ),
            Err(e) => warn!(host = %self.config.host, error = %e, "Ignoring error while closing SSH session"),
        }
    }
}

// =============================================================================
// Output parsing
// =============================================================================

/// Result sets printed by `sqlite3 -json`, one per statement that returned
/// rows. Cells keep their JSON types.
pub fn parse_json_output(stdout: &str) -> AdapterResult<Vec<Vec<Row>>> {
    let mut sets = Vec::new();
    let stream = serde_json::Deserializer::from_str(stdout).into_iter::<Vec<Map<String, JsonValue>>>();
    for set in stream {
        let set = set.map_err(|e| {
            AdapterError::remote_exec(format!("Unreadable sqlite3 JSON output: {}", e), None, "")
        })?;
        sets.push(
            set.into_iter()
                .map(|obj| obj.into_iter().map(|(k, v)| (k, json_cell(v))).collect())
                .collect(),
        );
    }
    Ok(sets)
}

fn json_cell(value: JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Bool(b),
        JsonValue::Number(n) => n
            .as_i64()
            .map(SqlValue::Int)
            .or_else(|| n.as_f64().map(SqlValue::Float))
            .unwrap_or_else(|| SqlValue::Text(n.to_string())),
        JsonValue::String(s) => SqlValue::Text(s),
        other => SqlValue::Json(other),
    }
}

/// Result sets printed in `-header -list` mode. A repeated header line
/// starts a new result set.
pub fn parse_list_output(stdout: &str) -> Vec<Vec<Row>> {
    let mut sets: Vec<Vec<Row>> = Vec::new();
    let mut header: Option<Vec<String>> = None;
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split('|').collect();
        match &header {
            Some(h) if h.len() == fields.len() && h.iter().zip(&fields).all(|(a, b)| a == b) => {
                sets.push(Vec::new());
            }
            Some(h) => {
                let row = h
                    .iter()
                    .zip(fields.iter())
                    .map(|(name, raw)| (name.clone(), coerce(raw)))
                    .collect();
                if let Some(set) = sets.last_mut() {
                    set.push(row);
                }
            }
            None => {
                header = Some(fields.iter().map(|f| f.to_string()).collect());
                sets.push(Vec::new());
            }
        }
    }
    sets
}

/// Numeric if it parses as one, `Null` when empty, text otherwise.
pub fn coerce(raw: &str) -> SqlValue {
    if raw.is_empty() {
        return SqlValue::Null;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return SqlValue::Int(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => SqlValue::Float(v),
        _ => SqlValue::Text(raw.to_string()),
    }
}
