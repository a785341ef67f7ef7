use crate::fingerprint::{Fingerprinter, Response, ResponseFingerprinter};
use log::{debug, warn};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often a running child is polled for exit.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything observed about one execution of one candidate.
///
/// Built fresh for every call and dropped once the engine has classified it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub input: Vec<u8>,
    pub crashed: bool,
    pub error_message: Option<String>,
    /// Raw payload returned by the target, if any.
    pub response: Option<Vec<u8>>,
    /// Free-form diagnostic text (stderr, a backtrace, ...). Its first lines
    /// identify a crash for deduplication.
    pub diagnostics: Option<String>,
    pub elapsed: Duration,
    /// Behavior fingerprint. Empty means "no signal", not "same as before".
    pub fingerprint: String,
}

impl ExecutionOutcome {
    /// A clean run with no fingerprint yet.
    pub fn ok(input: &[u8]) -> Self {
        Self {
            input: input.to_vec(),
            crashed: false,
            error_message: None,
            response: None,
            diagnostics: None,
            elapsed: Duration::ZERO,
            fingerprint: String::new(),
        }
    }

    /// A run the adapter itself flags as crashing.
    pub fn crash(input: &[u8], message: impl Into<String>) -> Self {
        Self {
            crashed: true,
            error_message: Some(message.into()),
            ..Self::ok(input)
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    pub fn with_response(mut self, response: Vec<u8>) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = Some(diagnostics.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// A failure raised by the target call itself rather than reported in an outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("MemoryError: {message}")]
    OutOfMemory {
        message: String,
        trace: Option<String>,
    },
    #[error("RecursionError: {message}")]
    RecursionLimit {
        message: String,
        trace: Option<String>,
    },
    #[error("{kind}: {message}")]
    Failed {
        kind: String,
        message: String,
        trace: Option<String>,
    },
    /// The target could not be reached at all: refused, reset, failed to spawn.
    #[error("{kind}: {message}")]
    Transport { kind: String, message: String },
}

impl TargetError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        TargetError::Failed {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn transport(kind: impl Into<String>, message: impl Into<String>) -> Self {
        TargetError::Transport {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TargetError::OutOfMemory { message, .. }
            | TargetError::RecursionLimit { message, .. }
            | TargetError::Failed { message, .. }
            | TargetError::Transport { message, .. } => message,
        }
    }

    pub fn trace(&self) -> Option<&str> {
        match self {
            TargetError::OutOfMemory { trace, .. }
            | TargetError::RecursionLimit { trace, .. }
            | TargetError::Failed { trace, .. } => trace.as_deref(),
            TargetError::Transport { .. } => None,
        }
    }
}

/// The target adapter contract: turn one candidate into one outcome.
///
/// Implementations must not block indefinitely; enforcing a timeout and
/// reporting it in the outcome is the adapter's job. They should fill in a
/// fingerprint whenever they can derive one from observable output.
pub trait Executor {
    fn execute(&mut self, input: &[u8]) -> Result<ExecutionOutcome, TargetError>;
}

/// Runs a closure in the fuzzer's own process.
pub struct InProcessExecutor<F>
where
    F: FnMut(&[u8]) -> Result<ExecutionOutcome, TargetError>,
{
    harness_fn: F,
}

impl<F> InProcessExecutor<F>
where
    F: FnMut(&[u8]) -> Result<ExecutionOutcome, TargetError>,
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<F> Executor for InProcessExecutor<F>
where
    F: FnMut(&[u8]) -> Result<ExecutionOutcome, TargetError>,
{
    fn execute(&mut self, input: &[u8]) -> Result<ExecutionOutcome, TargetError> {
        (self.harness_fn)(input)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDelivery {
    StdIn,
    /// Writes the input to a temp file; `{}` in the template becomes its path.
    File(String),
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// Spawns one process per candidate.
///
/// Non-zero exit, death by signal and timeout are reported as crashes. stdout
/// is the response, stderr the diagnostics, and the fingerprint is computed
/// over the exit status and both streams.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
    fingerprinter: Box<dyn Fingerprinter>,
}

enum WaitResult {
    Exited(ExitStatus),
    TimedOut,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self {
            config,
            fingerprinter: Box::new(ResponseFingerprinter::new()),
        }
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Box<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<WaitResult, TargetError> {
        let start_time = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(WaitResult::Exited(status)),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        debug!("Target timed out, killing...");
                        if let Err(e) = child.kill() {
                            warn!("Failed to kill child process: {e}");
                        }
                        let _ = child.wait();
                        return Ok(WaitResult::TimedOut);
                    }
                    thread::sleep(CHILD_POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(TargetError::transport(
                        "WaitError",
                        format!("Error waiting for child: {e}"),
                    ));
                }
            }
        }
    }

    fn describe_failure(status: &ExitStatus) -> (i64, String) {
        if let Some(code) = status.code() {
            return (i64::from(code), format!("Exited with code {code}"));
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return (-i64::from(signal), format!("Terminated by signal {signal}"));
            }
        }
        (-1, "Exited abnormally".to_string())
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

impl Executor for CommandExecutor {
    fn execute(&mut self, input: &[u8]) -> Result<ExecutionOutcome, TargetError> {
        let Some((program, args)) = self.config.command.split_first() else {
            return Err(TargetError::transport("SpawnError", "No command configured"));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        // Own process group, so a terminal Ctrl-C reaches the fuzzer and not the target.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        // Held until the child has exited; dropping it deletes the file.
        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;

        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let mut named_temp_file = tempfile::NamedTempFile::new().map_err(|e| {
                    TargetError::transport(
                        "TempFileError",
                        format!("Failed to create temp file: {e}"),
                    )
                })?;
                named_temp_file
                    .write_all(input)
                    .and_then(|_| named_temp_file.flush())
                    .map_err(|e| {
                        TargetError::transport(
                            "TempFileError",
                            format!(
                                "Failed to write to temp file {:?}: {}",
                                named_temp_file.path(),
                                e
                            ),
                        )
                    })?;
                let path_str = named_temp_file.path().to_string_lossy().into_owned();
                let final_arg = arg_template.replace("{}", &path_str);
                for part in final_arg.split_whitespace() {
                    cmd.arg(part);
                }
                cmd.stdin(Stdio::null());
                temp_file_handle = Some(named_temp_file);
            }
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            TargetError::transport(
                "SpawnError",
                format!("Failed to spawn command '{:?}': {}", self.config.command, e),
            )
        })?;

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());
        let stdin_writer = child.stdin.take().map(|mut stdin| {
            let data = input.to_vec();
            // The child may exit without reading; a broken pipe is expected then.
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(&data) {
                    debug!("Writing candidate to child stdin failed: {e}");
                }
            })
        });

        let waited = Self::wait_with_timeout(&mut child, self.config.timeout)?;
        let elapsed = start.elapsed();

        let status = match waited {
            WaitResult::Exited(status) => status,
            // A grandchild may still hold the pipes open; the reader threads are
            // left detached rather than joined.
            WaitResult::TimedOut => {
                return Ok(ExecutionOutcome::crash(
                    input,
                    format!(
                        "Target timed out after {} ms (possible hang)",
                        self.config.timeout.as_millis()
                    ),
                )
                .with_elapsed(elapsed));
            }
        };

        if let Some(writer) = stdin_writer {
            let _ = writer.join();
        }
        let stdout = collect(stdout_reader);
        let stderr = collect(stderr_reader);
        drop(temp_file_handle);

        let mut observed = stdout.clone();
        observed.extend_from_slice(&stderr);

        let outcome = if status.success() {
            let fingerprint = self.fingerprinter.fingerprint(&Response {
                status: 0,
                body: &observed,
            });
            ExecutionOutcome::ok(input).with_fingerprint(fingerprint)
        } else {
            let (code, description) = Self::describe_failure(&status);
            let fingerprint = self.fingerprinter.fingerprint(&Response {
                status: code,
                body: &observed,
            });
            ExecutionOutcome::crash(input, description).with_fingerprint(fingerprint)
        };

        let outcome = outcome.with_response(stdout).with_elapsed(elapsed);
        Ok(if stderr.is_empty() {
            outcome
        } else {
            outcome.with_diagnostics(String::from_utf8_lossy(&stderr).into_owned())
        })
    }
}


#[cfg(all(test, unix))]
mod command_executor_tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn stdin_config(script: &str, timeout: Duration) -> CommandExecutorConfig {
        CommandExecutorConfig {
            command: sh(script),
            input_delivery: InputDelivery::StdIn,
            timeout,
            working_dir: None,
        }
    }

    #[test]
    fn cmd_exec_successful_run_echoes_stdin() {
        let mut executor = CommandExecutor::new(stdin_config("cat", Duration::from_secs(5)));
        let outcome = executor.execute(b"hello").unwrap();
        assert!(!outcome.crashed, "unexpected crash: {outcome:?}");
        assert_eq!(outcome.response.as_deref(), Some(&b"hello"[..]));
        assert_eq!(outcome.fingerprint, "0_0_000000");
        assert!(outcome.diagnostics.is_none());
    }

    #[test]
    fn cmd_exec_nonzero_exit_is_a_crash_with_diagnostics() {
        let mut executor = CommandExecutor::new(stdin_config(
            "cat >/dev/null; echo 'fatal error' >&2; exit 3",
            Duration::from_secs(5),
        ));
        let outcome = executor.execute(b"{}").unwrap();
        assert!(outcome.crashed);
        assert_eq!(outcome.error_message.as_deref(), Some("Exited with code 3"));
        assert_eq!(outcome.diagnostics.as_deref(), Some("fatal error\n"));
        assert_eq!(outcome.fingerprint, "3_0_100000");
    }

    #[test]
    fn cmd_exec_signal_is_reported() {
        let mut executor =
            CommandExecutor::new(stdin_config("kill -SEGV $$", Duration::from_secs(5)));
        let outcome = executor.execute(b"").unwrap();
        assert!(outcome.crashed);
        let message = outcome.error_message.unwrap();
        assert!(
            message.contains("signal 11") || message.contains("code 139"),
            "unexpected crash description: {message}"
        );
    }

    #[test]
    fn cmd_exec_target_runs_in_its_own_process_group() {
        // Signals the whole group of the target; the test process must not be in it.
        let mut executor =
            CommandExecutor::new(stdin_config("kill -INT 0; sleep 1", Duration::from_secs(5)));
        let outcome = executor.execute(b"").unwrap();
        assert!(outcome.crashed);
        let message = outcome.error_message.unwrap();
        assert!(
            message.contains("signal 2") || message.contains("code 130"),
            "unexpected crash description: {message}"
        );
    }

    #[test]
    fn cmd_exec_timeout_is_a_crash() {
        let mut executor =
            CommandExecutor::new(stdin_config("sleep 5", Duration::from_millis(100)));
        let outcome = executor.execute(b"").unwrap();
        assert!(outcome.crashed);
        assert!(outcome.error_message.unwrap().contains("timed out"));
        assert!(outcome.elapsed < Duration::from_secs(5));
        assert!(outcome.fingerprint.is_empty());
    }

    #[test]
    fn cmd_exec_custom_fingerprinter() {
        let mut executor = CommandExecutor::new(stdin_config("cat", Duration::from_secs(5)))
            .with_fingerprinter(Box::new(crate::fingerprint::LengthBucketFingerprinter::new(4)));
        let outcome = executor.execute(b"0123456789").unwrap();
        assert_eq!(outcome.fingerprint, "2");
    }

    #[test]
    fn cmd_exec_input_via_file() {
        let config = CommandExecutorConfig {
            command: sh("grep -q CRASH \"$0\" && exit 1; exit 0"),
            input_delivery: InputDelivery::File("{}".to_string()),
            timeout: Duration::from_secs(5),
            working_dir: None,
        };
        let mut executor = CommandExecutor::new(config);

        let ok = executor.execute(b"OK_FILE").unwrap();
        assert!(!ok.crashed, "Expected clean run for OK_FILE, got {ok:?}");

        let crash = executor.execute(b"CRASHFILE").unwrap();
        assert!(crash.crashed);
        assert_eq!(crash.error_message.as_deref(), Some("Exited with code 1"));
    }

    #[test]
    fn cmd_exec_invalid_command_is_a_transport_error() {
        let config = CommandExecutorConfig {
            command: vec!["./this_command_does_not_exist_ever_12345.sh".to_string()],
            input_delivery: InputDelivery::StdIn,
            timeout: Duration::from_secs(1),
            working_dir: None,
        };
        let mut executor = CommandExecutor::new(config);
        match executor.execute(b"") {
            Err(TargetError::Transport { kind, message }) => {
                assert_eq!(kind, "SpawnError");
                assert!(message.contains("Failed to spawn command"));
            }
            other => panic!("Expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn cmd_exec_empty_command_is_a_transport_error() {
        let mut executor = CommandExecutor::new(stdin_config("", Duration::from_secs(1)));
        executor.config.command.clear();
        assert!(matches!(
            executor.execute(b""),
            Err(TargetError::Transport { .. })
        ));
    }
}
