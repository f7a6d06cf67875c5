//! Process execution with output capture and timeout enforcement

use kiln_package::context::{ExecError, ExecOutput, ExecRequest, Executor};
use std::io::Read;
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Executor backed by real operating-system processes. Stdout and stderr
/// are drained on reader threads so a chatty tool can never fill the pipe
/// and deadlock against the timeout loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SystemExecutor {
    fn run(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError> {
        let start = Instant::now();

        let mut child = Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.cwd)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::NotFound {
                    ExecError::MissingTool(request.program.clone())
                } else {
                    ExecError::Io {
                        command: request.command_line(),
                        error,
                    }
                }
            })?;

        let stdout = child.stdout.take().map(drain_stdout);
        let stderr = child.stderr.take().map(drain_stderr);
        let deadline = start + request.timeout;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        join_reader(stdout);
                        join_reader(stderr);
                        return Err(ExecError::Timeout {
                            command: request.command_line(),
                            timeout: request.timeout,
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(error) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    join_reader(stdout);
                    join_reader(stderr);
                    return Err(ExecError::Io {
                        command: request.command_line(),
                        error,
                    });
                }
            }
        };

        Ok(ExecOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
            duration: start.elapsed(),
        })
    }
}

fn drain_stdout(pipe: ChildStdout) -> JoinHandle<String> {
    thread::spawn(move || read_lossy(pipe))
}

fn drain_stderr(pipe: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || read_lossy(pipe))
}

fn read_lossy(mut pipe: impl Read) -> String {
    let mut buffer = Vec::new();
    let _ = pipe.read_to_end(&mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(program: &str, args: &[&str]) -> ExecRequest {
        ExecRequest::new(program, std::env::temp_dir())
            .with_args(args.iter().copied())
            .with_timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_run_captures_stdout() {
        let output = SystemExecutor::new()
            .run(&request("sh", &["-c", "echo hello"]))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn test_run_captures_stderr_and_exit_code() {
        let output = SystemExecutor::new()
            .run(&request("sh", &["-c", "echo oops >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn test_run_passes_environment() {
        let mut env = HashMap::new();
        env.insert("KILN_TEST_VALUE".to_string(), "42".to_string());
        let output = SystemExecutor::new()
            .run(&request("sh", &["-c", "echo $KILN_TEST_VALUE"]).with_env(env))
            .unwrap();
        assert_eq!(output.stdout.trim(), "42");
    }

    #[test]
    fn test_run_missing_tool() {
        let err = SystemExecutor::new()
            .run(&request("kiln-definitely-not-a-tool", &[]))
            .unwrap_err();
        assert!(matches!(err, ExecError::MissingTool(tool) if tool == "kiln-definitely-not-a-tool"));
    }

    #[test]
    fn test_run_times_out() {
        let err = SystemExecutor::new()
            .run(&request("sleep", &["5"]).with_timeout(Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }
}
