//! Executors backed by host interpreters and compilers.
//!
//! Each job runs in its own temporary directory holding the source file and
//! any compiled binary. The directory is removed when the job finishes,
//! whatever the outcome.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{ExecutionResult, Executor};

/// How a tool turns a source file into output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `<tool> <args...> <source>`
    Interpret { args: &'static [&'static str] },
    /// `<tool> -o <binary> <source>`, then `<binary>`.
    Compile,
}

/// Executor that shells out to the first tool found on `PATH`.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    friendly_name: &'static str,
    suffixes: &'static [&'static str],
    candidates: &'static [&'static str],
    strategy: Strategy,
}

impl ToolExecutor {
    pub const fn new(
        friendly_name: &'static str,
        suffixes: &'static [&'static str],
        candidates: &'static [&'static str],
        strategy: Strategy,
    ) -> Self {
        Self {
            friendly_name,
            suffixes,
            candidates,
            strategy,
        }
    }

    /// Built-in executors in registration order.
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::new(
                "Python",
                &["py", "pyc", "pyo"],
                &["python", "python3", "py"],
                Strategy::Interpret { args: &["-O"] },
            ),
            Self::new(
                "Java",
                &["java"],
                &["java"],
                Strategy::Interpret { args: &[] },
            ),
            Self::new("C++", &["cpp", "cc", "cxx", "hpp"], &["g++"], Strategy::Compile),
            Self::new("C", &["c", "h"], &["gcc"], Strategy::Compile),
        ]
    }

    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Name of the source file written for `file_name`.
    ///
    /// Keeps the submitted suffix when this executor accepts it, otherwise
    /// uses the primary suffix.
    fn source_name(&self, file_name: &str) -> String {
        let primary = self.suffixes.first().copied().unwrap_or("txt");
        let suffix = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| self.suffixes.iter().any(|accepted| accepted == ext))
            .unwrap_or(primary);
        format!("main.{suffix}")
    }
}

#[async_trait]
impl Executor for ToolExecutor {
    fn friendly_name(&self) -> &str {
        self.friendly_name
    }

    fn suffixes(&self) -> &[&'static str] {
        self.suffixes
    }

    fn is_available(&self) -> bool {
        find_executable(self.candidates).is_some()
    }

    #[instrument(skip(self, content), fields(executor = self.friendly_name))]
    async fn execute(&self, file_name: &str, content: &str) -> Result<ExecutionResult> {
        let tool = find_executable(self.candidates).with_context(|| {
            format!(
                "None of {:?} found on PATH for {}",
                self.candidates, self.friendly_name
            )
        })?;

        let workdir = tempfile::Builder::new()
            .prefix("remote-exec-")
            .tempdir()
            .context("Failed to create job directory")?;
        let source = workdir.path().join(self.source_name(file_name));
        tokio::fs::write(&source, content)
            .await
            .with_context(|| format!("Failed to write {}", source.display()))?;
        debug!(source = %source.display(), code_len = content.len(), "Wrote job source");

        let result = match self.strategy {
            Strategy::Interpret { args } => {
                let mut cmd = Command::new(&tool);
                cmd.args(args).arg(&source).current_dir(workdir.path());
                run_captured(cmd).await?
            }
            Strategy::Compile => {
                let binary = workdir.path().join("program");
                let mut compile = Command::new(&tool);
                compile
                    .arg("-o")
                    .arg(&binary)
                    .arg(&source)
                    .current_dir(workdir.path());
                let compiled = run_captured(compile).await?;
                if compiled.exit_code == 0 {
                    let mut run = Command::new(&binary);
                    run.current_dir(workdir.path());
                    run_captured(run).await?
                } else {
                    debug!(exit_code = compiled.exit_code, "Compilation failed");
                    compiled
                }
            }
        };

        // `workdir` drops here and removes the source and binary.
        Ok(result)
    }
}

/// Spawn `cmd` with no stdin and collect its output and exit code.
async fn run_captured(mut cmd: Command) -> Result<ExecutionResult> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {program}"))?;

    let child_stdout = child.stdout.take().context("Failed to open stdout")?;
    let child_stderr = child.stderr.take().context("Failed to open stderr")?;

    let output = read_interleaved(child_stdout, child_stderr)
        .await
        .context("Failed to read process output")?;

    let status = child.wait().await.context("Failed to wait for process")?;

    let result = ExecutionResult {
        exit_code: status.code().unwrap_or(-1),
        output: String::from_utf8_lossy(&output).into_owned(),
    };

    debug!(program = %program, exit_code = result.exit_code, "Process finished");
    Ok(result)
}

/// Drain two streams into one buffer, appending each chunk as it arrives.
///
/// Keeps the relative order of writes to stdout and stderr as seen by the
/// reader. Returns once both streams hit EOF.
async fn read_interleaved<A, B>(mut first: A, mut second: B) -> std::io::Result<Vec<u8>>
where
    A: AsyncRead + Unpin,
    B: AsyncRead + Unpin,
{
    let mut output = Vec::new();
    let mut first_buf = [0u8; 4096];
    let mut second_buf = [0u8; 4096];
    let (mut first_open, mut second_open) = (true, true);

    while first_open || second_open {
        tokio::select! {
            read = first.read(&mut first_buf), if first_open => {
                let n = read?;
                if n == 0 {
                    first_open = false;
                } else {
                    output.extend_from_slice(&first_buf[..n]);
                }
            }
            read = second.read(&mut second_buf), if second_open => {
                let n = read?;
                if n == 0 {
                    second_open = false;
                } else {
                    output.extend_from_slice(&second_buf[..n]);
                }
            }
        }
    }
    Ok(output)
}

/// First candidate that resolves to an executable file on `PATH`.
///
/// Candidates containing a path separator are checked as given.
pub fn find_executable(candidates: &[&str]) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH");
    for candidate in candidates {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }

        let direct = Path::new(candidate);
        if direct.is_absolute() || candidate.contains(std::path::MAIN_SEPARATOR) {
            if is_executable_file(direct) {
                return Some(direct.to_path_buf());
            }
            continue;
        }

        let Some(path_var) = path_var.as_ref() else {
            continue;
        };
        for dir in std::env::split_paths(path_var) {
            let path = dir.join(candidate);
            if is_executable_file(&path) {
                return Some(path);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn find_executable_skips_missing_candidates() {
        assert!(find_executable(&["definitely-not-a-real-tool-xyz", "   "]).is_none());
        assert!(find_executable(&[]).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn find_executable_checks_absolute_paths() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tool");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let path = script.to_string_lossy().into_owned();
        assert!(find_executable(&[path.as_str()]).is_none());

        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        assert_eq!(find_executable(&[path.as_str()]), Some(script));
    }

    #[test]
    fn source_name_keeps_accepted_suffix() {
        let python = &ToolExecutor::builtin()[0];
        assert_eq!(python.source_name("script.pyo"), "main.pyo");
        assert_eq!(python.source_name("script.txt"), "main.py");
        assert_eq!(python.source_name("../../etc/passwd"), "main.py");
    }

    #[test]
    fn builtin_strategies() {
        let builtin = ToolExecutor::builtin();
        assert!(matches!(builtin[0].strategy(), Strategy::Interpret { .. }));
        assert_eq!(builtin[2].strategy(), Strategy::Compile);
        assert_eq!(builtin[3].friendly_name(), "C");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interpreter_output_and_status() {
        let shell = ToolExecutor::new(
            "Shell",
            &["sh"],
            &["sh"],
            Strategy::Interpret { args: &[] },
        );
        if !shell.is_available() {
            return;
        }

        let result = shell
            .execute("job.sh", "echo out; echo err >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("out\n"));
        assert!(result.output.contains("err\n"));
        assert_eq!(result.output.len(), "out\nerr\n".len());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_keeps_its_place_between_stdout_lines() {
        let shell = ToolExecutor::new(
            "Shell",
            &["sh"],
            &["sh"],
            Strategy::Interpret { args: &[] },
        );
        if !shell.is_available() {
            return;
        }

        let result = shell
            .execute(
                "job.sh",
                "echo a; sleep 0.1; echo b >&2; sleep 0.1; echo c",
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "a\nb\nc\n");
    }

    #[tokio::test]
    async fn interleaved_reader_appends_in_arrival_order() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"one\n")
            .wait(Duration::from_millis(50))
            .read(b"three\n")
            .build();
        let stderr = tokio_test::io::Builder::new()
            .wait(Duration::from_millis(25))
            .read(b"two\n")
            .build();

        let output = read_interleaved(stdout, stderr).await.unwrap();
        assert_eq!(output, b"one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn python_runs_submitted_file() {
        let python = ToolExecutor::builtin().remove(0);
        if !python.is_available() {
            return;
        }

        let result = python.execute("a.py", "print(1)").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "1\n");
    }

    #[tokio::test]
    async fn missing_tool_is_an_error() {
        let ghost = ToolExecutor::new(
            "Ghost",
            &["ghost"],
            &["definitely-not-a-real-tool-xyz"],
            Strategy::Compile,
        );
        assert!(!ghost.is_available());
        assert!(ghost.execute("a.ghost", "").await.is_err());
    }
}
