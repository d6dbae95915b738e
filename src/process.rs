//! Running the simulator and the estimation engine as child processes.
use crate::error::CalibrationError;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often a [`LocalProcessGroup`] checks whether its children have exited
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Programs which only start the real executable, so must never be treated as stale
const LAUNCHERS: [&str; 10] = [
    "sh", "bash", "dash", "zsh", "env", "docker", "podman", "python", "python3", "wine",
];

/// What a finished command printed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Runs a command to completion
pub trait CommandRunner {
    /// Run `command` in `cwd`, failing with [`CalibrationError::ExternalProcess`] if it exits
    /// unsuccessfully
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput>;
}

/// Build a shell invocation of `command`
fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd).stdin(Stdio::null());
    cmd
}

/// Fail with [`CalibrationError::ExternalProcess`] unless `status` is a success
fn check_status(command: &str, status: ExitStatus, stderr: &str) -> Result<()> {
    if !status.success() {
        return Err(CalibrationError::ExternalProcess {
            command: command.to_string(),
            status: status.to_string(),
            stderr: stderr.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Runs commands with `sh -c`, waiting for each to finish
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner {
    /// Log everything the command prints
    pub debug: bool,
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput> {
        debug!("Running `{command}` in {}", cwd.display());
        let output = shell_command(command, cwd)
            .output()
            .with_context(|| format!("Failed to start `{command}`"))?;
        let output_text = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        check_status(command, output.status, &output_text.stderr)?;

        if self.debug {
            for line in output_text.stdout.lines().chain(output_text.stderr.lines()) {
                info!("{line}");
            }
        }

        Ok(output_text)
    }
}

/// A set of long-running processes started together and waited on together
pub trait ProcessGroup {
    /// Kill leftover processes with any of the given executable names, ignoring failures
    fn terminate_stale(&mut self, names: &[String]);

    /// Start `command` in `cwd` without waiting for it
    fn spawn(&mut self, command: &str, cwd: &Path) -> Result<()>;

    /// Wait until every started process has exited.
    ///
    /// As soon as any process fails, the remaining ones are killed and an
    /// [`CalibrationError::ExternalProcess`] is returned.
    fn wait_all(&mut self) -> Result<()>;
}

/// Read everything written to a child's standard error on a separate thread, so the child never
/// blocks on a full pipe
fn drain_stderr(mut pipe: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut bytes) {
            debug!("Stopped reading standard error: {err}");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

/// A started child process
#[derive(Debug)]
struct Running {
    command: String,
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

impl Running {
    /// Everything the process wrote to standard error. Only call once it has exited.
    fn take_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }

    /// Kill the process if it is still running and reap it
    fn stop(&mut self) {
        let killed = match self.child.try_wait() {
            Ok(None) => self.child.kill(),
            _ => Ok(()),
        };
        if let Err(err) = killed {
            warn!("Could not stop `{}`: {err}", self.command);
        }
        let _ = self.child.wait();
    }
}

/// Child processes of this program
#[derive(Debug, Default)]
pub struct LocalProcessGroup {
    debug: bool,
    children: Vec<Running>,
}

impl LocalProcessGroup {
    /// Create an empty group. In debug mode, children print to this program's standard output.
    pub fn new(debug: bool) -> LocalProcessGroup {
        LocalProcessGroup {
            debug,
            children: Vec::new(),
        }
    }

    /// Kill every remaining child
    fn stop_all(&mut self) {
        for mut running in self.children.drain(..) {
            running.stop();
        }
    }

    /// Remove the first child which has exited, returning its exit status
    fn take_finished(&mut self) -> Result<Option<(Running, ExitStatus)>> {
        for index in 0..self.children.len() {
            let running = &mut self.children[index];
            let status = running
                .child
                .try_wait()
                .with_context(|| format!("Failed to wait for `{}`", running.command))?;
            if let Some(status) = status {
                return Ok(Some((self.children.remove(index), status)));
            }
        }

        Ok(None)
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn terminate_stale(&mut self, names: &[String]) {
        let system = sysinfo::System::new_all();
        let own_pid = sysinfo::get_current_pid().ok();
        for name in names {
            for process in system.processes_by_exact_name(name) {
                if Some(process.pid()) == own_pid {
                    continue;
                }

                if process.kill() {
                    info!("Terminated stale process {name} ({})", process.pid());
                } else {
                    debug!("Could not terminate stale process {name} ({})", process.pid());
                }
            }
        }
    }

    fn spawn(&mut self, command: &str, cwd: &Path) -> Result<()> {
        info!("Starting `{command}` in {}", cwd.display());
        let stdout = if self.debug {
            Stdio::inherit()
        } else {
            Stdio::null()
        };
        let mut child = shell_command(command, cwd)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start `{command}`"))?;
        let stderr = child.stderr.take().map(drain_stderr);
        self.children.push(Running {
            command: command.to_string(),
            child,
            stderr,
        });

        Ok(())
    }

    fn wait_all(&mut self) -> Result<()> {
        while !self.children.is_empty() {
            let finished = match self.take_finished() {
                Ok(finished) => finished,
                Err(err) => {
                    self.stop_all();
                    return Err(err);
                }
            };
            let Some((mut running, status)) = finished else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };

            let stderr = running.take_stderr();
            if let Err(err) = check_status(&running.command, status, &stderr) {
                self.stop_all();
                return Err(err);
            }
            debug!("`{}` finished", running.command);
        }

        Ok(())
    }
}

impl Drop for LocalProcessGroup {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// The executable name of a command line, for finding stale copies of it.
///
/// Returns `None` for launchers such as `sh` or `docker`, whose name says nothing about what they
/// run.
pub fn executable_name(command: &str) -> Option<String> {
    let program = command.split_whitespace().next()?;
    let name = Path::new(program).file_name()?.to_string_lossy().into_owned();
    (!LAUNCHERS.contains(&name.as_str())).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use rstest::rstest;
    use std::time::Instant;
    use tempfile::tempdir;

    #[rstest]
    #[case("pest_hp pest.pst /h :4005", Some("pest_hp"))]
    #[case("/opt/pest/agent_hp pest.pst", Some("agent_hp"))]
    #[case("   ", None)]
    #[case("sh /opt/pest/start_master.sh", None)]
    #[case("docker run --rm pest pest_hp pest.pst", None)]
    #[case("/usr/bin/python3 agent.py", None)]
    fn test_executable_name(#[case] command: &str, #[case] expected: Option<&str>) {
        assert_eq!(executable_name(command).as_deref(), expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner() {
        let dir = tempdir().unwrap();
        let runner = ShellRunner::default();
        let output = runner.run("pwd && echo oops >&2", dir.path()).unwrap();
        assert!(output.stdout.trim_end().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
        assert_eq!(output.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_failure() {
        let dir = tempdir().unwrap();
        let err = ShellRunner::default()
            .run("echo broken >&2; exit 3", dir.path())
            .unwrap_err();
        match classify(&err) {
            Some(CalibrationError::ExternalProcess {
                command, stderr, ..
            }) => {
                assert_eq!(command, "echo broken >&2; exit 3");
                assert_eq!(stderr, "broken\n");
            }
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_process_group() {
        let dir = tempdir().unwrap();
        let mut group = LocalProcessGroup::new(false);
        group.spawn("echo master > master.txt", dir.path()).unwrap();
        group.spawn("echo worker > worker.txt", dir.path()).unwrap();
        group.wait_all().unwrap();
        assert!(dir.path().join("master.txt").is_file());
        assert!(dir.path().join("worker.txt").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_group_failure_stops_others() {
        let dir = tempdir().unwrap();
        let mut group = LocalProcessGroup::new(false);
        group.spawn("echo failed >&2; exit 1", dir.path()).unwrap();
        group.spawn("sleep 30", dir.path()).unwrap();
        let err = group.wait_all().unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(CalibrationError::ExternalProcess { stderr, .. }) if stderr == "failed\n"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_group_failed_worker_stops_master() {
        let dir = tempdir().unwrap();
        let mut group = LocalProcessGroup::new(false);
        group.spawn("sleep 30", dir.path()).unwrap();
        group.spawn("echo dead >&2; exit 1", dir.path()).unwrap();

        let start = Instant::now();
        let err = group.wait_all().unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(matches!(
            classify(&err),
            Some(CalibrationError::ExternalProcess { command, stderr, .. })
                if command == "echo dead >&2; exit 1" && stderr == "dead\n"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_group_worker_writes_lots_of_stderr() {
        let dir = tempdir().unwrap();
        let mut group = LocalProcessGroup::new(false);
        // The master needs the worker to finish, and gives up after about ten seconds
        group
            .spawn(
                "i=0; while [ ! -f done ] && [ $i -lt 100 ]; do sleep 0.1; i=$((i+1)); done; test -f done",
                dir.path(),
            )
            .unwrap();
        group
            .spawn("head -c 200000 /dev/zero >&2; touch done", dir.path())
            .unwrap();
        group.wait_all().unwrap();
        assert!(dir.path().join("done").is_file());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_terminate_stale_matches_exact_name() {
        let dir = tempdir().unwrap();
        // The kernel names a process after the file it was started from
        let program = dir.path().join("stalesleep");
        std::os::unix::fs::symlink("/bin/sleep", &program).unwrap();
        let mut child = Command::new(&program).arg("30").spawn().unwrap();

        let mut group = LocalProcessGroup::new(false);
        group.terminate_stale(&["stalesle".into(), "talesleep".into()]);
        assert!(child.try_wait().unwrap().is_none());

        group.terminate_stale(&["stalesleep".into()]);
        assert!(!child.wait().unwrap().success());
    }
}
