//! Orphan process reaping.
//!
//! When the extender runs as PID 1 of a build container, processes left over from earlier
//! steps are re-parented to it. Before the first build they are sent `SIGTERM` and waited for.

use anyhow::Context;
use futures::future::join_all;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the first reaping pass of the process
static REAPED: AtomicBool = AtomicBool::new(false);

/// Outcome of one reaping pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Processes that accepted `SIGTERM`
    pub signaled: Vec<i32>,
    /// Processes whose wait completed, including non-children
    pub reaped: Vec<i32>,
    /// Processes that could not be signaled or waited on
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Reaper {
    proc_root: PathBuf,
    self_pid: i32,
    reaped: &'static AtomicBool,
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new()
    }
}

impl Reaper {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            self_pid: std::process::id() as i32,
            reaped: &REAPED,
        }
    }

    /// Read the process table from another directory laid out like `/proc`
    pub fn with_proc_root<P: AsRef<Path>>(mut self, proc_root: P) -> Self {
        self.proc_root = proc_root.as_ref().to_path_buf();
        self
    }

    /// Numeric entries of the process table, minus PID 1 and ourselves, ascending
    pub fn candidates(&self) -> anyhow::Result<Vec<i32>> {
        let entries = fs::read_dir(&self.proc_root)
            .with_context(|| format!("listing process table {}", self.proc_root.display()))?;

        let mut pids: Vec<i32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
            .filter(|&pid| pid > 1 && pid != self.self_pid)
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// Signal every candidate and wait for all of them before returning.
    /// Only the first call in a process does any work.
    pub async fn reap_orphans(&self) -> anyhow::Result<ReapReport> {
        if self.reaped.swap(true, Ordering::SeqCst) {
            tracing::info!("Orphan processes already reaped in this process, skipping");
            return Ok(ReapReport::default());
        }

        let mut report = ReapReport::default();
        let mut waits = Vec::new();

        for pid in self.candidates()? {
            match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => {
                    tracing::debug!(pid, "Sent SIGTERM");
                    report.signaled.push(pid);
                    waits.push(tokio::task::spawn_blocking(move || (pid, wait_for_exit(pid))));
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Cannot signal process, skipping");
                    report.warnings.push(format!("signal {}: {}", pid, e));
                }
            }
        }

        for joined in join_all(waits).await {
            match joined {
                Ok((pid, Ok(()))) => report.reaped.push(pid),
                Ok((pid, Err(e))) => {
                    tracing::warn!(pid, error = %e, "Wait on process failed");
                    report.warnings.push(format!("wait {}: {}", pid, e));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Wait task did not complete");
                    report.warnings.push(format!("wait task: {}", e));
                }
            }
        }

        tracing::info!(
            signaled = report.signaled.len(),
            reaped = report.reaped.len(),
            warnings = report.warnings.len(),
            "Orphan processes reaped"
        );
        Ok(report)
    }
}

/// Blocks until `pid` has exited. A process that is not our child counts as done.
fn wait_for_exit(pid: i32) -> nix::Result<()> {
    loop {
        match waitpid(Pid::from_raw(pid), None) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return Ok(()),
            Ok(status) => tracing::trace!(pid, ?status, "Process still running"),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                tracing::debug!(pid, "Not a child of this process, not waiting");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    /// A reaper with its own once-guard, independent of other tests
    fn isolated(proc_root: &Path) -> Reaper {
        let mut reaper = Reaper::new().with_proc_root(proc_root);
        reaper.reaped = Box::leak(Box::new(AtomicBool::new(false)));
        reaper
    }

    fn fake_proc(entries: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for entry in entries {
            fs::create_dir(dir.path().join(entry)).unwrap();
        }
        dir
    }

    #[test]
    fn test_candidates_skip_init_self_and_non_numeric() {
        let own = std::process::id().to_string();
        let proc_dir = fake_proc(&["1", "42", "7", &own, "self", "sys", "cpuinfo"]);
        let reaper = Reaper::new().with_proc_root(proc_dir.path());
        assert_eq!(reaper.candidates().unwrap(), vec![7, 42]);
    }

    #[test]
    fn test_missing_process_table_is_an_error() {
        let reaper = Reaper::new().with_proc_root("/nonexistent/proc");
        assert!(reaper.candidates().is_err());
    }

    #[tokio::test]
    async fn test_reaps_child_and_skips_unknown_pid() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let child_pid = child.id() as i32;
        // Far above any pid_max, so the signal fails with ESRCH
        let ghost = "2000000000";
        let proc_dir = fake_proc(&[&child_pid.to_string(), ghost]);

        let report = isolated(proc_dir.path()).reap_orphans().await.unwrap();

        assert_eq!(report.signaled, vec![child_pid]);
        assert_eq!(report.reaped, vec![child_pid]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains(ghost));
    }

    #[tokio::test]
    async fn test_empty_table_reaps_nothing() {
        let proc_dir = fake_proc(&[]);
        let report = isolated(proc_dir.path()).reap_orphans().await.unwrap();
        assert_eq!(report, ReapReport::default());
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let mut first = Command::new("sleep").arg("30").spawn().unwrap();
        let first_pid = first.id() as i32;
        let proc_dir = fake_proc(&[&first_pid.to_string()]);
        let reaper = isolated(proc_dir.path());

        let report = reaper.reap_orphans().await.unwrap();
        assert_eq!(report.signaled, vec![first_pid]);

        // A clone shares the guard, so a new process in the table is left alone
        let mut second = Command::new("sleep").arg("30").spawn().unwrap();
        fs::create_dir(proc_dir.path().join(second.id().to_string())).unwrap();
        let again = reaper.clone().reap_orphans().await.unwrap();
        assert_eq!(again, ReapReport::default());
        assert!(second.try_wait().unwrap().is_none());

        second.kill().unwrap();
        second.wait().unwrap();
        let _ = first.try_wait();
    }
}
