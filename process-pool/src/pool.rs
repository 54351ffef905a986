use crate::process::{self, ExitResult, Process};
use crate::Result;
use std::collections::HashMap;
use tracing::warn;

/// Bounded-concurrency pool of background child processes.
///
/// Jobs are identified by monotonically increasing ids, never reused. Results
/// of terminated jobs accumulate in the completed map until the pool is
/// dropped, so callers can inspect outcomes lazily after a wait.
#[derive(Debug)]
pub struct ParallelExecutionPool {
  running: HashMap<u64, Process>,
  completed: HashMap<u64, ExitResult>,
  next_id: u64,
  max_concurrent: usize,
}

impl ParallelExecutionPool {
  pub fn new(max_concurrent: usize) -> Self {
    Self {
      running: HashMap::new(),
      completed: HashMap::new(),
      next_id: 0,
      max_concurrent: max_concurrent.max(1),
    }
  }

  /// Submit a job, blocking for a free slot when the pool is saturated.
  pub fn run(&mut self, argv: &[String]) -> Result<u64> {
    if self.running.len() >= self.max_concurrent {
      self.wait_for_any_job_to_complete()?;
    }
    let process = process::spawn(argv)?;
    let id = self.next_id;
    self.next_id += 1;
    self.running.insert(id, process);
    Ok(id)
  }

  /// Block until at least one running job has been reaped into the completed
  /// map.
  pub fn wait_for_any_job_to_complete(&mut self) -> Result<()> {
    loop {
      let (finished_id, finished_status) = process::wait_any(&self.running)?;

      let mut reaped: HashMap<u64, ExitResult> = HashMap::new();
      if let Some(id) = finished_id {
        reaped.insert(id, finished_status);
      }

      // Opportunistic sweep: several children may have exited between two
      // reaping points.
      for (&id, process) in &self.running {
        if reaped.contains_key(&id) {
          continue;
        }
        match process.poll_exit() {
          Ok(Some(status)) => {
            reaped.insert(id, status);
          }
          Ok(None) => {}
          Err(err) => {
            // A failing poll is treated as terminal for that job, recording
            // the last observed exit as a conservative bound. Surfacing the
            // error instead would be a legitimate choice; see DESIGN.md.
            warn!(job = id, error = %err, "poll failed during reap; marking job completed");
            reaped.insert(id, finished_status);
          }
        }
      }

      if reaped.is_empty() {
        // The wildcard wait returned a child that is not ours; wait again.
        continue;
      }

      for (id, status) in reaped {
        self.running.remove(&id);
        self.completed.insert(id, status);
      }
      return Ok(());
    }
  }

  /// Reap every running job. The completed map is left intact for callers to
  /// read.
  pub fn wait_for_all_jobs_to_complete(&mut self) -> Result<()> {
    while !self.running.is_empty() {
      self.wait_for_any_job_to_complete()?;
    }
    Ok(())
  }

  /// Exit result of a job, if it has been reaped.
  pub fn status(&self, id: u64) -> Option<ExitResult> {
    self.completed.get(&id).copied()
  }

  pub fn completed_jobs(&self) -> impl Iterator<Item = (u64, ExitResult)> + '_ {
    self.completed.iter().map(|(&id, &status)| (id, status))
  }

  pub fn running_count(&self) -> usize {
    self.running.len()
  }

  pub fn max_concurrent(&self) -> usize {
    self.max_concurrent
  }

  /// SIGKILL every running job without waiting; callers follow up with
  /// [`ParallelExecutionPool::wait_for_all_jobs_to_complete`] to reap.
  pub fn kill_all(&mut self) -> Result<()> {
    for process in self.running.values() {
      process.kill()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support;
  use crate::PoolError;

  fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
  }

  #[test]
  fn four_jobs_through_two_slots() {
    let _guard = test_support::reap_lock();
    let mut pool = ParallelExecutionPool::new(2);
    let mut ids = Vec::new();
    for _ in 0..4 {
      ids.push(pool.run(&argv(&["true"])).expect("run"));
      assert!(pool.running_count() <= 2);
    }
    pool.wait_for_all_jobs_to_complete().expect("wait all");
    assert_eq!(pool.running_count(), 0);
    assert_eq!(ids, vec![0, 1, 2, 3]);
    for id in ids {
      assert_eq!(pool.status(id).expect("status").exit_code, 0);
    }
  }

  #[test]
  fn status_reports_nonzero_exits() {
    let _guard = test_support::reap_lock();
    let mut pool = ParallelExecutionPool::new(1);
    let id = pool.run(&argv(&["sh", "-c", "exit 5"])).expect("run");
    pool.wait_for_all_jobs_to_complete().expect("wait all");
    assert_eq!(pool.status(id).expect("status").exit_code, 5);
  }

  #[test]
  fn serial_pool_observes_prior_completion() {
    let _guard = test_support::reap_lock();
    let mut pool = ParallelExecutionPool::new(1);
    let first = pool.run(&argv(&["true"])).expect("first");
    let _second = pool.run(&argv(&["true"])).expect("second");
    // With one slot, submitting the second job must have reaped the first.
    assert!(pool.status(first).is_some());
    pool.wait_for_all_jobs_to_complete().expect("wait all");
  }

  #[test]
  fn kill_all_then_reap() {
    let _guard = test_support::reap_lock();
    let mut pool = ParallelExecutionPool::new(3);
    for _ in 0..3 {
      pool.run(&argv(&["sleep", "30"])).expect("run");
    }
    pool.kill_all().expect("kill_all");
    pool.wait_for_all_jobs_to_complete().expect("wait all");
    assert_eq!(pool.running_count(), 0);
    assert_eq!(pool.completed_jobs().count(), 3);
    for (_, status) in pool.completed_jobs() {
      assert_eq!(status.exit_code, 137);
    }
  }

  #[test]
  fn status_of_unknown_job_is_none() {
    let pool = ParallelExecutionPool::new(1);
    assert!(pool.status(42).is_none());
  }

  #[test]
  fn waiting_with_nothing_running_is_an_error() {
    let mut pool = ParallelExecutionPool::new(1);
    assert!(matches!(
      pool.wait_for_any_job_to_complete(),
      Err(PoolError::EmptyWaitSet)
    ));
  }
}
