use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::error::{ClipperError, ExportError, Result};

/// Result of one job submitted to [`JobRunner::run_all`]
#[derive(Debug)]
pub struct JobOutcome<T> {
    pub name: String,
    pub result: Result<T>,
}

/// Runs independent jobs concurrently on the blocking pool.
///
/// Each job is a single sequential decode/encode pass and owns its own
/// source and writer, so jobs share nothing but the output namespace. At
/// most `max_parallel` run at once.
pub struct JobRunner {
    permits: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// Run every job and return the outcomes in submission order
    pub async fn run_all<T, F>(&self, jobs: Vec<(String, F)>) -> Vec<JobOutcome<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        info!("Running {} jobs, {} at a time", jobs.len(), self.permits.available_permits());

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|(name, job)| {
                let permits = Arc::clone(&self.permits);
                let task_name = name.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return Err(aborted(&task_name, e.to_string())),
                    };
                    match tokio::task::spawn_blocking(job).await {
                        Ok(result) => result,
                        Err(e) => Err(aborted(&task_name, e.to_string())),
                    }
                });
                (name, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(aborted(&name, e.to_string())),
            };
            match &result {
                Ok(_) => info!("Job {} finished", name),
                Err(e) => error!("Job {} failed: {}", name, e.user_message()),
            }
            outcomes.push(JobOutcome { name, result });
        }
        outcomes
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

fn aborted(job: &str, reason: String) -> ClipperError {
    ExportError::JobAborted {
        job: job.to_string(),
        reason,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_outcomes_keep_submission_order() {
        let runner = JobRunner::new(2);
        let jobs: Vec<(String, Box<dyn FnOnce() -> Result<u32> + Send>)> = vec![
            ("slow".to_string(), Box::new(|| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(1)
            })),
            ("fast".to_string(), Box::new(|| Ok(2))),
            ("broken".to_string(), Box::new(|| Err(ClipperError::generic("nope")))),
        ];

        let outcomes = runner.run_all(jobs).await;

        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["slow", "fast", "broken"]);
        assert_eq!(*outcomes[0].result.as_ref().unwrap(), 1);
        assert_eq!(*outcomes[1].result.as_ref().unwrap(), 2);
        assert!(outcomes[2].result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallelism_is_bounded() {
        let runner = JobRunner::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..6)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                let job = move || -> Result<()> {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                };
                (format!("job-{i}"), job)
            })
            .collect();

        let outcomes = runner.run_all(jobs).await;
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported() {
        let runner = JobRunner::new(1);
        let jobs = vec![("panics".to_string(), || -> Result<()> { panic!("boom") })];

        let outcomes = runner.run_all(jobs).await;
        assert!(matches!(
            outcomes[0].result,
            Err(ClipperError::Export(ExportError::JobAborted { .. }))
        ));
    }
}
