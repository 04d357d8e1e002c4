use serde::{Deserialize, Serialize};

use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::registry::ServiceRegistration;

/// Load and timing figures for one service registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    pub registration: ServiceRegistration,
    pub running_jobs: usize,
    pub queued_jobs: usize,
    pub finished_jobs: usize,
    pub failed_jobs: usize,
    /// Mean QUEUED -> RUNNING time over terminal jobs, 0 if there are none.
    pub mean_queue_time_ms: u64,
    /// Mean RUNNING -> terminal time over terminal jobs, 0 if there are none.
    pub mean_run_time_ms: u64,
}

impl ServiceStatistics {
    pub fn empty(registration: ServiceRegistration) -> Self {
        Self {
            registration,
            running_jobs: 0,
            queued_jobs: 0,
            finished_jobs: 0,
            failed_jobs: 0,
            mean_queue_time_ms: 0,
            mean_run_time_ms: 0,
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.running_jobs + self.queued_jobs
    }
}

/// Aggregate `jobs` into statistics for `registration`.
///
/// Jobs belonging to other service types or hosts are ignored.
pub fn compute(registration: &ServiceRegistration, jobs: &[Job]) -> ServiceStatistics {
    let mut stats = ServiceStatistics::empty(registration.clone());
    let mut queue_times = Vec::new();
    let mut run_times = Vec::new();

    let owned = jobs.iter().filter(|j| {
        j.service_type == registration.service_type
            && j.assigned_host.as_deref() == Some(registration.host.as_str())
    });

    for job in owned {
        match job.status {
            JobStatus::Running => stats.running_jobs += 1,
            JobStatus::Queued => stats.queued_jobs += 1,
            JobStatus::Finished => stats.finished_jobs += 1,
            JobStatus::Failed => stats.failed_jobs += 1,
        }
        if job.is_terminal() {
            if let Some(ms) = job.queue_time_ms() {
                queue_times.push(ms);
            }
            if let Some(ms) = job.run_time_ms() {
                run_times.push(ms);
            }
        }
    }

    stats.mean_queue_time_ms = mean_ms(&queue_times);
    stats.mean_run_time_ms = mean_ms(&run_times);
    stats
}

fn mean_ms(samples: &[i64]) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    // Clock skew between hosts can produce negative spans
    let total: i64 = samples.iter().map(|&ms| ms.max(0)).sum();
    (total / samples.len() as i64) as u64
}
