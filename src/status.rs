// Read-side progress aggregation over a request's chunk jobs. Pure: never
// writes, safe to call while the executor runs.

use crate::models::{BackfillJob, BackfillRequest, JobStatus, RequestProgress};

pub fn aggregate(request: &BackfillRequest, jobs: &[BackfillJob]) -> RequestProgress {
    let total_chunks = jobs.len() as u64;
    let completed_chunks = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Succeeded)
        .count() as u64;
    let failed_chunks = jobs.iter().filter(|j| j.status == JobStatus::Failed).count() as u64;

    let percent_complete = if total_chunks == 0 {
        0.0
    } else {
        (completed_chunks as f64 / total_chunks as f64) * 100.0
    };

    let current_chunk = jobs
        .iter()
        .find(|j| j.status == JobStatus::Running)
        .map(|j| j.chunk_index);

    let mut failure_reasons: Vec<String> = Vec::new();
    for job in jobs.iter().filter(|j| j.status == JobStatus::Failed) {
        if let Some(msg) = &job.error_message
            && !failure_reasons.contains(msg)
        {
            failure_reasons.push(msg.clone());
        }
    }

    let durations: Vec<i64> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Succeeded)
        .filter_map(|j| j.duration_ms)
        .collect();
    let estimated_seconds_remaining = if durations.is_empty() {
        None
    } else {
        let avg_ms = durations.iter().sum::<i64>() as f64 / durations.len() as f64;
        let remaining = total_chunks - completed_chunks;
        Some(avg_ms * remaining as f64 / 1000.0)
    };

    RequestProgress {
        status: request.status,
        percent_complete,
        total_chunks,
        completed_chunks,
        failed_chunks,
        current_chunk,
        failure_reasons,
        estimated_seconds_remaining,
    }
}
