// Chunk planning: split an approved request's date range into fixed-width
// chunks and materialize one QUEUED job row per chunk.

use crate::audit::{AuditEvent, AuditSink};
use crate::models::{BackfillJob, BackfillRequest, JobStatus, RequestStatus};
use crate::store::JobStore;
use chrono::{Days, NaiveDate};
use tracing::{info, instrument};

/// Inclusive chunk ranges covering [start, end], each at most `width_days`
/// wide. The final chunk absorbs the remainder and may be shorter.
pub fn chunk_ranges(
    start: NaiveDate,
    end: NaiveDate,
    width_days: u32,
) -> Vec<(NaiveDate, NaiveDate)> {
    let mut out = Vec::new();
    if start > end || width_days == 0 {
        return out;
    }
    let mut chunk_start = start;
    while chunk_start <= end {
        let candidate_end = chunk_start + Days::new(width_days as u64 - 1);
        let chunk_end = candidate_end.min(end);
        out.push((chunk_start, chunk_end));
        chunk_start = chunk_end + Days::new(1);
    }
    out
}

/// Plan one approved request: insert its chunk jobs (skipped entirely if
/// any already exist), move it to RUNNING, and announce the start. Safe to
/// call once per cycle until jobs exist.
#[instrument(skip(store, audit, request), fields(request_id = %request.id))]
pub async fn plan_request(
    store: &JobStore,
    audit: &AuditSink,
    request: &BackfillRequest,
    chunk_width_days: u32,
    max_retries: u32,
) -> anyhow::Result<u64> {
    let ranges = chunk_ranges(request.start_date, request.end_date, chunk_width_days);
    anyhow::ensure!(
        !ranges.is_empty(),
        "request {} has an empty date range",
        request.id
    );

    let jobs: Vec<BackfillJob> = ranges
        .iter()
        .enumerate()
        .map(|(i, (chunk_start, chunk_end))| BackfillJob {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            tenant_id: request.tenant_id.clone(),
            source_system: request.source_system,
            chunk_start_date: *chunk_start,
            chunk_end_date: *chunk_end,
            chunk_index: i as i64,
            status: JobStatus::Queued,
            attempt: 0,
            max_retries: max_retries as i64,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            rows_affected: None,
            duration_ms: None,
            error_message: None,
            metadata: None,
        })
        .collect();

    let inserted = store.insert_jobs(&request.id, &jobs).await?;
    if inserted == 0 {
        // Another worker planned it first; nothing to do.
        return Ok(0);
    }

    store
        .transition_request(&request.id, RequestStatus::Running)
        .await?;
    info!(total_chunks = inserted, "request planned");
    audit
        .emit(AuditEvent::ExecutionStarted {
            request_id: request.id.clone(),
            total_chunks: inserted,
        })
        .await;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::chunk_ranges;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn ninety_days_in_seven_day_chunks_gives_thirteen() {
        // 2025-01-01 .. 2025-03-31 is 90 days: 12 full weeks + 6 days.
        let chunks = chunk_ranges(d("2025-01-01"), d("2025-03-31"), 7);
        assert_eq!(chunks.len(), 13);
        for (i, (s, e)) in chunks.iter().enumerate().take(12) {
            assert_eq!((*e - *s).num_days(), 6, "chunk {} should span 7 days", i);
        }
        let (last_s, last_e) = chunks[12];
        assert_eq!((last_e - last_s).num_days(), 5, "last chunk spans 6 days");
        assert_eq!(last_e, d("2025-03-31"));
    }

    #[test]
    fn chunks_are_contiguous_and_cover_the_range() {
        let start = d("2024-11-03");
        let end = d("2025-02-14");
        let chunks = chunk_ranges(start, end, 7);
        assert_eq!(chunks[0].0, start);
        assert_eq!(chunks.last().unwrap().1, end);
        for w in chunks.windows(2) {
            assert_eq!(
                w[1].0,
                w[0].1 + chrono::Days::new(1),
                "no gap or overlap between consecutive chunks"
            );
        }
    }

    #[test]
    fn single_day_range_is_one_chunk() {
        let chunks = chunk_ranges(d("2025-06-01"), d("2025-06-01"), 7);
        assert_eq!(chunks, vec![(d("2025-06-01"), d("2025-06-01"))]);
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let chunks = chunk_ranges(d("2025-01-01"), d("2025-01-14"), 7);
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[1].1 - chunks[1].0).num_days(), 6);
    }

    #[test]
    fn inverted_range_yields_nothing() {
        assert!(chunk_ranges(d("2025-02-01"), d("2025-01-01"), 7).is_empty());
    }
}
