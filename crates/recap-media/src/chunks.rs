//! Chunk planning and pool sizing.

use recap_models::Chunk;

/// Split a source into contiguous, non-overlapping chunks. The final chunk
/// covers whatever remains and may be shorter than `chunk_duration`.
pub fn plan_chunks(total_duration: f64, chunk_duration: f64) -> Vec<Chunk> {
    if total_duration <= 0.0 || chunk_duration <= 0.0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0.0;
    let mut index = 0;

    while start < total_duration {
        let duration = chunk_duration.min(total_duration - start);
        chunks.push(Chunk {
            index,
            start_time: start,
            duration,
        });
        start += chunk_duration;
        index += 1;
    }

    chunks
}

/// Effective pool size: the requested worker count capped at half the
/// hardware concurrency, never below one. The cap keeps a single extraction
/// run from saturating a host that is also running other jobs.
pub fn effective_workers(requested: usize) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    requested.max(1).min((available / 2).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_are_contiguous() {
        let chunks = plan_chunks(350.0, 60.0);
        assert_eq!(chunks.len(), 6);
        for window in chunks.windows(2) {
            let end = window[0].start_time + window[0].duration;
            assert!((end - window[1].start_time).abs() < 1e-9);
        }
    }

    #[test]
    fn test_final_chunk_is_partial() {
        let chunks = plan_chunks(350.0, 60.0);
        let last = chunks.last().unwrap();
        assert_eq!(last.index, 5);
        assert!((last.duration - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_multiple_has_no_zero_chunk() {
        let chunks = plan_chunks(120.0, 60.0);
        assert_eq!(chunks.len(), 2);
        assert!((chunks[1].duration - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(plan_chunks(0.0, 60.0).is_empty());
        assert!(plan_chunks(100.0, 0.0).is_empty());
    }

    #[test]
    fn test_short_source_is_one_chunk() {
        let chunks = plan_chunks(12.0, 60.0);
        assert_eq!(chunks.len(), 1);
        assert!((chunks[0].duration - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_effective_workers_floor() {
        assert_eq!(effective_workers(0), 1);
        assert!(effective_workers(64) >= 1);
    }
}
