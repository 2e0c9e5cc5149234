use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::ranking::{PipelineError, RankingPipeline, RankingRequest};

use super::JobHandle;

/// Run a ranking in the background, recording the outcome on the job.
///
/// The job always ends Completed or Error, including when the pipeline
/// panics, and is scheduled for eviction afterwards.
pub fn spawn_ranking_job(
    pipeline: Arc<RankingPipeline>,
    handle: JobHandle,
    request: RankingRequest,
    server_name: String,
) -> JoinHandle<()> {
    let span = tracing::info_span!("job", job_id = %handle.id(), guild_id = %request.guild_id);

    tokio::spawn(
        async move {
            let start = Instant::now();
            let outcome = AssertUnwindSafe(pipeline.run(
                &request,
                &server_name,
                &handle,
                handle.cancellation_token(),
            ))
            .catch_unwind()
            .await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(Ok(report)) => {
                    tracing::info!(
                        elapsed_ms,
                        members = report.rankings.len(),
                        total_messages = report.total_messages,
                        "Ranking completed"
                    );
                    handle.log(format!("Done in {:.1}s", elapsed_ms as f64 / 1000.0));
                    handle.complete(report);
                }
                Ok(Err(PipelineError::Cancelled)) => {
                    tracing::info!(elapsed_ms, "Ranking cancelled");
                    handle.fail(PipelineError::Cancelled.to_string());
                }
                Ok(Err(e)) => {
                    tracing::error!(elapsed_ms, error = %e, "Ranking failed");
                    handle.fail(e.to_string());
                }
                Err(_) => {
                    tracing::error!(elapsed_ms, "Ranking task panicked");
                    handle.fail("internal error while building the ranking");
                }
            }

            handle.schedule_eviction();
        }
        .instrument(span),
    )
}
