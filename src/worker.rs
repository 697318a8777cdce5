use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info};

use crate::invoker::{ModelClient, run_analysis};
use crate::metrics::ANALYSES_COMPLETED;
use crate::models::AnalysisJob;

// Background worker -> pulls jobs off the queue, at most `concurrency` model calls in flight
pub async fn analysis_worker(
    mut rx: mpsc::Receiver<AnalysisJob>,
    client: Arc<dyn ModelClient>,
    concurrency: usize,
) {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    info!(concurrency, "analysis worker started");

    while let Some(job) = rx.recv().await {
        // wait for a free slot before taking the next job
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let client = Arc::clone(&client);

        tokio::spawn(async move {
            let result = run_analysis(client.as_ref(), &job.case_text).await;
            if result.is_ok() {
                ANALYSES_COMPLETED.inc();
            }
            // the handler may have gone away, nothing to do then
            if job.response_tx.send(result).is_err() {
                debug!("analysis finished after its request was dropped");
            }
            drop(permit);
        });
    }

    info!("analysis queue closed, worker stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyzeError;
    use crate::invoker::UpstreamError;
    use crate::testing::{FakeModel, sample_model_json};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_worker_answers_each_job() {
        let (tx, rx) = mpsc::channel(8);
        let model = Arc::new(FakeModel::replying(sample_model_json()));
        let client: Arc<dyn ModelClient> = model.clone();
        tokio::spawn(analysis_worker(rx, client, 2));

        let mut waiting = Vec::new();
        for _ in 0..3 {
            let (response_tx, response_rx) = oneshot::channel();
            tx.send(AnalysisJob {
                case_text: "case".into(),
                response_tx,
            })
            .await
            .unwrap();
            waiting.push(response_rx);
        }

        for rx in waiting {
            assert!(rx.await.unwrap().is_ok());
        }
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_worker_forwards_failures() {
        let (tx, rx) = mpsc::channel(1);
        let model = Arc::new(FakeModel::failing(|| UpstreamError::Busy("overloaded".into())));
        tokio::spawn(analysis_worker(rx, model, 1));

        let (response_tx, response_rx) = oneshot::channel();
        tx.send(AnalysisJob {
            case_text: "case".into(),
            response_tx,
        })
        .await
        .unwrap();

        assert_eq!(
            response_rx.await.unwrap().unwrap_err(),
            AnalyzeError::UpstreamUnavailable
        );
    }
}
