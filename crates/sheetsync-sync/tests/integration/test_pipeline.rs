//! Integration tests for the transform pipeline
//!
//! Worker jobs run on a real OS thread; the job timeout is driven by the
//! paused tokio clock so the default 60 second limit elapses instantly.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use sheetsync_core::domain::{DomainRow, RawTable};
use sheetsync_core::ports::{TransformFailure, TransformInput, TransformMeta, Transformer};
use sheetsync_sync::{
    ColumnsTransformer, TransformError, TransformPipeline, TransformRequest, TransformerRegistry,
};

/// Outlives the job timeout on the worker thread
struct Stuck;

impl Transformer for Stuck {
    fn id(&self) -> &str {
        "stuck"
    }

    fn transform(
        &self,
        _input: &TransformInput,
        _progress: &mut dyn FnMut(u8),
    ) -> Result<Vec<DomainRow>, TransformFailure> {
        thread::sleep(Duration::from_millis(300));
        Ok(vec![json!("from worker")])
    }
}

fn request(id: &str) -> TransformRequest {
    let rows = RawTable::from_records([["Ticker", "Qty"], ["AAPL", "10"], ["MSFT", "5"]])
        .unwrap()
        .into_rows();
    TransformRequest::new(id, rows, TransformMeta::default())
}

#[tokio::test(start_paused = true)]
async fn test_expired_job_returns_fallback_result_and_is_forgotten() {
    let mut registry = TransformerRegistry::new();
    registry.register(Arc::new(Stuck));
    let pipeline = TransformPipeline::new(registry);
    let fallback: Arc<dyn Transformer> = Arc::new(ColumnsTransformer::new("tickers", ["Ticker"]));

    let rows = pipeline
        .run(request("stuck"), None, Some(fallback))
        .await
        .unwrap();

    assert_eq!(rows, vec![json!({"Ticker": "AAPL"}), json!({"Ticker": "MSFT"})]);
    assert_eq!(pipeline.pending_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_job_without_fallback_times_out() {
    let mut registry = TransformerRegistry::new();
    registry.register(Arc::new(Stuck));
    let pipeline = TransformPipeline::new(registry);

    let err = pipeline.run(request("stuck"), None, None).await.unwrap_err();
    assert_eq!(
        err,
        TransformError::Timeout {
            transformer: "stuck".into(),
            after: Duration::from_secs(60)
        }
    );
    assert_eq!(pipeline.pending_jobs(), 0);
}

#[tokio::test]
async fn test_one_worker_serves_many_jobs() {
    let mut registry = TransformerRegistry::with_builtins();
    registry.register(Arc::new(ColumnsTransformer::new("tickers", ["Ticker"])));
    let pipeline = Arc::new(TransformPipeline::new(registry));

    let mut handles = Vec::new();
    for i in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        let id = if i % 2 == 0 { "rows" } else { "tickers" };
        handles.push(tokio::spawn(async move {
            (id, pipeline.transform(request(id), None).await)
        }));
    }

    for handle in handles {
        let (id, result) = handle.await.unwrap();
        let rows = result.unwrap();
        assert_eq!(rows.len(), 2, "{id}");
        let expected_keys = if id == "rows" { 2 } else { 1 };
        assert_eq!(rows[0].as_object().unwrap().len(), expected_keys);
    }
    assert_eq!(pipeline.pending_jobs(), 0);
    assert!(pipeline.has_worker());
}
