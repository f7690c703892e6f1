mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use common::{BATCH_MODEL, StubBehavior, spawn_stub_worker, test_config};
use imagegen_gateway::caller::CallerContext;
use imagegen_gateway::config::BackendConfig;
use imagegen_gateway::features::invoker::{Invoker, Pause, PauseFuture};
use imagegen_gateway::features::postprocess::{
    ImageTransformer, LogoAssets, PngTextWriter, PostProcessor, TransformError,
};
use imagegen_gateway::features::registry::{
    Heartbeat, ModelDescriptor, ModelFamily, ModelRegistry, WorkerRegistry,
};
use imagegen_gateway::features::render::{Orchestrator, RenderJob, RenderParams};
use imagegen_gateway::metrics::BackendMetrics;
use imagegen_gateway::state::AppState;

/// 进入退避后通知测试，并一直挂起
#[derive(Default)]
struct ParkingPause {
    entered: Notify,
}

impl Pause for ParkingPause {
    fn pause(&self, _delay: Duration) -> PauseFuture<'_> {
        self.entered.notify_one();
        Box::pin(std::future::pending())
    }
}

fn small_job() -> RenderJob {
    RenderJob::new(
        "a red cube",
        RenderParams {
            width: 64,
            height: 64,
            seed: 42,
            negative_prompt: None,
            model: BATCH_MODEL.to_string(),
            logo: false,
        },
        0,
    )
    .expect("job")
}

#[tokio::test]
async fn dropping_the_request_stops_further_attempts() {
    let worker = spawn_stub_worker(StubBehavior {
        fail_first: usize::MAX,
        ..StubBehavior::default()
    })
    .await;
    let pause = Arc::new(ParkingPause::default());
    let state = AppState::from_config_with_pause(&test_config(), pause.clone()).expect("state");
    state.registry_feed.heartbeat(Heartbeat {
        worker_id: "w1".to_string(),
        endpoint: worker.endpoint(),
        family: ModelFamily::BatchStep,
        load: 0,
    });

    let job = small_job();

    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move {
        orchestrator
            .render(job, &CallerContext::current())
            .await
    });

    tokio::time::timeout(Duration::from_secs(5), pause.entered.notified())
        .await
        .expect("first attempt should fail and enter backoff");
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(worker.hit_count(), 1);
    assert_eq!(state.metrics.snapshot().renders_ok, 0);
}

/// 缩放阶段阻塞一段时间，并记录同时运行的后处理数量
struct SlowResize {
    entered: Arc<Notify>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ImageTransformer for SlowResize {
    fn overlay(
        &self,
        image: &[u8],
        _logo: &image::RgbaImage,
        _params: &RenderParams,
    ) -> Result<Vec<u8>, TransformError> {
        Ok(image.to_vec())
    }

    fn resize(&self, image: &[u8], _width: u32, _height: u32) -> Result<Vec<u8>, TransformError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entered.notify_one();
        std::thread::sleep(Duration::from_millis(600));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(image.to_vec())
    }
}

#[tokio::test]
async fn abandoned_render_keeps_its_post_process_slot_until_done() {
    let worker = spawn_stub_worker(StubBehavior::default()).await;
    let metrics = Arc::new(BackendMetrics::new());
    let models = Arc::new(ModelRegistry::new([ModelDescriptor::new(
        BATCH_MODEL,
        ModelFamily::BatchStep,
    )]));
    let (workers, feed) = WorkerRegistry::new(Duration::from_secs(60));
    feed.heartbeat(Heartbeat {
        worker_id: "w1".to_string(),
        endpoint: worker.endpoint(),
        family: ModelFamily::BatchStep,
        load: 0,
    });
    let invoker = Invoker::new(
        reqwest::Client::new(),
        workers,
        metrics.clone(),
        &BackendConfig::default(),
    );

    let entered = Arc::new(Notify::new());
    let transformer = Arc::new(SlowResize {
        entered: entered.clone(),
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let postprocess = PostProcessor::new(
        transformer.clone(),
        Arc::new(PngTextWriter),
        Arc::new(LogoAssets::builtin()),
    );
    let orchestrator = Arc::new(Orchestrator::new(models, invoker, postprocess, 1, metrics));

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .render(small_job(), &CallerContext::current())
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("first render should reach resize");
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let second = orchestrator
        .render(small_job(), &CallerContext::current())
        .await;
    assert!(second.is_ok(), "second render failed: {second:?}");

    assert_eq!(worker.hit_count(), 2);
    assert_eq!(transformer.peak.load(Ordering::SeqCst), 1);
}
