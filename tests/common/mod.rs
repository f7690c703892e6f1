#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{Value, json};

use imagegen_gateway::config::AppConfig;
use imagegen_gateway::features::invoker::{Pause, PauseFuture};
use imagegen_gateway::features::registry::{ModelDescriptor, ModelFamily};

pub const BATCH_MODEL: &str = "batchStep-model";
pub const SIMPLE_MODEL: &str = "any-dark";

/// 后端原生输出为 1024x1024 的纯蓝图
pub fn backend_png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(1024, 1024, Rgba([0, 0, 255, 255]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// simpleParametric 后端原生输出：768x1024 的纯绿 JPEG
pub fn backend_jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(768, 1024, image::Rgb([0, 200, 0]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .expect("encode jpeg");
    buf.into_inner()
}

/// stub worker 的行为
#[derive(Clone)]
pub struct StubBehavior {
    /// 前 N 次请求返回 500
    pub fail_first: usize,
    pub has_nsfw_concept: bool,
    pub special_scores: Value,
    /// `/imagine` 以 200 + text/plain 回应
    pub imagine_text: bool,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            fail_first: 0,
            has_nsfw_concept: false,
            special_scores: json!({ "minor": -0.8 }),
            imagine_text: false,
        }
    }
}

#[derive(Clone)]
struct StubState {
    behavior: StubBehavior,
    hits: Arc<AtomicUsize>,
    payloads: Arc<Mutex<Vec<Value>>>,
    image_b64: Arc<str>,
    jpeg: Arc<[u8]>,
}

/// 进程内 worker（`POST /generate` 为 batchStep，`GET /imagine` 为 simpleParametric）
pub struct StubWorker {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    pub payloads: Arc<Mutex<Vec<Value>>>,
}

impl StubWorker {
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_payload(&self) -> Value {
        self.payloads
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("no payload recorded")
    }
}

async fn generate(State(s): State<StubState>, Json(payload): Json<Value>) -> impl IntoResponse {
    let n = s.hits.fetch_add(1, Ordering::SeqCst);
    s.payloads.lock().expect("lock").push(payload);
    if n < s.behavior.fail_first {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "busy"})));
    }
    (
        StatusCode::OK,
        Json(json!([{
            "image": s.image_b64.as_ref(),
            "has_nsfw_concept": s.behavior.has_nsfw_concept,
            "concept": { "special_scores": s.behavior.special_scores },
            "seed": 42,
        }])),
    )
}

async fn imagine(
    State(s): State<StubState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let n = s.hits.fetch_add(1, Ordering::SeqCst);
    s.payloads.lock().expect("lock").push(json!(query));
    if n < s.behavior.fail_first {
        return (StatusCode::INTERNAL_SERVER_ERROR, "busy").into_response();
    }
    if s.behavior.imagine_text {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "model is loading",
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/jpeg")],
        s.jpeg.to_vec(),
    )
        .into_response()
}

pub async fn spawn_stub_worker(behavior: StubBehavior) -> StubWorker {
    let hits = Arc::new(AtomicUsize::new(0));
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        behavior,
        hits: hits.clone(),
        payloads: payloads.clone(),
        image_b64: Arc::from(general_purpose::STANDARD.encode(backend_png())),
        jpeg: Arc::from(backend_jpeg()),
    };
    let app = Router::new()
        .route("/generate", post(generate))
        .route("/imagine", get(imagine))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    StubWorker {
        addr,
        hits,
        payloads,
    }
}

/// 只注册 batchStep 测试模型、没有静态 worker 的配置
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.registry.static_workers.clear();
    cfg.models.default_model = BATCH_MODEL.to_string();
    cfg.models.registered = vec![
        ModelDescriptor::new(BATCH_MODEL, ModelFamily::BatchStep),
        ModelDescriptor::new(SIMPLE_MODEL, ModelFamily::SimpleParametric),
    ];
    cfg.backend.request_timeout_secs = 5;
    cfg.postprocess.max_parallel = 2;
    cfg
}

/// 记录退避时长而不真正等待
#[derive(Default)]
pub struct RecordingPause {
    pub delays: Mutex<Vec<Duration>>,
}

impl RecordingPause {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().expect("lock").clone()
    }
}

impl Pause for RecordingPause {
    fn pause(&self, delay: Duration) -> PauseFuture<'_> {
        self.delays.lock().expect("lock").push(delay);
        Box::pin(async {})
    }
}
