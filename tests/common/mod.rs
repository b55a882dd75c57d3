//! Shared test utilities
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use remo_gateway::api::ApiState;
use remo_gateway::chat::ChatGateway;
use remo_gateway::config::{LlmConfig, SttConfig, VoiceConfig};
use remo_gateway::persona::{PersonaCatalog, PersonaSpeechBinding, VoiceParams};
use remo_gateway::speech::SpeechService;
use remo_gateway::voice::{BackendKind, SpeechBackend, SpeechJob, Transcriber, VoiceInfo, VoiceRenderer};

/// API key the mock model backend accepts
pub const GOOD_KEY: &str = "test-key";

/// How the mock model backend answers chat requests
#[derive(Clone)]
pub enum MockReply {
    /// One JSON body with a status
    Json(StatusCode, Value),
    /// Body lines sent as separate chunks, then the connection closes
    Lines(Vec<String>),
    /// Body lines, then the connection stays open without data
    LinesThenStall(Vec<String>),
    /// Never answer
    Hang,
}

struct MockState {
    reply: MockReply,
    requests: Mutex<Vec<Value>>,
}

/// A running mock of the workspace chat API
pub struct MockModel {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockModel {
    /// JSON bodies of the chat requests received so far
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn chat_handler(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.requests.lock().unwrap().push(body);

    match state.reply.clone() {
        MockReply::Json(status, value) => (status, Json(value)).into_response(),
        MockReply::Lines(lines) => {
            let chunks = futures::stream::iter(lines.into_iter().map(|l| Ok::<_, std::io::Error>(format!("{l}\n"))));
            stream_response(Body::from_stream(chunks))
        }
        MockReply::LinesThenStall(lines) => {
            let chunks = futures::stream::iter(lines.into_iter().map(|l| Ok::<_, std::io::Error>(format!("{l}\n"))))
                .chain(futures::stream::pending());
            stream_response(Body::from_stream(chunks))
        }
        MockReply::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

fn stream_response(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn workspaces_handler(headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {GOOD_KEY}"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "No valid api key found."}))).into_response();
    }

    Json(json!({
        "workspaces": [
            {"id": 1, "name": "Remo", "slug": "remo", "openAiTemp": 0.7},
            {"id": 2, "name": "Scratch", "slug": "scratch"}
        ]
    }))
    .into_response()
}

/// Whisper-compatible transcription that always hears the same words
async fn transcription_handler(_upload: axum::body::Bytes) -> Json<Value> {
    Json(json!({"text": "  what time is it  "}))
}

/// Start a mock model backend on a free local port
pub async fn mock_model(reply: MockReply) -> MockModel {
    let state = Arc::new(MockState {
        reply,
        requests: Mutex::new(Vec::new()),
    });
    let router = Router::new()
        .route("/api/v1/workspace/{slug}/chat", post(chat_handler))
        .route("/api/v1/workspaces", get(workspaces_handler))
        .route("/api/v1/whisper/audio/transcriptions", post(transcription_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockModel {
        base_url: format!("http://{addr}/api/v1"),
        state,
    }
}

/// Model backend configuration pointing at `base_url`
pub fn llm_config(base_url: &str) -> LlmConfig {
    LlmConfig {
        base_url: base_url.to_string(),
        api_key: Some(GOOD_KEY.to_string().into()),
        stream_timeout: Duration::from_secs(1),
        ..LlmConfig::default()
    }
}

/// Speech backend that finishes after `duration` and records what it said
pub struct FakeSpeech {
    pub duration: Duration,
    /// Refuse to start any speech
    pub fail: bool,
    pub started: Arc<AtomicUsize>,
    pub spoken: Arc<Mutex<Vec<(String, VoiceParams)>>>,
}

impl FakeSpeech {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            fail: false,
            started: Arc::default(),
            spoken: Arc::default(),
        }
    }
}

struct FakeJob {
    duration: Duration,
    stopped: bool,
}

#[async_trait]
impl SpeechJob for FakeJob {
    async fn wait(&mut self) -> remo_gateway::Result<()> {
        if !self.stopped {
            tokio::time::sleep(self.duration).await;
        }
        Ok(())
    }

    fn request_stop(&mut self) -> bool {
        self.stopped = true;
        true
    }

    async fn kill(&mut self) {}
}

#[async_trait]
impl SpeechBackend for FakeSpeech {
    fn kind(&self) -> BackendKind {
        BackendKind::Custom
    }

    async fn start(&self, text: &str, params: &VoiceParams) -> remo_gateway::Result<Box<dyn SpeechJob>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.spoken.lock().unwrap().push((text.to_string(), params.clone()));
        if self.fail {
            return Err(remo_gateway::Error::SynthesisFailed("audio device unplugged".to_string()));
        }
        Ok(Box::new(FakeJob {
            duration: self.duration,
            stopped: false,
        }))
    }

    async fn synthesize_to_file(&self, _text: &str, _params: &VoiceParams, path: &Path) -> remo_gateway::Result<()> {
        std::fs::write(path, wav_bytes(16_000, 1600))?;
        Ok(())
    }

    async fn voices(&self) -> remo_gateway::Result<Vec<VoiceInfo>> {
        Ok(vec![VoiceInfo {
            code: "en".to_string(),
            name: "English".to_string(),
        }])
    }
}

/// Mono 16-bit WAV with `frames` samples of a quiet ramp
pub fn wav_bytes(sample_rate: u32, frames: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(i16::try_from(i % 512).unwrap()).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Everything an API test needs, wired like the binary does
pub struct Harness {
    pub state: Arc<ApiState>,
    pub spoken: Arc<Mutex<Vec<(String, VoiceParams)>>>,
    pub started: Arc<AtomicUsize>,
    _binding: Arc<PersonaSpeechBinding>,
    _dir: tempfile::TempDir,
}

/// Build API state against `llm_base_url`, with or without a speech backend
pub fn harness(llm_base_url: &str, with_speech: bool) -> Harness {
    let fake = FakeSpeech::new(Duration::from_millis(5));
    if with_speech {
        harness_with(llm_base_url, fake)
    } else {
        build_harness(llm_base_url, fake, false)
    }
}

/// Build API state against `llm_base_url` speaking through `fake`
pub fn harness_with(llm_base_url: &str, fake: FakeSpeech) -> Harness {
    build_harness(llm_base_url, fake, true)
}

fn build_harness(llm_base_url: &str, fake: FakeSpeech, with_speech: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(PersonaCatalog::open(dir.path().join("personas.yaml")));

    let spoken = fake.spoken.clone();
    let started = fake.started.clone();
    let backend: Option<Arc<dyn SpeechBackend>> = if with_speech { Some(Arc::new(fake)) } else { None };
    let renderer = Arc::new(VoiceRenderer::new(backend, &VoiceConfig::default()));

    let binding = PersonaSpeechBinding::attach(&catalog, renderer.clone());
    let speech = Arc::new(SpeechService::new(renderer, catalog.clone()));
    let gateway = Arc::new(
        ChatGateway::new(&llm_config(llm_base_url))
            .with_personas(catalog.clone())
            .with_speech(speech.clone()),
    );
    let transcriber = Arc::new(Transcriber::new(&SttConfig {
        base_url: format!("{llm_base_url}/whisper"),
        model: "whisper-1".to_string(),
        api_key: None,
        language: None,
    }));

    Harness {
        state: Arc::new(ApiState {
            gateway,
            catalog,
            speech,
            transcriber,
        }),
        spoken,
        started,
        _binding: binding,
        _dir: dir,
    }
}
