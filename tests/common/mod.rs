//! Shared fixtures: local stand-ins for the arXiv, Wikipedia and Groq chat
//! APIs, and scripted model providers

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use scout::config::{LlmConfig, ToolsConfig};
use scout::llm::{LlmProvider, LlmResponse, Message, ProviderFactory, TokenUsage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Recorded = Arc<Mutex<Vec<HashMap<String, String>>>>;

const ENTRY: &str = r#"<entry>
    <id>http://arxiv.org/abs/{id}</id>
    <updated>2023-08-02T00:41:18Z</updated>
    <published>2017-06-12T17:57:34Z</published>
    <title>{title}</title>
    <summary>The dominant sequence transduction models are based on complex recurrent or
convolutional neural networks in an encoder-decoder configuration. The best performing models
also connect the encoder and decoder through an attention mechanism.</summary>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
  </entry>"#;

const PARIS: &str = "Paris is the capital and largest city of France. With an estimated \
population of 2,102,650 residents in January 2023 in an area of more than 105 km2, Paris is \
the fourth-most populous city in the European Union and the 30th most densely populated city \
in the world in 2022.";

fn feed(entries: &[(&str, &str)]) -> String {
    let body: String = entries
        .iter()
        .map(|(id, title)| ENTRY.replace("{id}", id).replace("{title}", title))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query</title>
  {}
</feed>"#,
        body
    )
}

async fn arxiv(
    State(recorded): State<Recorded>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    recorded.lock().unwrap().push(params.clone());
    let query = params
        .get("search_query")
        .or_else(|| params.get("id_list"))
        .cloned()
        .unwrap_or_default();

    if query.contains("fail") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded".to_string());
    }
    if query.contains("nothing") {
        return (StatusCode::OK, feed(&[]));
    }
    // Always more entries than asked for; the tool has to enforce its own limit
    (
        StatusCode::OK,
        feed(&[
            ("1706.03762v7", "Attention Is All You Need"),
            ("1810.04805v2", "BERT: Pre-training of Deep Bidirectional Transformers"),
            ("2005.14165v4", "Language Models are Few-Shot Learners"),
        ]),
    )
}

async fn wikipedia(
    State(recorded): State<Recorded>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    recorded.lock().unwrap().push(params.clone());

    if params.get("list").map(String::as_str) == Some("search") {
        let query = params.get("srsearch").cloned().unwrap_or_default();
        if query.contains("fail") {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})));
        }
        let hits = if query.contains("nothing") {
            serde_json::json!([])
        } else {
            serde_json::json!([{"ns": 0, "title": "Paris"}, {"ns": 0, "title": "Lyon"}, {"ns": 0, "title": "Ghost page"}])
        };
        return (
            StatusCode::OK,
            Json(serde_json::json!({"batchcomplete": true, "query": {"search": hits}})),
        );
    }

    let title = params.get("titles").cloned().unwrap_or_default();
    let page = match title.as_str() {
        "Paris" => serde_json::json!({"pageid": 22989, "ns": 0, "title": "Paris", "extract": PARIS}),
        "Lyon" => serde_json::json!({"pageid": 8109, "ns": 0, "title": "Lyon", "extract": "Lyon is the third-largest city of France."}),
        other => serde_json::json!({"ns": 0, "title": other, "missing": true}),
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({"batchcomplete": true, "query": {"pages": [page]}})),
    )
}

pub struct SearchMock {
    pub base_url: String,
    pub arxiv_requests: Recorded,
    pub wikipedia_requests: Recorded,
}

impl SearchMock {
    pub fn tools_config(&self) -> ToolsConfig {
        ToolsConfig {
            arxiv_url: format!("{}/api/query", self.base_url),
            wikipedia_url: format!("{}/w/api.php", self.base_url),
            timeout_secs: 5,
            ..ToolsConfig::default()
        }
    }
}

/// Serve canned arXiv / Wikipedia responses on an ephemeral port
pub async fn spawn_search_mock() -> SearchMock {
    let arxiv_requests: Recorded = Arc::default();
    let wikipedia_requests: Recorded = Arc::default();

    let app = Router::new()
        .route("/api/query", get(arxiv).with_state(arxiv_requests.clone()))
        .route("/w/api.php", get(wikipedia).with_state(wikipedia_requests.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    SearchMock {
        base_url: format!("http://{}", addr),
        arxiv_requests,
        wikipedia_requests,
    }
}

/// Replays canned model turns; repeats the last one once the script runs out
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "llama3-8b-8192"
    }

    async fn chat(&self, messages: &[Message], _stop: &[String]) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push(messages.last().map(|m| m.content.clone()).unwrap_or_default());

        let mut turns = self.turns.lock().unwrap();
        let turn = if turns.len() > 1 {
            turns.pop_front()
        } else {
            turns.front().cloned()
        };
        match turn {
            Some(Ok(text)) => Ok(LlmResponse {
                text,
                usage: Some(TokenUsage {
                    input_tokens: 100,
                    output_tokens: 20,
                    total_tokens: 120,
                }),
            }),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok(LlmResponse::text("Final Answer: (no script)")),
        }
    }
}

/// Factory handing out one shared scripted provider, recording every key it sees
pub struct ScriptedFactory {
    pub provider: Arc<ScriptedProvider>,
    pub keys: Mutex<Vec<String>>,
}

impl ScriptedFactory {
    pub fn new(turns: &[&str]) -> Arc<Self> {
        Self::with_turns(turns.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::with_turns(VecDeque::from(vec![Err(message.to_string())]))
    }

    fn with_turns(turns: VecDeque<Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            provider: Arc::new(ScriptedProvider {
                turns: Mutex::new(turns),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }),
            keys: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.keys.lock().unwrap().len()
    }
}

impl ProviderFactory for ScriptedFactory {
    fn create(&self, credential: &str) -> Result<Arc<dyn LlmProvider>> {
        self.keys.lock().unwrap().push(credential.to_string());
        Ok(self.provider.clone())
    }
}

/// Key the chat stand-in answers with 401
pub const REJECTED_KEY: &str = "gsk_rejected";
/// Key for which the chat stand-in stops sending halfway through the stream
pub const STALLED_KEY: &str = "gsk_stalled";

/// One request seen by the chat stand-in
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub authorization: String,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct ChatState {
    reply: Arc<String>,
    calls: Arc<Mutex<Vec<ChatCall>>>,
}

/// The reply as an SSE body in the Groq wire format, cut into 7-byte chunks
///
/// The cut ignores line and character boundaries on purpose.
fn sse_chunks(reply: &str) -> Vec<Bytes> {
    let chars: Vec<char> = reply.chars().collect();
    let mut body = String::new();
    for piece in chars.chunks(4) {
        let text: String = piece.iter().collect();
        let chunk = serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}}]});
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    let last = serde_json::json!({
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
        "x_groq": {"usage": {"prompt_tokens": 42, "completion_tokens": 7, "total_tokens": 49}}
    });
    body.push_str(&format!("data: {}\n\n", last));
    body.push_str("data: [DONE]\n\n");
    body.as_bytes().chunks(7).map(Bytes::copy_from_slice).collect()
}

async fn chat_completions(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.calls.lock().unwrap().push(ChatCall {
        authorization: authorization.clone(),
        body: body.clone(),
    });

    if authorization == format!("Bearer {}", REJECTED_KEY) {
        let error = serde_json::json!({"error": {"message": "Invalid API Key", "type": "invalid_request_error"}});
        return (StatusCode::UNAUTHORIZED, Json(error)).into_response();
    }

    if body["stream"] != serde_json::json!(true) {
        return Json(serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": state.reply.as_str()}}],
            "usage": {"prompt_tokens": 42, "completion_tokens": 7, "total_tokens": 49}
        }))
        .into_response();
    }

    let stalled = authorization == format!("Bearer {}", STALLED_KEY);
    let mut chunks = sse_chunks(&state.reply);
    if stalled {
        chunks.truncate(3);
    }
    let stream = futures::stream::iter(chunks)
        .then(|chunk| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, std::convert::Infallible>(chunk)
        })
        .chain(futures::stream::once(async move {
            if stalled {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(Bytes::new())
        }));

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

pub struct ChatMock {
    pub url: String,
    pub calls: Arc<Mutex<Vec<ChatCall>>>,
}

impl ChatMock {
    /// Model settings pointing at this stand-in, with a one second stream timeout
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            base_url: self.url.clone(),
            stream_timeout_secs: 1,
            ..LlmConfig::default()
        }
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }
}

/// Serve an OpenAI-compatible `/chat/completions` endpoint that always answers `reply`
pub async fn spawn_chat_mock(reply: &str) -> ChatMock {
    let calls: Arc<Mutex<Vec<ChatCall>>> = Arc::default();
    let state = ChatState {
        reply: Arc::new(reply.to_string()),
        calls: calls.clone(),
    };
    let app = Router::new()
        .route("/openai/v1/chat/completions", post(chat_completions))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ChatMock {
        url: format!("http://{}/openai/v1/chat/completions", addr),
        calls,
    }
}
