use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartRejection},
        DefaultBodyLimit, FromRequest, Path, Query, Request, State,
    },
    http::{header::CONTENT_TYPE, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::evidence::{EvidenceSubmission, MediaSubmission, StructuredSubmission};
use crate::ledger::{LedgerProof, MmrLedger};
use crate::pipeline::Orchestrator;
use crate::recorder::AlertEvent;

/// 激活接口的文件字段
pub const MEDIA_FIELD: &str = "media_file";
/// 实时音频接口的文件字段
pub const AUDIO_FIELD: &str = "audio_file";
/// JSON 请求体上限
pub const JSON_BODY_LIMIT: usize = 5 * 1024 * 1024;

const DEFAULT_EVENT_LIMIT: usize = 20;
const MAX_EVENT_LIMIT: usize = 100;

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// 组合根在启动时构造一次，所有请求共享。
// 每次激活写入互不相交的记录，不需要跨请求加锁。
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// 使用本地账本时提供存在性证明查询
    pub ledger: Option<Arc<MmrLedger>>,
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerdictBody {
    pub verdict: String,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

type ApiError = (StatusCode, Json<MessageBody>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(MessageBody {
            message: message.to_string(),
        }),
    )
}

fn internal_error() -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

// ==========================================
// 3. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/activate", post(activate))
        .route("/api/analyze-live-audio", post(analyze_live_audio))
        .route("/api/events", get(list_events))
        .route("/api/anchors/{tx_hash}", get(get_anchor_proof))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

/// 接口：一键激活
///
/// multipart 带 `media_file` 为媒体证据，否则按 JSON 结构化证据处理。
async fn activate(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<MessageBody>, ApiError> {
    let submission = parse_submission(request, &state).await?;
    info!(signal = submission.signal_type().as_str(), "📥 收到激活请求");

    match state.orchestrator.activate(submission).await {
        Ok(outcome) => {
            info!(
                id = %outcome.activation_id,
                anchored = outcome.anchor.is_some(),
                "✅ 激活完成"
            );
            Ok(Json(MessageBody {
                message: outcome.message(),
            }))
        }
        // 内部细节只进日志，不返回给调用方
        Err(e) => {
            warn!(error = %e, "❌ 激活失败");
            Err(internal_error())
        }
    }
}

async fn parse_submission(request: Request, state: &Arc<AppState>) -> Result<EvidenceSubmission, ApiError> {
    let media_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if media_type == "multipart/form-data" {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| api_error(e.status(), &e.body_text()))?;
        return read_activation_form(multipart).await;
    }

    // 非 JSON 请求体不解析，按空对象继续激活
    if !is_json_media_type(&media_type) {
        return Ok(EvidenceSubmission::Structured(StructuredSubmission {
            payload: serde_json::Value::Object(Default::default()),
        }));
    }

    let body = Bytes::from_request(request, state)
        .await
        .map_err(|e| api_error(e.status(), &e.body_text()))?;
    if body.len() > JSON_BODY_LIMIT {
        return Err(api_error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"));
    }

    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body).map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid JSON body"))?
    };
    Ok(EvidenceSubmission::Structured(StructuredSubmission { payload }))
}

/// `application/json` 或 `application/*+json`
fn is_json_media_type(media_type: &str) -> bool {
    media_type == "application/json"
        || (media_type.starts_with("application/") && media_type.ends_with("+json"))
}

/// 读取激活表单：取 `media_file` 文件；没有文件时，文本字段组成结构化证据
async fn read_activation_form(mut multipart: Multipart) -> Result<EvidenceSubmission, ApiError> {
    let mut media = None;
    let mut fields = serde_json::Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let is_file = field.file_name().is_some();

        if name == MEDIA_FIELD && media.is_none() {
            media = Some(read_media(field).await?);
        } else if !is_file {
            let text = field
                .text()
                .await
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.body_text()))?;
            fields.insert(name, serde_json::Value::String(text));
        }
    }

    Ok(match media {
        Some(media) => EvidenceSubmission::Media(media),
        None => EvidenceSubmission::Structured(StructuredSubmission {
            payload: serde_json::Value::Object(fields),
        }),
    })
}

async fn read_media(field: axum::extract::multipart::Field<'_>) -> Result<MediaSubmission, ApiError> {
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let original_filename = field.file_name().unwrap_or("upload").to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.body_text()))?;

    Ok(MediaSubmission {
        bytes: bytes.to_vec(),
        mime_type,
        original_filename,
    })
}

/// 接口：实时音频分析 (只分类，不指纹、不锚定、不落库)
async fn analyze_live_audio(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VerdictBody>, ApiError> {
    let no_audio = || api_error(StatusCode::BAD_REQUEST, "No audio file received.");
    let mut multipart = multipart.map_err(|_| no_audio())?;

    let mut audio = None;
    while let Some(field) = multipart.next_field().await.map_err(|_| no_audio())? {
        if field.name() == Some(AUDIO_FIELD) {
            audio = Some(read_media(field).await?);
            break;
        }
    }
    let audio = audio.ok_or_else(no_audio)?;

    match state.orchestrator.analyze_live_audio(&audio).await {
        Ok(verdict) => Ok(Json(VerdictBody {
            verdict: verdict.as_str().to_string(),
        })),
        Err(e) => {
            warn!(error = %e, "❌ 实时音频分析失败");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Error analyzing audio."))
        }
    }
}

/// 接口：最近的审计记录
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<AlertEvent>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT).min(MAX_EVENT_LIMIT);
    state
        .orchestrator
        .recorder()
        .recent(limit)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "读取审计记录失败");
            internal_error()
        })
}

/// 接口：获取锚定交易的存在性证明
async fn get_anchor_proof(
    State(state): State<Arc<AppState>>,
    Path(tx_hash): Path<String>,
) -> Result<Json<LedgerProof>, ApiError> {
    info!(%tx_hash, "🔍 收到审计请求");

    let Some(ledger) = state.ledger.as_ref() else {
        return Err(api_error(StatusCode::NOT_FOUND, "Proofs are served by the remote ledger"));
    };

    match ledger.proof(&tx_hash).await {
        Ok(Some(proof)) => Ok(Json(proof)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "Anchor not found")),
        Err(e) => {
            warn!(error = %e, "生成证明失败");
            Err(internal_error())
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
