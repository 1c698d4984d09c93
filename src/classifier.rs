//! AI 分类网关 (Classification Gateway)
//!
//! 把两种证据形态 (媒体文件 / JSON) 适配成同一个外部分类调用，返回归一化的判决。
//! 每次激活只调用一次，不做重试。

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, warn};

use crate::evidence::{EvidenceSubmission, MediaSubmission, Verdict};

/// 直播音频接口上传时固定使用的文件名
pub const LIVE_AUDIO_FILENAME: &str = "recording.wav";

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// 服务不可达、超时或返回非 2xx
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    /// 响应里没有 verdict 字段
    #[error("classifier response malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// 对一次激活的证据做分类
    async fn classify(&self, submission: &EvidenceSubmission) -> Result<Verdict, ClassifyError>;

    /// 轻量音频分析：无论 MIME 是什么都以 `audio_file` 字段提交
    async fn classify_audio(&self, audio: &MediaSubmission) -> Result<Verdict, ClassifyError>;
}

/// multipart 字段名：视频走 `video_file`，其余走 `audio_file`
pub fn media_field_name(media: &MediaSubmission) -> &'static str {
    if media.is_video() {
        "video_file"
    } else {
        "audio_file"
    }
}

/// 基于 HTTP 的分类器客户端
pub struct HttpClassifier {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build classifier HTTP client: {}", e))?;

        Ok(Self {
            endpoint: endpoint.into(),
            http,
        })
    }

    async fn post_media(
        &self,
        field: &'static str,
        media: &MediaSubmission,
        filename: &str,
    ) -> Result<Verdict, ClassifyError> {
        debug!(field, mime = %media.mime_type, size = media.bytes.len(), "📤 提交媒体证据到分类器");
        let form = Form::new().part(field, media_part(media, filename));
        let request = self.http.post(&self.endpoint).multipart(form);
        self.send(request).await
    }

    async fn post_json(&self, body: Vec<u8>) -> Result<Verdict, ClassifyError> {
        debug!(size = body.len(), "📤 提交结构化证据到分类器");
        let request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Verdict, ClassifyError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClassifyError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "分类器返回非成功状态");
            return Err(ClassifyError::Unavailable(format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ClassifyError::Unavailable(e.to_string()))?;

        parse_verdict(&body)
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, submission: &EvidenceSubmission) -> Result<Verdict, ClassifyError> {
        match submission {
            EvidenceSubmission::Media(media) => {
                self.post_media(media_field_name(media), media, &media.original_filename)
                    .await
            }
            // 与指纹使用同一份规范字节
            EvidenceSubmission::Structured(structured) => {
                self.post_json(structured.canonical_bytes()).await
            }
        }
    }

    async fn classify_audio(&self, audio: &MediaSubmission) -> Result<Verdict, ClassifyError> {
        self.post_media("audio_file", audio, LIVE_AUDIO_FILENAME).await
    }
}

fn media_part(media: &MediaSubmission, filename: &str) -> Part {
    let part = || Part::bytes(media.bytes.clone()).file_name(filename.to_string());
    // 客户端给的 MIME 不合法时退回 octet-stream
    part().mime_str(&media.mime_type).unwrap_or_else(|_| part())
}

/// 解析 `{"verdict": "..."}`
pub fn parse_verdict(body: &[u8]) -> Result<Verdict, ClassifyError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ClassifyError::Malformed(format!("invalid JSON: {}", e)))?;

    value
        .get("verdict")
        .and_then(|v| v.as_str())
        .map(Verdict::new)
        .ok_or_else(|| ClassifyError::Malformed("missing verdict field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::StructuredSubmission;
    use axum::{body::Bytes, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api/analyze", addr)
    }

    async fn recording_classifier(verdict: &'static str) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        let router = Router::new().route(
            "/api/analyze",
            post(move |headers: HeaderMap, body: Bytes| {
                let sink = sink.clone();
                async move {
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    sink.lock().unwrap().push((content_type, body.to_vec()));
                    Json(serde_json::json!({ "verdict": verdict }))
                }
            }),
        );
        (serve(router).await, seen)
    }

    fn media(mime: &str, name: &str) -> MediaSubmission {
        MediaSubmission {
            bytes: b"raw-media".to_vec(),
            mime_type: mime.to_string(),
            original_filename: name.to_string(),
        }
    }

    #[tokio::test]
    async fn video_uses_video_field() {
        let (url, seen) = recording_classifier("ALERT: weapon detected").await;
        let classifier = HttpClassifier::new(url, Duration::from_secs(5)).unwrap();

        let verdict = classifier
            .classify(&EvidenceSubmission::Media(media("video/mp4", "crime.mp4")))
            .await
            .unwrap();

        assert_eq!(verdict.as_str(), "ALERT: weapon detected");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.starts_with("multipart/form-data"));
        let body = String::from_utf8_lossy(&seen[0].1);
        assert!(body.contains("name=\"video_file\""));
        assert!(body.contains("filename=\"crime.mp4\""));
        assert!(body.contains("raw-media"));
    }

    #[tokio::test]
    async fn non_video_uses_audio_field() {
        let (url, seen) = recording_classifier("Normal activity detected in audio.").await;
        let classifier = HttpClassifier::new(url, Duration::from_secs(5)).unwrap();

        classifier
            .classify(&EvidenceSubmission::Media(media("audio/mp4", "voice.m4a")))
            .await
            .unwrap();
        classifier
            .classify_audio(&media("video/webm", "ignored.webm"))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let first = String::from_utf8_lossy(&seen[0].1);
        assert!(first.contains("name=\"audio_file\""));
        let second = String::from_utf8_lossy(&seen[1].1);
        assert!(second.contains("name=\"audio_file\""));
        assert!(second.contains("filename=\"recording.wav\""));
    }

    #[tokio::test]
    async fn structured_forwards_canonical_json() {
        let (url, seen) = recording_classifier("SAFE").await;
        let classifier = HttpClassifier::new(url, Duration::from_secs(5)).unwrap();
        let structured = StructuredSubmission {
            payload: serde_json::json!({"image": "/9j/4AAQSkZJRg=="}),
        };
        let expected = structured.canonical_bytes();

        let verdict = classifier
            .classify(&EvidenceSubmission::Structured(structured))
            .await
            .unwrap();

        assert_eq!(verdict.as_str(), "SAFE");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "application/json");
        assert_eq!(seen[0].1, expected);
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let router = Router::new().route(
            "/api/analyze",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let classifier = HttpClassifier::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let err = classifier
            .classify(&EvidenceSubmission::Media(media("video/mp4", "a.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_is_unavailable() {
        // 先绑定再释放，拿到一个确定无人监听的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let classifier =
            HttpClassifier::new(format!("http://{}/api/analyze", addr), Duration::from_secs(2))
                .unwrap();
        let err = classifier
            .classify(&EvidenceSubmission::Media(media("audio/wav", "a.wav")))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Unavailable(_)));
    }

    #[tokio::test]
    async fn slow_classifier_times_out() {
        let router = Router::new().route(
            "/api/analyze",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(serde_json::json!({ "verdict": "SAFE" }))
            }),
        );
        let classifier =
            HttpClassifier::new(serve(router).await, Duration::from_millis(100)).unwrap();

        let started = std::time::Instant::now();
        let err = classifier
            .classify(&EvidenceSubmission::Structured(StructuredSubmission {
                payload: serde_json::json!({"image": "abc"}),
            }))
            .await
            .unwrap_err();

        assert!(matches!(err, ClassifyError::Unavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn missing_verdict_is_malformed() {
        assert!(matches!(
            parse_verdict(br#"{"label": "SAFE"}"#),
            Err(ClassifyError::Malformed(_))
        ));
        assert!(matches!(
            parse_verdict(br#"{"verdict": 3}"#),
            Err(ClassifyError::Malformed(_))
        ));
        assert!(matches!(parse_verdict(b"<html>"), Err(ClassifyError::Malformed(_))));
        assert_eq!(parse_verdict(br#"{"verdict": "SAFE"}"#).unwrap().as_str(), "SAFE");
    }
}
