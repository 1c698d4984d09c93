use serde::{Deserialize, Serialize}; // 引入序列化库，让结构体能转成JSON/二进制传输

/// 媒体证据 (视频 / 音频)
///
/// 作用：客户端通过 multipart 上传的原始文件。
/// 细节：`bytes` 就是送去 AI 分类的那份字节，也是计算指纹的那份字节，二者必须一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSubmission {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub original_filename: String,
}

impl MediaSubmission {
    /// `video/` 开头的 MIME 视为视频，其余一律按音频处理
    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }
}

/// 结构化证据 (JSON)
///
/// 例如前端摄像头抓拍：`{"image": "<base64 jpeg>"}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredSubmission {
    pub payload: serde_json::Value,
}

impl StructuredSubmission {
    /// 规范化 JSON 字节
    ///
    /// 细节：开启了 serde_json 的 `preserve_order`，对象保持客户端给出的 key 顺序，
    /// 输出紧凑无空白 (与 `JSON.stringify` 一致)。转发给分类器的也是这串字节。
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Value 的序列化不会失败 (key 一定是字符串)
        serde_json::to_vec(&self.payload).unwrap_or_default()
    }
}

/// 一次激活的证据，二选一
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceSubmission {
    Media(MediaSubmission),
    Structured(StructuredSubmission),
}

impl EvidenceSubmission {
    pub fn signal_type(&self) -> SignalType {
        match self {
            EvidenceSubmission::Media(_) => SignalType::Media,
            EvidenceSubmission::Structured(_) => SignalType::Image,
        }
    }

    /// 指纹所依据的字节：媒体取原始字节，结构化取规范 JSON 字节
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            EvidenceSubmission::Media(media) => media.bytes.clone(),
            EvidenceSubmission::Structured(structured) => structured.canonical_bytes(),
        }
    }
}

/// 信号类型 (落库字段)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    #[serde(rename = "MEDIA_SIGNAL")]
    Media,
    #[serde(rename = "IMAGE_SIGNAL")]
    Image,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Media => "MEDIA_SIGNAL",
            SignalType::Image => "IMAGE_SIGNAL",
        }
    }
}

/// AI 判决
///
/// 分类器给出的一句短文本，除了 "alert" 子串规则外不做任何语义解析。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verdict(String);

impl Verdict {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 是否触发紧急通知：忽略大小写包含 "alert"
    pub fn should_alert(&self) -> bool {
        self.0.to_lowercase().contains("alert")
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
