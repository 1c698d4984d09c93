use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256}; // 引入 SHA2 算法和 Digest 特性(方法集)

use crate::evidence::EvidenceSubmission;

/// 证据指纹
///
/// 32 字节 SHA-256 摘要的小写十六进制形式，固定 64 个字符。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 对任意字节计算指纹
///
/// 纯函数：同样的字节永远得到同样的指纹，哪怕改动一个字节结果也会雪崩式变化。
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    // `{:x}` 将 32 字节摘要转为小写十六进制字符串
    Fingerprint(format!("{:x}", hasher.finalize()))
}

/// 对一次提交的证据计算指纹
///
/// 字节表示与送去分类的完全相同 (见 `EvidenceSubmission::canonical_bytes`)。
pub fn fingerprint_submission(submission: &EvidenceSubmission) -> Fingerprint {
    match submission {
        EvidenceSubmission::Media(media) => fingerprint(&media.bytes),
        EvidenceSubmission::Structured(structured) => fingerprint(&structured.canonical_bytes()),
    }
}
