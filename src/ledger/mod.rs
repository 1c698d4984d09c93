//! 追加式账本 (Append-only Ledger)
//!
//! 锚定交易的载体。本地部署用 `MmrLedger` (sled 持久化的 Merkle Mountain Range)，
//! 也可以通过 `RemoteLedger` 提交给外部账本网关。两者都要等交易确认后才返回。

mod mmr;
mod remote;

pub use mmr::{LedgerEntry, LedgerProof, MergeBlake3, MmrLedger};
pub use remote::RemoteLedger;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 合约方法 `logEvidence(fingerprintHex, unixTimestamp, location)` 的参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub fingerprint: String,
    pub timestamp: i64,
    pub location: String,
}

/// 已签名的锚定交易
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAnchor {
    pub record: AnchorRecord,
    /// Hex 编码的 ed25519 公钥
    pub public_key: String,
    /// Hex 编码的 64 字节签名
    pub signature: String,
}

impl SignedAnchor {
    /// 交易 id：整笔交易 bcs 编码后的 blake3 哈希
    pub fn tx_hash(&self) -> Result<[u8; 32], LedgerError> {
        let bytes = bcs::to_bytes(self).map_err(|e| LedgerError::Encoding(e.to_string()))?;
        Ok(*blake3::hash(&bytes).as_bytes())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("anchor signature rejected")]
    InvalidSignature,

    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger rejected transaction: {0}")]
    Rejected(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("MMR error: {0}")]
    Mmr(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
}

#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// 提交交易并等待确认，返回 hex 交易 id
    async fn submit(&self, tx: &SignedAnchor) -> Result<String, LedgerError>;
}
