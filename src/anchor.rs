//! 账本锚定 (Ledger Anchor)
//!
//! 把证据指纹 + 时间戳写进追加式账本。任何失败 (签名、网络、回滚、超时)
//! 都在这里记日志并返回 `None`，不会越过本模块的边界。

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::fingerprint::Fingerprint;
use crate::ledger::{AnchorRecord, LedgerBackend};
use crate::signer::AnchorSigner;

/// 位置参数占位符：客户端不采集地理位置
pub const LOCATION_PLACEHOLDER: &str = "0,0";

/// 账本确认后的交易 id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchorReceipt {
    pub tx_hash: String,
}

pub struct LedgerAnchor {
    signer: Arc<AnchorSigner>,
    ledger: Arc<dyn LedgerBackend>,
    timeout: Duration,
}

impl LedgerAnchor {
    pub fn new(signer: Arc<AnchorSigner>, ledger: Arc<dyn LedgerBackend>, timeout: Duration) -> Self {
        Self {
            signer,
            ledger,
            timeout,
        }
    }

    /// 提交锚定并等待确认；`None` 表示本次锚定失败 (非致命)
    pub async fn anchor(&self, fingerprint: &Fingerprint, observed_at: i64) -> Option<AnchorReceipt> {
        let record = AnchorRecord {
            fingerprint: fingerprint.to_string(),
            timestamp: observed_at,
            location: LOCATION_PLACEHOLDER.to_string(),
        };

        let tx = match self.signer.sign(record) {
            Ok(tx) => tx,
            Err(e) => {
                error!(error = %e, "❌ 锚定交易签名失败");
                return None;
            }
        };

        info!(%fingerprint, "⛓️ 提交指纹到账本");
        match tokio::time::timeout(self.timeout, self.ledger.submit(&tx)).await {
            Ok(Ok(tx_hash)) => {
                info!(%tx_hash, "✅ 账本确认成功");
                Some(AnchorReceipt { tx_hash })
            }
            Ok(Err(e)) => {
                error!(error = %e, "❌ 账本锚定失败");
                None
            }
            Err(_) => {
                error!(timeout = ?self.timeout, "❌ 账本确认超时");
                None
            }
        }
    }
}
