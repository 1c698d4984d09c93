use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{LedgerBackend, LedgerError, SignedAnchor};

/// 外部账本网关
///
/// `POST {base}/anchors` 提交签名交易，随后轮询 `GET {base}/anchors/{tx_hash}`
/// 直到状态为 `confirmed`。整体等待时长由调用方的超时约束。
pub struct RemoteLedger {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct TxStatus {
    tx_hash: String,
    status: String,
}

impl RemoteLedger {
    pub fn new(base_url: impl Into<String>, poll_interval: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build ledger HTTP client: {}", e))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval,
        })
    }

    async fn read_status(response: reqwest::Response) -> Result<TxStatus, LedgerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("HTTP {}: {}", status, body)));
        }
        response
            .json::<TxStatus>()
            .await
            .map_err(|e| LedgerError::Encoding(e.to_string()))
    }
}

#[async_trait]
impl LedgerBackend for RemoteLedger {
    async fn submit(&self, tx: &SignedAnchor) -> Result<String, LedgerError> {
        let response = self
            .http
            .post(format!("{}/anchors", self.base_url))
            .json(tx)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let mut current = Self::read_status(response).await?;

        loop {
            match current.status.as_str() {
                "confirmed" => return Ok(current.tx_hash),
                "pending" => {
                    debug!(tx_hash = %current.tx_hash, "等待账本确认");
                    tokio::time::sleep(self.poll_interval).await;
                    let response = self
                        .http
                        .get(format!("{}/anchors/{}", self.base_url, current.tx_hash))
                        .send()
                        .await
                        .map_err(|e| LedgerError::Transport(e.to_string()))?;
                    current = Self::read_status(response).await?;
                }
                other => {
                    return Err(LedgerError::Reverted(format!(
                        "{} ({})",
                        current.tx_hash, other
                    )))
                }
            }
        }
    }
}
