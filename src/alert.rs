//! 紧急通知 (Alert Dispatcher)
//!
//! 判决命中 "alert" 时给紧急联系人发一条短信。尽力而为：
//! 发送失败只记日志，返回 `AlertOutcome::Failed`，绝不影响 HTTP 响应。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::evidence::Verdict;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("carrier request failed: {0}")]
    Transport(String),

    #[error("carrier rejected message: HTTP {0}")]
    Rejected(u16),

    #[error("no notification carrier configured")]
    NotConfigured,
}

/// 通知通道：给一个目标号码发一条文本
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError>;
}

/// Twilio 短信通道
pub struct TwilioNotifier {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_base: String,
}

impl TwilioNotifier {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build carrier HTTP client: {}", e))?;

        Ok(Self {
            http,
            account_sid,
            auth_token,
            from_number,
            api_base: "https://api.twilio.com".to_string(),
        })
    }

    /// 替换 API 地址 (测试用本地假服务)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        );

        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", destination),
                ("From", self.from_number.as_str()),
                ("Body", message),
            ])
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// 未配置短信通道时使用：只记日志，报告未送达
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        warn!(destination, message, "⚠️ 未配置短信通道，告警仅记录到日志");
        Err(NotifyError::NotConfigured)
    }
}

/// 一次告警尝试的结果，调用方可以忽略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// 判决未命中，没有发送
    NotTriggered,
    Delivered,
    Failed,
}

/// 短信模板
pub fn alert_message(verdict: &Verdict) -> String {
    format!(
        "GuardianAI Alert: A potential threat has been detected. AI Verdict: \"{}\".",
        verdict
    )
}

pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    destination: String,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, destination: impl Into<String>, timeout: Duration) -> Self {
        Self {
            notifier,
            destination: destination.into(),
            timeout,
        }
    }

    /// 按判决决定是否告警；任何失败都在这里吞掉
    pub async fn maybe_alert(&self, verdict: &Verdict) -> AlertOutcome {
        if !verdict.should_alert() {
            return AlertOutcome::NotTriggered;
        }

        info!(destination = %self.destination, "🚨 发送紧急短信");
        let message = alert_message(verdict);
        match tokio::time::timeout(self.timeout, self.notifier.send(&self.destination, &message)).await {
            Ok(Ok(())) => {
                info!("✅ 短信已送达");
                AlertOutcome::Delivered
            }
            Ok(Err(e)) => {
                warn!(error = %e, "❌ 短信发送失败");
                AlertOutcome::Failed
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "❌ 短信发送超时");
                AlertOutcome::Failed
            }
        }
    }
}
