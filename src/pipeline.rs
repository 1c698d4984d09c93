//! 激活流水线 (Activation Orchestrator)
//!
//! 顺序：分类 → (按判决) 告警 → 指纹 → 审计记录 → 账本锚定 → 响应。
//!
//! - 分类失败：立即失败，不产生任何副作用。
//! - 审计记录失败：整个激活失败，但已经完成的分类 / 告警不会回滚。
//! - 告警、锚定失败：只记日志，流水线照常完成。
//!
//! 所有步骤都在当前请求内 await 完成，不会丢到后台。

use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::alert::{AlertDispatcher, AlertOutcome};
use crate::anchor::{AnchorReceipt, LedgerAnchor};
use crate::classifier::{ClassifyError, Classifier};
use crate::evidence::{EvidenceSubmission, MediaSubmission, Verdict};
use crate::fingerprint::{fingerprint_submission, Fingerprint};
use crate::recorder::{AlertEvent, EventRecorder, PersistenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationStage {
    Received,
    Classifying,
    Classified,
    Alerting,
    Fingerprinting,
    Recording,
    Anchoring,
    Responded,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("classification failed: {0}")]
    Classification(#[from] ClassifyError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// 一次成功激活的全部产出
#[derive(Debug, Clone)]
pub struct ActivationOutcome {
    pub activation_id: Uuid,
    pub verdict: Verdict,
    pub alert: AlertOutcome,
    pub fingerprint: Fingerprint,
    pub event: AlertEvent,
    pub anchor: Option<AnchorReceipt>,
    pub stages: Vec<ActivationStage>,
}

impl ActivationOutcome {
    /// 返回给客户端的文本
    pub fn message(&self) -> String {
        format!("AI Verdict: {}", self.verdict)
    }
}

/// 单次激活的阶段轨迹
struct StageTrail(Vec<ActivationStage>);

impl StageTrail {
    fn new() -> Self {
        Self(vec![ActivationStage::Received])
    }

    fn enter(&mut self, stage: ActivationStage) {
        debug!(?stage, "阶段切换");
        self.0.push(stage);
    }
}

pub struct Orchestrator {
    classifier: Arc<dyn Classifier>,
    alerts: AlertDispatcher,
    recorder: EventRecorder,
    anchor: LedgerAnchor,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        alerts: AlertDispatcher,
        recorder: EventRecorder,
        anchor: LedgerAnchor,
    ) -> Self {
        Self {
            classifier,
            alerts,
            recorder,
            anchor,
        }
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// 执行一次完整激活
    pub async fn activate(&self, submission: EvidenceSubmission) -> Result<ActivationOutcome, ActivationError> {
        let activation_id = Uuid::new_v4();
        let span = info_span!(
            "activation",
            id = %activation_id,
            signal = submission.signal_type().as_str()
        );
        self.run(activation_id, submission).instrument(span).await
    }

    async fn run(
        &self,
        activation_id: Uuid,
        submission: EvidenceSubmission,
    ) -> Result<ActivationOutcome, ActivationError> {
        let mut trail = StageTrail::new();
        let signal_type = submission.signal_type();

        // 1. 分类
        trail.enter(ActivationStage::Classifying);
        let verdict = match self.classifier.classify(&submission).await {
            Ok(verdict) => verdict,
            Err(e) => {
                trail.enter(ActivationStage::Failed);
                error!(error = %e, "❌ AI 分类失败，激活终止");
                return Err(e.into());
            }
        };
        trail.enter(ActivationStage::Classified);
        info!(%verdict, "✅ AI 判决");

        // 2. 告警 (结果不影响响应)
        let alert = if verdict.should_alert() {
            trail.enter(ActivationStage::Alerting);
            self.alerts.maybe_alert(&verdict).await
        } else {
            AlertOutcome::NotTriggered
        };

        // 3. 指纹 (CPU 密集，视频可能很大，移至 spawn_blocking)
        trail.enter(ActivationStage::Fingerprinting);
        let fingerprint = match tokio::task::spawn_blocking(move || fingerprint_submission(&submission)).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };
        info!(%fingerprint, "生成 SHA-256 指纹");

        // 4. 审计记录 (失败即整体失败，已发送的告警不回滚)
        trail.enter(ActivationStage::Recording);
        let event = match self.recorder.record(signal_type, &verdict).await {
            Ok(event) => event,
            Err(e) => {
                trail.enter(ActivationStage::Failed);
                error!(error = %e, ?alert, "❌ 审计记录写入失败，激活终止");
                return Err(e.into());
            }
        };

        // 5. 账本锚定 (None 为正常的降级结果)
        trail.enter(ActivationStage::Anchoring);
        let observed_at = chrono::Utc::now().timestamp();
        let anchor = self.anchor.anchor(&fingerprint, observed_at).await;

        trail.enter(ActivationStage::Responded);
        Ok(ActivationOutcome {
            activation_id,
            verdict,
            alert,
            fingerprint,
            event,
            anchor,
            stages: trail.0,
        })
    }

    /// 轻量音频分析：只分类，不指纹、不锚定、不落库
    pub async fn analyze_live_audio(&self, audio: &MediaSubmission) -> Result<Verdict, ClassifyError> {
        let verdict = self.classifier.classify_audio(audio).await?;
        info!(%verdict, "🎙️ 实时音频判决");
        Ok(verdict)
    }
}
