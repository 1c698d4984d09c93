use guardian_core::{
    alert::{AlertDispatcher, LogNotifier, Notifier, TwilioNotifier},
    anchor::LedgerAnchor,
    api,
    classifier::HttpClassifier,
    config::{Config, LedgerConfig},
    ledger::{LedgerBackend, MmrLedger, RemoteLedger},
    pipeline::Orchestrator,
    recorder::{EventRecorder, SledEventStore},
    signer::AnchorSigner,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ----------------------------------------------------------------
    // 0. 加载配置
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        host = %config.host,
        port = config.port,
        events = %config.event_db_path,
        classifier = %config.classifier_url,
        "⚙️  配置加载完成"
    );

    // ----------------------------------------------------------------
    // 1. 身份加载 & 外部协作方 (进程内只构造一次)
    // ----------------------------------------------------------------
    let signer = Arc::new(AnchorSigner::load_or_generate(&config.key_path)?);
    info!(public_key = %hex::encode(signer.public_key().to_bytes()), "🆔 锚定签名身份");

    let (ledger, local_ledger): (Arc<dyn LedgerBackend>, Option<Arc<MmrLedger>>) = match &config.ledger {
        LedgerConfig::Local { db_path } => {
            let ledger = Arc::new(MmrLedger::open(db_path)?);
            info!(path = %db_path, leaves = ledger.len().await, "📚 本地 MMR 账本就绪");
            let backend: Arc<dyn LedgerBackend> = ledger.clone();
            (backend, Some(ledger))
        }
        LedgerConfig::Remote { url, poll_interval } => {
            info!(%url, "🌐 使用远程账本网关");
            let backend: Arc<dyn LedgerBackend> = Arc::new(RemoteLedger::new(url.clone(), *poll_interval)?);
            (backend, None)
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.carrier {
        Some(carrier) => Arc::new(TwilioNotifier::new(
            carrier.account_sid.clone(),
            carrier.auth_token.clone(),
            carrier.from_number.clone(),
            config.notify_timeout,
        )?),
        None => {
            warn!("未配置 Twilio 凭据，紧急告警只会写入日志");
            Arc::new(LogNotifier)
        }
    };
    if config.emergency_contact.is_empty() {
        warn!("EMERGENCY_CONTACT_PHONE_NUMBER 未设置");
    }

    let store = Arc::new(SledEventStore::open(&config.event_db_path)?);

    let orchestrator = Orchestrator::new(
        Arc::new(HttpClassifier::new(config.classifier_url.clone(), config.classifier_timeout)?),
        AlertDispatcher::new(notifier, config.emergency_contact.clone(), config.notify_timeout),
        EventRecorder::new(store, config.store_timeout),
        LedgerAnchor::new(signer, ledger, config.anchor_timeout),
    );

    // ----------------------------------------------------------------
    // 2. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let state = Arc::new(api::AppState {
        orchestrator: Arc::new(orchestrator),
        ledger: local_ledger,
    });
    let app = api::app(state, config.max_upload_bytes);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("🚀 API 服务已运行在: http://{}", addr);
    info!("   - POST /api/activate            : 一键激活 (媒体文件或 JSON)");
    info!("   - POST /api/analyze-live-audio  : 实时音频分析");
    info!("   - GET  /api/anchors/{{tx_hash}}   : 获取锚定交易的存在性证明");

    axum::serve(listener, app).await?;

    Ok(())
}
