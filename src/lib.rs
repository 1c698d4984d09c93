//! GuardianAI 激活服务核心
//!
//! 接收求救信号 (图片 / 音频 / 视频) → AI 分类 → 按判决发送紧急短信 →
//! 计算证据指纹并锚定到追加式账本 → 写入审计记录。

pub mod alert;
pub mod anchor;
pub mod api;
pub mod classifier;
pub mod config;
pub mod evidence;
pub mod fingerprint;
pub mod ledger;
pub mod pipeline;
pub mod recorder;
pub mod signer;
