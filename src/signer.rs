use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng; // 用于生成私钥的安全随机数生成器
use std::fs;
use std::path::Path;
use tracing::info;

use crate::ledger::{AnchorRecord, SignedAnchor};

/// 签名器模块
/// 负责对上链锚定交易进行签名，账本据此确认交易来自本服务
pub struct AnchorSigner {
    keypair: SigningKey,
}

impl AnchorSigner {
    /// 随机生成一把新钥匙 (测试 / 临时部署)
    pub fn generate() -> Self {
        // Ed25519 基于 Twisted Edwards Curve (Curve25519)
        let keypair = SigningKey::generate(&mut OsRng);
        Self { keypair }
    }

    /// 从文件加载私钥，不存在则生成并落盘
    ///
    /// 文件内容是 32 字节的原始私钥种子。
    pub fn load_or_generate(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let bytes = fs::read(path)?;
            let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                anyhow::anyhow!("key file {} must hold 32 bytes, found {}", path.display(), bytes.len())
            })?;
            return Ok(Self {
                keypair: SigningKey::from_bytes(&seed),
            });
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let signer = Self::generate();
        fs::write(path, signer.keypair.to_bytes())?;
        info!(path = %path.display(), "🔑 已生成新的锚定签名密钥");
        Ok(signer)
    }

    /// 获取公钥（用于分发给审计方进行验签）
    pub fn public_key(&self) -> VerifyingKey {
        self.keypair.verifying_key()
    }

    /// 对锚定记录签名，得到可提交的交易
    pub fn sign(&self, record: AnchorRecord) -> anyhow::Result<SignedAnchor> {
        // bcs 是定序编码，同一条记录永远得到同一串字节
        let payload = bcs::to_bytes(&record)?;
        let signature = self.keypair.sign(&payload);

        Ok(SignedAnchor {
            record,
            public_key: hex::encode(self.public_key().to_bytes()),
            signature: hex::encode(signature.to_bytes()),
        })
    }

    /// 静态验证函数（账本与外部验证者使用）
    pub fn verify(tx: &SignedAnchor) -> anyhow::Result<bool> {
        let key_bytes: [u8; 32] = hex::decode(&tx.public_key)?
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("public key must be 32 bytes"))?;
        let sig_bytes: [u8; 64] = hex::decode(&tx.signature)?
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("signature must be 64 bytes"))?;

        let key = VerifyingKey::from_bytes(&key_bytes)?;
        let signature = Signature::from_bytes(&sig_bytes);
        let payload = bcs::to_bytes(&tx.record)?;

        match key.verify(&payload, &signature) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AnchorRecord {
        AnchorRecord {
            fingerprint: "ab".repeat(32),
            timestamp: 1_700_000_000,
            location: "0,0".into(),
        }
    }

    #[test]
    fn signed_anchor_verifies() {
        let signer = AnchorSigner::generate();
        let tx = signer.sign(record()).unwrap();
        assert!(AnchorSigner::verify(&tx).unwrap());
    }

    #[test]
    fn tampered_record_fails() {
        let signer = AnchorSigner::generate();
        let mut tx = signer.sign(record()).unwrap();
        tx.record.timestamp += 1;
        assert!(!AnchorSigner::verify(&tx).unwrap());
    }

    #[test]
    fn key_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/guardian.key");

        let first = AnchorSigner::load_or_generate(&path).unwrap();
        let second = AnchorSigner::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());

        fs::write(&path, b"short").unwrap();
        assert!(AnchorSigner::load_or_generate(&path).is_err());
    }
}
