use async_trait::async_trait;
use ckb_merkle_mountain_range::{util::MemStore, Merge, MerkleProof, MMR};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::Transactional;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{LedgerBackend, LedgerError, SignedAnchor};
use crate::signer::AnchorSigner;

/// 模块：本地 MMR 账本
///
/// **职责**: 按时间顺序保存每一笔锚定交易的哈希，只追加、不修改，并能开具存在性证明。
///
/// - **叶子**: 交易 id (签名交易 bcs 编码的 blake3 哈希)。
/// - **持久化**: 叶子与交易明细在同一个 sled 事务里写入；启动时按序回放叶子重建内存中的 MMR。
/// - **确认**: `flush_async` 落盘完成即视为确认。

/// 合并策略 (Merge Strategy)
///
/// 父节点哈希 = Hash(左孩子 || 右孩子)
pub struct MergeBlake3;

impl Merge for MergeBlake3 {
    type Item = [u8; 32];

    fn merge(lhs: &Self::Item, rhs: &Self::Item) -> ckb_merkle_mountain_range::Result<Self::Item> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(lhs);
        hasher.update(rhs);
        Ok(*hasher.finalize().as_bytes())
    }
}

/// 交易明细 (按交易 id 索引)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub leaf_index: u64,
    pub leaf_pos: u64,
    pub tx: SignedAnchor,
}

/// 存在性证明，审计方可以离线复算
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerProof {
    pub tx_hash: String,
    pub leaf_pos: u64,
    pub mmr_size: u64,
    pub root: String,
    pub proof_items: Vec<String>,
    pub tx: SignedAnchor,
}

impl LedgerProof {
    /// 用证明路径重算 Root，并与声明的 Root 比对
    pub fn verify(&self) -> Result<bool, LedgerError> {
        let leaf = self.tx.tx_hash()?;
        if hex::encode(leaf) != self.tx_hash {
            return Ok(false);
        }

        let root = decode_hash(&self.root)?;
        let items = self
            .proof_items
            .iter()
            .map(|item| decode_hash(item))
            .collect::<Result<Vec<_>, _>>()?;

        let proof = MerkleProof::<[u8; 32], MergeBlake3>::new(self.mmr_size, items);
        proof
            .verify(root, vec![(self.leaf_pos, leaf)])
            .map_err(mmr_err)
    }
}

/// 内存中的 MMR 状态，只在锁内访问
struct MmrState {
    store: MemStore<[u8; 32]>,
    /// MMR 树大小，位运算路由的坐标系
    mmr_size: u64,
    leaf_count: u64,
}

impl MmrState {
    fn new() -> Self {
        Self {
            store: MemStore::default(),
            mmr_size: 0,
            leaf_count: 0,
        }
    }

    /// 按 leaf_index 顺序回放磁盘上的叶子
    fn replay(leaves: &sled::Tree) -> Result<Self, LedgerError> {
        let mut state = Self::new();
        for item in leaves.iter() {
            let (_, value) = item?;
            let leaf: [u8; 32] = value
                .as_ref()
                .try_into()
                .map_err(|_| LedgerError::Encoding(format!("corrupt ledger leaf ({} bytes)", value.len())))?;
            state.push(leaf)?;
        }
        Ok(state)
    }

    fn push(&mut self, leaf: [u8; 32]) -> Result<u64, LedgerError> {
        let mut mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        let pos = mmr.push(leaf).map_err(mmr_err)?;
        let size = mmr.mmr_size();
        mmr.commit().map_err(mmr_err)?;

        self.mmr_size = size;
        self.leaf_count += 1;
        Ok(pos)
    }

    fn root(&self) -> Result<[u8; 32], LedgerError> {
        let mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        mmr.get_root().map_err(mmr_err)
    }

    fn proof(&self, pos: u64) -> Result<MerkleProof<[u8; 32], MergeBlake3>, LedgerError> {
        let mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        mmr.gen_proof(vec![pos]).map_err(mmr_err)
    }
}

pub struct MmrLedger {
    db: sled::Db,
    /// leaf_index (大端 u64) -> 叶子哈希
    leaves: sled::Tree,
    /// 交易 id -> LedgerEntry (JSON)
    entries: sled::Tree,
    state: Mutex<MmrState>,
}

impl MmrLedger {
    /// 打开 (或新建) 账本目录并回放已有叶子
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// 临时账本，进程退出即删除
    pub fn temporary() -> anyhow::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> anyhow::Result<Self> {
        let leaves = db.open_tree("ledger_leaves")?;
        let entries = db.open_tree("ledger_entries")?;

        let state = MmrState::replay(&leaves)?;
        debug!(leaves = state.leaf_count, mmr_size = state.mmr_size, "账本回放完成");

        Ok(Self {
            db,
            leaves,
            entries,
            state: Mutex::new(state),
        })
    }

    pub async fn len(&self) -> u64 {
        self.state.lock().await.leaf_count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 当前 Root (空账本没有 Root)
    pub async fn root(&self) -> Result<Option<String>, LedgerError> {
        let state = self.state.lock().await;
        if state.leaf_count == 0 {
            return Ok(None);
        }
        Ok(Some(hex::encode(state.root()?)))
    }

    pub fn entry(&self, tx_hash: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let Ok(key) = decode_hash(tx_hash) else {
            return Ok(None);
        };
        match self.entries.get(key)? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| LedgerError::Encoding(e.to_string())),
            None => Ok(None),
        }
    }

    /// 开具存在性证明
    ///
    /// 审计员问："这笔锚定真的在这个 Root 里吗？" 返回回放计算所需的兄弟 / 山峰哈希。
    pub async fn proof(&self, tx_hash: &str) -> Result<Option<LedgerProof>, LedgerError> {
        let Some(entry) = self.entry(tx_hash)? else {
            return Ok(None);
        };

        let state = self.state.lock().await;
        let root = state.root()?;
        let proof = state.proof(entry.leaf_pos)?;

        Ok(Some(LedgerProof {
            tx_hash: tx_hash.to_lowercase(),
            leaf_pos: entry.leaf_pos,
            mmr_size: proof.mmr_size(),
            root: hex::encode(root),
            proof_items: proof.proof_items().iter().map(hex::encode).collect(),
            tx: entry.tx,
        }))
    }
}

#[async_trait]
impl LedgerBackend for MmrLedger {
    async fn submit(&self, tx: &SignedAnchor) -> Result<String, LedgerError> {
        // 签名不对的交易直接拒绝，相当于链上验签失败
        if !AnchorSigner::verify(tx).map_err(|_| LedgerError::InvalidSignature)? {
            return Err(LedgerError::InvalidSignature);
        }

        let leaf = tx.tx_hash()?;
        let tx_hash = hex::encode(leaf);

        {
            let mut state = self.state.lock().await;

            // 同一笔交易重复提交：幂等返回
            if self.entries.contains_key(leaf)? {
                return Ok(tx_hash);
            }

            // 先在内存里生长，再把叶子与明细放进同一个事务落盘
            let leaf_index = state.leaf_count;
            let written = state.push(leaf).and_then(|leaf_pos| {
                let entry = LedgerEntry {
                    leaf_index,
                    leaf_pos,
                    tx: tx.clone(),
                };
                let raw = serde_json::to_vec(&entry).map_err(|e| LedgerError::Encoding(e.to_string()))?;
                self.persist(leaf_index, &leaf, &raw)?;
                Ok(leaf_pos)
            });

            let leaf_pos = match written {
                Ok(leaf_pos) => leaf_pos,
                Err(e) => {
                    self.restore(&mut state)?;
                    return Err(e);
                }
            };

            info!(%tx_hash, leaf_pos, "⛓️ 锚定交易已入账");
        }

        // 落盘即确认
        self.db.flush_async().await?;
        Ok(tx_hash)
    }
}

impl MmrLedger {
    /// 叶子索引与交易明细要么都写入，要么都不写
    fn persist(&self, leaf_index: u64, leaf: &[u8; 32], entry: &[u8]) -> Result<(), LedgerError> {
        (&self.leaves, &self.entries)
            .transaction(|(leaves, entries)| -> ConflictableTransactionResult<(), ()> {
                leaves.insert(&leaf_index.to_be_bytes()[..], &leaf[..])?;
                entries.insert(&leaf[..], entry)?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => LedgerError::Storage(e),
                TransactionError::Abort(()) => LedgerError::Mmr("ledger write aborted".to_string()),
            })
    }

    /// 写入失败后丢弃内存中的新叶子，以磁盘为准重建
    fn restore(&self, state: &mut MmrState) -> Result<(), LedgerError> {
        *state = MmrState::replay(&self.leaves)?;
        Ok(())
    }
}

fn mmr_err(e: ckb_merkle_mountain_range::Error) -> LedgerError {
    LedgerError::Mmr(e.to_string())
}

fn decode_hash(hex_str: &str) -> Result<[u8; 32], LedgerError> {
    hex::decode(hex_str)
        .map_err(|e| LedgerError::Encoding(e.to_string()))?
        .as_slice()
        .try_into()
        .map_err(|_| LedgerError::Encoding("hash must be 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AnchorRecord;

    fn signed(signer: &AnchorSigner, fingerprint: &str, timestamp: i64) -> SignedAnchor {
        signer
            .sign(AnchorRecord {
                fingerprint: fingerprint.to_string(),
                timestamp,
                location: "0,0".into(),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn append_and_prove() {
        let ledger = MmrLedger::temporary().unwrap();
        let signer = AnchorSigner::generate();
        assert!(ledger.root().await.unwrap().is_none());

        let mut hashes = Vec::new();
        for i in 0..11 {
            let tx = signed(&signer, &format!("{:064x}", i), 1_700_000_000 + i);
            hashes.push(ledger.submit(&tx).await.unwrap());
        }
        assert_eq!(ledger.len().await, 11);

        let root = ledger.root().await.unwrap().unwrap();
        for hash in &hashes {
            let proof = ledger.proof(hash).await.unwrap().unwrap();
            assert_eq!(proof.root, root);
            assert!(proof.verify().unwrap());
        }
    }

    #[tokio::test]
    async fn tampered_proof_fails() {
        let ledger = MmrLedger::temporary().unwrap();
        let signer = AnchorSigner::generate();
        let mut last = String::new();
        for i in 0..4 {
            last = ledger.submit(&signed(&signer, "ff", i)).await.unwrap();
        }

        let mut proof = ledger.proof(&last).await.unwrap().unwrap();
        proof.tx.record.location = "51.5,-0.1".into();
        assert!(!proof.verify().unwrap());
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let ledger = MmrLedger::temporary().unwrap();
        let mut tx = signed(&AnchorSigner::generate(), "aa", 1);
        tx.record.fingerprint = "bb".into();

        assert!(matches!(
            ledger.submit(&tx).await,
            Err(LedgerError::InvalidSignature)
        ));
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn resubmission_is_idempotent() {
        let ledger = MmrLedger::temporary().unwrap();
        let tx = signed(&AnchorSigner::generate(), "aa", 1);

        let first = ledger.submit(&tx).await.unwrap();
        let second = ledger.submit(&tx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_in_sync_with_disk() {
        let dir = tempfile::tempdir().unwrap();
        let signer = AnchorSigner::generate();
        let ledger = MmrLedger::open(dir.path()).unwrap();
        ledger.submit(&signed(&signer, "01", 1)).await.unwrap();
        let root_before = ledger.root().await.unwrap();

        // 内存里多出一片没落盘的叶子，相当于事务写入失败
        {
            let mut state = ledger.state.lock().await;
            state.push([0xee; 32]).unwrap();
            assert_eq!(state.leaf_count, 2);
            ledger.restore(&mut state).unwrap();
        }
        assert_eq!(ledger.len().await, 1);
        assert_eq!(ledger.root().await.unwrap(), root_before);

        let hash = ledger.submit(&signed(&signer, "02", 2)).await.unwrap();
        let root = ledger.root().await.unwrap();
        drop(ledger);

        // 重开后叶子与明细一一对应
        let reopened = MmrLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.len().await, 2);
        assert_eq!(reopened.leaves.len(), reopened.entries.len());
        assert_eq!(reopened.root().await.unwrap(), root);
        let entry = reopened.entry(&hash).unwrap().unwrap();
        assert_eq!(entry.leaf_index, 1);
        assert!(reopened.proof(&hash).await.unwrap().unwrap().verify().unwrap());
    }

    #[tokio::test]
    async fn replays_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let signer = AnchorSigner::generate();

        let (hash, root) = {
            let ledger = MmrLedger::open(dir.path()).unwrap();
            ledger.submit(&signed(&signer, "01", 1)).await.unwrap();
            let hash = ledger.submit(&signed(&signer, "02", 2)).await.unwrap();
            (hash, ledger.root().await.unwrap())
        };

        let reopened = MmrLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.len().await, 2);
        assert_eq!(reopened.root().await.unwrap(), root);
        assert!(reopened.proof(&hash).await.unwrap().unwrap().verify().unwrap());
        assert!(reopened.proof("not-hex").await.unwrap().is_none());
    }
}
