use criterion::{criterion_group, criterion_main, Criterion};
use guardian_core::{
    fingerprint,
    ledger::{AnchorRecord, LedgerBackend, MmrLedger},
    signer::AnchorSigner,
};

fn bench_fingerprint(c: &mut Criterion) {
    // 约等于一段 8MB 的短视频
    let video = vec![0x5au8; 8 * 1024 * 1024];

    c.bench_function("fingerprint_8mb_media", |b| {
        b.iter(|| fingerprint::fingerprint(&video))
    });
}

fn bench_ledger_append(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let ledger = MmrLedger::temporary().unwrap();
    let signer = AnchorSigner::generate();
    let mut timestamp = 0i64;

    c.bench_function("mmr_ledger_append", |b| {
        b.to_async(&runtime).iter(|| {
            // 每次时间戳不同，避免命中幂等分支
            timestamp += 1;
            let tx = signer
                .sign(AnchorRecord {
                    fingerprint: fingerprint::fingerprint(&timestamp.to_be_bytes()).to_string(),
                    timestamp,
                    location: "0,0".to_string(),
                })
                .unwrap();
            let ledger = &ledger;
            async move {
                ledger.submit(&tx).await.unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_fingerprint, bench_ledger_append);
criterion_main!(benches);
