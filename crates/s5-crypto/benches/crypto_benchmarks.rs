//! Benchmarks for s5-crypto

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use s5_crypto::{
    cid::{Cid, EncryptedCid},
    hashing::{hash, IncrementalHasher},
    keys::EncryptionKey,
    streaming::ChunkDecryptor,
    symmetric::ChunkCipher,
    CHUNK_SIZE,
};

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");

    for size in [1024, 64 * 1024, CHUNK_SIZE, 4 * 1024 * 1024].iter() {
        let data = vec![0u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("blake3", size), &data, |b, data| {
            b.iter(|| hash(data))
        });

        group.bench_with_input(
            BenchmarkId::new("blake3-incremental", size),
            &data,
            |b, data| {
                b.iter(|| {
                    let mut hasher = IncrementalHasher::new();
                    for chunk in data.chunks(16 * 1024) {
                        hasher.update(chunk);
                    }
                    hasher.finalize()
                })
            },
        );
    }

    group.finish();
}

fn bench_chunk_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_cipher");
    let key = EncryptionKey::generate();
    let cipher = ChunkCipher::new(&key);

    let data = vec![0u8; CHUNK_SIZE];
    group.throughput(Throughput::Bytes(CHUNK_SIZE as u64));

    group.bench_function("xchacha20-poly1305-encrypt", |b| {
        b.iter(|| cipher.encrypt_chunk(0, &data).unwrap())
    });

    let sealed = cipher.encrypt_chunk(0, &data).unwrap();
    group.bench_function("xchacha20-poly1305-decrypt", |b| {
        b.iter(|| cipher.decrypt_chunk(0, &sealed).unwrap())
    });

    group.finish();
}

fn bench_decryptor(c: &mut Criterion) {
    let mut group = c.benchmark_group("decryptor");
    let key = EncryptionKey::generate();
    let cipher = ChunkCipher::new(&key);

    let chunks = 8u32;
    let ciphertext: Vec<u8> = (0..chunks)
        .flat_map(|i| cipher.encrypt_chunk(i, &vec![1u8; CHUNK_SIZE]).unwrap())
        .collect();
    group.throughput(Throughput::Bytes(CHUNK_SIZE as u64 * chunks as u64));

    for split in [16 * 1024, 64 * 1024].iter() {
        group.bench_with_input(BenchmarkId::new("push", split), split, |b, &split| {
            b.iter(|| {
                let mut decryptor = ChunkDecryptor::new(&key);
                for piece in ciphertext.chunks(split) {
                    decryptor.push(piece).unwrap();
                }
                decryptor.finish().unwrap()
            })
        });
    }

    group.finish();
}

fn bench_cid(c: &mut Criterion) {
    let mut group = c.benchmark_group("cid");
    let original = Cid::from_hash(hash(b"plain"), 40 * 1024 * 1024);
    let encrypted = EncryptedCid::new(
        hash(b"cipher").to_multihash(),
        EncryptionKey::generate(),
        0,
        original,
    );
    let encoded = encrypted.encode();

    group.bench_function("encode", |b| b.iter(|| encrypted.encode()));
    group.bench_function("decode", |b| b.iter(|| EncryptedCid::decode(&encoded).unwrap()));

    group.finish();
}

criterion_group!(benches, bench_hashing, bench_chunk_cipher, bench_decryptor, bench_cid);
criterion_main!(benches);
