//! Benchmarks for sealing, transcoding and secure erasure

use std::fs;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relaybox_core::crypto::{decrypt_to_vec, encrypt_to_vec, generate_keypair};
use relaybox_core::envelope::seal;
use relaybox_core::{KeyMaterial, Metadata, RsaPublicKey, SecureEraser};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const SIZES: [usize; 3] = [1024, 64 * 1024, 1024 * 1024];

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Transcoding
// =============================================================================

fn bench_transcode(c: &mut Criterion) {
    let mut group = c.benchmark_group("transcode");
    let material = KeyMaterial::generate();

    for size in SIZES {
        let plaintext = payload(size);
        let ciphertext = encrypt_to_vec(&plaintext, &material).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &plaintext, |b, p| {
            b.iter(|| black_box(encrypt_to_vec(p, &material).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("decrypt", size), &ciphertext, |b, c| {
            b.iter(|| black_box(decrypt_to_vec(c, &material).unwrap()))
        });
    }

    group.finish();
}

// =============================================================================
// Sealing
// =============================================================================

fn bench_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal");
    group.sample_size(20);

    let secret = generate_keypair(2048).unwrap();
    let public = RsaPublicKey::from(&secret);
    let transport = KeyMaterial::generate();
    let metadata = Metadata::new().with("filename", "bench.bin");

    for size in SIZES {
        let uploaded = encrypt_to_vec(&payload(size), &transport).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &uploaded, |b, upload| {
            let dir = tempdir().unwrap();
            b.iter(|| {
                black_box(seal(dir.path(), &upload[..], &transport, &public, &metadata).unwrap())
            })
        });
    }

    group.finish();
}

// =============================================================================
// Secure Erasure
// =============================================================================

fn bench_erase(c: &mut Criterion) {
    let mut group = c.benchmark_group("erase");
    group.sample_size(20);

    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();

    for block_size in [4096usize, 8192, 65536] {
        let eraser = SecureEraser::new(block_size).unwrap();
        let path = dir.path().join(format!("erase-{}.bin", block_size));
        fs::write(&path, payload(1024 * 1024)).unwrap();
        group.throughput(Throughput::Bytes(1024 * 1024));

        group.bench_function(BenchmarkId::new("1MiB", block_size), |b| {
            b.iter(|| black_box(eraser.erase(&path, &cancel).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transcode, bench_seal, bench_erase);
criterion_main!(benches);
