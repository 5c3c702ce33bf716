//! Cryptographic operation benchmarks.
//!
//! Measures per-chunk seal/open cost for each method and the throughput of
//! the encrypt and decrypt stream hooks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ssrelay::crypto::{derive_subkey, evp_bytes_to_key, AeadCipher, CipherKind, CryptoContext};
use ssrelay::protocol::MAX_CHUNK_SIZE;
use ssrelay::{ByteBuffer, ProtocolHook};

fn bench_seal(c: &mut Criterion) {
    let plaintext = vec![0u8; MAX_CHUNK_SIZE];

    let mut group = c.benchmark_group("seal_max_chunk");
    group.throughput(Throughput::Bytes(MAX_CHUNK_SIZE as u64));

    for kind in CipherKind::ALL {
        let key = vec![0x42u8; kind.key_len()];
        group.bench_function(BenchmarkId::from_parameter(kind.name()), |b| {
            let mut cipher = AeadCipher::new(kind, &key).unwrap();
            b.iter(|| black_box(cipher.seal(&plaintext, b"").unwrap()))
        });
    }

    group.finish();
}

fn bench_open(c: &mut Criterion) {
    let plaintext = vec![0u8; MAX_CHUNK_SIZE];

    let mut group = c.benchmark_group("open_max_chunk");
    group.throughput(Throughput::Bytes(MAX_CHUNK_SIZE as u64));

    for kind in CipherKind::ALL {
        let key = vec![0x42u8; kind.key_len()];
        group.bench_function(BenchmarkId::from_parameter(kind.name()), |b| {
            // Each open consumes a nonce, so pair every open with a fresh seal
            let mut sender = AeadCipher::new(kind, &key).unwrap();
            let mut receiver = AeadCipher::new(kind, &key).unwrap();
            b.iter(|| {
                let sealed = sender.seal(&plaintext, b"").unwrap();
                black_box(receiver.open(&sealed, b"").unwrap())
            })
        });
    }

    group.finish();
}

fn bench_key_derivation(c: &mut Criterion) {
    let master = evp_bytes_to_key(b"benchmark-password", 32);
    let salt = [0x24u8; 32];

    c.bench_function("evp_bytes_to_key_32", |b| {
        b.iter(|| black_box(evp_bytes_to_key(b"benchmark-password", 32)))
    });

    c.bench_function("hkdf_sha1_subkey_32", |b| {
        b.iter(|| black_box(derive_subkey(&master, &salt, 32).unwrap()))
    });
}

fn bench_stream_hooks(c: &mut Criterion) {
    let ctx = CryptoContext::from_password(CipherKind::ChaCha20Poly1305, "benchmark");
    let payload = vec![0x5au8; 64 * 1024];

    let mut group = c.benchmark_group("stream_hooks");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("encrypt_64k", |b| {
        let mut enc = ProtocolHook::encryptor(&ctx).unwrap();
        b.iter(|| {
            let mut buf = ByteBuffer::from(&payload[..]);
            black_box(enc.process(&mut buf).unwrap())
        })
    });

    group.bench_function("encrypt_decrypt_64k", |b| {
        let mut enc = ProtocolHook::encryptor(&ctx).unwrap();
        let mut dec = ProtocolHook::decryptor(&ctx);
        b.iter(|| {
            let mut buf = ByteBuffer::from(&payload[..]);
            enc.process(&mut buf).unwrap();
            black_box(dec.process(&mut buf).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_seal, bench_open, bench_key_derivation, bench_stream_hooks);

criterion_main!(benches);
