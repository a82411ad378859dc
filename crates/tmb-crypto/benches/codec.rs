use tmb_crypto::{open_chunk, seal_chunk, ChunkedCipher, VideoKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn bench_key() -> VideoKey {
    VideoKey::from_bytes([0xABu8; 32])
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_seal_chunk(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| seal_chunk(divan::black_box(&key), 0, true, divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_open_chunk(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let sealed = seal_chunk(&key, 0, true, &make_data(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| open_chunk(divan::black_box(&key), 0, true, divan::black_box(&sealed)).unwrap());
}

#[divan::bench(args = [4194304])]
fn bench_encrypt_stream(bencher: divan::Bencher, size: usize) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let cipher = ChunkedCipher::new(bench_key(), 1024 * 1024).unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            rt.block_on(async {
                let mut reader = data.as_slice();
                let mut out = Vec::with_capacity(size + 4096);
                cipher.encrypt_stream(&mut reader, &mut out).await.unwrap()
            })
        });
}

fn main() {
    divan::main();
}
