use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use wavelet_publisher::config::MAX_RECENTLY_PLAYED;
use wavelet_publisher::db::DedupCache;
use wavelet_publisher::models::{dedup_key, ListenedEvent};

fn event(user_id: &str, index: i64) -> ListenedEvent {
    let track_id = format!("track{}", index);
    let played_at = 1_709_294_400 + index * 60;
    ListenedEvent {
        key: dedup_key(user_id, &track_id, played_at),
        user_id: user_id.to_string(),
        user_display_name: None,
        track_id,
        played_at,
        name: "Bench".to_string(),
        artist_id: None,
        artist_name: None,
        duration_ms: 180_000,
        preview_url: None,
        acousticness: 0.5,
        danceability: 0.5,
        energy: 0.5,
        instrumentalness: 0.0,
        key_signature: 0,
        liveness: 0.1,
        loudness: -6.0,
        mode: 1,
        speechiness: 0.05,
        tempo: 120.0,
        time_signature: 4,
        valence: 0.5,
    }
}

fn benchmark_dedup_cache(c: &mut Criterion) {
    let capacity = MAX_RECENTLY_PLAYED as usize;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Failed to build runtime");

    // A full cache, as it looks after a user has been polled for a while
    let cache = DedupCache::new(capacity).expect("Failed to create cache");
    let history: Vec<ListenedEvent> = (0..capacity as i64).map(|i| event("user", i)).collect();
    runtime.block_on(cache.record("user", &history));

    // One poll's worth of plays: half already seen, half new
    let poll: Vec<ListenedEvent> = (30..50).chain(50..60).map(|i| event("user", i)).collect();

    let mut group = c.benchmark_group("dedup_cache");

    group.bench_function("filter_poll_against_full_cache", |b| {
        b.iter(|| {
            let seen = cache.unique_keys(black_box("user"));
            poll.iter().filter(|e| !seen.contains(&e.key)).count()
        })
    });

    let mut next = capacity as i64;
    group.bench_function("record_batch_with_eviction", |b| {
        b.iter(|| {
            let batch: Vec<ListenedEvent> = (next..next + 10).map(|i| event("user", i)).collect();
            next += 10;
            runtime.block_on(cache.record("user", black_box(&batch)));
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_dedup_cache);
criterion_main!(benches);
