//! Performance benchmarks for request intake and matching sweeps

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use skillqueue::config::MatchmakingSettings;
use skillqueue::matchmaking::MatchEngine;
use skillqueue::types::MatchRequest;

const NOW: i64 = 1_700_000_000;

fn bench_request(i: usize) -> MatchRequest {
    MatchRequest {
        player_id: format!("player_{}", i),
        skill: 800 + ((i * 37) % 1200) as i64,
        difficulty: ["easy", "medium", "hard"][i % 3].to_string(),
        duration: ["10", "20", "30"][(i / 3) % 3].to_string(),
        timestamp: NOW - (i % 60) as i64,
    }
}

fn filled_engine(players: usize) -> MatchEngine {
    let mut engine =
        MatchEngine::new(&MatchmakingSettings::default()).expect("default settings are valid");
    for i in 0..players {
        let _ = engine.enqueue(bench_request(i), NOW);
    }
    engine
}

fn bench_enqueue(c: &mut Criterion) {
    let mut engine = filled_engine(10_000);
    let mut next = 10_000;

    c.bench_function("enqueue_into_10k", |b| {
        b.iter(|| {
            next += 1;
            black_box(engine.enqueue(bench_request(next), NOW))
        })
    });
}

fn bench_resubmit(c: &mut Criterion) {
    let mut engine = filled_engine(10_000);
    let mut round = 0;

    c.bench_function("resubmit_existing_player", |b| {
        b.iter(|| {
            round += 1;
            let mut request = bench_request(42);
            request.skill += round % 50;
            black_box(engine.enqueue(request, NOW))
        })
    });
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");

    for players in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(players), &players, |b, &n| {
            b.iter_batched(
                || filled_engine(n),
                |mut engine| black_box(engine.sweep(NOW)),
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_resubmit, bench_sweep);
criterion_main!(benches);
