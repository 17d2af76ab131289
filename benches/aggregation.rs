//! Benchmarks for the per-task join
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use modelsync::model::events::{LegEnvelope, LegEvent};
use modelsync::model::leg::{LegId, LegPayload};
use modelsync::model::task_id::TaskId;
use modelsync::services::upload_waiter::{combined_progress, Aggregation};

fn started_aggregation(task_id: TaskId, legs: &[LegId]) -> Aggregation {
    let mut aggregation = Aggregation::new(task_id);
    for leg in legs {
        aggregation.register(leg, task_id);
    }
    aggregation.begin();
    aggregation
}

/// Progress reports from every leg in round robin, then a success from each
fn leg_reports(task_id: TaskId, legs: &[LegId], steps: usize) -> Vec<LegEnvelope> {
    let mut envelopes = Vec::with_capacity(legs.len() * (steps + 1));
    for step in 0..steps {
        for leg in legs {
            envelopes.push(LegEnvelope {
                task_id,
                leg: leg.clone(),
                event: LegEvent::Progress {
                    percent: step as f64 * 100.0 / steps as f64,
                    message: "Uploading model".to_string(),
                },
            });
        }
    }
    for leg in legs {
        envelopes.push(LegEnvelope {
            task_id,
            leg: leg.clone(),
            event: LegEvent::Succeeded(LegPayload::new("model", vec!["image".to_string()])),
        });
    }
    envelopes
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");

    for legs in [2usize, 8, 32] {
        let leg_ids: Vec<LegId> = (0..legs).map(|i| LegId::new(format!("leg-{}", i))).collect();
        let task_id = TaskId::new();
        let reports = leg_reports(task_id, &leg_ids, 100);

        group.bench_with_input(BenchmarkId::new("apply_until_uploaded", legs), &legs, |b, _| {
            b.iter_batched(
                || (started_aggregation(task_id, &leg_ids), reports.clone()),
                |(mut aggregation, reports)| {
                    for envelope in reports {
                        black_box(aggregation.apply(envelope));
                    }
                    aggregation
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_combined_progress(c: &mut Criterion) {
    let mut group = c.benchmark_group("combined_progress");

    for legs in [2usize, 64, 1024] {
        let values: Vec<f64> = (0..legs).map(|i| (i % 101) as f64).collect();
        group.bench_with_input(BenchmarkId::from_parameter(legs), &values, |b, values| {
            b.iter(|| combined_progress(black_box(values.iter().copied())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_join, bench_combined_progress);
criterion_main!(benches);
