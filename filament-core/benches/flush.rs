use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use filament_core::{App, ChangeSet, NodeId, Priority, ReactiveState};
use serde_json::json;

fn nodes(app: &App, count: usize) -> Vec<NodeId> {
    let doc = app.document();
    (0..count)
        .map(|_| {
            let node = doc.create_element("div");
            doc.append_child(doc.body(), node).unwrap();
            node
        })
        .collect()
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");

    for count in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("mixed_priorities", count), &count, |b, &count| {
            let app = App::new();
            let targets = nodes(&app, count);
            let priorities = [Priority::Low, Priority::Normal, Priority::High, Priority::Critical];

            b.iter(|| {
                for (i, node) in targets.iter().enumerate() {
                    let set = ChangeSet::new()
                        .text(i.to_string())
                        .class("odd", i % 2 == 1)
                        .style("width", format!("{i}px"));
                    app.scheduler().schedule_update(*node, set, priorities[i % priorities.len()]);
                }
                black_box(app.scheduler().flush());
                app.event_loop().run_microtasks();
            });
        });

        group.bench_with_input(BenchmarkId::new("batched_state_writes", count), &count, |b, &count| {
            let app = App::new();
            let targets = nodes(&app, count);
            let state = ReactiveState::new(json!({"rows": vec![0; count]}));
            for (i, node) in targets.iter().enumerate() {
                app.bind_path(&state, &format!("rows[{i}]"), *node, Priority::Normal, |change| {
                    ChangeSet::new().text(change.value.clone().unwrap_or_default().to_string())
                })
                .unwrap();
            }
            let rows = state.proxy().child("rows");

            b.iter(|| {
                app.scheduler().batch(|_| {
                    for i in 0..count {
                        rows.set(i, json!(i));
                    }
                });
                app.tick();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_flush);
criterion_main!(benches);
