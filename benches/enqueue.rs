use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use viewkeeper::model::{Source, ViewEvent};
use viewkeeper::queue::ViewQueue;

fn distinct_views(c: &mut Criterion) {
    let events: Vec<ViewEvent> = (0..1000)
        .map(|viewer| ViewEvent::new("post", format!("anon-{viewer}"), "203.0.113.7", Source::App))
        .collect();

    c.bench_function("enqueue 1000 distinct views", |b| {
        b.iter_batched(
            || (ViewQueue::new(10_000), events.clone()),
            |(queue, events)| {
                for event in events {
                    black_box(queue.enqueue(event));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn repeated_views(c: &mut Criterion) {
    let queue = ViewQueue::new(10_000);
    let event = ViewEvent::new("post", "anon-1", "203.0.113.7", Source::App);

    c.bench_function("coalesce a repeated view", |b| {
        b.iter(|| black_box(queue.enqueue(event.clone())))
    });
}

fn full_queue(c: &mut Criterion) {
    let queue = ViewQueue::new(100);
    let mut viewer = 0u64;

    c.bench_function("enqueue into a full queue", |b| {
        b.iter(|| {
            viewer += 1;
            black_box(queue.enqueue(ViewEvent::new("post", viewer.to_string(), "::1", Source::Widget)))
        })
    });
}

criterion_group!(benches, distinct_views, repeated_views, full_queue);
criterion_main!(benches);
