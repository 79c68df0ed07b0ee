use std::time::Duration;

use aggregate_lock::InMemoryAggregateLock;
use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    AggregateDefinition, CommandDefinition, Domain, DomainConfig, EventDefinition,
    InMemoryPublisher, sourcing,
};
use event_store::{AggregateQuery, EventStore, InMemoryEventStore};
use serde_json::{Value, json};

fn cart() -> AggregateDefinition {
    AggregateDefinition::builder("sale", "cart")
        .defaults(json!({"count": 0}))
        .command(CommandDefinition::new("addItem", |command, ctx| {
            ctx.apply("itemAdded", command.payload.clone())
        }))
        .event(EventDefinition::new("itemAdded", |_, model| {
            let count = model.get("count").and_then(Value::as_u64).unwrap_or(0);
            model.set("count", json!(count + 1));
        }))
        .build()
}

async fn create_domain(store: InMemoryEventStore) -> Domain<InMemoryEventStore, InMemoryAggregateLock> {
    Domain::builder(store, InMemoryAggregateLock::new(), InMemoryPublisher::new())
        .config(DomainConfig::default().with_worker_id("bench"))
        .aggregate(cart())
        .build()
        .await
        .unwrap()
}

fn add_item(aggregate_id: &str) -> Value {
    json!({
        "name": "addItem",
        "aggregate": {"id": aggregate_id, "name": "cart"},
        "context": {"name": "sale"},
        "payload": {"sku": "SKU-BENCH"}
    })
}

fn bench_new_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let domain = rt.block_on(create_domain(InMemoryEventStore::new()));

    c.bench_function("domain/command_on_new_aggregate", |b| {
        b.iter(|| {
            rt.block_on(async {
                let aggregate_id = AggregateId::new();
                domain.handle(&add_item(aggregate_id.as_str())).await.unwrap();
            });
        });
    });
}

fn bench_existing_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let domain = rt.block_on(create_domain(InMemoryEventStore::new()));

    c.bench_function("domain/command_on_existing_aggregate", |b| {
        b.iter(|| {
            rt.block_on(async {
                domain.handle(&add_item("cart-bench")).await.unwrap();
            });
        });
    });
}

fn bench_replay(c: &mut Criterion, events: usize) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let definition = cart();
    let query = AggregateQuery::new("sale", "cart", "cart-replay");

    rt.block_on(async {
        let domain = create_domain(store.clone()).await;
        for _ in 0..events {
            domain.handle(&add_item("cart-replay")).await.unwrap();
        }
    });
    let history = rt.block_on(store.get_events(&query)).unwrap();

    c.bench_function(&format!("domain/replay_{events}_events"), |b| {
        b.iter(|| {
            let mut model = definition.new_model(&query.aggregate_id);
            sourcing::load_from_history(&definition, &mut model, None, &history, Duration::ZERO)
                .unwrap();
        });
    });
}

fn bench_replay_50(c: &mut Criterion) {
    bench_replay(c, 50);
}

fn bench_replay_100(c: &mut Criterion) {
    bench_replay(c, 100);
}

criterion_group!(
    benches,
    bench_new_aggregate,
    bench_existing_aggregate,
    bench_replay_50,
    bench_replay_100,
);
criterion_main!(benches);
