use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sagabus_core::{ConfigResult, PropertyTable, SagaData, SagaMetadata};
use sagabus_infra::{
    CorrelationResolver, HandlerRegistry, IncomingContext, InMemorySagaStorage, SagaCoordinator,
    SagaPipeline,
};
use sagabus_messages::{
    Correlator, Handles, Message, MessageContext, MessageType, Saga, SagaInstance, SagaType,
    TypedMessage,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Customer {
    email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BasketData {
    meta: SagaMetadata,
    basket_id: String,
    customer: Customer,
    lines: i64,
}

impl SagaData for BasketData {
    const DATA_TYPE: &'static str = "bench.basket_data";

    fn metadata(&self) -> &SagaMetadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut SagaMetadata {
        &mut self.meta
    }

    fn properties(table: PropertyTable<Self>) -> PropertyTable<Self> {
        let customer = PropertyTable::<Customer>::new().field(
            "Email",
            |c: &Customer| &c.email,
            |c: &mut Customer| &mut c.email,
        );
        table
            .field("BasketId", |d| &d.basket_id, |d| &mut d.basket_id)
            .nested("Customer", |d| &d.customer, |d| &mut d.customer, customer)
    }
}

#[derive(Debug)]
struct LineAdded {
    basket_id: String,
}

sagabus_messages::message!(LineAdded => "bench.line_added");

struct BasketSaga;

#[async_trait]
impl Saga for BasketSaga {
    type Data = BasketData;
    const SAGA_TYPE: &'static str = "bench.basket_saga";
    const INITIATED_BY: &'static [MessageType] = &[LineAdded::MESSAGE_TYPE];

    fn correlate(c: &mut Correlator<BasketData>) -> ConfigResult<()> {
        c.correlate(|m: &LineAdded| m.basket_id.clone(), "BasketId")?;
        Ok(())
    }
}

#[async_trait]
impl Handles<LineAdded> for BasketSaga {
    async fn handle(
        &self,
        saga: &mut SagaInstance<BasketData>,
        _message: &LineAdded,
        _ctx: &MessageContext,
    ) -> anyhow::Result<()> {
        saga.lines += 1;
        Ok(())
    }
}

fn setup() -> (SagaPipeline, HandlerRegistry) {
    let resolver = Arc::new(CorrelationResolver::new());
    resolver.register::<BasketSaga>().unwrap();

    let mut registry = HandlerRegistry::new();
    registry.add_saga::<BasketSaga, LineAdded>(Arc::new(BasketSaga));

    let storage = Arc::new(InMemorySagaStorage::new());
    let pipeline = SagaPipeline::standard(SagaCoordinator::new(storage, resolver));
    (pipeline, registry)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn send(pipeline: &SagaPipeline, registry: &HandlerRegistry, basket_id: &str) {
    let message: Arc<dyn Message> = Arc::new(LineAdded {
        basket_id: basket_id.to_string(),
    });
    let invokers = registry.invokers_for(&message);
    let mut ctx = IncomingContext::new(message, MessageContext::default(), invokers);
    pipeline.process(&mut ctx).await.unwrap();
}

fn bench_correlation_lookup(c: &mut Criterion) {
    let resolver = CorrelationResolver::new();
    resolver.register::<BasketSaga>().unwrap();
    let saga_type = SagaType::of::<BasketSaga>();
    let message = LineAdded {
        basket_id: "basket-1".into(),
    };
    let ctx = MessageContext::default();

    c.bench_function("correlation_lookup_cached", |b| {
        b.iter(|| {
            let properties = resolver
                .properties_for(black_box(&saga_type), black_box(&message))
                .unwrap();
            black_box(properties[0].value_from(&ctx, &message))
        })
    });
}

fn bench_full_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("saga_full_cycle");

    group.bench_function("create_and_insert", |b| {
        let (pipeline, registry) = setup();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            rt.block_on(send(&pipeline, &registry, &format!("basket-{n}")));
        })
    });

    group.bench_function("load_handle_update", |b| {
        let (pipeline, registry) = setup();
        rt.block_on(send(&pipeline, &registry, "basket-hot"));
        b.iter(|| rt.block_on(send(&pipeline, &registry, black_box("basket-hot"))))
    });

    group.finish();
}

fn bench_message_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("saga_message_throughput");

    for instances in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(1_000));
        group.bench_with_input(
            BenchmarkId::from_parameter(instances),
            &instances,
            |b, &instances| {
                b.iter(|| {
                    let (pipeline, registry) = setup();
                    rt.block_on(async {
                        for i in 0..1_000 {
                            let basket = format!("basket-{}", i % instances);
                            send(&pipeline, &registry, &basket).await;
                        }
                    });
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_correlation_lookup,
    bench_full_cycle,
    bench_message_throughput
);
criterion_main!(benches);
