use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use routekeeper::balancer::{Destination, LoadBalancer, RequestContext};
use routekeeper::mapping::MappingRuleBase;
use routekeeper::rules::DeclarativeRuleBase;
use routekeeper::template::UriTemplate;
use routekeeper::Dispatcher;
use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;

fn template_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("uri_template");

    let template = UriTemplate::compile("/api/{version}/users/{id}/{*rest}").unwrap();

    group.bench_function("match_hit", |b| {
        b.iter(|| black_box(template.matches("/api/v1/users/12345/orders/7")))
    });

    group.bench_function("match_miss", |b| {
        b.iter(|| black_box(template.matches("/web/index.html")))
    });

    let mut params = HashMap::new();
    params.insert("version".to_string(), "v1".to_string());
    params.insert("id".to_string(), "12345".to_string());

    group.bench_function("bind_non_strict", |b| {
        b.iter(|| black_box(template.bind_non_strict(&params)))
    });

    group.finish();
}

fn mapping_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapping_table");

    let base = MappingRuleBase::new(UriTemplate::compile("/api/{servicePath}").unwrap());
    let none = HashMap::new();
    for i in 0..1000 {
        let services = vec![format!("http://10.0.{}.{}:8080", i / 256, i % 256)];
        base.update_mapping_rules(false, &format!("/svc{}", i), &services, &none, None);
    }

    group.throughput(Throughput::Elements(1));

    group.bench_function("find_1000_routes", |b| {
        b.iter(|| black_box(base.find("/api/svc500/orders/17")))
    });

    group.bench_function("update_add_remove", |b| {
        let services = vec!["http://bench:80".to_string()];
        b.iter(|| {
            base.update_mapping_rules(false, "/bench", &services, &none, None);
            base.update_mapping_rules(true, "/bench", &services, &none, None);
        })
    });

    let dispatcher = Dispatcher::new(Arc::new(base), Arc::new(DeclarativeRuleBase::new()));
    group.bench_function("resolve_route", |b| {
        b.iter(|| black_box(dispatcher.resolve_route("/api/svc500/orders/17")))
    });

    group.finish();
}

fn balancer_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_balancer");

    let destinations: Vec<Destination> = (0..10)
        .map(|i| Destination::with_weight(format!("http://10.0.0.{}:8080", i), (i + 1) as u32))
        .collect();
    let ctx = RequestContext::new("/api").with_client_key("client-42");

    for strategy in ["round-robin", "random", "weighted", "sticky"] {
        let balancer = LoadBalancer::with_strategy(strategy).unwrap();
        group.bench_function(strategy, |b| {
            b.iter(|| black_box(balancer.choose(&destinations, &ctx).is_ok()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    template_benchmark,
    mapping_benchmark,
    balancer_benchmark,
);

criterion_main!(benches);
