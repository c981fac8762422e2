//! Cross-module scenarios driven through the public API.

use std::sync::Arc;

use turnstile::config::TurnstileConfig;
use turnstile::metrics::{ChannelSink, MetricsEmitter};
use turnstile::ratelimit::{sweep, Clock, ManualClock, MemoryStore, RateLimiterFactory};
use turnstile::service::AdmissionService;

const CONFIG: &str = r#"
service:
  top_blocked: 5
limiters:
  - name: api
    preset: custom
    strategy: sliding
    max_requests: 2
    window_ms: 1000
    key_prefix: "api:"
  - name: auth
    preset: auth
"#;

fn remaining(response: &turnstile::service::AdmissionResponse) -> &str {
    &response.headers["X-RateLimit-Remaining"]
}

#[tokio::test]
async fn sliding_window_scenario_end_to_end() {
    let clock = ManualClock::new(0);
    let store = Arc::new(MemoryStore::new());
    let factory = RateLimiterFactory::with_store(store.clone(), Arc::new(clock.clone()));

    let config = TurnstileConfig::from_yaml(CONFIG).unwrap();
    let limiters = config.build_limiters(&factory).unwrap();
    let api = limiters[0].1.clone();

    let sink = ChannelSink::new(8);
    let mut subscriber = sink.subscribe();
    let emitter = MetricsEmitter::new(Arc::new(sink))
        .top_blocked(config.service.top_blocked)
        .register("api", api.clone());
    let service = AdmissionService::new(limiters);

    let first = service.handle_line("api 203.0.113.5").unwrap();
    assert_eq!((first.status, remaining(&first)), (200, "1"));

    clock.set(10);
    let second = service.handle_line("api 203.0.113.5").unwrap();
    assert_eq!((second.status, remaining(&second)), (200, "0"));

    clock.set(20);
    let third = service.handle_line("api 203.0.113.5").unwrap();
    assert_eq!((third.status, remaining(&third)), (429, "0"));

    // Only the t=0 admission has aged out.
    clock.set(1001);
    let fourth = service.handle_line("api 203.0.113.5").unwrap();
    assert_eq!((fourth.status, remaining(&fourth)), (200, "0"));

    let info = api.get_info("203.0.113.5").unwrap().unwrap();
    assert_eq!(info.identifier, "api:203.0.113.5");
    assert_eq!(info.total_hits_in_window, 2);

    assert_eq!(emitter.emit().await, 1);
    let snapshot = subscriber.recv().await.unwrap();
    assert_eq!(snapshot.limiter, "api");
    assert_eq!(snapshot.blocked_requests, 1);
    assert_eq!(snapshot.top_blocked_identifiers[0].identifier, "api:203.0.113.5");
    assert_eq!(snapshot.rate_limiter.per_store_stats.active_keys, 1);

    clock.set(10_000);
    assert_eq!(sweep(store.as_ref(), clock.now_ms()).unwrap(), 1);
    assert!(api.get_info("203.0.113.5").unwrap().is_none());
}

#[tokio::test]
async fn limiters_share_one_store_without_collisions() {
    let clock = ManualClock::new(0);
    let factory =
        RateLimiterFactory::with_store(Arc::new(MemoryStore::new()), Arc::new(clock.clone()));
    let limiters = TurnstileConfig::from_yaml(CONFIG)
        .unwrap()
        .build_limiters(&factory)
        .unwrap();
    let service = AdmissionService::new(limiters);

    for _ in 0..5 {
        assert_eq!(service.handle_line("auth carol").unwrap().status, 200);
    }
    assert_eq!(service.handle_line("auth carol").unwrap().status, 429);

    // The api limiter keeps its own accounting for the same identifier.
    assert_eq!(service.handle_line("api carol").unwrap().status, 200);

    let auth = service.limiter("auth").unwrap();
    auth.reset("carol").unwrap();
    assert_eq!(service.handle_line("auth carol").unwrap().status, 200);
    assert_eq!(auth.blocked().blocked_requests(), 1);
}
