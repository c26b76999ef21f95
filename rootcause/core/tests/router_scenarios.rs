//! Router Fallback Scenarios
//!
//! End-to-end behaviour of [`LlmRouter`] over scripted providers:
//! - ordered fallback across timeout and malformed-response failures
//! - sticky routing across calls
//! - health accounting per attempt
//! - concurrent callers

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::task::JoinSet;

use rootcause_core::provider::{ProviderErrorKind, ProviderKind};
use rootcause_core::routing::test_utils::{memory_health, Outcome, ScriptedProvider};
use rootcause_core::{LlmRouter, ProviderDescriptor, ProviderError, RouterError, RoutingConfig};

// =============================================================================
// Helpers
// =============================================================================

fn descriptor(provider: &Arc<ScriptedProvider>, priority: u32, timeout_ms: u64) -> ProviderDescriptor {
    ProviderDescriptor::new(provider.clone(), priority)
        .with_timeout(Duration::from_millis(timeout_ms))
}

/// [a: hangs past its timeout, b: malformed, c: answers]
fn three_tier() -> (LlmRouter, [Arc<ScriptedProvider>; 3]) {
    let a = ScriptedProvider::new("a").then_hang().shared();
    let b = ScriptedProvider::new("b")
        .then_fail(ProviderError::MalformedResponse("missing text field".into()))
        .shared();
    let c = ScriptedProvider::new("c")
        .otherwise(Outcome::Reply("ok".into()))
        .shared();

    let router = LlmRouter::builder(memory_health())
        .provider(descriptor(&c, 2, 200))
        .provider(descriptor(&a, 0, 50))
        .provider(descriptor(&b, 1, 200))
        .build()
        .unwrap();
    (router, [a, b, c])
}

// =============================================================================
// Fallback
// =============================================================================

#[tokio::test]
async fn test_fallback_past_timeout_and_malformed() {
    let (router, [a, b, c]) = three_tier();

    let started = Instant::now();
    let text = router.call("why is the queue backing up?", None).await.unwrap();

    assert_eq!(text, "ok");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!((a.call_count(), b.call_count(), c.call_count()), (1, 1, 1));
    assert_eq!(router.sticky().as_deref(), Some("c"));

    let health = router.health();
    assert_eq!(health.snapshot("a").await.unwrap().failure_count, 1);
    assert_eq!(health.snapshot("b").await.unwrap().failure_count, 1);
    let c_health = health.snapshot("c").await.unwrap();
    assert_eq!(c_health.success_count, 1);
    assert_eq!(c_health.failure_count, 0);
    assert!(c_health.last_success.is_some());
}

#[tokio::test]
async fn test_sticky_provider_is_tried_first() {
    let (router, [a, b, c]) = three_tier();

    router.call("first", None).await.unwrap();
    let second = router.call("second", None).await.unwrap();

    assert_eq!(second, "ok");
    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 1);
    assert_eq!(c.prompts(), vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test]
async fn test_exhaustion_reports_every_attempt_in_order() {
    let a = ScriptedProvider::new("a").then_hang().shared();
    let b = ScriptedProvider::new("b")
        .then_fail(ProviderError::Transport("connection refused".into()))
        .shared();
    let off = ScriptedProvider::new("off").unavailable().shared();

    let router = LlmRouter::builder(memory_health())
        .provider(descriptor(&a, 0, 30))
        .provider(descriptor(&off, 1, 30))
        .provider(descriptor(&b, 2, 30))
        .build()
        .unwrap();

    match router.call("p", None).await {
        Err(RouterError::AllProvidersExhausted { attempts }) => {
            let summary: Vec<(&str, ProviderErrorKind)> = attempts
                .iter()
                .map(|attempt| (attempt.provider.as_str(), attempt.error.kind()))
                .collect();
            assert_eq!(
                summary,
                vec![
                    ("a", ProviderErrorKind::Timeout),
                    ("b", ProviderErrorKind::Transport)
                ]
            );
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(off.call_count(), 0);
    assert_eq!(router.sticky(), None);
}

#[tokio::test]
async fn test_recovered_provider_reclaims_priority_after_sticky_fails() {
    let primary = ScriptedProvider::new("primary")
        .then_reply("from primary")
        .unavailable()
        .shared();
    let backup = ScriptedProvider::new("backup")
        .then_reply("from backup")
        .then_fail(ProviderError::Transport("reset".into()))
        .shared();

    let router = LlmRouter::builder(memory_health())
        .provider(descriptor(&primary, 0, 100))
        .provider(descriptor(&backup, 1, 100))
        .build()
        .unwrap();

    assert_eq!(router.call("p", None).await.unwrap(), "from backup");
    assert_eq!(router.sticky().as_deref(), Some("backup"));

    // Primary is back, but the sticky backup keeps going first until it fails
    primary.set_available(true);
    assert_eq!(router.call("p", None).await.unwrap(), "from primary");
    assert_eq!(backup.call_count(), 2);
    assert_eq!(primary.call_count(), 1);
    assert_eq!(router.sticky().as_deref(), Some("primary"));
}

#[tokio::test]
async fn test_concurrent_calls_all_complete() {
    let flaky = ScriptedProvider::new("flaky")
        .otherwise(Outcome::Fail(ProviderError::Transport("overloaded".into())))
        .shared();
    let steady = ScriptedProvider::new("steady")
        .otherwise(Outcome::Reply("done".into()))
        .shared();

    let router = Arc::new(
        LlmRouter::builder(memory_health())
            .provider(descriptor(&flaky, 0, 100))
            .provider(descriptor(&steady, 1, 100))
            .build()
            .unwrap(),
    );

    let mut tasks = JoinSet::new();
    for i in 0..32 {
        let router = router.clone();
        tasks.spawn(async move { router.call(&format!("prompt {i}"), None).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap(), "done");
    }

    assert_eq!(steady.call_count(), 32);
    let health = router.health().snapshot("steady").await.unwrap();
    assert_eq!(health.success_count, 32);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_router_from_default_config() {
    let router = LlmRouter::from_config(&RoutingConfig::default(), memory_health()).unwrap();
    let expected: Vec<&str> = ProviderKind::default_order(true)
        .into_iter()
        .map(ProviderKind::name)
        .collect();
    assert_eq!(router.provider_names(), expected);
}

#[tokio::test]
async fn test_hosted_providers_without_keys_are_unavailable() {
    let mut config = RoutingConfig::default();
    config.provider_order = Some(vec![ProviderKind::Gemini, ProviderKind::Anthropic]);
    let router = LlmRouter::from_config(&config, memory_health()).unwrap();

    assert!(router.available_providers().await.is_empty());
    match router.call("p", None).await {
        Err(RouterError::AllProvidersExhausted { attempts }) => assert!(attempts.is_empty()),
        other => panic!("expected exhaustion, got {other:?}"),
    }
}
