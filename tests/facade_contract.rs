//! Facade contract behavior: validation bounds, identity checks, upstream
//! degradation, deadlines, session lifecycle and per-session ordering
//! under concurrency.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use cadenza::catalog::{CatalogAdapter, CatalogSong, StaticCatalog};
use cadenza::config::CoreConfig;
use cadenza::error::{CoreError, Result};
use cadenza::facade::{
    AdaptiveRequest, ConversationRequest, Facade, InputKind, MoodReading, Registry,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn small_catalog() -> Vec<CatalogSong> {
    (0..20)
        .map(|i| CatalogSong {
            song_id: i,
            name: format!("song-{i}"),
            artist: format!("artist-{i}"),
            genre: None,
            mood: Some("happy".to_owned()),
            valence: 0.8,
            energy: 0.6,
            tempo: 120.0,
            popularity: 60.0,
            like_count: 0,
        })
        .collect()
}

fn facade() -> Facade {
    let registry = Registry::seeded(
        CoreConfig::default(),
        Arc::new(StaticCatalog::new(small_catalog())),
        23,
    );
    Facade::new(Arc::new(registry))
}

fn facade_over(catalog: Arc<dyn CatalogAdapter>) -> Facade {
    Facade::new(Arc::new(Registry::seeded(CoreConfig::default(), catalog, 23)))
}

/// Catalog that always fails.
struct BrokenCatalog;

#[async_trait]
impl CatalogAdapter for BrokenCatalog {
    async fn fetch_candidates(
        &self,
        _target_mood: Option<&str>,
        _approx_limit: usize,
    ) -> Result<Vec<CatalogSong>> {
        Err(CoreError::Upstream("catalog is down".into()))
    }
}

/// Catalog that answers slowly.
struct SlowCatalog(Vec<CatalogSong>);

#[async_trait]
impl CatalogAdapter for SlowCatalog {
    async fn fetch_candidates(
        &self,
        _target_mood: Option<&str>,
        approx_limit: usize,
    ) -> Result<Vec<CatalogSong>> {
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok(self.0.iter().take(approx_limit).cloned().collect())
    }
}

fn chip(session_id: &str, mood: &str) -> ConversationRequest {
    ConversationRequest {
        session_id: Some(session_id.to_owned()),
        user_id: "u-1".to_owned(),
        message: mood.to_owned(),
        input_type: InputKind::Chip,
        reading: None,
        include_recommendations: false,
        max_recommendations: None,
        emotional_support_mode: false,
    }
}

#[tokio::test]
async fn catalog_failure_degrades_to_empty_response() {
    let facade = facade_over(Arc::new(BrokenCatalog));

    let response = facade
        .adaptive_recommendation(AdaptiveRequest {
            mood: Some("calm".to_owned()),
            ..AdaptiveRequest::for_user("u-cold")
        })
        .await
        .unwrap();

    assert!(response.recommendations.is_empty());
    assert_eq!(response.strategy_used, "none");
    // The user is cold, so cold start would have applied.
    assert!(response.cold_start_active);
    assert!(!response.diversity_applied);
}

#[tokio::test]
async fn deadline_overrun_degrades_to_empty_response() {
    let facade = facade_over(Arc::new(SlowCatalog(small_catalog())));

    let response = facade
        .adaptive_recommendation(AdaptiveRequest {
            deadline: Some(Duration::from_millis(20)),
            ..AdaptiveRequest::for_user("u-1")
        })
        .await
        .unwrap();
    assert!(response.recommendations.is_empty());
    assert_eq!(response.strategy_used, "none");

    // A generous deadline lets the same request through.
    let response = facade
        .adaptive_recommendation(AdaptiveRequest {
            deadline: Some(Duration::from_secs(5)),
            ..AdaptiveRequest::for_user("u-1")
        })
        .await
        .unwrap();
    assert!(!response.recommendations.is_empty());
}

#[tokio::test]
async fn conversation_survives_broken_catalog() {
    let facade = facade_over(Arc::new(BrokenCatalog));

    let reply = facade
        .continue_conversation(ConversationRequest {
            include_recommendations: true,
            ..chip("s-1", "happy")
        })
        .await
        .unwrap();

    // The conversational part succeeded; recommendations degraded.
    assert_eq!(reply.turn_number, 1);
    assert!(reply.should_recommend);
    assert!(reply.recommendations.is_empty());

    // The appended turn was retained despite the failure.
    let status = facade.session_status("u-1", "u-1").unwrap();
    assert_eq!(status.context_memory.unwrap().turn_count, 1);
}

#[tokio::test]
async fn energy_boundaries_are_accepted() {
    let facade = facade();
    for energy in [0.0, 1.0] {
        let response = facade
            .adaptive_recommendation(AdaptiveRequest {
                energy_level: Some(energy),
                ..AdaptiveRequest::for_user("u-1")
            })
            .await;
        assert!(response.is_ok(), "energy {energy} rejected");
    }
}

#[tokio::test]
async fn diversity_factor_bounds() {
    let facade = facade();
    let err = facade
        .adaptive_recommendation(AdaptiveRequest {
            diversity_factor: 1.5,
            ..AdaptiveRequest::for_user("u-1")
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn concurrent_turns_stay_linearizable_per_session() {
    let facade = facade();

    let mut handles = Vec::new();
    for i in 0..20 {
        let facade = facade.clone();
        handles.push(tokio::spawn(async move {
            facade
                .continue_conversation(ConversationRequest {
                    reading: Some(MoodReading {
                        mood: Some("happy".to_owned()),
                        valence: 0.5,
                        arousal: 0.2,
                        intensity: 0.5,
                        confidence: 0.8,
                        entities: Default::default(),
                    }),
                    ..chip("s-shared", &format!("message {i}"))
                })
                .await
                .unwrap()
                .turn_number
        }));
    }

    let mut turn_numbers = HashSet::new();
    for handle in handles {
        assert!(turn_numbers.insert(handle.await.unwrap()));
    }
    // Every turn got a distinct, dense number.
    assert_eq!(turn_numbers.len(), 20);
    assert_eq!(*turn_numbers.iter().max().unwrap(), 20);

    let status = facade.session_status("u-1", "u-1").unwrap();
    assert_eq!(status.context_memory.unwrap().turn_count, 20);
}

#[tokio::test]
async fn session_lifecycle_list_finalize_delete() {
    let facade = facade();

    facade.continue_conversation(chip("s-a", "happy")).await.unwrap();
    facade.continue_conversation(chip("s-b", "happy")).await.unwrap();

    let mut sessions = facade.list_active_sessions(Some("u-1"));
    sessions.sort();
    assert_eq!(sessions, ["s-a", "s-b"]);
    assert!(facade.list_active_sessions(Some("nobody")).is_empty());

    let breakdown = facade.finalize_session("s-a").unwrap();
    assert_eq!(breakdown.session_id, "s-a");
    assert!((0.0..=1.0).contains(&breakdown.total_reward));

    assert!(facade.delete_session("s-a"));
    assert!(!facade.delete_session("s-a"));
    assert_eq!(facade.list_active_sessions(Some("u-1")), ["s-b"]);

    let err = facade.finalize_session("s-a").unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn idle_sessions_are_evicted() {
    let mut config = CoreConfig::default();
    config.context.idle_ttl_secs = 0;
    let registry = Arc::new(Registry::seeded(
        config,
        Arc::new(StaticCatalog::new(small_catalog())),
        23,
    ));
    let facade = Facade::new(registry.clone());

    facade.continue_conversation(chip("s-idle", "happy")).await.unwrap();
    assert_eq!(facade.list_active_sessions(None).len(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(registry.evict_idle_sessions(), 1);
    assert!(facade.list_active_sessions(None).is_empty());

    // Feedback state went with the session.
    let err = facade.finalize_session("s-idle").unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn responses_serialize_to_stable_json() {
    let facade = facade();

    let reply = facade
        .continue_conversation(chip("s-json", "happy"))
        .await
        .unwrap();
    let value = serde_json::to_value(&reply).unwrap();
    assert_eq!(value["session_id"], "s-json");
    assert_eq!(value["turn_number"], 1);
    assert_eq!(value["detected_mood"], "happy");

    let response = facade
        .adaptive_recommendation(AdaptiveRequest::for_user("u-1"))
        .await
        .unwrap();
    let value = serde_json::to_value(&response).unwrap();
    assert!(value["strategy_used"].is_string());
    assert!(value["recommendations"].is_array());

    let status = facade.session_status("u-1", "u-1").unwrap();
    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["user_id"], "u-1");
    assert!(value["personalization_weights"]["mood_match"].is_number());
}
