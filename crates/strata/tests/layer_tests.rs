//! Integration tests for the layered memory model
//!
//! Covers:
//! - Working memory admission and eviction under capacity pressure
//! - Sensory expiry being enforced on read, cleanup and overflow
//! - The promotion pipeline from sensory through to reflections
//! - Agent isolation within a shared tenant

use std::sync::Arc;

use strata::Config;
use strata::clock::{Clock, ManualClock};
use strata::layers::{LayeredMemory, Reflection, ReflectionType};
use strata::memory::{MemoryLayer, NewMemory};
use strata::storage::{InMemoryStorage, MemoryStorage};
use strata::testing::CountingStorage;

fn create_test_config(working_capacity: usize) -> Config {
    let mut config = Config::default();
    config.layers.working.max_capacity = working_capacity;
    config
}

fn create_test_memory(
    config: &Config,
) -> (LayeredMemory, Arc<CountingStorage>, ManualClock) {
    strata::telemetry::init_test_logging();
    let clock = ManualClock::default();
    let storage = Arc::new(CountingStorage::new(Arc::new(InMemoryStorage::with_clock(
        Arc::new(clock.clone()),
    ))));
    let memory = LayeredMemory::new(
        storage.clone(),
        "tenant",
        "agent",
        config,
        Arc::new(clock.clone()),
    );
    (memory, storage, clock)
}

mod working_tests {
    use super::*;

    #[tokio::test]
    async fn test_lowest_importance_is_evicted() {
        let (memory, _, _) = create_test_memory(&create_test_config(3));
        for (content, importance) in [("a", 0.9), ("b", 0.7), ("c", 0.6), ("d", 0.8)] {
            memory
                .working
                .add(NewMemory::new(content).with_importance(importance))
                .await
                .unwrap();
        }

        let mut kept: Vec<f64> = memory
            .working
            .list(None)
            .await
            .unwrap()
            .iter()
            .map(|item| item.importance)
            .collect();
        kept.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(kept, vec![0.9, 0.8, 0.7]);
    }

    #[tokio::test]
    async fn test_capacity_one_keeps_latest_of_equals() {
        let (memory, _, clock) = create_test_memory(&create_test_config(1));
        memory.working.add(NewMemory::new("first")).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let second = memory.working.add(NewMemory::new("second")).await.unwrap();

        let items = memory.working.list(None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, second.id);
    }

    #[tokio::test]
    async fn test_threshold_raises_importance() {
        let (memory, _, _) = create_test_memory(&Config::default());
        let item = memory
            .working
            .add(NewMemory::new("minor").with_importance(0.1))
            .await
            .unwrap();
        assert_eq!(item.importance, 0.5);
        assert_eq!(item.expires_at, None);
    }

    #[tokio::test]
    async fn test_concurrent_adds_respect_capacity() {
        let (memory, _, _) = create_test_memory(&create_test_config(5));
        let memory = Arc::new(memory);

        let handles: Vec<_> = (0..25)
            .map(|i| {
                let memory = memory.clone();
                tokio::spawn(async move {
                    memory
                        .working
                        .add(NewMemory::new(format!("item {i}")).with_importance(0.5 + i as f64 / 100.0))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let status = memory.working.get_capacity_status().await.unwrap();
        assert_eq!(status.current_count, 5);
        assert!(status.is_full);
    }
}

mod sensory_tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_read_deletes_exactly_once() {
        let (memory, storage, clock) = create_test_memory(&Config::default());
        let item = memory.sensory.add(NewMemory::new("flash")).await.unwrap();
        assert_eq!(
            item.expires_at,
            Some(clock.now() + chrono::Duration::seconds(300))
        );

        clock.advance(chrono::Duration::seconds(301));
        assert!(memory.sensory.get(item.id).await.unwrap().is_none());
        assert!(memory.sensory.get(item.id).await.unwrap().is_none());
        assert_eq!(storage.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_spans_layers() {
        let (memory, storage, clock) = create_test_memory(&Config::default());
        memory.sensory.add(NewMemory::new("noise")).await.unwrap();
        memory.sensory.add(NewMemory::new("more noise")).await.unwrap();
        let kept = memory.working.add(NewMemory::new("task")).await.unwrap();

        clock.advance(chrono::Duration::minutes(10));
        assert_eq!(memory.cleanup().await.unwrap(), 2);
        assert!(storage.get(kept.id, "tenant").await.unwrap().is_some());
        assert_eq!(memory.sensory.count().await.unwrap(), 0);
    }
}

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_sensory_to_semantic() {
        let (memory, _, _) = create_test_memory(&Config::default());
        let seen = memory
            .sensory
            .add(NewMemory::new("user prefers dark mode").with_tags(["ui"]))
            .await
            .unwrap();
        assert_eq!(seen.importance, 0.3);

        let working = memory.working.promote_to_working(&seen).await.unwrap();
        assert_eq!(working.layer, MemoryLayer::Working);
        assert_eq!(working.importance, 0.5);
        assert!(working.has_tag("ui"));

        let fact = memory
            .long_term
            .consolidate_from_working(&working, true)
            .await
            .unwrap();
        assert_eq!(fact.layer, MemoryLayer::Semantic);
        assert!((fact.importance - 0.7).abs() < 1e-9);
        assert_eq!(memory.long_term.count_episodic().await.unwrap(), 0);
        assert_eq!(memory.long_term.count_semantic().await.unwrap(), 1);

        // originals stay where they were
        assert!(memory.working.get(working.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reflection_cites_sources() {
        let (memory, _, _) = create_test_memory(&Config::default());
        let mut sources = Vec::new();
        for content in ["deploy failed monday", "deploy failed tuesday", "deploy failed friday"] {
            let item = memory
                .long_term
                .add_memory(NewMemory::new(content), false)
                .await
                .unwrap();
            sources.push(item.id);
        }

        let too_few = Reflection::new("deploys are flaky", ReflectionType::Pattern, sources[..2].to_vec());
        assert!(memory.reflective.add_reflection(too_few).await.is_err());

        let reflection = memory
            .reflective
            .add_reflection(Reflection::new(
                "deploys are flaky",
                ReflectionType::Pattern,
                sources.clone(),
            ))
            .await
            .unwrap();
        assert_eq!(reflection.layer, MemoryLayer::Reflective);

        let citing = memory
            .reflective
            .get_reflections_citing(sources[1])
            .await
            .unwrap();
        assert_eq!(citing.len(), 1);
        assert_eq!(citing[0].id, reflection.id);
        assert_eq!(memory.reflective.find_patterns().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_reflections_are_pruned() {
        let (memory, _, _) = create_test_memory(&Config::default());
        let mut sources = Vec::new();
        for content in ["a", "b", "c"] {
            sources.push(memory.working.add(NewMemory::new(content)).await.unwrap().id);
        }
        memory
            .reflective
            .add_reflection(
                Reflection::new("a guess", ReflectionType::Insight, sources.clone()).with_confidence(0.1),
            )
            .await
            .unwrap();
        memory
            .reflective
            .add_reflection(Reflection::new("a finding", ReflectionType::Insight, sources))
            .await
            .unwrap();

        assert_eq!(memory.cleanup().await.unwrap(), 1);
        assert_eq!(memory.reflective.count().await.unwrap(), 1);
    }
}

mod isolation_tests {
    use super::*;

    #[tokio::test]
    async fn test_agents_do_not_see_each_other() {
        strata::telemetry::init_test_logging();
        let clock = ManualClock::default();
        let storage: Arc<dyn MemoryStorage> =
            Arc::new(InMemoryStorage::with_clock(Arc::new(clock.clone())));
        let config = Config::default();
        let alice = LayeredMemory::new(storage.clone(), "tenant", "alice", &config, Arc::new(clock.clone()));
        let bob = LayeredMemory::new(storage, "tenant", "bob", &config, Arc::new(clock));

        let secret = alice.working.add(NewMemory::new("alice only")).await.unwrap();
        assert!(bob.working.get(secret.id).await.unwrap().is_none());
        assert!(!bob.working.delete(secret.id).await.unwrap());
        assert_eq!(bob.working.count().await.unwrap(), 0);
        assert_eq!(alice.working.count().await.unwrap(), 1);
    }
}
