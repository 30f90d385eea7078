use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::cache::{EntryStatus, EntryType, EvictionPolicy, Priority, PutOptions};
use crate::clock::ManualClock;
use crate::hooks::{Compressor, FetchedValue};
use crate::optimization::{TaskSpec, TaskStatus, TaskTarget, TaskType};
use crate::rules::{RuleAction, RuleCondition};

fn manager() -> CacheManager {
    CacheManager::new(Config::default()).unwrap()
}

fn strategy(id: &str, max_entries: i64, default_ttl: i64) -> StrategySpec {
    StrategySpec {
        id: Some(id.to_string()),
        name: id.to_string(),
        max_size: 1024 * 1024,
        max_entries,
        default_ttl,
        eviction_policy: EvictionPolicy::Lru,
        ..Default::default()
    }
}

fn rule_for(types: Vec<EntryType>, action: RuleAction) -> RuleSpec {
    RuleSpec {
        name: "rule".to_string(),
        condition: RuleCondition {
            types,
            ..Default::default()
        },
        action,
        ..Default::default()
    }
}

struct MapFetcher(HashMap<String, serde_json::Value>);

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, key: &str) -> Result<FetchedValue> {
        self.0
            .get(key)
            .cloned()
            .map(FetchedValue::new)
            .ok_or_else(|| CacheError::NotFound(format!("origin has no '{}'", key)))
    }
}

/// Blocks every fetch until released, announcing each one.
#[derive(Default)]
struct GatedFetcher {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, key: &str) -> Result<FetchedValue> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(FetchedValue::new(json!(key)))
    }
}

#[tokio::test]
async fn test_rule_strategy_supplies_its_default_ttl() {
    let manager = manager();
    manager.create_strategy(strategy("sessions", 100, 30)).await.unwrap();
    manager
        .create_rule(rule_for(
            vec![EntryType::Session],
            RuleAction {
                strategy_id: Some("sessions".to_string()),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    let entry = manager
        .put("s1", json!("token"), PutOptions::default().with_type(EntryType::Session))
        .await
        .unwrap();
    assert_eq!(entry.strategy_id, "sessions");
    assert_eq!(entry.ttl, 30);

    let other = manager.put("c1", json!(1), PutOptions::default()).await.unwrap();
    assert_eq!(other.strategy_id, "default");
    assert_eq!(other.ttl, 300);
}

#[tokio::test]
async fn test_explicit_options_beat_rule_action() {
    let manager = manager();
    manager
        .create_rule(rule_for(
            vec![EntryType::Api],
            RuleAction {
                ttl: Some(60),
                priority: Some(Priority::Low),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    let opts = PutOptions::default()
        .with_type(EntryType::Api)
        .with_ttl(5)
        .with_priority(Priority::Critical);
    let entry = manager.put("k", json!(1), opts).await.unwrap();

    assert_eq!(entry.ttl, 5);
    assert_eq!(entry.priority, Priority::Critical);
}

#[tokio::test]
async fn test_put_to_unknown_or_inactive_strategy() {
    let manager = manager();
    let result = manager
        .put("k", json!(1), PutOptions::default().with_strategy("nope"))
        .await;
    assert!(matches!(result, Err(CacheError::NotFound(_))));

    manager.create_strategy(strategy("hot", 10, 60)).await.unwrap();
    manager.create_strategy(strategy("cold", 10, 60)).await.unwrap();
    let profile = manager
        .create_profile(ProfileSpec {
            name: "hot only".to_string(),
            strategy_ids: vec!["hot".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    manager.apply_profile(&profile.id).await.unwrap();

    let result = manager
        .put("k", json!(1), PutOptions::default().with_strategy("cold"))
        .await;
    assert!(matches!(result, Err(CacheError::Validation(_))));
    assert!(manager
        .put("k", json!(1), PutOptions::default().with_strategy("hot"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_disabled_profile_leaves_active_set() {
    let manager = manager();
    manager.create_strategy(strategy("hot", 10, 60)).await.unwrap();
    let enabled = manager
        .create_profile(ProfileSpec {
            name: "hot".to_string(),
            strategy_ids: vec!["hot".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    let disabled = manager
        .create_profile(ProfileSpec {
            name: "off".to_string(),
            enabled: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();

    manager.apply_profile(&enabled.id).await.unwrap();
    assert!(manager.apply_profile(&disabled.id).await.is_err());

    let active = manager.active_profile().await;
    assert_eq!(active.profile_id.as_deref(), Some(enabled.id.as_str()));
    assert_eq!(active.strategy_ids, Some(vec!["hot".to_string()]));
}

#[tokio::test]
async fn test_update_strategy_evicts_down_to_new_cap() {
    let manager = manager();
    manager.create_strategy(strategy("small", 10, 60)).await.unwrap();
    for key in ["a", "b", "c"] {
        manager
            .put(key, json!(key), PutOptions::default().with_strategy("small"))
            .await
            .unwrap();
    }

    manager
        .update_strategy(
            "small",
            StrategyUpdate {
                max_entries: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(manager.keys().await, vec!["c"]);
}

#[tokio::test]
async fn test_delete_strategy_guards() {
    let manager = manager();
    manager.create_strategy(strategy("temp", 10, 60)).await.unwrap();
    manager
        .put("k", json!(1), PutOptions::default().with_strategy("temp"))
        .await
        .unwrap();

    assert!(manager.delete_strategy("default").await.is_err());
    assert!(manager.delete_strategy("temp").await.is_err());

    manager.delete("k").await;
    manager.delete_strategy("temp").await.unwrap();
    assert!(manager.get_strategy("temp").await.is_err());
}

/// Run-length encodes into (count, byte) pairs; dense input grows.
struct RunLengthCompressor;

impl Compressor for RunLengthCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut iter = data.iter().peekable();
        while let Some(&byte) = iter.next() {
            let mut run: u8 = 1;
            while run < u8::MAX && iter.peek() == Some(&&byte) {
                iter.next();
                run += 1;
            }
            out.extend([run, byte]);
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "rle"
    }
}

#[test]
fn test_run_length_double() {
    let out = RunLengthCompressor.compress(&[b'a'; 600]).unwrap();
    assert_eq!(out, vec![255, b'a', 255, b'a', 90, b'a']);
    assert_eq!(RunLengthCompressor.compress(b"abc").unwrap().len(), 6);
}

#[tokio::test]
async fn test_compression_task_never_grows_entries() {
    let manager = CacheManager::builder(Config::default())
        .compressor(Arc::new(RunLengthCompressor))
        .build()
        .unwrap();
    let padded = manager
        .put("padded", json!("a".repeat(600)), PutOptions::default())
        .await
        .unwrap();
    let dense = manager
        .put("dense", json!("abcdef"), PutOptions::default())
        .await
        .unwrap();

    let task = manager
        .create_optimization_task(TaskSpec::new(TaskType::Compression))
        .await
        .unwrap();
    let task = manager.execute_optimization_task(&task.id).await.unwrap();

    // The dense payload cannot shrink, which is recorded as an error
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.results.errors.len(), 1);
    assert_eq!(task.results.entries_processed, 1);

    let compressed = manager.peek("padded").await.unwrap();
    assert!(compressed.metadata.compression);
    assert!(compressed.size < padded.size);
    assert_eq!(task.results.space_freed, padded.size - compressed.size);

    let untouched = manager.peek("dense").await.unwrap();
    assert_eq!(untouched.size, dense.size);
    assert!(!untouched.metadata.compression);
    assert_eq!(
        manager.stats().await.total_size,
        compressed.size + untouched.size
    );
}

#[tokio::test]
async fn test_migration_task_moves_and_enforces_caps() {
    let manager = manager();
    manager.create_strategy(strategy("archive", 2, 60)).await.unwrap();
    for key in ["a", "b", "c"] {
        manager
            .put(key, json!(key), PutOptions::default().with_type(EntryType::File))
            .await
            .unwrap();
    }
    manager.put("keep", json!(1), PutOptions::default()).await.unwrap();

    let spec = TaskSpec::new(TaskType::Migration).with_target(TaskTarget {
        entry_type: Some(EntryType::File),
        target_strategy_id: Some("archive".to_string()),
        ..Default::default()
    });
    let task = manager.create_optimization_task(spec).await.unwrap();
    let task = manager.execute_optimization_task(&task.id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.results.entries_processed, 3);
    let stats = manager.stats().await;
    assert_eq!(stats.by_strategy.get("archive"), Some(&2));
    assert_eq!(stats.by_strategy.get("default"), Some(&1));
}

#[tokio::test]
async fn test_defragmentation_task_completes() {
    let manager = manager();
    manager.put("a", json!(1), PutOptions::default()).await.unwrap();

    let task = manager
        .create_optimization_task(TaskSpec::new(TaskType::Defragmentation))
        .await
        .unwrap();
    let task = manager.execute_optimization_task(&task.id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.results.entries_processed, 1);
    assert_eq!(task.results.space_freed, 0);
    assert_eq!(task.progress.percentage, 100.0);
}

#[tokio::test]
async fn test_terminal_task_cannot_run_again() {
    let manager = manager();
    let task = manager
        .create_optimization_task(TaskSpec::new(TaskType::Cleanup))
        .await
        .unwrap();
    manager.execute_optimization_task(&task.id).await.unwrap();

    assert!(matches!(
        manager.execute_optimization_task(&task.id).await,
        Err(CacheError::Validation(_))
    ));

    let pending = manager
        .create_optimization_task(TaskSpec::new(TaskType::Cleanup))
        .await
        .unwrap();
    let cancelled = manager.cancel_optimization_task(&pending.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(manager.execute_optimization_task(&pending.id).await.is_err());
}

#[tokio::test]
async fn test_running_task_cancels_between_entries() {
    let fetcher = Arc::new(GatedFetcher::default());
    let manager = Arc::new(
        CacheManager::builder(Config::default())
            .fetcher(fetcher.clone())
            .build()
            .unwrap(),
    );
    let spec = TaskSpec::new(TaskType::Preload).with_target(TaskTarget {
        keys: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        ..Default::default()
    });
    let task = manager.create_optimization_task(spec).await.unwrap();

    let runner = {
        let manager = manager.clone();
        let id = task.id.clone();
        tokio::spawn(async move { manager.execute_optimization_task(&id).await })
    };

    fetcher.started.notified().await;
    let requested = manager.cancel_optimization_task(&task.id).await.unwrap();
    assert_eq!(requested.status, TaskStatus::Running);
    fetcher.release.notify_one();

    let finished = runner.await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert_eq!(finished.results.entries_processed, 1);
    assert_eq!(manager.keys().await, vec!["a"]);
}

#[tokio::test]
async fn test_warmup_loads_with_high_priority() {
    let origin = HashMap::from([
        ("user:1".to_string(), json!({"name": "ada"})),
        ("user:2".to_string(), json!({"name": "linus"})),
    ]);
    let manager = CacheManager::builder(Config::default())
        .fetcher(Arc::new(MapFetcher(origin)))
        .build()
        .unwrap();

    let keys = vec!["user:1".to_string(), "user:2".to_string(), "user:3".to_string()];
    let loaded = manager.warmup(keys).await.unwrap();

    assert_eq!(loaded, 2);
    assert_eq!(manager.peek("user:1").await.unwrap().priority, Priority::High);
    assert!(manager.peek("user:3").await.is_none());
}

#[tokio::test]
async fn test_warmup_without_fetcher_is_rejected() {
    let manager = manager();
    assert!(matches!(
        manager.warmup(vec!["k".to_string()]).await,
        Err(CacheError::Validation(_))
    ));
}

#[tokio::test]
async fn test_sweep_expires_with_manual_clock() {
    let clock = Arc::new(ManualClock::new());
    let manager = CacheManager::builder(Config::default())
        .clock(clock.clone())
        .build()
        .unwrap();
    manager
        .put("k", json!(1), PutOptions::default().with_max_age(10))
        .await
        .unwrap();

    assert_eq!(manager.sweep_once().await, SweepReport::default());
    clock.advance_secs(11);
    let report = manager.sweep_once().await;

    assert_eq!(report.expired, 1);
    assert_eq!(manager.peek("k").await.unwrap().status, EntryStatus::Expired);
}

#[tokio::test]
async fn test_unbounded_ttl_rejected_and_lookups_survive() {
    let manager = manager();
    for opts in [
        PutOptions::default().with_ttl(i64::MAX),
        PutOptions::default().with_max_age(i64::MAX),
    ] {
        let result = manager.put("k", json!(1), opts).await;
        assert!(matches!(result, Err(CacheError::Validation(_))));
    }
    assert!(!manager.get("k").await.hit);

    // A restored entry can carry any max age
    manager.put("k", json!(1), PutOptions::default()).await.unwrap();
    let mut entry = manager.peek("k").await.unwrap();
    entry.ttl = u64::MAX;
    entry.max_age = u64::MAX;
    *manager.store.write().await = crate::cache::EntryStore::from_parts(vec![entry], Default::default());

    assert!(manager.get("k").await.hit);
    assert_eq!(manager.sweep_once().await, SweepReport::default());
    assert_eq!(manager.peek("k").await.unwrap().status, EntryStatus::Active);
}

#[tokio::test]
async fn test_refresh_metrics_records_strategy_health() {
    let manager = manager();
    manager.put("k", json!(1), PutOptions::default()).await.unwrap();
    manager.invalidate("k", "stale upstream").await;
    manager.get("k").await;

    let metrics = manager.refresh_metrics().await;
    assert_eq!(metrics.strategies[0].health.status, crate::strategy::HealthStatus::Critical);

    let stored = manager.get_strategy("default").await.unwrap();
    assert_eq!(stored.health.status, crate::strategy::HealthStatus::Critical);
    assert_eq!(manager.metrics().await.history.len(), 1);
}

#[tokio::test]
async fn test_absent_key_misses_degrade_strategy_health() {
    let manager = manager();
    manager.put("k", json!(1), PutOptions::default()).await.unwrap();
    assert!(manager.get("k").await.hit);
    for i in 0..99 {
        assert!(!manager.get(&format!("missing-{}", i)).await.hit);
    }

    let metrics = manager.metrics().await;
    let report = &metrics.strategies[0];
    assert_eq!((report.hits, report.misses), (1, 99));
    assert_eq!(report.health.hit_rate, Some(1.0));
    assert_eq!(report.health.status, crate::strategy::HealthStatus::Critical);

    let raised = manager.evaluate_with(&metrics).await;
    assert!(raised
        .iter()
        .any(|a| a.source.source_type == "strategy" && a.source.source_id == "default"));
}

/// Refuses to save until a signal arrives from another task on the runtime.
struct SignalledBackend {
    inner: crate::persistence::MemoryBackend,
    signal: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    opened: std::sync::atomic::AtomicBool,
}

impl PersistenceBackend for SignalledBackend {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.inner.load(name)
    }

    fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        if !self.opened.load(std::sync::atomic::Ordering::SeqCst) {
            let signal = self.signal.lock().unwrap();
            signal
                .recv_timeout(std::time::Duration::from_secs(5))
                .map_err(|_| CacheError::Persistence("save ran on the runtime thread".to_string()))?;
            self.opened.store(true, std::sync::atomic::Ordering::SeqCst);
        }
        self.inner.save(name, bytes)
    }
}

#[tokio::test]
async fn test_persist_does_not_block_runtime() {
    let (tx, rx) = std::sync::mpsc::channel();
    let backend = Arc::new(SignalledBackend {
        inner: crate::persistence::MemoryBackend::new(),
        signal: std::sync::Mutex::new(rx),
        opened: std::sync::atomic::AtomicBool::new(false),
    });
    let manager = CacheManager::builder(Config::default())
        .backend(backend.clone())
        .build()
        .unwrap();
    manager.put("k", json!(1), PutOptions::default()).await.unwrap();

    // Single-threaded runtime: this only runs if the save yields the thread
    let signaller = tokio::spawn(async move {
        tx.send(()).unwrap();
    });
    manager.persist_now().await.unwrap();
    signaller.await.unwrap();

    assert!(backend.inner.load(crate::persistence::ENTRIES).unwrap().is_some());
}

#[tokio::test]
async fn test_start_and_shutdown_flushes() {
    let backend = Arc::new(crate::persistence::MemoryBackend::new());
    let manager = Arc::new(
        CacheManager::builder(Config::default())
            .backend(backend.clone())
            .build()
            .unwrap(),
    );
    manager.start();
    manager.start();
    manager.put("k", json!(1), PutOptions::default()).await.unwrap();

    manager.shutdown().await.unwrap();

    let reloaded = CacheManager::builder(Config::default())
        .backend(backend)
        .build()
        .unwrap();
    assert_eq!(reloaded.keys().await, vec!["k"]);
}
