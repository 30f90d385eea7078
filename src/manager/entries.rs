//! Entry operations: write path, lookups, invalidation and warm-up.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::CacheManager;
use crate::cache::{
    CacheEntry, CacheStats, EncodedPayload, EntryType, LookupResult, Priority, PutOptions,
};
use crate::error::{CacheError, Result};
use crate::optimization::{TaskSpec, TaskTarget, TaskType};
use crate::rules::{classify, Classification, ClassificationDefaults, EntryDraft};
use crate::strategy::DEFAULT_STRATEGY_ID;

/// The parts of an existing entry a rule can match on.
struct Existing {
    entry_type: EntryType,
    tags: Vec<String>,
    age_secs: u64,
    hits: u64,
}

impl CacheManager {
    // == Put ==
    /// Writes an entry and enforces its strategy's caps.
    ///
    /// Precedence per field: explicit options, then the first matching rule,
    /// then the strategy defaults for new entries or the current values for
    /// overwrites. The entry just written is never evicted by its own write.
    pub async fn put(&self, key: &str, payload: Value, opts: PutOptions) -> Result<CacheEntry> {
        opts.validate()?;
        let now = self.clock.now();
        let mut encoded = EncodedPayload::encode(payload)?;

        let existing = {
            let store = self.store.read().await;
            store.peek(key).map(|e| Existing {
                entry_type: e.entry_type,
                tags: e.tags.iter().cloned().collect(),
                age_secs: e.age_secs(now),
                hits: e.hits,
            })
        };
        let draft = EntryDraft {
            entry_type: opts
                .entry_type
                .or(existing.as_ref().map(|e| e.entry_type))
                .unwrap_or_default(),
            tags: opts
                .tags
                .clone()
                .or_else(|| existing.as_ref().map(|e| e.tags.clone()))
                .unwrap_or_default(),
            size: encoded.size,
            age_secs: existing.as_ref().map_or(0, |e| e.age_secs),
            access_count: existing.as_ref().map_or(0, |e| e.hits),
        };

        let classification = match self.classify(&draft, opts.strategy_id.as_deref()).await {
            Ok(classification) => classification,
            Err(e) => {
                self.track(opts.strategy_id.as_deref().unwrap_or(DEFAULT_STRATEGY_ID), |t| {
                    t.record_write(false)
                });
                return Err(e);
            }
        };

        if opts.compression.unwrap_or(classification.compression) {
            match self.compressor.compress(&encoded.bytes) {
                Ok(out) => encoded = encoded.with_compressed_size(out.len()),
                Err(e) => debug!(key, error = %e, "Compression skipped"),
            }
        }

        let written = self
            .store
            .write()
            .await
            .put(key, encoded, &opts, &classification, now);
        let entry = match written {
            Ok(entry) => entry,
            Err(e) => {
                self.track(&classification.strategy_id, |t| t.record_write(false));
                return Err(e);
            }
        };

        let limits = self.limits_of(&entry.strategy_id).await?;
        let outcome = self
            .store
            .write()
            .await
            .enforce_capacity(&entry.strategy_id, limits, now, Some(key));
        if !outcome.evicted.is_empty() {
            debug!(
                strategy = %entry.strategy_id,
                evicted = outcome.evicted.len(),
                bytes = outcome.bytes_freed,
                "Evicted to make room"
            );
        }
        let ok = outcome.critical_evicted == 0 && !outcome.still_over;
        self.track(&entry.strategy_id, |t| t.record_write(ok));

        self.mark_dirty();
        Ok(entry)
    }

    /// Runs the active rules. Defaults come from the strategy the entry will
    /// land in, so a rule that only moves an entry to another strategy picks
    /// up that strategy's TTL and compression flag.
    async fn classify(&self, draft: &EntryDraft, explicit: Option<&str>) -> Result<Classification> {
        let catalog = self.catalog.read().await;

        if let Some(id) = explicit {
            catalog.strategy(id)?;
            if !catalog.is_strategy_active(id) {
                return Err(CacheError::Validation(format!(
                    "Strategy '{}' is not part of the active profile",
                    id
                )));
            }
        }

        let defaults_for = |id: &str| -> Result<ClassificationDefaults> {
            let strategy = catalog.strategy(id)?;
            Ok(ClassificationDefaults {
                ttl: strategy.default_ttl,
                priority: Priority::Medium,
                compression: strategy.features.compression,
                strategy_id: strategy.id.clone(),
            })
        };

        let rules = catalog.active_rules();
        let first = classify(rules.iter().copied(), draft, &defaults_for(DEFAULT_STRATEGY_ID)?);
        let target = explicit.unwrap_or(first.strategy_id.as_str());
        if target == DEFAULT_STRATEGY_ID {
            return Ok(first);
        }
        Ok(classify(rules.iter().copied(), draft, &defaults_for(target)?))
    }

    // == Get ==
    /// Looks up a key. Misses are reported through `hit`, never as errors.
    pub async fn get(&self, key: &str) -> LookupResult {
        let now = self.clock.now();
        let started = Instant::now();
        let lookup = self.store.write().await.get(key, now);
        let latency_us = started.elapsed().as_secs_f64() * 1_000_000.0;

        let strategy_id = lookup
            .entry
            .as_ref()
            .map_or(DEFAULT_STRATEGY_ID, |e| e.strategy_id.as_str());
        self.track(strategy_id, |t| t.record_lookup(lookup.hit, latency_us));

        self.mark_dirty();
        lookup
    }

    /// Reads an entry without touching any counter.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.store.read().await.peek(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.store.read().await.keys()
    }

    // == Delete ==
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.store.write().await.delete(key);
        if removed {
            debug!(key, "Entry deleted");
            self.mark_dirty();
        }
        removed
    }

    // == Invalidate ==
    /// Invalidates an entry and everything that lists it as a dependency.
    pub async fn invalidate(&self, key: &str, reason: &str) -> bool {
        let found = self.store.write().await.invalidate(key, reason);
        if found {
            debug!(key, reason, "Entry invalidated");
            self.mark_dirty();
        }
        found
    }

    pub async fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        let changed = self.store.write().await.invalidate_by_tags(tags);
        if changed > 0 {
            info!(tags = ?tags, count = changed, "Invalidated entries by tag");
            self.mark_dirty();
        }
        changed
    }

    pub async fn mark_stale(&self, key: &str) -> bool {
        let found = self.store.write().await.mark_stale(key);
        if found {
            self.mark_dirty();
        }
        found
    }

    // == Clear ==
    /// Removes entries of one type, or all of them.
    pub async fn clear(&self, entry_type: Option<EntryType>) -> usize {
        let removed = self.store.write().await.clear(entry_type);
        info!(entry_type = ?entry_type, removed, "Cache cleared");
        self.mark_dirty();
        removed
    }

    /// Zeroes hit/miss accounting on entries, the store and the trackers.
    pub async fn reset_counters(&self) {
        self.store.write().await.reset_counters();
        self.trackers.lock().clear();
        info!("Counters reset");
        self.mark_dirty();
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        CacheStats::compute(&*self.store.read().await)
    }

    // == Warm-up ==
    /// Preloads keys through the fetcher. Returns the number loaded.
    pub async fn warmup(&self, keys: Vec<String>) -> Result<usize> {
        if self.fetcher.is_none() {
            return Err(CacheError::Validation("No fetcher configured for warm-up".to_string()));
        }
        let spec = TaskSpec {
            name: Some("warm-up".to_string()),
            task_type: TaskType::Preload,
            target: TaskTarget {
                keys,
                ..Default::default()
            },
        };
        let task = self.create_optimization_task(spec).await?;
        let task = self.execute_optimization_task(&task.id).await?;

        if !task.results.errors.is_empty() {
            warn!(failed = task.results.errors.len(), "Warm-up finished with errors");
        }
        Ok(task.results.entries_processed as usize)
    }
}
