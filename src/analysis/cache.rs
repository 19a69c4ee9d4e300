//! Fingerprint-keyed analysis cache with single-flight computation.
//!
//! Provides thread-safe caching of symbolic analyses keyed by content
//! fingerprint. For a given fingerprint, at most one computation is in
//! flight at any time: concurrent callers await the leader's result and
//! receive it — or its failure — instead of duplicating work. Failures are
//! never cached, so any later caller re-attempts the computation. Entries
//! expire after a short TTL and are evicted on access; no background sweep.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::types::AnalysisResult;
use crate::utilities::errors::ExtractionError;

/// Shared outcome of one in-flight computation.
type FlightResult = Result<Arc<AnalysisResult>, Arc<ExtractionError>>;

struct CacheEntry {
    result: Arc<AnalysisResult>,
    stored_at: Instant,
}

/// Content-fingerprint-keyed store of computed analyses.
///
/// Cloneable handle; all clones share the same entries and in-flight table.
#[derive(Clone)]
pub struct AnalysisCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: DashMap<String, CacheEntry>,
    /// One broadcast sender per fingerprint currently being computed.
    /// Guarded by a plain mutex: entries are held only long enough to
    /// subscribe or register, never across an await.
    flights: Mutex<HashMap<String, broadcast::Sender<FlightResult>>>,
    ttl: Duration,
}

/// Releases a leader's flight entry if the leading future is dropped before
/// it reports. Dropping the entry drops the last sender, which closes the
/// broadcast channel and wakes every follower to retry.
struct FlightGuard<'a> {
    inner: &'a CacheInner,
    fingerprint: &'a str,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.flights.lock().remove(self.fingerprint);
        }
    }
}

impl AnalysisCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                flights: Mutex::new(HashMap::new()),
                ttl,
            }),
        }
    }

    /// Look up a fresh entry, evicting it if expired.
    fn lookup(&self, fingerprint: &str) -> Option<Arc<AnalysisResult>> {
        if let Some(entry) = self.inner.entries.get(fingerprint) {
            if entry.stored_at.elapsed() < self.inner.ttl {
                return Some(Arc::clone(&entry.result));
            }
        } else {
            return None;
        }
        // Expired: evict on access.
        self.inner.entries.remove(fingerprint);
        None
    }

    /// Return the cached analysis for `fingerprint`, computing it via
    /// `compute` if absent.
    ///
    /// Guarantees at most one invocation of `compute` in flight per
    /// fingerprint; concurrent callers share the leader's result, including
    /// its failure. A leader whose future is dropped mid-compute releases
    /// the flight, and waiters start over rather than blocking on a channel
    /// that will never report. Degraded results (see
    /// [`AnalysisResult::is_cacheable`]) are returned but not stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &str,
        compute: F,
    ) -> Result<Arc<AnalysisResult>, Arc<ExtractionError>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<AnalysisResult, ExtractionError>>,
    {
        loop {
            if let Some(hit) = self.lookup(fingerprint) {
                tracing::debug!(fingerprint, "analysis cache hit");
                return Ok(hit);
            }

            // Join an existing flight or become the leader. The re-check
            // under the lock closes the window between a flight completing
            // and its entry landing. The guard is never held across an
            // await.
            let joined = {
                let mut flights = self.inner.flights.lock();
                if let Some(hit) = self.lookup(fingerprint) {
                    return Ok(hit);
                }
                match flights.get(fingerprint) {
                    Some(tx) => Err(tx.subscribe()),
                    None => {
                        let (tx, _) = broadcast::channel(1);
                        flights.insert(fingerprint.to_string(), tx.clone());
                        Ok(tx)
                    }
                }
            };
            let leader_tx = match joined {
                Ok(tx) => tx,
                Err(mut rx) => match rx.recv().await {
                    Ok(result) => return result,
                    // Leader dropped without reporting (cancelled
                    // mid-compute). Start over as a fresh caller.
                    Err(_) => continue,
                },
            };
            let mut guard = FlightGuard {
                inner: &*self.inner,
                fingerprint,
                armed: true,
            };

            tracing::debug!(fingerprint, "analysis cache miss, computing");
            let outcome: FlightResult = match compute().await {
                Ok(result) => {
                    let result = Arc::new(result);
                    if result.is_cacheable() {
                        self.inner.entries.insert(
                            fingerprint.to_string(),
                            CacheEntry {
                                result: Arc::clone(&result),
                                stored_at: Instant::now(),
                            },
                        );
                    }
                    Ok(result)
                }
                Err(e) => Err(Arc::new(e)),
            };

            // Retire the flight before broadcasting so late arrivals either
            // see the stored entry or start a fresh computation.
            self.inner.flights.lock().remove(fingerprint);
            guard.armed = false;
            let _ = leader_tx.send(outcome.clone());
            return outcome;
        }
    }

    /// Number of live (possibly expired, not yet evicted) entries.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drop all cached entries.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("entries", &self.inner.entries.len())
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use crate::types::{ArchetypeMapping, SymbolicAnalysis};

    fn result_for(fingerprint: &str) -> AnalysisResult {
        AnalysisResult {
            analysis: SymbolicAnalysis::new(Vec::new(), Vec::new()),
            mapping: ArchetypeMapping::empty("v1"),
            fingerprint: fingerprint.to_string(),
            computed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_hit_after_compute() {
        let cache = AnalysisCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cache
                .get_or_compute("fp1", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(result_for("fp1")) }
                })
                .await
                .unwrap();
            assert_eq!(result.fingerprint, "fp1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = AnalysisCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared", move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            // Hold the flight open so every task joins it.
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(result_for("shared"))
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.fingerprint, "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_the_flight() {
        let cache = AnalysisCache::new(Duration::from_secs(60));
        let started = Arc::new(tokio::sync::Notify::new());

        // Leader registers the flight, then stalls until aborted.
        let leader = {
            let cache = cache.clone();
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                cache
                    .get_or_compute("fp", move || {
                        let started = Arc::clone(&started);
                        async move {
                            started.notify_one();
                            std::future::pending().await
                        }
                    })
                    .await
            })
        };
        started.notified().await;
        leader.abort();
        let _ = leader.await;

        // A later caller must become a fresh leader, not block on the dead
        // flight.
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            cache.get_or_compute("fp", || async { Ok(result_for("fp")) }),
        )
        .await
        .expect("flight released after leader cancellation")
        .unwrap();
        assert_eq!(result.fingerprint, "fp");
    }

    #[tokio::test]
    async fn test_follower_retries_after_leader_cancellation() {
        let cache = AnalysisCache::new(Duration::from_secs(60));
        let started = Arc::new(tokio::sync::Notify::new());

        let leader = {
            let cache = cache.clone();
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                cache
                    .get_or_compute("fp", move || {
                        let started = Arc::clone(&started);
                        async move {
                            started.notify_one();
                            std::future::pending().await
                        }
                    })
                    .await
            })
        };
        started.notified().await;

        // Follower joins the stalled flight before the leader is torn down.
        let follower = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("fp", || async { Ok(result_for("fp")) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        let _ = leader.await;

        let result = tokio::time::timeout(Duration::from_secs(2), follower)
            .await
            .expect("follower woke after leader cancellation")
            .unwrap()
            .unwrap();
        assert_eq!(result.fingerprint, "fp");
    }

    #[tokio::test]
    async fn test_failure_propagates_and_is_not_cached() {
        let cache = AnalysisCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        let err = cache
            .get_or_compute("bad", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ExtractionError::Service {
                        message: "boom".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(*err, ExtractionError::Service { .. }));
        assert!(cache.is_empty());

        // A retry re-attempts computation.
        cache
            .get_or_compute("bad", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(result_for("bad")) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_recomputed() {
        let cache = AnalysisCache::new(Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(result_for("fp")) }
        };
        cache.get_or_compute("fp", compute).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.get_or_compute("fp", compute).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_degraded_result_is_returned_but_not_stored() {
        let cache = AnalysisCache::new(Duration::from_secs(60));

        let result = cache
            .get_or_compute("degraded", || async {
                Ok(AnalysisResult {
                    analysis: SymbolicAnalysis::degraded(),
                    mapping: ArchetypeMapping::empty("v1"),
                    fingerprint: "degraded".into(),
                    computed_at: Utc::now(),
                })
            })
            .await
            .unwrap();
        assert!(result.analysis.degraded);
        assert!(cache.is_empty());
    }
}
