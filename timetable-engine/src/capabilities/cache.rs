//! The modified-time-keyed capability cache.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::domain::{ProviderData, ProviderFeature, ProviderId};

use super::FeatureProbe;

/// The outcome of a capability lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    /// The provider's feature set; empty when probing failed.
    pub features: BTreeSet<ProviderFeature>,

    /// Whether the feature set is trustworthy. `false` means the last
    /// probe failed and `error` says why.
    pub ok: bool,

    /// The probe error, when `ok` is false.
    pub error: Option<String>,
}

impl Features {
    /// Whether the provider offers a feature (always false when not ok).
    pub fn has(&self, feature: ProviderFeature) -> bool {
        self.ok && self.features.contains(&feature)
    }
}

/// One cached probe result.
///
/// Valid only while every recorded modified time equals the file's current
/// one; `None` records a file that was missing at probe time, so a file
/// appearing later also invalidates the entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    script_modified: Option<SystemTime>,
    include_modified: HashMap<PathBuf, Option<SystemTime>>,
    includes_up_to_date: bool,
    features: BTreeSet<ProviderFeature>,
    ok: bool,
    error: Option<String>,
}

impl CacheEntry {
    fn to_features(&self) -> Features {
        Features {
            features: self.features.clone(),
            ok: self.ok,
            error: self.error.clone(),
        }
    }
}

struct Inner {
    entries: HashMap<ProviderId, CacheEntry>,
    /// include path → providers referencing it, for invalidation fan-out.
    reverse: HashMap<PathBuf, HashSet<ProviderId>>,
}

/// Caches per-provider feature sets keyed by script modified times.
///
/// Shared across the engine; all mutation is serialized by a single lock.
pub struct CapabilityCache {
    probe: Arc<dyn FeatureProbe>,
    inner: Mutex<Inner>,
    probe_count: AtomicUsize,
}

impl CapabilityCache {
    /// Create a cache probing through the given prober.
    pub fn new(probe: Arc<dyn FeatureProbe>) -> Self {
        Self {
            probe,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                reverse: HashMap::new(),
            }),
            probe_count: AtomicUsize::new(0),
        }
    }

    /// Look up a provider's features, probing only when the cached entry
    /// is stale or absent.
    ///
    /// Probe failures are stored, not raised: the returned value has
    /// `ok == false` and subsequent lookups keep returning it without
    /// re-probing until the underlying files change.
    pub fn features_for(&self, provider: &ProviderData) -> Features {
        let mut inner = self.inner.lock().expect("capability cache lock poisoned");

        if let Some(entry) = inner.entries.get(&provider.id) {
            if entry.includes_up_to_date && self.entry_is_current(entry, provider) {
                return entry.to_features();
            }
            debug!(provider = %provider.id, "capability entry stale, re-probing");
        }

        // Capture modified times before evaluating: a file changing during
        // the probe then invalidates the entry instead of being missed.
        let script_modified = modified(&provider.script_path);
        let include_modified: HashMap<PathBuf, Option<SystemTime>> = provider
            .resolved_includes()
            .into_iter()
            .map(|path| {
                let m = modified(&path);
                (path, m)
            })
            .collect();

        self.probe_count.fetch_add(1, Ordering::SeqCst);
        let entry = match self.probe.probe(provider) {
            Ok(features) => CacheEntry {
                script_modified,
                include_modified,
                includes_up_to_date: true,
                features,
                ok: true,
                error: None,
            },
            Err(error) => {
                warn!(provider = %provider.id, %error, "capability probe failed");
                CacheEntry {
                    script_modified,
                    include_modified,
                    includes_up_to_date: true,
                    features: BTreeSet::new(),
                    ok: false,
                    error: Some(error.to_string()),
                }
            }
        };

        Self::reindex_includes(&mut inner, provider, &entry);
        let features = entry.to_features();
        inner.entries.insert(provider.id.clone(), entry);
        features
    }

    /// Drop a provider's cached entry entirely.
    pub fn invalidate(&self, provider: &ProviderId) {
        let mut inner = self.inner.lock().expect("capability cache lock poisoned");
        if inner.entries.remove(provider).is_some() {
            for referencing in inner.reverse.values_mut() {
                referencing.remove(provider);
            }
        }
    }

    /// Mark every provider referencing an included file as needing a
    /// re-probe.
    ///
    /// Call when an include file changed on disk: the providers' own
    /// scripts did not change, but their cached capabilities may be wrong.
    pub fn note_include_changed(&self, path: &Path) {
        let mut inner = self.inner.lock().expect("capability cache lock poisoned");
        let Some(providers) = inner.reverse.get(path).cloned() else {
            return;
        };
        debug!(path = %path.display(), fan_out = providers.len(), "include changed");
        for provider in providers {
            if let Some(entry) = inner.entries.get_mut(&provider) {
                entry.includes_up_to_date = false;
            }
        }
    }

    /// How many probes have run, for cache-behavior tests.
    pub fn probe_count(&self) -> usize {
        self.probe_count.load(Ordering::SeqCst)
    }

    fn entry_is_current(&self, entry: &CacheEntry, provider: &ProviderData) -> bool {
        if modified(&provider.script_path) != entry.script_modified {
            return false;
        }

        let includes = provider.resolved_includes();
        if includes.len() != entry.include_modified.len() {
            return false;
        }
        includes.iter().all(|path| {
            entry
                .include_modified
                .get(path)
                .is_some_and(|stored| modified(path) == *stored)
        })
    }

    /// Keep the reverse index consistent with the provider's current
    /// include list: stale references go away, new ones appear.
    fn reindex_includes(inner: &mut Inner, provider: &ProviderData, entry: &CacheEntry) {
        if let Some(previous) = inner.entries.get(&provider.id) {
            for path in previous.include_modified.keys() {
                if let Some(referencing) = inner.reverse.get_mut(path) {
                    referencing.remove(&provider.id);
                }
            }
        }
        for path in entry.include_modified.keys() {
            inner
                .reverse
                .entry(path.clone())
                .or_default()
                .insert(provider.id.clone());
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    use crate::config::EngineConfig;
    use crate::network::MockDownloader;
    use crate::script::{ScriptError, ScriptSandbox};

    /// Probe stub returning a fixed feature set.
    struct StubProbe {
        features: BTreeSet<ProviderFeature>,
        fail: bool,
    }

    impl FeatureProbe for StubProbe {
        fn probe(
            &self,
            provider: &ProviderData,
        ) -> Result<BTreeSet<ProviderFeature>, ScriptError> {
            if self.fail {
                Err(ScriptError::Load {
                    path: provider.script_path.clone(),
                    message: "stubbed failure".into(),
                })
            } else {
                Ok(self.features.clone())
            }
        }
    }

    fn stub(features: &[ProviderFeature]) -> Arc<StubProbe> {
        Arc::new(StubProbe {
            features: features.iter().copied().collect(),
            fail: false,
        })
    }

    fn touch(path: &Path, offset_secs: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn provider(dir: &TempDir, id: &str, script: &str) -> ProviderData {
        ProviderData::new(ProviderId::parse(id).unwrap(), dir.path().join(script))
    }

    #[test]
    fn repeated_lookups_probe_once() {
        let dir = TempDir::new().unwrap();
        write(&dir, "p.rhai", "fn getTimetable(params) { }");
        let cache = CapabilityCache::new(stub(&[ProviderFeature::Departures]));
        let provider = provider(&dir, "de_db", "p.rhai");

        let first = cache.features_for(&provider);
        let second = cache.features_for(&provider);

        assert_eq!(cache.probe_count(), 1);
        assert_eq!(first, second);
        assert!(first.has(ProviderFeature::Departures));
    }

    #[test]
    fn touching_the_script_forces_a_reprobe() {
        let dir = TempDir::new().unwrap();
        let script = write(&dir, "p.rhai", "fn getTimetable(params) { }");
        let cache = CapabilityCache::new(stub(&[ProviderFeature::Departures]));
        let provider = provider(&dir, "de_db", "p.rhai");

        cache.features_for(&provider);
        assert_eq!(cache.probe_count(), 1);

        touch(&script, 10);
        cache.features_for(&provider);
        assert_eq!(cache.probe_count(), 2);

        // And the recomputed modified time sticks.
        cache.features_for(&provider);
        assert_eq!(cache.probe_count(), 2);
    }

    #[test]
    fn touching_an_include_forces_a_reprobe() {
        let dir = TempDir::new().unwrap();
        write(&dir, "p.rhai", "fn getTimetable(params) { }");
        let include = write(&dir, "base.rhai", "fn shared() { }");
        let cache = CapabilityCache::new(stub(&[ProviderFeature::Departures]));
        let provider =
            provider(&dir, "de_db", "p.rhai").with_includes(vec!["base.rhai".into()]);

        cache.features_for(&provider);
        assert_eq!(cache.probe_count(), 1);

        touch(&include, 10);
        cache.features_for(&provider);
        assert_eq!(cache.probe_count(), 2);
    }

    #[test]
    fn include_change_fans_out_to_all_referencing_providers() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.rhai", "fn getTimetable(params) { }");
        write(&dir, "b.rhai", "fn getTimetable(params) { }");
        let include = write(&dir, "base.rhai", "fn shared() { }");

        let cache = CapabilityCache::new(stub(&[ProviderFeature::Departures]));
        let provider_a =
            provider(&dir, "provider_a", "a.rhai").with_includes(vec!["base.rhai".into()]);
        let provider_b =
            provider(&dir, "provider_b", "b.rhai").with_includes(vec!["base.rhai".into()]);

        cache.features_for(&provider_a);
        cache.features_for(&provider_b);
        assert_eq!(cache.probe_count(), 2);

        // The include changed but kept its mtime comparison moot: the
        // fan-out flag alone must force both re-probes.
        cache.note_include_changed(&include);
        cache.features_for(&provider_a);
        cache.features_for(&provider_b);
        assert_eq!(cache.probe_count(), 4);
    }

    #[test]
    fn failed_probe_is_cached_until_the_file_changes() {
        let dir = TempDir::new().unwrap();
        let script = write(&dir, "p.rhai", "fn getTimetable(params) { }");
        let cache = CapabilityCache::new(Arc::new(StubProbe {
            features: BTreeSet::new(),
            fail: true,
        }));
        let provider = provider(&dir, "de_db", "p.rhai");

        let result = cache.features_for(&provider);
        assert!(!result.ok);
        assert!(result.error.as_deref().unwrap().contains("stubbed failure"));
        assert!(!result.has(ProviderFeature::Departures));

        // The failure is cached, not re-raised per lookup.
        cache.features_for(&provider);
        assert_eq!(cache.probe_count(), 1);

        touch(&script, 10);
        cache.features_for(&provider);
        assert_eq!(cache.probe_count(), 2);
    }

    #[test]
    fn removed_include_stops_invalidating() {
        let dir = TempDir::new().unwrap();
        write(&dir, "p.rhai", "fn getTimetable(params) { }");
        let include = write(&dir, "base.rhai", "fn shared() { }");
        let cache = CapabilityCache::new(stub(&[ProviderFeature::Departures]));

        let with_include =
            provider(&dir, "de_db", "p.rhai").with_includes(vec!["base.rhai".into()]);
        cache.features_for(&with_include);
        assert_eq!(cache.probe_count(), 1);

        // The provider's descriptor dropped the include; the changed list
        // alone forces one re-probe, which also rebuilds the index.
        let without_include = provider(&dir, "de_db", "p.rhai");
        cache.features_for(&without_include);
        assert_eq!(cache.probe_count(), 2);

        // Fan-out for the old include no longer touches this provider.
        cache.note_include_changed(&include);
        cache.features_for(&without_include);
        assert_eq!(cache.probe_count(), 2);
    }

    #[test]
    fn invalidate_drops_the_entry() {
        let dir = TempDir::new().unwrap();
        write(&dir, "p.rhai", "fn getTimetable(params) { }");
        let cache = CapabilityCache::new(stub(&[ProviderFeature::Departures]));
        let provider = provider(&dir, "de_db", "p.rhai");

        cache.features_for(&provider);
        cache.invalidate(&provider.id);
        cache.features_for(&provider);
        assert_eq!(cache.probe_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sandbox_probe_and_cache_work_together() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "p.rhai",
            "fn getTimetable(params) { }\nfn getJourneys(params) { }\n",
        );

        let sandbox = Arc::new(ScriptSandbox::new(
            EngineConfig::default(),
            Arc::new(MockDownloader::new()),
        ));
        let cache = Arc::new(CapabilityCache::new(sandbox));
        let provider = provider(&dir, "de_db", "p.rhai");

        let features = tokio::task::spawn_blocking({
            let cache = Arc::clone(&cache);
            let provider = provider.clone();
            move || {
                let first = cache.features_for(&provider);
                let second = cache.features_for(&provider);
                assert_eq!(first, second);
                first
            }
        })
        .await
        .unwrap();

        assert_eq!(cache.probe_count(), 1);
        assert!(features.has(ProviderFeature::Departures));
        assert!(features.has(ProviderFeature::Journeys));
        assert!(!features.has(ProviderFeature::StopSuggestions));
    }
}
