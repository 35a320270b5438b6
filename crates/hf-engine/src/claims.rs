//! Key-granular writer claims.
//!
//! A run claims the surrogate keys it may write on each target relation before
//! reading them. Claims on overlapping keys fail fast; disjoint runs proceed
//! concurrently. Claims are released when the guard drops.

use crate::error::{EngineError, EngineResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

type ClaimMap = HashMap<String, HashSet<String>>;

/// Shared registry of claimed `(target, key)` pairs
#[derive(Debug, Clone, Default)]
pub struct ClaimRegistry {
    inner: Arc<Mutex<ClaimMap>>,
}

impl ClaimRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `keys` on every one of `targets`, all or nothing
    pub fn claim(&self, targets: &[&str], keys: &[String]) -> EngineResult<ClaimGuard> {
        let mut guard = ClaimGuard {
            registry: self.clone(),
            targets: targets.iter().map(|t| t.to_string()).collect(),
            keys: Vec::new(),
        };
        guard.extend(keys)?;
        Ok(guard)
    }

    /// Number of keys currently claimed on `target`
    pub fn claimed_count(&self, target: &str) -> usize {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.get(target).map_or(0, HashSet::len)
    }
}

/// Claims held by one run
#[derive(Debug)]
pub struct ClaimGuard {
    registry: ClaimRegistry,
    targets: Vec<String>,
    keys: Vec<String>,
}

impl ClaimGuard {
    /// Add keys to the claim. Keys the guard already holds are ignored.
    pub fn extend(&mut self, keys: &[String]) -> EngineResult<()> {
        let mut map = self
            .registry
            .inner
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let own: HashSet<&str> = self.keys.iter().map(String::as_str).collect();
        let fresh: Vec<&String> = keys
            .iter()
            .filter(|k| !own.contains(k.as_str()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for target in &self.targets {
            if let Some(held) = map.get(target) {
                if let Some(key) = fresh.iter().find(|k| held.contains(k.as_str())) {
                    return Err(EngineError::WriterConflict {
                        target: target.clone(),
                        surrogate_key: (*key).clone(),
                    });
                }
            }
        }

        for target in &self.targets {
            let held = map.entry(target.clone()).or_default();
            held.extend(fresh.iter().map(|k| (*k).clone()));
        }
        self.keys.extend(fresh.into_iter().cloned());
        Ok(())
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are held
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let mut map = self
            .registry
            .inner
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        for target in &self.targets {
            if let Some(held) = map.get_mut(target) {
                for key in &self.keys {
                    held.remove(key);
                }
                if held.is_empty() {
                    map.remove(target);
                }
            }
        }
    }
}
