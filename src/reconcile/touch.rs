//! Per-run liveness tracking.

use std::collections::{HashMap, HashSet};

/// Records which previously cached paths were seen during the current walk.
///
/// Seeded with `false` for every cached path. Any path observed during the
/// walk is set to `true`, whether or not it was cached before. Paths still
/// `false` once the walk is complete no longer exist locally.
#[derive(Debug, Default, Clone)]
pub struct TouchTracker {
    touched: HashMap<String, bool>,
}

impl TouchTracker {
    /// Start a run knowing about `paths`, none of them seen yet.
    #[must_use]
    pub fn seeded<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            touched: paths.into_iter().map(|p| (p, false)).collect(),
        }
    }

    /// Mark `path` as seen in this run.
    pub fn touch(&mut self, path: &str) {
        match self.touched.get_mut(path) {
            Some(seen) => *seen = true,
            None => {
                self.touched.insert(path.to_string(), true);
            }
        }
    }

    /// Whether `path` has been seen in this run.
    #[must_use]
    pub fn is_touched(&self, path: &str) -> bool {
        self.touched.get(path).copied().unwrap_or(false)
    }

    /// Known paths that have not been seen in this run.
    #[must_use]
    pub fn untouched(&self) -> HashSet<String> {
        self.touched
            .iter()
            .filter(|(_, seen)| !**seen)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Number of tracked paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.touched.len()
    }

    /// Whether no path is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }
}
