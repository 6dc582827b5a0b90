//! Foreign-key code lookups
//!
//! Import rows reference parent entities by their human codes (state code,
//! district code, ...). A [`ReferenceIndex`] is a snapshot of those codes taken
//! once per job so that row validation stays free of I/O.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

use super::processor::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    State,
    District,
    Constituency,
    Ward,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::State => "state",
            ReferenceKind::District => "district",
            ReferenceKind::Constituency => "constituency",
            ReferenceKind::Ward => "ward",
        }
    }

    /// Column on the referencing entity that stores the resolved id
    pub fn id_column(&self) -> &'static str {
        match self {
            ReferenceKind::State => "state_id",
            ReferenceKind::District => "district_id",
            ReferenceKind::Constituency => "constituency_id",
            ReferenceKind::Ward => "ward_id",
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of code-to-id mappings for parent entities
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn load(&self, kind: ReferenceKind) -> Result<HashMap<String, i64>, CollaboratorError>;
}

/// Code-to-id snapshot for the reference kinds one resource needs
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    codes: HashMap<ReferenceKind, HashMap<String, i64>>,
}

impl ReferenceIndex {
    pub async fn load(
        lookup: &dyn ReferenceLookup,
        kinds: &[ReferenceKind],
    ) -> Result<Self, CollaboratorError> {
        let mut index = Self::default();
        for kind in kinds {
            if index.codes.contains_key(kind) {
                continue;
            }
            let codes = lookup.load(*kind).await?;
            tracing::debug!(kind = %kind, codes = codes.len(), "Loaded reference codes");
            index.insert(*kind, codes);
        }
        Ok(index)
    }

    pub fn insert(&mut self, kind: ReferenceKind, codes: HashMap<String, i64>) {
        let codes = codes
            .into_iter()
            .map(|(code, id)| (normalize_code(&code), id))
            .collect();
        self.codes.insert(kind, codes);
    }

    pub fn resolve(&self, kind: ReferenceKind, code: &str) -> Option<i64> {
        self.codes.get(&kind)?.get(&normalize_code(code)).copied()
    }

    pub fn contains(&self, kind: ReferenceKind, code: &str) -> bool {
        self.resolve(kind, code).is_some()
    }
}

/// Codes are matched case-insensitively
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLookup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReferenceLookup for CountingLookup {
        async fn load(
            &self,
            kind: ReferenceKind,
        ) -> Result<HashMap<String, i64>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match kind {
                ReferenceKind::State => HashMap::from([("ka".to_string(), 1)]),
                _ => HashMap::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_index_resolves_case_insensitively() {
        let lookup = CountingLookup {
            calls: AtomicUsize::new(0),
        };
        let index = ReferenceIndex::load(
            &lookup,
            &[ReferenceKind::State, ReferenceKind::District, ReferenceKind::State],
        )
        .await
        .unwrap();

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
        assert_eq!(index.resolve(ReferenceKind::State, " KA "), Some(1));
        assert!(!index.contains(ReferenceKind::District, "KA-01"));
        assert!(!index.contains(ReferenceKind::Ward, "anything"));
    }
}
