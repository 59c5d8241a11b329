use indexmap::IndexMap;
use serde::Serialize;

/// Where a bug's triage inputs come from.
///
/// External bugs are identified by a public report URL and go through the
/// full fetch/parse pipeline. Internal bugs are tracked by a pre-known
/// kernel commit hash and share one kernel config reference, so fetch and
/// parse are bypassed for them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BugOrigin {
    External { url: String },
    Internal { commit: String },
}

/// A single bug queued for triage. Immutable once created.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BugReference {
    /// Opaque identifier used in logs and the run summary
    pub id: String,
    pub origin: BugOrigin,
}

impl BugReference {
    pub fn external(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: url.clone(),
            origin: BugOrigin::External { url },
        }
    }

    pub fn internal(id: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin: BugOrigin::Internal {
                commit: commit.into(),
            },
        }
    }
}

/// The queue of bugs for one triage run.
#[derive(Debug, Clone)]
pub enum BugSource {
    /// External report URLs, triaged in list order
    External { urls: Vec<String> },
    /// Internal bug id -> commit hash, triaged in map order
    Internal { bugs: IndexMap<String, String> },
}

impl BugSource {
    pub fn len(&self) -> usize {
        match self {
            Self::External { urls } => urls.len(),
            Self::Internal { bugs } => bugs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IntoIterator for BugSource {
    type Item = BugReference;
    type IntoIter = std::vec::IntoIter<BugReference>;

    fn into_iter(self) -> Self::IntoIter {
        let refs: Vec<BugReference> = match self {
            Self::External { urls } => urls.into_iter().map(BugReference::external).collect(),
            Self::Internal { bugs } => bugs
                .into_iter()
                .map(|(id, commit)| BugReference::internal(id, commit))
                .collect(),
        };
        refs.into_iter()
    }
}
