//! Read-only view of the connected-service registry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Flavour of a connected service. Each kind authenticates with its own
/// registered client id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    CloudController,
    CodeEngine,
    ServiceManager,
}

/// Registry entry for one connected service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub guid: String,
    #[serde(default)]
    pub name: String,
    /// Base URL of the target's OAuth2 server
    pub authorization_endpoint: String,
    pub api_endpoint: String,
    pub kind: TargetKind,
    #[serde(default)]
    pub skip_tls_verification: bool,
}

/// Lookup of registered targets. Registration itself happens elsewhere.
pub trait TargetRegistry: Send + Sync {
    fn find(&self, guid: &str) -> Option<TargetRecord>;
}

/// Registry populated once from configuration.
#[derive(Default)]
pub struct StaticTargetRegistry {
    targets: DashMap<String, TargetRecord>,
}

impl StaticTargetRegistry {
    pub fn new(records: impl IntoIterator<Item = TargetRecord>) -> Self {
        let targets = DashMap::new();
        for record in records {
            targets.insert(record.guid.clone(), record);
        }
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl TargetRegistry for StaticTargetRegistry {
    fn find(&self, guid: &str) -> Option<TargetRecord> {
        self.targets.get(guid).map(|entry| entry.value().clone())
    }
}
