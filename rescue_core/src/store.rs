//! Protocol registry keyed by id.
//!
//! Protocols are stored as `Arc<Protocol>`; replacing an id installs a new
//! allocation, so a run holding the previous `Arc` keeps its snapshot.

use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus, ListChange};
use crate::protocol::{Protocol, ProtocolId};
use eyre::WrapErr;
use rescue_config::ProtocolDoc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Outcome of a batch import: valid entries are registered independently.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportReport {
    pub registered: Vec<ProtocolId>,
    pub rejected: Vec<EngineError>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

pub struct ProtocolStore {
    protocols: RwLock<BTreeMap<ProtocolId, Arc<Protocol>>>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for ProtocolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolStore")
            .field("len", &self.len())
            .finish()
    }
}

impl ProtocolStore {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            protocols: RwLock::new(BTreeMap::new()),
            bus,
        }
    }

    /// Insert or replace by id. Returns the replaced protocol, if any.
    pub fn register(&self, protocol: Protocol) -> Result<Option<Arc<Protocol>>> {
        protocol.validate()?;
        let id = protocol.id;
        let name = protocol.name.clone();
        let previous = self
            .protocols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(protocol));
        let change = if previous.is_some() {
            ListChange::Replaced
        } else {
            ListChange::Registered
        };
        tracing::info!(protocol_id = id, name = %name, ?change, "protocol registered");
        self.bus.publish(&EngineEvent::ProtocolListChanged {
            protocol_id: id,
            change,
        });
        Ok(previous)
    }

    pub fn get(&self, id: ProtocolId) -> Option<Arc<Protocol>> {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: ProtocolId) -> Option<Arc<Protocol>> {
        let removed = self
            .protocols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            tracing::info!(protocol_id = id, "protocol removed");
            self.bus.publish(&EngineEvent::ProtocolListChanged {
                protocol_id: id,
                change: ListChange::Removed,
            });
        }
        removed
    }

    /// Snapshot sorted by id.
    pub fn list(&self) -> Vec<Arc<Protocol>> {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register already-parsed import entries, collecting per-entry failures.
    pub fn import_docs(
        &self,
        docs: impl IntoIterator<Item = std::result::Result<ProtocolDoc, serde_json::Error>>,
    ) -> ImportReport {
        let mut report = ImportReport::default();
        for (index, entry) in docs.into_iter().enumerate() {
            let outcome = entry
                .map_err(|e| EngineError::invalid(None, e.to_string()))
                .and_then(|doc| Protocol::try_from(&doc))
                .and_then(|p| {
                    let id = p.id;
                    self.register(p).map(|_| id)
                });
            match outcome {
                Ok(id) => report.registered.push(id),
                Err(e) => {
                    let e = e.at_index(index);
                    tracing::warn!(error = %e, "protocol import entry rejected");
                    report.rejected.push(e);
                }
            }
        }
        report
    }

    /// Import a JSON object or array of protocol objects.
    pub fn import_json(&self, text: &str) -> Result<ImportReport> {
        let docs = rescue_config::parse_protocol_docs(text)
            .map_err(|e| EngineError::invalid(None, format!("{e:#}")))?;
        Ok(self.import_docs(docs))
    }

    pub fn import_file(&self, path: &Path) -> eyre::Result<ImportReport> {
        let docs = rescue_config::load_protocol_docs(path)?;
        let report = self.import_docs(docs);
        tracing::info!(
            path = %path.display(),
            registered = report.registered.len(),
            rejected = report.rejected.len(),
            "protocol file imported"
        );
        Ok(report)
    }
}

/// Read and import a protocol file, failing when any entry was rejected.
pub fn import_file_strict(store: &ProtocolStore, path: &Path) -> eyre::Result<Vec<ProtocolId>> {
    let report = store.import_file(path)?;
    if let Some(first) = report.rejected.first() {
        return Err(eyre::Report::new(first.clone())).wrap_err_with(|| {
            format!(
                "{} of {} protocol entries in {} were rejected",
                report.rejected.len(),
                report.rejected.len() + report.registered.len(),
                path.display()
            )
        });
    }
    Ok(report.registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::default_protocol;

    #[test]
    fn list_is_sorted_by_id() {
        let store = ProtocolStore::new(Arc::new(EventBus::new()));
        for id in [5, 1, 3] {
            let mut p = default_protocol();
            p.id = id;
            store.register(p).unwrap();
        }
        let ids: Vec<_> = store.list().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn remove_unknown_is_silent() {
        let bus = Arc::new(EventBus::new());
        let rx = bus.subscribe_channel();
        let store = ProtocolStore::new(bus);
        assert!(store.remove(42).is_none());
        assert!(rx.try_recv().is_err());
    }
}
