#![no_main]
use libfuzzer_sys::fuzz_target;
use rescue_core::{EventBus, ProtocolStore};
use std::sync::Arc;

fuzz_target!(|data: &str| {
    let entries = rescue_config::parse_protocol_docs(data).map(|d| d.len());

    let store = ProtocolStore::new(Arc::new(EventBus::new()));
    match store.import_json(data) {
        Ok(report) => {
            let entries = entries.unwrap_or_default();
            assert_eq!(report.registered.len() + report.rejected.len(), entries);
            // Everything that made it in must be schedulable
            for p in store.list() {
                assert!(!p.steps.is_empty());
                assert!(p.steps.iter().all(|s| s.duration_minutes > 0.0 && s.dose_mg > 0.0));
            }
        }
        Err(_) => assert!(entries.is_err()),
    }
});
