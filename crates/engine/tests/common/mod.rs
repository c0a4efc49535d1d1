//! Shared helpers for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;
use unidb_core::{
    create_empty_document, LinkedRecord, Record, ResidentRef, ScopedRecord, UnifiedDocument,
    DEFAULT_FACILITY_ID,
};
use unidb_engine::Database;
use unidb_storage::testing::FaultyPrimary;
use unidb_storage::{MemoryFallback, MemoryPrimary};

pub type Faulty = Arc<FaultyPrimary<MemoryPrimary>>;

/// A valid document with a resident, a quarantine record and linked records
pub fn sample_doc() -> UnifiedDocument {
    let mut doc = create_empty_document();
    let store = doc.facility_mut(DEFAULT_FACILITY_ID).unwrap();
    store.residents.insert("100".into(), Record::default());
    store.quarantine.insert("Q:7f3".into(), Record::default());
    store.infections.insert(
        "inf-1".into(),
        LinkedRecord::new(ResidentRef::mrn("100"))
            .with_attribute("organism", serde_json::json!("MRSA")),
    );
    store.notes.insert(
        "note-1".into(),
        LinkedRecord::new(ResidentRef::quarantine("Q:7f3")),
    );
    store
        .outbreaks
        .insert("ob-1".into(), ScopedRecord::for_facility(DEFAULT_FACILITY_ID));
    doc
}

/// Add a resident to the default facility
pub fn with_resident(mut doc: UnifiedDocument, mrn: &str) -> UnifiedDocument {
    doc.facility_mut(DEFAULT_FACILITY_ID)
        .unwrap()
        .residents
        .insert(mrn.to_string(), Record::default());
    doc
}

/// Database over a fault-injecting in-memory primary, no fallback
pub async fn faulty_db() -> (Arc<Database>, Faulty) {
    let faulty = Arc::new(FaultyPrimary::new(MemoryPrimary::new()));
    let db = Database::builder()
        .primary(faulty.clone())
        .open()
        .await
        .unwrap();
    (db, faulty)
}

/// Database over in-memory backends; returns handles onto the same data
pub async fn memory_db(capacity: usize) -> (Arc<Database>, MemoryPrimary, MemoryFallback) {
    let primary = MemoryPrimary::new();
    let fallback = MemoryFallback::new(capacity);
    let db = Database::builder()
        .primary(Arc::new(primary.handle()))
        .fallback(Arc::new(fallback.handle()))
        .open()
        .await
        .unwrap();
    (db, primary, fallback)
}
