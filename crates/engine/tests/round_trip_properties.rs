//! Save/Load Round-Trip Property Tests
//!
//! These tests generate valid documents and check that persistence is lossless:
//!
//! - load after save returns the candidate apart from `updatedAt` and `integrity`
//! - the fallback mirror holds the same document
//! - a current-version document passes through migration unchanged
//!
//! Generated documents cover several facilities, open attribute maps on every
//! record shape, `facilityId` present and absent, and quarantine references.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use unidb_core::{
    Attributes, Collection, DocumentData, Facilities, FacilityMeta, FacilityStore, LinkedRecord,
    Record, ResidentRef, ScopedRecord, UnifiedDocument,
};
use unidb_durability::migrate;
use unidb_engine::{validate, Database};

fn attribute_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,8}".prop_map(Value::from),
        prop::collection::vec(any::<i32>(), 0..3).prop_map(|v| json!(v)),
        ("[a-z]{1,3}", any::<u16>()).prop_map(|(k, v)| {
            let mut nested = Map::new();
            nested.insert(k, Value::from(v));
            Value::Object(nested)
        }),
    ]
}

/// Attribute names never collide with the fields records carry
fn attributes() -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map("x[a-z]{1,5}", attribute_value(), 0..3)
}

/// (use quarantine, pick index, collection index, attributes)
type LinkedPlan = (bool, usize, usize, Attributes);

/// (scoped, collection index, attributes)
type ScopedPlan = (bool, usize, Attributes);

#[derive(Debug, Clone)]
struct FacilityPlan {
    name: String,
    meta: Attributes,
    residents: BTreeMap<String, Attributes>,
    quarantine: BTreeSet<String>,
    linked: Vec<LinkedPlan>,
    scoped: Vec<ScopedPlan>,
    staff: BTreeMap<String, Attributes>,
}

fn facility_plan() -> impl Strategy<Value = FacilityPlan> {
    (
        "[A-Z][a-z]{0,6}",
        attributes(),
        prop::collection::btree_map("[0-9]{1,3}", attributes(), 0..4),
        prop::collection::btree_set("Q:[a-z0-9]{1,3}", 0..3),
        prop::collection::vec((any::<bool>(), any::<usize>(), 0..6usize, attributes()), 0..6),
        prop::collection::vec((any::<bool>(), 0..3usize, attributes()), 0..4),
        prop::collection::btree_map("s[0-9]{1,2}", attributes(), 0..2),
    )
        .prop_map(
            |(name, meta, residents, quarantine, linked, scoped, staff)| FacilityPlan {
                name,
                meta,
                residents,
                quarantine,
                linked,
                scoped,
                staff,
            },
        )
}

fn linked_mut(store: &mut FacilityStore, idx: usize) -> &mut Collection<LinkedRecord> {
    match idx {
        0 => &mut store.abts,
        1 => &mut store.infections,
        2 => &mut store.vax_events,
        3 => &mut store.notes,
        4 => &mut store.outbreak_cases,
        _ => &mut store.outbreak_exposures,
    }
}

fn scoped_mut(store: &mut FacilityStore, idx: usize) -> &mut Collection<ScopedRecord> {
    match idx {
        0 => &mut store.outbreaks,
        1 => &mut store.export_profiles,
        _ => &mut store.survey_packets,
    }
}

/// A store whose every reference resolves inside itself
fn build_store(facility_id: &str, plan: &FacilityPlan) -> FacilityStore {
    let mut store = FacilityStore::empty();
    for (mrn, attrs) in &plan.residents {
        store.residents.insert(mrn.clone(), Record::new(attrs.clone()));
    }
    for id in &plan.quarantine {
        store.quarantine.insert(id.clone(), Record::default());
    }

    let mrns: Vec<&String> = plan.residents.keys().collect();
    let quarantined: Vec<&String> = plan.quarantine.iter().collect();
    for (n, (use_quarantine, pick, collection, attrs)) in plan.linked.iter().enumerate() {
        let reference = if *use_quarantine && !quarantined.is_empty() {
            ResidentRef::quarantine(quarantined[pick % quarantined.len()].as_str())
        } else if !mrns.is_empty() {
            ResidentRef::mrn(mrns[pick % mrns.len()].as_str())
        } else {
            continue;
        };
        let record = LinkedRecord {
            resident_ref: reference,
            attributes: attrs.clone(),
        };
        linked_mut(&mut store, *collection).insert(format!("l{}", n), record);
    }

    for (n, (scoped, collection, attrs)) in plan.scoped.iter().enumerate() {
        let record = ScopedRecord {
            facility_id: scoped.then(|| facility_id.to_string()),
            attributes: attrs.clone(),
        };
        scoped_mut(&mut store, *collection).insert(format!("p{}", n), record);
    }

    for (id, attrs) in &plan.staff {
        store.staff.insert(id.clone(), Record::new(attrs.clone()));
    }
    store
}

fn document_strategy() -> impl Strategy<Value = UnifiedDocument> {
    (
        prop::collection::btree_map("[a-z]{1,4}", facility_plan(), 1..4),
        any::<usize>(),
        0i64..4_000_000_000_000,
    )
        .prop_map(|(facilities, active, created_millis)| {
            let mut doc = UnifiedDocument::empty();
            let mut by_id = BTreeMap::new();
            let mut facility_data = BTreeMap::new();
            for (id, plan) in &facilities {
                let mut meta = FacilityMeta::new(id.as_str(), plan.name.as_str());
                meta.attributes = plan.meta.clone();
                by_id.insert(id.clone(), meta);
                facility_data.insert(id.clone(), build_store(id, plan));
            }

            let ids: Vec<&String> = facilities.keys().collect();
            let active_facility_id = ids[active % ids.len()].clone();
            doc.data = DocumentData {
                facilities: Facilities {
                    by_id,
                    active_facility_id,
                },
                facility_data,
            };
            doc.created_at = chrono::DateTime::from_timestamp_millis(created_millis)
                .unwrap_or(doc.created_at);
            doc.updated_at = doc.created_at;
            doc
        })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_save_then_load_is_lossless(doc in document_strategy()) {
        prop_assert!(validate(&doc).is_ok());

        let (outcome, loaded, mirrored) = runtime().block_on(async {
            let db = Database::ephemeral();
            let outcome = db.save(doc.clone()).await.unwrap();
            let loaded = db.load().await.unwrap();
            let mirrored = db.load_sync().unwrap();
            (outcome, loaded, mirrored)
        });

        prop_assert_eq!(&loaded, &outcome.document);
        prop_assert_eq!(&mirrored, &outcome.document);
        prop_assert_eq!(&loaded.data, &doc.data);
        prop_assert_eq!(&loaded.schema_name, &doc.schema_name);
        prop_assert_eq!(&loaded.schema_version, &doc.schema_version);
        prop_assert_eq!(loaded.created_at, doc.created_at);
        prop_assert_eq!(loaded.integrity.last_good_bytes, Some(outcome.bytes));
    }

    #[test]
    fn prop_current_version_passes_migration_unchanged(doc in document_strategy()) {
        let migrated = migrate(serde_json::to_value(&doc).unwrap()).unwrap();
        prop_assert_eq!(migrated, doc);
    }
}
