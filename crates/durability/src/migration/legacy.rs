//! Legacy upgrade step
//!
//! Upgrades documents declaring `UNIFIED_DB_V1` or no version at all.
//!
//! The step only ever adds what is missing:
//! - `schemaName`, `createdAt`, `updatedAt` and an empty `integrity` block
//! - a `facilities` block with one default facility if the document has none
//! - an empty store in `facilityData` for every registered facility lacking one
//! - an empty map for every collection an existing store lacks
//!
//! `schemaName` is always stamped with the name this engine writes.
//!
//! Values that are present are never overwritten, except timestamps. Those
//! are rewritten as RFC 3339 strings from epoch milliseconds, naive datetimes
//! or bare dates; one that cannot be read falls back to `now` (or `createdAt`
//! for `updatedAt`) and an unreadable `lastGoodWriteAt` is dropped. Any other
//! present value of the wrong shape is left alone and surfaces as a decode
//! error when the document is converted.

use super::{MigrationContext, MigrationReport, MigrationStep, RawDocument};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use unidb_core::{CollectionKind, CURRENT_SCHEMA_VERSION, DEFAULT_FACILITY_ID, SCHEMA_NAME};

/// Version tag written by the first unified schema
pub const LEGACY_VERSION: &str = "UNIFIED_DB_V1";

/// Upgrade step from the legacy schema to `UNIFIED_DB_V2`
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyToV2;

impl MigrationStep for LegacyToV2 {
    fn name(&self) -> &'static str {
        "legacy-to-v2"
    }

    fn accepts(&self, version: Option<&str>) -> bool {
        matches!(version, None | Some(LEGACY_VERSION))
    }

    fn target_version(&self) -> &'static str {
        CURRENT_SCHEMA_VERSION
    }

    fn apply(&self, doc: &mut RawDocument, ctx: &MigrationContext, report: &mut MigrationReport) {
        let root = doc.root_mut();
        ensure_schema_name(root);
        ensure_timestamps(root, ctx.now);
        ensure_integrity(root);

        let Some(data) = object_entry(root, "data") else {
            return;
        };
        ensure_facilities(data, ctx);
        backfill_facility_data(data, report);
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// The object at `key`, created if missing; None if a non-object is present
fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    let slot = map.entry(key.to_string()).or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut()
}

fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339())
}

/// Read a legacy timestamp: epoch millis, RFC 3339, a naive datetime or a bare date
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::<Utc>::from_timestamp_millis(millis)
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

/// Rewrite a timestamp as RFC 3339, or replace it with `default` if unreadable
fn normalize_timestamp(map: &mut Map<String, Value>, key: &str, default: &Value) {
    let ts = map
        .get(key)
        .and_then(parse_timestamp)
        .map(timestamp_value)
        .unwrap_or_else(|| default.clone());
    map.insert(key.to_string(), ts);
}

fn ensure_schema_name(root: &mut Map<String, Value>) {
    root.insert("schemaName".to_string(), Value::String(SCHEMA_NAME.to_string()));
}

fn ensure_timestamps(root: &mut Map<String, Value>, now: DateTime<Utc>) {
    let now = timestamp_value(now);
    normalize_timestamp(root, "createdAt", &now);
    let created = root.get("createdAt").cloned().unwrap_or(now);
    normalize_timestamp(root, "updatedAt", &created);
}

fn ensure_integrity(root: &mut Map<String, Value>) {
    let slot = root
        .entry("integrity".to_string())
        .or_insert(Value::Null);
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    let Some(integrity) = slot.as_object_mut() else {
        return;
    };
    if is_missing(integrity.get("lastGoodWriteAt")) {
        return;
    }
    match integrity.get("lastGoodWriteAt").and_then(parse_timestamp) {
        Some(ts) => integrity.insert("lastGoodWriteAt".to_string(), timestamp_value(ts)),
        None => integrity.remove("lastGoodWriteAt"),
    };
}

fn default_facility(ctx: &MigrationContext) -> Value {
    let mut meta = Map::new();
    meta.insert("id".to_string(), Value::String(DEFAULT_FACILITY_ID.to_string()));
    meta.insert(
        "name".to_string(),
        Value::String(ctx.default_facility_name.clone()),
    );
    Value::Object(meta)
}

fn ensure_facilities(data: &mut Map<String, Value>, ctx: &MigrationContext) {
    let Some(facilities) = object_entry(data, "facilities") else {
        return;
    };

    if is_missing(facilities.get("byId")) {
        let mut by_id = Map::new();
        by_id.insert(DEFAULT_FACILITY_ID.to_string(), default_facility(ctx));
        facilities.insert("byId".to_string(), Value::Object(by_id));
    }

    let mut first_id = None;
    if let Some(by_id) = facilities.get_mut("byId").and_then(Value::as_object_mut) {
        for (id, meta) in by_id.iter_mut() {
            first_id.get_or_insert_with(|| id.clone());
            if let Some(meta) = meta.as_object_mut() {
                if is_missing(meta.get("id")) {
                    meta.insert("id".to_string(), Value::String(id.clone()));
                }
            }
        }
    }

    let active_missing = match facilities.get("activeFacilityId") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if active_missing {
        if let Some(id) = first_id {
            facilities.insert("activeFacilityId".to_string(), Value::String(id));
        }
    }
}

fn registered_facility_ids(data: &Map<String, Value>) -> Vec<String> {
    data.get("facilities")
        .and_then(|f| f.get("byId"))
        .and_then(Value::as_object)
        .map(|by_id| by_id.keys().cloned().collect())
        .unwrap_or_default()
}

fn backfill_facility_data(data: &mut Map<String, Value>, report: &mut MigrationReport) {
    let facility_ids = registered_facility_ids(data);
    let Some(facility_data) = object_entry(data, "facilityData") else {
        return;
    };

    for id in facility_ids {
        if is_missing(facility_data.get(&id)) {
            facility_data.insert(id, Value::Object(Map::new()));
            report.facilities_backfilled += 1;
        }
    }

    for store in facility_data.values_mut() {
        let Some(store) = store.as_object_mut() else {
            continue;
        };
        for kind in CollectionKind::ALL {
            if is_missing(store.get(kind.as_str())) {
                store.insert(kind.as_str().to_string(), Value::Object(Map::new()));
                report.collections_backfilled += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{migrate, migrate_with_report};
    use serde_json::json;
    use unidb_core::ResidentRef;

    fn fixed_ctx() -> MigrationContext {
        MigrationContext {
            default_facility_name: "Default Facility".to_string(),
            now: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    fn legacy_doc() -> Value {
        json!({
            "schemaName": "UNIFIED_DB",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-02-01T00:00:00Z",
            "data": {
                "facilities": {
                    "byId": { "f1": { "id": "f1", "name": "North" } },
                    "activeFacilityId": "f1"
                },
                "facilityData": {
                    "f1": {
                        "residents": { "100": { "name": "A. Resident" } },
                        "infections": {
                            "inf-1": { "residentRef": { "kind": "mrn", "id": "100" }, "organism": "MRSA" }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_accepts_legacy_tags_only() {
        assert!(LegacyToV2.accepts(None));
        assert!(LegacyToV2.accepts(Some("UNIFIED_DB_V1")));
        assert!(!LegacyToV2.accepts(Some("UNIFIED_DB_V2")));
        assert!(!LegacyToV2.accepts(Some("UNIFIED_DB_V3")));
    }

    #[test]
    fn test_backfills_audit_items_without_touching_existing() {
        let doc = migrate(legacy_doc()).unwrap();
        assert_eq!(doc.schema_version, "UNIFIED_DB_V2");

        let store = doc.facility("f1").unwrap();
        assert!(store.infection_control_audit_items.is_empty());
        assert_eq!(store.residents.len(), 1);
        assert_eq!(store.infections.len(), 1);
        assert_eq!(
            store.infections["inf-1"].resident_ref,
            ResidentRef::mrn("100")
        );
        assert_eq!(store.infections["inf-1"].attributes["organism"], json!("MRSA"));
    }

    #[test]
    fn test_creates_default_facility_when_absent() {
        let (doc, report) = migrate_with_report(json!({"schemaVersion": "UNIFIED_DB_V1"})).unwrap();
        assert_eq!(doc.data.facilities.active_facility_id, DEFAULT_FACILITY_ID);
        assert!(doc.facility(DEFAULT_FACILITY_ID).unwrap().is_empty());
        assert_eq!(report.facilities_backfilled, 1);
        assert_eq!(report.collections_backfilled, CollectionKind::ALL.len());
    }

    #[test]
    fn test_backfills_store_for_registered_facility() {
        let raw = json!({
            "data": {
                "facilities": {
                    "byId": { "f1": { "name": "One" }, "f2": { "name": "Two" } },
                    "activeFacilityId": "f2"
                },
                "facilityData": { "f1": { "staff": { "s1": {} } } }
            }
        });
        let (doc, report) = migrate_with_report(raw).unwrap();
        assert_eq!(report.facilities_backfilled, 1);
        assert_eq!(doc.facility("f1").unwrap().staff.len(), 1);
        assert!(doc.facility("f2").unwrap().is_empty());
        assert_eq!(doc.data.facilities.by_id["f1"].id, "f1");
    }

    #[test]
    fn test_active_facility_defaults_to_first() {
        let raw = json!({
            "data": { "facilities": { "byId": { "b": {}, "a": {} } } }
        });
        let doc = migrate(raw).unwrap();
        assert_eq!(doc.data.facilities.active_facility_id, "a");
    }

    #[test]
    fn test_numeric_timestamps_normalized() {
        let raw = json!({
            "createdAt": 1_700_000_000_000_i64,
            "integrity": { "lastGoodWriteAt": 1_700_000_000_000_i64, "lastGoodBytes": 10 }
        });
        let doc = migrate(raw).unwrap();
        assert_eq!(doc.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(doc.updated_at, doc.created_at);
        assert_eq!(doc.integrity.last_good_bytes, Some(10));
        assert_eq!(
            doc.integrity.last_good_write_at.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_string_timestamps_normalized() {
        let raw = json!({
            "createdAt": "2024-01-01",
            "updatedAt": "2024-03-05T10:30:00",
            "integrity": { "lastGoodWriteAt": "2024-03-05T10:30:00+02:00" }
        });
        let doc = migrate(raw).unwrap();
        assert_eq!(doc.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(doc.updated_at.to_rfc3339(), "2024-03-05T10:30:00+00:00");
        assert_eq!(
            doc.integrity.last_good_write_at.map(|t| t.to_rfc3339()),
            Some("2024-03-05T08:30:00+00:00".to_string())
        );
    }

    #[test]
    fn test_unreadable_timestamps_replaced() {
        let raw = json!({
            "createdAt": "last tuesday",
            "updatedAt": { "not": "a time" },
            "integrity": { "lastGoodWriteAt": "soon", "lastGoodBytes": 7 }
        });
        let mut doc = RawDocument::from_value(raw).unwrap().unwrap();
        LegacyToV2.apply(&mut doc, &fixed_ctx(), &mut MigrationReport::default());
        let value = doc.into_value();

        let now = fixed_ctx().now.to_rfc3339();
        assert_eq!(value["createdAt"], json!(now));
        assert_eq!(value["updatedAt"], json!(now));
        assert!(value["integrity"].get("lastGoodWriteAt").is_none());
        assert_eq!(value["integrity"]["lastGoodBytes"], json!(7));
    }

    #[test]
    fn test_wrong_shape_collection_is_not_overwritten() {
        let raw = json!({
            "data": {
                "facilities": { "byId": { "f1": {} }, "activeFacilityId": "f1" },
                "facilityData": { "f1": { "residents": ["not", "a", "map"] } }
            }
        });
        let mut doc = RawDocument::from_value(raw).unwrap().unwrap();
        LegacyToV2.apply(&mut doc, &fixed_ctx(), &mut MigrationReport::default());
        let value = doc.into_value();
        assert_eq!(
            value["data"]["facilityData"]["f1"]["residents"],
            json!(["not", "a", "map"])
        );
    }

    #[test]
    fn test_step_is_idempotent() {
        let ctx = fixed_ctx();
        let mut once = RawDocument::from_value(legacy_doc()).unwrap().unwrap();
        LegacyToV2.apply(&mut once, &ctx, &mut MigrationReport::default());

        let mut twice = once.clone();
        let mut report = MigrationReport::default();
        LegacyToV2.apply(&mut twice, &ctx, &mut report);

        assert_eq!(once, twice);
        assert_eq!(report.collections_backfilled, 0);
        assert_eq!(report.facilities_backfilled, 0);
    }
}
