//! Commit gate
//!
//! Walks a candidate document before any write and rejects it if a
//! cross-reference or facility-scoping rule is broken:
//!
//! - the document carries the schema name and version this engine writes
//! - every registered facility has a record store
//! - every resident reference resolves inside its own facility store:
//!   `mrn` refs against `residents`, `quarantine` refs against `quarantine`
//!   and only for ids carrying the quarantine prefix
//! - an embedded `facilityId` on a facility-scoped record equals the key of
//!   the store holding it
//!
//! [`validate`] stops at the first violation. [`validate_all`] keeps going and
//! collects every violation for diagnostics.

use unidb_core::{
    is_quarantine_id, FacilityStore, ResidentRef, UnifiedDocument, UnresolvedReason,
    ValidationError, CURRENT_SCHEMA_VERSION, SCHEMA_NAME,
};

/// Every violation found in a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Violations in discovery order
    pub errors: Vec<ValidationError>,
    /// Facility stores walked
    pub facilities_checked: usize,
    /// Records whose references were checked
    pub records_checked: usize,
}

impl ValidationReport {
    /// True if no violation was found
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The first violation, as the fail-fast gate would report it
    pub fn into_result(self) -> Result<(), ValidationError> {
        match self.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct Sink {
    report: ValidationReport,
    fail_fast: bool,
}

impl Sink {
    /// Record a violation; true if the walk should stop
    fn push(&mut self, error: ValidationError) -> bool {
        self.report.errors.push(error);
        self.fail_fast
    }
}

/// Run the commit gate, failing on the first violation
pub fn validate(doc: &UnifiedDocument) -> Result<(), ValidationError> {
    walk(doc, true).into_result()
}

/// Run the commit gate and collect every violation
pub fn validate_all(doc: &UnifiedDocument) -> ValidationReport {
    walk(doc, false)
}

fn walk(doc: &UnifiedDocument, fail_fast: bool) -> ValidationReport {
    let mut sink = Sink {
        report: ValidationReport::default(),
        fail_fast,
    };

    // A mistagged document would fail the next load
    let tags = [
        ("schemaName", doc.schema_name.as_str(), SCHEMA_NAME),
        ("schemaVersion", doc.schema_version.as_str(), CURRENT_SCHEMA_VERSION),
    ];
    for (field, found, expected) in tags {
        if found != expected {
            let stop = sink.push(ValidationError::SchemaMismatch {
                field,
                found: found.to_string(),
                expected,
            });
            if stop {
                return sink.report;
            }
        }
    }

    for facility_id in doc.data.facilities.by_id.keys() {
        if !doc.data.facility_data.contains_key(facility_id) {
            let stop = sink.push(ValidationError::MissingFacilityStore {
                facility_id: facility_id.clone(),
            });
            if stop {
                return sink.report;
            }
        }
    }

    for (facility_id, store) in &doc.data.facility_data {
        sink.report.facilities_checked += 1;
        if check_store(facility_id, store, &mut sink) {
            break;
        }
    }
    sink.report
}

/// Check one facility store; true if the walk should stop
fn check_store(facility_id: &str, store: &FacilityStore, sink: &mut Sink) -> bool {
    for (collection, records) in store.resident_linked() {
        for (record_id, record) in records {
            sink.report.records_checked += 1;
            let Some(reason) = unresolved(&record.resident_ref, store) else {
                continue;
            };
            let stop = sink.push(ValidationError::UnresolvedResidentRef {
                facility_id: facility_id.to_string(),
                collection,
                record_id: record_id.clone(),
                reference: record.resident_ref.clone(),
                reason,
            });
            if stop {
                return true;
            }
        }
    }

    for (collection, records) in store.facility_scoped() {
        for (record_id, record) in records {
            sink.report.records_checked += 1;
            let Some(declared) = record.facility_id.as_deref() else {
                continue;
            };
            if declared == facility_id {
                continue;
            }
            let stop = sink.push(ValidationError::CrossFacilityRecord {
                collection,
                record_id: record_id.clone(),
                declared: declared.to_string(),
                actual: facility_id.to_string(),
            });
            if stop {
                return true;
            }
        }
    }
    false
}

fn unresolved(reference: &ResidentRef, store: &FacilityStore) -> Option<UnresolvedReason> {
    match reference {
        ResidentRef::Mrn { id } if !store.residents.contains_key(id) => {
            Some(UnresolvedReason::MissingResident)
        }
        ResidentRef::Quarantine { id } if !is_quarantine_id(id) => {
            Some(UnresolvedReason::NotQuarantineId)
        }
        ResidentRef::Quarantine { id } if !store.quarantine.contains_key(id) => {
            Some(UnresolvedReason::MissingQuarantine)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unidb_core::{
        create_empty_document, CollectionKind, FacilityMeta, LinkedRecord, Record, ScopedRecord,
        DEFAULT_FACILITY_ID,
    };

    fn store(doc: &mut UnifiedDocument) -> &mut FacilityStore {
        doc.facility_mut(DEFAULT_FACILITY_ID).unwrap()
    }

    #[test]
    fn test_empty_document_passes() {
        let doc = create_empty_document();
        assert!(validate(&doc).is_ok());
        let report = validate_all(&doc);
        assert!(report.is_valid());
        assert_eq!(report.facilities_checked, 1);
    }

    #[test]
    fn test_schema_tags_checked_first() {
        let mut doc = create_empty_document();
        doc.schema_version = "UNIFIED_DB_V9".to_string();
        doc.data.facility_data.clear();

        match validate(&doc).unwrap_err() {
            ValidationError::SchemaMismatch { field, found, .. } => {
                assert_eq!(field, "schemaVersion");
                assert_eq!(found, "UNIFIED_DB_V9");
            }
            other => panic!("unexpected violation: {other}"),
        }

        doc.schema_name = "OTHER".to_string();
        let report = validate_all(&doc);
        assert_eq!(report.errors.len(), 3);
        assert!(matches!(
            report.errors[0],
            ValidationError::SchemaMismatch { field: "schemaName", .. }
        ));
    }

    #[test]
    fn test_dangling_mrn_rejected_then_fixed() {
        let mut doc = create_empty_document();
        store(&mut doc)
            .notes
            .insert("n1".into(), LinkedRecord::new(ResidentRef::mrn("100")));

        let err = validate(&doc).unwrap_err();
        match &err {
            ValidationError::UnresolvedResidentRef {
                collection,
                record_id,
                reason,
                ..
            } => {
                assert_eq!(*collection, CollectionKind::Notes);
                assert_eq!(record_id, "n1");
                assert_eq!(*reason, UnresolvedReason::MissingResident);
            }
            other => panic!("unexpected violation: {other}"),
        }

        store(&mut doc).residents.insert("100".into(), Record::default());
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn test_dangling_mrn_fixed_by_removing_record() {
        let mut doc = create_empty_document();
        store(&mut doc)
            .abts
            .insert("a1".into(), LinkedRecord::new(ResidentRef::mrn("404")));
        assert!(validate(&doc).is_err());

        store(&mut doc).abts.remove("a1");
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn test_missing_quarantine_record_named_in_error() {
        let mut doc = create_empty_document();
        store(&mut doc).infections.insert(
            "inf-7".into(),
            LinkedRecord::new(ResidentRef::quarantine("Q:abc")),
        );

        let err = validate(&doc).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("inf-7"));
        assert!(msg.contains("Q:abc"));
        assert!(matches!(
            err,
            ValidationError::UnresolvedResidentRef {
                reason: UnresolvedReason::MissingQuarantine,
                ..
            }
        ));
    }

    #[test]
    fn test_quarantine_ref_requires_prefix() {
        let mut doc = create_empty_document();
        let s = store(&mut doc);
        // Present in quarantine but lacks the prefix
        s.quarantine.insert("100".into(), Record::default());
        s.vax_events
            .insert("v1".into(), LinkedRecord::new(ResidentRef::quarantine("100")));

        let err = validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnresolvedResidentRef {
                reason: UnresolvedReason::NotQuarantineId,
                ..
            }
        ));
    }

    #[test]
    fn test_quarantine_ref_resolves() {
        let mut doc = create_empty_document();
        let s = store(&mut doc);
        s.quarantine.insert("Q:abc".into(), Record::default());
        s.outbreak_cases.insert(
            "c1".into(),
            LinkedRecord::new(ResidentRef::quarantine("Q:abc")),
        );
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn test_mrn_ref_does_not_resolve_against_other_facility() {
        let mut doc = create_empty_document();
        doc.add_facility(FacilityMeta::new("f2", "Second"));
        store(&mut doc).residents.insert("100".into(), Record::default());
        doc.facility_mut("f2")
            .unwrap()
            .outbreak_exposures
            .insert("e1".into(), LinkedRecord::new(ResidentRef::mrn("100")));

        let err = validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnresolvedResidentRef { ref facility_id, .. } if facility_id == "f2"
        ));
    }

    #[test]
    fn test_cross_facility_record_rejected_then_fixed() {
        let mut doc = create_empty_document();
        doc.add_facility(FacilityMeta::new("f2", "Second"));
        store(&mut doc)
            .outbreaks
            .insert("ob-1".into(), ScopedRecord::for_facility("f2"));

        let err = validate(&doc).unwrap_err();
        assert_eq!(
            err,
            ValidationError::CrossFacilityRecord {
                collection: CollectionKind::Outbreaks,
                record_id: "ob-1".into(),
                declared: "f2".into(),
                actual: DEFAULT_FACILITY_ID.into(),
            }
        );

        store(&mut doc)
            .outbreaks
            .insert("ob-1".into(), ScopedRecord::for_facility(DEFAULT_FACILITY_ID));
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn test_unscoped_record_passes() {
        let mut doc = create_empty_document();
        store(&mut doc)
            .survey_packets
            .insert("p1".into(), ScopedRecord::unscoped());
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn test_missing_facility_store_rejected() {
        let mut doc = create_empty_document();
        doc.data
            .facilities
            .by_id
            .insert("ghost".into(), FacilityMeta::new("ghost", "Ghost"));

        assert_eq!(
            validate(&doc).unwrap_err(),
            ValidationError::MissingFacilityStore {
                facility_id: "ghost".into()
            }
        );
    }

    #[test]
    fn test_validate_all_collects_every_violation() {
        let mut doc = create_empty_document();
        doc.add_facility(FacilityMeta::new("f2", "Second"));
        let s = store(&mut doc);
        s.notes
            .insert("n1".into(), LinkedRecord::new(ResidentRef::mrn("1")));
        s.notes
            .insert("n2".into(), LinkedRecord::new(ResidentRef::mrn("2")));
        s.export_profiles
            .insert("x1".into(), ScopedRecord::for_facility("f2"));

        let report = validate_all(&doc);
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.facilities_checked, 2);

        let first = report.clone().into_result().unwrap_err();
        assert_eq!(first, validate(&doc).unwrap_err());
    }
}
