//! The unified document
//!
//! A single root aggregate holds every facility and all of its records.
//! The document is pure data: it performs no I/O and knows nothing about
//! backends or schema migration.
//!
//! ## Persisted shape
//!
//! ```text
//! {
//!   "schemaName": "UNIFIED_DB",
//!   "schemaVersion": "UNIFIED_DB_V2",
//!   "createdAt": "...", "updatedAt": "...",
//!   "integrity": { "lastGoodWriteAt": "...", "lastGoodBytes": 1234 },
//!   "data": {
//!     "facilities": { "byId": { ... }, "activeFacilityId": "..." },
//!     "facilityData": { "<facilityId>": { "residents": {}, ... } }
//!   }
//! }
//! ```

use crate::facility::FacilityStore;
use crate::record::Attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag identifying the document family
pub const SCHEMA_NAME: &str = "UNIFIED_DB";

/// Schema version every loaded document is upgraded to
pub const CURRENT_SCHEMA_VERSION: &str = "UNIFIED_DB_V2";

/// Identifier of the facility synthesized for a fresh document
pub const DEFAULT_FACILITY_ID: &str = "facility-default";

/// Display name of the facility synthesized for a fresh document
pub const DEFAULT_FACILITY_NAME: &str = "Default Facility";

/// Metadata of the last fully committed write
///
/// Written only after a save has committed MAIN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Integrity {
    /// `updatedAt` of the committed document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_good_write_at: Option<DateTime<Utc>>,
    /// Serialized size of the committed document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_good_bytes: Option<u64>,
}

/// Descriptive metadata for one facility
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacilityMeta {
    /// Facility identifier (matches its key in `byId`)
    #[serde(default)]
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Application fields
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl FacilityMeta {
    /// Build facility metadata
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        FacilityMeta {
            id: id.into(),
            name: name.into(),
            attributes: Attributes::new(),
        }
    }
}

/// Facility registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Facilities {
    /// All known facilities
    pub by_id: BTreeMap<String, FacilityMeta>,
    /// Facility the caller is currently working in
    pub active_facility_id: String,
}

/// Document payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocumentData {
    /// Facility registry
    pub facilities: Facilities,
    /// Record collections per facility id
    pub facility_data: BTreeMap<String, FacilityStore>,
}

/// The single root aggregate persisted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedDocument {
    /// Document family tag, always [`SCHEMA_NAME`]
    pub schema_name: String,
    /// Schema version tag, always [`CURRENT_SCHEMA_VERSION`] once migrated
    pub schema_version: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last successful save
    pub updated_at: DateTime<Utc>,
    /// Metadata of the last committed write
    #[serde(default)]
    pub integrity: Integrity,
    /// Facilities and their records
    pub data: DocumentData,
}

impl UnifiedDocument {
    /// A fresh document with a single empty default facility
    pub fn empty() -> Self {
        Self::empty_with_facility_name(DEFAULT_FACILITY_NAME)
    }

    /// A fresh document whose default facility carries `name`
    pub fn empty_with_facility_name(name: &str) -> Self {
        let now = Utc::now();
        let mut by_id = BTreeMap::new();
        by_id.insert(
            DEFAULT_FACILITY_ID.to_string(),
            FacilityMeta::new(DEFAULT_FACILITY_ID, name),
        );
        let mut facility_data = BTreeMap::new();
        facility_data.insert(DEFAULT_FACILITY_ID.to_string(), FacilityStore::empty());

        UnifiedDocument {
            schema_name: SCHEMA_NAME.to_string(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            integrity: Integrity::default(),
            data: DocumentData {
                facilities: Facilities {
                    by_id,
                    active_facility_id: DEFAULT_FACILITY_ID.to_string(),
                },
                facility_data,
            },
        }
    }

    /// Records of one facility
    pub fn facility(&self, facility_id: &str) -> Option<&FacilityStore> {
        self.data.facility_data.get(facility_id)
    }

    /// Mutable records of one facility
    pub fn facility_mut(&mut self, facility_id: &str) -> Option<&mut FacilityStore> {
        self.data.facility_data.get_mut(facility_id)
    }

    /// Records of the active facility
    pub fn active_facility(&self) -> Option<&FacilityStore> {
        self.facility(&self.data.facilities.active_facility_id)
    }

    /// Register a facility with an empty store
    ///
    /// Leaves existing records untouched if the facility is already present.
    pub fn add_facility(&mut self, meta: FacilityMeta) {
        self.data
            .facility_data
            .entry(meta.id.clone())
            .or_insert_with(FacilityStore::empty);
        self.data.facilities.by_id.insert(meta.id.clone(), meta);
    }

    /// True if the document is at the current schema version
    pub fn is_current(&self) -> bool {
        self.schema_version == CURRENT_SCHEMA_VERSION
    }
}

/// Build an empty document at the current schema version
///
/// Contains exactly one facility whose every collection is empty.
pub fn create_empty_document() -> UnifiedDocument {
    UnifiedDocument::empty()
}
