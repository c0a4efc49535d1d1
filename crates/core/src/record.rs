//! Record shapes stored inside facility collections
//!
//! Domain record schemas are owned by the application. The engine only needs
//! the fields that carry cross-references:
//!
//! - [`LinkedRecord`]: records that point at a resident through a [`ResidentRef`]
//! - [`ScopedRecord`]: records that may declare the facility they belong to
//! - [`Record`]: everything else
//!
//! All remaining fields are preserved verbatim in a flattened attribute map.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Prefix reserved for quarantine identifiers.
///
/// A real medical-record number never starts with this prefix.
pub const QUARANTINE_ID_PREFIX: &str = "Q:";

/// Free-form record fields the engine does not interpret.
pub type Attributes = BTreeMap<String, Value>;

/// A collection of records keyed by stable identifier.
pub type Collection<T> = BTreeMap<String, T>;

/// Returns true if `id` carries the reserved quarantine prefix
pub fn is_quarantine_id(id: &str) -> bool {
    id.starts_with(QUARANTINE_ID_PREFIX)
}

/// Reference from a record to either a confirmed resident or a quarantine placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResidentRef {
    /// Confirmed resident, keyed by medical-record number
    Mrn {
        /// Key into the `residents` collection
        id: String,
    },
    /// Unmatched incoming data, keyed by a `Q:`-prefixed identifier
    Quarantine {
        /// Key into the `quarantine` collection
        id: String,
    },
}

impl ResidentRef {
    /// Reference a confirmed resident
    pub fn mrn(id: impl Into<String>) -> Self {
        ResidentRef::Mrn { id: id.into() }
    }

    /// Reference a quarantine placeholder
    pub fn quarantine(id: impl Into<String>) -> Self {
        ResidentRef::Quarantine { id: id.into() }
    }

    /// The referenced identifier, regardless of kind
    pub fn id(&self) -> &str {
        match self {
            ResidentRef::Mrn { id } | ResidentRef::Quarantine { id } => id,
        }
    }

    /// The wire tag of this reference
    pub fn kind(&self) -> &'static str {
        match self {
            ResidentRef::Mrn { .. } => "mrn",
            ResidentRef::Quarantine { .. } => "quarantine",
        }
    }
}

impl fmt::Display for ResidentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// A record with no fields the engine cares about
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Application fields
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Record {
    /// Build a record from application fields
    pub fn new(attributes: Attributes) -> Self {
        Record { attributes }
    }
}

/// A record that belongs to a resident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedRecord {
    /// The resident this record is about
    #[serde(rename = "residentRef")]
    pub resident_ref: ResidentRef,
    /// Application fields
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl LinkedRecord {
    /// Build a linked record with no extra fields
    pub fn new(resident_ref: ResidentRef) -> Self {
        LinkedRecord {
            resident_ref,
            attributes: Attributes::new(),
        }
    }

    /// Attach an application field
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// A record that may declare which facility owns it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopedRecord {
    /// Declared owning facility, if the record carries one
    #[serde(rename = "facilityId", default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<String>,
    /// Application fields
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl ScopedRecord {
    /// Build a record scoped to `facility_id`
    pub fn for_facility(facility_id: impl Into<String>) -> Self {
        ScopedRecord {
            facility_id: Some(facility_id.into()),
            attributes: Attributes::new(),
        }
    }

    /// Build a record without a declared facility
    pub fn unscoped() -> Self {
        ScopedRecord::default()
    }
}
