//! Schema migration
//!
//! Brings a document read from a backend up to [`CURRENT_SCHEMA_VERSION`].
//!
//! ## Process
//!
//! 1. Wrap the loose JSON tree in a [`RawDocument`]
//! 2. Read the declared `schemaVersion`
//! 3. Apply chained [`MigrationStep`]s until the current version is reached
//! 4. Convert the tree into a typed [`UnifiedDocument`] (the only conversion point)
//!
//! A document already at the current version is converted as-is; structural
//! checks belong to the commit gate and run only on writes. Its `schemaName`
//! must still be [`SCHEMA_NAME`], or it could be loaded but never saved.
//!
//! A version no step accepts fails with [`SchemaMigrationError`] carrying the
//! version originally found. Guessing at the shape of an unknown version risks
//! data loss, so this is never coerced.
//!
//! ## Adding a version
//!
//! Add one step that `accepts` the previous current version
//! and whose `target_version` is the new one. Every step must be idempotent:
//! migration runs again on already-migrated data across sessions.

mod legacy;

pub use legacy::{LegacyToV2, LEGACY_VERSION};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::info;
use unidb_core::{
    Result, SchemaMigrationError, StorageError, UnifiedDocument, CURRENT_SCHEMA_VERSION,
    DEFAULT_FACILITY_NAME, SCHEMA_NAME,
};

/// Field holding the schema family name
pub const NAME_FIELD: &str = "schemaName";

/// Field holding the version tag
pub const VERSION_FIELD: &str = "schemaVersion";

/// Placeholder reported when a document declares no version at all
pub const NO_VERSION: &str = "<none>";

/// Every upgrade step, in chain order
const STEPS: &[&dyn MigrationStep] = &[&LegacyToV2];

/// Inputs shared by every step of one migration run
#[derive(Debug, Clone)]
pub struct MigrationContext {
    /// Name given to a synthesized default facility
    pub default_facility_name: String,
    /// Timestamp used for missing `createdAt`/`updatedAt`
    pub now: DateTime<Utc>,
}

impl Default for MigrationContext {
    fn default() -> Self {
        MigrationContext {
            default_facility_name: DEFAULT_FACILITY_NAME.to_string(),
            now: Utc::now(),
        }
    }
}

/// What a migration run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version tag found in the input (None if absent or empty)
    pub detected_version: Option<String>,
    /// Names of the steps applied, in order
    pub steps_applied: Vec<&'static str>,
    /// Facilities that received a new empty store
    pub facilities_backfilled: usize,
    /// Collections added to existing stores
    pub collections_backfilled: usize,
    /// True if the input was absent or empty and a fresh document was created
    pub created_empty: bool,
}

impl MigrationReport {
    /// True if at least one step ran
    pub fn migrated(&self) -> bool {
        !self.steps_applied.is_empty()
    }
}

/// One upgrade step in the chain
pub trait MigrationStep {
    /// Step name for logs and reports
    fn name(&self) -> &'static str;

    /// Whether this step upgrades documents declaring `version`
    ///
    /// `None` means the document has no version tag.
    fn accepts(&self, version: Option<&str>) -> bool;

    /// Version the document declares after this step
    fn target_version(&self) -> &'static str;

    /// Upgrade the document in place; must be idempotent
    fn apply(&self, doc: &mut RawDocument, ctx: &MigrationContext, report: &mut MigrationReport);
}

/// A document of unknown shape, as read from a backend
///
/// Never escapes the migration runner: [`RawDocument::into_document`] is the
/// single conversion into the typed document.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    root: Map<String, Value>,
}

impl RawDocument {
    /// Wrap a JSON tree
    ///
    /// Returns `Ok(None)` for `null` or an empty object. Any other non-object
    /// value is corrupt.
    pub fn from_value(value: Value) -> std::result::Result<Option<Self>, StorageError> {
        match value {
            Value::Null => Ok(None),
            Value::Object(root) if root.is_empty() => Ok(None),
            Value::Object(root) => Ok(Some(RawDocument { root })),
            other => Err(StorageError::corrupt(
                "document",
                format!("expected a JSON object, found {}", json_type(&other)),
            )),
        }
    }

    /// Declared version tag, if any
    pub fn version(&self) -> Option<String> {
        match self.root.get(VERSION_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Overwrite the version tag
    pub fn set_version(&mut self, version: &str) {
        self.root
            .insert(VERSION_FIELD.to_string(), Value::String(version.to_string()));
    }

    /// Top-level fields
    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    /// Mutable top-level fields
    pub fn root_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.root
    }

    /// The JSON tree
    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }

    /// Convert into the typed document
    ///
    /// Fails as corrupt if the document names a schema family other than
    /// [`SCHEMA_NAME`].
    pub fn into_document(self) -> std::result::Result<UnifiedDocument, StorageError> {
        match self.root.get(NAME_FIELD) {
            Some(Value::String(name)) if name == SCHEMA_NAME => {}
            Some(Value::String(name)) => {
                return Err(StorageError::corrupt(
                    "document",
                    format!("{NAME_FIELD} is '{name}', expected '{SCHEMA_NAME}'"),
                ))
            }
            // Missing or mistyped fields surface as decode errors below
            _ => {}
        }
        serde_json::from_value(Value::Object(self.root))
            .map_err(|e| StorageError::corrupt("document", e))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Runs the upgrade chain
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    default_facility_name: Option<String>,
}

impl Migrator {
    /// Migrator with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Name given to a default facility synthesized during migration
    pub fn with_default_facility_name(mut self, name: impl Into<String>) -> Self {
        self.default_facility_name = Some(name.into());
        self
    }

    fn context(&self) -> MigrationContext {
        let mut ctx = MigrationContext::default();
        if let Some(name) = &self.default_facility_name {
            ctx.default_facility_name = name.clone();
        }
        ctx
    }

    /// Upgrade a raw document to the current version
    pub fn migrate(&self, raw: Value) -> Result<UnifiedDocument> {
        self.migrate_with_report(raw).map(|(doc, _)| doc)
    }

    /// Upgrade a raw document and report what was done
    pub fn migrate_with_report(&self, raw: Value) -> Result<(UnifiedDocument, MigrationReport)> {
        let ctx = self.context();
        let mut report = MigrationReport::default();

        let Some(mut doc) = RawDocument::from_value(raw)? else {
            report.created_empty = true;
            let fresh = UnifiedDocument::empty_with_facility_name(&ctx.default_facility_name);
            return Ok((fresh, report));
        };

        let detected = doc.version();
        report.detected_version = detected.clone();
        upgrade(&mut doc, &ctx, &mut report, STEPS)?;

        if report.migrated() {
            info!(
                target: "unidb::migration",
                from = detected.as_deref().unwrap_or(NO_VERSION),
                to = CURRENT_SCHEMA_VERSION,
                steps = report.steps_applied.len(),
                facilities_backfilled = report.facilities_backfilled,
                collections_backfilled = report.collections_backfilled,
                "Document migrated"
            );
        }

        Ok((doc.into_document()?, report))
    }
}

/// Apply `steps` until the document reaches the current version
fn upgrade(
    doc: &mut RawDocument,
    ctx: &MigrationContext,
    report: &mut MigrationReport,
    steps: &[&dyn MigrationStep],
) -> std::result::Result<(), SchemaMigrationError> {
    let detected = doc.version();
    let unsupported = || SchemaMigrationError {
        detected_version: detected.clone().unwrap_or_else(|| NO_VERSION.to_string()),
        current_version: CURRENT_SCHEMA_VERSION,
    };

    // Each step may run at most once; a longer chain means a cycle
    for _ in 0..=steps.len() {
        let version = doc.version();
        if version.as_deref() == Some(CURRENT_SCHEMA_VERSION) {
            return Ok(());
        }
        let step = steps
            .iter()
            .find(|s| s.accepts(version.as_deref()))
            .ok_or_else(unsupported)?;
        step.apply(doc, ctx, report);
        doc.set_version(step.target_version());
        report.steps_applied.push(step.name());
    }
    Err(unsupported())
}

/// Upgrade a raw document to the current version with default settings
///
/// `null` or an empty object yields a fresh document.
pub fn migrate(raw: Value) -> Result<UnifiedDocument> {
    Migrator::new().migrate(raw)
}

/// [`migrate`], also returning what was done
pub fn migrate_with_report(raw: Value) -> Result<(UnifiedDocument, MigrationReport)> {
    Migrator::new().migrate_with_report(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use unidb_core::{create_empty_document, CollectionKind, Error};

    #[test]
    fn test_null_and_empty_create_fresh_document() {
        let (doc, report) = migrate_with_report(Value::Null).unwrap();
        assert!(report.created_empty);
        assert_eq!(doc.schema_version, CURRENT_SCHEMA_VERSION);

        let (doc, report) = migrate_with_report(json!({})).unwrap();
        assert!(report.created_empty);
        assert_eq!(doc.data.facilities.by_id.len(), 1);
    }

    #[test]
    fn test_non_object_is_corrupt() {
        let err = migrate(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_current_version_is_cast_as_is() {
        let doc = create_empty_document();
        let raw = serde_json::to_value(&doc).unwrap();
        let (back, report) = migrate_with_report(raw).unwrap();
        assert!(!report.migrated());
        assert_eq!(back, doc);
    }

    #[test]
    fn test_foreign_schema_name_is_corrupt() {
        let mut raw = serde_json::to_value(create_empty_document()).unwrap();
        raw[NAME_FIELD] = json!("OTHER_DB");
        let err = migrate(raw).unwrap_err();
        match err {
            Error::Storage(StorageError::Corrupt { message, .. }) => {
                assert!(message.contains("OTHER_DB"));
            }
            other => panic!("expected corrupt document, got {other}"),
        }
    }

    #[test]
    fn test_legacy_step_stamps_schema_name() {
        let doc = migrate(json!({"schemaName": "OTHER_DB", "createdAt": 0})).unwrap();
        assert_eq!(doc.schema_name, SCHEMA_NAME);
    }

    #[test]
    fn test_unknown_version_fails_with_detected_tag() {
        let raw = json!({"schemaVersion": "UNIFIED_DB_V9", "data": {}});
        let err = migrate(raw).unwrap_err();
        match err {
            Error::Migration(e) => {
                assert_eq!(e.detected_version, "UNIFIED_DB_V9");
                assert_eq!(e.current_version, CURRENT_SCHEMA_VERSION);
            }
            other => panic!("expected migration error, got {other}"),
        }
    }

    #[test]
    fn test_non_string_version_is_unknown() {
        let err = migrate(json!({"schemaVersion": 2})).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_version_runs_legacy_step() {
        let (doc, report) = migrate_with_report(json!({"createdAt": 0})).unwrap();
        assert_eq!(report.detected_version, None);
        assert_eq!(report.steps_applied, vec!["legacy-to-v2"]);
        assert_eq!(doc.schema_version, CURRENT_SCHEMA_VERSION);
        let store = doc.active_facility().unwrap();
        assert_eq!(store.len_of(CollectionKind::AuditItems), 0);
    }

    #[test]
    fn test_chain_stops_on_cycle() {
        struct Loop;
        impl MigrationStep for Loop {
            fn name(&self) -> &'static str {
                "loop"
            }
            fn accepts(&self, version: Option<&str>) -> bool {
                version == Some("A")
            }
            fn target_version(&self) -> &'static str {
                "A"
            }
            fn apply(&self, _: &mut RawDocument, _: &MigrationContext, _: &mut MigrationReport) {}
        }

        let mut doc = RawDocument::from_value(json!({"schemaVersion": "A"}))
            .unwrap()
            .unwrap();
        let mut report = MigrationReport::default();
        let err = upgrade(&mut doc, &MigrationContext::default(), &mut report, &[&Loop])
            .unwrap_err();
        assert_eq!(err.detected_version, "A");
    }

    #[test]
    fn test_migrator_uses_configured_facility_name() {
        let doc = Migrator::new()
            .with_default_facility_name("North Wing")
            .migrate(json!({"schemaVersion": "UNIFIED_DB_V1"}))
            .unwrap();
        let meta = doc.data.facilities.by_id.values().next().unwrap();
        assert_eq!(meta.name, "North Wing");
    }
}
