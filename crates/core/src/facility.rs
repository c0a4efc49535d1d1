//! Per-facility collection bag
//!
//! Every facility owns exactly one [`FacilityStore`]. The set of collections is
//! fixed and enumerated by [`CollectionKind`]; the wire name of each collection
//! is the camelCase field name used in the persisted document.

use crate::record::{Collection, LinkedRecord, Record, ScopedRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one collection inside a [`FacilityStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionKind {
    /// Confirmed residents keyed by medical-record number
    Residents,
    /// Quarantine placeholders keyed by `Q:` identifiers
    Quarantine,
    /// Antibiotic courses
    AntibioticCourses,
    /// Infection events
    InfectionEvents,
    /// Vaccination events
    VaccinationEvents,
    /// Resident notes
    Notes,
    /// Staff members
    Staff,
    /// Outbreaks
    Outbreaks,
    /// Outbreak cases
    OutbreakCases,
    /// Outbreak exposures
    OutbreakExposures,
    /// Daily status reports
    DailyStatusReports,
    /// Export profiles
    ExportProfiles,
    /// Survey packets
    SurveyPackets,
    /// Infection-control audit sessions
    AuditSessions,
    /// Infection-control audit items
    AuditItems,
    /// Notifications
    Notifications,
}

impl CollectionKind {
    /// Every collection, in persisted field order
    pub const ALL: [CollectionKind; 16] = [
        CollectionKind::Residents,
        CollectionKind::Quarantine,
        CollectionKind::AntibioticCourses,
        CollectionKind::InfectionEvents,
        CollectionKind::VaccinationEvents,
        CollectionKind::Notes,
        CollectionKind::Staff,
        CollectionKind::Outbreaks,
        CollectionKind::OutbreakCases,
        CollectionKind::OutbreakExposures,
        CollectionKind::DailyStatusReports,
        CollectionKind::ExportProfiles,
        CollectionKind::SurveyPackets,
        CollectionKind::AuditSessions,
        CollectionKind::AuditItems,
        CollectionKind::Notifications,
    ];

    /// Field name of this collection in the persisted document
    pub const fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Residents => "residents",
            CollectionKind::Quarantine => "quarantine",
            CollectionKind::AntibioticCourses => "abts",
            CollectionKind::InfectionEvents => "infections",
            CollectionKind::VaccinationEvents => "vaxEvents",
            CollectionKind::Notes => "notes",
            CollectionKind::Staff => "staff",
            CollectionKind::Outbreaks => "outbreaks",
            CollectionKind::OutbreakCases => "outbreakCases",
            CollectionKind::OutbreakExposures => "outbreakExposures",
            CollectionKind::DailyStatusReports => "dailyStatusReports",
            CollectionKind::ExportProfiles => "exportProfiles",
            CollectionKind::SurveyPackets => "surveyPackets",
            CollectionKind::AuditSessions => "infectionControlAudits",
            CollectionKind::AuditItems => "infectionControlAuditItems",
            CollectionKind::Notifications => "notifications",
        }
    }

    /// Look up a collection by its persisted field name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    /// Whether records in this collection embed a `residentRef`
    pub const fn embeds_resident_ref(&self) -> bool {
        matches!(
            self,
            CollectionKind::AntibioticCourses
                | CollectionKind::InfectionEvents
                | CollectionKind::VaccinationEvents
                | CollectionKind::Notes
                | CollectionKind::OutbreakCases
                | CollectionKind::OutbreakExposures
        )
    }

    /// Whether records in this collection may declare a `facilityId`
    pub const fn is_facility_scoped(&self) -> bool {
        matches!(
            self,
            CollectionKind::Outbreaks | CollectionKind::ExportProfiles | CollectionKind::SurveyPackets
        )
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record collections owned by one facility
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FacilityStore {
    pub residents: Collection<Record>,
    pub quarantine: Collection<Record>,
    pub abts: Collection<LinkedRecord>,
    pub infections: Collection<LinkedRecord>,
    pub vax_events: Collection<LinkedRecord>,
    pub notes: Collection<LinkedRecord>,
    pub staff: Collection<Record>,
    pub outbreaks: Collection<ScopedRecord>,
    pub outbreak_cases: Collection<LinkedRecord>,
    pub outbreak_exposures: Collection<LinkedRecord>,
    pub daily_status_reports: Collection<Record>,
    pub export_profiles: Collection<ScopedRecord>,
    pub survey_packets: Collection<ScopedRecord>,
    pub infection_control_audits: Collection<Record>,
    pub infection_control_audit_items: Collection<Record>,
    pub notifications: Collection<Record>,
}

impl FacilityStore {
    /// A store with every collection empty
    pub fn empty() -> Self {
        Self::default()
    }

    /// Collections whose records carry a [`ResidentRef`](crate::ResidentRef)
    pub fn resident_linked(&self) -> [(CollectionKind, &Collection<LinkedRecord>); 6] {
        [
            (CollectionKind::AntibioticCourses, &self.abts),
            (CollectionKind::InfectionEvents, &self.infections),
            (CollectionKind::VaccinationEvents, &self.vax_events),
            (CollectionKind::Notes, &self.notes),
            (CollectionKind::OutbreakCases, &self.outbreak_cases),
            (CollectionKind::OutbreakExposures, &self.outbreak_exposures),
        ]
    }

    /// Collections whose records may declare an owning facility
    pub fn facility_scoped(&self) -> [(CollectionKind, &Collection<ScopedRecord>); 3] {
        [
            (CollectionKind::Outbreaks, &self.outbreaks),
            (CollectionKind::ExportProfiles, &self.export_profiles),
            (CollectionKind::SurveyPackets, &self.survey_packets),
        ]
    }

    /// Number of records in a collection
    pub fn len_of(&self, kind: CollectionKind) -> usize {
        match kind {
            CollectionKind::Residents => self.residents.len(),
            CollectionKind::Quarantine => self.quarantine.len(),
            CollectionKind::AntibioticCourses => self.abts.len(),
            CollectionKind::InfectionEvents => self.infections.len(),
            CollectionKind::VaccinationEvents => self.vax_events.len(),
            CollectionKind::Notes => self.notes.len(),
            CollectionKind::Staff => self.staff.len(),
            CollectionKind::Outbreaks => self.outbreaks.len(),
            CollectionKind::OutbreakCases => self.outbreak_cases.len(),
            CollectionKind::OutbreakExposures => self.outbreak_exposures.len(),
            CollectionKind::DailyStatusReports => self.daily_status_reports.len(),
            CollectionKind::ExportProfiles => self.export_profiles.len(),
            CollectionKind::SurveyPackets => self.survey_packets.len(),
            CollectionKind::AuditSessions => self.infection_control_audits.len(),
            CollectionKind::AuditItems => self.infection_control_audit_items.len(),
            CollectionKind::Notifications => self.notifications.len(),
        }
    }

    /// True if no collection holds any record
    pub fn is_empty(&self) -> bool {
        CollectionKind::ALL.iter().all(|k| self.len_of(*k) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serialized_fields() {
        let value = serde_json::to_value(FacilityStore::empty()).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), CollectionKind::ALL.len());
        for kind in CollectionKind::ALL {
            assert!(obj.contains_key(kind.as_str()), "missing field {}", kind);
        }
    }

    #[test]
    fn test_from_name_round_trips() {
        for kind in CollectionKind::ALL {
            assert_eq!(CollectionKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(CollectionKind::from_name("nope"), None);
    }

    #[test]
    fn test_classification() {
        let linked: Vec<_> = CollectionKind::ALL
            .iter()
            .filter(|k| k.embeds_resident_ref())
            .collect();
        assert_eq!(linked.len(), 6);

        let scoped: Vec<_> = CollectionKind::ALL
            .iter()
            .filter(|k| k.is_facility_scoped())
            .collect();
        assert_eq!(scoped.len(), 3);
        assert!(!CollectionKind::Residents.embeds_resident_ref());
    }

    #[test]
    fn test_missing_collections_default_to_empty() {
        let store: FacilityStore = serde_json::from_str(r#"{"residents": {}}"#).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.len_of(CollectionKind::AuditItems), 0);
    }
}
