//! Dependents (the people being cared for) and the grants that make them
//! visible to a group.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::activity::ActivityKind;

// ─── Profile ─────────────────────────────────────────────────────────────────

/// Medical fields; the only part of a profile a professional may edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalProfile {
  #[serde(default)]
  pub allergies:   Vec<String>,
  #[serde(default)]
  pub conditions:  Vec<String>,
  #[serde(default)]
  pub medications: Vec<String>,
  pub notes:       Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentProfile {
  pub display_name: String,
  pub birth_date:   Option<NaiveDate>,
  #[serde(default)]
  pub medical:      MedicalProfile,
}

/// A partial profile edit. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
  pub display_name: Option<String>,
  pub birth_date:   Option<NaiveDate>,
  pub medical:      Option<MedicalProfile>,
}

impl ProfilePatch {
  pub fn touches_general(&self) -> bool {
    self.display_name.is_some() || self.birth_date.is_some()
  }

  pub fn touches_medical(&self) -> bool { self.medical.is_some() }

  pub fn apply_to(self, profile: &mut DependentProfile) {
    if let Some(name) = self.display_name {
      profile.display_name = name;
    }
    if let Some(date) = self.birth_date {
      profile.birth_date = Some(date);
    }
    if let Some(medical) = self.medical {
      profile.medical = medical;
    }
  }
}

// ─── Dependent ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependent {
  pub dependent_id: Uuid,
  /// The group that registered the dependent. Other groups may still see it
  /// through their own grants.
  pub group_id:     Uuid,
  pub profile:      DependentProfile,
  pub created_at:   DateTime<Utc>,
  pub created_by:   Uuid,
}

/// Input to [`crate::store::CareStore::add_dependent`]. The store also writes
/// a [`AccessLevel::Full`] grant for `group_id`.
#[derive(Debug, Clone)]
pub struct NewDependent {
  pub dependent_id: Uuid,
  pub group_id:     Uuid,
  pub profile:      DependentProfile,
  pub created_by:   Uuid,
  pub created_at:   DateTime<Utc>,
}

// ─── Grants ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
  EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccessLevel {
  Full,
  /// Like `Full`, minus profile edits.
  Limited,
  ReadOnly,
  /// Medical and medication history only; no writes.
  EmergencyOnly,
}

impl AccessLevel {
  pub fn allows_logging(self) -> bool { matches!(self, Self::Full | Self::Limited) }

  pub fn allows_profile_edits(self) -> bool { matches!(self, Self::Full) }

  /// Activity kinds this level restricts viewing to, if any.
  pub fn kind_restriction(self) -> Option<&'static [ActivityKind]> {
    match self {
      Self::EmergencyOnly => Some(ActivityKind::MEDICAL),
      Self::Full | Self::Limited | Self::ReadOnly => None,
    }
  }
}

/// Which history a professional may see. Supplied per grant; the hub falls
/// back to a configured default when a grant has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevantScope {
  pub kinds:         Vec<ActivityKind>,
  /// Only events logged within this many days are visible.
  pub lookback_days: Option<u32>,
}

/// Unique per (group, dependent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentAccessGrant {
  pub group_id:       Uuid,
  pub dependent_id:   Uuid,
  pub access_level:   AccessLevel,
  pub relevant_scope: Option<RelevantScope>,
  pub granted_by:     Uuid,
  pub granted_at:     DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn patch_applies_only_present_fields() {
    let mut profile = DependentProfile {
      display_name: "Ada".into(),
      birth_date:   None,
      medical:      MedicalProfile::default(),
    };
    let patch = ProfilePatch {
      medical: Some(MedicalProfile {
        allergies: vec!["peanuts".into()],
        ..Default::default()
      }),
      ..Default::default()
    };
    assert!(patch.touches_medical());
    assert!(!patch.touches_general());

    patch.apply_to(&mut profile);
    assert_eq!(profile.display_name, "Ada");
    assert_eq!(profile.medical.allergies, ["peanuts"]);
  }

  #[test]
  fn only_full_and_limited_may_log() {
    assert!(AccessLevel::Full.allows_logging());
    assert!(AccessLevel::Limited.allows_logging());
    assert!(!AccessLevel::ReadOnly.allows_logging());
    assert!(!AccessLevel::EmergencyOnly.allows_logging());
  }
}
