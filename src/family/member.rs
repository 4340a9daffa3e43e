use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::ApiException;

pub const MAX_FAMILY_NAME_LEN: usize = 50;
pub const MAX_MEMBER_NAME_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberColor {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
}

impl MemberColor {
    pub const ALL: [MemberColor; 7] = [
        MemberColor::Red,
        MemberColor::Orange,
        MemberColor::Yellow,
        MemberColor::Green,
        MemberColor::Blue,
        MemberColor::Purple,
        MemberColor::Pink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberColor::Red => "red",
            MemberColor::Orange => "orange",
            MemberColor::Yellow => "yellow",
            MemberColor::Green => "green",
            MemberColor::Blue => "blue",
            MemberColor::Purple => "purple",
            MemberColor::Pink => "pink",
        }
    }
}

impl fmt::Display for MemberColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    pub id: String,
    pub name: String,
    pub color: MemberColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyData {
    pub id: String,
    pub name: String,
    pub members: Vec<FamilyMember>,
    pub created_at: DateTime<Utc>,
    pub setup_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInput {
    pub name: String,
    pub color: MemberColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<MemberInput>>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Family id is empty")]
    MissingId,
    #[error("Family name must be 1-50 characters")]
    FamilyName,
    #[error("Member name '{0}' must be 1-30 characters")]
    MemberName(String),
    #[error("Member id is empty")]
    MissingMemberId,
    #[error("Duplicate member id '{0}'")]
    DuplicateId(String),
    #[error("Member name '{0}' is already taken")]
    DuplicateName(String),
    #[error("Color '{0}' is already used by another member")]
    DuplicateColor(MemberColor),
    #[error("A family that finished setup needs at least one member")]
    NoMembers,
}

impl From<ValidationError> for ApiException {
    fn from(err: ValidationError) -> Self {
        let (field, conflict) = match &err {
            ValidationError::DuplicateName(_) => ("name", true),
            ValidationError::DuplicateColor(_) => ("color", true),
            ValidationError::DuplicateId(_) => ("id", true),
            ValidationError::FamilyName | ValidationError::MemberName(_) => ("name", false),
            ValidationError::MissingId | ValidationError::MissingMemberId => ("id", false),
            ValidationError::NoMembers => ("members", false),
        };
        if conflict {
            let mut api = ApiException::conflict(err.to_string());
            api.field = Some(field.to_string());
            api
        } else {
            ApiException::validation(field, err.to_string())
        }
    }
}

fn length_within(value: &str, max: usize) -> bool {
    let len = value.trim().chars().count();
    (1..=max).contains(&len)
}

pub fn validate_family_name(name: &str) -> Result<(), ValidationError> {
    if length_within(name, MAX_FAMILY_NAME_LEN) {
        Ok(())
    } else {
        Err(ValidationError::FamilyName)
    }
}

pub fn validate_member_name(name: &str) -> Result<(), ValidationError> {
    if length_within(name, MAX_MEMBER_NAME_LEN) {
        Ok(())
    } else {
        Err(ValidationError::MemberName(name.to_string()))
    }
}

impl FamilyMember {
    pub fn from_input(id: impl Into<String>, input: &MemberInput) -> Self {
        Self {
            id: id.into(),
            name: input.name.trim().to_string(),
            color: input.color,
            avatar_url: input.avatar_url.clone(),
            email: input.email.clone(),
        }
    }
}

impl FamilyData {
    pub fn new(id: impl Into<String>, name: impl Into<String>, members: Vec<FamilyMember>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            setup_complete: !members.is_empty(),
            members,
            created_at: Utc::now(),
        }
    }

    /// Full schema check applied to every rehydrated snapshot.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingId);
        }
        validate_family_name(&self.name)?;
        if self.setup_complete && self.members.is_empty() {
            return Err(ValidationError::NoMembers);
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut colors = HashSet::new();
        for member in &self.members {
            if member.id.trim().is_empty() {
                return Err(ValidationError::MissingMemberId);
            }
            validate_member_name(&member.name)?;
            if !ids.insert(member.id.as_str()) {
                return Err(ValidationError::DuplicateId(member.id.clone()));
            }
            if !names.insert(member.name.trim().to_lowercase()) {
                return Err(ValidationError::DuplicateName(member.name.clone()));
            }
            if !colors.insert(member.color) {
                return Err(ValidationError::DuplicateColor(member.color));
            }
        }
        Ok(())
    }

    /// Checks that `input` can join the family, or replace the member
    /// `replacing` without clashing with anyone else.
    pub fn check_member(&self, input: &MemberInput, replacing: Option<&str>) -> Result<(), ValidationError> {
        validate_member_name(&input.name)?;
        let name = input.name.trim().to_lowercase();
        for other in self.members.iter().filter(|m| Some(m.id.as_str()) != replacing) {
            if other.name.trim().to_lowercase() == name {
                return Err(ValidationError::DuplicateName(input.name.clone()));
            }
            if other.color == input.color {
                return Err(ValidationError::DuplicateColor(input.color));
            }
        }
        Ok(())
    }

    pub fn member(&self, id: &str) -> Option<&FamilyMember> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    pub fn available_colors(&self) -> Vec<MemberColor> {
        MemberColor::ALL
            .into_iter()
            .filter(|c| self.members.iter().all(|m| m.color != *c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ApiErrorKind;

    fn member(id: &str, name: &str, color: MemberColor) -> FamilyMember {
        FamilyMember {
            id: id.to_string(),
            name: name.to_string(),
            color,
            avatar_url: None,
            email: None,
        }
    }

    fn family() -> FamilyData {
        FamilyData::new(
            "fam1",
            "The Smiths",
            vec![
                member("m1", "Alex", MemberColor::Blue),
                member("m2", "Sam", MemberColor::Green),
            ],
        )
    }

    #[test]
    fn valid_family_passes() {
        assert!(family().validate().is_ok());
    }

    #[test]
    fn names_are_unique_case_insensitively() {
        let mut fam = family();
        fam.members.push(member("m3", "alex", MemberColor::Red));
        assert_eq!(fam.validate(), Err(ValidationError::DuplicateName("alex".to_string())));
    }

    #[test]
    fn colors_are_unique() {
        let mut fam = family();
        fam.members.push(member("m3", "Jo", MemberColor::Blue));
        assert_eq!(fam.validate(), Err(ValidationError::DuplicateColor(MemberColor::Blue)));
    }

    #[test]
    fn name_lengths_are_bounded() {
        let mut fam = family();
        fam.name = "x".repeat(51);
        assert_eq!(fam.validate(), Err(ValidationError::FamilyName));

        let mut fam = family();
        fam.members[0].name = "y".repeat(31);
        assert!(matches!(fam.validate(), Err(ValidationError::MemberName(_))));
    }

    #[test]
    fn completed_setup_requires_members() {
        let mut fam = family();
        fam.members.clear();
        assert_eq!(fam.validate(), Err(ValidationError::NoMembers));

        fam.setup_complete = false;
        assert!(fam.validate().is_ok());
    }

    #[test]
    fn unknown_color_fails_to_decode() {
        let raw = r#"{"id":"m1","name":"Alex","color":"teal"}"#;
        assert!(serde_json::from_str::<FamilyMember>(raw).is_err());
    }

    #[test]
    fn check_member_allows_keeping_own_name_and_color() {
        let fam = family();
        let input = MemberInput {
            name: "ALEX".to_string(),
            color: MemberColor::Blue,
            avatar_url: None,
            email: None,
        };

        assert!(fam.check_member(&input, Some("m1")).is_ok());
        assert!(fam.check_member(&input, None).is_err());
    }

    #[test]
    fn available_colors_exclude_taken() {
        let colors = family().available_colors();
        assert_eq!(colors.len(), 5);
        assert!(!colors.contains(&MemberColor::Blue));
    }

    #[test]
    fn duplicates_map_to_conflict() {
        let api: ApiException = ValidationError::DuplicateColor(MemberColor::Red).into();
        assert_eq!(api.kind, ApiErrorKind::Conflict);
        assert_eq!(api.field.as_deref(), Some("color"));

        let api: ApiException = ValidationError::MemberName(String::new()).into();
        assert_eq!(api.kind, ApiErrorKind::ValidationError);
    }
}
