use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

const MIN_PASSWORD_LEN: usize = 8;

/// User row as it is written by the coordinator. The password is already hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub roll_number: String,
    pub department: Option<String>,
    pub year_of_study: Option<String>,
    pub phone_number: Option<String>,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(rename = "project_name", alias = "name")]
    pub name: String,
    #[serde(rename = "project_description", alias = "description", default)]
    pub description: String,
    #[serde(rename = "links", alias = "link", default)]
    pub link: Option<String>,
}

/// A file that the upload collaborator has already written to object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub display_name: String,
    pub stored_reference: String,
}

/// Everything one registration writes: the user row plus its dependents.
#[derive(Debug, Clone)]
pub struct ValidatedRegistration {
    pub user: NewUser,
    pub skills: Vec<String>,
    pub projects: Vec<ProjectRecord>,
    pub documents: Vec<DocumentRef>,
}

impl ValidatedRegistration {
    pub fn dependent_count(&self) -> usize {
        self.skills.len() + self.projects.len() + self.documents.len()
    }
}

/// Raw text fields of the signup form, as they arrive over multipart.
#[derive(Debug, Default, Clone)]
pub struct RegistrationForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub year_of_study: Option<String>,
    pub phone_number: Option<String>,
    pub skills: Option<String>,
    pub projects: Option<String>,
}

impl RegistrationForm {
    /// Stores a text field by its form name. Returns `false` for unknown names.
    pub fn set(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "name" => &mut self.name,
            "email" => &mut self.email,
            "password" => &mut self.password,
            "rollNumber" | "roll_number" => &mut self.roll_number,
            "department" => &mut self.department,
            "yearOfStudy" | "year_of_study" => &mut self.year_of_study,
            "phoneNumber" | "phone_number" => &mut self.phone_number,
            "skills" => &mut self.skills,
            "projects" => &mut self.projects,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    pub fn validate(self) -> Result<RegistrationDraft, ValidationError> {
        let name = required(self.name, "name")?;
        let email = required(self.email, "email")?.to_lowercase();
        let password = self
            .password
            .filter(|p| !p.is_empty())
            .ok_or(ValidationError::MissingField("password"))?;
        let roll_number = required(self.roll_number, "rollNumber")?;

        if !is_valid_email(&email) {
            return Err(ValidationError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LEN));
        }

        let skills = decode_list::<String>(self.skills, "skills")?;
        let projects = decode_list::<ProjectRecord>(self.projects, "projects")?;

        Ok(RegistrationDraft {
            name,
            email,
            password,
            roll_number,
            department: optional(self.department),
            year_of_study: optional(self.year_of_study),
            phone_number: optional(self.phone_number),
            skills,
            projects,
        })
    }
}

/// A presence-checked form whose password has not been hashed yet.
#[derive(Debug, Clone)]
pub struct RegistrationDraft {
    pub name: String,
    pub email: String,
    pub password: String,
    pub roll_number: String,
    pub department: Option<String>,
    pub year_of_study: Option<String>,
    pub phone_number: Option<String>,
    pub skills: Vec<String>,
    pub projects: Vec<ProjectRecord>,
}

impl RegistrationDraft {
    pub fn into_registration(
        self,
        password_hash: String,
        documents: Vec<DocumentRef>,
        profile_picture: Option<String>,
    ) -> ValidatedRegistration {
        ValidatedRegistration {
            user: NewUser {
                name: self.name,
                email: self.email,
                password_hash,
                roll_number: self.roll_number,
                department: self.department,
                year_of_study: self.year_of_study,
                phone_number: self.phone_number,
                profile_picture,
            },
            skills: self.skills,
            projects: self.projects,
            documents,
        }
    }
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// Blank or absent lists decode to empty; anything else must be a JSON array.
fn decode_list<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
    field: &'static str,
) -> Result<Vec<T>, ValidationError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json).map_err(|e| ValidationError::MalformedJson {
            field,
            detail: e.to_string(),
        }),
    }
}
