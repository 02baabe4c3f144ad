//! Input validation for [`CreateUser`].
//!
//! The rules live in one ordered table and are evaluated before anything
//! else happens in the pipeline. Every field is checked so callers get the
//! complete list of problems in one round trip; once a field has failed a
//! rule, later rules for the same field are skipped.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::domain::{CreateUser, EmailError, PersonName, UserEmail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Required,
    InvalidFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub kind: ViolationKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn has(&self, field: &str, kind: ViolationKind) -> bool {
        self.violations
            .iter()
            .any(|v| v.field == field && v.kind == kind)
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed")?;
        for (i, violation) in self.violations.iter().enumerate() {
            let separator = if i == 0 { ": " } else { "; " };
            write!(f, "{separator}{} {}", violation.field, violation.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// A command that passed every rule. Only [`validate`] builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCreateUser {
    first_name: PersonName,
    last_name: PersonName,
    email: UserEmail,
}

impl ValidCreateUser {
    pub fn first_name(&self) -> &PersonName {
        &self.first_name
    }

    pub fn last_name(&self) -> &PersonName {
        &self.last_name
    }

    pub fn email(&self) -> &UserEmail {
        &self.email
    }
}

struct Rule {
    field: &'static str,
    kind: ViolationKind,
    check: fn(&CreateUser) -> Result<(), String>,
}

const RULES: [Rule; 4] = [
    Rule {
        field: "first_name",
        kind: ViolationKind::Required,
        check: first_name_present,
    },
    Rule {
        field: "last_name",
        kind: ViolationKind::Required,
        check: last_name_present,
    },
    Rule {
        field: "email",
        kind: ViolationKind::Required,
        check: email_present,
    },
    Rule {
        field: "email",
        kind: ViolationKind::InvalidFormat,
        check: email_well_formed,
    },
];

fn first_name_present(command: &CreateUser) -> Result<(), String> {
    PersonName::parse(&command.first_name).map(drop)
}

fn last_name_present(command: &CreateUser) -> Result<(), String> {
    PersonName::parse(&command.last_name).map(drop)
}

fn email_present(command: &CreateUser) -> Result<(), String> {
    match UserEmail::parse(&command.email) {
        Err(e @ EmailError::Empty) => Err(e.to_string()),
        _ => Ok(()),
    }
}

fn email_well_formed(command: &CreateUser) -> Result<(), String> {
    UserEmail::parse(&command.email)
        .map(drop)
        .map_err(|e| e.to_string())
}

pub fn validate(command: &CreateUser) -> Result<ValidCreateUser, ValidationErrors> {
    let mut violations: Vec<FieldViolation> = Vec::new();

    for rule in &RULES {
        if violations.iter().any(|v| v.field == rule.field) {
            continue;
        }
        if let Err(message) = (rule.check)(command) {
            violations.push(FieldViolation {
                field: rule.field,
                kind: rule.kind,
                message,
            });
        }
    }

    match (
        PersonName::parse(&command.first_name),
        PersonName::parse(&command.last_name),
        UserEmail::parse(&command.email),
    ) {
        (Ok(first_name), Ok(last_name), Ok(email)) if violations.is_empty() => {
            Ok(ValidCreateUser {
                first_name,
                last_name,
                email,
            })
        }
        _ => Err(ValidationErrors { violations }),
    }
}
