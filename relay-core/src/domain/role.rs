// relay-core/src/domain/role.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Role levels with a total order: reader < writer < admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reader,
    Writer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reader" => Ok(Role::Reader),
            "writer" => Ok(Role::Writer),
            "admin" => Ok(Role::Admin),
            other => Err(DomainError::Validation(format!(
                "Invalid role '{other}'. Must be one of: admin, reader, writer"
            ))),
        }
    }
}

/// Caller identity resolved from an API key (or dev mode when auth is
/// disabled, which carries full privileges).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: String,
    pub role: Role,
}

impl AuthContext {
    pub fn dev_mode() -> Self {
        Self {
            principal: "dev_mode".to_string(),
            role: Role::Admin,
        }
    }

    /// Gate an operation behind a minimum role.
    pub fn require(&self, min_role: Role) -> Result<(), DomainError> {
        if self.role >= min_role {
            Ok(())
        } else {
            Err(DomainError::Forbidden(format!(
                "Insufficient permissions. Requires '{min_role}' role or higher."
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Reader < Role::Writer);
        assert!(Role::Writer < Role::Admin);
    }

    #[test]
    fn test_require_admits_at_or_above_level() {
        let writer = AuthContext {
            principal: "k".into(),
            role: Role::Writer,
        };
        assert!(writer.require(Role::Reader).is_ok());
        assert!(writer.require(Role::Writer).is_ok());
        assert!(writer.require(Role::Admin).is_err());
    }

    #[test]
    fn test_unknown_role_is_validation_error() {
        assert!(matches!(
            "owner".parse::<Role>(),
            Err(DomainError::Validation(_))
        ));
    }
}
