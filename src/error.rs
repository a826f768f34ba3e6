use openbadges_bakery::BakeError;

use crate::store::EntityKind;

pub type Result<T, E = BadgeError> = std::result::Result<T, E>;

/// Failures surfaced by the issuing and rendering operations.
#[derive(Debug, thiserror::Error)]
pub enum BadgeError {
    #[error("You may not award this badge to this recipient.")]
    RecipientBlacklisted,

    #[error("Assertion is already revoked")]
    AlreadyRevoked,

    #[error("revocation_reason is required")]
    MissingReason,

    #[error("invalid acceptance transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{0}")]
    Validation(String),

    #[error("{kind} can not be deleted because it has dependent {dependents} records")]
    HasDependents {
        kind: EntityKind,
        dependents: EntityKind,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("unsupported Open Badges version '{0}'")]
    UnsupportedVersion(String),

    #[error("{kind} '{id}' was modified concurrently")]
    Conflict { kind: EntityKind, id: String },

    #[error("{0} has no image to bake into")]
    MissingImage(String),

    #[error(transparent)]
    Bake(#[from] BakeError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BadgeError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        BadgeError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BadgeError::NotFound { .. })
    }

    /// Business-rule violations, as opposed to lookup, version or backend failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BadgeError::RecipientBlacklisted
                | BadgeError::AlreadyRevoked
                | BadgeError::MissingReason
                | BadgeError::InvalidTransition { .. }
                | BadgeError::Validation(_)
                | BadgeError::HasDependents { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_validation_errors() {
        assert!(BadgeError::AlreadyRevoked.is_validation());
        assert!(BadgeError::HasDependents {
            kind: EntityKind::Issuer,
            dependents: EntityKind::BadgeInstance
        }
        .is_validation());
        assert!(!BadgeError::UnsupportedVersion("3_0".to_owned()).is_validation());
        assert!(!BadgeError::not_found(EntityKind::BadgeClass, "abc").is_validation());
    }

    #[test]
    fn dependents_message_names_blocking_kind() {
        let err = BadgeError::HasDependents {
            kind: EntityKind::Issuer,
            dependents: EntityKind::BadgeInstance,
        };
        assert_eq!(
            err.to_string(),
            "Issuer can not be deleted because it has dependent BadgeInstance records"
        );
    }
}
