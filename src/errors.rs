use uuid::Uuid;

/// Errors returned by repository implementations.
///
/// Every repository contract maps its failure modes onto this taxonomy so
/// that coordinators can translate them 1:1 without inspecting backend
/// details. `Deleted` is deliberately distinct from `NotFound`: a tombstoned
/// aggregate existed once, which matters for auditability and for the
/// placement protocol's self-healing path.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,

    #[error("deleted")]
    Deleted,

    #[error("conflict")]
    Conflict,

    #[error("not owned by user")]
    NotOwnedByUser,

    #[error("locked")]
    Locked,

    /// Unexpected backend fault. Coordinators treat this as fatal and
    /// propagate it; a malfunctioning data layer during a financial
    /// transaction must never be absorbed or retried.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Errors surfaced by the coordinator services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("deleted: {0}")]
    Deleted(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("locked: {0}")]
    Locked(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Maps a repository error for an aggregate to the service-level kind.
    ///
    /// The mapping is 1:1 for the expected kinds. `Conflict` on generated
    /// ids and `Storage` faults both surface as errors the caller cannot
    /// meaningfully handle, but they stay distinguishable in the message.
    pub(crate) fn from_repository(kind: &str, id: impl std::fmt::Display, err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound(format!("{kind} {id} not found")),
            RepositoryError::Deleted => Self::Deleted(format!("{kind} {id} is deleted")),
            RepositoryError::NotOwnedByUser => {
                Self::Forbidden(format!("{kind} {id} is owned by another user"))
            }
            RepositoryError::Locked => Self::Locked(format!("{kind} {id} is locked")),
            RepositoryError::Conflict => Self::Conflict(format!("{kind} {id} already exists")),
            RepositoryError::Storage(e) => Self::Internal(format!("{kind} {id}: {e:#}")),
        }
    }

    pub(crate) fn order(id: Uuid, err: RepositoryError) -> Self {
        Self::from_repository("order", id, err)
    }

    pub(crate) fn cart(id: Uuid, err: RepositoryError) -> Self {
        Self::from_repository("cart", id, err)
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_errors_map_one_to_one() {
        let id = Uuid::new_v4();
        assert!(matches!(
            ServiceError::order(id, RepositoryError::NotFound),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            ServiceError::order(id, RepositoryError::Deleted),
            ServiceError::Deleted(_)
        ));
        assert!(matches!(
            ServiceError::order(id, RepositoryError::NotOwnedByUser),
            ServiceError::Forbidden(_)
        ));
        assert!(matches!(
            ServiceError::order(id, RepositoryError::Locked),
            ServiceError::Locked(_)
        ));
        assert!(matches!(
            ServiceError::cart(id, RepositoryError::Conflict),
            ServiceError::Conflict(_)
        ));
    }

    #[test]
    fn storage_faults_become_internal_errors() {
        let err = ServiceError::order(
            Uuid::new_v4(),
            RepositoryError::Storage(anyhow::anyhow!("backend unavailable")),
        );
        match err {
            ServiceError::Internal(msg) => assert!(msg.contains("backend unavailable")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }
}
