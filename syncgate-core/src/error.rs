use serde::Serialize;
use thiserror::Error;

use crate::access::AccessError;

/// Stable failure taxonomy presented to callers. Raw backend failure shapes
/// never cross the engine boundary.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum SyncError {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("no such item on read: {0}")]
    NotFoundOnRead(String),
    #[error("no such item on write: {0}")]
    NotFoundOnWrite(String),
    #[error("no progress on {path} after {attempts} attempts")]
    Timeout { path: String, attempts: u32 },
    #[error("container unavailable: {0}")]
    ContainerUnavailable(String),
    #[error("backend failure: {source}")]
    Native {
        #[source]
        source: AccessError,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    NotFoundOnRead,
    NotFoundOnWrite,
    Timeout,
    ContainerUnavailable,
    NativeFailure,
    InvalidArgument,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::NotFoundOnRead(_) => ErrorKind::NotFoundOnRead,
            SyncError::NotFoundOnWrite(_) => ErrorKind::NotFoundOnWrite,
            SyncError::Timeout { .. } => ErrorKind::Timeout,
            SyncError::ContainerUnavailable(_) => ErrorKind::ContainerUnavailable,
            SyncError::Native { .. } => ErrorKind::NativeFailure,
            SyncError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Which side of the coordinated-access primitive a failure came from. The
/// same raw not-found cause classifies differently per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessContext {
    Read,
    Write,
    Neutral,
}

pub fn classify(err: AccessError, context: AccessContext) -> SyncError {
    match err {
        AccessError::NotFound(path) => match context {
            AccessContext::Read => SyncError::NotFoundOnRead(path),
            AccessContext::Write => SyncError::NotFoundOnWrite(path),
            AccessContext::Neutral => SyncError::NotFound(path),
        },
        AccessError::Unavailable(reason) => SyncError::ContainerUnavailable(reason),
        other @ AccessError::Backend { .. } => SyncError::Native { source: other },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classifies_by_context() {
        let raw = || AccessError::NotFound("Docs/A.txt".into());
        assert_eq!(
            classify(raw(), AccessContext::Read),
            SyncError::NotFoundOnRead("Docs/A.txt".into())
        );
        assert_eq!(
            classify(raw(), AccessContext::Write),
            SyncError::NotFoundOnWrite("Docs/A.txt".into())
        );
        assert_eq!(
            classify(raw(), AccessContext::Neutral),
            SyncError::NotFound("Docs/A.txt".into())
        );
    }

    #[test]
    fn unavailable_maps_to_container_unavailable() {
        let err = classify(
            AccessError::Unavailable("no entitlement".into()),
            AccessContext::Read,
        );
        assert_eq!(err.kind(), ErrorKind::ContainerUnavailable);
    }

    #[test]
    fn backend_failures_keep_their_cause() {
        let raw = AccessError::Backend {
            operation: "open",
            message: "disk I/O error".into(),
        };
        let err = classify(raw.clone(), AccessContext::Write);
        assert_eq!(err.kind(), ErrorKind::NativeFailure);
        assert_eq!(err, SyncError::Native { source: raw });
    }

    #[test]
    fn every_variant_reports_its_kind() {
        assert_eq!(
            SyncError::Timeout {
                path: "A".into(),
                attempts: 3
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            SyncError::InvalidArgument("empty path".into()).kind(),
            ErrorKind::InvalidArgument
        );
    }
}
