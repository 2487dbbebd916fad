//! Error taxonomy shared by every crate in the workspace.
//!
//! Each variant maps deterministically to one HTTP status code and one
//! [`StatusReason`], and the mapping reverses in the client so a caller on
//! the far side of the wire sees the same variant the server produced.

use thiserror::Error;

use crate::status::{
    CauseType, Status, StatusCause, StatusDetails, StatusReason, StatusValue,
};

/// Kind of a single field validation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    Invalid,
    Duplicate,
    NotSupported,
    NotFound,
}

impl FieldErrorKind {
    fn cause_type(self) -> CauseType {
        match self {
            FieldErrorKind::Required => CauseType::FieldValueRequired,
            FieldErrorKind::Invalid => CauseType::FieldValueInvalid,
            FieldErrorKind::Duplicate => CauseType::FieldValueDuplicate,
            FieldErrorKind::NotSupported => CauseType::FieldValueNotSupported,
            FieldErrorKind::NotFound => CauseType::FieldValueNotFound,
        }
    }
}

/// One field-level validation failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub kind: FieldErrorKind,
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(kind: FieldErrorKind, field: &str, message: impl Into<String>) -> FieldError {
        FieldError {
            kind,
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn required(field: &str) -> FieldError {
        FieldError::new(FieldErrorKind::Required, field, "required value")
    }

    pub fn invalid(field: &str, message: impl Into<String>) -> FieldError {
        FieldError::new(FieldErrorKind::Invalid, field, message)
    }

    pub fn duplicate(field: &str, message: impl Into<String>) -> FieldError {
        FieldError::new(FieldErrorKind::Duplicate, field, message)
    }

    pub fn not_supported(field: &str, message: impl Into<String>) -> FieldError {
        FieldError::new(FieldErrorKind::NotSupported, field, message)
    }

    pub fn not_found(field: &str, message: impl Into<String>) -> FieldError {
        FieldError::new(FieldErrorKind::NotFound, field, message)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} {name:?} cannot be updated: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("{kind} {name:?} is invalid: {} field error(s)", errors.len())]
    Invalid {
        kind: String,
        name: String,
        errors: Vec<FieldError>,
    },

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("no kind {0:?} is registered")]
    NotRecognized(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("operation canceled")]
    Canceled,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("{0}: {1}")]
    Serialization(String, #[source] serde_json::Error),

    #[error("{0}")]
    Unknown(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: &str, name: &str) -> Error {
        Error::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &str, name: &str) -> Error {
        Error::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn conflict(kind: &str, name: &str, message: impl Into<String>) -> Error {
        Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid(kind: &str, name: &str, errors: Vec<FieldError>) -> Error {
        Error::Invalid {
            kind: kind.to_string(),
            name: name.to_string(),
            errors,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    pub fn http_code(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::AlreadyExists { .. } | Error::Conflict { .. } => 409,
            Error::Invalid { .. } => 422,
            Error::NotSupported(_) => 405,
            Error::Unauthorized(_) => 401,
            Error::Timeout(_) => 504,
            Error::Decode(_) | Error::NotRecognized(_) => 400,
            Error::Canceled | Error::Serialization(..) | Error::Unknown(_) => 500,
        }
    }

    pub fn reason(&self) -> StatusReason {
        match self {
            Error::NotFound { .. } => StatusReason::NotFound,
            Error::AlreadyExists { .. } => StatusReason::AlreadyExists,
            Error::Conflict { .. } => StatusReason::Conflict,
            Error::Invalid { .. } => StatusReason::Invalid,
            Error::NotSupported(_) => StatusReason::MethodNotAllowed,
            Error::Unauthorized(_) => StatusReason::Unauthorized,
            Error::Timeout(_) => StatusReason::Timeout,
            Error::Decode(_) | Error::NotRecognized(_) => StatusReason::BadRequest,
            Error::Canceled | Error::Serialization(..) | Error::Unknown(_) => StatusReason::Unknown,
        }
    }

    /// Render into the wire envelope.
    pub fn to_status(&self) -> Status {
        let details = match self {
            Error::NotFound { kind, name }
            | Error::AlreadyExists { kind, name }
            | Error::Conflict { kind, name, .. } => Some(StatusDetails {
                kind: kind.clone(),
                id: name.clone(),
                causes: Vec::new(),
            }),
            Error::Invalid { kind, name, errors } => Some(StatusDetails {
                kind: kind.clone(),
                id: name.clone(),
                causes: errors
                    .iter()
                    .map(|e| StatusCause {
                        cause_type: Some(e.kind.cause_type()),
                        message: e.message.clone(),
                        field: e.field.clone(),
                    })
                    .collect(),
            }),
            _ => None,
        };
        Status {
            status: StatusValue::Failure,
            code: self.http_code(),
            reason: Some(self.reason()),
            message: self.to_string(),
            details,
        }
    }

    /// Rebuild the taxonomy variant from a received envelope. Used by the
    /// client so retry decisions on either side of the wire agree.
    pub fn from_status(status: &Status) -> Error {
        let kind = status
            .details
            .as_ref()
            .map(|d| d.kind.clone())
            .unwrap_or_default();
        let id = status
            .details
            .as_ref()
            .map(|d| d.id.clone())
            .unwrap_or_default();
        match status.reason {
            Some(StatusReason::NotFound) => Error::not_found(&kind, &id),
            Some(StatusReason::AlreadyExists) => Error::already_exists(&kind, &id),
            Some(StatusReason::Conflict) => Error::conflict(&kind, &id, status.message.clone()),
            Some(StatusReason::Invalid) => Error::Invalid {
                kind,
                name: id,
                errors: status
                    .details
                    .as_ref()
                    .map(|d| {
                        d.causes
                            .iter()
                            .map(|c| FieldError {
                                kind: match c.cause_type {
                                    Some(CauseType::FieldValueRequired) => FieldErrorKind::Required,
                                    Some(CauseType::FieldValueDuplicate) => {
                                        FieldErrorKind::Duplicate
                                    }
                                    Some(CauseType::FieldValueNotSupported) => {
                                        FieldErrorKind::NotSupported
                                    }
                                    Some(CauseType::FieldValueNotFound) => FieldErrorKind::NotFound,
                                    _ => FieldErrorKind::Invalid,
                                },
                                field: c.field.clone(),
                                message: c.message.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            Some(StatusReason::MethodNotAllowed) => Error::NotSupported(status.message.clone()),
            Some(StatusReason::Unauthorized) => Error::Unauthorized(status.message.clone()),
            Some(StatusReason::Timeout) => Error::Timeout(status.message.clone()),
            Some(StatusReason::BadRequest) => Error::Decode(status.message.clone()),
            _ => Error::Unknown(status.message.clone()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_http_code_mapping() {
        assert_eq!(Error::not_found("Pod", "p1").http_code(), 404);
        assert_eq!(Error::already_exists("Pod", "p1").http_code(), 409);
        assert_eq!(Error::conflict("Pod", "p1", "lost race").http_code(), 409);
        assert_eq!(Error::invalid("Pod", "p1", vec![]).http_code(), 422);
        assert_eq!(Error::NotSupported("watch".into()).http_code(), 405);
    }

    #[test]
    fn test_status_round_trip() {
        let err = Error::invalid(
            "Pod",
            "p1",
            vec![
                FieldError::required("spec.containers"),
                FieldError::duplicate("spec.containers[1].name", "c"),
            ],
        );
        let status = err.to_status();
        assert_eq!(status.code, 422);
        assert_eq!(status.reason, Some(StatusReason::Invalid));
        assert_eq!(status.details.as_ref().unwrap().causes.len(), 2);

        match Error::from_status(&status) {
            Error::Invalid { kind, name, errors } => {
                assert_eq!(kind, "Pod");
                assert_eq!(name, "p1");
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].kind, FieldErrorKind::Required);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_conflict_round_trip() {
        let status = Error::conflict("Service", "s1", "resource version mismatch").to_status();
        let back = Error::from_status(&status);
        assert!(back.is_conflict());
        assert_eq!(back.http_code(), 409);
    }
}
