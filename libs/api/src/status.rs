//! The `Status` envelope returned for every non-object response.

use serde::{Deserialize, Serialize};

/// Outcome of an operation, carried in the `status` field.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StatusValue {
    Success,
    #[default]
    Failure,
    /// The operation is still in progress; `details.id` names the operation
    /// to poll.
    Working,
}

/// Machine-readable reason a request failed, one per taxonomy entry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StatusReason {
    NotFound,
    AlreadyExists,
    Conflict,
    Invalid,
    MethodNotAllowed,
    BadRequest,
    Unauthorized,
    Timeout,
    Working,
    #[default]
    Unknown,
}

/// Kind of a single field-level validation failure.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CauseType {
    FieldValueRequired,
    FieldValueInvalid,
    FieldValueDuplicate,
    FieldValueNotSupported,
    FieldValueNotFound,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusCause {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub cause_type: Option<CauseType>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    /// Kind of the object the failure concerns.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// Name of the object, or the operation id for `Working`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<StatusCause>,
}

/// Envelope for non-2xx responses and for long-running operation polls.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub status: StatusValue,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub code: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
}

fn is_zero(code: &u16) -> bool {
    *code == 0
}

impl Status {
    pub fn success() -> Status {
        Status {
            status: StatusValue::Success,
            code: 200,
            ..Status::default()
        }
    }

    pub fn working(operation_id: &str) -> Status {
        Status {
            status: StatusValue::Working,
            code: 202,
            reason: Some(StatusReason::Working),
            message: format!("operation {operation_id} is still in progress"),
            details: Some(StatusDetails {
                id: operation_id.to_string(),
                ..StatusDetails::default()
            }),
        }
    }
}
