use serde::{Deserialize, Serialize};

/// Literal posted by the page to open the bridge.
pub const INIT_MESSAGE: &str = "init";

/// Literal the relay answers on the attached channel once bridged.
pub const READY_MESSAGE: &str = "ready";

/// Requests the untrusted context may send to the privileged context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PrivilegedRequest {
    /// Sign hex-encoded bytes with the key of an account.
    Sign {
        id: String,
        address: String,
        data: String,
    },
    /// List the accounts of the open vault.
    Accounts { id: String },
}

impl PrivilegedRequest {
    pub fn id(&self) -> &str {
        match self {
            PrivilegedRequest::Sign { id, .. } | PrivilegedRequest::Accounts { id } => id,
        }
    }
}

/// Public part of an account. Secret keys never leave the privileged task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub address: String,
    pub name: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No vault is unsealed.
    NoSession,
    UnknownAccount,
    BadRequest,
    VaultError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PrivilegedResponse {
    #[serde(rename_all = "camelCase")]
    Signature {
        id: String,
        address: String,
        public_key: String,
        signature: String,
    },
    Accounts {
        id: String,
        accounts: Vec<AccountSummary>,
    },
    Error {
        /// Absent when the request could not be parsed far enough.
        id: Option<String>,
        code: ErrorCode,
        message: String,
    },
}

impl PrivilegedResponse {
    pub fn error(id: Option<&str>, code: ErrorCode, message: impl Into<String>) -> Self {
        PrivilegedResponse::Error {
            id: id.map(str::to_string),
            code,
            message: message.into(),
        }
    }
}
