//! Request/response types for the query API

use serde::{Deserialize, Serialize};

use crate::vault::{VaultId, VaultSnapshot};

/// Query string of `GET /vaults`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListVaultsQuery {
    /// `address::module::name`; the address may be short or `0x`-prefixed
    pub asset_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultListResponse {
    pub vaults: Vec<VaultSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub vault_id: VaultId,
    pub balance: u64,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new("VAULT_NOT_FOUND", "vault not found")
            .with_details("vault_id: 123");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("VAULT_NOT_FOUND"));
        assert!(json.contains("vault_id: 123"));

        let bare = serde_json::to_string(&ErrorResponse::new("X", "y")).unwrap();
        assert!(!bare.contains("details"));
    }
}
