use thiserror::Error;

use super::types::{CompanyId, ContractId};
use crate::store::StoreError;

/// Errors returned by the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no active workflow found for contract {contract_id}")]
    NoActiveWorkflow { contract_id: ContractId },

    #[error("invalid action '{action}': expected 'approve' or 'reject'")]
    InvalidAction { action: String },

    #[error("contract {contract_id} does not belong to company {company_id}")]
    AccessDenied {
        contract_id: ContractId,
        company_id: CompanyId,
    },

    #[error("contract {contract_id} not found")]
    ContractNotFound { contract_id: ContractId },

    /// Another decision moved the instance between our read and our write.
    #[error("contract {contract_id} was decided concurrently; reload and retry")]
    ConcurrentDecision { contract_id: ContractId },

    #[error("transaction failed for contract {contract_id}: {source}")]
    TransactionFailed {
        contract_id: ContractId,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// HTTP status code the API answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            WorkflowError::InvalidAction { .. } => 400,
            WorkflowError::AccessDenied { .. } => 403,
            WorkflowError::NoActiveWorkflow { .. } | WorkflowError::ContractNotFound { .. } => 404,
            WorkflowError::ConcurrentDecision { .. } => 409,
            WorkflowError::TransactionFailed { .. } | WorkflowError::Store(_) => 500,
        }
    }

    /// Client errors are expected outcomes and never logged as failures.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(WorkflowError::InvalidAction { action: "maybe".into() }.status_code(), 400);
        assert_eq!(WorkflowError::NoActiveWorkflow { contract_id: 1 }.status_code(), 404);
        assert_eq!(
            WorkflowError::AccessDenied { contract_id: 1, company_id: 2 }.status_code(),
            403
        );
        assert_eq!(WorkflowError::ConcurrentDecision { contract_id: 1 }.status_code(), 409);

        let failed = WorkflowError::TransactionFailed {
            contract_id: 1,
            source: StoreError::Backend("disk full".into()),
        };
        assert_eq!(failed.status_code(), 500);
        assert!(!failed.is_client_error());
        assert!(failed.to_string().contains("disk full"));
    }
}
