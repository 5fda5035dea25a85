//! Credential introspection hardened by the retry executor.
//!
//! Only admission-side callers check credentials; the scheduler never does.

use std::time::Duration;

use async_trait::async_trait;

use crate::retry::{retry, Disposition, RetryError, RetryPolicy, Retryable};

/// Tokens with this much lifetime or less are treated as expired.
pub const MIN_REMAINING: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenInfo {
    pub subject: String,
    pub scopes: Vec<String>,
    pub expires_in: Duration,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CredentialError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("token introspection unreachable: {0}")]
    Unreachable(String),
}

impl Retryable for CredentialError {
    fn disposition(&self) -> Disposition {
        match self {
            CredentialError::Unreachable(_) => Disposition::Transient,
            CredentialError::Expired | CredentialError::Invalid => {
                Disposition::Terminal
            },
        }
    }
}

#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<TokenInfo, CredentialError>;
}

/// Validates `token`, retrying unreachable introspection under `policy`.
/// A token about to expire is rejected as [`CredentialError::Expired`].
pub async fn validate_credential(
    validator: &dyn CredentialValidator,
    policy: &RetryPolicy,
    token: &str,
) -> Result<TokenInfo, RetryError<CredentialError>> {
    let checked =
        retry(policy, "validate-credential", || validator.validate(token))
            .await?;

    if checked.value.expires_in <= MIN_REMAINING {
        return Err(RetryError::Rejected {
            attempts: checked.attempts,
            cause: CredentialError::Expired,
        });
    }

    Ok(checked.value)
}
