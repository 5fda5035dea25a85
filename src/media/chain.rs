use std::sync::Arc;

use tracing::warn;

use super::{Artifact, DownloadError, DownloadRequest, MediaSource};
use crate::retry::{retry, Attempted, RetryError, RetryPolicy};

/// Ordered list of download providers.
///
/// Each provider gets its own full run of the retry executor. When a provider
/// ends in failure, the next one is tried; the attempts of every provider are
/// summed and the last provider's error is surfaced.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn MediaSource>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn MediaSource>>) -> Self {
        Self { providers }
    }

    pub fn single(provider: Arc<dyn MediaSource>) -> Self {
        Self::new(vec![provider])
    }

    pub async fn download(
        &self,
        policy: &RetryPolicy,
        request: &DownloadRequest<'_>,
    ) -> Result<Attempted<Artifact>, RetryError<DownloadError>> {
        let mut spent = 0;
        let mut last = None;

        for provider in &self.providers {
            let outcome = retry(policy, provider.name(), || {
                provider.download(request)
            })
            .await;

            match outcome {
                Ok(mut done) => {
                    done.attempts += spent;
                    return Ok(done);
                },
                Err(error) => {
                    warn!(
                        provider = provider.name(),
                        source = request.source_ref,
                        %error,
                        "provider failed, trying next"
                    );
                    spent += error.attempts();
                    last = Some(error);
                },
            }
        }

        Err(match last {
            Some(error) => {
                let own = error.attempts();
                error.with_prior_attempts(spent - own)
            },
            None => RetryError::Rejected {
                attempts: 0,
                cause: DownloadError::Unavailable(
                    "no download providers configured".into(),
                ),
            },
        })
    }
}
