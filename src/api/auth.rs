//! Credential bootstrap for the engine API.

use super::{ApiError, EngineApi};

/// What the supervisor hands the client layer: either the generated
/// one-time secret (first connection this run) or the durable token saved
/// from an earlier exchange.
#[derive(Debug, Clone)]
pub enum Credential {
    OneTime(String),
    Durable(String),
}

/// Establish the durable credential used for the rest of the session.
///
/// A durable token passes through unchanged with no round trip; a one-time
/// secret is redeemed in a single request. Any failure here is fatal to
/// application startup — there is no retry.
pub async fn establish_credentials(
    api: &dyn EngineApi,
    credential: &Credential,
) -> Result<String, ApiError> {
    match credential {
        Credential::Durable(token) => {
            api.adopt_token(token);
            Ok(token.clone())
        }
        Credential::OneTime(secret) => {
            let token = api.exchange_token(secret).await?;
            tracing::info!("exchanged one-time secret for engine session token");
            Ok(token)
        }
    }
}
