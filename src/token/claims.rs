use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct Claims {
    exp: u64,
}

/// Reads the `exp` claim (seconds since epoch) out of a JWT-style access token.
///
/// The signature is deliberately not verified: the server already vouched for
/// the token, we only need its expiry to schedule a proactive refresh. A token
/// that cannot be decoded, or that carries no `exp`, yields `None` and is
/// treated by the scheduler as already expired.
pub fn token_expiry(token: &str) -> Option<SystemTime> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => Some(UNIX_EPOCH + Duration::from_secs(data.claims.exp)),
        Err(err) => {
            debug!(error = %err, "access token payload could not be decoded");
            None
        }
    }
}
