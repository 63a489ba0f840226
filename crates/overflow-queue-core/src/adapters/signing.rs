//! Shared access signatures for adapter-backed queues.
//!
//! Tokens are query strings signed with HMAC-SHA256 over a newline separated
//! string-to-sign:
//!
//! ```text
//! <permissions>\n<start>\n<expiry>\n/queue/<account>/<queue>\n<policy id>\n<version>
//! ```

use crate::error::QueueError;
use crate::queue_client::SharedAccessPolicy;
use crate::QueueName;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Signed version tag embedded in every token
pub const SIGNATURE_VERSION: &str = "2024-08-04";

/// Signs and verifies queue tokens with an account key
pub(crate) struct SasSigner {
    account_name: String,
    key: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for SasSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasSigner")
            .field("account_name", &self.account_name)
            .field("key", &self.key.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl SasSigner {
    pub fn new(account_name: impl Into<String>, key: Option<Vec<u8>>) -> Self {
        Self {
            account_name: account_name.into(),
            key: key.map(Zeroizing::new),
        }
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Produce a token for `queue`
    ///
    /// Ad-hoc policies must carry an expiry and at least one right; a stored
    /// policy identifier supplies whatever the ad-hoc fields leave out.
    pub fn sign(
        &self,
        queue: &QueueName,
        policy: &SharedAccessPolicy,
        stored_policy_id: Option<&str>,
    ) -> Result<String, QueueError> {
        if stored_policy_id.is_none() {
            if policy.expires_at.is_none() {
                return Err(QueueError::InvalidRequest {
                    message: "an expiry is required without a stored access policy".to_string(),
                });
            }
            if policy.permissions.is_empty() {
                return Err(QueueError::InvalidRequest {
                    message: "at least one permission is required without a stored access policy"
                        .to_string(),
                });
            }
        }

        if let (Some(start), Some(expiry)) = (policy.starts_at, policy.expires_at) {
            if start >= expiry {
                return Err(QueueError::InvalidRequest {
                    message: "signature start must precede its expiry".to_string(),
                });
            }
        }

        let fields = SignedFields {
            permissions: policy.permissions.to_string(),
            start: policy.starts_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            expiry: policy.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            identifier: stored_policy_id.unwrap_or_default().to_string(),
            version: SIGNATURE_VERSION.to_string(),
        };
        let signature = BASE64.encode(self.mac(queue, &fields)?);

        let mut pairs = vec![("sv", fields.version.as_str())];
        if !fields.permissions.is_empty() {
            pairs.push(("sp", fields.permissions.as_str()));
        }
        if !fields.start.is_empty() {
            pairs.push(("st", fields.start.as_str()));
        }
        if !fields.expiry.is_empty() {
            pairs.push(("se", fields.expiry.as_str()));
        }
        if !fields.identifier.is_empty() {
            pairs.push(("si", fields.identifier.as_str()));
        }
        pairs.push(("sig", signature.as_str()));

        Ok(pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&"))
    }

    /// Check a token produced by [`sign`](Self::sign) for `queue`
    ///
    /// Only the signature is checked; expiry enforcement belongs to whoever
    /// accepts the token.
    pub fn verify(&self, queue: &QueueName, token: &str) -> bool {
        let mut params = HashMap::new();
        for pair in token.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                return false;
            };
            let Ok(value) = urlencoding::decode(value) else {
                return false;
            };
            params.insert(key.to_string(), value.into_owned());
        }

        let field = |name: &str| params.get(name).cloned().unwrap_or_default();
        let fields = SignedFields {
            permissions: field("sp"),
            start: field("st"),
            expiry: field("se"),
            identifier: field("si"),
            version: field("sv"),
        };

        let Ok(provided) = BASE64.decode(field("sig")) else {
            return false;
        };
        let Ok(expected) = self.mac(queue, &fields) else {
            return false;
        };

        expected.as_slice().ct_eq(provided.as_slice()).into()
    }

    fn mac(&self, queue: &QueueName, fields: &SignedFields) -> Result<Vec<u8>, QueueError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| QueueError::AuthenticationFailed {
                message: format!("no key configured for account '{}'", self.account_name),
            })?;

        let mut mac =
            HmacSha256::new_from_slice(key.as_slice()).map_err(|_| QueueError::Internal {
                message: "failed to initialize HMAC-SHA256".to_string(),
            })?;

        let string_to_sign = format!(
            "{}\n{}\n{}\n/queue/{}/{}\n{}\n{}",
            fields.permissions,
            fields.start,
            fields.expiry,
            self.account_name,
            queue,
            fields.identifier,
            fields.version
        );
        mac.update(string_to_sign.as_bytes());

        Ok(mac.finalize().into_bytes().to_vec())
    }
}

struct SignedFields {
    permissions: String,
    start: String,
    expiry: String,
    identifier: String,
    version: String,
}

#[cfg(test)]
#[path = "signing_tests.rs"]
mod tests;
