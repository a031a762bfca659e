//! Webhook signature verification

use axum::http::HeaderMap;
use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::error;

use crate::error::{EngineError, Result};
use crate::payload::ProviderKind;

type HmacSha256 = Hmac<Sha256>;

pub const GITHUB_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const GITLAB_TOKEN_HEADER: &str = "X-Gitlab-Token";

/// Verify a GitHub `sha256=<hex>` signature over the raw payload.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(git_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    match hex_decode(git_signature) {
        Ok(git_signature_bytes) => mac.verify_slice(&git_signature_bytes).is_ok(),
        Err(_) => {
            error!("Signature header is not valid hex");
            false
        }
    }
}

/// GitLab sends the shared secret verbatim in `X-Gitlab-Token`.
pub fn verify_gitlab_token(secret: &str, token: &str) -> bool {
    let (a, b) = (secret.as_bytes(), token.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check the delivery headers of `kind` against the configured webhook secret.
pub fn verify_signature(kind: ProviderKind, secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let header = match kind {
        ProviderKind::GitHub => GITHUB_SIGNATURE_HEADER,
        ProviderKind::GitLab => GITLAB_TOKEN_HEADER,
    };
    let value = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EngineError::Signature(format!("no {} header supplied", header)))?;

    let valid = match kind {
        ProviderKind::GitHub => verify_github_signature(secret, body, value),
        ProviderKind::GitLab => verify_gitlab_token(secret, value),
    };
    if !valid {
        return Err(EngineError::Signature("secret not correct".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn github_signature_accepts_valid_and_rejects_tampered() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let signature = sign("s3cret", body);

        assert!(verify_github_signature("s3cret", body, &signature));
        assert!(!verify_github_signature("other", body, &signature));
        assert!(!verify_github_signature("s3cret", b"{}", &signature));
        assert!(!verify_github_signature("s3cret", body, "sha1=abcd"));
        assert!(!verify_github_signature("s3cret", body, "sha256=zz"));
    }

    #[test]
    fn gitlab_token_comparison() {
        assert!(verify_gitlab_token("token", "token"));
        assert!(!verify_gitlab_token("token", "tokem"));
        assert!(!verify_gitlab_token("token", "tok"));
    }

    #[test]
    fn missing_header_is_a_signature_error() {
        let err = verify_signature(ProviderKind::GitHub, "s3cret", &HeaderMap::new(), b"{}").unwrap_err();
        assert!(matches!(err, EngineError::Signature(_)));

        let mut headers = HeaderMap::new();
        headers.insert("x-gitlab-token", HeaderValue::from_static("s3cret"));
        assert!(verify_signature(ProviderKind::GitLab, "s3cret", &headers, b"{}").is_ok());
    }
}
