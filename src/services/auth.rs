//! Auth service: bearer token verification and role normalization.
//!
//! DESIGN
//! ======
//! Tokens are issued by an external identity provider (Keycloak in
//! production). This service only verifies them: HS256 with a shared secret
//! or RS256 with the realm public key, plus optional issuer/audience checks.
//! Roles may arrive in three places (realm roles, per-client roles, a
//! top-level `roles` claim) and in several spellings; `normalize_roles`
//! folds them into the three roles the application knows.

use std::collections::{BTreeMap, BTreeSet};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::{JwtConfig, JwtKey};
use crate::models::Role;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid bearer token: {0}")]
    InvalidToken(jsonwebtoken::errors::Error),
    #[error("invalid verification key: {0}")]
    InvalidKey(jsonwebtoken::errors::Error),
}

impl crate::error::ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "E_UNAUTHORIZED",
            Self::InvalidKey(_) => "E_AUTH_CONFIG",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleClaim {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The subset of identity-provider claims the application reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub realm_access: Option<RoleClaim>,
    #[serde(default)]
    pub resource_access: Option<BTreeMap<String, RoleClaim>>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    #[serde(default)]
    pub exp: i64,
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl TokenClaims {
    /// Email claim, else `preferred_username@example.local`, else `sub@example.local`.
    #[must_use]
    pub fn email_or_fallback(&self) -> String {
        if let Some(email) = non_blank(self.email.as_ref()) {
            return email.to_owned();
        }
        match non_blank(self.preferred_username.as_ref()) {
            Some(preferred) => format!("{preferred}@example.local"),
            None => format!("{}@example.local", self.sub),
        }
    }

    /// `name`, else `given family`, else `preferred_username`, else `email`.
    #[must_use]
    pub fn display_name(&self, email: &str) -> String {
        if let Some(name) = non_blank(self.name.as_ref()) {
            return name.to_owned();
        }
        let given = non_blank(self.given_name.as_ref()).unwrap_or_default();
        let family = non_blank(self.family_name.as_ref()).unwrap_or_default();
        let joined = format!("{given} {family}");
        let joined = joined.trim();
        if !joined.is_empty() {
            return joined.to_owned();
        }
        non_blank(self.preferred_username.as_ref()).unwrap_or(email).to_owned()
    }
}

// =============================================================================
// ROLES
// =============================================================================

/// Map one raw role string to an application role.
#[must_use]
pub fn normalize_role(raw: &str) -> Option<Role> {
    let upper = raw.trim().to_ascii_uppercase();
    let stripped = upper.strip_prefix("ROLE_").unwrap_or(&upper);
    match stripped {
        "INSTRUCTOR" => Some(Role::Trainer),
        "ATHLETE" => Some(Role::Member),
        other => Role::parse(other),
    }
}

/// Collect every recognised role from realm, client and top-level claims.
#[must_use]
pub fn normalize_roles(claims: &TokenClaims) -> BTreeSet<Role> {
    let realm = claims.realm_access.iter().flat_map(|r| r.roles.iter());
    let clients = claims
        .resource_access
        .iter()
        .flat_map(|clients| clients.values())
        .flat_map(|c| c.roles.iter());
    let direct = claims.roles.iter().flatten();

    realm.chain(clients).chain(direct).filter_map(|r| normalize_role(r)).collect()
}

/// Highest-precedence role (`ADMIN > TRAINER > MEMBER`), defaulting to member.
#[must_use]
pub fn resolve_role(roles: &BTreeSet<Role>) -> Role {
    roles.iter().max().copied().unwrap_or(Role::Member)
}

// =============================================================================
// VERIFIER
// =============================================================================

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").field("algorithms", &self.validation.algorithms).finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Build a verifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKey` when the RSA public key is not valid PEM.
    pub fn from_config(config: &JwtConfig) -> Result<Self, AuthError> {
        let (key, algorithm) = match &config.key {
            JwtKey::Secret(secret) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
            JwtKey::RsaPublicPem(pem) => {
                (DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(AuthError::InvalidKey)?, Algorithm::RS256)
            }
        };

        let mut validation = Validation::new(algorithm);
        // A configured issuer or audience must also be present in the token.
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
            validation.required_spec_claims.insert("iss".to_owned());
        }
        match &config.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                validation.required_spec_claims.insert("aud".to_owned());
            }
            None => validation.validate_aud = false,
        }

        Ok(Self { key, validation })
    }

    /// Verify signature and registered claims, returning the decoded claims.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for bad signatures, expired tokens,
    /// or issuer/audience mismatches.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        decode::<TokenClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
