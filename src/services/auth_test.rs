use super::*;
use crate::state::test_helpers::{TEST_JWT_SECRET, mint_token, mint_token_with_exp};

fn hs256_config() -> JwtConfig {
    JwtConfig { key: JwtKey::Secret(TEST_JWT_SECRET.into()), issuer: None, audience: None }
}

fn claims_from(json: serde_json::Value) -> TokenClaims {
    serde_json::from_value(json).expect("claims deserialize")
}

// =============================================================================
// normalize_roles / resolve_role
// =============================================================================

#[test]
fn roles_gathered_from_realm_clients_and_top_level() {
    let claims = claims_from(serde_json::json!({
        "realm_access": { "roles": ["offline_access", "member"] },
        "resource_access": { "gym-frontend": { "roles": ["trainer"] }, "account": { "roles": ["manage-account"] } },
        "roles": ["ROLE_ADMIN"],
    }));
    let roles = normalize_roles(&claims);
    assert_eq!(roles, BTreeSet::from([Role::Member, Role::Trainer, Role::Admin]));
}

#[test]
fn legacy_role_names_are_mapped() {
    assert_eq!(normalize_role("instructor"), Some(Role::Trainer));
    assert_eq!(normalize_role("ROLE_ATHLETE"), Some(Role::Member));
    assert_eq!(normalize_role(" Role_trainer "), Some(Role::Trainer));
    assert_eq!(normalize_role("uma_authorization"), None);
}

#[test]
fn resolve_role_prefers_admin_then_trainer() {
    assert_eq!(resolve_role(&BTreeSet::from([Role::Member, Role::Trainer])), Role::Trainer);
    assert_eq!(resolve_role(&BTreeSet::from([Role::Admin, Role::Member])), Role::Admin);
    assert_eq!(resolve_role(&BTreeSet::new()), Role::Member);
}

#[test]
fn claims_without_role_sections_yield_no_roles() {
    let claims = claims_from(serde_json::json!({ "sub": "abc" }));
    assert!(normalize_roles(&claims).is_empty());
}

// =============================================================================
// identity fallbacks
// =============================================================================

#[test]
fn email_prefers_claim_then_username_then_subject() {
    let with_email = claims_from(serde_json::json!({ "sub": "s1", "email": "a@gym.test", "preferred_username": "al" }));
    assert_eq!(with_email.email_or_fallback(), "a@gym.test");

    let username_only = claims_from(serde_json::json!({ "sub": "s1", "email": "  ", "preferred_username": "al" }));
    assert_eq!(username_only.email_or_fallback(), "al@example.local");

    let subject_only = claims_from(serde_json::json!({ "sub": "s1" }));
    assert_eq!(subject_only.email_or_fallback(), "s1@example.local");
}

#[test]
fn display_name_fallback_chain() {
    let full = claims_from(serde_json::json!({ "name": "Alex Doe", "given_name": "A" }));
    assert_eq!(full.display_name("x@y"), "Alex Doe");

    let parts = claims_from(serde_json::json!({ "given_name": "Alex", "family_name": "Doe" }));
    assert_eq!(parts.display_name("x@y"), "Alex Doe");

    let given_only = claims_from(serde_json::json!({ "given_name": "Alex" }));
    assert_eq!(given_only.display_name("x@y"), "Alex");

    let username = claims_from(serde_json::json!({ "preferred_username": "alexd" }));
    assert_eq!(username.display_name("x@y"), "alexd");

    let nothing = claims_from(serde_json::json!({}));
    assert_eq!(nothing.display_name("x@y"), "x@y");
}

// =============================================================================
// JwtVerifier
// =============================================================================

#[test]
fn verifier_accepts_token_signed_with_secret() {
    let verifier = JwtVerifier::from_config(&hs256_config()).unwrap();
    let claims = verifier.verify(&mint_token("member-1", &["member"])).unwrap();
    assert_eq!(claims.sub, "member-1");
    assert_eq!(normalize_roles(&claims), BTreeSet::from([Role::Member]));
}

#[test]
fn verifier_rejects_wrong_secret() {
    let config = JwtConfig { key: JwtKey::Secret("another-secret".into()), issuer: None, audience: None };
    let verifier = JwtVerifier::from_config(&config).unwrap();
    assert!(matches!(verifier.verify(&mint_token("m", &[])), Err(AuthError::InvalidToken(_))));
}

#[test]
fn verifier_rejects_expired_token() {
    let verifier = JwtVerifier::from_config(&hs256_config()).unwrap();
    let expired = mint_token_with_exp("m", &[], time::OffsetDateTime::now_utc().unix_timestamp() - 3600);
    assert!(verifier.verify(&expired).is_err());
}

#[test]
fn verifier_rejects_garbage() {
    let verifier = JwtVerifier::from_config(&hs256_config()).unwrap();
    assert!(verifier.verify("not.a.jwt").is_err());
}

#[test]
fn verifier_enforces_configured_issuer() {
    let config = JwtConfig { issuer: Some("https://sso.gym.test/realms/gym".into()), ..hs256_config() };
    let verifier = JwtVerifier::from_config(&config).unwrap();
    assert!(verifier.verify(&mint_token("m", &[])).is_err());
}

fn mint_with(extra: serde_json::Value) -> String {
    let mut claims = serde_json::json!({
        "sub": "m",
        "exp": time::OffsetDateTime::now_utc().unix_timestamp() + 3600,
    });
    if let (Some(base), Some(extra)) = (claims.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

#[test]
fn verifier_requires_iss_and_aud_when_configured() {
    let config = JwtConfig {
        issuer: Some("https://sso.gym.test/realms/gym".into()),
        audience: Some("gym-api".into()),
        ..hs256_config()
    };
    let verifier = JwtVerifier::from_config(&config).unwrap();

    assert!(verifier.verify(&mint_with(serde_json::json!({}))).is_err());
    assert!(verifier.verify(&mint_with(serde_json::json!({ "iss": "https://sso.gym.test/realms/gym" }))).is_err());
    assert!(verifier.verify(&mint_with(serde_json::json!({ "aud": "gym-api" }))).is_err());

    let good = mint_with(serde_json::json!({ "iss": "https://sso.gym.test/realms/gym", "aud": "gym-api" }));
    assert_eq!(verifier.verify(&good).unwrap().sub, "m");
}

#[test]
fn verifier_rejects_wrong_audience() {
    let config = JwtConfig { audience: Some("gym-api".into()), ..hs256_config() };
    let verifier = JwtVerifier::from_config(&config).unwrap();
    assert!(verifier.verify(&mint_with(serde_json::json!({ "aud": "other-api" }))).is_err());
}

#[test]
fn invalid_rsa_pem_is_a_key_error() {
    let config = JwtConfig { key: JwtKey::RsaPublicPem("not a pem".into()), issuer: None, audience: None };
    assert!(matches!(JwtVerifier::from_config(&config), Err(AuthError::InvalidKey(_))));
}
