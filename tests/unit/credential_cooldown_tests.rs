//! Credential Cooldown Unit Tests
//!
//! Tests how often the authenticator is reached:
//! - Manual refreshes inside the cooldown reuse the cached bearer
//! - Authorization failures bypass the cooldown
//! - Concurrent refreshes for one account collapse into one handshake
//! - A preventive sweep refreshes accounts independently

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use sniper_operator::config::AccountConfig;
use sniper_operator::credentials::{
    AuthError, Authenticator, CredentialCache, CredentialSettings, MemoryStore, RefreshReason,
};

use crate::fakes::*;

// =============================================================================
// COOLDOWN
// =============================================================================

#[tokio::test]
async fn test_manual_refresh_respects_cooldown() {
    let auth = CountingAuth::new();
    let cache = credentials(&[direct_account("alpha")], auth.clone());

    let first = cache.force_refresh("alpha", RefreshReason::Manual).await.unwrap();
    let second = cache.force_refresh("alpha", RefreshReason::Manual).await.unwrap();

    assert!(auth.calls() <= 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_manual_refresh_after_seed_uses_cache() {
    let auth = CountingAuth::new();
    let cache = credentials(&[direct_account("alpha")], auth.clone());

    assert_eq!(cache.get("alpha").await.unwrap(), "seed");
    let value = cache.force_refresh("alpha", RefreshReason::Manual).await.unwrap();

    assert_eq!(value, "seed");
    assert_eq!(auth.calls(), 0);
}

#[tokio::test]
async fn test_unauthorized_bypasses_cooldown() {
    let auth = CountingAuth::new();
    let cache = credentials(&[direct_account("alpha")], auth.clone());

    let first = cache
        .force_refresh("alpha", RefreshReason::HttpStatus(401))
        .await
        .unwrap();
    let second = cache
        .force_refresh("alpha", RefreshReason::HttpStatus(401))
        .await
        .unwrap();

    assert_eq!(auth.calls(), 2);
    assert_eq!(first, "fresh-1");
    assert_eq!(second, "fresh-2");
    assert_eq!(cache.get("alpha").await.unwrap(), "fresh-2");
}

#[tokio::test]
async fn test_invalid_token_payload_bypasses_cooldown() {
    let auth = CountingAuth::new();
    let cache = credentials(&[direct_account("alpha")], auth.clone());

    cache.get("alpha").await.unwrap();
    let value = cache
        .force_refresh("alpha", RefreshReason::InvalidTokenPayload)
        .await
        .unwrap();

    assert_eq!(value, "fresh-1");
    assert_eq!(auth.calls(), 1);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test]
async fn test_concurrent_refreshes_share_one_handshake() {
    let auth = CountingAuth::with_delay(Duration::from_millis(50));
    let cache = credentials(&[direct_account("alpha")], auth.clone());

    let (a, b) = tokio::join!(
        cache.force_refresh("alpha", RefreshReason::HttpStatus(401)),
        cache.force_refresh("alpha", RefreshReason::HttpStatus(403)),
    );

    assert_eq!(auth.calls(), 1);
    assert_eq!(a.unwrap(), "fresh-1");
    assert_eq!(b.unwrap(), "fresh-1");
}

#[tokio::test]
async fn test_accounts_refresh_independently() {
    let auth = CountingAuth::with_delay(Duration::from_millis(20));
    let cache = credentials(
        &[direct_account("alpha"), direct_account("beta")],
        auth.clone(),
    );

    let (a, b) = tokio::join!(
        cache.force_refresh("alpha", RefreshReason::HttpStatus(401)),
        cache.force_refresh("beta", RefreshReason::HttpStatus(401)),
    );

    assert_eq!(auth.calls(), 2);
    assert_ne!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn test_unknown_account_is_an_error() {
    let cache = credentials(&[direct_account("alpha")], CountingAuth::new());
    assert!(cache.get("ghost").await.is_err());
    assert!(cache
        .force_refresh("ghost", RefreshReason::HttpStatus(401))
        .await
        .is_err());
}

// =============================================================================
// PREVENTIVE SWEEP
// =============================================================================

/// `broken` is rejected, `stuck` never answers, everyone else gets a bearer
struct MixedAuth;

#[async_trait]
impl Authenticator for MixedAuth {
    async fn authorize(&self, account: &AccountConfig) -> Result<String, AuthError> {
        match account.name.as_str() {
            "broken" => Err(AuthError::Rejected("handshake failed".to_string())),
            "stuck" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(AuthError::Timeout(Duration::from_secs(3600)))
            }
            name => Ok(format!("fresh-{}", name)),
        }
    }
}

#[tokio::test]
async fn test_sweep_refreshes_accounts_independently() {
    let accounts = vec![direct_account("alpha"), direct_account("broken"), direct_account("stuck")];
    let cache = Arc::new(CredentialCache::new(
        &accounts,
        Arc::new(MixedAuth),
        Arc::new(MemoryStore::new()),
        CredentialSettings {
            ttl: Duration::from_secs(60),
            lookahead: Duration::from_secs(120),
            auth_timeout: Duration::from_millis(400),
            ..CredentialSettings::default()
        },
    ));
    assert_eq!(cache.warm_up().await, 3);

    let handles = cache.preventive_sweep();
    assert_eq!(handles.len(), 3);

    // alpha refreshes while stuck is still waiting on its handshake
    let refreshed = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            if cache.get("alpha").await.unwrap() == "fresh-alpha" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(refreshed.is_ok(), "alpha waited on another account's refresh");
    assert_eq!(cache.get("broken").await.unwrap(), "seed");

    for handle in handles {
        handle.await.unwrap();
    }
    // Failed and timed-out refreshes keep the previous bearer
    assert_eq!(cache.get("stuck").await.unwrap(), "seed");
    assert_eq!(cache.get("alpha").await.unwrap(), "fresh-alpha");
}
