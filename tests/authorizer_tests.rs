mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;

use common::{MockGateway, REALM, REGION, RecordingPrompt, START_URL};
use vela::service::authorizer::{AuthorizeParams, SessionAuthorizer};

fn params<'a>(retry_after: u64, timeout: u64) -> AuthorizeParams<'a> {
    AuthorizeParams {
        realm_name: REALM,
        start_url: START_URL,
        region: REGION,
        client_name: "vela",
        retry_after: Duration::from_secs(retry_after),
        timeout: Duration::from_secs(timeout),
    }
}

#[tokio::test]
async fn realm_upsert_is_idempotent() {
    let (store, _dir) = common::temp_store().await;

    let first = store.upsert_realm(REALM, START_URL).await.unwrap();
    let second = store
        .upsert_realm(REALM, "https://acme.awsapps.com/start-v2")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.start_url, "https://acme.awsapps.com/start-v2");

    let found = store.find_realm(REALM).await.unwrap().unwrap();
    assert_eq!(found.start_url, "https://acme.awsapps.com/start-v2");
}

#[tokio::test]
async fn device_flow_persists_token_on_second_poll() {
    let (store, _dir) = common::temp_store().await;
    // Pause after the DB pool is connected so the poll loop's sleeps advance
    // on the virtual clock without racing the pool's acquire timeout.
    tokio::time::pause();
    let gateway = MockGateway::token_ready_after(2);
    let prompt = RecordingPrompt::new();
    let authorizer = SessionAuthorizer::new(&store, &gateway, &prompt);

    let auth = authorizer.authorize(params(1, 60)).await.unwrap();

    assert_eq!(gateway.register_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.device_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.token_calls.load(Ordering::SeqCst), 2);
    assert_eq!(auth.client_access_token.as_deref(), Some("sso-access-token"));
    assert!(!auth.is_access_token_expired());

    // The verification URL went to the injected collaborator.
    assert_eq!(
        prompt.opened.lock().unwrap().as_slice(),
        ["https://device.sso.test/verify?code=ABCD-EFGH"]
    );

    // The session record was committed.
    let realm = store.find_realm(REALM).await.unwrap().unwrap();
    let stored = store
        .find_authorization(realm.id, REGION)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.client_access_token.as_deref(), Some("sso-access-token"));
}

#[tokio::test]
async fn device_flow_times_out_when_never_approved() {
    let (store, _dir) = common::temp_store().await;
    // Pause after the DB pool is connected so the poll loop's sleeps advance
    // on the virtual clock without racing the pool's acquire timeout.
    tokio::time::pause();
    let gateway = MockGateway::pending_forever();
    let prompt = RecordingPrompt::new();
    let authorizer = SessionAuthorizer::new(&store, &gateway, &prompt);

    let err = authorizer.authorize(params(1, 3)).await.unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got: {err}");
    assert!(gateway.token_calls.load(Ordering::SeqCst) <= 3);

    // No access token was persisted.
    let realm = store.find_realm(REALM).await.unwrap().unwrap();
    assert!(
        store
            .find_authorization(realm.id, REGION)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn valid_session_is_reused_without_network_calls() {
    let (store, _dir) = common::temp_store().await;
    common::seed_realm_with_session(&store).await;

    let gateway = MockGateway::new();
    let prompt = RecordingPrompt::new();
    let authorizer = SessionAuthorizer::new(&store, &gateway, &prompt);

    let auth = authorizer.authorize(params(1, 60)).await.unwrap();

    assert_eq!(gateway.total_calls(), 0);
    assert_eq!(auth.client_access_token.as_deref(), Some("sso-access-token"));
    assert!(prompt.opened.lock().unwrap().is_empty());
}

#[tokio::test]
async fn expired_client_secret_reregisters_but_keeps_valid_token() {
    let (store, _dir) = common::temp_store().await;
    let (realm, mut auth) = common::seed_realm_with_session(&store).await;

    auth.client_secret_expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
    store.upsert_authorization(&auth).await.unwrap();

    let gateway = MockGateway::new();
    let prompt = RecordingPrompt::new();
    let authorizer = SessionAuthorizer::new(&store, &gateway, &prompt);

    let refreshed = authorizer.authorize(params(1, 60)).await.unwrap();

    // Only the lapsed step re-ran; device grant and token poll were skipped.
    assert_eq!(gateway.register_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.device_calls.load(Ordering::SeqCst), 0);
    assert_eq!(gateway.token_calls.load(Ordering::SeqCst), 0);
    assert!(!refreshed.is_client_secret_expired());
    assert_eq!(
        refreshed.client_access_token.as_deref(),
        Some("sso-access-token")
    );

    // Still exactly one session row for the (realm, region) pair.
    let stored = store
        .find_authorization(realm.id, REGION)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, auth.id);
}

#[tokio::test]
async fn expired_token_repolls_with_existing_device_grant() {
    let (store, _dir) = common::temp_store().await;
    let (_realm, mut auth) = common::seed_realm_with_session(&store).await;

    auth.client_access_token_expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
    store.upsert_authorization(&auth).await.unwrap();

    // Pause after all DB writes so the poll loop's sleeps advance on the
    // virtual clock without racing the pool's acquire timeout.
    tokio::time::pause();
    let gateway = MockGateway::new();
    let prompt = RecordingPrompt::new();
    let authorizer = SessionAuthorizer::new(&store, &gateway, &prompt);

    let refreshed = authorizer.authorize(params(1, 60)).await.unwrap();

    // Device grant is still valid, so no new browser round trip.
    assert_eq!(gateway.device_calls.load(Ordering::SeqCst), 0);
    assert_eq!(gateway.token_calls.load(Ordering::SeqCst), 1);
    assert!(prompt.opened.lock().unwrap().is_empty());
    assert!(!refreshed.is_access_token_expired());
}
