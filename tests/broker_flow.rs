//! End-to-end behaviour of the broker: permission checks, consent, dispatch

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_test::{assert_pending, assert_ready};

use common::{harness, harness_with, RecordingSurface, PUBKEY};
use keyward::auth::{GrantCondition, PermissionLevel};
use keyward::broker::{BrokerConfig, CapabilityRequest, ConsentDecision};
use keyward::crypto::{nip04, verify_event, Event, SecretKey};
use keyward::storage::{RelayMap, RelayPolicy};
use keyward::Response;

const ORIGIN: &str = "app.example";

fn request(operation: &str, params: Value) -> CapabilityRequest {
    CapabilityRequest::new(operation, params, ORIGIN)
}

fn insufficient(level: PermissionLevel) -> Option<String> {
    Some(format!("insufficient permissions, required {}", level))
}

#[tokio::test]
async fn test_standing_permission_skips_consent() {
    let h = harness(BrokerConfig::default()).await;
    h.broker
        .permissions()
        .upsert(ORIGIN, PermissionLevel::READ_PUBLIC_KEY, GrantCondition::Forever)
        .await
        .unwrap();

    let response = h.broker.handle_request(request("getPublicKey", json!({}))).await;

    assert_eq!(response, Response::success(PUBKEY));
    assert!(h.surface.opened().is_empty());
}

#[tokio::test]
async fn test_sign_event_fills_missing_fields() {
    let h = harness(BrokerConfig::default()).await;
    h.broker
        .permissions()
        .upsert(ORIGIN, PermissionLevel::SIGN_EVENT, GrantCondition::Forever)
        .await
        .unwrap();

    let response = h
        .broker
        .handle_request(request(
            "signEvent",
            json!({ "event": { "kind": 1, "content": "hi", "tags": [], "created_at": 1_700_000_000 } }),
        ))
        .await;

    let signed = response.into_value();
    assert_eq!(signed["pubkey"], PUBKEY);
    assert_eq!(signed["id"].as_str().unwrap().len(), 64);
    assert_eq!(signed["sig"].as_str().unwrap().len(), 128);

    let event = Event::from_value(signed).unwrap();
    assert!(verify_event(&event));
}

#[tokio::test]
async fn test_invalid_event_is_rejected_before_signing() {
    let h = harness(BrokerConfig::default()).await;
    h.broker
        .permissions()
        .upsert(ORIGIN, PermissionLevel::SIGN_EVENT, GrantCondition::Forever)
        .await
        .unwrap();

    for params in [
        json!({ "event": { "kind": 1, "tags": [], "created_at": 1 } }),
        json!({ "event": { "kind": -1, "content": "", "tags": [], "created_at": 1 } }),
        json!({}),
    ] {
        let response = h.broker.handle_request(request("signEvent", params)).await;
        assert_eq!(response.error_message(), Some("invalid event"));
    }
}

#[tokio::test]
async fn test_caller_chosen_id_is_refused() {
    let h = harness(BrokerConfig::default()).await;
    h.broker
        .permissions()
        .upsert(ORIGIN, PermissionLevel::SIGN_EVENT, GrantCondition::Forever)
        .await
        .unwrap();

    let response = h
        .broker
        .handle_request(request(
            "signEvent",
            json!({ "event": {
                "kind": 1,
                "content": "hi",
                "tags": [],
                "created_at": 1,
                "id": "11".repeat(32)
            } }),
        ))
        .await;

    assert_eq!(response.error_message(), Some("invalid event"));
    assert!(response.into_value().get("sig").is_none());
}

#[tokio::test]
async fn test_matching_id_is_signed() {
    let h = harness(BrokerConfig::default()).await;
    h.broker
        .permissions()
        .upsert(ORIGIN, PermissionLevel::SIGN_EVENT, GrantCondition::Forever)
        .await
        .unwrap();

    let mut event = Event::from_value(json!({
        "kind": 1,
        "content": "hi",
        "tags": [],
        "created_at": 1,
        "pubkey": PUBKEY
    }))
    .unwrap();
    let id = keyward::crypto::get_event_hash(&event).unwrap();
    event.id = Some(id.clone());

    let signed = h
        .broker
        .handle_request(request("signEvent", json!({ "event": event })))
        .await
        .into_value();

    assert_eq!(signed["id"], id);
    assert!(verify_event(&Event::from_value(signed).unwrap()));
}

#[tokio::test]
async fn test_missing_key() {
    let (surface, prompts) = RecordingSurface::new();
    let h = harness_with(surface, prompts, BrokerConfig::default(), false).await;
    h.broker
        .permissions()
        .upsert(ORIGIN, PermissionLevel::NIP04, GrantCondition::Forever)
        .await
        .unwrap();

    for operation in ["getPublicKey", "getRelays", "signEvent", "nip04.encrypt"] {
        let response = h.broker.handle_request(request(operation, json!({}))).await;
        assert_eq!(response.error_message(), Some("no private key found"));
    }
}

#[tokio::test]
async fn test_denial_never_touches_the_key() {
    let mut h = harness(BrokerConfig::default()).await;

    let broker = h.broker.clone();
    let task = tokio::spawn(async move {
        broker
            .handle_request(request("signEvent", json!({ "event": { "kind": 1 } })))
            .await
    });

    let prompt = h.prompts.recv().await.unwrap();
    assert_eq!(prompt.host, ORIGIN);
    assert_eq!(prompt.level, PermissionLevel::SIGN_EVENT);
    assert_eq!(prompt.params["event"]["kind"], 1);

    h.broker
        .handle_decision(ConsentDecision::new(prompt.id.clone(), GrantCondition::No))
        .await;

    let response = task.await.unwrap();
    assert_eq!(
        response.error_message().map(str::to_string),
        insufficient(PermissionLevel::SIGN_EVENT)
    );
    assert_eq!(h.store.key_reads(), 0);
    assert!(h.broker.permissions().get(ORIGIN).await.unwrap().is_none());
    assert_eq!(h.broker.pending_consents(), 0);
    assert_eq!(h.surface.closed().len(), 1);
}

#[tokio::test]
async fn test_forever_grant_is_persisted_and_reused() {
    let mut h = harness(BrokerConfig::default()).await;

    let broker = h.broker.clone();
    let task = tokio::spawn(async move {
        broker.handle_request(request("getRelays", json!({}))).await
    });

    let prompt = h.prompts.recv().await.unwrap();
    let mut decision = ConsentDecision::new(prompt.id.clone(), GrantCondition::Forever);
    decision.host = Some(ORIGIN.into());
    decision.level = Some(PermissionLevel::SIGN_EVENT);
    h.broker.handle_decision(decision).await;

    assert_eq!(task.await.unwrap(), Response::success(json!({})));

    let record = h.broker.permissions().get(ORIGIN).await.unwrap().unwrap();
    assert_eq!(record.level, PermissionLevel::SIGN_EVENT);
    assert_eq!(record.condition, GrantCondition::Forever);

    // anything at or below the granted level goes straight through
    let response = h.broker.handle_request(request("getPublicKey", json!({}))).await;
    assert_eq!(response, Response::success(PUBKEY));
    assert_eq!(h.surface.opened().len(), 1);
}

#[tokio::test]
async fn test_single_grant_is_not_remembered() {
    let mut h = harness(BrokerConfig::default()).await;

    for _ in 0..2 {
        let broker = h.broker.clone();
        let task = tokio::spawn(async move {
            broker.handle_request(request("getPublicKey", json!({}))).await
        });
        let prompt = h.prompts.recv().await.unwrap();
        h.broker
            .handle_decision(ConsentDecision::new(prompt.id, GrantCondition::Single))
            .await;
        assert_eq!(task.await.unwrap(), Response::success(PUBKEY));
    }

    assert!(h.broker.permissions().get(ORIGIN).await.unwrap().is_none());
    assert_eq!(h.surface.opened().len(), 2);
}

#[tokio::test]
async fn test_expired_grant_prompts_again() {
    let mut h = harness(BrokerConfig {
        expirable_ttl: Duration::ZERO,
        ..BrokerConfig::default()
    })
    .await;

    let broker = h.broker.clone();
    let task = tokio::spawn(async move {
        broker.handle_request(request("getPublicKey", json!({}))).await
    });
    let prompt = h.prompts.recv().await.unwrap();
    h.broker
        .handle_decision(ConsentDecision::new(prompt.id, GrantCondition::Expirable))
        .await;
    assert_eq!(task.await.unwrap(), Response::success(PUBKEY));

    let broker = h.broker.clone();
    let task = tokio::spawn(async move {
        broker.handle_request(request("getPublicKey", json!({}))).await
    });
    let prompt = h.prompts.recv().await.unwrap();
    h.broker
        .handle_decision(ConsentDecision::new(prompt.id, GrantCondition::No))
        .await;
    assert!(task.await.unwrap().is_error());
}

#[tokio::test]
async fn test_repeated_decision_is_a_no_op() {
    let mut h = harness(BrokerConfig::default()).await;

    let broker = h.broker.clone();
    let task = tokio::spawn(async move {
        broker.handle_request(request("getPublicKey", json!({}))).await
    });
    let prompt = h.prompts.recv().await.unwrap();

    h.broker
        .handle_decision(ConsentDecision::new(prompt.id.clone(), GrantCondition::No))
        .await;
    h.broker
        .handle_decision(ConsentDecision::new(prompt.id.clone(), GrantCondition::Forever))
        .await;

    assert!(task.await.unwrap().is_error());
    assert!(h.broker.permissions().get(ORIGIN).await.unwrap().is_none());
    assert_eq!(h.surface.closed().len(), 1);

    // never-issued ids are ignored as well
    h.broker
        .handle_decision(ConsentDecision::new("unknown", GrantCondition::Forever))
        .await;
    assert!(h.broker.permissions().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_request_suspends_until_decided() {
    let h = harness(BrokerConfig::default()).await;

    let mut pending =
        tokio_test::task::spawn(h.broker.handle_request(request("getPublicKey", json!({}))));
    assert_pending!(pending.poll());
    assert_eq!(h.broker.pending_consents(), 1);
    assert_eq!(h.store.key_reads(), 0);

    let prompt = h.surface.opened().remove(0);
    h.broker
        .handle_decision(ConsentDecision::new(prompt.id, GrantCondition::Single))
        .await;

    assert!(pending.is_woken());
    let response = assert_ready!(pending.poll());
    assert_eq!(response, Response::success(PUBKEY));
    assert_eq!(h.store.key_reads(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_resolve_independently() {
    let mut h = harness(BrokerConfig::default()).await;

    let first = {
        let broker = h.broker.clone();
        tokio::spawn(async move { broker.handle_request(request("getPublicKey", json!({}))).await })
    };
    let second = {
        let broker = h.broker.clone();
        tokio::spawn(async move { broker.handle_request(request("getRelays", json!({}))).await })
    };

    let a = h.prompts.recv().await.unwrap();
    let b = h.prompts.recv().await.unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(h.broker.pending_consents(), 2);

    let (get_pk, get_relays) = if a.level == PermissionLevel::READ_PUBLIC_KEY {
        (a, b)
    } else {
        (b, a)
    };

    h.broker
        .handle_decision(ConsentDecision::new(get_relays.id, GrantCondition::No))
        .await;
    h.broker
        .handle_decision(ConsentDecision::new(get_pk.id, GrantCondition::Single))
        .await;

    assert_eq!(first.await.unwrap(), Response::success(PUBKEY));
    assert!(second.await.unwrap().is_error());
    assert_eq!(h.broker.pending_consents(), 0);
}

#[tokio::test]
async fn test_surface_closed_counts_as_denial() {
    let mut h = harness(BrokerConfig::default()).await;

    let broker = h.broker.clone();
    let task = tokio::spawn(async move {
        broker.handle_request(request("nip04.decrypt", json!({}))).await
    });
    let prompt = h.prompts.recv().await.unwrap();
    h.broker.handle_decision(ConsentDecision::closed(prompt.id)).await;

    assert_eq!(
        task.await.unwrap().error_message().map(str::to_string),
        insufficient(PermissionLevel::NIP04)
    );
    assert_eq!(h.store.key_reads(), 0);
}

#[tokio::test]
async fn test_consent_timeout() {
    let h = harness(BrokerConfig {
        consent_timeout: Some(Duration::from_millis(50)),
        ..BrokerConfig::default()
    })
    .await;

    let response = h.broker.handle_request(request("getPublicKey", json!({}))).await;

    assert!(response.is_error());
    assert_eq!(h.broker.pending_consents(), 0);
    assert_eq!(h.surface.opened().len(), 1);
    assert_eq!(h.surface.closed().len(), 1);
}

#[tokio::test]
async fn test_dropped_request_cleans_up() {
    let mut h = harness(BrokerConfig::default()).await;

    let broker = h.broker.clone();
    let task = tokio::spawn(async move {
        broker.handle_request(request("signEvent", json!({}))).await
    });
    let prompt = h.prompts.recv().await.unwrap();
    assert_eq!(h.broker.pending_consents(), 1);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(h.broker.pending_consents(), 0);
    assert_eq!(h.surface.closed(), vec![keyward::broker::SurfaceHandle::new(format!(
        "window-{}",
        prompt.id
    ))]);

    // a late decision finds nothing to resolve
    h.broker
        .handle_decision(ConsentDecision::new(prompt.id, GrantCondition::Forever))
        .await;
    assert!(h.broker.permissions().get(ORIGIN).await.unwrap().is_none());
}

#[tokio::test]
async fn test_surface_failure_denies() {
    let (surface, prompts) = RecordingSurface::failing();
    let h = harness_with(surface, prompts, BrokerConfig::default(), true).await;

    let response = h.broker.handle_request(request("getPublicKey", json!({}))).await;

    assert_eq!(
        response.error_message().map(str::to_string),
        insufficient(PermissionLevel::READ_PUBLIC_KEY)
    );
    assert_eq!(h.broker.pending_consents(), 0);
    assert_eq!(h.store.key_reads(), 0);
}

#[tokio::test]
async fn test_unknown_operation_is_a_hard_denial() {
    let h = harness(BrokerConfig::default()).await;

    let response = h.broker.handle_request(request("nip44.encrypt", json!({}))).await;

    assert_eq!(response.error_message(), Some("unknown operation nip44.encrypt"));
    assert!(h.surface.opened().is_empty());
    assert_eq!(h.store.key_reads(), 0);
}

#[tokio::test]
async fn test_relays_and_nip04_round_trip() {
    let h = harness(BrokerConfig::default()).await;
    h.broker
        .permissions()
        .upsert(ORIGIN, PermissionLevel::NIP04, GrantCondition::Forever)
        .await
        .unwrap();

    let mut relays = RelayMap::new();
    relays.insert(
        "wss://relay.example".into(),
        RelayPolicy {
            read: true,
            write: false,
        },
    );
    h.broker.keys().set_relays(&relays).await.unwrap();

    let response = h.broker.handle_request(request("getRelays", json!({}))).await;
    assert_eq!(
        response,
        Response::success(json!({ "wss://relay.example": { "read": true, "write": false } }))
    );

    let peer = SecretKey::generate();
    let peer_pub = keyward::crypto::get_public_key(&peer).unwrap();

    let ciphertext = h
        .broker
        .handle_request(request(
            "nip04.encrypt",
            json!({ "peer": peer_pub, "plaintext": "meet at noon" }),
        ))
        .await
        .into_value();
    let ciphertext = ciphertext.as_str().unwrap().to_string();
    assert!(ciphertext.contains("?iv="));

    // the peer can read it with their own key
    assert_eq!(nip04::decrypt(&peer, PUBKEY, &ciphertext).unwrap(), "meet at noon");

    let reply = nip04::encrypt(&peer, PUBKEY, "see you").unwrap();
    let plaintext = h
        .broker
        .handle_request(request(
            "nip04.decrypt",
            json!({ "peer": peer_pub, "ciphertext": reply }),
        ))
        .await;
    assert_eq!(plaintext, Response::success("see you"));
}

#[tokio::test]
async fn test_operation_failures_carry_a_trace() {
    let h = harness(BrokerConfig::default()).await;
    h.broker
        .permissions()
        .upsert(ORIGIN, PermissionLevel::NIP04, GrantCondition::Forever)
        .await
        .unwrap();

    let response = h
        .broker
        .handle_request(request(
            "nip04.decrypt",
            json!({ "peer": PUBKEY, "ciphertext": "not a payload" }),
        ))
        .await;

    let body = response.into_value();
    let error = &body["error"];
    assert!(error["message"].is_string());
    assert!(error["stack"].as_str().unwrap().contains("nip04.decrypt"));
}

#[tokio::test]
async fn test_persisted_level_falls_back_to_requested() {
    let mut h = harness(BrokerConfig::default()).await;
    let broker = Arc::clone(&h.broker);
    let task = tokio::spawn(async move {
        broker.handle_request(request("signEvent", json!({}))).await
    });

    let prompt = h.prompts.recv().await.unwrap();
    h.broker
        .handle_decision(ConsentDecision::new(prompt.id, GrantCondition::Forever))
        .await;
    // granted, but the event itself is missing
    assert_eq!(task.await.unwrap().error_message(), Some("invalid event"));

    let record = h.broker.permissions().get(ORIGIN).await.unwrap().unwrap();
    assert_eq!(record.level, PermissionLevel::SIGN_EVENT);
}
