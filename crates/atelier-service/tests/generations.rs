//! Image generation integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;

use atelier_core::{GenerationStatus, TransactionKind};
use atelier_store::{GenerationStore, LedgerStore};

async fn kinds(harness: &TestHarness) -> Vec<TransactionKind> {
    let mut kinds: Vec<_> = harness
        .store
        .list_transactions(&harness.test_account_id, 100, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|tx| tx.kind)
        .collect();
    kinds.reverse();
    kinds
}

async fn balance(harness: &TestHarness) -> i64 {
    harness
        .store
        .get_account(&harness.test_account_id)
        .await
        .unwrap()
        .unwrap()
        .balance
}

// ============================================================================
// Submit
// ============================================================================

#[tokio::test]
async fn successful_generation_charges_once() {
    let harness = TestHarness::new().await;
    harness.create_account().await;
    harness.provider_succeeds().await;

    let response = harness
        .server
        .post("/v1/generations")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "cat" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert!(body["image_ref"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    assert!(body.get("error").is_none());

    assert_eq!(balance(&harness).await, 5);
    assert_eq!(
        kinds(&harness).await,
        vec![TransactionKind::Deposit, TransactionKind::Generate]
    );

    let generation_id = body["generation_id"].as_str().unwrap().parse().unwrap();
    let record = harness
        .store
        .get_generation(&generation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, GenerationStatus::Completed);
}

#[tokio::test]
async fn provider_failure_is_refunded() {
    let harness = TestHarness::new().await;
    harness.create_account().await;
    harness.provider_fails("NSFW").await;

    let response = harness
        .server
        .post("/v1/generations")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "cat" }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "NSFW");
    assert!(body["generation_id"].is_string());

    assert_eq!(balance(&harness).await, 10);
    assert_eq!(
        kinds(&harness).await,
        vec![
            TransactionKind::Deposit,
            TransactionKind::Generate,
            TransactionKind::Refund
        ]
    );

    let record = harness
        .server
        .get(&format!(
            "/v1/generations/{}",
            body["generation_id"].as_str().unwrap()
        ))
        .add_header("authorization", harness.user_auth_header())
        .await;
    let record: serde_json::Value = record.json();
    assert_eq!(record["status"], "FAILED");
    assert_eq!(record["error_message"], "NSFW");
}

#[tokio::test]
async fn polling_timeout_is_refunded() {
    let harness = TestHarness::new().await;
    harness.create_account().await;
    harness.provider_hangs().await;

    let response = harness
        .server
        .post("/v1/generations")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "cat" }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(
        body["error"],
        format!("generation timed out after {} attempts", common::MAX_ATTEMPTS)
    );
    assert_eq!(balance(&harness).await, 10);
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let harness = TestHarness::new().await;
    harness.create_account().await;

    let response = harness
        .server
        .post("/v1/generations")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "   " }))
        .await;

    response.assert_status_bad_request();
    assert_eq!(kinds(&harness).await, vec![TransactionKind::Deposit]);
}

#[tokio::test]
async fn insufficient_balance_is_payment_required() {
    let harness = TestHarness::new().await;
    harness.create_account().await;
    harness.provider_succeeds().await;

    for _ in 0..2 {
        harness
            .server
            .post("/v1/generations")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({ "prompt": "cat" }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .post("/v1/generations")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "cat" }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_balance");
    assert_eq!(body["error"]["details"]["balance"], 0);
    assert_eq!(body["error"]["details"]["required"], 5);

    let records = harness
        .store
        .list_generations(&harness.test_account_id, 10, 0)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn generation_without_account_fails() {
    let harness = TestHarness::new().await;

    harness
        .server
        .post("/v1/generations")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "cat" }))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn generation_without_auth_fails() {
    let harness = TestHarness::new().await;

    harness
        .server
        .post("/v1/generations")
        .json(&json!({ "prompt": "cat" }))
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Read
// ============================================================================

#[tokio::test]
async fn list_generations_newest_first() {
    let harness = TestHarness::new().await;
    harness.create_account().await;
    harness.provider_succeeds().await;

    for prompt in ["first", "second"] {
        harness
            .server
            .post("/v1/generations")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({ "prompt": prompt, "negative_prompt": "blurry" }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get("/v1/generations")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let generations = body["generations"].as_array().unwrap();
    assert_eq!(generations.len(), 2);
    assert_eq!(generations[0]["prompt"], "second");
    assert_eq!(generations[1]["prompt"], "first");
    assert_eq!(generations[0]["status"], "COMPLETED");
    assert_eq!(generations[0]["negative_prompt"], "blurry");
    assert_eq!(generations[0]["cost"], 5);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn other_users_generation_is_not_found() {
    let harness = TestHarness::new().await;
    harness.create_account().await;
    harness.provider_succeeds().await;

    let response = harness
        .server
        .post("/v1/generations")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "cat" }))
        .await;
    let body: serde_json::Value = response.json();
    let uri = format!(
        "/v1/generations/{}",
        body["generation_id"].as_str().unwrap()
    );

    harness
        .server
        .get(&uri)
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_ok();

    harness
        .server
        .get(&uri)
        .add_header("authorization", TestHarness::other_user_auth_header())
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn malformed_generation_id_is_not_found() {
    let harness = TestHarness::new().await;
    harness.create_account().await;

    harness
        .server
        .get("/v1/generations/not-a-uuid")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_not_found();
}
