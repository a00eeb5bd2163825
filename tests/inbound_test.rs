use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use serde_json::json;

use bantec_transactions::clients::AccountsClient;
use bantec_transactions::config::{AllowedIps, Config};
use bantec_transactions::db::models::{OperationType, Transaction, TransactionStatus};
use bantec_transactions::error::AppError;
use bantec_transactions::services::InboundService;
use bantec_transactions::store::{InMemoryStore, TransactionStore};
use bantec_transactions::switch::SwitchClient;

fn test_config(switch_url: &str, accounts_url: &str) -> Config {
    Config {
        server_port: 0,
        database_url: "unused".to_string(),
        bank_code: "BANTEC".to_string(),
        currency: "USD".to_string(),
        switch_url: switch_url.to_string(),
        switch_api_key: "secret".to_string(),
        accounts_service_url: accounts_url.to_string(),
        poll_attempts: 2,
        poll_interval_ms: 5,
        allowed_webhook_ips: AllowedIps::Any,
    }
}

fn service(store: Arc<InMemoryStore>, switch_url: &str, accounts_url: &str) -> InboundService {
    let config = test_config(switch_url, accounts_url);
    InboundService::new(
        store,
        AccountsClient::new(accounts_url.to_string()),
        SwitchClient::new(switch_url.to_string(), "secret".to_string()),
        &config,
    )
}

fn credit_payload(instruction_id: &str, account: &str, amount: &str) -> serde_json::Value {
    json!({
        "header": {
            "messageId": "MSG-ARCBANK-1",
            "originatingBankId": "ARCBANK"
        },
        "body": {
            "instructionId": instruction_id,
            "amount": {"currency": "USD", "value": amount},
            "creditor": {"accountId": account}
        }
    })
}

#[tokio::test]
async fn inbound_credit_lands_on_the_account() {
    let mut accounts = mockito::Server::new_async().await;
    let _lookup = accounts
        .mock("GET", "/accounts/number/2205001")
        .with_status(200)
        .with_body(r#"{"id": 7, "accountNumber": "2205001", "clientId": 3, "accountType": "SAVINGS"}"#)
        .create_async()
        .await;
    let _get = accounts
        .mock("GET", "/accounts/7/balance")
        .with_status(200)
        .with_body(r#"{"balance": "100.00"}"#)
        .create_async()
        .await;
    let put = accounts
        .mock("PUT", "/accounts/7/balance")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"balance": "175.25"}"#.to_string(),
        ))
        .with_status(200)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let svc = service(Arc::clone(&store), "http://unused.invalid", &accounts.url());

    let ack = svc
        .process(&credit_payload("in-1", "2205001", "75.25"))
        .await
        .unwrap();
    assert_eq!(ack, "in-1");

    let record = store.find_by_reference("in-1").await.unwrap().unwrap();
    assert_eq!(record.operation_type, OperationType::InboundTransfer);
    assert_eq!(record.status, TransactionStatus::Completed);
    assert_eq!(record.dest_account_id, Some(7));
    assert_eq!(record.external_bank_id.as_deref(), Some("ARCBANK"));
    put.assert_async().await;
}

#[tokio::test]
async fn duplicate_delivery_acks_without_second_credit() {
    let mut accounts = mockito::Server::new_async().await;
    let _lookup = accounts
        .mock("GET", "/accounts/number/2205001")
        .with_status(200)
        .with_body(r#"{"id": 7, "accountNumber": "2205001", "clientId": null, "accountType": null}"#)
        .expect(2)
        .create_async()
        .await;
    let _get = accounts
        .mock("GET", "/accounts/7/balance")
        .with_status(200)
        .with_body(r#"{"balance": "100.00"}"#)
        .expect(1)
        .create_async()
        .await;
    let put = accounts
        .mock("PUT", "/accounts/7/balance")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let svc = service(Arc::clone(&store), "http://unused.invalid", &accounts.url());

    let payload = credit_payload("in-2", "2205001", "50.00");
    svc.process(&payload).await.unwrap();
    let second = svc.process(&payload).await.unwrap();
    assert_eq!(second, "in-2");

    put.assert_async().await;
}

#[tokio::test]
async fn redelivery_after_transient_failure_lands_the_credit() {
    let mut accounts = mockito::Server::new_async().await;
    let _lookup = accounts
        .mock("GET", "/accounts/number/2205001")
        .with_status(200)
        .with_body(r#"{"id": 7, "accountNumber": "2205001", "clientId": null, "accountType": null}"#)
        .expect(2)
        .create_async()
        .await;
    let broken_get = accounts
        .mock("GET", "/accounts/7/balance")
        .with_status(500)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let svc = service(Arc::clone(&store), "http://unused.invalid", &accounts.url());

    // First delivery: the accounts service is down, so nothing is credited
    // and the switch gets a NACK it will retry on.
    let payload = credit_payload("in-5", "2205001", "50.00");
    let err = svc.process(&payload).await.unwrap_err();
    assert!(matches!(err, AppError::Communication(_)));

    let record = store.find_by_reference("in-5").await.unwrap().unwrap();
    assert_eq!(record.status, TransactionStatus::Pending);

    // The accounts service recovers; the redelivery must credit under the
    // same record rather than acknowledge without moving money.
    let _good_get = accounts
        .mock("GET", "/accounts/7/balance")
        .with_status(200)
        .with_body(r#"{"balance": "100.00"}"#)
        .create_async()
        .await;
    let put = accounts
        .mock("PUT", "/accounts/7/balance")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"balance": "150.00"}"#.to_string(),
        ))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let ack = svc.process(&payload).await.unwrap();
    assert_eq!(ack, "in-5");

    let record = store.find_by_reference("in-5").await.unwrap().unwrap();
    assert_eq!(record.status, TransactionStatus::Completed);
    assert_eq!(
        record.resulting_balance_dest,
        Some(BigDecimal::from_str("150.00").unwrap())
    );
    broken_get.assert_async().await;
    put.assert_async().await;
}

#[tokio::test]
async fn unknown_account_bounces_the_transfer_back() {
    let mut accounts = mockito::Server::new_async().await;
    let _lookup = accounts
        .mock("GET", "/accounts/number/9999999")
        .with_status(404)
        .create_async()
        .await;

    let mut switch = mockito::Server::new_async().await;
    let refund = switch
        .mock("POST", "/api/v2/transfers/refunds")
        .match_header("apikey", "secret")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"body": {"originalInstructionId": "in-3", "returnReason": "AC03"}}"#.to_string(),
        ))
        .with_status(200)
        .with_body(r#"{"success": true}"#)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let svc = service(Arc::clone(&store), &switch.url(), &accounts.url());

    let err = svc
        .process(&credit_payload("in-3", "9999999", "20.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let record = store.find_by_reference("in-3").await.unwrap().unwrap();
    assert_eq!(record.status, TransactionStatus::Failed);
    refund.assert_async().await;
}

#[tokio::test]
async fn refund_of_outbound_transfer_credits_the_source() {
    let mut accounts = mockito::Server::new_async().await;
    let _get = accounts
        .mock("GET", "/accounts/1/balance")
        .with_status(200)
        .with_body(r#"{"balance": "400.00"}"#)
        .create_async()
        .await;
    let put = accounts
        .mock("PUT", "/accounts/1/balance")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"balance": "500.00"}"#.to_string(),
        ))
        .with_status(200)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let svc = service(Arc::clone(&store), "http://unused.invalid", &accounts.url());

    let mut original = Transaction::pending(
        "out-9".to_string(),
        OperationType::OutboundTransfer,
        BigDecimal::from_str("100.00").unwrap(),
        "WEB".to_string(),
    );
    original.source_account_id = Some(1);
    store.insert(&original).await.unwrap();
    store
        .record_outcome(original.id, TransactionStatus::Completed, None, None, None)
        .await
        .unwrap();

    let payload = json!({
        "body": {
            "returnInstructionId": "ret-9",
            "originalInstructionId": "out-9",
            "returnReason": "AC03"
        }
    });
    let ack = svc.process(&payload).await.unwrap();
    assert_eq!(ack, "ret-9");

    let reversed = store.get(original.id).await.unwrap().unwrap();
    assert_eq!(reversed.status, TransactionStatus::Refunded);

    let refund_record = store.find_by_reference("ret-9").await.unwrap().unwrap();
    assert_eq!(refund_record.operation_type, OperationType::InboundRefund);
    assert_eq!(refund_record.status, TransactionStatus::Completed);
    put.assert_async().await;
}

#[tokio::test]
async fn competing_refunds_for_one_original_move_money_once() {
    let mut accounts = mockito::Server::new_async().await;
    let _get = accounts
        .mock("GET", "/accounts/1/balance")
        .with_status(200)
        .with_body(r#"{"balance": "400.00"}"#)
        .create_async()
        .await;
    let put = accounts
        .mock("PUT", "/accounts/1/balance")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let svc = service(Arc::clone(&store), "http://unused.invalid", &accounts.url());

    let mut original = Transaction::pending(
        "out-13".to_string(),
        OperationType::OutboundTransfer,
        BigDecimal::from_str("100.00").unwrap(),
        "WEB".to_string(),
    );
    original.source_account_id = Some(1);
    store.insert(&original).await.unwrap();
    store
        .record_outcome(original.id, TransactionStatus::Completed, None, None, None)
        .await
        .unwrap();

    // Two returns against the same original under different return ids.
    // Whoever claims the original credits the source; the other must not
    // touch any balance.
    let first = json!({
        "returnInstructionId": "ret-13a",
        "originalInstructionId": "out-13"
    });
    let second = json!({
        "returnInstructionId": "ret-13b",
        "originalInstructionId": "out-13"
    });

    let (a, b) = tokio::join!(svc.process(&first), svc.process(&second));
    a.unwrap();
    b.unwrap();

    let reversed = store.get(original.id).await.unwrap().unwrap();
    assert_eq!(reversed.status, TransactionStatus::Refunded);

    let mut completed = 0;
    for reference in ["ret-13a", "ret-13b"] {
        if let Some(record) = store.find_by_reference(reference).await.unwrap() {
            if record.status == TransactionStatus::Completed {
                completed += 1;
            }
        }
    }
    assert_eq!(completed, 1);
    put.assert_async().await;
}

#[tokio::test]
async fn clawback_of_inbound_transfer_debits_the_destination() {
    let mut accounts = mockito::Server::new_async().await;
    let _get = accounts
        .mock("GET", "/accounts/7/balance")
        .with_status(200)
        .with_body(r#"{"balance": "175.25"}"#)
        .create_async()
        .await;
    let put = accounts
        .mock("PUT", "/accounts/7/balance")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"balance": "100.25"}"#.to_string(),
        ))
        .with_status(200)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let svc = service(Arc::clone(&store), "http://unused.invalid", &accounts.url());

    let mut original = Transaction::pending(
        "in-10".to_string(),
        OperationType::InboundTransfer,
        BigDecimal::from_str("75.00").unwrap(),
        "SWITCH".to_string(),
    );
    original.dest_account_id = Some(7);
    store.insert(&original).await.unwrap();
    store
        .record_outcome(original.id, TransactionStatus::Completed, None, None, None)
        .await
        .unwrap();

    let payload = json!({
        "originalInstructionId": "in-10",
        "returnReason": "FRAUD"
    });
    let ack = svc.process(&payload).await.unwrap();
    assert_eq!(ack, "RET-in-10");

    let reversed = store.get(original.id).await.unwrap().unwrap();
    assert_eq!(reversed.status, TransactionStatus::Reversed);

    let clawback = store.find_by_reference("RET-in-10").await.unwrap().unwrap();
    assert_eq!(clawback.operation_type, OperationType::OutboundRefundDebit);
    assert_eq!(clawback.status, TransactionStatus::Completed);
    put.assert_async().await;
}

#[tokio::test]
async fn clawback_without_funds_is_a_distinct_rejection() {
    let mut accounts = mockito::Server::new_async().await;
    let _get = accounts
        .mock("GET", "/accounts/7/balance")
        .with_status(200)
        .with_body(r#"{"balance": "10.00"}"#)
        .create_async()
        .await;
    let put = accounts
        .mock("PUT", "/accounts/7/balance")
        .expect(0)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let svc = service(Arc::clone(&store), "http://unused.invalid", &accounts.url());

    let mut original = Transaction::pending(
        "in-11".to_string(),
        OperationType::InboundTransfer,
        BigDecimal::from_str("75.00").unwrap(),
        "SWITCH".to_string(),
    );
    original.dest_account_id = Some(7);
    store.insert(&original).await.unwrap();
    store
        .record_outcome(original.id, TransactionStatus::Completed, None, None, None)
        .await
        .unwrap();

    let payload = json!({
        "originalInstructionId": "in-11",
        "returnReason": "FRAUD"
    });
    let err = svc.process(&payload).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { .. }));

    // The original credit stands; only the clawback record is FAILED.
    let original_after = store.get(original.id).await.unwrap().unwrap();
    assert_eq!(original_after.status, TransactionStatus::Completed);

    let clawback = store.find_by_reference("RET-in-11").await.unwrap().unwrap();
    assert_eq!(clawback.status, TransactionStatus::Failed);
    // The ledger keeps the ISO reason for the unhonored return.
    assert!(clawback
        .description
        .as_deref()
        .unwrap_or_default()
        .contains("AM04"));
    put.assert_async().await;
}

#[tokio::test]
async fn refund_for_unknown_original_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let svc = service(
        Arc::clone(&store),
        "http://unused.invalid",
        "http://unused.invalid",
    );

    let payload = json!({
        "originalInstructionId": "never-seen"
    });
    let err = svc.process(&payload).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn refund_of_already_reversed_transfer_is_a_no_op() {
    let store = Arc::new(InMemoryStore::new());
    let svc = service(
        Arc::clone(&store),
        "http://unused.invalid",
        "http://unused.invalid",
    );

    let mut original = Transaction::pending(
        "out-12".to_string(),
        OperationType::OutboundTransfer,
        BigDecimal::from(40),
        "WEB".to_string(),
    );
    original.source_account_id = Some(1);
    store.insert(&original).await.unwrap();
    store
        .record_outcome(original.id, TransactionStatus::Completed, None, None, None)
        .await
        .unwrap();
    store
        .claim_reversal(original.id, TransactionStatus::Refunded)
        .await
        .unwrap();

    let payload = json!({
        "returnInstructionId": "ret-12",
        "originalInstructionId": "out-12"
    });
    let ack = svc.process(&payload).await.unwrap();
    assert_eq!(ack, "ret-12");
    assert!(store.find_by_reference("ret-12").await.unwrap().is_none());
}
