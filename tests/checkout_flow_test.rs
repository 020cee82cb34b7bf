//! Integration tests for the checkout flow: cart submission through
//! payment session creation to the persisted pending order.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use serde_json::json;

/// Decimals serialize as JSON strings; numbers appear for plain JSON
/// fixtures. Normalize both for comparison.
fn decimal_field(value: &serde_json::Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .expect("decimal field")
}

fn mug_cart() -> serde_json::Value {
    json!({
        "email": "a@b.com",
        "items": [
            { "name": "Mug", "unit_price": 499, "quantity": 2 }
        ]
    })
}

#[tokio::test]
async fn checkout_creates_session_and_pending_order() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(mug_cart()))
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["success"], json!(true));
    let session_id = body["data"]["session_id"].as_str().unwrap();
    let order_id = body["data"]["order_id"].as_str().unwrap();
    assert!(session_id.starts_with("cs_test_"));
    assert!(body["data"]["url"].as_str().unwrap().contains(session_id));

    // the persisted order is pending with the authoritative total
    let token = app.token("a", &[]);
    let response = app
        .request_with_token(
            Method::GET,
            &format!("/api/v1/orders/{order_id}"),
            None,
            &token,
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    let order = &body["data"];
    assert_eq!(order["customer_email"], json!("a@b.com"));
    // rust_decimal serializes as a JSON string
    assert_eq!(decimal_field(&order["total_amount"]), 998.0);
    assert_eq!(order["payment_status"], json!("pending"));
    assert_eq!(order["order_status"], json!("pending"));
    assert_eq!(order["external_session_id"], json!(session_id));
    assert_eq!(order["external_payment_ref"], json!(null));
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["items"][0]["quantity"], json!(2));
}

#[tokio::test]
async fn checkout_sends_processor_representation() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "email": "Shopper@Example.COM",
                "items": [
                    { "name": "Mug", "unit_price": 499.99, "quantity": 2, "description": "Blue" }
                ],
                "shipping_address": { "name": "S", "city": "Pune" }
            })),
        )
        .await;
    assert_eq!(response.status(), 200);

    let requests = app.gateway.recorded_requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    // email is lowercase-normalized before it reaches the processor
    assert_eq!(request.customer_email, "shopper@example.com");

    // minor units, rounded to the nearest integer
    assert_eq!(request.line_items[0].unit_amount, 49999);
    assert_eq!(request.line_items[0].quantity, 2);
    assert_eq!(request.line_items[0].currency, "inr");

    // redirect URLs: templated success, checkout-page cancel
    assert!(request.success_url.contains("{CHECKOUT_SESSION_ID}"));
    assert!(request.success_url.starts_with("http://localhost:3000/success"));
    assert!(request.cancel_url.ends_with("/checkout"));

    // metadata carries the fallback reconciliation context
    assert_eq!(request.metadata.get("email").unwrap(), "shopper@example.com");
    assert_eq!(request.metadata.get("item_count").unwrap(), "1");
    assert!(request.metadata.get("cart").unwrap().contains("Mug"));
}

#[tokio::test]
async fn checkout_rejects_invalid_email() {
    let app = TestApp::new().await;

    for email in ["not-an-email", "a@nodot", "has space@b.com", ""] {
        let response = app
            .request(
                Method::POST,
                "/api/v1/checkout",
                Some(json!({
                    "email": email,
                    "items": [{ "name": "Mug", "unit_price": 499, "quantity": 1 }]
                })),
            )
            .await;
        assert_eq!(response.status(), 400, "email {email:?} should be rejected");
    }

    assert!(app.gateway.recorded_requests().is_empty());
}

#[tokio::test]
async fn checkout_rejects_bad_carts() {
    let app = TestApp::new().await;

    let cases = vec![
        json!({ "email": "a@b.com", "items": [] }),
        json!({ "email": "a@b.com", "items": [{ "name": "", "unit_price": 1, "quantity": 1 }] }),
        json!({ "email": "a@b.com", "items": [{ "name": "Mug", "unit_price": -1, "quantity": 1 }] }),
        json!({ "email": "a@b.com", "items": [{ "name": "Mug", "unit_price": 1, "quantity": 0 }] }),
    ];

    for case in cases {
        let response = app
            .request(Method::POST, "/api/v1/checkout", Some(case.clone()))
            .await;
        assert_eq!(response.status(), 400, "cart {case} should be rejected");
    }

    // validation failures never reach the gateway
    assert!(app.gateway.recorded_requests().is_empty());
}

#[tokio::test]
async fn gateway_failure_persists_nothing() {
    let app = TestApp::new().await;
    app.gateway.fail_next_create(true);

    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(mug_cart()))
        .await;
    assert_eq!(response.status(), 502);

    // no order was written
    let token = app.token("a", &[]);
    let response = app
        .request_with_token(Method::GET, "/api/v1/orders?email=a@b.com", None, &token)
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn direct_order_creation_requires_token_and_valid_total() {
    let app = TestApp::new().await;

    let order = json!({
        "email": "b@c.com",
        "items": [{ "name": "Tee", "unit_price": 799, "quantity": 1 }],
        "total_amount": 799
    });

    // unauthenticated → 401
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(order.clone()))
        .await;
    assert_eq!(response.status(), 401);

    // authenticated → created
    let token = app.token("b", &[]);
    let response = app
        .request_with_token(Method::POST, "/api/v1/orders", Some(order), &token)
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["data"]["external_session_id"], json!(null));
    assert_eq!(body["data"]["payment_status"], json!("pending"));

    // claimed total outside the rounding tolerance → rejected
    let response = app
        .request_with_token(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "email": "b@c.com",
                "items": [{ "name": "Tee", "unit_price": 799, "quantity": 1 }],
                "total_amount": 1000
            })),
            &token,
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn order_reads_require_a_bearer_token() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/orders?email=a@b.com", None).await;
    assert_eq!(response.status(), 401);

    let response = app
        .request(
            Method::GET,
            "/api/v1/orders/00000000-0000-0000-0000-000000000000",
            None,
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn list_orders_is_newest_first() {
    let app = TestApp::new().await;

    for name in ["First", "Second"] {
        let response = app
            .request(
                Method::POST,
                "/api/v1/checkout",
                Some(json!({
                    "email": "sorted@b.com",
                    "items": [{ "name": name, "unit_price": 100, "quantity": 1 }]
                })),
            )
            .await;
        assert_eq!(response.status(), 200);
        // keep created_at strictly increasing
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let token = app.token("sorted", &[]);
    let response = app
        .request_with_token(
            Method::GET,
            "/api/v1/orders?email=sorted@b.com",
            None,
            &token,
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    let orders = body["data"].as_array().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["items"][0]["name"], json!("Second"));
    assert_eq!(orders[1]["items"][0]["name"], json!("First"));
}
