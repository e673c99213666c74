#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::{extract::State, routing::post, Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lilygate::access::{AccessCondition, DecryptionNetwork, HttpNetwork, LocalNetwork};
use lilygate::chain::identity::{normalize_address, recover_address};
use lilygate::chain::{ChainError, ChainInfo, ChainRpc, EphemeralIdentityProvider, FreshnessAnchor};
use lilygate::config::Settings;
use lilygate::modules::api;
use lilygate::modules::upstream::RetryingFetcher;
use lilygate::orchestrator::RequestOrchestrator;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const TEST_PK: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

#[derive(Default)]
pub struct MockChain {
    pub connects: AtomicUsize,
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn connect(&self) -> Result<ChainInfo, ChainError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ChainInfo {
            chain_id: 11_155_111,
        })
    }

    async fn latest_anchor(&self) -> Result<FreshnessAnchor, ChainError> {
        Ok(FreshnessAnchor::new(format!("0x{}", "ab".repeat(32))))
    }
}

/// Upstream job service stub recording every request body.
pub struct Upstream {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
    pub bodies: Arc<Mutex<Vec<Value>>>,
}

pub async fn spawn_upstream(status: u16, response: Value) -> Upstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let (h, b) = (hits.clone(), bodies.clone());
    let app = Router::new().route(
        "/",
        post(move |Json(body): Json<Value>| {
            let (h, b, response) = (h.clone(), b.clone(), response.clone());
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                b.lock().unwrap().push(body);
                (
                    axum::http::StatusCode::from_u16(status).unwrap(),
                    Json(response),
                )
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Upstream {
        url: format!("http://{}/", addr),
        hits,
        bodies,
    }
}

/// An address nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/", addr)
}

pub fn settings(job_endpoint: &str, extra: &[(&str, &str)]) -> Settings {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("JOB_ENDPOINT".into(), job_endpoint.into());
    vars.insert("PK".into(), TEST_PK.into());
    vars.insert("ALCHEMY_API_KEY".into(), "test-key".into());
    vars.insert("FETCH_BACKOFF_MS".into(), "1".into());
    for (k, v) in extra {
        if v.is_empty() {
            vars.remove(*k);
        } else {
            vars.insert(k.to_string(), v.to_string());
        }
    }
    Settings::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

pub struct Harness {
    pub base_url: String,
    pub network: Arc<LocalNetwork>,
    pub chain: Arc<MockChain>,
}

pub async fn spawn_app(settings: Settings, condition: AccessCondition) -> Harness {
    let network = Arc::new(LocalNetwork::new("cayenne"));
    let chain = Arc::new(MockChain::default());
    let base_url = serve_app(settings, condition, network.clone(), chain.clone()).await;
    Harness {
        base_url,
        network,
        chain,
    }
}

/// App wired to a remote gateway over HTTP instead of the in-process network.
pub async fn spawn_gateway_app(
    settings: Settings,
    condition: AccessCondition,
    gateway_url: &str,
) -> String {
    let network = Arc::new(HttpNetwork::new(gateway_url, "cayenne"));
    serve_app(settings, condition, network, Arc::new(MockChain::default())).await
}

async fn serve_app(
    settings: Settings,
    condition: AccessCondition,
    network: Arc<dyn DecryptionNetwork>,
    chain: Arc<MockChain>,
) -> String {
    let settings = Arc::new(settings);
    let orchestrator = Arc::new(RequestOrchestrator::new(
        settings.clone(),
        Arc::new(condition),
        RetryingFetcher::new(settings.retry_policy()),
        network,
        EphemeralIdentityProvider::new(chain),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, api::router(orchestrator)).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Decryption gateway stub speaking the `/web/*` JSON protocol.
///
/// Ciphertext is the base64 plaintext. Decrypt checks the auth signature and
/// answers with the not-authorized error code when `deny` is set.
#[derive(Default)]
pub struct GatewayState {
    pub deny: AtomicBool,
    pub handshakes: AtomicUsize,
    pub encrypts: AtomicUsize,
    pub decrypts: AtomicUsize,
    pub closes: AtomicUsize,
    pub signers: Mutex<Vec<String>>,
}

pub struct Gateway {
    pub url: String,
    pub state: Arc<GatewayState>,
}

pub async fn spawn_gateway() -> Gateway {
    let state = Arc::new(GatewayState::default());
    let app = Router::new()
        .route("/web/handshake", post(gateway_handshake))
        .route("/web/latest_blockhash", post(gateway_blockhash))
        .route("/web/encrypt", post(gateway_encrypt))
        .route("/web/decrypt", post(gateway_decrypt))
        .route("/web/session/close", post(gateway_close))
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Gateway {
        url: format!("http://{}", addr),
        state,
    }
}

async fn gateway_handshake(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let n = state.handshakes.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "sessionId": format!("gw-{}", n), "networkName": body["network"] }))
}

async fn gateway_blockhash(Json(_body): Json<Value>) -> Json<Value> {
    Json(json!({ "blockhash": format!("0x{}", "cd".repeat(32)) }))
}

async fn gateway_encrypt(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.encrypts.fetch_add(1, Ordering::SeqCst);
    let condition: AccessCondition =
        serde_json::from_value(body["accessControlConditions"].clone()).unwrap();
    let data = body["dataToEncrypt"].as_str().unwrap().to_string();
    let plaintext = STANDARD.decode(&data).unwrap();
    Json(json!({
        "ciphertext": data,
        "conditionHash": condition.condition_hash(),
        "dataToEncryptHash": hex::encode(Sha256::digest(&plaintext)),
    }))
}

async fn gateway_decrypt(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.decrypts.fetch_add(1, Ordering::SeqCst);
    let auth_sig = &body["authSig"];
    let recovered = recover_address(
        auth_sig["signedMessage"].as_str().unwrap(),
        auth_sig["sig"].as_str().unwrap(),
    )
    .unwrap();
    let claimed = normalize_address(auth_sig["address"].as_str().unwrap()).unwrap();
    assert_eq!(normalize_address(&recovered).unwrap(), claimed);
    state.signers.lock().unwrap().push(claimed);

    if state.deny.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "errorCode": "NodeAccessControlConditionsReturnedNotAuthorized",
                "message": "balanceOf returned 0",
            })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "decryptedData": body["ciphertext"] })),
    )
}

async fn gateway_close(State(state): State<Arc<GatewayState>>, Json(_body): Json<Value>) -> StatusCode {
    state.closes.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

pub async fn post_prompt(base_url: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{}/api", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let json = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, json)
}
