//! Wire-level tests: real HTTP between farmers and a scripted renter.

use {
    axum::response::IntoResponse,
    farmer::{
        PROTOCOL_VERSION, api,
        engine::{Engine, EngineConfig},
        outbound::HttpTransport,
        status,
    },
    farmer_crypto::{Signer, ripemd160, ripemd160_sha256, sha256},
    message::{Contact, Inbound, OfferResponse, OfferResult, Request, parse_request},
    serde_json::{Value, json},
    std::{net::SocketAddr, sync::Arc, time::Duration},
    store::Store,
    tokio::sync::oneshot,
};

const SECRET_A: &str = "18e14a7b6a307f426a94f8114701e7c8e774e7f9a47e2c2035db29a206321725";
const SECRET_B: &str = "2b7e151628aed2a6abf7158809cf4f3c762e7160f38b4da56a784d9045190cfe";

struct FarmerNode {
    engine: Engine,
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
    _dir: tempfile::TempDir,
}

async fn start_farmer(secret: &str) -> FarmerNode {
    let dir = tempfile::tempdir().unwrap();
    let shards_dir = dir.path().join("shards");
    std::fs::create_dir(&shards_dir).unwrap();
    let store = Store::open(dir.path().join("contract.db")).unwrap();
    let signer = Signer::from_secret_hex(secret).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let contact = Contact {
        address: "127.0.0.1".to_string(),
        port: addr.port(),
        node_id: signer.node_id(),
        protocol: PROTOCOL_VERSION.to_string(),
    };
    let (status_handle, emitter) = status::channel(Box::new(status::LogSink));
    tokio::spawn(emitter.run());

    let engine = Engine::new(
        EngineConfig {
            contact,
            shards_dir,
            payout_address: "0x5d14313c94f1b26d23f4ce3a49a2e136a88a584b".to_string(),
            retrieve_requires_shard: false,
        },
        signer,
        store,
        Arc::new(HttpTransport::new().unwrap()),
        status_handle,
    );
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(api::serve_on(listener, engine.clone(), shutdown_rx));
    FarmerNode {
        engine,
        addr,
        _shutdown: shutdown_tx,
        _dir: dir,
    }
}

/// A scripted renter that accepts every OFFER by echoing the contract back.
async fn start_renter() -> (SocketAddr, oneshot::Sender<()>) {
    async fn control(body: axum::body::Bytes) -> axum::response::Response {
        let response = match parse_request(&body) {
            Inbound::Request(Request::Offer(envelope)) => serde_json::to_value(OfferResponse {
                result: OfferResult {
                    contract: envelope.params.contract,
                    ..Default::default()
                },
                id: envelope.id,
            })
            .unwrap(),
            _ => json!({"result": {}, "id": ""}),
        };
        axum::Json(response).into_response()
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().route("/", axum::routing::post(control));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .ok();
    });
    (addr, shutdown_tx)
}

async fn rpc(addr: SocketAddr, body: Value) -> Value {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/"))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    serde_json::from_slice(&response.bytes().await.unwrap()).unwrap()
}

/// Keeps issuing the request until the farmer stops answering with an error;
/// used where a background step (offer round-trip, mirror download) has to
/// land first.
async fn rpc_until_ok(addr: SocketAddr, body: Value) -> Value {
    for _ in 0..200 {
        let response = rpc(addr, body.clone()).await;
        if response.get("error").is_none() {
            return response;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("request never succeeded: {body}");
}

fn contract_json(data_hash: &str, data_size: usize) -> Value {
    json!({
        "renter_id": "adc8d381d40eb0bd33f4f199f5658c5b92d23db4",
        "renter_signature": "c2lnbmF0dXJl",
        "data_size": data_size,
        "data_hash": data_hash,
        "store_begin": 1_700_000_000_000i64,
        "store_end": 1_700_086_400_000i64,
        "audit_count": 4,
    })
}

fn renter_contact(addr: SocketAddr) -> Value {
    json!({
        "address": "127.0.0.1",
        "port": addr.port(),
        "nodeID": "337472da3068fa05d415262baf4df5bada8aefdc",
        "protocol": "1.2.0",
    })
}

/// Audit-tree leaves for a shard and one known challenge at `position`.
fn audit_setup(shard: &[u8], challenge_hex: &str, position: usize) -> (Vec<String>, [u8; 20]) {
    let mut payload = hex::decode(challenge_hex).unwrap();
    payload.extend_from_slice(shard);
    let leaf_hash = ripemd160(&sha256(&payload));
    let lookup = hex::encode(ripemd160_sha256(&leaf_hash));

    let mut trees: Vec<String> = (0..4)
        .map(|index: u32| hex::encode(ripemd160_sha256(&index.to_be_bytes())))
        .collect();
    trees[position] = lookup;
    (trees, leaf_hash)
}

#[tokio::test]
async fn liveness_and_ping_over_the_wire() {
    let node = start_farmer(SECRET_A).await;

    let hello = reqwest::get(format!("http://{}/", node.addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(hello, "Hello!");

    let pong = rpc(
        node.addr,
        json!({"method": "PING", "params": {"contact": {}}, "id": "e2e-ping"}),
    )
    .await;
    assert_eq!(pong["id"], "e2e-ping");
    assert_eq!(
        pong["result"]["contact"]["nodeID"],
        node.engine.contact().node_id
    );
    assert!(!pong["result"]["signature"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn full_storage_lifecycle() {
    let node = start_farmer(SECRET_A).await;
    let (renter_addr, _renter) = start_renter().await;

    let shard = b"complete end to end shard payload".to_vec();
    let data_hash = hex::encode(ripemd160_sha256(&shard));
    let (trees, leaf_hash) = audit_setup(&shard, "deadbeef", 0);

    // PUBLISH: the farmer offers to the renter in the background
    let published = rpc(
        node.addr,
        json!({
            "method": "PUBLISH",
            "params": {
                "uuid": "e2e-uuid-1",
                "contents": contract_json(&data_hash, shard.len()),
                "contact": renter_contact(renter_addr),
            },
            "id": "p1",
        }),
    )
    .await;
    assert!(published.get("error").is_none(), "{published}");

    // CONSIGN succeeds once the offer round-trip has stored the contract
    let consigned = rpc_until_ok(
        node.addr,
        json!({
            "method": "CONSIGN",
            "params": {"data_hash": data_hash, "audit_tree": trees},
            "id": "c1",
        }),
    )
    .await;
    let upload_token = consigned["result"]["token"].as_str().unwrap().to_string();

    // upload through the token-gated channel
    let client = reqwest::Client::new();
    let upload = client
        .post(format!(
            "http://{}/shards/{data_hash}?token={upload_token}",
            node.addr
        ))
        .body(shard.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(upload.status(), reqwest::StatusCode::CREATED);

    // the token authorized exactly one transfer
    let replay = client
        .post(format!(
            "http://{}/shards/{data_hash}?token={upload_token}",
            node.addr
        ))
        .body(shard.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), reqwest::StatusCode::BAD_REQUEST);

    // AUDIT: the proof carries the leaf pre-image for the challenged position
    let audited = rpc(
        node.addr,
        json!({
            "method": "AUDIT",
            "params": {"audits": [{"data_hash": data_hash, "challenge": "deadbeef"}]},
            "id": "a1",
        }),
    )
    .await;
    assert!(audited.get("error").is_none(), "{audited}");
    let proofs = &audited["result"]["proofs"];
    assert_eq!(proofs.as_array().unwrap().len(), 1);
    assert_eq!(proofs[0].as_array().unwrap().len(), 2);
    assert!(
        proofs.to_string().contains(&hex::encode(leaf_hash)),
        "{proofs}"
    );

    // RETRIEVE issues a download token
    let retrieved = rpc(
        node.addr,
        json!({"method": "RETRIEVE", "params": {"data_hash": data_hash}, "id": "r1"}),
    )
    .await;
    let download_token = retrieved["result"]["token"].as_str().unwrap();
    let downloaded = client
        .get(format!(
            "http://{}/shards/{data_hash}?token={download_token}",
            node.addr
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(downloaded.status(), reqwest::StatusCode::OK);
    assert_eq!(downloaded.bytes().await.unwrap(), shard);
}

#[tokio::test]
async fn mirror_replicates_between_farmers() {
    let source = start_farmer(SECRET_A).await;
    let replica = start_farmer(SECRET_B).await;
    let (renter_addr, _renter) = start_renter().await;

    let shard = b"shard that travels between farmers".to_vec();
    let data_hash = hex::encode(ripemd160_sha256(&shard));
    let (trees, _leaf_hash) = audit_setup(&shard, "beefdead", 1);

    // both farmers accept the contract through the publish/offer dance
    for node in [&source, &replica] {
        let published = rpc(
            node.addr,
            json!({
                "method": "PUBLISH",
                "params": {
                    "uuid": format!("e2e-mirror-{}", node.addr.port()),
                    "contents": contract_json(&data_hash, shard.len()),
                    "contact": renter_contact(renter_addr),
                },
                "id": "p1",
            }),
        )
        .await;
        assert!(published.get("error").is_none(), "{published}");
    }

    // seed the source farmer with the shard
    let consigned = rpc_until_ok(
        source.addr,
        json!({
            "method": "CONSIGN",
            "params": {"data_hash": data_hash, "audit_tree": trees.clone()},
            "id": "c1",
        }),
    )
    .await;
    let upload_token = consigned["result"]["token"].as_str().unwrap();
    let upload = reqwest::Client::new()
        .post(format!(
            "http://{}/shards/{data_hash}?token={upload_token}",
            source.addr
        ))
        .body(shard.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(upload.status(), reqwest::StatusCode::CREATED);

    // a download token on the source lets the replica mirror the shard
    let retrieved = rpc(
        source.addr,
        json!({"method": "RETRIEVE", "params": {"data_hash": data_hash}, "id": "r1"}),
    )
    .await;
    let mirror_token = retrieved["result"]["token"].as_str().unwrap();

    let mirrored = rpc_until_ok(
        replica.addr,
        json!({
            "method": "MIRROR",
            "params": {
                "data_hash": data_hash,
                "token": mirror_token,
                "farmer": {
                    "address": "127.0.0.1",
                    "port": source.addr.port(),
                    "nodeID": source.engine.contact().node_id,
                    "protocol": PROTOCOL_VERSION,
                },
                "audit_tree": trees,
            },
            "id": "m1",
        }),
    )
    .await;
    assert!(mirrored.get("error").is_none());

    // the replica can answer audits once the background transfer lands
    let audited = rpc_until_ok(
        replica.addr,
        json!({
            "method": "AUDIT",
            "params": {"audits": [{"data_hash": data_hash, "challenge": "beefdead"}]},
            "id": "a1",
        }),
    )
    .await;
    assert_eq!(audited["result"]["proofs"].as_array().unwrap().len(), 1);
}
