//! Wire-level tests: JSON strings in, JSON strings out.

use ember_core::script::Script;
use ember_miner::{BlockAssembler, MinerConfig, WorkEngine};
use ember_pool::{PoolConfig, TransactionPool};
use ember_test_chain::{spend, FlagFailVerifier, MockChain};
use ember_traits::ChainProvider;
use jsonrpc_core::IoHandler;
use serde_json::Value;
use std::sync::Arc;

struct Harness {
    chain: Arc<MockChain>,
    pool: Arc<TransactionPool<MockChain>>,
    io: IoHandler,
}

fn setup() -> Harness {
    let chain = Arc::new(MockChain::new());
    let pool = Arc::new(TransactionPool::new(
        PoolConfig::default(),
        Arc::clone(&chain),
        Arc::new(FlagFailVerifier::accept_all()),
    ));
    let assembler = BlockAssembler::new(
        MinerConfig::default(),
        Arc::clone(&chain),
        Arc::clone(&pool),
    );
    let (controller, _handle) = assembler.start(Some("RpcAssembler"));
    let engine = Arc::new(WorkEngine::new(
        Arc::clone(&chain),
        Arc::clone(&pool),
        controller.clone(),
    ));

    let io = ember_rpc::ServiceBuilder::new()
        .enable_chain(Arc::clone(&chain))
        .enable_pool(Arc::clone(&pool))
        .enable_miner(Arc::clone(&chain), Arc::clone(&pool), controller, engine)
        .build();

    Harness { chain, pool, io }
}

fn call(io: &IoHandler, method: &str, params: &str) -> Value {
    let request = format!(
        r#"{{"jsonrpc":"2.0","id":1,"method":"{method}","params":{params}}}"#
    );
    let response = io.handle_request_sync(&request).expect("a response");
    serde_json::from_str(&response).unwrap()
}

fn result(io: &IoHandler, method: &str, params: &str) -> Value {
    let response = call(io, method, params);
    assert!(
        response.get("error").is_none(),
        "unexpected error: {response}"
    );
    response["result"].clone()
}

#[test]
fn chain_queries() {
    let harness = setup();
    let count = result(&harness.io, "getblockcount", "[]");
    assert_eq!(count, Value::from(harness.chain.tip_height()));

    let best = result(&harness.io, "getbestblockhash", "[]");
    assert_eq!(best, Value::from(harness.chain.tip_hash().to_rev_hex()));

    let response = call(&harness.io, "getblockhash", "[999999]");
    assert_eq!(response["error"]["code"], Value::from(-8));
}

#[test]
fn send_and_inspect_mempool() {
    let harness = setup();
    let point = harness.chain.fund(100_000, Script::p2pkh(&[1u8; 20]));
    let tx = spend(&[point], 90_000, 1);
    let hex = hex::encode(tx.transaction.encode(true));

    let txid = result(
        &harness.io,
        "sendrawtransaction",
        &format!(r#"["{hex}"]"#),
    );
    assert_eq!(txid, Value::from(tx.txid().to_rev_hex()));

    let info = result(&harness.io, "getmempoolinfo", "[]");
    assert_eq!(info["size"], Value::from(1));

    let ids = result(&harness.io, "getrawmempool", "[]");
    assert_eq!(ids[0], Value::from(tx.txid().to_rev_hex()));

    let entry = result(
        &harness.io,
        "getmempoolentry",
        &format!(r#"["{}"]"#, tx.txid().to_rev_hex()),
    );
    assert_eq!(entry["vsize"], Value::from(tx.vsize()));
    assert_eq!(entry["wtxid"], Value::from(tx.wtxid().to_rev_hex()));

    // A double spend maps onto the verify-rejected code.
    let conflict = spend(&[point], 80_000, 2);
    let conflict_hex = hex::encode(conflict.transaction.encode(true));
    let response = call(
        &harness.io,
        "sendrawtransaction",
        &format!(r#"["{conflict_hex}"]"#),
    );
    assert_eq!(response["error"]["code"], Value::from(-26));
}

#[test]
fn undecodable_tx_is_deserialization_error() {
    let harness = setup();
    let response = call(&harness.io, "sendrawtransaction", r#"["deadbeef"]"#);
    assert_eq!(response["error"]["code"], Value::from(-22));
}

#[test]
fn unknown_method_is_not_found() {
    let harness = setup();
    let response = call(&harness.io, "bogusmethod", "[]");
    assert_eq!(response["error"]["code"], Value::from(-32601));
}

#[test]
fn batch_requests_answer_in_order() {
    let harness = setup();
    let request = r#"[
        {"jsonrpc":"2.0","id":1,"method":"getblockcount","params":[]},
        {"jsonrpc":"2.0","id":2,"method":"bogus","params":[]},
        {"jsonrpc":"2.0","id":3,"method":"getbestblockhash","params":[]}
    ]"#;
    let response = harness.io.handle_request_sync(request).unwrap();
    let parsed: Vec<Value> = serde_json::from_str(&response).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0]["id"], Value::from(1));
    assert!(parsed[0].get("error").is_none());
    // The failing element does not abort the batch.
    assert_eq!(parsed[1]["error"]["code"], Value::from(-32601));
    assert_eq!(parsed[2]["id"], Value::from(3));
}

#[test]
fn block_template_shape() {
    let harness = setup();
    let point = harness.chain.fund(100_000, Script::p2pkh(&[1u8; 20]));
    let tx = spend(&[point], 90_000, 1);
    harness.pool.add_tx(tx.clone(), 1).unwrap();

    let template = result(&harness.io, "getblocktemplate", "[]");
    assert_eq!(
        template["previousblockhash"],
        Value::from(harness.chain.tip_hash().to_rev_hex())
    );
    assert_eq!(
        template["height"],
        Value::from(harness.chain.tip_height() + 1)
    );
    assert!(template.get("coinbasevalue").is_some());
    // coinbasetxn is never offered.
    assert!(template.get("coinbasetxn").is_none());
    assert_eq!(template["transactions"][0]["txid"], tx.txid().to_rev_hex());
    assert_eq!(template["transactions"][0]["depends"], Value::Array(vec![]));
    assert_eq!(template["longpollid"].as_str().unwrap().len(), 74);
    assert!(template["default_witness_commitment"].is_string());
    assert_eq!(template["noncerange"], Value::from("00000000ffffffff"));
}

#[test]
fn getwork_returns_padded_data() {
    let harness = setup();
    let work = result(&harness.io, "getwork", "[]");
    assert_eq!(work["data"].as_str().unwrap().len(), 256);
    assert_eq!(work["target"].as_str().unwrap().len(), 64);

    // Garbage data comes back as a plain false.
    let submitted = result(&harness.io, "getwork", &format!(r#"["{}"]"#, "00".repeat(128)));
    assert_eq!(submitted, Value::Bool(false));
}

#[test]
fn mining_info_reports_pool() {
    let harness = setup();
    let point = harness.chain.fund(100_000, Script::p2pkh(&[1u8; 20]));
    let tx = spend(&[point], 90_000, 1);
    harness.pool.add_tx(tx, 1).unwrap();

    let info = result(&harness.io, "getmininginfo", "[]");
    assert_eq!(info["pooledtx"], Value::from(1));
    assert_eq!(info["blocks"], Value::from(harness.chain.tip_height()));
}
