//! End-to-end coverage against a real subprocess — the compiled
//! `transrepl-mockpeer` binary — exercising the scenarios spec.md §8 names
//! explicitly. Mirrors `conformance/tests-runner`'s spawn-and-drive-over-
//! stdio integration style rather than mocking the transport in-process.

mod common;

use std::sync::Arc;

use transrepl::exports::{AsyncExport, BoxFuture, SyncExport};
use transrepl::{
    Bond, BondError, Encoding, ExceptionData, ExportError, HostException, RemoteException,
    SerializationException, Side, Value,
};

#[tokio::test]
async fn basic_value_eval() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    let result = bond.eval("40 + 2").await.unwrap();
    assert_eq!(result, Value::Int(42));
    bond.close().await;
}

#[tokio::test]
async fn eval_block_assignment_then_lookup() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    bond.eval_block("x = 10").await.unwrap();
    let result = bond.eval("x").await.unwrap();
    assert_eq!(result, Value::Int(10));
    bond.close().await;
}

#[tokio::test]
async fn export_and_call_in() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    bond.export(
        "answer",
        Arc::new(SyncExport(|_args: Vec<Value>| Ok(Value::Int(42)))),
    )
    .await
    .unwrap();
    bond.eval_block("def ask() = answer()").await.unwrap();

    let result = bond.call("ask", vec![]).await.unwrap();
    assert_eq!(result, Value::Int(42));

    let depth = bond.eval("repl_depth()").await.unwrap();
    assert_eq!(depth, Value::Int(1));
    bond.close().await;
}

/// `remote_g` is a host export whose handler calls back into a
/// peer-defined function while still serving the peer's own call-in —
/// the re-entrant alternation spec.md §4.4 centers its depth invariant on.
fn remote_g(bond: &Bond, args: Vec<Value>) -> BoxFuture<'_, Result<Value, HostException>> {
    Box::pin(async move {
        let a = args[0].as_int().expect("remote_g takes one int arg");
        let f_result = bond
            .call("f", vec![Value::Int(a - 1)])
            .await
            .map_err(|e| HostException(e.to_string()))?;
        let fv = f_result.as_int().expect("f returns an int");
        Ok(Value::Int(fv + 1))
    })
}

#[tokio::test]
async fn recursive_inception() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    bond.export("remote_g", Arc::new(AsyncExport(remote_g)))
        .await
        .unwrap();
    bond.eval_block("def f(n) = n; def driver() = remote_g(5)")
        .await
        .unwrap();

    let result = bond.call("driver", vec![]).await.unwrap();
    assert_eq!(result, Value::Int(5));

    let depth = bond.eval("repl_depth()").await.unwrap();
    assert_eq!(depth, Value::Int(1));
    bond.close().await;
}

#[tokio::test]
async fn remote_exception_is_structured_when_transparent() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    let err = bond.eval("raise(\"boom\")").await.unwrap_err();
    match err {
        BondError::Remote(RemoteException {
            data: ExceptionData::Structured(Value::Str(msg)),
            ..
        }) => assert_eq!(msg, "boom"),
        other => panic!("expected a structured remote exception, got {other:?}"),
    }
    bond.close().await;
}

#[tokio::test]
async fn remote_exception_is_a_plain_message_when_opaque() {
    let bond = common::spawn_mock(false, Encoding::Postcard).await;
    let err = bond.eval("raise(\"boom\")").await.unwrap_err();
    match err {
        BondError::Remote(RemoteException {
            data: ExceptionData::Message(msg),
            ..
        }) => assert_eq!(msg, "boom"),
        other => panic!("expected an opaque remote exception, got {other:?}"),
    }
    bond.close().await;
}

#[tokio::test]
async fn unserializable_return_is_a_remote_serialization_exception() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    let err = bond.eval("UNSERIALIZABLE").await.unwrap_err();
    match err {
        BondError::Serialization(SerializationException {
            side: Side::Remote, ..
        }) => {}
        other => panic!("expected a remote serialization exception, got {other:?}"),
    }
    bond.close().await;
}

#[tokio::test]
async fn large_payload_roundtrips() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    let big = "x".repeat(64 * 1024);
    let src = format!("\"{big}\"");
    let result = bond.eval(&src).await.unwrap();
    assert_eq!(result, Value::Str(big));
    bond.close().await;
}

#[tokio::test]
async fn sentinel_is_opaque_to_export_registration() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    let err = bond
        .export(
            "SENTINEL",
            Arc::new(SyncExport(|_args: Vec<Value>| Ok(Value::Null))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::InvalidName(_)));
    bond.close().await;
}

#[tokio::test]
async fn json_encoding_also_round_trips() {
    let bond = common::spawn_mock(true, Encoding::Json).await;
    let result = bond.eval("\"hi\"").await.unwrap();
    assert_eq!(result, Value::Str("hi".to_string()));
    bond.close().await;
}

#[tokio::test]
async fn closed_bond_rejects_further_requests() {
    let bond = common::spawn_mock(true, Encoding::Postcard).await;
    bond.close().await;
    let err = bond.eval("1").await.unwrap_err();
    assert!(matches!(err, BondError::Terminated(_)));
}
