//! End-to-end coverage through [`rig::Client`], gated behind the
//! `testing` feature so these never need a live host.

#![cfg(feature = "testing")]

use std::io::Cursor;
use std::time::Duration;

use rig::client::Client;
use rig::fs::{upload, OpenMode, RemoteFs};
use rig::runner::Runner;
use rig::transport::mock::{MockTransport, ScriptedResponse};
use rig::transport::Transport;
use std::sync::Arc;

async fn connected_mock(windows: bool) -> Arc<MockTransport> {
    let t = Arc::new(MockTransport::new(windows));
    t.connect(Duration::from_secs(1)).await.unwrap();
    t
}

#[tokio::test]
async fn idempotent_connect_does_not_error_on_repeat() {
    let t: Arc<MockTransport> = Arc::new(MockTransport::new(false));
    t.connect(Duration::from_secs(1)).await.unwrap();
    assert!(t.is_connected());
    t.connect(Duration::from_secs(1)).await.unwrap();
    assert!(t.is_connected());
}

#[tokio::test]
async fn checksum_upload_succeeds_when_hashes_match() {
    let t = connected_mock(false).await;
    t.on(
        "bash -s -- sha256 /tmp/dst",
        ScriptedResponse::ok(
            br#"{"error":"","sum":"f6891913dd72fc4a26ed2a5a19089cdc223623c2c4de4532394074ff295f5736"}"#
                .to_vec(),
        ),
    );
    let runner = Arc::new(Runner::new(t));
    let fs = rig::fs::PosixFs::new(runner);

    let mut src = Cursor::new(b"integration-test-payload".to_vec());
    upload(&fs, &mut src, 25, "/tmp/dst").await.unwrap();
}

#[tokio::test]
async fn checksum_upload_fails_on_mismatch() {
    let t = connected_mock(false).await;
    t.on(
        "bash -s -- sha256 /tmp/dst",
        ScriptedResponse::ok(br#"{"error":"","sum":"0000000000000000000000000000000000000000000000000000000000000000"}"#.to_vec()),
    );
    let runner = Arc::new(Runner::new(t));
    let fs = rig::fs::PosixFs::new(runner);

    let mut src = Cursor::new(b"integration-test-payload".to_vec());
    let err = upload(&fs, &mut src, 25, "/tmp/dst").await.unwrap_err();
    assert!(matches!(err, rig::Error::UploadFailed(_)));
}

#[tokio::test]
async fn open_file_respects_truncate_mode() {
    let t = connected_mock(false).await;
    let runner = Arc::new(Runner::new(t.clone()));
    let fs = rig::fs::PosixFs::new(runner);
    fs.open_file("/tmp/new", OpenMode::CREATE_WRITE_TRUNCATE, 0o644)
        .await
        .unwrap();
    assert!(t.calls().contains(&"bash -s -- create_empty /tmp/new 644".to_string()));
}

#[tokio::test]
async fn sudo_clone_shares_the_parent_transport() {
    let t = connected_mock(false).await;
    t.on("sudo -n true", ScriptedResponse::ok(Vec::new()));
    let runner = Arc::new(Runner::new(t));
    let client = Client::from_runner_for_tests(runner, "web1".into());

    let elevated = client.sudo().await.unwrap();
    assert!(elevated.runner().transport().is_connected());

    client.disconnect().await.unwrap();
    assert!(!elevated.runner().transport().is_connected());
}

#[tokio::test]
async fn package_manager_detection_routes_through_the_client() {
    let t = connected_mock(false).await;
    t.on("sh -c 'command -v apt-get'", ScriptedResponse::failure(1, Vec::new()));
    t.on("sh -c 'command -v apk'", ScriptedResponse::ok(b"/sbin/apk\n".to_vec()));
    let runner = Arc::new(Runner::new(t.clone()));
    let client = Client::from_runner_for_tests(runner, "web1".into());

    let pm = client.try_package_manager().await.unwrap();
    pm.install(client.runner(), &["nginx"]).await.unwrap();
    assert!(t.calls().iter().any(|c| c.contains("apk add nginx")));
}

#[tokio::test]
async fn init_system_detection_routes_through_the_client() {
    let t = connected_mock(false).await;
    t.on("stat /run/systemd/system", ScriptedResponse::ok(Vec::new()));
    let runner = Arc::new(Runner::new(t));
    let client = Client::from_runner_for_tests(runner, "web1".into());

    let service = client.service("nginx").await.unwrap();
    assert_eq!(service.backend_label(), "systemd");
}
