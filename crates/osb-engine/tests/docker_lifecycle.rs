//! End-to-end engine tests against a live container runtime.
//!
//! These are ignored by default; run them with `cargo test -- --ignored` on a
//! host with a local Docker daemon and `alpine:latest` already pulled.

use std::time::Duration;

use osb_engine::{
    types::{CreateSandbox, ExecCommand},
    Engine, EngineConfig, EngineError, Runtime,
};
use osb_store::Store;

async fn engine() -> Engine {
    let store = Store::open_in_memory().await.expect("store");
    let runtime = Runtime::connect().expect("runtime");
    Engine::new(
        store,
        runtime,
        EngineConfig {
            base_domain: Some("localhost".to_string()),
            proxy_port: Some(3000),
        },
    )
}

fn alpine_request() -> CreateSandbox {
    CreateSandbox {
        image: "alpine:latest".to_string(),
        name: None,
        ports: Vec::new(),
        port: None,
        env: Default::default(),
        timeout: Some(120),
        memory: None,
        cpus: None,
    }
}

#[tokio::test]
#[ignore]
async fn create_exec_wait_and_remove() {
    let engine = engine().await;
    let created = engine.create_sandbox(alpine_request()).await.expect("create");
    assert!(created.name.contains('-'));
    assert_eq!(
        created.url.as_deref(),
        Some(format!("http://{}.localhost:3000", created.name).as_str())
    );

    let detail = engine
        .exec_command(
            &created.id,
            ExecCommand {
                command: "echo".to_string(),
                args: vec!["hello".to_string()],
                cwd: None,
                env: Default::default(),
            },
        )
        .await
        .expect("exec");
    assert!(detail.exit_code.is_none());

    let finished = engine
        .wait_command(&created.id, &detail.id)
        .await
        .expect("wait");
    assert_eq!(finished.exit_code, Some(0));

    let logs = engine
        .command_logs(&created.id, &detail.id)
        .await
        .expect("logs");
    assert!(logs.stdout.contains("hello"));

    engine.remove_sandbox(&created.id).await.expect("remove");
    assert!(matches!(
        engine.inspect_sandbox(&created.id).await,
        Err(EngineError::NotFound)
    ));
    // Idempotent removal.
    engine.remove_sandbox(&created.id).await.expect("second remove");
}

#[tokio::test]
#[ignore]
async fn stop_twice_yields_conflict() {
    let engine = engine().await;
    let created = engine.create_sandbox(alpine_request()).await.expect("create");

    engine.stop_sandbox(&created.id).await.expect("stop");
    assert!(matches!(
        engine.stop_sandbox(&created.id).await,
        Err(EngineError::AlreadyStopped)
    ));

    engine.remove_sandbox(&created.id).await.expect("remove");
}

#[tokio::test]
#[ignore]
async fn kill_terminates_long_running_command() {
    let engine = engine().await;
    let created = engine.create_sandbox(alpine_request()).await.expect("create");

    let detail = engine
        .exec_command(
            &created.id,
            ExecCommand {
                command: "sleep".to_string(),
                args: vec!["3600".to_string()],
                cwd: None,
                env: Default::default(),
            },
        )
        .await
        .expect("exec");

    tokio::time::sleep(Duration::from_millis(200)).await;
    engine
        .kill_command(&created.id, &detail.id, 15)
        .await
        .expect("kill");

    let finished = engine
        .wait_command(&created.id, &detail.id)
        .await
        .expect("wait");
    assert_ne!(finished.exit_code, Some(0));

    engine.remove_sandbox(&created.id).await.expect("remove");
}

#[tokio::test]
#[ignore]
async fn file_round_trip() {
    let engine = engine().await;
    let created = engine.create_sandbox(alpine_request()).await.expect("create");

    engine
        .write_file(&created.id, "/tmp/nested/dir/hello.txt", "payload")
        .await
        .expect("write");
    let read = engine
        .read_file(&created.id, "/tmp/nested/dir/hello.txt")
        .await
        .expect("read");
    assert_eq!(read.content, "payload");

    let listing = engine
        .list_dir(&created.id, "/tmp/nested/dir")
        .await
        .expect("list");
    assert!(listing.output.contains("hello.txt"));

    engine
        .delete_path(&created.id, "/tmp/nested")
        .await
        .expect("delete");
    assert!(engine
        .read_file(&created.id, "/tmp/nested/dir/hello.txt")
        .await
        .is_err());

    engine.remove_sandbox(&created.id).await.expect("remove");
}
