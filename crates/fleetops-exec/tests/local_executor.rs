//! Drives `LocalExecutor` through the `RemoteExecutor` trait object the
//! deploy engine holds

use std::sync::Arc;
use std::time::Duration;

use fleetops_exec::transfer::shell_quote;
use fleetops_exec::{ExecError, LocalExecutor, RemoteExecutor, TransferOptions};

fn executor() -> Arc<dyn RemoteExecutor> {
    Arc::new(LocalExecutor::new())
}

#[tokio::test]
async fn test_env_file_lands_in_missing_directory() {
    let local = tempfile::tempdir().unwrap();
    let node = tempfile::tempdir().unwrap();
    std::fs::write(local.path().join(".env.production"), "DATABASE_URL=postgres://db").unwrap();

    let remote = node.path().join("app/config/.env");
    let exec = executor();
    exec.transfer(
        &local.path().join(".env.production"),
        remote.to_str().unwrap(),
        &TransferOptions::new(),
    )
    .await
    .unwrap();

    let content = std::fs::read_to_string(&remote).unwrap();
    assert_eq!(content, "DATABASE_URL=postgres://db");
}

#[tokio::test]
async fn test_stdin_script_with_quoted_path() {
    let node = tempfile::tempdir().unwrap();
    let target = node.path().join("deploy key");
    let quoted = shell_quote(target.to_str().unwrap());

    let exec = executor();
    let result = exec
        .run_with_input(&format!("cat > {quoted} && chmod 600 {quoted}"), b"-----KEY-----\n")
        .await
        .unwrap();
    assert!(result.success(), "{}", result.combined_output());
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "-----KEY-----\n");

    let check = exec.run(&format!("test -f {quoted}")).await.unwrap();
    assert!(check.success());
}

#[tokio::test]
async fn test_failed_command_is_not_an_error() {
    let exec = executor();
    let result = exec
        .run_with_timeout("echo broken >&2; exit 3", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result.status, 3);
    assert_eq!(result.stderr.trim(), "broken");
}

#[tokio::test]
async fn test_missing_source_is_transfer_error() {
    let node = tempfile::tempdir().unwrap();
    let exec = executor();
    let err = exec
        .transfer(
            &node.path().join("nope"),
            node.path().join("dest").to_str().unwrap(),
            &TransferOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::TransferFailed { .. }));
    assert!(exec.is_connected());
}

#[cfg(unix)]
#[tokio::test]
async fn test_working_tree_push_mirrors_source() {
    use std::os::unix::fs::PermissionsExt;

    let local = tempfile::tempdir().unwrap();
    let node = tempfile::tempdir().unwrap();
    let src = local.path();
    std::fs::create_dir_all(src.join("bin")).unwrap();
    std::fs::write(src.join("bin/start.sh"), "#!/bin/sh\n").unwrap();
    std::fs::set_permissions(src.join("bin/start.sh"), std::fs::Permissions::from_mode(0o755))
        .unwrap();
    std::fs::write(src.join("compose.yml"), "services: {}").unwrap();

    let remote = node.path().join("app");
    std::fs::create_dir_all(remote.join("old")).unwrap();
    std::fs::write(remote.join("old/stale.txt"), "gone").unwrap();
    std::fs::write(remote.join("removed.yml"), "gone").unwrap();
    std::fs::write(remote.join(".env"), "SECRET=1").unwrap();

    let exec = executor();
    exec.transfer(src, remote.to_str().unwrap(), &TransferOptions::working_tree())
        .await
        .unwrap();

    assert!(remote.join("compose.yml").exists());
    assert!(!remote.join("removed.yml").exists());
    assert!(!remote.join("old").exists());
    assert_eq!(std::fs::read_to_string(remote.join(".env")).unwrap(), "SECRET=1");
    let mode = std::fs::metadata(remote.join("bin/start.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}
