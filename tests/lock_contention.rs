// Multi-process lock contention tests via the plinth binary.
use std::process::{Command, Stdio};
use std::time::Instant;

use plinth::api::FileLockService;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_plinth");
    Command::new(exe)
}

#[test]
fn in_process_holder_times_out_other_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let target = temp.path().join("shared-repo");
    std::fs::create_dir(&target).expect("target dir");

    let service = FileLockService::new();
    let mut holder = service.get_locker(&target).expect("locker");
    holder.lock().expect("hold");

    let contender = cmd()
        .args([
            "lock",
            target.to_str().unwrap(),
            "--timeout-ms",
            "200",
        ])
        .stdout(Stdio::null())
        .output()
        .expect("contender");
    assert!(!contender.status.success());
    // LockTimeout maps to exit code 6.
    assert_eq!(contender.status.code(), Some(6));

    holder.release().expect("release");

    let retry = cmd()
        .args(["lock", target.to_str().unwrap(), "--timeout-ms", "2000"])
        .output()
        .expect("retry");
    assert!(retry.status.success(), "{retry:?}");
}

#[test]
fn concurrent_holders_are_serialized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let target = temp.path().join("artifact.bin");
    std::fs::write(&target, b"shared").expect("target");

    let workers = 4;
    let hold_ms = 100u64;
    let started = Instant::now();

    let mut children = Vec::new();
    for _ in 0..workers {
        let child = cmd()
            .args([
                "lock",
                target.to_str().unwrap(),
                "--timeout-ms",
                "30000",
                "--hold-ms",
                &hold_ms.to_string(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }

    for mut child in children {
        let status = child.wait().expect("wait");
        assert!(status.success());
    }

    // Holds are mutually exclusive, so wall time is at least the sum of the
    // hold windows.
    let elapsed = started.elapsed().as_millis() as u64;
    assert!(
        elapsed >= workers * hold_ms,
        "elapsed {elapsed} ms is shorter than {} serialized holds",
        workers
    );

    // The marker outlives every release.
    let marker = temp
        .path()
        .canonicalize()
        .expect("canonical")
        .join("artifact.bin.plinthlock");
    assert!(marker.exists());
}
