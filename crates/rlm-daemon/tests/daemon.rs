//! Black-box tests against the built `rlm-daemon` binary.
//!
//! Mirrors the teacher's `crates/rskim/tests/cli*.rs` convention of driving
//! the real binary with `assert_cmd` rather than calling library code
//! directly. Unlike `skim`, the daemon never exits on its own, so the
//! TCP-serving test spawns it, waits for `.rlm/port` to appear (the same
//! discovery mechanism a real client would use), talks to it over a real
//! socket, then kills the child.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::Child;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn cli_version_reports_the_crate_version() {
    Command::cargo_bin("rlm-daemon")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rlm-daemon"));
}

#[test]
fn cli_rejects_a_root_that_does_not_exist() {
    Command::cargo_bin("rlm-daemon")
        .unwrap()
        .arg("--root")
        .arg("/no/such/project/root")
        .arg("--port")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a directory"));
}

struct DaemonGuard(Child);

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Poll `root/.rlm/port` until it appears, returning the port the daemon
/// bound to. The daemon writes this file only once its listener is live.
fn wait_for_port_file(root: &std::path::Path) -> u16 {
    let path = root.join(".rlm").join("port");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&contents) {
                if let Some(port) = value.get("port").and_then(serde_json::Value::as_u64) {
                    return port as u16;
                }
            }
        }
        if Instant::now() >= deadline {
            panic!("daemon never wrote {}", path.display());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn request(port: u16, body: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to daemon");
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(body.as_bytes()).unwrap();
    stream.shutdown(std::net::Shutdown::Write).unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

#[test]
fn daemon_serves_status_and_squeeze_over_a_real_socket() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join(".rlm")).unwrap();
    fs::write(
        dir.path().join("main.py"),
        "class Greeter:\n    def hello(self):\n        return \"hi\"\n",
    )
    .unwrap();

    let child = Command::cargo_bin("rlm-daemon")
        .unwrap()
        .arg("--root")
        .arg(dir.path())
        .arg("--port")
        .arg("19877")
        .arg("--idle-timeout")
        .arg("0")
        .arg("--log-level")
        .arg("error")
        .spawn()
        .expect("spawn rlm-daemon");
    let _guard = DaemonGuard(child);

    let port = wait_for_port_file(dir.path());

    let status = request(port, r#"{"action":"status"}"#);
    let status: serde_json::Value = serde_json::from_str(&status).expect("status response is JSON");
    assert_eq!(status["status"], "alive");
    assert!(status["languages"].as_array().unwrap().contains(&serde_json::json!("python")));

    let squeeze = request(port, r#"{"action":"squeeze","path":"main.py"}"#);
    let squeeze: serde_json::Value = serde_json::from_str(&squeeze).expect("squeeze response is JSON");
    assert!(squeeze["skeleton"].as_str().unwrap().contains("class Greeter:"));
}
