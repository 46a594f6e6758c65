//! JSON-RPC client for E2E tests.
//!
//! Spawns the nakadachi binary and talks to its query listener over
//! stdin/stdout with Content-Length framing. Peers are the
//! `nakadachi-echo` binary, registered with `--peer`.

// These methods are shared across multiple test binaries but not all tests use every method.
// Allow dead_code to suppress per-binary warnings.
#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

/// `--peer` value for an echo peer named `name` started with `args`.
pub fn echo_peer(name: &str, args: &[&str]) -> String {
    let mut spec = format!("{}={}", name, env!("CARGO_BIN_EXE_nakadachi-echo"));
    for arg in args {
        spec.push(' ');
        spec.push_str(arg);
    }
    spec
}

pub struct BridgeClient {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    request_id: i64,
    /// Responses read while waiting for a different id.
    stash: HashMap<i64, Value>,
}

impl BridgeClient {
    /// Spawn `nakadachi serve` with the given extra arguments.
    pub fn spawn(args: &[String]) -> Self {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_nakadachi"));
        cmd.args(args)
            .arg("serve")
            // Keep the user's config out of the test.
            .env("XDG_CONFIG_HOME", std::env::temp_dir().join("nakadachi-e2e-no-config"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().expect("Failed to spawn nakadachi binary");
        let stdin = child.stdin.take().expect("Failed to get stdin");
        let stdout = BufReader::new(child.stdout.take().expect("Failed to get stdout"));

        Self {
            child,
            stdin: Some(stdin),
            stdout,
            request_id: 0,
            stash: HashMap::new(),
        }
    }

    /// Send a request without waiting; returns its id.
    pub fn start_request(&mut self, method: &str, params: Value) -> i64 {
        self.request_id += 1;
        let id = self.request_id;
        self.send_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }));
        id
    }

    pub fn send_request(&mut self, method: &str, params: Value) -> Value {
        let id = self.start_request(method, params);
        self.receive_response_for_id(id)
    }

    /// Start a `bridge/query` and return its id.
    pub fn start_query(&mut self, target: &str, query: &str, request_id: &str) -> i64 {
        self.start_request(
            "bridge/query",
            json!({"target_agent": target, "query": query, "request_id": request_id}),
        )
    }

    /// Run a `bridge/query` and return its `result` (the BridgeResult).
    pub fn query(&mut self, target: &str, query: &str, request_id: &str) -> Value {
        let id = self.start_query(target, query, request_id);
        self.result_for(id)
    }

    pub fn result_for(&mut self, id: i64) -> Value {
        let response = self.receive_response_for_id(id);
        response
            .get("result")
            .cloned()
            .unwrap_or_else(|| panic!("expected result, got {}", response))
    }

    pub fn send_notification(&mut self, method: &str, params: Value) {
        self.send_message(&json!({"jsonrpc": "2.0", "method": method, "params": params}));
    }

    fn send_message(&mut self, message: &Value) {
        let body = serde_json::to_string(message).expect("Failed to serialize message");
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        let stdin = self.stdin.as_mut().expect("stdin already closed");
        stdin
            .write_all(header.as_bytes())
            .expect("Failed to write header");
        stdin
            .write_all(body.as_bytes())
            .expect("Failed to write body");
        stdin.flush().expect("Failed to flush stdin");
    }

    /// Receive the response for `expected_id`, stashing others.
    pub fn receive_response_for_id(&mut self, expected_id: i64) -> Value {
        const TIMEOUT: Duration = Duration::from_secs(30);
        let start_time = Instant::now();

        loop {
            if let Some(response) = self.stash.remove(&expected_id) {
                return response;
            }
            if start_time.elapsed() > TIMEOUT {
                panic!(
                    "Timeout waiting for response with id {}. Elapsed: {:?}",
                    expected_id,
                    start_time.elapsed()
                );
            }

            let message = self.receive_message();
            match message.get("id").and_then(Value::as_i64) {
                Some(id) => {
                    self.stash.insert(id, message);
                }
                None => panic!("unexpected message without numeric id: {}", message),
            }
        }
    }

    fn receive_message(&mut self) -> Value {
        let mut content_length: Option<usize> = None;
        loop {
            let mut header = String::new();
            let bytes_read = self
                .stdout
                .read_line(&mut header)
                .expect("Failed to read header line");
            if bytes_read == 0 {
                panic!("Bridge closed connection prematurely while reading header");
            }

            let line = header.trim_end();
            if line.is_empty() {
                if content_length.is_some() {
                    break;
                }
                continue;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = Some(value.trim().parse().expect("Invalid Content-Length value"));
            }
        }

        let mut body = vec![0u8; content_length.unwrap_or_default()];
        self.stdout.read_exact(&mut body).expect("Failed to read body");
        serde_json::from_slice(&body).expect("Failed to parse response")
    }

    /// Close stdin and wait for the process to exit.
    pub fn shutdown(mut self) -> std::process::ExitStatus {
        self.stdin.take();
        self.child.wait().expect("Failed to wait for nakadachi")
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
