//! Integration tests for the `stagewise serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port,
//! makes HTTP requests, and verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use serde_json::{json, Value};

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so parallel test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Kills the server when a test ends, pass or fail.
struct Server {
    child: Child,
    port: u16,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Helper: start `stagewise serve` on a fresh port.
fn start_server() -> Server {
    let port = next_port();
    let dir = std::env::temp_dir();
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_stagewise"));
    cmd.current_dir(dir);
    cmd.arg("serve").arg("--port").arg(port.to_string());
    cmd.env_remove("STAGEWISE_PORT");
    cmd.env_remove("STAGEWISE_WEBHOOK_URL");
    cmd.env("RUST_LOG", "warn");
    // Redirect stdout/stderr to avoid blocking
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    let child = cmd.spawn().expect("failed to start stagewise serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server { child, port }
}

/// Helper: send one HTTP request and return (status, parsed JSON body).
fn request(port: u16, method: &str, path: &str, body: Option<&Value>) -> (u16, Value) {
    let payload = body.map(|b| b.to_string()).unwrap_or_default();
    request_raw(port, method, path, &payload)
}

/// Helper: send a request with a verbatim body.
fn request_raw(port: u16, method: &str, path: &str, payload: &str) -> (u16, Value) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        port,
        payload.len(),
        payload
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    parse_http_response(&response)
}

fn get(port: u16, path: &str) -> (u16, Value) {
    request(port, "GET", path, None)
}

fn post(port: u16, path: &str, body: Value) -> (u16, Value) {
    request(port, "POST", path, Some(&body))
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, Value) {
    let status = response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .unwrap_or("");
    let value = serde_json::from_str(body).unwrap_or(Value::Null);
    (status, value)
}

// ──────────────────────────────────────────────
// Catalog
// ──────────────────────────────────────────────

#[test]
fn health_reports_ok() {
    let server = start_server();
    let (status, body) = get(server.port, "/health");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[test]
fn workflows_and_stages() {
    let server = start_server();
    let (status, body) = get(server.port, "/workflows");
    assert_eq!(status, 200);
    assert_eq!(body["workflows"].as_array().unwrap().len(), 3);

    let (status, body) = get(server.port, "/workflows/sales-lead/stages");
    assert_eq!(status, 200);
    assert_eq!(body["stages"].as_array().unwrap().len(), 14);

    let (status, body) = get(server.port, "/workflows/renewals/stages");
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not-found");
}

#[test]
fn unknown_route_is_json_404() {
    let server = start_server();
    let (status, body) = get(server.port, "/nope");
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not found");
}

// ──────────────────────────────────────────────
// Lead workflow over HTTP
// ──────────────────────────────────────────────

#[test]
fn lead_walkthrough_with_upload_and_revert() {
    let server = start_server();
    let port = server.port;

    let (status, lead) = post(
        port,
        "/entities",
        json!({ "entity_id": "lead-1", "workflow": "sales-lead" }),
    );
    assert_eq!(status, 201);
    assert_eq!(lead["current_stage_id"], "new-lead");

    let (status, _) = post(
        port,
        "/entities",
        json!({ "entity_id": "lead-1", "workflow": "sales-lead" }),
    );
    assert_eq!(status, 409);

    for stage in ["new-lead", "intro-call", "discovery"] {
        let (status, _) = post(port, "/entities/lead-1/confirm", json!({ "stage": stage }));
        assert_eq!(status, 200, "confirm {}", stage);
    }

    // "demo bytes" in base64
    let (status, body) = post(
        port,
        "/entities/lead-1/artifacts",
        json!({
            "slot": "demo-recording",
            "file_name": "demo.mp4",
            "content_base64": "ZGVtbyBieXRlcw==",
        }),
    );
    assert_eq!(status, 200);
    assert_eq!(body["transition"]["outcome"], "advanced");
    assert_eq!(body["transition"]["entity"]["current_stage_id"], "readiness");
    assert_eq!(body["artifact"]["size_bytes"], 10);

    let (status, body) = request(port, "DELETE", "/entities/lead-1/artifacts/demo-recording", None);
    assert_eq!(status, 200);
    assert_eq!(body["outcome"], "reverted");
    assert_eq!(body["entity"]["current_stage_id"], "demo");

    let (status, progress) = get(port, "/entities/lead-1/progress");
    assert_eq!(status, 200);
    assert_eq!(progress["completed"], 3);
    assert_eq!(progress["total"], 14);
    assert_eq!(progress["percent"], 21);
}

#[test]
fn stale_advance_is_409_and_bad_body_is_400() {
    let server = start_server();
    let port = server.port;
    post(
        port,
        "/entities",
        json!({ "entity_id": "lead-2", "workflow": "sales-lead" }),
    );

    let (status, _) = post(port, "/entities/lead-2/advance", json!({ "from_stage": "new-lead" }));
    assert_eq!(status, 200);
    let (status, body) = post(port, "/entities/lead-2/advance", json!({ "from_stage": "new-lead" }));
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "conflict");

    let (status, _) = post(port, "/entities/lead-2/advance", json!({ "stage": "intro-call" }));
    assert_eq!(status, 400);

    let (status, body) = request_raw(port, "POST", "/entities/lead-2/advance", "{not json");
    assert_eq!(status, 400);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid request body"));

    let (status, body) = get(port, "/entities/ghost");
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not-found");
}

// ──────────────────────────────────────────────
// Deal outcome and sync
// ──────────────────────────────────────────────

#[test]
fn deal_sync_then_lost_then_reset() {
    let server = start_server();
    let port = server.port;
    post(
        port,
        "/entities",
        json!({ "entity_id": "deal-1", "workflow": "sales-deal" }),
    );

    let (status, body) = post(
        port,
        "/sync",
        json!({
            "entity_id": "deal-1",
            "external_stage": "Proposal/Price Quote",
            "timestamp": "2026-03-02T12:00:00Z",
        }),
    );
    assert_eq!(status, 200);
    assert_eq!(body["entity"]["current_stage_id"], "quote-sent");

    let lost = json!({ "reason": "competitor", "details": "chose X" });
    let (status, deal) = post(port, "/entities/deal-1/outcome/lost", lost.clone());
    assert_eq!(status, 200);
    assert_eq!(deal["current_stage_id"], "closed-lost");

    let (status, body) = post(port, "/entities/deal-1/outcome/lost", lost);
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "conflict");

    let (status, body) = get(port, "/entities/deal-1/outcome");
    assert_eq!(status, 200);
    assert_eq!(body["outcome"]["outcome"], "lost");
    assert_eq!(body["outcome"]["pre_terminal_stage"], "quote-sent");

    let (status, deal) = post(port, "/entities/deal-1/outcome/reset", json!({}));
    assert_eq!(status, 200);
    assert_eq!(deal["current_stage_id"], "quote-sent");

    let (status, deal) = post(
        port,
        "/entities/deal-1/outcome/won",
        json!({ "final_value": "12500.00" }),
    );
    assert_eq!(status, 200);
    assert_eq!(deal["current_stage_id"], "closed-won");
}

#[test]
fn decision_and_checklist_endpoints() {
    let server = start_server();
    let port = server.port;
    post(
        port,
        "/entities",
        json!({ "entity_id": "lead-3", "workflow": "sales-lead" }),
    );
    let (status, body) = request(
        port,
        "PUT",
        "/entities/lead-3/checklist/discovery/budget",
        Some(&json!({ "checked": true })),
    );
    assert_eq!(status, 200);
    assert_eq!(body["checked"], true);

    post(
        port,
        "/sync",
        json!({ "entity_id": "lead-3", "external_stage": "Sales Qualified Lead" }),
    );
    for stage in ["demo", "readiness"] {
        post(port, "/entities/lead-3/advance", json!({ "from_stage": stage }));
    }

    let (status, body) = get(port, "/entities/lead-3/decision");
    assert_eq!(status, 200);
    assert_eq!(body["options"][1]["label"], "Not a Fit");

    let (status, body) = post(
        port,
        "/entities/lead-3/decision",
        json!({ "stage": "decision", "option": "Not a Fit" }),
    );
    assert_eq!(status, 200);
    assert_eq!(body["entity"]["current_stage_id"], "not-a-fit");

    // Skipped by the branch, so its checklist is locked.
    let (status, body) = request(
        port,
        "PUT",
        "/entities/lead-3/checklist/onboarding-form/billing-contact",
        Some(&json!({ "checked": true })),
    );
    assert_eq!(status, 422);
    assert_eq!(body["kind"], "invalid-transition");

    let (status, _) = request(
        port,
        "PUT",
        "/entities/lead-3/checklist/onboarding-form/coffee",
        Some(&json!({ "checked": true })),
    );
    assert_eq!(status, 404);
}
