use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use secrecy::SecretString;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::RwLock;

use ns_auth_server::config::{BootstrapConfig, RuntimeConfig, StartupConfig};
use ns_auth_server::mechanism::{Mechanism, ScramClient, ScramVerifier};
use ns_auth_server::provision::{AdminCredentials, ProvisionOutcome};
use ns_auth_server::store::DigestOrigin;
use ns_auth_server::{Server, ServerContext};

fn startup_config() -> StartupConfig {
    StartupConfig {
        bind_address: "127.0.0.1".into(),
        port: 0,
        store_path: String::new(),
        default_scope: "notes_system".into(),
        max_command_length: 1024,
        max_username_length: 128,
        scram_iterations: 64,
        max_scram_iterations: Some(256),
        default_mechanism: "SCRAM-SHA-256".into(),
        session_ttl_secs: 3600,
        max_auth_attempts: 3,
        auth_window_secs: 60,
        admin_user: "mongoadm".into(),
        admin_password: Some(SecretString::from("mongoadm")),
    }
}

fn bootstrap_config() -> BootstrapConfig {
    BootstrapConfig {
        name: "nsuser".into(),
        password: SecretString::from("nsuser"),
        mechanism: "SCRAM-SHA-1".into(),
        digest_origin: DigestOrigin::ClientComputed,
        scope: "notes_system".into(),
        roles: vec!["readWrite@notes_system".into()],
    }
}

/// Starts a bootstrapped server on an ephemeral port.
async fn start_server(max_clients: usize) -> (SocketAddr, Arc<ServerContext>) {
    start_server_with(startup_config(), max_clients).await
}

async fn start_server_with(config: StartupConfig, max_clients: usize) -> (SocketAddr, Arc<ServerContext>) {
    let runtime = Arc::new(RwLock::new(RuntimeConfig { max_clients }));
    let ctx = Arc::new(ServerContext::new(config, runtime).unwrap());
    let report = ctx.bootstrap(Some(&bootstrap_config())).unwrap();
    assert!(report.admin_installed);
    assert!(matches!(report.outcome, ProvisionOutcome::Provisioned(_)));

    let server = Server::bind(Arc::clone(&ctx)).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.start().await });
    (addr, ctx)
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: SocketAddr) -> (Self, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer,
        };
        let greeting = conn.read_reply().await;
        (conn, greeting)
    }

    async fn connect(addr: SocketAddr) -> Self {
        let (conn, greeting) = Self::open(addr).await;
        assert_eq!(greeting, "220 ns-auth ready");
        conn
    }

    async fn read_reply(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn send(&mut self, line: &str) -> String {
        self.send_raw(format!("{line}\r\n").as_bytes()).await
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> String {
        self.writer.write_all(bytes).await.unwrap();
        self.read_reply().await
    }
}

/// Splits `<code> <rest>`.
fn split(reply: &str) -> (u16, &str) {
    let (code, rest) = reply.split_once(' ').unwrap_or((reply, ""));
    (code.parse().unwrap(), rest)
}

fn json(reply: &str) -> (u16, Value) {
    let (code, body) = split(reply);
    (code, serde_json::from_str(body).unwrap())
}

#[tokio::test]
async fn test_sign_up_and_auth_scenario() {
    let (addr, _) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;

    let (code, body) = json(
        &conn
            .send(r#"SIGNUP {"email":"a@b.com","password":"p","repeatPassword":"p"}"#)
            .await,
    );
    assert_eq!(code, 201);
    assert!(body["identityId"].as_str().is_some());

    let (code, body) = json(&conn.send(r#"AUTH {"email":"a@b.com","password":"wrong"}"#).await);
    assert_eq!(code, 530);
    assert_eq!(body["code"], "NS-000003");

    let (code, body) = json(&conn.send(r#"AUTH {"email":"a@b.com","password":"p"}"#).await);
    assert_eq!(code, 230);
    assert_eq!(body["granted"], true);
    assert_eq!(body["roles"], serde_json::json!(["readWrite@notes_system"]));
    assert!(body["token"].as_str().is_some());

    assert_eq!(
        conn.send("WHOAMI").await,
        "200 a@b.com@notes_system readWrite@notes_system"
    );
}

#[tokio::test]
async fn test_bootstrapped_identity_authenticates() {
    let (addr, ctx) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;

    let (code, body) = json(&conn.send(r#"AUTH {"email":"nsuser","password":"nsuser"}"#).await);
    assert_eq!(code, 230);
    assert_eq!(body["roles"], serde_json::json!(["readWrite@notes_system"]));

    let stored = ctx.store.lookup("nsuser", "notes_system").unwrap();
    assert_eq!(stored.digest_origin, DigestOrigin::ClientComputed);
    assert_eq!(stored.mechanism, Mechanism::ScramSha1);

    // The admin scope is not reachable through the client API.
    let (code, _) = json(
        &conn
            .send(r#"AUTH {"email":"mongoadm","password":"mongoadm","scope":"admin"}"#)
            .await,
    );
    assert_eq!(code, 400);
}

#[tokio::test]
async fn test_sign_up_errors() {
    let (addr, ctx) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;

    let (code, body) = json(
        &conn
            .send(r#"SIGNUP {"email":"m@b.com","password":"p","repeatPassword":"q"}"#)
            .await,
    );
    assert_eq!(code, 400);
    assert_eq!(body["code"], "NS-000007");
    assert!(ctx.store.lookup("m@b.com", "notes_system").is_err());

    let signup = r#"SIGNUP {"email":"d@b.com","password":"p","repeatPassword":"p"}"#;
    assert_eq!(split(&conn.send(signup).await).0, 201);
    let (code, body) = json(&conn.send(signup).await);
    assert_eq!(code, 409);
    assert_eq!(body["code"], "NS-000004");

    let (code, body) = json(&conn.send("SIGNUP not-json").await);
    assert_eq!(code, 400);
    assert_eq!(body["code"], "NS-000002");
}

#[tokio::test]
async fn test_sasl_exchange() {
    let (addr, ctx) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;

    let mut client = ScramClient::new(
        Mechanism::ScramSha1,
        "nsuser",
        SecretString::from("nsuser"),
        ctx.negotiator.rng(),
    )
    .unwrap();
    let start = format!(
        "SASLSTART SCRAM-SHA-1 {}",
        B64.encode(client.client_first().to_message())
    );
    let (code, payload) = {
        let reply = conn.send(&start).await;
        let (code, payload) = split(&reply);
        (code, payload.to_string())
    };
    assert_eq!(code, 334);

    let server_first = String::from_utf8(B64.decode(payload).unwrap()).unwrap();
    let client_final = client.client_final(&server_first).unwrap();
    let reply = conn
        .send(&format!("SASLCONTINUE {}", B64.encode(client_final.to_string())))
        .await;
    let (code, payload) = split(&reply);
    assert_eq!(code, 235);

    let server_final = String::from_utf8(B64.decode(payload).unwrap()).unwrap();
    client.verify_server_final(&server_final).unwrap();
    assert!(conn.send("WHOAMI").await.starts_with("200 nsuser@notes_system"));

    // A challenge is answered once.
    let (code, _) = json(&conn.send("SASLCONTINUE Yz1iaXdz").await);
    assert_eq!(code, 503);
}

#[tokio::test]
async fn test_session_commands_require_authentication() {
    let (addr, _) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;

    assert_eq!(split(&conn.send("WHOAMI").await).0, 503);
    assert_eq!(split(&conn.send("LOGOUT").await).0, 503);
    assert_eq!(split(&conn.send("SASLCONTINUE abc").await).0, 503);
    assert_eq!(conn.send("NOOP").await, "200 OK");
    assert_eq!(split(&conn.send("FROB").await).0, 500);
}

#[tokio::test]
async fn test_token_check_and_logout() {
    let (addr, _) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;

    let (_, body) = json(&conn.send(r#"AUTH {"email":"nsuser","password":"nsuser"}"#).await);
    let token = body["token"].as_str().unwrap().to_string();

    let mut other = Connection::connect(addr).await;
    let (code, body) = json(&other.send(&format!("CHECK {token}")).await);
    assert_eq!(code, 200);
    assert_eq!(body["granted"], true);
    assert!(body.get("token").is_none());

    assert_eq!(conn.send("LOGOUT").await, "221 Logout successful");
    let (code, _) = json(&other.send(&format!("CHECK {token}")).await);
    assert_eq!(code, 530);
    assert_eq!(split(&conn.send("WHOAMI").await).0, 503);
}

#[tokio::test]
async fn test_password_change() {
    let (addr, _) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;

    conn.send(r#"SIGNUP {"email":"c@b.com","password":"old","repeatPassword":"old"}"#)
        .await;
    conn.send(r#"AUTH {"email":"c@b.com","password":"old"}"#).await;

    let (code, _) = json(
        &conn
            .send(r#"PASSWD {"oldPassword":"old","newPassword":"a","repeatPassword":"b"}"#)
            .await,
    );
    assert_eq!(code, 400);
    assert_eq!(
        conn.send(r#"PASSWD {"oldPassword":"old","newPassword":"new","repeatPassword":"new"}"#)
            .await,
        "200 Password changed"
    );

    let mut fresh = Connection::connect(addr).await;
    assert_eq!(
        split(&fresh.send(r#"AUTH {"email":"c@b.com","password":"old"}"#).await).0,
        530
    );
    assert_eq!(
        split(&fresh.send(r#"AUTH {"email":"c@b.com","password":"new"}"#).await).0,
        230
    );
}

#[tokio::test]
async fn test_failed_attempts_are_rate_limited() {
    let (addr, _) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;

    for _ in 0..3 {
        let reply = conn.send(r#"AUTH {"email":"nsuser","password":"bad"}"#).await;
        assert_eq!(split(&reply).0, 530);
    }
    let (code, body) = json(&conn.send(r#"AUTH {"email":"nsuser","password":"nsuser"}"#).await);
    assert_eq!(code, 421);
    assert_eq!(body["code"], "NS-000006");
}

#[tokio::test]
async fn test_revocation_ends_sessions() {
    let (addr, ctx) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;
    assert_eq!(
        split(&conn.send(r#"AUTH {"email":"nsuser","password":"nsuser"}"#).await).0,
        230
    );

    let admin = ctx
        .provisioner
        .authenticate(&AdminCredentials {
            name: "mongoadm".into(),
            password: SecretString::from("mongoadm"),
        })
        .ok()
        .unwrap();
    admin.revoke_identity("nsuser", "notes_system").unwrap();

    assert_eq!(split(&conn.send("WHOAMI").await).0, 530);
    assert_eq!(split(&conn.send("WHOAMI").await).0, 503);
}

#[tokio::test]
async fn test_connection_limit_and_quit() {
    let (addr, _) = start_server(1).await;
    let mut first = Connection::connect(addr).await;

    let (_, greeting) = Connection::open(addr).await;
    assert!(greeting.starts_with("421 "));

    assert_eq!(first.send("QUIT").await, "221 Goodbye");
    let mut rest = Vec::new();
    first.reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    // The slot is released once the first client has gone.
    let mut attempts = 0;
    loop {
        let (_, greeting) = Connection::open(addr).await;
        if greeting == "220 ns-auth ready" {
            break;
        }
        attempts += 1;
        assert!(attempts < 50, "slot never released");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_overlong_command_is_rejected() {
    let (addr, _) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;
    let long = format!("AUTH {}", "x".repeat(2048));
    assert_eq!(split(&conn.send(&long).await).0, 400);

    // max_command_length is 1024, line ending excluded.
    let at_limit = format!("NOOP {}", "x".repeat(1024 - 5));
    assert_eq!(conn.send(&at_limit).await, "200 OK");
    let over = format!("NOOP {}", "x".repeat(1024 - 4));
    let (code, body) = json(&conn.send(&over).await);
    assert_eq!(code, 400);
    assert_eq!(body["message"], "command too long");
    let over_lf = format!("NOOP {}\n", "x".repeat(1024 - 4));
    assert_eq!(split(&conn.send_raw(over_lf.as_bytes()).await).0, 400);

    // A multibyte character cut at the read limit is still "too long".
    let straddling = format!("NOOP {}", "é".repeat(600));
    let (code, body) = json(&conn.send(&straddling).await);
    assert_eq!(code, 400);
    assert_eq!(body["message"], "command too long");

    let (code, _) = json(&conn.send_raw(b"\xff\xfe\r\n").await);
    assert_eq!(code, 400);
    assert_eq!(conn.send("NOOP").await, "200 OK");
}

#[tokio::test]
async fn test_refresh_rotates_connection_token() {
    let (addr, _) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;
    let (_, body) = json(&conn.send(r#"AUTH {"email":"nsuser","password":"nsuser"}"#).await);
    let old = body["token"].as_str().unwrap().to_string();

    let (code, body) = json(&conn.send(&format!("REFRESH {old}")).await);
    assert_eq!(code, 200);
    let new = body["token"].as_str().unwrap().to_string();
    assert_ne!(new, old);

    let mut other = Connection::connect(addr).await;
    assert_eq!(split(&other.send(&format!("CHECK {old}")).await).0, 530);
    assert_eq!(split(&other.send(&format!("CHECK {new}")).await).0, 200);
    assert_eq!(split(&other.send(&format!("REFRESH {old}")).await).0, 530);

    // The connection follows the rotated token.
    assert!(conn.send("WHOAMI").await.starts_with("200 nsuser@notes_system"));
}

#[tokio::test]
async fn test_self_delete() {
    let (addr, ctx) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;
    conn.send(r#"SIGNUP {"email":"gone@b.com","password":"p","repeatPassword":"p"}"#)
        .await;
    let (_, body) = json(&conn.send(r#"AUTH {"email":"gone@b.com","password":"p"}"#).await);
    let token = body["token"].as_str().unwrap().to_string();

    assert_eq!(split(&conn.send(r#"DELETE {"password":"bad"}"#).await).0, 530);
    assert!(ctx.store.lookup("gone@b.com", "notes_system").is_ok());

    assert_eq!(conn.send(r#"DELETE {"password":"p"}"#).await, "200 Account deleted");
    assert!(ctx.store.lookup("gone@b.com", "notes_system").is_err());
    assert_eq!(split(&conn.send("WHOAMI").await).0, 503);
    assert_eq!(split(&conn.send(&format!("CHECK {token}")).await).0, 530);

    let mut anonymous = Connection::connect(addr).await;
    assert_eq!(split(&anonymous.send(r#"DELETE {"password":"p"}"#).await).0, 503);
}

#[tokio::test]
async fn test_client_verifier_iteration_count_is_bounded() {
    let (addr, ctx) = start_server(8).await;
    let mut conn = Connection::connect(addr).await;
    let verifier = |count: u32| {
        ScramVerifier::generate(
            Mechanism::ScramSha256,
            &SecretString::from("y"),
            NonZeroU32::new(count).unwrap(),
            ctx.negotiator.rng(),
        )
        .unwrap()
        .to_string()
    };
    let huge = verifier(64).replacen("$64:", "$4000000000:", 1);

    for (name, text) in [("cheap", verifier(1)), ("costly", huge)] {
        let request = serde_json::json!({ "email": name, "verifier": text });
        let (code, body) = json(&conn.send(&format!("SIGNUP {request}")).await);
        assert_eq!(code, 400, "{name}");
        assert_eq!(body["code"], "NS-000002");
    }

    let request = serde_json::json!({ "email": "fine", "verifier": verifier(256) });
    assert_eq!(split(&conn.send(&format!("SIGNUP {request}")).await).0, 201);
    assert_eq!(
        split(&conn.send(r#"AUTH {"email":"fine","password":"y"}"#).await).0,
        230
    );
}

/// Runs on a single-threaded runtime: a login deriving keys must not stall
/// other connections.
#[tokio::test(flavor = "current_thread")]
async fn test_key_derivation_does_not_block_other_clients() {
    let mut config = startup_config();
    config.scram_iterations = 200_000;
    config.max_scram_iterations = None;
    let (addr, _) = start_server_with(config, 8).await;

    let mut slow = Connection::connect(addr).await;
    let login = tokio::spawn(async move {
        slow.send(r#"AUTH {"email":"ghost","password":"x"}"#).await
    });
    tokio::task::yield_now().await;

    let mut quick = Connection::connect(addr).await;
    assert_eq!(quick.send("NOOP").await, "200 OK");
    assert!(!login.is_finished(), "NOOP waited for the login");
    assert_eq!(split(&login.await.unwrap()).0, 530);
}
