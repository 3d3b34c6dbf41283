//! The connection state machine: handshake, command gating, heartbeat,
//! and the full command set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::connection::Connection;
use crate::error::{FaktoryError, ProtocolError, ValidationError};
use crate::model::{random_hex_id, Batch, InboundJob, Job, MutateOperation};

const DEFAULT_URL: &str = "tcp://localhost:7419";
const DEFAULT_PORT: u16 = 7419;
const MIN_BEAT_PERIOD: u64 = 5;
const MAX_BEAT_PERIOD: u64 = 60;
const DEFAULT_BEAT_PERIOD: u64 = 15;

/// What a [`Client`] is allowed to do: a producer may only push/batch/mutate,
/// a consumer may only fetch/ack/fail/beat, `both` may do everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
    Both,
}

impl std::str::FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "producer" => Ok(Role::Producer),
            "consumer" => Ok(Role::Consumer),
            "both" => Ok(Role::Both),
            other => Err(ValidationError::InvalidRole(other.to_string())),
        }
    }
}

/// Position in the connection lifecycle. See spec §4.3 for the full
/// transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Disconnected = 0,
    NotIdentified = 1,
    Identified = 2,
    Quiet = 3,
    Terminating = 4,
    End = 5,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            0 => State::Disconnected,
            1 => State::NotIdentified,
            2 => State::Identified,
            3 => State::Quiet,
            4 => State::Terminating,
            _ => State::End,
        }
    }
}

/// Construction parameters for [`Client::new`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: Option<String>,
    pub role: Role,
    pub timeout: Option<Duration>,
    pub worker_id: Option<String>,
    pub labels: Vec<String>,
    pub beat_period: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            role: Role::Both,
            timeout: Some(Duration::from_secs(10)),
            worker_id: None,
            labels: vec!["rust".to_string()],
            beat_period: DEFAULT_BEAT_PERIOD,
        }
    }
}

struct ClientShared {
    host: String,
    port: u16,
    password: Option<String>,
    role: Role,
    timeout: Option<Duration>,
    worker_id: Option<String>,
    labels: Vec<String>,
    beat_period: u64,
    state: AtomicU8,
    conn: tokio::sync::Mutex<Option<Connection>>,
}

/// A handle to a single Faktory server connection. Cheap to clone; every
/// clone shares the same underlying socket and state.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

fn parse_faktory_url(raw: &str) -> Result<(String, u16, Option<String>), ValidationError> {
    let parsed = url::Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    if parsed.scheme() != "tcp" && parsed.scheme() != "tcp+tls" {
        return Err(ValidationError::InvalidUrl(format!(
            "unsupported scheme {:?}, expected tcp or tcp+tls",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ValidationError::InvalidUrl("missing host".to_string()))?
        .to_string();
    let port = parsed.port().unwrap_or(DEFAULT_PORT);
    let password = parsed.password().map(|p| p.to_string());
    Ok((host, port, password))
}

fn hash_password(password: &str, salt: &str, iterations: u64) -> String {
    use sha2::{Digest, Sha256};
    let mut hash = Sha256::digest([password.as_bytes(), salt.as_bytes()].concat());
    for _ in 1..iterations.max(1) {
        hash = Sha256::digest(hash);
    }
    hex::encode(hash)
}

fn expect_ok(reply: &str) -> Result<(), ProtocolError> {
    if let Some(msg) = reply.strip_prefix('-') {
        return Err(ProtocolError::ServerError(msg.to_string()));
    }
    if reply.starts_with("+OK") {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedReply {
            expected: "+OK".to_string(),
            got: reply.to_string(),
        })
    }
}

fn expect_bulk(reply: &str) -> Result<&str, ProtocolError> {
    if let Some(msg) = reply.strip_prefix('-') {
        return Err(ProtocolError::ServerError(msg.to_string()));
    }
    let (n, data) = faktory_wire::parse_bulk_string(reply);
    if n < 0 {
        return Err(ProtocolError::MalformedPayload(reply.to_string()));
    }
    Ok(data)
}

#[derive(Debug, Deserialize)]
struct HiPayload {
    v: i64,
    #[serde(default)]
    i: Option<u64>,
    #[serde(default)]
    s: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BeatStatePayload {
    state: String,
}

impl Client {
    /// Builds a client without connecting. `config.url` falls back to the
    /// `FAKTORY_URL` environment variable, then to `tcp://localhost:7419`.
    pub fn new(config: ClientConfig) -> Result<Self, ValidationError> {
        let raw_url = config
            .url
            .or_else(|| std::env::var("FAKTORY_URL").ok())
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let (host, port, password) = parse_faktory_url(&raw_url)?;

        let worker_id = if config.role == Role::Producer {
            None
        } else {
            match config.worker_id {
                Some(wid) => {
                    if wid.len() < 8 {
                        return Err(ValidationError::WorkerIdTooShort(wid.len()));
                    }
                    Some(wid)
                }
                None => Some(random_hex_id()),
            }
        };

        let beat_period = config.beat_period.clamp(MIN_BEAT_PERIOD, MAX_BEAT_PERIOD);

        Ok(Self {
            shared: Arc::new(ClientShared {
                host,
                port,
                password,
                role: config.role,
                timeout: config.timeout,
                worker_id,
                labels: config.labels,
                beat_period,
                state: AtomicU8::new(State::Disconnected as u8),
                conn: tokio::sync::Mutex::new(None),
            }),
        })
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> State {
        State::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn beat_period(&self) -> Duration {
        Duration::from_secs(self.shared.beat_period)
    }

    /// `None` for a producer client, even if a `worker_id` was configured
    /// (producer clients never expose consumer-only identity).
    pub fn worker_id(&self) -> Option<&str> {
        if self.shared.role == Role::Producer {
            None
        } else {
            self.shared.worker_id.as_deref()
        }
    }

    fn set_state(&self, new: State) -> Result<(), ProtocolError> {
        if self.shared.role == Role::Producer && matches!(new, State::Quiet | State::Terminating)
        {
            return Err(ProtocolError::WrongRole {
                cmd: "BEAT".to_string(),
                role: self.shared.role,
            });
        }
        self.shared.state.store(new as u8, Ordering::SeqCst);
        Ok(())
    }

    fn require_state(&self, allowed: &[State], cmd: &str) -> Result<(), ProtocolError> {
        let cur = self.state();
        if allowed.contains(&cur) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                cmd: cmd.to_string(),
                state: cur,
            })
        }
    }

    fn require_role_not(&self, forbidden: Role, cmd: &str) -> Result<(), ProtocolError> {
        if self.shared.role == forbidden {
            Err(ProtocolError::WrongRole {
                cmd: cmd.to_string(),
                role: forbidden,
            })
        } else {
            Ok(())
        }
    }

    async fn send_recv(&self, line: &str) -> Result<String, ProtocolError> {
        let mut guard = self.shared.conn.lock().await;
        let conn = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        conn.send(line).await?;
        conn.receive().await
    }

    async fn send_only(&self, line: &str) -> Result<(), ProtocolError> {
        let mut guard = self.shared.conn.lock().await;
        let conn = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        conn.send(line).await
    }

    /// Opens the socket, reads the `HI` greeting, and completes the
    /// `HELLO` handshake (including password hashing, if challenged).
    pub async fn connect(&self) -> Result<(), FaktoryError> {
        self.require_state(&[State::Disconnected], "connect")?;
        let conn =
            Connection::connect(&self.shared.host, self.shared.port, self.shared.timeout).await?;
        {
            let mut guard = self.shared.conn.lock().await;
            *guard = Some(conn);
        }
        let greeting = {
            let mut guard = self.shared.conn.lock().await;
            guard.as_mut().expect("just connected").receive().await?
        };
        self.set_state(State::NotIdentified)?;

        let without_plus = greeting.strip_prefix('+').unwrap_or(&greeting);
        let json_part = without_plus.strip_prefix("HI").ok_or_else(|| {
            ProtocolError::UnexpectedReply {
                expected: "HI {...}".to_string(),
                got: greeting.clone(),
            }
        })?;
        let hi: HiPayload = serde_json::from_str(json_part.trim())?;
        if hi.v != 2 {
            return Err(ProtocolError::UnsupportedVersion(hi.v).into());
        }

        let pwdhash = match (hi.i, hi.s.as_deref()) {
            (Some(iterations), Some(salt)) => {
                let password = self
                    .shared
                    .password
                    .as_deref()
                    .ok_or(ValidationError::PasswordRequired)?;
                Some(hash_password(password, salt, iterations))
            }
            _ => None,
        };

        self.hello(pwdhash).await?;
        tracing::debug!(host = %self.shared.host, port = self.shared.port, "connected to faktory server");
        Ok(())
    }

    async fn hello(&self, pwdhash: Option<String>) -> Result<(), FaktoryError> {
        self.require_state(&[State::NotIdentified], "HELLO")?;
        let mut obj = serde_json::Map::new();
        obj.insert("v".to_string(), serde_json::json!(2));
        if self.shared.role != Role::Producer {
            obj.insert("hostname".to_string(), serde_json::json!(self.shared.host));
            obj.insert(
                "wid".to_string(),
                serde_json::json!(self.shared.worker_id.clone().unwrap_or_default()),
            );
            obj.insert("pid".to_string(), serde_json::json!(std::process::id()));
            obj.insert("labels".to_string(), serde_json::json!(self.shared.labels));
        }
        if let Some(h) = pwdhash {
            obj.insert("pwdhash".to_string(), serde_json::json!(h));
        }
        let line = format!("HELLO {}\r\n", Value::Object(obj));
        let reply = self.send_recv(&line).await?;
        expect_ok(&reply)?;
        self.set_state(State::Identified)?;
        if self.shared.role != Role::Producer {
            self.spawn_heartbeat();
        }
        Ok(())
    }

    fn spawn_heartbeat(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let state = client.state();
                if !matches!(state, State::Identified | State::Quiet) {
                    break;
                }
                if let Err(err) = client.beat().await {
                    tracing::warn!(%err, "heartbeat failed, stopping heartbeat task");
                    break;
                }
                tokio::time::sleep(Duration::from_secs(client.shared.beat_period)).await;
            }
        });
    }

    /// Sends one `BEAT` and applies any server-requested state change.
    /// Ordinarily called by the background heartbeat task; exposed for
    /// callers that want to drive heartbeating themselves.
    pub async fn beat(&self) -> Result<(), FaktoryError> {
        self.require_role_not(Role::Producer, "BEAT")?;
        self.require_state(&[State::Identified, State::Quiet], "BEAT")?;

        let mut obj = serde_json::Map::new();
        obj.insert(
            "wid".to_string(),
            serde_json::json!(self.shared.worker_id.clone().unwrap_or_default()),
        );
        match self.state() {
            State::Quiet => {
                obj.insert("current_state".to_string(), serde_json::json!("quiet"));
            }
            State::Terminating => {
                obj.insert("current_state".to_string(), serde_json::json!("terminate"));
            }
            _ => {}
        }
        let line = format!("BEAT {}\r\n", Value::Object(obj));
        let reply = self.send_recv(&line).await?;

        if let Some(msg) = reply.strip_prefix('-') {
            return Err(ProtocolError::ServerError(msg.to_string()).into());
        }
        if reply.starts_with("+OK") {
            // A plain OK while quiesced means the server has lifted
            // quiet and the worker may resume fetching.
            if self.state() == State::Quiet {
                self.set_state(State::Identified)?;
            }
            return Ok(());
        }
        if reply.starts_with('$') {
            let (n, data) = faktory_wire::parse_bulk_string(&reply);
            if n < 0 {
                return Err(ProtocolError::MalformedPayload(reply).into());
            }
            let payload: BeatStatePayload = serde_json::from_str(data)?;
            match payload.state.as_str() {
                "quiet" => self.set_state(State::Quiet)?,
                "terminate" => self.set_state(State::Terminating)?,
                other => {
                    return Err(ProtocolError::UnexpectedReply {
                        expected: "quiet or terminate".to_string(),
                        got: other.to_string(),
                    }
                    .into())
                }
            }
            return Ok(());
        }
        Err(ProtocolError::UnexpectedReply {
            expected: "+OK or a bulk string state payload".to_string(),
            got: reply,
        }
        .into())
    }

    /// Sends `END` (if not already in `END`) without waiting for a reply.
    pub async fn end(&self) -> Result<(), FaktoryError> {
        self.require_state(
            &[State::Identified, State::Quiet, State::Terminating],
            "END",
        )?;
        self.send_only("END\r\n").await?;
        self.set_state(State::End)?;
        Ok(())
    }

    /// Sends `END` if not already sent, closes the socket, and returns to
    /// `DISCONNECTED`. Safe to call from any state.
    pub async fn disconnect(&self) {
        if self.state() != State::End {
            if let Err(err) = self.end().await {
                tracing::warn!(%err, "END failed during disconnect");
            }
        }
        let mut guard = self.shared.conn.lock().await;
        *guard = None;
        self.shared.state.store(State::Disconnected as u8, Ordering::SeqCst);
    }

    /// Connects and returns a guard that disconnects on drop, mirroring a
    /// `with Client(...) as client:` scope.
    pub async fn connect_scoped(self) -> Result<ConnectedClient, FaktoryError> {
        self.connect().await?;
        Ok(ConnectedClient { client: self })
    }

    pub async fn push(&self, job: &Job) -> Result<bool, FaktoryError> {
        self.require_role_not(Role::Consumer, "PUSH")?;
        self.require_state(&[State::Identified], "PUSH")?;
        let payload = serde_json::to_string(job)?;
        let reply = self.send_recv(&format!("PUSH {payload}\r\n")).await?;
        expect_ok(&reply)?;
        Ok(true)
    }

    pub async fn push_bulk(&self, jobs: &[Job]) -> Result<HashMap<String, String>, FaktoryError> {
        self.require_role_not(Role::Consumer, "PUSHB")?;
        self.require_state(&[State::Identified], "PUSHB")?;
        let payload = serde_json::to_string(jobs)?;
        let reply = self.send_recv(&format!("PUSHB {payload}\r\n")).await?;
        let data = expect_bulk(&reply)?;
        Ok(serde_json::from_str(data)?)
    }

    pub async fn batch_new(&self, batch: &Batch) -> Result<String, FaktoryError> {
        self.require_role_not(Role::Consumer, "BATCH NEW")?;
        self.require_state(&[State::Identified], "BATCH NEW")?;
        let payload = serde_json::to_string(batch)?;
        let reply = self.send_recv(&format!("BATCH NEW {payload}\r\n")).await?;
        Ok(expect_bulk(&reply)?.to_string())
    }

    pub async fn batch_open(&self, bid: &str) -> Result<(), FaktoryError> {
        self.require_role_not(Role::Consumer, "BATCH OPEN")?;
        self.require_state(&[State::Identified], "BATCH OPEN")?;
        let reply = self.send_recv(&format!("BATCH OPEN {bid}\r\n")).await?;
        expect_ok(&reply)?;
        Ok(())
    }

    pub async fn batch_commit(&self, bid: &str) -> Result<(), FaktoryError> {
        self.require_role_not(Role::Consumer, "BATCH COMMIT")?;
        self.require_state(&[State::Identified], "BATCH COMMIT")?;
        let reply = self.send_recv(&format!("BATCH COMMIT {bid}\r\n")).await?;
        expect_ok(&reply)?;
        Ok(())
    }

    pub async fn batch_status(&self, bid: &str) -> Result<Value, FaktoryError> {
        self.require_state(&[State::Identified], "BATCH STATUS")?;
        let reply = self.send_recv(&format!("BATCH STATUS {bid}\r\n")).await?;
        let data = expect_bulk(&reply)?;
        Ok(serde_json::from_str(data)?)
    }

    pub async fn mutate(&self, op: &MutateOperation) -> Result<(), FaktoryError> {
        self.require_state(&[State::Identified], "MUTATE")?;
        let payload = serde_json::to_string(op)?;
        let reply = self.send_recv(&format!("MUTATE {payload}\r\n")).await?;
        expect_ok(&reply)?;
        Ok(())
    }

    pub async fn fetch(&self, queues: &[String]) -> Result<Option<Job>, FaktoryError> {
        self.require_role_not(Role::Producer, "FETCH")?;
        self.require_state(&[State::Identified], "FETCH")?;
        let reply = self
            .send_recv(&format!("FETCH {}\r\n", queues.join(" ")))
            .await?;
        if let Some(msg) = reply.strip_prefix('-') {
            return Err(ProtocolError::ServerError(msg.to_string()).into());
        }
        let (n, data) = faktory_wire::parse_bulk_string(&reply);
        if n < 0 {
            return Ok(None);
        }
        let inbound: InboundJob = serde_json::from_str(data)?;
        Ok(Some(inbound.into()))
    }

    pub async fn ack(&self, jid: &str) -> Result<(), FaktoryError> {
        self.require_role_not(Role::Producer, "ACK")?;
        self.require_state(
            &[State::Identified, State::Quiet, State::Terminating],
            "ACK",
        )?;
        let payload = serde_json::json!({ "jid": jid });
        let reply = self.send_recv(&format!("ACK {payload}\r\n")).await?;
        expect_ok(&reply)?;
        Ok(())
    }

    pub async fn fail(
        &self,
        jid: &str,
        errtype: &str,
        message: &str,
        backtrace: Vec<String>,
    ) -> Result<(), FaktoryError> {
        self.require_role_not(Role::Producer, "FAIL")?;
        self.require_state(
            &[State::Identified, State::Quiet, State::Terminating],
            "FAIL",
        )?;
        let payload = serde_json::json!({
            "jid": jid,
            "errtype": errtype,
            "message": message,
            "backtrace": backtrace,
        });
        let reply = self.send_recv(&format!("FAIL {payload}\r\n")).await?;
        expect_ok(&reply)?;
        Ok(())
    }

    pub async fn info(&self) -> Result<Value, FaktoryError> {
        self.require_state(&[State::Identified], "INFO")?;
        let reply = self.send_recv("INFO\r\n").await?;
        let data = expect_bulk(&reply)?;
        Ok(serde_json::from_str(data)?)
    }

    pub async fn flush(&self) -> Result<(), FaktoryError> {
        self.require_state(&[State::Identified], "FLUSH")?;
        let reply = self.send_recv("FLUSH\r\n").await?;
        expect_ok(&reply)?;
        Ok(())
    }
}

/// A connected [`Client`] that disconnects when dropped, mirroring a
/// `with Client(...) as client:` scope. Disconnect happens on a spawned
/// task since `Drop` cannot be async.
pub struct ConnectedClient {
    client: Client,
}

impl std::ops::Deref for ConnectedClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl Drop for ConnectedClient {
    fn drop(&mut self) {
        let client = self.client.clone();
        tokio::spawn(async move {
            client.disconnect().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn producer_client(url: &str) -> Client {
        Client::new(ClientConfig {
            url: Some(url.to_string()),
            role: Role::Producer,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn short_worker_id_is_rejected() {
        let err = Client::new(ClientConfig {
            url: Some(DEFAULT_URL.to_string()),
            role: Role::Consumer,
            worker_id: Some("short".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, ValidationError::WorkerIdTooShort(5));
    }

    #[test]
    fn producer_has_no_worker_id() {
        let client = producer_client(DEFAULT_URL);
        assert!(client.worker_id().is_none());
    }

    #[test]
    fn consumer_gets_a_generated_worker_id() {
        let client = Client::new(ClientConfig {
            url: Some(DEFAULT_URL.to_string()),
            role: Role::Consumer,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.worker_id().unwrap().len(), 32);
    }

    #[test]
    fn beat_period_is_clamped() {
        let client = Client::new(ClientConfig {
            url: Some(DEFAULT_URL.to_string()),
            role: Role::Consumer,
            beat_period: 9999,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.beat_period(), Duration::from_secs(MAX_BEAT_PERIOD));
    }

    #[test]
    fn url_parses_host_port_and_password() {
        let (host, port, password) = parse_faktory_url("tcp://:secret@example.com:1234").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 1234);
        assert_eq!(password.as_deref(), Some("secret"));
    }

    #[test]
    fn url_defaults_to_port_7419() {
        let (_, port, _) = parse_faktory_url("tcp://localhost").unwrap();
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn hash_password_is_deterministic_and_iterates() {
        let once = hash_password("secret", "salt123", 1);
        let twice = hash_password("secret", "salt123", 1);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 64);

        let five = hash_password("secret", "salt123", 5);
        assert_ne!(once, five);
    }

    #[tokio::test]
    async fn producer_role_rejects_fetch_before_touching_the_socket() {
        let client = producer_client(DEFAULT_URL);
        let err = client.fetch(&["default".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            FaktoryError::Protocol(ProtocolError::WrongRole { .. })
        ));
    }

    #[tokio::test]
    async fn commands_before_connect_fail_with_invalid_state() {
        let client = Client::new(ClientConfig {
            url: Some(DEFAULT_URL.to_string()),
            role: Role::Both,
            ..Default::default()
        })
        .unwrap();
        let err = client.flush().await.unwrap_err();
        assert!(matches!(
            err,
            FaktoryError::Protocol(ProtocolError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn connect_completes_the_no_password_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"+HI {\"v\":2}\r\n").await.unwrap();
            let mut buf = [0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let sent = String::from_utf8_lossy(&buf[..n]);
            assert!(sent.starts_with("HELLO "));
            assert!(sent.contains("\"v\":2"));
            sock.write_all(b"+OK\r\n").await.unwrap();
        });

        let client = producer_client(&format!("tcp://{}:{}", addr.ip(), addr.port()));
        client.connect().await.unwrap();
        assert_eq!(client.state(), State::Identified);
    }

    #[tokio::test]
    async fn connect_hashes_password_when_challenged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"+HI {\"v\":2,\"i\":5,\"s\":\"abc123\"}\r\n")
                .await
                .unwrap();
            let mut buf = [0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let sent = String::from_utf8_lossy(&buf[..n]);
            let expected = hash_password("secret", "abc123", 5);
            assert!(sent.contains(&expected));
            sock.write_all(b"+OK\r\n").await.unwrap();
        });

        let client = Client::new(ClientConfig {
            url: Some(format!("tcp://:secret@{}:{}", addr.ip(), addr.port())),
            role: Role::Producer,
            ..Default::default()
        })
        .unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.state(), State::Identified);
    }

    #[tokio::test]
    async fn producer_cannot_transition_to_quiet() {
        let client = producer_client(DEFAULT_URL);
        let err = client.set_state(State::Quiet).unwrap_err();
        assert!(matches!(err, ProtocolError::WrongRole { .. }));
    }

    #[tokio::test]
    async fn beat_ok_while_quiet_returns_to_identified() {
        // Drives `beat` directly against an injected connection rather than
        // going through `connect`, so the background heartbeat task (which
        // would race this test's own BEAT) is never spawned.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let sent = String::from_utf8_lossy(&buf[..n]);
            assert!(sent.starts_with("BEAT "));
            assert!(sent.contains("\"current_state\":\"quiet\""));
            sock.write_all(b"+OK\r\n").await.unwrap();
        });

        let client = Client::new(ClientConfig {
            url: Some(format!("tcp://{}:{}", addr.ip(), addr.port())),
            role: Role::Consumer,
            ..Default::default()
        })
        .unwrap();

        let conn = Connection::connect(&addr.ip().to_string(), addr.port(), client.shared.timeout)
            .await
            .unwrap();
        *client.shared.conn.lock().await = Some(conn);
        client.set_state(State::Identified).unwrap();
        client.set_state(State::Quiet).unwrap();

        client.beat().await.unwrap();
        assert_eq!(client.state(), State::Identified);
    }
}
