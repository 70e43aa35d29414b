// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::TransportError;
use crate::events::{ConsoleEvent, EventBus};
use crate::sync::traits::{ConnectionLost, HOME, TransferProgress, Transport, is_connection_lost};

const DEFAULT_FTP_PORT: u16 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Listing,
    CreatingDir,
    Transferring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Connect,
    Login,
    ChangeDir,
    List,
    MakeDir,
    Upload,
    Remove,
    Download,
    Close,
}

/// Handle for one dispatched remote operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteOp {
    pub id: Uuid,
    pub kind: OpKind,
    pub description: String,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Host, port and user the session is logged in as
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    username: String,
}

/// Await `fut`, giving up after `limit` when one is set
///
/// An expired deadline leaves the server's reply unread, so it is reported
/// as a lost connection.
pub async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            anyhow::Error::new(ConnectionLost(format!(
                "No answer from server within {}s",
                limit.as_secs_f32()
            )))
        })?,
        None => fut.await,
    }
}

/// Split `host[:port]` (optionally with an `ftp://` scheme) into its parts
pub fn parse_endpoint(server_url: &str) -> Result<(String, u16), TransportError> {
    let trimmed = server_url.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("ftp://{}", trimmed)
    };
    let invalid = |message: String| TransportError {
        operation: format!("Connect to {}", server_url),
        message,
    };

    let url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let port = url.port().unwrap_or(DEFAULT_FTP_PORT);
    Ok((host.to_string(), port))
}

/// Connection state machine over a `Transport`
///
/// Operations run one at a time. Each is dispatched as a `RemoteOp`, and its
/// completion is published on the event bus under the same id.
pub struct SyncSession {
    transport: Box<dyn Transport>,
    state: SessionState,
    endpoint: Option<Endpoint>,
    op_timeout: Option<Duration>,
    events: EventBus,
}

impl SyncSession {
    pub fn new(transport: Box<dyn Transport>, op_timeout: Option<Duration>, events: EventBus) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            endpoint: None,
            op_timeout,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Session state change");
            self.state = state;
            self.events.publish(ConsoleEvent::StateChanged { state });
        }
    }

    fn dispatch(&self, kind: OpKind, description: String) -> RemoteOp {
        let op = RemoteOp {
            id: Uuid::new_v4(),
            kind,
            description,
        };
        debug!(id = %op.id, kind = ?op.kind, "{}", op.description);
        op
    }

    /// Report the outcome of `op` and convert its error
    fn complete<T>(&self, op: &RemoteOp, result: anyhow::Result<T>) -> Result<T, TransportError> {
        match result {
            Ok(value) => {
                debug!(id = %op.id, "{} finished", op.description);
                self.events.publish(ConsoleEvent::OperationFinished {
                    id: op.id,
                    description: op.description.clone(),
                    success: true,
                    error: None,
                });
                Ok(value)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(id = %op.id, error = %message, "{} failed", op.description);
                self.events.publish(ConsoleEvent::OperationFinished {
                    id: op.id,
                    description: op.description.clone(),
                    success: false,
                    error: Some(message.clone()),
                });
                Err(TransportError {
                    operation: op.description.clone(),
                    message,
                })
            }
        }
    }

    /// Like `complete`, but a lost connection also resets the session so the
    /// next login reconnects
    async fn settle<T>(&mut self, op: &RemoteOp, result: anyhow::Result<T>) -> Result<T, TransportError> {
        let lost = result.as_ref().is_err_and(is_connection_lost);
        let outcome = self.complete(op, result);
        if lost {
            self.drop_connection().await;
        }
        outcome
    }

    async fn drop_connection(&mut self) {
        warn!("Connection to release server lost, next login reconnects");
        if let Err(e) = with_deadline(self.op_timeout, self.transport.close()).await {
            debug!(error = %format!("{:#}", e), "Close after lost connection");
        }
        self.endpoint = None;
        self.set_state(SessionState::Disconnected);
    }

    fn require_authenticated(&self, operation: &str) -> Result<(), TransportError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(TransportError {
                operation: operation.to_string(),
                message: "not logged in".to_string(),
            })
        }
    }

    fn progress_reporter(&self, op: &RemoteOp) -> impl Fn(TransferProgress) + Send + Sync + use<> {
        let events = self.events.clone();
        let description = op.description.clone();
        move |progress: TransferProgress| {
            events.publish(ConsoleEvent::Progress {
                description: description.clone(),
                done: progress.done,
                total: progress.total,
            });
        }
    }

    /// Connect and authenticate, reusing a live session for the same endpoint
    pub async fn login(
        &mut self,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> Result<(), TransportError> {
        let (host, port) = parse_endpoint(server_url)?;
        let endpoint = Endpoint {
            host,
            port,
            username: username.to_string(),
        };

        if self.is_authenticated() && self.endpoint.as_ref() == Some(&endpoint) {
            debug!(host = %endpoint.host, "Reusing authenticated session");
            return Ok(());
        }
        if self.state != SessionState::Disconnected {
            self.close().await?;
        }

        let op = self.dispatch(
            OpKind::Connect,
            format!("Connect to {}:{}", endpoint.host, endpoint.port),
        );
        self.set_state(SessionState::Connecting);
        let result = with_deadline(
            self.op_timeout,
            self.transport.connect(&endpoint.host, endpoint.port),
        )
        .await;
        if let Err(e) = self.complete(&op, result) {
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }
        self.set_state(SessionState::Connected);

        let op = self.dispatch(OpKind::Login, format!("Log in as {}", username));
        self.set_state(SessionState::Authenticating);
        let result = with_deadline(self.op_timeout, self.transport.login(username, password)).await;
        if let Err(e) = self.complete(&op, result) {
            if let Err(close_err) = self.transport.close().await {
                debug!(error = %close_err, "Close after failed login");
            }
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }

        info!(host = %endpoint.host, port = endpoint.port, username, "Logged in to release server");
        self.endpoint = Some(endpoint);
        self.set_state(SessionState::Authenticated);
        Ok(())
    }

    async fn change_dir(&mut self, path: &str) -> Result<RemoteOp, TransportError> {
        let op = self.dispatch(OpKind::ChangeDir, format!("Change directory to {}", path));
        let result = with_deadline(self.op_timeout, self.transport.cd(path)).await;
        self.settle(&op, result).await?;
        Ok(op)
    }

    /// Make sure every segment of `path` exists, creating missing ones in order
    ///
    /// Each level is listed once before deciding whether to create it. The
    /// session returns to the home directory afterwards.
    pub async fn ensure_remote_directory(&mut self, path: &str) -> Result<(), TransportError> {
        self.require_authenticated(&format!("Ensure directory {}", path))?;

        self.walk_and_create(path).await?;
        self.change_dir(HOME).await?;
        Ok(())
    }

    async fn walk_and_create(&mut self, path: &str) -> Result<(), TransportError> {
        let root = if path.starts_with('/') { "/" } else { HOME };
        self.change_dir(root).await?;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let op = self.dispatch(OpKind::List, format!("List directory before {}", segment));
            self.set_state(SessionState::Listing);
            let result = with_deadline(self.op_timeout, self.transport.list(".")).await;
            self.set_state(SessionState::Authenticated);
            let entries = self.settle(&op, result).await?;

            if !entries.iter().any(|e| e.is_dir && e.name == segment) {
                let op = self.dispatch(OpKind::MakeDir, format!("Create directory {}", segment));
                self.set_state(SessionState::CreatingDir);
                let result = with_deadline(self.op_timeout, self.transport.mkdir(segment)).await;
                self.set_state(SessionState::Authenticated);
                self.settle(&op, result).await?;
                info!(segment, "Created remote directory");
            }

            self.change_dir(segment).await?;
        }
        Ok(())
    }

    pub async fn upload(&mut self, data: &[u8], remote_path: &str) -> Result<RemoteOp, TransportError> {
        let description = format!("Upload {} ({} bytes)", remote_path, data.len());
        self.require_authenticated(&description)?;

        let op = self.dispatch(OpKind::Upload, description);
        let progress = self.progress_reporter(&op);
        self.set_state(SessionState::Transferring);
        let result = with_deadline(self.op_timeout, self.transport.put(data, remote_path, &progress)).await;
        self.set_state(SessionState::Authenticated);
        self.settle(&op, result).await?;
        Ok(op)
    }

    pub async fn remove(&mut self, remote_path: &str) -> Result<RemoteOp, TransportError> {
        let description = format!("Remove {}", remote_path);
        self.require_authenticated(&description)?;

        let op = self.dispatch(OpKind::Remove, description);
        self.set_state(SessionState::Transferring);
        let result = with_deadline(self.op_timeout, self.transport.remove(remote_path)).await;
        self.set_state(SessionState::Authenticated);
        self.settle(&op, result).await?;
        Ok(op)
    }

    pub async fn download(&mut self, remote_path: &str) -> Result<Vec<u8>, TransportError> {
        let description = format!("Download {}", remote_path);
        self.require_authenticated(&description)?;

        let op = self.dispatch(OpKind::Download, description);
        let progress = self.progress_reporter(&op);
        self.set_state(SessionState::Transferring);
        let result = with_deadline(self.op_timeout, self.transport.get(remote_path, &progress)).await;
        self.set_state(SessionState::Authenticated);
        self.settle(&op, result).await
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        let op = self.dispatch(OpKind::Close, "Close connection".to_string());
        let result = with_deadline(self.op_timeout, self.transport.close()).await;
        self.endpoint = None;
        self.set_state(SessionState::Disconnected);
        self.complete(&op, result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sync::traits::{ProgressFn, RemoteEntry};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Arc, Mutex};

    /// In-memory server: a directory tree plus a call log
    #[derive(Debug, Default)]
    pub(crate) struct MockState {
        pub calls: Vec<String>,
        pub dirs: BTreeSet<String>,
        pub files: HashMap<String, Vec<u8>>,
        pub cwd: String,
        pub fail_paths: Vec<String>,
        pub reject_login: bool,
        pub hang_on_connect: bool,
        pub hang_on_remove: bool,

        /// Fail the next command as if the server hung up
        pub drop_connection: bool,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            let transport = Self::default();
            {
                let mut state = transport.state.lock().unwrap();
                state.dirs.insert("/".to_string());
                state.dirs.insert("/home".to_string());
                state.cwd = "/home".to_string();
            }
            transport
        }

        pub fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn fail_on(&self, fragment: &str) {
            self.state.lock().unwrap().fail_paths.push(fragment.to_string());
        }
    }

    fn resolve(cwd: &str, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else if cwd == "/" {
            format!("/{}", path)
        } else {
            format!("{}/{}", cwd, path)
        }
    }

    fn check(state: &MockState, path: &str) -> anyhow::Result<()> {
        if state.drop_connection {
            return Err(ConnectionLost("Connection closed by server".to_string()).into());
        }
        if state.fail_paths.iter().any(|f| path.contains(f.as_str())) {
            anyhow::bail!("550 Permission denied: {}", path);
        }
        Ok(())
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self, host: &str, port: u16) -> anyhow::Result<()> {
            let hang = {
                let mut state = self.state.lock().unwrap();
                state.calls.push(format!("connect {}:{}", host, port));
                state.hang_on_connect
            };
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn login(&mut self, username: &str, _password: &str) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("login {}", username));
            if state.reject_login {
                anyhow::bail!("530 Login incorrect");
            }
            Ok(())
        }

        async fn cd(&mut self, path: &str) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("cd {}", path));
            let target = if path == HOME {
                "/home".to_string()
            } else {
                resolve(&state.cwd, path)
            };
            if !state.dirs.contains(&target) {
                anyhow::bail!("550 No such directory: {}", target);
            }
            state.cwd = target;
            Ok(())
        }

        async fn list(&mut self, path: &str) -> anyhow::Result<Vec<RemoteEntry>> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("list {}", path));
            let dir = resolve(&state.cwd, path).trim_end_matches("/.").to_string();
            let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
            Ok(state
                .dirs
                .iter()
                .filter_map(|d| d.strip_prefix(prefix.as_str()))
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(|name| RemoteEntry {
                    name: name.to_string(),
                    is_dir: true,
                    size: 0,
                })
                .collect())
        }

        async fn mkdir(&mut self, name: &str) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("mkdir {}", name));
            let target = resolve(&state.cwd, name);
            check(&state, &target)?;
            state.dirs.insert(target);
            Ok(())
        }

        async fn put(
            &mut self,
            data: &[u8],
            remote_path: &str,
            progress: ProgressFn<'_>,
        ) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("put {}", remote_path));
            check(&state, remote_path)?;
            let total = data.len() as u64;
            progress(TransferProgress { done: total, total });
            state.files.insert(remote_path.to_string(), data.to_vec());
            Ok(())
        }

        async fn remove(&mut self, remote_path: &str) -> anyhow::Result<()> {
            let hang = {
                let mut state = self.state.lock().unwrap();
                state.calls.push(format!("remove {}", remote_path));
                check(&state, remote_path)?;
                state.files.remove(remote_path);
                state.hang_on_remove
            };
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn get(&mut self, remote_path: &str, _progress: ProgressFn<'_>) -> anyhow::Result<Vec<u8>> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("get {}", remote_path));
            state
                .files
                .get(remote_path)
                .cloned()
                .ok_or_else(|| anyhow!("550 No such file: {}", remote_path))
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.state.lock().unwrap().calls.push("close".to_string());
            Ok(())
        }
    }

    pub(crate) async fn logged_in_session(mock: &MockTransport) -> SyncSession {
        let mut session = SyncSession::new(Box::new(mock.clone()), None, EventBus::new());
        session.login("ftp.example.com", "tester", "secret").await.unwrap();
        session
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("ftp.example.com").unwrap(), ("ftp.example.com".into(), 21));
        assert_eq!(parse_endpoint("ftp.example.com:2121").unwrap(), ("ftp.example.com".into(), 2121));
        assert_eq!(parse_endpoint("ftp://10.0.0.5:990/").unwrap(), ("10.0.0.5".into(), 990));
        assert!(parse_endpoint("").is_err());
    }

    #[tokio::test]
    async fn test_login_then_reuse() {
        let mock = MockTransport::new();
        let mut session = logged_in_session(&mock).await;
        assert_eq!(session.state(), SessionState::Authenticated);

        session.login("ftp.example.com", "tester", "secret").await.unwrap();
        let connects = mock.calls().iter().filter(|c| c.starts_with("connect")).count();
        assert_eq!(connects, 1);

        session.login("other.example.com", "tester", "secret").await.unwrap();
        let calls = mock.calls();
        assert!(calls.contains(&"close".to_string()));
        assert!(calls.contains(&"connect other.example.com:21".to_string()));
    }

    #[tokio::test]
    async fn test_login_failure_disconnects() {
        let mock = MockTransport::new();
        mock.state.lock().unwrap().reject_login = true;
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut session = SyncSession::new(Box::new(mock.clone()), None, events);

        let err = session.login("ftp.example.com", "tester", "bad").await.unwrap_err();
        assert!(err.message.contains("530"));
        assert_eq!(session.state(), SessionState::Disconnected);

        let mut failed = None;
        while let Ok(event) = rx.try_recv() {
            if let ConsoleEvent::OperationFinished { success: false, description, .. } = event {
                failed = Some(description);
            }
        }
        assert_eq!(failed.as_deref(), Some("Log in as tester"));
    }

    #[tokio::test]
    async fn test_connect_deadline() {
        let mock = MockTransport::new();
        mock.state.lock().unwrap().hang_on_connect = true;
        let mut session = SyncSession::new(
            Box::new(mock.clone()),
            Some(Duration::from_millis(20)),
            EventBus::new(),
        );

        let err = session.login("ftp.example.com", "tester", "secret").await.unwrap_err();
        assert!(err.message.contains("No answer"));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_ensure_remote_directory_lists_each_level_once() {
        let mock = MockTransport::new();
        mock.state.lock().unwrap().dirs.insert("/home/a".to_string());
        let mut session = logged_in_session(&mock).await;

        session.ensure_remote_directory("a/b/c").await.unwrap();

        let calls = mock.calls();
        let walk: Vec<&str> = calls
            .iter()
            .skip_while(|c| !c.starts_with("cd"))
            .map(String::as_str)
            .collect();
        assert_eq!(
            walk,
            vec![
                "cd ~", "list .", "cd a", "list .", "mkdir b", "cd b", "list .", "mkdir c", "cd c",
                "cd ~",
            ]
        );
        assert_eq!(calls.iter().filter(|c| c.starts_with("list")).count(), 3);
        assert!(mock.state.lock().unwrap().dirs.contains("/home/a/b/c"));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_ensure_absolute_directory_starts_at_root() {
        let mock = MockTransport::new();
        let mut session = logged_in_session(&mock).await;

        session.ensure_remote_directory("/releases/Linux64bit/").await.unwrap();

        let calls = mock.calls();
        assert!(calls.contains(&"cd /".to_string()));
        assert!(mock.state.lock().unwrap().dirs.contains("/releases/Linux64bit"));
    }

    #[tokio::test]
    async fn test_ensure_directory_failure_keeps_session() {
        let mock = MockTransport::new();
        mock.fail_on("/home/locked");
        let mut session = logged_in_session(&mock).await;

        let err = session.ensure_remote_directory("locked/inner").await.unwrap_err();
        assert!(err.operation.contains("locked"));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_operations_require_login() {
        let mock = MockTransport::new();
        let mut session = SyncSession::new(Box::new(mock.clone()), None, EventBus::new());

        assert!(session.upload(b"x", "/a").await.is_err());
        assert!(session.remove("/a").await.is_err());
        assert!(session.download("/a").await.is_err());
        assert!(session.ensure_remote_directory("a").await.is_err());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_upload_reports_progress_and_completion() {
        let mock = MockTransport::new();
        let events = EventBus::new();
        let mut session = SyncSession::new(Box::new(mock.clone()), None, events.clone());
        session.login("ftp.example.com", "tester", "secret").await.unwrap();
        let mut rx = events.subscribe();

        let op = session.upload(b"payload", "/releases/app.zip").await.unwrap();
        assert_eq!(op.kind, OpKind::Upload);

        let mut saw_progress = false;
        let mut finished = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                ConsoleEvent::Progress { done, total, .. } => saw_progress = done == total && total == 7,
                ConsoleEvent::OperationFinished { id, success, .. } => finished = Some((id, success)),
                _ => {}
            }
        }
        assert!(saw_progress);
        assert_eq!(finished, Some((op.id, true)));
        assert_eq!(
            mock.state.lock().unwrap().files.get("/releases/app.zip").map(Vec::as_slice),
            Some(&b"payload"[..])
        );
    }

    #[tokio::test]
    async fn test_download_and_close() {
        let mock = MockTransport::new();
        mock.state
            .lock()
            .unwrap()
            .files
            .insert("/info/releases.xml".to_string(), b"<root/>".to_vec());
        let mut session = logged_in_session(&mock).await;

        assert_eq!(session.download("/info/releases.xml").await.unwrap(), b"<root/>");
        let err = session.download("/info/none.xml").await.unwrap_err();
        assert!(err.operation.contains("none.xml"));
        assert_eq!(session.state(), SessionState::Authenticated);

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_lost_connection_forces_reconnect() {
        let mock = MockTransport::new();
        let mut session = logged_in_session(&mock).await;

        mock.state.lock().unwrap().drop_connection = true;
        let err = session.remove("/releases/a.zip").await.unwrap_err();
        assert!(err.message.contains("closed by server"));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(mock.calls().contains(&"close".to_string()));

        mock.state.lock().unwrap().drop_connection = false;
        session.login("ftp.example.com", "tester", "secret").await.unwrap();
        let connects = mock.calls().iter().filter(|c| c.starts_with("connect")).count();
        assert_eq!(connects, 2);
        session.remove("/releases/a.zip").await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_deadline_during_operation_disconnects() {
        let mock = MockTransport::new();
        mock.state.lock().unwrap().hang_on_remove = true;
        let mut session = SyncSession::new(
            Box::new(mock.clone()),
            Some(Duration::from_millis(20)),
            EventBus::new(),
        );
        session.login("ftp.example.com", "tester", "secret").await.unwrap();

        let err = session.remove("/releases/a.zip").await.unwrap_err();
        assert!(err.message.contains("No answer"));
        assert_eq!(session.state(), SessionState::Disconnected);

        mock.state.lock().unwrap().hang_on_remove = false;
        session.login("ftp.example.com", "tester", "secret").await.unwrap();
        assert_eq!(mock.calls().iter().filter(|c| c.starts_with("connect")).count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_command_keeps_session() {
        let mock = MockTransport::new();
        mock.fail_on("locked");
        let mut session = logged_in_session(&mock).await;

        assert!(session.remove("/releases/locked.zip").await.is_err());
        assert_eq!(session.state(), SessionState::Authenticated);

        session.login("ftp.example.com", "tester", "secret").await.unwrap();
        assert_eq!(mock.calls().iter().filter(|c| c.starts_with("connect")).count(), 1);
    }
}
