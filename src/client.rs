//! Telnet client for the DX cluster feed.
//!
//! This module owns the TCP connection to the cluster, including the
//! login handshake and streaming of spot data, and the supervisor loop
//! that keeps reconnecting with backoff until shutdown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ClusterConfig;
use crate::parser::{looks_like_spot, parse_spot};
use crate::spot::Spot;
use crate::stats::BridgeStats;
use crate::telnet;

/// Delay before the login callsign is sent unprompted. Some cluster
/// software never emits a recognizable login prompt.
pub const LOGIN_DELAY: Duration = Duration::from_secs(2);

/// Events surfaced by the cluster client.
#[derive(Debug)]
pub enum ClusterEvent {
    /// A spot was parsed from the feed.
    Spot(Spot),

    /// A session reached the cluster.
    Connected,

    /// A session ended; the supervisor handles the retry.
    Disconnected(String),
}

/// Session failures. The supervisor backs off on these; everything in
/// [`SessionEnd`] is a normal termination and resets the backoff.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("timed out connecting to {addr}")]
    ConnectTimeout { addr: String },

    #[error("cluster read failed: {0}")]
    Read(std::io::Error),

    #[error("cluster write failed: {0}")]
    Write(std::io::Error),
}

/// Ways a session ends once connected, none of which count as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cluster closed the connection (zero-length read).
    RemoteClosed,

    /// No line arrived within the read timeout.
    ReadTimeout,

    /// A shutdown request interrupted the session.
    Shutdown,
}

/// Async DX cluster client with reconnect supervision.
pub struct ClusterClient {
    config: ClusterConfig,
    stats: Arc<BridgeStats>,
    shutdown: watch::Receiver<bool>,
}

impl ClusterClient {
    /// Create a new client. The watch channel carries the bridge-wide
    /// shutdown request.
    pub fn new(
        config: ClusterConfig,
        stats: Arc<BridgeStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            stats,
            shutdown,
        }
    }

    /// Spawn the reconnect supervisor.
    ///
    /// Returns the event stream and the supervisor task handle; the
    /// channel closes when the supervisor stops.
    pub fn spawn(self, backoff: Backoff) -> (mpsc::Receiver<ClusterEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1000);
        let handle = tokio::spawn(async move {
            self.supervise(tx, backoff).await;
        });
        (rx, handle)
    }

    /// Run sessions in a loop until shutdown.
    ///
    /// A failed session waits out the current backoff delay (growing it
    /// for the next failure); a session that connected and later ended
    /// resets the delay and reconnects immediately. Shutdown exits the
    /// loop with no retry and no backoff change.
    async fn supervise(mut self, tx: mpsc::Sender<ClusterEvent>, mut backoff: Backoff) {
        while !*self.shutdown.borrow() {
            match self.run_session(&tx).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(end) => {
                    backoff.on_success();
                    let reason = match end {
                        SessionEnd::ReadTimeout => "read timeout",
                        _ => "connection closed",
                    };
                    if tx
                        .send(ClusterEvent::Disconnected(reason.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    self.stats.record_reconnect();
                    let delay = backoff.on_failure();
                    warn!("cluster connection error: {} (retrying in {:?})", e, delay);
                    if tx
                        .send(ClusterEvent::Disconnected(e.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    tokio::select! {
                        _ = self.shutdown.changed() => {
                            if *self.shutdown.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        debug!("cluster supervisor stopped");
    }

    /// Run one session: connect, authenticate, stream until it ends.
    async fn run_session(&mut self, tx: &mpsc::Sender<ClusterEvent>) -> Result<SessionEnd, SessionError> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Ok(SessionEnd::Shutdown);
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("connecting to cluster {}", addr);

        let connect_timeout = Duration::from_secs_f64(self.config.connect_timeout);
        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(SessionError::Connect { addr, source }),
            Err(_) => return Err(SessionError::ConnectTimeout { addr }),
        };

        info!("connected to cluster {}", addr);
        let _ = tx.send(ClusterEvent::Connected).await;

        let read_timeout = Duration::from_secs_f64(self.config.read_timeout);
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::with_capacity(256);

        let mut login_sent = false;
        let mut password_sent = false;

        // The delayed-login timer races prompt detection; whichever
        // fires first sends the callsign, the login_sent flag keeps the
        // two triggers idempotent. Dropping the session drops the timer.
        let login_timer = tokio::time::sleep(LOGIN_DELAY);
        tokio::pin!(login_timer);
        let mut login_timer_armed = !self.config.user.is_empty();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                _ = &mut login_timer, if login_timer_armed => {
                    login_timer_armed = false;
                    if !login_sent {
                        send_line(&mut writer, &self.config.user)
                            .await
                            .map_err(SessionError::Write)?;
                        login_sent = true;
                        debug!("login sent after delay");
                    }
                }
                read = timeout(read_timeout, reader.read_until(b'\n', &mut raw)) => {
                    match read {
                        Err(_) => {
                            info!("cluster read timeout, reconnecting");
                            return Ok(SessionEnd::ReadTimeout);
                        }
                        Ok(Err(e)) => return Err(SessionError::Read(e)),
                        Ok(Ok(0)) => {
                            info!("cluster connection closed");
                            return Ok(SessionEnd::RemoteClosed);
                        }
                        Ok(Ok(_)) => {
                            let text = telnet::sanitize(&raw);
                            // A cancelled read leaves partial bytes in the
                            // buffer; only a completed line may clear it.
                            raw.clear();
                            let line = text.trim();
                            if line.is_empty() {
                                continue;
                            }
                            self.stats.record_line();

                            let consumed = handle_prompt(
                                &self.config,
                                line,
                                &mut writer,
                                &mut login_sent,
                                &mut password_sent,
                            )
                            .await
                            .map_err(SessionError::Write)?;
                            if consumed {
                                continue;
                            }

                            if !looks_like_spot(line) {
                                self.stats.record_non_spot();
                                debug!("non-spot line: {}", line);
                                continue;
                            }
                            match parse_spot(line) {
                                Some(spot) => {
                                    self.stats.record_spot(&spot);
                                    if tx.send(ClusterEvent::Spot(spot)).await.is_err() {
                                        // Receiver gone: the bridge is going down.
                                        return Ok(SessionEnd::Shutdown);
                                    }
                                }
                                None => {
                                    self.stats.record_parse_failure();
                                    debug!("unparseable spot-like line: {}", line);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Answer login/password prompts.
///
/// Returns `true` when the line was consumed by the handshake and must
/// not reach the parser.
async fn handle_prompt<W>(
    config: &ClusterConfig,
    line: &str,
    writer: &mut W,
    login_sent: &mut bool,
    password_sent: &mut bool,
) -> std::io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let lower = line.to_lowercase();

    if !config.user.is_empty()
        && !*login_sent
        && (lower.contains("login") || lower.contains("call"))
    {
        send_line(writer, &config.user).await?;
        *login_sent = true;
        debug!("login sent in response to prompt");
        return Ok(true);
    }

    if !config.password.is_empty() && !*password_sent && lower.contains("password") {
        send_line(writer, &config.password).await?;
        *password_sent = true;
        debug!("password sent in response to prompt");
        return Ok(true);
    }

    Ok(false)
}

/// Send one newline-terminated line to the cluster.
async fn send_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spot::Mode;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn test_config(port: u16, user: &str) -> ClusterConfig {
        ClusterConfig {
            host: "127.0.0.1".to_string(),
            port,
            user: user.to_string(),
            password: String::new(),
            connect_timeout: 5.0,
            read_timeout: 5.0,
        }
    }

    fn small_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_handle_prompt_sends_login_once() {
        let config = ClusterConfig {
            user: "W1AW".to_string(),
            ..Default::default()
        };
        let (mut near, mut far) = tokio::io::duplex(256);
        let mut login_sent = false;
        let mut password_sent = false;

        let consumed = handle_prompt(
            &config,
            "Please enter your call:",
            &mut near,
            &mut login_sent,
            &mut password_sent,
        )
        .await
        .unwrap();
        assert!(consumed);
        assert!(login_sent);

        let mut buf = [0u8; 5];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"W1AW\n");

        // A later line mentioning "login" is no longer consumed.
        let consumed = handle_prompt(
            &config,
            "last login from somewhere",
            &mut near,
            &mut login_sent,
            &mut password_sent,
        )
        .await
        .unwrap();
        assert!(!consumed);
    }

    #[tokio::test]
    async fn test_handle_prompt_sends_password() {
        let config = ClusterConfig {
            user: "W1AW".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        };
        let (mut near, mut far) = tokio::io::duplex(256);
        let mut login_sent = true;
        let mut password_sent = false;

        let consumed = handle_prompt(
            &config,
            "Password:",
            &mut near,
            &mut login_sent,
            &mut password_sent,
        )
        .await
        .unwrap();
        assert!(consumed);
        assert!(password_sent);

        let mut buf = [0u8; 7];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"secret\n");
    }

    #[tokio::test]
    async fn test_handle_prompt_without_credentials() {
        let config = ClusterConfig::default();
        let (mut near, _far) = tokio::io::duplex(256);
        let mut login_sent = false;
        let mut password_sent = false;

        let consumed = handle_prompt(
            &config,
            "Please enter your login:",
            &mut near,
            &mut login_sent,
            &mut password_sent,
        )
        .await
        .unwrap();
        assert!(!consumed);
        assert!(!login_sent);
    }

    #[tokio::test]
    async fn test_session_login_and_spot_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"Welcome to the test cluster\r\nPlease enter your call:\r\n")
                .await
                .unwrap();

            let mut reader = BufReader::new(&mut sock);
            let mut login = String::new();
            reader.read_line(&mut login).await.unwrap();
            assert_eq!(login.trim(), "TEST");

            sock.write_all(b"DX de W1AW: 14074.0 JA1ABC FT8 good signal\r\n")
                .await
                .unwrap();
            // Leave the line in flight, then close.
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let stats = Arc::new(BridgeStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = ClusterClient::new(test_config(port, "TEST"), stats.clone(), shutdown_rx);
        let (mut events, handle) = client.spawn(small_backoff());

        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(ClusterEvent::Connected) => {}
            other => panic!("expected Connected, got {:?}", other),
        }

        let spot = loop {
            match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
                Some(ClusterEvent::Spot(spot)) => break spot,
                Some(ClusterEvent::Disconnected(reason)) => {
                    panic!("disconnected before spot: {}", reason)
                }
                Some(ClusterEvent::Connected) => continue,
                None => panic!("event channel closed early"),
            }
        };
        assert_eq!(spot.spotter, "W1AW");
        assert_eq!(spot.call, "JA1ABC");
        assert_eq!(spot.freq_hz, 14_074_000);
        assert_eq!(spot.mode, Mode::Ft8);
        assert_eq!(spot.band, "20m");

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_idle_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Hold the connection open, sending nothing, until the
            // client goes away.
            let mut buf = [0u8; 64];
            while sock.read(&mut buf).await.unwrap_or(0) > 0 {}
        });

        let stats = Arc::new(BridgeStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = ClusterClient::new(test_config(port, ""), stats.clone(), shutdown_rx);
        let (mut events, handle) = client.spawn(small_backoff());

        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(ClusterEvent::Connected) => {}
            other => panic!("expected Connected, got {:?}", other),
        }

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        // Shutdown is not a failure: no reconnect was recorded.
        assert_eq!(
            stats
                .reconnects
                .load(std::sync::atomic::Ordering::Relaxed),
            0
        );

        // The channel closes without further Disconnected noise.
        assert!(
            timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .is_none()
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_backs_off_and_retries() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let stats = Arc::new(BridgeStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = ClusterClient::new(test_config(port, ""), stats.clone(), shutdown_rx);
        let (mut events, handle) = client.spawn(small_backoff());

        // At least two failed attempts prove the retry loop is running.
        for _ in 0..2 {
            match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
                Some(ClusterEvent::Disconnected(reason)) => {
                    assert!(reason.contains("connect"), "unexpected reason: {}", reason);
                }
                other => panic!("expected Disconnected, got {:?}", other),
            }
        }
        assert!(
            stats
                .reconnects
                .load(std::sync::atomic::Ordering::Relaxed)
                >= 2
        );

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
