//! Single reachability check against one target.
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, warn};
use tokio::{
    io::AsyncWriteExt,
    net::{lookup_host, TcpStream, UdpSocket},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::device::Target;
use crate::input::{Protocol, DEFAULT_EXHAUSTION_RETRIES};

// EMFILE and ENFILE share these values on Linux and the BSDs.
const EMFILE: i32 = 24;
const ENFILE: i32 = 23;

/// How a probe ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The connection was established and closed again.
    Open,
    /// The target refused, timed out or could not be routed to.
    Closed,
    /// The attempt failed for a reason that says nothing about the target,
    /// or an established connection could not be shut down.
    TransportError(String),
    /// The process kept running out of file descriptors.
    RetriesExhausted {
        /// Connection attempts made, the first one included.
        attempts: u32,
    },
    /// The scan was cancelled before the probe finished.
    Cancelled,
}

impl Outcome {
    /// Whether the target counts as reachable.
    pub fn is_open(&self) -> bool {
        matches!(self, Outcome::Open)
    }
}

enum Failure {
    Exhausted,
    Unreachable,
    Other,
}

fn classify(error: &io::Error) -> Failure {
    if matches!(error.raw_os_error(), Some(EMFILE | ENFILE))
        || error.to_string().to_lowercase().contains("too many open files")
    {
        return Failure::Exhausted;
    }

    match error.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::AddrNotAvailable => Failure::Unreachable,
        _ => Failure::Other,
    }
}

/// Probes targets with a per-attempt timeout.
///
/// When the local process cannot allocate a socket the probe sleeps for the
/// timeout and tries the same target again, up to `exhaustion_retries`
/// times. The caller keeps its limiter permit for the whole call, so a
/// shortage slows down new probe starts instead of being worked around.
#[derive(Debug, Clone)]
pub struct PortProbe {
    timeout: Duration,
    exhaustion_retries: u32,
}

impl PortProbe {
    /// Builds a probe waiting `timeout` per attempt and retrying at most
    /// `exhaustion_retries` times after running out of file descriptors.
    pub fn new(timeout: Duration, exhaustion_retries: u32) -> Self {
        Self {
            timeout,
            exhaustion_retries,
        }
    }

    /// Runs the check, returning early with [`Outcome::Cancelled`] once
    /// `cancel` fires.
    pub async fn probe(&self, target: &Target, cancel: &CancellationToken) -> Outcome {
        let mut attempts = 0;
        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                result = self.attempt(target) => result,
            };

            let error = match result {
                Ok(outcome) => {
                    debug!("{target} {outcome:?} after {attempts} attempt(s)");
                    return outcome;
                }
                Err(error) => error,
            };

            match classify(&error) {
                Failure::Exhausted if attempts > self.exhaustion_retries => {
                    warn!("Giving up on {target} after {attempts} attempts: {error}");
                    return Outcome::RetriesExhausted { attempts };
                }
                Failure::Exhausted => {
                    warn!(
                        "Out of file descriptors probing {target}, retrying in {:?}",
                        self.timeout
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Outcome::Cancelled,
                        _ = time::sleep(self.timeout) => {}
                    }
                }
                Failure::Unreachable => {
                    debug!("{target} closed: {error}");
                    return Outcome::Closed;
                }
                Failure::Other => {
                    return Outcome::TransportError(format!("{error} {target}"));
                }
            }
        }
    }

    async fn attempt(&self, target: &Target) -> io::Result<Outcome> {
        match target.protocol {
            Protocol::Tcp => self.tcp_attempt(target).await,
            Protocol::Udp => self.udp_attempt(target).await,
        }
    }

    async fn tcp_attempt(&self, target: &Target) -> io::Result<Outcome> {
        let stream = self.connect(target).await?;
        debug!("Connection was successful, shutting down stream {target}");

        if let Err(e) = { stream }.shutdown().await {
            return Ok(Outcome::TransportError(format!(
                "failed to close connection to {target}: {e}"
            )));
        }
        Ok(Outcome::Open)
    }

    /// Performs the connection to the target with timeout. Name resolution
    /// counts against the same timeout.
    async fn connect(&self, target: &Target) -> io::Result<TcpStream> {
        time::timeout(
            self.timeout,
            TcpStream::connect((target.address.as_str(), target.port)),
        )
        .await?
    }

    /// Sends an empty datagram and waits for any answer. Resolution and the
    /// wait share one deadline, one timeout after the attempt starts.
    /// Silence counts as closed, as does an ICMP port unreachable surfacing
    /// as a refused receive.
    async fn udp_attempt(&self, target: &Target) -> io::Result<Outcome> {
        let deadline = Instant::now() + self.timeout;
        let remote = resolve(target, deadline).await?;
        let socket = self.udp_bind(remote).await?;

        socket.connect(remote).await?;
        socket.send(&[]).await?;

        let mut buf = [0u8; 1024];
        match time::timeout_at(deadline, socket.recv(&mut buf)).await {
            Ok(Ok(size)) => {
                debug!("Received {size} bytes from {target}");
                Ok(Outcome::Open)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(Outcome::Closed),
        }
    }

    async fn udp_bind(&self, remote: SocketAddr) -> io::Result<UdpSocket> {
        let local: SocketAddr = match remote {
            SocketAddr::V4(_) => (std::net::Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        UdpSocket::bind(local).await
    }
}

async fn resolve(target: &Target, deadline: Instant) -> io::Result<SocketAddr> {
    time::timeout_at(deadline, lookup_host((target.address.as_str(), target.port)))
        .await??
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", target.address),
            )
        })
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(crate::input::DEFAULT_TIMEOUT_MS),
            DEFAULT_EXHAUSTION_RETRIES,
        )
    }
}

/// Probes one target with the default retry bound and no cancellation.
pub async fn probe(target: &Target, timeout: Duration) -> Outcome {
    PortProbe::new(timeout, DEFAULT_EXHAUSTION_RETRIES)
        .probe(target, &CancellationToken::new())
        .await
}
