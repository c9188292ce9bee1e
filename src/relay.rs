//! Relay engine.
//!
//! Every [`ForwardingRule`] gets its own listener task bound on all
//! interfaces. Each accepted connection is handed to a separate task that
//! dials `target:target_port` and splices the two sockets together until
//! either direction stops. When one direction stops, both sockets close
//! right away. The relay does not wait for the other direction to drain.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, Either};
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};

use crate::{Error, ForwardingRule, Result, RuleSet};

/// Ceiling on a single outbound connect attempt.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the engine needs, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub target: String,
    pub rules: Vec<ForwardingRule>,
    pub dial_timeout: Duration,
}

impl RelayConfig {
    pub fn new(target: impl Into<String>, rules: Vec<ForwardingRule>) -> Self {
        Self {
            target: target.into(),
            rules,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }
}

impl From<RuleSet> for RelayConfig {
    fn from(set: RuleSet) -> Self {
        let (target, rules) = set.into_parts();
        Self::new(target, rules)
    }
}

/// Runs one listener per rule.
#[derive(Debug)]
pub struct Relay {
    rules: Vec<ForwardingRule>,
    shared: Arc<Shared>,
}

/// Read-only settings plus the connection sequence counter, shared by all
/// listener and connection tasks.
#[derive(Debug)]
struct Shared {
    target: String,
    dial_timeout: Duration,
    seq: AtomicU64,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            rules: config.rules,
            shared: Arc::new(Shared {
                target: config.target,
                dial_timeout: config.dial_timeout,
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// A forwarder for `rule` sharing this engine's target and counter.
    pub fn forwarder(&self, rule: ForwardingRule) -> Forwarder {
        Forwarder {
            rule,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawns every rule and waits for all of them to exit.
    ///
    /// A rule only exits on a bind or accept error, and that error stays
    /// local to the rule.
    pub async fn run(self) {
        let handles = self
            .rules
            .iter()
            .map(|rule| {
                debug!("starting rule {rule} for {}", self.shared.target);
                let forwarder = self.forwarder(*rule);
                tokio::spawn(async move {
                    let tag = forwarder.tag().to_string();
                    if let Err(e) = forwarder.run().await {
                        error!("{tag}: {e}");
                    }
                })
            })
            .collect::<Vec<_>>();

        for joined in future::join_all(handles).await {
            if let Err(e) = joined {
                error!("listener task failed: {e}");
            }
        }
    }
}

/// Listener lifecycle for a single rule.
#[derive(Debug)]
pub struct Forwarder {
    rule: ForwardingRule,
    shared: Arc<Shared>,
}

impl Forwarder {
    /// Binds `0.0.0.0:listen_port`.
    pub async fn bind(self) -> Result<BoundForwarder> {
        let port = self.rule.listen_port();
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|source| Error::Bind { port, source })?;

        info!(
            "forwarding connection: {} -> {}:{}",
            port,
            self.shared.target,
            self.rule.target_port()
        );

        Ok(BoundForwarder {
            listener,
            forwarder: self,
        })
    }

    /// Binds, then accepts until the listener fails.
    pub async fn run(self) -> Result<()> {
        self.bind().await?.serve().await
    }

    fn tag(&self) -> Tag<'_> {
        Tag {
            rule: self.rule,
            target: &self.shared.target,
            seq: None,
        }
    }
}

/// A rule whose listening socket is open.
#[derive(Debug)]
pub struct BoundForwarder {
    listener: TcpListener,
    forwarder: Forwarder,
}

impl BoundForwarder {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Each connection is relayed on its own task, so this
    /// never waits on a dial or a splice.
    ///
    /// Returns only when `accept` fails; the listening socket is closed on
    /// return.
    pub async fn serve(self) -> Result<()> {
        let rule = self.forwarder.rule;
        loop {
            let (inbound, peer) = self
                .listener
                .accept()
                .await
                .map_err(|source| Error::Accept {
                    port: rule.listen_port(),
                    source,
                })?;

            let shared = Arc::clone(&self.forwarder.shared);
            let seq = shared.next_seq();
            tokio::spawn(async move {
                handle_connection(rule, &shared, seq, inbound, peer).await;
            });
        }
    }
}

async fn handle_connection(
    rule: ForwardingRule,
    shared: &Shared,
    seq: u64,
    inbound: TcpStream,
    peer: SocketAddr,
) {
    let tag = Tag {
        rule,
        target: &shared.target,
        seq: Some(seq),
    };

    let outbound = match dial(&shared.target, rule.target_port(), shared.dial_timeout).await {
        Ok(outbound) => outbound,
        Err(e) => {
            error!("{tag}: {e}");
            // Dropping `inbound` closes it.
            return;
        }
    };

    info!("{tag}: forwarding connection from {peer}");
    let (direction, copied) = splice(inbound, outbound).await;
    match copied {
        Ok(bytes) => debug!("{tag}: {direction} finished first after {bytes} bytes, closed"),
        Err(e) => debug!("{tag}: {direction} stopped: {e}, closed"),
    }
}

/// Connects to `host:port`, giving up after `timeout`.
///
/// `host` may be a name or an address literal; IPv6 literals need no
/// brackets.
pub async fn dial(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let target = || format!("{host}:{port}");
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(Error::Dial {
            target: target(),
            source,
        }),
        Err(_) => Err(Error::DialTimeout {
            target: target(),
            timeout,
        }),
    }
}

/// Copy direction within a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted client to dialed target.
    Upstream,
    /// Dialed target to accepted client.
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("client->target"),
            Direction::Downstream => f.write_str("target->client"),
        }
    }
}

/// Copies bytes both ways until the first direction ends, by EOF or error.
///
/// Returns which direction ended and how that copy finished. Both sockets
/// are closed when this returns; the other direction is abandoned.
pub async fn splice(
    mut inbound: TcpStream,
    mut outbound: TcpStream,
) -> (Direction, std::io::Result<u64>) {
    let (mut in_read, mut in_write) = inbound.split();
    let (mut out_read, mut out_write) = outbound.split();

    let upstream = tokio::io::copy(&mut in_read, &mut out_write);
    let downstream = tokio::io::copy(&mut out_read, &mut in_write);
    futures::pin_mut!(upstream, downstream);

    match future::select(upstream, downstream).await {
        Either::Left((copied, _)) => (Direction::Upstream, copied),
        Either::Right((copied, _)) => (Direction::Downstream, copied),
    }
}

/// Log prefix: `[80 -> host:8080]`, or `[80 -> host:8080 no:7]` for a
/// connection.
struct Tag<'a> {
    rule: ForwardingRule,
    target: &'a str,
    seq: Option<u64>,
}

impl fmt::Display for Tag<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} -> {}:{}",
            self.rule.listen_port(),
            self.target,
            self.rule.target_port()
        )?;
        if let Some(seq) = self.seq {
            write!(f, " no:{seq}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn rule(listen: u16, target: u16) -> ForwardingRule {
        ForwardingRule::new(listen, target).unwrap()
    }

    #[test]
    fn tag_format() {
        let tag = Tag {
            rule: rule(80, 8080),
            target: "example.com",
            seq: None,
        };
        assert_eq!(tag.to_string(), "[80 -> example.com:8080]");

        let tag = Tag {
            seq: Some(3),
            ..tag
        };
        assert_eq!(tag.to_string(), "[80 -> example.com:8080 no:3]");
    }

    #[test]
    fn config_from_rule_set() {
        let set = RuleSet::parse(&["example.com", "80", "1-2"]).unwrap();
        let config = RelayConfig::from(set);
        assert_eq!(config.target, "example.com");
        assert_eq!(config.rules, vec![rule(80, 80), rule(1, 2)]);
        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT);
    }

    #[test]
    fn sequence_is_monotonic() {
        let relay = Relay::new(RelayConfig::new("h", vec![rule(1, 1)]));
        let a = relay.shared.next_seq();
        let b = relay.shared.next_seq();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn forwarders_share_the_counter() {
        let relay = Relay::new(RelayConfig::new("h", vec![rule(1, 1), rule(2, 2)]));
        let first = relay.forwarder(rule(1, 1));
        let second = relay.forwarder(rule(2, 2));
        first.shared.next_seq();
        assert_eq!(second.shared.next_seq(), 2);
    }

    #[tokio::test]
    async fn dial_refused() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = dial("127.0.0.1", port, DEFAULT_DIAL_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dial { .. }), "got {err:?}");
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn splice_relays_both_ways() {
        // client <-> inbound ==splice== outbound <-> server
        let (mut client, inbound) = socket_pair().await;
        let (outbound, mut server) = socket_pair().await;
        let session = tokio::spawn(splice(inbound, outbound));

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.write_all(b"world").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(client);
        let (direction, copied) = session.await.unwrap();
        assert_eq!(direction, Direction::Upstream);
        assert_eq!(copied.unwrap(), 5);

        // The outbound side was closed along with the inbound side.
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn splice_ends_when_target_closes() {
        let (mut client, inbound) = socket_pair().await;
        let (outbound, server) = socket_pair().await;
        let session = tokio::spawn(splice(inbound, outbound));

        drop(server);
        let (direction, _) = session.await.unwrap();
        assert_eq!(direction, Direction::Downstream);

        let mut buf = [0u8; 1];
        let closed = matches!(client.read(&mut buf).await, Ok(0) | Err(_));
        assert!(closed);
    }
}
