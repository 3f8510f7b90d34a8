//! Dialing of a logical database spread over several coordinator nodes.
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info, warn};
use tokio::net::lookup_host;
use tokio_util::sync::CancellationToken;

use super::TlsConnector;
use super::client::connection::SessionCheck;
use super::client::{Connection, tls};
use crate::api::client::config::{BalancePolicy, Config, Host, SslMode};
use crate::api::client::hook::{ClientLogicFactory, ClientLogicHook};
use crate::error::{GaussWireError, GaussWireResult};

mod balancer;
mod refresh;

pub use refresh::{PgxcNodeSource, TopologySource};

use balancer::Balancer;

/// One dial attempt: a resolved address and whether to negotiate TLS on it.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub host: Host,
    /// `None` for unix sockets.
    pub addr: Option<SocketAddr>,
    pub tls: bool,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{} ({addr})", self.host)?,
            None => write!(f, "{}", self.host)?,
        }
        if self.tls {
            f.write_str(" with TLS")?;
        }
        Ok(())
    }
}

/// TLS attempts for one address, in order.
fn tls_ladder(mode: SslMode) -> &'static [bool] {
    match mode {
        SslMode::Disable => &[false],
        SslMode::Allow => &[false, true],
        SslMode::Prefer => &[true, false],
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => &[true],
    }
}

fn dedup_hosts(hosts: &[Host]) -> Vec<Host> {
    let mut seen = HashSet::new();
    hosts
        .iter()
        .filter(|host| seen.insert((*host).clone()))
        .cloned()
        .collect()
}

/// Resolve every node to its addresses and pair them with the TLS ladder.
///
/// Unresolvable nodes are skipped.
async fn expand_candidates(nodes: &[Host], mode: SslMode) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for host in nodes {
        if host.is_unix() {
            candidates.push(Candidate {
                host: host.clone(),
                addr: None,
                tls: false,
            });
            continue;
        }

        let addrs = match lookup_host((host.host.as_str(), host.port)).await {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!("failed to resolve {host}: {e}");
                continue;
            }
        };
        for addr in addrs {
            if !seen.insert(addr) {
                continue;
            }
            for tls in tls_ladder(mode) {
                candidates.push(Candidate {
                    host: host.clone(),
                    addr: Some(addr),
                    tls: *tls,
                });
            }
        }
    }
    candidates
}

/// Opens connections to the coordinators of one logical database.
///
/// Without a balance policy the configured hosts are tried in order. With
/// one, the node list is reordered before each dial and, once
/// [`Connector::start`] ran, refreshed from the cluster in the background.
pub struct Connector {
    config: Config,
    nodes: RwLock<Arc<Vec<Host>>>,
    balancer: Balancer,
    tls_connector: Option<TlsConnector>,
    client_logic: Option<Arc<dyn ClientLogicFactory>>,
    refresh: CancellationToken,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("nodes", &self.nodes())
            .field("balancer", &self.balancer)
            .field("client_logic", &self.client_logic.is_some())
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub fn new(config: Config) -> GaussWireResult<Connector> {
        let tls_connector = match config.ssl.mode {
            SslMode::Disable => None,
            _ => Some(tls::tls_connector(&config.ssl)?),
        };
        let nodes = dedup_hosts(&config.hosts);
        let balancer = Balancer::new(config.dist.balance_policy, nodes.clone());

        Ok(Connector {
            config,
            nodes: RwLock::new(Arc::new(nodes)),
            balancer,
            tls_connector,
            client_logic: None,
            refresh: CancellationToken::new(),
        })
    }

    /// Parse a URL or key/value connection string, reading libpq
    /// environment variables for missing settings.
    pub fn from_conn_str(conn_str: &str) -> GaussWireResult<Connector> {
        Connector::new(Config::parse(conn_str)?)
    }

    /// Register the engine creating one client logic hook per connection,
    /// required when `enable_ce` is set.
    pub fn with_client_logic(mut self, factory: Arc<dyn ClientLogicFactory>) -> Connector {
        self.client_logic = Some(factory);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot of the current coordinator list.
    pub fn nodes(&self) -> Arc<Vec<Host>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the coordinator list as a whole. An empty list is ignored.
    pub(crate) fn set_nodes(&self, nodes: Vec<Host>) {
        if nodes.is_empty() {
            warn!("no active coordinator reported, keeping the current list");
            return;
        }
        let nodes = dedup_hosts(&nodes);
        debug!("coordinator list is now {nodes:?}");
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(nodes);
    }

    /// Refresh the coordinator list once and keep refreshing it every
    /// `recheckTime` until [`Connector::close`] is called or the connector
    /// is dropped. Does nothing without a balance policy.
    pub async fn start(self) -> GaussWireResult<Arc<Connector>> {
        let source = PgxcNodeSource::new(self.config.dist.using_eip);
        self.start_with(Arc::new(source)).await
    }

    /// Like [`Connector::start`] with a custom source of active coordinators.
    pub async fn start_with(
        self,
        source: Arc<dyn TopologySource>,
    ) -> GaussWireResult<Arc<Connector>> {
        let connector = Arc::new(self);
        if connector.balancer.policy() == BalancePolicy::None {
            return Ok(connector);
        }
        connector.refresh_nodes(source.as_ref()).await?;
        refresh::spawn_refresh(
            Arc::downgrade(&connector),
            source,
            connector.config.dist.recheck_interval,
            connector.refresh.clone(),
        );
        Ok(connector)
    }

    pub(crate) async fn refresh_nodes(&self, source: &dyn TopologySource) -> GaussWireResult<()> {
        let nodes = source.active_coordinators(self).await?;
        self.set_nodes(nodes);
        Ok(())
    }

    /// Stop the background refresh.
    pub fn close(&self) {
        self.refresh.cancel();
    }

    fn client_logic_hook(&self) -> GaussWireResult<Option<Arc<dyn ClientLogicHook>>> {
        match (self.config.client_encryption, &self.client_logic) {
            (None, _) => Ok(None),
            (Some(_), Some(factory)) => factory.create(&self.config).map(Some),
            (Some(_), None) => Err(GaussWireError::ClientLogicUnavailable),
        }
    }

    /// Dial the coordinators in balanced order and return the first session
    /// satisfying `target_session_attrs`.
    ///
    /// An authentication failure stops the dial at once, any other failure
    /// moves on to the next candidate. `connect_timeout` bounds the whole
    /// dial, name resolution and every candidate included.
    pub async fn connect(&self) -> GaussWireResult<Connection> {
        if self.config.client_encryption.is_some() && self.client_logic.is_none() {
            return Err(GaussWireError::ClientLogicUnavailable);
        }

        match self.config.connect_timeout {
            Some(timeout) if !timeout.is_zero() => {
                tokio::time::timeout(timeout, self.dial()).await.map_err(|_| {
                    let nodes = self.nodes();
                    let nodes: Vec<String> = nodes.iter().map(Host::to_string).collect();
                    GaussWireError::ConnectTimeout(nodes.join(","))
                })?
            }
            _ => self.dial().await,
        }
    }

    async fn dial(&self) -> GaussWireResult<Connection> {
        let mut nodes = self.nodes().as_ref().clone();
        self.balancer.balance(&mut nodes);
        debug!("dial order {nodes:?}");

        let candidates = expand_candidates(&nodes, self.config.ssl.mode).await;
        if candidates.is_empty() {
            return Err(GaussWireError::NoCandidate);
        }

        let mut last_error = None;
        let mut fallback: Option<Connection> = None;
        for candidate in &candidates {
            match self.attempt(candidate).await {
                Ok((conn, SessionCheck::Accepted)) => {
                    info!("connected to {candidate}");
                    if let Some(mut primary) = fallback.take() {
                        close_quietly(&mut primary).await;
                    }
                    return Ok(conn);
                }
                Ok((mut conn, SessionCheck::PrimaryFallback)) => {
                    if fallback.is_none() {
                        debug!("keeping primary {candidate} as fallback");
                        fallback = Some(conn);
                    } else {
                        close_quietly(&mut conn).await;
                    }
                }
                Ok((mut conn, SessionCheck::Rejected)) => {
                    debug!("{candidate} does not satisfy target_session_attrs");
                    close_quietly(&mut conn).await;
                    last_error = Some(connect_failed(
                        candidate,
                        GaussWireError::SessionAttrsMismatch(
                            self.config.target_session_attrs.to_string(),
                        ),
                    ));
                }
                Err(e) => {
                    let auth_failure = e.is_auth_failure();
                    info!("failed to connect to {candidate}: {e}");
                    last_error = Some(connect_failed(candidate, e));
                    if auth_failure {
                        break;
                    }
                }
            }
        }

        match (fallback, last_error) {
            (Some(primary), Some(e)) if !e.is_auth_failure() => {
                info!("no standby available, using primary {}", primary.host());
                Ok(primary)
            }
            (Some(mut primary), Some(e)) => {
                close_quietly(&mut primary).await;
                Err(e)
            }
            (Some(primary), None) => Ok(primary),
            (None, e) => Err(e.unwrap_or(GaussWireError::NoCandidate)),
        }
    }

    /// Connect to one candidate and check its role.
    async fn attempt(&self, candidate: &Candidate) -> GaussWireResult<(Connection, SessionCheck)> {
        let hook = self.client_logic_hook()?;
        let mut conn =
            Connection::connect(&self.config, candidate, self.tls_connector.as_ref(), hook)
                .await?;
        let check = conn.validate_session().await?;
        Ok((conn, check))
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.refresh.cancel();
    }
}

fn connect_failed(candidate: &Candidate, e: GaussWireError) -> GaussWireError {
    GaussWireError::ConnectFailed {
        address: candidate.to_string(),
        source: Box::new(e),
    }
}

async fn close_quietly(conn: &mut Connection) {
    if let Err(e) = conn.close().await {
        debug!("failed to close {}: {e}", conn.host());
    }
}
