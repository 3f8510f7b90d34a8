use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Connector;
use crate::api::client::config::Host;
use crate::error::GaussWireResult;

/// Reports the coordinators currently serving the cluster.
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn active_coordinators(&self, connector: &Connector) -> GaussWireResult<Vec<Host>>;
}

/// Reads the active coordinators from the `pgxc_node` catalog through a
/// fresh connection of the connector.
#[derive(Debug, Clone, Copy, new)]
pub struct PgxcNodeSource {
    /// Read the elastic addresses `node_host1`/`node_port1`.
    using_eip: bool,
}

impl PgxcNodeSource {
    fn query(&self) -> &'static str {
        if self.using_eip {
            "select node_host1,node_port1 from pgxc_node where node_type='C' and nodeis_active = true order by node_host1;"
        } else {
            "select node_host,node_port from pgxc_node where node_type='C' and nodeis_active = true order by node_host;"
        }
    }
}

#[async_trait]
impl TopologySource for PgxcNodeSource {
    async fn active_coordinators(&self, connector: &Connector) -> GaussWireResult<Vec<Host>> {
        let mut conn = connector.connect().await?;
        let result = conn.simple_query(self.query()).await;
        if let Err(e) = conn.close().await {
            debug!("failed to close topology connection: {e}");
        }

        let mut nodes = Vec::new();
        for row in result?.into_iter().flat_map(|r| r.into_rows()) {
            let host = row.get::<String>(0);
            let port = row.get::<i32>(1);
            match (host, port) {
                (Ok(Some(host)), Ok(Some(port))) => match u16::try_from(port) {
                    Ok(port) => {
                        debug!("active coordinator {} {host}:{port}", nodes.len() + 1);
                        nodes.push(Host::new(host, port));
                    }
                    Err(_) => warn!("skipping coordinator {host} with invalid port {port}"),
                },
                (host, port) => warn!("skipping coordinator row {host:?} {port:?}"),
            }
        }
        Ok(nodes)
    }
}

/// Refresh the connector's node list every `interval` until `token` is
/// cancelled or the connector is gone.
pub(super) fn spawn_refresh(
    connector: Weak<Connector>,
    source: Arc<dyn TopologySource>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("refreshing the coordinator list every {interval:?}");
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes at once, the list was just refreshed
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(connector) = connector.upgrade() else {
                        break;
                    };
                    if let Err(e) = connector.refresh_nodes(source.as_ref()).await {
                        error!("failed to refresh the coordinator list: {e}");
                    }
                }
            }
        }
        info!("stopped refreshing the coordinator list");
    })
}
