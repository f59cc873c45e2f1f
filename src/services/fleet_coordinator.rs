//! Fleet Coordinator
//!
//! Runs one [`StreamSupervisor`] per configured feed and one consumer task per
//! supervisor that forwards its snapshots into the shared [`MetricsSink`].
//! Feeds can be added and removed while the fleet is running.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::stream_supervisor::{SnapshotReceiver, StreamSupervisor};
use crate::config::{Config, SupervisorConfig};
use crate::errors::{AppError, AppResult};
use crate::metrics::MetricsSink;
use crate::models::{StreamTarget, SupervisorState};

struct FleetMember {
    supervisor: Arc<StreamSupervisor>,
    consumer: Option<JoinHandle<()>>,
}

impl FleetMember {
    /// Stop supervision and wait for the consumer to drain the channel
    async fn shutdown(mut self) -> Self {
        self.supervisor.stop().await;
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                error!("Consumer for {} failed: {}", self.supervisor.target(), e);
            }
        }
        self
    }
}

pub struct FleetCoordinator {
    settings: SupervisorConfig,
    sink: Arc<MetricsSink>,
    token: Mutex<Option<CancellationToken>>,
    members: Mutex<HashMap<String, FleetMember>>,
}

impl FleetCoordinator {
    pub fn new(config: &Config, sink: Arc<MetricsSink>) -> Self {
        let members = config
            .targets()
            .into_iter()
            .map(|target| {
                let address = target.address.clone();
                let member = FleetMember {
                    supervisor: Arc::new(StreamSupervisor::for_target(
                        target,
                        config.supervisor.clone(),
                    )),
                    consumer: None,
                };
                (address, member)
            })
            .collect();

        Self {
            settings: config.supervisor.clone(),
            sink,
            token: Mutex::new(None),
            members: Mutex::new(members),
        }
    }

    pub fn sink(&self) -> &Arc<MetricsSink> {
        &self.sink
    }

    /// Start every registered feed under a child of `parent`
    pub async fn start(&self, parent: &CancellationToken) -> AppResult<()> {
        let token = parent.child_token();
        *self.token.lock().await = Some(token.clone());

        let mut members = self.members.lock().await;
        for member in members.values_mut().filter(|m| m.consumer.is_none()) {
            self.launch(member, &token).await?;
        }

        info!("Monitoring {} streams", members.len());
        Ok(())
    }

    async fn launch(&self, member: &mut FleetMember, token: &CancellationToken) -> AppResult<()> {
        let rx = member.supervisor.start(token).await?;
        member.consumer = Some(tokio::spawn(consume(
            rx,
            member.supervisor.clone(),
            self.sink.clone(),
        )));
        Ok(())
    }

    /// Register a feed, starting it right away when the fleet is running
    pub async fn add_stream(&self, target: StreamTarget) -> AppResult<()> {
        let mut members = self.members.lock().await;
        if members.contains_key(&target.address) {
            return Err(AppError::configuration(format!(
                "stream {} is already monitored",
                target.address
            )));
        }

        let address = target.address.clone();
        let mut member = FleetMember {
            supervisor: Arc::new(StreamSupervisor::for_target(target, self.settings.clone())),
            consumer: None,
        };

        if let Some(token) = self.token.lock().await.clone() {
            self.launch(&mut member, &token).await?;
        }
        info!("Added stream {}", member.supervisor.target());
        members.insert(address, member);
        Ok(())
    }

    /// Stop a feed and delete its series; false if it was not monitored
    pub async fn remove_stream(&self, address: &str) -> bool {
        let Some(member) = self.members.lock().await.remove(address) else {
            warn!("Cannot remove unknown stream {}", address);
            return false;
        };

        member.shutdown().await;
        self.sink.remove_stream(address);
        info!("Removed stream {}", address);
        true
    }

    /// Cancel every supervisor and wait for all consumers to finish
    pub async fn stop(&self) {
        if let Some(token) = self.token.lock().await.take() {
            debug!("Cancelling fleet token");
            token.cancel();
        }

        let mut members = self.members.lock().await;
        let mut shutdowns = JoinSet::new();
        for (address, member) in members.drain() {
            shutdowns.spawn(async move { (address, member.shutdown().await) });
        }
        while let Some(result) = shutdowns.join_next().await {
            match result {
                Ok((address, member)) => {
                    members.insert(address, member);
                }
                Err(e) => error!("Stream shutdown task failed: {}", e),
            }
        }

        info!("All stream supervisors stopped");
    }

    pub async fn stream_count(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Current supervisor state per feed, ordered by address
    pub async fn stream_states(&self) -> Vec<(StreamTarget, SupervisorState)> {
        let members = self.members.lock().await;
        let mut states = Vec::with_capacity(members.len());
        for member in members.values() {
            states.push((member.supervisor.target().clone(), member.supervisor.state().await));
        }
        states.sort_by(|a, b| a.0.address.cmp(&b.0.address));
        states
    }
}

/// Forward snapshots of one supervisor into the sink until its channel closes
async fn consume(
    mut rx: SnapshotReceiver,
    supervisor: Arc<StreamSupervisor>,
    sink: Arc<MetricsSink>,
) {
    let target = supervisor.target().clone();
    while let Some(snapshot) = rx.recv().await {
        sink.update(&snapshot);
        sink.record_dropped(&target, supervisor.dropped_snapshots());
    }
    sink.record_dropped(&target, supervisor.dropped_snapshots());
    debug!("Snapshot channel of {} closed", target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> Config {
        let mut config = Config::from_toml_str(
            r#"
interface = "127.0.0.1"
metrics_port = 9090

[[streams]]
url = "239.0.0.1:1234"
description = "one"

[[streams]]
url = "239.0.0.2:1234"
description = "two"

[supervisor]
analyzer_command = "/nonexistent/tsmonitor-analyzer"
restart_delay = 1
"#,
        )
        .unwrap();
        config.validate().unwrap();
        config
    }

    #[tokio::test]
    async fn test_fleet_lifecycle() {
        let sink = Arc::new(MetricsSink::new().unwrap());
        let fleet = FleetCoordinator::new(&config(), sink);
        assert_eq!(fleet.stream_count().await, 2);

        let token = CancellationToken::new();
        assert_ok!(fleet.start(&token).await);

        let states = fleet.stream_states().await;
        assert_eq!(states[0].0.address, "239.0.0.1:1234");
        assert!(states.iter().all(|(_, s)| s.is_active()));

        assert_ok!(
            fleet
                .add_stream(StreamTarget::new("239.0.0.3:1234", "three", "127.0.0.1"))
                .await
        );
        assert_eq!(fleet.stream_count().await, 3);

        assert_err!(
            fleet
                .add_stream(StreamTarget::new("239.0.0.3:1234", "again", "127.0.0.1"))
                .await
        );

        assert!(fleet.remove_stream("239.0.0.1:1234").await);
        assert!(!fleet.remove_stream("239.0.0.1:1234").await);
        assert_eq!(fleet.stream_count().await, 2);

        fleet.stop().await;
        let states = fleet.stream_states().await;
        assert!(states.iter().all(|(_, s)| *s == SupervisorState::Stopped));
        // Only the fleet's own token is cancelled
        assert!(!token.is_cancelled());
    }
}
