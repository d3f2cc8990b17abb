//! Statistics collection cycle
//!
//! One cycle against one Control Agent:
//!
//! ```text
//! START -> CONFIG_FETCHED_1 -> STATS_COLLECTED -> CONFIG_FETCHED_2 -> CONSISTENT   -> DONE
//!                                                                  \-> INCONSISTENT -> DONE
//! ```
//!
//! Kea names statistics after subnet ids, and ids may be reassigned to other
//! prefixes by a reconfiguration. The configuration is therefore read before
//! and after the statistics, and metrics are only trusted when both reads
//! agree on the (id, prefix) pairs.

use futures::stream::{self, StreamExt, TryStreamExt};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::{CollectorConfig, TargetConfig};
use crate::error::{CollectionError, KeaError};
use crate::kea::{ConfigDrift, ConfigSnapshot, ControlAgentClient, IpVersion};
use crate::metrics::{statistic_name, DhcpMetric, DhcpMetricKey, StatisticPoint, TRACKED_STATISTICS};
use crate::sink::MetricSink;

/// What to drop when the configuration changed during a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscardPolicy {
    /// Drop every metric of the cycle
    #[default]
    WholeCycle,
    /// Drop metrics of subnets that were removed or re-prefixed, keep the rest
    AffectedSubnets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Start,
    ConfigFetched1,
    StatsCollected,
    ConfigFetched2,
    Consistent,
    Inconsistent,
    Done,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Start => "START",
            CycleState::ConfigFetched1 => "CONFIG_FETCHED_1",
            CycleState::StatsCollected => "STATS_COLLECTED",
            CycleState::ConfigFetched2 => "CONFIG_FETCHED_2",
            CycleState::Consistent => "CONSISTENT",
            CycleState::Inconsistent => "INCONSISTENT",
            CycleState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Outcome of a cycle that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    Consistent {
        emitted: usize,
    },
    /// The subnets changed between the two configuration reads
    Drifted {
        drift: ConfigDrift,
        emitted: usize,
        suppressed: usize,
    },
    /// The second configuration read was refused, nothing could be verified
    Unverified {
        result: i64,
        text: String,
        suppressed: usize,
    },
}

impl CycleReport {
    pub fn emitted(&self) -> usize {
        match self {
            CycleReport::Consistent { emitted } | CycleReport::Drifted { emitted, .. } => *emitted,
            CycleReport::Unverified { .. } => 0,
        }
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, CycleReport::Consistent { .. })
    }
}

/// Answer to a `config-get`
enum ConfigRead {
    Snapshot(ConfigSnapshot),
    Refused { result: i64, text: String },
}

/// A metric together with the id of the subnet it was fetched for
struct Collected {
    subnet_id: u32,
    metric: DhcpMetric,
}

/// Single-shot collection cycle. `run` consumes the collector.
pub struct StatisticsCollector {
    client: ControlAgentClient,
    version: IpVersion,
    policy: DiscardPolicy,
    concurrency: usize,
    state: CycleState,
}

impl StatisticsCollector {
    pub fn new(client: ControlAgentClient, version: IpVersion) -> Self {
        Self {
            client,
            version,
            policy: DiscardPolicy::default(),
            concurrency: 1,
            state: CycleState::Start,
        }
    }

    pub fn for_target(target: &TargetConfig, settings: &CollectorConfig) -> Result<Self, KeaError> {
        let client = ControlAgentClient::for_target(target)?;
        Ok(Self::new(client, target.dhcp_version)
            .with_policy(settings.discard_policy)
            .with_concurrency(settings.statistic_concurrency))
    }

    pub fn with_policy(mut self, policy: DiscardPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn advance(&mut self, next: CycleState) {
        debug!("{}: {} -> {}", self.client.url(), self.state, next);
        self.state = next;
    }

    /// Run the cycle and hand trustworthy metrics to `sink`.
    ///
    /// An `Err` means the cycle was aborted and nothing was emitted.
    pub async fn run<S>(mut self, sink: &mut S) -> Result<CycleReport, CollectionError>
    where
        S: MetricSink + Send,
    {
        let before = match self.read_config().await? {
            ConfigRead::Snapshot(snapshot) => snapshot,
            ConfigRead::Refused { result, text } => {
                return Err(CollectionError::ConfigUnavailable { result, text })
            }
        };
        if before.is_empty() {
            return Err(CollectionError::NoSubnets);
        }
        self.advance(CycleState::ConfigFetched1);

        let collected = self.collect_statistics(&before).await?;
        self.advance(CycleState::StatsCollected);

        let after = match self.read_config().await? {
            ConfigRead::Snapshot(snapshot) if snapshot.is_empty() => {
                return Err(CollectionError::NoSubnets)
            }
            ConfigRead::Snapshot(snapshot) => snapshot,
            ConfigRead::Refused { result, text } => {
                self.advance(CycleState::ConfigFetched2);
                self.advance(CycleState::Inconsistent);
                error!(
                    "Could not re-read the configuration of {} after fetching metrics \
                     (result {}: {}); discarding {} metrics",
                    self.client.url(),
                    result,
                    text,
                    collected.len()
                );
                self.advance(CycleState::Done);
                return Ok(CycleReport::Unverified { result, text, suppressed: collected.len() });
            }
        };
        self.advance(CycleState::ConfigFetched2);

        let report = match ConfigDrift::between(&before, &after) {
            None => {
                self.advance(CycleState::Consistent);
                let metrics: Vec<DhcpMetric> = collected.into_iter().map(|c| c.metric).collect();
                emit(sink, &metrics).await?;
                info!("Emitted {} metrics from {}", metrics.len(), self.client.url());
                CycleReport::Consistent { emitted: metrics.len() }
            }
            Some(drift) => {
                self.advance(CycleState::Inconsistent);
                error!(
                    "Subnet configuration of {} was modified during metric fetching ({}), \
                     metrics may be associated with the wrong subnet",
                    self.client.url(),
                    drift
                );
                let total = collected.len();
                let kept: Vec<DhcpMetric> = match self.policy {
                    DiscardPolicy::WholeCycle => Vec::new(),
                    DiscardPolicy::AffectedSubnets => collected
                        .into_iter()
                        .filter(|c| drift.is_stable(c.subnet_id, c.metric.subnet_prefix))
                        .map(|c| c.metric)
                        .collect(),
                };
                emit(sink, &kept).await?;
                warn!("Discarded {} of {} metrics from {}", total - kept.len(), total, self.client.url());
                CycleReport::Drifted { drift, emitted: kept.len(), suppressed: total - kept.len() }
            }
        };

        self.advance(CycleState::Done);
        Ok(report)
    }

    async fn read_config(&self) -> Result<ConfigRead, KeaError> {
        let response = self.client.config_get(self.version).await?;
        if !response.success() {
            return Ok(ConfigRead::Refused { result: response.result, text: response.text });
        }

        let snapshot = ConfigSnapshot::from_arguments(&response.arguments)?;
        if snapshot.ip_version != self.version {
            return Err(KeaError::MalformedConfig(format!(
                "asked for a {} configuration, got {}",
                self.version, snapshot.ip_version
            )));
        }
        debug!(
            "{} lists {} subnets (hash {:?})",
            self.client.url(),
            snapshot.subnets.len(),
            snapshot.config_hash
        );
        Ok(ConfigRead::Snapshot(snapshot))
    }

    async fn collect_statistics(&self, snapshot: &ConfigSnapshot) -> Result<Vec<Collected>, KeaError> {
        let requests: Vec<(u32, IpNet, String, DhcpMetricKey)> = snapshot
            .subnets
            .iter()
            .flat_map(|subnet| {
                TRACKED_STATISTICS
                    .iter()
                    .map(move |&(kea_key, key)| (subnet.id, subnet.prefix, statistic_name(subnet.id, kea_key), key))
            })
            .collect();

        let answers: Vec<_> = stream::iter(requests)
            .map(|(id, prefix, name, key)| async move {
                let response = self.client.statistic_get(self.version, &name).await?;
                Ok::<_, KeaError>((id, prefix, key, name, response))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let mut collected = Vec::new();
        for (id, prefix, key, name, response) in answers {
            if !response.success() {
                debug!("No data for '{}' of {}", name, prefix);
                continue;
            }
            let points = StatisticPoint::series(&response.arguments, &name);
            if points.is_empty() {
                warn!(
                    "Could not fetch metric '{}' for subnet {} from {}: '{}' is empty",
                    key,
                    prefix,
                    self.client.url(),
                    name
                );
                continue;
            }
            collected.extend(points.into_iter().map(|point| Collected {
                subnet_id: id,
                metric: DhcpMetric::new(point, prefix, key),
            }));
        }
        Ok(collected)
    }
}

async fn emit<S>(sink: &mut S, metrics: &[DhcpMetric]) -> Result<(), CollectionError>
where
    S: MetricSink + Send,
{
    if metrics.is_empty() {
        return Ok(());
    }
    sink.emit(metrics).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use keastat_devkit::{KeaFixtures, MockControlAgent};
    use serde_json::{json, Value};
    use std::time::Duration;

    const TS1: &str = "2024-05-01 10:00:00.000001";
    const TS2: &str = "2024-05-01 10:05:00.000001";

    fn two_subnets() -> Value {
        KeaFixtures::dhcp4_config(
            vec![KeaFixtures::subnet(1, "192.0.2.0/24")],
            vec![vec![KeaFixtures::subnet(2, "198.51.100.0/24")]],
        )
    }

    fn collector(agent: &MockControlAgent) -> StatisticsCollector {
        let client = ControlAgentClient::new(agent.url(), Duration::from_secs(5)).unwrap();
        StatisticsCollector::new(client, IpVersion::V4)
    }

    /// Register statistics for subnets 1 and 2; subnet 2 has no declined series.
    fn register_statistics(agent: &MockControlAgent) {
        agent.set_statistic("subnet[1].total-addresses", &[(254, TS1)]);
        agent.set_statistic("subnet[1].assigned-addresses", &[(10, TS1), (12, TS2)]);
        agent.set_statistic("subnet[1].declined-addresses", &[(0, TS1)]);
        agent.set_statistic("subnet[2].total-addresses", &[(100, TS1)]);
        agent.set_statistic("subnet[2].assigned-addresses", &[(7, TS1)]);
        agent.set_statistic("subnet[2].declined-addresses", &[]);
    }

    #[tokio::test]
    async fn test_consistent_cycle_emits_every_point() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        register_statistics(&agent);

        let mut sink = MemorySink::new();
        let report = collector(&agent).run(&mut sink).await.unwrap();

        assert_eq!(report, CycleReport::Consistent { emitted: 6 });
        let metrics = sink.metrics();
        assert_eq!(metrics.len(), 6);

        let subnet1: ipnet::IpNet = "192.0.2.0/24".parse().unwrap();
        let assigned: Vec<i64> = metrics
            .iter()
            .filter(|m| m.subnet_prefix == subnet1 && m.key == DhcpMetricKey::Assigned)
            .map(|m| m.value)
            .collect();
        assert_eq!(assigned, vec![10, 12]);
        assert!(!metrics
            .iter()
            .any(|m| m.subnet_prefix.to_string() == "198.51.100.0/24" && m.key == DhcpMetricKey::Declined));

        // config-get brackets all 6 statistic-get calls
        let commands = agent.commands();
        assert_eq!(commands.len(), 8);
        assert_eq!(commands.first().map(String::as_str), Some("config-get"));
        assert_eq!(commands.last().map(String::as_str), Some("config-get"));
        assert!(commands[1..7].iter().all(|c| c == "statistic-get"));
    }

    #[tokio::test]
    async fn test_drift_suppresses_whole_cycle() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_json(KeaFixtures::config_get_response(KeaFixtures::dhcp4_config(
            vec![KeaFixtures::subnet(1, "192.0.2.0/24")],
            vec![vec![KeaFixtures::subnet(2, "203.0.113.0/24")]],
        )));
        register_statistics(&agent);

        let mut sink = MemorySink::new();
        let report = collector(&agent).run(&mut sink).await.unwrap();

        match report {
            CycleReport::Drifted { drift, emitted, suppressed } => {
                assert_eq!(emitted, 0);
                assert_eq!(suppressed, 6);
                assert_eq!(drift.reprefixed.len(), 1);
            }
            other => panic!("expected drift, got {other:?}"),
        }
        assert!(sink.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_added_subnet_is_drift() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_json(KeaFixtures::config_get_response(KeaFixtures::dhcp4_config(
            vec![KeaFixtures::subnet(1, "192.0.2.0/24"), KeaFixtures::subnet(3, "10.0.0.0/8")],
            vec![vec![KeaFixtures::subnet(2, "198.51.100.0/24")]],
        )));
        register_statistics(&agent);

        let mut sink = MemorySink::new();
        let report = collector(&agent).run(&mut sink).await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.emitted(), 0);
        assert!(sink.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_affected_subnets_policy_keeps_stable_subnets() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_json(KeaFixtures::config_get_response(KeaFixtures::dhcp4_config(
            vec![KeaFixtures::subnet(1, "192.0.2.0/24")],
            vec![],
        )));
        register_statistics(&agent);

        let mut sink = MemorySink::new();
        let report = collector(&agent)
            .with_policy(DiscardPolicy::AffectedSubnets)
            .run(&mut sink)
            .await
            .unwrap();

        assert_eq!(report.emitted(), 4);
        assert!(sink
            .metrics()
            .iter()
            .all(|m| m.subnet_prefix.to_string() == "192.0.2.0/24"));
    }

    #[tokio::test]
    async fn test_refused_second_config_suppresses_emission() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_json(KeaFixtures::error_response(1, "no config"));
        register_statistics(&agent);

        let mut sink = MemorySink::new();
        let report = collector(&agent).run(&mut sink).await.unwrap();

        assert_eq!(
            report,
            CycleReport::Unverified { result: 1, text: "no config".to_string(), suppressed: 6 }
        );
        assert!(sink.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_refused_first_config_aborts() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::error_response(2, "'config-get' command not supported"));

        let mut sink = MemorySink::new();
        let err = collector(&agent).run(&mut sink).await.unwrap_err();
        assert!(matches!(err, CollectionError::ConfigUnavailable { result: 2, .. }));
        assert_eq!(agent.commands(), vec!["config-get"]);
    }

    #[tokio::test]
    async fn test_config_without_subnets_aborts() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(json!({"Dhcp4": {"subnet4": []}})));

        let mut sink = MemorySink::new();
        let err = collector(&agent).run(&mut sink).await.unwrap_err();
        assert!(matches!(err, CollectionError::NoSubnets));
    }

    #[tokio::test]
    async fn test_malformed_config_aborts() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(json!({"Dhcp4": {}, "Dhcp6": {}})));

        let mut sink = MemorySink::new();
        let err = collector(&agent).run(&mut sink).await.unwrap_err();
        assert!(matches!(err, CollectionError::Kea(KeaError::MalformedConfig(_))));
    }

    #[tokio::test]
    async fn test_wrong_version_config_aborts() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(KeaFixtures::dhcp6_config(
            vec![KeaFixtures::subnet(1, "2001:db8::/64")],
            vec![],
        )));

        let mut sink = MemorySink::new();
        let err = collector(&agent).run(&mut sink).await.unwrap_err();
        assert!(matches!(err, CollectionError::Kea(KeaError::MalformedConfig(_))));
    }

    #[tokio::test]
    async fn test_unsuccessful_statistic_is_skipped() {
        let config = KeaFixtures::dhcp4_config(vec![KeaFixtures::subnet(1, "192.0.2.0/24")], vec![]);
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(config.clone()));
        agent.enqueue_json(KeaFixtures::config_get_response(config));
        agent.set_statistic("subnet[1].total-addresses", &[(254, TS1)]);
        agent.set_statistic_response(
            "subnet[1].assigned-addresses",
            KeaFixtures::error_response(3, "no such statistic"),
        );
        agent.set_statistic_response(
            "subnet[1].declined-addresses",
            json!([{"result": 0, "arguments": {}}]),
        );

        let mut sink = MemorySink::new();
        let report = collector(&agent).run(&mut sink).await.unwrap();
        assert_eq!(report, CycleReport::Consistent { emitted: 1 });
        assert_eq!(sink.metrics()[0].key, DhcpMetricKey::Total);
    }

    #[tokio::test]
    async fn test_statistic_transport_error_aborts() {
        let config = KeaFixtures::dhcp4_config(vec![KeaFixtures::subnet(1, "192.0.2.0/24")], vec![]);
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(config));
        agent.enqueue_raw("502 Bad Gateway");

        let mut sink = MemorySink::new();
        let err = collector(&agent).run(&mut sink).await.unwrap_err();
        assert!(matches!(err, CollectionError::Kea(ref e) if e.is_transport()));
        assert!(sink.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_statistic_protocol_error_aborts() {
        let config = KeaFixtures::dhcp4_config(vec![KeaFixtures::subnet(1, "192.0.2.0/24")], vec![]);
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(config));
        agent.set_statistic("subnet[1].total-addresses", &[(254, TS1)]);
        agent.set_statistic_response("subnet[1].assigned-addresses", json!({"result": 0}));
        agent.set_statistic("subnet[1].declined-addresses", &[(0, TS1)]);

        let mut sink = MemorySink::new();
        let err = collector(&agent).run(&mut sink).await.unwrap_err();
        assert!(matches!(err, CollectionError::Kea(KeaError::Protocol { .. })));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_second_config_transport_error_aborts() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_raw("502 Bad Gateway");
        register_statistics(&agent);

        let mut sink = MemorySink::new();
        let err = collector(&agent).run(&mut sink).await.unwrap_err();
        assert!(matches!(err, CollectionError::Kea(ref e) if e.is_transport()));
        assert!(sink.is_empty());
        assert_eq!(agent.commands().iter().filter(|c| *c == "config-get").count(), 2);
    }

    #[tokio::test]
    async fn test_second_config_protocol_error_aborts() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_json(json!({"result": 0, "arguments": two_subnets()}));
        register_statistics(&agent);

        let mut sink = MemorySink::new();
        let err = collector(&agent).run(&mut sink).await.unwrap_err();
        assert!(matches!(err, CollectionError::Kea(KeaError::Protocol { .. })));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_dhcp6_cycle() {
        let config = KeaFixtures::dhcp6_config(vec![KeaFixtures::subnet(1, "2001:db8:1::/64")], vec![]);
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(config.clone()));
        agent.enqueue_json(KeaFixtures::config_get_response(config));
        agent.set_statistic("subnet[1].total-addresses", &[(65536, TS1)]);
        agent.set_statistic("subnet[1].assigned-addresses", &[]);
        agent.set_statistic("subnet[1].declined-addresses", &[]);

        let client = ControlAgentClient::new(agent.url(), Duration::from_secs(5)).unwrap();
        let mut sink = MemorySink::new();
        let report = StatisticsCollector::new(client, IpVersion::V6).run(&mut sink).await.unwrap();

        assert!(matches!(report, CycleReport::Consistent { .. }));
        assert_eq!(report.emitted(), 1);
        let metrics = sink.metrics();
        assert_eq!(metrics[0].key, DhcpMetricKey::Total);
        assert_eq!(metrics[0].value, 65536);
        assert_eq!(metrics[0].subnet_prefix, "2001:db8:1::/64".parse::<IpNet>().unwrap());

        let requests = agent.requests();
        assert_eq!(requests.len(), 5);
        assert!(requests.iter().all(|request| request["service"] == json!(["dhcp6"])));
    }

    #[tokio::test]
    async fn test_cycle_runs_on_spawned_task() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        register_statistics(&agent);

        let collector = collector(&agent).with_concurrency(2);
        let sink = MemorySink::new();
        let mut task_sink = sink.clone();
        let report = tokio::spawn(async move { collector.run(&mut task_sink).await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.emitted(), 6);
        assert_eq!(sink.len(), 6);
    }

    #[tokio::test]
    async fn test_concurrent_statistic_fetch() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        agent.enqueue_json(KeaFixtures::config_get_response(two_subnets()));
        register_statistics(&agent);

        let mut sink = MemorySink::new();
        let report = collector(&agent).with_concurrency(4).run(&mut sink).await.unwrap();
        assert_eq!(report.emitted(), 6);

        let commands = agent.commands();
        assert_eq!(commands.first().map(String::as_str), Some("config-get"));
        assert_eq!(commands.last().map(String::as_str), Some("config-get"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CycleState::ConfigFetched1.to_string(), "CONFIG_FETCHED_1");
        assert_eq!(CycleState::Done.to_string(), "DONE");
    }
}
