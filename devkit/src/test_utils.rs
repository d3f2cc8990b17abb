/*!
Test harness for keastat collection tests

Bundles a mock Control Agent and a mock carbon receiver, with helpers to
script whole collection cycles and to wait for emitted lines.
*/

use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

use crate::carbon_stub::MockCarbon;
use crate::kea_fixtures::KeaFixtures;
use crate::kea_stub::MockControlAgent;

/// `(statistic name, samples)` pairs answered by the mock agent
pub type ScriptedStatistics<'a> = &'a [(&'a str, &'a [(i64, &'a str)])];

pub struct TestHarness {
    pub agent: MockControlAgent,
    pub carbon: MockCarbon,
}

impl TestHarness {
    pub async fn start() -> Result<Self> {
        env_logger::try_init().ok();

        let harness = Self {
            agent: MockControlAgent::start().await?,
            carbon: MockCarbon::start().await?,
        };
        log::info!("🧪 Test harness ready (kea {}, carbon port {})", harness.agent.url(), harness.carbon.port());
        Ok(harness)
    }

    /// Script a cycle whose configuration does not change
    pub fn script_consistent_cycle(&self, config: Value, statistics: ScriptedStatistics<'_>) {
        self.script_drifting_cycle(config.clone(), config, statistics);
    }

    /// Script a cycle whose second `config-get` answers `after`
    pub fn script_drifting_cycle(&self, before: Value, after: Value, statistics: ScriptedStatistics<'_>) {
        self.agent.enqueue_json(KeaFixtures::config_get_response(before));
        self.agent.enqueue_json(KeaFixtures::config_get_response(after));
        for (name, samples) in statistics {
            self.agent.set_statistic(name, samples);
        }
    }

    /// Wait for exactly `count` carbon lines
    pub async fn expect_lines(&self, count: usize, timeout_ms: u64) -> Result<Vec<String>> {
        let lines = self.carbon.wait_for_lines(count, Duration::from_millis(timeout_ms)).await;
        if lines.len() != count {
            anyhow::bail!("expected {} carbon lines, got {}: {:?}", count, lines.len(), lines);
        }
        log::info!("✅ Received {} carbon lines", count);
        Ok(lines)
    }

    /// Wait the whole window and fail if any carbon line arrived
    pub async fn expect_no_lines(&self, window_ms: u64) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(window_ms)).await;
        let lines = self.carbon.lines();
        if !lines.is_empty() {
            anyhow::bail!("expected no carbon lines, got {}: {:?}", lines.len(), lines);
        }
        Ok(())
    }

    /// Forget the carbon lines received so far. Scripted Kea answers stay queued.
    pub fn reset(&self) {
        self.carbon.clear();
        log::info!("🧹 Test harness reset");
    }
}
