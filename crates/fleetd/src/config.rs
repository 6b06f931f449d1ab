//! Fleet configuration file.
//!
//! Loaded once at startup and turned into the plain config structs the
//! subsystems take at construction. Every section and field has a
//! default, so an empty file (or no file) yields a working dev setup.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use fleet_capacity::{EngineConfig, ScalingMode};
use fleet_reconciler::OrchestratorConfig;

/// Top-level `fleet.toml` contents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    pub provider: ProviderSection,
    pub scaling: ScalingSection,
    pub intervals: IntervalSection,
}

/// Defaults stamped onto clusters the orchestrator creates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSection {
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    pub base_nodes: u32,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            cloud_provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            multi_az: true,
            base_nodes: 3,
        }
    }
}

/// Fleet and node scaling behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScalingSection {
    pub mode: ScalingMode,
    pub scale_down_margin: f64,
    pub empty_dwell_secs: u64,
    pub min_available_clusters: usize,
}

impl Default for ScalingSection {
    fn default() -> Self {
        Self {
            mode: ScalingMode::Auto,
            scale_down_margin: 1.0,
            empty_dwell_secs: 1800,
            min_available_clusters: 1,
        }
    }
}

/// Loop cadences in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntervalSection {
    pub orchestrate_secs: u64,
    pub agent_secs: u64,
}

impl Default for IntervalSection {
    fn default() -> Self {
        Self {
            orchestrate_secs: 30,
            agent_secs: 10,
        }
    }
}

impl FleetConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            cloud_provider: self.provider.cloud_provider.clone(),
            region: self.provider.region.clone(),
            multi_az: self.provider.multi_az,
            base_nodes: self.provider.base_nodes,
            dynamic_scaling: self.scaling.mode == ScalingMode::Auto,
            empty_dwell_secs: self.scaling.empty_dwell_secs,
            min_available_clusters: self.scaling.min_available_clusters,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            mode: self.scaling.mode,
            scale_down_margin: self.scaling.scale_down_margin,
        }
    }
}
