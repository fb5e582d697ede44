use std::collections::BTreeMap;

use crate::error::{OrchestratorError, Result};

use super::{Pipeline, Step};

/// Static mapping of asset type × intensity to an ordered tool list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineTable {
    entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PipelineTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Tool table shipped with the orchestrator.
    pub fn builtin() -> Self {
        Self::empty()
            .with_entry("domain", "LIGHT", &["subfinder", "basic_dns"])
            .with_entry("domain", "NORMAL", &["amass_passive"])
            .with_entry(
                "domain",
                "DEEP",
                &["amass_active", "reverse_dns", "exposure_scan"],
            )
            .with_entry("ip", "LIGHT", &["ip_resolve"])
            .with_entry("ip", "NORMAL", &["asn_geo_mapping"])
            .with_entry("ip", "DEEP", &["full_port_service_scan"])
            .with_entry("service", "LIGHT", &["http_banner_check"])
            .with_entry("service", "NORMAL", &["top_ports_services"])
            .with_entry("service", "DEEP", &["deep_misconfig_analysis"])
            .with_entry("cloud", "LIGHT", &["public_endpoint_detect"])
            .with_entry("cloud", "NORMAL", &["config_review_readonly"])
            .with_entry("cloud", "DEEP", &["full_osint_correlation"])
            .with_entry("human", "LIGHT", &["email_leak_check"])
            .with_entry("human", "NORMAL", &["repo_secret_scan"])
            .with_entry("human", "DEEP", &["full_osint_correlation"])
    }

    pub fn with_entry(
        mut self,
        asset_type: &str,
        intensity: &str,
        tools: &[&str],
    ) -> Self {
        self.entries
            .entry(asset_type.to_string())
            .or_default()
            .insert(
                intensity.to_string(),
                tools.iter().map(|tool| tool.to_string()).collect(),
            );
        self
    }

    pub fn tools(&self, asset_type: &str, intensity: &str) -> Option<&[String]> {
        self.entries
            .get(asset_type)
            .and_then(|by_intensity| by_intensity.get(intensity))
            .map(Vec::as_slice)
    }

    /// Every configured (asset type, intensity, tools) triple.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.entries.iter().flat_map(|(asset, by_intensity)| {
            by_intensity.iter().map(move |(intensity, tools)| {
                (asset.as_str(), intensity.as_str(), tools.as_slice())
            })
        })
    }
}

/// Attributes needed to expand a job into a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineRequest {
    pub job_id: String,
    pub asset_type: String,
    pub intensity: String,
    pub initial_status: String,
    pub targets: Vec<String>,
}

/// Expands pipeline requests using a [`PipelineTable`]. Holds no mutable
/// state, so one instance can be shared freely across tasks.
#[derive(Clone, Debug)]
pub struct PipelineGenerator {
    table: PipelineTable,
}

impl Default for PipelineGenerator {
    fn default() -> Self {
        Self::new(PipelineTable::builtin())
    }
}

impl PipelineGenerator {
    pub fn new(table: PipelineTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PipelineTable {
        &self.table
    }

    pub fn generate(&self, request: &PipelineRequest) -> Result<Pipeline> {
        let tools = self
            .table
            .tools(&request.asset_type, &request.intensity)
            .ok_or_else(|| OrchestratorError::ConfigurationMismatch {
                asset_type: request.asset_type.clone(),
                intensity: request.intensity.clone(),
            })?;

        let steps = tools
            .iter()
            .zip(1u32..)
            .map(|(tool, order)| Step::pending(order, tool.as_str()))
            .collect();

        Ok(Pipeline {
            job_id: request.job_id.clone(),
            asset_type: request.asset_type.clone(),
            intensity: request.intensity.clone(),
            status: request.initial_status.clone(),
            steps,
            targets: request.targets.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepStatus;

    fn request(asset_type: &str, intensity: &str) -> PipelineRequest {
        PipelineRequest {
            job_id: "J1".to_string(),
            asset_type: asset_type.to_string(),
            intensity: intensity.to_string(),
            initial_status: "PENDING".to_string(),
            targets: vec!["example.com".to_string()],
        }
    }

    #[test]
    fn every_table_entry_generates_exact_ordered_steps() {
        let generator = PipelineGenerator::default();
        let table = generator.table().clone();
        let mut seen = 0;

        for (asset, intensity, tools) in table.iter() {
            let pipeline = generator
                .generate(&request(asset, intensity))
                .expect("configured pair generates");
            seen += 1;

            assert_eq!(pipeline.status, "PENDING");
            assert_eq!(pipeline.steps.len(), tools.len());
            for (i, step) in pipeline.steps.iter().enumerate() {
                assert_eq!(step.order as usize, i + 1);
                assert_eq!(step.tool, tools[i]);
                assert_eq!(step.status, StepStatus::Pending);
                assert!(step.error.is_none() && step.result.is_none());
            }
        }

        assert_eq!(seen, 15);
    }

    #[test]
    fn domain_light_expands_to_subfinder_then_basic_dns() {
        let pipeline = PipelineGenerator::default()
            .generate(&request("domain", "LIGHT"))
            .unwrap();
        let tools: Vec<_> =
            pipeline.steps.iter().map(|s| (s.order, s.tool.as_str())).collect();
        assert_eq!(tools, vec![(1, "subfinder"), (2, "basic_dns")]);
        assert_eq!(pipeline.targets, vec!["example.com".to_string()]);
    }

    #[test]
    fn unknown_pairs_fail_with_configuration_mismatch() {
        let generator = PipelineGenerator::default();
        for (asset, intensity) in [
            ("saas", "LIGHT"),
            ("domain", "EXTREME"),
            ("domain", "light"),
            ("", ""),
        ] {
            let err = generator.generate(&request(asset, intensity)).unwrap_err();
            assert!(
                matches!(err, OrchestratorError::ConfigurationMismatch { .. }),
                "{asset}/{intensity} should be rejected"
            );
        }
    }

    #[test]
    fn initial_status_is_copied_verbatim() {
        let mut req = request("ip", "DEEP");
        req.initial_status = "ACTIVE".to_string();
        let pipeline = PipelineGenerator::default().generate(&req).unwrap();
        assert_eq!(pipeline.status, "ACTIVE");
    }
}
