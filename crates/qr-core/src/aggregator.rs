//! Report aggregation
//!
//! Merges the mapping artifacts of every successful run into one
//! [`ReportDocument`], in plan project order, and copies the plan's own
//! documentation assets next to it.

use crate::engine::RunResult;
use crate::error::QualificationError;
use indexmap::IndexMap;
use qr_assets::{AssetAcquirer, AssetKind};
use qr_plan::{
    IntroFile, MappingArtifact, ObservedDataSet, Plan, ReportDocument, ReportPlots, Section,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Builds the consolidated report
#[derive(Debug, Clone)]
pub struct Aggregator {
    acquirer: AssetAcquirer,
    plan_folder: PathBuf,
}

impl Aggregator {
    /// Aggregator copying assets referenced relative to `plan_folder`
    #[must_use]
    pub fn new(acquirer: AssetAcquirer, plan_folder: impl Into<PathBuf>) -> Self {
        Self {
            acquirer,
            plan_folder: plan_folder.into(),
        }
    }

    /// Merge `results` into a report document
    ///
    /// Unsuccessful results are skipped.
    ///
    /// # Errors
    /// - `QualificationError::Aggregation` if a mapping artifact is missing or malformed
    /// - `QualificationError::Asset` if an observed data, content or intro file is missing
    pub async fn aggregate(
        &self,
        plan: &Plan,
        results: &[RunResult],
    ) -> Result<ReportDocument, QualificationError> {
        let mut successful: Vec<&RunResult> = results.iter().filter(|r| r.success).collect();
        successful.sort_by_key(|r| plan.project_index(&r.project).unwrap_or(usize::MAX));

        let mut simulation_mappings = Vec::new();
        let mut worker_observed_data = Vec::new();
        let mut time_profile = Vec::new();
        let mut inputs = Vec::new();
        for result in successful {
            let artifact = MappingArtifact::from_file(&result.mapping_file).map_err(|e| {
                QualificationError::Aggregation {
                    project: result.project.clone(),
                    mapping_file: result.mapping_file.clone(),
                    reason: e.to_string(),
                }
            })?;
            debug!(
                project = %result.project,
                simulations = artifact.simulation_mappings.len(),
                plots = artifact.plots.len(),
                "Merging mapping"
            );
            simulation_mappings.extend(artifact.simulation_mappings);
            worker_observed_data.extend(artifact.observed_data_mappings);
            time_profile.extend(artifact.plots);
            inputs.extend(artifact.inputs);
        }

        let mut observed_data: IndexMap<String, ObservedDataSet> = IndexMap::new();
        for data_set in &plan.observed_data_sets {
            let path = self
                .acquirer
                .copy_out(&data_set.path, AssetKind::ObservedData, &self.plan_folder)
                .await?;
            observed_data
                .entry(data_set.id.clone())
                .or_insert_with(|| ObservedDataSet {
                    path,
                    ..data_set.clone()
                });
        }
        for data_set in worker_observed_data {
            observed_data.entry(data_set.id.clone()).or_insert(data_set);
        }

        Ok(ReportDocument {
            simulation_mappings,
            observed_data_sets: observed_data.into_values().collect(),
            plots: ReportPlots::from_plan(&plan.plots, time_profile),
            inputs,
            sections: self.copy_sections(&plan.sections).await?,
            intro: self.copy_intro(&plan.intro).await?,
        })
    }

    async fn copy_sections(&self, sections: &[Section]) -> Result<Vec<Section>, QualificationError> {
        let mut references = Vec::new();
        collect_content(sections, &mut references);

        let mut copied = HashMap::with_capacity(references.len());
        for reference in references {
            if !copied.contains_key(reference) {
                let path = self
                    .acquirer
                    .copy_out(reference, AssetKind::Content, &self.plan_folder)
                    .await?;
                copied.insert(reference, path);
            }
        }
        Ok(rewrite_content(sections, &copied))
    }

    async fn copy_intro(&self, intro: &[IntroFile]) -> Result<Vec<IntroFile>, QualificationError> {
        let mut copied = Vec::with_capacity(intro.len());
        for file in intro {
            let path = self
                .acquirer
                .copy_out(&file.path, AssetKind::Intro, &self.plan_folder)
                .await?;
            copied.push(IntroFile {
                path,
                ..file.clone()
            });
        }
        Ok(copied)
    }
}

/// Content references of a section tree, depth first
fn collect_content<'a>(sections: &'a [Section], references: &mut Vec<&'a str>) {
    for section in sections {
        if let Some(content) = section.content.as_deref() {
            references.push(content);
        }
        collect_content(&section.sections, references);
    }
}

fn rewrite_content(sections: &[Section], copied: &HashMap<&str, String>) -> Vec<Section> {
    sections
        .iter()
        .map(|section| Section {
            content: section
                .content
                .as_deref()
                .map(|content| copied.get(content).cloned().unwrap_or_else(|| content.to_string())),
            sections: rewrite_content(&section.sections, copied),
            ..section.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunMode;
    use pretty_assertions::assert_eq;
    use qr_test_utils::{mapping_fixture, plan_fixture, write_mapping, write_plan_workspace};
    use std::path::Path;

    fn result(output: &Path, project: &str, success: bool) -> RunResult {
        let temp = output.join("temp").join(project);
        RunResult {
            project: project.to_string(),
            mode: RunMode::Run,
            log_file_paths: vec![temp.join("log.txt")],
            config_file: temp.join("config.json"),
            mapping_file: temp.join("mapping.json"),
            success,
        }
    }

    fn aggregator(plan_dir: &Path, output: &Path) -> Aggregator {
        Aggregator::new(AssetAcquirer::with_http(output), plan_dir)
    }

    #[tokio::test]
    async fn merges_mappings_in_plan_order() {
        let dir = tempfile::tempdir().unwrap();
        write_plan_workspace(dir.path());
        let output = dir.path().join("out");
        let p1 = result(&output, "P1", true);
        let p2 = result(&output, "P2", true);
        write_mapping(&p1.mapping_file, &mapping_fixture("P1", &["S1", "S2"]));
        write_mapping(&p2.mapping_file, &mapping_fixture("P2", &["S3"]));

        let report = aggregator(dir.path(), &output)
            .aggregate(&plan_fixture(), &[p2, p1])
            .await
            .unwrap();

        let simulations: Vec<_> = report
            .simulation_mappings
            .iter()
            .map(|m| (m.project.as_str(), m.simulation.as_str()))
            .collect();
        assert_eq!(simulations, vec![("P1", "S1"), ("P1", "S2"), ("P2", "S3")]);
        assert_eq!(report.plots.time_profile.len(), 3);
        assert_eq!(report.inputs.len(), 2);
        assert_eq!(report.inputs[0].project, "P1");
        assert_eq!(report.plots.gof_merged_plots.len(), 1);
        assert!(report.plots.extra.contains_key("AxesSettings"));
    }

    #[tokio::test]
    async fn observed_data_is_copied_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        write_plan_workspace(dir.path());
        let output = dir.path().join("out");
        let p1 = result(&output, "P1", true);
        let mut mapping = mapping_fixture("P1", &["S1"]);
        mapping.observed_data_mappings.push(ObservedDataSet {
            id: "obs-1".into(),
            path: "ObservedData/other.csv".into(),
            ..ObservedDataSet::default()
        });
        write_mapping(&p1.mapping_file, &mapping);

        let report = aggregator(dir.path(), &output)
            .aggregate(&plan_fixture(), &[p1])
            .await
            .unwrap();

        let ids: Vec<_> = report.observed_data_sets.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["obs-1", "P1-obs"]);
        assert_eq!(report.observed_data_sets[0].path, "ObservedData/data/obs1.csv");
        assert!(output.join("ObservedData/data/obs1.csv").exists());
    }

    #[tokio::test]
    async fn sections_and_intro_point_at_copies() {
        let dir = tempfile::tempdir().unwrap();
        write_plan_workspace(dir.path());
        let output = dir.path().join("out");

        let report = aggregator(dir.path(), &output)
            .aggregate(&plan_fixture(), &[])
            .await
            .unwrap();

        assert_eq!(report.sections[0].content.as_deref(), Some("Content/content/results.md"));
        assert_eq!(report.sections[0].sections[0].title, "Goodness of fit");
        assert_eq!(report.sections[0].sections[0].content, None);
        assert_eq!(report.intro[0].path, "Intro/content/intro.md");
        assert_eq!(
            std::fs::read_to_string(output.join("Content/content/results.md")).unwrap(),
            "# Results"
        );
    }

    #[tokio::test]
    async fn same_named_contents_keep_their_own_text() {
        let dir = tempfile::tempdir().unwrap();
        write_plan_workspace(dir.path());
        for (folder, text) in [("intro", "INTRO"), ("methods", "METHODS")] {
            let file = dir.path().join("sections").join(folder).join("_content.md");
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, text).unwrap();
        }
        let output = dir.path().join("out");

        let mut plan = plan_fixture();
        plan.sections = ["intro", "methods"]
            .iter()
            .zip(1..)
            .map(|(folder, id)| Section {
                id,
                title: (*folder).to_string(),
                content: Some(format!("sections/{folder}/_content.md")),
                sections: Vec::new(),
                extra: serde_json::Map::new(),
            })
            .collect();

        let report = aggregator(dir.path(), &output)
            .aggregate(&plan, &[])
            .await
            .unwrap();

        let copies: Vec<_> = report
            .sections
            .iter()
            .map(|section| {
                let path = section.content.clone().unwrap();
                let text = std::fs::read_to_string(output.join(&path)).unwrap();
                (path, text)
            })
            .collect();
        assert_eq!(
            copies,
            vec![
                ("Content/sections/intro/_content.md".to_string(), "INTRO".to_string()),
                ("Content/sections/methods/_content.md".to_string(), "METHODS".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_results_are_skipped_and_missing_mappings_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_plan_workspace(dir.path());
        let output = dir.path().join("out");

        let report = aggregator(dir.path(), &output)
            .aggregate(&plan_fixture(), &[result(&output, "P1", false)])
            .await
            .unwrap();
        assert!(report.simulation_mappings.is_empty());

        let err = aggregator(dir.path(), &output)
            .aggregate(&plan_fixture(), &[result(&output, "P2", true)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QualificationError::Aggregation { ref project, .. } if project == "P2"
        ));
    }
}
