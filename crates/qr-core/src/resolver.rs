//! Reference resolution
//!
//! Turns the plan into one self-contained [`ProjectConfiguration`] per
//! project:
//! - Checks every cross-project reference up front
//! - Acquires the snapshots of swapped building blocks and parameters
//! - Filters plots and inputs down to the project

use crate::error::QualificationError;
use crate::options::QualificationRunOptions;
use futures::future::try_join_all;
use qr_assets::{AssetAcquirer, AssetKind};
use qr_plan::{
    BuildingBlockSource, BuildingBlockSwap, Plan, Project, ProjectConfiguration,
    SimulationParameterSwap, MAPPING_FILE_NAME,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resolves plan projects into worker configurations
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    options: QualificationRunOptions,
    acquirer: AssetAcquirer,
    plan_folder: PathBuf,
}

impl ReferenceResolver {
    /// Resolver for `options`, acquiring assets through `acquirer`
    #[must_use]
    pub fn new(options: QualificationRunOptions, acquirer: AssetAcquirer) -> Self {
        let plan_folder = options.plan_folder();
        Self {
            options,
            acquirer,
            plan_folder,
        }
    }

    #[inline]
    #[must_use]
    pub fn acquirer(&self) -> &AssetAcquirer {
        &self.acquirer
    }

    /// Check that every project id named anywhere in the plan exists
    ///
    /// # Errors
    /// - `PlanError::MissingSection` if `Projects` is absent or empty
    /// - `QualificationError::DanglingReference` naming the first unknown id
    pub fn validate_references(plan: &Plan) -> Result<(), QualificationError> {
        for project in plan.projects()? {
            for building_block in &project.building_blocks {
                match building_block.source() {
                    BuildingBlockSource::Project(id) => require_project(plan, id)?,
                    BuildingBlockSource::Path(_) => {}
                    BuildingBlockSource::Unspecified => {
                        return Err(QualificationError::dangling(""))
                    }
                }
            }
            for parameter in &project.simulation_parameters {
                require_project(plan, &parameter.project)?;
            }
        }

        for key in plan.plots.all_references() {
            require_project(plan, key.project)?;
        }
        Ok(())
    }

    /// Resolve every project of the plan, in plan order
    ///
    /// # Errors
    /// The first resolution error of any project; nothing is created on
    /// disk when the plan's references are inconsistent.
    pub async fn resolve(
        &self,
        plan: &Plan,
    ) -> Result<Vec<ProjectConfiguration>, QualificationError> {
        let projects = plan.projects()?;
        Self::validate_references(plan)?;

        info!(projects = projects.len(), "Resolving project configurations");
        try_join_all(
            projects
                .iter()
                .map(|project| self.resolve_project(plan, project)),
        )
        .await
    }

    /// Resolve a single project
    ///
    /// # Errors
    /// - `QualificationError::DanglingReference` for an unknown project id
    /// - `QualificationError::Asset` if a snapshot cannot be acquired
    /// - `QualificationError::Io` if the temp folder cannot be prepared
    pub async fn resolve_project(
        &self,
        plan: &Plan,
        project: &Project,
    ) -> Result<ProjectConfiguration, QualificationError> {
        debug!(project = %project.id, "Resolving project");

        let temp_folder = self.options.project_temp_folder(&project.id);
        self.prepare_temp_folder(&temp_folder).await?;

        let snapshot_file = self.snapshot(&project.path).await?;

        let mut building_blocks = Vec::with_capacity(project.building_blocks.len());
        for building_block in &project.building_blocks {
            let reference = match building_block.source() {
                BuildingBlockSource::Project(id) => referenced_path(plan, id)?,
                BuildingBlockSource::Path(path) => path,
                BuildingBlockSource::Unspecified => {
                    return Err(QualificationError::dangling(""))
                }
            };
            building_blocks.push(BuildingBlockSwap {
                name: building_block.name.clone(),
                building_block_type: building_block.building_block_type,
                snapshot_file: self.snapshot(reference).await?,
            });
        }

        let mut simulation_parameters = Vec::with_capacity(project.simulation_parameters.len());
        for parameter in &project.simulation_parameters {
            let reference = referenced_path(plan, &parameter.project)?;
            simulation_parameters.push(SimulationParameterSwap {
                simulation: parameter.simulation.clone(),
                path: parameter.path.clone(),
                target_simulations: parameter.target_simulations.clone(),
                snapshot_file: self.snapshot(reference).await?,
            });
        }

        Ok(ProjectConfiguration {
            project: project.id.clone(),
            output_folder: self.options.output_folder.clone(),
            report_configuration_file: self.options.report_file(),
            observed_data_folder: self.options.observed_data_folder(),
            inputs_folder: self.options.inputs_folder(),
            mapping_file: temp_folder.join(MAPPING_FILE_NAME),
            temp_folder,
            snapshot_file,
            building_blocks,
            simulation_parameters,
            simulation_plots: plan.plots.simulation_plots_for(&project.id),
            inputs: plan.inputs_for(&project.id),
            simulations: plan.plots.referenced_simulations(&project.id),
            shared_log_file: self.options.shared_log_file.clone(),
        })
    }

    async fn snapshot(&self, reference: &str) -> Result<PathBuf, QualificationError> {
        Ok(self
            .acquirer
            .acquire(reference, AssetKind::Snapshot, &self.plan_folder)
            .await?)
    }

    async fn prepare_temp_folder(&self, folder: &Path) -> Result<(), QualificationError> {
        if !self.options.preserve_temp {
            match tokio::fs::remove_dir_all(folder).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(QualificationError::io_error(folder, e)),
            }
        }
        tokio::fs::create_dir_all(folder)
            .await
            .map_err(|e| QualificationError::io_error(folder, e))
    }
}

fn require_project(plan: &Plan, id: &str) -> Result<(), QualificationError> {
    referenced_path(plan, id).map(|_| ())
}

fn referenced_path<'a>(plan: &'a Plan, id: &str) -> Result<&'a str, QualificationError> {
    plan.project(id)
        .map(|project| project.path.as_str())
        .ok_or_else(|| QualificationError::dangling(id))
}
