//! Resolved per-project configuration handed to the worker
//!
//! Serialized verbatim as the worker's `config.json`. Every snapshot path in
//! here is a local, already acquired file.

use crate::plan::{BuildingBlockType, Input};
use crate::plots::SimulationPlot;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the configuration file inside a project temp folder
pub const CONFIG_FILE_NAME: &str = "config.json";
/// Name of the worker log file inside a project temp folder
pub const LOG_FILE_NAME: &str = "log.txt";
/// Name of the mapping file inside a project temp folder
pub const MAPPING_FILE_NAME: &str = "mapping.json";

/// Building block substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildingBlockSwap {
    pub name: String,
    #[serde(rename = "Type")]
    pub building_block_type: BuildingBlockType,
    pub snapshot_file: PathBuf,
}

/// Simulation parameter substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationParameterSwap {
    pub simulation: String,
    pub path: String,
    pub target_simulations: Vec<String>,
    pub snapshot_file: PathBuf,
}

/// Fully resolved configuration of one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProjectConfiguration {
    /// Project id
    pub project: String,
    /// Shared output root
    pub output_folder: PathBuf,
    /// Final report document location
    pub report_configuration_file: PathBuf,
    /// Where the worker exports observed data
    pub observed_data_folder: PathBuf,
    /// Where the worker exports inputs
    pub inputs_folder: PathBuf,
    /// Isolated scratch folder of this project
    pub temp_folder: PathBuf,
    /// Where the worker writes its mapping artifact
    pub mapping_file: PathBuf,
    /// Resolved snapshot of the project
    pub snapshot_file: PathBuf,
    pub building_blocks: Vec<BuildingBlockSwap>,
    pub simulation_parameters: Vec<SimulationParameterSwap>,
    pub simulation_plots: Vec<SimulationPlot>,
    pub inputs: Vec<Input>,
    /// Simulations referenced by any plot of the plan
    pub simulations: Vec<String>,
    /// Log file of the runner itself, also handed to the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_log_file: Option<PathBuf>,
}

impl ProjectConfiguration {
    /// Configuration file written before each worker launch
    #[inline]
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.temp_folder.join(CONFIG_FILE_NAME)
    }

    /// Project log file the worker appends to
    #[inline]
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.temp_folder.join(LOG_FILE_NAME)
    }

    /// Every log file handed to the worker
    #[must_use]
    pub fn log_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.log_file()];
        files.extend(self.shared_log_file.iter().cloned());
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn configuration() -> ProjectConfiguration {
        ProjectConfiguration {
            project: "P1".into(),
            output_folder: "/out".into(),
            report_configuration_file: "/out/report.json".into(),
            observed_data_folder: "/out/ObservedData".into(),
            inputs_folder: "/out/Inputs".into(),
            temp_folder: "/out/temp/P1".into(),
            mapping_file: "/out/temp/P1/mapping.json".into(),
            snapshot_file: "/plans/p1.json".into(),
            building_blocks: vec![BuildingBlockSwap {
                name: "Adult".into(),
                building_block_type: BuildingBlockType::Individual,
                snapshot_file: "/plans/p2.json".into(),
            }],
            simulation_parameters: vec![],
            simulation_plots: vec![],
            inputs: vec![],
            simulations: vec!["S1".into()],
            shared_log_file: None,
        }
    }

    #[test]
    fn file_locations_live_in_temp_folder() {
        let config = configuration();
        assert_eq!(config.config_file(), Path::new("/out/temp/P1/config.json"));
        assert_eq!(config.log_file(), Path::new("/out/temp/P1/log.txt"));
        assert_eq!(config.log_files().len(), 1);

        let config = ProjectConfiguration {
            shared_log_file: Some("/logs/runner.log".into()),
            ..config
        };
        assert_eq!(
            config.log_files(),
            vec![PathBuf::from("/out/temp/P1/log.txt"), PathBuf::from("/logs/runner.log")]
        );
    }

    #[test]
    fn serializes_worker_keys() {
        let value = serde_json::to_value(configuration()).unwrap();
        assert_eq!(value["Project"], "P1");
        assert_eq!(value["BuildingBlocks"][0]["Type"], "Individual");
        assert_eq!(value["BuildingBlocks"][0]["SnapshotFile"], "/plans/p2.json");
        assert_eq!(value["MappingFile"], "/out/temp/P1/mapping.json");
        assert!(value.get("SharedLogFile").is_none());
    }
}
