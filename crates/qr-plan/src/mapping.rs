//! Worker mapping artifact and the consolidated report document

use crate::error::PlanError;
use crate::plan::{null_as_default, Input, IntroFile, ObservedDataSet, Section};
use crate::plots::{
    ComparisonTimeProfilePlot, DdiRatioPlot, GofMergedPlot, PkRatioPlot, PlotSet,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Simulation exported by the worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationMapping {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub simulation: String,
    #[serde(default)]
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Time profile plot produced by the worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeProfilePlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-project result written by the worker to its mapping file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappingArtifact {
    #[serde(default, deserialize_with = "null_as_default")]
    pub simulation_mappings: Vec<SimulationMapping>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub observed_data_mappings: Vec<ObservedDataSet>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub plots: Vec<TimeProfilePlot>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inputs: Vec<Input>,
}

impl MappingArtifact {
    /// Read a mapping artifact from disk
    ///
    /// # Errors
    /// - `PlanError::Io` if the file is missing or unreadable
    /// - `PlanError::Parse` if it is not a mapping document
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| PlanError::io_error(path, e))?;
        serde_json::from_str(&json).map_err(|e| PlanError::parse_error(path, e))
    }
}

/// Plot collections of the report
///
/// Same as the plan's [`PlotSet`] with `AllPlots` swapped for `TimeProfile`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportPlots {
    #[serde(default)]
    pub time_profile: Vec<TimeProfilePlot>,
    #[serde(rename = "GOFMergedPlots", default, skip_serializing_if = "Vec::is_empty")]
    pub gof_merged_plots: Vec<GofMergedPlot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comparison_time_profile_plots: Vec<ComparisonTimeProfilePlot>,
    #[serde(rename = "DDIRatioPlots", default, skip_serializing_if = "Vec::is_empty")]
    pub ddi_ratio_plots: Vec<DdiRatioPlot>,
    #[serde(rename = "PKRatioPlots", default, skip_serializing_if = "Vec::is_empty")]
    pub pk_ratio_plots: Vec<PkRatioPlot>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReportPlots {
    /// Pass every plan category through, replacing `AllPlots` with `time_profile`
    #[must_use]
    pub fn from_plan(plots: &PlotSet, time_profile: Vec<TimeProfilePlot>) -> Self {
        Self {
            time_profile,
            gof_merged_plots: plots.gof_merged_plots.clone(),
            comparison_time_profile_plots: plots.comparison_time_profile_plots.clone(),
            ddi_ratio_plots: plots.ddi_ratio_plots.clone(),
            pk_ratio_plots: plots.pk_ratio_plots.clone(),
            extra: plots.extra.clone(),
        }
    }
}

/// Consolidated report configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportDocument {
    pub simulation_mappings: Vec<SimulationMapping>,
    pub observed_data_sets: Vec<ObservedDataSet>,
    pub plots: ReportPlots,
    pub inputs: Vec<Input>,
    pub sections: Vec<Section>,
    pub intro: Vec<IntroFile>,
}

impl ReportDocument {
    /// Pretty-printed JSON representation
    ///
    /// # Errors
    /// Returns the serde error if a pass-through value cannot be serialized
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
