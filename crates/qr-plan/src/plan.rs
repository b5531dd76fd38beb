//! Qualification plan
//!
//! Typed view of the plan document:
//! - Projects and their cross-project references
//! - Plot collections (see [`crate::plots`])
//! - Section tree, observed data, inputs and intro documents
//!
//! Every optional collection decodes to an empty `Vec`, whether the key is
//! absent or explicitly `null`. Only `Projects` is mandatory, and that check
//! is deferred to [`Plan::projects`] so callers get a precise error.

use crate::error::PlanError;
use crate::plots::PlotSet;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

/// Name of the mandatory projects section
pub const PROJECTS_SECTION: &str = "Projects";

/// Treat an explicit `null` like an absent key.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Root plan document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Plan {
    /// Projects taking part in the qualification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<Project>>,
    /// Plot collections
    #[serde(default, deserialize_with = "null_as_default")]
    pub plots: PlotSet,
    /// Report section tree
    #[serde(default, deserialize_with = "null_as_default")]
    pub sections: Vec<Section>,
    /// Plan-level observed data files
    #[serde(default, deserialize_with = "null_as_default")]
    pub observed_data_sets: Vec<ObservedDataSet>,
    /// Project inputs exported into the report
    #[serde(default, deserialize_with = "null_as_default")]
    pub inputs: Vec<Input>,
    /// Introduction documents
    #[serde(default, deserialize_with = "null_as_default")]
    pub intro: Vec<IntroFile>,
}

impl Plan {
    /// Decode a plan from a JSON string
    ///
    /// # Errors
    /// Returns the serde error if the document does not match the schema
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a plan from disk
    ///
    /// # Errors
    /// - `PlanError::Io` if the file cannot be read
    /// - `PlanError::Parse` if the content is not a valid plan
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| PlanError::io_error(path, e))?;
        Self::from_json(&json).map_err(|e| PlanError::parse_error(path, e))
    }

    /// Projects of the plan
    ///
    /// # Errors
    /// `PlanError::MissingSection` if the section is absent or empty
    pub fn projects(&self) -> Result<&[Project], PlanError> {
        match self.projects.as_deref() {
            Some(projects) if !projects.is_empty() => Ok(projects),
            _ => Err(PlanError::missing_section(PROJECTS_SECTION)),
        }
    }

    /// Look up a project by id
    #[must_use]
    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects
            .as_deref()
            .and_then(|projects| projects.iter().find(|p| p.id == id))
    }

    /// Position of a project in plan order
    #[must_use]
    pub fn project_index(&self, id: &str) -> Option<usize> {
        self.projects
            .as_deref()
            .and_then(|projects| projects.iter().position(|p| p.id == id))
    }

    /// Inputs belonging to `project`, in plan order
    #[must_use]
    pub fn inputs_for(&self, project: &str) -> Vec<Input> {
        self.inputs
            .iter()
            .filter(|input| input.project == project)
            .cloned()
            .collect()
    }
}

/// One unit of work with its own snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Project {
    /// Unique id within the plan
    pub id: String,
    /// Snapshot location: path relative to the plan file, or a URL
    pub path: String,
    /// Building blocks swapped in from other projects
    #[serde(default, deserialize_with = "null_as_default")]
    pub building_blocks: Vec<BuildingBlockRef>,
    /// Simulation parameters swapped in from other projects
    #[serde(default, deserialize_with = "null_as_default")]
    pub simulation_parameters: Vec<SimulationParameterRef>,
}

impl Project {
    /// Create project with no references
    #[inline]
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Kinds of swappable building blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildingBlockType {
    Individual,
    Population,
    Compound,
    Formulation,
    Protocol,
    Event,
    ObserverSet,
    ExpressionProfile,
}

impl fmt::Display for BuildingBlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Individual => "Individual",
            Self::Population => "Population",
            Self::Compound => "Compound",
            Self::Formulation => "Formulation",
            Self::Protocol => "Protocol",
            Self::Event => "Event",
            Self::ObserverSet => "ObserverSet",
            Self::ExpressionProfile => "ExpressionProfile",
        };
        f.write_str(name)
    }
}

/// Reference to a building block defined in another snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildingBlockRef {
    /// Building block kind
    #[serde(rename = "Type")]
    pub building_block_type: BuildingBlockType,
    /// Building block name
    pub name: String,
    /// Id of the project providing the building block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Direct snapshot location, used when no project is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Where a building block comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildingBlockSource<'a> {
    /// Snapshot of another project in the plan
    Project(&'a str),
    /// Snapshot referenced directly
    Path(&'a str),
    /// Neither was given
    Unspecified,
}

impl BuildingBlockRef {
    /// Resolve the source of the building block; a project id wins over a path
    #[must_use]
    pub fn source(&self) -> BuildingBlockSource<'_> {
        match (self.project.as_deref(), self.path.as_deref()) {
            (Some(project), _) => BuildingBlockSource::Project(project),
            (None, Some(path)) => BuildingBlockSource::Path(path),
            (None, None) => BuildingBlockSource::Unspecified,
        }
    }
}

/// Reference to a simulation parameter defined in another project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationParameterRef {
    /// Parameter path within the source simulation
    pub path: String,
    /// Simulations of the owning project receiving the value
    #[serde(default, deserialize_with = "null_as_default")]
    pub target_simulations: Vec<String>,
    /// Id of the project providing the parameter
    pub project: String,
    /// Simulation in the referenced project
    #[serde(default)]
    pub simulation: String,
}

/// Node of the report section tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Section {
    pub id: i64,
    pub title: String,
    /// Markdown content location (path or URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Observed data file (plan level or reported by the worker)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObservedDataSet {
    pub id: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Introduction document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntroFile {
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Project input placed into a report section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Input {
    pub project: String,
    /// Location of the exported input, filled in by the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub section_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_level: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
