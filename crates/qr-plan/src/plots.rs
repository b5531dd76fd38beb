//! Plot collections of a plan
//!
//! Each plot kind is a typed record implementing [`ReferencesSimulations`].
//! The resolver only needs the `(project, simulation)` pairs a plot touches;
//! every other field is carried through `extra` untouched so the report can
//! pass the plot on verbatim.

use crate::plan::null_as_default;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Borrowed `(project, simulation)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimulationKey<'a> {
    pub project: &'a str,
    pub simulation: &'a str,
}

/// Capability shared by every plot kind
pub trait ReferencesSimulations {
    /// All `(project, simulation)` pairs referenced, in document order
    fn referenced_simulations(&self) -> Vec<SimulationKey<'_>>;
}

/// Reference to one simulation of one project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationRef {
    pub project: String,
    pub simulation: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SimulationRef {
    #[inline]
    fn key(&self) -> SimulationKey<'_> {
        SimulationKey {
            project: &self.project,
            simulation: &self.simulation,
        }
    }
}

/// Time profile plot of a single simulation, placed in a section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimulationPlot {
    pub project: String,
    pub simulation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReferencesSimulations for SimulationPlot {
    fn referenced_simulations(&self) -> Vec<SimulationKey<'_>> {
        vec![SimulationKey {
            project: &self.project,
            simulation: &self.simulation,
        }]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GofGroup {
    #[serde(default, deserialize_with = "null_as_default")]
    pub output_mappings: Vec<SimulationRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Goodness-of-fit plot merging several output mappings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GofMergedPlot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<GofGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReferencesSimulations for GofMergedPlot {
    fn referenced_simulations(&self) -> Vec<SimulationKey<'_>> {
        self.groups
            .iter()
            .flat_map(|g| g.output_mappings.iter().map(SimulationRef::key))
            .collect()
    }
}

/// Overlay of time profiles from several simulations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComparisonTimeProfilePlot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub output_mappings: Vec<SimulationRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReferencesSimulations for ComparisonTimeProfilePlot {
    fn referenced_simulations(&self) -> Vec<SimulationKey<'_>> {
        self.output_mappings.iter().map(SimulationRef::key).collect()
    }
}

/// Control/perpetrator simulation pair of a DDI ratio
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DdiRatio {
    pub simulation_control: SimulationRef,
    #[serde(rename = "SimulationDDI")]
    pub simulation_ddi: SimulationRef,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DdiRatioGroup {
    #[serde(rename = "DDIRatios", default, deserialize_with = "null_as_default")]
    pub ddi_ratios: Vec<DdiRatio>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Drug-drug interaction ratio plot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DdiRatioPlot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<DdiRatioGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReferencesSimulations for DdiRatioPlot {
    fn referenced_simulations(&self) -> Vec<SimulationKey<'_>> {
        self.groups
            .iter()
            .flat_map(|g| g.ddi_ratios.iter())
            .flat_map(|ratio| [ratio.simulation_control.key(), ratio.simulation_ddi.key()])
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PkRatioGroup {
    #[serde(rename = "PKRatios", default, deserialize_with = "null_as_default")]
    pub pk_ratios: Vec<SimulationRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// PK parameter ratio plot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PkRatioPlot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<PkRatioGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReferencesSimulations for PkRatioPlot {
    fn referenced_simulations(&self) -> Vec<SimulationKey<'_>> {
        self.groups
            .iter()
            .flat_map(|g| g.pk_ratios.iter().map(SimulationRef::key))
            .collect()
    }
}

/// Any plot of the set, for switch-style traversal
#[derive(Debug, Clone, Copy)]
pub enum PlotRef<'a> {
    Simulation(&'a SimulationPlot),
    GofMerged(&'a GofMergedPlot),
    ComparisonTimeProfile(&'a ComparisonTimeProfilePlot),
    DdiRatio(&'a DdiRatioPlot),
    PkRatio(&'a PkRatioPlot),
}

impl<'a> PlotRef<'a> {
    /// Referenced pairs, borrowing from the plot rather than from `self`
    #[must_use]
    pub fn keys(self) -> Vec<SimulationKey<'a>> {
        match self {
            PlotRef::Simulation(plot) => plot.referenced_simulations(),
            PlotRef::GofMerged(plot) => plot.referenced_simulations(),
            PlotRef::ComparisonTimeProfile(plot) => plot.referenced_simulations(),
            PlotRef::DdiRatio(plot) => plot.referenced_simulations(),
            PlotRef::PkRatio(plot) => plot.referenced_simulations(),
        }
    }
}

impl ReferencesSimulations for PlotRef<'_> {
    fn referenced_simulations(&self) -> Vec<SimulationKey<'_>> {
        self.keys()
    }
}

/// All plot collections of a plan
///
/// `AllPlots` is an input hint only: the report replaces it with the
/// time-profile plots produced by the workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlotSet {
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub all_plots: Vec<SimulationPlot>,
    #[serde(
        rename = "GOFMergedPlots",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub gof_merged_plots: Vec<GofMergedPlot>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub comparison_time_profile_plots: Vec<ComparisonTimeProfilePlot>,
    #[serde(
        rename = "DDIRatioPlots",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ddi_ratio_plots: Vec<DdiRatioPlot>,
    #[serde(
        rename = "PKRatioPlots",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub pk_ratio_plots: Vec<PkRatioPlot>,
    /// Other plot settings (axes, curve options, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlotSet {
    /// Iterate over every plot in category order
    pub fn iter(&self) -> impl Iterator<Item = PlotRef<'_>> {
        self.all_plots
            .iter()
            .map(PlotRef::Simulation)
            .chain(self.gof_merged_plots.iter().map(PlotRef::GofMerged))
            .chain(
                self.comparison_time_profile_plots
                    .iter()
                    .map(PlotRef::ComparisonTimeProfile),
            )
            .chain(self.ddi_ratio_plots.iter().map(PlotRef::DdiRatio))
            .chain(self.pk_ratio_plots.iter().map(PlotRef::PkRatio))
    }

    /// Every `(project, simulation)` pair referenced by any plot
    #[must_use]
    pub fn all_references(&self) -> Vec<SimulationKey<'_>> {
        self.iter().flat_map(PlotRef::keys).collect()
    }

    /// Distinct simulations of `project` referenced by any plot, first-seen order
    #[must_use]
    pub fn referenced_simulations(&self, project: &str) -> Vec<String> {
        let mut simulations: Vec<String> = Vec::new();
        for key in self.all_references() {
            if key.project == project && !simulations.iter().any(|s| s == key.simulation) {
                simulations.push(key.simulation.to_string());
            }
        }
        simulations
    }

    /// `AllPlots` entries belonging to `project`, in plan order
    #[must_use]
    pub fn simulation_plots_for(&self, project: &str) -> Vec<SimulationPlot> {
        self.all_plots
            .iter()
            .filter(|plot| plot.project == project)
            .cloned()
            .collect()
    }
}
