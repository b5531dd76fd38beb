//! Qualification plan model
//!
//! Typed schemas for every document the runner touches:
//! - [`Plan`]: the input plan (projects, plots, sections, assets)
//! - [`ProjectConfiguration`]: the resolved per-project worker input
//! - [`MappingArtifact`]: the per-project worker output
//! - [`ReportDocument`]: the merged report configuration
//!
//! Documents are decoded once at the boundary; nothing downstream handles
//! raw JSON except the pass-through `extra` maps.
//!
//! # Example
//!
//! ```rust
//! use qr_plan::Plan;
//!
//! let plan = Plan::from_json(r#"{ "Projects": [ { "Id": "P1", "Path": "p1.json" } ] }"#).unwrap();
//! assert_eq!(plan.projects().unwrap()[0].id, "P1");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod configuration;
pub mod error;
pub mod mapping;
pub mod plan;
pub mod plots;

pub use configuration::{
    BuildingBlockSwap, ProjectConfiguration, SimulationParameterSwap, CONFIG_FILE_NAME,
    LOG_FILE_NAME, MAPPING_FILE_NAME,
};
pub use error::PlanError;
pub use mapping::{MappingArtifact, ReportDocument, ReportPlots, SimulationMapping, TimeProfilePlot};
pub use plan::{
    BuildingBlockRef, BuildingBlockSource, BuildingBlockType, Input, IntroFile, ObservedDataSet,
    Plan, Project, Section, SimulationParameterRef, PROJECTS_SECTION,
};
pub use plots::{
    ComparisonTimeProfilePlot, DdiRatio, DdiRatioGroup, DdiRatioPlot, GofGroup, GofMergedPlot,
    PkRatioGroup, PkRatioPlot, PlotRef, PlotSet, ReferencesSimulations, SimulationKey,
    SimulationPlot, SimulationRef,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
