//! Testing utilities for the qualification runner workspace
//!
//! Shared plan fixtures, on-disk plan workspaces and a scriptable fake worker.

#![allow(missing_docs)]

use qr_plan::{MappingArtifact, Plan};
use std::path::{Path, PathBuf};

/// Two projects; P2 swaps a building block and a parameter from P1
pub const PLAN_FIXTURE: &str = r#"{
  "Projects": [
    { "Id": "P1", "Path": "p1.json" },
    { "Id": "P2", "Path": "p2.json",
      "BuildingBlocks": [ { "Type": "Compound", "Name": "Midazolam", "Project": "P1" } ],
      "SimulationParameters": [
        { "Path": "Organism|Weight", "TargetSimulations": ["S3"], "Project": "P1", "Simulation": "S1" }
      ] }
  ],
  "Plots": {
    "AllPlots": [
      { "Project": "P1", "Simulation": "S1", "SectionId": 1 },
      { "Project": "P2", "Simulation": "S3", "SectionId": 1 }
    ],
    "GOFMergedPlots": [
      { "Title": "GOF", "SectionId": 2,
        "Groups": [ { "Caption": "All", "OutputMappings": [ { "Project": "P1", "Simulation": "S2", "Output": "Plasma" } ] } ] }
    ],
    "AxesSettings": { "GOFMerged": [] }
  },
  "Sections": [
    { "Id": 1, "Title": "Results", "Content": "content/results.md",
      "Sections": [ { "Id": 2, "Title": "Goodness of fit" } ] }
  ],
  "ObservedDataSets": [ { "Id": "obs-1", "Path": "data/obs1.csv" } ],
  "Inputs": [
    { "Project": "P1", "Name": "Midazolam", "Type": "Compound", "SectionId": 1 },
    { "Project": "P2", "Name": "Adult", "Type": "Individual", "SectionId": 1 }
  ],
  "Intro": [ { "Path": "content/intro.md" } ]
}"#;

pub fn plan_fixture() -> Plan {
    Plan::from_json(PLAN_FIXTURE).unwrap()
}

/// Write an empty snapshot document named `name` into `dir`
pub fn write_snapshot(dir: &Path, name: &str) -> PathBuf {
    write_file(dir, name, "{}")
}

pub fn write_file(dir: &Path, relative: &str, content: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// Lay out [`PLAN_FIXTURE`] with every asset it references; returns the plan file
pub fn write_plan_workspace(dir: &Path) -> PathBuf {
    write_snapshot(dir, "p1.json");
    write_snapshot(dir, "p2.json");
    write_file(dir, "content/results.md", "# Results");
    write_file(dir, "content/intro.md", "# Introduction");
    write_file(dir, "data/obs1.csv", "Time,Concentration\n0,0\n");
    write_file(dir, "plan.json", PLAN_FIXTURE)
}

/// Mapping artifact a worker would produce for `project`
pub fn mapping_fixture(project: &str, simulations: &[&str]) -> MappingArtifact {
    let simulation_mappings: Vec<_> = simulations
        .iter()
        .map(|simulation| {
            serde_json::json!({
                "Project": project,
                "Simulation": simulation,
                "Path": format!("{project}/{simulation}"),
            })
        })
        .collect();
    let plots: Vec<_> = simulations
        .iter()
        .map(|simulation| {
            serde_json::json!({ "Project": project, "Simulation": simulation, "SectionId": 1 })
        })
        .collect();

    serde_json::from_value(serde_json::json!({
        "SimulationMappings": simulation_mappings,
        "ObservedDataMappings": [ { "Id": format!("{project}-obs"), "Path": format!("ObservedData/{project}.csv") } ],
        "Plots": plots,
        "Inputs": [ { "Project": project, "SectionId": 1, "Path": format!("Inputs/{project}.md") } ],
    }))
    .unwrap()
}

pub fn write_mapping(path: &Path, artifact: &MappingArtifact) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_string_pretty(artifact).unwrap()).unwrap();
}

/// Behavior of the fake worker written by [`write_fake_worker`]
#[derive(Debug, Clone, Default)]
pub struct FakeWorker {
    /// Projects whose validation exits with code 1
    pub fail_validation: Vec<String>,
    /// Projects whose run exits with code 1
    pub fail_run: Vec<String>,
    /// Seconds every run sleeps before writing its mapping
    pub run_delay_secs: u32,
}

impl FakeWorker {
    #[must_use]
    pub fn failing_validation(projects: &[&str]) -> Self {
        Self {
            fail_validation: projects.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_run(projects: &[&str]) -> Self {
        Self {
            fail_run: projects.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn slow(run_delay_secs: u32) -> Self {
        Self {
            run_delay_secs,
            ..Self::default()
        }
    }

    fn script(&self) -> String {
        let failures: Vec<String> = self
            .fail_validation
            .iter()
            .map(|p| format!("validate:{p}"))
            .chain(self.fail_run.iter().map(|p| format!("run:{p}")))
            .collect();
        let failure_arm = if failures.is_empty() {
            String::new()
        } else {
            format!(
                "  {}) echo \"Error: $mode failed for $project\" >> \"$log\"; exit 1 ;;\n",
                failures.join("|")
            )
        };

        format!(
            r#"#!/bin/sh
config=""
log=""
mode=""
while [ $# -gt 0 ]; do
  case "$1" in
    -i) config="$2"; shift 2 ;;
    -l) log="$2"; shift 2
        while [ $# -gt 0 ] && [ "${{1#-}}" = "$1" ]; do shift; done ;;
    -v) mode=validate; shift ;;
    -r) mode=run; shift ;;
    *) shift ;;
  esac
done
project=$(sed -n 's/^  "Project": "\(.*\)",$/\1/p' "$config")
mapping=$(sed -n 's/^  "MappingFile": "\(.*\)",$/\1/p' "$config")
echo "Debug: $mode started for $project" >> "$log"
case "$mode:$project" in
{failure_arm}esac
if [ "$mode" = run ]; then
  sleep {delay}
  cat > "$mapping" <<EOF
{{ "SimulationMappings": [ {{ "Project": "$project", "Simulation": "S1", "Path": "$project/S1" }} ],
  "ObservedDataMappings": [ {{ "Id": "obs-1", "Path": "ObservedData/duplicate.csv" }},
                            {{ "Id": "$project-obs", "Path": "ObservedData/$project.csv" }} ],
  "Plots": [ {{ "Project": "$project", "Simulation": "S1", "SectionId": 1 }} ],
  "Inputs": [ {{ "Project": "$project", "SectionId": 1, "Path": "Inputs/$project.md" }} ] }}
EOF
fi
echo "Information: $mode finished for $project" >> "$log"
exit 0
"#,
            delay = self.run_delay_secs,
        )
    }
}

/// Write an executable shell script honoring the worker command line
#[cfg(unix)]
pub fn write_fake_worker(dir: &Path, worker: &FakeWorker) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = write_file(dir, "fake-worker.sh", &worker.script());
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
