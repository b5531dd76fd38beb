//! Asset kinds and their output folders

use std::fmt;

/// What an asset is used for; decides where it lands on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Project snapshot handed to the worker
    Snapshot,
    /// Observed data file referenced by the report
    ObservedData,
    /// Markdown content of a report section
    Content,
    /// Introduction document
    Intro,
    /// Exported project input
    Input,
}

impl AssetKind {
    /// Folder used for this kind, both under the download area and the output root
    #[inline]
    #[must_use]
    pub const fn folder_name(self) -> &'static str {
        match self {
            Self::Snapshot => "Snapshots",
            Self::ObservedData => "ObservedData",
            Self::Content => "Content",
            Self::Intro => "Intro",
            Self::Input => "Inputs",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Snapshot => "Snapshot",
            Self::ObservedData => "Observed data",
            Self::Content => "Content",
            Self::Intro => "Introduction",
            Self::Input => "Input",
        };
        f.write_str(label)
    }
}
