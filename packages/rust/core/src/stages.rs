//! Stage selection: which pipeline stages a run executes.

use std::fmt;

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    CheckDeps,
    Prepare,
    Parse,
    Download,
    Assemble,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckDeps => "check dependencies",
            Self::Prepare => "prepare",
            Self::Parse => "parse",
            Self::Download => "download",
            Self::Assemble => "assemble",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage toggles as requested on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageFlags {
    pub prepare: bool,
    pub parse: bool,
    pub download: bool,
    pub assemble: bool,
    pub check_deps: bool,
    /// Run every stage regardless of the other toggles.
    pub complete: bool,
}

/// The resolved, immutable set of stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    prepare: bool,
    parse: bool,
    download: bool,
    assemble: bool,
    check_deps: bool,
}

impl StagePlan {
    /// Resolve requested toggles into a plan.
    ///
    /// With `complete`, or when none of prepare, parse, download and assemble
    /// is requested, every stage runs, dependency check included.
    pub fn resolve(flags: StageFlags) -> Self {
        let none_requested = !(flags.prepare || flags.parse || flags.download || flags.assemble);
        if flags.complete || none_requested {
            return Self::all();
        }
        Self {
            prepare: flags.prepare,
            parse: flags.parse,
            download: flags.download,
            assemble: flags.assemble,
            check_deps: flags.check_deps,
        }
    }

    pub fn all() -> Self {
        Self {
            prepare: true,
            parse: true,
            download: true,
            assemble: true,
            check_deps: true,
        }
    }

    pub fn runs(&self, stage: Stage) -> bool {
        match stage {
            Stage::CheckDeps => self.check_deps,
            Stage::Prepare => self.prepare,
            Stage::Parse => self.parse,
            Stage::Download => self.download,
            Stage::Assemble => self.assemble,
        }
    }

    /// Enabled stages in execution order.
    pub fn stages(&self) -> Vec<Stage> {
        [
            Stage::CheckDeps,
            Stage::Prepare,
            Stage::Parse,
            Stage::Download,
            Stage::Assemble,
        ]
        .into_iter()
        .filter(|s| self.runs(*s))
        .collect()
    }
}
