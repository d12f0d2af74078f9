//! Partition planning: how many archives a run assembles, and for which
//! languages.

use std::collections::BTreeSet;

use pgarchive_shared::Result;
use tracing::debug;

use crate::collaborators::LanguageCatalog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartitionMode {
    /// A single archive for the whole selection.
    #[default]
    Off,
    /// One archive per language, plus a combined one.
    OneLanguagePerArchive,
}

/// One archive assembly scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Languages in scope. Empty means every language.
    pub languages: Vec<String>,
    /// Whether this is the run's full-selection archive rather than a
    /// single-language one.
    pub combined: bool,
}

impl Partition {
    fn single(language: String) -> Self {
        Self {
            languages: vec![language],
            combined: false,
        }
    }

    fn combined(languages: Vec<String>) -> Self {
        Self {
            languages,
            combined: true,
        }
    }

    pub fn language_set(&self) -> BTreeSet<String> {
        self.languages.iter().cloned().collect()
    }
}

/// Compute the ordered list of partitions for a run.
///
/// The language catalog is queried at most once, only when partitioning
/// without a language filter.
pub async fn plan_partitions<C: LanguageCatalog + ?Sized>(
    mode: PartitionMode,
    languages: &BTreeSet<String>,
    catalog: &C,
) -> Result<Vec<Partition>> {
    let all: Vec<String> = languages.iter().cloned().collect();

    let plan = match mode {
        PartitionMode::Off => vec![Partition::combined(all)],
        PartitionMode::OneLanguagePerArchive if !all.is_empty() => all
            .iter()
            .cloned()
            .map(Partition::single)
            .chain(std::iter::once(Partition::combined(all.clone())))
            .collect(),
        PartitionMode::OneLanguagePerArchive => catalog
            .distinct_languages()
            .await?
            .into_iter()
            .map(Partition::single)
            .chain(std::iter::once(Partition::combined(Vec::new())))
            .collect(),
    };

    debug!(partitions = plan.len(), "partition plan ready");
    Ok(plan)
}
