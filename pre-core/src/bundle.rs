//! Context Bundle: the immutable per-task input assembled by the
//! preprocessors and consumed, never mutated, by the control loop.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Schema/statistics summary for one data file, produced by the
/// [`crate::preprocessors::FileAnalyzer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSchema {
    /// File name relative to the data directory.
    pub file_name: String,
    /// Exact column names in declaration order (tabular files only).
    pub columns: Vec<String>,
    /// Declared dtype per column, same order as `columns`.
    pub dtypes: Vec<String>,
    /// First few rows, rendered as strings.
    pub head_sample: Vec<String>,
    /// Last few rows, rendered as strings.
    pub tail_sample: Vec<String>,
    /// Value counts for low-cardinality categorical columns.
    pub categorical_value_counts: HashMap<String, HashMap<String, u64>>,
    /// Total row count, if applicable.
    pub row_count: Option<u64>,
    /// File size in bytes.
    pub byte_size: u64,
    /// Aggregate statistics that are ambiguous in the domain and must not be
    /// silently collapsed to one definition (see `SPEC_FULL.md` §9): e.g. a
    /// count-based and a volume-based reading of the same quantity, keyed by
    /// name so the Planner/Coder can choose.
    pub ambiguous_aggregates: HashMap<String, AmbiguousAggregate>,
}

/// Two readings of a domain-ambiguous aggregate, exposed rather than
/// resolved by the preprocessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbiguousAggregate {
    /// Count-based reading (e.g. number of matching rows).
    pub count_based: f64,
    /// Volume-based reading (e.g. sum of a monetary/quantity column).
    pub volume_based: f64,
}

/// A cross-reference index: entity name to the files that mention it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossReferenceIndex {
    pub entity_to_files: HashMap<String, Vec<String>>,
}

impl CrossReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `entity` appears in `file`.
    pub fn record(&mut self, entity: impl Into<String>, file: impl Into<String>) {
        let file = file.into();
        let entry = self.entity_to_files.entry(entity.into()).or_default();
        if !entry.contains(&file) {
            entry.push(file);
        }
    }

    /// Files that mention `entity`, if any.
    pub fn files_for(&self, entity: &str) -> &[String] {
        self.entity_to_files
            .get(entity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Hints extracted from the question about the expected answer shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatHints {
    /// The answer should be rendered as a list (e.g. `"[7]"`).
    pub as_list: bool,
    /// Fixed number of decimal places to render, if the question asked for one.
    pub decimal_places: Option<u32>,
    /// Raw substrings from the question that triggered these hints, useful
    /// for the Finalizer's retry-with-emphasis path.
    pub triggers: Vec<String>,
}

/// Immutable per-task bundle assembled before the loop starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub question: String,
    pub data_directory: PathBuf,
    /// Per-file schema summaries, keyed by file name.
    pub file_schemas: HashMap<String, FileSchema>,
    /// Per-file normalized markdown, keyed by file name.
    pub normalized_markdown: HashMap<String, String>,
    pub cross_reference: CrossReferenceIndex,
    pub format_hints: FormatHints,
}

impl ContextBundle {
    pub fn new(question: impl Into<String>, data_directory: impl Into<PathBuf>) -> Self {
        Self {
            question: question.into(),
            data_directory: data_directory.into(),
            file_schemas: HashMap::new(),
            normalized_markdown: HashMap::new(),
            cross_reference: CrossReferenceIndex::new(),
            format_hints: FormatHints::default(),
        }
    }

    /// File names known to this bundle, sorted for deterministic iteration.
    pub fn file_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.file_schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
