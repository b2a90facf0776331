//! Preprocessors that assemble a [`ContextBundle`] from a [`Corpus`] before
//! the control loop starts. These run once per task and their output is
//! never mutated by the loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::bundle::{AmbiguousAggregate, ContextBundle, CrossReferenceIndex, FileSchema, FormatHints};
use crate::llm::Corpus;
use crate::Result;

/// A column is treated as categorical when it has at most this many
/// distinct values — beyond this it's more likely a free-text or numeric
/// measure than a category the Planner/Coder would group by.
const CATEGORICAL_CARDINALITY_LIMIT: usize = 20;

/// Content-addressed cache of tabular [`FileSchema`] analyses, keyed by
/// `"{file_name}:{sha256(contents)}"`. Shared across [`FileAnalyzer`]
/// instances (and so across `solve()` calls against the same corpus) to
/// skip re-parsing files that haven't changed.
pub type FileAnalysisCache = Arc<Mutex<HashMap<String, FileSchema>>>;

/// Content-addressed cache of normalized markdown, same key shape as
/// [`FileAnalysisCache`]. Gives `DocumentNormalizer` the same
/// skip-when-cached idempotency as `FileAnalyzer` without needing a
/// writable `Corpus` to persist renderings to disk.
pub type NormalizedMarkdownCache = Arc<Mutex<HashMap<String, String>>>;

/// Substrings in a question that hint at the expected answer shape, checked
/// case-insensitively.
const LIST_TRIGGERS: &[&str] = &[
    "list of",
    "which of the following",
    "select all",
    "in a list",
    "as a list",
];
const DECIMAL_TRIGGERS: &[(&str, u32)] = &[("two decimal", 2), ("one decimal", 1), ("nearest cent", 2)];

/// Scans each corpus file and produces a [`FileSchema`] summary, without
/// interpreting column semantics — that's left to the agents. Tabular
/// analyses are cached by content hash when constructed with
/// [`FileAnalyzer::with_shared_cache`], so repeated `solve()` calls against
/// an unchanged corpus skip re-parsing it.
pub struct FileAnalyzer {
    cache: Option<FileAnalysisCache>,
}

impl FileAnalyzer {
    pub fn new() -> Self {
        Self { cache: None }
    }

    /// Construct an analyzer backed by a cache shared across instances —
    /// hand the same `cache` to every `FileAnalyzer` built for a given
    /// corpus across tasks to avoid re-parsing unchanged files.
    pub fn with_shared_cache(cache: FileAnalysisCache) -> Self {
        Self { cache: Some(cache) }
    }

    /// Analyze every file the corpus reports, keyed by file name.
    pub fn analyze(&self, corpus: &dyn Corpus) -> Result<HashMap<String, FileSchema>> {
        let mut schemas = HashMap::new();
        for file_name in corpus.list_files()? {
            let description = corpus.describe(std::path::Path::new(&file_name))?;
            let schema = if description.is_tabular {
                self.analyze_tabular(&file_name, corpus)?
            } else {
                FileSchema {
                    file_name: file_name.clone(),
                    columns: Vec::new(),
                    dtypes: Vec::new(),
                    head_sample: Vec::new(),
                    tail_sample: Vec::new(),
                    categorical_value_counts: HashMap::new(),
                    row_count: None,
                    byte_size: description.byte_size,
                    ambiguous_aggregates: HashMap::new(),
                }
            };
            schemas.insert(file_name, schema);
        }
        Ok(schemas)
    }

    fn analyze_tabular(&self, file_name: &str, corpus: &dyn Corpus) -> Result<FileSchema> {
        let contents = corpus.read_to_string(std::path::Path::new(file_name))?;
        let cache_key = cache_key(file_name, &contents);

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().unwrap().get(&cache_key) {
                return Ok(hit.clone());
            }
        }

        let schema = Self::parse_tabular(file_name, &contents);

        if let Some(cache) = &self.cache {
            cache.lock().unwrap().insert(cache_key, schema.clone());
        }

        Ok(schema)
    }

    fn parse_tabular(file_name: &str, contents: &str) -> FileSchema {
        let mut lines = contents.lines();
        let header = lines.next().unwrap_or_default();
        let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();
        let body: Vec<&str> = lines.collect();

        let head_sample = body.iter().take(3).map(|s| s.to_string()).collect();
        let tail_sample = body
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|s| s.to_string())
            .collect();

        let categorical_value_counts = Self::categorical_value_counts(&columns, &body);
        let ambiguous_aggregates = Self::ambiguous_aggregates(&columns, &body);

        FileSchema {
            file_name: file_name.to_string(),
            dtypes: vec!["string".to_string(); columns.len()],
            columns,
            head_sample,
            tail_sample,
            categorical_value_counts,
            row_count: Some(body.len() as u64),
            byte_size: contents.len() as u64,
            ambiguous_aggregates,
        }
    }

    /// Flags every (boolean-like flag column, numeric column) pair with both
    /// a count-based and a volume-based reading of "rate", rather than
    /// picking one — e.g. a `is_fraud`/`amount` pair yields both the share
    /// of flagged *rows* and the share of flagged *value*, which can
    /// legitimately disagree.
    fn ambiguous_aggregates(columns: &[String], body: &[&str]) -> HashMap<String, AmbiguousAggregate> {
        if body.is_empty() {
            return HashMap::new();
        }

        let rows: Vec<Vec<&str>> = body.iter().map(|r| r.split(',').map(str::trim).collect()).collect();
        let mut flag_columns = Vec::new();
        let mut numeric_columns = Vec::new();

        for (i, name) in columns.iter().enumerate() {
            let values: Vec<&str> = rows.iter().filter_map(|r| r.get(i).copied()).collect();
            if values.is_empty() {
                continue;
            }
            if is_boolean_like(&values) {
                flag_columns.push((i, name.clone()));
            } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
                numeric_columns.push((i, name.clone()));
            }
        }

        let mut result = HashMap::new();
        for (flag_idx, flag_name) in &flag_columns {
            for (numeric_idx, numeric_name) in &numeric_columns {
                let mut flagged_rows = 0u64;
                let mut flagged_volume = 0.0f64;
                let mut total_volume = 0.0f64;

                for row in &rows {
                    let (Some(flag), Some(raw_value)) = (row.get(*flag_idx), row.get(*numeric_idx)) else {
                        continue;
                    };
                    let Ok(value) = raw_value.parse::<f64>() else {
                        continue;
                    };
                    total_volume += value;
                    if is_truthy(flag) {
                        flagged_rows += 1;
                        flagged_volume += value;
                    }
                }

                if total_volume == 0.0 {
                    continue;
                }

                result.insert(
                    format!("{flag_name}_rate_by_{numeric_name}"),
                    AmbiguousAggregate {
                        count_based: flagged_rows as f64 / rows.len() as f64,
                        volume_based: flagged_volume / total_volume,
                    },
                );
            }
        }
        result
    }

    /// Per-column value counts, kept only for columns with repeated values
    /// and a low enough cardinality to be a plausible grouping key — an
    /// all-unique column (an id, a raw amount) is left out.
    fn categorical_value_counts(
        columns: &[String],
        body: &[&str],
    ) -> HashMap<String, HashMap<String, u64>> {
        let mut per_column: Vec<HashMap<String, u64>> = vec![HashMap::new(); columns.len()];
        for row in body {
            for (i, value) in row.split(',').enumerate() {
                if let Some(counts) = per_column.get_mut(i) {
                    *counts.entry(value.trim().to_string()).or_insert(0) += 1;
                }
            }
        }

        columns
            .iter()
            .cloned()
            .zip(per_column)
            .filter(|(_, counts)| {
                let distinct = counts.len();
                distinct > 0 && distinct <= CATEGORICAL_CARDINALITY_LIMIT && distinct < body.len()
            })
            .collect()
    }
}

/// Builds the cross-reference index: every distinct categorical value seen
/// in any file's schema is treated as an entity, and recorded against every
/// corpus file whose raw contents mention it. Adapted from a Topos/Lean
/// annotation-link index to generic cross-file entity mentions.
fn build_cross_reference(
    corpus: &dyn Corpus,
    file_schemas: &HashMap<String, FileSchema>,
) -> Result<CrossReferenceIndex> {
    let mut entities: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for schema in file_schemas.values() {
        for values in schema.categorical_value_counts.values() {
            entities.extend(values.keys().cloned());
        }
    }

    let mut index = CrossReferenceIndex::new();
    if entities.is_empty() {
        return Ok(index);
    }

    for file_name in file_schemas.keys() {
        let contents = corpus.read_to_string(std::path::Path::new(file_name))?;
        for entity in &entities {
            if contents.contains(entity.as_str()) {
                index.record(entity.clone(), file_name.clone());
            }
        }
    }
    Ok(index)
}

impl Default for FileAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

const TRUE_TOKENS: &[&str] = &["true", "1", "yes"];
const FALSE_TOKENS: &[&str] = &["false", "0", "no"];

/// A column reads as a boolean flag when every value is one of the
/// true/false tokens above and at most two distinct values appear.
fn is_boolean_like(values: &[&str]) -> bool {
    let all_tokens = values.iter().all(|v| {
        let lower = v.to_lowercase();
        TRUE_TOKENS.contains(&lower.as_str()) || FALSE_TOKENS.contains(&lower.as_str())
    });
    if !all_tokens {
        return false;
    }
    let distinct: std::collections::HashSet<String> =
        values.iter().map(|v| v.to_lowercase()).collect();
    distinct.len() <= 2
}

fn is_truthy(value: &str) -> bool {
    TRUE_TOKENS.contains(&value.to_lowercase().as_str())
}

fn cache_key(file_name: &str, contents: &str) -> String {
    let digest = Sha256::digest(contents.as_bytes());
    format!("{file_name}:{digest:x}")
}

/// Renders non-tabular corpus files (docs, readmes, schema descriptions)
/// into normalized markdown so agent prompts see a consistent format
/// regardless of source encoding. Idempotent when constructed with
/// [`DocumentNormalizer::with_shared_cache`]: a file whose contents haven't
/// changed is not re-rendered.
pub struct DocumentNormalizer {
    cache: Option<NormalizedMarkdownCache>,
}

impl DocumentNormalizer {
    pub fn new() -> Self {
        Self { cache: None }
    }

    /// Construct a normalizer backed by a cache shared across instances —
    /// hand the same `cache` to every `DocumentNormalizer` built for a given
    /// corpus across tasks to skip re-rendering unchanged files.
    pub fn with_shared_cache(cache: NormalizedMarkdownCache) -> Self {
        Self { cache: Some(cache) }
    }

    pub fn normalize(&self, corpus: &dyn Corpus) -> Result<HashMap<String, String>> {
        let mut normalized = HashMap::new();
        for file_name in corpus.list_files()? {
            let description = corpus.describe(std::path::Path::new(&file_name))?;
            if description.is_tabular {
                continue;
            }
            let raw = corpus.read_to_string(std::path::Path::new(&file_name))?;
            let key = cache_key(&file_name, &raw);

            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.lock().unwrap().get(&key) {
                    normalized.insert(file_name, hit.clone());
                    continue;
                }
            }

            let rendered = Self::to_markdown(&raw);
            if let Some(cache) = &self.cache {
                cache.lock().unwrap().insert(key, rendered.clone());
            }
            normalized.insert(file_name, rendered);
        }
        Ok(normalized)
    }

    fn to_markdown(raw: &str) -> String {
        raw.replace("\r\n", "\n").trim().to_string()
    }
}

impl Default for DocumentNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives [`FormatHints`] from the raw question text.
pub fn extract_format_hints(question: &str) -> FormatHints {
    let lowered = question.to_lowercase();
    let mut hints = FormatHints::default();

    for trigger in LIST_TRIGGERS {
        if lowered.contains(trigger) {
            hints.as_list = true;
            hints.triggers.push((*trigger).to_string());
        }
    }

    for (trigger, places) in DECIMAL_TRIGGERS {
        if lowered.contains(trigger) {
            hints.decimal_places = Some(*places);
            hints.triggers.push((*trigger).to_string());
        }
    }

    hints
}

/// Assembles a full [`ContextBundle`] by running both preprocessors and the
/// format-hint extractor over a corpus and question.
pub fn build_context_bundle(
    question: &str,
    data_directory: impl Into<std::path::PathBuf>,
    corpus: &dyn Corpus,
) -> Result<ContextBundle> {
    let mut bundle = ContextBundle::new(question, data_directory);
    bundle.file_schemas = FileAnalyzer::new().analyze(corpus)?;
    bundle.normalized_markdown = DocumentNormalizer::new().normalize(corpus)?;
    bundle.cross_reference = build_cross_reference(corpus, &bundle.file_schemas)?;
    bundle.format_hints = extract_format_hints(question);
    Ok(bundle)
}

/// Same as [`build_context_bundle`], but threads shared
/// [`FileAnalysisCache`]/[`NormalizedMarkdownCache`] handles through the
/// [`FileAnalyzer`]/[`DocumentNormalizer`] so both survive across tasks run
/// against the same corpus.
pub fn build_context_bundle_cached(
    question: &str,
    data_directory: impl Into<std::path::PathBuf>,
    corpus: &dyn Corpus,
    cache: FileAnalysisCache,
    markdown_cache: NormalizedMarkdownCache,
) -> Result<ContextBundle> {
    let mut bundle = ContextBundle::new(question, data_directory);
    bundle.file_schemas = FileAnalyzer::with_shared_cache(cache).analyze(corpus)?;
    bundle.normalized_markdown = DocumentNormalizer::with_shared_cache(markdown_cache).normalize(corpus)?;
    bundle.cross_reference = build_cross_reference(corpus, &bundle.file_schemas)?;
    bundle.format_hints = extract_format_hints(question);
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CorpusDescription;
    use std::path::Path;

    struct StubCorpus {
        files: HashMap<String, (bool, String)>,
    }

    impl Corpus for StubCorpus {
        fn describe(&self, path: &Path) -> Result<CorpusDescription> {
            let name = path.to_string_lossy().to_string();
            let (is_tabular, contents) = self.files.get(&name).unwrap();
            Ok(CorpusDescription {
                file_name: name.clone(),
                byte_size: contents.len() as u64,
                is_tabular: *is_tabular,
                preview: contents.chars().take(32).collect(),
            })
        }

        fn list_files(&self) -> Result<Vec<String>> {
            Ok(self.files.keys().cloned().collect())
        }

        fn read_to_string(&self, path: &Path) -> Result<String> {
            let name = path.to_string_lossy().to_string();
            Ok(self.files.get(&name).unwrap().1.clone())
        }
    }

    #[test]
    fn file_analyzer_parses_csv_header() {
        let mut files = HashMap::new();
        files.insert(
            "payments.csv".to_string(),
            (true, "country,amount\nNL,10\nBE,20\n".to_string()),
        );
        let corpus = StubCorpus { files };
        let schemas = FileAnalyzer::new().analyze(&corpus).unwrap();
        let schema = &schemas["payments.csv"];
        assert_eq!(schema.columns, vec!["country", "amount"]);
        assert_eq!(schema.row_count, Some(2));
    }

    #[test]
    fn shared_cache_short_circuits_reparsing() {
        let mut files = HashMap::new();
        let contents = "country,amount\nNL,10\nBE,20\n".to_string();
        files.insert("payments.csv".to_string(), (true, contents.clone()));
        let corpus = StubCorpus { files };

        let cache: FileAnalysisCache = Arc::new(Mutex::new(HashMap::new()));
        let key = cache_key("payments.csv", &contents);
        cache.lock().unwrap().insert(
            key,
            FileSchema {
                file_name: "payments.csv".into(),
                columns: vec!["sentinel".into()],
                dtypes: vec![],
                head_sample: vec![],
                tail_sample: vec![],
                categorical_value_counts: HashMap::new(),
                row_count: Some(999),
                byte_size: 0,
                ambiguous_aggregates: HashMap::new(),
            },
        );

        let schemas = FileAnalyzer::with_shared_cache(cache)
            .analyze(&corpus)
            .unwrap();
        let schema = &schemas["payments.csv"];
        assert_eq!(schema.columns, vec!["sentinel"]);
        assert_eq!(schema.row_count, Some(999));
    }

    #[test]
    fn cache_populated_after_first_analysis() {
        let mut files = HashMap::new();
        let contents = "country,amount\nNL,10\n".to_string();
        files.insert("payments.csv".to_string(), (true, contents.clone()));
        let corpus = StubCorpus { files };

        let cache: FileAnalysisCache = Arc::new(Mutex::new(HashMap::new()));
        FileAnalyzer::with_shared_cache(cache.clone())
            .analyze(&corpus)
            .unwrap();

        let key = cache_key("payments.csv", &contents);
        assert!(cache.lock().unwrap().contains_key(&key));
    }

    #[test]
    fn low_cardinality_column_is_kept_high_cardinality_is_not() {
        let mut files = HashMap::new();
        files.insert(
            "payments.csv".to_string(),
            (true, "issuing_country,amount\nNL,10\nNL,20\nDE,5\n".to_string()),
        );
        let corpus = StubCorpus { files };
        let schemas = FileAnalyzer::new().analyze(&corpus).unwrap();
        let schema = &schemas["payments.csv"];

        let countries = &schema.categorical_value_counts["issuing_country"];
        assert_eq!(countries["NL"], 2);
        assert_eq!(countries["DE"], 1);
        assert!(!schema.categorical_value_counts.contains_key("amount"));
    }

    #[test]
    fn ambiguous_aggregate_exposes_both_readings() {
        let mut files = HashMap::new();
        files.insert(
            "transactions.csv".to_string(),
            (
                true,
                "is_fraud,amount\ntrue,100\nfalse,100\nfalse,100\ntrue,300\n".to_string(),
            ),
        );
        let corpus = StubCorpus { files };
        let schemas = FileAnalyzer::new().analyze(&corpus).unwrap();
        let schema = &schemas["transactions.csv"];

        let aggregate = &schema.ambiguous_aggregates["is_fraud_rate_by_amount"];
        assert_eq!(aggregate.count_based, 0.5);
        assert_eq!(aggregate.volume_based, 400.0 / 600.0);
    }

    #[test]
    fn cross_reference_links_entity_to_every_mentioning_file() {
        let mut files = HashMap::new();
        files.insert(
            "payments.csv".to_string(),
            (true, "issuing_country,amount\nNL,10\nNL,20\nDE,5\n".to_string()),
        );
        files.insert(
            "acquirer_countries.csv".to_string(),
            (true, "merchant_category,country\nretail,NL\ntravel,DE\n".to_string()),
        );
        let corpus = StubCorpus { files };

        let bundle = build_context_bundle("q", "/data", &corpus).unwrap();
        let mut files_for_nl = bundle.cross_reference.files_for("NL").to_vec();
        files_for_nl.sort();
        assert_eq!(files_for_nl, vec!["acquirer_countries.csv", "payments.csv"]);
    }

    #[test]
    fn format_hints_detect_list_and_decimal_triggers() {
        let hints = extract_format_hints("Which of the following countries, to two decimal places?");
        assert!(hints.as_list);
        assert_eq!(hints.decimal_places, Some(2));
    }

    #[test]
    fn document_normalizer_skips_tabular_files() {
        let mut files = HashMap::new();
        files.insert("data.csv".to_string(), (true, "a,b\n1,2\n".to_string()));
        files.insert("readme.md".to_string(), (false, "Hello\r\nWorld\r\n".to_string()));
        let corpus = StubCorpus { files };
        let normalized = DocumentNormalizer::new().normalize(&corpus).unwrap();
        assert!(!normalized.contains_key("data.csv"));
        assert_eq!(normalized["readme.md"], "Hello\nWorld");
    }

    #[test]
    fn document_normalizer_shared_cache_short_circuits_rerendering() {
        let mut files = HashMap::new();
        let contents = "Hello\r\nWorld\r\n".to_string();
        files.insert("readme.md".to_string(), (false, contents.clone()));
        let corpus = StubCorpus { files };

        let cache: NormalizedMarkdownCache = Arc::new(Mutex::new(HashMap::new()));
        let key = cache_key("readme.md", &contents);
        cache
            .lock()
            .unwrap()
            .insert(key, "SENTINEL".to_string());

        let normalized = DocumentNormalizer::with_shared_cache(cache)
            .normalize(&corpus)
            .unwrap();
        assert_eq!(normalized["readme.md"], "SENTINEL");
    }
}
