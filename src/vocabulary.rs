use crate::error::ConfigLoadError;
use csv::ReaderBuilder;
use log::info;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;

pub type TokenId = u32;

/// Id assigned to every word the vocabulary does not know. Also the padding value.
pub const UNKNOWN_TOKEN: TokenId = 0;

/// Word-to-id table consumed by the scoring model.
///
/// Built once at startup and never mutated, so it is shared across request
/// workers behind an `Arc` without any locking.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    word_to_id: HashMap<String, TokenId>,
}

impl Vocabulary {
    #[cfg(test)]
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, TokenId)>,
        S: Into<String>,
    {
        Vocabulary {
            word_to_id: pairs
                .into_iter()
                .map(|(word, id)| (word.into(), id))
                .collect(),
        }
    }

    /// Load a vocabulary definition, picking the parser from the file extension.
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let vocabulary = match extension.as_str() {
            "json" => Self::load_json(path)?,
            "csv" => Self::load_csv(path)?,
            _ => {
                return Err(ConfigLoadError::UnsupportedVocabularyFormat {
                    path: path.display().to_string(),
                })
            }
        };

        if vocabulary.is_empty() {
            return Err(ConfigLoadError::MalformedVocabulary {
                path: path.display().to_string(),
                reason: "definition contains no entries".to_string(),
            });
        }

        info!(
            "Loaded vocabulary of {} words from {}",
            vocabulary.len(),
            path.display()
        );
        Ok(vocabulary)
    }

    /// Expects a flat JSON object: `{"word": id, ...}`.
    fn load_json(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let word_to_id: HashMap<String, TokenId> =
            serde_json::from_str(&content).map_err(|e| ConfigLoadError::MalformedVocabulary {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Vocabulary { word_to_id })
    }

    /// Expects a header row with `word` and `id` columns, in any order.
    fn load_csv(path: &Path) -> Result<Self, ConfigLoadError> {
        let malformed = |reason: String| ConfigLoadError::MalformedVocabulary {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|source| ConfigLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| malformed(format!("failed to read headers: {}", e)))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| malformed(format!("missing '{}' column", name)))
        };
        let word_index = column("word")?;
        let id_index = column("id")?;

        let mut word_to_id = HashMap::new();
        for (line_index, record) in reader.records().enumerate() {
            // header is line 1
            let display_line = line_index + 2;
            let record = record.map_err(|e| malformed(format!("line {}: {}", display_line, e)))?;

            let word = record
                .get(word_index)
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .ok_or_else(|| malformed(format!("line {}: empty word", display_line)))?;
            let id = record
                .get(id_index)
                .ok_or_else(|| malformed(format!("line {}: missing id", display_line)))?
                .trim()
                .parse::<TokenId>()
                .map_err(|e| malformed(format!("line {}: invalid id: {}", display_line, e)))?;

            if word_to_id.insert(word.to_string(), id).is_some() {
                return Err(malformed(format!(
                    "line {}: duplicate word '{}'",
                    display_line, word
                )));
            }
        }

        Ok(Vocabulary { word_to_id })
    }

    pub fn lookup(&self, word: &str) -> TokenId {
        self.word_to_id.get(word).copied().unwrap_or(UNKNOWN_TOKEN)
    }

    pub fn len(&self) -> usize {
        self.word_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_to_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("test_data")
            .join(name)
    }

    #[test]
    fn lookup_returns_stored_id_or_unknown() {
        let vocab = Vocabulary::from_pairs([("great", 12), ("day", 7)]);
        assert_eq!(vocab.lookup("great"), 12);
        assert_eq!(vocab.lookup("day"), 7);
        assert_eq!(vocab.lookup("terrible"), UNKNOWN_TOKEN);
        assert_eq!(vocab.lookup(""), UNKNOWN_TOKEN);
    }

    #[test]
    fn loads_json_word_index() {
        let vocab = Vocabulary::load(&fixture("word-index.json")).expect("json fixture loads");
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.lookup("great"), 12);
        assert_eq!(vocab.lookup("happi"), 3);
    }

    #[test]
    fn loads_csv_word_index() {
        let vocab = Vocabulary::load(&fixture("word-index.csv")).expect("csv fixture loads");
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.lookup("day"), 7);
        assert_eq!(vocab.lookup("tweet"), 5);
    }

    #[test]
    fn rejects_negative_ids() {
        let err = Vocabulary::load(&fixture("word-index-negative.json")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::MalformedVocabulary { .. }));
    }

    fn assert_malformed(name: &str, reason_fragment: &str) {
        match Vocabulary::load(&fixture(name)) {
            Err(ConfigLoadError::MalformedVocabulary { reason, .. }) => assert!(
                reason.contains(reason_fragment),
                "{}: unexpected reason '{}'",
                name,
                reason
            ),
            other => panic!("{}: expected MalformedVocabulary, got {:?}", name, other),
        }
    }

    #[test]
    fn rejects_duplicate_csv_word() {
        assert_malformed("word-index-duplicate.csv", "line 4: duplicate word 'great'");
    }

    #[test]
    fn rejects_csv_without_word_column() {
        assert_malformed("word-index-no-word.csv", "missing 'word' column");
    }

    #[test]
    fn rejects_csv_without_id_column() {
        assert_malformed("word-index-no-id.csv", "missing 'id' column");
    }

    #[test]
    fn rejects_non_integer_csv_id() {
        assert_malformed("word-index-bad-id.csv", "line 3: invalid id");
    }

    #[test]
    fn rejects_empty_definitions() {
        assert_malformed("word-index-empty.json", "no entries");
        assert_malformed("word-index-empty.csv", "no entries");
    }

    #[test]
    fn rejects_missing_file() {
        let err = Vocabulary::load(&fixture("does-not-exist.json")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Io { .. }));
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = Vocabulary::load(&fixture("word-index.txt")).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::UnsupportedVocabularyFormat { .. }
        ));
    }
}
