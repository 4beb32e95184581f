use crate::stemmer::Stemmer;
use crate::vocabulary::{TokenId, Vocabulary, UNKNOWN_TOKEN};
use std::sync::Arc;

/// Turns raw text into the fixed-length id sequence the model consumes.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocabulary: Arc<Vocabulary>,
    stemmer: Arc<Stemmer>,
}

impl Tokenizer {
    pub fn new(vocabulary: Arc<Vocabulary>, stemmer: Arc<Stemmer>) -> Self {
        Tokenizer {
            vocabulary,
            stemmer,
        }
    }

    /// Encode `text` into exactly `length` ids.
    ///
    /// Words are ASCII-whitespace-delimited, ASCII-lowercased, stemmed and looked up
    /// in order. Unknown words become `0`. Longer inputs keep their first
    /// `length` ids; shorter ones are right-padded with `0`.
    pub fn tokenize(&self, text: &str, length: usize) -> Vec<TokenId> {
        let mut ids: Vec<TokenId> = words(text)
            .take(length)
            .map(|word| {
                let lowered = word.to_ascii_lowercase();
                let stem = self.stemmer.stem(&lowered);
                self.vocabulary.lookup(&stem)
            })
            .collect();

        ids.resize(length, UNKNOWN_TOKEN);
        ids
    }
}

/// Split on ASCII whitespace only. Unicode spaces such as NBSP stay inside
/// the word they appear in.
fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| matches!(c, ' ' | '\t' | '\n' | '\x0B' | '\x0C' | '\r'))
        .filter(|word| !word.is_empty())
}
