use crate::error::ConfigLoadError;
use crate::stemmer::Language;
use clap::Parser;
use std::path::PathBuf;

/// Sequence length of the deployed BiLSTM export.
pub const DEFAULT_SEQUENCE_LENGTH: usize = 295;

#[derive(Parser, Debug, Clone)]
#[command(name = "tweet_inference")]
#[command(about = "Serve tweet classification scores over HTTP")]
pub struct Config {
    /// Model weights (safetensors)
    #[arg(long, env = "TWEET_MODEL", default_value = "./model.safetensors")]
    pub model: PathBuf,

    /// Model architecture description (JSON)
    #[arg(long, env = "TWEET_MODEL_CONFIG", default_value = "./model-config.json")]
    pub model_config: PathBuf,

    /// Vocabulary definition (.json object or .csv with word,id columns)
    #[arg(long, env = "TWEET_VOCAB", default_value = "./word-index.json")]
    pub vocab: PathBuf,

    /// Stemmer language
    #[arg(long, env = "TWEET_LANGUAGE", value_enum, default_value_t = Language::English)]
    pub language: Language,

    /// Number of token ids fed to the model per request
    #[arg(long, env = "TWEET_SEQUENCE_LENGTH", default_value_t = DEFAULT_SEQUENCE_LENGTH)]
    pub sequence_length: usize,

    #[arg(long, env = "TWEET_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "TWEET_PORT", default_value_t = 3000)]
    pub port: u16,

    /// HTTP worker threads [default: available CPUs]
    #[arg(long, env = "TWEET_WORKERS")]
    pub workers: Option<usize>,

    /// SQLite file recording predictions and failures; disabled when unset
    #[arg(long, env = "TWEET_DATABASE")]
    pub database: Option<PathBuf>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.sequence_length == 0 {
            return Err(ConfigLoadError::InvalidSequenceLength(self.sequence_length));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|workers| *workers > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4)
    }
}
