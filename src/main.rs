mod config;
mod database;
mod error;
mod hasher;
mod model;
mod predictor;
mod server;
mod stemmer;
mod tokenizer;
mod vocabulary;

use clap::Parser;
use config::Config;
use database::{Database, PredictionSink};
use error::ConfigLoadError;
use log::{error, info};
use model::{BiLstmClassifier, ScoringModel};
use predictor::Predictor;
use std::error::Error;
use std::sync::Arc;
use stemmer::Stemmer;
use tokenizer::Tokenizer;
use vocabulary::Vocabulary;

fn build_predictor(config: &Config) -> Result<Predictor, ConfigLoadError> {
    config.validate()?;

    let vocabulary = Arc::new(Vocabulary::load(&config.vocab)?);
    let stemmer = Arc::new(Stemmer::new(config.language));
    info!("Stemming with the {} Snowball algorithm", stemmer.language());

    let model: Arc<dyn ScoringModel> =
        Arc::new(BiLstmClassifier::load(&config.model, &config.model_config)?);

    let predictor = Predictor::new(
        Tokenizer::new(vocabulary, stemmer),
        model,
        config.sequence_length,
    );
    info!(
        "Token sequences padded or truncated to {} ids",
        predictor.sequence_length()
    );

    match &config.database {
        Some(path) => {
            let path = path.display().to_string();
            let db = Database::new(&path).map_err(|e| ConfigLoadError::Database {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let stored = db.get_prediction_count().map_err(|e| ConfigLoadError::Database {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            info!("Recording predictions to {} ({} already stored)", path, stored);
            let sink: Arc<dyn PredictionSink> = Arc::new(db);
            Ok(predictor.with_sink(sink))
        }
        None => {
            info!("Prediction sink disabled");
            Ok(predictor)
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();

    let config = Config::parse();

    let predictor = match build_predictor(&config) {
        Ok(predictor) => Arc::new(predictor),
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e.into());
        }
    };

    let addr = config.listen_addr();
    let server = server::bind(&addr).map_err(|e| {
        error!("Startup failed: {}", e);
        e
    })?;
    info!("{} is running at {}", server::APP_NAME, addr);

    server::serve(server, predictor, config.worker_count())?;
    Ok(())
}
