use crate::database::PredictionSink;
use crate::error::PredictError;
use crate::hasher::content_hash;
use crate::model::{timed_score, ScoringModel};
use crate::tokenizer::Tokenizer;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Response record for one classified text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub text_hash: u64,
    /// Input exactly as received, before any normalisation.
    pub text: String,
    pub confidence: f32,
    /// Duration of the model call only.
    #[serde(rename = "nanosecond")]
    pub latency_ns: u64,
}

/// Per-process inference service, built once in `main` and shared by every
/// request worker.
pub struct Predictor {
    tokenizer: Tokenizer,
    model: Arc<dyn ScoringModel>,
    sequence_length: usize,
    sink: Option<Arc<dyn PredictionSink>>,
}

impl Predictor {
    pub fn new(tokenizer: Tokenizer, model: Arc<dyn ScoringModel>, sequence_length: usize) -> Self {
        Predictor {
            tokenizer,
            model,
            sequence_length,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PredictionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Run the whole pipeline for one text. No retries.
    pub fn predict(&self, text: &str) -> Result<PredictionResult, PredictError> {
        let tokens = self.tokenizer.tokenize(text, self.sequence_length);
        debug!(
            "Tokenized input: {:?}",
            &tokens[..tokens.len().min(10)]
        );

        // The hash does not depend on tokenization, so it runs beside the model call.
        let (scored, text_hash) = rayon::join(
            || timed_score(self.model.as_ref(), &tokens),
            || content_hash(text),
        );

        let scored = match scored {
            Ok(scored) => scored,
            Err(e) => {
                let err = PredictError::from(e);
                self.report_failure(&err);
                return Err(err);
            }
        };

        let latency_ns = u64::try_from(scored.latency.as_nanos()).unwrap_or(u64::MAX);
        let prediction = PredictionResult {
            text_hash,
            text: text.to_string(),
            confidence: scored.confidence,
            latency_ns,
        };

        info!(
            "Scored text {:016x}: confidence={:.4} latency={}ns",
            prediction.text_hash, prediction.confidence, prediction.latency_ns
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&prediction) {
                warn!(
                    "Failed to persist prediction {:016x}: {}",
                    prediction.text_hash, e
                );
            }
        }

        Ok(prediction)
    }

    /// Forward a failed request to the sink's log table, if one is attached.
    pub fn report_failure(&self, err: &PredictError) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record_log(err.log_kind(), &err.to_string()) {
                warn!("Failed to persist {} log entry: {}", err.log_kind(), e);
            }
        }
    }
}
