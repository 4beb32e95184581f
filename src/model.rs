use crate::error::{ConfigLoadError, ModelError};
use crate::vocabulary::TokenId;
use candle_core::{DType, Device, Tensor};
use candle_nn::rnn::{Direction, LSTMConfig};
use candle_nn::{Embedding, Linear, Module, VarBuilder, LSTM, RNN};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opaque scorer: one fixed-length id sequence in, one confidence out.
///
/// Implementations are shared by every worker thread, so `score` must be
/// safe to call concurrently through `&self`.
pub trait ScoringModel: Send + Sync {
    fn score(&self, tokens: &[TokenId]) -> Result<f32, ModelError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub confidence: f32,
    /// Wall-clock time of the model call alone.
    pub latency: Duration,
}

pub fn timed_score(model: &dyn ScoringModel, tokens: &[TokenId]) -> Result<Scored, ModelError> {
    let start = Instant::now();
    let confidence = model.score(tokens)?;
    let latency = start.elapsed();

    if !confidence.is_finite() {
        return Err(ModelError::NonFinite(confidence));
    }

    Ok(Scored {
        confidence,
        latency,
    })
}

/// Architecture description shipped next to the weights file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let malformed = |reason: String| ConfigLoadError::MalformedModelConfig {
            path: path.display().to_string(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: ModelConfig =
            serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?;

        if config.vocab_size == 0 || config.embedding_dim == 0 || config.hidden_dim == 0 {
            return Err(malformed(
                "vocab_size, embedding_dim and hidden_dim must all be positive".to_string(),
            ));
        }

        Ok(config)
    }
}

/// Embedding, single-layer bidirectional LSTM, linear head and sigmoid.
///
/// Weight names follow the PyTorch layout (`embedding.weight`,
/// `lstm.weight_ih_l0[_reverse]`, ..., `fc.weight`, `fc.bias`) so an exported
/// state dict converts to safetensors without renaming.
pub struct BiLstmClassifier {
    config: ModelConfig,
    device: Device,
    embedding: Embedding,
    forward: LSTM,
    backward: LSTM,
    head: Linear,
}

impl BiLstmClassifier {
    pub fn new(config: ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let device = vb.device().clone();
        let embedding = candle_nn::embedding(
            config.vocab_size,
            config.embedding_dim,
            vb.pp("embedding"),
        )?;
        let forward = candle_nn::lstm(
            config.embedding_dim,
            config.hidden_dim,
            LSTMConfig::default(),
            vb.pp("lstm"),
        )?;
        let backward = candle_nn::lstm(
            config.embedding_dim,
            config.hidden_dim,
            LSTMConfig {
                direction: Direction::Backward,
                ..LSTMConfig::default()
            },
            vb.pp("lstm"),
        )?;
        let head = candle_nn::linear(2 * config.hidden_dim, 1, vb.pp("fc"))?;

        Ok(BiLstmClassifier {
            config,
            device,
            embedding,
            forward,
            backward,
            head,
        })
    }

    /// Load safetensors weights plus the JSON architecture description.
    pub fn load(weights_path: &Path, config_path: &Path) -> Result<Self, ConfigLoadError> {
        let config = ModelConfig::load(config_path)?;
        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);

        let weights_error = |e: candle_core::Error| ConfigLoadError::ModelWeights {
            path: weights_path.display().to_string(),
            reason: e.to_string(),
        };

        let tensors = candle_core::safetensors::load(weights_path, &device).map_err(weights_error)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = Self::new(config, vb).map_err(weights_error)?;

        info!(
            "Loaded scoring model from {} ({})",
            weights_path.display(),
            model.describe()
        );
        Ok(model)
    }

    fn final_hidden(&self, lstm: &LSTM, ids: &[TokenId]) -> Result<Tensor, ModelError> {
        let input = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let embedded = self.embedding.forward(&input)?;
        let states = lstm.seq(&embedded)?;
        let last = states.last().ok_or(ModelError::EmptySequence)?;
        Ok(last.h().clone())
    }
}

fn first_value(output: &Tensor) -> Result<f32, ModelError> {
    let values = output.flatten_all()?.to_vec1::<f32>()?;
    values.first().copied().ok_or(ModelError::EmptyOutput)
}

impl ScoringModel for BiLstmClassifier {
    fn score(&self, tokens: &[TokenId]) -> Result<f32, ModelError> {
        if tokens.is_empty() {
            return Err(ModelError::EmptySequence);
        }
        if let Some(&id) = tokens
            .iter()
            .find(|&&id| id as usize >= self.config.vocab_size)
        {
            return Err(ModelError::TokenOutOfRange {
                id,
                vocab_size: self.config.vocab_size,
            });
        }

        // The reverse direction reads the padded sequence back to front.
        let reversed: Vec<TokenId> = tokens.iter().rev().copied().collect();
        let forward_h = self.final_hidden(&self.forward, tokens)?;
        let backward_h = self.final_hidden(&self.backward, &reversed)?;

        let features = Tensor::cat(&[&forward_h, &backward_h], 1)?;
        let logits = self.head.forward(&features)?;
        let probabilities = candle_nn::ops::sigmoid(&logits)?;

        first_value(&probabilities)
    }

    fn describe(&self) -> String {
        format!(
            "bilstm vocab_size={} embedding_dim={} hidden_dim={} device={:?}",
            self.config.vocab_size, self.config.embedding_dim, self.config.hidden_dim, self.device
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn zero_model() -> BiLstmClassifier {
        let config = ModelConfig {
            vocab_size: 16,
            embedding_dim: 4,
            hidden_dim: 3,
        };
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        BiLstmClassifier::new(config, vb).expect("zero-initialised model builds")
    }

    struct ConstantModel(f32);

    impl ScoringModel for ConstantModel {
        fn score(&self, _tokens: &[TokenId]) -> Result<f32, ModelError> {
            Ok(self.0)
        }

        fn describe(&self) -> String {
            "constant".to_string()
        }
    }

    #[test]
    fn zero_weights_score_one_half() {
        let model = zero_model();
        let confidence = model.score(&[12, 7, 0]).expect("score succeeds");
        assert!((confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_token_is_a_model_fault() {
        let model = zero_model();
        let err = model.score(&[3, 16, 0]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::TokenOutOfRange {
                id: 16,
                vocab_size: 16
            }
        ));
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let model = zero_model();
        assert!(matches!(model.score(&[]), Err(ModelError::EmptySequence)));
    }

    #[test]
    fn empty_output_tensor_is_its_own_fault() {
        let output = Tensor::zeros((1, 0), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(first_value(&output), Err(ModelError::EmptyOutput)));

        let output = Tensor::new(&[[0.25f32]], &Device::Cpu).unwrap();
        assert_eq!(first_value(&output).unwrap(), 0.25);
    }

    #[test]
    fn timed_score_reports_confidence_and_latency() {
        let scored = timed_score(&ConstantModel(0.87), &[1, 2, 3]).expect("score succeeds");
        assert_eq!(scored.confidence, 0.87);
        assert!(scored.latency <= Duration::from_secs(1));
    }

    #[test]
    fn timed_score_rejects_non_finite_confidence() {
        let err = timed_score(&ConstantModel(f32::NAN), &[1]).unwrap_err();
        assert!(matches!(err, ModelError::NonFinite(_)));
    }

    #[test]
    fn loads_model_config_fixture() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("test_data")
            .join("model-config.json");
        let config = ModelConfig::load(&path).expect("fixture parses");
        assert_eq!(
            config,
            ModelConfig {
                vocab_size: 16,
                embedding_dim: 4,
                hidden_dim: 3
            }
        );
    }

    #[test]
    fn missing_weights_fail_to_load() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_data");
        let err = BiLstmClassifier::load(
            &dir.join("missing.safetensors"),
            &dir.join("model-config.json"),
        )
        .err()
        .expect("missing weights must fail");
        assert!(matches!(err, ConfigLoadError::ModelWeights { .. }));
    }
}
