//! Opaque generation parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tensor_codec::ModelFamily;

const SEED_KEY: &str = "seed";
const MODEL_KEY: &str = "model";
const MODEL_FAMILY_KEY: &str = "model_family";

/// Serialized generation parameters.
///
/// The blob belongs to the configuration subsystem. The queue only touches
/// the `seed` field, and reads `model` / `model_family` to pick the latent
/// calibration for previews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationConfig(pub Value);

impl GenerationConfig {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Configuration with the given seed and nothing else.
    pub fn with_seed(seed: i64) -> Self {
        let mut map = Map::new();
        map.insert(SEED_KEY.to_string(), Value::from(seed));
        Self(Value::Object(map))
    }

    /// The seed, if one is set as an integer.
    pub fn seed(&self) -> Option<i64> {
        self.0.get(SEED_KEY).and_then(Value::as_i64)
    }

    /// Overwrite the seed. A non-object blob is replaced by an object.
    pub fn set_seed(&mut self, seed: u32) {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.0 {
            map.insert(SEED_KEY.to_string(), Value::from(seed));
        }
    }

    /// Replace an absent or negative seed with a random one.
    ///
    /// Returns the generated seed, or `None` when the existing seed was kept.
    pub fn normalize_seed(&mut self) -> Option<u32> {
        if self.seed().is_some_and(|seed| seed >= 0) {
            return None;
        }
        let seed = rand::random::<u32>();
        self.set_seed(seed);
        Some(seed)
    }

    /// Model name, if present.
    pub fn model(&self) -> Option<&str> {
        self.0.get(MODEL_KEY).and_then(Value::as_str)
    }

    /// Model family for preview decoding: an explicit `model_family` wins,
    /// otherwise it is guessed from the model name.
    pub fn model_family(&self) -> Option<ModelFamily> {
        self.0
            .get(MODEL_FAMILY_KEY)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .or_else(|| self.model().and_then(ModelFamily::from_model_name))
    }

    /// Bytes handed to the generation service.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl From<Value> for GenerationConfig {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
