use serde::{Deserialize, Serialize};

/// Defaults mirror the public service this replaces: 1000 total tokens,
/// mildly creative sampling, a single returned sequence.
#[derive(Deserialize, Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,

    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_p")]
    pub top_p: f64,

    #[serde(default = "default_num_return_sequences")]
    pub num_return_sequences: usize,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct GenerateResponse {
    /// Decoded first output sequence, prompt included, special tokens stripped.
    pub generated_text: String,

    /// Length of the raw output token sequence, prompt tokens included.
    pub tokens_used: usize,
}

fn default_max_length() -> usize {
    1000
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_num_return_sequences() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_request_gets_default_sampling_parameters() {
        let req: GenerateRequest = serde_json::from_str(r#"{"prompt": "What is 2+2?"}"#).unwrap();
        assert_eq!(req.prompt, "What is 2+2?");
        assert_eq!(req.max_length, 1000);
        assert_eq!(req.temperature, 0.7);
        assert_eq!(req.top_p, 0.9);
        assert_eq!(req.num_return_sequences, 1);
    }

    #[test]
    fn explicit_parameters_override_defaults() {
        let req: GenerateRequest = serde_json::from_str(
            r#"{"prompt": "hi", "max_length": 32, "temperature": 1.2, "top_p": 0.5, "num_return_sequences": 3}"#,
        )
        .unwrap();
        assert_eq!(req.max_length, 32);
        assert_eq!(req.temperature, 1.2);
        assert_eq!(req.top_p, 0.5);
        assert_eq!(req.num_return_sequences, 3);
    }

    #[test]
    fn prompt_is_required() {
        assert!(serde_json::from_str::<GenerateRequest>(r#"{"max_length": 10}"#).is_err());
    }
}
