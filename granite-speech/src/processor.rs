//! Processor that aligns audio placeholders in text with audio features.
//!
//! Each audio placeholder in a prompt stands for one clip. The processor
//! expands it into as many placeholders as the clip produces audio tokens, so
//! the tokenized prompt has exactly one position per audio embedding.

use crate::audio::{AudioInput, describe};
use crate::error::{ConfigError, Error, ProcessorError, Result};
use crate::feature_extractor::{self, FeatureExtractor};
use crate::types::{Device, ModelRepo};
use eyre::{WrapErr, eyre};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::path::Path;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

/// File name of the serialized processor config.
pub const CONFIG_FILE: &str = "processor_config.json";

/// File name of the serialized tokenizer.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub const DEFAULT_AUDIO_TOKEN: &str = "<|audio|>";

/// Processor configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub processor_class: String,
    /// Placeholder marking where one audio clip goes in a prompt
    pub audio_token: String,
    /// Reject text/audio count mismatches instead of tolerating them
    pub strict_alignment: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            processor_class: "GraniteSpeechProcessor".to_string(),
            audio_token: DEFAULT_AUDIO_TOKEN.to_string(),
            strict_alignment: false,
        }
    }
}

impl ProcessorConfig {
    /// Load a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// One or more prompts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextBatch(Vec<String>);

impl TextBatch {
    pub fn prompts(&self) -> &[String] {
        &self.0
    }

    pub fn into_prompts(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for TextBatch {
    fn from(text: &str) -> Self {
        Self(vec![text.to_string()])
    }
}

impl From<String> for TextBatch {
    fn from(text: String) -> Self {
        Self(vec![text])
    }
}

impl From<Vec<String>> for TextBatch {
    fn from(texts: Vec<String>) -> Self {
        Self(texts)
    }
}

impl From<Vec<&str>> for TextBatch {
    fn from(texts: Vec<&str>) -> Self {
        Self(texts.into_iter().map(str::to_string).collect())
    }
}

impl TryFrom<&Value> for TextBatch {
    type Error = Error;

    /// Accept a string or a non-empty array of strings.
    fn try_from(value: &Value) -> Result<Self> {
        let invalid = || ProcessorError::InvalidText(describe(value));

        match value {
            Value::String(text) => Ok(Self(vec![text.clone()])),
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Self)
                .ok_or_else(|| invalid().into()),
            _ => Err(invalid().into()),
        }
    }
}

/// Per-call tokenizer settings.
///
/// `padding` and `truncation` override the tokenizer's own settings for one
/// call only.
#[derive(Clone, Debug)]
pub struct TokenizerOptions {
    pub add_special_tokens: bool,
    pub padding: Option<PaddingParams>,
    pub truncation: Option<TruncationParams>,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            add_special_tokens: true,
            padding: None,
            truncation: None,
        }
    }
}

/// Processor input: prompts, optional audio, the requested device and
/// tokenizer options.
#[derive(Clone, Debug, Default)]
pub struct ProcessorRequest {
    pub text: Option<TextBatch>,
    pub audio: Option<AudioInput>,
    pub device: Device,
    pub tokenizer_options: TokenizerOptions,
}

impl ProcessorRequest {
    pub fn new(text: impl Into<TextBatch>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_audio(mut self, audio: impl Into<AudioInput>) -> Self {
        self.audio = Some(audio.into());
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_add_special_tokens(mut self, add_special_tokens: bool) -> Self {
        self.tokenizer_options.add_special_tokens = add_special_tokens;
        self
    }

    pub fn with_padding(mut self, padding: PaddingParams) -> Self {
        self.tokenizer_options.padding = Some(padding);
        self
    }

    pub fn with_truncation(mut self, truncation: TruncationParams) -> Self {
        self.tokenizer_options.truncation = Some(truncation);
        self
    }
}

impl TryFrom<&Value> for ProcessorRequest {
    type Error = Error;

    /// Parse a JSON request with `text`, `audio`, `device` and
    /// `add_special_tokens` keys.
    fn try_from(value: &Value) -> Result<Self> {
        let field = |key: &str| value.get(key).filter(|v| !v.is_null());

        let text = field("text").map(TextBatch::try_from).transpose()?;
        let audio = field("audio").map(AudioInput::try_from).transpose()?;

        let device = match field("device") {
            None => Device::Cpu,
            Some(Value::String(name)) => name.parse()?,
            Some(other) => return Err(ProcessorError::InvalidDevice(describe(other)).into()),
        };

        let add_special_tokens = match field("add_special_tokens") {
            None => true,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(ProcessorError::InvalidTokenizerOption(format!(
                    "add_special_tokens: {}",
                    describe(other)
                ))
                .into());
            }
        };

        Ok(Self {
            text,
            audio,
            device,
            tokenizer_options: TokenizerOptions {
                add_special_tokens,
                ..Default::default()
            },
        })
    }
}

/// Tokenized prompts merged with audio features.
#[derive(Clone, Debug)]
pub struct BatchFeature {
    /// Prompts after placeholder expansion
    pub prompts: Vec<String>,
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    /// Features (batch, time_steps, 2 * n_mels), present when audio was given
    pub input_features: Option<Array3<f32>>,
}

impl BatchFeature {
    /// Count occurrences of a token id across all sequences.
    pub fn count_token(&self, token_id: u32) -> usize {
        self.input_ids
            .iter()
            .flatten()
            .filter(|&&id| id == token_id)
            .count()
    }

    /// Device holding the features; always the host.
    pub fn device(&self) -> Device {
        Device::Cpu
    }
}

/// Granite Speech processor combining the feature extractor and tokenizer.
#[derive(Clone, Debug)]
pub struct Processor {
    feature_extractor: FeatureExtractor,
    tokenizer: Tokenizer,
    config: ProcessorConfig,
}

impl Processor {
    /// Create a processor.
    ///
    /// Enables batch-longest padding on the tokenizer if none is configured.
    pub fn new(
        feature_extractor: FeatureExtractor,
        mut tokenizer: Tokenizer,
        config: ProcessorConfig,
    ) -> Result<Self> {
        if config.audio_token.is_empty() {
            return Err(ConfigError::EmptyAudioToken.into());
        }

        if tokenizer.get_padding().is_none() {
            tokenizer.with_padding(Some(PaddingParams::default()));
        }

        if tokenizer.token_to_id(&config.audio_token).is_none() {
            tracing::warn!(
                audio_token = %config.audio_token,
                "audio token is not in the tokenizer vocabulary"
            );
        }

        Ok(Self {
            feature_extractor,
            tokenizer,
            config,
        })
    }

    /// Load a processor from a model repository.
    ///
    /// `tokenizer.json` is required; `preprocessor_config.json` and
    /// `processor_config.json` fall back to defaults when absent.
    pub fn from_repo(repo: &ModelRepo) -> eyre::Result<Self> {
        let tokenizer_path = repo.resolve(TOKENIZER_FILE)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| eyre!(e))
            .wrap_err(format!(
                "failed to load tokenizer from {:?}",
                tokenizer_path
            ))?;

        let feature_extractor = match repo.resolve_optional(feature_extractor::CONFIG_FILE)? {
            Some(path) => FeatureExtractor::from_file(&path)
                .wrap_err(format!("failed to load feature extractor from {path:?}"))?,
            None => {
                tracing::warn!(
                    file = feature_extractor::CONFIG_FILE,
                    "not in repository, using default feature extractor config"
                );
                FeatureExtractor::default()
            }
        };

        let config = match repo.resolve_optional(CONFIG_FILE)? {
            Some(path) => ProcessorConfig::from_file(&path)
                .wrap_err(format!("failed to load processor config from {path:?}"))?,
            None => {
                tracing::debug!(file = CONFIG_FILE, "using default processor config");
                ProcessorConfig::default()
            }
        };

        Ok(Self::new(feature_extractor, tokenizer, config)?)
    }

    /// Write tokenizer, feature extractor and processor configs to `dir`.
    pub fn save_pretrained(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(ConfigError::Io)?;

        self.feature_extractor
            .save(dir.join(feature_extractor::CONFIG_FILE))?;

        let json = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(dir.join(CONFIG_FILE), json).map_err(ConfigError::Io)?;

        self.tokenizer
            .save(dir.join(TOKENIZER_FILE), true)
            .map_err(Error::Tokenizers)?;

        tracing::debug!(dir = %dir.display(), "saved processor");

        Ok(())
    }

    /// Override the alignment mode loaded from `processor_config.json`.
    pub fn with_strict_alignment(mut self, strict: bool) -> Self {
        self.config.strict_alignment = strict;
        self
    }

    pub fn feature_extractor(&self) -> &FeatureExtractor {
        &self.feature_extractor
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn audio_token(&self) -> &str {
        &self.config.audio_token
    }

    /// Vocabulary id of the audio token, if the tokenizer knows it.
    pub fn audio_token_id(&self) -> Option<u32> {
        self.tokenizer.token_to_id(&self.config.audio_token)
    }

    /// Validate inputs, extract features, expand placeholders and tokenize.
    ///
    /// # Errors
    ///
    /// - [`ProcessorError::MissingText`] / [`ProcessorError::InvalidText`] for bad text
    /// - [`ProcessorError::AlignmentMismatch`] / [`ProcessorError::UnexpectedAudioTokens`]
    ///   when `strict_alignment` is set and clips do not match placeholders
    /// - feature extraction and tokenizer errors
    pub fn process(&self, request: ProcessorRequest) -> Result<BatchFeature> {
        let prompts = request
            .text
            .ok_or(ProcessorError::MissingText)?
            .into_prompts();

        if prompts.is_empty() {
            return Err(ProcessorError::InvalidText("empty list".to_string()).into());
        }

        let audio_token = self.config.audio_token.as_str();
        let expected: usize = prompts.iter().map(|p| p.matches(audio_token).count()).sum();

        let (prompts, input_features) = match request.audio {
            None => {
                if expected > 0 {
                    if self.config.strict_alignment {
                        return Err(ProcessorError::UnexpectedAudioTokens(expected).into());
                    }
                    tracing::warn!(expected, "no audio provided for audio tokens");
                }
                (prompts, None)
            }
            Some(audio) => {
                let padding_value = self.feature_extractor.config().padding_value;
                let batch = audio.into_batch(padding_value)?;

                let clips = batch.lengths.len();
                if clips != expected {
                    if self.config.strict_alignment {
                        return Err(ProcessorError::AlignmentMismatch {
                            expected,
                            got: clips,
                        }
                        .into());
                    }
                    tracing::warn!(expected, clips, "text/audio mismatch");
                }

                let features = self
                    .feature_extractor
                    .extract(batch.samples.view(), &request.device)?;

                let counts = self.feature_extractor.num_audio_features(&batch.lengths);
                let (prompts, consumed) = expand_audio_placeholders(&prompts, audio_token, &counts);

                tracing::debug!(?counts, consumed, "expanded audio placeholders");

                (prompts, Some(features))
            }
        };

        let TokenizerOptions {
            add_special_tokens,
            padding,
            truncation,
        } = request.tokenizer_options;

        let tokenizer = if padding.is_none() && truncation.is_none() {
            Cow::Borrowed(&self.tokenizer)
        } else {
            let mut tokenizer = self.tokenizer.clone();
            if padding.is_some() {
                tokenizer.with_padding(padding);
            }
            if truncation.is_some() {
                tokenizer
                    .with_truncation(truncation)
                    .map_err(Error::Tokenizers)?;
            }
            Cow::Owned(tokenizer)
        };

        let encodings = tokenizer
            .encode_batch(prompts.clone(), add_special_tokens)
            .map_err(Error::Tokenizers)?;

        let input_ids = encodings.iter().map(|e| e.get_ids().to_vec()).collect();
        let attention_mask = encodings
            .iter()
            .map(|e| e.get_attention_mask().to_vec())
            .collect();

        Ok(BatchFeature {
            prompts,
            input_ids,
            attention_mask,
            input_features,
        })
    }
}

/// Expand each placeholder into a run of `counts[i]` placeholders.
///
/// Placeholders are matched left to right within a prompt and prompts are
/// visited in order, with one count consumed per placeholder. Placeholders
/// beyond the available counts are kept as a single placeholder.
///
/// Returns the expanded prompts and the number of counts consumed.
pub fn expand_audio_placeholders(
    prompts: &[String],
    audio_token: &str,
    counts: &[usize],
) -> (Vec<String>, usize) {
    let mut cursor = 0;
    let mut expanded = Vec::with_capacity(prompts.len());

    for prompt in prompts {
        let mut out = String::with_capacity(prompt.len());
        let mut last = 0;

        for (start, _) in prompt.match_indices(audio_token) {
            out.push_str(&prompt[last..start]);

            let repeat = counts.get(cursor).copied().unwrap_or(1);
            out.push_str(&audio_token.repeat(repeat));

            cursor += 1;
            last = start + audio_token.len();
        }

        out.push_str(&prompt[last..]);
        expanded.push(out);
    }

    (expanded, cursor.min(counts.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use serde_json::json;
    use std::str::FromStr;

    const AUDIO: &str = DEFAULT_AUDIO_TOKEN;

    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 0, "content": "[PAD]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 2, "content": "<|audio|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "[PAD]": 0, "[UNK]": 1, "<|audio|>": 2, "Can": 3, "you": 4,
                "compare": 5, "this": 6, "audio": 7, "?": 8, "transcribe": 9
            },
            "unk_token": "[UNK]"
        }
    }"#;

    fn processor(strict_alignment: bool) -> Processor {
        let tokenizer = Tokenizer::from_str(TOKENIZER_JSON).unwrap();
        let config = ProcessorConfig {
            strict_alignment,
            ..Default::default()
        };
        Processor::new(FeatureExtractor::default(), tokenizer, config).unwrap()
    }

    fn prompts(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn clip(len: usize) -> Array1<f32> {
        Array1::from_shape_fn(len, |i| ((i * 7919) % 1000) as f32 / 1000.0 - 0.5)
    }

    #[test]
    fn expands_placeholders_in_clip_order() {
        let (expanded, consumed) =
            expand_audio_placeholders(&prompts(&["a <|audio|> b <|audio|> c"]), AUDIO, &[2, 3]);

        assert_eq!(
            expanded[0],
            format!("a {} b {} c", AUDIO.repeat(2), AUDIO.repeat(3))
        );
        assert_eq!(consumed, 2);
    }

    #[test]
    fn shares_cursor_across_prompts() {
        let (expanded, consumed) = expand_audio_placeholders(
            &prompts(&["<|audio|>x", "none", "y<|audio|><|audio|>"]),
            AUDIO,
            &[1, 2, 3],
        );

        assert_eq!(expanded[0], format!("{}x", AUDIO));
        assert_eq!(expanded[1], "none");
        assert_eq!(expanded[2], format!("y{}{}", AUDIO.repeat(2), AUDIO.repeat(3)));
        assert_eq!(consumed, 3);
    }

    #[test]
    fn expanded_count_is_sum_of_counts() {
        let counts = [90, 171];
        let (expanded, _) =
            expand_audio_placeholders(&prompts(&["<|audio|><|audio|> compare"]), AUDIO, &counts);

        assert_eq!(expanded[0].matches(AUDIO).count(), 261);
    }

    #[test]
    fn keeps_unmatched_placeholders() {
        let (expanded, consumed) =
            expand_audio_placeholders(&prompts(&["<|audio|> <|audio|>"]), AUDIO, &[2]);

        assert_eq!(expanded[0], format!("{} {}", AUDIO.repeat(2), AUDIO));
        assert_eq!(consumed, 1);
    }

    #[test]
    fn zero_count_removes_placeholder() {
        let (expanded, _) = expand_audio_placeholders(&prompts(&["a<|audio|>b"]), AUDIO, &[0]);
        assert_eq!(expanded[0], "ab");
    }

    #[test]
    fn text_from_json() {
        assert_eq!(
            TextBatch::try_from(&json!("hi")).unwrap().prompts(),
            &["hi".to_string()]
        );
        assert_eq!(
            TextBatch::try_from(&json!(["a", "b"])).unwrap().prompts().len(),
            2
        );
    }

    #[test]
    fn rejects_bad_text_json() {
        for value in [json!(424), json!([424]), json!([]), json!(["a", 1])] {
            let result = TextBatch::try_from(&value);
            assert!(
                matches!(result, Err(Error::Processor(ProcessorError::InvalidText(_)))),
                "accepted {value}"
            );
        }
    }

    #[test]
    fn parses_json_request() {
        let request = ProcessorRequest::try_from(&json!({
            "text": "<|audio|> hi",
            "audio": [[0.0, 0.1, 0.2]],
            "device": "cuda:1",
        }))
        .unwrap();

        assert!(request.text.is_some());
        assert_eq!(request.audio.map(|a| a.len()), Some(1));
        assert_eq!(request.device, Device::Cuda(1));
    }

    #[test]
    fn requires_text() {
        let request = ProcessorRequest::try_from(&json!({"text": null})).unwrap();
        let result = processor(false).process(request);

        assert!(matches!(
            result,
            Err(Error::Processor(ProcessorError::MissingText))
        ));
    }

    #[test]
    fn rejects_bad_audio_in_request() {
        for audio in [json!("foo"), json!(["foo"])] {
            let result = ProcessorRequest::try_from(&json!({"audio": audio}));
            assert!(matches!(
                result,
                Err(Error::Processor(ProcessorError::InvalidAudio(_)))
            ));
        }
    }

    #[test]
    fn rejects_empty_text_list() {
        let result = processor(false).process(ProcessorRequest::new(Vec::<String>::new()));

        assert!(matches!(
            result,
            Err(Error::Processor(ProcessorError::InvalidText(_)))
        ));
    }

    #[test]
    fn fills_audio_tokens_for_single_clip() {
        let processor = processor(true);
        let audio_id = processor.audio_token_id().unwrap();

        let batch = Array2::from_shape_fn((1, 269920), |(_, i)| (i % 97) as f32 / 97.0 - 0.5);
        let request =
            ProcessorRequest::new("<|audio|> Can you compare this audio?").with_audio(batch);

        let output = processor.process(request).unwrap();

        assert_eq!(output.count_token(audio_id), 171);
        assert_eq!(output.input_features.unwrap().dim(), (1, 844, 160));
    }

    #[test]
    fn fills_audio_tokens_for_varying_clips() {
        let processor = processor(true);
        let audio_id = processor.audio_token_id().unwrap();

        let request = ProcessorRequest::new("<|audio|><|audio|> Can you compare this audio?")
            .with_audio(vec![clip(142100), clip(269920)]);

        let output = processor.process(request).unwrap();

        assert_eq!(output.count_token(audio_id), 90 + 171);

        let ids = &output.input_ids[0];
        assert!(ids[..261].iter().all(|&id| id == audio_id));
        assert_eq!(ids[261], 3);

        // features come from the padded batch
        assert_eq!(output.input_features.unwrap().dim(), (2, 844, 160));
    }

    fn processor_with_cls_sep() -> Processor {
        let mut json: Value = serde_json::from_str(TOKENIZER_JSON).unwrap();
        json["post_processor"] = json!({
            "type": "BertProcessing",
            "sep": ["[SEP]", 11],
            "cls": ["[CLS]", 10]
        });

        let tokenizer = Tokenizer::from_str(&json.to_string()).unwrap();
        Processor::new(FeatureExtractor::default(), tokenizer, Default::default()).unwrap()
    }

    #[test]
    fn adds_special_tokens_by_default() {
        let output = processor_with_cls_sep()
            .process(ProcessorRequest::new("Can you"))
            .unwrap();

        assert_eq!(output.input_ids, vec![vec![10, 3, 4, 11]]);
    }

    #[test]
    fn special_tokens_can_be_disabled_per_call() {
        let processor = processor_with_cls_sep();
        let audio_id = processor.audio_token_id().unwrap();

        let request = ProcessorRequest::new("<|audio|> Can you")
            .with_audio(vec![clip(16000)])
            .with_add_special_tokens(false);
        let output = processor.process(request).unwrap();

        let ids = &output.input_ids[0];
        assert!(!ids.contains(&10) && !ids.contains(&11));
        assert_eq!(ids.len(), output.count_token(audio_id) + 2);
    }

    #[test]
    fn truncation_override_applies_to_one_call() {
        use tokenizers::PaddingStrategy;

        let processor = processor(false);
        let request = ProcessorRequest::new("Can you transcribe this ?")
            .with_truncation(TruncationParams {
                max_length: 3,
                ..Default::default()
            })
            .with_padding(PaddingParams {
                strategy: PaddingStrategy::Fixed(6),
                ..Default::default()
            });

        let output = processor.process(request).unwrap();

        assert_eq!(output.input_ids, vec![vec![3, 4, 9, 0, 0, 0]]);
        assert_eq!(output.attention_mask, vec![vec![1, 1, 1, 0, 0, 0]]);

        // the processor's own tokenizer is untouched
        assert!(processor.tokenizer().get_truncation().is_none());
        let output = processor
            .process(ProcessorRequest::new("Can you transcribe this ?"))
            .unwrap();
        assert_eq!(output.input_ids[0].len(), 5);
    }

    #[test]
    fn parses_add_special_tokens_from_json() {
        let request =
            ProcessorRequest::try_from(&json!({"text": "hi", "add_special_tokens": false})).unwrap();
        assert!(!request.tokenizer_options.add_special_tokens);

        let request = ProcessorRequest::try_from(&json!({"text": "hi"})).unwrap();
        assert!(request.tokenizer_options.add_special_tokens);

        let result = ProcessorRequest::try_from(&json!({"text": "hi", "add_special_tokens": "no"}));
        assert!(matches!(
            result,
            Err(Error::Processor(ProcessorError::InvalidTokenizerOption(_)))
        ));
    }

    #[test]
    fn pads_token_sequences_to_longest() {
        let processor = processor(false);
        let output = processor
            .process(ProcessorRequest::new(vec!["Can you", "Can you transcribe this ?"]))
            .unwrap();

        assert_eq!(output.input_ids[0].len(), output.input_ids[1].len());
        assert_eq!(output.attention_mask[0], vec![1, 1, 0, 0, 0]);
        assert!(output.input_features.is_none());
    }

    #[test]
    fn strict_mode_rejects_mismatch() {
        let request =
            ProcessorRequest::new("<|audio|> Can you").with_audio(vec![clip(4000), clip(4000)]);
        let result = processor(true).process(request);

        assert!(matches!(
            result,
            Err(Error::Processor(ProcessorError::AlignmentMismatch {
                expected: 1,
                got: 2
            }))
        ));
    }

    #[test]
    fn loose_mode_tolerates_mismatch() {
        let processor = processor(false);
        let audio_id = processor.audio_token_id().unwrap();

        let request =
            ProcessorRequest::new("<|audio|> Can you").with_audio(vec![clip(4000), clip(4000)]);
        let output = processor.process(request).unwrap();

        let expected = processor.feature_extractor().num_audio_features(&[4000])[0];
        assert_eq!(output.count_token(audio_id), expected);
    }

    #[test]
    fn audio_tokens_without_audio() {
        let request = ProcessorRequest::new("<|audio|> Can you");

        assert!(matches!(
            processor(true).process(request.clone()),
            Err(Error::Processor(ProcessorError::UnexpectedAudioTokens(1)))
        ));

        let output = processor(false).process(request).unwrap();
        assert_eq!(output.count_token(2), 1);
    }

    #[test]
    fn features_stay_on_host_for_accelerator_request() {
        let request = ProcessorRequest::new("<|audio|> Can you transcribe this audio?")
            .with_audio(vec![clip(16000)])
            .with_device(Device::Cuda(0));

        let output = processor(true).process(request).unwrap();

        assert_eq!(output.device(), Device::Cpu);
        assert!(output.input_features.is_some());
    }

    #[test]
    fn rejects_empty_audio_token() {
        let tokenizer = Tokenizer::from_str(TOKENIZER_JSON).unwrap();
        let config = ProcessorConfig {
            audio_token: String::new(),
            ..Default::default()
        };

        assert!(matches!(
            Processor::new(FeatureExtractor::default(), tokenizer, config),
            Err(Error::Config(ConfigError::EmptyAudioToken))
        ));
    }

    #[test]
    fn saves_and_loads_pretrained() {
        let dir = std::env::temp_dir().join("granite_processor_pretrained");
        std::fs::remove_dir_all(&dir).ok();

        let extractor = FeatureExtractor::new(feature_extractor::FeatureExtractorConfig {
            hop_length: 320,
            ..Default::default()
        })
        .unwrap();
        let tokenizer = Tokenizer::from_str(TOKENIZER_JSON).unwrap();
        let config = ProcessorConfig {
            strict_alignment: true,
            ..Default::default()
        };
        let processor = Processor::new(extractor, tokenizer, config).unwrap();

        processor.save_pretrained(&dir).unwrap();
        let loaded = Processor::from_repo(&ModelRepo::Path(dir.clone())).unwrap();

        assert_eq!(
            loaded.feature_extractor().config(),
            processor.feature_extractor().config()
        );
        assert_eq!(loaded.config(), processor.config());
        assert_eq!(
            loaded.tokenizer().get_vocab(true),
            processor.tokenizer().get_vocab(true)
        );

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn broken_preprocessor_config_is_not_replaced_by_defaults() {
        let dir = std::env::temp_dir().join("granite_processor_broken_config");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TOKENIZER_FILE), TOKENIZER_JSON).unwrap();
        std::fs::write(dir.join(feature_extractor::CONFIG_FILE), "{not json").unwrap();

        assert!(Processor::from_repo(&ModelRepo::Path(dir.clone())).is_err());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn loads_with_default_configs() {
        let dir = std::env::temp_dir().join("granite_processor_tokenizer_only");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TOKENIZER_FILE), TOKENIZER_JSON).unwrap();

        let loaded = Processor::from_repo(&ModelRepo::Path(dir.clone())).unwrap();

        assert_eq!(loaded.config(), &ProcessorConfig::default());
        assert_eq!(
            loaded.feature_extractor().config(),
            &feature_extractor::FeatureExtractorConfig::default()
        );

        std::fs::remove_dir_all(dir).ok();
    }
}
