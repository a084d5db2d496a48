//! Language profiles: mapping a language selector to engine tuning.
//!
//! Dense-script languages (CJK and friends) are recognized without
//! dictionary or bigram correction, because cross-language dictionaries
//! mis-correct adjacent ideographs. Space-delimited languages get both enabled. A
//! composite selector such as `"ch_sim+en"` counts as dense if any component
//! is dense, because the correction switches apply to the whole engine
//! instance.

use std::collections::HashSet;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Broad writing-system classification driving timeouts and tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptClass {
    /// Ideographic/unsegmented scripts: denser pages, longer deadlines,
    /// minimal post-cleaning.
    Dense,
    /// Scripts with whitespace word boundaries.
    SpaceDelimited,
}

static DENSE_SCRIPT_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut set = HashSet::new();
    // EasyOCR-style tags
    set.insert("ch_sim");
    set.insert("ch_tra");
    set.insert("ja");
    set.insert("ko");
    set.insert("th");
    // Tesseract-style tags
    set.insert("chi_sim");
    set.insert("chi_tra");
    set.insert("jpn");
    set.insert("jpn_vert");
    set.insert("kor");
    set.insert("tha");
    set.insert("khm");
    set.insert("lao");
    set.insert("mya");
    set.insert("bod");
    set
});

/// Classify a language selector (single tag or `+`-joined composite).
pub fn script_class(language: &str) -> ScriptClass {
    let any_dense = language
        .split('+')
        .map(|tag| tag.trim().to_lowercase())
        .any(|tag| DENSE_SCRIPT_TAGS.contains(tag.as_str()));

    if any_dense {
        ScriptClass::Dense
    } else {
        ScriptClass::SpaceDelimited
    }
}

/// Engine-tuned parameter set handed to the [`EngineFactory`].
///
/// [`EngineFactory`]: crate::engine::EngineFactory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    pub language: String,
    pub script: ScriptClass,
    /// Enable the engine's dictionary-based correction pass.
    pub dictionary_correction: bool,
    /// Enable bigram/word-pair correction.
    pub bigram_correction: bool,
    pub use_gpu: bool,
    /// Directory the engine should load its models from, if pinned.
    pub model_dir: Option<PathBuf>,
    /// Free-form passthrough options from the task.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl EngineParams {
    /// Build the default tuning for a language selector.
    pub fn for_language(language: &str) -> Self {
        let script = script_class(language);
        let corrections = script == ScriptClass::SpaceDelimited;
        Self {
            language: language.to_string(),
            script,
            dictionary_correction: corrections,
            bigram_correction: corrections,
            use_gpu: false,
            model_dir: None,
            options: serde_json::Value::Null,
        }
    }

    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    pub fn with_model_dir(mut self, model_dir: Option<PathBuf>) -> Self {
        self.model_dir = model_dir;
        self
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}
