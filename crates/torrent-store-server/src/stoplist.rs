//! Restricted-content check over torrent names and file paths

use crate::metainfo::Metainfo;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

#[derive(Debug)]
pub enum StoplistError {
    Io(Box<std::io::Error>),
    Json(serde_json::Error),
    Pattern(regex::Error),
}

impl fmt::Display for StoplistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoplistError::Io(err) => write!(f, "failed to read stoplist: {}", err),
            StoplistError::Json(err) => write!(f, "invalid stoplist rules: {}", err),
            StoplistError::Pattern(err) => write!(f, "invalid stoplist pattern: {}", err),
        }
    }
}

impl std::error::Error for StoplistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoplistError::Io(err) => Some(err.as_ref()),
            StoplistError::Json(err) => Some(err),
            StoplistError::Pattern(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for StoplistError {
    fn from(err: std::io::Error) -> Self {
        StoplistError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for StoplistError {
    fn from(err: serde_json::Error) -> Self {
        StoplistError::Json(err)
    }
}

impl From<regex::Error> for StoplistError {
    fn from(err: regex::Error) -> Self {
        StoplistError::Pattern(err)
    }
}

/// Rule file contents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoplistRules {
    /// Words or phrases matched as whole words
    #[serde(default)]
    pub words: Vec<String>,
    /// Regular expressions tested against normalized text
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckResult {
    pub found: bool,
    /// The rule that matched
    pub rule: Option<String>,
}

impl CheckResult {
    fn matched(rule: &str) -> Self {
        Self {
            found: true,
            rule: Some(rule.to_string()),
        }
    }
}

struct Normalizer {
    separators: Regex,
    digits: Regex,
    spaces: Regex,
}

impl Normalizer {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            separators: Regex::new(r"[^\p{L}\d]+")?,
            digits: Regex::new(r"(\d+)")?,
            spaces: Regex::new(r"\s+")?,
        })
    }

    fn normalize(&self, text: &str) -> String {
        let text = text.to_lowercase();
        let text = self.separators.replace_all(&text, " ");
        let text = self.digits.replace_all(&text, " ${1} ");
        let text = self.spaces.replace_all(&text, " ");
        text.trim().to_string()
    }
}

pub struct Stoplist {
    normalizer: Normalizer,
    /// Normalized word rules paired with their original spelling
    words: Vec<(String, String)>,
    patterns: Vec<Regex>,
}

impl Stoplist {
    pub fn new(rules: StoplistRules) -> Result<Self, StoplistError> {
        let normalizer = Normalizer::new()?;

        let words = rules
            .words
            .into_iter()
            .map(|word| (normalizer.normalize(&word), word))
            .filter(|(normalized, _)| !normalized.is_empty())
            .collect();
        let patterns = rules
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            normalizer,
            words,
            patterns,
        })
    }

    /// Load rules from a JSON file
    pub async fn load(path: &Path) -> Result<Self, StoplistError> {
        let data = tokio::fs::read_to_string(path).await?;
        let rules: StoplistRules = serde_json::from_str(&data)?;
        info!(
            path = ?path,
            words = rules.words.len(),
            patterns = rules.patterns.len(),
            "Stoplist loaded"
        );
        Self::new(rules)
    }

    /// Check a torrent's name and file paths, stopping at the first match
    pub fn check(&self, meta: &Metainfo) -> CheckResult {
        meta.texts()
            .map(|text| self.check_text(text))
            .find(|result| result.found)
            .unwrap_or_default()
    }

    pub fn check_text(&self, text: &str) -> CheckResult {
        let normalized = self.normalizer.normalize(text);
        let padded = format!(" {} ", normalized);

        for (word, original) in &self.words {
            if padded.contains(&format!(" {} ", word)) {
                return CheckResult::matched(original);
            }
        }
        for pattern in &self.patterns {
            if pattern.is_match(&normalized) {
                return CheckResult::matched(pattern.as_str());
            }
        }
        CheckResult::default()
    }
}
