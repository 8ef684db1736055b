// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image classification rules applied to vision model responses

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::TaskConfig;
use crate::providers::VisionProvider;
use crate::{Result, VasortError};

/// Outcome of classifying a single photo.
///
/// `Error` is a value, not a failure: a photo that could not be exported or
/// classified is still counted and marked done so later runs never retry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    NoMatch,
    Error,
}

/// Which response text a pattern rule inspects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    #[default]
    Response,
    NormalizedResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub pattern: String,
    #[serde(default)]
    pub field: RuleField,
}

/// Classification rule set, selected by the `type` tag in config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleSet {
    RegexMatch {
        rules: Vec<PatternRule>,
        #[serde(default = "default_match_all")]
        match_all: bool,
    },
    KeywordMatch {
        keywords: Vec<String>,
        #[serde(default = "default_match_all")]
        match_all: bool,
    },
    AlwaysYes,
    AlwaysNo,
}

fn default_match_all() -> bool {
    true
}

/// Rules with patterns compiled up front so a bad pattern fails at startup
#[derive(Debug)]
enum CompiledRules {
    Regex {
        rules: Vec<(String, Regex, RuleField)>,
        match_all: bool,
    },
    Keyword {
        keywords: Vec<String>,
        match_all: bool,
    },
    AlwaysYes,
    AlwaysNo,
}

impl CompiledRules {
    fn compile(rules: &RuleSet) -> Result<Self> {
        match rules {
            RuleSet::RegexMatch { rules, match_all } => {
                let mut compiled = Vec::with_capacity(rules.len());
                for rule in rules {
                    let regex = RegexBuilder::new(&rule.pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            VasortError::Config(format!(
                                "Invalid rule pattern '{}': {}",
                                rule.pattern, e
                            ))
                        })?;
                    let name = rule
                        .name
                        .clone()
                        .unwrap_or_else(|| rule.pattern.chars().take(20).collect());
                    compiled.push((name, regex, rule.field));
                }
                Ok(Self::Regex {
                    rules: compiled,
                    match_all: *match_all,
                })
            }
            RuleSet::KeywordMatch { keywords, match_all } => Ok(Self::Keyword {
                keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
                match_all: *match_all,
            }),
            RuleSet::AlwaysYes => Ok(Self::AlwaysYes),
            RuleSet::AlwaysNo => Ok(Self::AlwaysNo),
        }
    }

    fn apply(&self, response: &str) -> Verdict {
        match self {
            Self::Regex { rules, match_all } => {
                if rules.is_empty() {
                    return Verdict::NoMatch;
                }
                let normalized = normalize(response);
                let mut matches = Vec::with_capacity(rules.len());
                for (name, regex, field) in rules {
                    let text = match field {
                        RuleField::Response => response,
                        RuleField::NormalizedResponse => normalized.as_str(),
                    };
                    let matched = regex.is_match(text);
                    debug!(
                        "Rule '{}': {}",
                        name,
                        if matched { "matched" } else { "no match" }
                    );
                    matches.push(matched);
                }
                combine(&matches, *match_all)
            }
            Self::Keyword { keywords, match_all } => {
                if keywords.is_empty() {
                    return Verdict::NoMatch;
                }
                let normalized = normalize(response);
                let matches: Vec<bool> = keywords
                    .iter()
                    .map(|k| normalized.contains(k.as_str()))
                    .collect();
                combine(&matches, *match_all)
            }
            Self::AlwaysYes => Verdict::Match,
            Self::AlwaysNo => Verdict::NoMatch,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Regex { rules, match_all } => {
                format!("regex_match ({} rules, match_all={})", rules.len(), match_all)
            }
            Self::Keyword { keywords, match_all } => {
                format!("keyword_match ({} keywords, match_all={})", keywords.len(), match_all)
            }
            Self::AlwaysYes => "always_yes".to_string(),
            Self::AlwaysNo => "always_no".to_string(),
        }
    }
}

fn combine(matches: &[bool], match_all: bool) -> Verdict {
    let matched = if match_all {
        matches.iter().all(|m| *m)
    } else {
        matches.iter().any(|m| *m)
    };
    if matched {
        Verdict::Match
    } else {
        Verdict::NoMatch
    }
}

/// Normalize model output for rule matching: truncate at `<|end|>`,
/// lowercase, dashes to spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let text = match text.find("<|end|>") {
        Some(idx) => &text[..idx],
        None => text,
    };
    let text = text
        .to_lowercase()
        .replace(['\u{2011}', '\u{2013}', '-'], " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Applies configured rules to vision model responses
pub struct Classifier {
    provider: Box<dyn VisionProvider>,
    prompt: String,
    rules: CompiledRules,
    task_name: String,
}

impl Classifier {
    /// Build a classifier, compiling rule patterns up front
    pub fn new(provider: Box<dyn VisionProvider>, task: &TaskConfig) -> Result<Self> {
        let rules = CompiledRules::compile(&task.rules)?;
        info!("Initialized classifier for task: {}", task.name);
        Ok(Self {
            provider,
            prompt: task.prompt.clone(),
            rules,
            task_name: task.name.clone(),
        })
    }

    /// Classify an image. The provider handles its own retries; an empty
    /// response or a provider failure yields `Verdict::Error`.
    pub async fn classify(&self, image_path: &Path) -> Verdict {
        let response = match self.provider.classify_image(image_path, &self.prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Classification failed for {}: {}", image_path.display(), e);
                return Verdict::Error;
            }
        };

        if response.trim().is_empty() {
            warn!("Empty response for {}", image_path.display());
            return Verdict::Error;
        }

        let verdict = self.rules.apply(&response);
        debug!("Classification for {}: {:?}", image_path.display(), verdict);
        verdict
    }

    /// Task/rules/provider summary used by the CLI
    pub fn describe(&self) -> String {
        let prompt = if self.prompt.chars().count() > 50 {
            format!("{}...", self.prompt.chars().take(50).collect::<String>())
        } else {
            self.prompt.clone()
        };
        format!(
            "task '{}' via {} | rules: {} | prompt: {}",
            self.task_name,
            self.provider.name(),
            self.rules.describe(),
            prompt
        )
    }
}

/// Parse a `--rules` CLI spec into a rule set.
///
/// Accepted forms: `regex:<pattern>`, `keyword:a,b,c`, `always_yes|yes`,
/// `always_no|no`. Anything else is a usage error.
pub fn parse_rules_spec(spec: &str) -> Result<RuleSet> {
    let spec = spec.trim();
    let lower = spec.to_lowercase();

    if let Some(pattern) = spec.strip_prefix("regex:").or_else(|| spec.strip_prefix("Regex:")) {
        let pattern = pattern.trim();
        let pattern = if pattern.is_empty() { ".*" } else { pattern };
        return Ok(RuleSet::RegexMatch {
            rules: vec![PatternRule {
                name: Some("cli_regex".to_string()),
                pattern: pattern.to_string(),
                field: RuleField::NormalizedResponse,
            }],
            match_all: true,
        });
    }

    if lower.starts_with("keyword:") {
        let keywords: Vec<String> = spec[8..]
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(VasortError::Config(
                "keyword rule spec needs at least one keyword".to_string(),
            ));
        }
        return Ok(RuleSet::KeywordMatch {
            keywords,
            match_all: false,
        });
    }

    match lower.as_str() {
        "always_yes" | "yes" => Ok(RuleSet::AlwaysYes),
        "always_no" | "no" => Ok(RuleSet::AlwaysNo),
        _ => Err(VasortError::Config(format!(
            "Invalid rules spec '{}' (expected regex:<pattern>, keyword:a,b,c, always_yes or always_no)",
            spec
        ))),
    }
}
