//! Inline directive parsing for user text.
//!
//! Directives are `/word` control tokens embedded in a message that
//! adjust how the pipeline treats it: verbosity hints, tool profile
//! selection, prompt mode, and permission elevation. Matched tokens are
//! stripped from the text; unknown `/word` tokens are left alone.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// A recognized message directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    Think,
    Verbose,
    Reasoning,
    Elevated,
}

/// System prompt verbosity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    #[default]
    Full,
    Minimal,
    None,
}

/// Named bundle of tool groups gating which tools the model sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolProfile {
    Minimal,
    Coding,
    Messaging,
    #[default]
    Full,
}

/// Result of parsing directives out of message text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedDirectives {
    pub directives: Vec<Directive>,
    pub clean_text: String,
    pub prompt_mode: PromptMode,
    pub tool_profile: ToolProfile,
    pub elevated: bool,
}

impl ParsedDirectives {
    /// Whether the reasoning directive is present.
    pub fn has_reasoning(&self) -> bool {
        self.directives.contains(&Directive::Reasoning)
    }

    /// Whether the verbose directive is present.
    pub fn has_verbose(&self) -> bool {
        self.directives.contains(&Directive::Verbose)
    }
}

const DIRECTIVE_TOKENS: &[(&str, Directive)] = &[
    ("think", Directive::Think),
    ("verbose", Directive::Verbose),
    ("reasoning", Directive::Reasoning),
    ("elevated", Directive::Elevated),
];

const PROFILE_TOKENS: &[(&str, ToolProfile)] = &[
    ("minimal", ToolProfile::Minimal),
    ("coding", ToolProfile::Coding),
    ("messaging", ToolProfile::Messaging),
    ("full", ToolProfile::Full),
];

const MODE_TOKENS: &[(&str, PromptMode)] = &[
    ("quiet", PromptMode::Minimal),
    ("silent", PromptMode::None),
];

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

fn token_regex(word: &str) -> Regex {
    RegexBuilder::new(&format!(r"/{word}\b"))
        .case_insensitive(true)
        .build()
        .expect("valid directive regex")
}

/// Parse directives from message text.
///
/// Pure: the same input always yields the same output, and re-parsing the
/// cleaned text yields no directives and the identical text.
pub fn parse_directives(text: &str) -> ParsedDirectives {
    if text.is_empty() {
        return ParsedDirectives::default();
    }

    let mut directives = Vec::new();
    let mut prompt_mode = PromptMode::Full;
    let mut tool_profile = ToolProfile::Full;
    let mut elevated = false;
    let mut clean = text.to_string();

    for (word, directive) in DIRECTIVE_TOKENS {
        let re = token_regex(word);
        if re.is_match(&clean) {
            directives.push(*directive);
            clean = re.replace_all(&clean, "").into_owned();
            if *directive == Directive::Elevated {
                elevated = true;
            }
        }
    }

    // Later tokens win for profile and mode because each match overwrites
    // the previous value; the token tables are walked in declaration
    // order, and within a single message the regexes strip every
    // occurrence, so the surviving value is the last table entry matched.
    for (word, profile) in PROFILE_TOKENS {
        let re = token_regex(word);
        if re.is_match(&clean) {
            tool_profile = *profile;
            clean = re.replace_all(&clean, "").into_owned();
        }
    }

    for (word, mode) in MODE_TOKENS {
        let re = token_regex(word);
        if re.is_match(&clean) {
            prompt_mode = *mode;
            clean = re.replace_all(&clean, "").into_owned();
        }
    }

    let clean_text = WHITESPACE.replace_all(&clean, " ").trim().to_string();

    ParsedDirectives {
        directives,
        clean_text,
        prompt_mode,
        tool_profile,
        elevated,
    }
}

/// Extract the value of a `/name:value` directive, if present.
pub fn extract_directive_value(text: &str, name: &str) -> Option<String> {
    let re = RegexBuilder::new(&format!(r"/{}:(\S+)", regex::escape(name)))
        .case_insensitive(true)
        .build()
        .ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbosity_and_profile() {
        let parsed = parse_directives("/verbose /coding please refactor main.go");
        assert_eq!(parsed.directives, vec![Directive::Verbose]);
        assert_eq!(parsed.tool_profile, ToolProfile::Coding);
        assert_eq!(parsed.prompt_mode, PromptMode::Full);
        assert_eq!(parsed.clean_text, "please refactor main.go");
        assert!(!parsed.elevated);
    }

    #[test]
    fn elevated_sets_flag() {
        let parsed = parse_directives("/elevated restart the service");
        assert!(parsed.elevated);
        assert_eq!(parsed.directives, vec![Directive::Elevated]);
        assert_eq!(parsed.clean_text, "restart the service");
    }

    #[test]
    fn quiet_and_silent_set_prompt_mode() {
        assert_eq!(parse_directives("/quiet hi").prompt_mode, PromptMode::Minimal);
        assert_eq!(parse_directives("/silent hi").prompt_mode, PromptMode::None);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let parsed = parse_directives("/VERBOSE /Coding hello");
        assert_eq!(parsed.directives, vec![Directive::Verbose]);
        assert_eq!(parsed.tool_profile, ToolProfile::Coding);
        assert_eq!(parsed.clean_text, "hello");
    }

    #[test]
    fn unknown_tokens_survive() {
        let parsed = parse_directives("/frobnicate the widget");
        assert!(parsed.directives.is_empty());
        assert_eq!(parsed.clean_text, "/frobnicate the widget");
    }

    #[test]
    fn word_boundary_prevents_prefix_matches() {
        // /thinking is not /think
        let parsed = parse_directives("/thinking about it");
        assert!(parsed.directives.is_empty());
        assert_eq!(parsed.clean_text, "/thinking about it");
    }

    #[test]
    fn whitespace_collapses_after_removal() {
        let parsed = parse_directives("  /think   what   is   this  ");
        assert_eq!(parsed.clean_text, "what is this");
    }

    #[test]
    fn parse_is_idempotent_on_clean_text() {
        let first = parse_directives("/verbose /quiet /coding do the thing");
        let second = parse_directives(&first.clean_text);
        assert!(second.directives.is_empty());
        assert_eq!(second.clean_text, first.clean_text);
        assert_eq!(second.prompt_mode, PromptMode::Full);
        assert_eq!(second.tool_profile, ToolProfile::Full);
    }

    #[test]
    fn extracts_scalar_values() {
        assert_eq!(
            extract_directive_value("/model:gpt-4 hello", "model"),
            Some("gpt-4".to_string())
        );
        assert_eq!(extract_directive_value("no directive here", "model"), None);
    }

    #[test]
    fn empty_input_yields_default() {
        assert_eq!(parse_directives(""), ParsedDirectives::default());
    }
}
