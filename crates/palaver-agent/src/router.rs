//! First-tier pattern responder loaded from a YAML rule file.
//!
//! ```yaml
//! rules:
//!   - pattern: '^(hi|hello)\b'
//!     reply: "Hello! How can I help?"
//!   - pattern: '^my name is (?P<name>\w+)'
//!     reply: "Nice to meet you, $name."
//! ```

use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use palaver_core::config::Config;
use palaver_core::error::{PalaverError, Result};

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    pattern: String,
    reply: String,
}

#[derive(Debug)]
struct Rule {
    regex: Regex,
    reply: String,
}

/// Ordered rule set, read-only after load. First match wins.
#[derive(Debug, Default)]
pub struct ResponseRouter {
    rules: Vec<Rule>,
}

impl ResponseRouter {
    /// A router that never matches; every message falls through.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        let file: RuleFile = serde_yaml::from_str(source)
            .map_err(|e| PalaverError::Config(format!("invalid rule file: {e}")))?;

        let rules = file
            .rules
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                let regex = RegexBuilder::new(&spec.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| PalaverError::Config(format!("rules[{i}]: invalid pattern: {e}")))?;
                Ok(Rule {
                    regex,
                    reply: spec.reply,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            PalaverError::Config(format!("cannot read rule file {}: {e}", path.display()))
        })?;
        let router = Self::from_yaml(&source)?;
        info!(path = %path.display(), rules = router.len(), "Loaded response rules");
        Ok(router)
    }

    /// Load the rule file named by `rules.path`, or an empty router when unset.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.rules_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::empty()),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Reply for `text` if any rule matches. A miss is the normal fall-through.
    pub fn try_respond(&self, text: &str) -> Option<String> {
        let input = text.trim();
        self.rules.iter().enumerate().find_map(|(i, rule)| {
            let caps = rule.regex.captures(input)?;
            let mut reply = String::new();
            caps.expand(&rule.reply, &mut reply);
            debug!(rule = i, "Pattern rule matched");
            Some(reply)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
rules:
  - pattern: '^(hi|hello)\b'
    reply: "Hello! How can I help?"
  - pattern: '^my name is (?P<name>\w+)'
    reply: "Nice to meet you, $name."
  - pattern: 'hello world'
    reply: "never reached for greetings"
  - pattern: '^(\d+) plus (\d+)$'
    reply: "You asked about ${1} and ${2}."
"#;

    #[test]
    fn test_first_match_wins() {
        let router = ResponseRouter::from_yaml(RULES).unwrap();
        assert_eq!(router.len(), 4);
        assert_eq!(
            router.try_respond("hello world").as_deref(),
            Some("Hello! How can I help?")
        );
    }

    #[test]
    fn test_case_insensitive_and_trimmed() {
        let router = ResponseRouter::from_yaml(RULES).unwrap();
        assert_eq!(
            router.try_respond("   HI there  ").as_deref(),
            Some("Hello! How can I help?")
        );
    }

    #[test]
    fn test_capture_expansion() {
        let router = ResponseRouter::from_yaml(RULES).unwrap();
        assert_eq!(
            router.try_respond("My name is Ada").as_deref(),
            Some("Nice to meet you, Ada.")
        );
        assert_eq!(
            router.try_respond("2 plus 3").as_deref(),
            Some("You asked about 2 and 3.")
        );
    }

    #[test]
    fn test_miss_falls_through() {
        let router = ResponseRouter::from_yaml(RULES).unwrap();
        assert!(router.try_respond("what is the capital of France?").is_none());
        assert!(ResponseRouter::empty().try_respond("hi").is_none());
    }

    #[test]
    fn test_invalid_pattern_names_rule() {
        let err = ResponseRouter::from_yaml(
            "rules:\n  - pattern: 'ok'\n    reply: 'x'\n  - pattern: '(unclosed'\n    reply: 'y'\n",
        )
        .unwrap_err();
        assert!(matches!(err, PalaverError::Config(ref m) if m.starts_with("rules[1]")));
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(matches!(
            ResponseRouter::from_yaml("rules: [ {pattern: "),
            Err(PalaverError::Config(_))
        ));
    }

    #[test]
    fn test_json_rule_file_accepted() {
        let router =
            ResponseRouter::from_yaml(r#"{"rules": [{"pattern": "^ping$", "reply": "pong"}]}"#)
                .unwrap();
        assert_eq!(router.try_respond("PING").as_deref(), Some("pong"));
    }

    #[test]
    fn test_from_config_without_path_is_empty() {
        let router = ResponseRouter::from_config(&Config::default()).unwrap();
        assert!(router.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, RULES).unwrap();
        assert_eq!(ResponseRouter::load(&path).unwrap().len(), 4);
        assert!(ResponseRouter::load(&dir.path().join("missing.yaml")).is_err());
    }
}
