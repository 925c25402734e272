use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Per-document settings written as comment directives, e.g. `%% @backgroundColor{#fafafa}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAttributes {
    pub background_color: String,
    pub path_to_config: String,
    pub output_scale: String,
}

impl DocumentAttributes {
    pub fn parse(code: &str) -> Self {
        Self {
            background_color: parse_directive(code, background_color_re()),
            path_to_config: parse_directive(code, config_re()),
            output_scale: parse_directive(code, output_scale_re()),
        }
    }

    /// `@outputScale` as a number, when it is a positive finite value.
    pub fn output_scale(&self) -> Option<f64> {
        let scale = self.output_scale.trim().parse::<f64>().ok()?;
        (scale.is_finite() && scale > 0.0).then_some(scale)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MermaidDocument {
    pub code: String,
    pub file_name: String,
    pub current_dir: String,
    pub attributes: DocumentAttributes,
}

impl MermaidDocument {
    pub fn from_code(
        code: impl Into<String>,
        file_name: impl Into<String>,
        current_dir: impl Into<String>,
    ) -> Self {
        let code = code.into();
        let attributes = DocumentAttributes::parse(&code);
        Self {
            code,
            file_name: file_name.into(),
            current_dir: current_dir.into(),
            attributes,
        }
    }
}

fn parse_directive(code: &str, re: &Regex) -> String {
    code.lines()
        .find_map(|line| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn directive_re(slot: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    slot.get_or_init(|| Regex::new(pattern).expect("directive regex"))
}

fn config_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    directive_re(&RE, r"^\s*%%\s*@config\{(.*)\}.*$")
}

fn background_color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    directive_re(&RE, r"^\s*%%\s*@backgroundColor\{(.*)\}.*$")
}

fn output_scale_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    directive_re(&RE, r"^\s*%%\s*@outputScale\{(.*)\}.*$")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_directives() {
        let code = "graph TD\n%% @config{ ./mermaid.json }\n  %%@backgroundColor{#222}\n%% @outputScale{2.5} trailing\nA-->B";
        let attrs = DocumentAttributes::parse(code);
        assert_eq!(attrs.path_to_config, "./mermaid.json");
        assert_eq!(attrs.background_color, "#222");
        assert_eq!(attrs.output_scale, "2.5");
        assert_eq!(attrs.output_scale(), Some(2.5));
    }

    #[test]
    fn missing_directives_are_empty() {
        let attrs = DocumentAttributes::parse("sequenceDiagram\nA->>B: hi");
        assert_eq!(attrs, DocumentAttributes::default());
        assert_eq!(attrs.output_scale(), None);
    }

    #[test]
    fn first_matching_line_wins() {
        let attrs = DocumentAttributes::parse("%% @backgroundColor{red}\n%% @backgroundColor{blue}");
        assert_eq!(attrs.background_color, "red");
    }

    #[test]
    fn directive_must_be_a_comment() {
        let attrs = DocumentAttributes::parse("A[@backgroundColor{red}]");
        assert_eq!(attrs.background_color, "");
    }

    #[test]
    fn document_carries_parsed_attributes() {
        let doc = MermaidDocument::from_code("%% @outputScale{0}\ngraph LR", "a.mmd", "/tmp");
        assert_eq!(doc.attributes.output_scale, "0");
        assert_eq!(doc.attributes.output_scale(), None);
        assert_eq!(doc.file_name, "a.mmd");
    }
}
