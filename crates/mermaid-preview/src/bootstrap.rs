//! Initial document installed into the rendering surface.
//!
//! The HTML is what a browser-backed surface would load; the JSON data island carries the same
//! values in machine-readable form so an in-process surface can recover them without parsing
//! markup.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::BOOTSTRAP_DATA_ID;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("bootstrap data island not found")]
    MissingData,

    #[error("bootstrap data island is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapDocument {
    pub code: String,
    /// Effective renderer configuration (already merged with `startOnLoad`).
    pub configuration: Value,
    pub background_color: String,
}

impl BootstrapDocument {
    pub fn to_html(&self) -> String {
        let config = serde_json::to_string(&self.configuration).unwrap_or_else(|_| "{}".into());
        let island = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());

        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        out.push_str("<meta charset=\"utf-8\">\n");
        out.push_str(
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        out.push_str("<title>Mermaid Preview</title>\n");
        let _ = write!(
            &mut out,
            "<style>\nbody {{\n  background-color: {};\n}}\n</style>\n",
            css_value(&self.background_color)
        );
        out.push_str("</head>\n<body>\n");
        let _ = write!(
            &mut out,
            "<div id=\"preview\" class=\"mermaid\">\n{}\n</div>\n",
            htmlize::escape_text(self.code.as_str())
        );
        let _ = write!(
            &mut out,
            "<script type=\"application/json\" id=\"{BOOTSTRAP_DATA_ID}\">{}</script>\n",
            script_safe(&island)
        );
        let _ = write!(
            &mut out,
            "<script>mermaid.initialize({});</script>\n",
            script_safe(&config)
        );
        out.push_str("</body>\n</html>\n");
        out
    }

    pub fn from_html(html: &str) -> Result<Self, BootstrapError> {
        let caps = island_re()
            .captures(html)
            .ok_or(BootstrapError::MissingData)?;
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        Ok(serde_json::from_str(raw)?)
    }
}

/// `</script>` must not appear inside an inline script; JSON allows `<` to be escaped.
fn script_safe(json: &str) -> String {
    json.replace('<', "\\u003c")
}

/// Keeps a user supplied color from closing the style rule.
fn css_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ';' | '{' | '}' | '<' | '>'))
        .collect()
}

fn island_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r#"(?s)<script type="application/json" id="{}">(.*?)</script>"#,
            regex::escape(BOOTSTRAP_DATA_ID)
        );
        Regex::new(&pattern).expect("bootstrap island regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(code: &str) -> BootstrapDocument {
        BootstrapDocument {
            code: code.into(),
            configuration: json!({ "theme": "dark", "startOnLoad": true }),
            background_color: "#fafafa".into(),
        }
    }

    #[test]
    fn html_embeds_code_background_and_config() {
        let html = doc("graph TD\nA-->B").to_html();
        assert!(html.contains("background-color: #fafafa;"));
        assert!(html.contains("A--&gt;B"));
        assert!(html.contains(r#"mermaid.initialize({"theme":"dark","startOnLoad":true});"#));
    }

    #[test]
    fn island_recovers_the_document() {
        let original = doc("graph TD\nA[\"</script><b>\"]-->B");
        let html = original.to_html();
        assert!(!html.contains("</script><b>"));
        assert_eq!(BootstrapDocument::from_html(&html).unwrap(), original);
    }

    #[test]
    fn missing_island_is_an_error() {
        let err = BootstrapDocument::from_html("<html><body></body></html>").unwrap_err();
        assert!(matches!(err, BootstrapError::MissingData));
    }

    #[test]
    fn background_cannot_escape_the_style_rule() {
        let mut d = doc("graph TD");
        d.background_color = "red;}</style><script>".into();
        let html = d.to_html();
        assert!(html.contains("background-color: red/stylescript;"));
    }
}
