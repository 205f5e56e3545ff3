//! Extracts generation results from raw model text.
//!
//! Models answer with fenced blocks (```html, ```css, ```js). A single
//! document reply without a fence is taken verbatim.

use super::GenerationResult;
use sdk::errors::EngineError;
use sdk::types::Strategy;

pub struct CodeParser;

impl CodeParser {
    /// Parse `text` into the result shape of `strategy`.
    ///
    /// Project strategies write through tools, so their text is not parsed.
    pub fn parse(strategy: Strategy, text: &str) -> Result<GenerationResult, EngineError> {
        match strategy {
            Strategy::SingleDocument => Self::parse_single(text),
            Strategy::MultiFile => Self::parse_multi(text),
            Strategy::ToolBuiltProject => Ok(GenerationResult::ToolBuilt),
        }
    }

    fn parse_single(text: &str) -> Result<GenerationResult, EngineError> {
        let html = match fenced_block(text, &["html"]) {
            Some(block) => block,
            None => text.trim().to_string(),
        };

        if html.is_empty() {
            return Err(EngineError::Generation(
                "model returned no HTML document".to_string(),
            ));
        }

        Ok(GenerationResult::SingleDocument { html })
    }

    fn parse_multi(text: &str) -> Result<GenerationResult, EngineError> {
        let html = fenced_block(text, &["html"]).ok_or_else(|| {
            EngineError::Generation("model reply has no ```html block".to_string())
        })?;

        Ok(GenerationResult::MultiFile {
            html,
            css: fenced_block(text, &["css"]).unwrap_or_default(),
            js: fenced_block(text, &["js", "javascript"]).unwrap_or_default(),
        })
    }
}

/// Body of the first fenced block whose info string is one of `langs`.
fn fenced_block(text: &str, langs: &[&str]) -> Option<String> {
    let mut rest = text;

    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let line_end = after.find('\n')?;
        let lang = after[..line_end].trim().to_ascii_lowercase();
        let body = &after[line_end + 1..];

        let close = body.find("```");
        let (content, remaining) = match close {
            Some(end) => (&body[..end], &body[end + 3..]),
            // An unterminated final block still counts
            None => (body, ""),
        };

        if langs.contains(&lang.as_str()) {
            return Some(content.trim_end_matches(['\n', '\r']).to_string());
        }

        rest = remaining;
    }

    None
}
