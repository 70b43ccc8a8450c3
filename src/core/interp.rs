/// Expression interpolation — live script placeholders in narrative text.

use thiserror::Error;
use tracing::warn;

use crate::core::scope::ScopeManager;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template parse error: {0}")]
    Parse(String),
}

/// A segment of a parsed text template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// An embedded expression: `{gold * 2}`.
    Expr(String),
}

/// A parsed text template — a sequence of segments.
///
/// Placeholders use single braces; `{{` and `}}` emit literal braces.
/// Parsing happens once at load time, evaluation on every render.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

impl Template {
    /// Parse a template string into a sequence of segments.
    pub fn parse(input: &str) -> Result<Template, TemplateError> {
        let mut segments = Vec::new();
        let mut literal_buf = String::new();
        let chars: Vec<char> = input.chars().collect();
        let len = chars.len();
        let mut i = 0;

        while i < len {
            if chars[i] == '{' {
                // Escaped brace
                if i + 1 < len && chars[i + 1] == '{' {
                    literal_buf.push('{');
                    i += 2;
                    continue;
                }

                // Flush any accumulated literal
                if !literal_buf.is_empty() {
                    segments.push(TemplateSegment::Literal(literal_buf.clone()));
                    literal_buf.clear();
                }

                // Find the closing brace
                let start = i + 1;
                let mut end = start;
                let mut closed = false;
                while end < len {
                    if chars[end] == '{' {
                        return Err(TemplateError::Parse(
                            "nested braces are not allowed".to_string(),
                        ));
                    }
                    if chars[end] == '}' {
                        closed = true;
                        break;
                    }
                    end += 1;
                }

                if !closed {
                    return Err(TemplateError::Parse("unclosed brace".to_string()));
                }

                let expr: String = chars[start..end].iter().collect();
                if expr.trim().is_empty() {
                    return Err(TemplateError::Parse("empty braces".to_string()));
                }

                segments.push(TemplateSegment::Expr(expr.trim().to_string()));
                i = end + 1;
            } else if chars[i] == '}' {
                // Escaped closing brace
                if i + 1 < len && chars[i + 1] == '}' {
                    literal_buf.push('}');
                    i += 2;
                    continue;
                }
                return Err(TemplateError::Parse(
                    "unmatched closing brace".to_string(),
                ));
            } else {
                literal_buf.push(chars[i]);
                i += 1;
            }
        }

        if !literal_buf.is_empty() {
            segments.push(TemplateSegment::Literal(literal_buf));
        }

        Ok(Template { segments })
    }

    /// Materialize the template against the currently bound scope view.
    ///
    /// Each placeholder is evaluated through the script engine and
    /// stringified in the engine's native text form. A failing
    /// placeholder degrades to a visible diagnostic marker in place; it
    /// never aborts the rest of the render.
    pub fn render(&self, scopes: &ScopeManager) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(text),
                TemplateSegment::Expr(expr) => {
                    match scopes.eval_bound(expr, "interp") {
                        Ok(value) => out.push_str(&value.to_string()),
                        Err(e) => {
                            warn!("placeholder '{}' failed: {}", expr, e);
                            out.push_str(&format!("[error: {}]", expr));
                        }
                    }
                }
            }
        }
        out
    }

}
