use super::{ExpectedType, Expression, ExpressionCompiler, ExpressionError, Language};
use crate::exchange::Exchange;
use crate::outcome::Flow;

#[derive(Debug, Clone)]
enum Part {
    Text(String),
    Placeholder(Expression),
}

/// String with `${expr}` placeholders, e.g. `http://users/${property.id}`.
///
/// Placeholders are compiled once; absent values render as the empty string.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub(super) fn compile(
        compiler: &ExpressionCompiler,
        language: Language,
        source: &str,
    ) -> Result<Self, ExpressionError> {
        let mut parts = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_string()));
            }
            let body = &rest[start + 2..];
            let end = closing_brace(body).ok_or_else(|| {
                ExpressionError::compile(language, source, "unterminated '${' placeholder")
            })?;
            parts.push(Part::Placeholder(compiler.compile(language, &body[..end])?));
            rest = &body[end + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template contains no placeholders.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Text(_)))
    }

    /// # Errors
    ///
    /// Propagates placeholder evaluation failures other than null dereferences.
    pub fn render(&self, exchange: &Exchange, flow: Flow) -> Result<String, ExpressionError> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Placeholder(expr) => match expr.evaluate(exchange, flow, ExpectedType::String) {
                    Ok(value) => out.push_str(&value.to_string()),
                    Err(ExpressionError::NullDereference { .. }) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(out)
    }
}

/// Index of the `}` closing a placeholder body, honouring nested braces.
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Request;

    fn render(source: &str, exc: &Exchange) -> String {
        ExpressionCompiler::default()
            .compile_template(Language::Attribute, source)
            .expect("compiles")
            .render(exc, Flow::Request)
            .expect("renders")
    }

    #[test]
    fn substitutes_placeholders() {
        let mut exc = Exchange::new(Request::get("/users/7"));
        exc.set_property("id", 7_i64);
        assert_eq!(
            render("http://backend${path}?id=${property.id}", &exc),
            "http://backend/users/7?id=7"
        );
    }

    #[test]
    fn missing_values_render_empty() {
        let exc = Exchange::new(Request::get("/"));
        assert_eq!(render("a${property.x}b${property.x.y}c", &exc), "abc");
    }

    #[test]
    fn literal_template_has_no_placeholders() {
        let template = ExpressionCompiler::default()
            .compile_template(Language::Attribute, "http://static")
            .expect("compiles");
        assert!(template.is_literal());
    }

    #[test]
    fn script_placeholder_with_braces() {
        let exc = Exchange::new(Request::get("/"));
        let template = ExpressionCompiler::default()
            .compile_template(Language::Script, "n=${ if true { 1 } else { 2 } }")
            .expect("compiles");
        assert_eq!(template.render(&exc, Flow::Request).ok().as_deref(), Some("n=1"));
    }

    #[test]
    fn unterminated_placeholder_fails() {
        assert!(ExpressionCompiler::default()
            .compile_template(Language::Attribute, "http://x/${path")
            .is_err());
    }
}
