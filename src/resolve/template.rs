//! Scanner for `${a.b}` / `${a.b.c}` template tokens.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();
static PATH_REGEX: OnceLock<Regex> = OnceLock::new();

fn token_regex() -> &'static Regex {
    TOKEN_REGEX.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").expect("static regex pattern is valid"))
}

fn path_regex() -> &'static Regex {
    PATH_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*$").expect("static regex pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated reference")]
    Unterminated(String),
    #[error("invalid reference syntax; expected ${{name.attribute}}")]
    Invalid(String),
}

impl TemplateError {
    /// The offending text as written.
    pub fn token(&self) -> &str {
        match self {
            TemplateError::Unterminated(t) | TemplateError::Invalid(t) => t,
        }
    }
}

/// A parsed `${...}` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Literal token, e.g. `${postgres.host}`.
    pub token: String,
    /// Dotted path segments; never empty.
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Reference(Reference),
}

/// Split a string into literal text and references.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut last = 0;

    for captures in token_regex().captures_iter(input) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        push_literal(&mut segments, &input[last..whole.start()])?;

        let token = whole.as_str().to_string();
        // `${a.${b}}` matches as `${a.${b}`; the nested opener makes it invalid.
        if !path_regex().is_match(inner.as_str()) {
            return Err(TemplateError::Invalid(token));
        }
        let path = inner.as_str().split('.').map(str::to_string).collect();
        segments.push(Segment::Reference(Reference { token, path }));
        last = whole.end();
    }
    push_literal(&mut segments, &input[last..])?;

    Ok(segments)
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), TemplateError> {
    if let Some(pos) = text.find("${") {
        return Err(TemplateError::Unterminated(text[pos..].to_string()));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

/// All references in `input`, in order of appearance.
pub fn references(input: &str) -> Result<Vec<Reference>, TemplateError> {
    Ok(parse(input)?
        .into_iter()
        .filter_map(|s| match s {
            Segment::Reference(r) => Some(r),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Replace every reference with the value returned by `lookup`.
///
/// The first lookup error aborts substitution.
pub fn substitute<E, F>(input: &str, mut lookup: F) -> Result<String, E>
where
    E: From<TemplateError>,
    F: FnMut(&Reference) -> Result<String, E>,
{
    let mut out = String::with_capacity(input.len());
    for segment in parse(input)? {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Reference(reference) => out.push_str(&lookup(&reference)?),
        }
    }
    Ok(out)
}
