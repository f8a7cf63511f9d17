//! Path-expression resolution and call-parameter templating.
//!
//! Expressions are dotted field paths with optional list indexing, e.g.
//! `versioning.status` or `rules[0].id`. They are resolved against a layered
//! context stack ordered from innermost to outermost (loop variable, current
//! call response, parent item fields); the first layer that contains the
//! path's root key wins.

use crate::engine::value::{FieldMap, Resolved, Value};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// One segment of a parsed field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

/// Error raised when a path expression cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParseError {
    pub expression: String,
    pub detail: String,
}

impl fmt::Display for PathParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid path expression '{}': {}",
            self.expression, self.detail
        )
    }
}

impl std::error::Error for PathParseError {}

impl FieldPath {
    /// Parse a dotted/indexed path expression
    pub fn parse(expression: &str) -> Result<Self, PathParseError> {
        let trimmed = expression.trim();

        if trimmed.is_empty() {
            return Err(PathParseError {
                expression: expression.to_string(),
                detail: "empty expression".to_string(),
            });
        }

        let mut segments = Vec::new();

        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(PathParseError {
                    expression: expression.to_string(),
                    detail: "empty path segment".to_string(),
                });
            }

            // Split off any trailing [n] index suffixes
            let (key, indexes) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };

            if key.is_empty() {
                return Err(PathParseError {
                    expression: expression.to_string(),
                    detail: format!("segment '{}' has no field name", part),
                });
            }

            segments.push(PathSegment::Key(key.to_string()));

            let mut rest = indexes;
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| PathParseError {
                    expression: expression.to_string(),
                    detail: format!("unterminated index in segment '{}'", part),
                })?;

                let index: usize = rest[1..close].parse().map_err(|_| PathParseError {
                    expression: expression.to_string(),
                    detail: format!("non-numeric index in segment '{}'", part),
                })?;

                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];

                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(PathParseError {
                        expression: expression.to_string(),
                        detail: format!("trailing characters after index in segment '{}'", part),
                    });
                }
            }
        }

        Ok(Self { segments })
    }

    /// The root field name the path starts from
    pub fn root_key(&self) -> &str {
        match &self.segments[0] {
            PathSegment::Key(k) => k,
            // parse() always produces a leading Key segment
            PathSegment::Index(_) => unreachable!("path starts with an index"),
        }
    }

    /// Resolve this path against a stack of field-map layers, innermost
    /// first. Returns Absent when no layer contains the root key or the
    /// traversal runs off the value shape.
    pub fn resolve(&self, layers: &[&FieldMap]) -> Resolved {
        for layer in layers {
            if layer.contains_key(self.root_key()) {
                return self.resolve_in_map(layer);
            }
        }

        Resolved::Absent
    }

    /// Resolve this path against a single field map
    pub fn resolve_in_map(&self, fields: &FieldMap) -> Resolved {
        let mut current: Option<&Value> = None;

        for segment in &self.segments {
            let next = match (segment, current) {
                (PathSegment::Key(key), None) => fields.get(key),
                (PathSegment::Key(key), Some(Value::Map(map))) => map.get(key),
                (PathSegment::Index(i), Some(Value::List(list))) => list.get(*i),
                // Traversing into a non-container is absence, not an error
                _ => None,
            };

            match next {
                Some(value) => current = Some(value),
                None => return Resolved::Absent,
            }
        }

        match current {
            Some(value) => Resolved::Present(value.clone()),
            None => Resolved::Absent,
        }
    }

    /// Resolve this path inside an arbitrary value (used for emit `items`
    /// selection where the response may itself be a list)
    pub fn resolve_in_value(&self, value: &Value) -> Resolved {
        match value {
            Value::Map(map) => self.resolve_in_map(map),
            _ => Resolved::Absent,
        }
    }
}

/// Error raised when a templated call parameter references an absent field.
/// Aborts only the single invocation it occurred in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    pub parameter: String,
    pub expression: String,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Template parameter '{}' could not be resolved: '{}' is absent",
            self.parameter, self.expression
        )
    }
}

impl std::error::Error for TemplateError {}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap())
}

/// Render a call's parameter templates against the parent item's fields.
///
/// A parameter that is exactly one `{{path}}` placeholder keeps the resolved
/// value's type; placeholders embedded in longer strings are stringified.
/// Non-string parameters pass through untouched.
pub fn render_params(
    params: &std::collections::BTreeMap<String, Value>,
    parent_fields: &FieldMap,
) -> Result<std::collections::BTreeMap<String, Value>, TemplateError> {
    let mut rendered = std::collections::BTreeMap::new();

    for (name, template) in params {
        let value = match template {
            Value::String(text) => render_template(name, text, parent_fields)?,
            other => other.clone(),
        };

        rendered.insert(name.clone(), value);
    }

    Ok(rendered)
}

fn render_template(
    param: &str,
    text: &str,
    parent_fields: &FieldMap,
) -> Result<Value, TemplateError> {
    let re = placeholder_regex();

    // Whole-string placeholder preserves the resolved value's type
    if let Some(caps) = re.captures(text) {
        let full = caps.get(0).unwrap();
        if full.start() == 0 && full.end() == text.len() {
            let resolved = resolve_placeholder(param, &caps[1], parent_fields)?;
            return Ok(resolved);
        }
    } else {
        return Ok(Value::String(text.to_string()));
    }

    let mut out = String::new();
    let mut last = 0;

    for caps in re.captures_iter(text) {
        let full = caps.get(0).unwrap();
        out.push_str(&text[last..full.start()]);
        let resolved = resolve_placeholder(param, &caps[1], parent_fields)?;
        out.push_str(&resolved.to_string());
        last = full.end();
    }

    out.push_str(&text[last..]);
    Ok(Value::String(out))
}

fn resolve_placeholder(
    param: &str,
    expression: &str,
    parent_fields: &FieldMap,
) -> Result<Value, TemplateError> {
    let path = FieldPath::parse(expression).map_err(|_| TemplateError {
        parameter: param.to_string(),
        expression: expression.to_string(),
    })?;

    path.resolve_in_map(parent_fields)
        .into_present()
        .ok_or_else(|| TemplateError {
            parameter: param.to_string(),
            expression: expression.to_string(),
        })
}
