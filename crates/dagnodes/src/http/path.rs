use serde_json::Value as Json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("invalid path '{path}': {reason}")]
    Syntax { path: String, reason: String },

    #[error("path '{0}' matched nothing")]
    NoMatch(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Index(i64),
    Wildcard,
}

/// A compiled path expression over a JSON document.
///
/// Supports `$`, `.name`, `['name']`, `[N]` (negative counts from the end),
/// `[*]` and `.*`. Without a wildcard the single match is returned and a miss
/// is an error; with one, all matches come back as an array.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    raw: String,
    steps: Vec<Step>,
    wildcard: bool,
}

impl JsonPath {
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        let syntax = |reason: &str| PathError::Syntax {
            path: expr.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = expr
            .trim()
            .strip_prefix('$')
            .ok_or_else(|| syntax("must start with '$'"))?;
        let mut steps = Vec::new();

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                if after.starts_with('.') {
                    return Err(syntax("recursive descent is not supported"));
                }
                if let Some(after) = after.strip_prefix('*') {
                    steps.push(Step::Wildcard);
                    rest = after;
                    continue;
                }
                let end = after.find(['.', '[']).unwrap_or(after.len());
                if end == 0 {
                    return Err(syntax("empty field name"));
                }
                steps.push(Step::Field(after[..end].to_string()));
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let end = after.find(']').ok_or_else(|| syntax("unclosed '['"))?;
                steps.push(parse_bracket(after[..end].trim()).ok_or_else(|| syntax("bad subscript"))?);
                rest = &after[end + 1..];
            } else {
                return Err(syntax("expected '.' or '['"));
            }
        }

        let wildcard = steps.contains(&Step::Wildcard);
        Ok(Self {
            raw: expr.to_string(),
            steps,
            wildcard,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn extract(&self, document: &Json) -> Result<Json, PathError> {
        let mut current = vec![document];

        for step in &self.steps {
            let mut next = Vec::new();
            for node in current {
                match step {
                    Step::Field(name) => next.extend(node.as_object().and_then(|o| o.get(name))),
                    Step::Index(index) => next.extend(node.as_array().and_then(|a| at(a, *index))),
                    Step::Wildcard => match node {
                        Json::Array(items) => next.extend(items.iter()),
                        Json::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                }
            }
            if next.is_empty() && !self.wildcard {
                return Err(PathError::NoMatch(self.raw.clone()));
            }
            current = next;
        }

        if self.wildcard {
            Ok(Json::Array(current.into_iter().cloned().collect()))
        } else {
            current
                .into_iter()
                .next()
                .cloned()
                .ok_or_else(|| PathError::NoMatch(self.raw.clone()))
        }
    }
}

/// Evaluate `expression` against `document` in one go
pub fn extract(document: &Json, expression: &str) -> Result<Json, PathError> {
    JsonPath::parse(expression)?.extract(document)
}

fn parse_bracket(inner: &str) -> Option<Step> {
    if inner == "*" {
        return Some(Step::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(name) = inner.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return Some(Step::Field(name.to_string()));
        }
    }
    inner.parse().ok().map(Step::Index)
}

fn at(items: &[Json], index: i64) -> Option<&Json> {
    let resolved = if index < 0 {
        items.len().checked_sub(index.unsigned_abs() as usize)?
    } else {
        index as usize
    };
    items.get(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dictionary() -> Json {
        json!([{
            "word": "hello",
            "meanings": [
                {"definitions": [{"definition": "greeting"}, {"definition": "salute"}]},
                {"definitions": [{"definition": "call"}]}
            ]
        }])
    }

    #[test]
    fn field_access() {
        let doc = json!({"safe_title": "Bad Map Projection", "num": 7});
        assert_eq!(extract(&doc, "$.safe_title").unwrap(), json!("Bad Map Projection"));
        assert_eq!(extract(&doc, "$['num']").unwrap(), json!(7));
        assert_eq!(extract(&doc, "$").unwrap(), doc);
    }

    #[test]
    fn index_access() {
        let doc = json!([{"x": 1}, {"x": 2}, {"x": 3}]);
        assert_eq!(extract(&doc, "$[0].x").unwrap(), json!(1));
        assert_eq!(extract(&doc, "$[-1].x").unwrap(), json!(3));
        assert!(matches!(extract(&doc, "$[5].x"), Err(PathError::NoMatch(_))));
    }

    #[test]
    fn wildcards_expand_and_flatten() {
        let doc = dictionary();
        assert_eq!(
            extract(&doc, "$[0].meanings[*].definitions[*].definition").unwrap(),
            json!(["greeting", "salute", "call"])
        );

        let posts = json!([{"title": "a"}, {"title": "b"}]);
        assert_eq!(extract(&posts, "$[*].title").unwrap(), json!(["a", "b"]));
        assert_eq!(extract(&json!({"a": 1, "b": 2}), "$.*").unwrap(), json!([1, 2]));
    }

    #[test]
    fn wildcard_without_matches_is_empty() {
        assert_eq!(extract(&json!([]), "$[*].title").unwrap(), json!([]));
        assert_eq!(
            extract(&json!([{"title": "a"}, {"other": 1}]), "$[*].title").unwrap(),
            json!(["a"])
        );
    }

    #[test]
    fn missing_field_is_an_error() {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(
            extract(&doc, "$.a.c"),
            Err(PathError::NoMatch("$.a.c".into()))
        );
        assert!(matches!(extract(&json!("text"), "$.a"), Err(PathError::NoMatch(_))));
    }

    #[test]
    fn rejects_bad_syntax() {
        for bad in ["a.b", "$..a", "$.", "$[0", "$[x]", "$a"] {
            assert!(
                matches!(JsonPath::parse(bad), Err(PathError::Syntax { .. })),
                "accepted {bad}"
            );
        }
    }
}
