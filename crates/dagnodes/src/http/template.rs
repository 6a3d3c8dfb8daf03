use dagcore::{NodeError, NodeInputs, Outputs};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A URL with `${name}` placeholders, parsed once at construction.
///
/// Placeholders resolve against the flat input view, then the qualified
/// view (so `${node.key}` works too), then the fallback defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    pub fn parse(raw: &str) -> Result<Self, NodeError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| {
                NodeError::Configuration(format!("Unterminated placeholder in '{}'", raw))
            })?;

            let name = after[..end].trim();
            if name.is_empty() {
                return Err(NodeError::Configuration(format!(
                    "Empty placeholder in '{}'",
                    raw
                )));
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Placeholder(name.to_string()));
            rest = &after[end + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, inputs: &NodeInputs, defaults: &Outputs) -> Result<String, NodeError> {
        let mut url = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Placeholder(name) => {
                    let value = inputs
                        .lookup(name)
                        .or_else(|| defaults.get(name))
                        .ok_or_else(|| NodeError::TemplateResolution(name.clone()))?;
                    url.push_str(&value.to_string());
                }
            }
        }
        Ok(url)
    }
}
