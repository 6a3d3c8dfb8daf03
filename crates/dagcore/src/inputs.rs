use crate::{NodeId, Outputs, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// An output key namespaced by the node that produced it.
///
/// Rendered as `"<node_id>.<key>"` at the authoring boundary. Node ids never
/// contain `.`, so the dotted form splits unambiguously at the first dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedKey {
    pub node_id: NodeId,
    pub key: String,
}

impl QualifiedKey {
    pub fn new(node_id: impl Into<NodeId>, key: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            key: key.into(),
        }
    }

    pub fn dotted(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QualifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_id, self.key)
    }
}

impl FromStr for QualifiedKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((node_id, key)) if !node_id.is_empty() => Ok(Self::new(node_id, key)),
            _ => Err(format!("'{}' is not a qualified key (expected <node>.<key>)", s)),
        }
    }
}

impl Serialize for QualifiedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QualifiedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The inputs visible to a node, in two addressing styles.
///
/// The flat view holds a sole predecessor's outputs under their own keys, or,
/// with several predecessors, every output under its dotted qualified key.
/// The qualified view always namespaces by predecessor, in edge-insertion
/// order, whatever the predecessor count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInputs {
    flat: BTreeMap<String, Value>,
    qualified: IndexMap<QualifiedKey, Value>,
}

impl NodeInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build both views from predecessor outputs.
    ///
    /// `predecessor_count` is the number of declared predecessors, including
    /// those whose outputs are missing; it alone decides whether the flat
    /// view is qualified.
    pub fn from_predecessors<'a, I>(predecessor_count: usize, outputs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Outputs)>,
    {
        let mut inputs = Self::new();
        for (node_id, produced) in outputs {
            for (key, value) in produced {
                let qualified = QualifiedKey::new(node_id, key.as_str());
                if predecessor_count == 1 {
                    inputs.flat.insert(key.clone(), value.clone());
                } else {
                    inputs.flat.insert(qualified.dotted(), value.clone());
                }
                inputs.qualified.insert(qualified, value.clone());
            }
        }
        inputs
    }

    /// Flat-view lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.flat.get(key)
    }

    /// Qualified-view lookup by structured key.
    pub fn get_from(&self, node_id: &str, key: &str) -> Option<&Value> {
        self.qualified.get(&QualifiedKey::new(node_id, key))
    }

    /// Qualified-view lookup by dotted `"<node_id>.<key>"`.
    pub fn get_qualified(&self, dotted: &str) -> Option<&Value> {
        let key: QualifiedKey = dotted.parse().ok()?;
        self.qualified.get(&key)
    }

    /// Flat first, then qualified. Used where either style may be written.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name).or_else(|| self.get_qualified(name))
    }

    pub fn flat(&self) -> &BTreeMap<String, Value> {
        &self.flat
    }

    pub fn qualified(&self) -> impl Iterator<Item = (&QualifiedKey, &Value)> {
        self.qualified.iter()
    }

    /// The qualified view with dotted string keys.
    pub fn qualified_map(&self) -> BTreeMap<String, Value> {
        self.qualified
            .iter()
            .map(|(k, v)| (k.dotted(), v.clone()))
            .collect()
    }

    /// Values from one predecessor, keyed by their unqualified names.
    pub fn from_node(&self, node_id: &str) -> BTreeMap<String, Value> {
        self.qualified
            .iter()
            .filter(|(k, _)| k.node_id == node_id)
            .map(|(k, v)| (k.key.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.qualified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.qualified.is_empty()
    }
}
