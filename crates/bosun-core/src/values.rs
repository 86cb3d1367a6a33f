//! Values handling with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{CoreError, Result};

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// An empty mapping
    pub fn new() -> Self {
        Self(JsonValue::Object(Map::new()))
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Merge `overlay` on top of these values
    ///
    /// Mappings merge key by key; scalars and sequences from the overlay
    /// replace what is there. A null overlay changes nothing.
    pub fn merge(&mut self, overlay: &Values) {
        merge_into(&mut self.0, &overlay.0);
    }

    /// Return a copy of `base` with `overlay` merged on top
    pub fn merged(base: &Values, overlay: &Values) -> Values {
        let mut result = base.clone();
        result.merge(overlay);
        result
    }

    /// Set a value by dotted path (`image.tag`), creating mappings on the way
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        let mut keys: Vec<&str> = path.split('.').collect();
        let Some(leaf) = keys.pop().filter(|k| !k.is_empty()) else {
            return Err(CoreError::ValuesMerge {
                message: format!("cannot set a value at path '{path}'"),
            });
        };

        let mut node = &mut self.0;
        for key in keys {
            node = as_object(node)
                .entry(key.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
        }
        as_object(node).insert(leaf.to_string(), value);
        Ok(())
    }

    /// Look up a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |node, key| node.as_object()?.get(key))
    }

    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// True for null and for an empty mapping
    pub fn is_empty(&self) -> bool {
        self.0
            .as_object()
            .map_or(self.0.is_null(), Map::is_empty)
    }
}

impl From<JsonValue> for Values {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

fn merge_into(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        // an empty values file
        (_, JsonValue::Null) => {}
        (JsonValue::Object(target), JsonValue::Object(source)) => {
            for (key, value) in source {
                target
                    .entry(key.clone())
                    .and_modify(|existing| merge_into(existing, value))
                    .or_insert_with(|| value.clone());
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// `node` as a mapping, replacing anything else with an empty one
fn as_object(node: &mut JsonValue) -> &mut Map<String, JsonValue> {
    match node {
        JsonValue::Object(map) => map,
        other => {
            *other = JsonValue::Object(Map::new());
            as_object(other)
        }
    }
}
