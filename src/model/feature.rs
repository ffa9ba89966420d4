use std::collections::{BTreeMap, HashMap};

use geo::Geometry;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A record from the feature store: an identity, an optional geometry and
/// named attribute values kept as raw strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(default)]
    pub geometry: Option<Geometry<f64>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Feature {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            geometry: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_geometry(mut self, geometry: impl Into<Geometry<f64>>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl ToString) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    /// Attribute lookup; the reserved name `id` resolves to the feature id.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(v) => Some(v.as_str()),
            None if name == "id" => Some(self.id.as_str()),
            None => None,
        }
    }
}

/// Granules of one granularity, unique by id, in store order.
#[derive(Debug, Clone, Default)]
pub struct GranuleSet {
    granules: Vec<Feature>,
    index: HashMap<String, usize>,
}

impl GranuleSet {
    /// Builds a set from store output. Duplicate ids keep the first occurrence.
    pub fn from_features(granularity: &str, features: Vec<Feature>) -> Self {
        let mut set = GranuleSet::default();
        for feature in features {
            if set.index.contains_key(&feature.id) {
                warn!(granularity, granule = %feature.id, "Duplicate granule id dropped");
                continue;
            }
            set.index.insert(feature.id.clone(), set.granules.len());
            set.granules.push(feature);
        }
        set
    }

    pub fn get(&self, id: &str) -> Option<&Feature> {
        self.index.get(id).map(|&i| &self.granules[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.granules.iter()
    }

    pub fn len(&self) -> usize {
        self.granules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_falls_back_to_id() {
        let f = Feature::new("s1").with_attribute("rain", 2.5);
        assert_eq!(f.attribute("rain"), Some("2.5"));
        assert_eq!(f.attribute("id"), Some("s1"));
        assert_eq!(f.attribute("missing"), None);
    }

    #[test]
    fn test_granule_set_drops_duplicates() {
        let set = GranuleSet::from_features(
            "stations",
            vec![
                Feature::new("a").with_attribute("n", 1),
                Feature::new("b"),
                Feature::new("a").with_attribute("n", 2),
            ],
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("a").unwrap().attribute("n"), Some("1"));
        let ids: Vec<_> = set.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
