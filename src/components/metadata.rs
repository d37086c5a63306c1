use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;

/// Nodata sentinel written by an engine, as decimal text.
pub const NODATA: &str = "NODATA";
pub const INDEX_FORMULA: &str = "INDEX_FORMULA";
/// Zero based band pair `a,b` an index was computed from.
pub const INDEX_BANDS: &str = "INDEX_BANDS";
pub const INDEX_NAME: &str = "INDEX_NAME";
pub const CLIP_CONVENTION: &str = "CLIP_CONVENTION";

/// String key/value metadata attached to a raster.
#[derive(Shrinkwrap, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
