use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::RecordId;

/// One record from the data endpoint. Parents and children share this shape;
/// a child carries `parent_ref` naming the parent it belongs to. Columns the
/// component does not interpret ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(id),
            display_name: display_name.into(),
            parent_ref: None,
            region: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_ref = Some(RecordId::new(parent));
        self
    }
}

/// Collection envelope returned by the data endpoint. A missing `value` array
/// reads as an empty collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionResponse {
    #[serde(default)]
    pub value: Vec<Record>,
}

/// Payload of the outbound selection notification. Names only; hosts that
/// need ids can ask the controller for a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionChanged {
    pub selected_parent_name: String,
    pub selected_child_name: String,
}
