use std::fmt;

use serde::{Deserialize, Serialize};

/// The structured record carried by the typed pipeline.
///
/// Field names are camelCase on the wire. Any field may be omitted and
/// takes its default; fields of the wrong type are rejected.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    pub fn new(id: u64, first_name: &str, last_name: &str) -> Self {
        Self {
            id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User{{id={}, firstName='{}', lastName='{}'}}",
            self.id, self.first_name, self.last_name
        )
    }
}
