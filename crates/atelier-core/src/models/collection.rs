use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{collections, SCOPE_FIELD};

/// Named partition of entities. Each collection is cached, subscribed and
/// written independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Projects,
    Messages,
    Files,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Projects, Collection::Messages, Collection::Files];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Projects => collections::PROJECTS,
            Collection::Messages => collections::MESSAGES,
            Collection::Files => collections::FILES,
        }
    }

    /// Push channel carrying every document event of this collection.
    /// Scope filtering happens client-side.
    pub fn channel_name(&self) -> String {
        format!("collections.{}.documents", self.as_str())
    }

    /// Document field holding the parent scope, if the collection is scoped.
    pub fn scope_field(&self) -> Option<&'static str> {
        match self {
            Collection::Projects => None,
            Collection::Messages | Collection::Files => Some(SCOPE_FIELD),
        }
    }

    pub fn cache_file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            collections::PROJECTS => Ok(Collection::Projects),
            collections::MESSAGES => Ok(Collection::Messages),
            collections::FILES => Ok(Collection::Files),
            other => Err(format!("unknown collection: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_are_per_collection() {
        assert_eq!(
            Collection::Messages.channel_name(),
            "collections.messages.documents"
        );
        assert_ne!(
            Collection::Files.channel_name(),
            Collection::Messages.channel_name()
        );
    }

    #[test]
    fn test_parse_collection_names() {
        assert_eq!("files".parse::<Collection>(), Ok(Collection::Files));
        assert!("threads".parse::<Collection>().is_err());
    }

    #[test]
    fn test_projects_are_unscoped() {
        assert_eq!(Collection::Projects.scope_field(), None);
        assert_eq!(Collection::Files.scope_field(), Some("projectId"));
    }
}
