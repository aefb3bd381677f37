//! Built-in scenario catalog.

use kokoro_common::{Error, Result};
use serde::Serialize;

/// Where and how a conversation takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub id: &'static str,
    pub title: &'static str,
    pub setting: &'static str,
}

pub const FREE_TALK: Scenario = Scenario {
    id: "free_talk",
    title: "Free talk",
    setting: "A relaxed, open-ended chat with no particular setting.",
};

pub const CATALOG: &[Scenario] = &[
    FREE_TALK,
    Scenario {
        id: "cafe",
        title: "Afternoon at the café",
        setting: "A quiet corner table in a small café, rain tapping on the window.",
    },
    Scenario {
        id: "rooftop",
        title: "School rooftop",
        setting: "The school rooftop after classes, wind and a view of the city.",
    },
    Scenario {
        id: "festival",
        title: "Summer festival",
        setting: "A crowded summer festival with food stalls and fireworks later tonight.",
    },
    Scenario {
        id: "library",
        title: "Library study session",
        setting: "A study table in the city library, voices kept low.",
    },
    Scenario {
        id: "walk_home",
        title: "Walk home",
        setting: "Walking home together along the river at sunset.",
    },
];

pub fn find(id: &str) -> Option<&'static Scenario> {
    CATALOG.iter().find(|s| s.id == id)
}

/// Look up a scenario for a new conversation.
pub fn require(id: &str) -> Result<&'static Scenario> {
    find(id).ok_or_else(|| Error::Validation(format!("unknown scenario '{id}'")))
}

/// Look up a scenario for an existing conversation, falling back to free talk
/// for ids that left the catalog.
pub fn resolve(id: &str) -> &'static Scenario {
    find(id).unwrap_or(&FREE_TALK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_unique() {
        let mut ids: Vec<_> = CATALOG.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CATALOG.len());
    }

    #[test]
    fn test_require_and_resolve() {
        assert_eq!(require("cafe").unwrap().id, "cafe");
        assert!(require("moon_base").unwrap_err().is_validation());
        assert_eq!(resolve("moon_base").id, "free_talk");
    }
}
