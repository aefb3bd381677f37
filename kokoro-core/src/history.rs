//! Read-only views over stored conversations: filtered queries, statistics,
//! recent activity.
//!
//! Nothing here mutates its input; results are fresh vectors of references.

use kokoro_common::util::contains_folded;
use kokoro_common::{Error, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::character::CharacterId;
use crate::conversation::Conversation;
use crate::emotion::Emotion;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub character: Option<CharacterId>,
    pub favorites_only: bool,
    /// Case-insensitive substring over title, summary and message text.
    pub search_text: Option<String>,
}

/// Sort key. All orders are descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Most recently active first.
    #[default]
    Date,
    /// Most messages first.
    Length,
    /// Highest rated first; unrated last.
    Rating,
}

impl FromStr for SortBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "date" => Ok(Self::Date),
            "length" => Ok(Self::Length),
            "rating" => Ok(Self::Rating),
            other => Err(Error::Validation(format!(
                "unknown sort '{other}' (expected date, length or rating)"
            ))),
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Date => "date",
            Self::Length => "length",
            Self::Rating => "rating",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub average_length: f64,
    pub emotion_distribution: BTreeMap<Emotion, usize>,
    pub favorite_count: usize,
    pub conversations_per_character: BTreeMap<CharacterId, usize>,
}

/// Borrowing view over a conversation collection.
#[derive(Debug, Clone, Copy)]
pub struct HistoryIndex<'a> {
    conversations: &'a [Conversation],
}

impl<'a> HistoryIndex<'a> {
    pub fn new(conversations: &'a [Conversation]) -> Self {
        Self { conversations }
    }

    pub fn query(&self, filter: &HistoryFilter, sort_by: SortBy) -> Vec<&'a Conversation> {
        let needle = filter
            .search_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut results: Vec<&'a Conversation> = self
            .conversations
            .iter()
            .filter(|c| filter.character.map_or(true, |id| c.character_id == id))
            .filter(|c| !filter.favorites_only || c.is_favorite)
            .filter(|c| needle.as_deref().map_or(true, |n| matches_search(c, n)))
            .collect();

        // sort_by is stable: equal keys keep collection order
        results.sort_by(|a, b| compare(a, b, sort_by));
        results
    }

    /// The `limit` most recently active conversations.
    pub fn recent(&self, limit: usize) -> Vec<&'a Conversation> {
        let mut results = self.query(&HistoryFilter::default(), SortBy::Date);
        results.truncate(limit);
        results
    }

    pub fn statistics(&self) -> HistoryStats {
        let mut stats = self
            .conversations
            .iter()
            .fold(HistoryStats::default(), |mut acc, c| {
                acc.total_conversations += 1;
                acc.total_messages += c.messages.len();
                if c.is_favorite {
                    acc.favorite_count += 1;
                }
                *acc.conversations_per_character
                    .entry(c.character_id)
                    .or_default() += 1;
                for m in c.messages.iter().filter(|m| !m.sender.is_user()) {
                    *acc.emotion_distribution.entry(m.emotion).or_default() += 1;
                }
                acc
            });
        if stats.total_conversations > 0 {
            stats.average_length = stats.total_messages as f64 / stats.total_conversations as f64;
        }
        stats
    }
}

fn matches_search(c: &Conversation, needle: &str) -> bool {
    contains_folded(&c.title, needle)
        || c.summary
            .as_deref()
            .is_some_and(|s| contains_folded(s, needle))
        || c.messages.iter().any(|m| contains_folded(&m.text, needle))
}

fn compare(a: &Conversation, b: &Conversation, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::Date => b.metadata.last_activity.cmp(&a.metadata.last_activity),
        SortBy::Length => b.messages.len().cmp(&a.messages.len()),
        // Some(_) > None, so reversing puts unrated last
        SortBy::Rating => b.rating.cmp(&a.rating),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use chrono::{Duration, Utc};

    fn conv(id: &str, character: CharacterId, minutes_ago: i64) -> Conversation {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        Conversation::new(id, character, "cafe", "Afternoon at the café", at)
    }

    #[test]
    fn test_sort_by_parse() {
        assert_eq!("Rating".parse::<SortBy>().unwrap(), SortBy::Rating);
        assert!("size".parse::<SortBy>().is_err());
    }

    #[test]
    fn test_character_and_favorite_filters() {
        let mut a = conv("a", CharacterId::Aoi, 3);
        a.is_favorite = true;
        let b = conv("b", CharacterId::Shun, 2);
        let c = conv("c", CharacterId::Aoi, 1);
        let all = vec![a, b, c];
        let index = HistoryIndex::new(&all);

        let aoi = index.query(
            &HistoryFilter {
                character: Some(CharacterId::Aoi),
                ..Default::default()
            },
            SortBy::Date,
        );
        let ids: Vec<_> = aoi.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let favs = index.query(
            &HistoryFilter {
                favorites_only: true,
                ..Default::default()
            },
            SortBy::Date,
        );
        assert_eq!(favs.len(), 1);
        assert_eq!(favs[0].id, "a");
    }

    #[test]
    fn test_rating_sort_unrated_last() {
        let mut a = conv("a", CharacterId::Aoi, 0);
        let mut b = conv("b", CharacterId::Aoi, 0);
        let c = conv("c", CharacterId::Aoi, 0);
        a.rating = Some(3);
        b.rating = Some(5);
        let all = vec![c, a, b];
        let ids: Vec<_> = HistoryIndex::new(&all)
            .query(&HistoryFilter::default(), SortBy::Rating)
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_statistics() {
        let mut a = conv("a", CharacterId::Aoi, 0);
        a.append(Message::user("hi")).unwrap();
        a.append(Message::character(CharacterId::Aoi, "hey", Emotion::Happy))
            .unwrap();
        a.append(Message::user("how are you")).unwrap();
        a.append(Message::character(CharacterId::Aoi, "great", Emotion::Happy))
            .unwrap();
        a.is_favorite = true;
        let mut b = conv("b", CharacterId::Shun, 0);
        b.append(Message::user("yo")).unwrap();
        b.append(Message::character(CharacterId::Shun, "...", Emotion::Thinking))
            .unwrap();

        let all = vec![a, b];
        let stats = HistoryIndex::new(&all).statistics();
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_messages, 6);
        assert!((stats.average_length - 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.emotion_distribution.get(&Emotion::Happy), Some(&2));
        assert_eq!(stats.emotion_distribution.get(&Emotion::Thinking), Some(&1));
        assert_eq!(stats.emotion_distribution.get(&Emotion::Neutral), None);
        assert_eq!(stats.favorite_count, 1);
        assert_eq!(stats.conversations_per_character.get(&CharacterId::Shun), Some(&1));
    }

    #[test]
    fn test_empty_statistics() {
        let stats = HistoryIndex::new(&[]).statistics();
        assert_eq!(stats, HistoryStats::default());
    }

    #[test]
    fn test_recent_limit() {
        let all = vec![
            conv("old", CharacterId::Aoi, 30),
            conv("new", CharacterId::Aoi, 1),
            conv("mid", CharacterId::Shun, 10),
        ];
        let ids: Vec<_> = HistoryIndex::new(&all)
            .recent(2)
            .into_iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }
}
