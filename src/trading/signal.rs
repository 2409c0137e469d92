//! Signal matcher: scans inbound messages for tradable base assets.

use std::collections::HashSet;

/// Matches message text against the known base assets that pair with the
/// configured quote, with an optional chat allow-list filter in front.
#[derive(Debug, Clone)]
pub struct SignalMatcher {
    allow_list: HashSet<i64>,
}

impl SignalMatcher {
    /// Build a matcher. An empty allow-list accepts every chat.
    pub fn new(allow_list: &[i64]) -> Self {
        Self {
            allow_list: allow_list.iter().copied().collect(),
        }
    }

    /// Whether a message from this chat should be considered at all.
    pub fn accepts_chat(&self, chat_id: i64) -> bool {
        self.allow_list.is_empty() || self.allow_list.contains(&chat_id)
    }

    /// Find the first candidate base contained in the message text.
    ///
    /// Deliberately naive: exact, case-sensitive substring containment with
    /// ties resolved by candidate list order (market-listing order). False
    /// positives are accepted; the operator confirms before any order is
    /// placed.
    pub fn find_match<'a>(&self, text: &str, candidates: &'a [String]) -> Option<&'a str> {
        candidates
            .iter()
            .find(|base| text.contains(base.as_str()))
            .map(String::as_str)
    }
}
