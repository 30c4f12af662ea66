//! In-process channel history for platforms that keep their own log.

use seedkeeper_core::HistoryMessage;
use seedkeeper_core::error::PlatformError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Messages seen per channel, oldest first, bounded per channel.
pub struct ChannelHistory {
    channels: Mutex<HashMap<String, Vec<HistoryMessage>>>,
    per_channel: usize,
}

impl ChannelHistory {
    pub fn new(per_channel: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            per_channel: per_channel.max(1),
        }
    }

    pub fn record(&self, channel_id: &str, message: HistoryMessage) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let log = channels.entry(channel_id.to_string()).or_default();
        log.push(message);
        if log.len() > self.per_channel {
            let excess = log.len() - self.per_channel;
            log.drain(..excess);
        }
    }

    /// Up to `limit` messages posted after `after_message_id`, oldest first,
    /// skipping those written by `exclude_author`.
    pub fn after(
        &self,
        channel_id: &str,
        after_message_id: &str,
        limit: usize,
        exclude_author: Option<&str>,
    ) -> Result<Vec<HistoryMessage>, PlatformError> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let log = channels
            .get(channel_id)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel_id}")))?;
        let start = log
            .iter()
            .position(|m| m.id == after_message_id)
            .ok_or_else(|| PlatformError::NotFound(format!("message {after_message_id}")))?;

        Ok(log[start + 1..]
            .iter()
            .filter(|m| exclude_author != Some(m.author_id.as_str()))
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn len(&self, channel_id: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(id: &str, author_id: &str) -> HistoryMessage {
        HistoryMessage {
            id: id.into(),
            author: format!("user-{author_id}"),
            author_id: author_id.into(),
            content: format!("message {id}"),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn after_skips_anchor_and_excluded_author() {
        let history = ChannelHistory::new(100);
        for (id, author) in [("1", "a"), ("2", "bot"), ("3", "b"), ("4", "a")] {
            history.record("c", msg(id, author));
        }

        let found = history.after("c", "1", 10, Some("bot")).unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4"]);

        assert_eq!(history.after("c", "1", 1, None).unwrap().len(), 1);
    }

    #[test]
    fn unknown_anchor_is_not_found() {
        let history = ChannelHistory::new(100);
        history.record("c", msg("1", "a"));
        assert!(matches!(
            history.after("c", "99", 10, None),
            Err(PlatformError::NotFound(_))
        ));
        assert!(history.after("other", "1", 10, None).is_err());
    }

    #[test]
    fn per_channel_bound_drops_oldest() {
        let history = ChannelHistory::new(2);
        for id in ["1", "2", "3"] {
            history.record("c", msg(id, "a"));
        }
        assert_eq!(history.len("c"), 2);
        assert!(history.after("c", "1", 10, None).is_err());
    }
}
