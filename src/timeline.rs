//! Client-local, append-only log of chat events.

use chrono::{DateTime, Utc};
use log::debug;
use std::collections::VecDeque;
use std::fmt;

use crate::audio_resource::AudioResource;

/// Locally unique event identifier: arrival time in milliseconds plus a
/// monotonic sequence number. Ordering is arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    millis: i64,
    seq: u64,
}

impl EventId {
    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ChatKind {
    Text,
    Voice,
}

#[derive(Debug)]
pub enum ChatPayload {
    Text(String),
    Voice(AudioResource),
}

/// One timeline entry
#[derive(Debug)]
pub struct ChatEvent {
    pub id: EventId,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub payload: ChatPayload,
}

impl ChatEvent {
    pub fn kind(&self) -> ChatKind {
        match self.payload {
            ChatPayload::Text(_) => ChatKind::Text,
            ChatPayload::Voice(_) => ChatKind::Voice,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            ChatPayload::Text(text) => Some(text),
            ChatPayload::Voice(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioResource> {
        match &self.payload {
            ChatPayload::Voice(audio) => Some(audio),
            ChatPayload::Text(_) => None,
        }
    }

    fn release_audio(&mut self) -> bool {
        match &mut self.payload {
            ChatPayload::Voice(audio) => audio.release(),
            ChatPayload::Text(_) => false,
        }
    }
}

pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send>;

pub struct Timeline {
    events: VecDeque<ChatEvent>,
    next_seq: u64,
    last_millis: i64,
    max_events: Option<usize>,
    clock: Clock,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("events", &self.events)
            .field("next_seq", &self.next_seq)
            .field("max_events", &self.max_events)
            .finish()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::with_clock(Box::new(Utc::now))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            events: VecDeque::new(),
            next_seq: 0,
            last_millis: i64::MIN,
            max_events: None,
            clock,
        }
    }

    /// Keep at most `max_events` entries, evicting the oldest first
    pub fn with_limit(mut self, max_events: Option<usize>) -> Self {
        self.max_events = max_events.filter(|max| *max > 0);
        self
    }

    /// Append an event and return its identifier.
    ///
    /// Identifiers strictly increase: the time component never goes
    /// backwards even if the clock does, and the sequence number breaks ties
    /// within a millisecond.
    pub fn append(&mut self, sender: impl Into<String>, payload: ChatPayload) -> EventId {
        let received_at = (self.clock)();
        let millis = received_at.timestamp_millis().max(self.last_millis);
        let id = EventId {
            millis,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.last_millis = millis;

        self.events.push_back(ChatEvent {
            id,
            sender: sender.into(),
            received_at,
            payload,
        });

        if let Some(max) = self.max_events {
            while self.events.len() > max {
                if let Some(mut evicted) = self.events.pop_front() {
                    evicted.release_audio();
                    debug!("Evicted timeline event {}", evicted.id);
                }
            }
        }

        id
    }

    /// Events in arrival order
    pub fn all(&self) -> impl Iterator<Item = &ChatEvent> {
        self.events.iter()
    }

    pub fn get(&self, id: EventId) -> Option<&ChatEvent> {
        self.events
            .binary_search_by_key(&id, |event| event.id)
            .ok()
            .and_then(|index| self.events.get(index))
    }

    pub fn last(&self) -> Option<&ChatEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events still holding a playable audio file
    pub fn live_audio_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.audio().is_some_and(|audio| !audio.is_released()))
            .count()
    }

    /// Release every audio resource and clear the log. Returns how many
    /// resources were released.
    pub fn release_all(&mut self) -> usize {
        let released = self
            .events
            .iter_mut()
            .map(ChatEvent::release_audio)
            .filter(|released| *released)
            .count();
        self.events.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn fixed_clock(millis: i64) -> Clock {
        Box::new(move || Utc.timestamp_millis_opt(millis).unwrap())
    }

    fn text(content: &str) -> ChatPayload {
        ChatPayload::Text(content.to_string())
    }

    #[test]
    fn test_same_millisecond_ids_are_distinct_and_increasing() {
        let mut timeline = Timeline::with_clock(fixed_clock(1_700_000_000_000));
        let first = timeline.append("bob", text("one"));
        let second = timeline.append("bob", text("two"));

        assert_ne!(first, second);
        assert!(first < second);
        assert_eq!(first.millis(), second.millis());
        assert_eq!(first.to_string(), "1700000000000-0");
        assert_eq!(second.to_string(), "1700000000000-1");
    }

    #[test]
    fn test_ids_increase_when_clock_goes_backwards() {
        let now = Arc::new(AtomicI64::new(5_000));
        let clock_now = Arc::clone(&now);
        let mut timeline = Timeline::with_clock(Box::new(move || {
            Utc.timestamp_millis_opt(clock_now.load(Ordering::SeqCst))
                .unwrap()
        }));

        let first = timeline.append("a", text("1"));
        now.store(4_000, Ordering::SeqCst);
        let second = timeline.append("b", text("2"));

        assert!(first < second);
        assert_eq!(second.millis(), 5_000);
    }

    #[test]
    fn test_all_preserves_arrival_order() {
        let mut timeline = Timeline::new();
        for (sender, content) in [("s1", "m1"), ("s2", "m2"), ("s3", "m3")] {
            timeline.append(sender, text(content));
        }

        let seen: Vec<(&str, &str)> = timeline
            .all()
            .map(|event| (event.sender.as_str(), event.text().unwrap()))
            .collect();
        assert_eq!(seen, vec![("s1", "m1"), ("s2", "m2"), ("s3", "m3")]);

        let ids: Vec<EventId> = timeline.all().map(|event| event.id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_get_by_id() {
        let mut timeline = Timeline::new();
        let first = timeline.append("bob", text("hello"));
        let second = timeline.append("carol", text("hey"));

        assert_eq!(timeline.get(first).unwrap().sender, "bob");
        assert_eq!(timeline.get(second).unwrap().text(), Some("hey"));
        assert_eq!(timeline.last().unwrap().id, second);
    }

    #[test]
    fn test_release_all_releases_audio_once() {
        let dir = tempdir().unwrap();
        let mut timeline = Timeline::new();
        timeline.append("bob", text("hello"));
        for _ in 0..3 {
            let audio = AudioResource::materialize(b"RIFF....", dir.path()).unwrap();
            timeline.append("Voice Message", ChatPayload::Voice(audio));
        }

        let paths: Vec<_> = timeline
            .all()
            .filter_map(|event| event.audio())
            .map(|audio| audio.path().unwrap().to_path_buf())
            .collect();
        assert_eq!(timeline.live_audio_count(), 3);

        assert_eq!(timeline.release_all(), 3);
        assert!(timeline.is_empty());
        assert!(paths.iter().all(|path| !path.exists()));

        assert_eq!(timeline.release_all(), 0);
    }

    #[test]
    fn test_limit_evicts_oldest_and_releases_audio() {
        let dir = tempdir().unwrap();
        let mut timeline = Timeline::new().with_limit(Some(2));

        let audio = AudioResource::materialize(b"RIFF....", dir.path()).unwrap();
        let evicted_path = audio.path().unwrap().to_path_buf();
        timeline.append("Voice Message", ChatPayload::Voice(audio));
        timeline.append("bob", text("two"));
        let third = timeline.append("bob", text("three"));

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.all().next().unwrap().text(), Some("two"));
        assert_eq!(timeline.last().unwrap().id, third);
        assert!(!evicted_path.exists());
    }

    #[test]
    fn test_kind() {
        let dir = tempdir().unwrap();
        let mut timeline = Timeline::new();
        let text_id = timeline.append("bob", text("hi"));
        let audio = AudioResource::materialize(&[0u8; 4], dir.path()).unwrap();
        let voice_id = timeline.append("Voice Message", ChatPayload::Voice(audio));

        assert_eq!(timeline.get(text_id).unwrap().kind(), ChatKind::Text);
        assert_eq!(timeline.get(voice_id).unwrap().kind(), ChatKind::Voice);
        assert_eq!(ChatKind::Voice.to_string(), "Voice");
    }
}
