use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;

use securechat_protocol::types::{KeyEpoch, MessageSeq, PairKey, PrincipalName, StoredEnvelope};

/// One encrypted message at rest.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub seq: MessageSeq,
    pub sender: PrincipalName,
    pub recipient: PrincipalName,
    pub envelope: StoredEnvelope,
    /// Epoch of the key the envelope was sealed under.
    pub key_epoch: KeyEpoch,
    pub timestamp: SystemTime,
}

/// Conversations keyed by canonical pair, each kept in arrival order.
#[derive(Default)]
pub struct MessageStore {
    conversations: DashMap<PairKey, Vec<StoredMessage>>,
    next_seq: AtomicU64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sealed envelope, returning its sequence number and arrival time.
    pub fn append(
        &self,
        sender: &str,
        recipient: &str,
        envelope: StoredEnvelope,
        key_epoch: KeyEpoch,
    ) -> (MessageSeq, SystemTime) {
        let mut conversation = self
            .conversations
            .entry(PairKey::new(sender, recipient))
            .or_default();
        // Allocated under the entry lock so each conversation stays sorted by seq.
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let timestamp = SystemTime::now();
        conversation.push(StoredMessage {
            seq,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            envelope,
            key_epoch,
            timestamp,
        });
        (seq, timestamp)
    }

    /// Both directions of the conversation in arrival order, starting after
    /// the `after` cursor when one is given.
    pub fn conversation(&self, a: &str, b: &str, after: Option<MessageSeq>) -> Vec<StoredMessage> {
        let Some(messages) = self.conversations.get(&PairKey::new(a, b)) else {
            return Vec::new();
        };
        let start = after.map_or(0, |after| messages.partition_point(|m| m.seq <= after));
        messages[start..].to_vec()
    }

    /// Delete the pair's messages sealed under epochs older than
    /// `current_epoch`, returning how many were dropped.
    pub fn purge_pair(&self, a: &str, b: &str, current_epoch: KeyEpoch) -> usize {
        let pair = PairKey::new(a, b);
        let Some(mut messages) = self.conversations.get_mut(&pair) else {
            return 0;
        };
        let before = messages.len();
        messages.retain(|m| m.key_epoch >= current_epoch);
        let purged = before - messages.len();
        let now_empty = messages.is_empty();
        drop(messages);
        if now_empty {
            self.conversations.remove_if(&pair, |_, m| m.is_empty());
        }
        purged
    }

    pub fn count(&self, a: &str, b: &str) -> usize {
        self.conversations
            .get(&PairKey::new(a, b))
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use securechat_protocol::types::EnvelopeEncoding;

    use super::*;

    fn envelope() -> StoredEnvelope {
        StoredEnvelope::encode(&[0u8; 32], EnvelopeEncoding::Raw)
    }

    fn append(store: &MessageStore, from: &str, to: &str) -> MessageSeq {
        sealed(store, from, to, 1)
    }

    fn sealed(store: &MessageStore, from: &str, to: &str, key_epoch: KeyEpoch) -> MessageSeq {
        store.append(from, to, envelope(), key_epoch).0
    }

    #[test]
    fn both_directions_share_a_conversation() {
        let store = MessageStore::new();
        append(&store, "alice", "bob");
        append(&store, "bob", "alice");
        append(&store, "alice", "carol");

        let convo = store.conversation("bob", "alice", None);
        assert_eq!(convo.len(), 2);
        assert_eq!(convo[0].sender, "alice");
        assert_eq!(convo[1].sender, "bob");
        assert_eq!(store.count("alice", "carol"), 1);
    }

    #[test]
    fn conversation_is_in_arrival_order() {
        let store = MessageStore::new();
        let first = append(&store, "alice", "bob");
        let second = append(&store, "bob", "alice");
        let third = append(&store, "alice", "bob");
        assert!(first < second && second < third);

        let seqs: Vec<_> = store
            .conversation("alice", "bob", None)
            .iter()
            .map(|m| m.seq)
            .collect();
        assert_eq!(seqs, vec![first, second, third]);
    }

    #[test]
    fn cursor_skips_seen_messages() {
        let store = MessageStore::new();
        let first = append(&store, "alice", "bob");
        append(&store, "alice", "carol");
        let second = append(&store, "bob", "alice");

        let rest = store.conversation("alice", "bob", Some(first));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].seq, second);
        assert!(store.conversation("alice", "bob", Some(second)).is_empty());
        assert!(store.conversation("alice", "dave", Some(0)).is_empty());
    }

    #[test]
    fn purge_only_touches_the_pair() {
        let store = MessageStore::new();
        append(&store, "alice", "bob");
        append(&store, "bob", "alice");
        append(&store, "alice", "carol");

        assert_eq!(store.purge_pair("bob", "alice", 2), 2);
        assert!(store.conversation("alice", "bob", None).is_empty());
        assert_eq!(store.count("alice", "carol"), 1);
        assert_eq!(store.purge_pair("alice", "bob", 2), 0);
    }

    #[test]
    fn purge_keeps_messages_under_the_current_key() {
        let store = MessageStore::new();
        sealed(&store, "alice", "bob", 1);
        let kept = sealed(&store, "bob", "alice", 3);
        assert_eq!(store.purge_pair("alice", "bob", 3), 1);
        let convo = store.conversation("alice", "bob", None);
        assert_eq!(convo.len(), 1);
        assert_eq!(convo[0].key_epoch, 3);
        assert_eq!(convo[0].seq, kept);
    }
}
