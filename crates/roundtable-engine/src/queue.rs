//! In-memory mailbox for routing within one session.

use std::collections::HashMap;

use roundtable_core::Message;

/// Recipient-keyed FIFO mailbox.
///
/// Single consumer; the orchestrator both enqueues and drains, so there is
/// no internal locking. Recipients come back from `dequeue_all` in
/// first-enqueue order, which keeps delivery order deterministic across a
/// turn.
#[derive(Debug, Default)]
pub struct MessageQueue {
    pending: HashMap<String, Vec<Message>>,
    order: Vec<String>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for its `to` agent, creating the mailbox lazily.
    pub fn enqueue(&mut self, message: Message) {
        match self.pending.get_mut(&message.to) {
            Some(existing) => existing.push(message),
            None => {
                self.order.push(message.to.clone());
                self.pending.insert(message.to.clone(), vec![message]);
            }
        }
    }

    /// Remove and return everything pending for one agent.
    pub fn dequeue(&mut self, agent: &str) -> Vec<Message> {
        match self.pending.remove(agent) {
            Some(messages) => {
                self.order.retain(|name| name != agent);
                messages
            }
            None => Vec::new(),
        }
    }

    /// Drain the whole queue at once, grouped by recipient in first-enqueue
    /// order.
    pub fn dequeue_all(&mut self) -> Vec<(String, Vec<Message>)> {
        let order = std::mem::take(&mut self.order);
        let mut pending = std::mem::take(&mut self.pending);
        order
            .into_iter()
            .filter_map(|name| pending.remove(&name).map(|messages| (name, messages)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(|messages| messages.is_empty())
    }

    /// Total pending messages across all recipients.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Pending message count per recipient.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.pending
            .iter()
            .filter(|(_, messages)| !messages.is_empty())
            .map(|(agent, messages)| (agent.clone(), messages.len()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_core::SessionId;

    fn msg(to: &str, content: &str) -> Message {
        Message::new(SessionId::from_raw("test-session"), "security", to, content, 1)
    }

    #[test]
    fn starts_empty() {
        let queue = MessageQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn enqueues_and_dequeues() {
        let mut queue = MessageQueue::new();
        queue.enqueue(msg("perf", "test message"));

        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);

        let dequeued = queue.dequeue("perf");
        assert_eq!(dequeued.len(), 1);
        assert_eq!(dequeued[0].content, "test message");
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_for_agent_without_mail_is_empty() {
        let mut queue = MessageQueue::new();
        queue.enqueue(msg("perf", "hi"));
        assert!(queue.dequeue("quality").is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn groups_messages_by_recipient() {
        let mut queue = MessageQueue::new();
        queue.enqueue(msg("perf", "msg1"));
        queue.enqueue(msg("perf", "msg2"));
        queue.enqueue(msg("quality", "msg3"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue("perf").len(), 2);
        assert_eq!(queue.dequeue("quality").len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_all_returns_grouping_and_clears() {
        let mut queue = MessageQueue::new();
        queue.enqueue(msg("perf", "a"));
        queue.enqueue(msg("quality", "b"));

        let all = queue.dequeue_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].1.len(), 1);
        assert_eq!(all[1].1.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_all_keeps_first_enqueue_order() {
        let mut queue = MessageQueue::new();
        queue.enqueue(msg("perf", "1"));
        queue.enqueue(msg("quality", "2"));
        queue.enqueue(msg("perf", "3"));
        queue.enqueue(msg("arch", "4"));

        let recipients: Vec<String> = queue
            .dequeue_all()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(recipients, vec!["perf", "quality", "arch"]);
    }

    #[test]
    fn counts_per_recipient() {
        let mut queue = MessageQueue::new();
        queue.enqueue(msg("perf", "a"));
        queue.enqueue(msg("perf", "b"));
        queue.enqueue(msg("quality", "c"));

        let counts = queue.counts();
        assert_eq!(counts.get("perf"), Some(&2));
        assert_eq!(counts.get("quality"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn clear_removes_everything() {
        let mut queue = MessageQueue::new();
        queue.enqueue(msg("perf", "a"));
        queue.enqueue(msg("quality", "b"));

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.dequeue_all().is_empty());
    }

    #[test]
    fn preserves_message_order_within_recipient() {
        let mut queue = MessageQueue::new();
        queue.enqueue(msg("perf", "first"));
        queue.enqueue(msg("perf", "second"));
        queue.enqueue(msg("perf", "third"));

        let contents: Vec<String> = queue
            .dequeue("perf")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }
}
