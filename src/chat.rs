//! Outbound chat with priorities and vanilla spam-counter mirroring.
//!
//! The vanilla server adds 20 to a per-client counter for every chat message and decays it by 20
//! per game tick, kicking at 200. This dispatcher mirrors that bookkeeping from the inbound time
//! updates and refuses to send while `counter + 20 >= 180`, a safety margin below the kick.

use crate::connection::PacketSender;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The vanilla kick threshold is 200; staying below 180 keeps a 10% margin.
const SPAM_SAFETY_LIMIT: i32 = 180;
const SPAM_COST_PER_CHAT: i32 = 20;

/// Outbound chat priority. Lower values drain first; ties drain in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChatPriority {
    High = 0,
    Normal = 1,
    Low = 2,
}

#[derive(Debug, PartialEq, Eq)]
struct Message {
    priority: ChatPriority,
    seq: u64,
    text: String,
}

// BinaryHeap is a max-heap, so the ordering is inverted to pop the lowest (priority, seq) first.
impl Ord for Message {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The outbound chat queue. One background task drains it while the connection is alive.
pub struct ChatDispatcher {
    queue: Mutex<BinaryHeap<Message>>,
    seq: AtomicU64,
    spam_counter: AtomicI32,
    spam_protect: AtomicBool,
    running: AtomicBool,
}

impl ChatDispatcher {
    pub fn new(spam_protect: bool) -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            spam_counter: AtomicI32::new(0),
            spam_protect: AtomicBool::new(spam_protect),
            running: AtomicBool::new(false),
        }
    }

    pub fn set_spam_protect(&self, enabled: bool) {
        self.spam_protect.store(enabled, Ordering::Relaxed);
    }

    /// Queues a chat line. Multi-line text should be split by the caller.
    pub fn enqueue(&self, text: &str, priority: ChatPriority) {
        debug!(text, ?priority, "queued chat message");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.queue
            .lock()
            .expect("chat queue poisoned")
            .push(Message {
                priority,
                seq,
                text: text.to_string(),
            });
    }

    /// Decays the mirrored spam counter by one game tick.
    pub fn on_time_update(&self) {
        self.spam_counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |counter| {
                Some((counter - SPAM_COST_PER_CHAT).max(0))
            })
            .ok();
    }

    /// Whether another chat can be sent without risking the vanilla spam kick.
    pub fn can_chat(&self) -> bool {
        !self.spam_protect.load(Ordering::Relaxed)
            || self.spam_counter.load(Ordering::Relaxed) + SPAM_COST_PER_CHAT < SPAM_SAFETY_LIMIT
    }

    pub fn spam_counter(&self) -> i32 {
        self.spam_counter.load(Ordering::Relaxed)
    }

    fn pop(&self) -> Option<Message> {
        self.queue.lock().expect("chat queue poisoned").pop()
    }

    fn push_back(&self, message: Message) {
        self.queue.lock().expect("chat queue poisoned").push(message);
    }

    pub fn clear(&self) {
        self.queue.lock().expect("chat queue poisoned").clear();
    }

    async fn send(&self, sender: &PacketSender, message: Message) {
        match sender.send_chat(&message.text).await {
            Ok(()) => {
                self.spam_counter
                    .fetch_add(SPAM_COST_PER_CHAT, Ordering::Relaxed);
                debug!(text = message.text.as_str(), "sent chat message");
            }
            Err(err) => warn!(cause = err.to_string(), "failed to send chat message"),
        }
    }

    /// Synchronously drains every queued message with priority at or below the cap.
    ///
    /// Used on disconnect to deliver the farewell regardless of the drain task.
    pub async fn flush(&self, sender: &PacketSender, cap: ChatPriority) {
        while let Some(message) = self.pop() {
            if message.priority > cap {
                self.push_back(message);
                break;
            }
            self.send(sender, message).await;
        }
    }

    /// Stops the drain loop and discards everything still queued.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.clear();
    }

    /// Drains the queue until [`stop`](Self::stop) is called.
    ///
    /// Runs as its own task; sends are gated by the spam counter.
    pub async fn run(&self, sender: PacketSender) {
        info!("chat dispatcher started");
        self.running.store(true, Ordering::Relaxed);
        while self.running.load(Ordering::Relaxed) {
            if self.can_chat() {
                if let Some(message) = self.pop() {
                    self.send(&sender, message).await;
                    continue;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!("chat dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_then_insertion_order() {
        let dispatcher = ChatDispatcher::new(true);
        dispatcher.enqueue("third", ChatPriority::Low);
        dispatcher.enqueue("first", ChatPriority::High);
        dispatcher.enqueue("second a", ChatPriority::Normal);
        dispatcher.enqueue("second b", ChatPriority::Normal);

        let order: Vec<String> = std::iter::from_fn(|| dispatcher.pop())
            .map(|message| message.text)
            .collect();
        assert_eq!(order, ["first", "second a", "second b", "third"]);
    }

    #[test]
    fn spam_counter_gates_sending() {
        let dispatcher = ChatDispatcher::new(true);
        assert!(dispatcher.can_chat());

        // eight sends put the counter at 160: one more would reach the safety limit
        dispatcher.spam_counter.store(160, Ordering::Relaxed);
        assert!(!dispatcher.can_chat());

        dispatcher.on_time_update();
        assert_eq!(dispatcher.spam_counter(), 140);
        assert!(dispatcher.can_chat());
    }

    #[test]
    fn spam_counter_floors_at_zero() {
        let dispatcher = ChatDispatcher::new(true);
        dispatcher.on_time_update();
        dispatcher.on_time_update();
        assert_eq!(dispatcher.spam_counter(), 0);
    }

    #[test]
    fn disabled_protection_always_allows_chat() {
        let dispatcher = ChatDispatcher::new(false);
        dispatcher.spam_counter.store(1000, Ordering::Relaxed);
        assert!(dispatcher.can_chat());
    }

    #[tokio::test]
    async fn flush_respects_priority_cap() {
        use crate::connection::PacketSender;
        use chronicle_packets::frame;

        let (client, mut server) = tokio::io::duplex(4096);
        let sender = test_sender(client);

        let dispatcher = ChatDispatcher::new(true);
        dispatcher.enqueue("farewell", ChatPriority::High);
        dispatcher.enqueue("idle chatter", ChatPriority::Low);

        dispatcher.flush(&sender, ChatPriority::High).await;

        let frame = frame::read_frame(&mut server, None).await.expect("read failed");
        assert_eq!(frame.id, 0x03);

        // the low-priority message must still be queued
        let remaining = dispatcher.pop().expect("queue empty");
        assert_eq!(remaining.text, "idle chatter");

        fn test_sender(stream: tokio::io::DuplexStream) -> PacketSender {
            PacketSender::new(Box::new(stream), None, 754)
        }
    }
}
