//! FIFO buffer for commands issued while the transport is unavailable.

use std::collections::VecDeque;

use grid_schema::ClientEnvelope;

/// Ordered buffer of envelopes waiting for a live transport.
///
/// Envelopes leave head-first and only on a successful send; a refused send
/// keeps the refused envelope and everything behind it queued in the original
/// order. Repeated identical commands are kept as-is (the server treats
/// resends idempotently; nothing deduplicates here).
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<ClientEnvelope>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope behind everything already waiting.
    pub fn enqueue(&mut self, envelope: ClientEnvelope) {
        self.pending.push_back(envelope);
    }

    /// Put an envelope back at the head, ahead of everything waiting. Used
    /// when a live transmit fails after the envelope already left the queue.
    pub fn requeue_front(&mut self, envelope: ClientEnvelope) {
        self.pending.push_front(envelope);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Send queued envelopes head-first until the queue empties or `send`
    /// reports the transport is unavailable. Returns how many were sent.
    pub fn drain(&mut self, mut send: impl FnMut(&ClientEnvelope) -> bool) -> usize {
        let mut sent = 0;
        while let Some(envelope) = self.pending.front() {
            if !send(envelope) {
                break;
            }
            self.pending.pop_front();
            sent += 1;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_schema::{Command, GameId, LinkDirective, LinkId, PartyId, ResourceId, TradeRef};

    fn envelope(command: Command) -> ClientEnvelope {
        ClientEnvelope::new(command, GameId(3), PartyId(1))
    }

    fn acquire(id: u64) -> ClientEnvelope {
        envelope(Command::AcquireRequest {
            entity: TradeRef::Resource(ResourceId(id)),
        })
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(acquire(1));
        queue.enqueue(envelope(Command::SetLinkStateRequest {
            link: LinkId(9),
            state: LinkDirective::Open,
        }));
        queue.enqueue(envelope(Command::EndTurn));

        let mut kinds = Vec::new();
        let sent = queue.drain(|envelope| {
            kinds.push(envelope.command.kind());
            true
        });

        assert_eq!(sent, 3);
        assert!(queue.is_empty());
        assert_eq!(
            kinds,
            vec!["acquire_request", "set_link_state_request", "end_turn"]
        );
    }

    #[test]
    fn refused_send_keeps_tail_in_order() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(acquire(1));
        queue.enqueue(acquire(2));
        queue.enqueue(acquire(3));

        // First send succeeds, second is refused; the refused envelope and
        // everything behind it must survive in order.
        let mut calls = 0;
        let sent = queue.drain(|_| {
            calls += 1;
            calls == 1
        });
        assert_eq!(sent, 1);
        assert_eq!(queue.len(), 2);

        let mut remaining = Vec::new();
        queue.drain(|envelope| {
            remaining.push(envelope.clone());
            true
        });
        assert_eq!(remaining, vec![acquire(2), acquire(3)]);
    }

    #[test]
    fn duplicate_commands_are_preserved() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(envelope(Command::EndTurn));
        queue.enqueue(envelope(Command::EndTurn));
        assert_eq!(queue.len(), 2);

        let sent = queue.drain(|_| true);
        assert_eq!(sent, 2);
    }

    #[test]
    fn requeue_front_takes_the_head_slot() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(acquire(2));
        queue.requeue_front(acquire(1));

        let mut order = Vec::new();
        queue.drain(|envelope| {
            order.push(envelope.clone());
            true
        });
        assert_eq!(order, vec![acquire(1), acquire(2)]);
    }

    #[test]
    fn drain_on_empty_queue_is_a_noop() {
        let mut queue = OutboundQueue::new();
        let sent = queue.drain(|_| panic!("send must not run on an empty queue"));
        assert_eq!(sent, 0);
    }
}
