//! Snapshot-plus-stream reconciliation for one connection.
//!
//! Bootstrap protocol:
//! 1. Subscribe to the full channel and buffer every sequenced event
//! 2. Fetch a level 3 snapshot concurrently
//! 3. Seed a fresh book from the snapshot
//! 4. Sort the buffer, drop events with `sequence <= snapshot.sequence`,
//!    apply the rest in order
//! 5. Apply live events directly, checking contiguity against the last
//!    applied sequence
//!
//! A session never outlives its connection. Reconnecting starts a new
//! session from an empty book.

use std::collections::HashSet;
use std::mem;

use connector_core::{ConnectorError, SessionPolicy};
use model::{BookSnapshot, EventKind, FeedEvent, OrderId, Side};
use orderbook::{Book, OrderBookError, SharedBook};

/// Something the feed did that a consistent book would not explain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Event sequence was not `last + 1`. Covers regressions too.
    SequenceGap { expected: u64, actual: u64 },
    /// A mutation the book rejected.
    Divergence(OrderBookError),
    /// `done` for an order that is neither resting nor pending. Never fatal.
    UnknownDone(OrderId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventStatus {
    /// Held until the snapshot arrives.
    #[default]
    Buffered,
    /// Consumed; `last_applied_sequence` now equals its sequence.
    Applied,
    /// Already reflected in the snapshot.
    Stale,
    /// Out of order and not applied.
    Rejected,
}

/// What happened to one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub status: EventStatus,
    pub trade_recorded: bool,
    pub anomalies: Vec<Anomaly>,
}

impl EventOutcome {
    fn with_status(status: EventStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub snapshot_sequence: u64,
    pub seeded_orders: usize,
    /// Buffered events already reflected in the snapshot.
    pub discarded: usize,
    pub replayed: usize,
    pub trades_recorded: usize,
    pub anomalies: Vec<Anomaly>,
}

/// Running totals for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub applied: u64,
    pub discarded: u64,
    pub sequence_gaps: u64,
    pub divergences: u64,
    pub unknown_done: u64,
    pub trades: u64,
}

#[derive(Debug)]
enum Phase {
    Buffering { events: Vec<FeedEvent> },
    Live,
}

pub struct ReconciliationSession {
    book: SharedBook,
    policy: SessionPolicy,
    buffer_capacity: usize,
    phase: Phase,
    snapshot_sequence: Option<u64>,
    last_applied_sequence: Option<u64>,
    /// Orders received but not yet open. A `change` for one of these does
    /// not touch the book.
    pending: HashSet<OrderId>,
    stats: SessionStats,
}

impl ReconciliationSession {
    /// Starts a session in the buffering phase.
    ///
    /// The shared book is cleared immediately: nothing from a previous
    /// session is valid for this one.
    pub fn new(book: SharedBook, policy: SessionPolicy, buffer_capacity: usize) -> Self {
        *book.write() = Book::new();
        Self {
            book,
            policy,
            buffer_capacity,
            phase: Phase::Buffering { events: Vec::new() },
            snapshot_sequence: None,
            last_applied_sequence: None,
            pending: HashSet::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Live)
    }

    pub fn buffered_len(&self) -> usize {
        match &self.phase {
            Phase::Buffering { events } => events.len(),
            Phase::Live => 0,
        }
    }

    pub fn snapshot_sequence(&self) -> Option<u64> {
        self.snapshot_sequence
    }

    pub fn last_applied_sequence(&self) -> Option<u64> {
        self.last_applied_sequence
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Feeds one decoded event into the session.
    ///
    /// Buffers while the snapshot is outstanding, applies once live.
    /// An `Err` ends the session.
    pub fn on_event(&mut self, event: FeedEvent) -> Result<EventOutcome, ConnectorError> {
        match &mut self.phase {
            Phase::Buffering { events } => {
                if events.len() >= self.buffer_capacity {
                    tracing::warn!(
                        capacity = self.buffer_capacity,
                        sequence = event.sequence,
                        "Event buffer full before snapshot arrived"
                    );
                    return Err(ConnectorError::BufferOverflow {
                        capacity: self.buffer_capacity,
                    });
                }
                events.push(event);
                Ok(EventOutcome::with_status(EventStatus::Buffered))
            }
            Phase::Live => {
                let book = SharedBook::clone(&self.book);
                let mut guard = book.write();
                self.apply(&mut guard, event)
            }
        }
    }

    /// Seeds the book from `snapshot` and replays the buffer.
    ///
    /// The new book is built aside and swapped in under one write lock, so
    /// readers see either the empty book or the reconciled one.
    pub fn bootstrap(&mut self, snapshot: BookSnapshot) -> Result<BootstrapReport, ConnectorError> {
        let mut buffered = match mem::replace(&mut self.phase, Phase::Live) {
            Phase::Buffering { events } => events,
            Phase::Live => {
                tracing::warn!("Snapshot delivered to a session that is already live");
                return Err(ConnectorError::Feed(
                    "snapshot delivered twice in one session".to_string(),
                ));
            }
        };

        let mut report = BootstrapReport {
            snapshot_sequence: snapshot.sequence,
            ..BootstrapReport::default()
        };
        self.snapshot_sequence = Some(snapshot.sequence);

        let mut book = Book::new();
        for (side, orders) in [(Side::Buy, snapshot.bids), (Side::Sell, snapshot.asks)] {
            for order in orders {
                match book.side_mut(side).insert(order.order_id, order.size, order.price) {
                    Ok(()) => report.seeded_orders += 1,
                    Err(err) => {
                        let mut outcome = EventOutcome::default();
                        self.divergence(err, snapshot.sequence, &mut outcome)?;
                        report.anomalies.append(&mut outcome.anomalies);
                    }
                }
            }
        }

        buffered.sort_by_key(|e| e.sequence);
        for event in buffered {
            let mut outcome = self.apply(&mut book, event)?;
            match outcome.status {
                EventStatus::Applied => report.replayed += 1,
                EventStatus::Stale => report.discarded += 1,
                EventStatus::Buffered | EventStatus::Rejected => {}
            }
            if outcome.trade_recorded {
                report.trades_recorded += 1;
            }
            report.anomalies.append(&mut outcome.anomalies);
        }

        *self.book.write() = book;

        tracing::info!(
            snapshot_sequence = report.snapshot_sequence,
            seeded = report.seeded_orders,
            replayed = report.replayed,
            discarded = report.discarded,
            anomalies = report.anomalies.len(),
            "Book synchronized"
        );

        Ok(report)
    }

    /// Sequence the next event must carry, once anything is anchored.
    fn expected_next(&self) -> Option<u64> {
        self.last_applied_sequence
            .or(self.snapshot_sequence)
            .map(|s| s + 1)
    }

    fn apply(&mut self, book: &mut Book, event: FeedEvent) -> Result<EventOutcome, ConnectorError> {
        let seq = event.sequence;

        if self.last_applied_sequence.is_none() {
            if let Some(anchor) = self.snapshot_sequence {
                if seq <= anchor {
                    self.stats.discarded += 1;
                    // The snapshot holds open orders only. Orders received
                    // before it but not yet open stay pending.
                    match &event.kind {
                        EventKind::Received { order_id, .. } => {
                            self.pending.insert(order_id.clone());
                        }
                        EventKind::Open { order_id, .. } | EventKind::Done { order_id, .. } => {
                            self.pending.remove(order_id);
                        }
                        _ => {}
                    }
                    return Ok(EventOutcome::with_status(EventStatus::Stale));
                }
            }
        }

        let mut outcome = EventOutcome::with_status(EventStatus::Applied);

        if let Some(expected) = self.expected_next() {
            if seq != expected {
                self.stats.sequence_gaps += 1;
                tracing::warn!(
                    expected,
                    actual = seq,
                    regression = seq < expected,
                    "Sequence gap"
                );
                if self.policy.abort_on_gap {
                    return Err(ConnectorError::SequenceGap {
                        expected,
                        actual: seq,
                    });
                }
                let anomaly = Anomaly::SequenceGap {
                    expected,
                    actual: seq,
                };
                if seq < expected {
                    return Ok(EventOutcome {
                        status: EventStatus::Rejected,
                        trade_recorded: false,
                        anomalies: vec![anomaly],
                    });
                }
                outcome.anomalies.push(anomaly);
            }
        }

        self.last_applied_sequence = Some(seq);
        self.stats.applied += 1;

        match event.kind {
            EventKind::Received { order_id, .. } => {
                self.pending.insert(order_id);
            }
            EventKind::Open {
                side,
                order_id,
                price,
                remaining_size,
            } => {
                self.pending.remove(&order_id);
                if let Err(err) = book.side_mut(side).insert(order_id, remaining_size, price) {
                    self.divergence(err, seq, &mut outcome)?;
                }
            }
            EventKind::Match {
                side,
                maker_order_id,
                price,
                size,
                ..
            } => {
                if let Err(err) = book.side_mut(side).reduce(&maker_order_id, size) {
                    self.divergence(err, seq, &mut outcome)?;
                }
                // `side` is the maker's; the trade is tagged with the aggressor.
                book.record_trade(event.time, side.opposite(), size, price);
                outcome.trade_recorded = true;
                self.stats.trades += 1;
            }
            EventKind::Done {
                side,
                order_id,
                reason,
                ..
            } => {
                let was_pending = self.pending.remove(&order_id);
                if book.side_mut(side).remove(&order_id).is_err() {
                    if was_pending {
                        // Filled or canceled before it ever rested.
                        tracing::debug!(
                            sequence = seq,
                            order_id = %order_id,
                            reason = %reason,
                            "Done for order that never opened"
                        );
                        return Ok(outcome);
                    }
                    self.stats.unknown_done += 1;
                    tracing::debug!(
                        sequence = seq,
                        order_id = %order_id,
                        reason = %reason,
                        "Done for order not on book"
                    );
                    outcome.anomalies.push(Anomaly::UnknownDone(order_id));
                }
            }
            EventKind::Change {
                side,
                order_id,
                new_size,
                ..
            } => {
                if !self.pending.contains(&order_id) {
                    if let Err(err) = book.side_mut(side).set_size(&order_id, new_size) {
                        self.divergence(err, seq, &mut outcome)?;
                    }
                }
            }
            EventKind::Unknown(kind) => {
                tracing::debug!(sequence = seq, kind = %kind, "Unrecognized event kind");
            }
        }

        Ok(outcome)
    }

    fn divergence(
        &mut self,
        err: OrderBookError,
        sequence: u64,
        outcome: &mut EventOutcome,
    ) -> Result<(), ConnectorError> {
        self.stats.divergences += 1;
        tracing::warn!(sequence, error = %err, "Book divergence");
        if self.policy.abort_on_divergence {
            return Err(ConnectorError::Book(err));
        }
        outcome.anomalies.push(Anomaly::Divergence(err));
        Ok(())
    }
}
