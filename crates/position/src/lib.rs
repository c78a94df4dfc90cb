//! Position lifecycle: one OPEN slot per book, closed history, and the last
//! exit time that drives strategy cooldowns.
//!
//! A book covers a single (wallet, instrument) pair. The only transitions are
//! `open` (legal while the slot is empty) and `close` (legal while it is full).

use chrono::{DateTime, Utc};

use common::{ExitReason, Position, PositionExit};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("position {id} on {instrument} is already open")]
    AlreadyOpen { id: i64, instrument: String },
    #[error("no open position to close")]
    NotOpen,
}

impl From<LifecycleError> for common::Error {
    fn from(e: LifecycleError) -> Self {
        common::Error::InvariantViolation(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PositionBook {
    next_id: i64,
    current: Option<Position>,
    closed: Vec<Position>,
    last_exit_time: Option<DateTime<Utc>>,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            current: None,
            closed: Vec::new(),
            last_exit_time: None,
        }
    }

    /// Open a position under the next locally allocated id.
    pub fn open(
        &mut self,
        instrument: &str,
        price: f64,
        time: DateTime<Utc>,
        size: f64,
    ) -> Result<&Position, LifecycleError> {
        let id = self.next_id;
        self.open_with_id(id, instrument, price, time, size, None)
    }

    /// Open a position whose id was assigned elsewhere (the store, in live mode).
    pub fn open_with_id(
        &mut self,
        id: i64,
        instrument: &str,
        price: f64,
        time: DateTime<Utc>,
        size: f64,
        open_receipt: Option<String>,
    ) -> Result<&Position, LifecycleError> {
        if let Some(open) = &self.current {
            return Err(LifecycleError::AlreadyOpen {
                id: open.id,
                instrument: open.instrument.clone(),
            });
        }
        self.next_id = self.next_id.max(id + 1);
        let opened = self.current.insert(Position {
            id,
            instrument: instrument.to_string(),
            entry_price: price,
            entry_time: time,
            size,
            open_receipt,
            exit: None,
        });
        Ok(&*opened)
    }

    /// Close the open position, move it to history and start the cooldown clock.
    pub fn close(
        &mut self,
        price: f64,
        time: DateTime<Utc>,
        reason: ExitReason,
        receipt: Option<String>,
    ) -> Result<&Position, LifecycleError> {
        let mut position = self.current.take().ok_or(LifecycleError::NotOpen)?;
        position.exit = Some(PositionExit {
            price,
            time,
            reason,
            pnl: position.pnl_at(price),
            receipt,
        });
        self.last_exit_time = Some(time);
        self.closed.push(position);
        Ok(&self.closed[self.closed.len() - 1])
    }

    /// Re-sync the open slot with what storage reports. Returns `true` when the
    /// slot changed.
    ///
    /// Storage is authoritative in the live loop: a position that disappeared
    /// from storage is dropped without being added to history, since its exit
    /// fields are unknown here.
    pub fn reconcile(&mut self, stored: Option<Position>) -> bool {
        let stored = stored.filter(Position::is_open);
        if self.current == stored {
            return false;
        }
        if let Some(p) = &stored {
            self.next_id = self.next_id.max(p.id + 1);
        }
        self.current = stored;
        true
    }

    pub fn current(&self) -> Option<&Position> {
        self.current.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn closed(&self) -> &[Position] {
        &self.closed
    }

    pub fn into_closed(self) -> Vec<Position> {
        self.closed
    }

    pub fn last_exit_time(&self) -> Option<DateTime<Utc>> {
        self.last_exit_time
    }

    /// Sum of realized P&L over closed positions.
    pub fn realized_pnl(&self) -> f64 {
        self.closed.iter().filter_map(Position::pnl).sum()
    }

    /// Unrealized P&L of the open position at `price`, zero when flat.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.current.as_ref().map_or(0.0, |p| p.pnl_at(price))
    }
}
