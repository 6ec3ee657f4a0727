//! Time-based content freshness.

use crate::error::TileError;
use crate::header::ExpireHeader;
use crate::time::Timestamp;

/// When a tile's content goes stale.
///
/// With a `duration`, every time fresh content becomes ready the expiration
/// date rolls forward to `now + duration`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Expiration {
    pub duration: Option<f64>,
    pub date: Option<Timestamp>,
}

impl Expiration {
    pub fn from_header(header: Option<&ExpireHeader>) -> Result<Self, TileError> {
        let Some(header) = header else {
            return Ok(Self::default());
        };
        let date = header
            .date
            .as_deref()
            .map(Timestamp::parse_iso8601)
            .transpose()?;
        Ok(Self {
            duration: header.duration,
            date,
        })
    }

    /// Whether the content has any expiration contract.
    pub fn is_set(&self) -> bool {
        self.duration.is_some() || self.date.is_some()
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.date.is_some_and(|date| date < now)
    }

    /// Roll the date forward after fresh content became ready.
    ///
    /// Never moves an existing date backwards.
    pub fn refresh(&mut self, now: Timestamp) {
        let Some(duration) = self.duration else {
            return;
        };
        let candidate = now.add_seconds(duration);
        self.date = match self.date {
            Some(existing) if existing > candidate => Some(existing),
            _ => Some(candidate),
        };
    }

    /// Drop the date so the next [`refresh`](Self::refresh) recomputes it.
    pub fn clear_date(&mut self) {
        self.date = None;
    }
}
