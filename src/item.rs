// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Catalog items and their capacity counters.
//!
//! An item is a pool of interchangeable units: the copies of a book or the
//! seats of an event. The counter state lives behind a per-item mutex so the
//! ledger can apply claim, release, capacity and retire transitions as one
//! unit per item.
//!
//! ```text
//!  available ──claim──► available - 1, reservation outstanding
//!      ▲                        │
//!      └────────release─────────┘
//! ```

use crate::base::{ItemId, ReservationId, UserId};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether one user may hold several units of the same item at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    /// Library copies: a user may borrow several.
    #[default]
    Unlimited,
    /// Event seats: at most one outstanding booking per user.
    OnePerUser,
}

/// Descriptive metadata of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub title: String,
    /// Book author or event organizer. May be empty.
    pub author: String,
    /// Free-form text, e.g. an event's description and time slot.
    pub description: String,
}

impl ItemDetails {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Trims surrounding whitespace from every field.
    pub(crate) fn normalized(self) -> Self {
        Self {
            title: self.title.trim().to_string(),
            author: self.author.trim().to_string(),
            description: self.description.trim().to_string(),
        }
    }
}

/// Point-in-time view of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub title: String,
    pub author: String,
    pub description: String,
    pub total_capacity: u32,
    pub available: u32,
    pub outstanding: u32,
    pub policy: ClaimPolicy,
}

#[derive(Debug)]
pub(crate) struct ItemData {
    details: ItemDetails,
    total_capacity: u32,
    available: u32,
    policy: ClaimPolicy,
    /// Set once the item is deleted; a retired item accepts no transitions.
    retired: bool,
    /// Outstanding reservations and their holders.
    outstanding: HashMap<ReservationId, UserId>,
}

impl ItemData {
    fn new(details: ItemDetails, total_capacity: u32, policy: ClaimPolicy) -> Self {
        Self {
            details,
            total_capacity,
            available: total_capacity,
            policy,
            retired: false,
            outstanding: HashMap::new(),
        }
    }

    /// Units not covered by an outstanding reservation.
    fn headroom(&self) -> u32 {
        let outstanding = u32::try_from(self.outstanding.len()).unwrap_or(u32::MAX);
        self.total_capacity.saturating_sub(outstanding)
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.available <= self.total_capacity,
            "Invariant violated: available {} exceeds total {}",
            self.available,
            self.total_capacity
        );
        debug_assert_eq!(
            self.available,
            self.headroom(),
            "Invariant violated: available out of step with outstanding reservations"
        );
    }

    fn ensure_active(&self) -> Result<(), LedgerError> {
        if self.retired {
            return Err(LedgerError::NotFound("item"));
        }
        Ok(())
    }

    /// Takes one unit for `user`.
    ///
    /// `open` is called only after every check has passed and must record
    /// the reservation; its id is then tracked as outstanding. If `open`
    /// fails the counters are left untouched.
    pub(crate) fn claim<R, F>(&mut self, user: UserId, open: F) -> Result<R, LedgerError>
    where
        F: FnOnce() -> Result<(ReservationId, R), LedgerError>,
    {
        self.ensure_active()?;
        if self.policy == ClaimPolicy::OnePerUser
            && self.outstanding.values().any(|holder| *holder == user)
        {
            return Err(LedgerError::AlreadyHeld);
        }
        if self.available == 0 {
            return Err(LedgerError::Exhausted);
        }

        let (reservation_id, opened) = open()?;
        self.available -= 1;
        self.outstanding.insert(reservation_id, user);
        self.assert_invariants();
        Ok(opened)
    }

    /// Returns the unit held by `reservation_id`, never above total capacity.
    pub(crate) fn release(&mut self, reservation_id: ReservationId) {
        let held = self.outstanding.remove(&reservation_id);
        debug_assert!(
            held.is_some(),
            "released reservation {reservation_id} was not outstanding"
        );
        // While capacity sits below the outstanding count the headroom stays 0.
        self.available = self.available.saturating_add(1).min(self.headroom());
        self.assert_invariants();
    }

    /// Sets a new total, shifting `available` by the same delta.
    pub(crate) fn adjust_capacity(&mut self, new_total: u32) -> Result<(), LedgerError> {
        self.ensure_active()?;
        let delta = i64::from(new_total) - i64::from(self.total_capacity);
        let shifted = (i64::from(self.available) + delta).clamp(0, i64::from(new_total));
        self.total_capacity = new_total;
        self.available = u32::try_from(shifted)
            .unwrap_or(new_total)
            .min(self.headroom());
        self.assert_invariants();
        Ok(())
    }

    pub(crate) fn update_details(&mut self, details: ItemDetails) -> Result<(), LedgerError> {
        self.ensure_active()?;
        self.details = details;
        Ok(())
    }

    pub(crate) fn details(&self) -> &ItemDetails {
        &self.details
    }

    /// Marks the item deleted. Fails while any reservation is outstanding.
    pub(crate) fn retire(&mut self) -> Result<(), LedgerError> {
        self.ensure_active()?;
        if !self.outstanding.is_empty() {
            return Err(LedgerError::Conflict);
        }
        self.retired = true;
        Ok(())
    }
}

/// A catalog item guarded by its own lock.
#[derive(Debug)]
pub(crate) struct Item {
    id: ItemId,
    inner: Mutex<ItemData>,
}

impl Item {
    pub(crate) fn new(
        id: ItemId,
        details: ItemDetails,
        total_capacity: u32,
        policy: ClaimPolicy,
    ) -> Self {
        Self {
            id,
            inner: Mutex::new(ItemData::new(details, total_capacity, policy)),
        }
    }

    /// Acquires the item lock under the configured contention policy.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Busy`] when every attempt times out.
    pub(crate) fn lock(&self, config: &LedgerConfig) -> Result<MutexGuard<'_, ItemData>, LedgerError> {
        let timeout = config.lock_timeout();
        for attempt in 1..=config.attempts() {
            if let Some(guard) = self.inner.try_lock_for(timeout) {
                return Ok(guard);
            }
            tracing::warn!(item = %self.id, attempt, "item lock contended");
        }
        Err(LedgerError::Busy)
    }

    /// Blocks until the lock is free. Reads ignore the contention policy and
    /// never fail with `Busy`.
    pub(crate) fn snapshot(&self) -> ItemSnapshot {
        Self::snapshot_of(self.id, &self.inner.lock())
    }

    pub(crate) fn snapshot_of(id: ItemId, data: &ItemData) -> ItemSnapshot {
        ItemSnapshot {
            id,
            title: data.details.title.clone(),
            author: data.details.author.clone(),
            description: data.details.description.clone(),
            total_capacity: data.total_capacity,
            available: data.available,
            outstanding: u32::try_from(data.outstanding.len()).unwrap_or(u32::MAX),
            policy: data.policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(total: u32) -> ItemData {
        ItemData::new(ItemDetails::new("Dune", "Frank Herbert"), total, ClaimPolicy::Unlimited)
    }

    fn open(id: u32) -> impl FnOnce() -> Result<(ReservationId, ReservationId), LedgerError> {
        move || Ok((ReservationId(id), ReservationId(id)))
    }

    #[test]
    fn claim_decrements_available() {
        let mut data = book(2);
        let opened = data.claim(UserId(1), open(1)).unwrap();
        assert_eq!(opened, ReservationId(1));
        assert_eq!(data.available, 1);
        assert_eq!(data.outstanding.len(), 1);
    }

    #[test]
    fn claim_on_empty_item_is_exhausted_and_opens_nothing() {
        let mut data = book(0);
        let mut opened = false;
        let result = data.claim(UserId(1), || {
            opened = true;
            Ok((ReservationId(1), ()))
        });
        assert_eq!(result, Err(LedgerError::Exhausted));
        assert!(!opened);
        assert_eq!(data.available, 0);
    }

    #[test]
    fn failed_open_leaves_counters_untouched() {
        let mut data = book(1);
        let result: Result<(), _> = data.claim(UserId(1), || {
            Err(LedgerError::IdsExhausted("reservation"))
        });
        assert_eq!(result, Err(LedgerError::IdsExhausted("reservation")));
        assert_eq!(data.available, 1);
        assert!(data.outstanding.is_empty());
    }

    #[test]
    fn one_per_user_rejects_second_claim() {
        let mut data = ItemData::new(ItemDetails::new("Meetup", ""), 5, ClaimPolicy::OnePerUser);
        data.claim(UserId(1), open(1)).unwrap();
        assert_eq!(data.claim(UserId(1), open(2)), Err(LedgerError::AlreadyHeld));
        data.claim(UserId(2), open(3)).unwrap();
        assert_eq!(data.available, 3);
    }

    #[test]
    fn one_per_user_allows_reclaim_after_release() {
        let mut data = ItemData::new(ItemDetails::new("Meetup", ""), 5, ClaimPolicy::OnePerUser);
        data.claim(UserId(1), open(1)).unwrap();
        data.release(ReservationId(1));
        data.claim(UserId(1), open(2)).unwrap();
        assert_eq!(data.available, 4);
    }

    #[test]
    fn release_restores_unit() {
        let mut data = book(2);
        data.claim(UserId(1), open(1)).unwrap();
        data.release(ReservationId(1));
        assert_eq!(data.available, 2);
        assert!(data.outstanding.is_empty());
    }

    #[test]
    fn adjust_capacity_shifts_available_by_delta() {
        let mut data = book(3);
        data.claim(UserId(1), open(1)).unwrap();
        data.adjust_capacity(5).unwrap();
        assert_eq!(data.total_capacity, 5);
        assert_eq!(data.available, 4);
    }

    #[test]
    fn adjust_capacity_clamps_to_new_total() {
        let mut data = book(2);
        data.adjust_capacity(1).unwrap();
        assert_eq!(data.total_capacity, 1);
        assert_eq!(data.available, 1);
    }

    #[test]
    fn adjust_below_outstanding_clamps_at_zero() {
        let mut data = book(3);
        data.claim(UserId(1), open(1)).unwrap();
        data.claim(UserId(2), open(2)).unwrap();
        data.adjust_capacity(1).unwrap();
        assert_eq!(data.available, 0);

        // One unit still over-committed: returning it frees nothing.
        data.release(ReservationId(1));
        assert_eq!(data.available, 0);
        data.release(ReservationId(2));
        assert_eq!(data.available, 1);
    }

    #[test]
    fn raising_capacity_while_overcommitted_honors_outstanding() {
        let mut data = book(2);
        data.claim(UserId(1), open(1)).unwrap();
        data.claim(UserId(2), open(2)).unwrap();
        data.adjust_capacity(0).unwrap();
        data.adjust_capacity(3).unwrap();
        assert_eq!(data.available, 1);
    }

    #[test]
    fn retire_requires_no_outstanding() {
        let mut data = book(1);
        data.claim(UserId(1), open(1)).unwrap();
        assert_eq!(data.retire(), Err(LedgerError::Conflict));
        data.release(ReservationId(1));
        data.retire().unwrap();
        assert_eq!(data.claim(UserId(2), open(2)), Err(LedgerError::NotFound("item")));
        assert_eq!(data.adjust_capacity(4), Err(LedgerError::NotFound("item")));
    }

    #[test]
    fn lock_reports_busy_when_held() {
        let item = Item::new(ItemId(1), ItemDetails::new("Dune", ""), 1, ClaimPolicy::Unlimited);
        let config = LedgerConfig {
            lock_timeout_ms: 1,
            lock_attempts: 2,
        };
        let _held = item.lock(&config).unwrap();
        assert_eq!(item.lock(&config).err(), Some(LedgerError::Busy));
    }

    #[test]
    fn snapshot_serializes_counters() {
        let item = Item::new(
            ItemId(9),
            ItemDetails::new("Dune", "Frank Herbert").with_description("Paperback"),
            4,
            ClaimPolicy::Unlimited,
        );
        let json = serde_json::to_value(item.snapshot()).unwrap();
        assert_eq!(json["id"], 9);
        assert_eq!(json["title"], "Dune");
        assert_eq!(json["total_capacity"], 4);
        assert_eq!(json["available"], 4);
        assert_eq!(json["outstanding"], 0);
        assert_eq!(json["policy"], "unlimited");
    }
}
