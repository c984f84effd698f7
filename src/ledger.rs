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

//! Lending ledger.
//!
//! The [`Ledger`] is the consistency controller: it owns the catalog and the
//! reservation log and is the only component that moves an item's
//! `available` counter.
//!
//! # Operations
//!
//! - **Claim**: take one unit of an item, opening a reservation.
//! - **Resolve**: close a reservation (owner or admin), returning its unit.
//! - **Adjust capacity**: change an item's total (admin).
//! - **Delete item**: remove an item with no outstanding reservations (admin).
//!
//! # Thread Safety
//!
//! Items live in a [`DashMap`] as `Arc<Item>`; every transition on an item
//! runs under that item's lock, so claims on one item are serialized while
//! claims on different items proceed in parallel. Locks are always taken in
//! the order item lock, then reservation record.

use crate::base::{IdAllocator, ItemId, ReservationId, Requester, UserId};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::item::{ClaimPolicy, Item, ItemDetails, ItemSnapshot};
use crate::reservation::Reservation;
use crate::reservation_log::ReservationLog;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Request to add an item to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewItem {
    pub details: ItemDetails,
    pub total_capacity: u32,
    pub policy: ClaimPolicy,
}

impl NewItem {
    pub fn new(details: ItemDetails, total_capacity: u32) -> Self {
        Self {
            details,
            total_capacity,
            policy: ClaimPolicy::Unlimited,
        }
    }

    pub fn with_policy(mut self, policy: ClaimPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Partial edit of an item. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub total_capacity: Option<u32>,
}

/// Catalog and reservation state with capacity invariants.
///
/// # Invariants
///
/// - `available = total_capacity - outstanding reservations`, saturating at 0.
/// - `available` never exceeds `total_capacity`.
/// - A reservation is resolved at most once.
/// - An item with outstanding reservations cannot be deleted.
pub struct Ledger {
    config: LedgerConfig,
    /// Catalog items indexed by item ID.
    items: DashMap<ItemId, Arc<Item>>,
    item_ids: IdAllocator,
    /// Every reservation ever issued.
    reservations: ReservationLog,
}

impl Ledger {
    /// Creates an empty ledger with the default contention policy.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Ledger {
            config,
            items: DashMap::new(),
            item_ids: IdAllocator::new("item"),
            reservations: ReservationLog::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Adds an item with `available = total_capacity`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - Requester is not an admin.
    /// - [`LedgerError::InvalidInput`] - Title is blank.
    /// - [`LedgerError::IdsExhausted`] - No item id left.
    pub fn add_item(&self, item: NewItem, requester: Requester) -> Result<ItemSnapshot, LedgerError> {
        require_admin(requester)?;
        let details = item.details.normalized();
        if details.title.is_empty() {
            return Err(LedgerError::InvalidInput("title"));
        }

        let id = ItemId(self.item_ids.next()?);
        let item = Arc::new(Item::new(id, details, item.total_capacity, item.policy));
        let snapshot = item.snapshot();
        self.items.insert(id, item);

        tracing::debug!(item = %id, total = snapshot.total_capacity, "item added");
        Ok(snapshot)
    }

    /// Claims one unit of `item_id` for `user_id`.
    ///
    /// The counter decrement and the reservation insert happen under the
    /// item lock, so two claims racing for the last unit cannot both win.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Item does not exist (or was deleted).
    /// - [`LedgerError::Exhausted`] - No unit available.
    /// - [`LedgerError::AlreadyHeld`] - One-per-user item already claimed by this user.
    /// - [`LedgerError::Busy`] - Item lock contended past the retry budget.
    /// - [`LedgerError::IdsExhausted`] - No reservation id left.
    pub fn claim(&self, user_id: UserId, item_id: ItemId) -> Result<Reservation, LedgerError> {
        let item = self.item_handle(item_id)?;
        let mut data = item.lock(&self.config)?;

        let reservation = data.claim(user_id, || {
            let reservation = self.reservations.open(user_id, item_id, Utc::now())?;
            Ok((reservation.id(), reservation))
        })?;

        tracing::debug!(
            item = %item_id,
            user = %user_id,
            reservation = %reservation.id(),
            "claim accepted"
        );
        Ok(reservation)
    }

    /// Resolves an outstanding reservation and returns its unit to the item.
    ///
    /// Authorization is checked before the resolution state, so a stranger
    /// learns nothing about whether the reservation is still open.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Reservation does not exist.
    /// - [`LedgerError::Forbidden`] - Requester neither owns it nor is admin.
    /// - [`LedgerError::AlreadyResolved`] - Soft no-op; nothing changed.
    /// - [`LedgerError::Busy`] - Item lock contended past the retry budget.
    pub fn resolve(
        &self,
        reservation_id: ReservationId,
        requester: Requester,
    ) -> Result<Reservation, LedgerError> {
        let reservation = self
            .reservations
            .get(reservation_id)
            .ok_or(LedgerError::NotFound("reservation"))?;
        if !requester.may_act_for(reservation.user_id()) {
            return Err(LedgerError::Forbidden);
        }

        // Items with outstanding reservations are never removed, so a missing
        // item means this reservation was resolved before the deletion.
        let Some(item) = self.find_item(reservation.item_id()) else {
            return self.reservations.resolve(reservation_id, Utc::now());
        };

        let mut data = item.lock(&self.config)?;
        let resolved = self.reservations.resolve(reservation_id, Utc::now())?;
        data.release(reservation_id);

        tracing::debug!(
            item = %resolved.item_id(),
            reservation = %reservation_id,
            by = %requester.user_id,
            "reservation resolved"
        );
        Ok(resolved)
    }

    /// Sets an item's total capacity, shifting `available` by the same delta
    /// and clamping it to `[0, new_total]`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - Requester is not an admin.
    /// - [`LedgerError::NotFound`] - Item does not exist.
    /// - [`LedgerError::Busy`] - Item lock contended past the retry budget.
    pub fn adjust_capacity(
        &self,
        item_id: ItemId,
        new_total: u32,
        requester: Requester,
    ) -> Result<ItemSnapshot, LedgerError> {
        require_admin(requester)?;
        let item = self.item_handle(item_id)?;
        let mut data = item.lock(&self.config)?;
        data.adjust_capacity(new_total)?;

        let snapshot = Item::snapshot_of(item_id, &data);
        tracing::debug!(
            item = %item_id,
            total = snapshot.total_capacity,
            available = snapshot.available,
            "capacity adjusted"
        );
        Ok(snapshot)
    }

    /// Edits an item's metadata and, when given, its capacity.
    ///
    /// # Errors
    ///
    /// Same as [`Ledger::adjust_capacity`], plus [`LedgerError::InvalidInput`]
    /// when the new title is blank.
    pub fn update_item(
        &self,
        item_id: ItemId,
        update: ItemUpdate,
        requester: Requester,
    ) -> Result<ItemSnapshot, LedgerError> {
        require_admin(requester)?;
        let item = self.item_handle(item_id)?;
        let mut data = item.lock(&self.config)?;

        let current = data.details();
        let details = ItemDetails {
            title: update.title.unwrap_or_else(|| current.title.clone()),
            author: update.author.unwrap_or_else(|| current.author.clone()),
            description: update
                .description
                .unwrap_or_else(|| current.description.clone()),
        }
        .normalized();
        if details.title.is_empty() {
            return Err(LedgerError::InvalidInput("title"));
        }

        // Capacity first: if it fails, the details stay untouched.
        if let Some(new_total) = update.total_capacity {
            data.adjust_capacity(new_total)?;
        }
        data.update_details(details)?;

        tracing::debug!(item = %item_id, "item updated");
        Ok(Item::snapshot_of(item_id, &data))
    }

    /// Deletes an item that has no outstanding reservations.
    ///
    /// Returns the final snapshot of the removed item.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - Requester is not an admin.
    /// - [`LedgerError::NotFound`] - Item does not exist.
    /// - [`LedgerError::Conflict`] - Item still has outstanding reservations.
    /// - [`LedgerError::Busy`] - Item lock contended past the retry budget.
    pub fn delete_item(&self, item_id: ItemId, requester: Requester) -> Result<ItemSnapshot, LedgerError> {
        require_admin(requester)?;
        let item = self.item_handle(item_id)?;

        let snapshot = {
            let mut data = item.lock(&self.config)?;
            data.retire()?;
            Item::snapshot_of(item_id, &data)
        };
        // Retired under the lock; claims holding a stale handle now see NotFound.
        self.items.remove(&item_id);

        tracing::debug!(item = %item_id, "item deleted");
        Ok(snapshot)
    }

    /// Retrieves an item snapshot by ID.
    ///
    /// Queries wait for a contended item lock instead of returning
    /// [`LedgerError::Busy`]; only mutations are bounded by [`LedgerConfig`].
    pub fn item(&self, item_id: ItemId) -> Option<ItemSnapshot> {
        self.find_item(item_id).map(|item| item.snapshot())
    }

    /// All items, ordered by ID. Waits on contended items like [`Ledger::item`].
    pub fn items(&self) -> Vec<ItemSnapshot> {
        self.snapshots(|_| true)
    }

    /// Items whose title or author contains `query`, ignoring case.
    ///
    /// A blank query matches every item.
    pub fn search(&self, query: &str) -> Vec<ItemSnapshot> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.items();
        }
        self.snapshots(|item| {
            item.title.to_lowercase().contains(&needle)
                || item.author.to_lowercase().contains(&needle)
        })
    }

    /// Items grouped by author. Items without an author go under `"Unknown"`.
    pub fn items_by_author(&self) -> BTreeMap<String, Vec<ItemSnapshot>> {
        let mut grouped: BTreeMap<String, Vec<ItemSnapshot>> = BTreeMap::new();
        for item in self.items() {
            let author = if item.author.is_empty() {
                "Unknown".to_string()
            } else {
                item.author.clone()
            };
            grouped.entry(author).or_default().push(item);
        }
        grouped
    }

    /// Retrieves a reservation by ID.
    pub fn reservation(&self, reservation_id: ReservationId) -> Option<Reservation> {
        self.reservations.get(reservation_id)
    }

    /// Reservations visible to `requester`, newest first.
    ///
    /// Admins see every reservation; members see only their own.
    pub fn reservations(&self, requester: Requester) -> Vec<Reservation> {
        self.reservations
            .newest_first(|r| requester.may_act_for(r.user_id()))
    }

    /// Outstanding reservations on one item, newest first.
    pub fn outstanding_for(&self, item_id: ItemId) -> Vec<Reservation> {
        self.reservations
            .newest_first(|r| r.item_id() == item_id && r.is_outstanding())
    }

    /// Number of reservations ever issued.
    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    fn find_item(&self, item_id: ItemId) -> Option<Arc<Item>> {
        self.items.get(&item_id).map(|entry| Arc::clone(entry.value()))
    }

    fn item_handle(&self, item_id: ItemId) -> Result<Arc<Item>, LedgerError> {
        self.find_item(item_id).ok_or(LedgerError::NotFound("item"))
    }

    /// Snapshots matching `filter`, ordered by ID.
    ///
    /// Handles are collected before any item lock is taken so no map shard
    /// is held while waiting on an item.
    fn snapshots<F>(&self, filter: F) -> Vec<ItemSnapshot>
    where
        F: Fn(&ItemSnapshot) -> bool,
    {
        let handles: Vec<Arc<Item>> = self
            .items
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut snapshots: Vec<ItemSnapshot> = handles
            .iter()
            .map(|item| item.snapshot())
            .filter(|snapshot| filter(snapshot))
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

fn require_admin(requester: Requester) -> Result<(), LedgerError> {
    if requester.role.is_admin() {
        Ok(())
    } else {
        Err(LedgerError::Forbidden)
    }
}
