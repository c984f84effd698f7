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

//! Ledger tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Contention policy for per-item locks.
///
/// Each lock acquisition waits up to `lock_timeout_ms` and is attempted
/// `lock_attempts` times before the operation fails with
/// [`LedgerError::Busy`](crate::LedgerError::Busy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub lock_timeout_ms: u64,
    pub lock_attempts: u32,
}

impl LedgerConfig {
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 50;
    pub const DEFAULT_LOCK_ATTEMPTS: u32 = 3;

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.lock_attempts.max(1)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: Self::DEFAULT_LOCK_TIMEOUT_MS,
            lock_attempts: Self::DEFAULT_LOCK_ATTEMPTS,
        }
    }
}
