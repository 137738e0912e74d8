//! The value object describing a held distributed lock

#![allow(clippy::cast_precision_loss)] // Remaining-fraction math accepts precision loss

use rand::{RngExt, rng};
use serde::{Deserialize, Serialize};

/// A held (or formerly held) lock as stored in the shared cache
///
/// The `owner_token` is fresh for every acquisition and is the only proof
/// of ownership: renew and release compare it against the stored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockItem {
    /// Composite store key, `lock:{category}|{id}`
    pub key: String,
    pub id: String,
    pub category: String,
    /// 128 random bits as 32 lowercase hex characters
    pub owner_token: String,
    pub acquired_at_epoch_seconds: i64,
    pub duration_seconds: u64,
    pub renewal_count: u32,
}

impl LockItem {
    /// Build an item with a freshly generated owner token
    pub fn new(id: &str, category: &str, duration_seconds: u64, now_epoch_seconds: i64) -> Self {
        Self {
            key: Self::key_for(category, id),
            id: id.to_string(),
            category: category.to_string(),
            owner_token: new_owner_token(),
            acquired_at_epoch_seconds: now_epoch_seconds,
            duration_seconds,
            renewal_count: 0,
        }
    }

    pub fn key_for(category: &str, id: &str) -> String {
        format!("lock:{category}|{id}")
    }

    /// Epoch second at which the lock stops being valid
    pub fn expires_at(&self) -> i64 {
        let duration = i64::try_from(self.duration_seconds).unwrap_or(i64::MAX);
        self.acquired_at_epoch_seconds.saturating_add(duration)
    }

    pub fn is_valid(&self, now_epoch_seconds: i64) -> bool {
        now_epoch_seconds < self.expires_at()
    }

    /// True when `other` is present and carries the same owner token
    pub fn matches_tokens_with(&self, other: Option<&Self>) -> bool {
        other.is_some_and(|other| other.owner_token == self.owner_token)
    }

    /// Restart the validity window at `now` and count the renewal
    pub fn update(&mut self, now_epoch_seconds: i64) {
        self.acquired_at_epoch_seconds = now_epoch_seconds;
        self.renewal_count = self.renewal_count.saturating_add(1);
    }

    pub fn seconds_remaining(&self, now_epoch_seconds: i64) -> u64 {
        u64::try_from(self.expires_at().saturating_sub(now_epoch_seconds)).unwrap_or(0)
    }

    /// Share of the validity window still left, in `0.0..=1.0`
    pub fn remaining_fraction(&self, now_epoch_seconds: i64) -> f64 {
        if self.duration_seconds == 0 {
            return 0.0;
        }
        let remaining = self.seconds_remaining(now_epoch_seconds) as f64;
        (remaining / self.duration_seconds as f64).clamp(0.0, 1.0)
    }
}

fn new_owner_token() -> String {
    format!("{:032x}", rng().random::<u128>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_format() {
        let item = LockItem::new("42", "Invoice", 30, 1_000);
        assert_eq!(item.key, "lock:Invoice|42");
        assert_eq!(item.expires_at(), 1_030);
    }

    #[test]
    fn test_owner_tokens_are_fresh_hex() {
        let a = LockItem::new("1", "A", 10, 0);
        let b = LockItem::new("1", "A", 10, 0);
        assert_eq!(a.owner_token.len(), 32);
        assert!(a.owner_token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a.owner_token, b.owner_token);
    }

    #[test]
    fn test_token_matching() {
        let held = LockItem::new("1", "A", 10, 0);
        let other = LockItem::new("1", "A", 10, 0);
        assert!(held.matches_tokens_with(Some(&held.clone())));
        assert!(!held.matches_tokens_with(Some(&other)));
        assert!(!held.matches_tokens_with(None));
    }

    #[test]
    fn test_update_restarts_window() {
        let mut item = LockItem::new("1", "A", 10, 100);
        assert!(!item.is_valid(110));

        item.update(108);
        assert!(item.is_valid(110));
        assert_eq!(item.renewal_count, 1);
        assert_eq!(item.seconds_remaining(110), 8);
        assert!((item.remaining_fraction(110) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_is_never_valid() {
        let item = LockItem::new("1", "A", 0, 100);
        assert!(!item.is_valid(100));
        assert!(item.remaining_fraction(100).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn validity_matches_window(
            acquired in -1_000_000_i64..1_000_000,
            duration in 0_u64..100_000,
            offset in -200_000_i64..200_000,
        ) {
            let mut item = LockItem::new("x", "P", duration, 0);
            item.acquired_at_epoch_seconds = acquired;
            let now = acquired + offset;

            let expected = offset < i64::try_from(duration).unwrap_or(i64::MAX);
            prop_assert_eq!(item.is_valid(now), expected);
            prop_assert!(item.remaining_fraction(now) >= 0.0);
            prop_assert!(item.remaining_fraction(now) <= 1.0);
            if !expected {
                prop_assert_eq!(item.seconds_remaining(now), 0);
            }
        }
    }
}
