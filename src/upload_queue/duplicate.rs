//! Duplicate suppression for repeated submissions.
//!
//! A UI that double-fires "add" (retry taps, flaky callbacks) must not queue
//! the same bill twice. Two submissions are the same bill when store, amount
//! and image agree and they were enqueued close together in time; the time
//! window keeps two genuine visits to the same store apart.

use super::types::{Fingerprint, ItemStatus, QueuedItem};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    window: Duration,
}

impl DuplicateDetector {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// First non-completed item equivalent to `candidate`, if any
    pub fn find_duplicate<'a, I>(
        &self,
        candidate: &Fingerprint,
        now: DateTime<Utc>,
        items: I,
    ) -> Option<&'a QueuedItem>
    where
        I: IntoIterator<Item = &'a QueuedItem>,
    {
        items
            .into_iter()
            .filter(|item| item.status != ItemStatus::Success)
            .find(|item| self.is_duplicate(candidate, now, item))
    }

    pub fn is_duplicate(
        &self,
        candidate: &Fingerprint,
        now: DateTime<Utc>,
        item: &QueuedItem,
    ) -> bool {
        let existing = &item.fingerprint;
        let age = now - item.enqueued_at;

        existing.store_id == candidate.store_id
            && existing.amount_minor == candidate.amount_minor
            && same_image(existing, candidate)
            && age <= self.window
            && age >= -self.window
    }
}

/// Same URI, or equal content hash when both sides have one
fn same_image(a: &Fingerprint, b: &Fingerprint) -> bool {
    if a.image_ref == b.image_ref {
        return true;
    }
    match (&a.image_hash, &b.image_hash) {
        (Some(hash_a), Some(hash_b)) => hash_a.eq_ignore_ascii_case(hash_b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload_queue::types::Submission;
    use serde_json::json;

    fn fingerprint(store: &str, amount: i64, image: &str) -> Fingerprint {
        Fingerprint {
            store_id: store.to_string(),
            amount_minor: amount,
            image_ref: image.to_string(),
            image_hash: None,
        }
    }

    fn queued(fp: Fingerprint, at: DateTime<Utc>) -> QueuedItem {
        QueuedItem::new(Submission::new(json!({}), fp), at)
    }

    fn detector() -> DuplicateDetector {
        DuplicateDetector::new(Duration::minutes(5))
    }

    #[test]
    fn test_identical_submission_is_duplicate() {
        let now = Utc::now();
        let existing = queued(fingerprint("s1", 500, "img://1"), now);

        let found = detector().find_duplicate(
            &fingerprint("s1", 500, "img://1"),
            now,
            [&existing],
        );
        assert_eq!(found.map(|i| i.id.as_str()), Some(existing.id.as_str()));
    }

    #[test]
    fn test_any_field_difference_is_distinct() {
        let now = Utc::now();
        let existing = queued(fingerprint("s1", 500, "img://1"), now);
        let d = detector();

        assert!(!d.is_duplicate(&fingerprint("s2", 500, "img://1"), now, &existing));
        assert!(!d.is_duplicate(&fingerprint("s1", 501, "img://1"), now, &existing));
        assert!(!d.is_duplicate(&fingerprint("s1", 500, "img://2"), now, &existing));
    }

    #[test]
    fn test_outside_window_is_distinct() {
        let then = Utc::now() - Duration::minutes(30);
        let existing = queued(fingerprint("s1", 500, "img://1"), then);

        assert!(!detector().is_duplicate(
            &fingerprint("s1", 500, "img://1"),
            Utc::now(),
            &existing
        ));
    }

    #[test]
    fn test_equal_hash_with_different_uri() {
        let now = Utc::now();
        let mut stored = fingerprint("s1", 500, "file:///a.jpg");
        stored.image_hash = Some("AB12".into());
        let existing = queued(stored, now);

        let mut candidate = fingerprint("s1", 500, "content://copy-of-a");
        candidate.image_hash = Some("ab12".into());
        assert!(detector().is_duplicate(&candidate, now, &existing));

        candidate.image_hash = None;
        assert!(!detector().is_duplicate(&candidate, now, &existing));
    }

    #[test]
    fn test_completed_items_are_ignored() {
        let now = Utc::now();
        let mut existing = queued(fingerprint("s1", 500, "img://1"), now);
        existing.status = ItemStatus::Success;

        assert!(detector()
            .find_duplicate(&fingerprint("s1", 500, "img://1"), now, [&existing])
            .is_none());

        existing.status = ItemStatus::Failed;
        assert!(detector()
            .find_duplicate(&fingerprint("s1", 500, "img://1"), now, [&existing])
            .is_some());
    }
}
