//! Validation of submissions before they are queued.
//!
//! Rejecting malformed input here keeps unsendable items out of the queue,
//! where they would otherwise burn through their retries.

use super::types::{BillSubmission, Fingerprint, Submission};
use crate::error::QueueError;
use chrono::{Duration, NaiveDate, Utc};

/// Maximum serialized payload size accepted into the queue (1MB)
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

pub fn validate_fingerprint(fingerprint: &Fingerprint) -> Result<(), QueueError> {
    if fingerprint.store_id.trim().is_empty() {
        return Err(QueueError::Validation("store id is required".into()));
    }
    if fingerprint.image_ref.trim().is_empty() {
        return Err(QueueError::Validation("image reference is required".into()));
    }
    if fingerprint.amount_minor <= 0 {
        return Err(QueueError::Validation(format!(
            "amount must be positive (got {} minor units)",
            fingerprint.amount_minor
        )));
    }
    if let Some(ref hash) = fingerprint.image_hash {
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(QueueError::Validation(format!(
                "image hash is not a SHA256 hex digest: {}",
                hash
            )));
        }
    }
    Ok(())
}

pub fn validate_submission(submission: &Submission) -> Result<(), QueueError> {
    if submission.payload.is_null() {
        return Err(QueueError::Validation("payload must not be null".into()));
    }

    let size = serde_json::to_vec(&submission.payload)?.len();
    if size > MAX_PAYLOAD_BYTES {
        return Err(QueueError::Validation(format!(
            "payload size ({} bytes) exceeds maximum ({} bytes)",
            size, MAX_PAYLOAD_BYTES
        )));
    }

    validate_fingerprint(&submission.fingerprint)
}

pub fn validate_bill(bill: &BillSubmission) -> Result<(), QueueError> {
    if !bill.amount.is_finite() {
        return Err(QueueError::Validation("amount must be a finite number".into()));
    }
    validate_bill_date(bill.date)?;
    validate_fingerprint(&bill.fingerprint())
}

fn validate_bill_date(date: NaiveDate) -> Result<(), QueueError> {
    // One day of slack for clients ahead of UTC
    let latest = (Utc::now() + Duration::days(1)).date_naive();
    if date > latest {
        return Err(QueueError::Validation(format!(
            "bill date {} is in the future",
            date
        )));
    }
    Ok(())
}
