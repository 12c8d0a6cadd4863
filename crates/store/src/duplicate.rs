//! Duplicate-violation detection across storage backends.
//!
//! Backends signal uniqueness violations differently: SQLite reports a
//! vendor extended code, Postgres a SQLSTATE, the in-memory store a named
//! constraint, and some drivers only a human-readable message. Detection is
//! an ordered chain — vendor code match, then constraint-name substring,
//! then message substring — returning the first positive match. Adding a
//! backend means adding one detector, nothing else.

use crate::error::UniqueConstraint;

/// Backend-neutral description of a constraint violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationInfo {
    /// Vendor-specific error code, if the backend exposes one
    /// (e.g. SQLite extended code `"2067"`, Postgres SQLSTATE `"23505"`).
    pub vendor_code: Option<String>,
    /// Violated constraint name, if the backend reports it.
    pub constraint: Option<String>,
    /// Raw error message.
    pub message: String,
}

/// One strategy for recognizing a uniqueness violation.
pub trait DuplicateDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some(constraint)` if this detector positively identifies `info` as a
    /// uniqueness violation; `None` to let the next detector try.
    fn detect(&self, info: &ViolationInfo) -> Option<UniqueConstraint>;
}

/// Attribute a recognized violation to one of our named constraints by
/// scanning whatever text the backend gave us.
fn constraint_from_text(text: &str) -> UniqueConstraint {
    let text = text.to_ascii_lowercase();
    if text.contains("idempotency") {
        UniqueConstraint::IdempotencyKey
    } else if text.contains("entry_no") || text.contains("journal_entries") {
        UniqueConstraint::EntryNumber
    } else if text.contains("accounts") && text.contains("code") {
        UniqueConstraint::AccountCode
    } else {
        UniqueConstraint::Other
    }
}

fn best_text(info: &ViolationInfo) -> &str {
    info.constraint.as_deref().unwrap_or(&info.message)
}

/// Detector 1: vendor code match.
///
/// SQLite `SQLITE_CONSTRAINT_PRIMARYKEY` (1555) / `SQLITE_CONSTRAINT_UNIQUE`
/// (2067), Postgres `unique_violation` (23505).
struct VendorCode;

impl DuplicateDetector for VendorCode {
    fn name(&self) -> &'static str {
        "vendor-code"
    }

    fn detect(&self, info: &ViolationInfo) -> Option<UniqueConstraint> {
        const UNIQUE_VIOLATION_CODES: &[&str] = &["1555", "2067", "23505"];
        let code = info.vendor_code.as_deref()?;
        if UNIQUE_VIOLATION_CODES.contains(&code) {
            Some(constraint_from_text(best_text(info)))
        } else {
            None
        }
    }
}

/// Detector 2: constraint-name substring.
struct ConstraintName;

impl DuplicateDetector for ConstraintName {
    fn name(&self) -> &'static str {
        "constraint-name"
    }

    fn detect(&self, info: &ViolationInfo) -> Option<UniqueConstraint> {
        let name = info.constraint.as_deref()?.to_ascii_lowercase();
        let looks_unique = name.contains("uq_")
            || name.contains("unique")
            || name.contains("pkey")
            || name.contains("primary");
        if looks_unique {
            Some(constraint_from_text(&name))
        } else {
            None
        }
    }
}

/// Detector 3 (last resort): message substring.
struct MessageText;

impl DuplicateDetector for MessageText {
    fn name(&self) -> &'static str {
        "message-text"
    }

    fn detect(&self, info: &ViolationInfo) -> Option<UniqueConstraint> {
        let message = info.message.to_ascii_lowercase();
        let looks_unique = message.contains("unique constraint")
            || message.contains("duplicate key")
            || message.contains("primary key");
        if looks_unique {
            Some(constraint_from_text(&message))
        } else {
            None
        }
    }
}

/// The ordered chain. Preference order matters: vendor codes are exact,
/// constraint names are stable, message text is a last resort.
const DETECTORS: &[&dyn DuplicateDetector] = &[&VendorCode, &ConstraintName, &MessageText];

/// Run the detector chain; first positive match wins.
pub fn classify_duplicate(info: &ViolationInfo) -> Option<UniqueConstraint> {
    for detector in DETECTORS {
        if let Some(constraint) = detector.detect(info) {
            tracing::debug!(
                detector = detector.name(),
                constraint = %constraint,
                "classified uniqueness violation"
            );
            return Some(constraint);
        }
    }
    None
}
