//! `ledgerkit-events` — domain event record and best-effort emitter.
//!
//! Events notify observers (audit log, metrics) of committed financial
//! operations. They carry **no transactional guarantee**: emission happens
//! after commit, failures are logged and swallowed, delivery is at-most-once.

pub mod emitter;
pub mod event;

pub use emitter::EventEmitter;
pub use event::DomainEvent;
