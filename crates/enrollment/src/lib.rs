//! Enrollment - orchestrates account registration attempts.
//!
//! One attempt rents a number, drives a device client through verification,
//! logs a desktop client in from a fresh profile and materializes the
//! resulting session in both container formats. Every attempt ends in exactly
//! one ledger entry, whatever happened along the way.
//!
//! External actors (number broker, device, desktop client, mailbox) are
//! reached only through the traits in [`adapters`].

pub mod adapters;
pub mod api;
pub mod attempt;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod runner;

pub use adapters::{
    DesktopMessenger, DeviceMessenger, DeviceSlot, MailProvider, NumberBroker, RentedNumber,
    SharedSlot,
};
pub use attempt::AttemptRequest;
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::{Config, NumberPolicy};
pub use error::{ApiError, BrokerError, DesktopError, DeviceError, EnrollmentError, MailError};
pub use orchestrator::{AttemptReport, Orchestrator};
pub use runner::{EnrollmentRunner, RunSummary, StopReason};
