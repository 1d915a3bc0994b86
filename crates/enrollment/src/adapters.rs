//! Capability interfaces for the external actors an attempt coordinates.
//!
//! Concrete backends (SMS vendor clients, UI automation, mailbox automation)
//! live outside this crate and implement these traits. The orchestrator only
//! ever sees the traits.

use crate::error::{BrokerError, DesktopError, DeviceError, MailError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A number rented from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct RentedNumber {
    /// E.164 number, e.g. "+15550001111"
    pub number: String,
    /// Price paid for the rental
    pub cost: f64,
}

/// Phone number rental service.
#[async_trait]
pub trait NumberBroker: Send + Sync {
    /// Rent a number for `country` costing at most `price_ceiling`.
    async fn rent(&self, country: &str, price_ceiling: f64) -> Result<RentedNumber, BrokerError>;

    /// Wait for an SMS verification code addressed to `number`.
    async fn poll_code(&self, number: &str, deadline: Instant) -> Result<String, BrokerError>;

    /// Hand the number back; its lifecycle is over.
    async fn release(&self, number: &str) -> Result<(), BrokerError>;

    /// Hand the number back and mark it ineligible for future rentals.
    async fn ban(&self, number: &str) -> Result<(), BrokerError>;
}

/// Messaging client running on a controlled device.
#[async_trait]
pub trait DeviceMessenger: Send + Sync {
    /// Confirm the device and client are usable. Called once per attempt.
    async fn ensure_ready(&self) -> Result<(), DeviceError>;

    async fn submit_number(&self, number: &str) -> Result<(), DeviceError>;

    /// Whether the client flow asks for an email address after the number.
    async fn requires_email(&self) -> Result<bool, DeviceError>;

    async fn submit_email(&self, address: &str) -> Result<(), DeviceError>;

    async fn submit_email_code(&self, code: &str) -> Result<(), DeviceError>;

    /// Latest verification code visible inside the client.
    async fn read_incoming_code(&self, deadline: Instant) -> Result<String, DeviceError>;

    async fn submit_code(&self, code: &str) -> Result<(), DeviceError>;

    async fn has_two_factor_prompt(&self) -> Result<bool, DeviceError>;

    async fn submit_two_factor_password(&self, password: &str) -> Result<(), DeviceError>;

    /// Set the profile display name. Backends without profile support keep
    /// the default.
    async fn set_display_name(&self, _display_name: &str) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Desktop messaging client driven from a clean profile.
#[async_trait]
pub trait DesktopMessenger: Send + Sync {
    /// Log in from a fresh profile and export the desktop session container.
    async fn fresh_profile_login(&self, number: &str, code: &str) -> Result<Vec<u8>, DesktopError>;
}

/// Mailbox provider for flows that demand an email address.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Register a new mailbox and return its address.
    async fn register_mailbox(&self) -> Result<String, MailError>;

    /// Wait for the confirmation code sent to the registered mailbox.
    async fn await_confirmation_code(&self, deadline: Instant) -> Result<String, MailError>;
}

/// One controllable client instance: a device messenger and a desktop
/// messenger that are never shared between concurrent attempts.
pub struct DeviceSlot {
    id: String,
    device: Box<dyn DeviceMessenger>,
    desktop: Box<dyn DesktopMessenger>,
}

/// A device slot shared between attempts; an attempt holds the lock for its
/// whole lifetime.
pub type SharedSlot = Arc<Mutex<DeviceSlot>>;

impl DeviceSlot {
    pub fn new(
        id: impl Into<String>,
        device: Box<dyn DeviceMessenger>,
        desktop: Box<dyn DesktopMessenger>,
    ) -> Self {
        Self {
            id: id.into(),
            device,
            desktop,
        }
    }

    /// Wrap the slot for use with the orchestrator.
    pub fn shared(self) -> SharedSlot {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device(&self) -> &dyn DeviceMessenger {
        self.device.as_ref()
    }

    pub fn desktop(&self) -> &dyn DesktopMessenger {
        self.desktop.as_ref()
    }
}
