//! Scripted adapters shared by the enrollment integration tests.
#![allow(dead_code)]

use account_ledger::Ledger;
use async_trait::async_trait;
use enrollment::config::{AttemptConfig, CodecConfig};
use enrollment::{
    BrokerError, DesktopError, DesktopMessenger, DeviceError, DeviceMessenger, DeviceSlot,
    MailError, MailProvider, NumberBroker, Orchestrator, RentedNumber, SharedSlot,
};
use secrecy::SecretString;
use session_codec::{encode_desktop_container, AuthKey, Triplet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const SECRET: &str = "test-local-secret";

/// Shared record of adapter calls, in order.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub fn fixture_triplet() -> Triplet {
    Triplet::new(AuthKey::new([7u8; 256]), 2, 9001).unwrap()
}

pub fn fixture_desktop_container() -> Vec<u8> {
    encode_desktop_container(&fixture_triplet(), SECRET.as_bytes())
}

/// Short timeouts for tests running on paused time.
pub fn test_attempt_config() -> AttemptConfig {
    AttemptConfig {
        step_timeout: Duration::from_secs(10),
        rent_timeout: Duration::from_secs(10),
        code_timeout: Duration::from_secs(30),
        email_timeout: Duration::from_secs(20),
        desktop_login_timeout: Duration::from_secs(10),
        desktop_login_attempts: 3,
        desktop_retry_delay: Duration::from_secs(1),
        ..AttemptConfig::default()
    }
}

pub fn test_codec_config() -> CodecConfig {
    CodecConfig {
        local_secret: SecretString::new(SECRET.to_string()),
        ..CodecConfig::default()
    }
}

pub fn orchestrator(broker: FakeBroker, config: AttemptConfig) -> Orchestrator {
    Orchestrator::new(Arc::new(broker), Ledger::memory(), config, test_codec_config())
}

pub fn slot(id: &str, device: FakeDevice, desktop: FakeDesktop) -> SharedSlot {
    DeviceSlot::new(id, Box::new(device), Box::new(desktop)).shared()
}

/// Number broker with a fixed price and an optional SMS code.
pub struct FakeBroker {
    pub price: f64,
    pub sms_code: Option<String>,
    pub sms_delay: Duration,
    pub release_fails: bool,
    pub rent_delay: Duration,
    pub log: CallLog,
    counter: AtomicUsize,
}

impl FakeBroker {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            sms_code: Some("48291".into()),
            sms_delay: Duration::from_millis(200),
            release_fails: false,
            rent_delay: Duration::ZERO,
            log: CallLog::default(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn without_sms(mut self) -> Self {
        self.sms_code = None;
        self
    }

    pub fn with_rent_delay(mut self, delay: Duration) -> Self {
        self.rent_delay = delay;
        self
    }

    pub fn with_failing_release(mut self) -> Self {
        self.release_fails = true;
        self
    }
}

#[async_trait]
impl NumberBroker for FakeBroker {
    async fn rent(&self, country: &str, price_ceiling: f64) -> Result<RentedNumber, BrokerError> {
        self.log.push(format!("rent:{}", country));
        tokio::time::sleep(self.rent_delay).await;
        if self.price > price_ceiling {
            return Err(BrokerError::NoNumberAvailable);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(RentedNumber {
            number: format!("+1555000{:04}", n),
            cost: self.price,
        })
    }

    async fn poll_code(&self, number: &str, deadline: Instant) -> Result<String, BrokerError> {
        self.log.push(format!("poll_code:{}", number));
        match &self.sms_code {
            Some(code) => {
                tokio::time::sleep(self.sms_delay).await;
                Ok(code.clone())
            }
            None => {
                tokio::time::sleep_until(deadline).await;
                Err(BrokerError::CodeTimeout)
            }
        }
    }

    async fn release(&self, number: &str) -> Result<(), BrokerError> {
        self.log.push(format!("release:{}", number));
        if self.release_fails {
            return Err(BrokerError::Service("release endpoint down".into()));
        }
        Ok(())
    }

    async fn ban(&self, number: &str) -> Result<(), BrokerError> {
        self.log.push(format!("ban:{}", number));
        Ok(())
    }
}

/// Device messenger following a fixed script.
#[derive(Default)]
pub struct FakeDevice {
    pub not_ready: bool,
    pub reject_number: bool,
    pub requires_email: bool,
    pub in_app_code: Option<String>,
    pub reject_code: bool,
    pub two_factor_prompt: bool,
    pub two_factor_password: Option<String>,
    pub display_name_fails: bool,
    pub log: CallLog,
}

#[async_trait]
impl DeviceMessenger for FakeDevice {
    async fn ensure_ready(&self) -> Result<(), DeviceError> {
        self.log.push("ensure_ready");
        if self.not_ready {
            return Err(DeviceError::NotReady("emulator offline".into()));
        }
        Ok(())
    }

    async fn submit_number(&self, number: &str) -> Result<(), DeviceError> {
        self.log.push(format!("submit_number:{}", number));
        if self.reject_number {
            return Err(DeviceError::NumberRejected("number is banned".into()));
        }
        Ok(())
    }

    async fn requires_email(&self) -> Result<bool, DeviceError> {
        Ok(self.requires_email)
    }

    async fn submit_email(&self, address: &str) -> Result<(), DeviceError> {
        self.log.push(format!("submit_email:{}", address));
        Ok(())
    }

    async fn submit_email_code(&self, code: &str) -> Result<(), DeviceError> {
        self.log.push(format!("submit_email_code:{}", code));
        Ok(())
    }

    async fn read_incoming_code(&self, deadline: Instant) -> Result<String, DeviceError> {
        match &self.in_app_code {
            Some(code) => Ok(code.clone()),
            None => {
                tokio::time::sleep_until(deadline).await;
                Err(DeviceError::CodeTimeout)
            }
        }
    }

    async fn submit_code(&self, code: &str) -> Result<(), DeviceError> {
        self.log.push(format!("submit_code:{}", code));
        if self.reject_code {
            return Err(DeviceError::CodeRejected);
        }
        Ok(())
    }

    async fn has_two_factor_prompt(&self) -> Result<bool, DeviceError> {
        Ok(self.two_factor_prompt)
    }

    async fn submit_two_factor_password(&self, password: &str) -> Result<(), DeviceError> {
        self.log.push("submit_two_factor_password");
        match &self.two_factor_password {
            Some(expected) if expected == password => Ok(()),
            _ => Err(DeviceError::TwoFactorRejected),
        }
    }

    async fn set_display_name(&self, display_name: &str) -> Result<(), DeviceError> {
        self.log.push(format!("set_display_name:{}", display_name));
        if self.display_name_fails {
            return Err(DeviceError::Automation("profile screen not found".into()));
        }
        Ok(())
    }
}

/// Desktop messenger returning scripted results, then a fallback.
pub struct FakeDesktop {
    script: Mutex<VecDeque<Result<Vec<u8>, DesktopError>>>,
    fallback: Result<Vec<u8>, DesktopError>,
    pub log: CallLog,
}

impl FakeDesktop {
    /// Always logs in and exports the fixture container.
    pub fn working() -> Self {
        Self::returning(Ok(fixture_desktop_container()))
    }

    pub fn returning(result: Result<Vec<u8>, DesktopError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: result,
            log: CallLog::default(),
        }
    }

    /// Play `script` first, then fall back to `fallback`.
    pub fn scripted(
        script: Vec<Result<Vec<u8>, DesktopError>>,
        fallback: Result<Vec<u8>, DesktopError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            log: CallLog::default(),
        }
    }
}

#[async_trait]
impl DesktopMessenger for FakeDesktop {
    async fn fresh_profile_login(&self, number: &str, code: &str) -> Result<Vec<u8>, DesktopError> {
        self.log.push(format!("login:{}:{}", number, code));
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Mail provider with an optional confirmation code.
pub struct FakeMail {
    pub address: String,
    pub code: Option<String>,
    pub log: CallLog,
}

impl FakeMail {
    pub fn new(code: Option<&str>) -> Self {
        Self {
            address: "enroll-01@mail.test".into(),
            code: code.map(String::from),
            log: CallLog::default(),
        }
    }
}

#[async_trait]
impl MailProvider for FakeMail {
    async fn register_mailbox(&self) -> Result<String, MailError> {
        self.log.push("register_mailbox");
        Ok(self.address.clone())
    }

    async fn await_confirmation_code(&self, deadline: Instant) -> Result<String, MailError> {
        self.log.push("await_confirmation_code");
        match &self.code {
            Some(code) => Ok(code.clone()),
            None => {
                tokio::time::sleep_until(deadline).await;
                Err(MailError::Timeout)
            }
        }
    }
}
