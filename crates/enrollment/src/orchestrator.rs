//! Registration orchestrator: drives one attempt from an idle device slot to
//! a recorded ledger entry.

use crate::adapters::{
    DesktopMessenger, DeviceMessenger, DeviceSlot, MailProvider, NumberBroker, SharedSlot,
};
use crate::attempt::{AccountAttempt, AttemptRequest, Finalization};
use crate::cancel::CancelToken;
use crate::classify::{self, Failure};
use crate::config::{AttemptConfig, CodecConfig, NumberPolicy};
use crate::error::{BrokerError, DeviceError, EnrollmentError};
use account_ledger::{
    AttemptState, CodeSource, Credential, EntryNote, FailureKind, FailureReason, Ledger,
    LedgerEntry, NumberDisposition, Outcome,
};
use secrecy::{ExposeSecret, SecretString};
use session_codec::{
    decode_desktop_container, decode_programmatic_container, encode_programmatic_container,
    ClientMetadata,
};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const UNTRACKED_RENTAL: &str =
    "a number the broker assigned after the wait ended is not recorded or released";

/// Definitive result of one attempt, handed back to the caller.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub attempt_id: Uuid,
    pub outcome: Outcome,
    pub reason: Option<FailureReason>,
    pub kind: Option<FailureKind>,
    pub detail: Option<String>,
    pub phone_number: Option<String>,
    pub number_disposition: NumberDisposition,
    pub cost: f64,
    pub notes: Vec<EntryNote>,
    pub credential: Option<Credential>,
}

impl AttemptReport {
    fn from_entry(entry: &LedgerEntry) -> Self {
        Self {
            attempt_id: entry.attempt_id,
            outcome: entry.outcome,
            reason: entry.reason,
            kind: entry.failure_kind,
            detail: entry.detail.clone(),
            phone_number: entry.phone_number.clone(),
            number_disposition: entry.number_disposition,
            cost: entry.cost,
            notes: entry.notes.clone(),
            credential: entry.credential.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// The device slot is unusable; the caller should stop issuing attempts
    /// against it.
    pub fn device_fatal(&self) -> bool {
        self.kind == Some(FailureKind::FatalToDevice)
    }
}

/// Credential produced by the pipeline, with a detail message when only the
/// primary container is available.
struct Materialized {
    credential: Credential,
    partial: Option<String>,
}

/// Sequences the adapters for each attempt and records the outcome.
pub struct Orchestrator {
    broker: Arc<dyn NumberBroker>,
    mail: Option<Arc<dyn MailProvider>>,
    ledger: Ledger,
    config: AttemptConfig,
    local_secret: SecretString,
    client: ClientMetadata,
}

impl Orchestrator {
    pub fn new(
        broker: Arc<dyn NumberBroker>,
        ledger: Ledger,
        config: AttemptConfig,
        codec: CodecConfig,
    ) -> Self {
        let client = codec.client_metadata();
        Self {
            broker,
            mail: None,
            ledger,
            config,
            local_secret: codec.local_secret,
            client,
        }
    }

    /// Enable the email branch of the flow.
    pub fn with_mail(mut self, mail: Arc<dyn MailProvider>) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &AttemptConfig {
        &self.config
    }

    /// Run one attempt to completion.
    ///
    /// Pipeline failures, timeouts and cancellation all come back as an
    /// `Ok(AttemptReport)` after exactly one ledger entry has been written.
    /// `Err` means the ledger write itself failed.
    #[instrument(
        skip_all,
        fields(country = %request.country, price_ceiling = request.price_ceiling)
    )]
    pub async fn run_attempt(
        &self,
        slot: &SharedSlot,
        request: &AttemptRequest,
        cancel: &CancelToken,
    ) -> Result<AttemptReport, EnrollmentError> {
        let mut attempt = AccountAttempt::new(request);
        let attempt_id = attempt.id();
        info!(%attempt_id, "Starting attempt");

        // The slot stays locked until the ledger entry is written.
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = slot.lock() => Some(guard),
        };

        let result = match &guard {
            Some(slot) => {
                debug!(%attempt_id, slot_id = slot.id(), "Device slot acquired");
                self.drive(&mut attempt, slot, request, cancel).await
            }
            None => Err(Failure::cancelled()),
        };

        let entry = self.finalize(attempt, result).await;
        let report = AttemptReport::from_entry(&entry);

        if let Err(e) = self.ledger.record(entry).await {
            error!(%attempt_id, "Failed to record ledger entry: {}", e);
            return Err(e.into());
        }
        drop(guard);

        match report.outcome {
            Outcome::Success => info!(
                %attempt_id,
                cost = report.cost,
                partial = report.kind == Some(FailureKind::PartialSuccess),
                "Attempt succeeded"
            ),
            _ => warn!(
                %attempt_id,
                outcome = ?report.outcome,
                reason = ?report.reason,
                detail = report.detail.as_deref().unwrap_or(""),
                "Attempt did not succeed"
            ),
        }

        Ok(report)
    }

    async fn drive(
        &self,
        attempt: &mut AccountAttempt,
        slot: &DeviceSlot,
        request: &AttemptRequest,
        cancel: &CancelToken,
    ) -> Result<Materialized, Failure> {
        let device = slot.device();

        // Initializing -> DeviceReady
        step(
            cancel,
            self.step_deadline(),
            device.ensure_ready(),
            classify::device_readiness,
            || {
                classify::device_readiness(DeviceError::NotReady(
                    "readiness check timed out".into(),
                ))
            },
        )
        .await?;
        self.enter(attempt, AttemptState::DeviceReady)?;

        // DeviceReady -> NumberAcquired
        // A rental the broker completes after we stop waiting is never seen
        // here, so the entry says so.
        let rented = step(
            cancel,
            Instant::now() + self.config.rent_timeout,
            self.broker.rent(&request.country, request.price_ceiling),
            classify::rent,
            || {
                Failure::fatal(
                    FailureReason::NoNumberAvailable,
                    Some(format!("rent timed out; {}", UNTRACKED_RENTAL)),
                )
            },
        )
        .await
        .map_err(|mut f| {
            if f.is_cancelled() {
                f.detail = Some(format!("cancelled during rent; {}", UNTRACKED_RENTAL));
            }
            f
        })?;
        info!(
            attempt_id = %attempt.id(),
            number = %rented.number,
            cost = rented.cost,
            "Number rented"
        );
        let number = rented.number.clone();
        attempt.set_number(rented)?;
        self.enter(attempt, AttemptState::NumberAcquired)?;

        // NumberAcquired -> NumberSubmitted
        step(
            cancel,
            self.step_deadline(),
            device.submit_number(&number),
            classify::number_submission,
            || classify::step_timeout("number submission"),
        )
        .await?;
        self.enter(attempt, AttemptState::NumberSubmitted)?;

        let needs_email = step(
            cancel,
            self.step_deadline(),
            device.requires_email(),
            classify::device_fault,
            || classify::step_timeout("email prompt check"),
        )
        .await?;
        if needs_email {
            self.email_step(attempt, device, cancel).await?;
        }

        // AwaitingMessagingCode -> MessagingCodeEntered
        self.enter(attempt, AttemptState::AwaitingMessagingCode)?;
        let (source, code) = self.await_messaging_code(device, &number, cancel).await?;
        info!(attempt_id = %attempt.id(), ?source, "Verification code received");
        attempt.push_code(source, code.clone());

        step(
            cancel,
            self.step_deadline(),
            device.submit_code(&code),
            classify::code_entry,
            || classify::step_timeout("code submission"),
        )
        .await?;
        self.enter(attempt, AttemptState::MessagingCodeEntered)?;

        let prompted = step(
            cancel,
            self.step_deadline(),
            device.has_two_factor_prompt(),
            classify::device_fault,
            || classify::step_timeout("two-factor prompt check"),
        )
        .await?;
        if prompted {
            self.enter(attempt, AttemptState::AwaitingTwoFactor)?;
            self.two_factor_step(attempt, device, cancel).await?;
        }

        if let Some(name) = &request.display_name {
            let result = step(
                cancel,
                self.step_deadline(),
                device.set_display_name(name),
                classify::device_fault,
                || classify::step_timeout("display name"),
            )
            .await;
            match result {
                Ok(()) => debug!(attempt_id = %attempt.id(), "Display name set"),
                Err(f) if f.is_cancelled() => return Err(f),
                Err(f) => {
                    warn!(
                        attempt_id = %attempt.id(),
                        detail = ?f.detail,
                        "Display name step failed, continuing"
                    );
                    attempt.add_note(EntryNote::ProfileSetupFailed);
                }
            }
        }

        // DesktopLoginInProgress -> CredentialMaterialized
        self.enter(attempt, AttemptState::DesktopLoginInProgress)?;
        let desktop = self
            .desktop_login(slot.desktop(), &number, &code, attempt.id(), cancel)
            .await?;

        let materialized = self.materialize(attempt, desktop);
        self.enter(attempt, AttemptState::CredentialMaterialized)?;
        Ok(materialized)
    }

    #[instrument(skip_all, fields(attempt_id = %attempt.id()))]
    async fn email_step(
        &self,
        attempt: &mut AccountAttempt,
        device: &dyn DeviceMessenger,
        cancel: &CancelToken,
    ) -> Result<(), Failure> {
        self.enter(attempt, AttemptState::AwaitingEmail)?;

        let mail = self.mail.as_ref().ok_or_else(|| {
            Failure::fatal(
                FailureReason::MailboxUnavailable,
                Some("email requested but no mail provider configured".into()),
            )
        })?;

        let address = step(
            cancel,
            self.step_deadline(),
            mail.register_mailbox(),
            classify::mailbox_registration,
            || classify::step_timeout("mailbox registration"),
        )
        .await?;
        info!(mailbox = %address, "Mailbox registered");
        attempt.set_mailbox(address.clone());

        step(
            cancel,
            self.step_deadline(),
            device.submit_email(&address),
            classify::device_fault,
            || classify::step_timeout("email submission"),
        )
        .await?;

        let deadline = Instant::now() + self.config.email_timeout;
        let code = step(
            cancel,
            deadline,
            mail.await_confirmation_code(deadline),
            classify::email_code,
            || Failure::fatal(FailureReason::EmailTimeout, None),
        )
        .await?;
        attempt.push_code(CodeSource::Mail, code.clone());

        step(
            cancel,
            self.step_deadline(),
            device.submit_email_code(&code),
            classify::device_fault,
            || classify::step_timeout("email code submission"),
        )
        .await
    }

    /// Race the broker's SMS polling against the in-app code reader. The first
    /// code wins; this is the only point where two adapter calls for one
    /// attempt are in flight together.
    async fn await_messaging_code(
        &self,
        device: &dyn DeviceMessenger,
        number: &str,
        cancel: &CancelToken,
    ) -> Result<(CodeSource, String), Failure> {
        let deadline = Instant::now() + self.config.code_timeout;

        let sms = self.broker.poll_code(number, deadline);
        let in_app = device.read_incoming_code(deadline);
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(sms, in_app, expiry);

        let mut sms_done = false;
        let mut in_app_done = false;
        let mut fault: Option<String> = None;

        loop {
            if sms_done && in_app_done {
                return Err(match fault {
                    Some(detail) => Failure::fatal(FailureReason::AdapterFault, Some(detail)),
                    None => Failure::fatal(FailureReason::CodeTimeout, None),
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Failure::cancelled()),
                _ = &mut expiry => return Err(Failure::fatal(FailureReason::CodeTimeout, None)),
                result = &mut sms, if !sms_done => match result {
                    Ok(code) => return Ok((CodeSource::Sms, code)),
                    Err(e) => {
                        debug!("SMS code source finished without a code: {}", e);
                        sms_done = true;
                        if !matches!(e, BrokerError::CodeTimeout) {
                            fault = Some(e.to_string());
                        }
                    }
                },
                result = &mut in_app, if !in_app_done => match result {
                    Ok(code) => return Ok((CodeSource::InApp, code)),
                    Err(e) => {
                        debug!("In-app code source finished without a code: {}", e);
                        in_app_done = true;
                        if !matches!(e, DeviceError::CodeTimeout) {
                            fault = Some(e.to_string());
                        }
                    }
                },
            }
        }
    }

    async fn two_factor_step(
        &self,
        attempt: &mut AccountAttempt,
        device: &dyn DeviceMessenger,
        cancel: &CancelToken,
    ) -> Result<(), Failure> {
        let password = self.config.two_factor_password.as_ref().ok_or_else(|| {
            Failure::fatal(
                FailureReason::TwoFactorBlocked,
                Some("second factor requested but no password configured".into()),
            )
        })?;

        step(
            cancel,
            self.step_deadline(),
            device.submit_two_factor_password(password.expose_secret()),
            classify::two_factor,
            || classify::step_timeout("two-factor submission"),
        )
        .await?;
        attempt.mark_two_factor_used();
        info!(attempt_id = %attempt.id(), "Second factor accepted");
        Ok(())
    }

    /// Desktop login with a bounded number of tries and a fixed pause between
    /// them.
    #[instrument(skip(self, desktop, number, code, cancel))]
    async fn desktop_login(
        &self,
        desktop: &dyn DesktopMessenger,
        number: &str,
        code: &str,
        attempt_id: Uuid,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, Failure> {
        let tries = self.config.desktop_login_attempts.max(1);
        let mut last_detail = None;

        for n in 1..=tries {
            let result = step(
                cancel,
                Instant::now() + self.config.desktop_login_timeout,
                desktop.fresh_profile_login(number, code),
                classify::desktop_login,
                || {
                    Failure::new(
                        FailureReason::DesktopLoginFailed,
                        FailureKind::RetryableSubstep,
                        Some("desktop login timed out".into()),
                    )
                },
            )
            .await;

            match result {
                Ok(container) => {
                    info!(try_number = n, bytes = container.len(), "Desktop login succeeded");
                    return Ok(container);
                }
                Err(f) if f.is_cancelled() => return Err(f),
                Err(f) => {
                    warn!(try_number = n, tries, detail = ?f.detail, "Desktop login failed");
                    last_detail = f.detail;
                }
            }

            if n < tries {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Failure::cancelled()),
                    _ = tokio::time::sleep(self.config.desktop_retry_delay) => {}
                }
            }
        }

        Err(Failure::fatal(
            FailureReason::DesktopLoginFailed,
            Some(format!(
                "{} tries exhausted; last error: {}",
                tries,
                last_detail.unwrap_or_default()
            )),
        ))
    }

    /// Derive the triplet from the desktop container and the programmatic
    /// session from the triplet. Failures here keep the desktop container.
    fn materialize(&self, attempt: &mut AccountAttempt, desktop: Vec<u8>) -> Materialized {
        let secret = self.local_secret.expose_secret().as_bytes();

        let triplet = match decode_desktop_container(&desktop, secret) {
            Ok(t) => t,
            Err(e) => {
                warn!(
                    attempt_id = %attempt.id(),
                    "Desktop container not decodable, keeping it as the only artifact: {}", e
                );
                attempt.add_note(EntryNote::SiblingFormatUnavailable);
                return Materialized {
                    credential: Credential::from_desktop_only(desktop),
                    partial: Some(format!("desktop container not decodable: {}", e)),
                };
            }
        };

        let programmatic = encode_programmatic_container(&triplet, &self.client);
        let verified = decode_programmatic_container(&programmatic);
        let credential = Credential::from_triplet(triplet.clone()).with_desktop_container(desktop);

        let problem = match verified {
            Ok(t) if t == triplet => None,
            Ok(_) => Some("programmatic session does not match the desktop triplet".to_string()),
            Err(e) => Some(format!("programmatic session failed verification: {}", e)),
        };

        match problem {
            None => {
                info!(
                    attempt_id = %attempt.id(),
                    key_id = %triplet.auth_key.key_id(),
                    dc_id = triplet.dc_id,
                    user_id = triplet.user_id,
                    "Credential materialized"
                );
                Materialized {
                    credential: credential.with_programmatic_container(programmatic),
                    partial: None,
                }
            }
            Some(detail) => {
                warn!(attempt_id = %attempt.id(), "{}", detail);
                attempt.add_note(EntryNote::SiblingFormatUnavailable);
                Materialized {
                    credential,
                    partial: Some(detail),
                }
            }
        }
    }

    async fn finalize(
        &self,
        mut attempt: AccountAttempt,
        result: Result<Materialized, Failure>,
    ) -> LedgerEntry {
        let ban = matches!(&result, Err(f) if f.ban_number);
        let disposition = self.dispose_number(&mut attempt, ban).await;

        let fin = match result {
            Ok(m) => Finalization {
                outcome: Outcome::Success,
                reason: None,
                kind: m.partial.as_ref().map(|_| FailureKind::PartialSuccess),
                detail: m.partial,
                disposition,
                credential: Some(m.credential),
            },
            Err(f) => Finalization {
                outcome: if f.is_cancelled() {
                    Outcome::Aborted
                } else {
                    Outcome::Failed
                },
                reason: Some(f.reason),
                kind: Some(f.kind),
                detail: f.detail,
                disposition,
                credential: None,
            },
        };

        attempt.finalize(fin)
    }

    /// Release, ban or retain the rented number. Runs regardless of
    /// cancellation, bounded by the step timeout.
    async fn dispose_number(&self, attempt: &mut AccountAttempt, ban: bool) -> NumberDisposition {
        let number = match attempt.phone_number() {
            Some(n) => n.to_string(),
            None => return NumberDisposition::None,
        };

        let (disposition, result) = if ban {
            (
                NumberDisposition::Banned,
                timeout(self.config.step_timeout, self.broker.ban(&number)).await,
            )
        } else {
            match self.config.number_policy {
                NumberPolicy::Reusable => {
                    debug!(%number, "Retaining reusable number");
                    return NumberDisposition::Retained;
                }
                NumberPolicy::OneTime => (
                    NumberDisposition::Released,
                    timeout(self.config.step_timeout, self.broker.release(&number)).await,
                ),
            }
        };

        match result {
            Ok(Ok(())) => {
                debug!(%number, ?disposition, "Number handed back to broker");
                disposition
            }
            Ok(Err(e)) => {
                warn!(%number, "Failed to hand number back to broker: {}", e);
                attempt.add_note(EntryNote::NumberReleaseFailed);
                NumberDisposition::Retained
            }
            Err(_) => {
                warn!(%number, "Timed out handing number back to broker");
                attempt.add_note(EntryNote::NumberReleaseFailed);
                NumberDisposition::Retained
            }
        }
    }

    fn enter(&self, attempt: &mut AccountAttempt, state: AttemptState) -> Result<(), Failure> {
        attempt.advance(state)?;
        info!(attempt_id = %attempt.id(), ?state, "Attempt transition");
        Ok(())
    }

    fn step_deadline(&self) -> Instant {
        Instant::now() + self.config.step_timeout
    }
}

/// Await one adapter call with cancellation and a deadline, classifying the
/// outcome.
async fn step<T, E, F>(
    cancel: &CancelToken,
    deadline: Instant,
    fut: F,
    on_error: impl FnOnce(E) -> Failure,
    on_timeout: impl FnOnce() -> Failure,
) -> Result<T, Failure>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Failure::cancelled()),
        out = timeout_at(deadline, fut) => match out {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(on_error(e)),
            Err(_) => Err(on_timeout()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_step_maps_errors() {
        let cancel = CancelToken::never();
        let deadline = Instant::now() + Duration::from_secs(1);

        let ok: Result<u32, Failure> = step(
            &cancel,
            deadline,
            async { Ok::<_, DeviceError>(7) },
            classify::device_fault,
            || classify::step_timeout("t"),
        )
        .await;
        assert_eq!(ok.unwrap(), 7);

        let err = step(
            &cancel,
            deadline,
            async { Err::<u32, _>(DeviceError::CodeRejected) },
            classify::code_entry,
            || classify::step_timeout("t"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.reason, FailureReason::CodeRejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_deadline_expiry() {
        let cancel = CancelToken::never();
        let deadline = Instant::now() + Duration::from_secs(5);

        let err = step(
            &cancel,
            deadline,
            std::future::pending::<Result<(), DeviceError>>(),
            classify::device_fault,
            || Failure::fatal(FailureReason::CodeTimeout, None),
        )
        .await
        .unwrap_err();
        assert_eq!(err.reason, FailureReason::CodeTimeout);
    }

    #[tokio::test]
    async fn test_step_observes_cancellation() {
        let (handle, cancel) = crate::cancel::cancel_pair();
        handle.cancel();

        let err = step(
            &cancel,
            Instant::now() + Duration::from_secs(60),
            std::future::pending::<Result<(), DeviceError>>(),
            classify::device_fault,
            || classify::step_timeout("t"),
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
