//! Headless passcode flows
//!
//! Each flow is a small state machine a UI drives by submitting entered
//! strings. The flow answers with the next [`FlowStep`]: which prompt to
//! show, whether the last entry was rejected, and whether it is done.
//!
//! | flow               | steps                                   | on completion |
//! |--------------------|-----------------------------------------|---------------|
//! | [`CreateFlow`]     | enter, verify                           | `create`      |
//! | [`ChangeFlow`]     | enter old, enter new, verify new        | `change`      |
//! | [`RemoveFlow`]     | enter                                   | `remove`      |
//! | [`AuthenticateFlow`] | enter (repeated), optional biometrics | unlocked      |
//!
//! [`run_flow`] connects a flow to a [`PasscodePrompter`] and stops early
//! when the prompter or a [`CancelToken`] cancels.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::cancel::CancelToken;
use crate::controller::PasscodeController;
use crate::error::Result;

/// Message shown when an entry is rejected
pub const MISMATCH_MESSAGE: &str = "Passcodes don't match. Try again.";

/// What the UI should ask for next
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Prompt {
    EnterPasscode,
    VerifyPasscode,
    EnterNewPasscode,
    VerifyNewPasscode,
}

impl Prompt {
    /// Default English prompt text
    pub fn message(&self) -> &'static str {
        match self {
            Prompt::EnterPasscode => "Enter your passcode",
            Prompt::VerifyPasscode => "Verify your passcode",
            Prompt::EnterNewPasscode => "Enter new passcode",
            Prompt::VerifyNewPasscode => "Verify new passcode",
        }
    }
}

/// State of a flow after an entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowStep {
    /// Prompt to show next
    pub prompt: Prompt,
    /// The previous entry was rejected
    pub mismatch: bool,
    /// The flow has completed its operation
    pub finished: bool,
}

impl FlowStep {
    fn ask(prompt: Prompt, mismatch: bool) -> Self {
        Self {
            prompt,
            mismatch,
            finished: false,
        }
    }

    fn done(prompt: Prompt) -> Self {
        Self {
            prompt,
            mismatch: false,
            finished: true,
        }
    }
}

/// A prompt-driven passcode flow
#[async_trait]
pub trait Flow: Send {
    /// Current step without submitting anything
    fn current(&self) -> FlowStep;

    /// Hook run once before the first prompt
    async fn start(&mut self) -> Result<FlowStep> {
        Ok(self.current())
    }

    /// Submit one entered string
    async fn submit(&mut self, entry: &str) -> Result<FlowStep>;
}

/// Something a lock screen can unlock
#[async_trait]
pub trait LockTarget: Send + Sync {
    /// Authenticate with a code, or with biometrics when `code` is `None`
    async fn authenticate(&self, code: Option<&str>) -> Result<bool>;

    /// Whether the biometric path should be offered
    fn biometrics_enabled(&self) -> bool;
}

#[async_trait]
impl LockTarget for PasscodeController {
    async fn authenticate(&self, code: Option<&str>) -> Result<bool> {
        PasscodeController::authenticate(self, code).await
    }

    fn biometrics_enabled(&self) -> bool {
        self.biometrics().is_enabled()
    }
}

/// Collaborator collecting typed strings from the user
#[async_trait]
pub trait PasscodePrompter: Send + Sync {
    /// Ask for an entry; `None` means the user cancelled
    async fn prompt(&self, step: &FlowStep) -> Option<String>;
}

/// Result of [`run_flow`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowOutcome {
    /// The flow reached its finished step
    pub confirmed: bool,
}

/// Drive `flow` with `prompter` until it finishes or is cancelled
pub async fn run_flow<F, P>(flow: &mut F, prompter: &P, cancel: &CancelToken) -> Result<FlowOutcome>
where
    F: Flow + ?Sized,
    P: PasscodePrompter + ?Sized,
{
    let mut step = flow.start().await?;

    while !step.finished {
        if cancel.is_cancelled() {
            debug!("Flow cancelled before prompt");
            return Ok(FlowOutcome { confirmed: false });
        }

        let entry = tokio::select! {
            _ = cancel.cancelled() => None,
            entry = prompter.prompt(&step) => entry,
        };

        let entry = match entry {
            Some(entry) => Zeroizing::new(entry),
            None => {
                debug!("Flow cancelled at {:?}", step.prompt);
                return Ok(FlowOutcome { confirmed: false });
            }
        };

        step = flow.submit(&entry).await?;
    }

    Ok(FlowOutcome { confirmed: true })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CreateState {
    EnterCode,
    VerifyCode,
    Finished,
}

/// Enter a new code twice, then `create`
pub struct CreateFlow {
    controller: Arc<PasscodeController>,
    state: CreateState,
    pending: Option<Zeroizing<String>>,
    mismatch: bool,
}

impl CreateFlow {
    pub fn new(controller: Arc<PasscodeController>) -> Self {
        Self {
            controller,
            state: CreateState::EnterCode,
            pending: None,
            mismatch: false,
        }
    }
}

#[async_trait]
impl Flow for CreateFlow {
    fn current(&self) -> FlowStep {
        match self.state {
            CreateState::EnterCode => FlowStep::ask(Prompt::EnterPasscode, self.mismatch),
            CreateState::VerifyCode => FlowStep::ask(Prompt::VerifyPasscode, self.mismatch),
            CreateState::Finished => FlowStep::done(Prompt::VerifyPasscode),
        }
    }

    async fn submit(&mut self, entry: &str) -> Result<FlowStep> {
        match self.state {
            CreateState::EnterCode => {
                self.pending = Some(Zeroizing::new(entry.to_string()));
                self.mismatch = false;
                self.state = CreateState::VerifyCode;
            }
            CreateState::VerifyCode => {
                let matched = self.pending.as_deref().map(String::as_str) == Some(entry);
                if matched {
                    self.controller.create(entry)?;
                    self.pending = None;
                    self.state = CreateState::Finished;
                } else {
                    self.pending = None;
                    self.mismatch = true;
                    self.state = CreateState::EnterCode;
                }
            }
            CreateState::Finished => {}
        }
        Ok(self.current())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChangeState {
    EnterOld,
    EnterNew,
    VerifyNew,
    Finished,
}

/// Confirm the current code, then enter the new one twice and `change`
pub struct ChangeFlow {
    controller: Arc<PasscodeController>,
    state: ChangeState,
    pending: Option<Zeroizing<String>>,
    mismatch: bool,
}

impl ChangeFlow {
    pub fn new(controller: Arc<PasscodeController>) -> Self {
        Self {
            controller,
            state: ChangeState::EnterOld,
            pending: None,
            mismatch: false,
        }
    }
}

#[async_trait]
impl Flow for ChangeFlow {
    fn current(&self) -> FlowStep {
        match self.state {
            ChangeState::EnterOld => FlowStep::ask(Prompt::EnterPasscode, self.mismatch),
            ChangeState::EnterNew => FlowStep::ask(Prompt::EnterNewPasscode, self.mismatch),
            ChangeState::VerifyNew => FlowStep::ask(Prompt::VerifyNewPasscode, self.mismatch),
            ChangeState::Finished => FlowStep::done(Prompt::VerifyNewPasscode),
        }
    }

    async fn submit(&mut self, entry: &str) -> Result<FlowStep> {
        match self.state {
            ChangeState::EnterOld => {
                let authenticated = self.controller.authenticate(Some(entry)).await?;
                self.mismatch = !authenticated;
                if authenticated {
                    self.state = ChangeState::EnterNew;
                }
            }
            ChangeState::EnterNew => {
                self.pending = Some(Zeroizing::new(entry.to_string()));
                self.mismatch = false;
                self.state = ChangeState::VerifyNew;
            }
            ChangeState::VerifyNew => {
                let matched = self.pending.as_deref().map(String::as_str) == Some(entry);
                if matched {
                    if !self.controller.change(entry)? {
                        warn!("Passcode {} was removed during change", self.controller.key());
                    }
                    self.pending = None;
                    self.mismatch = false;
                    self.state = ChangeState::Finished;
                } else {
                    self.mismatch = true;
                }
            }
            ChangeState::Finished => {}
        }
        Ok(self.current())
    }
}

/// Confirm the current code, then `remove`
pub struct RemoveFlow {
    controller: Arc<PasscodeController>,
    mismatch: bool,
    finished: bool,
}

impl RemoveFlow {
    pub fn new(controller: Arc<PasscodeController>) -> Self {
        Self {
            controller,
            mismatch: false,
            finished: false,
        }
    }
}

#[async_trait]
impl Flow for RemoveFlow {
    fn current(&self) -> FlowStep {
        if self.finished {
            FlowStep::done(Prompt::EnterPasscode)
        } else {
            FlowStep::ask(Prompt::EnterPasscode, self.mismatch)
        }
    }

    async fn submit(&mut self, entry: &str) -> Result<FlowStep> {
        if self.finished {
            return Ok(self.current());
        }
        if self.controller.authenticate(Some(entry)).await? {
            self.controller.remove()?;
            self.mismatch = false;
            self.finished = true;
        } else {
            self.mismatch = true;
        }
        Ok(self.current())
    }
}

/// Lock screen: repeat entry until the code (or biometrics) succeeds
pub struct AuthenticateFlow {
    target: Arc<dyn LockTarget>,
    mismatch: bool,
    finished: bool,
}

impl AuthenticateFlow {
    pub fn new(target: Arc<dyn LockTarget>) -> Self {
        Self {
            target,
            mismatch: false,
            finished: false,
        }
    }

    /// Try the biometric path when enabled
    ///
    /// Challenge errors fall back to code entry and are only logged.
    pub async fn try_biometrics(&mut self) -> FlowStep {
        if !self.finished && self.target.biometrics_enabled() {
            match self.target.authenticate(None).await {
                Ok(authenticated) => self.finished = authenticated,
                Err(e) => debug!("Biometric unlock unavailable, falling back to code: {}", e),
            }
        }
        self.current()
    }

    pub fn is_unlocked(&self) -> bool {
        self.finished
    }
}

#[async_trait]
impl Flow for AuthenticateFlow {
    fn current(&self) -> FlowStep {
        if self.finished {
            FlowStep::done(Prompt::EnterPasscode)
        } else {
            FlowStep::ask(Prompt::EnterPasscode, self.mismatch)
        }
    }

    async fn start(&mut self) -> Result<FlowStep> {
        Ok(self.try_biometrics().await)
    }

    async fn submit(&mut self, entry: &str) -> Result<FlowStep> {
        if self.finished {
            return Ok(self.current());
        }
        let authenticated = self.target.authenticate(Some(entry)).await?;
        self.mismatch = !authenticated;
        self.finished = authenticated;
        Ok(self.current())
    }
}
