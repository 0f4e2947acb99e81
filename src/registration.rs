//! Bottle registration: bind a name to a tag only after it has been read
//! several times in a row.
//!
//! ```text
//!            start              read A             A x threshold
//! Inactive ───────▶ Awaiting ─────────▶ Confirming ─────────────▶ Ready
//!    ▲                                   │    ▲                     │
//!    │                             read B│    │                     │
//!    │                                   └────┘  (restart on B)     │
//!    └──────────────── cancel (any state) / confirm (Ready) ◀───────┘
//! ```

use log::info;
use serde::Serialize;

use crate::types::TrackerError;

/// Consecutive identical reads before a tag may be named
pub const DEFAULT_CONFIRM_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegistrationState {
    Inactive,
    /// Active, no tag read yet
    Awaiting,
    Confirming { epc: String, count: u32 },
    /// `count` keeps growing while the same tag stays in range
    Ready { epc: String, count: u32 },
}

#[derive(Debug)]
pub struct Registration {
    state: RegistrationState,
    threshold: u32,
}

impl Default for Registration {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRM_THRESHOLD)
    }
}

impl Registration {
    /// A threshold of zero is treated as one
    pub fn new(threshold: u32) -> Self {
        Self {
            state: RegistrationState::Inactive,
            threshold: threshold.max(1),
        }
    }

    /// Begin (or restart) a session with no target
    pub fn start(&mut self) {
        self.state = RegistrationState::Awaiting;
        info!(">>> Registration mode activated <<<");
    }

    pub fn cancel(&mut self) {
        if self.is_active() {
            info!("Registration cancelled");
        }
        self.state = RegistrationState::Inactive;
    }

    /// Count one read of `epc`; ignored while inactive
    pub fn observe(&mut self, epc: &str) -> &RegistrationState {
        let (target, count) = match &self.state {
            RegistrationState::Inactive => return &self.state,
            RegistrationState::Awaiting => {
                info!(">>> Tag detected: {} (1/{})", epc, self.threshold);
                (epc.to_string(), 1)
            }
            RegistrationState::Confirming { epc: target, count }
            | RegistrationState::Ready { epc: target, count } => {
                if target == epc {
                    (epc.to_string(), count + 1)
                } else {
                    info!(">>> Different tag detected: {}, restarting (1/{})", epc, self.threshold);
                    (epc.to_string(), 1)
                }
            }
        };

        self.state = if count >= self.threshold {
            if count == self.threshold {
                info!(">>> Tag {} ready for naming <<<", target);
            }
            RegistrationState::Ready { epc: target, count }
        } else {
            if count > 1 {
                info!(">>> Confirmation: {}/{}", count, self.threshold);
            }
            RegistrationState::Confirming { epc: target, count }
        };
        &self.state
    }

    /// Name the confirmed tag.
    ///
    /// `epc`, when given, must match the confirmed tag (case-insensitive).
    /// `persist` stores the name; the session only ends if it succeeds. On any
    /// error the state is left untouched. Returns the EPC that was named.
    pub fn confirm<F>(&mut self, name: &str, epc: Option<&str>, persist: F) -> Result<String, TrackerError>
    where
        F: FnOnce(&str, &str) -> Result<(), TrackerError>,
    {
        let RegistrationState::Ready { epc: target, .. } = &self.state else {
            return Err(TrackerError::NotReady);
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackerError::EmptyName);
        }
        if let Some(requested) = epc.filter(|e| !e.is_empty()) {
            if !requested.eq_ignore_ascii_case(target) {
                return Err(TrackerError::EpcMismatch {
                    expected: target.clone(),
                    got: requested.to_string(),
                });
            }
        }

        let target = target.clone();
        persist(&target, name)?;
        self.state = RegistrationState::Inactive;
        info!("Tag registered: {} as '{}'", target, name);
        Ok(target)
    }

    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_active(&self) -> bool {
        self.state != RegistrationState::Inactive
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, RegistrationState::Ready { .. })
    }

    /// Tag currently being confirmed
    pub fn target(&self) -> Option<&str> {
        match &self.state {
            RegistrationState::Confirming { epc, .. } | RegistrationState::Ready { epc, .. } => {
                Some(epc)
            }
            _ => None,
        }
    }

    /// Consecutive reads of the target so far
    pub fn progress(&self) -> u32 {
        match self.state {
            RegistrationState::Confirming { count, .. } | RegistrationState::Ready { count, .. } => {
                count
            }
            _ => 0,
        }
    }
}
