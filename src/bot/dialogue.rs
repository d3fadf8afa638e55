//! Per-user dialogue state
//!
//! Each user has at most one pending continuation. The state lives behind a
//! per-user async mutex that is held for the whole update, so two messages
//! from the same user are handled one after the other.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::wallet::PendingImport;

/// What the next text message from the user answers
#[derive(Clone, Default)]
pub enum DialogueState {
    #[default]
    Idle,
    ImportKey,
    ImportPassword {
        private_key: String,
    },
    ChooseAccount {
        pending: PendingImport,
    },
    OrderPassword,
    AuthorizePassword,
    /// Password checked, waiting for a duration button
    AuthorizeDuration {
        password: String,
    },
    UnlockPassword,
    Transfer,
    BuyRam,
    RamOrder,
    /// Paid account creation, counting short passwords
    AccountPassword {
        failures: u32,
    },
}

impl DialogueState {
    pub fn is_idle(&self) -> bool {
        matches!(self, DialogueState::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DialogueState::Idle => "idle",
            DialogueState::ImportKey => "import_key",
            DialogueState::ImportPassword { .. } => "import_password",
            DialogueState::ChooseAccount { .. } => "choose_account",
            DialogueState::OrderPassword => "order_password",
            DialogueState::AuthorizePassword => "authorize_password",
            DialogueState::AuthorizeDuration { .. } => "authorize_duration",
            DialogueState::UnlockPassword => "unlock_password",
            DialogueState::Transfer => "transfer",
            DialogueState::BuyRam => "buy_ram",
            DialogueState::RamOrder => "ram_order",
            DialogueState::AccountPassword { .. } => "account_password",
        }
    }
}

/// Never prints keys or passwords
impl fmt::Debug for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Default)]
pub struct Dialogues {
    states: DashMap<i64, Arc<Mutex<DialogueState>>>,
}

impl Dialogues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the user's state until the guard drops
    pub async fn lock(&self, user_id: i64) -> OwnedMutexGuard<DialogueState> {
        let state = self
            .states
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(DialogueState::Idle)))
            .clone();
        state.lock_owned().await
    }

    /// Forget idle users nobody is waiting on; returns how many were dropped
    pub fn prune_idle(&self) -> usize {
        let before = self.states.len();
        self.states.retain(|_, state| {
            if Arc::strong_count(state) > 1 {
                return true;
            }
            match state.try_lock() {
                Ok(guard) => !guard.is_idle(),
                Err(_) => true,
            }
        });
        before.saturating_sub(self.states.len())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
