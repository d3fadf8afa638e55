//! Custodial wallet management
//!
//! Provides encrypted key storage with session-gated signing:
//! - Key vault (password-derived AES encryption at rest)
//! - Session authorization (time-boxed in-memory keys)
//! - Credential management (import, account orders, deletion)
//! - Fund-moving operations (transfer, RAM purchase, account creation)
//!
//! # Architecture
//!
//! ```text
//! CredentialManager ──→ vault
//!        │
//! SessionManager ──→ SessionStore
//!        ↑
//! WalletOperations ──→ AccountLocks ──→ ChainClient
//! ```
//!
//! # Security
//!
//! Decrypted keys live only in the session store:
//! - Never written to the database
//! - Dropped on expiry, revoke or restart
//! - Required by every signing operation

pub mod credentials;
pub mod operations;
pub mod session;
pub mod vault;

pub use credentials::{
    AccountOrderTicket, AccountProfile, Activation, CredentialManager, ImportOutcome, PendingImport,
    WalletOverview,
};
pub use operations::{AccountLocks, CreatedAccount, RamPurchaser, WalletOperations};
pub use session::{
    Clock, ManualClock, MemorySessionStore, SessionEntry, SessionManager, SessionStore, SystemClock,
};
