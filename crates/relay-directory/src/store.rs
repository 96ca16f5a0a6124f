//! The directory trait and the records it hands out.

use std::net::IpAddr;
use std::time::SystemTime;

use crate::DirectoryError;

/// A user who is logged in right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUser {
    pub name: String,
    pub addr: IpAddr,
    pub port: u16,
    /// When this login started.
    pub since: SystemTime,
}

/// One entry of the append-only login history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub name: String,
    pub addr: IpAddr,
    pub port: u16,
    pub at: SystemTime,
}

/// Per-user activity counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStats {
    pub name: String,
    pub last_login: SystemTime,
    pub sent: u64,
    pub received: u64,
}

/// Persistent storage for user identity, login history and contacts.
///
/// Calls are synchronous and expected to be fast; the router invokes them
/// inline during a dispatch cycle.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one store is shared (behind an `Arc`)
/// by the session registry, the router task and whoever observes the
/// server from outside.
pub trait DirectoryStore: Send + Sync + 'static {
    /// Records a login: creates the user on first sight, marks them
    /// active, appends to the history.
    fn record_login(
        &self,
        name: &str,
        addr: IpAddr,
        port: u16,
    ) -> Result<(), DirectoryError>;

    /// Clears the user's active entry. The user record stays.
    fn record_logout(&self, name: &str) -> Result<(), DirectoryError>;

    /// Every user that has ever logged in, sorted by name.
    fn list_users(&self) -> Result<Vec<String>, DirectoryError>;

    /// Users currently logged in, sorted by name.
    fn list_active_users(&self) -> Result<Vec<ActiveUser>, DirectoryError>;

    /// Login history, oldest first, optionally for one user only.
    fn login_history(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<LoginRecord>, DirectoryError>;

    /// Adds `contact` to `owner`'s list. Both must be known users;
    /// adding an existing contact is a no-op.
    fn add_contact(&self, owner: &str, contact: &str) -> Result<(), DirectoryError>;

    /// Removes `contact` from `owner`'s list. Removing a contact that
    /// isn't there is a no-op.
    fn remove_contact(&self, owner: &str, contact: &str)
    -> Result<(), DirectoryError>;

    /// `owner`'s contacts, sorted by name.
    fn list_contacts(&self, owner: &str) -> Result<Vec<String>, DirectoryError>;

    /// Counts one message from `sender` to `recipient`.
    fn record_message(&self, sender: &str, recipient: &str)
    -> Result<(), DirectoryError>;

    /// Activity counters for every known user, sorted by name.
    fn message_stats(&self) -> Result<Vec<UserStats>, DirectoryError>;
}
