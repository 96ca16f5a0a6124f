//! In-memory [`DirectoryStore`].

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::{ActiveUser, DirectoryError, DirectoryStore, LoginRecord, UserStats};

#[derive(Debug)]
struct UserRecord {
    last_login: SystemTime,
    sent: u64,
    received: u64,
    contacts: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    users: BTreeMap<String, UserRecord>,
    active: BTreeMap<String, ActiveUser>,
    history: Vec<LoginRecord>,
}

/// A [`DirectoryStore`] that keeps everything in process memory.
///
/// All state sits behind one lock, so every call is atomic with respect
/// to every other. Nothing survives a restart, and a fresh store has no
/// active users.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: Mutex<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock can't leave the maps half-updated
        // in a way that matters here, so keep serving.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DirectoryStore for MemoryDirectory {
    fn record_login(
        &self,
        name: &str,
        addr: IpAddr,
        port: u16,
    ) -> Result<(), DirectoryError> {
        let now = SystemTime::now();
        let mut inner = self.lock();

        inner
            .users
            .entry(name.to_string())
            .and_modify(|user| user.last_login = now)
            .or_insert_with(|| UserRecord {
                last_login: now,
                sent: 0,
                received: 0,
                contacts: BTreeSet::new(),
            });
        inner.active.insert(
            name.to_string(),
            ActiveUser {
                name: name.to_string(),
                addr,
                port,
                since: now,
            },
        );
        inner.history.push(LoginRecord {
            name: name.to_string(),
            addr,
            port,
            at: now,
        });

        tracing::debug!(name, %addr, port, "login recorded");
        Ok(())
    }

    fn record_logout(&self, name: &str) -> Result<(), DirectoryError> {
        let mut inner = self.lock();
        if !inner.users.contains_key(name) {
            return Err(DirectoryError::UnknownUser(name.to_string()));
        }
        inner.active.remove(name);
        tracing::debug!(name, "logout recorded");
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<String>, DirectoryError> {
        Ok(self.lock().users.keys().cloned().collect())
    }

    fn list_active_users(&self) -> Result<Vec<ActiveUser>, DirectoryError> {
        Ok(self.lock().active.values().cloned().collect())
    }

    fn login_history(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<LoginRecord>, DirectoryError> {
        let inner = self.lock();
        Ok(inner
            .history
            .iter()
            .filter(|record| name.is_none_or(|n| record.name == n))
            .cloned()
            .collect())
    }

    fn add_contact(&self, owner: &str, contact: &str) -> Result<(), DirectoryError> {
        let mut inner = self.lock();
        if !inner.users.contains_key(contact) {
            return Err(DirectoryError::UnknownUser(contact.to_string()));
        }
        let user = inner
            .users
            .get_mut(owner)
            .ok_or_else(|| DirectoryError::UnknownUser(owner.to_string()))?;
        user.contacts.insert(contact.to_string());
        Ok(())
    }

    fn remove_contact(
        &self,
        owner: &str,
        contact: &str,
    ) -> Result<(), DirectoryError> {
        let mut inner = self.lock();
        let user = inner
            .users
            .get_mut(owner)
            .ok_or_else(|| DirectoryError::UnknownUser(owner.to_string()))?;
        user.contacts.remove(contact);
        Ok(())
    }

    fn list_contacts(&self, owner: &str) -> Result<Vec<String>, DirectoryError> {
        let inner = self.lock();
        let user = inner
            .users
            .get(owner)
            .ok_or_else(|| DirectoryError::UnknownUser(owner.to_string()))?;
        Ok(user.contacts.iter().cloned().collect())
    }

    fn record_message(
        &self,
        sender: &str,
        recipient: &str,
    ) -> Result<(), DirectoryError> {
        let mut inner = self.lock();
        let user = inner
            .users
            .get_mut(sender)
            .ok_or_else(|| DirectoryError::UnknownUser(sender.to_string()))?;
        user.sent += 1;
        // Messages to someone who never logged in still count as sent.
        if let Some(user) = inner.users.get_mut(recipient) {
            user.received += 1;
        }
        Ok(())
    }

    fn message_stats(&self) -> Result<Vec<UserStats>, DirectoryError> {
        let inner = self.lock();
        Ok(inner
            .users
            .iter()
            .map(|(name, user)| UserStats {
                name: name.clone(),
                last_login: user.last_login,
                sent: user.sent,
                received: user.received,
            })
            .collect())
    }
}
