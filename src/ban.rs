//! Identity/IP ban registry (spec §4.3).
//!
//! Reader-writer locked rather than actor-owned: `check` is the hottest
//! path in the system (called before every join and before every
//! authentication completes) and spec §5 explicitly calls this component
//! out as RwLock-protected, not message-passed, unlike Room/RoomRegistry.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use actix::Addr;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::session::{SessionManager, TerminateBanned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanKind {
    ByUserId,
    ByIp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanEntry {
    pub kind: BanKind,
    pub target: String,
    /// Absolute expiry, monotonic-clock based for lazy purge; `None` means permanent.
    #[serde(skip)]
    expires_at: Option<Instant>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub enum BanCheck {
    Allowed,
    Denied {
        reason: &'static str,
        expires_in: Option<Duration>,
    },
}

#[derive(Default)]
struct BanState {
    by_user: HashMap<UserId, BanEntry>,
    by_ip: HashMap<String, BanEntry>,
    whitelist_ids: HashSet<UserId>,
    whitelist_ips: HashSet<String>,
}

impl BanState {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.by_user.retain(|_, e| e.expires_at.map_or(true, |exp| exp > now));
        self.by_ip.retain(|_, e| e.expires_at.map_or(true, |exp| exp > now));
    }
}

/// Process-wide ban state, shared behind an `Arc` clone-per-actor.
#[derive(Clone, Default)]
pub struct BanRegistry {
    state: std::sync::Arc<RwLock<BanState>>,
}

impl BanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, user_id: UserId, ip: &str) -> BanCheck {
        let mut state = self.state.write();
        state.purge_expired();
        if state.whitelist_ids.contains(&user_id) || state.whitelist_ips.contains(ip) {
            return BanCheck::Allowed;
        }
        let now = Instant::now();
        if let Some(entry) = state.by_user.get(&user_id) {
            return BanCheck::Denied {
                reason: "banned identity",
                expires_in: entry.expires_at.map(|exp| exp.saturating_duration_since(now)),
            };
        }
        if let Some(entry) = state.by_ip.get(ip) {
            return BanCheck::Denied {
                reason: "banned address",
                expires_in: entry.expires_at.map(|exp| exp.saturating_duration_since(now)),
            };
        }
        BanCheck::Allowed
    }

    /// Adds a ban entry and signals the session manager to terminate any
    /// live sessions matching it. Delivery is at-least-once (a best-effort
    /// actor message send); duplicate terminations are harmless since
    /// `Session::handle::<Stop>` is idempotent.
    pub fn add(&self, kind: BanKind, target: String, ttl: Option<Duration>, reason: String, sessions: &Addr<SessionManager>) {
        let entry = BanEntry {
            kind,
            target: target.clone(),
            expires_at: ttl.map(|d| Instant::now() + d),
            reason,
        };
        {
            let mut state = self.state.write();
            match kind {
                BanKind::ByUserId => {
                    if let Ok(uid) = target.parse::<UserId>() {
                        state.by_user.insert(uid, entry);
                    }
                }
                BanKind::ByIp => {
                    state.by_ip.insert(target.clone(), entry);
                }
            }
        }
        sessions.do_send(TerminateBanned { kind, target });
    }

    pub fn remove(&self, kind: BanKind, target: &str) {
        let mut state = self.state.write();
        match kind {
            BanKind::ByUserId => {
                if let Ok(uid) = target.parse::<UserId>() {
                    state.by_user.remove(&uid);
                }
            }
            BanKind::ByIp => {
                state.by_ip.remove(target);
            }
        }
    }

    pub fn list(&self) -> Vec<BanEntry> {
        let mut state = self.state.write();
        state.purge_expired();
        state
            .by_user
            .values()
            .chain(state.by_ip.values())
            .cloned()
            .collect()
    }

    pub fn set_whitelists(&self, ids: HashSet<UserId>, ips: HashSet<String>) {
        let mut state = self.state.write();
        state.whitelist_ids = ids;
        state.whitelist_ips = ips;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_ban_same_final_state() {
        let registry = BanRegistry::new();
        registry.state.write().by_user.insert(
            7,
            BanEntry {
                kind: BanKind::ByUserId,
                target: "7".into(),
                expires_at: None,
                reason: "spam".into(),
            },
        );
        let before = registry.list().len();
        registry.state.write().by_user.insert(
            7,
            BanEntry {
                kind: BanKind::ByUserId,
                target: "7".into(),
                expires_at: None,
                reason: "spam".into(),
            },
        );
        assert_eq!(before, registry.list().len());
    }

    #[test]
    fn whitelist_overrides_ban() {
        let registry = BanRegistry::new();
        registry.state.write().by_user.insert(
            7,
            BanEntry {
                kind: BanKind::ByUserId,
                target: "7".into(),
                expires_at: None,
                reason: "spam".into(),
            },
        );
        let mut ids = HashSet::new();
        ids.insert(7);
        registry.set_whitelists(ids, HashSet::new());
        assert!(matches!(registry.check(7, "1.2.3.4"), BanCheck::Allowed));
    }
}
