//! Session / identity rotation.
//!
//! A session binds an egress identity and a user agent. All workers share a
//! single current session; once it has served `page_limit` pages the next
//! acquisition replaces it. Bounding pages per identity bounds how much
//! fingerprint history any one proxy/user-agent pair accumulates, at the cost
//! of concurrent workers sharing the pair while it is current.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

use crate::models::{Identity, SessionLease};
use crate::traits::IdentityProvider;

/// Desktop Firefox user agents, matching the engine the browser fetcher's
/// stealth profile imitates.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.5; rv:127.0) Gecko/20100101 Firefox/127.0",
];

#[derive(Debug)]
struct Session {
    id: String,
    identity: Identity,
    user_agent: String,
    pages_served: u32,
}

impl Session {
    fn lease(&self) -> SessionLease {
        SessionLease {
            session_id: self.id.clone(),
            identity: self.identity.clone(),
            user_agent: self.user_agent.clone(),
            page_number: self.pages_served,
        }
    }
}

#[derive(Debug)]
struct RotatorInner {
    current: Option<Session>,
    rng: StdRng,
    minted: u64,
}

/// Thread-safe owner of the single current session.
pub struct SessionRotator<P> {
    page_limit: u32,
    user_agents: Arc<Vec<String>>,
    provider: Arc<P>,
    inner: Arc<Mutex<RotatorInner>>,
}

impl<P> Clone for SessionRotator<P> {
    fn clone(&self) -> Self {
        Self {
            page_limit: self.page_limit,
            user_agents: Arc::clone(&self.user_agents),
            provider: Arc::clone(&self.provider),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: IdentityProvider> SessionRotator<P> {
    /// `seed` makes user-agent choice and session ids reproducible.
    pub fn new(provider: P, page_limit: u32, user_agents: Vec<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let user_agents = if user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            user_agents
        };
        Self {
            page_limit: page_limit.max(1),
            user_agents: Arc::new(user_agents),
            provider: Arc::new(provider),
            inner: Arc::new(Mutex::new(RotatorInner {
                current: None,
                rng,
                minted: 0,
            })),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, RotatorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned session mutex");
            poisoned.into_inner()
        })
    }

    /// Leases the current session for one dispatch, rotating first if it has
    /// already served `page_limit` pages. Check, rotation and increment
    /// happen under one lock.
    pub fn acquire(&self) -> SessionLease {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;
        let session = match inner.current.take() {
            Some(s) if s.pages_served < self.page_limit => inner.current.insert(s),
            retired => {
                let fresh = self.mint(inner, retired.as_ref());
                inner.current.insert(fresh)
            }
        };
        session.pages_served += 1;
        session.lease()
    }

    /// The current session without consuming a page. Mints one if none
    /// exists yet.
    pub fn peek(&self) -> SessionLease {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;
        match inner.current.take() {
            Some(s) => inner.current.insert(s).lease(),
            None => {
                let fresh = self.mint(inner, None);
                inner.current.insert(fresh).lease()
            }
        }
    }

    /// Number of sessions created so far.
    pub fn sessions_minted(&self) -> u64 {
        self.lock_inner().minted
    }

    /// Pages served by the current session.
    #[cfg(test)]
    pub fn current_pages_served(&self) -> u32 {
        self.lock_inner()
            .current
            .as_ref()
            .map_or(0, |s| s.pages_served)
    }

    fn mint(&self, inner: &mut RotatorInner, retired: Option<&Session>) -> Session {
        inner.minted += 1;
        let id = format!("session_{}_{:08x}", inner.minted, inner.rng.next_u32());
        let user_agent = self
            .user_agents
            .choose(&mut inner.rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENTS[0].to_string());
        let identity = self.provider.new_identity(&id);

        match retired {
            Some(old) => tracing::info!(
                retired = %old.id,
                pages_served = old.pages_served,
                session = %id,
                identity = %identity,
                "Rotating session"
            ),
            None => tracing::info!(session = %id, identity = %identity, "Starting first session"),
        }

        Session {
            id,
            identity,
            user_agent,
            pages_served: 0,
        }
    }
}
