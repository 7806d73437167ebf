//! Live sessions indexed by id and invite code

use crate::config::GameConfig;
use crate::session::Session;
use log::info;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type SharedSession = Arc<Mutex<Session>>;

/// Invite code characters: ASCII letters and digits without the easily
/// confused `0 1 i I l L o O`.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";
const CODE_LEN: usize = 4;
const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("failed to generate a unique invite code after {0} attempts")]
    CodesExhausted(usize),
}

pub fn generate_invite_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .filter_map(|_| CODE_ALPHABET.choose(rng).map(|b| char::from(*b)))
        .collect()
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SharedSession>,
    codes: HashMap<String, SessionId>,
    next_id: SessionId,
}

/// Creates sessions and resolves invite codes to them
///
/// Each session gets a food seed derived from `seed_base` and its id, so a
/// fixed configured seed makes every match reproducible.
pub struct SessionRegistry {
    config: GameConfig,
    seed_base: u64,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(config: GameConfig) -> Self {
        let seed_base = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        Self {
            config,
            seed_base,
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
        }
    }

    /// Creates a waiting session under a fresh invite code.
    pub fn create(&self) -> Result<SharedSession, RegistryError> {
        let mut inner = self.inner.lock();
        let mut rng = rand::thread_rng();
        let code = (0..CODE_ATTEMPTS)
            .map(|_| generate_invite_code(&mut rng))
            .find(|code| !inner.codes.contains_key(code))
            .ok_or(RegistryError::CodesExhausted(CODE_ATTEMPTS))?;

        let id = inner.next_id;
        inner.next_id += 1;
        let seed = self.seed_base.wrapping_add(id);
        let session = Arc::new(Mutex::new(Session::new(
            id,
            code.clone(),
            self.config.clone(),
            seed,
        )));
        inner.codes.insert(code.clone(), id);
        inner.sessions.insert(id, Arc::clone(&session));

        info!("Created session {} with code {:?}", id, code);
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    /// Codes are case-sensitive.
    pub fn find_by_code(&self, code: &str) -> Option<SharedSession> {
        let inner = self.inner.lock();
        inner
            .codes
            .get(code)
            .and_then(|id| inner.sessions.get(id))
            .cloned()
    }

    pub fn remove(&self, id: SessionId) -> Option<SharedSession> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.remove(&id)?;
        inner.codes.retain(|_, session_id| *session_id != id);
        info!("Removed session {}", id);
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }
}
