use std::{
    collections::HashSet,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use lru::LruCache;
use pki_logger::{debug, info, trace, warn};

use crate::{
    HError, HResult, KeyIdentifier, Mechanism, MechanismParams, ModuleConfig, ObjectHandle,
    PooledSession, PublicKeyInfo, RawSession, SessionPool, SlotBackend, SlotIdentifier,
};

const OBJECT_HANDLES_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(size) => size,
    None => NonZeroUsize::MIN,
};

/// LRU cache of the object handles of the keys used on a slot.
pub struct ObjectHandlesCache(Mutex<LruCache<Vec<u8>, ObjectHandle>>);

impl Default for ObjectHandlesCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHandlesCache {
    #[must_use]
    pub fn new() -> Self {
        Self(Mutex::new(LruCache::new(OBJECT_HANDLES_CACHE_SIZE)))
    }

    pub fn get(&self, key: &[u8]) -> HResult<Option<ObjectHandle>> {
        Ok(self
            .0
            .lock()
            .map_err(|e| HError::Default(format!("Failed to acquire lock on the handles cache: {e}")))?
            .get(key)
            .copied())
    }

    pub fn insert(&self, key: Vec<u8>, value: ObjectHandle) -> HResult<()> {
        self.0
            .lock()
            .map_err(|e| HError::Default(format!("Failed to acquire lock on the handles cache: {e}")))?
            .put(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &[u8]) -> HResult<()> {
        self.0
            .lock()
            .map_err(|e| HError::Default(format!("Failed to acquire lock on the handles cache: {e}")))?
            .pop(key);
        Ok(())
    }
}

/// Everything this process knows about one included slot of a module.
///
/// The slot manager enforces the module policies on every raw signing request and serialises
/// access to the token through its session pool.
pub struct SlotManager {
    slot: SlotIdentifier,
    config: Arc<ModuleConfig>,
    backend: Arc<dyn SlotBackend>,
    mechanisms: Mutex<Option<Arc<HashSet<Mechanism>>>>,
    session_pool: SessionPool,
    object_handles_cache: ObjectHandlesCache,
    _login_session: Option<Mutex<Box<dyn RawSession>>>,
}

impl SlotManager {
    /// Create the manager of `slot`, logging into the token when a password rule of the
    /// module matches the slot.
    ///
    /// # Arguments
    /// * `slot` - the slot index and ID
    /// * `config` - the validated module configuration
    /// * `backend` - the token slot
    ///
    /// # Errors
    /// * a password source cannot be resolved
    /// * the login session cannot be opened, or the token rejects a password
    pub fn instantiate(
        slot: SlotIdentifier,
        config: Arc<ModuleConfig>,
        backend: Arc<dyn SlotBackend>,
    ) -> HResult<Self> {
        let login_session = match config.password_for(&slot)? {
            Some(passwords) => {
                let session = backend.open_session(!config.read_only())?;
                for password in &passwords {
                    session.login(config.user_type(), password)?;
                }
                info!(
                    "Logged into slot {slot} of module {} with {} password(s)",
                    config.name(),
                    passwords.len()
                );
                Some(Mutex::new(session))
            }
            None => {
                debug!("No password configured for slot {slot}, not logging in");
                None
            }
        };
        let session_pool = SessionPool::new(
            slot,
            config.max_sessions_per_slot(),
            config.session_wait_timeout(),
        );
        Ok(Self {
            slot,
            config,
            backend,
            mechanisms: Mutex::new(None),
            session_pool,
            object_handles_cache: ObjectHandlesCache::new(),
            _login_session: login_session,
        })
    }

    #[must_use]
    pub const fn slot(&self) -> SlotIdentifier {
        self.slot
    }

    #[must_use]
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    #[must_use]
    pub const fn session_pool(&self) -> &SessionPool {
        &self.session_pool
    }

    /// Borrow a session of the slot pool.
    pub fn session(&self) -> HResult<PooledSession<'_>> {
        self.session_pool
            .acquire(|| self.backend.open_session(!self.config.read_only()))
    }

    /// The mechanisms implemented by the token, fetched once.
    pub fn supported_mechanisms(&self) -> HResult<Arc<HashSet<Mechanism>>> {
        let mut mechanisms = self.mechanisms.lock().map_err(|e| {
            HError::Default(format!("Failed to acquire lock on the mechanisms: {e}"))
        })?;
        if let Some(mechanisms) = mechanisms.as_ref() {
            return Ok(mechanisms.clone());
        }
        let fetched = Arc::new(self.backend.supported_mechanisms()?);
        debug!("Slot {} supports {} mechanisms", self.slot, fetched.len());
        *mechanisms = Some(fetched.clone());
        Ok(fetched)
    }

    /// Whether the token implements `mechanism` and the module policy allows it on this slot.
    /// Any failure to query the token counts as unsupported.
    #[must_use]
    pub fn supports_mechanism(&self, mechanism: Mechanism) -> bool {
        if !self.config.is_mechanism_allowed(&self.slot, mechanism) {
            return false;
        }
        match self.supported_mechanisms() {
            Ok(mechanisms) => mechanisms.contains(&mechanism),
            Err(e) => {
                warn!("Failed to list the mechanisms of slot {}: {e}", self.slot);
                false
            }
        }
    }

    /// Find the private key `key_id`; handles are cached.
    pub fn find_key(&self, key_id: &KeyIdentifier) -> HResult<ObjectHandle> {
        let cache_key = key_id.cache_key();
        if let Some(handle) = self.object_handles_cache.get(&cache_key)? {
            return Ok(handle);
        }
        let session = self.session()?;
        let handle = session
            .session()?
            .find_private_key(key_id)?
            .ok_or_else(|| {
                HError::InvalidKey(format!("no private key with {key_id} in slot {}", self.slot))
            })?;
        self.object_handles_cache.insert(cache_key, handle)?;
        Ok(handle)
    }

    /// Forget the cached handle of `key_id`.
    pub fn evict_key(&self, key_id: &KeyIdentifier) -> HResult<()> {
        self.object_handles_cache.remove(&key_id.cache_key())
    }

    pub fn public_key_info(
        &self,
        private_key: ObjectHandle,
        key_id: &KeyIdentifier,
    ) -> HResult<PublicKeyInfo> {
        let session = self.session()?;
        session.session()?.public_key_info(private_key, key_id)
    }

    /// One raw signing operation on the token.
    ///
    /// Data longer than the module maximum message size is fed to the token in parts of at
    /// most that size. A session on which the token failed is closed, not returned to the
    /// pool.
    ///
    /// # Errors
    /// * [`HError::MechanismNotPermitted`] if the module policy denies `mechanism` on this slot
    /// * [`HError::Security`] if the token does not implement `mechanism`
    /// * [`HError::SessionTimeout`] if no session became available in time
    /// * [`HError::Token`] if the token fails
    pub fn sign(
        &self,
        private_key: ObjectHandle,
        mechanism: Mechanism,
        params: Option<&MechanismParams>,
        data: &[u8],
    ) -> HResult<Vec<u8>> {
        if !self.config.is_mechanism_allowed(&self.slot, mechanism) {
            return Err(HError::MechanismNotPermitted {
                slot: self.slot,
                mechanism: self.config.describe_mechanism(mechanism),
            });
        }
        if !self.supported_mechanisms()?.contains(&mechanism) {
            return Err(HError::Security(format!(
                "mechanism {} is not supported by slot {}",
                self.config.describe_mechanism(mechanism),
                self.slot
            )));
        }
        let max_part_len = self.config.max_message_size();
        let session = self.session()?;
        let signed = if data.len() > max_part_len {
            let parts: Vec<&[u8]> = data.chunks(max_part_len).collect();
            trace!(
                "signing {} bytes in {} parts with mechanism {mechanism:#x} on slot {}",
                data.len(),
                parts.len(),
                self.slot
            );
            session
                .session()?
                .sign_multi_part(private_key, mechanism, params, &parts)
        } else {
            trace!(
                "signing {} bytes with mechanism {mechanism:#x} on slot {}",
                data.len(),
                self.slot
            );
            session
                .session()?
                .sign(private_key, mechanism, params, data)
        };
        if let Err(HError::Token(e)) = &signed {
            debug!("Discarding a session of slot {} after a token failure: {e}", self.slot);
            session.discard();
        }
        signed
    }
}
