//! Session table: per-session key schedules, IVs and precomputed HMAC contexts.
//!
//! Handles carry a slot index and the slot's generation, so a handle that
//! outlived its session is rejected even after the slot has been reused.
//! A session is checked out for the duration of one request through a
//! [`SessionGuard`]; a second checkout while the first is alive fails with
//! `Busy`.

use rand::RngCore;
use std::sync::{Mutex, MutexGuard};
use swcr_core::config::SessionConfig;
use swcr_core::{Algorithm, CryptoError, CryptoResult, SessionId};
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::xform::{self, AuthMode, AuthSpec, Capability, CipherSpec, HashContext, KeySchedule};

const HMAC_IPAD: u8 = 0x36;
const HMAC_OPAD: u8 = 0x5c;

/// One `(algorithm, key)` step of a session to create.
#[derive(Clone)]
pub struct SessionInit {
    pub algorithm: Algorithm,
    pub key: Zeroizing<Vec<u8>>,
}

impl SessionInit {
    pub fn new(algorithm: Algorithm, key: &[u8]) -> Self {
        Self {
            algorithm,
            key: Zeroizing::new(key.to_vec()),
        }
    }

    /// A step for an unkeyed algorithm.
    pub fn unkeyed(algorithm: Algorithm) -> Self {
        Self::new(algorithm, &[])
    }
}

impl std::fmt::Debug for SessionInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInit")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Key schedule plus the chaining value carried between requests.
pub struct CipherState {
    spec: &'static CipherSpec,
    schedule: Option<Box<dyn KeySchedule>>,
    iv: Vec<u8>,
}

impl CipherState {
    /// Expand `key` and seed the IV from the thread RNG.
    pub fn new(spec: &'static CipherSpec, key: &[u8]) -> CryptoResult<Self> {
        let mut iv = vec![0u8; spec.block_size];
        rand::thread_rng().fill_bytes(&mut iv);
        Self::with_iv(spec, key, &iv)
    }

    /// Expand `key` and start from a caller-chosen IV.
    pub fn with_iv(spec: &'static CipherSpec, key: &[u8], iv: &[u8]) -> CryptoResult<Self> {
        if iv.len() != spec.block_size {
            return Err(CryptoError::invalid(format!(
                "IV length {} does not match block size {}",
                iv.len(),
                spec.block_size
            )));
        }
        let schedule = spec.key_schedule(key)?;
        Ok(Self {
            spec,
            schedule: Some(schedule),
            iv: iv.to_vec(),
        })
    }

    pub fn block_size(&self) -> usize {
        self.spec.block_size
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub(crate) fn set_iv(&mut self, iv: &[u8]) {
        self.iv.copy_from_slice(iv);
    }

    pub(crate) fn schedule(&self) -> CryptoResult<&dyn KeySchedule> {
        self.schedule
            .as_deref()
            .ok_or_else(|| CryptoError::invalid("cipher state has been wiped"))
    }

    /// Drop the key schedule (its round keys are zeroed on drop) and zero the IV.
    pub fn wipe(&mut self) {
        self.schedule = None;
        self.iv.zeroize();
    }

    pub fn is_wiped(&self) -> bool {
        self.schedule.is_none()
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.wipe();
    }
}

/// Precomputed hash contexts of an authentication algorithm.
pub struct AuthState {
    spec: &'static AuthSpec,
    inner: Option<Box<dyn HashContext>>,
    outer: Option<Box<dyn HashContext>>,
}

impl AuthState {
    pub fn new(spec: &'static AuthSpec, key: &[u8]) -> CryptoResult<Self> {
        let hash = spec.hash;
        match spec.mode {
            AuthMode::Hmac => {
                // An empty key leaves the pad all zero. Keys wider than the pad are replaced by their digest.
                let mut pad = Zeroizing::new(vec![0u8; hash.block_size]);
                if key.len() > hash.block_size {
                    let digest = Zeroizing::new(hash.digest(key));
                    pad[..digest.len()].copy_from_slice(&digest);
                } else {
                    pad[..key.len()].copy_from_slice(key);
                }

                pad.iter_mut().for_each(|b| *b ^= HMAC_IPAD);
                let mut inner = hash.init();
                inner.update(&pad);

                pad.iter_mut().for_each(|b| *b ^= HMAC_IPAD ^ HMAC_OPAD);
                let mut outer = hash.init();
                outer.update(&pad);

                Ok(Self {
                    spec,
                    inner: Some(inner),
                    outer: Some(outer),
                })
            }
            AuthMode::KeyPlusData => {
                let mut inner = hash.init();
                inner.update(key);
                Ok(Self {
                    spec,
                    inner: Some(inner),
                    outer: None,
                })
            }
            AuthMode::Digest => Ok(Self {
                spec,
                inner: Some(hash.init()),
                outer: None,
            }),
        }
    }

    pub fn spec(&self) -> &'static AuthSpec {
        self.spec
    }

    pub(crate) fn inner(&self) -> CryptoResult<&dyn HashContext> {
        self.inner
            .as_deref()
            .ok_or_else(|| CryptoError::invalid("auth state has been wiped"))
    }

    pub(crate) fn outer(&self) -> CryptoResult<&dyn HashContext> {
        self.outer
            .as_deref()
            .ok_or_else(|| CryptoError::invalid("HMAC outer context missing"))
    }

    /// Overwrite both contexts with unkeyed state, then release them.
    pub fn wipe(&mut self) {
        for ctx in [self.inner.as_mut(), self.outer.as_mut()].into_iter().flatten() {
            ctx.wipe();
        }
        self.inner = None;
        self.outer = None;
    }

    pub fn is_wiped(&self) -> bool {
        self.inner.is_none() && self.outer.is_none()
    }
}

impl Drop for AuthState {
    fn drop(&mut self) {
        self.wipe();
    }
}

pub enum RecordState {
    Cipher(CipherState),
    Auth(AuthState),
}

/// State of one algorithm within a session.
pub struct SessionRecord {
    pub algorithm: Algorithm,
    pub state: RecordState,
}

impl SessionRecord {
    pub fn new(init: &SessionInit) -> CryptoResult<Self> {
        let state = match xform::capability(init.algorithm) {
            Capability::Cipher(spec) => RecordState::Cipher(CipherState::new(spec, &init.key)?),
            Capability::Auth(spec) => RecordState::Auth(AuthState::new(spec, &init.key)?),
        };
        Ok(Self {
            algorithm: init.algorithm,
            state,
        })
    }

    pub fn wipe(&mut self) {
        match &mut self.state {
            RecordState::Cipher(c) => c.wipe(),
            RecordState::Auth(a) => a.wipe(),
        }
    }

    pub fn is_wiped(&self) -> bool {
        match &self.state {
            RecordState::Cipher(c) => c.is_wiped(),
            RecordState::Auth(a) => a.is_wiped(),
        }
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

struct Entry {
    algorithms: Vec<Algorithm>,
    /// `None` while checked out.
    records: Option<Vec<SessionRecord>>,
    /// Destroyed while checked out; freed when the guard returns.
    doomed: bool,
}

#[derive(Default)]
struct Slot {
    generation: u8,
    entry: Option<Entry>,
}

struct Table {
    slots: Vec<Slot>,
    live: u32,
}

impl Table {
    fn get_mut(&mut self, id: SessionId) -> Option<&mut Entry> {
        if id.is_null() {
            return None;
        }
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    fn free(&mut self, id: SessionId) -> Option<Entry> {
        let entry = self.slots.get_mut(id.index())?.entry.take();
        if entry.is_some() {
            self.live -= 1;
        }
        entry
    }
}

/// The session table.
///
/// A single mutex covers allocation, lookup, checkout and teardown; the
/// transforms themselves run outside the lock on checked-out records.
pub struct SessionStore {
    table: Mutex<Table>,
    max_sessions: u32,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        let initial = config.initial_slots.clamp(2, SessionId::MAX_INDEX as usize + 1);
        let mut slots = Vec::with_capacity(initial);
        slots.resize_with(initial, Slot::default);
        Self {
            table: Mutex::new(Table { slots, live: 0 }),
            max_sessions: config.max_sessions.min(SessionId::MAX_INDEX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // Table invariants hold between statements, so a poisoned lock is still usable.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a session with one record per `(algorithm, key)` step.
    ///
    /// Either every record is built and a handle is returned, or everything
    /// built so far is wiped and no slot is consumed.
    pub fn create(&self, chain: &[SessionInit]) -> CryptoResult<SessionId> {
        if chain.is_empty() {
            return Err(CryptoError::invalid("empty algorithm chain"));
        }
        let mut records: Vec<SessionRecord> = Vec::new();
        records
            .try_reserve_exact(chain.len())
            .map_err(|_| CryptoError::OutOfMemory)?;
        for init in chain {
            if records.iter().any(|r| r.algorithm == init.algorithm) {
                return Err(CryptoError::invalid(format!(
                    "algorithm {} appears twice in session chain",
                    init.algorithm
                )));
            }
            // Records already built are wiped by their Drop impls on early return.
            records.push(SessionRecord::new(init)?);
        }
        let algorithms = records.iter().map(|r| r.algorithm).collect();

        let mut table = self.lock();
        let index = self.alloc_slot(&mut table)?;
        let slot = &mut table.slots[index];
        slot.generation = next_generation(slot.generation);
        slot.entry = Some(Entry {
            algorithms,
            records: Some(records),
            doomed: false,
        });
        let id = SessionId::new(index as u32, slot.generation);
        table.live += 1;
        debug!(session = %id, steps = chain.len(), "session created");
        Ok(id)
    }

    /// First free slot from index 1; doubles the table when none is free.
    fn alloc_slot(&self, table: &mut Table) -> CryptoResult<usize> {
        if table.live >= self.max_sessions {
            warn!(live = table.live, "session table limit reached");
            return Err(CryptoError::OutOfMemory);
        }
        if let Some(index) = (1..table.slots.len()).find(|&i| table.slots[i].entry.is_none()) {
            return Ok(index);
        }

        let old_len = table.slots.len();
        let new_len = (old_len * 2).min(SessionId::MAX_INDEX as usize + 1);
        if new_len == old_len {
            return Err(CryptoError::OutOfMemory);
        }
        table
            .slots
            .try_reserve_exact(new_len - old_len)
            .map_err(|_| CryptoError::OutOfMemory)?;
        table.slots.resize_with(new_len, Slot::default);
        debug!(from = old_len, to = new_len, "session table grown");
        Ok(old_len)
    }

    /// Algorithms of a live session, in creation order.
    pub fn lookup(&self, id: SessionId) -> CryptoResult<Vec<Algorithm>> {
        let mut table = self.lock();
        match table.get_mut(id) {
            Some(entry) if !entry.doomed => Ok(entry.algorithms.clone()),
            _ => Err(CryptoError::NotFound(id)),
        }
    }

    /// Take exclusive use of a session's records until the guard is dropped.
    pub fn checkout(&self, id: SessionId) -> CryptoResult<SessionGuard<'_>> {
        let mut table = self.lock();
        let entry = match table.get_mut(id) {
            Some(entry) if !entry.doomed => entry,
            _ => return Err(CryptoError::NotFound(id)),
        };
        let records = entry.records.take().ok_or(CryptoError::Busy(id))?;
        Ok(SessionGuard {
            store: self,
            id,
            records,
        })
    }

    fn check_in(&self, id: SessionId, records: Vec<SessionRecord>) {
        let mut table = self.lock();
        match table.get_mut(id) {
            Some(entry) if !entry.doomed => {
                entry.records = Some(records);
                return;
            }
            Some(_) => {}
            None => return,
        }
        table.free(id);
        drop(table);
        teardown(records);
        debug!(session = %id, "deferred session teardown complete");
    }

    /// Tear down a session and release its slot. The null handle and unknown
    /// handles are ignored.
    pub fn destroy(&self, id: SessionId) {
        if id.is_null() {
            return;
        }
        let mut table = self.lock();
        let Some(entry) = table.get_mut(id) else {
            debug!(session = %id, "destroy of unknown session ignored");
            return;
        };
        if entry.records.is_none() {
            entry.doomed = true;
            debug!(session = %id, "session in use, teardown deferred");
            return;
        }
        let entry = table.free(id);
        drop(table);
        if let Some(Entry {
            records: Some(records),
            ..
        }) = entry
        {
            teardown(records);
        }
        debug!(session = %id, "session destroyed");
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().live as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size of the slot table, including the reserved slot 0.
    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }
}

/// Wipe every record of a session that has left the table.
fn teardown(mut records: Vec<SessionRecord>) {
    records.iter_mut().for_each(SessionRecord::wipe);
    #[cfg(test)]
    tests::TORN_DOWN.with(|log| {
        log.borrow_mut()
            .extend(records.iter().map(|r| (r.algorithm, r.is_wiped())))
    });
}

fn next_generation(generation: u8) -> u8 {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}

/// Exclusive access to one session's records. Returns them to the store on drop.
pub struct SessionGuard<'a> {
    store: &'a SessionStore,
    id: SessionId,
    records: Vec<SessionRecord>,
}

impl SessionGuard<'_> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn record_mut(&mut self, algorithm: Algorithm) -> Option<&mut SessionRecord> {
        self.records.iter_mut().find(|r| r.algorithm == algorithm)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let records = std::mem::take(&mut self.records);
        self.store.check_in(self.id, records);
    }
}
