//! Request dispatcher.
//!
//! A request runs to completion in one call: the session is checked out,
//! each descriptor is applied to the buffer in order, and the callback is
//! invoked exactly once with the outcome.
//!
//! A handle that no longer resolves gets exactly one recovery attempt: a
//! fresh session is built from the key material the request's descriptors
//! carry, and the request runs against that instead.

use std::sync::atomic::{AtomicU64, Ordering};
use swcr_core::config::{EngineConfig, RequestConfig};
use swcr_core::{Algorithm, CryptoError, CryptoResult, SessionId};
use tracing::{debug, trace, warn};

use crate::auth;
use crate::buffer::CryptoBuffer;
use crate::cbc;
use crate::request::{Completion, Descriptor, Request, TagOutput};
use crate::session::{RecordState, SessionGuard, SessionInit, SessionStore};

/// Request counters since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub completed: u64,
    pub failed: u64,
    pub migrated: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    migrated: AtomicU64,
}

/// The software transform engine: a session table plus the dispatcher.
pub struct Engine {
    store: SessionStore,
    requests: RequestConfig,
    counters: Counters,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            store: SessionStore::new(&config.sessions),
            requests: config.requests.clone(),
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn create_session(&self, chain: &[SessionInit]) -> CryptoResult<SessionId> {
        self.store.create(chain)
    }

    pub fn destroy_session(&self, id: SessionId) {
        self.store.destroy(id)
    }

    pub fn lookup(&self, id: SessionId) -> CryptoResult<Vec<Algorithm>> {
        self.store.lookup(id)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            migrated: self.counters.migrated.load(Ordering::Relaxed),
        }
    }

    /// Run `request` and hand the outcome to its callback.
    pub fn submit(&self, request: Request) {
        let Request {
            session,
            descriptors,
            buffer,
            callback,
        } = request;
        let completion = self.dispatch(session, &descriptors, buffer);
        callback(completion);
    }

    /// Run a descriptor list against `buffer` and return the outcome.
    pub fn dispatch(&self, session: SessionId, descriptors: &[Descriptor], mut buffer: CryptoBuffer) -> Completion {
        let mut tags = Vec::new();
        let (session, result) = match self.run(session, descriptors, &mut buffer, &mut tags) {
            Ok(ran_on) => (ran_on, Ok(())),
            Err((ran_on, err)) => (ran_on, Err(err)),
        };

        match &result {
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(session = %session, error = %err, "request failed");
            }
        }
        Completion {
            session,
            result,
            buffer,
            tags,
        }
    }

    fn run(
        &self,
        session: SessionId,
        descriptors: &[Descriptor],
        buffer: &mut CryptoBuffer,
        tags: &mut Vec<TagOutput>,
    ) -> Result<SessionId, (SessionId, CryptoError)> {
        if descriptors.is_empty() {
            return Err((session, CryptoError::invalid("request has no descriptors")));
        }
        let mut guard = self.checkout_or_migrate(session, descriptors).map_err(|e| (session, e))?;
        let ran_on = guard.id();

        for (step, desc) in descriptors.iter().enumerate() {
            trace!(session = %ran_on, step, algorithm = %desc.algorithm, "descriptor");
            apply(&mut guard, desc, buffer, tags).map_err(|e| (ran_on, e))?;
        }
        Ok(ran_on)
    }

    fn checkout_or_migrate(&self, session: SessionId, descriptors: &[Descriptor]) -> CryptoResult<SessionGuard<'_>> {
        self.store.checkout(session).or_else(|err| match err {
            CryptoError::NotFound(_) if self.requests.allow_migration => self.migrate(session, descriptors),
            CryptoError::NotFound(_) => Err(CryptoError::NoSession(session)),
            other => Err(other),
        })
    }

    /// Build a replacement session from the descriptors' key material.
    fn migrate(&self, stale: SessionId, descriptors: &[Descriptor]) -> CryptoResult<SessionGuard<'_>> {
        let Some(chain) = migration_chain(descriptors) else {
            debug!(session = %stale, "migration impossible: descriptors carry no key material");
            return Err(CryptoError::NoSession(stale));
        };
        let fresh = self.store.create(&chain).map_err(|err| {
            debug!(session = %stale, error = %err, "migration failed");
            CryptoError::NoSession(stale)
        })?;
        self.counters.migrated.fetch_add(1, Ordering::Relaxed);
        debug!(from = %stale, to = %fresh, "session migrated");
        self.store.checkout(fresh).map_err(|_| CryptoError::NoSession(stale))
    }
}

/// One session step per distinct algorithm, in descriptor order.
fn migration_chain(descriptors: &[Descriptor]) -> Option<Vec<SessionInit>> {
    let mut chain: Vec<SessionInit> = Vec::new();
    for desc in descriptors {
        if chain.iter().any(|init| init.algorithm == desc.algorithm) {
            continue;
        }
        chain.push(desc.session_init()?);
    }
    Some(chain)
}

fn apply(
    guard: &mut SessionGuard<'_>,
    desc: &Descriptor,
    buffer: &mut CryptoBuffer,
    tags: &mut Vec<TagOutput>,
) -> CryptoResult<()> {
    let record = guard.record_mut(desc.algorithm).ok_or_else(|| {
        CryptoError::invalid(format!("session has no {} record", desc.algorithm))
    })?;
    match &mut record.state {
        RecordState::Cipher(state) => cbc::transform(state, desc, buffer),
        RecordState::Auth(state) => {
            let tag = auth::authenticate(state, desc, buffer)?;
            tags.push(TagOutput {
                algorithm: desc.algorithm,
                inject: desc.inject,
                tag,
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SegmentChain;
    use std::sync::mpsc;

    const CIPHER_KEY: [u8; 24] = [0x24; 24];
    const MAC_KEY: &[u8] = b"mac key material";

    fn engine() -> Engine {
        Engine::new(&EngineConfig::default())
    }

    fn esp_session(engine: &Engine) -> SessionId {
        engine
            .create_session(&[
                SessionInit::new(Algorithm::TripleDesCbc, &CIPHER_KEY),
                SessionInit::new(Algorithm::HmacSha1, MAC_KEY),
            ])
            .unwrap()
    }

    /// `[8-byte IV][payload][12-byte ICV]`
    fn packet(payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0u8; 8];
        p.extend_from_slice(payload);
        p.extend_from_slice(&[0u8; 12]);
        p
    }

    fn esp_out(len: usize) -> Vec<Descriptor> {
        vec![
            Descriptor::encrypt(Algorithm::TripleDesCbc, 8, len, 0).with_key(&CIPHER_KEY),
            Descriptor::auth(Algorithm::HmacSha1, 0, 8 + len, 8 + len).with_key(MAC_KEY),
        ]
    }

    fn esp_in(len: usize) -> Vec<Descriptor> {
        vec![
            Descriptor::auth(Algorithm::HmacSha1, 0, 8 + len, 8 + len + 12),
            Descriptor::decrypt(Algorithm::TripleDesCbc, 8, len, 0),
        ]
    }

    #[test]
    fn submit_invokes_callback_once() {
        let engine = engine();
        let id = esp_session(&engine);
        let (tx, rx) = mpsc::channel();
        let request = Request::new(id, packet(&[0x61; 16]), move |c| tx.send(c).unwrap());
        let request = esp_out(16).into_iter().fold(request, Request::descriptor);
        engine.submit(request);

        let completion = rx.recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert!(completion.is_ok());
        assert_eq!(completion.session, id);
        assert_eq!(completion.tags.len(), 1);
        assert_eq!(completion.tags[0].inject, 24);
        assert_eq!(completion.tags[0].tag.len(), 12);
    }

    #[test]
    fn encrypt_then_mac_roundtrip() {
        let engine = engine();
        let out = esp_session(&engine);
        let payload = b"thirty-two bytes of esp payload!";

        let sealed = engine.dispatch(out, &esp_out(32), CryptoBuffer::Contiguous(packet(payload)));
        sealed.result.clone().unwrap();
        let mut wire = sealed.buffer.to_vec();
        assert_ne!(&wire[8..40], payload);

        // Receiver: recompute the ICV into scratch space past the packet, then decrypt.
        wire.extend_from_slice(&[0u8; 12]);
        let inbound = esp_session(&engine);
        let opened = engine.dispatch(inbound, &esp_in(32), CryptoBuffer::Contiguous(wire));
        opened.result.clone().unwrap();
        let plain = opened.buffer.to_vec();
        assert_eq!(&plain[40..52], &plain[52..64], "ICV verifies");
        assert_eq!(&plain[8..40], payload);
    }

    #[test]
    fn chained_buffer_matches_contiguous() {
        let engine = engine();
        let a = esp_session(&engine);
        let b = engine
            .create_session(&[
                SessionInit::new(Algorithm::TripleDesCbc, &CIPHER_KEY),
                SessionInit::new(Algorithm::HmacSha1, MAC_KEY),
            ])
            .unwrap();
        let data = packet(&[0x5c; 40]);
        let descs = vec![
            Descriptor::encrypt(Algorithm::TripleDesCbc, 8, 40, 0).with_iv(&[9u8; 8]),
            Descriptor::auth(Algorithm::HmacSha1, 0, 48, 48),
        ];

        let flat = engine.dispatch(a, &descs, CryptoBuffer::Contiguous(data.clone()));
        let chain = SegmentChain::from_splits(&data, &[3, 13, 13, 27, 51]);
        let chained = engine.dispatch(b, &descs, CryptoBuffer::Chain(chain));
        assert!(flat.is_ok() && chained.is_ok());
        assert_eq!(flat.buffer.to_vec(), chained.buffer.to_vec());
        assert_eq!(flat.tags, chained.tags);
    }

    #[test]
    fn empty_request_is_invalid() {
        let engine = engine();
        let id = esp_session(&engine);
        let c = engine.dispatch(id, &[], CryptoBuffer::Contiguous(vec![0; 8]));
        assert!(matches!(c.result, Err(CryptoError::InvalidArgument(_))));
        assert_eq!(engine.stats().failed, 1);
    }

    #[test]
    fn unknown_algorithm_for_session_is_invalid() {
        let engine = engine();
        let id = esp_session(&engine);
        let descs = vec![Descriptor::encrypt(Algorithm::AesCbc, 0, 16, 0).iv_present()];
        let c = engine.dispatch(id, &descs, CryptoBuffer::Contiguous(vec![0; 16]));
        assert!(matches!(c.result, Err(CryptoError::InvalidArgument(_))));
        assert_eq!(c.buffer.to_vec(), vec![0; 16]);
    }

    #[test]
    fn failure_halts_but_keeps_earlier_steps() {
        let engine = engine();
        let id = esp_session(&engine);
        let descs = vec![
            Descriptor::encrypt(Algorithm::TripleDesCbc, 8, 16, 0),
            // Misaligned: rejected after the first step already ran.
            Descriptor::encrypt(Algorithm::TripleDesCbc, 8, 15, 0),
            Descriptor::auth(Algorithm::HmacSha1, 0, 24, 24),
        ];
        let original = packet(&[0x11; 16]);
        let c = engine.dispatch(id, &descs, CryptoBuffer::Contiguous(original.clone()));
        assert!(matches!(c.result, Err(CryptoError::InvalidArgument(_))));
        assert!(c.tags.is_empty(), "later steps never ran");
        assert_ne!(&c.buffer.to_vec()[8..24], &original[8..24]);
    }

    #[test]
    fn stale_handle_migrates_once() {
        let engine = engine();
        let id = esp_session(&engine);
        engine.destroy_session(id);

        let c = engine.dispatch(id, &esp_out(16), CryptoBuffer::Contiguous(packet(&[1; 16])));
        assert!(c.is_ok());
        assert_ne!(c.session, id);
        assert_eq!(
            engine.lookup(c.session).unwrap(),
            vec![Algorithm::TripleDesCbc, Algorithm::HmacSha1]
        );
        assert_eq!(engine.stats().migrated, 1);
    }

    #[test]
    fn migration_without_keys_is_no_session() {
        let engine = engine();
        let id = esp_session(&engine);
        engine.destroy_session(id);

        let original = packet(&[1; 16]);
        let c = engine.dispatch(id, &esp_in(16), CryptoBuffer::Contiguous(original.clone()));
        assert_eq!(c.result, Err(CryptoError::NoSession(id)));
        assert_eq!(c.buffer.to_vec(), original);
        assert_eq!(engine.stats().migrated, 0);
        assert!(engine.store().is_empty());
    }

    #[test]
    fn migration_with_bad_key_is_no_session() {
        let engine = engine();
        let descs = vec![Descriptor::encrypt(Algorithm::DesCbc, 0, 8, 0)
            .iv_present()
            .with_key(&[0u8; 3])];
        let c = engine.dispatch(SessionId::new(5, 1), &descs, CryptoBuffer::Contiguous(vec![0; 8]));
        assert!(matches!(c.result, Err(CryptoError::NoSession(_))));
        assert!(engine.store().is_empty());
    }

    #[test]
    fn migration_can_be_disabled() {
        let mut config = EngineConfig::default();
        config.requests.allow_migration = false;
        let engine = Engine::new(&config);
        let c = engine.dispatch(SessionId::new(1, 1), &esp_out(16), CryptoBuffer::Contiguous(packet(&[0; 16])));
        assert!(matches!(c.result, Err(CryptoError::NoSession(_))));
        assert!(engine.store().is_empty());
    }

    #[test]
    fn null_handle_migrates_like_any_unknown_handle() {
        let engine = engine();
        let descs = vec![Descriptor::auth(Algorithm::Sha1, 0, 4, 4)];
        let c = engine.dispatch(SessionId::NULL, &descs, CryptoBuffer::Contiguous(vec![0; 24]));
        assert!(c.is_ok());
        assert!(!c.session.is_null());
    }

    #[test]
    fn busy_session_is_rejected() {
        let engine = engine();
        let id = esp_session(&engine);
        let _held = engine.store().checkout(id).unwrap();
        let c = engine.dispatch(id, &esp_out(16), CryptoBuffer::Contiguous(packet(&[0; 16])));
        assert_eq!(c.result, Err(CryptoError::Busy(id)));
    }
}
