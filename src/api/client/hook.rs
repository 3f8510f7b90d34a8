//! Integration points for a client side column encryption engine.
//!
//! The driver performs no cryptography. When `enable_ce` is configured, each
//! connection asks the [`ClientLogicFactory`] registered on its connector for
//! a [`ClientLogicHook`] and routes statement text, parameters and encrypted
//! result columns through it.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use postgres_types::Oid;

use super::config::Config;
use crate::error::GaussWireResult;
use crate::types::Value;

/// One engine session, owned by one connection.
pub trait ClientLogicHook: Send + Sync {
    /// Rewrite statement text before it is parsed by the server.
    fn prepare_query(&self, statement_name: &str, query: &str) -> GaussWireResult<String>;

    /// Rewrite parameter values, typically encrypting those bound to
    /// encrypted columns.
    fn prepare_params(
        &self,
        statement_name: &str,
        param_types: &[Oid],
        params: &[Value],
    ) -> GaussWireResult<Vec<Value>>;

    /// Called on every `ReadyForQuery` with its cache refresh byte.
    fn on_ready_for_query(&self, refresh: Option<u8>);

    /// Whether the engine's key cache was out of date during the last
    /// operation, making it eligible for a single resend.
    fn was_cache_stale(&self) -> bool;

    /// Decrypt a value of an encrypted column. `type_oid` is the oid of the
    /// plain type, the returned bytes are its text representation.
    fn decrypt_column(&self, raw: &[u8], type_oid: Oid) -> GaussWireResult<Vec<u8>>;

    /// Runs before the resend, returning false skips it.
    fn pre_check_resend(&self) -> bool {
        true
    }

    /// Runs after a stale cache was reported, whether or not a resend
    /// happened.
    fn post_check_resend(&self) {}
}

/// Creates one [`ClientLogicHook`] per connection.
///
/// Engine settings come from [`Config::get_key_info`],
/// [`Config::get_crypto_module_info`] and [`Config::get_auto_send_token`].
pub trait ClientLogicFactory: Send + Sync {
    fn create(&self, config: &Config) -> GaussWireResult<Arc<dyn ClientLogicHook>>;
}

/// Opaque key of a hook registered in the [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Process wide table of live engine sessions.
///
/// The engine calls back into the driver with a [`Handle`] instead of a
/// pointer. Entries are owned by their connection and removed when it is
/// closed or dropped.
pub struct HandleTable {
    next: AtomicU64,
    entries: RwLock<HashMap<Handle, Arc<dyn ClientLogicHook>>>,
}

static HANDLE_TABLE: LazyLock<HandleTable> = LazyLock::new(HandleTable::new);

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.len())
            .finish()
    }
}

impl HandleTable {
    fn new() -> HandleTable {
        HandleTable {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static HandleTable {
        &HANDLE_TABLE
    }

    pub fn insert(&self, hook: Arc<dyn ClientLogicHook>) -> Handle {
        let handle = Handle(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, hook);
        handle
    }

    pub fn get(&self, handle: Handle) -> Option<Arc<dyn ClientLogicHook>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    pub fn remove(&self, handle: Handle) -> Option<Arc<dyn ClientLogicHook>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A hook registered in the global table for the lifetime of a connection.
pub(crate) struct ClientLogicSession {
    handle: Handle,
    hook: Arc<dyn ClientLogicHook>,
}

impl ClientLogicSession {
    pub(crate) fn register(hook: Arc<dyn ClientLogicHook>) -> ClientLogicSession {
        let handle = HandleTable::global().insert(hook.clone());
        ClientLogicSession { handle, hook }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn hook(&self) -> &Arc<dyn ClientLogicHook> {
        &self.hook
    }
}

impl fmt::Debug for ClientLogicSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientLogicSession").field(&self.handle).finish()
    }
}

impl Drop for ClientLogicSession {
    fn drop(&mut self) {
        HandleTable::global().remove(self.handle);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    use super::*;

    /// Test engine: rewrites `plain` to `cipher` in statement text,
    /// "decrypts" by stripping a `enc:` prefix and reports a stale cache as
    /// many times as configured.
    #[derive(Default)]
    pub(crate) struct MockHook {
        pub stale: AtomicU64,
        pub skip_resend: AtomicBool,
        pub post_checks: AtomicU64,
        pub refreshes: Mutex<Vec<Option<u8>>>,
        pub prepared: Mutex<Vec<String>>,
        pub queries: Mutex<Vec<String>>,
    }

    impl ClientLogicHook for MockHook {
        fn prepare_query(&self, statement_name: &str, query: &str) -> GaussWireResult<String> {
            self.prepared
                .lock()
                .unwrap()
                .push(statement_name.to_owned());
            self.queries.lock().unwrap().push(query.to_owned());
            Ok(query.replace("plain", "cipher"))
        }

        fn prepare_params(
            &self,
            _statement_name: &str,
            _param_types: &[Oid],
            params: &[Value],
        ) -> GaussWireResult<Vec<Value>> {
            Ok(params.to_vec())
        }

        fn on_ready_for_query(&self, refresh: Option<u8>) {
            self.refreshes.lock().unwrap().push(refresh);
        }

        fn was_cache_stale(&self) -> bool {
            self.stale
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
        }

        fn decrypt_column(&self, raw: &[u8], _type_oid: Oid) -> GaussWireResult<Vec<u8>> {
            Ok(raw.strip_prefix(b"enc:").unwrap_or(raw).to_vec())
        }

        fn pre_check_resend(&self) -> bool {
            !self.skip_resend.load(Ordering::SeqCst)
        }

        fn post_check_resend(&self) {
            self.post_checks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_handle_table() {
        let table = HandleTable::new();
        let hook: Arc<dyn ClientLogicHook> = Arc::new(MockHook::default());
        let a = table.insert(hook.clone());
        let b = table.insert(hook);
        assert_ne!(a, b);
        assert_eq!(2, table.len());
        assert!(table.get(a).is_some());
        assert!(table.remove(a).is_some());
        assert!(table.get(a).is_none());
        assert!(table.remove(a).is_none());
        assert_eq!(1, table.len());
    }

    #[test]
    fn test_session_removed_on_drop() {
        let session = ClientLogicSession::register(Arc::new(MockHook::default()));
        let handle = session.handle();
        assert!(HandleTable::global().get(handle).is_some());
        drop(session);
        assert!(HandleTable::global().get(handle).is_none());
    }
}
