//! Process-wide engine execution context.
//!
//! At most one shared runtime is live per process. It is started lazily by
//! the first [`acquire`], shared by every later caller, and shut down when the
//! last [`ContextLease`] is dropped. Teardown runs under the same lock as
//! acquisition, so a concurrent `acquire` waits for the old runtime to stop
//! before starting a new one.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::config::EngineConfig;
use crate::engine::{EngineRegistry, EngineRuntime};

static SHARED: Mutex<Option<Weak<EngineContext>>> = Mutex::new(None);

fn shared_slot() -> MutexGuard<'static, Option<Weak<EngineContext>>> {
    // The slot holds no invariant a panic could break; keep going after poisoning.
    SHARED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A started engine runtime.
pub struct EngineContext {
    runtime: Box<dyn EngineRuntime>,
}

impl EngineContext {
    pub fn runtime(&self) -> &dyn EngineRuntime {
        self.runtime.as_ref()
    }

    pub fn engine_name(&self) -> &'static str {
        self.runtime.name()
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        let name = self.runtime.name();
        match self.runtime.shutdown() {
            Ok(()) => log::debug!("engine context `{}` shut down", name),
            Err(err) => log::warn!("engine context `{}` shutdown failed: {:#}", name, err),
        }
    }
}

/// A reference to an engine context, held by one session.
pub struct ContextLease {
    context: Option<Arc<EngineContext>>,
    shared: bool,
}

impl ContextLease {
    /// Lease on a runtime that is not published process-wide.
    pub fn private(runtime: Box<dyn EngineRuntime>) -> Self {
        Self {
            context: Some(Arc::new(EngineContext { runtime })),
            shared: false,
        }
    }

    pub fn context(&self) -> &EngineContext {
        self.context
            .as_deref()
            .expect("context lease used after release")
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if self.shared {
            let _slot = shared_slot();
            drop(self.context.take());
        } else {
            drop(self.context.take());
        }
    }
}

/// Lease the shared context, starting the configured engine if none is live.
pub fn acquire(registry: &EngineRegistry, cfg: &EngineConfig) -> Result<ContextLease> {
    let mut slot = shared_slot();
    if let Some(context) = slot.as_ref().and_then(Weak::upgrade) {
        let requested = cfg.engine.trim();
        if !requested.is_empty() && requested != context.engine_name() {
            return Err(anyhow!(
                "engine `{}` requested but the shared context is running `{}`",
                requested,
                context.engine_name()
            ));
        }
        return Ok(ContextLease {
            context: Some(context),
            shared: true,
        });
    }

    let runtime = registry.start(cfg)?;
    log::info!("engine context `{}` started", runtime.name());
    let context = Arc::new(EngineContext { runtime });
    *slot = Some(Arc::downgrade(&context));
    Ok(ContextLease {
        context: Some(context),
        shared: true,
    })
}

/// Whether a shared context is currently running.
pub fn is_active() -> bool {
    active_leases() > 0
}

/// Number of live leases on the shared context.
pub fn active_leases() -> usize {
    shared_slot().as_ref().map_or(0, Weak::strong_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineSession, StubRuntime};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SHARED_LOCK: Mutex<()> = Mutex::new(());

    static STARTS: AtomicUsize = AtomicUsize::new(0);
    static SHUTDOWNS: AtomicUsize = AtomicUsize::new(0);

    struct CountingRuntime;

    impl EngineRuntime for CountingRuntime {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn open_session(&self) -> Result<Box<dyn EngineSession>> {
            StubRuntime::new().open_session()
        }

        fn shutdown(&self) -> Result<()> {
            SHUTDOWNS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_registry() -> (EngineRegistry, EngineConfig) {
        let mut registry = EngineRegistry::new();
        registry.register("counting", |_cfg: &EngineConfig| {
            STARTS.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingRuntime) as Box<dyn EngineRuntime>)
        });
        let cfg = EngineConfig {
            engine: "counting".to_string(),
            ..EngineConfig::default()
        };
        (registry, cfg)
    }

    #[test]
    fn shared_context_starts_once_and_stops_with_last_lease() {
        let _guard = SHARED_LOCK.lock().unwrap();
        let (registry, cfg) = counting_registry();
        let starts = STARTS.load(Ordering::SeqCst);
        let shutdowns = SHUTDOWNS.load(Ordering::SeqCst);

        let first = acquire(&registry, &cfg).unwrap();
        let second = acquire(&registry, &cfg).unwrap();
        assert!(first.is_shared());
        assert_eq!(active_leases(), 2);
        assert_eq!(STARTS.load(Ordering::SeqCst), starts + 1);

        drop(first);
        assert!(is_active());
        assert_eq!(SHUTDOWNS.load(Ordering::SeqCst), shutdowns);

        drop(second);
        assert!(!is_active());
        assert_eq!(SHUTDOWNS.load(Ordering::SeqCst), shutdowns + 1);

        let third = acquire(&registry, &cfg).unwrap();
        assert_eq!(STARTS.load(Ordering::SeqCst), starts + 2);
        drop(third);
        assert!(!is_active());
    }

    #[test]
    fn conflicting_engine_is_refused_while_shared_context_lives() {
        let _guard = SHARED_LOCK.lock().unwrap();
        let (registry, cfg) = counting_registry();
        let lease = acquire(&registry, &cfg).unwrap();

        let other = EngineConfig {
            engine: "stub".to_string(),
            ..EngineConfig::default()
        };
        let err = acquire(&EngineRegistry::builtin(), &other).err().unwrap();
        assert!(err.to_string().contains("running `counting`"));

        drop(lease);
        assert!(!is_active());
    }

    #[test]
    fn private_lease_is_not_published() {
        let _guard = SHARED_LOCK.lock().unwrap();
        let lease = ContextLease::private(Box::new(StubRuntime::new()));
        assert!(!lease.is_shared());
        assert!(!is_active());
        assert_eq!(lease.context().engine_name(), "stub");
    }
}
