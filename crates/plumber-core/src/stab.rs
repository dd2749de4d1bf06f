//! Servlet Table: the table that maps a dense `ServletId` to an
//! initialized servlet instance. Callers outside this module only ever
//! see the id, never the instance directly (`runtime_stab_*` keeps the
//! same indirection so scripts and servlet code can refer to a servlet by
//! a small integer).
//!
//! Carries two namespaces, active and staged, swapped atomically through
//! `arc-swap` so a hot reload never exposes a half-updated table to a
//! request in flight (the namespace-swap mechanism is the only form of
//! hot-reload this crate implements; see `spec.md` Non-goals).

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};
use crate::ids::{PipeId, ServletId};
use crate::pdt::Pdt;

/// Framework-reserved output signals every servlet instance carries in
/// addition to its user-declared pipes (*origin:
/// include/runtime/servlet.h*, `sig_null`/`sig_error`). The scheduler uses
/// `sig_null` to recognize "this task wrote zero bytes" without a side
/// channel, and `sig_error` to recognize an internal servlet failure.
#[derive(Clone, Copy, Debug)]
pub struct SignalPipes {
    pub sig_null: PipeId,
    pub sig_error: PipeId,
}

/// One initialized servlet. The owner back-reference is the service
/// node that instantiated it; once set it cannot be cleared, matching
/// `runtime_stab_set_owner`'s "once the owner back reference is set up, we
/// do not allow them to be removed" contract.
pub struct ServletInstance {
    pub pdt: Pdt,
    pub signals: SignalPipes,
    pub description: String,
    pub version: u32,
    pub init_args: Vec<String>,
    owner: ArcSwap<Option<usize>>,
    reuse_allowed: bool,
}

impl ServletInstance {
    pub fn owner(&self) -> Option<usize> {
        **self.owner.load()
    }

    /// Sets the owning service node. Fails if an owner is already set,
    /// unless `reuse_servlet` was requested at load time and this instance
    /// was explicitly marked reusable (spec.md §9 Open Question: reuse is
    /// forbidden by default, see `DESIGN.md`).
    pub fn set_owner(&self, owner: usize) -> Result<(), CoreError> {
        let current = self.owner.load();
        if current.is_some() {
            if !self.reuse_allowed {
                return Err(DomainError::new(
                    DomainErrorKind::Stab,
                    codes::STAB_REUSE_FORBIDDEN,
                    "servlet instance already owned; reuse was not requested",
                )
                .into_core(ErrorCategory::NonRetryable));
            }
        }
        self.owner.store(Arc::new(Some(owner)));
        Ok(())
    }
}

/// Loads (finds-or-creates) a servlet binary by its `argv`. Concrete
/// dynamic-library loading is out of scope (spec.md §1); this trait lets
/// the embedder supply whatever resolution strategy it uses while `Stab`
/// still owns dedup-by-`(binary, args)` and PD registration.
pub trait ServletLoader: Send + Sync {
    /// Resolves `argv[0]` to a loaded binary and builds its `Pdt` plus
    /// description/version/signal pipes. Called at most once per distinct
    /// `argv`; `Stab::load` is responsible for the dedup.
    fn load(&self, argv: &[String]) -> Result<LoadedServlet, CoreError>;
}

/// What a `ServletLoader` hands back after resolving one servlet binary.
pub struct LoadedServlet {
    pub pdt: Pdt,
    pub signals: SignalPipes,
    pub description: String,
    pub version: u32,
}

struct Namespace {
    generation: u64,
    loaded: DashMap<Vec<String>, ServletId>,
}

impl Namespace {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            loaded: DashMap::new(),
        }
    }
}

/// The servlet table. `load` is idempotent for identical `argv` within the
/// same namespace generation (`runtime_stab_load`'s dedup-by-arguments
/// behavior).
pub struct Stab {
    instances: DashMap<ServletId, Arc<ServletInstance>>,
    next_id: std::sync::atomic::AtomicU32,
    active: ArcSwap<Namespace>,
    loader: Arc<dyn ServletLoader>,
    #[cfg(any(test, feature = "test-util"))]
    trap: ArcSwap<Option<Arc<dyn Fn(i32) + Send + Sync>>>,
}

impl Stab {
    pub fn new(loader: Arc<dyn ServletLoader>) -> Self {
        Self {
            instances: DashMap::new(),
            next_id: std::sync::atomic::AtomicU32::new(0),
            active: ArcSwap::from_pointee(Namespace::new(0)),
            loader,
            #[cfg(any(test, feature = "test-util"))]
            trap: ArcSwap::from_pointee(None),
        }
    }

    /// Finds-or-loads a servlet instance for `argv`, returning its id.
    /// `reuse_servlet = true` permits a later `set_owner` call to succeed
    /// more than once on the returned instance; callers should leave this
    /// `false` unless they have a specific (typically test-only) reason.
    pub fn load(&self, argv: &[String], reuse_servlet: bool) -> Result<ServletId, CoreError> {
        let namespace = self.active.load_full();
        if let Some(existing) = namespace.loaded.get(argv) {
            return Ok(*existing);
        }
        let loaded = self.loader.load(argv)?;
        let id = ServletId::new(
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        );
        #[cfg(any(test, feature = "test-util"))]
        if let Some(trap) = self.trap.load().as_ref() {
            trap(id.raw() as i32);
        }
        let instance = Arc::new(ServletInstance {
            pdt: loaded.pdt,
            signals: loaded.signals,
            description: loaded.description,
            version: loaded.version,
            init_args: argv.to_vec(),
            owner: ArcSwap::from_pointee(None),
            reuse_allowed: reuse_servlet,
        });
        self.instances.insert(id, instance);
        namespace.loaded.insert(argv.to_vec(), id);
        Ok(id)
    }

    fn instance(&self, sid: ServletId) -> Result<Arc<ServletInstance>, CoreError> {
        self.instances.get(&sid).map(|e| e.clone()).ok_or_else(|| {
            DomainError::new(
                DomainErrorKind::Stab,
                codes::STAB_UNKNOWN_SERVLET,
                format!("no such servlet: {sid:?}"),
            )
            .into_core(ErrorCategory::NonRetryable)
        })
    }

    pub fn set_owner(&self, sid: ServletId, owner: usize) -> Result<(), CoreError> {
        self.instance(sid)?.set_owner(owner)
    }

    pub fn owner(&self, sid: ServletId) -> Result<Option<usize>, CoreError> {
        Ok(self.instance(sid)?.owner())
    }

    pub fn pdt(&self, sid: ServletId) -> Result<Pdt, CoreError> {
        Ok(self.instance(sid)?.pdt.clone())
    }

    pub fn get_pipe(&self, sid: ServletId, name: &str) -> Result<PipeId, CoreError> {
        self.instance(sid)?.pdt.get_pd_by_name(name).ok_or_else(|| {
            DomainError::new(
                DomainErrorKind::Stab,
                codes::PDT_UNKNOWN_PD,
                format!("servlet has no pipe named {name}"),
            )
            .into_core(ErrorCategory::NonRetryable)
        })
    }

    pub fn num_pipes(&self, sid: ServletId) -> Result<usize, CoreError> {
        Ok(self.instance(sid)?.pdt.size())
    }

    pub fn num_input_pipes(&self, sid: ServletId) -> Result<usize, CoreError> {
        Ok(self.instance(sid)?.pdt.input_count())
    }

    pub fn num_output_pipes(&self, sid: ServletId) -> Result<usize, CoreError> {
        Ok(self.instance(sid)?.pdt.output_count())
    }

    pub fn description(&self, sid: ServletId) -> Result<String, CoreError> {
        Ok(self.instance(sid)?.description.clone())
    }

    pub fn version(&self, sid: ServletId) -> Result<u32, CoreError> {
        Ok(self.instance(sid)?.version)
    }

    pub fn init_args(&self, sid: ServletId) -> Result<Vec<String>, CoreError> {
        Ok(self.instance(sid)?.init_args.clone())
    }

    /// Disposes every loaded servlet instance, starting a new namespace
    /// generation. Instances already wired into a running service graph
    /// are unaffected until that graph is itself disposed — the swap only
    /// changes what `load` resolves to next.
    pub fn dispose_instances(&self) -> u64 {
        let previous = self.active.load();
        let new_generation = previous.generation + 1;
        self.active.store(Arc::new(Namespace::new(new_generation)));
        self.instances.clear();
        new_generation
    }

    pub fn current_generation(&self) -> u64 {
        self.active.load().generation
    }
}

/// Test-only hooks recovered from `runtime_servlet_set_trap`: lets tests
/// observe servlet instantiation, e.g. to assert a namespace swap produced
/// a fresh instance rather than reusing a stale one.
#[cfg(any(test, feature = "test-util"))]
pub struct StabTestHooks;

#[cfg(any(test, feature = "test-util"))]
impl StabTestHooks {
    pub fn set_trap(stab: &Stab, trap: impl Fn(i32) + Send + Sync + 'static) {
        stab.trap.store(Arc::new(Some(Arc::new(trap))));
    }

    pub fn clear_trap(stab: &Stab) {
        stab.trap.store(Arc::new(None));
    }
}
