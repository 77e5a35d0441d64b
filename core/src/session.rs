//! Session-scoped bridge state.
//!
//! The host protocol is single-threaded and not reentrant across threads, so
//! the "currently active memory context" is one value held by the session
//! rather than a process global. Only [`MemoryContextScope`] writes it.
//!
//! [`MemoryContextScope`]: crate::memory::MemoryContextScope

use core::cell::{Cell, Ref, RefCell, RefMut};
use core::fmt;
use std::rc::Rc;

use crate::convert::ConversionRegistry;
use crate::error::Result;
use crate::guard;
use crate::host::{ContextId, ErrorRecord, Host, Severity};
use crate::memory::Trackers;
use crate::options::SessionOptions;

/// A handle to one host session.
///
/// Cloning is cheap and yields a handle to the same session. Sessions are
/// neither `Send` nor `Sync`; see [`crate::worker`] for handing host access
/// to another thread.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionState>,
}

struct SessionState {
    host: Rc<dyn Host>,
    current: Cell<ContextId>,
    depth: Cell<usize>,
    registry: RefCell<ConversionRegistry>,
    trackers: Trackers,
    options: SessionOptions,
}

impl Session {
    /// Opens a session whose active memory context is the host's top context.
    pub fn new(host: Rc<dyn Host>, options: SessionOptions) -> Self {
        let top = host.top_context();
        Session {
            inner: Rc::new(SessionState {
                host,
                current: Cell::new(top),
                depth: Cell::new(0),
                registry: RefCell::new(ConversionRegistry::new()),
                trackers: Trackers::default(),
                options,
            }),
        }
    }

    pub fn host(&self) -> &dyn Host {
        &*self.inner.host
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// The dynamic conversion table used for [`Value`](crate::convert::Value)
    /// decoding.
    pub fn registry(&self) -> Ref<'_, ConversionRegistry> {
        self.inner.registry.borrow()
    }

    pub fn registry_mut(&self) -> RefMut<'_, ConversionRegistry> {
        self.inner.registry.borrow_mut()
    }

    /// Runs `f` against the host inside the inbound guard.
    ///
    /// See [`guard::inbound`].
    pub fn guard<R>(&self, f: impl FnOnce(&dyn Host) -> R) -> Result<R> {
        guard::inbound(self, f)
    }

    /// Sends a report to the host.
    ///
    /// Below [`Severity::Error`] this is a notice or log line. At error
    /// severity the host transfers control, which surfaces here as
    /// [`Error::Host`](crate::Error::Host).
    pub fn report(&self, severity: Severity, message: impl Into<String>) -> Result<()> {
        let record = ErrorRecord::new(severity, message);
        self.guard(|host| host.report(record))
    }

    /// Whether two handles refer to the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn current_id(&self) -> ContextId {
        self.inner.current.get()
    }

    pub(crate) fn set_current_id(&self, context: ContextId) {
        self.inner.current.set(context);
    }

    pub(crate) fn trackers(&self) -> &Trackers {
        &self.inner.trackers
    }

    pub(crate) fn depth(&self) -> usize {
        self.inner.depth.get()
    }

    pub(crate) fn set_depth(&self, depth: usize) {
        self.inner.depth.set(depth);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("current", &self.inner.current.get())
            .field("depth", &self.inner.depth.get())
            .finish_non_exhaustive()
    }
}
