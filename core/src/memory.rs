//! Memory contexts: scoped activation, allocation and staleness detection.
//!
//! A memory context is a host arena. Everything allocated in it dies when
//! the context is reset or deleted, and any pointer into it becomes invalid
//! at that instant. The types here make that lifetime observable:
//!
//! - [`MemoryContextScope`] activates a context for the duration of a scope
//!   and restores the previous one when dropped, including during unwinding.
//! - [`TrackedMemoryContext`] shares a per-context counter bumped by a reset
//!   callback, so "was this context reset since I looked at it?" is O(1).
//! - [`Tracked`] pairs a payload pointer with such a handle. It refuses to
//!   dereference once the context is gone, and keeps the context borrowed
//!   while a reference to the payload is alive.

use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::ptr::{self, NonNull};
use std::rc::Rc;

use allocator_api2::alloc::{AllocError, Allocator};
use hashbrown::HashMap;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::host::ContextId;
use crate::session::Session;

/// Alignment of every chunk handed out by [`Session::allocate`].
pub const MAXALIGN: usize = 8;

/// Zeroed bytes returned by [`Session::allocate`].
pub type ArenaBuffer = Tracked<[u8]>;

/// A host memory context.
///
/// Two values are equal iff they name the same underlying allocator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MemoryContext(ContextId);

impl MemoryContext {
    pub const fn from_id(id: ContextId) -> Self {
        MemoryContext(id)
    }

    pub const fn id(self) -> ContextId {
        self.0
    }
}

impl fmt::Display for MemoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Session {
    /// The context implicit allocations go to.
    pub fn current_context(&self) -> MemoryContext {
        MemoryContext(self.current_id())
    }

    pub fn top_context(&self) -> MemoryContext {
        MemoryContext(self.host().top_context())
    }

    /// Creates a context nested under the current one.
    pub fn create_context(&self, name: &str) -> MemoryContext {
        self.create_context_in(self.current_context(), name)
    }

    pub fn create_context_in(&self, parent: MemoryContext, name: &str) -> MemoryContext {
        let context = MemoryContext(self.host().create_context(parent.0, name));
        debug!(%context, %parent, name, "created memory context");
        context
    }

    /// Makes `context` the current context until the returned scope drops.
    pub fn activate(&self, context: MemoryContext) -> MemoryContextScope {
        let previous = self.current_id();
        let depth = self.depth() + 1;
        self.set_current_id(context.0);
        self.set_depth(depth);
        MemoryContextScope {
            session: self.clone(),
            previous,
            depth,
        }
    }

    /// Allocates `n * element_size` zeroed bytes in the current context.
    pub fn allocate(&self, n: usize, element_size: usize) -> Result<ArenaBuffer> {
        self.allocate_in(self.current_context(), n, element_size)
    }

    pub fn allocate_in(
        &self,
        context: MemoryContext,
        n: usize,
        element_size: usize,
    ) -> Result<ArenaBuffer> {
        let size = n.checked_mul(element_size).ok_or(Error::AllocationFailure {
            size: usize::MAX,
            context: context.0,
        })?;
        let layout = Layout::from_size_align(size.max(1), MAXALIGN).map_err(|_| {
            Error::AllocationFailure {
                size,
                context: context.0,
            }
        })?;
        let ptr = self.alloc_layout(context, layout)?;
        // SAFETY: the chunk is at least `size` bytes and exclusively ours.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        let slice = NonNull::slice_from_raw_parts(ptr, size);
        Ok(Tracked {
            ptr: slice,
            owner: self.track(context),
        })
    }

    /// Moves `value` into the current context.
    pub fn alloc_value<T: Copy>(&self, value: T) -> Result<Tracked<T>> {
        let context = self.current_context();
        let ptr = self.alloc_layout(context, Layout::new::<T>())?.cast::<T>();
        // SAFETY: freshly allocated with the layout of `T`.
        unsafe { ptr.as_ptr().write(value) };
        Ok(Tracked {
            ptr,
            owner: self.track(context),
        })
    }

    pub(crate) fn alloc_layout(&self, context: MemoryContext, layout: Layout) -> Result<NonNull<u8>> {
        self.host()
            .alloc(context.0, layout)
            .ok_or(Error::AllocationFailure {
                size: layout.size(),
                context: context.0,
            })
    }

    /// Frees everything in `context` and advances its generation. The
    /// context itself stays usable.
    ///
    /// # Panics
    ///
    /// If a payload in `context` or one of its descendants is borrowed.
    pub fn reset(&self, context: MemoryContext) {
        self.assert_not_borrowed(context);
        debug!(%context, "resetting memory context");
        self.host().reset_context(context.0);
    }

    /// # Panics
    ///
    /// If a payload in `context` or one of its descendants is borrowed.
    pub fn delete(&self, context: MemoryContext) {
        self.assert_not_borrowed(context);
        if context.0 == self.current_id() {
            warn!(%context, "deleting the active memory context");
        }
        debug!(%context, "deleting memory context");
        self.host().delete_context(context.0);
    }

    pub fn generation(&self, context: MemoryContext) -> u64 {
        self.host().context_generation(context.0)
    }

    pub fn parent_of(&self, context: MemoryContext) -> Option<MemoryContext> {
        self.host().context_parent(context.0).map(MemoryContext)
    }

    pub fn context_name(&self, context: MemoryContext) -> String {
        self.host().context_name(context.0)
    }

    /// Runs `callback` once, right before the next reset or delete of
    /// `context`.
    pub fn register_reset_callback(&self, context: MemoryContext, callback: impl FnOnce() + 'static) {
        self.host()
            .register_reset_callback(context.0, Box::new(callback));
    }

    /// Starts tracking resets of `context` from now on. A context that is
    /// already deleted is stale from the start.
    ///
    /// Every handle on the same context shares one tracker, which keeps at
    /// most one reset callback registered at a time.
    pub fn track(&self, context: MemoryContext) -> TrackedMemoryContext {
        if !self.host().context_is_valid(context.0) {
            let tracker = Rc::new(ContextTracker::new(self.context_name(context)));
            tracker.resets.set(1);
            return TrackedMemoryContext {
                session: self.clone(),
                context,
                tracker,
                baseline: 0,
            };
        }
        let tracker = self.trackers().entry(self, context);
        if !tracker.armed.replace(true) {
            let counter = Rc::clone(&tracker);
            self.register_reset_callback(context, move || counter.fire(context));
        }
        TrackedMemoryContext {
            session: self.clone(),
            context,
            baseline: tracker.resets.get(),
            tracker,
        }
    }

    /// Panics if resetting `context` would free a payload that is currently
    /// borrowed through [`Tracked::with`] or an arena collection.
    pub(crate) fn assert_not_borrowed(&self, context: MemoryContext) {
        for pinned in self.trackers().pinned() {
            let mut cursor = Some(pinned);
            while let Some(current) = cursor {
                if current == context.0 {
                    panic!(
                        "memory context {context} cannot be released while a payload in {pinned} is borrowed"
                    );
                }
                cursor = self.host().context_parent(current);
            }
        }
    }

    /// Resolves the context owning the chunk that starts at `ptr`.
    pub fn context_for_pointer(&self, ptr: *const u8) -> Result<MemoryContext> {
        self.chunk_for_pointer(ptr).map(|(context, _)| context)
    }

    /// The owning context and size of the chunk that starts at `ptr`.
    pub fn chunk_for_pointer(&self, ptr: *const u8) -> Result<(MemoryContext, usize)> {
        let addr = ptr as usize;
        if addr == 0 || addr % MAXALIGN != 0 {
            return Err(Error::ForeignPointer { addr });
        }
        self.host()
            .chunk_for_pointer(ptr)
            .map(|chunk| (MemoryContext(chunk.context), chunk.size))
            .ok_or(Error::ForeignPointer { addr })
    }

    /// An [`Allocator`] placing collections in `context`.
    ///
    /// The context stays borrowed while the allocator or any clone of it is
    /// alive, so it cannot be reset under a live collection.
    pub fn allocator(&self, context: MemoryContext) -> Result<ContextAllocator> {
        let owner = self.track(context);
        let pin = owner.pin()?;
        Ok(ContextAllocator { owner, _pin: pin })
    }
}

/// Activation token returned by [`Session::activate`].
///
/// Scopes must be released innermost first. Dropping restores the context
/// that was active when the scope was acquired.
#[must_use = "the previous context is restored as soon as the scope is dropped"]
pub struct MemoryContextScope {
    session: Session,
    previous: ContextId,
    depth: usize,
}

impl MemoryContextScope {
    pub fn previous(&self) -> MemoryContext {
        MemoryContext(self.previous)
    }
}

impl Drop for MemoryContextScope {
    fn drop(&mut self) {
        if self.session.depth() != self.depth {
            warn!(
                expected = self.depth,
                actual = self.session.depth(),
                "memory context scopes released out of order"
            );
        }
        self.session.set_current_id(self.previous);
        self.session.set_depth(self.depth - 1);
    }
}

/// Shared reset counter of one memory context.
struct ContextTracker {
    name: Rc<str>,
    resets: Cell<u64>,
    /// Whether a reset callback is registered for the next reset.
    armed: Cell<bool>,
    /// Live borrows of payloads in the context.
    pins: Cell<usize>,
}

impl ContextTracker {
    fn new(name: String) -> Self {
        ContextTracker {
            name: Rc::from(name),
            resets: Cell::new(0),
            armed: Cell::new(false),
            pins: Cell::new(0),
        }
    }

    fn fire(&self, context: MemoryContext) {
        if self.pins.get() > 0 {
            error!(%context, pins = self.pins.get(), "memory context released while a payload in it is borrowed; aborting");
            std::process::abort();
        }
        self.resets.set(self.resets.get() + 1);
        self.armed.set(false);
    }
}

/// Per-session table of context trackers.
#[derive(Default)]
pub(crate) struct Trackers {
    map: RefCell<HashMap<ContextId, Rc<ContextTracker>>>,
    prune_at: Cell<usize>,
}

const PRUNE_MIN: usize = 64;

impl Trackers {
    fn entry(&self, session: &Session, context: MemoryContext) -> Rc<ContextTracker> {
        let mut map = self.map.borrow_mut();
        if map.len() >= self.prune_at.get().max(PRUNE_MIN) {
            // Trackers of deleted contexts have fired and cannot fire again.
            map.retain(|id, tracker| tracker.armed.get() || session.host().context_is_valid(*id));
            self.prune_at.set(map.len() * 2);
        }
        Rc::clone(
            map.entry(context.0)
                .or_insert_with(|| Rc::new(ContextTracker::new(session.context_name(context)))),
        )
    }

    fn pinned(&self) -> Vec<ContextId> {
        self.map
            .borrow()
            .iter()
            .filter(|(_, tracker)| tracker.pins.get() > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.borrow().len()
    }
}

/// Keeps a context borrowed until dropped.
struct ContextPin {
    tracker: Rc<ContextTracker>,
}

impl ContextPin {
    fn new(tracker: &Rc<ContextTracker>) -> Self {
        tracker.pins.set(tracker.pins.get() + 1);
        ContextPin {
            tracker: Rc::clone(tracker),
        }
    }
}

impl Clone for ContextPin {
    fn clone(&self) -> Self {
        ContextPin::new(&self.tracker)
    }
}

impl Drop for ContextPin {
    fn drop(&mut self) {
        self.tracker.pins.set(self.tracker.pins.get() - 1);
    }
}

/// A memory context plus the number of resets observed since tracking began.
///
/// Clones share the underlying counter and baseline.
#[derive(Clone)]
pub struct TrackedMemoryContext {
    session: Session,
    context: MemoryContext,
    tracker: Rc<ContextTracker>,
    baseline: u64,
}

impl TrackedMemoryContext {
    pub fn context(&self) -> MemoryContext {
        self.context
    }

    /// A handle that only reports resets happening from now on.
    pub fn snapshot(&self) -> Self {
        self.session.track(self.context)
    }

    /// Resets (or the delete) seen since this handle was taken.
    ///
    /// Once stale, further resets are only counted while some newer handle
    /// tracks the context.
    pub fn resets(&self) -> u64 {
        self.tracker.resets.get() - self.baseline
    }

    pub fn is_stale(&self) -> bool {
        self.resets() != 0
    }

    /// Fails with [`Error::PointerGone`] once the context was reset.
    pub fn check(&self) -> Result<()> {
        if self.is_stale() {
            return Err(Error::PointerGone {
                context: self.context.0,
                name: self.tracker.name.to_string(),
            });
        }
        Ok(())
    }

    /// Borrows the context until the returned pin drops.
    fn pin(&self) -> Result<ContextPin> {
        self.check()?;
        Ok(ContextPin::new(&self.tracker))
    }

    /// Runs `f` with the context borrowed: resetting it from inside `f`
    /// panics instead of freeing memory `f` may still read.
    pub(crate) fn borrowed<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let _pin = self.pin()?;
        Ok(f())
    }
}

impl fmt::Debug for TrackedMemoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedMemoryContext")
            .field("context", &self.context)
            .field("name", &self.tracker.name)
            .field("resets", &self.resets())
            .finish()
    }
}

/// A pointer into a memory context that checks the context on every access.
///
/// The payload is only reachable inside [`Tracked::with`] and
/// [`Tracked::with_mut`], or copied out; no reference to it outlives the
/// check.
pub struct Tracked<T: ?Sized> {
    ptr: NonNull<T>,
    owner: TrackedMemoryContext,
}

impl<T: ?Sized> Tracked<T> {
    /// # Safety
    ///
    /// `ptr` must point to a valid `T` allocated in `owner`'s context.
    pub unsafe fn from_raw(ptr: NonNull<T>, owner: TrackedMemoryContext) -> Self {
        Tracked { ptr, owner }
    }

    pub fn owner(&self) -> &TrackedMemoryContext {
        &self.owner
    }

    /// The raw pointer, if the context is still intact.
    pub fn as_ptr(&self) -> Result<NonNull<T>> {
        self.owner.check()?;
        Ok(self.ptr)
    }

    /// Runs `f` on the payload. The context cannot be reset while `f` runs.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        // SAFETY: the pin guarantees the context is not reset while the
        // reference is alive, and the check before it that it was not reset
        // since the pointer was made.
        self.owner.borrowed(|| f(unsafe { self.ptr.as_ref() }))
    }

    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut ptr = self.ptr;
        // SAFETY: as in `with`; `&mut self` makes the access exclusive.
        self.owner.borrowed(|| f(unsafe { ptr.as_mut() }))
    }
}

impl<T: Copy> Tracked<T> {
    /// Copies the payload out.
    pub fn get(&self) -> Result<T> {
        self.with(|value| *value)
    }
}

impl<T: Copy> Tracked<[T]> {
    pub fn len(&self) -> usize {
        self.ptr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.with(<[T]>::to_vec)
    }
}

impl<T: ?Sized> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("ptr", &self.ptr.cast::<u8>())
            .field("owner", &self.owner)
            .finish()
    }
}

/// Allocator over a memory context, for arena-resident collections.
///
/// Holds the context borrowed: resetting it while a collection built on
/// the allocator is alive panics.
#[derive(Clone)]
pub struct ContextAllocator {
    owner: TrackedMemoryContext,
    _pin: ContextPin,
}

impl ContextAllocator {
    pub fn context(&self) -> MemoryContext {
        self.owner.context
    }
}

unsafe impl Allocator for ContextAllocator {
    fn allocate(&self, layout: Layout) -> core::result::Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            let dangling = NonNull::new(layout.align() as *mut u8).ok_or(AllocError)?;
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }
        self.owner
            .session
            .host()
            .alloc(self.owner.context.0, layout)
            .map(|ptr| NonNull::slice_from_raw_parts(ptr, layout.size()))
            .ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            self.owner.session.host().free(ptr);
        }
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;
