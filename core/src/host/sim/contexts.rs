//! Memory context tree of the simulated host.

use core::alloc::Layout;
use core::num::NonZeroUsize;
use core::ptr::NonNull;

use bumpalo::Bump;
use hashbrown::HashMap;

use crate::host::ContextId;

pub(super) type ResetCallback = Box<dyn FnOnce()>;

struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    bump: Bump,
    allocated: usize,
    chunks: Vec<usize>,
    callbacks: Vec<ResetCallback>,
}

struct Chunk {
    context: usize,
    size: usize,
}

/// Contexts indexed by `ContextId - 1`. Ids are never reused.
pub(super) struct ContextTree {
    nodes: Vec<Option<Node>>,
    generations: Vec<u64>,
    names: Vec<String>,
    chunks: HashMap<usize, Chunk>,
    limit: Option<usize>,
}

pub(super) fn index_of(id: ContextId) -> usize {
    id.get() - 1
}

pub(super) fn id_of(index: usize) -> ContextId {
    ContextId::new(NonZeroUsize::MIN.saturating_add(index))
}

impl ContextTree {
    pub(super) fn new(limit: Option<usize>) -> Self {
        ContextTree {
            nodes: Vec::new(),
            generations: Vec::new(),
            names: Vec::new(),
            chunks: HashMap::new(),
            limit,
        }
    }

    pub(super) fn create(&mut self, parent: Option<usize>, name: &str) -> usize {
        let index = self.nodes.len();
        let parent = parent.filter(|p| self.is_live(*p));
        self.nodes.push(Some(Node {
            parent,
            children: Vec::new(),
            bump: Bump::new(),
            allocated: 0,
            chunks: Vec::new(),
            callbacks: Vec::new(),
        }));
        self.generations.push(0);
        self.names.push(name.to_string());
        if let Some(Some(parent)) = parent.map(|p| self.nodes[p].as_mut()) {
            parent.children.push(index);
        }
        index
    }

    pub(super) fn is_live(&self, index: usize) -> bool {
        matches!(self.nodes.get(index), Some(Some(_)))
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.nodes.get_mut(index).and_then(Option::as_mut)
    }

    pub(super) fn alloc(&mut self, index: usize, layout: Layout) -> Option<NonNull<u8>> {
        let limit = self.limit;
        let node = self.node_mut(index)?;
        let allocated = node.allocated.checked_add(layout.size())?;
        if limit.is_some_and(|limit| allocated > limit) {
            return None;
        }
        let ptr = node.bump.try_alloc_layout(layout).ok()?;
        node.allocated = allocated;
        node.chunks.push(ptr.as_ptr() as usize);
        self.chunks.insert(
            ptr.as_ptr() as usize,
            Chunk {
                context: index,
                size: layout.size(),
            },
        );
        Some(ptr)
    }

    /// Forgets a chunk. The bump arena keeps the memory until reset.
    pub(super) fn free(&mut self, addr: usize) {
        self.chunks.remove(&addr);
    }

    pub(super) fn chunk(&self, addr: usize) -> Option<(usize, usize)> {
        self.chunks.get(&addr).map(|c| (c.context, c.size))
    }

    pub(super) fn children(&self, index: usize) -> Vec<usize> {
        match self.nodes.get(index) {
            Some(Some(node)) => node.children.clone(),
            _ => Vec::new(),
        }
    }

    pub(super) fn take_callbacks(&mut self, index: usize) -> Vec<ResetCallback> {
        self.node_mut(index)
            .map(|node| core::mem::take(&mut node.callbacks))
            .unwrap_or_default()
    }

    pub(super) fn callback_count(&self, index: usize) -> usize {
        match self.nodes.get(index) {
            Some(Some(node)) => node.callbacks.len(),
            _ => 0,
        }
    }

    pub(super) fn register_callback(&mut self, index: usize, callback: ResetCallback) -> bool {
        match self.node_mut(index) {
            Some(node) => {
                node.callbacks.push(callback);
                true
            }
            None => false,
        }
    }

    /// Frees the memory of `index` and advances its generation. Children
    /// must already be released.
    pub(super) fn release(&mut self, index: usize, delete: bool) {
        let Some(node) = self.node_mut(index) else {
            return;
        };
        let chunks = core::mem::take(&mut node.chunks);
        node.bump.reset();
        node.allocated = 0;
        let parent = node.parent;
        for addr in chunks {
            self.chunks.remove(&addr);
        }
        self.generations[index] += 1;
        if delete {
            self.nodes[index] = None;
            if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
                parent.children.retain(|c| *c != index);
            }
        }
    }

    pub(super) fn set_parent(&mut self, index: usize, new_parent: usize) {
        if !self.is_live(new_parent) {
            return;
        }
        let old_parent = match self.node_mut(index) {
            Some(node) => node.parent.replace(new_parent),
            None => return,
        };
        if let Some(old) = old_parent.and_then(|p| self.node_mut(p)) {
            old.children.retain(|c| *c != index);
        }
        if let Some(parent) = self.node_mut(new_parent) {
            parent.children.push(index);
        }
    }

    pub(super) fn generation(&self, index: usize) -> u64 {
        self.generations.get(index).copied().unwrap_or(0)
    }

    pub(super) fn parent(&self, index: usize) -> Option<usize> {
        match self.nodes.get(index) {
            Some(Some(node)) => node.parent,
            _ => None,
        }
    }

    pub(super) fn name(&self, index: usize) -> String {
        self.names.get(index).cloned().unwrap_or_default()
    }

    pub(super) fn allocated(&self, index: usize) -> usize {
        match self.nodes.get(index) {
            Some(Some(node)) => node.allocated,
            _ => 0,
        }
    }
}
