//! Block/event descriptors and the registry that owns them (spec §4.3, C3).
//!
//! A descriptor is registered once per call site, the first time that
//! `block!`/`event!` macro expansion runs, and its handle is cached in a
//! call-site static from then on (spec §9 Design Notes, "register on first
//! use"). The registry itself is only ever touched on that first call, so
//! its locking cost is amortized across the whole process lifetime.

use std::borrow::Cow;
use std::sync::{Arc, RwLock};

use bitflags::bitflags;

bitflags! {
    /// Enable/disable state of a single descriptor (spec §3).
    ///
    /// There is no defined wire-compatible encoding to preserve here (unlike
    /// the context-switch record and thread-name quirks in spec §9, which
    /// are call-outs precisely because something else depends on their
    /// exact bytes); this bit layout is local to this crate's own capture
    /// format and was chosen fresh rather than guessed from an external
    /// reference.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BlockStatus: u8 {
        /// Block is being collected.
        const ENABLED       = 0b0001;
        /// Enabling this block also force-enables it past a parent's
        /// `OffRecursive`.
        const FORCE_ON      = 0b0010;
        /// Disabling this block also disables every block nested under it.
        const OFF_RECURSIVE = 0b0100;
        /// Block is collected but its children are not.
        const NO_CHILDREN   = 0b1000;
    }
}

impl BlockStatus {
    pub const OFF: Self = Self::empty();
    pub const ON: Self = Self::ENABLED;
    pub const FORCE_ON_STATUS: Self = Self::ENABLED.union(Self::FORCE_ON);
    /// The descriptor itself is still recorded; only its descendants are
    /// suppressed (spec §7 "OffRecursive on a parent").
    pub const OFF_RECURSIVE_STATUS: Self = Self::ENABLED.union(Self::OFF_RECURSIVE);
    pub const ON_WITHOUT_CHILDREN: Self = Self::ENABLED.union(Self::NO_CHILDREN);
    pub const FORCE_ON_WITHOUT_CHILDREN: Self =
        Self::ENABLED.union(Self::FORCE_ON).union(Self::NO_CHILDREN);

    pub fn is_enabled(self) -> bool {
        self.contains(Self::ENABLED)
    }

    pub fn allows_children(self) -> bool {
        !self.contains(Self::NO_CHILDREN)
    }

    pub fn is_off_recursive(self) -> bool {
        self.contains(Self::OFF_RECURSIVE)
    }

    pub fn is_forced(self) -> bool {
        self.contains(Self::FORCE_ON)
    }
}

impl Default for BlockStatus {
    fn default() -> Self {
        Self::OFF
    }
}

/// What kind of timing a block represents (spec §3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlockType {
    /// A scoped region with a begin and an end tick.
    Block,
    /// An instantaneous marker with only a begin tick.
    Event,
    /// An arbitrary-value sample rather than a timing record.
    Value,
}

/// An RGB color packed the way the capture format stores it (spec §4.7):
/// `0x00RRGGBB`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Color(pub u32);

impl Color {
    pub const DEFAULT: Color = Color(0x00ff_ff00);

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }
}

/// A handle into the registry, cheap to copy and hold in a call-site static.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub u32);

/// Static metadata about a block/event name, shared across every thread
/// that records it (spec §4.3).
///
/// `name` is a `Cow` rather than `&'static str` so a descriptor registered
/// at runtime with `copy_name = true` (spec §6.1 `register_description`)
/// can own a name built from something other than a string literal, e.g. a
/// `format!`-assembled label; the common macro-driven call site still
/// borrows its literal for free.
#[derive(Debug)]
pub struct BlockDescriptor {
    pub id: DescriptorId,
    pub name: Cow<'static, str>,
    pub file: &'static str,
    pub line: i32,
    pub color: Color,
    pub kind: BlockType,
    pub status: RwLock<BlockStatus>,
}

impl BlockDescriptor {
    pub fn status(&self) -> BlockStatus {
        *self.status.read().expect("descriptor status lock poisoned")
    }

    pub fn set_status(&self, status: BlockStatus) {
        *self.status.write().expect("descriptor status lock poisoned") = status;
    }
}

/// Owns every descriptor registered by the process (C3).
///
/// Registration takes a write lock over both the name index and the vector
/// of descriptors; every other access (status reads, dump-time iteration)
/// only needs the read side, and happens far less often than once per call.
pub struct DescriptorRegistry {
    inner: RwLock<Inner>,
}

struct Inner {
    descriptors: Vec<Arc<BlockDescriptor>>,
    by_site: std::collections::HashMap<(&'static str, i32), DescriptorId>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner { descriptors: Vec::new(), by_site: std::collections::HashMap::new() }),
        }
    }

    /// Finds or creates the descriptor for a call site, identified by
    /// `(file, line)` so that two macro expansions with the same literal
    /// name at different sites never collide (spec §6.1
    /// `register_description`).
    ///
    /// `copy_name` mirrors the upstream API's storage-duration flag: when
    /// `true`, the registry takes its own owned copy of `name` rather than
    /// trusting the caller's borrow to outlive the descriptor, which
    /// matters for a name built at the call site (e.g. `format!(...)`)
    /// rather than a string literal.
    pub fn register(
        &self,
        name: impl Into<Cow<'static, str>>,
        file: &'static str,
        line: i32,
        color: Color,
        kind: BlockType,
        default_status: BlockStatus,
        copy_name: bool,
    ) -> Arc<BlockDescriptor> {
        if let Some(existing) = self.lookup(file, line) {
            return existing;
        }

        let mut inner = self.inner.write().expect("descriptor registry lock poisoned");
        // Re-check under the write lock: another thread may have raced us
        // from the read-only fast path above.
        if let Some(&id) = inner.by_site.get(&(file, line)) {
            return inner.descriptors[id.0 as usize].clone();
        }

        let name: Cow<'static, str> = if copy_name { Cow::Owned(name.into().into_owned()) } else { name.into() };
        let id = DescriptorId(inner.descriptors.len() as u32);
        let descriptor = Arc::new(BlockDescriptor {
            id,
            name,
            file,
            line,
            color,
            kind,
            status: RwLock::new(default_status),
        });
        inner.descriptors.push(descriptor.clone());
        inner.by_site.insert((file, line), id);
        descriptor
    }

    fn lookup(&self, file: &'static str, line: i32) -> Option<Arc<BlockDescriptor>> {
        let inner = self.inner.read().expect("descriptor registry lock poisoned");
        inner.by_site.get(&(file, line)).map(|&id| inner.descriptors[id.0 as usize].clone())
    }

    pub fn get(&self, id: DescriptorId) -> Arc<BlockDescriptor> {
        let inner = self.inner.read().expect("descriptor registry lock poisoned");
        inner.descriptors[id.0 as usize].clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("descriptor registry lock poisoned").descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every descriptor, in registration order, for dump-time
    /// serialization (spec §4.7 descriptor table).
    pub fn snapshot(&self) -> Vec<Arc<BlockDescriptor>> {
        self.inner.read().expect("descriptor registry lock poisoned").descriptors.clone()
    }

    /// Applies a `ChangeBlockStatus` network request (spec §6.2) to one
    /// descriptor by id.
    pub fn set_status(&self, id: DescriptorId, status: BlockStatus) {
        let inner = self.inner.read().expect("descriptor registry lock poisoned");
        if let Some(descriptor) = inner.descriptors.get(id.0 as usize) {
            descriptor.set_status(status);
        }
    }
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
