//! Deferred command queue.
//!
//! While the world is in deferred mode (a query iterator is alive, or
//! `defer_begin` was called) structural operations are recorded here and
//! replayed in order once the outermost deferred scope ends.

use std::{alloc::Layout, fmt, ptr::NonNull};

use crate::{
    component::{CopyFn, TypeInfo},
    entity::Entity,
    id::Id,
};

/// A component value owned by a queued command.
///
/// The value lives in its own aligned allocation and is dropped with the
/// component's destructor unless a flush moves it into a table.
pub(crate) struct CommandValue {
    data: NonNull<u8>,
    info: TypeInfo,
    live: bool,
}

impl CommandValue {
    fn allocate(info: &TypeInfo) -> NonNull<u8> {
        let layout = info.layout();
        if layout.size() == 0 {
            return NonNull::dangling();
        }
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout))
    }

    /// Take ownership of the value at `src`.
    ///
    /// # Safety
    ///
    /// `src` must point to an initialized value described by `info`. It is
    /// logically uninitialized afterwards.
    pub(crate) unsafe fn take(info: TypeInfo, src: *mut u8) -> Self {
        let data = Self::allocate(&info);
        // SAFETY: forwarded from caller; `data` was allocated for one value.
        unsafe {
            match info.hooks().move_fn {
                Some(move_fn) => move_fn(data.as_ptr(), src, 1),
                None => std::ptr::copy_nonoverlapping(src, data.as_ptr(), info.size()),
            }
        }
        Self {
            data,
            info,
            live: true,
        }
    }

    /// Clone the value at `src` with `copy`.
    ///
    /// # Safety
    ///
    /// `src` must point to an initialized value described by `info`, and
    /// `copy` must be that component's copy hook.
    pub(crate) unsafe fn copied(info: TypeInfo, copy: CopyFn, src: *const u8) -> Self {
        let data = Self::allocate(&info);
        // SAFETY: forwarded from caller; `data` was allocated for one value.
        unsafe { copy(data.as_ptr(), src, 1) };
        Self {
            data,
            info,
            live: true,
        }
    }

    /// Copy plain bytes into an owned value. `bytes.len()` must equal the
    /// component size.
    pub(crate) fn from_bytes(info: TypeInfo, bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), info.size());
        let data = Self::allocate(&info);
        // SAFETY: `data` holds `info.size()` bytes, the lengths match.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), data.as_ptr(), bytes.len()) };
        Self {
            data,
            info,
            live: true,
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Mark the value as moved out; only the allocation is released on drop.
    pub(crate) fn consume(mut self) {
        self.live = false;
    }
}

impl Drop for CommandValue {
    fn drop(&mut self) {
        if self.live
            && let Some(dtor) = self.info.hooks().dtor
        {
            // SAFETY: the value is initialized while `live`.
            unsafe { dtor(self.data.as_ptr(), 1) };
        }
        let layout: Layout = self.info.layout();
        if layout.size() > 0 {
            // SAFETY: allocated in `allocate` with the same layout.
            unsafe { std::alloc::dealloc(self.data.as_ptr(), layout) };
        }
    }
}

impl fmt::Debug for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandValue")
            .field("type", &self.info.name())
            .field("live", &self.live)
            .finish()
    }
}

/// A structural operation recorded in deferred mode.
#[derive(Debug)]
pub(crate) enum Command {
    /// Put an entity created while deferred into the root table.
    Place { entity: Entity },
    Add { entity: Entity, id: Id },
    Remove { entity: Entity, id: Id },
    Set { entity: Entity, id: Id, value: CommandValue },
    Enable { entity: Entity, id: Id, enabled: bool },
    Clear { entity: Entity },
    Delete { entity: Entity },
}

impl Command {
    pub(crate) const fn entity(&self) -> Entity {
        match self {
            Self::Place { entity }
            | Self::Add { entity, .. }
            | Self::Remove { entity, .. }
            | Self::Set { entity, .. }
            | Self::Enable { entity, .. }
            | Self::Clear { entity }
            | Self::Delete { entity } => *entity,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Take every queued command, leaving the queue empty.
    pub(crate) fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unconsumed_value_is_dropped() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut value = std::mem::ManuallyDrop::new(Counted(drops.clone()));
        let stored = unsafe { CommandValue::take(TypeInfo::of::<Counted>(), (&raw mut *value).cast()) };
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(stored);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_consumed_value_is_not_dropped() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut value = std::mem::ManuallyDrop::new(Counted(drops.clone()));
        let stored = unsafe { CommandValue::take(TypeInfo::of::<Counted>(), (&raw mut *value).cast()) };

        // Move the value back out, as a flush would into a column.
        let restored = unsafe { stored.as_ptr().cast::<Counted>().read() };
        stored.consume();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(restored);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_bytes() {
        let stored = CommandValue::from_bytes(TypeInfo::of::<u32>(), &7u32.to_ne_bytes());
        assert_eq!(unsafe { stored.as_ptr().cast::<u32>().read() }, 7);
    }

    #[test]
    fn test_queue_preserves_order() {
        let mut queue = CommandQueue::default();
        let a = Entity::new(10, crate::Generation::new());
        let b = Entity::new(11, crate::Generation::new());
        queue.push(Command::Place { entity: a });
        queue.push(Command::Delete { entity: b });
        assert_eq!(queue.len(), 2);

        let commands = queue.take();
        assert!(queue.is_empty());
        assert_eq!(commands[0].entity(), a);
        assert!(matches!(commands[1], Command::Delete { .. }));
    }
}
