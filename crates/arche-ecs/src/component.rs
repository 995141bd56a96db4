//! Component type information and lifecycle hooks.
//!
//! Components are entities whose id carries a [`TypeInfo`]: a layout plus a
//! table of function pointers used by columns to construct, destroy, copy and
//! move values without knowing their Rust type. Ids without type info (or with
//! a zero size) are tags and get no column.

use std::{
    alloc::Layout,
    any::{TypeId, type_name},
    fmt, ptr,
};

use crate::{
    HashMap,
    entity::EntityIndexRaw,
    error::{EcsError, EcsResult},
    id::Id,
};

/// Marker trait for types that can be stored as components.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Construct `count` values in uninitialized memory.
pub type CtorFn = unsafe fn(dst: *mut u8, count: usize);
/// Destroy `count` initialized values.
pub type DtorFn = unsafe fn(ptr: *mut u8, count: usize);
/// Clone `count` values from `src` into uninitialized `dst`.
pub type CopyFn = unsafe fn(dst: *mut u8, src: *const u8, count: usize);
/// Move `count` values from `src` into uninitialized `dst`. `src` is left
/// logically uninitialized.
pub type MoveFn = unsafe fn(dst: *mut u8, src: *mut u8, count: usize);

/// Lifecycle hooks of a component. Missing hooks fall back to no-op (dtor)
/// and `memcpy` (move). A component registered from a Rust type without a
/// ctor cannot be added without a value, and a missing copy hook makes
/// copy-requiring operations fail, both with [`EcsError::MissingHook`].
/// Components described only by a layout are zero-filled instead.
#[derive(Clone, Copy, Default)]
pub struct TypeHooks {
    pub ctor: Option<CtorFn>,
    pub dtor: Option<DtorFn>,
    pub copy: Option<CopyFn>,
    pub move_fn: Option<MoveFn>,
}

impl TypeHooks {
    /// Hooks every Rust type needs: a destructor when `T` has drop glue.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            dtor: if std::mem::needs_drop::<T>() {
                Some(drop_n::<T>)
            } else {
                None
            },
            ..Self::default()
        }
    }

    /// Construct new values with `T::default()` instead of zero-filling.
    #[must_use]
    pub fn with_default<T: Component + Default>(mut self) -> Self {
        self.ctor = Some(default_n::<T>);
        self
    }

    /// Copy values with `T::clone()`.
    #[must_use]
    pub fn with_clone<T: Component + Clone>(mut self) -> Self {
        self.copy = Some(clone_n::<T>);
        self
    }
}

impl fmt::Debug for TypeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHooks")
            .field("ctor", &self.ctor.is_some())
            .field("dtor", &self.dtor.is_some())
            .field("copy", &self.copy.is_some())
            .field("move", &self.move_fn.is_some())
            .finish()
    }
}

unsafe fn drop_n<T>(ptr: *mut u8, count: usize) {
    let ptr = ptr.cast::<T>();
    for i in 0..count {
        // SAFETY: caller guarantees `count` initialized values at `ptr`.
        unsafe { ptr::drop_in_place(ptr.add(i)) };
    }
}

unsafe fn default_n<T: Default>(dst: *mut u8, count: usize) {
    let dst = dst.cast::<T>();
    for i in 0..count {
        // SAFETY: caller guarantees room for `count` values at `dst`.
        unsafe { dst.add(i).write(T::default()) };
    }
}

unsafe fn clone_n<T: Clone>(dst: *mut u8, src: *const u8, count: usize) {
    let (dst, src) = (dst.cast::<T>(), src.cast::<T>());
    for i in 0..count {
        // SAFETY: caller guarantees `count` initialized values at `src` and
        // room for `count` values at `dst`.
        unsafe { dst.add(i).write((*src.add(i)).clone()) };
    }
}

/// Runtime information about a component.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    name: &'static str,
    layout: Layout,
    hooks: TypeHooks,
    type_id: Option<TypeId>,
}

impl TypeInfo {
    /// Type info for a Rust type with its default hooks.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::with_hooks::<T>(TypeHooks::of::<T>())
    }

    #[must_use]
    pub fn with_hooks<T: Component>(hooks: TypeHooks) -> Self {
        Self {
            name: type_name::<T>(),
            layout: Layout::new::<T>(),
            hooks,
            type_id: Some(TypeId::of::<T>()),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }

    #[must_use]
    pub const fn hooks(&self) -> &TypeHooks {
        &self.hooks
    }

    /// Whether values of this component occupy column storage.
    #[must_use]
    pub const fn has_data(&self) -> bool {
        self.layout.size() > 0
    }

    /// Whether a value can be created without one being supplied: through
    /// the ctor hook, or by zero-filling a component that has no Rust type.
    #[must_use]
    pub const fn can_default(&self) -> bool {
        self.hooks.ctor.is_some() || self.type_id.is_none()
    }

    /// Check if this info was registered for the Rust type `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == Some(TypeId::of::<T>())
    }

    /// Fail with [`EcsError::TypeMismatch`] unless this info describes `T`.
    pub fn expect_type<T: 'static>(&self, id: Id) -> EcsResult<()> {
        if self.is::<T>() {
            Ok(())
        } else {
            Err(EcsError::TypeMismatch {
                id,
                expected: self.name,
                actual: type_name::<T>(),
            })
        }
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Description of a component registered without a Rust type.
#[derive(Clone, Copy, Debug)]
pub struct ComponentDesc {
    name: &'static str,
    layout: Layout,
    hooks: TypeHooks,
}

impl ComponentDesc {
    /// Describe a component of `size` bytes aligned to `align`.
    pub fn new(name: &'static str, size: usize, align: usize) -> EcsResult<Self> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| EcsError::InvalidParameter("invalid component layout"))?;
        Ok(Self {
            name,
            layout,
            hooks: TypeHooks::default(),
        })
    }

    /// A zero-sized component.
    #[must_use]
    pub const fn tag(name: &'static str) -> Self {
        Self {
            name,
            layout: Layout::new::<()>(),
            hooks: TypeHooks {
                ctor: None,
                dtor: None,
                copy: None,
                move_fn: None,
            },
        }
    }

    #[must_use]
    pub fn hooks(mut self, hooks: TypeHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl From<ComponentDesc> for TypeInfo {
    fn from(desc: ComponentDesc) -> Self {
        Self {
            name: desc.name,
            layout: desc.layout,
            hooks: desc.hooks,
            type_id: None,
        }
    }
}

/// Per-world registry of component type information.
///
/// Maps Rust types to their component ids and stores the [`TypeInfo`] of
/// every component entity, keyed by entity index.
#[derive(Default)]
pub struct ComponentRegistry {
    type_to_id: HashMap<TypeId, Id>,
    infos: HashMap<EntityIndexRaw, TypeInfo>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach type info to a component entity.
    pub(crate) fn insert(&mut self, id: Id, info: TypeInfo) {
        if let Some(type_id) = info.type_id {
            self.type_to_id.insert(type_id, id);
        }
        self.infos.insert(id.index(), info);
    }

    /// Forget a deleted component entity.
    pub(crate) fn remove(&mut self, id: Id) -> Option<TypeInfo> {
        let info = self.infos.remove(&id.index())?;
        if let Some(type_id) = info.type_id {
            self.type_to_id.remove(&type_id);
        }
        Some(info)
    }

    /// Component id registered for `T`.
    #[must_use]
    pub fn id_of<T: Component>(&self) -> Option<Id> {
        self.type_to_id.get(&TypeId::of::<T>()).copied()
    }

    /// Type info describing the data stored for `id`, if any.
    ///
    /// Plain ids use their own info. A pair takes the relationship's info
    /// when the relationship carries data, otherwise the target's. Wildcards
    /// and ids with marker flags never carry data.
    #[must_use]
    pub fn type_info(&self, id: Id) -> Option<&TypeInfo> {
        if id.is_null() || id.is_wildcard() || id.has_marker_flags() {
            return None;
        }
        if id.is_pair() {
            let with_data = |index| self.infos.get(&index).filter(|info| info.has_data());
            return with_data(id.first()).or_else(|| with_data(id.second()));
        }
        self.infos.get(&id.index())
    }

    /// Whether `id` is a registered component entity.
    #[must_use]
    pub fn contains(&self, id: Id) -> bool {
        !id.is_pair() && self.infos.contains_key(&id.index())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("count", &self.len())
            .finish()
    }
}
