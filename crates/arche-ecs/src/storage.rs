//! Type-erased column storage for tables.
//!
//! Each column stores values of a single component in a contiguous array and
//! drives their lifecycle through the component's [`TypeHooks`]. Pointers into
//! a column are invalidated by growth and swap-removal.
//!
//! [`TypeHooks`]: crate::TypeHooks

use std::{alloc::Layout, ptr::NonNull};

use crate::component::TypeInfo;

/// A column of values of one component.
pub struct Column {
    data: NonNull<u8>,
    len: usize,
    capacity: usize,
    info: TypeInfo,
}

// SAFETY: Column owns its buffer and only stores `Component` values, which are
// `Send + Sync`, or raw data registered by the user with the same contract.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create a new empty column. Only components with a non-zero size get a
    /// column.
    #[must_use]
    pub fn new(info: TypeInfo) -> Self {
        debug_assert!(info.has_data(), "tags do not get columns");
        Self {
            data: NonNull::dangling(),
            len: 0,
            capacity: 0,
            info,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn info(&self) -> &TypeInfo {
        &self.info
    }

    /// Grow by one element and return a pointer to it. The element is
    /// uninitialized: the caller must write it before the column is touched
    /// again.
    pub fn push_uninit(&mut self) -> *mut u8 {
        self.reserve(1);
        // SAFETY: we just reserved space for index `len`.
        let dst = unsafe { self.get_unchecked_raw(self.len) };
        self.len += 1;
        dst
    }

    /// Grow by one element initialized with the constructor hook, or zeroed
    /// when the component has none. Zeroing is only valid for components
    /// without a Rust type (see [`TypeInfo::can_default`]); the world checks
    /// this before adding an id without a value.
    pub fn push_default(&mut self) {
        let dst = self.push_uninit();
        // SAFETY: `dst` is valid for one element of this component.
        unsafe {
            match self.info.hooks().ctor {
                Some(ctor) => ctor(dst, 1),
                None => std::ptr::write_bytes(dst, 0, self.info.size()),
            }
        }
    }

    /// Move the value at `src` into a new element.
    ///
    /// # Safety
    ///
    /// `src` must point to an initialized value of this column's component.
    /// It is logically uninitialized afterwards.
    pub unsafe fn push_move(&mut self, src: *mut u8) {
        let dst = self.push_uninit();
        // SAFETY: caller guarantees `src`, `dst` was just reserved.
        unsafe { self.move_value(dst, src) };
    }

    /// Move one value from `src` to uninitialized `dst`.
    ///
    /// # Safety
    ///
    /// `src` must hold an initialized value of this component, `dst` must be
    /// valid for writes of one element and must not overlap `src`.
    pub unsafe fn move_value(&self, dst: *mut u8, src: *mut u8) {
        // SAFETY: forwarded from caller.
        unsafe {
            match self.info.hooks().move_fn {
                Some(move_fn) => move_fn(dst, src, 1),
                None => std::ptr::copy_nonoverlapping(src, dst, self.info.size()),
            }
        }
    }

    /// Remove the element at `index` without dropping it, moving the last
    /// element into the hole. Used after the value was moved out.
    ///
    /// Returns the old index of the element now at `index`, or `None` if
    /// `index` was the last element.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len` and the value there must already be
    /// moved out or destroyed.
    pub unsafe fn swap_remove_forget(&mut self, index: usize) -> Option<usize> {
        debug_assert!(index < self.len, "Index out of bounds in swap_remove");
        self.len -= 1;

        if index < self.len {
            // SAFETY: both indices are in bounds and distinct.
            unsafe {
                let hole = self.get_unchecked_raw(index);
                let last = self.get_unchecked_raw(self.len);
                self.move_value(hole, last);
            }
            Some(self.len)
        } else {
            None
        }
    }

    /// Drop the element at `index` and swap the last element into its place.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`.
    pub unsafe fn swap_remove_drop(&mut self, index: usize) -> Option<usize> {
        debug_assert!(index < self.len, "Index out of bounds in swap_remove_drop");
        if let Some(dtor) = self.info.hooks().dtor {
            // SAFETY: index is in bounds and initialized.
            unsafe { dtor(self.get_unchecked_raw(index), 1) };
        }
        // SAFETY: the value at `index` was just destroyed.
        unsafe { self.swap_remove_forget(index) }
    }

    /// Get a raw pointer to the element at the given index.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`, or equal to it with spare capacity.
    #[must_use]
    pub unsafe fn get_unchecked_raw(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len || (index == self.len && self.len < self.capacity));
        // SAFETY: Caller ensures index is valid
        unsafe { self.data.as_ptr().add(index * self.info.size()) }
    }

    /// Pointer to the element at `index`, `None` when out of bounds.
    #[must_use]
    pub fn ptr_at(&self, index: usize) -> Option<NonNull<u8>> {
        if index >= self.len {
            return None;
        }
        // SAFETY: bounds checked above; the result is derived from `data`.
        unsafe { Some(NonNull::new_unchecked(self.get_unchecked_raw(index))) }
    }

    /// # Safety
    ///
    /// - `index` must be less than `len`.
    /// - `T` must match the column's component type.
    #[must_use]
    pub unsafe fn get_unchecked<T: 'static>(&self, index: usize) -> &T {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::get");
        // SAFETY: Caller ensures index is valid and type matches
        unsafe { &*self.get_unchecked_raw(index).cast::<T>() }
    }

    /// # Safety
    ///
    /// - `index` must be less than `len`.
    /// - `T` must match the column's component type.
    #[must_use]
    pub unsafe fn get_unchecked_mut<T: 'static>(&mut self, index: usize) -> &mut T {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::get_mut");
        // SAFETY: Caller ensures index is valid, type matches, and no aliasing
        unsafe { &mut *self.get_unchecked_raw(index).cast::<T>() }
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Reserve capacity for at least `additional` more elements.
    pub fn reserve(&mut self, additional: usize) {
        let required = self
            .len
            .checked_add(additional)
            .unwrap_or_else(|| capacity_overflow());

        if required <= self.capacity {
            return;
        }

        self.grow(required);
    }

    /// Grow the column to at least `min_capacity`: double, but at least 4.
    fn grow(&mut self, min_capacity: usize) {
        let new_capacity = self
            .capacity
            .checked_mul(2)
            .unwrap_or(min_capacity)
            .max(min_capacity)
            .max(4);

        let new_layout = Self::array_layout(&self.info, new_capacity);

        // SAFETY: layouts are non-zero sized; a custom move hook forbids
        // relocating bytes with `realloc`, so those columns move element-wise.
        let new_data = unsafe {
            if self.capacity == 0 {
                std::alloc::alloc(new_layout)
            } else if self.info.hooks().move_fn.is_some() {
                let ptr = std::alloc::alloc(new_layout);
                if !ptr.is_null() {
                    let size = self.info.size();
                    for i in 0..self.len {
                        self.move_value(ptr.add(i * size), self.data.as_ptr().add(i * size));
                    }
                    let old_layout = Self::array_layout(&self.info, self.capacity);
                    std::alloc::dealloc(self.data.as_ptr(), old_layout);
                }
                ptr
            } else {
                let old_layout = Self::array_layout(&self.info, self.capacity);
                std::alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size())
            }
        };

        self.data = NonNull::new(new_data).unwrap_or_else(|| std::alloc::handle_alloc_error(new_layout));
        self.capacity = new_capacity;
    }

    /// Drop all elements.
    pub fn clear(&mut self) {
        if let Some(dtor) = self.info.hooks().dtor
            && self.len > 0
        {
            // SAFETY: the first `len` elements are initialized.
            unsafe { dtor(self.data.as_ptr(), self.len) };
        }
        self.len = 0;
    }

    fn array_layout(info: &TypeInfo, count: usize) -> Layout {
        let size = info
            .size()
            .checked_mul(count)
            .unwrap_or_else(|| capacity_overflow());
        // SAFETY: align is always a power of 2 from Layout
        unsafe { Layout::from_size_align_unchecked(size, info.align()) }
    }
}

#[cold]
fn capacity_overflow() -> ! {
    panic!("column capacity overflow");
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear();

        if self.capacity > 0 {
            let layout = Self::array_layout(&self.info, self.capacity);
            // SAFETY: data was allocated with this layout
            unsafe { std::alloc::dealloc(self.data.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("type", &self.info.name())
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::component::{ComponentDesc, TypeHooks};

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Position {
        x: f32,
        y: f32,
    }

    fn push<T: 'static>(column: &mut Column, value: T) {
        let mut value = std::mem::ManuallyDrop::new(value);
        // SAFETY: the value is forgotten after being moved into the column.
        unsafe { column.push_move((&raw mut *value).cast()) };
    }

    #[test]
    fn test_column_push_get() {
        let mut column = Column::new(TypeInfo::of::<Position>());

        push(&mut column, Position { x: 1.0, y: 2.0 });
        push(&mut column, Position { x: 3.0, y: 4.0 });

        assert_eq!(column.len(), 2);
        assert!(column.capacity() >= 4);

        unsafe {
            assert_eq!(*column.get_unchecked::<Position>(0), Position { x: 1.0, y: 2.0 });
            assert_eq!(*column.get_unchecked::<Position>(1), Position { x: 3.0, y: 4.0 });
        }
    }

    #[test]
    fn test_column_push_default_zero_fills() {
        let mut column = Column::new(TypeInfo::from(ComponentDesc::new("Raw", 16, 8).unwrap()));
        column.push_default();
        let ptr = column.ptr_at(0).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 16) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert!(column.ptr_at(1).is_none());
    }

    #[test]
    fn test_column_push_default_uses_ctor() {
        #[derive(Clone, Copy)]
        struct Health(u32);
        impl Default for Health {
            fn default() -> Self {
                Self(100)
            }
        }

        let info = TypeInfo::with_hooks::<Health>(TypeHooks::of::<Health>().with_default::<Health>());
        let mut column = Column::new(info);
        column.push_default();
        assert_eq!(unsafe { column.get_unchecked::<Health>(0).0 }, 100);
    }

    #[test]
    fn test_column_swap_remove_drop() {
        let drops = Rc::new(Cell::new(0));

        struct Tracked(Rc<Cell<u32>>, u32);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }
        unsafe fn drop_tracked(ptr: *mut u8, count: usize) {
            for i in 0..count {
                unsafe { std::ptr::drop_in_place(ptr.cast::<Tracked>().add(i)) };
            }
        }
        let info = TypeInfo::from(
            ComponentDesc::new(
                "Tracked",
                std::mem::size_of::<Tracked>(),
                std::mem::align_of::<Tracked>(),
            )
            .unwrap()
            .hooks(TypeHooks {
                dtor: Some(drop_tracked),
                ..TypeHooks::default()
            }),
        );

        let mut column = Column::new(info);
        for i in 0..3 {
            push(&mut column, Tracked(drops.clone(), i));
        }

        let moved = unsafe { column.swap_remove_drop(0) };
        assert_eq!(moved, Some(2));
        assert_eq!(drops.get(), 1);
        assert_eq!(column.len(), 2);
        let survivor = unsafe { &*column.get_unchecked_raw(0).cast::<Tracked>() };
        assert_eq!(survivor.1, 2);

        drop(column);
        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn test_column_grow_many() {
        let mut column = Column::new(TypeInfo::of::<u64>());
        for i in 0..1000u64 {
            push(&mut column, i);
        }
        assert_eq!(column.len(), 1000);
        assert_eq!(unsafe { *column.get_unchecked::<u64>(999) }, 999);
    }
}
