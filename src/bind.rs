//! Bind descriptors and the per-statement binding array.
//!
//! A [`BindSlot`] describes either a parameter to send or a result column
//! to receive. [`BindArray`] owns the resizable descriptor array a
//! [`Statement`](crate::Statement) reuses across calls: capacity is a
//! high-water mark that only grows, while every resize zero-initializes the
//! active region so that stale type tags or buffers from a previous binding
//! pass can never leak into a new one.

use std::borrow::Cow;

/// Wire type tag of a bind descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldType {
    /// No type bound yet (the zero-initialized state).
    #[default]
    Null,
    /// 1-byte integer.
    Tiny,
    /// 2-byte integer.
    Short,
    /// 4-byte integer.
    Long,
    /// 8-byte integer.
    LongLong,
    /// Character string.
    String,
    /// Binary large object.
    LongBlob,
}

/// Map an integer width in bytes to its wire type.
///
/// # Panics
///
/// Panics on a width other than 1, 2, 4, or 8. An unrecognized width is a
/// programming error in the caller, not a runtime condition.
#[allow(clippy::panic)]
#[must_use]
pub fn int_field_type(width: usize) -> FieldType {
    match width {
        1 => FieldType::Tiny,
        2 => FieldType::Short,
        4 => FieldType::Long,
        8 => FieldType::LongLong,
        n => panic!("integer bind of {n} bytes has no wire type"),
    }
}

/// Fixed-width integers bindable as parameters or result buffers.
pub trait IntValue: Copy + Default {
    /// Width in bytes (1, 2, 4, or 8).
    const WIDTH: usize;
    /// Whether the type is unsigned.
    const UNSIGNED: bool;
    /// Append the little-endian encoding to `buf`.
    fn write_le(self, buf: &mut Vec<u8>);
}

macro_rules! impl_int_value {
    ($($ty:ty => $unsigned:expr),* $(,)?) => {
        $(impl IntValue for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const UNSIGNED: bool = $unsigned;
            fn write_le(self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }
        })*
    };
}

impl_int_value! {
    i8 => false, u8 => true,
    i16 => false, u16 => true,
    i32 => false, u32 => true,
    i64 => false, u64 => true,
}

/// One descriptor slot: a parameter to send or a result column to receive.
///
/// `Default` is the fully zero-initialized state every binding pass starts
/// from. For parameters the slot owns the value bytes; for results it owns
/// the receive buffer, and the driver sets the null flag and actual-length
/// indicator on fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindSlot {
    /// Wire type tag.
    pub field_type: FieldType,
    /// Value bytes (parameter) or receive buffer (result).
    pub buffer: Vec<u8>,
    /// Whether an integer slot is unsigned.
    pub is_unsigned: bool,
    /// Null flag; set by the driver on fetch, or by the binder for a NULL
    /// parameter.
    pub is_null: bool,
    /// Actual byte length of variable-length data, as distinct from the
    /// buffer's allocated size.
    pub length: usize,
}

impl BindSlot {
    /// Bind a string parameter.
    pub fn set_str_param(&mut self, value: &str) {
        self.field_type = FieldType::String;
        self.buffer = value.as_bytes().to_vec();
        self.length = self.buffer.len();
        self.is_null = false;
    }

    /// Bind a binary parameter.
    ///
    /// Values larger than the server's packet limit are streamed in chunks
    /// by [`Statement::bind_params`](crate::Statement::bind_params); nothing
    /// extra is needed here.
    pub fn set_blob_param(&mut self, value: &[u8]) {
        self.field_type = FieldType::LongBlob;
        self.buffer = value.to_vec();
        self.length = self.buffer.len();
        self.is_null = false;
    }

    /// Bind an explicit SQL NULL parameter.
    pub fn set_null_param(&mut self) {
        self.field_type = FieldType::Null;
        self.buffer = Vec::new();
        self.length = 0;
        self.is_null = true;
    }

    /// Bind an integer parameter.
    pub fn set_int_param<T: IntValue>(&mut self, value: T) {
        self.field_type = int_field_type(T::WIDTH);
        self.is_unsigned = T::UNSIGNED;
        self.buffer = Vec::with_capacity(T::WIDTH);
        value.write_le(&mut self.buffer);
        self.length = T::WIDTH;
        self.is_null = false;
    }

    /// Bind a string result buffer of `capacity` bytes.
    pub fn set_str_result(&mut self, capacity: usize) {
        self.field_type = FieldType::String;
        self.buffer = vec![0; capacity];
        self.length = 0;
    }

    /// Bind an integer result buffer for type `T`.
    pub fn set_int_result<T: IntValue>(&mut self) {
        self.field_type = int_field_type(T::WIDTH);
        self.is_unsigned = T::UNSIGNED;
        self.buffer = vec![0; T::WIDTH];
        self.length = T::WIDTH;
    }

    /// Bind a zero-length long-blob placeholder.
    ///
    /// The fetch will mark the column truncated and report its actual
    /// length, after which
    /// [`Statement::get_long_blob`](crate::Statement::get_long_blob) reads
    /// the value with a right-sized buffer. This avoids allocating
    /// worst-case buffers for every row.
    pub fn set_long_blob_result(&mut self) {
        self.field_type = FieldType::LongBlob;
        self.buffer = Vec::new();
        self.length = 0;
    }

    /// Read a fetched integer result, zero-extended to `u64`.
    #[must_use]
    pub fn uint_value(&self) -> u64 {
        let mut raw = [0u8; 8];
        let n = self.buffer.len().min(8);
        raw[..n].copy_from_slice(&self.buffer[..n]);
        u64::from_le_bytes(raw)
    }

    /// Read a fetched string result.
    ///
    /// Returns the first [`length`](Self::length) bytes of the buffer, or
    /// an empty string when the column was NULL.
    #[must_use]
    pub fn text_value(&self) -> Cow<'_, str> {
        if self.is_null {
            return Cow::Borrowed("");
        }
        let end = self.length.min(self.buffer.len());
        String::from_utf8_lossy(&self.buffer[..end])
    }
}

/// Grow-only descriptor array with explicit capacity/size separation.
///
/// The allocated capacity is a high-water mark reused across calls with
/// varying parameter or column counts; only the logical size changes, and
/// the active region is zero-initialized on every resize. A resize to zero
/// releases the array entirely.
#[derive(Debug, Default)]
pub struct BindArray {
    slots: Vec<BindSlot>,
    len: usize,
}

impl BindArray {
    /// Create an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the logical size to `count`, zero-initializing the active region.
    ///
    /// Grows the allocation when `count` exceeds the high-water mark and
    /// never shrinks it, except that `count == 0` frees the array.
    pub fn resize(&mut self, count: usize) {
        if count == 0 {
            self.slots = Vec::new();
            self.len = 0;
            return;
        }
        if count > self.slots.len() {
            self.slots.resize_with(count, BindSlot::default);
        }
        for slot in &mut self.slots[..count] {
            *slot = BindSlot::default();
        }
        self.len = count;
    }

    /// Current logical size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the logical size is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity (the high-water mark).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The active descriptors.
    #[must_use]
    pub fn slots(&self) -> &[BindSlot] {
        &self.slots[..self.len]
    }

    /// The active descriptors, mutably.
    pub fn slots_mut(&mut self) -> &mut [BindSlot] {
        &mut self.slots[..self.len]
    }
}
