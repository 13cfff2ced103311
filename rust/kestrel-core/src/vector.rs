//! Columnar vectors and batches.
//!
//! A `Vector` is one column of a batch in one of three physical layouts:
//! flat (one slot per row), constant (one slot logically replicated), or
//! dictionary (an index buffer selecting into a smaller slot buffer). All
//! layouts share a bit-packed validity mask over the *physical* slots; the
//! `UnifiedFormat` view maps logical rows to physical slots so readers never
//! branch on the layout.
//!
//! Fixed-width slots live in a raw byte buffer; VARCHAR slots are engine-owned
//! `String`s exposed across the FFI as pointer/length views.

use crate::expr::ScalarValue;
use crate::types::{Interval, LogicalTypeId};

/// Maximum number of rows in one batch. Scratch buffers sized from a batch
/// count never exceed this.
pub const STANDARD_BATCH_SIZE: usize = 2048;

// ── Validity ────────────────────────────────────────────────────────────

/// Bit-packed per-slot validity: bit set = valid, bit clear = NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    bits: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    /// An all-valid mask over `len` slots.
    pub fn all_valid(len: usize) -> Self {
        let words = len.div_ceil(64);
        ValidityMask {
            bits: vec![u64::MAX; words],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        self.bits[idx >> 6] & (1u64 << (idx & 63)) != 0
    }

    #[inline]
    pub fn set_valid(&mut self, idx: usize, valid: bool) {
        debug_assert!(idx < self.len);
        let word = idx >> 6;
        let bit = 1u64 << (idx & 63);
        if valid {
            self.bits[word] |= bit;
        } else {
            self.bits[word] &= !bit;
        }
    }

    pub fn all_rows_valid(&self) -> bool {
        (0..self.len).all(|i| self.is_valid(i))
    }

    /// Flatten into the FFI form: one byte per slot, nonzero = NULL.
    pub fn to_null_bytes(&self) -> Vec<u8> {
        (0..self.len).map(|i| u8::from(!self.is_valid(i))).collect()
    }

    /// Fold a flat FFI nullmask (nonzero = NULL) back into the bit-packed
    /// form. `bytes` must cover every slot of the mask.
    pub fn set_from_null_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() >= self.len);
        for i in 0..self.len {
            self.set_valid(i, bytes[i] == 0);
        }
    }
}

// ── Vectors ─────────────────────────────────────────────────────────────

/// Physical layout of a vector. The discriminant is carried across the FFI
/// as an informational tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VectorKind {
    Flat = 0,
    Constant = 1,
    Dictionary = 2,
}

/// One column of a batch.
#[derive(Debug, Clone)]
pub struct Vector {
    ty: LogicalTypeId,
    kind: VectorKind,
    /// Validity over physical slots.
    validity: ValidityMask,
    /// Fixed-width slot storage. Unused for VARCHAR.
    data: Vec<u8>,
    /// VARCHAR slot storage. Unused for fixed-width types.
    strings: Vec<String>,
    /// Dictionary layout only: logical row -> physical slot.
    dict_indices: Vec<u32>,
    /// Logical row count.
    len: usize,
}

impl Vector {
    /// A flat, all-valid, zero-initialized vector. The standard shape for
    /// result vectors before either evaluation path writes into it.
    pub fn flat(ty: LogicalTypeId, len: usize) -> Self {
        let mut v = Vector {
            ty,
            kind: VectorKind::Flat,
            validity: ValidityMask::all_valid(len),
            data: Vec::new(),
            strings: Vec::new(),
            dict_indices: Vec::new(),
            len,
        };
        v.resize_storage(len);
        v
    }

    /// A constant vector: one physical slot replicated over `len` rows.
    /// `value = None` is the all-NULL constant.
    pub fn constant(ty: LogicalTypeId, value: Option<ScalarValue>, len: usize) -> Self {
        let mut v = Vector {
            ty,
            kind: VectorKind::Constant,
            validity: ValidityMask::all_valid(1),
            data: Vec::new(),
            strings: Vec::new(),
            dict_indices: Vec::new(),
            len,
        };
        v.resize_storage(1);
        match value {
            Some(val) => v.write_slot(0, &val),
            None => v.validity.set_valid(0, false),
        }
        v
    }

    /// A dictionary vector over an existing flat `values` vector.
    /// `indices[row]` selects the physical slot for each logical row.
    pub fn dictionary(values: Vector, indices: Vec<u32>) -> Self {
        debug_assert_eq!(values.kind, VectorKind::Flat);
        debug_assert!(indices.iter().all(|&i| (i as usize) < values.validity.len()));
        let len = indices.len();
        Vector {
            ty: values.ty,
            kind: VectorKind::Dictionary,
            validity: values.validity,
            data: values.data,
            strings: values.strings,
            dict_indices: indices,
            len,
        }
    }

    pub fn ty(&self) -> LogicalTypeId {
        self.ty
    }

    pub fn kind(&self) -> VectorKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    pub fn validity_mut(&mut self) -> &mut ValidityMask {
        &mut self.validity
    }

    /// Raw pointer to the fixed-width slot buffer.
    pub fn data_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn data_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// VARCHAR slot storage.
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Unified read view over this vector.
    pub fn unified(&self) -> UnifiedFormat<'_> {
        UnifiedFormat { vector: self }
    }

    // ── Flat writes ─────────────────────────────────────────────────────

    /// Reshape into a flat, writable, all-valid vector of `len` rows. Any
    /// previous layout and contents are discarded.
    pub fn ensure_flat(&mut self, len: usize) {
        self.kind = VectorKind::Flat;
        self.dict_indices.clear();
        self.validity = ValidityMask::all_valid(len);
        self.len = len;
        self.resize_storage(len);
    }

    pub fn set_null(&mut self, row: usize) {
        debug_assert_eq!(self.kind, VectorKind::Flat);
        self.validity.set_valid(row, false);
    }

    /// Write a value into a flat vector, marking the row valid. The value is
    /// narrowed to the vector's physical type (`Integer(i64)` stores as i32
    /// in an INTEGER vector, etc.).
    pub fn set_value(&mut self, row: usize, value: &ScalarValue) {
        debug_assert_eq!(self.kind, VectorKind::Flat);
        self.write_slot(row, value);
        self.validity.set_valid(row, true);
    }

    /// Copy string bytes into engine-owned storage for an output row. This is
    /// the landing point of the `append_string` host callback.
    pub fn set_string(&mut self, row: usize, s: &str) {
        debug_assert_eq!(self.ty, LogicalTypeId::Varchar);
        debug_assert_eq!(self.kind, VectorKind::Flat);
        self.strings[row] = s.to_owned();
        self.validity.set_valid(row, true);
    }

    // ── Logical reads ───────────────────────────────────────────────────

    /// Read the value at a logical row through the unified view; `None` when
    /// the row is NULL. DATE and TIMESTAMP read as their integer storage
    /// values (days / microseconds since epoch).
    pub fn get_value(&self, row: usize) -> Option<ScalarValue> {
        let uv = self.unified();
        if !uv.row_is_valid(row) {
            return None;
        }
        let slot = uv.physical_index(row);
        let value = match self.ty {
            LogicalTypeId::Boolean => ScalarValue::Boolean(self.read_fixed::<u8>(slot) != 0),
            LogicalTypeId::TinyInt => ScalarValue::Integer(self.read_fixed::<i8>(slot) as i64),
            LogicalTypeId::SmallInt => ScalarValue::Integer(self.read_fixed::<i16>(slot) as i64),
            LogicalTypeId::Integer => ScalarValue::Integer(self.read_fixed::<i32>(slot) as i64),
            LogicalTypeId::BigInt => ScalarValue::Integer(self.read_fixed::<i64>(slot)),
            LogicalTypeId::Float => ScalarValue::Double(self.read_fixed::<f32>(slot) as f64),
            LogicalTypeId::Double => ScalarValue::Double(self.read_fixed::<f64>(slot)),
            LogicalTypeId::Date => ScalarValue::Integer(self.read_fixed::<i32>(slot) as i64),
            LogicalTypeId::Timestamp => ScalarValue::Integer(self.read_fixed::<i64>(slot)),
            LogicalTypeId::Interval => ScalarValue::Interval(self.read_fixed::<Interval>(slot)),
            LogicalTypeId::Varchar => ScalarValue::Varchar(self.strings[slot].clone()),
        };
        Some(value)
    }

    // ── Storage internals ───────────────────────────────────────────────

    fn resize_storage(&mut self, slots: usize) {
        match self.ty.fixed_width() {
            Some(width) => {
                self.data.clear();
                self.data.resize(slots * width, 0);
                self.strings.clear();
            }
            None => {
                self.strings.clear();
                self.strings.resize(slots, String::new());
                self.data.clear();
            }
        }
    }

    fn slot_width(&self) -> usize {
        self.ty.fixed_width().unwrap_or(0)
    }

    fn read_fixed<T: Copy>(&self, slot: usize) -> T {
        let width = std::mem::size_of::<T>();
        debug_assert_eq!(width, self.slot_width());
        let offset = slot * width;
        debug_assert!(offset + width <= self.data.len());
        // Slots are only written through write_fixed with matching width.
        unsafe { std::ptr::read_unaligned(self.data.as_ptr().add(offset) as *const T) }
    }

    fn write_fixed<T: Copy>(&mut self, slot: usize, value: T) {
        let width = std::mem::size_of::<T>();
        debug_assert_eq!(width, self.slot_width());
        let offset = slot * width;
        debug_assert!(offset + width <= self.data.len());
        unsafe { std::ptr::write_unaligned(self.data.as_mut_ptr().add(offset) as *mut T, value) }
    }

    fn write_slot(&mut self, slot: usize, value: &ScalarValue) {
        match (self.ty, value) {
            (LogicalTypeId::Boolean, ScalarValue::Boolean(b)) => {
                self.write_fixed::<u8>(slot, u8::from(*b))
            }
            (LogicalTypeId::TinyInt, ScalarValue::Integer(v)) => {
                self.write_fixed::<i8>(slot, *v as i8)
            }
            (LogicalTypeId::SmallInt, ScalarValue::Integer(v)) => {
                self.write_fixed::<i16>(slot, *v as i16)
            }
            (LogicalTypeId::Integer, ScalarValue::Integer(v)) => {
                self.write_fixed::<i32>(slot, *v as i32)
            }
            // Truncating stores, matching a C-style conversion of a float
            // division result into an integral slot.
            (LogicalTypeId::Integer, ScalarValue::Double(v)) => {
                self.write_fixed::<i32>(slot, *v as i32)
            }
            (LogicalTypeId::BigInt, ScalarValue::Integer(v)) => self.write_fixed::<i64>(slot, *v),
            (LogicalTypeId::BigInt, ScalarValue::Double(v)) => {
                self.write_fixed::<i64>(slot, *v as i64)
            }
            (LogicalTypeId::Float, ScalarValue::Double(v)) => {
                self.write_fixed::<f32>(slot, *v as f32)
            }
            (LogicalTypeId::Double, ScalarValue::Double(v)) => self.write_fixed::<f64>(slot, *v),
            (LogicalTypeId::Double, ScalarValue::Integer(v)) => {
                self.write_fixed::<f64>(slot, *v as f64)
            }
            (LogicalTypeId::Date, ScalarValue::Integer(v)) => {
                self.write_fixed::<i32>(slot, *v as i32)
            }
            (LogicalTypeId::Timestamp, ScalarValue::Integer(v)) => self.write_fixed::<i64>(slot, *v),
            (LogicalTypeId::Interval, ScalarValue::Interval(iv)) => {
                self.write_fixed::<Interval>(slot, *iv)
            }
            (LogicalTypeId::Varchar, ScalarValue::Varchar(s)) => {
                self.strings[slot] = s.clone();
            }
            (ty, value) => {
                debug_assert!(false, "value {value:?} written into {ty} vector");
            }
        }
    }

    // ── Typed constructors ──────────────────────────────────────────────
    //
    // Flat builders over optional values; used throughout the test suites
    // and the benchmark.

    fn from_values(ty: LogicalTypeId, values: &[Option<ScalarValue>]) -> Self {
        let mut v = Vector::flat(ty, values.len());
        for (row, value) in values.iter().enumerate() {
            match value {
                Some(val) => v.set_value(row, val),
                None => v.set_null(row),
            }
        }
        v
    }

    pub fn from_bools(values: &[Option<bool>]) -> Self {
        let values: Vec<_> = values.iter().map(|v| v.map(ScalarValue::Boolean)).collect();
        Self::from_values(LogicalTypeId::Boolean, &values)
    }

    pub fn from_i16s(values: &[Option<i16>]) -> Self {
        let values: Vec<_> = values
            .iter()
            .map(|v| v.map(|x| ScalarValue::Integer(x as i64)))
            .collect();
        Self::from_values(LogicalTypeId::SmallInt, &values)
    }

    pub fn from_i32s(values: &[Option<i32>]) -> Self {
        let values: Vec<_> = values
            .iter()
            .map(|v| v.map(|x| ScalarValue::Integer(x as i64)))
            .collect();
        Self::from_values(LogicalTypeId::Integer, &values)
    }

    pub fn from_i64s(values: &[Option<i64>]) -> Self {
        let values: Vec<_> = values.iter().map(|v| v.map(ScalarValue::Integer)).collect();
        Self::from_values(LogicalTypeId::BigInt, &values)
    }

    pub fn from_f64s(values: &[Option<f64>]) -> Self {
        let values: Vec<_> = values.iter().map(|v| v.map(ScalarValue::Double)).collect();
        Self::from_values(LogicalTypeId::Double, &values)
    }

    pub fn from_strings(values: &[Option<&str>]) -> Self {
        let values: Vec<_> = values
            .iter()
            .map(|v| v.map(|s| ScalarValue::Varchar(s.to_owned())))
            .collect();
        Self::from_values(LogicalTypeId::Varchar, &values)
    }

    /// Days since 1970-01-01.
    pub fn from_dates(values: &[Option<i32>]) -> Self {
        let values: Vec<_> = values
            .iter()
            .map(|v| v.map(|x| ScalarValue::Integer(x as i64)))
            .collect();
        Self::from_values(LogicalTypeId::Date, &values)
    }

    /// Microseconds since 1970-01-01 00:00:00.
    pub fn from_timestamps(values: &[Option<i64>]) -> Self {
        let values: Vec<_> = values.iter().map(|v| v.map(ScalarValue::Integer)).collect();
        Self::from_values(LogicalTypeId::Timestamp, &values)
    }

    pub fn from_intervals(values: &[Option<Interval>]) -> Self {
        let values: Vec<_> = values
            .iter()
            .map(|v| v.map(ScalarValue::Interval))
            .collect();
        Self::from_values(LogicalTypeId::Interval, &values)
    }
}

// ── Unified view ────────────────────────────────────────────────────────

/// Read view that normalizes any vector kind into a logical-row interface:
/// a data pointer, a validity lookup, and a row-to-physical-slot map.
pub struct UnifiedFormat<'a> {
    vector: &'a Vector,
}

impl UnifiedFormat<'_> {
    #[inline]
    pub fn physical_index(&self, row: usize) -> usize {
        match self.vector.kind {
            VectorKind::Flat => row,
            VectorKind::Constant => 0,
            VectorKind::Dictionary => self.vector.dict_indices[row] as usize,
        }
    }

    #[inline]
    pub fn row_is_valid(&self, row: usize) -> bool {
        self.vector.validity.is_valid(self.physical_index(row))
    }

    pub fn data_ptr(&self) -> *const u8 {
        self.vector.data.as_ptr()
    }

    /// The string slot for a logical row. Valid rows only.
    pub fn string(&self, row: usize) -> &str {
        &self.vector.strings[self.physical_index(row)]
    }
}

// ── Batches ─────────────────────────────────────────────────────────────

/// A horizontal slice of a columnar relation: equal-length vectors evaluated
/// as a unit.
#[derive(Debug, Clone)]
pub struct Batch {
    columns: Vec<Vector>,
    len: usize,
}

impl Batch {
    pub fn new(columns: Vec<Vector>) -> Self {
        let len = columns.first().map_or(0, Vector::len);
        debug_assert!(columns.iter().all(|c| c.len() == len));
        Batch { columns, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> &Vector {
        &self.columns[idx]
    }

    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_null_byte_round_trip() {
        let mut mask = ValidityMask::all_valid(130);
        mask.set_valid(0, false);
        mask.set_valid(63, false);
        mask.set_valid(64, false);
        mask.set_valid(129, false);

        let bytes = mask.to_null_bytes();
        assert_eq!(bytes.len(), 130);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 0);
        assert_eq!(bytes[63], 1);
        assert_eq!(bytes[64], 1);

        let mut restored = ValidityMask::all_valid(130);
        restored.set_from_null_bytes(&bytes);
        assert_eq!(restored, mask);
    }

    #[test]
    fn null_bytes_are_two_valued() {
        // Any nonzero byte decodes as NULL.
        let mut mask = ValidityMask::all_valid(3);
        mask.set_from_null_bytes(&[0, 1, 255]);
        assert!(mask.is_valid(0));
        assert!(!mask.is_valid(1));
        assert!(!mask.is_valid(2));
    }

    #[test]
    fn flat_vector_read_write() {
        let v = Vector::from_i32s(&[Some(1), None, Some(3)]);
        assert_eq!(v.get_value(0), Some(ScalarValue::Integer(1)));
        assert_eq!(v.get_value(1), None);
        assert_eq!(v.get_value(2), Some(ScalarValue::Integer(3)));
    }

    #[test]
    fn constant_vector_replicates() {
        let v = Vector::constant(LogicalTypeId::Integer, Some(ScalarValue::Integer(7)), 4);
        assert_eq!(v.len(), 4);
        for row in 0..4 {
            assert_eq!(v.get_value(row), Some(ScalarValue::Integer(7)));
        }

        let n = Vector::constant(LogicalTypeId::Integer, None, 4);
        for row in 0..4 {
            assert_eq!(n.get_value(row), None);
        }
    }

    #[test]
    fn dictionary_vector_gathers() {
        let values = Vector::from_i32s(&[Some(100), None, Some(300)]);
        let v = Vector::dictionary(values, vec![2, 0, 1, 2]);
        assert_eq!(v.len(), 4);
        assert_eq!(v.get_value(0), Some(ScalarValue::Integer(300)));
        assert_eq!(v.get_value(1), Some(ScalarValue::Integer(100)));
        assert_eq!(v.get_value(2), None);
        assert_eq!(v.get_value(3), Some(ScalarValue::Integer(300)));
    }

    #[test]
    fn varchar_slots() {
        let v = Vector::from_strings(&[Some("hello"), None, Some("kestrel")]);
        assert_eq!(
            v.get_value(0),
            Some(ScalarValue::Varchar("hello".to_owned()))
        );
        assert_eq!(v.get_value(1), None);
        assert_eq!(v.unified().string(2), "kestrel");
    }

    #[test]
    fn ensure_flat_resets_contents() {
        let mut v = Vector::from_i32s(&[Some(1), None]);
        v.ensure_flat(3);
        assert_eq!(v.len(), 3);
        assert!(v.validity().all_rows_valid());
        assert_eq!(v.get_value(2), Some(ScalarValue::Integer(0)));
    }

    #[test]
    fn interval_slots() {
        let iv = Interval {
            months: 2,
            days: 10,
            micros: 5_000_000,
        };
        let v = Vector::from_intervals(&[Some(iv), None]);
        assert_eq!(v.get_value(0), Some(ScalarValue::Interval(iv)));
        assert_eq!(v.get_value(1), None);
    }
}
