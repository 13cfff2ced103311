//! Engine vector to FFIVector materialization.
//!
//! Every auxiliary buffer the compiled routine touches is owned by a
//! per-invocation `ScratchPool` and released in one pass when the invocation
//! returns. Engine-held buffers (flat fixed-width data, string bytes) are
//! borrowed, never copied; the engine vectors must outlive the call.

use std::ffi::{c_char, c_void};
use std::marker::PhantomData;

use kestrel_core::{LogicalTypeId, Vector, VectorKind};
use thiserror::Error;

use crate::ffi::{FFIString, FFIVector};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unsupported type for FFI materialization: {0}")]
    UnsupportedType(LogicalTypeId),
}

/// Per-invocation arena of owned byte buffers.
///
/// Buffers are zero-initialized, address-stable, and freed together when the
/// pool drops. The pool stays on the thread that created it.
#[derive(Default)]
pub struct ScratchPool {
    buffers: Vec<Box<[u8]>>,
    _not_send_sync: PhantomData<*mut u8>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `size` zeroed bytes owned by the pool.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        let mut buffer = vec![0u8; size.max(1)].into_boxed_slice();
        let ptr = buffer.as_mut_ptr();
        self.buffers.push(buffer);
        ptr
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

/// Bytes of one FFI slot for gather/broadcast. Types outside this table are
/// not JIT-supported and fail the bridge.
pub fn ffi_element_size(ty: LogicalTypeId) -> Result<usize, BridgeError> {
    match ty {
        LogicalTypeId::Boolean => Ok(1),
        LogicalTypeId::Integer => Ok(4),
        LogicalTypeId::BigInt => Ok(8),
        LogicalTypeId::Double => Ok(8),
        LogicalTypeId::Date => Ok(4),
        LogicalTypeId::Timestamp => Ok(8),
        LogicalTypeId::Varchar => Ok(std::mem::size_of::<FFIString>()),
        LogicalTypeId::Interval => Ok(std::mem::size_of::<crate::ffi::FFIInterval>()),
        ty => Err(BridgeError::UnsupportedType(ty)),
    }
}

/// Materialize an input vector into its flat FFI form for a batch of `count`
/// rows, optionally routed through a selection vector.
///
/// The flat nullmask is always pool-owned. Fixed-width flat vectors without a
/// selection borrow the engine buffer directly; constant and dictionary
/// vectors (and any selected read) gather into a pool buffer. VARCHAR rows
/// become pool-owned `FFIString` views borrowing the engine's string bytes.
pub fn materialize_input(
    vector: &Vector,
    sel: Option<&[u32]>,
    count: usize,
    pool: &mut ScratchPool,
) -> Result<FFIVector, BridgeError> {
    let ty = vector.ty();
    let element_size = ffi_element_size(ty)?;
    let unified = vector.unified();
    let row_of = |i: usize| sel.map_or(i, |s| s[i] as usize);

    let nullmask = pool.alloc(count);
    for i in 0..count {
        let is_null = !unified.row_is_valid(row_of(i));
        unsafe { *nullmask.add(i) = u8::from(is_null) };
    }

    let data: *mut c_void = if ty == LogicalTypeId::Varchar {
        let views = pool.alloc(count * element_size) as *mut FFIString;
        for i in 0..count {
            if unsafe { *nullmask.add(i) } != 0 {
                continue;
            }
            let s = unified.string(row_of(i));
            unsafe {
                *views.add(i) = FFIString {
                    ptr: s.as_ptr() as *const c_char,
                    len: s.len() as u32,
                };
            }
        }
        views as *mut c_void
    } else if vector.kind() == VectorKind::Flat && sel.is_none() && ty != LogicalTypeId::Interval {
        vector.data_ptr() as *mut c_void
    } else {
        let buffer = pool.alloc(count * element_size);
        let source = unified.data_ptr();
        for i in 0..count {
            if unsafe { *nullmask.add(i) } != 0 {
                continue;
            }
            let slot = unified.physical_index(row_of(i));
            unsafe {
                std::ptr::copy_nonoverlapping(
                    source.add(slot * element_size),
                    buffer.add(i * element_size),
                    element_size,
                );
            }
        }
        buffer as *mut c_void
    };

    Ok(FFIVector {
        data,
        nullmask,
        count: count as u64,
        logical_type_id: ty as i32,
        vector_kind: vector.kind() as i32,
        original_vector: vector as *const Vector as *mut c_void,
    })
}

/// Prepare a result vector for the compiled routine: flat layout, writable
/// buffers, and a zeroed pool-owned nullmask the caller folds back into the
/// bit-packed validity after the invocation.
///
/// Fixed-width outputs are written straight into the engine buffer; VARCHAR
/// outputs leave `data` null and go through the string host callbacks.
pub fn materialize_output(
    vector: &mut Vector,
    count: usize,
    pool: &mut ScratchPool,
) -> Result<FFIVector, BridgeError> {
    let ty = vector.ty();
    ffi_element_size(ty)?;
    vector.ensure_flat(count);

    let nullmask = pool.alloc(count);
    let data: *mut c_void = if ty == LogicalTypeId::Varchar {
        std::ptr::null_mut()
    } else {
        vector.data_mut_ptr() as *mut c_void
    };

    Ok(FFIVector {
        data,
        nullmask,
        count: count as u64,
        logical_type_id: ty as i32,
        vector_kind: VectorKind::Flat as i32,
        original_vector: vector as *mut Vector as *mut c_void,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::ScalarValue;

    fn null_bytes(ffi: &FFIVector) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(ffi.nullmask, ffi.count as usize) }.to_vec()
    }

    fn data_as<T: Copy>(ffi: &FFIVector, count: usize) -> Vec<T> {
        unsafe { std::slice::from_raw_parts(ffi.data as *const T, count) }.to_vec()
    }

    #[test]
    fn flat_vector_borrows_engine_buffer() {
        let vector = Vector::from_i32s(&[Some(1), None, Some(3)]);
        let mut pool = ScratchPool::new();
        let ffi = materialize_input(&vector, None, 3, &mut pool).unwrap();

        assert_eq!(ffi.data as *const u8, vector.data_ptr());
        assert_eq!(null_bytes(&ffi), vec![0, 1, 0]);
        assert_eq!(ffi.count, 3);
        assert_eq!(ffi.logical_type_id, LogicalTypeId::Integer as i32);
        // Only the nullmask came from the pool.
        assert_eq!(pool.buffer_count(), 1);
    }

    #[test]
    fn constant_vector_broadcasts() {
        let vector = Vector::constant(LogicalTypeId::Integer, Some(ScalarValue::Integer(7)), 4);
        let mut pool = ScratchPool::new();
        let ffi = materialize_input(&vector, None, 4, &mut pool).unwrap();

        assert_eq!(null_bytes(&ffi), vec![0, 0, 0, 0]);
        assert_eq!(data_as::<i32>(&ffi, 4), vec![7, 7, 7, 7]);
        assert_ne!(ffi.data as *const u8, vector.data_ptr());
    }

    #[test]
    fn null_constant_broadcasts_nulls_only() {
        let vector = Vector::constant(LogicalTypeId::Integer, None, 3);
        let mut pool = ScratchPool::new();
        let ffi = materialize_input(&vector, None, 3, &mut pool).unwrap();
        assert_eq!(null_bytes(&ffi), vec![1, 1, 1]);
    }

    #[test]
    fn dictionary_vector_gathers() {
        let values = Vector::from_i64s(&[Some(100), Some(200), None]);
        let vector = Vector::dictionary(values, vec![1, 0, 2, 1]);
        let mut pool = ScratchPool::new();
        let ffi = materialize_input(&vector, None, 4, &mut pool).unwrap();

        assert_eq!(null_bytes(&ffi), vec![0, 0, 1, 0]);
        let data = data_as::<i64>(&ffi, 4);
        assert_eq!(data[0], 200);
        assert_eq!(data[1], 100);
        assert_eq!(data[3], 200);
    }

    #[test]
    fn selection_forces_gather() {
        let vector = Vector::from_i32s(&[Some(10), Some(20), None, Some(40)]);
        let mut pool = ScratchPool::new();
        let sel = [3u32, 2, 0];
        let ffi = materialize_input(&vector, Some(&sel), 3, &mut pool).unwrap();

        assert_ne!(ffi.data as *const u8, vector.data_ptr());
        assert_eq!(null_bytes(&ffi), vec![0, 1, 0]);
        let data = data_as::<i32>(&ffi, 3);
        assert_eq!(data[0], 40);
        assert_eq!(data[2], 10);
    }

    #[test]
    fn varchar_views_borrow_string_bytes() {
        let vector = Vector::from_strings(&[Some("hello"), None, Some("kestrel")]);
        let mut pool = ScratchPool::new();
        let ffi = materialize_input(&vector, None, 3, &mut pool).unwrap();

        assert_eq!(null_bytes(&ffi), vec![0, 1, 0]);
        let views = data_as::<FFIString>(&ffi, 3);
        let read = |v: FFIString| unsafe {
            std::str::from_utf8(std::slice::from_raw_parts(v.ptr as *const u8, v.len as usize))
                .unwrap()
                .to_owned()
        };
        assert_eq!(read(views[0]), "hello");
        assert_eq!(views[0].ptr, vector.strings()[0].as_ptr() as *const c_char);
        assert_eq!(read(views[2]), "kestrel");
    }

    #[test]
    fn unsupported_type_fails() {
        let vector = Vector::from_i16s(&[Some(1)]);
        let mut pool = ScratchPool::new();
        let err = materialize_input(&vector, None, 1, &mut pool).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnsupportedType(LogicalTypeId::SmallInt)
        ));
    }

    #[test]
    fn output_points_at_engine_buffer() {
        let mut vector = Vector::flat(LogicalTypeId::BigInt, 0);
        let mut pool = ScratchPool::new();
        let ffi = materialize_output(&mut vector, 5, &mut pool).unwrap();

        assert_eq!(vector.len(), 5);
        assert_eq!(ffi.data as *const u8, vector.data_ptr());
        assert_eq!(null_bytes(&ffi), vec![0; 5]);
        assert_eq!(ffi.original_vector, &mut vector as *mut Vector as *mut c_void);
    }

    #[test]
    fn varchar_output_has_null_data() {
        let mut vector = Vector::flat(LogicalTypeId::Varchar, 0);
        let mut pool = ScratchPool::new();
        let ffi = materialize_output(&mut vector, 3, &mut pool).unwrap();
        assert!(ffi.data.is_null());
    }

    #[test]
    fn interval_inputs_are_copied() {
        use kestrel_core::Interval;
        let iv = Interval {
            months: 1,
            days: 2,
            micros: 3,
        };
        let vector = Vector::from_intervals(&[Some(iv), None]);
        let mut pool = ScratchPool::new();
        let ffi = materialize_input(&vector, None, 2, &mut pool).unwrap();

        assert_ne!(ffi.data as *const u8, vector.data_ptr());
        let data = data_as::<Interval>(&ffi, 2);
        assert_eq!(data[0], iv);
        assert_eq!(null_bytes(&ffi), vec![0, 1]);
    }
}
