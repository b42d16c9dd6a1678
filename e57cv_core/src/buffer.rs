//! Source/dest buffers: the user-owned memory regions a transfer moves
//! records into and out of.
//!
//! A [`SourceDestBuffer`] binds one terminal path in the prototype to a
//! strided region of caller-owned memory with a declared element
//! representation. The caller fills the region before a write and reads it
//! back after a read; the engine walks it through the shared handle. The
//! region is a `Rc<RefCell<Vec<u8>>>` rather than a raw pointer: rebinding a
//! buffer between reads swaps the region handle while every attribute stays
//! fixed.
//!
//! Conversion between the wire representation and the memory representation
//! is policy-gated per buffer (`do_conversion`, `do_scaling`); the rules
//! live in [`SourceDestBuffer::validate_transfer`] and the `put_*`/`take_*`
//! transfer methods. Policy violations are detected on the first transfer,
//! not at construction.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::imagefile::ImageFile;
use crate::prototype::NodeKind;

/// A caller-owned byte region shared with the engine.
pub type MemoryBuffer = Rc<RefCell<Vec<u8>>>;

/// A caller-owned string-vector region shared with the engine.
pub type StringBuffer = Rc<RefCell<Vec<String>>>;

/// Allocate a zeroed region sized for `capacity` consecutive elements of
/// `T`.
pub fn new_region<T: MemElement>(capacity: usize) -> MemoryBuffer {
    Rc::new(RefCell::new(vec![0u8; capacity * T::SIZE]))
}

/// In-memory element representation of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRepr {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    Bool,
    Float32,
    Float64,
    UString,
}

impl MemoryRepr {
    /// Bytes per element; 0 for `UString`, which is not byte-addressed.
    pub fn element_size(&self) -> usize {
        match self {
            MemoryRepr::Int8 | MemoryRepr::UInt8 | MemoryRepr::Bool => 1,
            MemoryRepr::Int16 | MemoryRepr::UInt16 => 2,
            MemoryRepr::Int32 | MemoryRepr::UInt32 | MemoryRepr::Float32 => 4,
            MemoryRepr::Int64 | MemoryRepr::Float64 => 8,
            MemoryRepr::UString => 0,
        }
    }

    /// The closed interval an integer-group representation can hold.
    /// `None` for float and string representations.
    fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            MemoryRepr::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            MemoryRepr::UInt8 => Some((0, u8::MAX as i64)),
            MemoryRepr::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            MemoryRepr::UInt16 => Some((0, u16::MAX as i64)),
            MemoryRepr::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            MemoryRepr::UInt32 => Some((0, u32::MAX as i64)),
            MemoryRepr::Int64 => Some((i64::MIN, i64::MAX)),
            MemoryRepr::Bool => Some((0, 1)),
            _ => None,
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, MemoryRepr::Float32 | MemoryRepr::Float64)
    }
}

/// Transfer direction, for deciding which side of a conversion is the
/// narrowing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Wire value into memory (decoder side).
    Read,
    /// Memory value onto the wire (encoder side).
    Write,
}

mod sealed {
    pub trait Sealed {}
}

/// Closed set of element types a numeric buffer can hold. The generic
/// constructor over this trait stands in for the original API's overload
/// set.
pub trait MemElement: sealed::Sealed + Copy {
    const REPR: MemoryRepr;
    const SIZE: usize;
    fn write_le(self, out: &mut [u8]);
    fn read_le(src: &[u8]) -> Self;
}

macro_rules! mem_element {
    ($ty:ty, $repr:expr) => {
        impl sealed::Sealed for $ty {}
        impl MemElement for $ty {
            const REPR: MemoryRepr = $repr;
            const SIZE: usize = std::mem::size_of::<$ty>();
            fn write_le(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
            fn read_le(src: &[u8]) -> Self {
                <$ty>::from_le_bytes(src[..Self::SIZE].try_into().unwrap())
            }
        }
    };
}

mem_element!(i8, MemoryRepr::Int8);
mem_element!(u8, MemoryRepr::UInt8);
mem_element!(i16, MemoryRepr::Int16);
mem_element!(u16, MemoryRepr::UInt16);
mem_element!(i32, MemoryRepr::Int32);
mem_element!(u32, MemoryRepr::UInt32);
mem_element!(i64, MemoryRepr::Int64);
mem_element!(f32, MemoryRepr::Float32);
mem_element!(f64, MemoryRepr::Float64);

impl sealed::Sealed for bool {}
impl MemElement for bool {
    const REPR: MemoryRepr = MemoryRepr::Bool;
    const SIZE: usize = 1;
    fn write_le(self, out: &mut [u8]) {
        out[0] = self as u8;
    }
    fn read_le(src: &[u8]) -> Self {
        src[0] != 0
    }
}

enum Storage {
    Bytes(MemoryBuffer),
    Strings(StringBuffer),
}

struct SdbImpl {
    path: String,
    repr: MemoryRepr,
    capacity: usize,
    stride: usize,
    do_conversion: bool,
    do_scaling: bool,
    storage: Storage,
    /// Index of the next element to fill (read side) or consume (write
    /// side); rewound at the start of every transfer call.
    next_index: usize,
}

/// Cheaply clonable handle; all clones see one cursor and one region.
#[derive(Clone)]
pub struct SourceDestBuffer {
    impl_: Rc<RefCell<SdbImpl>>,
}

fn validate_path_syntax(path: &str) -> Result<()> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() || trimmed.split('/').any(|s| s.is_empty()) {
        return Err(Error::BadPathName(path.to_string()));
    }
    Ok(())
}

impl SourceDestBuffer {
    /// Bind a numeric or boolean region.
    ///
    /// `stride` is the byte step between consecutive elements; 0 means "use
    /// the element size". The region must be large enough for `capacity`
    /// elements at that stride.
    pub fn new<T: MemElement>(
        dest_image_file: &ImageFile,
        path_name: &str,
        buffer: MemoryBuffer,
        capacity: usize,
        do_conversion: bool,
        do_scaling: bool,
        stride: usize,
    ) -> Result<Self> {
        dest_image_file.check_open()?;
        validate_path_syntax(path_name)?;
        if capacity == 0 {
            return Err(Error::BadApiArgument("capacity must be > 0".into()));
        }
        let stride = if stride == 0 { T::SIZE } else { stride };
        if stride < T::SIZE {
            return Err(Error::BadApiArgument(format!(
                "stride {} smaller than element size {}",
                stride,
                T::SIZE
            )));
        }
        let required = (capacity - 1) * stride + T::SIZE;
        if buffer.borrow().len() < required {
            return Err(Error::BadBuffer(format!(
                "region holds {} bytes, {} required",
                buffer.borrow().len(),
                required
            )));
        }

        Ok(Self {
            impl_: Rc::new(RefCell::new(SdbImpl {
                path: path_name.to_string(),
                repr: T::REPR,
                capacity,
                stride,
                do_conversion,
                do_scaling,
                storage: Storage::Bytes(buffer),
                next_index: 0,
            })),
        })
    }

    /// Bind a string vector; its length is the buffer capacity and is fixed
    /// for the lifetime of the binding.
    pub fn ustring(
        dest_image_file: &ImageFile,
        path_name: &str,
        strings: StringBuffer,
    ) -> Result<Self> {
        dest_image_file.check_open()?;
        validate_path_syntax(path_name)?;
        let capacity = strings.borrow().len();
        if capacity == 0 {
            return Err(Error::BadApiArgument("string vector must not be empty".into()));
        }
        Ok(Self {
            impl_: Rc::new(RefCell::new(SdbImpl {
                path: path_name.to_string(),
                repr: MemoryRepr::UString,
                capacity,
                stride: 0,
                do_conversion: false,
                do_scaling: false,
                storage: Storage::Strings(strings),
                next_index: 0,
            })),
        })
    }

    // ── Attribute accessors ────────────────────────────────────────────

    pub fn path_name(&self) -> String {
        self.impl_.borrow().path.clone()
    }

    pub fn memory_repr(&self) -> MemoryRepr {
        self.impl_.borrow().repr
    }

    pub fn capacity(&self) -> usize {
        self.impl_.borrow().capacity
    }

    pub fn stride(&self) -> usize {
        self.impl_.borrow().stride
    }

    pub fn do_conversion(&self) -> bool {
        self.impl_.borrow().do_conversion
    }

    pub fn do_scaling(&self) -> bool {
        self.impl_.borrow().do_scaling
    }

    // ── Element access for callers ─────────────────────────────────────

    /// Read element `index` as `T`, which must match the declared
    /// representation.
    pub fn get<T: MemElement>(&self, index: usize) -> Result<T> {
        let inner = self.impl_.borrow();
        inner.check_typed_access(T::REPR, index)?;
        let Storage::Bytes(region) = &inner.storage else {
            return Err(Error::Internal("string storage behind numeric repr".into()));
        };
        let at = index * inner.stride;
        let value = T::read_le(&region.borrow()[at..]);
        Ok(value)
    }

    /// Write element `index` as `T`, which must match the declared
    /// representation.
    pub fn set<T: MemElement>(&self, index: usize, value: T) -> Result<()> {
        let inner = self.impl_.borrow();
        inner.check_typed_access(T::REPR, index)?;
        let Storage::Bytes(region) = &inner.storage else {
            return Err(Error::Internal("string storage behind numeric repr".into()));
        };
        let at = index * inner.stride;
        value.write_le(&mut region.borrow_mut()[at..]);
        Ok(())
    }

    pub fn get_string(&self, index: usize) -> Result<String> {
        let inner = self.impl_.borrow();
        inner.check_typed_access(MemoryRepr::UString, index)?;
        let Storage::Strings(strings) = &inner.storage else {
            return Err(Error::Internal("numeric storage behind string repr".into()));
        };
        let value = strings.borrow()[index].clone();
        Ok(value)
    }

    pub fn set_string(&self, index: usize, value: String) -> Result<()> {
        let inner = self.impl_.borrow();
        inner.check_typed_access(MemoryRepr::UString, index)?;
        let Storage::Strings(strings) = &inner.storage else {
            return Err(Error::Internal("numeric storage behind string repr".into()));
        };
        strings.borrow_mut()[index] = value;
        Ok(())
    }

    // ── Engine-side operations ─────────────────────────────────────────

    pub(crate) fn rewind(&self) {
        self.impl_.borrow_mut().next_index = 0;
    }

    /// Index of the next element a transfer would touch; after a read loop
    /// finishes this is the number of records delivered.
    pub(crate) fn next_index(&self) -> usize {
        self.impl_.borrow().next_index
    }

    pub(crate) fn is_full(&self) -> bool {
        let inner = self.impl_.borrow();
        inner.next_index >= inner.capacity
    }

    /// Attribute compatibility for rebinding: path, representation,
    /// capacity, and stride must match; the backing region may differ.
    pub(crate) fn check_compatible(&self, other: &SourceDestBuffer) -> Result<()> {
        let a = self.impl_.borrow();
        let b = other.impl_.borrow();
        let mismatch = |what: &str| {
            Err(Error::BuffersNotCompatible(format!(
                "{} differs for path {}",
                what, a.path
            )))
        };
        if a.path != b.path {
            return Err(Error::BuffersNotCompatible(format!(
                "path {} replaced by {}",
                a.path, b.path
            )));
        }
        if a.repr != b.repr {
            return mismatch("memory representation");
        }
        if a.capacity != b.capacity {
            return mismatch("capacity");
        }
        if a.stride != b.stride {
            return mismatch("stride");
        }
        Ok(())
    }

    /// Take over `other`'s backing region. Only meaningful after
    /// [`check_compatible`] has passed.
    pub(crate) fn adopt_region(&self, other: &SourceDestBuffer) {
        let mut a = self.impl_.borrow_mut();
        let b = other.impl_.borrow();
        a.storage = match &b.storage {
            Storage::Bytes(r) => Storage::Bytes(Rc::clone(r)),
            Storage::Strings(s) => Storage::Strings(Rc::clone(s)),
        };
    }

    /// The policy check of the conversion matrix, run once per channel
    /// before the first value moves.
    pub(crate) fn validate_transfer(
        &self,
        kind: &NodeKind,
        direction: TransferDirection,
    ) -> Result<()> {
        let inner = self.impl_.borrow();
        let conversion_required = |reason: &str| {
            Err(Error::ConversionRequired {
                path: inner.path.clone(),
                reason: reason.to_string(),
            })
        };
        let type_mismatch = |reason: &str| {
            Err(Error::TypeMismatch {
                path: inner.path.clone(),
                reason: reason.to_string(),
            })
        };

        // Strings convert to nothing and from nothing.
        if matches!(kind, NodeKind::String) != (inner.repr == MemoryRepr::UString) {
            return type_mismatch("string and non-string representations cannot convert");
        }
        if matches!(kind, NodeKind::String) {
            return Ok(());
        }

        match kind {
            NodeKind::Integer { min, max } => {
                inner.validate_integer_pair(*min, *max, direction, conversion_required)
            }
            NodeKind::ScaledInteger { min, max, .. } => {
                if inner.do_scaling {
                    // Scaled transfers move through a float64 intermediate.
                    inner.validate_float_pair(true, direction, conversion_required)
                } else {
                    inner.validate_integer_pair(*min, *max, direction, conversion_required)
                }
            }
            NodeKind::Float { precision } => inner.validate_float_pair(
                matches!(precision, crate::prototype::FloatPrecision::Double),
                direction,
                conversion_required,
            ),
            NodeKind::Structure | NodeKind::Vector { .. } | NodeKind::String => {
                Err(Error::Internal("validate_transfer on non-terminal".into()))
            }
        }
    }

    // ── Decoder-side transfers ─────────────────────────────────────────

    pub(crate) fn put_integer(&self, value: i64) -> Result<()> {
        let mut inner = self.impl_.borrow_mut();
        inner.check_room()?;
        match inner.repr {
            r if r.is_float() => inner.store_float(value as f64),
            MemoryRepr::UString => Err(Error::Internal("integer into string buffer".into())),
            _ => inner.store_int(value),
        }
    }

    pub(crate) fn put_scaled(&self, raw: i64, scale: f64, offset: f64) -> Result<()> {
        if self.impl_.borrow().do_scaling {
            let mut inner = self.impl_.borrow_mut();
            inner.check_room()?;
            inner.store_float(raw as f64 * scale + offset)
        } else {
            self.put_integer(raw)
        }
    }

    pub(crate) fn put_float(&self, value: f64) -> Result<()> {
        let mut inner = self.impl_.borrow_mut();
        inner.check_room()?;
        inner.store_float(value)
    }

    pub(crate) fn put_string(&self, value: String) -> Result<()> {
        let mut inner = self.impl_.borrow_mut();
        inner.check_room()?;
        let at = inner.next_index;
        let Storage::Strings(strings) = &inner.storage else {
            return Err(Error::Internal("string into numeric buffer".into()));
        };
        strings.borrow_mut()[at] = value;
        inner.next_index += 1;
        Ok(())
    }

    // ── Encoder-side transfers ─────────────────────────────────────────

    /// Consume the next memory element as a raw integer, range-checked
    /// against the wire interval.
    pub(crate) fn take_integer(&self, min: i64, max: i64) -> Result<i64> {
        let mut inner = self.impl_.borrow_mut();
        inner.check_room()?;
        let record = inner.next_index as u64;
        let value = match inner.load_scalar() {
            Scalar::Int(v) => v,
            Scalar::Float(v) => float_to_int(v, record)?,
        };
        if value < min || value > max {
            return Err(Error::ValueOutOfRange {
                record,
                reason: format!("{} outside [{}, {}]", value, min, max),
            });
        }
        inner.next_index += 1;
        Ok(value)
    }

    /// Consume the next memory element as the raw value of a scaled
    /// integer, inverting the scale when `do_scaling` is set.
    pub(crate) fn take_scaled(&self, min: i64, max: i64, scale: f64, offset: f64) -> Result<i64> {
        if !self.impl_.borrow().do_scaling {
            return self.take_integer(min, max);
        }
        let mut inner = self.impl_.borrow_mut();
        inner.check_room()?;
        let record = inner.next_index as u64;
        let scaled = match inner.load_scalar() {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        };
        let raw = ((scaled - offset) / scale).round();
        if !raw.is_finite() || raw < min as f64 || raw > max as f64 {
            return Err(Error::ValueOutOfRange {
                record,
                reason: format!("{} descales to {} outside [{}, {}]", scaled, raw, min, max),
            });
        }
        inner.next_index += 1;
        Ok(raw as i64)
    }

    /// Consume the next memory element as a float64. `single_precision`
    /// asks for an extra fit check against the f32 range.
    pub(crate) fn take_float(&self, single_precision: bool) -> Result<f64> {
        let mut inner = self.impl_.borrow_mut();
        inner.check_room()?;
        let record = inner.next_index as u64;
        let value = match inner.load_scalar() {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        };
        if single_precision && value.is_finite() && value.abs() > f32::MAX as f64 {
            return Err(Error::ValueOutOfRange {
                record,
                reason: format!("{} does not fit in a 32-bit float", value),
            });
        }
        inner.next_index += 1;
        Ok(value)
    }

    pub(crate) fn take_string(&self) -> Result<String> {
        let mut inner = self.impl_.borrow_mut();
        inner.check_room()?;
        let at = inner.next_index;
        let Storage::Strings(strings) = &inner.storage else {
            return Err(Error::Internal("string from numeric buffer".into()));
        };
        let value = strings.borrow()[at].clone();
        inner.next_index += 1;
        Ok(value)
    }
}

enum Scalar {
    Int(i64),
    Float(f64),
}

fn float_to_int(v: f64, record: u64) -> Result<i64> {
    let t = v.trunc();
    if !t.is_finite() || t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(Error::ValueOutOfRange {
            record,
            reason: format!("{} does not round to a 64-bit integer", v),
        });
    }
    Ok(t as i64)
}

impl SdbImpl {
    fn check_typed_access(&self, repr: MemoryRepr, index: usize) -> Result<()> {
        if self.repr != repr {
            return Err(Error::BadApiArgument(format!(
                "buffer for {} holds {:?}, accessed as {:?}",
                self.path, self.repr, repr
            )));
        }
        if index >= self.capacity {
            return Err(Error::BadApiArgument(format!(
                "index {} past capacity {}",
                index, self.capacity
            )));
        }
        Ok(())
    }

    fn check_room(&self) -> Result<()> {
        if self.next_index >= self.capacity {
            return Err(Error::Internal("transfer past buffer capacity".into()));
        }
        Ok(())
    }

    fn validate_integer_pair<E>(
        &self,
        min: i64,
        max: i64,
        direction: TransferDirection,
        conversion_required: E,
    ) -> Result<()>
    where
        E: Fn(&str) -> Result<()>,
    {
        match self.repr.int_range() {
            Some((lo, hi)) => {
                let narrowing = match direction {
                    TransferDirection::Read => min < lo || max > hi,
                    TransferDirection::Write => lo < min || hi > max,
                };
                if narrowing && !self.do_conversion {
                    return conversion_required(
                        "narrowing integer transfer without do_conversion",
                    );
                }
                Ok(())
            }
            None => {
                // Float memory representation.
                if !self.do_conversion {
                    return conversion_required("integer/float transfer without do_conversion");
                }
                Ok(())
            }
        }
    }

    fn validate_float_pair<E>(
        &self,
        wire_is_double: bool,
        direction: TransferDirection,
        conversion_required: E,
    ) -> Result<()>
    where
        E: Fn(&str) -> Result<()>,
    {
        match self.repr {
            MemoryRepr::Float64 => Ok(()),
            MemoryRepr::Float32 => {
                let narrowing = match direction {
                    TransferDirection::Read => wire_is_double,
                    TransferDirection::Write => false,
                };
                if narrowing && !self.do_conversion {
                    return conversion_required(
                        "double-precision value into single-precision buffer without do_conversion",
                    );
                }
                Ok(())
            }
            _ => {
                if !self.do_conversion {
                    return conversion_required("integer/float transfer without do_conversion");
                }
                Ok(())
            }
        }
    }

    fn store_int(&mut self, value: i64) -> Result<()> {
        let record = self.next_index as u64;
        let (lo, hi) = self
            .repr
            .int_range()
            .ok_or_else(|| Error::Internal("store_int on non-integer repr".into()))?;
        if value < lo || value > hi {
            return Err(Error::ValueOutOfRange {
                record,
                reason: format!("{} does not fit {:?}", value, self.repr),
            });
        }
        let at = self.next_index * self.stride;
        let Storage::Bytes(region) = &self.storage else {
            return Err(Error::Internal("numeric store into string buffer".into()));
        };
        let mut region = region.borrow_mut();
        match self.repr {
            MemoryRepr::Int8 => (value as i8).write_le(&mut region[at..]),
            MemoryRepr::UInt8 => (value as u8).write_le(&mut region[at..]),
            MemoryRepr::Int16 => (value as i16).write_le(&mut region[at..]),
            MemoryRepr::UInt16 => (value as u16).write_le(&mut region[at..]),
            MemoryRepr::Int32 => (value as i32).write_le(&mut region[at..]),
            MemoryRepr::UInt32 => (value as u32).write_le(&mut region[at..]),
            MemoryRepr::Int64 => value.write_le(&mut region[at..]),
            MemoryRepr::Bool => (value != 0).write_le(&mut region[at..]),
            _ => unreachable!("int_range returned Some for non-integer repr"),
        }
        drop(region);
        self.next_index += 1;
        Ok(())
    }

    fn store_float(&mut self, value: f64) -> Result<()> {
        let record = self.next_index as u64;
        match self.repr {
            MemoryRepr::Float64 => {
                let at = self.next_index * self.stride;
                let Storage::Bytes(region) = &self.storage else {
                    return Err(Error::Internal("numeric store into string buffer".into()));
                };
                value.write_le(&mut region.borrow_mut()[at..]);
                self.next_index += 1;
                Ok(())
            }
            MemoryRepr::Float32 => {
                if value.is_finite() && value.abs() > f32::MAX as f64 {
                    return Err(Error::ValueOutOfRange {
                        record,
                        reason: format!("{} does not fit in a 32-bit float", value),
                    });
                }
                let at = self.next_index * self.stride;
                let Storage::Bytes(region) = &self.storage else {
                    return Err(Error::Internal("numeric store into string buffer".into()));
                };
                (value as f32).write_le(&mut region.borrow_mut()[at..]);
                self.next_index += 1;
                Ok(())
            }
            // Rounding toward zero, per the integer/float conversion rule.
            _ => self.store_int(float_to_int(value, record)?),
        }
    }

    fn load_scalar(&self) -> Scalar {
        let at = self.next_index * self.stride;
        let Storage::Bytes(region) = &self.storage else {
            unreachable!("load_scalar on string storage");
        };
        let region = region.borrow();
        match self.repr {
            MemoryRepr::Int8 => Scalar::Int(i8::read_le(&region[at..]) as i64),
            MemoryRepr::UInt8 => Scalar::Int(u8::read_le(&region[at..]) as i64),
            MemoryRepr::Int16 => Scalar::Int(i16::read_le(&region[at..]) as i64),
            MemoryRepr::UInt16 => Scalar::Int(u16::read_le(&region[at..]) as i64),
            MemoryRepr::Int32 => Scalar::Int(i32::read_le(&region[at..]) as i64),
            MemoryRepr::UInt32 => Scalar::Int(u32::read_le(&region[at..]) as i64),
            MemoryRepr::Int64 => Scalar::Int(i64::read_le(&region[at..])),
            MemoryRepr::Bool => Scalar::Int(bool::read_le(&region[at..]) as i64),
            MemoryRepr::Float32 => Scalar::Float(f32::read_le(&region[at..]) as f64),
            MemoryRepr::Float64 => Scalar::Float(f64::read_le(&region[at..])),
            MemoryRepr::UString => unreachable!("load_scalar on string repr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::FloatPrecision;

    fn open_file(name: &str) -> ImageFile {
        let path = std::env::temp_dir().join(format!("e57cv_buffer_{}.e57cv", name));
        ImageFile::create(&path).unwrap()
    }

    fn int32_sdb(file: &ImageFile, capacity: usize, conv: bool) -> SourceDestBuffer {
        SourceDestBuffer::new::<i32>(
            file,
            "/value",
            new_region::<i32>(capacity),
            capacity,
            conv,
            false,
            0,
        )
        .unwrap()
    }

    #[test]
    fn construction_validations() {
        let file = open_file("construct");
        let region = new_region::<i32>(4);

        // capacity 0
        assert!(matches!(
            SourceDestBuffer::new::<i32>(&file, "/v", region.clone(), 0, false, false, 0),
            Err(Error::BadApiArgument(_))
        ));
        // stride smaller than the element
        assert!(matches!(
            SourceDestBuffer::new::<i32>(&file, "/v", region.clone(), 4, false, false, 2),
            Err(Error::BadApiArgument(_))
        ));
        // region too small for capacity
        assert!(matches!(
            SourceDestBuffer::new::<i32>(&file, "/v", region.clone(), 5, false, false, 0),
            Err(Error::BadBuffer(_))
        ));
        // bad path
        assert!(matches!(
            SourceDestBuffer::new::<i32>(&file, "//v", region.clone(), 4, false, false, 0),
            Err(Error::BadPathName(_))
        ));
        // defaulted stride
        let sdb =
            SourceDestBuffer::new::<i32>(&file, "/v", region, 4, false, false, 0).unwrap();
        assert_eq!(sdb.stride(), 4);
        assert_eq!(sdb.memory_repr(), MemoryRepr::Int32);
    }

    #[test]
    fn strided_elements_interleave() {
        let file = open_file("stride");
        // Two i16 lanes interleaved in one region: stride 4, lane B offset 2.
        let region: MemoryBuffer = Rc::new(RefCell::new(vec![0u8; 16]));
        let sdb =
            SourceDestBuffer::new::<i16>(&file, "/a", region.clone(), 4, false, false, 4).unwrap();
        for i in 0..4 {
            sdb.set::<i16>(i, (i as i16 + 1) * 100).unwrap();
        }
        let raw = region.borrow();
        for i in 0..4 {
            assert_eq!(
                i16::from_le_bytes(raw[i * 4..i * 4 + 2].try_into().unwrap()),
                (i as i16 + 1) * 100
            );
            // The in-between lane stays untouched.
            assert_eq!(&raw[i * 4 + 2..i * 4 + 4], &[0, 0]);
        }
    }

    #[test]
    fn integer_narrowing_policy() {
        let file = open_file("narrowing");
        // Wire [0, 100000] does not fit an Int16 memory repr.
        let region = new_region::<i16>(4);
        let kind = NodeKind::Integer { min: 0, max: 100_000 };

        let strict =
            SourceDestBuffer::new::<i16>(&file, "/v", region.clone(), 4, false, false, 0).unwrap();
        assert!(matches!(
            strict.validate_transfer(&kind, TransferDirection::Read),
            Err(Error::ConversionRequired { .. })
        ));

        let lenient =
            SourceDestBuffer::new::<i16>(&file, "/v", region, 4, true, false, 0).unwrap();
        lenient.validate_transfer(&kind, TransferDirection::Read).unwrap();
        lenient.put_integer(32_000).unwrap();
        assert!(matches!(
            lenient.put_integer(40_000),
            Err(Error::ValueOutOfRange { record: 1, .. })
        ));
    }

    #[test]
    fn write_direction_narrowing_is_the_mirror_case() {
        let file = open_file("wnarrow");
        // Int32 memory into wire [0, 1023]: narrowing on write only.
        let kind = NodeKind::Integer { min: 0, max: 1023 };
        let sdb = int32_sdb(&file, 4, false);
        sdb.validate_transfer(&kind, TransferDirection::Read).unwrap();
        assert!(matches!(
            sdb.validate_transfer(&kind, TransferDirection::Write),
            Err(Error::ConversionRequired { .. })
        ));

        let sdb = int32_sdb(&file, 4, true);
        sdb.validate_transfer(&kind, TransferDirection::Write).unwrap();
        sdb.set::<i32>(0, 1023).unwrap();
        sdb.set::<i32>(1, 1024).unwrap();
        assert_eq!(sdb.take_integer(0, 1023).unwrap(), 1023);
        assert!(matches!(
            sdb.take_integer(0, 1023),
            Err(Error::ValueOutOfRange { record: 1, .. })
        ));
    }

    #[test]
    fn cross_group_requires_conversion() {
        let file = open_file("crossgroup");
        let float_kind = NodeKind::Float { precision: FloatPrecision::Single };

        let strict = int32_sdb(&file, 4, false);
        assert!(matches!(
            strict.validate_transfer(&float_kind, TransferDirection::Read),
            Err(Error::ConversionRequired { .. })
        ));

        let lenient = int32_sdb(&file, 4, true);
        lenient.validate_transfer(&float_kind, TransferDirection::Read).unwrap();
        // Rounds toward zero.
        lenient.put_float(2.9).unwrap();
        lenient.put_float(-2.9).unwrap();
        assert_eq!(lenient.get::<i32>(0).unwrap(), 2);
        assert_eq!(lenient.get::<i32>(1).unwrap(), -2);
    }

    #[test]
    fn string_pairs_are_impossible() {
        let file = open_file("stringpair");
        let sdb = int32_sdb(&file, 4, true);
        assert!(matches!(
            sdb.validate_transfer(&NodeKind::String, TransferDirection::Read),
            Err(Error::TypeMismatch { .. })
        ));

        let strings: StringBuffer = Rc::new(RefCell::new(vec![String::new(); 3]));
        let ssdb = SourceDestBuffer::ustring(&file, "/name", strings).unwrap();
        assert_eq!(ssdb.capacity(), 3);
        assert!(matches!(
            ssdb.validate_transfer(&NodeKind::Integer { min: 0, max: 1 }, TransferDirection::Read),
            Err(Error::TypeMismatch { .. })
        ));
        ssdb.validate_transfer(&NodeKind::String, TransferDirection::Read).unwrap();
    }

    #[test]
    fn scaling_round_trips_within_one_ulp() {
        let file = open_file("scaling");
        let region = new_region::<f64>(3);
        let sdb = SourceDestBuffer::new::<f64>(&file, "/x", region, 3, true, true, 0).unwrap();

        let (scale, offset) = (0.001, 0.0);
        for (i, v) in [0.000, 1.234, 9.999].into_iter().enumerate() {
            sdb.set::<f64>(i, v).unwrap();
        }
        let raws: Vec<i64> = (0..3)
            .map(|_| sdb.take_scaled(0, 10_000, scale, offset).unwrap())
            .collect();
        assert_eq!(raws, vec![0, 1234, 9999]);

        sdb.rewind();
        for raw in raws {
            sdb.put_scaled(raw, scale, offset).unwrap();
        }
        for (i, v) in [0.000, 1.234, 9.999].into_iter().enumerate() {
            assert!((sdb.get::<f64>(i).unwrap() - v).abs() <= scale);
        }
    }

    #[test]
    fn scaled_without_scaling_exposes_raw() {
        let file = open_file("rawscaled");
        let sdb = int32_sdb(&file, 2, false);
        sdb.put_scaled(1234, 0.001, 0.0).unwrap();
        assert_eq!(sdb.get::<i32>(0).unwrap(), 1234);
    }

    #[test]
    fn rebind_compatibility() {
        let file = open_file("rebind");
        let a = int32_sdb(&file, 4, false);
        let b = int32_sdb(&file, 4, false);
        a.check_compatible(&b).unwrap();

        let c = SourceDestBuffer::new::<i32>(
            &file,
            "/value",
            new_region::<i32>(8),
            8,
            false,
            false,
            0,
        )
        .unwrap();
        assert!(matches!(
            a.check_compatible(&c),
            Err(Error::BuffersNotCompatible(_))
        ));

        // Adoption retargets the backing region.
        a.adopt_region(&b);
        a.rewind();
        a.put_integer(42).unwrap();
        assert_eq!(b.get::<i32>(0).unwrap(), 42);
    }

    #[test]
    fn bool_buffer_is_integer_group() {
        let file = open_file("bool");
        let region = new_region::<bool>(2);
        let sdb =
            SourceDestBuffer::new::<bool>(&file, "/flag", region, 2, false, false, 0).unwrap();
        sdb.validate_transfer(&NodeKind::Integer { min: 0, max: 1 }, TransferDirection::Read)
            .unwrap();
        sdb.put_integer(1).unwrap();
        sdb.put_integer(0).unwrap();
        assert!(sdb.get::<bool>(0).unwrap());
        assert!(!sdb.get::<bool>(1).unwrap());
    }
}
