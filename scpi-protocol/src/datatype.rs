//! Element datatypes and the typed arrays carried in binary blocks.
use std::{fmt::Display, str::FromStr};

use crate::error::ScpiError;

/// Byte order of the elements inside a block body.
///
/// Instruments usually switch between the two with `FORMat:BORDer NORMal|SWAPped`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteOrder::Little => write!(f, "little-endian"),
            ByteOrder::Big => write!(f, "big-endian"),
        }
    }
}

/// The closed set of supported element types.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ElementKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ElementKind {
    pub const ALL: [ElementKind; 10] = [
        ElementKind::I8,
        ElementKind::U8,
        ElementKind::I16,
        ElementKind::U16,
        ElementKind::I32,
        ElementKind::U32,
        ElementKind::I64,
        ElementKind::U64,
        ElementKind::F32,
        ElementKind::F64,
    ];

    /// Size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            ElementKind::I8 | ElementKind::U8 => 1,
            ElementKind::I16 | ElementKind::U16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
            ElementKind::I64 | ElementKind::U64 | ElementKind::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::I8 => "i8",
            ElementKind::U8 => "u8",
            ElementKind::I16 => "i16",
            ElementKind::U16 => "u16",
            ElementKind::I32 => "i32",
            ElementKind::U32 => "u32",
            ElementKind::I64 => "i64",
            ElementKind::U64 => "u64",
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
        }
    }
}

impl Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts Rust names (`i16`, `f64`) and the format characters of Python's `struct`
/// module (`h`, `d`) that instrument documentation often uses.
impl FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "b" => ElementKind::I8,
            "B" => ElementKind::U8,
            "h" => ElementKind::I16,
            "H" => ElementKind::U16,
            "i" | "l" => ElementKind::I32,
            "I" | "L" => ElementKind::U32,
            "q" => ElementKind::I64,
            "Q" => ElementKind::U64,
            "f" => ElementKind::F32,
            "d" => ElementKind::F64,
            other => ElementKind::ALL
                .into_iter()
                .find(|kind| kind.name().eq_ignore_ascii_case(other))
                .ok_or_else(|| format!("Unknown data type '{}'", other))?,
        };
        Ok(kind)
    }
}

/// Element kind together with the byte order used on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DataType {
    pub kind: ElementKind,
    pub order: ByteOrder,
}

impl DataType {
    pub fn new(kind: ElementKind, order: ByteOrder) -> DataType {
        DataType { kind, order }
    }
}

impl From<ElementKind> for DataType {
    fn from(kind: ElementKind) -> Self {
        DataType::new(kind, ByteOrder::default())
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.kind, self.order)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A primitive that can be stored in a [`TypedArray`].
pub trait Element: Copy + Display + FromStr + sealed::Sealed {
    const KIND: ElementKind;

    /// Converts without wrapping, saturating or flushing to zero. `None` if `value` is out
    /// of range, or not a whole number for integer types. Narrowing to `f32` rounds to the
    /// nearest representable value.
    fn from_f64(value: f64) -> Option<Self>;
    fn to_f64(self) -> f64;
    fn write_to(self, order: ByteOrder, out: &mut Vec<u8>);
    /// `bytes` has exactly the element size.
    fn read_from(order: ByteOrder, bytes: &[u8]) -> Self;
    fn wrap(values: Vec<Self>) -> TypedArray;
    fn unwrap_ref(array: &TypedArray) -> Option<&[Self]>;
}

macro_rules! element {
    ($ty:ty, $variant:ident, |$v:ident| $from_f64:expr) => {
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$variant;

            fn from_f64($v: f64) -> Option<Self> {
                $from_f64
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn write_to(self, order: ByteOrder, out: &mut Vec<u8>) {
                match order {
                    ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                    ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                }
            }

            fn read_from(order: ByteOrder, bytes: &[u8]) -> Self {
                let bytes = bytes.try_into().unwrap();
                match order {
                    ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                    ByteOrder::Big => <$ty>::from_be_bytes(bytes),
                }
            }

            fn wrap(values: Vec<Self>) -> TypedArray {
                TypedArray::$variant(values)
            }

            fn unwrap_ref(array: &TypedArray) -> Option<&[Self]> {
                match array {
                    TypedArray::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

fn integral(value: f64) -> Option<i128> {
    // i128 covers every supported integer type, so the cast below is exact.
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e38 {
        Some(value as i128)
    } else {
        None
    }
}

element!(i8, I8, |v| integral(v).and_then(|i| i.try_into().ok()));
element!(u8, U8, |v| integral(v).and_then(|i| i.try_into().ok()));
element!(i16, I16, |v| integral(v).and_then(|i| i.try_into().ok()));
element!(u16, U16, |v| integral(v).and_then(|i| i.try_into().ok()));
element!(i32, I32, |v| integral(v).and_then(|i| i.try_into().ok()));
element!(u32, U32, |v| integral(v).and_then(|i| i.try_into().ok()));
element!(i64, I64, |v| integral(v).and_then(|i| i.try_into().ok()));
element!(u64, U64, |v| integral(v).and_then(|i| i.try_into().ok()));
element!(f32, F32, |v| {
    let narrowed = v as f32;
    if (v.is_finite() && narrowed.is_infinite()) || (v != 0.0 && narrowed == 0.0) {
        None
    } else {
        Some(narrowed)
    }
});
element!(f64, F64, |v| Some(v));

/// Runs `$body` with `$values` bound to the vector inside any variant.
macro_rules! with_values {
    ($array:expr, $values:ident => $body:expr) => {
        match $array {
            TypedArray::I8($values) => $body,
            TypedArray::U8($values) => $body,
            TypedArray::I16($values) => $body,
            TypedArray::U16($values) => $body,
            TypedArray::I32($values) => $body,
            TypedArray::U32($values) => $body,
            TypedArray::I64($values) => $body,
            TypedArray::U64($values) => $body,
            TypedArray::F32($values) => $body,
            TypedArray::F64($values) => $body,
        }
    };
}

/// Generic counterpart to [`with_values`] for code that only knows the kind.
macro_rules! with_kind {
    ($kind:expr, $t:ident => $body:expr) => {
        match $kind {
            ElementKind::I8 => { type $t = i8; $body }
            ElementKind::U8 => { type $t = u8; $body }
            ElementKind::I16 => { type $t = i16; $body }
            ElementKind::U16 => { type $t = u16; $body }
            ElementKind::I32 => { type $t = i32; $body }
            ElementKind::U32 => { type $t = u32; $body }
            ElementKind::I64 => { type $t = i64; $body }
            ElementKind::U64 => { type $t = u64; $body }
            ElementKind::F32 => { type $t = f32; $body }
            ElementKind::F64 => { type $t = f64; $body }
        }
    };
}

/// A contiguous array of numeric values of one [`ElementKind`].
#[derive(Clone, Debug, PartialEq)]
pub enum TypedArray {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TypedArray {
    pub fn empty(kind: ElementKind) -> TypedArray {
        with_kind!(kind, T => T::wrap(Vec::new()))
    }

    pub fn kind(&self) -> ElementKind {
        with_values!(self, values => element_kind_of(values.as_slice()))
    }

    pub fn len(&self) -> usize {
        with_values!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the serialized body in bytes
    pub fn byte_len(&self) -> usize {
        self.len() * self.kind().size()
    }

    /// Borrow the values if the array holds elements of type `T`.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::unwrap_ref(self)
    }

    /// Append the raw representation of all elements to `out`.
    pub fn write_bytes(&self, order: ByteOrder, out: &mut Vec<u8>) {
        out.reserve(self.byte_len());
        with_values!(self, values => {
            for v in values {
                v.write_to(order, out);
            }
        })
    }

    pub fn to_bytes(&self, order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        self.write_bytes(order, &mut out);
        out
    }

    /// Reinterpret a block body as elements of `data_type`.
    pub fn from_bytes(data_type: DataType, bytes: &[u8]) -> Result<TypedArray, ScpiError> {
        let size = data_type.kind.size();
        if bytes.len() % size != 0 {
            return Err(ScpiError::Decoding(format!(
                "{} bytes cannot hold a whole number of {} elements ({} bytes each)",
                bytes.len(),
                data_type.kind,
                size
            )));
        }
        Ok(with_kind!(data_type.kind, T => T::wrap(
            bytes
                .chunks_exact(size)
                .map(|chunk| T::read_from(data_type.order, chunk))
                .collect(),
        )))
    }

    /// Build an array from untyped numbers. Fails instead of rounding, wrapping or saturating.
    pub fn from_f64(kind: ElementKind, values: &[f64]) -> Result<TypedArray, ScpiError> {
        with_kind!(kind, T => {
            let converted = values
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    T::from_f64(v).ok_or_else(|| {
                        ScpiError::Encoding(format!(
                            "value {} at index {} is not representable as {}",
                            v, i, kind
                        ))
                    })
                })
                .collect::<Result<Vec<T>, ScpiError>>()?;
            Ok(T::wrap(converted))
        })
    }

    /// Parse textual values, e.g. from a command line.
    ///
    /// Numbers too large or too small for a float type are rejected instead of becoming
    /// infinite or zero. Only the literals `inf`, `infinity` and `nan` produce non-finite
    /// values.
    pub fn parse<S: AsRef<str>>(kind: ElementKind, values: &[S]) -> Result<TypedArray, ScpiError> {
        with_kind!(kind, T => {
            let parsed = values
                .iter()
                .map(|s| {
                    let s = s.as_ref().trim();
                    let invalid =
                        || ScpiError::Encoding(format!("'{}' is not a valid {} value", s, kind));
                    let value = s.parse::<T>().map_err(|_| invalid())?;
                    let widened = value.to_f64();
                    if !widened.is_finite() && !is_non_finite_literal(s) {
                        return Err(invalid());
                    }
                    if widened == 0.0 && has_nonzero_mantissa(s) {
                        return Err(invalid());
                    }
                    Ok(value)
                })
                .collect::<Result<Vec<T>, ScpiError>>()?;
            Ok(T::wrap(parsed))
        })
    }
}

fn is_non_finite_literal(text: &str) -> bool {
    let unsigned = text.trim_start_matches(['+', '-']);
    ["inf", "infinity", "nan"]
        .iter()
        .any(|literal| unsigned.eq_ignore_ascii_case(literal))
}

fn has_nonzero_mantissa(text: &str) -> bool {
    text.split(['e', 'E'])
        .next()
        .is_some_and(|mantissa| mantissa.bytes().any(|b| (b'1'..=b'9').contains(&b)))
}

fn element_kind_of<T: Element>(_: &[T]) -> ElementKind {
    T::KIND
}

impl<T: Element> From<Vec<T>> for TypedArray {
    fn from(values: Vec<T>) -> Self {
        T::wrap(values)
    }
}

impl Display for TypedArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        with_values!(self, values => {
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", v)?;
            }
            Ok(())
        })
    }
}
