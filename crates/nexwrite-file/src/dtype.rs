//! Dataset Element Types
//!
//! Datasets are typed at creation and append-only afterwards. `DType` names
//! the supported element types, `DatasetValues` is the type-erased storage
//! behind a dataset node, and `Element` is the compile-time bridge that lets
//! `Chunked1D<u64>` and friends append without runtime dispatch at every
//! call site.

use serde::{Deserialize, Serialize};

/// Supported dataset element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
}

impl DType {
    /// Parse the template `dataset.type` spelling.
    pub fn parse(name: &str) -> Option<DType> {
        match name {
            "uint8" => Some(DType::UInt8),
            "uint16" => Some(DType::UInt16),
            "uint32" => Some(DType::UInt32),
            "uint64" => Some(DType::UInt64),
            "int8" => Some(DType::Int8),
            "int16" => Some(DType::Int16),
            "int32" => Some(DType::Int32),
            "int64" => Some(DType::Int64),
            "float" => Some(DType::Float),
            "double" => Some(DType::Double),
            "string" => Some(DType::String),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float => "float",
            DType::Double => "double",
            DType::String => "string",
        }
    }
}

/// Type-erased dataset storage. One variant per `DType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
pub enum DatasetValues {
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
}

impl DatasetValues {
    /// Empty storage for the given element type.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::UInt8 => DatasetValues::UInt8(Vec::new()),
            DType::UInt16 => DatasetValues::UInt16(Vec::new()),
            DType::UInt32 => DatasetValues::UInt32(Vec::new()),
            DType::UInt64 => DatasetValues::UInt64(Vec::new()),
            DType::Int8 => DatasetValues::Int8(Vec::new()),
            DType::Int16 => DatasetValues::Int16(Vec::new()),
            DType::Int32 => DatasetValues::Int32(Vec::new()),
            DType::Int64 => DatasetValues::Int64(Vec::new()),
            DType::Float => DatasetValues::Float(Vec::new()),
            DType::Double => DatasetValues::Double(Vec::new()),
            DType::String => DatasetValues::String(Vec::new()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            DatasetValues::UInt8(_) => DType::UInt8,
            DatasetValues::UInt16(_) => DType::UInt16,
            DatasetValues::UInt32(_) => DType::UInt32,
            DatasetValues::UInt64(_) => DType::UInt64,
            DatasetValues::Int8(_) => DType::Int8,
            DatasetValues::Int16(_) => DType::Int16,
            DatasetValues::Int32(_) => DType::Int32,
            DatasetValues::Int64(_) => DType::Int64,
            DatasetValues::Float(_) => DType::Float,
            DatasetValues::Double(_) => DType::Double,
            DatasetValues::String(_) => DType::String,
        }
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        match self {
            DatasetValues::UInt8(v) => v.len(),
            DatasetValues::UInt16(v) => v.len(),
            DatasetValues::UInt32(v) => v.len(),
            DatasetValues::UInt64(v) => v.len(),
            DatasetValues::Int8(v) => v.len(),
            DatasetValues::Int16(v) => v.len(),
            DatasetValues::Int32(v) => v.len(),
            DatasetValues::Int64(v) => v.len(),
            DatasetValues::Float(v) => v.len(),
            DatasetValues::Double(v) => v.len(),
            DatasetValues::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compile-time bridge between a Rust element type and `DatasetValues`.
pub trait Element: Clone + Send + Sync + 'static {
    const DTYPE: DType;

    /// Append items if the storage variant matches `Self`.
    fn extend_into(storage: &mut DatasetValues, items: &[Self]) -> bool;

    /// Borrow the stored slice if the variant matches `Self`.
    fn slice_of(storage: &DatasetValues) -> Option<&[Self]>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn extend_into(storage: &mut DatasetValues, items: &[Self]) -> bool {
                match storage {
                    DatasetValues::$variant(v) => {
                        v.extend_from_slice(items);
                        true
                    }
                    _ => false,
                }
            }

            fn slice_of(storage: &DatasetValues) -> Option<&[Self]> {
                match storage {
                    DatasetValues::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(u8, UInt8, DType::UInt8);
impl_element!(u16, UInt16, DType::UInt16);
impl_element!(u32, UInt32, DType::UInt32);
impl_element!(u64, UInt64, DType::UInt64);
impl_element!(i8, Int8, DType::Int8);
impl_element!(i16, Int16, DType::Int16);
impl_element!(i32, Int32, DType::Int32);
impl_element!(i64, Int64, DType::Int64);
impl_element!(f32, Float, DType::Float);
impl_element!(f64, Double, DType::Double);
impl_element!(String, String, DType::String);

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // DType parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_all_names() {
        for name in [
            "uint8", "uint16", "uint32", "uint64", "int8", "int16", "int32", "int64", "float",
            "double", "string",
        ] {
            let dtype = DType::parse(name).unwrap();
            assert_eq!(dtype.name(), name);
        }
    }

    #[test]
    fn test_parse_unknown_name() {
        assert!(DType::parse("complex128").is_none());
        assert!(DType::parse("").is_none());
    }

    // ---------------------------------------------------------------
    // DatasetValues
    // ---------------------------------------------------------------

    #[test]
    fn test_empty_matches_dtype() {
        for dtype in [DType::UInt8, DType::Int64, DType::Double, DType::String] {
            let values = DatasetValues::empty(dtype);
            assert_eq!(values.dtype(), dtype);
            assert!(values.is_empty());
        }
    }

    #[test]
    fn test_extend_and_slice() {
        let mut storage = DatasetValues::empty(DType::Double);
        assert!(f64::extend_into(&mut storage, &[1.0, 2.0]));
        assert!(f64::extend_into(&mut storage, &[3.0]));
        assert_eq!(f64::slice_of(&storage).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(storage.len(), 3);
    }

    #[test]
    fn test_extend_wrong_type_refused() {
        let mut storage = DatasetValues::empty(DType::Double);
        assert!(!u64::extend_into(&mut storage, &[1]));
        assert!(u64::slice_of(&storage).is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_string_elements() {
        let mut storage = DatasetValues::empty(DType::String);
        assert!(String::extend_into(
            &mut storage,
            &["a".to_string(), "b".to_string()]
        ));
        assert_eq!(
            String::slice_of(&storage).unwrap(),
            &["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut storage = DatasetValues::empty(DType::UInt64);
        u64::extend_into(&mut storage, &[1, 2, 3]);
        let json = serde_json::to_string(&storage).unwrap();
        let back: DatasetValues = serde_json::from_str(&json).unwrap();
        assert_eq!(storage, back);
    }

    #[test]
    fn test_serde_tags_use_type_names() {
        let storage = DatasetValues::Double(vec![0.5]);
        let value = serde_json::to_value(&storage).unwrap();
        assert_eq!(value["dtype"], "double");
        assert_eq!(value["data"][0], 0.5);
    }
}
