// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Index ranges over array values.
//!
//! The text form is one bound or a `low:high` pair per dimension, separated
//! by commas: `3`, `1:2`, `0:1,2:4`. Bounds are inclusive and `low` must be
//! below `high`.
//!
//! Ranges travel as strings in `ReadValueId`, `WriteValue` and
//! `MonitoredItemCreateRequest`. [`NumericRange::slice`] and
//! [`NumericRange::splice`] evaluate a single-dimension range against a
//! value, the way a server applies it.

use std::fmt;
use std::str::FromStr;

use crate::codec::{Variant, VariantArray};
use crate::error::ConfigurationError;
use crate::types::{ByteString, StatusCode};

/// One inclusive index interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBounds {
    /// First index.
    pub low: u32,
    /// Last index, equal to `low` for a single element.
    pub high: u32,
}

impl IndexBounds {
    /// Number of indexes covered.
    pub fn count(&self) -> usize {
        (self.high - self.low) as usize + 1
    }
}

/// A parsed index range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumericRange {
    dimensions: Vec<IndexBounds>,
}

impl NumericRange {
    /// A range over one dimension. Reversed bounds are swapped.
    pub fn new(low: u32, high: u32) -> Self {
        Self {
            dimensions: vec![IndexBounds {
                low: low.min(high),
                high: low.max(high),
            }],
        }
    }

    /// Bounds per dimension.
    pub fn dimensions(&self) -> &[IndexBounds] {
        &self.dimensions
    }

    fn single(&self) -> Result<IndexBounds, StatusCode> {
        match self.dimensions.as_slice() {
            [bounds] => Ok(*bounds),
            _ => Err(StatusCode::BAD_INDEX_RANGE_INVALID),
        }
    }

    /// Selects the covered elements of an array, string or byte string.
    ///
    /// The upper bound is clipped to the value's length. A range that starts
    /// past the end yields `BadIndexRangeNoData`.
    pub fn slice(&self, value: &Variant) -> Result<Variant, StatusCode> {
        let bounds = self.single()?;
        let window = |len: usize| -> Result<std::ops::Range<usize>, StatusCode> {
            let low = bounds.low as usize;
            if low >= len {
                return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
            }
            Ok(low..(bounds.high as usize + 1).min(len))
        };
        match value {
            Variant::Array(array) => {
                if array.dimensions.as_ref().is_some_and(|d| d.len() > 1) {
                    return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
                }
                let values = array.values.as_deref().unwrap_or_default();
                let window = window(values.len())?;
                Ok(Variant::Array(Box::new(VariantArray {
                    element_type: array.element_type,
                    values: Some(values[window].to_vec()),
                    dimensions: None,
                })))
            }
            Variant::String(text) => {
                let chars: Vec<char> = text.chars().collect();
                let window = window(chars.len())?;
                Ok(Variant::String(chars[window].iter().collect()))
            }
            Variant::ByteString(bytes) => {
                let window = window(bytes.len())?;
                Ok(Variant::ByteString(ByteString::from(bytes.as_bytes()[window].to_vec())))
            }
            _ => Err(StatusCode::BAD_INDEX_RANGE_NO_DATA),
        }
    }

    /// Replaces the covered elements of the array `target` with `source`.
    ///
    /// `source` must be an array of the same element type holding exactly as
    /// many elements as the range covers, and the range must lie inside
    /// `target`.
    pub fn splice(&self, target: &Variant, source: &Variant) -> Result<Variant, StatusCode> {
        let bounds = self.single()?;
        let (Variant::Array(target), Variant::Array(source)) = (target, source) else {
            return Err(StatusCode::BAD_TYPE_MISMATCH);
        };
        if target.element_type != source.element_type {
            return Err(StatusCode::BAD_TYPE_MISMATCH);
        }
        if target.dimensions.as_ref().is_some_and(|d| d.len() > 1) {
            return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
        }
        let replacement = source.values.as_deref().unwrap_or_default();
        if replacement.len() != bounds.count() {
            return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
        }
        let mut values = target.values.clone().unwrap_or_default();
        if bounds.high as usize >= values.len() {
            return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
        }
        values.splice(bounds.low as usize..=bounds.high as usize, replacement.iter().cloned());
        Ok(Variant::Array(Box::new(VariantArray {
            element_type: target.element_type,
            values: Some(values),
            dimensions: None,
        })))
    }
}

impl FromStr for NumericRange {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigurationError::invalid_value("index_range", format!("'{s}': {reason}"));
        if s.trim().is_empty() {
            return Err(invalid("empty range"));
        }
        let dimensions = s
            .split(',')
            .map(|part| {
                let bound = |text: &str| text.trim().parse::<u32>().map_err(|_| invalid("bounds must be unsigned integers"));
                match part.split_once(':') {
                    Some((low, high)) => {
                        let (low, high) = (bound(low)?, bound(high)?);
                        if low >= high {
                            return Err(invalid("low bound must be below high bound"));
                        }
                        Ok(IndexBounds { low, high })
                    }
                    None => {
                        let index = bound(part)?;
                        Ok(IndexBounds { low: index, high: index })
                    }
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dimensions })
    }
}

impl fmt::Display for NumericRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, bounds) in self.dimensions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if bounds.low == bounds.high {
                write!(f, "{}", bounds.low)?;
            } else {
                write!(f, "{}:{}", bounds.low, bounds.high)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VariantTypeId;

    fn doubles(values: &[f64]) -> Variant {
        Variant::array(VariantTypeId::Double, values.iter().map(|v| Variant::Double(*v)).collect()).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let range: NumericRange = "1:2".parse().unwrap();
        assert_eq!(range, NumericRange::new(1, 2));
        assert_eq!(range.to_string(), "1:2");

        let single: NumericRange = "4".parse().unwrap();
        assert_eq!(single.dimensions()[0].count(), 1);
        assert_eq!(single.to_string(), "4");

        let matrix: NumericRange = "0:1,2:3".parse().unwrap();
        assert_eq!(matrix.dimensions().len(), 2);
        assert_eq!(matrix.to_string(), "0:1,2:3");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["", "2:1", "1:1", "a:2", "-1", "1:", ",1"] {
            assert!(text.parse::<NumericRange>().is_err(), "{text:?} should be rejected");
        }
    }

    #[test]
    fn test_slice_array_and_clip() {
        let value = doubles(&[10.0, 11.0, 12.0, 13.0]);
        assert_eq!(NumericRange::new(1, 2).slice(&value).unwrap(), doubles(&[11.0, 12.0]));
        assert_eq!(NumericRange::new(2, 9).slice(&value).unwrap(), doubles(&[12.0, 13.0]));
        assert_eq!(
            NumericRange::new(4, 5).slice(&value),
            Err(StatusCode::BAD_INDEX_RANGE_NO_DATA)
        );
        assert_eq!(
            NumericRange::new(0, 1).slice(&Variant::Double(1.0)),
            Err(StatusCode::BAD_INDEX_RANGE_NO_DATA)
        );
        let matrix: NumericRange = "0:1,0:1".parse().unwrap();
        assert_eq!(matrix.slice(&value), Err(StatusCode::BAD_INDEX_RANGE_INVALID));
    }

    #[test]
    fn test_slice_string() {
        let range = NumericRange::new(1, 3);
        assert_eq!(range.slice(&Variant::from("boiler")).unwrap(), Variant::from("oil"));
    }

    #[test]
    fn test_splice() {
        let target = doubles(&[10.0, 11.0, 12.0, 13.0]);
        let range = NumericRange::new(1, 2);
        assert_eq!(
            range.splice(&target, &doubles(&[41.0, 42.0])).unwrap(),
            doubles(&[10.0, 41.0, 42.0, 13.0])
        );
        assert_eq!(
            range.splice(&target, &doubles(&[41.0])),
            Err(StatusCode::BAD_INDEX_RANGE_INVALID)
        );
        assert_eq!(
            NumericRange::new(3, 4).splice(&target, &doubles(&[1.0, 2.0])),
            Err(StatusCode::BAD_INDEX_RANGE_NO_DATA)
        );
        let ints = Variant::array(VariantTypeId::Int32, vec![Variant::Int32(1), Variant::Int32(2)]).unwrap();
        assert_eq!(range.splice(&target, &ints), Err(StatusCode::BAD_TYPE_MISMATCH));
    }
}
