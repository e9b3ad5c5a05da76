//! Memory compaction of the final snapshot frame.
//!
//! Integers narrow to the smallest width holding their observed range, floats
//! drop to single precision and low-cardinality text becomes categorical.
//! A column that fails to convert keeps its type and is logged.

use polars::prelude::*;
use tracing::{debug, warn};

use crate::error::Result;

/// Text columns below this unique/row ratio become categorical.
pub const CATEGORICAL_RATIO: f64 = 0.5;

pub fn narrowest_unsigned(max: i128) -> DataType {
    if max <= u8::MAX as i128 {
        DataType::UInt8
    } else if max <= u16::MAX as i128 {
        DataType::UInt16
    } else if max <= u32::MAX as i128 {
        DataType::UInt32
    } else {
        DataType::UInt64
    }
}

pub fn narrowest_signed(min: i128, max: i128) -> DataType {
    let fits = |lo: i128, hi: i128| min >= lo && max <= hi;
    if fits(i8::MIN as i128, i8::MAX as i128) {
        DataType::Int8
    } else if fits(i16::MIN as i128, i16::MAX as i128) {
        DataType::Int16
    } else if fits(i32::MIN as i128, i32::MAX as i128) {
        DataType::Int32
    } else {
        DataType::Int64
    }
}

fn integer_target(series: &Series) -> PolarsResult<Option<DataType>> {
    let (Some(min), Some(max)) = (series.min::<i128>()?, series.max::<i128>()?) else {
        return Ok(None);
    };
    Ok(Some(if min >= 0 {
        narrowest_unsigned(max)
    } else {
        narrowest_signed(min, max)
    }))
}

fn is_low_cardinality(series: &Series) -> PolarsResult<bool> {
    if series.is_empty() {
        return Ok(false);
    }
    let ratio = series.n_unique()? as f64 / series.len() as f64;
    Ok(ratio < CATEGORICAL_RATIO)
}

/// Target type for one column, or `None` to keep it as is.
fn compact_target(series: &Series) -> PolarsResult<Option<DataType>> {
    let dtype = series.dtype();
    if dtype.is_integer() {
        integer_target(series)
    } else if matches!(dtype, DataType::Float64) {
        Ok(Some(DataType::Float32))
    } else if matches!(dtype, DataType::String) && is_low_cardinality(series)? {
        Ok(Some(DataType::from_categories(Categories::global())))
    } else {
        Ok(None)
    }
}

/// Strict cast to `target`; `None` (with a warning) when any value would be lost.
fn try_narrow(series: &Series, target: &DataType) -> Option<Series> {
    match series.strict_cast(target) {
        Ok(narrowed) => {
            debug!(column = %series.name(), from = %series.dtype(), to = %target, "compacted column");
            Some(narrowed)
        }
        Err(e) => {
            warn!(column = %series.name(), error = %e, "narrowing failed, keeping original type");
            None
        }
    }
}

pub fn compact_frame(mut df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|s| s.to_string())
        .collect();

    for name in &names {
        let series = df.column(name)?.as_materialized_series().clone();
        let target = match compact_target(&series) {
            Ok(Some(t)) if &t != series.dtype() => t,
            Ok(_) => continue,
            Err(e) => {
                warn!(column = %name, error = %e, "could not inspect column, keeping original type");
                continue;
            }
        };

        if let Some(narrowed) = try_narrow(&series, &target) {
            df.with_column(narrowed)?;
        }
    }

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_boundaries() {
        assert_eq!(narrowest_unsigned(0), DataType::UInt8);
        assert_eq!(narrowest_unsigned(255), DataType::UInt8);
        assert_eq!(narrowest_unsigned(256), DataType::UInt16);
        assert_eq!(narrowest_unsigned(65_535), DataType::UInt16);
        assert_eq!(narrowest_unsigned(65_536), DataType::UInt32);
        assert_eq!(narrowest_unsigned(4_294_967_296), DataType::UInt64);
    }

    #[test]
    fn signed_boundaries() {
        assert_eq!(narrowest_signed(-128, 127), DataType::Int8);
        assert_eq!(narrowest_signed(-129, 0), DataType::Int16);
        assert_eq!(narrowest_signed(-1, 32_768), DataType::Int32);
        assert_eq!(narrowest_signed(-1, 2_147_483_648), DataType::Int64);
    }

    #[test]
    fn compacts_each_column_kind() {
        let df = df!(
            "inep" => [24_000_001i64, 24_000_002, 24_000_001, 24_000_003],
            "delta" => [-3i64, 5, 0, 100],
            "score" => [Some(7.5f64), None, Some(5.0), Some(6.0)],
            "region" => ["1ª DIREC", "1ª DIREC", "1ª DIREC", "2ª DIREC"],
            "id" => ["a", "b", "c", "d"]
        )
        .unwrap();

        let out = compact_frame(df).unwrap();
        assert_eq!(out.column("inep").unwrap().dtype(), &DataType::UInt32);
        assert_eq!(out.column("delta").unwrap().dtype(), &DataType::Int8);
        assert_eq!(out.column("score").unwrap().dtype(), &DataType::Float32);
        assert!(out.column("region").unwrap().dtype().is_categorical());
        assert_eq!(out.column("id").unwrap().dtype(), &DataType::String);
        assert_eq!(out.column("score").unwrap().null_count(), 1);
    }

    #[test]
    fn failed_narrowing_keeps_the_column() {
        let text = Series::new("inep".into(), ["24000001", "abc"]);
        assert!(try_narrow(&text, &DataType::UInt32).is_none());

        let ids = Series::new("inep".into(), [24_000_001i64, 24_000_002]);
        let narrowed = try_narrow(&ids, &DataType::UInt32).unwrap();
        assert_eq!(narrowed.dtype(), &DataType::UInt32);
    }

    #[test]
    fn all_null_integers_and_empty_frames_are_left_alone() {
        let nulls = Series::full_null("n".into(), 3, &DataType::Int64);
        let df = DataFrame::new(vec![nulls.into()]).unwrap();
        let out = compact_frame(df).unwrap();
        assert_eq!(out.column("n").unwrap().dtype(), &DataType::Int64);

        let empty = DataFrame::new(vec![Series::new_empty("s".into(), &DataType::String).into()])
            .unwrap();
        let out = compact_frame(empty).unwrap();
        assert_eq!(out.column("s").unwrap().dtype(), &DataType::String);
    }
}
