// relay-core/src/infrastructure/tabular.rs
//
// Bridge between loosely-typed source payloads (JSON rows) and Arrow
// record batches, plus the reverse direction used to hand query results
// back to callers. Numeric columns widen to Int64/Float64; everything
// else lands as Utf8.

use std::collections::HashSet;
use std::sync::Arc;

use datafusion::arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, StringArray, StringBuilder,
};
use datafusion::arrow::compute;
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use serde_json::{Map, Value};

use crate::error::RelayError;

pub type JsonRow = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InferredType {
    Boolean,
    Int,
    Float,
    Text,
}

/// Build a record batch from JSON rows. Column order is first-seen order;
/// a column's type is the widest one observed across all rows.
pub fn rows_to_batch(rows: &[JsonRow]) -> Result<RecordBatch, RelayError> {
    if rows.is_empty() {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let mut columns: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
    }

    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());

    for column in &columns {
        let inferred = infer_column_type(rows, column);
        let array: ArrayRef = match inferred {
            InferredType::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(rows.len());
                for row in rows {
                    match row.get(column) {
                        Some(Value::Bool(b)) => builder.append_value(*b),
                        _ => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            InferredType::Int => {
                let mut builder = Int64Builder::with_capacity(rows.len());
                for row in rows {
                    match row.get(column).and_then(Value::as_i64) {
                        Some(v) => builder.append_value(v),
                        None => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            InferredType::Float => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for row in rows {
                    match row.get(column).and_then(Value::as_f64) {
                        Some(v) => builder.append_value(v),
                        None => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            InferredType::Text => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match row.get(column) {
                        None | Some(Value::Null) => builder.append_null(),
                        Some(Value::String(s)) => builder.append_value(s),
                        Some(other) => builder.append_value(other.to_string()),
                    }
                }
                Arc::new(builder.finish())
            }
        };
        fields.push(Field::new(column, array.data_type().clone(), true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    RecordBatch::try_new(schema, arrays)
        .map_err(|e| RelayError::Internal(format!("Failed to assemble record batch: {e}")))
}

fn infer_column_type(rows: &[JsonRow], column: &str) -> InferredType {
    let mut saw_bool = false;
    let mut saw_int = false;
    let mut saw_float = false;
    let mut saw_other = false;

    for row in rows {
        match row.get(column) {
            None | Some(Value::Null) => {}
            Some(Value::Bool(_)) => saw_bool = true,
            Some(Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    saw_int = true;
                } else {
                    saw_float = true;
                }
            }
            Some(_) => saw_other = true,
        }
    }

    if saw_other || (saw_bool && (saw_int || saw_float)) {
        InferredType::Text
    } else if saw_bool {
        InferredType::Boolean
    } else if saw_float {
        InferredType::Float
    } else if saw_int {
        InferredType::Int
    } else {
        InferredType::Text
    }
}

/// Convert record batches into JSON rows. NaN floats and nulls become
/// JSON null; anything non-primitive is rendered through an Arrow cast
/// to Utf8.
pub fn batches_to_json_rows(batches: &[RecordBatch]) -> Result<Vec<JsonRow>, RelayError> {
    let mut rows = Vec::new();
    for batch in batches {
        let schema = batch.schema();
        let mut columns: Vec<Vec<Value>> = Vec::with_capacity(batch.num_columns());
        for col in batch.columns() {
            columns.push(column_to_values(col)?);
        }
        for i in 0..batch.num_rows() {
            let mut row = Map::new();
            for (j, field) in schema.fields().iter().enumerate() {
                row.insert(field.name().clone(), columns[j][i].clone());
            }
            rows.push(row);
        }
    }
    Ok(rows)
}

/// One column as JSON values, widened to bool / i64 / f64 / string.
pub fn column_to_values(col: &ArrayRef) -> Result<Vec<Value>, RelayError> {
    let n = col.len();
    match col.data_type() {
        DataType::Null => Ok(vec![Value::Null; n]),
        DataType::Boolean => {
            let arr = downcast::<BooleanArray>(col)?;
            Ok((0..n)
                .map(|i| {
                    if arr.is_null(i) {
                        Value::Null
                    } else {
                        Value::Bool(arr.value(i))
                    }
                })
                .collect())
        }
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let casted = compute::cast(col, &DataType::Int64)
                .map_err(|e| RelayError::Internal(format!("Integer cast failed: {e}")))?;
            let arr = downcast::<Int64Array>(&casted)?;
            Ok((0..n)
                .map(|i| {
                    if arr.is_null(i) {
                        Value::Null
                    } else {
                        Value::from(arr.value(i))
                    }
                })
                .collect())
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let casted = compute::cast(col, &DataType::Float64)
                .map_err(|e| RelayError::Internal(format!("Float cast failed: {e}")))?;
            let arr = downcast::<Float64Array>(&casted)?;
            Ok((0..n)
                .map(|i| {
                    if arr.is_null(i) || arr.value(i).is_nan() {
                        Value::Null
                    } else {
                        Value::from(arr.value(i))
                    }
                })
                .collect())
        }
        _ => {
            let strings = column_to_strings(col)?;
            Ok(strings
                .into_iter()
                .map(|v| v.map(Value::String).unwrap_or(Value::Null))
                .collect())
        }
    }
}

/// Render any column as optional strings via an Arrow cast to Utf8.
pub fn column_to_strings(col: &ArrayRef) -> Result<Vec<Option<String>>, RelayError> {
    let casted = compute::cast(col, &DataType::Utf8)
        .map_err(|e| RelayError::Internal(format!("Utf8 cast failed: {e}")))?;
    let arr = downcast::<StringArray>(&casted)?;
    Ok((0..arr.len())
        .map(|i| {
            if arr.is_null(i) {
                None
            } else {
                Some(arr.value(i).to_string())
            }
        })
        .collect())
}

/// Numeric view of a column, or None when the type is not numeric.
pub fn column_to_floats(col: &ArrayRef) -> Result<Option<Vec<Option<f64>>>, RelayError> {
    if !col.data_type().is_numeric() {
        return Ok(None);
    }
    let casted = compute::cast(col, &DataType::Float64)
        .map_err(|e| RelayError::Internal(format!("Float cast failed: {e}")))?;
    let arr = downcast::<Float64Array>(&casted)?;
    Ok(Some(
        (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    None
                } else {
                    Some(arr.value(i))
                }
            })
            .collect(),
    ))
}

pub fn total_rows(batches: &[RecordBatch]) -> u64 {
    batches.iter().map(|b| b.num_rows() as u64).sum()
}

/// Concatenate batches into one (used by combine_chunks and sampling).
pub fn concat(batches: &[RecordBatch]) -> Result<RecordBatch, RelayError> {
    let schema: SchemaRef = batches
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| Arc::new(Schema::empty()));
    compute::concat_batches(&schema, batches)
        .map_err(|e| RelayError::Internal(format!("Batch concat failed: {e}")))
}

/// Re-slice batches into chunks of at most `chunk_size` rows.
pub fn rechunk(batches: Vec<RecordBatch>, chunk_size: usize) -> Vec<RecordBatch> {
    let mut out = Vec::new();
    for batch in batches {
        let mut offset = 0;
        while offset < batch.num_rows() {
            let len = chunk_size.min(batch.num_rows() - offset);
            out.push(batch.slice(offset, len));
            offset += len;
        }
        if batch.num_rows() == 0 {
            out.push(batch);
        }
    }
    out
}

fn downcast<T: 'static>(col: &ArrayRef) -> Result<&T, RelayError> {
    col.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RelayError::Internal("Unexpected array type after cast".to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> JsonRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_rows_to_batch_infers_types() -> anyhow::Result<()> {
        let rows = vec![
            row(&[
                ("id", Value::from(1)),
                ("amount", Value::from(9.5)),
                ("active", Value::Bool(true)),
                ("segment", Value::String("pro".into())),
            ]),
            row(&[
                ("id", Value::from(2)),
                ("amount", Value::from(3)),
                ("active", Value::Null),
                ("segment", Value::String("free".into())),
            ]),
        ];
        let batch = rows_to_batch(&rows)?;
        assert_eq!(batch.num_rows(), 2);
        let schema = batch.schema();
        assert_eq!(schema.field(0).name(), "id");
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        // mixed int/float widens to float
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Boolean);
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);
        Ok(())
    }

    #[test]
    fn test_batches_to_json_rows_round_trip() -> anyhow::Result<()> {
        let rows = vec![
            row(&[("id", Value::from(1)), ("name", Value::String("a".into()))]),
            row(&[("id", Value::from(2)), ("name", Value::Null)]),
        ];
        let batch = rows_to_batch(&rows)?;
        let back = batches_to_json_rows(&[batch])?;
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].get("id"), Some(&Value::from(1)));
        assert_eq!(back[1].get("name"), Some(&Value::Null));
        Ok(())
    }

    #[test]
    fn test_nan_becomes_null() -> anyhow::Result<()> {
        let arr: ArrayRef = Arc::new(Float64Array::from(vec![Some(1.0), Some(f64::NAN), None]));
        let values = column_to_values(&arr)?;
        assert_eq!(values[0], Value::from(1.0));
        assert_eq!(values[1], Value::Null);
        assert_eq!(values[2], Value::Null);
        Ok(())
    }

    #[test]
    fn test_rechunk_splits_rows() -> anyhow::Result<()> {
        let rows: Vec<JsonRow> = (0..25).map(|i| row(&[("id", Value::from(i))])).collect();
        let batch = rows_to_batch(&rows)?;
        let chunks = rechunk(vec![batch], 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].num_rows(), 5);
        assert_eq!(total_rows(&chunks), 25);
        Ok(())
    }
}
