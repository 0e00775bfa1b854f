//! Immutable fixed-width binary series
//!
//! Format (big-endian, no padding, no trailing data):
//! - 2 bytes: signature `0xA3 0x98`
//! - 2 bytes: record count (unsigned)
//! - N × 8 bytes: records
//!   - 4 bytes: timestamp offset from the series base (signed)
//!   - 4 bytes: IEEE-754 float value
//!
//! The base timestamp is the first timestamp at compaction time and travels
//! beside the buffer, not inside it.

use super::{next_series_id, Aggregates, Series};
use crate::{Result, SeriesError, Timestamp, Value};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::OnceLock;
use std::time::Duration;

/// Signature written at the start of every buffer
pub const SIGNATURE: [u8; 2] = [0xA3, 0x98];

/// Header size in bytes
pub const HEADER_SIZE: usize = 4;

/// Record size in bytes
pub const RECORD_SIZE: usize = 8;

/// Largest record count the 2-byte header can describe
pub const MAX_RECORDS: usize = u16::MAX as usize;

/// A read-only series over a binary buffer.
///
/// Every `add` allocates a new buffer and returns a new series; the buffer
/// of an existing series is never touched.
#[derive(Debug, Clone)]
pub struct CompactSeries {
    id: String,
    name: String,
    retention: Duration,
    base: Timestamp,
    data: Bytes,
    aggregates: OnceLock<Aggregates>,
}

impl CompactSeries {
    /// Encode values into a new compact series
    pub fn from_values(name: impl Into<String>, values: &[Value]) -> Result<Self> {
        let mut sorted;
        let values = if values.windows(2).all(|w| w[0].timestamp <= w[1].timestamp) {
            values
        } else {
            sorted = values.to_vec();
            sorted.sort_by_key(|v| v.timestamp);
            &sorted[..]
        };
        let base = values.first().map_or(0, |v| v.timestamp);
        let data = encode(base, values)?;
        Ok(Self::from_parts(name.into(), base, data))
    }

    /// Wrap an existing buffer, validating signature and length
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>, base: Timestamp) -> Result<Self> {
        let data = data.into();
        if data.len() < HEADER_SIZE {
            return Err(SeriesError::InvalidFormat(format!(
                "Compact series too short: {} bytes",
                data.len()
            )));
        }
        if data[..2] != SIGNATURE {
            return Err(SeriesError::InvalidFormat(format!(
                "Invalid compact series signature: {:02x}{:02x}",
                data[0], data[1]
            )));
        }
        let body = data.len() - HEADER_SIZE;
        if body % RECORD_SIZE != 0 {
            return Err(SeriesError::InvalidFormat(format!(
                "Compact series body of {} bytes is not a whole number of records",
                body
            )));
        }
        let declared = (&data[2..HEADER_SIZE]).get_u16() as usize;
        if declared != body / RECORD_SIZE {
            return Err(SeriesError::InvalidFormat(format!(
                "Compact series declares {} records but holds {}",
                declared,
                body / RECORD_SIZE
            )));
        }
        for index in 0..declared {
            let position = HEADER_SIZE + index * RECORD_SIZE;
            let offset = (&data[position..position + 4]).get_i32();
            if base.checked_add(offset as i64).is_none() {
                return Err(SeriesError::InvalidFormat(format!(
                    "Record {} offset {} overflows base timestamp {}",
                    index, offset, base
                )));
            }
        }
        Ok(Self::from_parts(name.into(), base, data))
    }

    fn from_parts(name: String, base: Timestamp, data: Bytes) -> Self {
        Self {
            id: next_series_id(),
            name,
            retention: crate::config::DEFAULT_RETENTION,
            base,
            data,
            aggregates: OnceLock::new(),
        }
    }

    /// Builder-style retention
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// The encoded buffer
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Timestamp the record offsets are relative to
    pub fn base(&self) -> Timestamp {
        self.base
    }

    /// New series with `value` inserted in timestamp order
    pub fn add(&self, value: Value) -> Result<CompactSeries> {
        let count = self.count();
        if count >= MAX_RECORDS {
            return Err(SeriesError::invalid(format!(
                "compact series '{}' is full ({} records)",
                self.name, MAX_RECORDS
            )));
        }
        let base = if count == 0 { value.timestamp } else { self.base };
        let position = self.upper_bound(value.timestamp);
        let split = HEADER_SIZE + position * RECORD_SIZE;

        let mut buf = BytesMut::with_capacity(self.data.len() + RECORD_SIZE);
        buf.put_slice(&SIGNATURE);
        buf.put_u16((count + 1) as u16);
        buf.put_slice(&self.data[HEADER_SIZE..split]);
        put_record(&mut buf, base, value)?;
        buf.put_slice(&self.data[split..]);

        Ok(Self::from_parts(self.name.clone(), base, buf.freeze()).with_retention(self.retention))
    }

    /// Iterate over values, decoding one record at a time
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.count()).map(move |index| self.decode_at(index))
    }

    fn decode_at(&self, index: usize) -> Value {
        let position = HEADER_SIZE + index * RECORD_SIZE;
        let mut record = &self.data[position..position + RECORD_SIZE];
        let offset = record.get_i32();
        let value = record.get_f32();
        // Offsets are checked against the base whenever a buffer is wrapped.
        Value::new(self.base + offset as i64, value)
    }

    /// Index of the first record with a timestamp greater than `timestamp`
    fn upper_bound(&self, timestamp: Timestamp) -> usize {
        let (mut low, mut high) = (0, self.count());
        while low < high {
            let mid = low + (high - low) / 2;
            if self.decode_at(mid).timestamp <= timestamp {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    fn aggregates(&self) -> &Aggregates {
        self.aggregates.get_or_init(|| Aggregates::compute(self.iter()))
    }
}

fn encode(base: Timestamp, values: &[Value]) -> Result<Bytes> {
    if values.len() > MAX_RECORDS {
        return Err(SeriesError::invalid(format!(
            "cannot compact {} values, at most {} fit",
            values.len(),
            MAX_RECORDS
        )));
    }
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + values.len() * RECORD_SIZE);
    buf.put_slice(&SIGNATURE);
    buf.put_u16(values.len() as u16);
    for value in values {
        put_record(&mut buf, base, *value)?;
    }
    Ok(buf.freeze())
}

fn put_record(buf: &mut BytesMut, base: Timestamp, value: Value) -> Result<()> {
    let offset = value
        .timestamp
        .checked_sub(base)
        .and_then(|offset| i32::try_from(offset).ok())
        .ok_or_else(|| {
            SeriesError::invalid(format!(
                "timestamp {} is too far from series base {}",
                value.timestamp, base
            ))
        })?;
    buf.put_i32(offset);
    buf.put_f32(value.value);
    Ok(())
}

impl Series for CompactSeries {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn retention(&self) -> Duration {
        self.retention
    }

    fn values(&self) -> Vec<Value> {
        self.iter().collect()
    }

    fn get(&self, index: usize) -> Option<Value> {
        if index < self.count() {
            Some(self.decode_at(index))
        } else {
            None
        }
    }

    fn count(&self) -> usize {
        (self.data.len() - HEADER_SIZE) / RECORD_SIZE
    }

    fn average(&self) -> Option<f64> {
        self.aggregates().average()
    }

    fn minimum(&self) -> Option<f64> {
        self.aggregates().minimum
    }

    fn maximum(&self) -> Option<f64> {
        self.aggregates().maximum
    }

    fn weight(&self) -> f64 {
        self.aggregates().weight()
    }

    fn compact(&self) -> Result<CompactSeries> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_compact() -> CompactSeries {
        CompactSeries::from_values(
            "test",
            &[
                Value::new(1, 1.0),
                Value::new(2, 2.0),
                Value::new(3, 5.0),
                Value::new(4, 10.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_create() {
        let series = create_compact();
        assert!(!series.is_empty());
        assert_eq!(series.count(), 4);
        assert_eq!(series.as_bytes().len(), HEADER_SIZE + 4 * RECORD_SIZE);
    }

    #[test]
    fn test_layout() {
        let series = CompactSeries::from_values("test", &[Value::new(1_000, 1.5), Value::new(1_010, -2.0)]).unwrap();
        let bytes = series.as_bytes();
        assert_eq!(&bytes[..4], &[0xA3, 0x98, 0x00, 0x02]);
        assert_eq!(&bytes[4..8], &0i32.to_be_bytes());
        assert_eq!(&bytes[8..12], &1.5f32.to_be_bytes());
        assert_eq!(&bytes[12..16], &10i32.to_be_bytes());
        assert_eq!(&bytes[16..20], &(-2.0f32).to_be_bytes());
        assert_eq!(series.base(), 1_000);
    }

    #[test]
    fn test_values() {
        let series = create_compact();
        assert_eq!(series.first().unwrap().value, 1.0);
        assert_eq!(series.last().unwrap().value, 10.0);
        assert_eq!(series.get(0).unwrap().value, 1.0);
        assert_eq!(series.values()[0].value, 1.0);
        assert_eq!(series.get(2).unwrap().value, 5.0);
        assert_eq!(series.values()[2].value, 5.0);
        assert!(series.get(4).is_none());
    }

    #[test]
    fn test_values_empty() {
        let series = CompactSeries::from_values("test", &[]).unwrap();
        assert!(series.first().is_none());
        assert!(series.last().is_none());
        assert_eq!(series.weight(), 0.0);
        assert_eq!(series.as_bytes().len(), HEADER_SIZE);
    }

    #[test]
    fn test_aggregates() {
        let series = create_compact();
        assert!((series.minimum().unwrap() - 1.0).abs() < 0.001);
        assert!((series.average().unwrap() - 4.5).abs() < 0.001);
        assert!((series.maximum().unwrap() - 10.0).abs() < 0.001);
        assert!((series.weight() - 2.5).abs() < 0.001);
    }

    #[test]
    fn test_add_is_copy_on_write() {
        let series = create_compact();
        let before = series.as_bytes().clone();

        let grown = series.add(Value::new(5, 15.0)).unwrap();
        assert_eq!(grown.count(), 5);
        assert!((grown.minimum().unwrap() - 1.0).abs() < 0.001);
        assert!((grown.average().unwrap() - 6.6).abs() < 0.001);
        assert!((grown.maximum().unwrap() - 15.0).abs() < 0.001);
        assert_eq!(&grown.as_bytes()[2..4], &[0x00, 0x05]);

        assert_eq!(series.count(), 4);
        assert_eq!(series.as_bytes(), &before);
    }

    #[test]
    fn test_add_out_of_order() {
        let series = create_compact()
            .add(Value::new(0, 7.0))
            .unwrap()
            .add(Value::new(3, 8.0))
            .unwrap();
        let timestamps: Vec<_> = series.iter().map(|v| v.timestamp).collect();
        assert_eq!(timestamps, vec![0, 1, 2, 3, 3, 4]);
        assert_eq!(series.get(4).unwrap().value, 8.0);
    }

    #[test]
    fn test_add_to_empty_rebases() {
        let empty = CompactSeries::from_values("test", &[]).unwrap();
        let series = empty.add(Value::new(1_700_000_000_000, 3.0)).unwrap();
        assert_eq!(series.base(), 1_700_000_000_000);
        assert_eq!(series.first(), Some(Value::new(1_700_000_000_000, 3.0)));
    }

    #[test]
    fn test_round_trip_through_bytes() {
        let values: Vec<Value> = (0..100)
            .map(|i| Value::new(1_700_000_000_000 + i * 10_000, i as f32 * 0.5))
            .collect();
        let series = CompactSeries::from_values("test", &values).unwrap();
        let decoded = CompactSeries::from_bytes("copy", series.as_bytes().clone(), series.base()).unwrap();
        assert_eq!(decoded.values(), values);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let series = CompactSeries::from_values("test", &[Value::new(3, 3.0), Value::new(1, 1.0)]).unwrap();
        assert_eq!(series.first().unwrap().timestamp, 1);
    }

    #[test]
    fn test_from_bytes_validation() {
        let valid = create_compact().as_bytes().clone();

        let mut bad_signature = valid.to_vec();
        bad_signature[0] = 0x00;
        assert!(matches!(
            CompactSeries::from_bytes("t", bad_signature, 0),
            Err(SeriesError::InvalidFormat(_))
        ));

        let truncated = valid[..valid.len() - 3].to_vec();
        assert!(CompactSeries::from_bytes("t", truncated, 0).is_err());

        let mut wrong_count = valid.to_vec();
        wrong_count[3] = 9;
        assert!(CompactSeries::from_bytes("t", wrong_count, 0).is_err());

        assert!(CompactSeries::from_bytes("t", vec![0xA3], 0).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_overflowing_base() {
        let mut data = vec![0xA3, 0x98, 0x00, 0x01];
        data.extend_from_slice(&1i32.to_be_bytes());
        data.extend_from_slice(&1.0f32.to_be_bytes());
        assert!(matches!(
            CompactSeries::from_bytes("t", data.clone(), i64::MAX),
            Err(SeriesError::InvalidFormat(_))
        ));

        let mut before_max = vec![0xA3, 0x98, 0x00, 0x01];
        before_max.extend_from_slice(&(-5i32).to_be_bytes());
        before_max.extend_from_slice(&1.0f32.to_be_bytes());
        let series = CompactSeries::from_bytes("t", before_max, i64::MAX).unwrap();
        assert_eq!(series.first().unwrap().timestamp, i64::MAX - 5);
    }

    #[test]
    fn test_offset_out_of_range() {
        let result = CompactSeries::from_values(
            "test",
            &[Value::new(0, 1.0), Value::new(i32::MAX as i64 + 1, 2.0)],
        );
        assert!(matches!(result, Err(SeriesError::InvalidArgument(_))));
    }

    #[test]
    fn test_compact_is_identity() {
        let series = create_compact();
        let again = series.compact().unwrap();
        assert_eq!(again.as_bytes(), series.as_bytes());
        assert_eq!(again.count(), 4);
    }
}
