//! Row value format
//!
//! Value format: `[field_count:u16][field...]`
//! Each field: `[name_len:u16][name][value_len:u32][value]`, little endian,
//! fields in ascending name order.

use super::Row;
use crate::config::{prop, Properties};
use crate::error::DatastoreError;
use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct RowCodec {
    max_field_count: Option<usize>,
    max_field_size: Option<usize>,
}

impl RowCodec {
    pub fn new(props: &Properties) -> Result<Self> {
        Ok(Self {
            max_field_count: props.get_optional_usize(prop::CODEC_MAX_FIELD_COUNT)?,
            max_field_size: props.get_optional_usize(prop::CODEC_MAX_FIELD_SIZE)?,
        })
    }

    /// Appends the encoding of `fields` to `buf` and returns it.
    pub fn encode(&self, mut buf: Vec<u8>, fields: &Row) -> Result<Vec<u8>> {
        self.encode_into(&mut buf, fields)?;
        Ok(buf)
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>, fields: &Row) -> Result<()> {
        let max_fields = self
            .max_field_count
            .unwrap_or(usize::MAX)
            .min(u16::MAX as usize);
        if fields.len() > max_fields {
            return Err(DatastoreError::Encode(format!(
                "{} fields exceeds limit of {}",
                fields.len(),
                max_fields
            )));
        }

        let size: usize = fields.iter().map(|(k, v)| 6 + k.len() + v.len()).sum();
        buf.reserve(2 + size);
        buf.extend_from_slice(&(fields.len() as u16).to_le_bytes());

        for (name, value) in fields {
            let name_len = u16::try_from(name.len()).map_err(|_| {
                DatastoreError::Encode(format!("field name of {} bytes is too long", name.len()))
            })?;
            let max_size = self.max_field_size.unwrap_or(u32::MAX as usize);
            let value_len = u32::try_from(value.len())
                .ok()
                .filter(|len| *len as usize <= max_size)
                .ok_or_else(|| {
                    DatastoreError::Encode(format!(
                        "field {:?} of {} bytes exceeds limit of {}",
                        name,
                        value.len(),
                        max_size
                    ))
                })?;

            buf.extend_from_slice(&name_len.to_le_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&value_len.to_le_bytes());
            buf.extend_from_slice(value);
        }
        Ok(())
    }

    /// Decodes a row, keeping only `fields` when given and non-empty.
    /// Requested names missing from the row are left out of the result.
    pub fn decode(&self, value: &[u8], fields: Option<&[String]>) -> Result<Row> {
        let wanted = fields.filter(|f| !f.is_empty());
        let mut reader = Reader { buf: value, pos: 0 };

        let count = u16::from_le_bytes(reader.take_array()?);
        let mut row = Row::new();
        for _ in 0..count {
            let name_len = u16::from_le_bytes(reader.take_array()?) as usize;
            let name = std::str::from_utf8(reader.take(name_len)?)
                .map_err(|_| DatastoreError::Decode("field name is not utf-8".to_string()))?;
            let value_len = u32::from_le_bytes(reader.take_array()?) as usize;
            let field_value = reader.take(value_len)?;

            if wanted.map_or(true, |w| w.iter().any(|f| f == name)) {
                row.insert(name.to_string(), field_value.to_vec());
            }
        }

        if reader.pos != value.len() {
            return Err(DatastoreError::Decode(format!(
                "{} trailing bytes",
                value.len() - reader.pos
            )));
        }
        Ok(row)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                DatastoreError::Decode(format!(
                    "truncated row: need {} bytes at offset {}, have {}",
                    len,
                    self.pos,
                    self.buf.len() - self.pos
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn row(fields: &[(&str, &str)]) -> Row {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    fn random_row(rng: &mut impl Rng) -> Row {
        (0..rng.gen_range(0..12))
            .map(|i| {
                let len = rng.gen_range(0..64);
                let value: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                (format!("field{}", i), value)
            })
            .collect()
    }

    #[test]
    fn round_trip() {
        let codec = RowCodec::default();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let fields = random_row(&mut rng);
            let encoded = codec.encode(Vec::new(), &fields).unwrap();
            assert_eq!(codec.decode(&encoded, None).unwrap(), fields);
            assert_eq!(codec.decode(&encoded, Some(&[][..])).unwrap(), fields);
        }
    }

    #[test]
    fn encode_is_byte_stable() {
        let codec = RowCodec::default();
        let a = row(&[("b", "2"), ("a", "1")]);
        let b = row(&[("a", "1"), ("b", "2")]);
        assert_eq!(
            codec.encode(Vec::new(), &a).unwrap(),
            codec.encode(Vec::new(), &b).unwrap()
        );
        assert_eq!(
            codec.encode(Vec::new(), &a).unwrap(),
            vec![2, 0, 1, 0, b'a', 1, 0, 0, 0, b'1', 1, 0, b'b', 1, 0, 0, 0, b'2']
        );
    }

    #[test]
    fn encode_appends_to_buffer() {
        let codec = RowCodec::default();
        let encoded = codec.encode(b"xy".to_vec(), &row(&[])).unwrap();
        assert_eq!(encoded, vec![b'x', b'y', 0, 0]);
    }

    #[test]
    fn projection_skips_unknown_fields() {
        let codec = RowCodec::default();
        let fields = row(&[("field0", "a"), ("field1", ""), ("field2", "ccc")]);
        let encoded = codec.encode(Vec::new(), &fields).unwrap();

        let wanted = vec!["field2".to_string(), "nope".to_string(), "field1".to_string()];
        let projected = codec.decode(&encoded, Some(wanted.as_slice())).unwrap();
        assert_eq!(projected, row(&[("field1", ""), ("field2", "ccc")]));
    }

    #[test]
    fn malformed_buffers_fail() {
        let codec = RowCodec::default();
        let encoded = codec.encode(Vec::new(), &row(&[("f", "value")])).unwrap();

        for cut in 0..encoded.len() {
            assert!(matches!(
                codec.decode(&encoded[..cut], None),
                Err(DatastoreError::Decode(_))
            ));
        }

        let mut trailing = encoded.clone();
        trailing.push(0);
        assert!(matches!(
            codec.decode(&trailing, None),
            Err(DatastoreError::Decode(_))
        ));

        let bad_name = vec![1, 0, 1, 0, 0xff, 0, 0, 0, 0];
        assert!(matches!(
            codec.decode(&bad_name, None),
            Err(DatastoreError::Decode(_))
        ));
    }

    #[test]
    fn configured_limits() {
        let props: Properties = [
            (prop::CODEC_MAX_FIELD_COUNT, "2"),
            (prop::CODEC_MAX_FIELD_SIZE, "4"),
        ]
        .into_iter()
        .collect();
        let codec = RowCodec::new(&props).unwrap();

        assert!(codec.encode(Vec::new(), &row(&[("a", "1234"), ("b", "")])).is_ok());
        assert!(matches!(
            codec.encode(Vec::new(), &row(&[("a", "12345")])),
            Err(DatastoreError::Encode(_))
        ));
        assert!(matches!(
            codec.encode(Vec::new(), &row(&[("a", ""), ("b", ""), ("c", "")])),
            Err(DatastoreError::Encode(_))
        ));
    }
}
