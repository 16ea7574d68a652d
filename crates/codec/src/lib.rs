// Copyright 2025 the Corax Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte codecs for the two record families the coordinator persists on its
//! metadata log partitions: consumer group records and transaction state
//! records.
//!
//! Both families are `(key, value)` byte pairs. The key starts with an
//! `i16` version tag that doubles as the record kind; an absent or empty
//! value is a tombstone for the keyed id. Layouts are big-endian and match
//! the upstream Kafka internal schemas so that tooling which understands
//! `__consumer_offsets` and the transaction log keeps working.

use std::io;

mod group;
mod txn;

pub use group::*;
pub use txn::*;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("unsupported {schema} version: {version}")]
    UnsupportedVersion { schema: &'static str, version: i16 },
}

pub(crate) fn err_malformed(message: impl std::fmt::Display) -> CodecError {
    CodecError::Malformed(message.to_string())
}

pub(crate) fn err_truncated(field: &str) -> impl FnOnce(io::Error) -> CodecError + '_ {
    move |err| CodecError::Malformed(format!("failed to read {field}: {err}"))
}

mod primitive {
    use std::io;
    use std::io::Read;

    use byteorder::BigEndian;
    use byteorder::ReadBytesExt;
    use byteorder::WriteBytesExt;

    use crate::err_malformed;
    use crate::err_truncated;
    use crate::CodecError;

    pub(crate) fn read_i8(buf: &mut impl Read, field: &str) -> Result<i8, CodecError> {
        buf.read_i8().map_err(err_truncated(field))
    }

    pub(crate) fn read_i16(buf: &mut impl Read, field: &str) -> Result<i16, CodecError> {
        buf.read_i16::<BigEndian>().map_err(err_truncated(field))
    }

    pub(crate) fn read_i32(buf: &mut impl Read, field: &str) -> Result<i32, CodecError> {
        buf.read_i32::<BigEndian>().map_err(err_truncated(field))
    }

    pub(crate) fn read_i64(buf: &mut impl Read, field: &str) -> Result<i64, CodecError> {
        buf.read_i64::<BigEndian>().map_err(err_truncated(field))
    }

    pub(crate) fn read_nullable_string(
        buf: &mut impl Read,
        field: &str,
    ) -> Result<Option<String>, CodecError> {
        let len = read_i16(buf, field)?;
        if len < 0 {
            return Ok(None);
        }
        let mut bytes = vec![0u8; len as usize];
        buf.read_exact(&mut bytes).map_err(err_truncated(field))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|err| err_malformed(format!("field {field} is not utf8: {err}")))
    }

    pub(crate) fn read_string(buf: &mut impl Read, field: &str) -> Result<String, CodecError> {
        read_nullable_string(buf, field)?
            .ok_or_else(|| err_malformed(format!("non-nullable field {field} was null")))
    }

    pub(crate) fn read_bytes(buf: &mut impl Read, field: &str) -> Result<Vec<u8>, CodecError> {
        let len = read_i32(buf, field)?;
        if len < 0 {
            return Err(err_malformed(format!(
                "non-nullable field {field} was null"
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        buf.read_exact(&mut bytes).map_err(err_truncated(field))?;
        Ok(bytes)
    }

    pub(crate) fn write_err(err: io::Error) -> CodecError {
        err_malformed(format!("failed to write record: {err}"))
    }

    pub(crate) fn write_i8(out: &mut Vec<u8>, value: i8) -> Result<(), CodecError> {
        out.write_i8(value).map_err(write_err)
    }

    pub(crate) fn write_i16(out: &mut Vec<u8>, value: i16) -> Result<(), CodecError> {
        out.write_i16::<BigEndian>(value).map_err(write_err)
    }

    pub(crate) fn write_i32(out: &mut Vec<u8>, value: i32) -> Result<(), CodecError> {
        out.write_i32::<BigEndian>(value).map_err(write_err)
    }

    pub(crate) fn write_i64(out: &mut Vec<u8>, value: i64) -> Result<(), CodecError> {
        out.write_i64::<BigEndian>(value).map_err(write_err)
    }

    pub(crate) fn write_nullable_string(
        out: &mut Vec<u8>,
        value: Option<&str>,
        field: &str,
    ) -> Result<(), CodecError> {
        match value {
            None => write_i16(out, -1),
            Some(value) => {
                let len = i16::try_from(value.len())
                    .map_err(|_| err_malformed(format!("field {field} overflows i16 length")))?;
                write_i16(out, len)?;
                out.extend_from_slice(value.as_bytes());
                Ok(())
            }
        }
    }

    pub(crate) fn write_string(
        out: &mut Vec<u8>,
        value: &str,
        field: &str,
    ) -> Result<(), CodecError> {
        write_nullable_string(out, Some(value), field)
    }

    pub(crate) fn write_bytes(
        out: &mut Vec<u8>,
        value: &[u8],
        field: &str,
    ) -> Result<(), CodecError> {
        let len = i32::try_from(value.len())
            .map_err(|_| err_malformed(format!("field {field} overflows i32 length")))?;
        write_i32(out, len)?;
        out.extend_from_slice(value);
        Ok(())
    }
}
