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

// Derived:
// https://github.com/apache/kafka/blob/trunk/core/src/main/resources/common/message/GroupMetadataKey.json
// https://github.com/apache/kafka/blob/trunk/core/src/main/resources/common/message/GroupMetadataValue.json

use std::io::Read;

use crate::primitive::*;
use crate::CodecError;

/// The key version tag that marks a group metadata record. Lower versions
/// tag offset commit records, which this codec does not serve.
pub const GROUP_KEY_VERSION: i16 = 2;

/// The value schema version written for new records. Reads accept 0..=3.
pub const CURRENT_GROUP_VALUE_SCHEMA_VERSION: i16 = 3;

/// The persisted shape of one consumer group: membership plus the protocol
/// the group agreed on. The group's committed offsets travel in separate
/// records and are not part of this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadataValue {
    pub protocol_type: String,
    pub generation: i32,
    pub protocol: Option<String>,
    pub leader: Option<String>,
    pub current_state_timestamp: i64,
    pub members: Vec<MemberMetadataValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberMetadataValue {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub client_id: String,
    pub client_host: String,
    pub rebalance_timeout_ms: i32,
    pub session_timeout_ms: i32,
    pub subscription: Vec<u8>,
    pub assignment: Vec<u8>,
}

pub fn encode_group_key(group_id: &str) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![];
    write_i16(&mut out, GROUP_KEY_VERSION)?;
    write_string(&mut out, group_id, "group")?;
    Ok(out)
}

/// Decodes a group record key, demanding the group metadata kind.
pub fn decode_group_key(mut buf: &[u8]) -> Result<String, CodecError> {
    let version = read_i16(&mut buf, "key version")?;
    if version != GROUP_KEY_VERSION {
        return Err(CodecError::UnsupportedVersion {
            schema: "group key",
            version,
        });
    }
    read_string(&mut buf, "group")
}

pub fn encode_group_value(value: &GroupMetadataValue) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![];
    write_i16(&mut out, CURRENT_GROUP_VALUE_SCHEMA_VERSION)?;
    write_string(&mut out, &value.protocol_type, "protocol_type")?;
    write_i32(&mut out, value.generation)?;
    write_nullable_string(&mut out, value.protocol.as_deref(), "protocol")?;
    write_nullable_string(&mut out, value.leader.as_deref(), "leader")?;
    write_i64(&mut out, value.current_state_timestamp)?;
    let len = i32::try_from(value.members.len())
        .map_err(|_| crate::err_malformed("member count overflows i32"))?;
    write_i32(&mut out, len)?;
    for member in &value.members {
        write_string(&mut out, &member.member_id, "member_id")?;
        write_nullable_string(&mut out, member.group_instance_id.as_deref(), "group_instance_id")?;
        write_string(&mut out, &member.client_id, "client_id")?;
        write_string(&mut out, &member.client_host, "client_host")?;
        write_i32(&mut out, member.rebalance_timeout_ms)?;
        write_i32(&mut out, member.session_timeout_ms)?;
        write_bytes(&mut out, &member.subscription, "subscription")?;
        write_bytes(&mut out, &member.assignment, "assignment")?;
    }
    Ok(out)
}

/// Decodes a group record value. An empty buffer is a tombstone and decodes
/// to `None`.
pub fn decode_group_value(buf: &[u8]) -> Result<Option<GroupMetadataValue>, CodecError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut buf = buf;
    let version = read_i16(&mut buf, "value version")?;
    if !(0..=CURRENT_GROUP_VALUE_SCHEMA_VERSION).contains(&version) {
        return Err(CodecError::UnsupportedVersion {
            schema: "group value",
            version,
        });
    }

    let protocol_type = read_string(&mut buf, "protocol_type")?;
    let generation = read_i32(&mut buf, "generation")?;
    let protocol = read_nullable_string(&mut buf, "protocol")?;
    let leader = read_nullable_string(&mut buf, "leader")?;
    let current_state_timestamp = if version >= 2 {
        read_i64(&mut buf, "current_state_timestamp")?
    } else {
        -1
    };

    let member_count = read_i32(&mut buf, "member count")?;
    if member_count < 0 {
        return Err(crate::err_malformed("negative member count"));
    }
    let mut members = Vec::with_capacity(member_count as usize);
    for _ in 0..member_count {
        members.push(decode_member(&mut buf, version)?);
    }

    Ok(Some(GroupMetadataValue {
        protocol_type,
        generation,
        protocol,
        leader,
        current_state_timestamp,
        members,
    }))
}

fn decode_member(buf: &mut impl Read, version: i16) -> Result<MemberMetadataValue, CodecError> {
    let member_id = read_string(buf, "member_id")?;
    let group_instance_id = if version >= 3 {
        read_nullable_string(buf, "group_instance_id")?
    } else {
        None
    };
    let client_id = read_string(buf, "client_id")?;
    let client_host = read_string(buf, "client_host")?;
    let rebalance_timeout_ms = if version >= 1 {
        read_i32(buf, "rebalance_timeout_ms")?
    } else {
        0
    };
    let session_timeout_ms = read_i32(buf, "session_timeout_ms")?;
    let subscription = read_bytes(buf, "subscription")?;
    let assignment = read_bytes(buf, "assignment")?;
    Ok(MemberMetadataValue {
        member_id,
        group_instance_id,
        client_id,
        client_host,
        rebalance_timeout_ms,
        session_timeout_ms,
        subscription,
        assignment,
    })
}
