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

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

use corax_codec::GroupMetadataValue;
use corax_codec::MemberMetadataValue;

use crate::TopicPartition;

/// The externally observable states of a consumer group. The rebalance
/// protocol that drives transitions between them lives above this crate;
/// the cache only stores and rehydrates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Empty,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberMetadata {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub client_id: String,
    pub client_host: String,
    pub rebalance_timeout_ms: i32,
    pub session_timeout_ms: i32,
    pub subscription: Vec<u8>,
    pub assignment: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetAndMetadata {
    pub offset: i64,
    pub metadata: String,
    pub commit_timestamp: i64,
}

/// One consumer group's coordinator state.
///
/// All mutation goes through [`Group::in_lock`]; the entry lock is the
/// innermost lock of the manager's hierarchy. Members are keyed by id, and
/// anything that needs a member reaches it through the group, so there are
/// no back-pointers to keep alive.
#[derive(Debug)]
pub struct Group {
    group_id: String,
    inner: Mutex<GroupInner>,
}

#[derive(Debug)]
pub struct GroupInner {
    pub state: GroupState,
    pub generation_id: i32,
    pub protocol_type: Option<String>,
    pub protocol: Option<String>,
    pub leader_id: Option<String>,
    pub current_state_timestamp: i64,
    pub members: BTreeMap<String, MemberMetadata>,
    pub offsets: BTreeMap<TopicPartition, OffsetAndMetadata>,
    /// Producers with an open transactional offset commit against this
    /// group, by producer id.
    pub pending_transactional_producers: BTreeSet<i64>,
}

impl Group {
    pub fn new(group_id: impl Into<String>, state: GroupState) -> Self {
        Group {
            group_id: group_id.into(),
            inner: Mutex::new(GroupInner {
                state,
                generation_id: 0,
                protocol_type: None,
                protocol: None,
                leader_id: None,
                current_state_timestamp: -1,
                members: BTreeMap::new(),
                offsets: BTreeMap::new(),
                pending_transactional_producers: BTreeSet::new(),
            }),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Runs `f` under the group's own lock.
    pub fn in_lock<T>(&self, f: impl FnOnce(&mut GroupInner) -> T) -> T {
        let mut inner = self.inner.lock().expect("group lock poisoned");
        f(&mut inner)
    }

    pub fn state(&self) -> GroupState {
        self.in_lock(|group| group.state)
    }

    pub fn is_dead(&self) -> bool {
        self.state() == GroupState::Dead
    }

    pub fn generation_id(&self) -> i32 {
        self.in_lock(|group| group.generation_id)
    }

    /// Rebuilds a group from its durable record. The record does not carry
    /// the state machine's state: a group with members rehydrates as
    /// `Stable`, a memberless one as `Empty`.
    pub(crate) fn from_value(group_id: String, value: GroupMetadataValue) -> Group {
        let state = if value.members.is_empty() {
            GroupState::Empty
        } else {
            GroupState::Stable
        };
        let members = value
            .members
            .into_iter()
            .map(|member| {
                (member.member_id.clone(), MemberMetadata {
                    member_id: member.member_id,
                    group_instance_id: member.group_instance_id,
                    client_id: member.client_id,
                    client_host: member.client_host,
                    rebalance_timeout_ms: member.rebalance_timeout_ms,
                    session_timeout_ms: member.session_timeout_ms,
                    subscription: member.subscription,
                    assignment: member.assignment,
                })
            })
            .collect();
        Group {
            group_id,
            inner: Mutex::new(GroupInner {
                state,
                generation_id: value.generation,
                protocol_type: if value.protocol_type.is_empty() {
                    None
                } else {
                    Some(value.protocol_type)
                },
                protocol: value.protocol,
                leader_id: value.leader,
                current_state_timestamp: value.current_state_timestamp,
                members: BTreeMap::new(),
                offsets: BTreeMap::new(),
                pending_transactional_producers: BTreeSet::new(),
            }),
        }
        .with_members(members)
    }

    fn with_members(self, members: BTreeMap<String, MemberMetadata>) -> Self {
        self.in_lock(|group| group.members = members);
        self
    }

    /// Snapshots the group into its durable record shape, with the member
    /// assignments overridden by `assignments` where supplied.
    pub(crate) fn to_value(&self, assignments: &BTreeMap<String, Vec<u8>>) -> GroupMetadataValue {
        self.in_lock(|group| GroupMetadataValue {
            protocol_type: group.protocol_type.clone().unwrap_or_default(),
            generation: group.generation_id,
            protocol: group.protocol.clone(),
            leader: group.leader_id.clone(),
            current_state_timestamp: group.current_state_timestamp,
            members: group
                .members
                .values()
                .map(|member| MemberMetadataValue {
                    member_id: member.member_id.clone(),
                    group_instance_id: member.group_instance_id.clone(),
                    client_id: member.client_id.clone(),
                    client_host: member.client_host.clone(),
                    rebalance_timeout_ms: member.rebalance_timeout_ms,
                    session_timeout_ms: member.session_timeout_ms,
                    subscription: member.subscription.clone(),
                    assignment: assignments
                        .get(&member.member_id)
                        .cloned()
                        .unwrap_or_else(|| member.assignment.clone()),
                })
                .collect(),
        })
    }

    /// Applies freshly persisted member assignments in place.
    pub(crate) fn apply_assignments(&self, assignments: &BTreeMap<String, Vec<u8>>) {
        self.in_lock(|group| {
            for member in group.members.values_mut() {
                if let Some(assignment) = assignments.get(&member.member_id) {
                    member.assignment = assignment.clone();
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(member_id: &str) -> MemberMetadata {
        MemberMetadata {
            member_id: member_id.to_string(),
            group_instance_id: None,
            client_id: "client".to_string(),
            client_host: "/10.0.0.1".to_string(),
            rebalance_timeout_ms: 60_000,
            session_timeout_ms: 30_000,
            subscription: vec![1],
            assignment: vec![],
        }
    }

    #[test]
    fn test_round_trip_through_value() {
        let group = Group::new("g1", GroupState::Stable);
        group.in_lock(|inner| {
            inner.generation_id = 4;
            inner.protocol_type = Some("consumer".to_string());
            inner.protocol = Some("range".to_string());
            inner.leader_id = Some("m1".to_string());
            inner.current_state_timestamp = 42;
            inner.members.insert("m1".to_string(), member("m1"));
        });

        let mut assignments = BTreeMap::new();
        assignments.insert("m1".to_string(), vec![7, 7]);
        let value = group.to_value(&assignments);
        assert_eq!(value.generation, 4);
        assert_eq!(value.members[0].assignment, vec![7, 7]);

        let loaded = Group::from_value("g1".to_string(), value);
        assert_eq!(loaded.state(), GroupState::Stable);
        assert_eq!(loaded.generation_id(), 4);
        loaded.in_lock(|inner| {
            assert_eq!(inner.members["m1"].assignment, vec![7, 7]);
            assert_eq!(inner.leader_id.as_deref(), Some("m1"));
        });
    }

    #[test]
    fn test_memberless_group_rehydrates_empty() {
        let value = Group::new("g2", GroupState::Empty).to_value(&BTreeMap::new());
        let loaded = Group::from_value("g2".to_string(), value);
        assert_eq!(loaded.state(), GroupState::Empty);
    }

    #[test]
    fn test_apply_assignments() {
        let group = Group::new("g3", GroupState::CompletingRebalance);
        group.in_lock(|inner| {
            inner.members.insert("m1".to_string(), member("m1"));
            inner.members.insert("m2".to_string(), member("m2"));
        });

        let mut assignments = BTreeMap::new();
        assignments.insert("m2".to_string(), vec![9]);
        group.apply_assignments(&assignments);
        group.in_lock(|inner| {
            assert_eq!(inner.members["m1"].assignment, Vec::<u8>::new());
            assert_eq!(inner.members["m2"].assignment, vec![9]);
        });
    }
}
