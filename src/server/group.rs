//! Fixed-size session groups.
//!
//! Sessions join an open group as they log in. Once the open group holds
//! `size` members it is formed and a new open group starts.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;

use crate::session::SessionId;

/// Identifier of a formed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl GroupId {
    /// Raw value.
    pub const fn to_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Sessions grouped by login order.
#[derive(Debug)]
pub struct SessionGroups {
    size: NonZeroUsize,
    open: Vec<SessionId>,
    groups: HashMap<GroupId, Vec<SessionId>>,
    by_session: HashMap<SessionId, GroupId>,
    next_id: u64,
}

impl SessionGroups {
    /// Groups of `size` sessions each.
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            size,
            open: Vec::with_capacity(size.get()),
            groups: HashMap::new(),
            by_session: HashMap::new(),
            next_id: 1,
        }
    }

    /// Members per group.
    pub fn size(&self) -> NonZeroUsize {
        self.size
    }

    /// Add a session to the open group.
    ///
    /// Returns the group and its members when this session completed it.
    /// A session that already belongs somewhere is left alone.
    pub fn join(&mut self, session: SessionId) -> Option<(GroupId, Vec<SessionId>)> {
        if self.by_session.contains_key(&session) || self.open.contains(&session) {
            return None;
        }
        self.open.push(session);
        if self.open.len() < self.size.get() {
            return None;
        }

        let group_id = GroupId(self.next_id);
        self.next_id += 1;
        let members = std::mem::replace(&mut self.open, Vec::with_capacity(self.size.get()));
        for member in &members {
            self.by_session.insert(*member, group_id);
        }
        self.groups.insert(group_id, members.clone());
        Some((group_id, members))
    }

    /// Remove a session. An emptied group is dropped.
    pub fn leave(&mut self, session: SessionId) {
        self.open.retain(|member| *member != session);
        let Some(group_id) = self.by_session.remove(&session) else {
            return;
        };
        if let Some(members) = self.groups.get_mut(&group_id) {
            members.retain(|member| *member != session);
            if members.is_empty() {
                self.groups.remove(&group_id);
            }
        }
    }

    /// Group a session belongs to, once formed.
    pub fn group_of(&self, session: SessionId) -> Option<GroupId> {
        self.by_session.get(&session).copied()
    }

    /// Current members of a formed group.
    pub fn members(&self, group_id: GroupId) -> Option<&[SessionId]> {
        self.groups.get(&group_id).map(Vec::as_slice)
    }

    /// Sessions still waiting for their group to fill.
    pub fn waiting(&self) -> &[SessionId] {
        &self.open
    }

    /// Number of formed groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no group has formed.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(size: usize) -> SessionGroups {
        SessionGroups::new(NonZeroUsize::new(size).unwrap())
    }

    fn id(value: u64) -> SessionId {
        SessionId::new(value)
    }

    #[test]
    fn test_group_forms_when_full() {
        let mut groups = groups(3);
        assert_eq!(groups.join(id(1)), None);
        assert_eq!(groups.join(id(2)), None);
        assert_eq!(groups.waiting(), &[id(1), id(2)]);
        assert_eq!(groups.group_of(id(1)), None);

        let (group_id, members) = groups.join(id(3)).unwrap();
        assert_eq!(members, vec![id(1), id(2), id(3)]);
        assert_eq!(groups.members(group_id).unwrap(), &[id(1), id(2), id(3)]);
        for session in [1, 2, 3] {
            assert_eq!(groups.group_of(id(session)), Some(group_id));
        }
        assert!(groups.waiting().is_empty());

        // The next logins start a new group.
        assert_eq!(groups.join(id(4)), None);
        assert_eq!(groups.join(id(5)), None);
        let (second, _) = groups.join(id(6)).unwrap();
        assert_ne!(second, group_id);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_join_twice_is_ignored() {
        let mut groups = groups(2);
        assert_eq!(groups.join(id(1)), None);
        assert_eq!(groups.join(id(1)), None);
        assert_eq!(groups.waiting(), &[id(1)]);
    }

    #[test]
    fn test_leave_shrinks_and_drops_groups() {
        let mut groups = groups(2);
        groups.join(id(1));
        let (group_id, _) = groups.join(id(2)).unwrap();
        groups.join(id(3));

        groups.leave(id(3));
        assert!(groups.waiting().is_empty());

        groups.leave(id(1));
        assert_eq!(groups.group_of(id(1)), None);
        assert_eq!(groups.members(group_id).unwrap(), &[id(2)]);

        groups.leave(id(2));
        assert_eq!(groups.members(group_id), None);
        assert!(groups.is_empty());
    }
}
