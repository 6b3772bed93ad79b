//! The process-wide directory of live connections, grouped by `GroupKey`.

use crate::events::NotificationEvent;
use crate::ws::types::{ConnectionHandle, ConnectionId, GroupKey, Outbox};
use dashmap::DashMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps each group to the outboxes of the connections currently in it.
///
/// `join`, `leave` and `broadcast` take the write lock of the `DashMap` shard
/// holding the group, and only for in-memory work: `broadcast` pushes onto
/// each member's unbounded outbox and never waits on a client. Broadcasts to
/// one group are therefore serialized and each member sees them in order.
/// Groups that hash to the same shard also serialize with each other.
///
/// A slow client only lets its outbox grow; the session's write timeout is
/// what gives up on it. A member whose outbox is closed (its session ended)
/// is evicted during the broadcast that notices it. Groups are removed once
/// their last member leaves.
#[derive(Default)]
pub struct ConnectionRegistry {
    groups: DashMap<GroupKey, HashMap<ConnectionId, Outbox>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under `group`. Registering the same connection
    /// id twice keeps the first handle and returns `false`.
    pub fn join(&self, group: GroupKey, handle: ConnectionHandle) -> bool {
        let mut members = self.groups.entry(group.clone()).or_default();
        match members.entry(handle.id) {
            Entry::Occupied(_) => {
                debug!(%group, conn_id = %handle.id, "Connection already joined group");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(handle.outbox);
                debug!(%group, conn_id = %handle.id, members = members.len(), "Connection joined group");
                true
            }
        }
    }

    /// Removes a connection from `group`. Unknown groups and connections are
    /// a no-op. Returns whether anything was removed.
    pub fn leave(&self, group: &GroupKey, conn_id: ConnectionId) -> bool {
        let removed = match self.groups.get_mut(group) {
            Some(mut members) => members.remove(&conn_id).is_some(),
            None => false,
        };
        if removed {
            self.groups.remove_if(group, |_, members| members.is_empty());
            debug!(%group, %conn_id, "Connection left group");
        }
        removed
    }

    /// Queues `event` for every connection currently in `group` and returns
    /// how many accepted it. An empty or unknown group is zero recipients.
    pub fn broadcast(&self, group: &GroupKey, event: NotificationEvent) -> usize {
        let event = Arc::new(event);

        let (delivered, evicted) = {
            let Some(mut members) = self.groups.get_mut(group) else {
                debug!(%group, kind = event.kind(), "No live connections in group");
                return 0;
            };

            let mut evicted = Vec::new();
            for (conn_id, outbox) in members.iter() {
                if outbox.send(Arc::clone(&event)).is_err() {
                    warn!(%group, %conn_id, "Outbox closed, evicting dead connection");
                    evicted.push(*conn_id);
                }
            }
            for conn_id in &evicted {
                members.remove(conn_id);
            }
            (members.len(), evicted.len())
        };

        if evicted > 0 {
            self.groups.remove_if(group, |_, members| members.is_empty());
        }

        debug!(
            %group,
            kind = event.kind(),
            request_id = event.request_id(),
            delivered,
            evicted,
            "Broadcast event to group"
        );
        delivered
    }

    /// Snapshot of the connection ids currently in `group`.
    pub fn members(&self, group: &GroupKey) -> Vec<ConnectionId> {
        self.groups
            .get(group)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, group: &GroupKey) -> usize {
        self.groups.get(group).map(|m| m.len()).unwrap_or(0)
    }

    pub fn contains(&self, group: &GroupKey, conn_id: ConnectionId) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.contains_key(&conn_id))
    }

    /// Number of groups with at least one member.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn connection_count(&self) -> usize {
        self.groups.iter().map(|entry| entry.value().len()).sum()
    }

    /// Drops every membership. Each affected session sees its outbox close
    /// and shuts down. Returns the number of connections released.
    pub fn clear(&self) -> usize {
        let released = self.connection_count();
        self.groups.clear();
        released
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("groups_count", &self.group_count())
            .field("connections_count", &self.connection_count())
            .finish()
    }
}
