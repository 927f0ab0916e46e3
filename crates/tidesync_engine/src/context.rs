//! Effective group context.

use tidesync_protocol::GroupId;

/// The group that captured writes are attributed to.
///
/// A plain value passed through the capture call chain, never shared between
/// threads. Setting pushes, clearing pops, so nested scopes restore the outer
/// group when they end.
#[derive(Debug, Clone, Default)]
pub struct GroupContext {
    stack: Vec<(GroupId, Option<String>)>,
}

impl GroupContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context already scoped to `group`.
    pub fn with_group(group: GroupId) -> Self {
        Self {
            stack: vec![(group, None)],
        }
    }

    /// Hashes `name` and makes it the current group.
    pub fn set_effective_group(&mut self, name: &str) -> GroupId {
        let id = GroupId::from_name(name);
        self.stack.push((id, Some(name.to_string())));
        id
    }

    /// Returns the current group, if any.
    pub fn effective_group(&self) -> Option<GroupId> {
        self.stack.last().map(|(id, _)| *id)
    }

    /// Returns the human-readable name of the current group, if it was set by name.
    pub fn effective_group_name(&self) -> Option<&str> {
        self.stack.last().and_then(|(_, name)| name.as_deref())
    }

    /// Pops the current group. Clearing an empty context is a no-op.
    pub fn clear_effective_group(&mut self) -> Option<GroupId> {
        self.stack.pop().map(|(id, _)| id)
    }

    /// Number of nested scopes.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Runs `f` with `name` as the current group, restoring the previous one after.
    pub fn scoped<T>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        let depth = self.stack.len();
        self.set_effective_group(name);
        let result = f(self);
        self.stack.truncate(depth);
        result
    }
}
