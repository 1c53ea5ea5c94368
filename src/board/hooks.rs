//! Keyed registry of move observers.

use super::rules::{MoveRecord, MoveRequest};
use tracing::debug;

/// Observer fired before a legal move mutates the position.
pub type PreHook = dyn FnMut(&MoveRequest) + Send;

/// Observer fired after every move attempt.
///
/// Receives the request and the resolved record, or `None` when the attempt
/// was rejected.
pub type PostHook = dyn FnMut(&MoveRequest, Option<&MoveRecord>) + Send;

/// Identity of a registered hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum HookKey {
    /// Caller-chosen key; registering the same key again replaces the hook.
    #[display("{_0}")]
    Named(String),
    /// Synthetic key handed out for anonymous registrations.
    #[display("#{_0}")]
    Sequence(u64),
}

impl HookKey {
    /// Creates a named key.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl From<&str> for HookKey {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

/// Ordered, keyed collection of hooks.
///
/// Hooks run in registration order. Replacing a hook under an existing key
/// keeps its original slot.
pub struct HookRegistry<F: ?Sized> {
    entries: Vec<(HookKey, Box<F>)>,
    next_sequence: u64,
}

impl<F: ?Sized> HookRegistry<F> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Registers `hook` under `key`, or under a fresh synthetic key.
    pub fn register(&mut self, key: Option<HookKey>, hook: Box<F>) -> HookKey {
        let key = key.unwrap_or_else(|| {
            self.next_sequence += 1;
            HookKey::Sequence(self.next_sequence)
        });

        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => {
                debug!(key = %key, "Replacing hook");
                slot.1 = hook;
            }
            None => {
                debug!(key = %key, "Registering hook");
                self.entries.push((key.clone(), hook));
            }
        }
        key
    }

    /// Removes the hook under `key`. Returns whether one was present.
    pub fn unregister(&mut self, key: &HookKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| existing != key);
        let removed = self.entries.len() != before;
        if !removed {
            debug!(key = %key, "Hook not registered; nothing to remove");
        }
        removed
    }

    /// Whether a hook is registered under `key`.
    pub fn contains(&self, key: &HookKey) -> bool {
        self.entries.iter().any(|(existing, _)| existing == key)
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hooks in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<F>> {
        self.entries.iter_mut().map(|(_, hook)| hook)
    }
}

impl<F: ?Sized> Default for HookRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> std::fmt::Debug for HookRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(key, _)| key))
            .finish()
    }
}
