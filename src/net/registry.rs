//! Token-to-object registry.
//!
//! # Responsibilities
//! - Issue fresh tokens for adapter objects the provider must refer back to
//! - Resolve tokens echoed back by the provider
//! - Treat unknown tokens as a consistency fault, never as "not found"
//!
//! # Design Decisions
//! - Monotonic counter starting at 1; a token is never reissued
//! - DashMap serializes access per entry, so delivery threads need no extra lock

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AdapterError;
use crate::observability::metrics;
use crate::transport::Token;

/// Maps adapter-issued tokens to owned entries.
#[derive(Debug)]
pub struct HandleRegistry<T> {
    /// Name used in fault reports.
    name: &'static str,
    /// Next token to hand out.
    next: AtomicU64,
    entries: DashMap<Token, T>,
}

impl<T> HandleRegistry<T> {
    /// Create an empty registry. `name` identifies it in fault reports.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    /// Store `entry` under a fresh token.
    pub fn register(&self, entry: T) -> Token {
        let token = Token::new(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(token, entry);
        tracing::trace!(registry = self.name, token = %token, "Registered");
        token
    }

    /// Store an entry built from its own token.
    ///
    /// For objects that must know the token they are registered under.
    pub fn register_with<F>(&self, build: F) -> (Token, T)
    where
        F: FnOnce(Token) -> T,
        T: Clone,
    {
        let token = Token::new(self.next.fetch_add(1, Ordering::Relaxed));
        let entry = build(token);
        self.entries.insert(token, entry.clone());
        tracing::trace!(registry = self.name, token = %token, "Registered");
        (token, entry)
    }

    /// Remove the entry for `token` and hand it back.
    pub fn unregister(&self, token: Token) -> Result<T, AdapterError> {
        match self.entries.remove(&token) {
            Some((_, entry)) => {
                tracing::trace!(registry = self.name, token = %token, "Unregistered");
                Ok(entry)
            }
            None => Err(self.fault(token)),
        }
    }

    /// Remove the entry for `token` if it is still present.
    pub fn discard(&self, token: Token) -> Option<T> {
        self.entries.remove(&token).map(|(_, entry)| entry)
    }

    /// Whether `token` is currently registered.
    pub fn contains(&self, token: Token) -> bool {
        self.entries.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<(Token, T)> {
        let tokens: Vec<Token> = self.entries.iter().map(|e| *e.key()).collect();
        tokens
            .into_iter()
            .filter_map(|token| self.entries.remove(&token))
            .collect()
    }

    fn fault(&self, token: Token) -> AdapterError {
        tracing::error!(registry = self.name, token = %token, "Token not registered");
        metrics::record_consistency_fault(self.name);
        AdapterError::ConsistencyFault {
            registry: self.name,
            token,
        }
    }
}

impl<T: Clone> HandleRegistry<T> {
    /// Resolve `token` to its owner.
    pub fn lookup(&self, token: Token) -> Result<T, AdapterError> {
        match self.entries.get(&token) {
            Some(entry) => Ok(entry.value().clone()),
            None => Err(self.fault(token)),
        }
    }

    /// Resolve `token` where absence is legitimate (teardown paths).
    pub fn find(&self, token: Token) -> Option<T> {
        self.entries.get(&token).map(|entry| entry.value().clone())
    }
}
