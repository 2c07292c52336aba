//! # Token Resolver Map
//!
//! Resolves key identifier clauses to tokens known to one message.
//! The receive engine keeps two maps: the universal map (every token the
//! header introduced) and the primary map (tokens allowed to key the
//! primary signature).

use std::sync::Arc;

use wss_types::{KeyIdentifierClause, SecurityToken};

use crate::ports::outbound::TokenResolver;

#[derive(Default, Clone)]
pub struct TokenResolverMap {
    tokens: Vec<Arc<SecurityToken>>,
    fallback: Option<Arc<dyn TokenResolver>>,
}

impl std::fmt::Debug for TokenResolverMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResolverMap")
            .field("tokens", &self.tokens.iter().map(|t| t.id.as_str()).collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl TokenResolverMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clauses the map cannot satisfy are handed to `fallback`.
    pub fn with_fallback(fallback: Arc<dyn TokenResolver>) -> Self {
        Self {
            tokens: Vec::new(),
            fallback: Some(fallback),
        }
    }

    pub fn add(&mut self, token: Arc<SecurityToken>) {
        if !self.contains(&token) {
            self.tokens.push(token);
        }
    }

    pub fn contains(&self, token: &Arc<SecurityToken>) -> bool {
        self.tokens.iter().any(|t| Arc::ptr_eq(t, token))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Most recently added match wins, then the fallback resolver.
    pub fn resolve(&self, clause: &KeyIdentifierClause) -> Option<Arc<SecurityToken>> {
        self.tokens
            .iter()
            .rev()
            .find(|t| t.matches_clause(clause))
            .cloned()
            .or_else(|| self.fallback.as_ref().and_then(|f| f.resolve(clause)))
    }
}
