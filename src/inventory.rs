//! C1: the process-wide URI registry (spec.md §4.1).
//!
//! Readers take a lock-free snapshot; no lock is held across the
//! expand-then-submit sequence in the router — delivery failure is the
//! consistency fallback for any race against a concurrent unbind.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::uri::Uri;

#[derive(Debug, Default)]
pub struct Inventory {
    known: RwLock<HashSet<Uri>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: marking an already-known URI is a no-op.
    pub fn record(&self, uri: Uri) {
        self.known.write().expect("inventory lock poisoned").insert(uri);
    }

    /// Idempotent: forgetting an unknown URI is a no-op.
    pub fn forget(&self, uri: &Uri) {
        self.known.write().expect("inventory lock poisoned").remove(uri);
    }

    /// Given a sequence of URI patterns (literal or containing `*`),
    /// return the set of currently recorded URIs matching at least one
    /// pattern. A literal pattern that names no known URI is returned
    /// verbatim — a sender may address a disconnected endpoint and let
    /// delivery fail into redelivery rather than being silently dropped
    /// here.
    pub fn find(&self, patterns: &[String]) -> Vec<String> {
        let known = self.known.read().expect("inventory lock poisoned");
        let mut found = Vec::new();

        for pattern in patterns {
            let is_wildcard = pattern.contains('*');
            let mut matched_any = false;

            for uri in known.iter() {
                if uri.matches_pattern(pattern) {
                    let rendered = uri.to_string();
                    if !found.contains(&rendered) {
                        found.push(rendered);
                    }
                    matched_any = true;
                }
            }

            if !is_wildcard && !matched_any && !found.contains(pattern) {
                found.push(pattern.clone());
            }
        }

        found
    }
}
