//! Owned endpoint registry.
//!
//! The registry is the single owner of [`Endpoint`] records. Callers
//! hold only [`EndpointId`]s — nothing outside this struct can keep a
//! record alive past `unregister`. All mutation happens through the
//! relay's serialized router task, so no interior locking is needed.

use std::collections::HashMap;

use crate::endpoint::{Endpoint, EndpointId, EndpointMeta, Role};
use crate::error::FarError;

#[derive(Debug, Default)]
pub struct Registry {
    endpoints: HashMap<EndpointId, Endpoint>,
    /// Registration order, for stable discovery listings.
    order: Vec<EndpointId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a role, with declared metadata.
    ///
    /// Registration is set-once: a second register for a live id fails
    /// with [`FarError::DuplicateRegistration`] regardless of role.
    pub fn register(
        &mut self,
        id: EndpointId,
        role: Role,
        meta: EndpointMeta,
    ) -> Result<EndpointId, FarError> {
        if let Some(existing) = self.endpoints.get(&id) {
            return Err(FarError::DuplicateRegistration {
                id,
                existing: existing.role(),
            });
        }
        self.endpoints.insert(id, Endpoint::new(id, role, meta));
        self.order.push(id);
        Ok(id)
    }

    /// Remove an endpoint. Idempotent; returns the record if one was
    /// present so the caller can react to its role.
    pub fn unregister(&mut self, id: EndpointId) -> Option<Endpoint> {
        let removed = self.endpoints.remove(&id);
        if removed.is_some() {
            self.order.retain(|&e| e != id);
        }
        removed
    }

    pub fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.endpoints.contains_key(&id)
    }

    /// Refresh an endpoint's activity timestamp.
    pub fn touch(&mut self, id: EndpointId) {
        if let Some(ep) = self.endpoints.get_mut(&id) {
            ep.touch();
        }
    }

    /// Lazy snapshot of endpoints with `role`, in registration order.
    /// Restartable — call again for a fresh pass.
    pub fn list_by_role(&self, role: Role) -> impl Iterator<Item = &Endpoint> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.endpoints.get(id))
            .filter(move |ep| ep.role() == role)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────
