//! Peer-side updates: the mirror half of every association change.

use std::sync::Arc;

use tandem_foundation::{EndpointRef, Error, Modification, ObjectId, Result, Value};
use tracing::trace;

use super::{Association, Deferred, Model};
use crate::endpoint::{EndpointData, Storage};

/// Where an element lands on the peer side, when the peer cares.
#[derive(Clone, Debug, Default)]
pub(crate) struct PeerSlot {
    /// Position in a peer list, or the index an indexed reference records.
    pub index: Option<usize>,
    /// Key in a peer map, or the key a keyed reference records.
    pub key: Option<Value>,
}

impl PeerSlot {
    pub fn index(index: Option<usize>) -> Self {
        Self { index, key: None }
    }

    pub fn key(key: Value) -> Self {
        Self {
            index: None,
            key: Some(key),
        }
    }
}

impl Model {
    /// Makes `peer` link back to `element`.
    ///
    /// Skipped when the peer is suspended: it started this exchange and
    /// writes its own half.
    pub(crate) fn attach_peer(
        &mut self,
        peer: EndpointRef,
        element: ObjectId,
        slot: PeerSlot,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        if self.is_suspended(peer) {
            return Ok(());
        }
        self.ensure_loaded(peer)?;
        let storage = self.endpoint(peer)?.storage();
        trace!(peer = ?peer, element = %element, "attach peer");

        match storage {
            Storage::Reference => self.reference_core(peer, Some(element), modification, deferred),
            Storage::Indexed => {
                self.indexed_core(peer, Some(element), slot.index, modification, deferred)
            }
            Storage::Keyed => {
                self.keyed_core(peer, Some(element), slot.key, modification, deferred)
            }
            Storage::List | Storage::Set => {
                self.add_core(peer, element, slot.index, modification, deferred)
            }
            Storage::Map => {
                let key = slot.key.ok_or_else(|| {
                    Error::unsupported(format!(
                        "{element} cannot join {} without a key",
                        self.schema.qualified_name(peer.property)
                    ))
                })?;
                self.put_core(peer, key, element, modification, deferred)
            }
        }
    }

    /// Makes `peer` stop linking to `element`, if it still does.
    pub(crate) fn detach_peer(
        &mut self,
        peer: EndpointRef,
        element: ObjectId,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        if self.is_suspended(peer) {
            return Ok(());
        }
        self.ensure_loaded(peer)?;

        let endpoint = self.endpoint(peer)?;
        if !endpoint.holds(element) {
            // Already reassigned elsewhere
            return Ok(());
        }
        let storage = endpoint.storage();
        let key = match &endpoint.data {
            EndpointData::Map(map) => map.key_of(element).cloned(),
            _ => None,
        };
        trace!(peer = ?peer, element = %element, "detach peer");

        match storage {
            Storage::Reference => self.reference_core(peer, None, modification, deferred),
            Storage::Indexed => self.indexed_core(peer, None, None, modification, deferred),
            Storage::Keyed => self.keyed_core(peer, None, None, modification, deferred),
            Storage::List | Storage::Set => {
                self.remove_core(peer, element, true, modification, deferred)
            }
            Storage::Map => match key {
                Some(key) => self.remove_key_core(peer, &key, modification, deferred),
                None => Ok(()),
            },
        }
    }

    /// Loads the opposite endpoints a change to `elements` will touch, so a
    /// missing loader fails the operation before anything changes.
    pub(crate) fn prepare_peers(
        &mut self,
        association: &Association,
        elements: &[ObjectId],
    ) -> Result<()> {
        let Some(opposite) = association.opposite else {
            return Ok(());
        };
        for &element in elements {
            let peer = EndpointRef::new(element, opposite);
            self.ensure_loaded(peer)?;
            // A single-valued peer may be seized from its current owner
            let current = self.endpoint(peer)?.target();
            if let Some(current) = current.filter(|c| *c != association.endpoint.owner) {
                let previous_owner = EndpointRef::new(current, association.endpoint.property);
                if self.endpoint(previous_owner).is_ok() {
                    self.ensure_loaded(previous_owner)?;
                }
            }
        }
        Ok(())
    }
}
