//! Layered address resolution and access dispatch.
//!
//! Mapping is structural and never fails on cross-layer overlap; which
//! region answers for an address is decided at dispatch time from the set
//! of active layers. Bank-switching hardware is therefore modeled by
//! toggling a layer's active flag, not by remapping regions.

use std::collections::HashMap;

use crate::access::{AccessIntent, Addr, BusAccess, BusAccessMode};
use crate::fault::{BusFault, FaultKind, FaultLog, RegionTag, NO_DEVICE};
use crate::region::{MapError, MemoryRegion, PagePerms, TargetCaps, TargetError};

/// Named, prioritized, independently toggleable group of regions.
///
/// A plain immutable value: toggling produces a new instance via
/// [`MappingLayer::with_active`], never in-place mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MappingLayer {
    name: String,
    priority: i32,
    is_active: bool,
}

impl MappingLayer {
    /// Creates a layer.
    #[must_use]
    pub fn new(name: &str, priority: i32, is_active: bool) -> Self {
        Self {
            name: name.to_owned(),
            priority,
            is_active,
        }
    }

    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolution priority; higher wins across layers.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// True when the layer participates in resolution.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Returns a copy with the active flag replaced.
    #[must_use]
    pub fn with_active(&self, is_active: bool) -> Self {
        Self {
            name: self.name.clone(),
            priority: self.priority,
            is_active,
        }
    }
}

#[derive(Debug)]
struct MappedRegion {
    layer: String,
    base: Addr,
    seq: u64,
    region: MemoryRegion,
}

/// Owns the region set and resolves/dispatches every bus access.
#[derive(Debug, Default)]
pub struct RegionManager {
    layers: HashMap<String, MappingLayer>,
    regions: Vec<MappedRegion>,
    next_seq: u64,
}

impl RegionManager {
    /// Creates an empty manager with no layers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mapping layer.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::DuplicateLayer`] when the name is taken.
    pub fn add_layer(&mut self, layer: MappingLayer) -> Result<(), MapError> {
        if self.layers.contains_key(layer.name()) {
            return Err(MapError::DuplicateLayer(layer.name().to_owned()));
        }
        self.layers.insert(layer.name().to_owned(), layer);
        Ok(())
    }

    /// Looks up a registered layer.
    #[must_use]
    pub fn layer(&self, name: &str) -> Option<&MappingLayer> {
        self.layers.get(name)
    }

    /// Unregisters a layer, unmapping every region mapped into it.
    ///
    /// Returns the removed regions in mapping order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::UnknownLayer`] when the layer is not registered.
    pub fn remove_layer(&mut self, name: &str) -> Result<Vec<MemoryRegion>, MapError> {
        if self.layers.remove(name).is_none() {
            return Err(MapError::UnknownLayer(name.to_owned()));
        }
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.regions.len() {
            if self.regions[index].layer == name {
                removed.push(self.regions.remove(index).region);
            } else {
                index += 1;
            }
        }
        Ok(removed)
    }

    /// Replaces a layer with a copy whose active flag is `is_active`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::UnknownLayer`] when the layer is not registered.
    pub fn set_layer_active(&mut self, name: &str, is_active: bool) -> Result<(), MapError> {
        let layer = self
            .layers
            .get(name)
            .ok_or_else(|| MapError::UnknownLayer(name.to_owned()))?;
        let toggled = layer.with_active(is_active);
        self.layers.insert(name.to_owned(), toggled);
        Ok(())
    }

    /// Maps `region` into `layer` at its preferred base.
    ///
    /// Overlap with regions of other layers is legal; resolution is
    /// deferred to dispatch time.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::UnknownLayer`] for an unregistered layer and
    /// [`MapError::DuplicateId`] when the id is taken within that layer.
    pub fn map_region_at_preferred(
        &mut self,
        layer: &str,
        region: MemoryRegion,
    ) -> Result<(), MapError> {
        let base = region.preferred_base;
        self.map_region_at(layer, region, base)
    }

    /// Maps `region` into `layer` at an explicit base.
    ///
    /// # Errors
    ///
    /// As [`Self::map_region_at_preferred`], plus
    /// [`MapError::InvalidArgument`] when a non-relocatable region is mapped
    /// away from its preferred base.
    pub fn map_region_at(
        &mut self,
        layer: &str,
        region: MemoryRegion,
        base: Addr,
    ) -> Result<(), MapError> {
        if !self.layers.contains_key(layer) {
            return Err(MapError::UnknownLayer(layer.to_owned()));
        }
        if !region.is_relocatable && base != region.preferred_base {
            return Err(MapError::InvalidArgument(
                "region is not relocatable away from its preferred base",
            ));
        }
        let duplicate = self
            .regions
            .iter()
            .any(|mapped| mapped.layer == layer && mapped.region.id == region.id);
        if duplicate {
            return Err(MapError::DuplicateId {
                layer: layer.to_owned(),
                id: region.id.clone(),
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.regions.push(MappedRegion {
            layer: layer.to_owned(),
            base,
            seq,
            region,
        });
        Ok(())
    }

    /// Removes the region `id` from `layer`, returning it to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::UnknownRegion`] when no such mapping exists.
    pub fn unmap(&mut self, layer: &str, id: &str) -> Result<MemoryRegion, MapError> {
        let index = self
            .regions
            .iter()
            .position(|mapped| mapped.layer == layer && mapped.region.id == id)
            .ok_or_else(|| MapError::UnknownRegion(id.to_owned()))?;
        Ok(self.regions.remove(index).region)
    }

    /// Looks up a mapped region by id across all layers.
    #[must_use]
    pub fn region(&self, id: &str) -> Option<&MemoryRegion> {
        self.regions
            .iter()
            .find(|mapped| mapped.region.id == id)
            .map(|mapped| &mapped.region)
    }

    /// Enumerates mapped regions as `(layer, base, region)` in mapping order.
    pub fn regions(&self) -> impl Iterator<Item = (&str, Addr, &MemoryRegion)> {
        self.regions
            .iter()
            .map(|mapped| (mapped.layer.as_str(), mapped.base, &mapped.region))
    }

    /// Resolves `addr` against active layers only.
    ///
    /// Selection order: highest layer priority, then highest region
    /// priority, then most recent mapping. Returns the region and the
    /// region-relative offset.
    #[must_use]
    pub fn resolve(&self, addr: Addr) -> Option<(&MemoryRegion, Addr)> {
        self.resolve_index(addr)
            .map(|(index, offset)| (&self.regions[index].region, offset))
    }

    fn resolve_index(&self, addr: Addr) -> Option<(usize, Addr)> {
        let mut best: Option<(i32, i32, u64, usize)> = None;
        for (index, mapped) in self.regions.iter().enumerate() {
            let Some(layer) = self.layers.get(&mapped.layer) else {
                continue;
            };
            if !layer.is_active() || !mapped.region.contains_at(mapped.base, addr) {
                continue;
            }
            let key = (layer.priority(), mapped.region.priority, mapped.seq, index);
            let better = match best {
                None => true,
                Some(current) => (key.0, key.1, key.2) > (current.0, current.1, current.2),
            };
            if better {
                best = Some(key);
            }
        }
        best.map(|(_, _, _, index)| (index, addr - self.regions[index].base))
    }

    /// Dispatches one access, returning the read value (0 for writes and
    /// faults) and the structured outcome.
    ///
    /// Decomposed multi-byte service is explicitly non-atomic: a device
    /// fault mid-sequence aborts the remaining sub-accesses and leaves the
    /// bytes already written in place.
    pub fn dispatch(&mut self, access: &BusAccess) -> (u32, BusFault) {
        let Some((index, offset)) = self.resolve_index(access.addr) else {
            return (0, BusFault::unmapped(access));
        };
        let (tag, perms, caps, device_id) = {
            let region = &self.regions[index].region;
            (
                region.tag,
                region.default_perms,
                region.capabilities,
                region.target.device_id(),
            )
        };

        let required = match access.intent {
            AccessIntent::DataRead => PagePerms::READ,
            AccessIntent::DataWrite => PagePerms::WRITE,
            AccessIntent::InstructionFetch => PagePerms::EXECUTE,
        };
        if !perms.contains(required) {
            let kind = if access.intent == AccessIntent::InstructionFetch {
                FaultKind::NoExecute
            } else {
                FaultKind::Permission
            };
            return (0, BusFault::with_kind(kind, access, device_id, tag));
        }

        let bytes = access.width.bytes();
        if bytes > 1
            && caps.contains(TargetCaps::REQUIRES_ALIGNMENT)
            && access.addr % bytes != 0
        {
            return (0, BusFault::with_kind(FaultKind::Misaligned, access, device_id, tag));
        }

        let decomposed = bytes > 1
            && (access.mode == BusAccessMode::Decomposed
                || !caps.contains(TargetCaps::SUPPORTS_WIDE));
        let target = &mut self.regions[index].region.target;
        let result = match access.intent {
            AccessIntent::DataWrite => {
                let le = access.value.to_le_bytes();
                let outcome = if bytes == 1 {
                    target.write_byte(offset, le[0], access.cycle)
                } else if decomposed {
                    let mut status: Result<(), TargetError> = Ok(());
                    for byte_index in 0..bytes {
                        status = target.write_byte(
                            offset + byte_index,
                            le[byte_index as usize],
                            access.cycle,
                        );
                        if status.is_err() {
                            break;
                        }
                    }
                    status
                } else {
                    target.write_wide(offset, access.value, access.width, access.cycle)
                };
                outcome.map(|()| 0)
            }
            AccessIntent::DataRead | AccessIntent::InstructionFetch => {
                if bytes == 1 {
                    target.read_byte(offset, access.cycle).map(u32::from)
                } else if decomposed {
                    let mut value: u32 = 0;
                    let mut status: Result<(), TargetError> = Ok(());
                    for byte_index in 0..bytes {
                        match target.read_byte(offset + byte_index, access.cycle) {
                            Ok(byte) => value |= u32::from(byte) << (8 * byte_index),
                            Err(err) => {
                                status = Err(err);
                                break;
                            }
                        }
                    }
                    status.map(|()| value)
                } else {
                    target.read_wide(offset, access.width, access.cycle)
                }
            }
        };

        match result {
            Ok(value) => (value, BusFault::success(access, device_id, tag)),
            Err(error) => {
                let kind = match error {
                    TargetError::OutOfRange => FaultKind::Unmapped,
                    TargetError::ReadOnly => FaultKind::Permission,
                    TargetError::Device(_) => FaultKind::Device,
                };
                (0, BusFault::with_kind(kind, access, device_id, tag))
            }
        }
    }

    /// Dispatches one access and records any fault into `log`.
    pub fn dispatch_logged(&mut self, access: &BusAccess, log: &mut FaultLog) -> (u32, BusFault) {
        let (value, fault) = self.dispatch(access);
        log.record(&fault);
        (value, fault)
    }

    /// Side-effect-free single-byte read for inspection tooling.
    ///
    /// Served only by targets declaring [`TargetCaps::SUPPORTS_PEEK`];
    /// device handlers are consulted through their peek hook and never
    /// through the stateful read path.
    #[must_use]
    pub fn peek(&self, addr: Addr) -> Option<u8> {
        let (region, offset) = self.resolve(addr)?;
        if !region.capabilities.contains(TargetCaps::SUPPORTS_PEEK) {
            return None;
        }
        region.target.peek_byte(offset)
    }

    /// Tag of the region that would answer for `addr`, for diagnostics.
    #[must_use]
    pub fn tag_at(&self, addr: Addr) -> RegionTag {
        self.resolve(addr)
            .map_or(RegionTag::Unmapped, |(region, _)| region.tag)
    }

    /// Device id that would answer for `addr`, or [`NO_DEVICE`].
    #[must_use]
    pub fn device_at(&self, addr: Addr) -> i32 {
        self.resolve(addr)
            .map_or(NO_DEVICE, |(region, _)| region.target.device_id())
    }
}
