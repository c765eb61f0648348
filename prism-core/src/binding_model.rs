/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::{
    descriptor::DescriptorRange,
    device::Device,
    resource::{Resource, View},
};

use arrayvec::ArrayVec;
use fxhash::{FxHashMap, FxHashSet};
use thiserror::Error;

use pmt::{BindKey, DescriptorHeapKind};

use std::{fmt, sync::Arc};

/// How a binding slot receives its data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SlotClass {
    /// A descriptor written into the set's shader-visible table.
    Table,
    /// An inline constant block of `size` bytes, stored in the set's
    /// shared upload buffer and addressed by byte offset.
    Constants { size: pmt::BufferAddress },
}

#[derive(Clone, Debug)]
pub struct BindingSetLayoutEntry {
    pub key: BindKey,
    pub class: SlotClass,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TableSlot {
    pub heap: DescriptorHeapKind,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ConstantSlot {
    /// Byte offset of this block within the shared constants buffer.
    pub offset: pmt::BufferAddress,
    pub size: pmt::BufferAddress,
    /// Slot of the block's buffer descriptor within the resource table.
    pub table_offset: u32,
}

/// Slot assignment for one set of binding keys.
///
/// Table keys get consecutive slots within their heap kind, in declaration
/// order. Constant keys get a byte window in a shared upload buffer plus one
/// resource-table slot for the descriptor pointing at that window. Bindless
/// keys and attachment view kinds consume nothing here.
#[derive(Debug)]
pub struct BindingSetLayout {
    entries: Vec<BindingSetLayoutEntry>,
    table_slots: FxHashMap<BindKey, TableSlot>,
    constants: FxHashMap<BindKey, ConstantSlot>,
    heap_counts: ArrayVec<(DescriptorHeapKind, u32), 2>,
    constants_size: pmt::BufferAddress,
}

impl BindingSetLayout {
    pub(crate) fn new(
        entries: Vec<BindingSetLayoutEntry>,
    ) -> Result<Self, CreateBindingSetLayoutError> {
        let mut seen = FxHashSet::default();
        let mut table_slots = FxHashMap::default();
        let mut constants = FxHashMap::default();
        let mut resource_count = 0;
        let mut sampler_count = 0;
        let mut constants_size = 0;

        for entry in &entries {
            if !seen.insert(entry.key) {
                return Err(CreateBindingSetLayoutError::DuplicateKey(entry.key));
            }
            if entry.key.is_bindless() {
                // Bindless arrays index the global heap directly.
                continue;
            }
            match entry.class {
                SlotClass::Constants { size } => {
                    let offset = align_up(constants_size, pmt::BIND_BUFFER_ALIGNMENT);
                    constants_size = offset + size;
                    constants.insert(
                        entry.key,
                        ConstantSlot {
                            offset,
                            size,
                            table_offset: resource_count,
                        },
                    );
                    resource_count += 1;
                }
                SlotClass::Table => {
                    let heap = match entry.key.kind.heap_kind() {
                        Some(heap) => heap,
                        // Attachments bind through the framebuffer path.
                        None => continue,
                    };
                    let count = match heap {
                        DescriptorHeapKind::Resource => &mut resource_count,
                        DescriptorHeapKind::Sampler => &mut sampler_count,
                    };
                    table_slots.insert(
                        entry.key,
                        TableSlot {
                            heap,
                            offset: *count,
                        },
                    );
                    *count += entry.key.count;
                }
            }
        }

        let mut heap_counts = ArrayVec::new();
        if resource_count > 0 {
            heap_counts.push((DescriptorHeapKind::Resource, resource_count));
        }
        if sampler_count > 0 {
            heap_counts.push((DescriptorHeapKind::Sampler, sampler_count));
        }

        Ok(Self {
            entries,
            table_slots,
            constants,
            heap_counts,
            constants_size,
        })
    }

    pub fn entries(&self) -> &[BindingSetLayoutEntry] {
        &self.entries
    }

    /// Table slot counts per heap kind, omitting empty kinds.
    pub fn heap_counts(&self) -> &[(DescriptorHeapKind, u32)] {
        &self.heap_counts
    }

    /// Total byte size of the shared constants buffer, zero when the
    /// layout declares no constant blocks.
    pub fn constants_size(&self) -> pmt::BufferAddress {
        self.constants_size
    }

    pub(crate) fn contains(&self, key: &BindKey) -> bool {
        self.entries.iter().any(|entry| entry.key == *key)
    }

    pub(crate) fn table_slot(&self, key: &BindKey) -> Option<&TableSlot> {
        self.table_slots.get(key)
    }

    pub(crate) fn constant_slot(&self, key: &BindKey) -> Option<&ConstantSlot> {
        self.constants.get(key)
    }

    pub(crate) fn constant_slots(
        &self,
    ) -> impl Iterator<Item = (&BindKey, &ConstantSlot)> {
        self.constants.iter()
    }
}

#[derive(Clone, Debug, Error)]
pub enum CreateBindingSetLayoutError {
    #[error("binding key {0:?} is declared twice")]
    DuplicateKey(BindKey),
}

/// One requested binding: a key from the layout plus the view to put there.
///
/// A `None` view leaves the slot untouched, keeping whatever the heap
/// already held there.
#[derive(Clone)]
pub struct BindingSetEntry<A: hal::Api> {
    pub key: BindKey,
    pub view: Option<Arc<View<A>>>,
}

impl<A: hal::Api> fmt::Debug for BindingSetEntry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSetEntry")
            .field("key", &self.key)
            .field("view", &self.view)
            .finish()
    }
}

/// A fully written slot→view assignment, ready to bind.
///
/// Construction (through [`Device::create_binding_set`]) allocates one
/// descriptor range per populated heap kind, writes every provided view at
/// its layout slot, and writes the constant-block descriptors into the
/// resource table. The ranges and the bound views stay alive for as long as
/// the set does.
pub struct BindingSet<A: hal::Api> {
    pub(crate) layout: Arc<BindingSetLayout>,
    pub(crate) ranges: ArrayVec<(DescriptorHeapKind, DescriptorRange<A>), 2>,
    pub(crate) constants: Option<Arc<Resource<A>>>,
    pub(crate) views: Vec<Arc<View<A>>>,
}

impl<A: hal::Api> BindingSet<A> {
    pub fn layout(&self) -> &Arc<BindingSetLayout> {
        &self.layout
    }

    /// The descriptor range backing the tables of the given heap kind, if
    /// the layout has any slots there.
    pub fn gpu_range(&self, kind: DescriptorHeapKind) -> Option<&DescriptorRange<A>> {
        self.ranges
            .iter()
            .find(|&&(range_kind, _)| range_kind == kind)
            .map(|&(_, ref range)| range)
    }

    /// The shared upload buffer holding the layout's constant blocks.
    pub fn constants_buffer(&self) -> Option<&Arc<Resource<A>>> {
        self.constants.as_ref()
    }

    pub fn views(&self) -> &[Arc<View<A>>] {
        &self.views
    }

    /// Uploads `data` into the constant block assigned to `key`.
    ///
    /// The block's descriptor was written at construction; updates only
    /// touch buffer memory, never the descriptor table.
    pub fn update_constants(
        &self,
        device: &Device<A>,
        key: BindKey,
        data: &[u8],
    ) -> Result<(), hal::DeviceError> {
        let slot = match self.layout.constant_slot(&key) {
            Some(slot) => *slot,
            None => panic!("binding key {:?} has no constant block in this layout", key),
        };
        assert!(
            data.len() as pmt::BufferAddress <= slot.size,
            "constants update of {} bytes overflows the {}-byte block of {:?}",
            data.len(),
            slot.size,
            key,
        );
        let buffer = match self.constants {
            Some(ref buffer) => buffer,
            None => panic!("layout declares constant blocks but the set has no buffer"),
        };
        device.write_buffer(buffer, slot.offset, data)
    }
}

impl<A: hal::Api> fmt::Debug for BindingSet<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSet")
            .field("layout", &self.layout)
            .field("views", &self.views)
            .finish()
    }
}

#[derive(Clone, Debug, Error)]
pub enum CreateBindingSetError {
    #[error(transparent)]
    Device(#[from] hal::DeviceError),
    #[error(transparent)]
    View(#[from] crate::resource::CreateViewError),
    #[error("binding key {0:?} is not part of the layout")]
    KeyNotInLayout(BindKey),
    #[error("view kind {view:?} does not satisfy binding key {key:?}")]
    ViewKindMismatch {
        key: BindKey,
        view: pmt::ViewKind,
    },
}

fn align_up(value: pmt::BufferAddress, alignment: pmt::BufferAddress) -> pmt::BufferAddress {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use pmt::{BindKey, DescriptorHeapKind, ShaderStage, ViewKind};

    use super::{BindingSetLayout, BindingSetLayoutEntry, CreateBindingSetLayoutError, SlotClass};

    fn key(kind: ViewKind, slot: u32) -> BindKey {
        BindKey {
            stage: ShaderStage::Pixel,
            kind,
            slot,
            space: 0,
            count: 1,
        }
    }

    fn table(kind: ViewKind, slot: u32) -> BindingSetLayoutEntry {
        BindingSetLayoutEntry {
            key: key(kind, slot),
            class: SlotClass::Table,
        }
    }

    #[test]
    fn slots_follow_declaration_order_per_heap() {
        let layout = BindingSetLayout::new(vec![
            table(ViewKind::Texture, 0),
            table(ViewKind::Sampler, 0),
            table(ViewKind::RWBuffer, 1),
            table(ViewKind::Sampler, 1),
        ])
        .unwrap();

        assert_eq!(
            layout.table_slot(&key(ViewKind::Texture, 0)).unwrap().offset,
            0
        );
        assert_eq!(
            layout.table_slot(&key(ViewKind::RWBuffer, 1)).unwrap().offset,
            1
        );
        assert_eq!(
            layout.table_slot(&key(ViewKind::Sampler, 0)).unwrap().offset,
            0
        );
        assert_eq!(
            layout.table_slot(&key(ViewKind::Sampler, 1)).unwrap().offset,
            1
        );
        assert_eq!(
            layout.heap_counts(),
            &[
                (DescriptorHeapKind::Resource, 2),
                (DescriptorHeapKind::Sampler, 2),
            ]
        );
    }

    #[test]
    fn constant_blocks_are_aligned_and_take_table_slots() {
        let layout = BindingSetLayout::new(vec![
            BindingSetLayoutEntry {
                key: key(ViewKind::ConstantBuffer, 0),
                class: SlotClass::Constants { size: 16 },
            },
            table(ViewKind::Texture, 0),
            BindingSetLayoutEntry {
                key: key(ViewKind::ConstantBuffer, 1),
                class: SlotClass::Constants { size: 100 },
            },
        ])
        .unwrap();

        let first = layout
            .constant_slot(&key(ViewKind::ConstantBuffer, 0))
            .unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(first.table_offset, 0);

        let second = layout
            .constant_slot(&key(ViewKind::ConstantBuffer, 1))
            .unwrap();
        assert_eq!(second.offset, 256);
        assert_eq!(second.table_offset, 2);

        assert_eq!(layout.constants_size(), 356);
        assert_eq!(layout.heap_counts(), &[(DescriptorHeapKind::Resource, 3)]);
    }

    #[test]
    fn bindless_and_attachment_keys_take_no_slots() {
        let layout = BindingSetLayout::new(vec![
            BindingSetLayoutEntry {
                key: BindKey {
                    count: pmt::UNBOUNDED_BINDING_COUNT,
                    ..key(ViewKind::Texture, 0)
                },
                class: SlotClass::Table,
            },
            table(ViewKind::RenderTarget, 0),
            table(ViewKind::DepthStencil, 0),
        ])
        .unwrap();

        assert!(layout.heap_counts().is_empty());
        assert_eq!(layout.constants_size(), 0);
    }

    #[test]
    fn array_keys_reserve_their_whole_run() {
        let layout = BindingSetLayout::new(vec![
            BindingSetLayoutEntry {
                key: BindKey {
                    count: 4,
                    ..key(ViewKind::Texture, 0)
                },
                class: SlotClass::Table,
            },
            table(ViewKind::Buffer, 4),
        ])
        .unwrap();

        assert_eq!(
            layout.table_slot(&key(ViewKind::Buffer, 4)).unwrap().offset,
            4
        );
        assert_eq!(layout.heap_counts(), &[(DescriptorHeapKind::Resource, 5)]);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let result = BindingSetLayout::new(vec![
            table(ViewKind::Texture, 3),
            table(ViewKind::Texture, 3),
        ]);
        assert!(matches!(
            result,
            Err(CreateBindingSetLayoutError::DuplicateKey(key)) if key.slot == 3
        ));
    }
}
