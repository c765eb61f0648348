/*! GPU-visible descriptor allocation.

Each device owns one shader-visible heap per descriptor flavor. Binding
tables carve contiguous ranges out of those heaps through [`DescriptorPool`],
and a [`DescriptorRange`] hands its slots back when dropped. Freed blocks
are recycled whole, so a later request that fits inside one lands at the
block's original offset instead of pushing the high-water mark.

When the watermark would pass the heap's capacity the pool allocates a
bigger heap, copies every slot below the watermark across, and retires the
old one. Offsets stay valid across that move; GPU handles do not, and must
be fetched again after any allocation that could have grown the heap.
!*/

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

use pmt::DescriptorHeapKind;

use crate::resource::{RawResource, View};

use hal::{DescriptorHeap as _, Device as _};

/// Shader-visible descriptor storage for one device.
///
/// Holds one growable heap per [`DescriptorHeapKind`]. Allocation never
/// fails at this level: if the backend cannot produce a bigger heap the
/// device is out of descriptor memory and the pool aborts.
pub struct DescriptorPool<A: hal::Api> {
    resource: Arc<Mutex<TypedPool<A>>>,
    sampler: Arc<Mutex<TypedPool<A>>>,
}

impl<A: hal::Api> DescriptorPool<A> {
    pub(crate) fn new(device: &Arc<A::Device>) -> Self {
        Self {
            resource: Arc::new(Mutex::new(TypedPool::new(
                Arc::clone(device),
                DescriptorHeapKind::Resource,
            ))),
            sampler: Arc::new(Mutex::new(TypedPool::new(
                Arc::clone(device),
                DescriptorHeapKind::Sampler,
            ))),
        }
    }

    fn typed(&self, kind: DescriptorHeapKind) -> &Arc<Mutex<TypedPool<A>>> {
        match kind {
            DescriptorHeapKind::Resource => &self.resource,
            DescriptorHeapKind::Sampler => &self.sampler,
        }
    }

    /// Carves `count` contiguous slots out of the heap of the given kind.
    ///
    /// Prefers the smallest freed block that still fits, in which case the
    /// returned range covers that whole block and may be larger than
    /// `count`. Grows the heap when no freed block fits and the tail of
    /// the heap is exhausted.
    pub fn allocate(&self, kind: DescriptorHeapKind, count: u32) -> DescriptorRange<A> {
        assert!(count > 0, "empty descriptor ranges have no address");
        let pool = self.typed(kind);
        let (offset, size) = pool.lock().allocate(count);
        log::trace!(
            "allocated {:?} descriptor range at {}, size {}",
            kind,
            offset,
            size,
        );
        DescriptorRange {
            pool: Arc::clone(pool),
            kind,
            offset,
            size,
        }
    }

    /// Current slot capacity of the heap backing `kind`.
    pub fn capacity(&self, kind: DescriptorHeapKind) -> u32 {
        self.typed(kind).lock().capacity
    }
}

struct TypedPool<A: hal::Api> {
    device: Arc<A::Device>,
    kind: DescriptorHeapKind,
    heap: A::DescriptorHeap,
    capacity: u32,
    /// First slot past every block ever handed out. Slots below it are
    /// either live or parked in `free`.
    watermark: u32,
    /// Freed blocks, grouped by size. The vectors are never left empty.
    free: BTreeMap<u32, Vec<u32>>,
}

impl<A: hal::Api> TypedPool<A> {
    fn new(device: Arc<A::Device>, kind: DescriptorHeapKind) -> Self {
        // Backends reject zero-sized heaps, so start with a single slot
        // and let the first real allocation size things properly.
        let heap = create_heap::<A>(&device, kind, 1);
        Self {
            device,
            kind,
            heap,
            capacity: 1,
            watermark: 0,
            free: BTreeMap::new(),
        }
    }

    fn allocate(&mut self, count: u32) -> (u32, u32) {
        let block = self.free.range(count..).next().map(|(&size, _)| size);
        if let Some(size) = block {
            if let Some(mut offsets) = self.free.remove(&size) {
                if let Some(offset) = offsets.pop() {
                    if !offsets.is_empty() {
                        self.free.insert(size, offsets);
                    }
                    return (offset, size);
                }
            }
        }

        if self.watermark + count > self.capacity {
            self.grow(self.watermark + count);
        }
        let offset = self.watermark;
        self.watermark += count;
        (offset, count)
    }

    fn release(&mut self, offset: u32, size: u32) {
        self.free.entry(size).or_insert_with(Vec::new).push(offset);
    }

    fn grow(&mut self, needed: u32) {
        let capacity = needed.max(self.capacity * 2 + 1);
        log::debug!(
            "growing {:?} descriptor heap from {} to {} slots",
            self.kind,
            self.capacity,
            capacity,
        );
        let heap = create_heap::<A>(&self.device, self.kind, capacity);
        unsafe {
            self.device
                .copy_descriptors(&heap, 0, &self.heap, 0, self.watermark)
        };
        self.heap = heap;
        self.capacity = capacity;
    }
}

fn create_heap<A: hal::Api>(
    device: &A::Device,
    kind: DescriptorHeapKind,
    capacity: u32,
) -> A::DescriptorHeap {
    match unsafe { device.create_descriptor_heap(kind, capacity) } {
        Ok(heap) => heap,
        Err(error) => {
            log::error!(
                "failed to allocate a {:?} descriptor heap of {} slots: {}",
                kind,
                capacity,
                error,
            );
            panic!("out of descriptor heap memory");
        }
    }
}

/// A contiguous run of shader-visible descriptor slots.
///
/// The slots go back to the pool when the range is dropped. Offsets are
/// stable for the lifetime of the range; handles from [`gpu_handle`] are
/// only valid until the next allocation from the same pool.
///
/// [`gpu_handle`]: DescriptorRange::gpu_handle
pub struct DescriptorRange<A: hal::Api> {
    pool: Arc<Mutex<TypedPool<A>>>,
    kind: DescriptorHeapKind,
    offset: u32,
    size: u32,
}

impl<A: hal::Api> DescriptorRange<A> {
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// First slot of the range within its heap.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Usable slot count. At least the requested count, and exactly the
    /// size of the recycled block when the allocation reused one.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Writes the descriptor for `view` into the slot at `index`.
    pub fn write(&self, index: u32, view: &View<A>) {
        assert!(
            index < self.size,
            "descriptor write at {} past the end of a range of {}",
            index,
            self.size,
        );
        debug_assert_eq!(
            view.kind().heap_kind(),
            Some(self.kind),
            "view kind {:?} does not belong in a {:?} heap",
            view.kind(),
            self.kind,
        );
        let write = match *view.resource().raw() {
            RawResource::Buffer(ref buffer) => hal::DescriptorWrite::Buffer {
                buffer,
                offset: view.offset(),
                size: view.size(),
            },
            RawResource::Texture(ref texture) => hal::DescriptorWrite::Texture {
                texture,
                range: view.range().clone(),
            },
            RawResource::Sampler(ref sampler) => hal::DescriptorWrite::Sampler(sampler),
        };
        let pool = self.pool.lock();
        unsafe { pool.device.write_descriptor(&pool.heap, self.offset + index, write) };
    }

    /// Fetches the GPU handle of the slot at `index` from the heap as it
    /// currently stands. Do not cache the result across allocations.
    pub fn gpu_handle(&self, index: u32) -> hal::GpuDescriptorHandle {
        assert!(
            index < self.size,
            "descriptor handle at {} past the end of a range of {}",
            index,
            self.size,
        );
        let pool = self.pool.lock();
        unsafe { pool.heap.gpu_handle(self.offset + index) }
    }

    /// Runs `fun` against the backing heap. The heap can be swapped out by
    /// any allocation, so it is only lent out for the duration of the call.
    pub fn with_heap<R>(&self, fun: impl FnOnce(&A::DescriptorHeap) -> R) -> R {
        let pool = self.pool.lock();
        fun(&pool.heap)
    }
}

impl<A: hal::Api> Drop for DescriptorRange<A> {
    fn drop(&mut self) {
        self.pool.lock().release(self.offset, self.size);
    }
}
