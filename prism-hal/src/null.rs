/*! Null backend.
 *
 * Executes nothing and remembers everything. Submissions, transitions,
 * fence signals, and descriptor heap content stay observable after the
 * fact, which is what the layers above build their tests on. Buffer
 * storage is real host memory, so copies and mapped writes move bytes.
!*/

use crate::{
    BufferBarrier, BufferCopy, BufferTextureCopy, DescriptorWrite, DeviceError, FenceValue,
    GpuDescriptorHandle, MemoryRange, OpenDevice, TextureBarrier,
};

use parking_lot::Mutex;

use std::{
    cell::UnsafeCell,
    fmt,
    ops::Range,
    ptr::NonNull,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

#[derive(Clone)]
pub struct Api;

impl crate::Api for Api {
    type Device = Device;
    type Queue = Queue;
    type CommandList = CommandList;
    type Fence = Fence;

    type Buffer = Buffer;
    type Texture = Texture;
    type Sampler = Sampler;
    type DescriptorHeap = DescriptorHeap;
}

/// One state transition as it reached the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Buffer {
        buffer: u64,
        states: Range<pmt::ResourceState>,
    },
    Texture {
        texture: u64,
        range: pmt::SubresourceRange,
        states: Range<pmt::ResourceState>,
    },
}

/// Recorded content of one submitted command list.
#[derive(Clone, Debug)]
pub struct ListSnapshot {
    pub list: u64,
    pub transitions: Vec<Transition>,
}

/// One `submit` call, in submission order.
#[derive(Clone, Debug)]
pub struct Submission {
    pub lists: Vec<ListSnapshot>,
}

/// Everything the queue has seen, for inspection by tests.
#[derive(Debug, Default)]
pub struct SubmissionLog {
    submissions: Mutex<Vec<Submission>>,
    signals: Mutex<Vec<FenceValue>>,
}

impl SubmissionLog {
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    pub fn signals(&self) -> Vec<FenceValue> {
        self.signals.lock().clone()
    }
}

pub struct Device {
    ids: AtomicU64,
}

impl Device {
    /// Opens a fresh device and its queue.
    pub fn create() -> OpenDevice<Api> {
        let log = Arc::new(SubmissionLog::default());
        OpenDevice {
            device: Device {
                ids: AtomicU64::new(1),
            },
            queue: Queue { log },
        }
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }
}

struct DataCell(UnsafeCell<Box<[u8]>>);

// Contents are only touched through map/unmap or through copies that the
// caller is responsible for synchronizing.
unsafe impl Send for DataCell {}
unsafe impl Sync for DataCell {}

pub struct Buffer {
    id: u64,
    size: pmt::BufferAddress,
    memory: pmt::MemoryKind,
    data: Arc<DataCell>,
}

impl Buffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn memory(&self) -> pmt::MemoryKind {
        self.memory
    }

    /// Snapshot of the full backing store.
    pub fn contents(&self) -> Vec<u8> {
        unsafe { (*self.data.0.get()).to_vec() }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("memory", &self.memory)
            .finish()
    }
}

#[derive(Debug)]
pub struct Texture {
    id: u64,
    mip_level_count: u32,
    array_layer_count: u32,
}

impl Texture {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn layer_count(&self) -> u32 {
        self.array_layer_count
    }
}

#[derive(Debug)]
pub struct Sampler {
    id: u64,
}

impl Sampler {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Snapshot of one written descriptor slot.
#[derive(Clone, Debug, PartialEq)]
pub enum Descriptor {
    Buffer {
        buffer: u64,
        offset: pmt::BufferAddress,
        size: pmt::BufferAddress,
    },
    Texture {
        texture: u64,
        range: pmt::SubresourceRange,
    },
    Sampler {
        sampler: u64,
    },
}

pub struct DescriptorHeap {
    id: u64,
    kind: pmt::DescriptorHeapKind,
    content: Mutex<Vec<Option<Descriptor>>>,
}

impl DescriptorHeap {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> pmt::DescriptorHeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.content.lock().len() as u32
    }

    pub fn entry(&self, slot: u32) -> Option<Descriptor> {
        self.content.lock()[slot as usize].clone()
    }
}

impl fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl crate::DescriptorHeap for DescriptorHeap {
    unsafe fn gpu_handle(&self, slot: u32) -> GpuDescriptorHandle {
        debug_assert!(slot < self.capacity());
        GpuDescriptorHandle((self.id << 32) | slot as u64)
    }
}

#[derive(Debug)]
pub struct Fence {
    completed: AtomicU64,
}

impl Fence {
    pub fn completed(&self) -> FenceValue {
        self.completed.load(Ordering::Acquire)
    }
}

impl crate::Fence for Fence {
    unsafe fn completed_value(&self) -> FenceValue {
        self.completed()
    }

    unsafe fn wait(&self, value: FenceValue) {
        // Nothing executes asynchronously here, so a wait that would block
        // on real hardware is a hang bug in the caller.
        assert!(
            self.completed() >= value,
            "waiting for fence value {} that was never signaled",
            value
        );
    }
}

pub struct CommandList {
    id: u64,
    open: bool,
    transitions: Vec<Transition>,
}

impl CommandList {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }
}

impl crate::Device<Api> for Device {
    unsafe fn create_buffer(
        &self,
        desc: &pmt::BufferDescriptor<crate::Label<'_>>,
    ) -> Result<Buffer, DeviceError> {
        let data = vec![0; desc.size as usize].into_boxed_slice();
        Ok(Buffer {
            id: self.next_id(),
            size: desc.size,
            memory: desc.memory,
            data: Arc::new(DataCell(UnsafeCell::new(data))),
        })
    }

    unsafe fn map_buffer(
        &self,
        buffer: &Buffer,
        range: MemoryRange,
    ) -> Result<NonNull<u8>, DeviceError> {
        debug_assert!(range.end <= buffer.size);
        let base = (*buffer.data.0.get()).as_mut_ptr();
        Ok(NonNull::new_unchecked(base.add(range.start as usize)))
    }

    unsafe fn unmap_buffer(&self, _buffer: &Buffer) {}

    unsafe fn create_texture(
        &self,
        desc: &pmt::TextureDescriptor<crate::Label<'_>>,
    ) -> Result<Texture, DeviceError> {
        Ok(Texture {
            id: self.next_id(),
            mip_level_count: desc.mip_level_count,
            array_layer_count: desc.array_layer_count(),
        })
    }

    unsafe fn create_sampler(
        &self,
        _desc: &pmt::SamplerDescriptor<crate::Label<'_>>,
    ) -> Result<Sampler, DeviceError> {
        Ok(Sampler { id: self.next_id() })
    }

    unsafe fn create_command_list(&self) -> Result<CommandList, DeviceError> {
        Ok(CommandList {
            id: self.next_id(),
            open: false,
            transitions: Vec::new(),
        })
    }

    unsafe fn create_fence(&self, initial: FenceValue) -> Result<Fence, DeviceError> {
        Ok(Fence {
            completed: AtomicU64::new(initial),
        })
    }

    unsafe fn create_descriptor_heap(
        &self,
        kind: pmt::DescriptorHeapKind,
        capacity: u32,
    ) -> Result<DescriptorHeap, DeviceError> {
        debug_assert_ne!(capacity, 0);
        Ok(DescriptorHeap {
            id: self.next_id(),
            kind,
            content: Mutex::new(vec![None; capacity as usize]),
        })
    }

    unsafe fn write_descriptor(
        &self,
        heap: &DescriptorHeap,
        slot: u32,
        write: DescriptorWrite<'_, Api>,
    ) {
        let descriptor = match write {
            DescriptorWrite::Buffer {
                buffer,
                offset,
                size,
            } => Descriptor::Buffer {
                buffer: buffer.id,
                offset,
                size,
            },
            DescriptorWrite::Texture { texture, range } => Descriptor::Texture {
                texture: texture.id,
                range,
            },
            DescriptorWrite::Sampler(sampler) => Descriptor::Sampler {
                sampler: sampler.id,
            },
        };
        heap.content.lock()[slot as usize] = Some(descriptor);
    }

    unsafe fn copy_descriptors(
        &self,
        dst: &DescriptorHeap,
        dst_base: u32,
        src: &DescriptorHeap,
        src_base: u32,
        count: u32,
    ) {
        debug_assert_eq!(dst.kind, src.kind);
        let copied: Vec<Option<Descriptor>> = {
            let content = src.content.lock();
            content[src_base as usize..(src_base + count) as usize].to_vec()
        };
        let mut content = dst.content.lock();
        content[dst_base as usize..(dst_base + count) as usize].clone_from_slice(&copied);
    }
}

pub struct Queue {
    log: Arc<SubmissionLog>,
}

impl Queue {
    pub fn log(&self) -> Arc<SubmissionLog> {
        Arc::clone(&self.log)
    }
}

impl crate::Queue<Api> for Queue {
    unsafe fn submit(&mut self, command_lists: &[&CommandList]) {
        log::trace!("null backend: submitting {} lists", command_lists.len());
        let lists = command_lists
            .iter()
            .map(|cmd| {
                debug_assert!(!cmd.open, "submitted list is still recording");
                ListSnapshot {
                    list: cmd.id,
                    transitions: cmd.transitions.clone(),
                }
            })
            .collect();
        self.log.submissions.lock().push(Submission { lists });
    }

    unsafe fn signal(&mut self, fence: &Fence, value: FenceValue) {
        log::trace!("null backend: signaling fence value {}", value);
        fence.completed.fetch_max(value, Ordering::AcqRel);
        self.log.signals.lock().push(value);
    }
}

impl crate::CommandList<Api> for CommandList {
    unsafe fn begin(&mut self) {
        debug_assert!(!self.open);
        self.open = true;
    }

    unsafe fn end(&mut self) {
        debug_assert!(self.open);
        self.open = false;
    }

    unsafe fn reset(&mut self) {
        self.open = false;
        self.transitions.clear();
    }

    unsafe fn transition_buffers<'a, T>(&mut self, barriers: T)
    where
        T: Iterator<Item = BufferBarrier<'a, Api>>,
    {
        debug_assert!(self.open);
        for barrier in barriers {
            self.transitions.push(Transition::Buffer {
                buffer: barrier.buffer.id,
                states: barrier.states,
            });
        }
    }

    unsafe fn transition_textures<'a, T>(&mut self, barriers: T)
    where
        T: Iterator<Item = TextureBarrier<'a, Api>>,
    {
        debug_assert!(self.open);
        for barrier in barriers {
            self.transitions.push(Transition::Texture {
                texture: barrier.texture.id,
                range: barrier.range,
                states: barrier.states,
            });
        }
    }

    unsafe fn copy_buffer_to_buffer<T>(&mut self, src: &Buffer, dst: &Buffer, regions: T)
    where
        T: Iterator<Item = BufferCopy>,
    {
        debug_assert!(self.open);
        for region in regions {
            let src_data = (*src.data.0.get()).as_ptr().add(region.src_offset as usize);
            let dst_data = (*dst.data.0.get())
                .as_mut_ptr()
                .add(region.dst_offset as usize);
            std::ptr::copy_nonoverlapping(src_data, dst_data, region.size.get() as usize);
        }
    }

    unsafe fn copy_buffer_to_texture<T>(&mut self, _src: &Buffer, _dst: &Texture, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>,
    {
        debug_assert!(self.open);
        for region in regions {
            let _ = region;
        }
    }

    unsafe fn copy_texture_to_buffer<T>(&mut self, _src: &Texture, _dst: &Buffer, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>,
    {
        debug_assert!(self.open);
        for region in regions {
            let _ = region;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandList as _, Device as _, Fence as _, Queue as _};

    #[test]
    fn descriptor_copy_moves_content_across_heaps() {
        let open = Device::create();
        unsafe {
            let src = open
                .device
                .create_descriptor_heap(pmt::DescriptorHeapKind::Sampler, 4)
                .unwrap();
            let dst = open
                .device
                .create_descriptor_heap(pmt::DescriptorHeapKind::Sampler, 8)
                .unwrap();
            let sampler = open
                .device
                .create_sampler(&pmt::SamplerDescriptor {
                    label: None,
                    filter: pmt::Filter::MinMagMipLinear,
                    address_mode: pmt::AddressMode::Wrap,
                    comparison_func: pmt::ComparisonFunc::Never,
                })
                .unwrap();
            open.device
                .write_descriptor(&src, 2, DescriptorWrite::Sampler(&sampler));
            open.device.copy_descriptors(&dst, 1, &src, 0, 4);

            assert_eq!(dst.entry(0), None);
            assert_eq!(
                dst.entry(3),
                Some(Descriptor::Sampler {
                    sampler: sampler.id()
                })
            );
        }
    }

    #[test]
    fn buffer_copies_move_bytes() {
        let open = Device::create();
        unsafe {
            let src = open
                .device
                .create_buffer(&pmt::BufferDescriptor {
                    label: None,
                    size: 8,
                    memory: pmt::MemoryKind::Upload,
                })
                .unwrap();
            let dst = open
                .device
                .create_buffer(&pmt::BufferDescriptor {
                    label: None,
                    size: 8,
                    memory: pmt::MemoryKind::Default,
                })
                .unwrap();

            let ptr = open.device.map_buffer(&src, 0..8).unwrap();
            std::ptr::copy_nonoverlapping([7u8; 8].as_ptr(), ptr.as_ptr(), 8);
            open.device.unmap_buffer(&src);

            let mut cmd = open.device.create_command_list().unwrap();
            cmd.begin();
            cmd.copy_buffer_to_buffer(
                &src,
                &dst,
                std::iter::once(BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: pmt::BufferSize::new(8).unwrap(),
                }),
            );
            cmd.end();

            assert_eq!(dst.contents(), vec![7u8; 8]);
        }
    }

    #[test]
    fn signals_complete_immediately() {
        let open = Device::create();
        let mut queue = open.queue;
        unsafe {
            let fence = open.device.create_fence(0).unwrap();
            assert_eq!(fence.completed_value(), 0);
            queue.signal(&fence, 3);
            fence.wait(3);
            assert_eq!(fence.completed_value(), 3);
            assert_eq!(queue.log().signals(), vec![3]);
        }
    }
}
