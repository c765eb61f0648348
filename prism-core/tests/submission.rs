//! End-to-end submission behavior over the null backend: which transitions
//! reach the queue, where patch lists land, and how global state advances.

use std::{num::NonZeroU32, sync::Arc};

use prism_core::{command::BarrierRequest, device::Device, resource::Resource};

use hal::null::{self, Transition};

use pmt::{ResourceState, SubresourceRange};

fn device() -> Device<null::Api> {
    let _ = env_logger::try_init();
    Device::new(null::Device::create()).unwrap()
}

fn texture(
    device: &Device<null::Api>,
    label: &str,
    mip_level_count: u32,
    initial_state: ResourceState,
) -> Arc<Resource<null::Api>> {
    device
        .create_texture(&pmt::TextureDescriptor {
            label: Some(label),
            size: pmt::Extent3d {
                width: 256,
                height: 256,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            format: pmt::TextureFormat::Rgba8Unorm,
            back_buffer: false,
            initial_state,
        })
        .unwrap()
}

fn buffer(
    device: &Device<null::Api>,
    label: &str,
    size: u64,
    memory: pmt::MemoryKind,
) -> Arc<Resource<null::Api>> {
    device
        .create_buffer(&pmt::BufferDescriptor {
            label: Some(label),
            size,
            memory,
        })
        .unwrap()
}

fn texture_id(resource: &Resource<null::Api>) -> u64 {
    match *resource.raw() {
        prism_core::resource::RawResource::Texture(ref texture) => texture.id(),
        _ => panic!("not a texture"),
    }
}

fn buffer_id(resource: &Resource<null::Api>) -> u64 {
    match *resource.raw() {
        prism_core::resource::RawResource::Buffer(ref buffer) => buffer.id(),
        _ => panic!("not a buffer"),
    }
}

fn full(resource: &Resource<null::Api>) -> SubresourceRange {
    SubresourceRange {
        mips: 0..resource.level_count(),
        layers: 0..resource.layer_count(),
    }
}

#[test]
fn declared_chain_needs_no_patches() {
    let mut device = device();
    let target = texture(&device, "chain", 1, ResourceState::COMMON);

    let mut draw = device.create_command_list(Some("draw")).unwrap();
    draw.resource_barrier(&[BarrierRequest {
        resource: &target,
        range: None,
        state_before: ResourceState::COMMON,
        state_after: ResourceState::RENDER_TARGET,
    }]);
    draw.close();

    let mut present = device.create_command_list(Some("present")).unwrap();
    present.resource_barrier(&[BarrierRequest {
        resource: &target,
        range: None,
        state_before: ResourceState::RENDER_TARGET,
        state_after: ResourceState::PRESENT,
    }]);
    present.close();

    device.execute_command_lists(&mut [draw, present]);

    let submissions = device.queue().log().submissions();
    assert_eq!(submissions.len(), 1);
    // Both declarations matched reality, so only the two lists went down.
    assert_eq!(submissions[0].lists.len(), 2);
    assert!(submissions[0].lists[0].transitions.is_empty());
    assert!(submissions[0].lists[1].transitions.is_empty());
    assert!(device.queue().log().signals().is_empty());

    assert_eq!(
        target.state_tracker().resource_state(),
        ResourceState::PRESENT
    );
}

#[test]
fn mismatched_declaration_gets_one_patch() {
    let mut device = device();
    let target = texture(&device, "mismatch", 1, ResourceState::COMMON);

    let mut draw = device.create_command_list(Some("draw")).unwrap();
    draw.resource_barrier(&[BarrierRequest {
        resource: &target,
        range: None,
        state_before: ResourceState::COMMON,
        state_after: ResourceState::RENDER_TARGET,
    }]);
    draw.close();

    // Declares an entry state the previous list does not leave behind.
    let mut sample = device.create_command_list(Some("sample")).unwrap();
    sample.resource_barrier(&[BarrierRequest {
        resource: &target,
        range: None,
        state_before: ResourceState::PIXEL_SHADER_RESOURCE,
        state_after: ResourceState::PRESENT,
    }]);
    sample.close();

    device.execute_command_lists(&mut [draw, sample]);

    let submissions = device.queue().log().submissions();
    assert_eq!(submissions.len(), 1);
    let lists = &submissions[0].lists;
    assert_eq!(lists.len(), 3);
    assert!(lists[0].transitions.is_empty());
    assert_eq!(
        lists[1].transitions,
        vec![Transition::Texture {
            texture: texture_id(&target),
            range: full(&target),
            states: ResourceState::RENDER_TARGET..ResourceState::PIXEL_SHADER_RESOURCE,
        }]
    );
    assert!(lists[2].transitions.is_empty());
    assert!(lists[0].list < lists[2].list);

    assert_eq!(device.queue().log().signals(), vec![1]);
    assert_eq!(
        target.state_tracker().resource_state(),
        ResourceState::PRESENT
    );
}

#[test]
fn undeclared_transitions_patch_from_global() {
    let mut device = device();
    let staging = buffer(&device, "staging", 64, pmt::MemoryKind::Default);

    let mut list = device.create_command_list(Some("upload")).unwrap();
    list.resource_barrier(&[BarrierRequest {
        resource: &staging,
        range: None,
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_DEST,
    }]);
    list.close();

    device.execute_command_lists(&mut [list]);

    let submissions = device.queue().log().submissions();
    assert_eq!(submissions[0].lists.len(), 2);
    assert_eq!(
        submissions[0].lists[0].transitions,
        vec![Transition::Buffer {
            buffer: buffer_id(&staging),
            states: ResourceState::COMMON..ResourceState::COPY_DEST,
        }]
    );
    assert!(submissions[0].lists[1].transitions.is_empty());
    assert_eq!(
        staging.state_tracker().resource_state(),
        ResourceState::COPY_DEST
    );
}

#[test]
fn known_local_state_barriers_ride_their_own_list() {
    let mut device = device();
    let scratch = buffer(&device, "scratch", 64, pmt::MemoryKind::Default);

    let mut list = device.create_command_list(Some("two-step")).unwrap();
    list.resource_barrier(&[BarrierRequest {
        resource: &scratch,
        range: None,
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_DEST,
    }]);
    // The local tracker now knows the state, so this one is encoded
    // directly into the list instead of being queued.
    list.resource_barrier(&[BarrierRequest {
        resource: &scratch,
        range: None,
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_SOURCE,
    }]);
    list.close();

    device.execute_command_lists(&mut [list]);

    let submissions = device.queue().log().submissions();
    let lists = &submissions[0].lists;
    assert_eq!(lists.len(), 2);
    assert_eq!(
        lists[0].transitions,
        vec![Transition::Buffer {
            buffer: buffer_id(&scratch),
            states: ResourceState::COMMON..ResourceState::COPY_DEST,
        }]
    );
    assert_eq!(
        lists[1].transitions,
        vec![Transition::Buffer {
            buffer: buffer_id(&scratch),
            states: ResourceState::COPY_DEST..ResourceState::COPY_SOURCE,
        }]
    );
    assert_eq!(
        scratch.state_tracker().resource_state(),
        ResourceState::COPY_SOURCE
    );
}

#[test]
fn subresource_windows_resolve_per_cell() {
    let mut device = device();
    let target = texture(&device, "mips", 2, ResourceState::COMMON);

    let mut first = device.create_command_list(Some("mip 0")).unwrap();
    first.resource_barrier(&[BarrierRequest {
        resource: &target,
        range: Some(SubresourceRange {
            mips: 0..1,
            layers: 0..1,
        }),
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_DEST,
    }]);
    first.close();

    let mut second = device.create_command_list(Some("mip 1")).unwrap();
    second.resource_barrier(&[BarrierRequest {
        resource: &target,
        range: Some(SubresourceRange {
            mips: 1..2,
            layers: 0..1,
        }),
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_SOURCE,
    }]);
    second.close();

    device.execute_command_lists(&mut [first, second]);

    let submissions = device.queue().log().submissions();
    let lists = &submissions[0].lists;
    assert_eq!(lists.len(), 4);
    assert_eq!(
        lists[0].transitions,
        vec![Transition::Texture {
            texture: texture_id(&target),
            range: SubresourceRange {
                mips: 0..1,
                layers: 0..1,
            },
            states: ResourceState::COMMON..ResourceState::COPY_DEST,
        }]
    );
    assert_eq!(
        lists[2].transitions,
        vec![Transition::Texture {
            texture: texture_id(&target),
            range: SubresourceRange {
                mips: 1..2,
                layers: 0..1,
            },
            states: ResourceState::COMMON..ResourceState::COPY_SOURCE,
        }]
    );
    assert_eq!(device.queue().log().signals(), vec![1]);

    let tracker = target.state_tracker();
    assert!(!tracker.has_resource_state());
    assert_eq!(tracker.subresource_state(0, 0), ResourceState::COPY_DEST);
    assert_eq!(tracker.subresource_state(1, 0), ResourceState::COPY_SOURCE);
}

#[test]
fn view_barriers_scope_to_the_view_window() {
    let mut device = device();
    let target = texture(&device, "viewed", 4, ResourceState::COMMON);
    let view = device
        .create_view(
            &target,
            &prism_core::resource::ViewDescriptor {
                base_mip_level: 1,
                mip_level_count: NonZeroU32::new(2),
                ..prism_core::resource::ViewDescriptor::new(pmt::ViewKind::Texture)
            },
        )
        .unwrap();

    let mut list = device.create_command_list(Some("window")).unwrap();
    list.view_barrier(&view, ResourceState::PIXEL_SHADER_RESOURCE);
    list.close();

    device.execute_command_lists(&mut [list]);

    let submissions = device.queue().log().submissions();
    let patch = &submissions[0].lists[0].transitions;
    assert_eq!(patch.len(), 2);
    for (transition, mip) in patch.iter().zip(1u32..) {
        assert_eq!(
            *transition,
            Transition::Texture {
                texture: texture_id(&target),
                range: SubresourceRange {
                    mips: mip..mip + 1,
                    layers: 0..1,
                },
                states: ResourceState::COMMON..ResourceState::PIXEL_SHADER_RESOURCE,
            }
        );
    }

    let tracker = target.state_tracker();
    assert_eq!(tracker.subresource_state(0, 0), ResourceState::COMMON);
    assert_eq!(
        tracker.subresource_state(1, 0),
        ResourceState::PIXEL_SHADER_RESOURCE
    );
    assert_eq!(
        tracker.subresource_state(2, 0),
        ResourceState::PIXEL_SHADER_RESOURCE
    );
    assert_eq!(tracker.subresource_state(3, 0), ResourceState::COMMON);
}

#[test]
fn copies_barrier_their_operands() {
    let mut device = device();
    let upload = buffer(&device, "upload", 64, pmt::MemoryKind::Upload);
    let storage = buffer(&device, "storage", 64, pmt::MemoryKind::Default);

    let data = [7u8, 6, 5, 4, 3, 2, 1, 0];
    device.write_buffer(&upload, 0, &data).unwrap();

    let mut list = device.create_command_list(Some("transfer")).unwrap();
    list.copy_buffer_to_buffer(&upload, 0, &storage, 0, pmt::BufferSize::new(8).unwrap());
    list.close();

    device.execute_command_lists(&mut [list]);

    let submissions = device.queue().log().submissions();
    let lists = &submissions[0].lists;
    assert_eq!(lists.len(), 2);
    assert_eq!(
        lists[0].transitions,
        vec![
            Transition::Buffer {
                buffer: buffer_id(&upload),
                states: ResourceState::GENERIC_READ..ResourceState::COPY_SOURCE,
            },
            Transition::Buffer {
                buffer: buffer_id(&storage),
                states: ResourceState::COMMON..ResourceState::COPY_DEST,
            },
        ]
    );

    match *storage.raw() {
        prism_core::resource::RawResource::Buffer(ref raw) => {
            assert_eq!(&raw.contents()[..8], &data);
        }
        _ => panic!("not a buffer"),
    }
    assert_eq!(
        upload.state_tracker().resource_state(),
        ResourceState::COPY_SOURCE
    );
    assert_eq!(
        storage.state_tracker().resource_state(),
        ResourceState::COPY_DEST
    );
}

#[test]
fn scratch_lists_are_reused_once_the_fence_clears() {
    let mut device = device();
    let first_target = buffer(&device, "first", 16, pmt::MemoryKind::Default);
    let second_target = buffer(&device, "second", 16, pmt::MemoryKind::Default);

    let mut first = device.create_command_list(Some("first")).unwrap();
    first.resource_barrier(&[BarrierRequest {
        resource: &first_target,
        range: None,
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_DEST,
    }]);
    first.close();
    device.execute_command_lists(&mut [first]);

    let mut second = device.create_command_list(Some("second")).unwrap();
    second.resource_barrier(&[BarrierRequest {
        resource: &second_target,
        range: None,
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_DEST,
    }]);
    second.close();
    device.execute_command_lists(&mut [second]);

    let submissions = device.queue().log().submissions();
    assert_eq!(submissions.len(), 2);
    // The null fence completes instantly, so the second submission must
    // pick its patch list out of the pool instead of creating one.
    assert_eq!(submissions[0].lists[0].list, submissions[1].lists[0].list);
    assert_eq!(device.queue().log().signals(), vec![1, 2]);
    assert_eq!(device.last_completed(), 2);
}

#[test]
fn resolved_lists_can_be_reset_and_rerecorded() {
    let mut device = device();
    let target = buffer(&device, "again", 16, pmt::MemoryKind::Default);

    let mut lists = [device.create_command_list(Some("again")).unwrap()];
    lists[0].resource_barrier(&[BarrierRequest {
        resource: &target,
        range: None,
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_DEST,
    }]);
    lists[0].close();
    device.execute_command_lists(&mut lists);

    lists[0].reset();
    lists[0].resource_barrier(&[BarrierRequest {
        resource: &target,
        range: None,
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_DEST,
    }]);
    lists[0].close();
    device.execute_command_lists(&mut lists);

    let submissions = device.queue().log().submissions();
    assert_eq!(submissions.len(), 2);
    // Global state already matches, so the resubmission needs no patch.
    assert_eq!(submissions[1].lists.len(), 1);
    assert_eq!(device.queue().log().signals(), vec![1]);
}

#[test]
#[should_panic(expected = "no known state")]
fn uninitialized_resources_cannot_be_transitioned() {
    let mut device = device();
    let mystery = texture(&device, "mystery", 1, ResourceState::UNKNOWN);

    let mut list = device.create_command_list(Some("mystery")).unwrap();
    list.resource_barrier(&[BarrierRequest {
        resource: &mystery,
        range: None,
        state_before: ResourceState::UNKNOWN,
        state_after: ResourceState::COPY_DEST,
    }]);
    list.close();

    device.execute_command_lists(&mut [list]);
}

#[test]
#[should_panic(expected = "still recording")]
fn open_lists_cannot_be_submitted() {
    let mut device = device();
    let list = device.create_command_list(Some("open")).unwrap();
    device.execute_command_lists(&mut [list]);
}
