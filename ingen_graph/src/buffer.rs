//! Typed, pooled buffers, spec.md §4.2 "Buffer and BufferFactory".
//!
//! Grounded on `knaster_graph::buffer_allocator::BufferAllocator`'s
//! two-phase allocation (request by size, then materialize pointers), but
//! generalized from "one big scratch allocation per compile" to "per-type
//! free-lists of long-lived, atomically refcounted buffers", since unlike
//! knaster's per-cycle scratch, a port's buffers persist across cycles and
//! are shared structurally (spec.md §4.2: "multiple ports can legitimately
//! reference the same pooled buffer within a cycle").

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ingen_primitives::{PortBuffer, SequenceBuffer};
use parking_lot::Mutex;

use crate::port::PortType;

struct AudioStorage {
    samples: Box<[f32]>,
}
struct ControlStorage {
    value: f32,
}
struct SequenceStorage {
    seq: SequenceBuffer,
}

enum Storage {
    Audio(AudioStorage),
    Control(ControlStorage),
    Sequence(SequenceStorage),
}

struct Inner {
    storage: Storage,
    refcount: AtomicUsize,
}

/// An atomically refcounted handle to one pooled buffer (spec.md §4.2:
/// "Buffer references are atomically-refcounted smart handles; release on
/// zero-count returns to the pool").
///
/// Cloning increments the refcount; dropping the last clone returns the
/// buffer to its owning [`BufferFactory`] free-list.
pub struct Buffer {
    inner: *mut Inner,
    factory: Arc<FactoryShared>,
    capacity: usize,
    ty: PortType,
}
// SAFETY: a Buffer's pointee is only ever mutated through `&mut` access
// gated by the owning Port during its own pre_process/post_process, never
// concurrently from two threads at once.
unsafe impl Send for Buffer {}

impl Buffer {
    pub fn ty(&self) -> PortType {
        self.ty
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    fn inner(&self) -> &Inner {
        unsafe { &*self.inner }
    }
    fn inner_mut(&mut self) -> &mut Inner {
        unsafe { &mut *self.inner }
    }

    pub fn clear(&mut self) {
        match &mut self.inner_mut().storage {
            Storage::Audio(a) => a.samples.fill(0.0),
            Storage::Control(c) => c.value = 0.0,
            Storage::Sequence(s) => s.seq.clear(),
        }
    }
    pub fn set_block(&mut self, value: f32, start: usize, end: usize) {
        if let Storage::Audio(a) = &mut self.inner_mut().storage {
            a.samples[start..end].fill(value);
        }
    }
    pub fn copy_from(&mut self, src: &Buffer, start: usize, end: usize) {
        match (&mut self.inner_mut().storage, &src.inner().storage) {
            (Storage::Audio(dst), Storage::Audio(s)) => {
                dst.samples[start..end].copy_from_slice(&s.samples[start..end]);
            }
            (Storage::Control(dst), Storage::Control(s)) => dst.value = s.value,
            _ => {}
        }
    }
    /// Additive mix, the audio/cv port-combination rule (spec.md §4.3).
    pub fn mix_add(&mut self, src: &Buffer) {
        match (&mut self.inner_mut().storage, &src.inner().storage) {
            (Storage::Audio(dst), Storage::Audio(s)) => {
                for (d, s) in dst.samples.iter_mut().zip(s.samples.iter()) {
                    *d += *s;
                }
            }
            (Storage::Control(dst), Storage::Control(s)) => dst.value = s.value,
            _ => {}
        }
    }
    pub fn append_event(&mut self, frame: u32, ty: u32, body: &[u8]) -> bool {
        if let Storage::Sequence(s) = &mut self.inner_mut().storage {
            s.seq.append_event(frame, ty, body).is_ok()
        } else {
            false
        }
    }
    pub fn control_value(&self) -> f32 {
        match &self.inner().storage {
            Storage::Control(c) => c.value,
            _ => 0.0,
        }
    }
    pub fn set_control_value(&mut self, v: f32) {
        if let Storage::Control(c) = &mut self.inner_mut().storage {
            c.value = v;
        }
    }
    pub fn audio_samples(&self) -> &[f32] {
        match &self.inner().storage {
            Storage::Audio(a) => &a.samples,
            _ => &[],
        }
    }
    /// Mutable counterpart to [`Self::audio_samples`], for a host driver
    /// copying device samples directly into a root port's buffer.
    pub fn audio_samples_mut(&mut self) -> &mut [f32] {
        match &mut self.inner_mut().storage {
            Storage::Audio(a) => &mut a.samples,
            _ => &mut [],
        }
    }
    pub fn inner_events(&self) -> &[ingen_primitives::RawEvent] {
        match &self.inner().storage {
            Storage::Sequence(s) => s.seq.events(),
            _ => &[],
        }
    }
    /// Constructs the raw view a `BlockImpl::connect_port` call receives.
    pub fn as_port_buffer(&mut self) -> PortBuffer {
        match &mut self.inner_mut().storage {
            Storage::Audio(a) => PortBuffer::Audio {
                ptr: a.samples.as_mut_ptr(),
                nframes: a.samples.len(),
            },
            Storage::Control(c) => PortBuffer::Control(&mut c.value),
            Storage::Sequence(s) => PortBuffer::Sequence(&mut s.seq),
        }
    }
}
impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.inner().refcount.fetch_add(1, Ordering::AcqRel);
        Buffer {
            inner: self.inner,
            factory: self.factory.clone(),
            capacity: self.capacity,
            ty: self.ty,
        }
    }
}
impl Drop for Buffer {
    fn drop(&mut self) {
        if self.inner().refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.factory.release(self.ty, self.capacity, self.inner);
        }
    }
}

struct FreeList {
    ty: PortType,
    capacity: usize,
    slots: Mutex<Vec<*mut Inner>>,
}
// SAFETY: slots are only ever handed out as a single owning Buffer at a
// time; access is serialized by the Mutex.
unsafe impl Send for FreeList {}
unsafe impl Sync for FreeList {}

struct FactoryShared {
    free_lists: Mutex<Vec<FreeList>>,
}
impl FactoryShared {
    fn release(&self, ty: PortType, capacity: usize, ptr: *mut Inner) {
        let lists = self.free_lists.lock();
        for list in lists.iter() {
            if list.ty == ty && list.capacity == capacity {
                list.slots.lock().push(ptr);
                return;
            }
        }
        // No matching free-list (factory already torn down); drop in place.
        drop(lists);
        unsafe { drop(Box::from_raw(ptr)) };
    }
}

/// Owns the per-type, per-capacity free-lists buffers are drawn from and
/// returned to (spec.md §4.2 "BufferFactory").
///
/// `acquire` is wait-free when the pool has a free slot, which pre_process
/// guarantees by growing pools ahead of when the audio thread will need
/// them (spec.md §4.2: "Allocation growth happens only in pre-process").
pub struct BufferFactory {
    shared: Arc<FactoryShared>,
}
impl Default for BufferFactory {
    fn default() -> Self {
        Self::new()
    }
}
impl BufferFactory {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(FactoryShared {
                free_lists: Mutex::new(Vec::new()),
            }),
        }
    }

    fn find_or_create_list<'a>(lists: &'a mut Vec<FreeList>, ty: PortType, capacity: usize) -> &'a FreeList {
        if let Some(i) = lists.iter().position(|l| l.ty == ty && l.capacity == capacity) {
            return &lists[i];
        }
        lists.push(FreeList {
            ty,
            capacity,
            slots: Mutex::new(Vec::new()),
        });
        lists.last().unwrap()
    }

    fn new_storage(ty: PortType, capacity: usize) -> Storage {
        match ty {
            PortType::Audio | PortType::Cv => Storage::Audio(AudioStorage {
                samples: vec![0.0; capacity].into_boxed_slice(),
            }),
            PortType::Control => Storage::Control(ControlStorage { value: 0.0 }),
            PortType::Sequence => Storage::Sequence(SequenceStorage {
                seq: SequenceBuffer::with_capacity(capacity),
            }),
        }
    }

    /// Tops up the free-list for `(ty, capacity)` with `count` fresh
    /// buffers. Called only off the audio thread (pre_process).
    pub fn prefill(&self, ty: PortType, capacity: usize, count: usize) {
        let mut lists = self.shared.free_lists.lock();
        let list = Self::find_or_create_list(&mut lists, ty, capacity);
        let mut slots = list.slots.lock();
        for _ in 0..count {
            let inner = Box::into_raw(Box::new(Inner {
                storage: Self::new_storage(ty, capacity),
                refcount: AtomicUsize::new(0),
            }));
            slots.push(inner);
        }
    }

    /// Takes a buffer from the pool, growing it first if empty. Growing
    /// allocates, so only call this off the audio thread; the audio thread
    /// only ever sees buffers already handed to a connected port.
    pub fn acquire(&self, ty: PortType, capacity: usize) -> Buffer {
        let mut lists = self.shared.free_lists.lock();
        let list_idx = {
            let list = Self::find_or_create_list(&mut lists, ty, capacity);
            let mut slots = list.slots.lock();
            slots.pop()
        };
        let inner = match list_idx {
            Some(ptr) => ptr,
            None => Box::into_raw(Box::new(Inner {
                storage: Self::new_storage(ty, capacity),
                refcount: AtomicUsize::new(0),
            })),
        };
        unsafe { (*inner).refcount.store(1, Ordering::Release) };
        Buffer {
            inner,
            factory: self.shared.clone(),
            capacity,
            ty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trips_through_the_pool() {
        let factory = BufferFactory::new();
        factory.prefill(PortType::Audio, 8, 1);
        let buf = factory.acquire(PortType::Audio, 8);
        drop(buf);
        // The slot should be back in the pool; acquiring again doesn't grow.
        let _buf2 = factory.acquire(PortType::Audio, 8);
    }

    #[test]
    fn mix_add_sums_audio_samples() {
        let factory = BufferFactory::new();
        let mut a = factory.acquire(PortType::Audio, 4);
        let mut b = factory.acquire(PortType::Audio, 4);
        a.set_block(1.0, 0, 4);
        b.set_block(2.0, 0, 4);
        a.mix_add(&b);
        assert_eq!(a.audio_samples(), &[3.0; 4]);
    }

    #[test]
    fn clone_keeps_buffer_alive_until_every_handle_drops() {
        let factory = BufferFactory::new();
        let a = factory.acquire(PortType::Control, 1);
        let b = a.clone();
        drop(a);
        // b is still valid.
        assert_eq!(b.control_value(), 0.0);
    }
}
