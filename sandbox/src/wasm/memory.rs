//! Bounds-checked access to guest linear memory and the host bump allocator.
//!
//! Every pointer/length pair coming from the guest is validated against the
//! current memory size before it is touched.

use wasmtime::{AsContext, AsContextMut, Memory};

use super::GuestState;
use crate::error::SandboxError;

/// Wasm page size in bytes.
pub const PAGE_SIZE: usize = 65536;

fn bad_pointer(ptr: i32, len: i64) -> SandboxError {
    SandboxError::MemoryError(format!("pointer out of bounds: ptr={} len={}", ptr, len))
}

/// Read `len` bytes from guest memory at `ptr`.
pub fn read_bytes(mem: &[u8], ptr: i32, len: i32) -> Result<Vec<u8>, SandboxError> {
    if ptr < 0 || len < 0 {
        return Err(bad_pointer(ptr, len.into()));
    }
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| bad_pointer(ptr, len.into()))?;
    if end > mem.len() {
        return Err(bad_pointer(ptr, len.into()));
    }
    Ok(mem[start..end].to_vec())
}

/// Write `data` to guest memory at `ptr`.
pub fn write_bytes(mem: &mut [u8], ptr: i32, data: &[u8]) -> Result<(), SandboxError> {
    let len = data.len() as i64;
    if ptr < 0 {
        return Err(bad_pointer(ptr, len));
    }
    let start = ptr as usize;
    let end = start
        .checked_add(data.len())
        .ok_or_else(|| bad_pointer(ptr, len))?;
    if end > mem.len() {
        return Err(bad_pointer(ptr, len));
    }
    mem[start..end].copy_from_slice(data);
    Ok(())
}

fn align8(size: usize) -> usize {
    (size + 7) & !7
}

/// Host-side bump allocator inside guest memory.
///
/// The region is reserved right after instantiation. There is no free: the
/// store lives for one run.
#[derive(Debug, Clone, Default)]
pub struct HostAllocator {
    /// Base address of the region.
    pub base: usize,
    /// Offset of the next allocation from `base`.
    pub bump: usize,
    /// Bytes available in the region.
    pub capacity: usize,
}

impl HostAllocator {
    pub fn new(base: usize, capacity: usize) -> Self {
        Self {
            base,
            bump: 0,
            capacity,
        }
    }

    /// Plan an allocation: `(ptr, new_bump, new_capacity, grow_pages)`.
    ///
    /// A non-zero `grow_pages` means memory must grow before `ptr` is written.
    pub fn compute_alloc(&self, size: usize) -> (usize, usize, usize, u64) {
        let aligned = align8(size.max(1));
        let ptr = self.base + self.bump;
        let new_bump = self.bump + aligned;
        if new_bump <= self.capacity {
            (ptr, new_bump, self.capacity, 0)
        } else {
            let extra_pages = (new_bump - self.capacity).div_ceil(PAGE_SIZE);
            let new_capacity = self.capacity + extra_pages * PAGE_SIZE;
            (ptr, new_bump, new_capacity, extra_pages as u64)
        }
    }

    pub fn commit(&mut self, new_bump: usize, new_capacity: usize) {
        self.bump = new_bump;
        self.capacity = new_capacity;
    }

    /// Restart the region at `memory_len` if the guest has grown memory past
    /// its end. Growing in place would hand out the guest's own pages.
    pub fn reattach(&mut self, memory_len: usize) {
        if self.base + self.capacity != memory_len {
            *self = Self::new(memory_len, 0);
        }
    }
}

/// Copy `data` into the host region and return its guest address.
///
/// Growth goes through the store's resource limiter like any other growth.
pub fn alloc_and_write(
    mut store: impl AsContextMut<Data = GuestState>,
    memory: &Memory,
    data: &[u8],
) -> Result<i32, SandboxError> {
    let mut region = store.as_context().data().host_alloc.clone();
    let (mut ptr, mut new_bump, mut new_cap, mut grow_pages) = region.compute_alloc(data.len());

    if grow_pages > 0 {
        region.reattach(memory.data_size(&store));
        (ptr, new_bump, new_cap, grow_pages) = region.compute_alloc(data.len());
        memory
            .grow(&mut store, grow_pages)
            .map_err(|e| SandboxError::MemoryError(format!("host allocation grow: {}", e)))?;
    }

    let guest_ptr =
        i32::try_from(ptr).map_err(|_| SandboxError::MemoryError("host region beyond 2 GiB".into()))?;
    write_bytes(memory.data_mut(&mut store), guest_ptr, data)?;
    region.commit(new_bump, new_cap);
    store.as_context_mut().data_mut().host_alloc = region;
    Ok(guest_ptr)
}
