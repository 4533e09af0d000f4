//! Byte-addressable backing stores for the memory responders.
//!
//! Every access must satisfy `offset <= addr` and
//! `addr + size <= offset + size()`. A violation is an address decode fault in
//! the stimulus and panics instead of being reported as a recoverable error.

use std::fs::OpenOptions;

use camino::Utf8Path;
use log::debug;
use memmap2::{Mmap, MmapMut};

use crate::codec::{from_bytes, to_bytes, Endian};
use crate::error::BfmResult;

pub trait BackingStore: Send {
    /// Address of the first byte.
    fn offset(&self) -> u64;

    /// Size in bytes.
    fn size(&self) -> usize;

    fn read_bytes(&self, addr: u64, size: usize) -> Vec<u8>;

    fn write_bytes(&mut self, addr: u64, data: &[u8]);

    /// Index of `addr` into the store, asserting the access is in bounds.
    fn locate(&self, addr: u64, size: usize) -> usize {
        assert!(
            addr >= self.offset(),
            "address {:#x} below store offset {:#x}",
            addr,
            self.offset()
        );
        let index = (addr - self.offset()) as usize;
        assert!(
            index + size <= self.size(),
            "access {:#x}+{} beyond store end {:#x}",
            addr,
            size,
            self.offset() + self.size() as u64
        );
        index
    }

    /// Reads `size` bytes as an integer in natural (big-endian) order.
    fn read(&self, addr: u64, size: usize) -> u128 {
        from_bytes(&self.read_bytes(addr, size), Endian::Big)
    }

    /// Reads `size` bytes with the byte at `addr` in the least significant
    /// position, as they appear on an AXI data bus.
    fn read_reverse(&self, addr: u64, size: usize) -> u128 {
        from_bytes(&self.read_bytes(addr, size), Endian::Little)
    }

    fn write(&mut self, addr: u64, data: u128, size: usize) {
        self.write_bytes(addr, &to_bytes(data, size, Endian::Big));
    }

    fn write_reverse(&mut self, addr: u64, data: u128, size: usize) {
        self.write_bytes(addr, &to_bytes(data, size, Endian::Little));
    }
}

/// Zero-initialized in-memory store.
#[derive(Debug, Clone)]
pub struct ArrayStore {
    data: Vec<u8>,
    offset: u64,
}

impl ArrayStore {
    pub fn new(size: usize, offset: u64) -> Self {
        Self {
            data: vec![0; size],
            offset,
        }
    }

    /// Resizes the store, discarding its contents.
    pub fn set_size(&mut self, size: usize) {
        self.data = vec![0; size];
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl BackingStore for ArrayStore {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn read_bytes(&self, addr: u64, size: usize) -> Vec<u8> {
        let index = self.locate(addr, size);
        self.data[index..index + size].to_vec()
    }

    fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        let index = self.locate(addr, data.len());
        self.data[index..index + data.len()].copy_from_slice(data);
    }
}

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

/// Memory-mapped file. The mapping is released when the store is dropped.
pub struct FileStore {
    mapping: Mapping,
    offset: u64,
}

impl FileStore {
    /// Maps `path` read-only. Writes panic.
    pub fn open(path: &Utf8Path, offset: u64) -> BfmResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        debug!("mapped {} read-only ({} bytes)", path, mmap.len());
        Ok(Self {
            mapping: Mapping::ReadOnly(mmap),
            offset,
        })
    }

    /// Maps `path` read-write, creating it and growing it to `size` bytes if
    /// needed.
    pub fn open_rw(path: &Utf8Path, size: usize, offset: u64) -> BfmResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < size as u64 {
            file.set_len(size as u64)?;
        }
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!("mapped {} read-write ({} bytes)", path, mmap.len());
        Ok(Self {
            mapping: Mapping::ReadWrite(mmap),
            offset,
        })
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.mapping, Mapping::ReadWrite(_))
    }

    /// Flushes outstanding writes to the file.
    pub fn flush(&self) -> BfmResult<()> {
        if let Mapping::ReadWrite(mmap) = &self.mapping {
            mmap.flush()?;
        }
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        match &self.mapping {
            Mapping::ReadOnly(mmap) => &mmap[..],
            Mapping::ReadWrite(mmap) => &mmap[..],
        }
    }
}

impl BackingStore for FileStore {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> usize {
        self.bytes().len()
    }

    fn read_bytes(&self, addr: u64, size: usize) -> Vec<u8> {
        let index = self.locate(addr, size);
        self.bytes()[index..index + size].to_vec()
    }

    fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        let index = self.locate(addr, data.len());
        match &mut self.mapping {
            Mapping::ReadWrite(mmap) => mmap[index..index + data.len()].copy_from_slice(data),
            Mapping::ReadOnly(_) => panic!("write to read-only file store at {:#x}", addr),
        }
    }
}
