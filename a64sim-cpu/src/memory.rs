// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Memory access trait and the flat little-endian memory image.
//!
//! The trait abstracts the byte store so the core can read and write the
//! emulated image without owning it. All multi-byte accesses are
//! little-endian; unaligned accesses are tolerated here, alignment rules
//! for atomics are enforced by the load/store unit.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use a64sim_common::VAddr;

/// Memory access error.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFault {
    #[error("unmapped address: 0x{0:016X}")]
    Unmapped(VAddr),
    #[error("misaligned access at 0x{0:016X}")]
    Misaligned(VAddr),
}

/// Typed little-endian reads and writes over the emulated image.
pub trait MemoryAccess {
    fn read_u8(&self, addr: VAddr) -> Result<u8, MemoryFault>;
    fn read_u16(&self, addr: VAddr) -> Result<u16, MemoryFault>;
    fn read_u32(&self, addr: VAddr) -> Result<u32, MemoryFault>;
    fn read_u64(&self, addr: VAddr) -> Result<u64, MemoryFault>;
    fn read_u128(&self, addr: VAddr) -> Result<u128, MemoryFault>;
    fn write_u8(&mut self, addr: VAddr, val: u8) -> Result<(), MemoryFault>;
    fn write_u16(&mut self, addr: VAddr, val: u16) -> Result<(), MemoryFault>;
    fn write_u32(&mut self, addr: VAddr, val: u32) -> Result<(), MemoryFault>;
    fn write_u64(&mut self, addr: VAddr, val: u64) -> Result<(), MemoryFault>;
    fn write_u128(&mut self, addr: VAddr, val: u128) -> Result<(), MemoryFault>;

    /// Size-dispatched read of 1 << `size_log2` bytes, zero-extended.
    fn read_sized(&self, addr: VAddr, size_log2: u8) -> Result<u64, MemoryFault> {
        match size_log2 {
            0 => self.read_u8(addr).map(u64::from),
            1 => self.read_u16(addr).map(u64::from),
            2 => self.read_u32(addr).map(u64::from),
            3 => self.read_u64(addr),
            _ => Err(MemoryFault::Unmapped(addr)),
        }
    }

    /// Size-dispatched write of 1 << `size_log2` bytes.
    fn write_sized(&mut self, addr: VAddr, val: u64, size_log2: u8) -> Result<(), MemoryFault> {
        match size_log2 {
            0 => self.write_u8(addr, val as u8),
            1 => self.write_u16(addr, val as u16),
            2 => self.write_u32(addr, val as u32),
            3 => self.write_u64(addr, val),
            _ => Err(MemoryFault::Unmapped(addr)),
        }
    }
}

/// A flat byte image starting at a base address. This is the host-provided
/// memory store used by tests and standalone harnesses.
pub struct FlatMemory {
    base: VAddr,
    data: Vec<u8>,
}

impl FlatMemory {
    pub fn new(base: VAddr, size: usize) -> Self {
        FlatMemory { base, data: vec![0; size] }
    }

    pub fn base(&self) -> VAddr {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Place a 4-byte instruction word at `addr`.
    pub fn write_inst(&mut self, addr: VAddr, inst: u32) {
        self.write_u32(addr, inst).expect("instruction address in range");
    }

    /// Copy raw bytes into the image.
    pub fn load_bytes(&mut self, addr: VAddr, bytes: &[u8]) {
        let off = self.offset(addr, bytes.len()).expect("load address in range");
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
    }

    fn offset(&self, addr: VAddr, len: usize) -> Result<usize, MemoryFault> {
        let off = addr.wrapping_sub(self.base) as usize;
        if addr < self.base || off.checked_add(len).map_or(true, |end| end > self.data.len()) {
            return Err(MemoryFault::Unmapped(addr));
        }
        Ok(off)
    }
}

impl MemoryAccess for FlatMemory {
    fn read_u8(&self, addr: VAddr) -> Result<u8, MemoryFault> {
        let off = self.offset(addr, 1)?;
        Ok(self.data[off])
    }

    fn read_u16(&self, addr: VAddr) -> Result<u16, MemoryFault> {
        let off = self.offset(addr, 2)?;
        Ok(LittleEndian::read_u16(&self.data[off..]))
    }

    fn read_u32(&self, addr: VAddr) -> Result<u32, MemoryFault> {
        let off = self.offset(addr, 4)?;
        Ok(LittleEndian::read_u32(&self.data[off..]))
    }

    fn read_u64(&self, addr: VAddr) -> Result<u64, MemoryFault> {
        let off = self.offset(addr, 8)?;
        Ok(LittleEndian::read_u64(&self.data[off..]))
    }

    fn read_u128(&self, addr: VAddr) -> Result<u128, MemoryFault> {
        let off = self.offset(addr, 16)?;
        Ok(LittleEndian::read_u128(&self.data[off..]))
    }

    fn write_u8(&mut self, addr: VAddr, val: u8) -> Result<(), MemoryFault> {
        let off = self.offset(addr, 1)?;
        self.data[off] = val;
        Ok(())
    }

    fn write_u16(&mut self, addr: VAddr, val: u16) -> Result<(), MemoryFault> {
        let off = self.offset(addr, 2)?;
        LittleEndian::write_u16(&mut self.data[off..], val);
        Ok(())
    }

    fn write_u32(&mut self, addr: VAddr, val: u32) -> Result<(), MemoryFault> {
        let off = self.offset(addr, 4)?;
        LittleEndian::write_u32(&mut self.data[off..], val);
        Ok(())
    }

    fn write_u64(&mut self, addr: VAddr, val: u64) -> Result<(), MemoryFault> {
        let off = self.offset(addr, 8)?;
        LittleEndian::write_u64(&mut self.data[off..], val);
        Ok(())
    }

    fn write_u128(&mut self, addr: VAddr, val: u128) -> Result<(), MemoryFault> {
        let off = self.offset(addr, 16)?;
        LittleEndian::write_u128(&mut self.data[off..], val);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_widths() {
        let mut mem = FlatMemory::new(0x1000, 0x100);
        mem.write_u8(0x1000, 0xAB).unwrap();
        assert_eq!(mem.read_u8(0x1000).unwrap(), 0xAB);
        mem.write_u16(0x1010, 0xBEEF).unwrap();
        assert_eq!(mem.read_u16(0x1010).unwrap(), 0xBEEF);
        mem.write_u32(0x1020, 0xDEAD_BEEF).unwrap();
        assert_eq!(mem.read_u32(0x1020).unwrap(), 0xDEAD_BEEF);
        mem.write_u64(0x1030, 0x0123_4567_89AB_CDEF).unwrap();
        assert_eq!(mem.read_u64(0x1030).unwrap(), 0x0123_4567_89AB_CDEF);
        mem.write_u128(0x1040, 0x0011_2233_4455_6677_8899_AABB_CCDD_EEFF).unwrap();
        assert_eq!(
            mem.read_u128(0x1040).unwrap(),
            0x0011_2233_4455_6677_8899_AABB_CCDD_EEFF
        );
    }

    #[test]
    fn test_little_endian_layout() {
        let mut mem = FlatMemory::new(0, 16);
        mem.write_u32(0, 0x0403_0201).unwrap();
        assert_eq!(mem.read_u8(0).unwrap(), 0x01);
        assert_eq!(mem.read_u8(3).unwrap(), 0x04);
    }

    #[test]
    fn test_unaligned_tolerated() {
        let mut mem = FlatMemory::new(0, 32);
        mem.write_u64(3, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.read_u64(3).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_out_of_range_faults() {
        let mut mem = FlatMemory::new(0x1000, 0x10);
        assert_eq!(mem.read_u8(0xFFF), Err(MemoryFault::Unmapped(0xFFF)));
        assert_eq!(mem.read_u32(0x100E), Err(MemoryFault::Unmapped(0x100E)));
        assert_eq!(mem.write_u64(0x1009, 0), Err(MemoryFault::Unmapped(0x1009)));
    }

    #[test]
    fn test_sized_dispatch() {
        let mut mem = FlatMemory::new(0, 32);
        mem.write_sized(0, 0xFFFF_FFFF_FFFF_FFFF, 1).unwrap();
        assert_eq!(mem.read_sized(0, 1).unwrap(), 0xFFFF);
        assert_eq!(mem.read_sized(2, 0).unwrap(), 0);
    }
}
