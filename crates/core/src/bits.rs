//! MSB-first bit reader with Exponential-Golomb decoding (H.264 §9.1).

use crate::error::{Result, RtspError};

/// Reads a byte slice bit by bit, most significant bit first.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Position in bits from the start of `data`.
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bits left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.position
    }

    /// Read `bits` bits (1 to 31) as an unsigned value.
    pub fn read_bits(&mut self, bits: u32) -> Result<u32> {
        if bits == 0 || bits > 31 {
            return Err(RtspError::BitRead { bits });
        }
        if self.remaining() < bits as usize {
            return Err(RtspError::EndOfData);
        }

        let mut value = 0u32;
        for _ in 0..bits {
            let byte = self.data[self.position / 8];
            let bit = (byte >> (7 - self.position % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.position += 1;
        }
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn skip_bits(&mut self, bits: usize) -> Result<()> {
        if self.remaining() < bits {
            return Err(RtspError::EndOfData);
        }
        self.position += bits;
        Ok(())
    }

    /// Unsigned Exp-Golomb code, `ue(v)`.
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut zeros = 0u32;
        while !self.read_bit()? {
            zeros += 1;
            if zeros >= 31 {
                return Err(RtspError::ExpGolomb);
            }
        }
        if zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(zeros)?;
        Ok(((1 << zeros) | suffix) - 1)
    }

    /// Signed Exp-Golomb code, `se(v)`.
    pub fn read_se(&mut self) -> Result<i32> {
        let k = self.read_ue()?;
        Ok(if k % 2 == 1 {
            k.div_ceil(2) as i32
        } else {
            -((k / 2) as i32)
        })
    }

    pub fn skip_ue(&mut self) -> Result<()> {
        self.read_ue().map(|_| ())
    }

    pub fn skip_se(&mut self) -> Result<()> {
        self.read_se().map(|_| ())
    }
}
