//! 8-bit ALU of the puc8 processor.
//!
//! C `int` is 8 bits wide on this target, so every operation wraps modulo
//! 256 and leaves zero/carry flags behind the way the hardware does.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        const ZERO = 0b01;
        const CARRY = 0b10;
    }
}

/// Unsigned relation between two operands, read from the flags of `a - b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison(Flags);

impl Comparison {
    pub fn is_eq(self) -> bool {
        self.0.contains(Flags::ZERO)
    }

    pub fn is_ne(self) -> bool {
        !self.is_eq()
    }

    /// Borrow happened, so `a < b`.
    pub fn is_lt(self) -> bool {
        !self.0.contains(Flags::CARRY)
    }

    pub fn is_ge(self) -> bool {
        !self.is_lt()
    }

    pub fn is_gt(self) -> bool {
        self.is_ge() && self.is_ne()
    }

    pub fn is_le(self) -> bool {
        self.is_lt() || self.is_eq()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Alu {
    flags: Flags,
}

impl Alu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Latch flags from a 9-bit intermediate result and truncate it.
    fn latch(&mut self, res: u16) -> u8 {
        self.flags = Flags::empty();
        self.flags.set(Flags::ZERO, res & 0xFF == 0);
        self.flags.set(Flags::CARRY, res & 0x100 != 0);
        (res & 0xFF) as u8
    }

    pub fn add(&mut self, a: u8, b: u8) -> u8 {
        self.latch(a as u16 + b as u16)
    }

    /// `a + (256 - b)`: carry set means no borrow.
    pub fn sub(&mut self, a: u8, b: u8) -> u8 {
        self.latch(a as u16 + (256 - b as u16))
    }

    /// The shifter moves one bit per instruction; a count of zero leaves
    /// the operand alone and larger counts repeat the instruction.
    pub fn shl(&mut self, a: u8, count: u8) -> u8 {
        let mut res = self.latch(a as u16);
        for _ in 0..count {
            res = self.latch((res as u16) << 1);
        }
        res
    }

    pub fn shr(&mut self, a: u8, count: u8) -> u8 {
        let mut res = self.latch(a as u16);
        for _ in 0..count {
            res = self.latch((res as u16) >> 1);
        }
        res
    }

    pub fn and(&mut self, a: u8, b: u8) -> u8 {
        self.latch((a & b) as u16)
    }

    pub fn orr(&mut self, a: u8, b: u8) -> u8 {
        self.latch((a | b) as u16)
    }

    pub fn eor(&mut self, a: u8, b: u8) -> u8 {
        self.latch((a ^ b) as u16)
    }

    /// `++x`
    pub fn inc(&mut self, a: u8) -> u8 {
        self.add(a, 1)
    }

    /// `--x`
    pub fn dec(&mut self, a: u8) -> u8 {
        self.sub(a, 1)
    }

    pub fn compare(&mut self, a: u8, b: u8) -> Comparison {
        self.sub(a, b);
        Comparison(self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_wraps_and_sets_carry() {
        let mut alu = Alu::new();
        assert_eq!(alu.add(200, 100), 44);
        assert!(alu.flags().contains(Flags::CARRY));
        assert_eq!(alu.add(255, 1), 0);
        assert_eq!(alu.flags(), Flags::ZERO | Flags::CARRY);
    }

    #[test]
    fn test_sub_carry_means_no_borrow() {
        let mut alu = Alu::new();
        assert_eq!(alu.sub(13, 12), 1);
        assert!(alu.flags().contains(Flags::CARRY));
        assert_eq!(alu.sub(12, 13), 255);
        assert!(!alu.flags().contains(Flags::CARRY));
        assert_eq!(alu.sub(7, 0), 7);
        assert!(alu.flags().contains(Flags::CARRY));
    }

    #[test]
    fn test_compare_relations() {
        let mut alu = Alu::new();
        let c = alu.compare(12, 13);
        assert!(c.is_lt() && c.is_le() && c.is_ne());
        assert!(!c.is_gt() && !c.is_ge() && !c.is_eq());

        let c = alu.compare(13, 12);
        assert!(c.is_gt() && c.is_ge() && c.is_ne());

        let c = alu.compare(12, 12);
        assert!(c.is_eq() && c.is_le() && c.is_ge());
        assert!(!c.is_lt() && !c.is_gt());

        let c = alu.compare(0, 255);
        assert!(c.is_lt());
    }

    #[test]
    fn test_shift_counts() {
        let mut alu = Alu::new();
        assert_eq!(alu.shl(12, 0), 12);
        assert_eq!(alu.shl(12, 1), 24);
        assert_eq!(alu.shl(12, 5), 128);
        assert_eq!(alu.shl(0x80, 1), 0);
        assert_eq!(alu.flags(), Flags::ZERO | Flags::CARRY);
        assert_eq!(alu.shr(12, 1), 6);
        assert_eq!(alu.shr(12, 4), 0);
    }

    #[test]
    fn test_inc_dec_wrap() {
        let mut alu = Alu::new();
        assert_eq!(alu.inc(255), 0);
        assert_eq!(alu.dec(0), 255);
    }
}
