//! Arithmetic/logic unit.
//!
//! Every operation is a pure function of its operands. Results carry the
//! output word together with the four status bits the control unit copies
//! into the flags register.
//!
//! Carry on `add`/`subtract` is set when the exact sum leaves the 16-bit
//! *signed* range, not on unsigned carry-out of bit 15.

use serde::{Serialize, Deserialize};

/// Output of one ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AluResult {
    pub output: i16,
    pub zero: bool,
    pub negative: bool,
    pub carry: bool,
    pub overflow: bool,
}

impl AluResult {
    /// Build a result whose Z/N bits follow from `output`.
    #[inline]
    fn from_output(output: i16, carry: bool, overflow: bool) -> Self {
        Self {
            output,
            zero: output == 0,
            negative: output < 0,
            carry,
            overflow,
        }
    }
}

/// Add two signed words.
pub fn add(a: i16, b: i16) -> AluResult {
    let sum = a as i32 + b as i32;
    let output = sum as i16;

    let carry = sum > i16::MAX as i32 || sum < i16::MIN as i32;
    let overflow = (a < 0) == (b < 0) && (output < 0) != (a < 0);

    AluResult::from_output(output, carry, overflow)
}

/// Subtract `b` from `a`, computed as `a + (-b)`.
///
/// `-i16::MIN` wraps back to `i16::MIN`, matching two's complement hardware.
#[inline]
pub fn subtract(a: i16, b: i16) -> AluResult {
    add(a, b.wrapping_neg())
}

/// Bitwise AND. Carry and overflow are always clear.
#[inline]
pub fn and_op(a: i16, b: i16) -> AluResult {
    AluResult::from_output(a & b, false, false)
}

/// Bitwise OR. Carry and overflow are always clear.
#[inline]
pub fn or_op(a: i16, b: i16) -> AluResult {
    AluResult::from_output(a | b, false, false)
}

/// Bitwise XOR. Carry and overflow are always clear.
#[inline]
pub fn xor_op(a: i16, b: i16) -> AluResult {
    AluResult::from_output(a ^ b, false, false)
}

/// Logical shift left.
///
/// For `shift` in `0..=15` the carry is bit `15 - shift` of `a`, the last
/// bit pushed out of the word. Any other amount yields 0 with carry clear.
pub fn shift_left(a: i16, shift: i16) -> AluResult {
    if !(0..=15).contains(&shift) {
        return AluResult::from_output(0, false, false);
    }

    let bits = a as u16;
    let carry = bits & (1u16 << (15 - shift)) != 0;
    let output = (bits << shift) as i16;

    AluResult::from_output(output, carry, false)
}

/// Arithmetic shift right.
///
/// For `shift` in `1..=15` the carry is bit `shift - 1` of `a`. A shift of
/// zero moves nothing out, so carry is clear. Amounts outside `0..=15` yield
/// 0 with carry clear.
pub fn shift_right(a: i16, shift: i16) -> AluResult {
    if !(0..=15).contains(&shift) {
        return AluResult::from_output(0, false, false);
    }

    let carry = shift > 0 && (a as u16) & (1u16 << (shift - 1)) != 0;
    let output = a >> shift;

    AluResult::from_output(output, carry, false)
}

/// Compare `a` with `b`. Callers only read the flags.
#[inline]
pub fn compare(a: i16, b: i16) -> AluResult {
    subtract(a, b)
}
