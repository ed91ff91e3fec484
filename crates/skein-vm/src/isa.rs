//! The bytecode instruction set and its interpreter.
//!
//! Functions compiled into module containers are sequences of register
//! instructions over a small register file. The set is deliberately compact:
//! enough to express argument plumbing and scalar arithmetic, with host
//! functions covering everything heavier.

use serde::{Deserialize, Serialize};

use crate::error::{VmError, VmResult};
use crate::value::{VmList, VmValue};

/// Number of registers available to a function body.
pub const REGISTER_COUNT: usize = 32;

/// An immediate scalar operand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl From<Scalar> for VmValue {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::I32(v) => VmValue::I32(v),
            Scalar::I64(v) => VmValue::I64(v),
            Scalar::F32(v) => VmValue::F32(v),
            Scalar::F64(v) => VmValue::F64(v),
        }
    }
}

/// A single bytecode instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// `r[dst] = args[index]`
    LoadArg { dst: u8, index: u8 },
    /// `r[dst] = value`
    Const { dst: u8, value: Scalar },
    /// `r[dst] = r[a] + r[b]` (same-kind operands)
    Add { dst: u8, a: u8, b: u8 },
    /// `r[dst] = r[a] - r[b]`
    Sub { dst: u8, a: u8, b: u8 },
    /// `r[dst] = r[a] * r[b]`
    Mul { dst: u8, a: u8, b: u8 },
    /// Append `r[src]` to the result list
    Yield { src: u8 },
    /// Stop execution
    Return,
}

fn binary_op(
    a: &VmValue,
    b: &VmValue,
    int32: fn(i32, i32) -> i32,
    int64: fn(i64, i64) -> i64,
    float32: fn(f32, f32) -> f32,
    float64: fn(f64, f64) -> f64,
) -> VmResult<VmValue> {
    match (a, b) {
        (VmValue::I32(x), VmValue::I32(y)) => Ok(VmValue::I32(int32(*x, *y))),
        (VmValue::I64(x), VmValue::I64(y)) => Ok(VmValue::I64(int64(*x, *y))),
        (VmValue::F32(x), VmValue::F32(y)) => Ok(VmValue::F32(float32(*x, *y))),
        (VmValue::F64(x), VmValue::F64(y)) => Ok(VmValue::F64(float64(*x, *y))),
        (a, b) => Err(VmError::type_mismatch(
            "matching scalar operands",
            format!("{a:?} and {b:?}"),
        )),
    }
}

struct RegisterFile {
    registers: Vec<Option<VmValue>>,
}

impl RegisterFile {
    fn new() -> Self {
        Self {
            registers: vec![None; REGISTER_COUNT],
        }
    }

    fn write(&mut self, index: u8, value: VmValue) -> VmResult<()> {
        let slot = self
            .registers
            .get_mut(index as usize)
            .ok_or(VmError::InvalidRegister(index))?;
        *slot = Some(value);
        Ok(())
    }

    fn read(&self, index: u8) -> VmResult<&VmValue> {
        self.registers
            .get(index as usize)
            .ok_or(VmError::InvalidRegister(index))?
            .as_ref()
            .ok_or(VmError::UninitializedRegister(index))
    }
}

/// Execute a function body against an argument list.
///
/// `trace` enables per-step execution tracing (to the `skein_vm::trace`
/// target at TRACE level, surfaced on stderr by the default subscribers).
pub fn execute(body: &[Instruction], args: &VmList, trace: bool) -> VmResult<VmList> {
    let mut registers = RegisterFile::new();
    let mut results = VmList::new();

    for (pc, instruction) in body.iter().enumerate() {
        if trace {
            tracing::trace!(target: "skein_vm::trace", pc, ?instruction, "step");
        }
        match instruction {
            Instruction::LoadArg { dst, index } => {
                let value = args
                    .get(*index as usize)
                    .ok_or(VmError::InvalidArgumentIndex(*index))?
                    .clone();
                registers.write(*dst, value)?;
            }
            Instruction::Const { dst, value } => {
                registers.write(*dst, (*value).into())?;
            }
            Instruction::Add { dst, a, b } => {
                let value = binary_op(
                    registers.read(*a)?,
                    registers.read(*b)?,
                    i32::wrapping_add,
                    i64::wrapping_add,
                    |x, y| x + y,
                    |x, y| x + y,
                )?;
                registers.write(*dst, value)?;
            }
            Instruction::Sub { dst, a, b } => {
                let value = binary_op(
                    registers.read(*a)?,
                    registers.read(*b)?,
                    i32::wrapping_sub,
                    i64::wrapping_sub,
                    |x, y| x - y,
                    |x, y| x - y,
                )?;
                registers.write(*dst, value)?;
            }
            Instruction::Mul { dst, a, b } => {
                let value = binary_op(
                    registers.read(*a)?,
                    registers.read(*b)?,
                    i32::wrapping_mul,
                    i64::wrapping_mul,
                    |x, y| x * y,
                    |x, y| x * y,
                )?;
                registers.write(*dst, value)?;
            }
            Instruction::Yield { src } => {
                results.push(registers.read(*src)?.clone());
            }
            Instruction::Return => break,
        }
    }

    Ok(results)
}

/// Convenience constructor for the common binary-scalar body
/// `yield op(args[0], args[1])`.
pub fn binary_scalar_body(make: impl FnOnce(u8, u8, u8) -> Instruction) -> Vec<Instruction> {
    vec![
        Instruction::LoadArg { dst: 0, index: 0 },
        Instruction::LoadArg { dst: 1, index: 1 },
        make(2, 0, 1),
        Instruction::Yield { src: 2 },
        Instruction::Return,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_i32() {
        let body = binary_scalar_body(|dst, a, b| Instruction::Add { dst, a, b });
        let mut args = VmList::new();
        args.push(42i32);
        args.push(7i32);
        let results = execute(&body, &args, false).unwrap();
        assert_eq!(results.get_i32(0).unwrap(), 49);
    }

    #[test]
    fn test_mixed_operand_kinds_rejected() {
        let body = binary_scalar_body(|dst, a, b| Instruction::Add { dst, a, b });
        let mut args = VmList::new();
        args.push(1i32);
        args.push(2i64);
        let err = execute(&body, &args, false).unwrap_err();
        assert!(matches!(err, VmError::TypeMismatch { .. }));
    }

    #[test]
    fn test_uninitialized_register() {
        let body = vec![Instruction::Yield { src: 5 }];
        let err = execute(&body, &VmList::new(), false).unwrap_err();
        assert!(matches!(err, VmError::UninitializedRegister(5)));
    }

    #[test]
    fn test_missing_argument() {
        let body = vec![Instruction::LoadArg { dst: 0, index: 3 }];
        let err = execute(&body, &VmList::new(), false).unwrap_err();
        assert!(matches!(err, VmError::InvalidArgumentIndex(3)));
    }

    #[test]
    fn test_return_stops_execution() {
        let body = vec![
            Instruction::Const {
                dst: 0,
                value: Scalar::I32(1),
            },
            Instruction::Yield { src: 0 },
            Instruction::Return,
            Instruction::Yield { src: 0 },
        ];
        let results = execute(&body, &VmList::new(), false).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_f64_arithmetic() {
        let body = vec![
            Instruction::Const {
                dst: 0,
                value: Scalar::F64(1.5),
            },
            Instruction::Const {
                dst: 1,
                value: Scalar::F64(2.0),
            },
            Instruction::Mul { dst: 2, a: 0, b: 1 },
            Instruction::Yield { src: 2 },
        ];
        let results = execute(&body, &VmList::new(), false).unwrap();
        assert_eq!(results.get(0).unwrap().as_f64().unwrap(), 3.0);
    }
}
