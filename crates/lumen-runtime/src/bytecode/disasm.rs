//! Bytecode disassembler
//!
//! Converts compiled functions back to a human-readable assembly-like
//! listing. Used for debugging, tests, and `lumen --disassemble` output.

use super::{Chunk, Opcode};
use crate::value::Value;
use std::fmt::Write;

/// Disassemble a function's chunk, then recursively any function constants
/// in its pool.
///
/// # Format
/// ```text
/// === fn <script> ===
/// 0000  CONSTANT 0           ; 42
/// 0002  DEFINE_GLOBAL 1      ; 'answer'
/// 0004  NULL
/// 0005  RETURN
/// ```
pub fn disassemble(name: &str, chunk: &Chunk) -> String {
    let mut output = String::new();
    writeln!(output, "=== fn {name} ===").unwrap();

    let mut offset = 0;
    while offset < chunk.code.len() {
        let line = disassemble_instruction(chunk, &mut offset);
        writeln!(output, "{line}").unwrap();
    }

    for constant in &chunk.constants {
        if let Value::Function(func) = constant {
            writeln!(output).unwrap();
            output.push_str(&disassemble(&func.name, &func.chunk));
        }
    }

    output
}

/// Disassemble a single instruction, advancing `offset` past it
fn disassemble_instruction(chunk: &Chunk, offset: &mut usize) -> String {
    let at = *offset;
    let byte = chunk.code[at];
    *offset += 1;

    let opcode = match Opcode::from_u8(byte) {
        Some(op) => op,
        None => return format!("{at:04}  <invalid opcode {byte:#04x}>"),
    };

    match opcode {
        // Constant-pool operands get their value echoed in a comment
        Opcode::Constant
        | Opcode::GetGlobal
        | Opcode::SetGlobal
        | Opcode::DefineGlobal
        | Opcode::IncGlobal
        | Opcode::DecGlobal
        | Opcode::GetNative
        | Opcode::GetProp
        | Opcode::SetProp => {
            let index = read_byte(chunk, offset);
            format!(
                "{at:04}  {:<20} {index} ; {}",
                opcode.name(),
                constant_comment(chunk, index)
            )
        }
        Opcode::GetLocal
        | Opcode::SetLocal
        | Opcode::GetUpvalue
        | Opcode::SetUpvalue
        | Opcode::IncLocal
        | Opcode::DecLocal
        | Opcode::IncUpvalue
        | Opcode::DecUpvalue
        | Opcode::Call
        | Opcode::New
        | Opcode::NewArray
        | Opcode::NewObject => {
            let operand = read_byte(chunk, offset);
            format!("{at:04}  {:<20} {operand}", opcode.name())
        }
        Opcode::Jump | Opcode::JumpIfFalse | Opcode::SetupTry => {
            let distance = read_u16(chunk, offset) as usize;
            format!(
                "{at:04}  {:<20} -> {:04}",
                opcode.name(),
                *offset + distance
            )
        }
        Opcode::Loop => {
            let distance = read_u16(chunk, offset) as usize;
            format!(
                "{at:04}  {:<20} -> {:04}",
                opcode.name(),
                *offset - distance
            )
        }
        Opcode::CallMethod => {
            let name_index = read_byte(chunk, offset);
            let argc = read_byte(chunk, offset);
            format!(
                "{at:04}  {:<20} {name_index} {argc} ; {}",
                opcode.name(),
                constant_comment(chunk, name_index)
            )
        }
        Opcode::IncProp | Opcode::DecProp => {
            let name_index = read_byte(chunk, offset);
            let mode = read_byte(chunk, offset);
            format!(
                "{at:04}  {:<20} {name_index} {mode} ; {}",
                opcode.name(),
                constant_comment(chunk, name_index)
            )
        }
        Opcode::Closure => {
            let func_index = read_byte(chunk, offset);
            let mut line = format!(
                "{at:04}  {:<20} {func_index} ; {}",
                opcode.name(),
                constant_comment(chunk, func_index)
            );
            if let Some(Value::Function(func)) = chunk.constants.get(func_index as usize) {
                for _ in 0..func.upvalues.len() {
                    let is_local = read_byte(chunk, offset);
                    let index = read_byte(chunk, offset);
                    let kind = if is_local == 1 { "local" } else { "upvalue" };
                    write!(line, " [{kind} {index}]").unwrap();
                }
            }
            line
        }
        _ => format!("{at:04}  {}", opcode.name()),
    }
}

fn constant_comment(chunk: &Chunk, index: u8) -> String {
    match chunk.constants.get(index as usize) {
        Some(value) => format!("{value:?}"),
        None => "<out of range>".to_string(),
    }
}

fn read_byte(chunk: &Chunk, offset: &mut usize) -> u8 {
    let byte = chunk.code.get(*offset).copied().unwrap_or(0);
    *offset += 1;
    byte
}

fn read_u16(chunk: &Chunk, offset: &mut usize) -> u16 {
    let value = chunk.read_u16(*offset);
    *offset += 2;
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    #[test]
    fn test_listing_shape() {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Number(42.0)).unwrap();
        chunk.emit(Opcode::Constant, Span::dummy());
        chunk.emit_byte(index);
        chunk.emit(Opcode::Return, Span::dummy());

        let listing = disassemble("<script>", &chunk);
        assert!(listing.contains("=== fn <script> ==="));
        assert!(listing.contains("CONSTANT"));
        assert!(listing.contains("; 42"));
        assert!(listing.contains("RETURN"));
    }

    #[test]
    fn test_jump_targets_resolved() {
        let mut chunk = Chunk::new();
        chunk.emit(Opcode::Jump, Span::dummy());
        let operand_at = chunk.len();
        chunk.emit_u16(0);
        chunk.emit(Opcode::Null, Span::dummy());
        chunk.patch_jump(operand_at);
        let listing = disassemble("f", &chunk);
        assert!(listing.contains("JUMP"), "{listing}");
        assert!(listing.contains("-> 0004"), "{listing}");
    }
}
