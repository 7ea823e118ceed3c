//! Executes access programs with plain Rust. This is the path used when no machine code can be
//! synthesized, and the reference every other backend is tested against.

use ancre_ir::{AccessBase, AccessInstr, AccessProgram, Dim, Error};

struct Machine<'a> {
    dims: &'a [Dim],
    addr: *mut u8,
    linear: usize,
}

impl<'a> Machine<'a> {
    fn new(base: *mut u8, dims: &'a [Dim]) -> Self {
        Self {
            dims,
            addr: base,
            linear: 0,
        }
    }

    fn add_offset(&mut self, offset: usize) {
        self.addr = self.addr.wrapping_add(offset);
    }

    fn dim(&mut self, axis: u16, index: isize) -> Result<(), Error> {
        let axis = axis as usize;
        let dim = self.dims.get(axis).ok_or(Error::RankMismatch {
            expected: axis + 1,
            actual: self.dims.len(),
        })?;
        let Some(sub) = dim.position(index) else {
            return Err(Error::IndexOutOfBounds {
                axis,
                index,
                lower: dim.lower,
                length: dim.length,
            });
        };
        self.linear = self.linear.wrapping_mul(dim.length).wrapping_add(sub);
        Ok(())
    }

    fn scale(&mut self, size: usize) {
        self.addr = self.addr.wrapping_add(self.linear.wrapping_mul(size));
    }
}

/// Compute the address `program` designates for `base`.
///
/// Nothing is dereferenced here: the returned pointer is only meaningful if `base` points at
/// what `program.base` describes and `dims` is that owner's current dimension table.
pub fn address(program: &AccessProgram, base: *mut u8, dims: &[Dim]) -> Result<*mut u8, Error> {
    program.validate()?;
    if base.is_null() {
        return Err(Error::NullBase);
    }
    if program.base == AccessBase::ArrayData && program.rank() != dims.len() {
        return Err(Error::RankMismatch {
            expected: program.rank(),
            actual: dims.len(),
        });
    }

    let mut machine = Machine::new(base, dims);
    for instr in &program.instructions {
        match *instr {
            AccessInstr::AddOffset { offset } => machine.add_offset(offset),
            AccessInstr::Dim { axis, index } => machine.dim(axis, index)?,
            AccessInstr::ScaleElement { size } => machine.scale(size),
        }
    }
    Ok(machine.addr)
}
