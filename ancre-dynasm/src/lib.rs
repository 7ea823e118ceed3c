//! dynasm-rt backend: turns an access program into a tiny native function
//! `(base, dims) -> address` that returns null when a sub-index is out of bounds.

use ancre_ir::{AccessBase, AccessProgram, Dim, Error};
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(any(target_arch = "aarch64", all(target_arch = "x86_64", not(windows))))]
use dynasmrt::{AssemblyOffset, DynasmApi, DynasmLabelApi, dynasm};

static CODEGEN_ENABLED: AtomicBool = AtomicBool::new(true);

type AccessFn = unsafe extern "C" fn(*mut u8, *const Dim) -> *mut u8;

/// Turn runtime code synthesis on or off for the whole process.
///
/// Already compiled accessors keep working; only new compilations are affected.
pub fn set_codegen_enabled(enabled: bool) {
    CODEGEN_ENABLED.store(enabled, Ordering::SeqCst);
}

/// Whether [`prepare`] can currently produce machine code.
pub fn codegen_available() -> bool {
    CODEGEN_ENABLED.load(Ordering::SeqCst)
        && cfg!(any(
            target_arch = "aarch64",
            all(target_arch = "x86_64", not(windows))
        ))
}

pub struct CompiledAccess {
    program: AccessProgram,
    trampoline: AccessTrampoline,
}

impl core::fmt::Debug for CompiledAccess {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompiledAccess")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl CompiledAccess {
    /// Run the compiled program. Out-of-bounds sub-indexes are reported with the same error the
    /// interpreter produces.
    pub fn address(&self, base: *mut u8, dims: &[Dim]) -> Result<*mut u8, Error> {
        if base.is_null() {
            return Err(Error::NullBase);
        }
        let rank = self.program.rank();
        if self.program.base == AccessBase::ArrayData && rank != dims.len() {
            return Err(Error::RankMismatch {
                expected: rank,
                actual: dims.len(),
            });
        }
        // The program was validated in `prepare` and only reads `dims[..rank]`.
        let addr = unsafe { self.trampoline.call(base, dims.as_ptr()) };
        if addr.is_null() {
            return ancre_interpreter::address(&self.program, base, dims);
        }
        Ok(addr)
    }
}

/// Compile `program`, or return `None` when the platform or the program cannot be compiled.
pub fn prepare(program: &AccessProgram) -> Option<CompiledAccess> {
    program.validate().ok()?;
    if !CODEGEN_ENABLED.load(Ordering::SeqCst) {
        return None;
    }
    let trampoline = AccessTrampoline::compile(program)?;
    tracing::trace!(
        base = program.base.as_symbol(),
        instructions = program.instructions.len(),
        "compiled access program"
    );
    Some(CompiledAccess {
        program: program.clone(),
        trampoline,
    })
}

/// Compute an address with machine code when possible, through the interpreter otherwise.
pub fn address(program: &AccessProgram, base: *mut u8, dims: &[Dim]) -> Result<*mut u8, Error> {
    let Some(compiled) = prepare(program) else {
        return ancre_interpreter::address(program, base, dims);
    };
    compiled.address(base, dims)
}

struct AccessTrampoline {
    _buffer: dynasmrt::ExecutableBuffer,
    entry: AccessFn,
}

// The buffer is immutable once finalized and the entry is a plain function pointer.
unsafe impl Send for AccessTrampoline {}
unsafe impl Sync for AccessTrampoline {}

impl AccessTrampoline {
    fn compile(program: &AccessProgram) -> Option<Self> {
        #[cfg(target_arch = "aarch64")]
        {
            Self::compile_aarch64(program)
        }
        #[cfg(all(target_arch = "x86_64", not(windows)))]
        {
            Self::compile_x64(program)
        }
        #[cfg(not(any(target_arch = "aarch64", all(target_arch = "x86_64", not(windows)))))]
        {
            let _ = program;
            None
        }
    }

    // rdi = address, rsi = dims, rdx = linear index
    #[cfg(all(target_arch = "x86_64", not(windows)))]
    fn compile_x64(program: &AccessProgram) -> Option<Self> {
        use ancre_ir::AccessInstr;

        let mut ops = dynasmrt::x64::Assembler::new().ok()?;
        let out_of_bounds = ops.new_dynamic_label();
        let entry = ops.offset();
        dynasm!(ops
            ; .arch x64
            ; mov rax, rdi
            ; xor edx, edx
        );

        for instr in &program.instructions {
            match *instr {
                AccessInstr::AddOffset { offset } => {
                    let offset = i64::try_from(offset).ok()?;
                    dynasm!(ops
                        ; .arch x64
                        ; mov rcx, QWORD offset
                        ; add rax, rcx
                    );
                }
                AccessInstr::Dim { axis, index } => {
                    let row = axis as usize * Dim::STRIDE;
                    let length = i32::try_from(row + Dim::LENGTH_OFFSET).ok()?;
                    let lower = i32::try_from(row + Dim::LOWER_OFFSET).ok()?;
                    let index = index as i64;
                    dynasm!(ops
                        ; .arch x64
                        ; mov rcx, QWORD index
                        ; sub rcx, QWORD [rsi + lower]
                        ; cmp rcx, QWORD [rsi + length]
                        ; jae =>out_of_bounds
                        ; imul rdx, QWORD [rsi + length]
                        ; add rdx, rcx
                    );
                }
                AccessInstr::ScaleElement { size } => {
                    let size = i64::try_from(size).ok()?;
                    dynasm!(ops
                        ; .arch x64
                        ; mov rcx, QWORD size
                        ; imul rdx, rcx
                        ; add rax, rdx
                    );
                }
            }
        }

        dynasm!(ops
            ; .arch x64
            ; ret
            ; =>out_of_bounds
            ; xor eax, eax
            ; ret
        );
        let buffer = ops.finalize().ok()?;
        Some(Self::from_buffer(buffer, entry))
    }

    // x0 = address, x1 = dims, x2 = linear index
    #[cfg(target_arch = "aarch64")]
    fn compile_aarch64(program: &AccessProgram) -> Option<Self> {
        use ancre_ir::AccessInstr;

        let mut ops = dynasmrt::aarch64::Assembler::new().ok()?;
        let out_of_bounds = ops.new_dynamic_label();
        let entry = ops.offset();
        let lower = Dim::LOWER_OFFSET as u32;
        dynasm!(ops
            ; .arch aarch64
            ; mov x2, xzr
        );

        for instr in &program.instructions {
            match *instr {
                AccessInstr::AddOffset { offset } => {
                    emit_aarch64_load_u64(&mut ops, 9, offset as u64);
                    dynasm!(ops
                        ; .arch aarch64
                        ; add x0, x0, x9
                    );
                }
                AccessInstr::Dim { axis, index } => {
                    emit_aarch64_load_u64(&mut ops, 10, (axis as usize * Dim::STRIDE) as u64);
                    emit_aarch64_load_u64(&mut ops, 9, index as u64);
                    dynasm!(ops
                        ; .arch aarch64
                        ; add x10, x1, x10
                        ; ldr x11, [x10]
                        ; ldr x12, [x10, #lower]
                        ; sub x9, x9, x12
                        ; cmp x9, x11
                        ; b.hs =>out_of_bounds
                        ; madd x2, x2, x11, x9
                    );
                }
                AccessInstr::ScaleElement { size } => {
                    emit_aarch64_load_u64(&mut ops, 9, size as u64);
                    dynasm!(ops
                        ; .arch aarch64
                        ; madd x0, x2, x9, x0
                    );
                }
            }
        }

        dynasm!(ops
            ; .arch aarch64
            ; ret
            ; =>out_of_bounds
            ; mov x0, xzr
            ; ret
        );
        let buffer = ops.finalize().ok()?;
        Some(Self::from_buffer(buffer, entry))
    }

    #[cfg(any(target_arch = "aarch64", all(target_arch = "x86_64", not(windows))))]
    fn from_buffer(buffer: dynasmrt::ExecutableBuffer, entry: AssemblyOffset) -> Self {
        let ptr = buffer.ptr(entry);
        let entry = unsafe { core::mem::transmute::<*const u8, AccessFn>(ptr) };
        Self {
            _buffer: buffer,
            entry,
        }
    }

    unsafe fn call(&self, base: *mut u8, dims: *const Dim) -> *mut u8 {
        unsafe { (self.entry)(base, dims) }
    }
}

#[cfg(target_arch = "aarch64")]
fn emit_aarch64_load_u64(ops: &mut dynasmrt::aarch64::Assembler, reg: u8, value: u64) {
    let i0 = (value & 0xffff) as u16;
    let i1 = ((value >> 16) & 0xffff) as u16;
    let i2 = ((value >> 32) & 0xffff) as u16;
    let i3 = ((value >> 48) & 0xffff) as u16;
    ops.push_u32(encode_aarch64_movz(reg, i0, 0));
    ops.push_u32(encode_aarch64_movk(reg, i1, 1));
    ops.push_u32(encode_aarch64_movk(reg, i2, 2));
    ops.push_u32(encode_aarch64_movk(reg, i3, 3));
}

#[cfg(target_arch = "aarch64")]
fn encode_aarch64_movz(rd: u8, imm16: u16, hw: u8) -> u32 {
    0xD2800000 | ((hw as u32) << 21) | ((imm16 as u32) << 5) | (rd as u32)
}

#[cfg(target_arch = "aarch64")]
fn encode_aarch64_movk(rd: u8, imm16: u16, hw: u8) -> u32 {
    0xF2800000 | ((hw as u32) << 21) | ((imm16 as u32) << 5) | (rd as u32)
}
