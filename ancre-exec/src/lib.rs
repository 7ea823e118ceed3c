//! The accessor compiler: turns an [`AccessProgram`] into an [`Accessor`] using the best backend
//! the current policy allows.

use ancre_ir::{AccessProgram, Dim, Error};
use std::sync::{Arc, LazyLock};

/// Environment variable selecting the default [`BackendPolicy`]: `auto`, `interpreter` or
/// `compiled`.
pub const BACKEND_ENV: &str = "ANCRE_ACCESSOR_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Interpreter,
    #[cfg(feature = "dynasm-rt")]
    DynasmRt,
}

/// Which backends an accessor may be built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPolicy {
    /// Machine code when it can be synthesized, the interpreter otherwise.
    #[default]
    Auto,
    /// Introspection only.
    Interpreter,
    /// Machine code or nothing.
    Compiled,
}

static DEFAULT_POLICY: LazyLock<BackendPolicy> = LazyLock::new(|| match std::env::var(BACKEND_ENV) {
    Ok(value) => BackendPolicy::parse(&value).unwrap_or_else(|| {
        tracing::warn!(env = BACKEND_ENV, %value, "unknown accessor backend policy, using auto");
        BackendPolicy::Auto
    }),
    Err(_) => BackendPolicy::Auto,
});

impl BackendPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "interpreter" | "interp" => Some(Self::Interpreter),
            "compiled" | "jit" | "dynasm" => Some(Self::Compiled),
            _ => None,
        }
    }

    /// The process default, read once from [`BACKEND_ENV`].
    pub fn from_env() -> Self {
        *DEFAULT_POLICY
    }
}

/// A ready-to-run address computation.
#[derive(Clone)]
pub struct Accessor {
    program: Arc<AccessProgram>,
    backend: AccessorBackend,
}

#[derive(Clone)]
enum AccessorBackend {
    Interpreter,
    #[cfg(feature = "dynasm-rt")]
    DynasmRt(Arc<ancre_dynasm::CompiledAccess>),
}

impl core::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Accessor")
            .field("backend", &self.backend())
            .field("program", &self.program)
            .finish()
    }
}

impl Accessor {
    pub fn backend(&self) -> BackendKind {
        match self.backend {
            AccessorBackend::Interpreter => BackendKind::Interpreter,
            #[cfg(feature = "dynasm-rt")]
            AccessorBackend::DynasmRt(_) => BackendKind::DynasmRt,
        }
    }

    #[inline]
    pub fn address(&self, base: *mut u8, dims: &[Dim]) -> Result<*mut u8, Error> {
        match &self.backend {
            AccessorBackend::Interpreter => ancre_interpreter::address(&self.program, base, dims),
            #[cfg(feature = "dynasm-rt")]
            AccessorBackend::DynasmRt(compiled) => compiled.address(base, dims),
        }
    }
}

/// Build an accessor for `program` under `policy`.
///
/// [`BackendPolicy::Compiled`] fails with [`Error::CodegenUnavailable`] when no machine code can
/// be produced; the other policies always succeed for a valid program.
pub fn compile(program: AccessProgram, policy: BackendPolicy) -> Result<Accessor, Error> {
    program.validate()?;
    let program = Arc::new(program);

    if policy == BackendPolicy::Interpreter {
        return Ok(Accessor {
            program,
            backend: AccessorBackend::Interpreter,
        });
    }

    #[cfg(feature = "dynasm-rt")]
    if let Some(compiled) = cache::compiled_for(&program) {
        return Ok(Accessor {
            program,
            backend: AccessorBackend::DynasmRt(compiled),
        });
    }

    match policy {
        BackendPolicy::Compiled => Err(Error::CodegenUnavailable),
        _ => {
            tracing::debug!(
                base = program.base.as_symbol(),
                "no machine code for access program, using interpreter"
            );
            Ok(Accessor {
                program,
                backend: AccessorBackend::Interpreter,
            })
        }
    }
}

/// Whether the compiled backend is built in and currently able to synthesize code.
pub fn codegen_available() -> bool {
    #[cfg(feature = "dynasm-rt")]
    {
        ancre_dynasm::codegen_available()
    }
    #[cfg(not(feature = "dynasm-rt"))]
    {
        false
    }
}

/// Turn code synthesis on or off process-wide. A no-op without the `dynasm-rt` feature.
pub fn set_codegen_enabled(enabled: bool) {
    #[cfg(feature = "dynasm-rt")]
    ancre_dynasm::set_codegen_enabled(enabled);
    #[cfg(not(feature = "dynasm-rt"))]
    let _ = enabled;
}

// ==================================================================
// Machine code cache
// ==================================================================

#[cfg(feature = "dynasm-rt")]
mod cache {
    use ancre_dynasm::CompiledAccess;
    use ancre_ir::AccessProgram;
    use std::collections::HashMap;
    use std::sync::{Arc, LazyLock, Mutex, PoisonError};

    // Entries are pure functions of the program and are never evicted.
    #[allow(clippy::disallowed_methods)]
    static COMPILED: LazyLock<Mutex<HashMap<AccessProgram, Arc<CompiledAccess>>>> =
        LazyLock::new(|| Mutex::new(HashMap::new()));

    pub(crate) fn compiled_for(program: &AccessProgram) -> Option<Arc<CompiledAccess>> {
        if !ancre_dynasm::codegen_available() {
            return None;
        }
        if let Some(hit) = COMPILED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(program)
        {
            tracing::trace!("access program cache hit");
            return Some(hit.clone());
        }

        // Compiled outside the lock; a concurrent miss compiles an equivalent function and the
        // first insert wins.
        let compiled = Arc::new(ancre_dynasm::prepare(program)?);
        let mut map = COMPILED.lock().unwrap_or_else(PoisonError::into_inner);
        Some(map.entry(program.clone()).or_insert(compiled).clone())
    }

    #[cfg(test)]
    pub(crate) fn len() -> usize {
        COMPILED.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet::Facet;

    #[derive(Debug, PartialEq, Facet)]
    #[repr(C)]
    struct Reading {
        sensor: u32,
        value: f64,
    }

    #[test]
    fn policy_parses_env_spellings() {
        assert_eq!(BackendPolicy::parse("AUTO"), Some(BackendPolicy::Auto));
        assert_eq!(
            BackendPolicy::parse(" interpreter "),
            Some(BackendPolicy::Interpreter)
        );
        assert_eq!(BackendPolicy::parse("jit"), Some(BackendPolicy::Compiled));
        assert_eq!(BackendPolicy::parse("fast"), None);
    }

    #[test]
    fn interpreter_backend_addresses_field() {
        let mut reading = Reading {
            sensor: 3,
            value: 1.5,
        };
        let offset = core::mem::offset_of!(Reading, value);
        let program = AccessProgram::value(Reading::SHAPE.id, offset);
        let accessor = compile(program, BackendPolicy::Interpreter).unwrap();
        assert_eq!(accessor.backend(), BackendKind::Interpreter);
        let addr = accessor
            .address((&mut reading as *mut Reading).cast(), &[])
            .unwrap();
        assert_eq!(unsafe { *addr.cast::<f64>() }, 1.5);
    }

    #[test]
    fn invalid_program_is_rejected_by_every_policy() {
        let mut program = AccessProgram::array(u8::SHAPE.id, &[0], 1);
        program.instructions.clear();
        for policy in [
            BackendPolicy::Auto,
            BackendPolicy::Interpreter,
            BackendPolicy::Compiled,
        ] {
            assert!(compile(program.clone(), policy).is_err());
        }
    }

    #[cfg(not(feature = "dynasm-rt"))]
    #[test]
    fn compiled_policy_needs_dynasm_feature() {
        let program = AccessProgram::array(u8::SHAPE.id, &[0], 1);
        assert_eq!(
            compile(program, BackendPolicy::Compiled).unwrap_err(),
            Error::CodegenUnavailable
        );
    }

    #[cfg(feature = "dynasm-rt")]
    #[test]
    fn dynasm_backend_matches_interpreter() {
        let mut data: Vec<u32> = (0..6 * 5).collect();
        let dims = [
            Dim {
                length: 6,
                lower: -2,
            },
            Dim::zero_based(5),
        ];
        let program = AccessProgram::array(u32::SHAPE.id, &[1, 4], 4);
        let interp = compile(program.clone(), BackendPolicy::Interpreter).unwrap();
        let auto = compile(program, BackendPolicy::Auto).unwrap();
        let base = data.as_mut_ptr().cast::<u8>();
        assert_eq!(
            interp.address(base, &dims).unwrap(),
            auto.address(base, &dims).unwrap()
        );
        assert_eq!(
            interp.address(base, &[Dim::zero_based(30)]),
            Err(Error::RankMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[cfg(feature = "dynasm-rt")]
    #[test]
    fn equal_programs_share_machine_code() {
        let program = AccessProgram::boxed(Reading::SHAPE.id, 16, 8);
        let first = compile(program.clone(), BackendPolicy::Auto).unwrap();
        let second = compile(program, BackendPolicy::Auto).unwrap();
        if let (AccessorBackend::DynasmRt(a), AccessorBackend::DynasmRt(b)) =
            (&first.backend, &second.backend)
        {
            assert!(Arc::ptr_eq(a, b));
            assert!(cache::len() >= 1);
        }
    }
}
