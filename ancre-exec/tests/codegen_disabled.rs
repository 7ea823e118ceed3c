use ancre_exec::{BackendKind, BackendPolicy, codegen_available, compile, set_codegen_enabled};
use ancre_ir::{AccessProgram, Dim, Error};
use facet::Facet;

// Runs in its own test binary: disabling code synthesis is process-wide.
#[test]
fn compiled_policy_fails_without_codegen() {
    set_codegen_enabled(false);
    assert!(!codegen_available());

    let program = AccessProgram::array(i64::SHAPE.id, &[2, 0, 1, 0, 3], 8);
    assert_eq!(
        compile(program.clone(), BackendPolicy::Compiled).unwrap_err(),
        Error::CodegenUnavailable
    );

    let fallback = compile(program, BackendPolicy::Auto).unwrap();
    assert_eq!(fallback.backend(), BackendKind::Interpreter);

    let mut data: Vec<i64> = (0..3 * 2 * 2 * 1 * 4).collect();
    let dims = [
        Dim::zero_based(3),
        Dim::zero_based(2),
        Dim::zero_based(2),
        Dim::zero_based(1),
        Dim::zero_based(4),
    ];
    let addr = fallback
        .address(data.as_mut_ptr().cast(), &dims)
        .unwrap();
    // (((2 * 2 + 0) * 2 + 1) * 1 + 0) * 4 + 3
    assert_eq!(unsafe { *addr.cast::<i64>() }, 39);
}
