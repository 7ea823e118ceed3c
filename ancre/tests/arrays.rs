use ancre::runtime::{AnyArray, Dim, MdArray, Object, Vector};
use ancre::{BackendPolicy, LocateErrorKind, Locator, LocatorTemplate, Mode, Strategy};
use facet::Facet;

#[derive(Facet, Debug, Clone, Copy, PartialEq)]
struct Meters(f64);

#[test]
fn vector_element_reads_and_writes_through() {
    let values = Vector::from_vec(vec![10i32, 20, 30]);
    let template = LocatorTemplate::<Vector<i32>, i32>::at(1).unwrap();
    assert_eq!(template.mode(), Mode::SingleDimZeroBased);

    let locator = template.resolve(&values).unwrap();
    assert_eq!(locator.read(), Ok(20));
    locator.write(99).unwrap();
    assert_eq!(values.to_vec(), vec![10, 99, 30]);
}

#[test]
fn vector_bounds() {
    let values: Vector<u8> = (0..4).collect();
    for index in 0..4 {
        let template = LocatorTemplate::<Vector<u8>, u8>::at(index).unwrap();
        assert_eq!(template.resolve(&values).unwrap().read(), Ok(index as u8));
    }
    let past_end = LocatorTemplate::<Vector<u8>, u8>::at(4).unwrap();
    assert!(matches!(
        past_end.resolve(&values).unwrap_err().kind,
        LocateErrorKind::IndexOutOfBounds {
            index: 4,
            length: 4,
            ..
        }
    ));
    let negative = LocatorTemplate::<Vector<u8>, u8>::at(-1).unwrap();
    assert_eq!(
        negative.resolve(&values).unwrap_err().kind,
        LocateErrorKind::IndexNegative { index: -1 }
    );
}

#[test]
fn two_dimensional_array() {
    let grid = MdArray::new(vec![0u32; 12], [3, 4]).unwrap();
    let cell = LocatorTemplate::<MdArray<u32, 2>, u32>::at_indexes(&[1, 2]).unwrap();
    assert_eq!(cell.mode(), Mode::FixedRankArray(2));
    cell.resolve(&grid).unwrap().write(7).unwrap();
    assert_eq!(grid.get([1, 2]), Some(7));

    let outside = LocatorTemplate::<MdArray<u32, 2>, u32>::at_indexes(&[3, 0]).unwrap();
    assert!(matches!(
        outside.resolve(&grid).unwrap_err().kind,
        LocateErrorKind::IndexOutOfBounds {
            axis: 0,
            index: 3,
            ..
        }
    ));
}

#[test]
fn non_zero_lower_bound() {
    let array = MdArray::with_bounds(vec![1u16, 2, 3, 4], [4], [-5]).unwrap();
    let template = LocatorTemplate::<MdArray<u16, 1>, u16>::at(-3).unwrap();
    assert_eq!(template.mode(), Mode::SingleDimArbitraryBound);
    let locator = template.resolve(&array).unwrap();
    assert_eq!(locator.read(), Ok(3));
    assert_eq!(locator.read().ok(), array.get([-3]));

    let below = LocatorTemplate::<MdArray<u16, 1>, u16>::at(-6).unwrap();
    assert!(matches!(
        below.resolve(&array).unwrap_err().kind,
        LocateErrorKind::IndexOutOfBounds { lower: -5, .. }
    ));
}

#[test]
fn lower_bound_is_read_per_instance() {
    let template = LocatorTemplate::<MdArray<i8, 1>, i8>::at(0).unwrap();
    let from_zero = MdArray::with_bounds(vec![1i8, 2, 3], [3], [0]).unwrap();
    let from_minus_one = MdArray::with_bounds(vec![1i8, 2, 3], [3], [-1]).unwrap();
    assert_eq!(template.resolve(&from_zero).unwrap().read(), Ok(1));
    assert_eq!(template.resolve(&from_minus_one).unwrap().read(), Ok(2));
}

#[test]
fn element_type_must_match_exactly() {
    let lengths = Vector::from_vec(vec![Meters(1.0), Meters(2.5)]);
    let err = LocatorTemplate::<Vector<Meters>, f64>::at(0).unwrap_err();
    assert!(matches!(err.kind, LocateErrorKind::TypeMismatch { .. }));
    assert!(LocatorTemplate::<Vector<Meters>, Meters>::at(1).is_ok());

    let any = AnyArray::from(lengths);
    let deferred = LocatorTemplate::<AnyArray, f64>::at(0).unwrap();
    assert_eq!(deferred.mode(), Mode::RuntimeTypedArray);
    assert!(matches!(
        deferred.resolve(&any).unwrap_err().kind,
        LocateErrorKind::TypeMismatch { .. }
    ));
    let exact = LocatorTemplate::<AnyArray, Meters>::at(1).unwrap();
    assert_eq!(exact.resolve(&any).unwrap().read(), Ok(Meters(2.5)));
}

#[test]
fn runtime_rank_is_checked_at_resolution() {
    let any = AnyArray::new(vec![0u8; 6], &[Dim::zero_based(2), Dim::zero_based(3)]).unwrap();
    let one_axis = LocatorTemplate::<AnyArray, u8>::at(0).unwrap();
    assert!(matches!(
        one_axis.resolve(&any).unwrap_err().kind,
        LocateErrorKind::ShapeMismatch { .. }
    ));
    let two_axes = LocatorTemplate::<AnyArray, u8>::at_indexes(&[1, 2]).unwrap();
    two_axes.resolve(&any).unwrap().write(4).unwrap();
    assert_eq!(any.get::<u8>(&[1, 2]), Some(4));
}

#[test]
fn static_rank_mismatch_fails_at_construction() {
    let err = LocatorTemplate::<MdArray<u8, 3>, u8>::at_indexes(&[0, 0]).unwrap_err();
    assert!(matches!(err.kind, LocateErrorKind::ShapeMismatch { .. }));
    let err = LocatorTemplate::<Vector<u8>, u8>::field("len").unwrap_err();
    assert!(matches!(err.kind, LocateErrorKind::InvalidConstruction { .. }));
}

#[test]
fn rank_five_uses_an_accessor_on_every_backend() {
    let dims = [
        Dim {
            length: 2,
            lower: -1,
        },
        Dim::zero_based(3),
        Dim::zero_based(2),
        Dim {
            length: 2,
            lower: 4,
        },
        Dim::zero_based(2),
    ];
    let array = AnyArray::new((0..48i64).collect(), &dims).unwrap();
    let indexes = [0, 2, 1, 5, 0];
    // Zero-based (1, 2, 1, 1, 0) in a 2x3x2x2x2 grid, row-major.
    let expected = 46;

    for policy in [BackendPolicy::Interpreter, BackendPolicy::Auto] {
        let template = LocatorTemplate::<AnyArray, i64>::at_indexes(&indexes)
            .unwrap()
            .with_backend(policy);
        let locator = template.resolve(&array).unwrap();
        assert_eq!(locator.strategy(), Strategy::Accessor);
        assert_eq!(locator.read(), Ok(expected));

        let past = LocatorTemplate::<AnyArray, i64>::at_indexes(&[0, 2, 1, 6, 0])
            .unwrap()
            .with_backend(policy);
        assert!(matches!(
            past.resolve(&array).unwrap_err().kind,
            LocateErrorKind::IndexOutOfBounds { axis: 3, .. }
        ));
    }

    let typed = MdArray::<i64, 5>::with_bounds(
        (0..48).collect(),
        [2, 3, 2, 2, 2],
        [-1, 0, 0, 4, 0],
    )
    .unwrap();
    let direct = Locator::from_md_array(&typed, &indexes).unwrap();
    assert_eq!(direct.read(), Ok(expected));
}

#[test]
fn resolve_boxed_accepts_matching_arrays_only() {
    let values = Vector::from_vec(vec![5u64, 6]);
    let template = LocatorTemplate::<Vector<u64>, u64>::at(1).unwrap();
    let object: Object = values.to_object();
    assert_eq!(template.resolve_boxed(&object).unwrap().read(), Ok(6));

    let grid = MdArray::new(vec![0u64; 2], [2]).unwrap().to_object();
    assert!(matches!(
        template.resolve_boxed(&grid).unwrap_err().kind,
        LocateErrorKind::ShapeMismatch { .. }
    ));
}

#[test]
fn resolution_is_idempotent() {
    let values = Vector::from_vec(vec![1u32, 2, 3]);
    let template = LocatorTemplate::<Vector<u32>, u32>::at(2).unwrap();
    let first = template.resolve(&values).unwrap();
    let second = template.resolve(&values).unwrap();
    assert!(first.same_location(&second).unwrap());
    first.write(30).unwrap();
    assert_eq!(second.read(), Ok(30));
}

#[test]
fn locator_keeps_the_array_alive() {
    let template = LocatorTemplate::<Vector<String>, String>::at(0).unwrap();
    let locator = {
        let values = Vector::from_vec(vec!["kept".to_owned()]);
        template.resolve(&values).unwrap()
    };
    assert!(locator.has_owner());
    assert_eq!(locator.replace("swapped".to_owned()).unwrap(), "kept");
    assert_eq!(locator.take().unwrap(), "swapped");
}
