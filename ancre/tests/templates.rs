use ancre::runtime::{AnyArray, Boxed, Dim, MdArray, Vector};
use ancre::{BackendKind, BackendPolicy, LocateErrorKind, LocatorTemplate, Mode};
use facet::Facet;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Facet, Debug, Clone, Copy, PartialEq)]
struct Pair {
    left: u16,
    right: u64,
}

#[derive(Facet, Debug, Clone, Copy, PartialEq)]
struct Sample {
    id: u32,
    pair: Pair,
    weight: f32,
}

#[test]
fn clearing_the_cache_does_not_change_results() {
    let boxed = Boxed::new(Sample {
        id: 1,
        pair: Pair {
            left: 2,
            right: 3,
        },
        weight: 0.25,
    });
    let template = LocatorTemplate::<Boxed<Sample>, u64>::parse("pair.right").unwrap();

    let before = template.resolve(&boxed).unwrap();
    template.clear_cache();
    assert!(template.cached_backend().is_none());
    let after = template.resolve(&boxed).unwrap();
    assert!(template.cached_backend().is_some());

    assert!(before.same_location(&after).unwrap());
    after.write(30).unwrap();
    assert_eq!(before.read(), Ok(30));
}

#[test]
fn every_backend_addresses_the_same_element() {
    let boxed = Boxed::new(Sample {
        id: 7,
        pair: Pair {
            left: 8,
            right: 9,
        },
        weight: 1.5,
    });
    let grid = AnyArray::new(
        (0..64u8).collect(),
        &[
            Dim::zero_based(2),
            Dim {
                length: 2,
                lower: 10,
            },
            Dim::zero_based(2),
            Dim::zero_based(2),
            Dim::zero_based(2),
            Dim::zero_based(2),
        ],
    )
    .unwrap();

    let field = |policy| {
        LocatorTemplate::<Boxed<Sample>, f32>::field("weight")
            .unwrap()
            .with_backend(policy)
    };
    let cell = |policy| {
        LocatorTemplate::<AnyArray, u8>::at_indexes(&[1, 11, 0, 1, 1, 0])
            .unwrap()
            .with_backend(policy)
    };

    let interpreted = field(BackendPolicy::Interpreter);
    let automatic = field(BackendPolicy::Auto);
    assert!(
        interpreted
            .resolve(&boxed)
            .unwrap()
            .same_location(&automatic.resolve(&boxed).unwrap())
            .unwrap()
    );
    assert_eq!(interpreted.cached_backend(), Some(BackendKind::Interpreter));
    assert_eq!(automatic.resolve(&boxed).unwrap().read(), Ok(1.5));

    let interpreted = cell(BackendPolicy::Interpreter);
    let automatic = cell(BackendPolicy::Auto);
    // 1*32 + 1*16 + 0*8 + 1*4 + 1*2 + 0
    assert_eq!(interpreted.resolve(&grid).unwrap().read(), Ok(54));
    assert_eq!(automatic.resolve(&grid).unwrap().read(), Ok(54));
}

#[test]
fn with_backend_drops_the_cached_accessor() {
    let boxed = Boxed::new(Pair { left: 1, right: 2 });
    let template = LocatorTemplate::<Boxed<Pair>, u16>::field("left").unwrap();
    template.resolve(&boxed).unwrap();
    assert!(template.cached_backend().is_some());

    let template = template.with_backend(BackendPolicy::Interpreter);
    assert_eq!(template.backend_policy(), BackendPolicy::Interpreter);
    assert!(template.cached_backend().is_none());
    assert_eq!(template.resolve(&boxed).unwrap().read(), Ok(1));
    assert_eq!(template.cached_backend(), Some(BackendKind::Interpreter));
}

#[test]
fn shared_template_across_threads() {
    let template = LocatorTemplate::<Boxed<Pair>, u64>::field("right").unwrap();
    let resolved = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for worker in 0..8u64 {
            let template = &template;
            let resolved = &resolved;
            scope.spawn(move || {
                let boxed = Boxed::new(Pair {
                    left: 0,
                    right: worker,
                });
                for round in 0..50 {
                    if worker == 0 && round % 10 == 0 {
                        template.clear_cache();
                    }
                    let locator = template.resolve(&boxed).unwrap();
                    assert_eq!(locator.read(), Ok(worker + round));
                    locator.write(worker + round + 1).unwrap();
                    resolved.fetch_add(1, Ordering::Relaxed);
                }
                assert_eq!(boxed.get().right, worker + 50);
            });
        }
    });

    assert_eq!(resolved.load(Ordering::Relaxed), 400);
}

#[test]
fn templates_are_independent_of_instances() {
    let template = LocatorTemplate::<MdArray<i32, 2>, i32>::at_indexes(&[1, 1]).unwrap();
    assert_eq!(template.mode(), Mode::FixedRankArray(2));
    for size in 2..6 {
        let values = (0..(size * size) as i32).collect();
        let array = MdArray::new(values, [size, size]).unwrap();
        assert_eq!(
            template.resolve(&array).unwrap().read(),
            Ok(size as i32 + 1)
        );
    }
    let too_small = MdArray::new(vec![0i32], [1, 1]).unwrap();
    assert!(matches!(
        template.resolve(&too_small).unwrap_err().kind,
        LocateErrorKind::IndexOutOfBounds { axis: 0, .. }
    ));
}

#[test]
fn parse_forms() {
    assert_eq!(
        LocatorTemplate::<Vector<u8>, u8>::parse("[3]").unwrap().mode(),
        Mode::SingleDimZeroBased
    );
    assert_eq!(
        LocatorTemplate::<MdArray<u8, 3>, u8>::parse("[0, 1, -2]")
            .unwrap()
            .mode(),
        Mode::FixedRankArray(3)
    );
    assert_eq!(
        LocatorTemplate::<Sample, u16>::parse("pair.left")
            .unwrap()
            .mode(),
        Mode::FieldPath
    );
    for bad in ["", "[", "[x]", "pair..left", "[1]]", ".id"] {
        let err = LocatorTemplate::<Sample, u32>::parse(bad).unwrap_err();
        assert!(
            matches!(err.kind, LocateErrorKind::InvalidConstruction { .. }),
            "{bad:?}: {err}"
        );
    }
}

#[test]
fn errors_name_owner_and_element() {
    let err = LocatorTemplate::<Pair, u64>::field("middle").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Pair"), "{message}");
    assert!(message.contains("u64"), "{message}");
}

#[test]
fn borrow_boxed_reaches_array_elements() {
    let vector = Vector::from_vec(vec![1u32, 2, 3]);
    let at_two = LocatorTemplate::<Vector<u32>, u32>::at(2).unwrap();
    let object = vector.to_object();
    let mut element = at_two.borrow_boxed(&object).unwrap();
    assert!(!element.is_exclusive());
    assert_eq!(element.get(), Ok(3));
    element.set(30).unwrap();
    assert_eq!(vector.get(2), Some(30));

    let grid = MdArray::<u8, 2>::new((0..6).collect(), [2, 3]).unwrap();
    let corner = LocatorTemplate::<MdArray<u8, 2>, u8>::at_indexes(&[1, 2]).unwrap();
    assert_eq!(corner.borrow_boxed(&grid.to_object()).unwrap().get(), Ok(5));

    let any = AnyArray::new((0u16..4).collect(), &[Dim::zero_based(4)]).unwrap();
    let template = LocatorTemplate::<AnyArray, u16>::at_indexes(&[3]).unwrap();
    let object = any.to_object();
    assert_eq!(template.borrow_boxed(&object).unwrap().replace(40), Ok(3));
    assert_eq!(any.get::<u16>(&[3]), Some(40));
}

#[test]
fn borrow_boxed_checks_the_object_it_is_given() {
    let wrong_element = AnyArray::new(vec![0u32; 4], &[Dim::zero_based(4)]).unwrap();
    let template = LocatorTemplate::<AnyArray, u16>::at_indexes(&[0]).unwrap();
    let err = template
        .borrow_boxed(&wrong_element.to_object())
        .unwrap_err();
    assert_eq!(
        err.kind,
        LocateErrorKind::TypeMismatch {
            expected: "u16",
            actual: "u32",
        }
    );

    let vector_template = LocatorTemplate::<Vector<u32>, u32>::at(0).unwrap();
    let boxed_pair = Boxed::new(Pair { left: 0, right: 0 }).to_object();
    let matrix = MdArray::<u32, 2>::new(vec![0; 4], [2, 2]).unwrap().to_object();
    let other_element = Vector::from_vec(vec![0u64]).to_object();
    for object in [boxed_pair, matrix, other_element] {
        assert!(matches!(
            vector_template.borrow_boxed(&object).unwrap_err().kind,
            LocateErrorKind::ShapeMismatch { .. }
        ));
    }
}
