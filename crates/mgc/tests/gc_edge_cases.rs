//! Edge Case Tests - unusual blocks and stressed internals
//!
//! Tests for:
//! - gray worklist growth and overflow with heap rescans
//! - forward and infix blocks
//! - weak arrays
//! - argument validation and heap corruption detection

mod common;

use common::{small_config, GcFixture};
use mgc::object::MAX_WOSIZE;
use mgc::{tag, Color, GcConfig, GcEvent, Header, MgcError, Phase, SliceRequest, Value};

// ============================================================================
// GRAY WORKLIST
// ============================================================================

/// A rooted block with `width` fields, each pointing to its own leaf
fn wide_fan(fx: &mut GcFixture, width: usize) -> Value {
    let parent = fx.alloc_root(width);
    for i in 0..width {
        let leaf = fx.alloc(1);
        fx.set(parent, i, leaf);
    }
    parent
}

#[test]
fn test_gray_overflow_rescans_heap() {
    let mut fx = GcFixture::with_config(GcConfig {
        gray_vals_initial: 4,
        gray_vals_heap_ratio: 1 << 20,
        ..small_config(8192)
    });
    wide_fan(&mut fx, 200);
    fx.alloc_list(50);

    fx.run_cycle();

    fx.assert_only_reachable_survive();
    assert!(fx.gc.stats().gray_overflows > 0);
    assert!(fx.gc.stats().heap_rescans > 0);
    assert!(fx
        .gc
        .logger()
        .events()
        .iter()
        .any(|e| matches!(e, GcEvent::GrayStackOverflow { .. })));
    fx.check();
}

#[test]
fn test_gray_overflow_across_many_cycles() {
    let mut fx = GcFixture::with_config(GcConfig {
        gray_vals_initial: 2,
        gray_vals_heap_ratio: 1 << 20,
        ..small_config(8192)
    });
    let parent = wide_fan(&mut fx, 64);
    for round in 0..5 {
        let tree = fx.alloc_tree(3);
        fx.set(parent, round, tree);
        fx.run_cycle_with(SliceRequest::Manual(16 + round * 40));
        fx.assert_only_reachable_survive();
    }
}

#[test]
fn test_gray_stack_grows_before_overflowing() {
    let mut fx = GcFixture::with_config(GcConfig {
        gray_vals_initial: 2,
        gray_vals_heap_ratio: 1,
        ..small_config(8192)
    });
    wide_fan(&mut fx, 100);

    fx.run_cycle();

    fx.assert_only_reachable_survive();
    assert!(fx.gc.marker().gray().capacity() > 2);
    assert_eq!(fx.gc.stats().gray_overflows, 0);
    assert!(fx
        .gc
        .logger()
        .events()
        .iter()
        .any(|e| matches!(e, GcEvent::GrayStackGrown { .. })));
}

// ============================================================================
// FORWARD AND INFIX BLOCKS
// ============================================================================

fn forward_to(fx: &mut GcFixture, target: Value) -> Value {
    let fwd = fx.gc.alloc_shr(1, tag::FORWARD).unwrap();
    fx.set(fwd, 0, target);
    fwd
}

#[test]
fn test_forward_short_circuited() {
    let mut fx = GcFixture::new();
    let parent = fx.alloc_root(1);
    let target = fx.alloc(2);
    let fwd = forward_to(&mut fx, target);
    fx.set(parent, 0, fwd);

    fx.run_cycle();
    assert_eq!(unsafe { parent.field(0) }, target);
    assert!(!unsafe { target.header() }.is_blue());

    // Nothing references the forward block any more.
    fx.run_cycle();
    fx.assert_only_reachable_survive();
    assert!(!fx.allocated_blocks().contains(&fwd.raw()));
}

#[test]
fn test_forward_to_double_kept() {
    let mut fx = GcFixture::new();
    let parent = fx.alloc_root(1);
    let double = fx.gc.alloc_shr(1, tag::DOUBLE).unwrap();
    let fwd = forward_to(&mut fx, double);
    fx.set(parent, 0, fwd);

    fx.run_cycle();
    assert_eq!(unsafe { parent.field(0) }, fwd);
    fx.assert_only_reachable_survive();
}

/// A closure of 5 fields with an infix header in field 2
///
/// Returns the closure and the infix pointer to field 3.
fn closure_with_infix(fx: &mut GcFixture) -> (Value, Value) {
    let closure = fx.gc.alloc_shr(5, tag::CLOSURE).unwrap();
    let infix_hd = Header::make(3, tag::INFIX, Color::White);
    unsafe { closure.set_field(2, Value::from_raw(infix_hd.raw())) };
    (closure, Value::from_raw(closure.field_addr(3)))
}

#[test]
fn test_infix_pointer_keeps_closure() {
    let mut fx = GcFixture::new();
    let (closure, infix) = closure_with_infix(&mut fx);
    let captured = fx.alloc(1);
    fx.set(closure, 4, captured);
    let parent = fx.alloc_root(1);
    fx.set(parent, 0, infix);
    let garbage = fx.alloc(3);

    fx.run_cycle();

    assert_eq!(unsafe { infix.header() }.tag(), tag::INFIX);
    for v in [closure, captured, parent] {
        assert!(unsafe { v.header() }.is_white(), "{:?} was freed", v);
    }
    assert!(!fx.allocated_blocks().contains(&garbage.raw()));
    fx.check();
}

#[test]
fn test_darken_infix_during_mark() {
    let mut fx = GcFixture::new();
    let (closure, infix) = closure_with_infix(&mut fx);
    fx.alloc_root(1);
    fx.gc.major_slice(SliceRequest::Auto);
    assert_eq!(fx.gc.phase(), Phase::Mark);

    fx.gc.darken(infix);
    assert!(unsafe { closure.header() }.is_gray());
    fx.run_cycle();
    assert!(unsafe { closure.header() }.is_white());
}

// ============================================================================
// WEAK ARRAYS
// ============================================================================

#[test]
fn test_weak_slots_cleared_when_referent_dies() {
    let mut fx = GcFixture::new();
    let array = fx.gc.alloc_weak(3).unwrap();
    fx.root(array);
    let live = fx.alloc_root(1);
    let dead = fx.alloc(1);
    fx.gc.weak_set(array, 0, Some(live)).unwrap();
    fx.gc.weak_set(array, 1, Some(dead)).unwrap();
    fx.gc.weak_set(array, 2, Some(Value::of_int(9))).unwrap();

    fx.run_cycle();

    assert_eq!(fx.gc.weak_get(array, 0).unwrap(), Some(live));
    assert_eq!(fx.gc.weak_get(array, 1).unwrap(), None);
    assert_eq!(fx.gc.weak_get(array, 2).unwrap(), Some(Value::of_int(9)));
    assert_eq!(fx.gc.marker().weak_stats().slots_cleared, 1);
    assert!(!fx.allocated_blocks().contains(&dead.raw()));
}

#[test]
fn test_dead_weak_array_unlinked() {
    let mut fx = GcFixture::new();
    let kept = fx.gc.alloc_weak(1).unwrap();
    fx.root(kept);
    let dropped = fx.gc.alloc_weak(2).unwrap();

    fx.run_cycle();
    assert_eq!(fx.gc.marker().weak_stats().arrays_unlinked, 1);
    assert!(!fx.allocated_blocks().contains(&dropped.raw()));

    // The surviving array still works after the list was relinked.
    let target = fx.alloc_root(1);
    fx.gc.weak_set(kept, 0, Some(target)).unwrap();
    fx.run_cycle();
    assert_eq!(fx.gc.weak_get(kept, 0).unwrap(), Some(target));
    assert_eq!(fx.gc.marker().weak_stats().arrays_unlinked, 0);
    fx.check();
}

#[test]
fn test_weak_get_during_mark_keeps_referent() {
    let mut fx = GcFixture::new();
    let array = fx.gc.alloc_weak(1).unwrap();
    fx.root(array);
    let referent = fx.alloc(1);
    fx.gc.weak_set(array, 0, Some(referent)).unwrap();

    fx.gc.major_slice(SliceRequest::Auto);
    assert_eq!(fx.gc.phase(), Phase::Mark);
    assert_eq!(fx.gc.weak_get(array, 0).unwrap(), Some(referent));
    fx.run_cycle();
    assert_eq!(fx.gc.weak_get(array, 0).unwrap(), Some(referent));

    // Without a read, the next cycle clears it.
    fx.run_cycle();
    assert_eq!(fx.gc.weak_get(array, 0).unwrap(), None);
}

#[test]
fn test_weak_slot_through_forward() {
    let mut fx = GcFixture::new();
    let array = fx.gc.alloc_weak(1).unwrap();
    fx.root(array);
    let target = fx.alloc_root(1);
    let fwd = forward_to(&mut fx, target);
    fx.gc.weak_set(array, 0, Some(fwd)).unwrap();

    fx.run_cycle();
    assert_eq!(fx.gc.weak_get(array, 0).unwrap(), Some(target));
}

#[test]
fn test_weak_access_validated() {
    let mut fx = GcFixture::new();
    let array = fx.gc.alloc_weak(2).unwrap();
    let plain = fx.alloc(3);

    assert!(matches!(
        fx.gc.weak_get(plain, 0),
        Err(MgcError::InvalidArgument(_))
    ));
    assert!(fx.gc.weak_get(array, 2).is_err());
    assert!(fx.gc.weak_set(array, 5, None).is_err());
    assert!(fx.gc.weak_get(Value::of_int(1), 0).is_err());
}

// ============================================================================
// VALIDATION
// ============================================================================

#[test]
fn test_invalid_allocation_sizes() {
    let mut fx = GcFixture::new();
    assert!(matches!(
        fx.gc.alloc_shr(0, 0),
        Err(MgcError::InvalidArgument(_))
    ));
    let err = fx.gc.alloc_shr(MAX_WOSIZE + 1, 0).unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(fx.gc.heap().heap_wsz(), common::SMALL_HEAP_WSZ);
}

#[test]
fn test_invalid_modify() {
    let mut fx = GcFixture::new();
    let v = fx.alloc(2);
    assert!(fx.gc.modify(v, 2, Value::UNIT).is_err());
    assert!(fx.gc.modify(Value::of_int(4), 0, Value::UNIT).is_err());
    assert!(fx
        .gc
        .register_finaliser(Value::of_int(4), |_| {})
        .is_err());
    assert!(fx.gc.modify(v, 1, Value::UNIT).is_ok());
}

#[test]
fn test_check_heap_detects_free_reference() {
    let mut fx = GcFixture::new();
    let parent = fx.alloc_root(1);
    let child = fx.alloc(1);
    fx.set(parent, 0, child);
    fx.check();

    let hd = unsafe { child.header() };
    unsafe { child.set_header(hd.with_color(Color::Blue)) };
    let err = fx.gc.check_heap().unwrap_err();
    assert!(matches!(err, MgcError::HeapCorruption(_)));
    assert!(err.is_fatal());
    unsafe { child.set_header(hd) };
    fx.check();
}

#[test]
fn test_check_heap_ignores_fields_of_unswept_garbage() {
    let mut fx = GcFixture::new();
    // Blocks are carved from the top of a free block, so each allocation
    // lands below the previous one and the child is swept first.
    let parent = fx.alloc(1);
    let filler = fx.alloc(20);
    let child = fx.alloc(1);
    fx.alloc_root(1);
    fx.set(parent, 0, child);
    assert!(child.raw() < filler.raw() && filler.raw() < parent.raw());

    fx.gc.major_slice(SliceRequest::Auto);
    while fx.gc.phase() == Phase::Mark {
        fx.gc.major_slice(SliceRequest::Manual(64));
    }

    let mut seen_dangling = false;
    while fx.gc.phase() == Phase::Sweep {
        fx.gc.major_slice(SliceRequest::Manual(1));
        let blocks = fx.allocated_blocks();
        if fx.gc.phase() == Phase::Sweep
            && blocks.contains(&parent.raw())
            && !blocks.contains(&child.raw())
        {
            assert!(unsafe { child.header() }.is_blue());
            seen_dangling = true;
            fx.check();
        }
    }
    assert!(seen_dangling);
    assert!(!fx.allocated_blocks().contains(&parent.raw()));
    fx.check();
}

#[test]
fn test_check_heap_rejects_gray_when_idle() {
    let mut fx = GcFixture::new();
    let v = fx.alloc(2);
    let hd = unsafe { v.header() };
    unsafe { v.set_header(hd.with_color(Color::Gray)) };
    assert!(fx.gc.check_heap().is_err());
    unsafe { v.set_header(hd) };

    let check = fx.check();
    assert_eq!(check.white_wsz, 3);
    assert_eq!(check.blue_wsz, fx.free_wsz());
}
