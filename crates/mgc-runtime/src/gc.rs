//! GC Runtime - C FFI wrapper for MGC
//!
//! One collector per process, created by `mgc_init` and shared by every
//! exported function. Values cross the boundary as raw words.
//!
//! Errors the program cannot recover from are logged and abort the process.
//! Recoverable ones are logged and reported through the return value.

use lazy_static::lazy_static;
use libc::c_char;
use mgc::{GarbageCollector, GcConfig, Header, MgcError, SliceRequest, Value};
use parking_lot::Mutex;
use std::ffi::CStr;

lazy_static! {
    static ref COLLECTOR: Mutex<Option<GarbageCollector>> = Mutex::new(None);
}

fn fatal(context: &str, err: &MgcError) -> ! {
    log::error!("{}: {}", context, err);
    eprintln!("[mgc] fatal: {}: {}", context, err);
    std::process::abort()
}

/// Run `f` on the collector, creating a default one first if needed
fn with_collector<T>(f: impl FnOnce(&mut GarbageCollector) -> T) -> T {
    let mut guard = COLLECTOR.lock();
    let gc = guard.get_or_insert_with(|| {
        GarbageCollector::new(GcConfig::from_env())
            .unwrap_or_else(|e| fatal("cannot create the major heap", &e))
    });
    f(gc)
}

/// Log a recoverable error, abort on a fatal one
fn check<T>(context: &str, result: mgc::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_fatal() => fatal(context, &e),
        Err(e) => {
            log::warn!("{}: {}", context, e);
            None
        },
    }
}

/// Borrow a path argument
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
unsafe fn path_arg<'a>(path: *const c_char) -> Option<&'a str> {
    if path.is_null() {
        return None;
    }
    match CStr::from_ptr(path).to_str() {
        Ok(s) => Some(s),
        Err(e) => {
            log::error!("Report path is not valid UTF-8: {}", e);
            None
        },
    }
}

/// Create the collector with an initial heap of `heap_bytes` bytes
///
/// Other settings come from `MGC_*` variables. Returns false when a
/// collector already exists.
#[no_mangle]
pub extern "C" fn mgc_init(heap_bytes: usize) -> bool {
    let mut guard = COLLECTOR.lock();
    if guard.is_some() {
        return false;
    }
    let config = GcConfig {
        initial_heap_wsz: mgc::memory::wsize_bsize(heap_bytes).max(1),
        ..GcConfig::from_env()
    };
    match GarbageCollector::new(config) {
        Ok(gc) => {
            *guard = Some(gc);
            true
        },
        Err(e) => fatal("cannot create the major heap", &e),
    }
}

/// Drop the collector and unmap its heap
#[no_mangle]
pub extern "C" fn mgc_shutdown() {
    if let Some(gc) = COLLECTOR.lock().take() {
        log::info!("Shutting down after {} major cycles", gc.cycle_count());
    }
}

/// Allocate a major heap block; returns the value
#[no_mangle]
pub extern "C" fn mgc_alloc_shr(wosize: usize, tag: u8) -> usize {
    with_collector(|gc| {
        check("major heap allocation failed", gc.alloc_shr(wosize, tag))
            .map(Value::raw)
            .unwrap_or(0)
    })
}

/// Store `value` into a field of `obj` through the write barrier
#[no_mangle]
pub extern "C" fn mgc_modify(obj: usize, field: usize, value: usize) -> bool {
    with_collector(|gc| {
        check(
            "modify failed",
            gc.modify(Value::from_raw(obj), field, Value::from_raw(value)),
        )
        .is_some()
    })
}

/// Run one slice
///
/// `howmuch` < 0 lets the pacer decide, 0 forces a bucket, > 0 asks for
/// about that many words. Returns the work ordered.
#[no_mangle]
pub extern "C" fn mgc_major_slice(howmuch: isize) -> i64 {
    with_collector(|gc| {
        gc.major_slice(SliceRequest::from_howmuch(howmuch))
            .computed_work
    })
}

/// Run the current cycle to its end, the pending finalisers, then a whole
/// new cycle
///
/// Finalisers run with the collector unlocked, so they may call back into
/// this library.
#[no_mangle]
pub extern "C" fn mgc_full_major() {
    with_collector(|gc| gc.finish_major_cycle());
    let ran = run_finalisers_unlocked();
    if ran > 0 {
        log::debug!("{} finalisers ran between cycles", ran);
    }
    with_collector(|gc| gc.finish_major_cycle());
}

fn run_finalisers_unlocked() -> usize {
    let pending = with_collector(|gc| gc.take_pending_finalisers());
    let count = pending.len();
    for (v, action) in pending {
        action(v);
    }
    count
}

/// Call `action` with `v` once `v` is found unreachable
///
/// The action runs from `mgc_full_major` or `mgc_run_pending_finalisers`
/// without the collector lock held. A value handed to it stays valid until
/// the collector runs again.
#[no_mangle]
pub extern "C" fn mgc_register_finaliser(v: usize, action: extern "C" fn(usize)) -> bool {
    with_collector(|gc| {
        check(
            "cannot register finaliser",
            gc.register_finaliser(Value::from_raw(v), move |v| action(v.raw())),
        )
        .is_some()
    })
}

/// Run the finalisers scheduled by past cycles; returns how many ran
#[no_mangle]
pub extern "C" fn mgc_run_pending_finalisers() -> usize {
    run_finalisers_unlocked()
}

#[no_mangle]
pub extern "C" fn mgc_set_major_window(window: usize) -> bool {
    with_collector(|gc| check("cannot set the major window", gc.set_major_window(window)).is_some())
}

#[no_mangle]
pub extern "C" fn mgc_register_root(v: usize) {
    with_collector(|gc| {
        gc.register_root(Value::from_raw(v));
    })
}

#[no_mangle]
pub extern "C" fn mgc_unregister_root(v: usize) -> bool {
    with_collector(|gc| gc.unregister_root(Value::from_raw(v)))
}

/// Write the allocation site of `v` to `out`
///
/// Returns false, leaving `out` untouched, when `v` has none.
///
/// # Safety
/// `out` must be null or valid for a write.
#[no_mangle]
pub unsafe extern "C" fn mgc_where_was_allocated(v: usize, out: *mut u64) -> bool {
    match with_collector(|gc| gc.where_was_allocated(Value::from_raw(v))) {
        Some(site) if !out.is_null() => {
            *out = site;
            true
        },
        Some(_) => true,
        None => false,
    }
}

#[no_mangle]
pub extern "C" fn mgc_forget_where_values_were_allocated() {
    with_collector(|gc| gc.forget_where_values_were_allocated())
}

/// # Safety
/// `path` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn mgc_dump_allocators_of_major_heap_blocks(
    path: *const c_char,
    sample_strings: usize,
) -> bool {
    let Some(path) = path_arg(path) else {
        return false;
    };
    with_collector(|gc| {
        check(
            "cannot dump allocators",
            gc.dump_allocators_of_major_heap_blocks(path, sample_strings),
        )
        .is_some()
    })
}

/// # Safety
/// Both paths must be NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn mgc_dump_heapgraph(node_path: *const c_char, edge_path: *const c_char) -> bool {
    let (Some(node_path), Some(edge_path)) = (path_arg(node_path), path_arg(edge_path)) else {
        return false;
    };
    with_collector(|gc| check("cannot dump the heap graph", gc.dump_heapgraph(node_path, edge_path)).is_some())
}

/// # Safety
/// `path` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn mgc_dump_lifetimes(path: *const c_char) -> bool {
    let Some(path) = path_arg(path) else {
        return false;
    };
    with_collector(|gc| check("cannot dump lifetimes", gc.dump_lifetimes(path)).is_some())
}

/// Sample the death of a block with header `hd`; returns the bucket or -1
#[no_mangle]
pub extern "C" fn mgc_record_lifetime_sample(hd: u64, in_major_heap: bool, now: u64) -> isize {
    with_collector(|gc| {
        gc.record_lifetime_sample(Header::from_raw(hd as usize), in_major_heap, now)
            .map_or(-1, |bucket| bucket as isize)
    })
}

#[no_mangle]
pub extern "C" fn mgc_set_profinfo_override(min: u64, max: u64) -> bool {
    with_collector(|gc| check("invalid profinfo override", gc.set_profinfo_override(min, max)).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    lazy_static! {
        static ref SERIAL: Mutex<()> = Mutex::new(());
    }

    fn fresh(heap_bytes: usize) -> parking_lot::MutexGuard<'static, ()> {
        let guard = SERIAL.lock();
        mgc_shutdown();
        assert!(mgc_init(heap_bytes));
        guard
    }

    #[test]
    fn test_init_twice() {
        let _serial = fresh(64 * 1024);
        assert!(!mgc_init(64 * 1024));
        mgc_shutdown();
        assert!(mgc_init(64 * 1024));
        mgc_shutdown();
    }

    #[test]
    fn test_rooted_block_survives() {
        let _serial = fresh(64 * 1024);
        let v = mgc_alloc_shr(2, 0);
        assert_ne!(v, 0);
        mgc_register_root(v);
        assert!(mgc_modify(v, 0, Value::of_int(7).raw()));
        mgc_full_major();
        assert_eq!(unsafe { Value::from_raw(v).field(0) }.to_int(), 7);
        assert!(mgc_unregister_root(v));
        assert!(!mgc_unregister_root(v));
        mgc_shutdown();
    }

    #[test]
    fn test_bad_arguments_are_recoverable() {
        let _serial = fresh(64 * 1024);
        assert_eq!(mgc_alloc_shr(0, 0), 0);
        assert!(!mgc_set_major_window(0));
        assert!(!mgc_set_profinfo_override(9, 3));
        assert!(mgc_set_major_window(5));
        mgc_shutdown();
    }

    #[test]
    fn test_slices_complete_cycle() {
        let _serial = fresh(64 * 1024);
        for _ in 0..10_000 {
            mgc_major_slice(1 << 20);
        }
        assert!(with_collector(|gc| gc.cycle_count()) > 0);
        mgc_shutdown();
    }

    #[test]
    fn test_dump_reports() {
        let _serial = fresh(64 * 1024);
        let dir = tempfile::tempdir().unwrap();
        let allocators = CString::new(dir.path().join("alloc.txt").to_str().unwrap()).unwrap();
        let lifetimes = CString::new(dir.path().join("life.txt").to_str().unwrap()).unwrap();
        let missing = CString::new(dir.path().join("none/x.txt").to_str().unwrap()).unwrap();
        unsafe {
            assert!(mgc_dump_allocators_of_major_heap_blocks(allocators.as_ptr(), 3));
            assert!(mgc_dump_lifetimes(lifetimes.as_ptr()));
            assert!(!mgc_dump_lifetimes(missing.as_ptr()));
            assert!(!mgc_dump_lifetimes(std::ptr::null()));
        }
        assert!(dir.path().join("alloc.txt").exists());
        mgc_shutdown();
    }

    static FINALISED: AtomicUsize = AtomicUsize::new(0);
    static FINALISED_FIELD: AtomicUsize = AtomicUsize::new(0);
    static ALLOCATED_IN_FINALISER: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn finalise_and_allocate(v: usize) {
        // Re-enters the runtime.
        ALLOCATED_IN_FINALISER.store(mgc_alloc_shr(1, 0), Ordering::SeqCst);
        let field = unsafe { Value::from_raw(v).field(0) }.to_int();
        FINALISED_FIELD.store(field as usize, Ordering::SeqCst);
        FINALISED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_finaliser_reenters_runtime() {
        let _serial = fresh(64 * 1024);
        FINALISED.store(0, Ordering::SeqCst);
        let v = mgc_alloc_shr(1, 0);
        assert!(mgc_modify(v, 0, Value::of_int(11).raw()));
        assert!(mgc_register_finaliser(v, finalise_and_allocate));
        assert!(!mgc_register_finaliser(Value::of_int(2).raw(), finalise_and_allocate));

        mgc_full_major();
        assert_eq!(FINALISED.load(Ordering::SeqCst), 1);
        assert_eq!(FINALISED_FIELD.load(Ordering::SeqCst), 11);
        assert_ne!(ALLOCATED_IN_FINALISER.load(Ordering::SeqCst), 0);
        assert_eq!(mgc_run_pending_finalisers(), 0);
        mgc_shutdown();
    }

    #[test]
    fn test_where_was_allocated_without_site() {
        let _serial = fresh(64 * 1024);
        let v = mgc_alloc_shr(1, 0);
        let mut site = 0u64;
        assert!(!unsafe { mgc_where_was_allocated(v, &mut site) });
        assert!(!unsafe { mgc_where_was_allocated(Value::of_int(3).raw(), &mut site) });
        mgc_shutdown();
    }
}
