//! Collector behavior on shapes too large for the unit tests

use ren_core::{Cell, Heap, HeapConfig, Subclass};

const DEPTH: usize = 200_000;

fn heap() -> Heap {
    Heap::new(HeapConfig::default())
}

/// `[[[...]]]` nested `depth` levels; returns the outermost array.
fn nest(heap: &mut Heap, depth: usize) -> ren_core::NodeId {
    let mut inner = heap.make_managed_array(Subclass::Array, vec![Cell::integer(0)]);
    for i in 1..depth {
        inner = heap.make_managed_array(
            Subclass::Array,
            vec![Cell::integer(i as i64), Cell::block(inner)],
        );
    }
    inner
}

#[test]
fn test_deep_nesting_marks_without_recursion() {
    let mut heap = heap();
    let outer = nest(&mut heap, DEPTH);
    heap.push_guard_node(outer);

    let report = heap.recycle().unwrap();
    assert!(report.marked >= DEPTH, "marked {}", report.marked);
    assert_eq!(report.swept, 0);
    assert!(report.mark_stack_peak < 1000, "peak {}", report.mark_stack_peak);

    heap.drop_guard();
    let report = heap.recycle().unwrap();
    assert!(report.swept >= DEPTH, "swept {}", report.swept);
    assert!(!heap.contains(outer));
}

#[test]
fn test_only_reachable_half_survives() {
    let mut heap = heap();
    let kept = nest(&mut heap, 1000);
    let lost = nest(&mut heap, 1000);
    heap.pin(kept);

    let doomed = heap.sweeplist();
    assert!(doomed.contains(&lost));
    assert!(!doomed.contains(&kept));
    assert!(heap.contains(lost));

    let report = heap.recycle().unwrap();
    assert_eq!(report.swept, doomed.len());
    assert!(heap.contains(kept));
    assert!(!heap.contains(lost));

    heap.unpin(kept);
    heap.recycle();
    assert!(!heap.contains(kept));
}

#[test]
fn test_stale_ids_stay_stale() {
    let mut heap = heap();
    let first = heap.make_managed_array(Subclass::Array, Vec::new());
    heap.recycle();
    assert!(!heap.contains(first));
    let second = heap.make_managed_array(Subclass::Array, Vec::new());
    assert_ne!(first, second);
    assert!(!heap.contains(first));
    assert!(heap.contains(second));
}

#[test]
fn test_many_spellings_survive_while_referenced() {
    let mut heap = heap();
    let words: Vec<Cell> = (0..5000)
        .map(|i| Cell::word(heap.intern(&format!("word-{i}"))))
        .collect();
    let block = heap.make_managed_array(Subclass::Array, words);
    heap.push_guard_node(block);
    heap.recycle();
    assert_eq!(heap.symbol_stats().canons, 5000);

    let upper = heap.intern("WORD-42");
    let lower = heap.cells(block)[42].word_spelling().unwrap();
    assert!(heap.same_spelling(upper, lower));
    assert_ne!(upper, lower);

    heap.drop_guard();
    heap.recycle();
    assert_eq!(heap.symbol_stats().canons, 0);
}

#[test]
fn test_shutdown_sweeps_everything() {
    let mut heap = heap();
    let outer = nest(&mut heap, 100);
    heap.pin(outer);
    heap.alloc_root(Cell::block(outer));
    let report = heap.shutdown();
    assert!(report.swept >= 100);
    assert_eq!(report.leaked_roots, 1);
    assert!(!heap.contains(outer));
}
