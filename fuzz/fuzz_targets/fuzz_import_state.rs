#![no_main]

use libfuzzer_sys::fuzz_target;
use sketch_history::{HistoryConfig, HistoryTracker, MemoryStateStore, PersistentState};

fuzz_target!(|data: &[u8]| {
    let Ok(blob) = std::str::from_utf8(data) else {
        return;
    };

    let mut tracker = HistoryTracker::new(
        MemoryStateStore::new(serde_json::json!({"n": 0})),
        HistoryConfig::default(),
    );
    tracker.capture_baseline();
    tracker.store_mut().set("n", serde_json::json!(1));
    tracker.checkpoint().expect("ready tracker accepts checkpoint");
    let before = tracker.undo_stack().to_vec();

    match tracker.import_state(blob) {
        Ok(()) => {
            // Whatever was imported must export again without error.
            let exported = tracker.export_state().expect("re-export");
            let mut again = HistoryTracker::new(MemoryStateStore::default(), HistoryConfig::default());
            again.import_state(&exported).expect("re-import");
            // Undo may fail on foreign deltas but must not panic.
            let _ = tracker.undo();
            let _ = tracker.redo();
        }
        Err(_) => {
            assert_eq!(tracker.undo_stack(), before.as_slice(), "failed import mutated stacks");
            assert_eq!(tracker.redo_depth(), 0);
        }
    }
});
