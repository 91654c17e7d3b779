use tracing::trace;

// Counters and timings go out as trace events; a subscriber can aggregate them.

pub fn record_request(route: &'static str) {
    trace!(target: "reorder.metrics", route = route, "requests_total_inc");
}

pub fn record_stage(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target: "reorder.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn record_run(ok: bool, moved: usize) {
    trace!(
        target: "reorder.metrics",
        ok = ok,
        moved = moved as u64,
        "reorder_runs_total_inc"
    );
}
