/// Process-wide run counters, logged as one snapshot at the end of a flow.
pub mod migration_counters {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static INSPECTIONS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static STATEMENTS_APPLIED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static STATEMENTS_FAILED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static IDEMPOTENT_SKIPS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static IMPORT_FAST_PATH_HIT_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static LOADER_INVOCATIONS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static LOADER_FAILED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static CONNECT_RETRIES_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static FLOW_CANCELLED_TOTAL: AtomicUsize = AtomicUsize::new(0);

    pub fn inspection() {
        INSPECTIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn statement_applied() {
        STATEMENTS_APPLIED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn statement_failed() {
        STATEMENTS_FAILED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idempotent_skip() {
        IDEMPOTENT_SKIPS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn import_fast_path_hit() {
        IMPORT_FAST_PATH_HIT_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn loader_invoked() {
        LOADER_INVOCATIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn loader_failed() {
        LOADER_FAILED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_retry() {
        CONNECT_RETRIES_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flow_cancelled() {
        FLOW_CANCELLED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    #[derive(Debug, Clone, Copy)]
    pub struct Snapshot {
        pub inspections_total: usize,
        pub statements_applied_total: usize,
        pub statements_failed_total: usize,
        pub idempotent_skips_total: usize,
        pub import_fast_path_hit_total: usize,
        pub loader_invocations_total: usize,
        pub loader_failed_total: usize,
        pub connect_retries_total: usize,
        pub flow_cancelled_total: usize,
    }

    pub fn snapshot() -> Snapshot {
        Snapshot {
            inspections_total: INSPECTIONS_TOTAL.load(Ordering::Relaxed),
            statements_applied_total: STATEMENTS_APPLIED_TOTAL.load(Ordering::Relaxed),
            statements_failed_total: STATEMENTS_FAILED_TOTAL.load(Ordering::Relaxed),
            idempotent_skips_total: IDEMPOTENT_SKIPS_TOTAL.load(Ordering::Relaxed),
            import_fast_path_hit_total: IMPORT_FAST_PATH_HIT_TOTAL.load(Ordering::Relaxed),
            loader_invocations_total: LOADER_INVOCATIONS_TOTAL.load(Ordering::Relaxed),
            loader_failed_total: LOADER_FAILED_TOTAL.load(Ordering::Relaxed),
            connect_retries_total: CONNECT_RETRIES_TOTAL.load(Ordering::Relaxed),
            flow_cancelled_total: FLOW_CANCELLED_TOTAL.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(context: &str) {
        let s = snapshot();
        tracing::info!(
            context = context,
            inspections_total = s.inspections_total,
            statements_applied_total = s.statements_applied_total,
            statements_failed_total = s.statements_failed_total,
            idempotent_skips_total = s.idempotent_skips_total,
            import_fast_path_hit_total = s.import_fast_path_hit_total,
            loader_invocations_total = s.loader_invocations_total,
            loader_failed_total = s.loader_failed_total,
            connect_retries_total = s.connect_retries_total,
            flow_cancelled_total = s.flow_cancelled_total,
            "migration_counters"
        );
    }
}
