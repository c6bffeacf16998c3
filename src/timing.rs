use std::time::Instant;

/// Run `f` and log how long it took under `label`
pub fn measure<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱️  {} took {:.6} sec", label, start.elapsed().as_secs_f64());
    result
}
