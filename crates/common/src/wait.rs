use std::time::Duration;

/// Block until `connect` succeeds or `should_stop` turns true.
///
/// Returns `None` only when stopped before the resource became available.
pub fn wait_for_resource<F, T, E, S>(
    mut connect: F,
    poll_interval_ms: u64,
    resource_name: &str,
    should_stop: S,
) -> Option<T>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
    S: Fn() -> bool,
{
    loop {
        match connect() {
            Ok(resource) => {
                tracing::info!("{} connected", resource_name);
                return Some(resource);
            }
            Err(e) => {
                if should_stop() {
                    tracing::info!("Gave up waiting for {}", resource_name);
                    return None;
                }
                tracing::warn!(error = %e, "Waiting for {}", resource_name);
                std::thread::sleep(Duration::from_millis(poll_interval_ms));
            }
        }
    }
}
