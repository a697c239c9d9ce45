//! Prometheus metrics recorder and `/metrics` rendering.
//!
//! Metric names live in [`beacon_core::metrics`] so the client role records
//! under the same names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub use beacon_core::metrics::*;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_local_recorder() {
        // No global install, so tests do not fight over the recorder.
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(HEARTBEAT_PINGS_SENT_TOTAL).increment(3);
        });
        let output = render(&handle);
        assert!(output.contains(HEARTBEAT_PINGS_SENT_TOTAL));
    }
}
