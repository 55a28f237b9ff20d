use jdsync_config::{global_log_buffer, init_tracing, LoggingConfig};

#[test]
fn init_tracing_captures_events_in_the_global_buffer() {
    let config = LoggingConfig {
        level: "jdsync.test=debug".to_owned(),
        stderr: false,
        buffer_lines: 16,
    };

    let buffer = init_tracing(&config);
    // Later calls are no-ops that hand back the same buffer.
    let again = init_tracing(&LoggingConfig::default());
    assert!(std::sync::Arc::ptr_eq(&buffer, &again));
    assert!(std::sync::Arc::ptr_eq(&buffer, &global_log_buffer()));

    tracing::debug!(target: "jdsync.test", request = 7, "listener registered");

    let lines = buffer.last_lines(16);
    assert!(
        lines
            .iter()
            .any(|line| line.contains("listener registered") && line.contains("request=7")),
        "{lines:?}"
    );
}
