// Runtime web level filtering and line level recovery

#[test]
fn should_emit_filters_below_runtime_level() {
    use sunmine::logging::{set_web_log_level, should_emit_to_web};
    use tracing::Level;
    // Set runtime level to WARN, INFO lines should be filtered out, ERROR should pass
    set_web_log_level(Level::WARN);
    assert!(!should_emit_to_web(" INFO message"));
    assert!(should_emit_to_web(" ERROR something"));
    // Unparseable lines are always forwarded
    assert!(should_emit_to_web("no level here"));
    set_web_log_level(Level::INFO);
}

#[test]
fn recent_lines_are_bounded_by_request() {
    use sunmine::logging::{RecentLogs, recent_lines};
    let buf = RecentLogs::new(2);
    buf.push("a".to_string());
    buf.push("b".to_string());
    buf.push("c".to_string());
    assert_eq!(buf.tail(5), vec!["b", "c"]);
    assert!(recent_lines(0).is_empty());
}
