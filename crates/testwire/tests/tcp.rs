use testwire_testkit::TcpFactory;

#[tokio::test]
async fn tcp_handshake_shares_settings() {
    testwire_testkit::run_handshake_shares_settings::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_suite_loaded_once() {
    testwire_testkit::run_suite_loaded_once::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_walk_tree() {
    testwire_testkit::run_walk_tree::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_results_and_failures() {
    testwire_testkit::run_results_and_failures::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_cancel_in_flight_run() {
    testwire_testkit::run_cancel_in_flight_run::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_concurrent_calls() {
    testwire_testkit::run_concurrent_calls::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_log_forwarding() {
    testwire_testkit::run_log_forwarding::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_statistics_forwarding() {
    testwire_testkit::run_statistics_forwarding::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_clean_shutdown() {
    testwire_testkit::run_clean_shutdown::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_teardown_resolves_pending() {
    testwire_testkit::run_teardown_resolves_pending::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_unknown_object() {
    testwire_testkit::run_unknown_object::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_cancel_stops_connection() {
    testwire_testkit::run_cancel_stops_connection::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_handshake_default_settings() {
    testwire_testkit::run_handshake_default_settings::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_statistics_not_requested() {
    testwire_testkit::run_statistics_not_requested::<TcpFactory>().await;
}

#[tokio::test]
async fn tcp_cancel_after_completion() {
    testwire_testkit::run_cancel_after_completion::<TcpFactory>().await;
}
