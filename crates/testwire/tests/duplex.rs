use testwire_testkit::DuplexFactory;

#[tokio::test]
async fn duplex_handshake_shares_settings() {
    testwire_testkit::run_handshake_shares_settings::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_suite_loaded_once() {
    testwire_testkit::run_suite_loaded_once::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_walk_tree() {
    testwire_testkit::run_walk_tree::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_results_and_failures() {
    testwire_testkit::run_results_and_failures::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_cancel_in_flight_run() {
    testwire_testkit::run_cancel_in_flight_run::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_concurrent_calls() {
    testwire_testkit::run_concurrent_calls::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_log_forwarding() {
    testwire_testkit::run_log_forwarding::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_statistics_forwarding() {
    testwire_testkit::run_statistics_forwarding::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_clean_shutdown() {
    testwire_testkit::run_clean_shutdown::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_teardown_resolves_pending() {
    testwire_testkit::run_teardown_resolves_pending::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_unknown_object() {
    testwire_testkit::run_unknown_object::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_cancel_stops_connection() {
    testwire_testkit::run_cancel_stops_connection::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_handshake_default_settings() {
    testwire_testkit::run_handshake_default_settings::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_statistics_not_requested() {
    testwire_testkit::run_statistics_not_requested::<DuplexFactory>().await;
}

#[tokio::test]
async fn duplex_cancel_after_completion() {
    testwire_testkit::run_cancel_after_completion::<DuplexFactory>().await;
}
