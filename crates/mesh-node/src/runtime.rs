//! Tokio runtime configuration

/// Build the multi-threaded runtime the CLI drives its async commands on.
pub fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}
