//! convoke CLI binary
//!
//! Minimal entrypoint; all logic is in the library's cli module.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    convoke::cli::run().await
}
