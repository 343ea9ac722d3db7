#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before any configuration is read; a missing file is fine.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    warden::cli::run_cli().await
}
