//! # Command Line Interface
//!
//! Serve the API, bootstrap accounts and inspect the database schema.

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::api::ApiState;
use crate::auth::account_service::CreateUserRequest;
use crate::config::AppConfig;
use crate::observability::{init_logging, init_observability, log_config_info};
use crate::storage::{
    create_pool, list_applied_migrations, run_migrations, validate_migrations, MigrationInfo,
};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Account token issuance and live authentication updates")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Database URL override
    #[arg(long)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to
        #[arg(short = 'a', long)]
        host: Option<String>,
    },

    /// Create an account and print its first API token
    CreateUser {
        #[arg(long)]
        username: String,

        #[arg(long)]
        password: String,

        /// Grant the configured admin role
        #[arg(long)]
        admin: bool,

        /// Issue a token that never expires
        #[arg(long)]
        permanent_token: bool,
    },

    /// Database management commands
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,
    },
}

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Run pending migrations
    Migrate,

    /// Exit non-zero if migrations are pending
    Status,

    /// List all applied migrations
    List,
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }

    match cli.command.unwrap_or(Commands::Serve { port: None, host: None }) {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            config.validate()?;

            init_observability(&config.observability)?;
            tracing::info!(app_name = crate::APP_NAME, version = crate::VERSION, "Starting warden");
            log_config_info(&config);
            crate::startup::run_server(config).await?;
        }

        Commands::CreateUser { username, password, admin, permanent_token } => {
            init_logging(&config.observability)?;
            create_user(&config, CreateUserRequest { username, password, admin }, permanent_token)
                .await?;
        }

        Commands::Database { command } => {
            init_logging(&config.observability)?;
            handle_database_command(command, &config).await?;
        }
    }

    Ok(())
}

async fn create_user(
    config: &AppConfig,
    request: CreateUserRequest,
    permanent_token: bool,
) -> anyhow::Result<()> {
    let pool = create_pool(&config.database).await?;
    let state = ApiState::from_pool(pool, config);
    let accounts = Arc::clone(&state.accounts);

    let mut user = accounts.create_user(request).await?;
    if permanent_token {
        user = accounts.set_permanent_api_token(&user.id, true).await?;
    }

    println!("Created user '{}' ({})", user.username, user.id);
    if let Some(token) = user.api_token.as_ref() {
        println!("API token: {}", token.token);
        if token.permanent {
            println!("The token never expires");
        } else {
            println!("Expires at: {}", token.expires_at.to_rfc3339());
        }
    }
    Ok(())
}

/// Handle database management commands
async fn handle_database_command(
    command: DatabaseCommands,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let mut database = config.database.clone();
    database.auto_migrate = false;
    let pool = create_pool(&database).await?;

    match command {
        DatabaseCommands::Migrate => {
            println!("Running database migrations...");
            run_migrations(&pool).await?;
            println!("Migrations completed successfully");
        }

        DatabaseCommands::Status => {
            if validate_migrations(&pool).await? {
                println!("Database schema is up to date");
            } else {
                println!("Database schema has pending migrations");
                process::exit(1);
            }
        }

        DatabaseCommands::List => {
            let migrations = list_applied_migrations(&pool).await?;
            if migrations.is_empty() {
                println!("No migrations have been applied");
            } else {
                print_migrations_table(&migrations);
            }
        }
    }

    Ok(())
}

/// Print migrations in a formatted table
fn print_migrations_table(migrations: &[MigrationInfo]) {
    println!("{:<15} {:<40} {:<25} {:<10}", "Version", "Description", "Applied On", "Time (ms)");
    println!("{}", "-".repeat(90));
    for migration in migrations {
        println!(
            "{:<15} {:<40} {:<25} {:<10}",
            migration.version,
            truncate_string(&migration.description, 38),
            migration.installed_on.format("%Y-%m-%d %H:%M:%S"),
            migration.execution_time
        );
    }
}

/// Truncate string to fit in table column
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
