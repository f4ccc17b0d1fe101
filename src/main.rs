use clap::{Parser, Subcommand};
use plantlog::app::{build_router, AppState};
use plantlog::auth::session::session_cleanup_loop;
use plantlog::catalog::seed_reference_data;
use plantlog::config::AppConfig;
use plantlog::employees::{create_user, NewUser};
use plantlog::storage;
use plantlog::storage::sqlite::interact;
use plantlog::types::Role;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser)]
#[command(name = "plantlog", about = "Production tracking for aerated-concrete plants")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Insert the standard materials, equipment and products
    Seed,
    /// Create a login account, an administrator by default
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Administrator")]
        fio: String,
        #[arg(long, default_value = "admin")]
        role: Role,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plantlog=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    // Setup SQLite pool
    let pool = storage::sqlite::create_pool(&config.database)?;
    storage::sqlite::init_pool(&pool).await?;
    tracing::info!(db = %config.database.path.display(), "database initialized");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, config).await,
        Command::Seed => {
            let report = interact(&pool, |conn| Ok(seed_reference_data(conn)?)).await?;
            tracing::info!(
                materials = report.materials,
                equipment = report.equipment,
                products = report.products,
                "reference data seeded"
            );
            Ok(())
        }
        Command::CreateAdmin {
            username,
            password,
            fio,
            role,
        } => {
            if password.len() < 6 {
                return Err("password must be at least 6 characters".into());
            }
            let user = NewUser {
                username,
                password,
                fio,
                iin: None,
                position: None,
                role,
            };
            let created = create_user(&pool, user, config.auth.password_iterations).await?;
            tracing::info!(user_id = created.id, username = %created.username, role = %created.role, "account created");
            Ok(())
        }
    }
}

async fn serve(
    pool: deadpool_sqlite::Pool,
    config: AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "starting plantlog"
    );

    // Spawn session cleanup
    let cleanup_pool = pool.clone();
    tokio::spawn(async move {
        session_cleanup_loop(cleanup_pool).await;
    });

    let state = Arc::new(AppState::new(pool, config));
    let app = build_router(state)?;

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}
