//! fablier server entry point.

use clap::Parser;
use fablier::{
    assets::AssetStore,
    auth::AuthService,
    config::{Cli, Command, Config, UserCommand},
    db::{Database, Role},
    mail::LogMailer,
    server,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    std::fs::create_dir_all(&config.uploads.dir)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: fablier serve");
    println!("The first account to register becomes admin.");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(
        db.clone(),
        config.auth.session_days,
        config.auth.recovery_minutes,
        config.auth.registration_enabled(),
    );

    match action {
        UserCommand::Add {
            username,
            email,
            password,
            role,
        } => {
            let role = Role::from_str_opt(&role)
                .ok_or_else(|| anyhow::anyhow!("Role must be 'admin' or 'user'"))?;

            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.create_user(&username, &email, &password, role)?;
            println!(
                "Created user: {} (role: {}, id: {})",
                user.username,
                user.role.as_str(),
                user.id
            );
        }

        UserCommand::Del { username } => match db.get_user_by_username(&username)? {
            Some(user) => {
                db.delete_user(&user.id)?;
                println!("Deleted user: {}", username);
            }
            None => println!("User not found: {}", username),
        },

        UserCommand::List => {
            let users = db.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<20} {:<10} {:<30} ID", "USERNAME", "ROLE", "EMAIL");
                println!("{}", "-".repeat(80));
                for user in users {
                    println!(
                        "{:<20} {:<10} {:<30} {}",
                        user.username,
                        user.role.as_str(),
                        user.email,
                        user.id
                    );
                }
            }
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            match db.get_user_by_username(&username)? {
                Some(user) => {
                    auth.change_password(&user.id, &password)?;
                    println!("Password changed for: {}", username);
                }
                None => println!("User not found: {}", username),
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fablier=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Database::open(&config.database.path)?;
    db.cleanup_expired_sessions()?;

    let auth = AuthService::new(
        db.clone(),
        config.auth.session_days,
        config.auth.recovery_minutes,
        config.auth.registration_enabled(),
    );

    let assets = AssetStore::new(config.uploads.dir.clone())?;
    let mailer = Arc::new(LogMailer::new(config.mail.from.clone()));

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        uploads = %config.uploads.dir.display(),
        "Starting fablier server"
    );

    let state = server::AppState::new(config.clone(), db, auth, assets, mailer);
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
