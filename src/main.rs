use std::process::ExitCode;
use std::sync::Arc;

use learnhub_auth::core::auth::{SessionManager, TracingNotifier};
use learnhub_auth::core::config::AuthConfig;
use learnhub_auth::core::db::pool::health_check;
use learnhub_auth::core::db::{
    DbConfig, RegistrationRepository, UserRepository, create_pool_with_migrations,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const USAGE: &str = "usage: learnhub-auth [migrate | confirm <username> <token> | sign-out <user-id>]";

enum Command {
    Migrate,
    Confirm { username: String, token: String },
    SignOut { user_id: Uuid },
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> Option<Self> {
        let command = match args.next().as_deref() {
            None | Some("migrate") => Command::Migrate,
            Some("confirm") => Command::Confirm {
                username: args.next()?,
                token: args.next()?,
            },
            Some("sign-out") => Command::SignOut {
                user_id: args.next()?.parse().ok()?,
            },
            Some(_) => return None,
        };

        args.next().is_none().then_some(command)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(command) = Command::parse(std::env::args().skip(1)) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let config = AuthConfig::from_env()?;

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: issuer={}, sender={}, confirmation_ttl={}h, bcrypt_cost={}",
        config.tokens.issuer,
        config.sender.mailbox(),
        config.confirmation_ttl_hours,
        config.bcrypt_cost
    );

    let db_config = DbConfig::from_env()?;
    let pool = create_pool_with_migrations(&db_config).await?;
    health_check(&pool).await?;

    let users = Arc::new(UserRepository::new(pool.clone()));
    let invitations = Arc::new(RegistrationRepository::new(pool));
    let notifier = Arc::new(TracingNotifier::new(
        config.sender.clone(),
        config.app_base_url.clone(),
    ));

    match command {
        Command::Migrate => {
            tracing::info!("{} account(s) on record", users.count().await?);
        }
        Command::Confirm { username, token } => {
            let manager = SessionManager::new(&config, users, invitations, notifier);
            manager.validate_account(&username, &token).await?;
            tracing::info!("Account {} confirmed", username);
        }
        Command::SignOut { user_id } => {
            let manager = SessionManager::new(&config, users, invitations, notifier);
            manager.sign_out(user_id).await?;
            tracing::info!("Session for user {} revoked", user_id);
        }
    }

    Ok(())
}
