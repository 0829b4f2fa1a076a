//! CRM CLI - operator commands for the auth core
//!
//! Usage:
//!   crm migrate
//!   crm tenant create <slug> <name>
//!   crm tenant suspend <slug>
//!   crm tenant activate <slug>
//!   crm tenant list
//!   crm create-admin <email> <name>
//!   crm sweep-sessions

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crm_api::auth::{CredentialHasher, PasswordConfig, PasswordPolicy};
use crm_core::{
    AppConfig, AuthStore, MembershipStore, NewUser, PgStore, Role, SessionStore, StoreBackend,
    Tenant, TenantStatus, TenantStore, UserStore,
};

#[derive(Parser)]
#[command(name = "crm")]
#[command(about = "Operator CLI for the CRM auth core")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, env = "CRM_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Manage tenants
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },
    /// Create a platform administrator, or promote an existing user
    CreateAdmin {
        email: String,
        name: String,
        /// Password for a new account
        #[arg(long, env = "CRM_ADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Delete sessions past their refresh expiry
    SweepSessions,
}

#[derive(Subcommand)]
enum TenantAction {
    /// Create an active tenant
    Create { slug: String, name: String },
    /// Suspend a tenant; its sessions stop validating
    Suspend { slug: String },
    /// Reactivate a suspended tenant
    Activate { slug: String },
    /// List all tenants
    List,
}

fn load_config(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading configuration from {path}"))?
            .with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgStore> {
    if config.database.backend != StoreBackend::Postgres {
        bail!("the CLI operates on the postgres backend only (STORE_BACKEND=postgres)");
    }
    Ok(PgStore::connect(&config.database).await?)
}

async fn tenant_by_slug(store: &PgStore, slug: &str) -> anyhow::Result<Tenant> {
    store
        .find_tenant_by_slug(slug)
        .await?
        .with_context(|| format!("tenant '{slug}' not found"))
}

async fn run_tenant(store: &PgStore, action: TenantAction) -> anyhow::Result<()> {
    match action {
        TenantAction::Create { slug, name } => {
            let tenant = store.create_tenant(Tenant::new(&slug, &name)?).await?;
            println!("Created tenant {} ({})", tenant.slug, tenant.id);
        }
        TenantAction::Suspend { slug } => {
            let tenant = tenant_by_slug(store, &slug).await?;
            store
                .set_tenant_status(tenant.id, TenantStatus::Suspended)
                .await?;
            println!("Suspended tenant {slug}");
        }
        TenantAction::Activate { slug } => {
            let tenant = tenant_by_slug(store, &slug).await?;
            store
                .set_tenant_status(tenant.id, TenantStatus::Active)
                .await?;
            println!("Activated tenant {slug}");
        }
        TenantAction::List => {
            let tenants = store.list_tenants().await?;
            if tenants.is_empty() {
                println!("No tenants");
            }
            for tenant in tenants {
                println!(
                    "{}\t{:<24}\t{:<10}\t{}",
                    tenant.id,
                    tenant.slug,
                    tenant.status.as_str(),
                    tenant.name
                );
            }
        }
    }
    Ok(())
}

async fn create_admin(
    store: &PgStore,
    config: &AppConfig,
    email: &str,
    name: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    let new_user = NewUser::new(email, name)?;

    let user = match store.find_user_by_email(&new_user.email).await? {
        Some(user) => {
            println!("User {} exists, granting platform_admin", user.email);
            user
        }
        None => {
            let password = password.context(
                "a password is required for a new account (--password or CRM_ADMIN_PASSWORD)",
            )?;
            PasswordPolicy::from(&config.auth.password_policy).validate(&password)?;
            let hasher =
                CredentialHasher::new(PasswordConfig::from(&config.auth.password_hashing));
            let hash = hasher.hash(&password).await?;
            store.create_user(new_user, hash).await?
        }
    };

    store.grant_role(user.id, None, Role::PlatformAdmin).await?;
    println!("Platform admin {} ({})", user.email, user.id);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crm_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let store = connect(&config).await?;
    tracing::debug!(backend = store.backend_name(), "Connected");

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            println!("Migrations applied");
        }
        Commands::Tenant { action } => run_tenant(&store, action).await?,
        Commands::CreateAdmin {
            email,
            name,
            password,
        } => create_admin(&store, &config, &email, &name, password).await?,
        Commands::SweepSessions => {
            let removed = store.delete_expired_sessions(Utc::now()).await?;
            println!("Removed {removed} expired sessions");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_tenant_create() {
        let cli = Cli::parse_from(["crm", "tenant", "create", "demo", "Demo Realty"]);
        match cli.command {
            Commands::Tenant {
                action: TenantAction::Create { slug, name },
            } => {
                assert_eq!(slug, "demo");
                assert_eq!(name, "Demo Realty");
            }
            _ => panic!("expected tenant create"),
        }
    }

    #[test]
    fn test_memory_backend_rejected() {
        let mut config = AppConfig::default();
        config.database.backend = StoreBackend::Memory;
        let rt = tokio::runtime::Runtime::new().unwrap();
        assert!(rt.block_on(connect(&config)).is_err());
    }
}
