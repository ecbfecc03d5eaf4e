mod config;
mod content_cmds;
mod serve_cmd;
mod status_cmd;

use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use sqlx::PgPool;

use immo_core::coordinator::{Coordinator, DEFAULT_SECTIONS};
use immo_core::llm::{AnthropicClient, RetryConfig, RetryingClient};
use immo_db::config::DbConfig;
use immo_db::pool;

use config::ImmoConfig;

#[derive(Parser)]
#[command(name = "immo", about = "Draft long-form content with an LLM, stage by stage")]
struct Cli {
    /// Database URL (overrides IMMO_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write an immo config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Anthropic API key to store in the config file
        #[arg(long)]
        api_key: Option<String>,
        /// Model to generate with
        #[arg(long)]
        model: Option<String>,
        /// Origin allowed by `immo serve` CORS (repeatable; default any)
        #[arg(long = "allowed-origin")]
        allowed_origins: Vec<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the immo database
    DbInit,
    /// Start the HTTP API
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Create a content job from a description
    Create {
        /// What to write about (10 to 1000 characters)
        description: String,
        /// Number of sections to plan
        #[arg(long, default_value_t = DEFAULT_SECTIONS)]
        sections: i32,
        /// Writing style, e.g. "noir" or "literary"
        #[arg(long)]
        style: Option<String>,
    },
    /// Run every stage for a content job
    Run {
        /// Content ID
        content_id: String,
    },
    /// Generate the title, outline and section plan
    Outline {
        /// Content ID
        content_id: String,
        /// Print text as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Regenerate sections from the outline
    Sections {
        /// Content ID
        content_id: String,
        /// Number of sections (defaults to the job's sections count)
        #[arg(long)]
        count: Option<i32>,
    },
    /// Break one section into scenes
    Scenes {
        /// Content ID
        content_id: String,
        /// Section number, starting at 1
        section: i32,
    },
    /// Write the prose for one scene
    Prose {
        /// Content ID
        content_id: String,
        /// Section number, starting at 1
        section: i32,
        /// Scene number within the section, starting at 1
        scene: i32,
        /// Print text as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Show content progress (omit content_id to list recent jobs)
    Status {
        /// Content ID to show (omit to list)
        content_id: Option<String>,
    },
    /// Settle a content job's final status from its sections
    Finalize {
        /// Content ID
        content_id: String,
    },
    /// Mark work that stopped making progress as failed
    ResetStuck {
        /// Minimum age, in seconds, of the last status change
        #[arg(long, default_value_t = 600)]
        older_than_secs: u64,
    },
    /// Delete a content job with its sections and scenes
    Delete {
        /// Content ID
        content_id: String,
    },
    /// Print shell completions
    Completions {
        /// Shell to generate for
        shell: Shell,
    },
}

fn cmd_init(
    db_url: &str,
    api_key: Option<String>,
    model: Option<String>,
    allowed_origins: Vec<String>,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let has_key = api_key.is_some();
    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_owned(),
        },
        provider: config::ProviderSection { api_key, model },
        server: config::ServerSection { allowed_origins },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    if let Some(model) = &cfg.provider.model {
        println!("  provider.model = {model}");
    }
    if has_key {
        println!("  provider.api_key = <set>");
    } else {
        println!("  provider.api_key not set; export ANTHROPIC_API_KEY before generating.");
    }
    println!();
    println!("Next: run `immo db-init` to create and migrate the database.");

    Ok(())
}

async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = ImmoConfig::resolve(cli_db_url)?;

    println!("Initializing immo database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("immo db-init complete.");
    Ok(())
}

/// Wire the provider client, with retries, into a coordinator.
fn build_coordinator(resolved: &ImmoConfig, pool: PgPool) -> anyhow::Result<Coordinator> {
    let client = AnthropicClient::new(resolved.provider.clone())
        .context("failed to build the generation client")?;
    let client = RetryingClient::new(client, RetryConfig::default());
    Ok(Coordinator::new(pool, Arc::new(client)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            api_key,
            model,
            allowed_origins,
            force,
        } => {
            return cmd_init(&db_url, api_key, model, allowed_origins, force);
        }
        Commands::DbInit => {
            return cmd_db_init(cli.database_url.as_deref()).await;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "immo", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let resolved = ImmoConfig::resolve(cli.database_url.as_deref())?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let coordinator = build_coordinator(&resolved, db_pool.clone())?;

    let result = match cli.command {
        Commands::Serve { bind, port } => {
            serve_cmd::run_serve(coordinator, &resolved.allowed_origins, &bind, port).await
        }
        Commands::Create {
            description,
            sections,
            style,
        } => content_cmds::run_create(&coordinator, &description, sections, style.as_deref()).await,
        Commands::Run { content_id } => content_cmds::run_pipeline(&coordinator, &content_id).await,
        Commands::Outline { content_id, stream } => {
            content_cmds::run_outline(&coordinator, &content_id, stream).await
        }
        Commands::Sections { content_id, count } => {
            content_cmds::run_sections(&coordinator, &content_id, count).await
        }
        Commands::Scenes {
            content_id,
            section,
        } => content_cmds::run_scenes(&coordinator, &content_id, section).await,
        Commands::Prose {
            content_id,
            section,
            scene,
            stream,
        } => content_cmds::run_prose(&coordinator, &content_id, section, scene, stream).await,
        Commands::Status { content_id } => {
            status_cmd::run_status(&coordinator, content_id.as_deref()).await
        }
        Commands::Finalize { content_id } => {
            content_cmds::run_finalize(&coordinator, &content_id).await
        }
        Commands::ResetStuck { older_than_secs } => {
            content_cmds::run_reset_stuck(&coordinator, older_than_secs).await
        }
        Commands::Delete { content_id } => content_cmds::run_delete(&coordinator, &content_id).await,
        Commands::Init { .. } | Commands::DbInit | Commands::Completions { .. } => Ok(()),
    };

    db_pool.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn prose_takes_positional_numbers() {
        let cli = Cli::try_parse_from([
            "immo",
            "prose",
            "7a1c2f0e-0000-4000-8000-000000000001",
            "2",
            "3",
            "--stream",
        ])
        .unwrap();
        match cli.command {
            Commands::Prose {
                section,
                scene,
                stream,
                ..
            } => {
                assert_eq!((section, scene), (2, 3));
                assert!(stream);
            }
            _ => panic!("expected prose command"),
        }
    }

    #[test]
    fn database_url_is_global() {
        let cli = Cli::try_parse_from([
            "immo",
            "status",
            "--database-url",
            "postgresql://elsewhere:5432/immo",
        ])
        .unwrap();
        assert_eq!(
            cli.database_url.as_deref(),
            Some("postgresql://elsewhere:5432/immo")
        );
    }

    #[test]
    fn create_defaults_to_five_sections() {
        let cli = Cli::try_parse_from(["immo", "create", "A storm strands a ferry crew."]).unwrap();
        match cli.command {
            Commands::Create { sections, style, .. } => {
                assert_eq!(sections, DEFAULT_SECTIONS);
                assert_eq!(style, None);
            }
            _ => panic!("expected create command"),
        }
    }
}
