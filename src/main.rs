/// Nick Hider - operator CLI
///
/// Inspect aliases and masks, sanitize text and run live texture
/// resolutions against the configured profile services.
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nickhider::{
    config::EngineConfig,
    identity::{AliasRegistry, IdentityMasker, ProfileIdentity},
    mojang::{HttpExternalFallback, MojangClient, RemoteHttp},
    resolution::{FetchWorker, ResolutionService},
    sanitize::{SessionSnapshot, StaticDirectory, TextSanitizer},
    textures::{DefaultTextures, DiskTextureStore},
    PrivacyConfig,
};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "nickhider", version, about = "Identity masking engine tools")]
struct Cli {
    /// Privacy config JSON file (defaults apply when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print (creating if needed) the alias token of an identifier
    Alias { id: Uuid },

    /// Show the masked identity for a name and identifier
    Mask {
        id: Uuid,
        name: String,
        /// Treat the identity as the local user
        #[arg(long)]
        local: bool,
    },

    /// Sanitize stdin to stdout
    Sanitize {
        /// Known identity as `uuid=name`, the first one is the local user
        #[arg(long = "name", value_parser = parse_identity)]
        names: Vec<ProfileIdentity>,
    },

    /// Fetch a username's textures and print the result
    Resolve {
        username: String,
        /// Seconds to wait for the background fetch
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
        /// Dump Prometheus metrics after the fetch
        #[arg(long)]
        metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let engine = EngineConfig::from_env()?;
    init_logging(&engine, cli.json_logs);

    let privacy = load_privacy_config(cli.config.as_deref())?;
    let aliases = Arc::new(AliasRegistry::open(&engine.storage.alias_file));

    match cli.command {
        Command::Alias { id } => {
            println!("{}", aliases.get_or_create_short_token(&id));
        }
        Command::Mask { id, name, local } => {
            let masker = IdentityMasker::new(aliases);
            let for_name = masker.mask_for_name(Some(&privacy), local, id, &name);
            let for_texture = masker.mask_for_texture(Some(&privacy), local, id, &name);
            println!("name:    {} {}", for_name.name, for_name.id);
            println!("texture: {} {}", for_texture.name, for_texture.id);
        }
        Command::Sanitize { names } => {
            let Some(local) = names.first().cloned() else {
                bail!("at least one --name uuid=name is required");
            };
            let snapshot = SessionSnapshot {
                account_id: Some(local.id),
                account_name: Some(local.name.clone()),
                player: Some(local),
                online: names,
            };
            let sanitizer = TextSanitizer::new(
                IdentityMasker::new(aliases),
                Arc::new(StaticDirectory::new(snapshot)),
            );

            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            std::io::stdout().write_all(sanitizer.sanitize(&input, &privacy).as_bytes())?;
        }
        Command::Resolve {
            username,
            wait_secs,
            metrics,
        } => {
            resolve(&engine, &privacy, &username, Duration::from_secs(wait_secs)).await?;
            if metrics {
                print!("{}", nickhider::metrics::render_metrics()?);
            }
        }
    }

    Ok(())
}

fn init_logging(engine: &EngineConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("nickhider={}", engine.logging.level).into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_privacy_config(path: Option<&std::path::Path>) -> Result<PrivacyConfig> {
    let Some(path) = path else {
        return Ok(PrivacyConfig::default());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading privacy config {}", path.display()))?;
    let config: PrivacyConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing privacy config {}", path.display()))?;
    if let Err(errors) = nickhider::validation::validate_privacy_config(&config) {
        bail!(
            "invalid privacy config: {}",
            nickhider::validation::describe(&errors)
        );
    }
    Ok(config)
}

fn parse_identity(raw: &str) -> std::result::Result<ProfileIdentity, String> {
    let (id, name) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected uuid=name, got {}", raw))?;
    let id = Uuid::parse_str(id.trim()).map_err(|e| format!("invalid uuid {}: {}", id, e))?;
    Ok(ProfileIdentity::new(id, name.trim()))
}

async fn resolve(
    engine: &EngineConfig,
    privacy: &PrivacyConfig,
    username: &str,
    wait: Duration,
) -> Result<()> {
    tokio::fs::create_dir_all(&engine.storage.texture_directory).await?;

    let http = RemoteHttp::new(&engine.http)?;
    let defaults = Arc::new(DefaultTextures);
    let client = Arc::new(MojangClient::with_http(
        http.clone(),
        &engine.http,
        Arc::new(DiskTextureStore::new(&engine.storage.texture_directory)),
        defaults.clone(),
    ));
    let service = ResolutionService::builder(client.clone(), client, defaults)
        .external(Arc::new(HttpExternalFallback::with_http(http, &engine.http)))
        .executor(Arc::new(FetchWorker::spawn()))
        .build();

    let fallback = Uuid::new_v4();
    let allow_external = privacy.allow_external_fallback;
    service.resolve_or_fallback(username, fallback, allow_external);
    info!("Queued fetch for {}", username);

    let started = Instant::now();
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = service
            .source_snapshot(username)
            .context("source state disappeared")?;
        if !snapshot.in_flight {
            break;
        }
        if started.elapsed() >= wait {
            bail!("fetch for {} still running after {:?}", username, wait);
        }
    }

    let resolved = service.resolve_or_fallback(username, fallback, allow_external);
    println!("texture: {}", resolved.texture);
    println!("model:   {}", resolved.model.as_str());
    if let Some(cape) = &resolved.cape {
        println!("cape:    {}", cape);
    }
    if let Some(elytra) = &resolved.elytra {
        println!("elytra:  {}", elytra);
    }
    println!("status:  {}", service.status_summary());
    Ok(())
}
