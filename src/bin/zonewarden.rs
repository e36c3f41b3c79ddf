use std::{net::IpAddr, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use zonewarden::{
    AppState, SharedState, api,
    config::AppConfig,
    db, dnssec,
    engine::providers::{self, DeleteMode, ProviderRequest},
    engine::records::{self, DeleteRecordOptions, RecordRequest},
    engine::zones::{self, DeleteZoneOptions, ZoneRequest},
    export,
    fcrdns::{self, DnsLookup, HickoryLookup},
    models::{ConnectionConfig, KeyType, ProviderType, RecordType, ZoneKind},
    provider::ProviderRegistry,
    reverse::ReversePolicy,
    sync,
    validation::{normalize_fqdn, validate_fqdn},
};

#[derive(Parser, Debug)]
#[command(author, version, about, rename_all = "kebab-case")]
struct Cli {
    /// Path to the SQLite cache database
    #[arg(long, value_name = "PATH", default_value = "zonewarden.db", global = true)]
    db_path: PathBuf,
    /// TTL for zones and records that do not specify one
    #[arg(long, value_name = "SECS", default_value_t = 3600, global = true)]
    default_ttl: u32,
    /// Default nameserver FQDN for new zones (repeat for multiple values)
    #[arg(long = "nameserver", value_name = "FQDN", global = true)]
    nameservers: Vec<String>,
    /// SOA contact (defaults to hostmaster.<zone>.)
    #[arg(long, value_name = "FQDN", global = true)]
    soa_contact: Option<String>,
    /// IPv6 reverse-zone boundary in nibbles (31 = single-nibble owner names, 16 = /64)
    #[arg(long, value_name = "N", default_value_t = 31, global = true)]
    ipv6_reverse_nibbles: usize,
    /// Resolver address for FCrDNS and DNSSEC checks (defaults to the system resolver)
    #[arg(long = "resolver", value_name = "IP", global = true)]
    resolvers: Vec<IpAddr>,
    /// Bearer token required by the admin API
    #[arg(long, value_name = "TOKEN", global = true)]
    api_token: Option<String>,
    /// ssh executable used for PowerDNS tunnels
    #[arg(long, value_name = "PATH", default_value = "ssh", global = true)]
    ssh_binary: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP admin API
    Serve {
        #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
    /// Manage backend providers
    #[command(subcommand)]
    Provider(ProviderCommand),
    /// Reconcile the local cache with the backends
    Sync {
        #[arg(long, value_name = "ID")]
        provider: Option<i64>,
        #[arg(long, value_name = "ID", conflicts_with = "provider")]
        zone: Option<i64>,
    },
    /// Manage zones
    #[command(subcommand)]
    Zone(ZoneCommand),
    /// Manage records
    #[command(subcommand)]
    Record(RecordCommand),
    /// Forward-confirmed reverse DNS check
    Fcrdns {
        fqdn: String,
        ip: IpAddr,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Wait up to this many seconds for propagation first
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },
    /// DNSSEC lifecycle
    #[command(subcommand)]
    Dnssec(DnssecCommand),
}

#[derive(Subcommand, Debug)]
enum ProviderCommand {
    Add(ProviderAdd),
    List,
    Test { id: i64 },
    Remove {
        id: i64,
        /// Also remove the provider's zones and records from the cache
        #[arg(long, conflicts_with_all = ["force", "reassign"])]
        cascade: bool,
        /// Remove even though zones still reference it
        #[arg(long, conflicts_with = "reassign")]
        force: bool,
        /// Move the provider's zones to this provider first
        #[arg(long, value_name = "ID")]
        reassign: Option<i64>,
    },
}

#[derive(Args, Debug)]
struct ProviderAdd {
    name: String,
    #[arg(long = "type", value_name = "TYPE")]
    provider_type: ProviderType,
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,
    #[arg(long, value_name = "TOKEN")]
    api_token: Option<String>,
    #[arg(long, value_name = "ID")]
    server_id: Option<String>,
    #[arg(long, value_name = "ID")]
    account_id: Option<String>,
    #[arg(long, value_name = "HOST")]
    ssh_host: Option<String>,
    #[arg(long, value_name = "USER")]
    ssh_user: Option<String>,
    #[arg(long, value_name = "PORT")]
    ssh_port: Option<u16>,
    #[arg(long, value_name = "PORT")]
    remote_api_port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum ZoneCommand {
    Create {
        name: String,
        #[arg(long, value_name = "ID")]
        provider: i64,
        #[arg(long, default_value = "native")]
        kind: ZoneKind,
        #[arg(long = "master", value_name = "IP")]
        masters: Vec<String>,
        #[arg(long, value_name = "SECS")]
        ttl: Option<u32>,
        #[arg(long)]
        auto_dnssec: bool,
    },
    List {
        #[arg(long, value_name = "ID")]
        provider: Option<i64>,
    },
    Export { id: i64 },
    Delete {
        id: i64,
        /// Only drop the cached zone
        #[arg(long)]
        skip_remote: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RecordCommand {
    Add {
        #[arg(long, value_name = "ID")]
        zone: i64,
        name: String,
        #[arg(value_name = "TYPE")]
        rtype: RecordType,
        content: String,
        #[arg(long)]
        ttl: Option<u32>,
        #[arg(long)]
        priority: Option<u16>,
        #[arg(long)]
        comment: Option<String>,
        /// Create the matching PTR for A/AAAA records
        #[arg(long)]
        auto_ptr: bool,
        #[arg(long)]
        allow_duplicate: bool,
    },
    List {
        #[arg(long, value_name = "ID")]
        zone: i64,
    },
    Delete {
        id: i64,
        #[arg(long)]
        delete_ptr: bool,
        #[arg(long)]
        skip_remote: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DnssecCommand {
    Enable {
        /// Zone ids
        #[arg(required = true)]
        zones: Vec<i64>,
    },
    Disable { zone: i64 },
    Keys {
        zone: i64,
        /// Generate a new KSK/ZSK pair first
        #[arg(long)]
        generate: bool,
        #[arg(long, requires = "generate")]
        algorithm: Option<String>,
        /// Activate this key id
        #[arg(long, value_name = "KEY_ID", conflicts_with = "generate")]
        activate: Option<String>,
    },
    Rollover {
        zone: i64,
        #[arg(long, value_name = "ksk|zsk|csk")]
        key_type: KeyType,
        /// Required; rollover never runs implicitly
        #[arg(long)]
        confirm: bool,
    },
    Validate {
        zone: i64,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = build_app_config(&cli)?;
    let state = init_shared_state(&cli, config).await?;

    let result = run(cli.command, state.clone()).await;
    state.shutdown().await;
    result
}

async fn run(command: Command, state: SharedState) -> Result<()> {
    match command {
        Command::Serve { listen } => serve(state, listen).await,
        Command::Provider(cmd) => provider_command(&state, cmd).await,
        Command::Sync { provider, zone } => {
            let report = match (provider, zone) {
                (Some(id), _) => sync::sync_provider(&state, id).await?,
                (None, Some(id)) => sync::sync_zone(&state, id).await?,
                (None, None) => sync::sync_all(&state).await?,
            };
            print_json(&report)?;
            if !report.is_clean() {
                bail!("{} sync failure(s)", report.failures.len());
            }
            Ok(())
        }
        Command::Zone(cmd) => zone_command(&state, cmd).await,
        Command::Record(cmd) => record_command(&state, cmd).await,
        Command::Fcrdns {
            fqdn,
            ip,
            json,
            wait,
        } => {
            let lookup = state.lookup.as_ref();
            if let Some(secs) = wait {
                fcrdns::wait_for_propagation(
                    lookup,
                    &fqdn,
                    ip,
                    Duration::from_secs(secs),
                    state.config.propagation.interval,
                )
                .await;
            }
            let report = fcrdns::validate(lookup, &fqdn, ip).await;
            if json {
                print_json(&report)?;
            } else {
                print!("{}", report.render_text());
            }
            if !report.has_fcr_dns {
                bail!("FCrDNS not confirmed for {fqdn}");
            }
            Ok(())
        }
        Command::Dnssec(cmd) => dnssec_command(&state, cmd).await,
    }
}

async fn serve(state: SharedState, listen: SocketAddr) -> Result<()> {
    if state.config.api_token.is_none() {
        warn!("no --api-token given; the admin API accepts every request");
    }
    let app = api::create_router(state);

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind to {listen}"))?;

    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    Ok(())
}

async fn provider_command(state: &AppState, cmd: ProviderCommand) -> Result<()> {
    match cmd {
        ProviderCommand::Add(add) => {
            let connection = ConnectionConfig {
                endpoint: add.endpoint,
                api_key: add.api_key,
                api_token: add.api_token,
                server_id: add.server_id,
                account_id: add.account_id,
                ssh_host: add.ssh_host,
                ssh_user: add.ssh_user,
                ssh_port: add.ssh_port,
                remote_api_port: add.remote_api_port,
                ..Default::default()
            };
            let provider = providers::create_provider(
                state,
                ProviderRequest {
                    name: add.name,
                    provider_type: add.provider_type,
                    connection,
                    policy: None,
                },
            )
            .await?;
            println!("provider {} created with id {}", provider.name, provider.id);
        }
        ProviderCommand::List => {
            for p in providers::list_providers(state).await? {
                let last_sync = p
                    .last_sync
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{}\t{}\t{}\t{}\tlast sync {last_sync}",
                    p.id,
                    p.name,
                    p.provider_type,
                    if p.active { "active" } else { "inactive" }
                );
            }
        }
        ProviderCommand::Test { id } => {
            let test = providers::test_provider(state, id).await?;
            println!("{}: {}", if test.ok { "ok" } else { "failed" }, test.message);
            if !test.ok {
                bail!("connection test for provider {id} failed");
            }
        }
        ProviderCommand::Remove {
            id,
            cascade,
            force,
            reassign,
        } => {
            let mode = match (cascade, force, reassign) {
                (true, _, _) => DeleteMode::Cascade,
                (_, true, _) => DeleteMode::Force,
                (_, _, Some(to)) => DeleteMode::Reassign(to),
                _ => DeleteMode::Refuse,
            };
            providers::delete_provider(state, id, mode).await?;
            println!("provider {id} removed");
        }
    }
    Ok(())
}

async fn zone_command(state: &AppState, cmd: ZoneCommand) -> Result<()> {
    match cmd {
        ZoneCommand::Create {
            name,
            provider,
            kind,
            masters,
            ttl,
            auto_dnssec,
        } => {
            let mut req = ZoneRequest::new(name);
            req.kind = kind;
            req.masters = masters;
            req.ttl = ttl;
            req.auto_dnssec = auto_dnssec;
            let outcome = zones::create_zone(state, provider, req).await?;
            print_json(&outcome)?;
        }
        ZoneCommand::List { provider } => {
            for z in zones::list_zones(state, provider).await? {
                println!(
                    "{}\t{}\t{}\tserial {}\tdnssec {}",
                    z.id, z.name, z.kind, z.serial, z.dnssec_state
                );
            }
        }
        ZoneCommand::Export { id } => print!("{}", export::export_zone(state, id).await?),
        ZoneCommand::Delete { id, skip_remote } => {
            let outcome = zones::delete_zone(state, id, DeleteZoneOptions { skip_remote }).await?;
            print_json(&outcome)?;
        }
    }
    Ok(())
}

async fn record_command(state: &AppState, cmd: RecordCommand) -> Result<()> {
    match cmd {
        RecordCommand::Add {
            zone,
            name,
            rtype,
            content,
            ttl,
            priority,
            comment,
            auto_ptr,
            allow_duplicate,
        } => {
            let mut req = RecordRequest::new(name, rtype, content);
            req.ttl = ttl;
            req.priority = priority;
            req.comment = comment;
            req.auto_ptr = auto_ptr;
            req.allow_duplicate = allow_duplicate;
            let outcome = records::create_record(state, zone, req).await?;
            print_json(&outcome)?;
        }
        RecordCommand::List { zone } => {
            for r in records::list_records(state, zone).await? {
                let priority = r.priority.map(|p| format!("{p} ")).unwrap_or_default();
                println!(
                    "{}\t{}\t{}\t{}\t{priority}{}{}",
                    r.id,
                    r.name,
                    r.ttl,
                    r.rtype,
                    r.content,
                    if r.disabled { "\t(disabled)" } else { "" }
                );
            }
        }
        RecordCommand::Delete {
            id,
            delete_ptr,
            skip_remote,
        } => {
            let outcome = records::delete_record(
                state,
                id,
                DeleteRecordOptions {
                    delete_ptr,
                    skip_remote,
                },
            )
            .await?;
            print_json(&outcome)?;
        }
    }
    Ok(())
}

async fn dnssec_command(state: &AppState, cmd: DnssecCommand) -> Result<()> {
    match cmd {
        DnssecCommand::Enable { zones } => {
            if let &[zone] = zones.as_slice() {
                print_json(&dnssec::enable(state, zone).await?)?;
            } else {
                let results = dnssec::enable_many(state, &zones).await;
                print_json(&results)?;
                let failed = results.iter().filter(|r| !r.ok).count();
                if failed > 0 {
                    bail!("{failed} of {} zone(s) failed", results.len());
                }
            }
        }
        DnssecCommand::Disable { zone } => print_json(&dnssec::disable(state, zone).await?)?,
        DnssecCommand::Keys {
            zone,
            generate,
            algorithm,
            activate,
        } => {
            if generate {
                dnssec::generate_keys(state, zone, algorithm.as_deref()).await?;
            }
            if let Some(key_id) = activate {
                dnssec::activate_key(state, zone, &key_id).await?;
            }
            print_json(&dnssec::list_keys(state, zone).await?)?;
        }
        DnssecCommand::Rollover {
            zone,
            key_type,
            confirm,
        } => print_json(&dnssec::rollover(state, zone, key_type, confirm).await?)?,
        DnssecCommand::Validate { zone, json } => {
            let report = dnssec::validate(state, zone).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("DNSSEC validation for {}: {:?}", report.zone, report.status);
                for check in &report.checks {
                    println!("  {:<8} {:?}\t{}", check.name, check.status, check.message);
                }
            }
            if !report.passed() {
                bail!("DNSSEC validation of {} did not pass", report.zone);
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn init_shared_state(cli: &Cli, config: AppConfig) -> Result<SharedState> {
    if let Some(parent) = cli.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create db directory {}", parent.display()))?;
    }

    let db = db::init_db(&cli.db_path).await?;
    let lookup: Arc<dyn DnsLookup> = if cli.resolvers.is_empty() {
        Arc::new(HickoryLookup::system().context("failed to read system resolver config")?)
    } else {
        Arc::new(HickoryLookup::with_servers(&cli.resolvers))
    };

    Ok(Arc::new(AppState::new(
        config,
        db,
        ProviderRegistry::with_defaults(),
        lookup,
    )))
}

fn build_app_config(cli: &Cli) -> Result<AppConfig> {
    let default_nameservers = cli
        .nameservers
        .iter()
        .map(|ns| {
            let ns = normalize_fqdn(ns);
            validate_fqdn(&ns)
                .map(|_| ns.clone())
                .with_context(|| format!("invalid nameserver '{ns}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let soa_contact = match &cli.soa_contact {
        Some(value) => {
            let contact = normalize_fqdn(value);
            validate_fqdn(&contact).with_context(|| format!("invalid soa-contact '{value}'"))?;
            Some(contact)
        }
        None => None,
    };

    let reverse = ReversePolicy::new(cli.ipv6_reverse_nibbles)
        .map_err(anyhow::Error::msg)
        .context("invalid ipv6-reverse-nibbles")?;

    if cli.default_ttl == 0 {
        bail!("--default-ttl must be positive");
    }

    Ok(AppConfig {
        default_ttl: cli.default_ttl,
        default_nameservers,
        soa_contact,
        reverse,
        ssh_binary: cli.ssh_binary.clone(),
        api_token: cli.api_token.clone().filter(|t| !t.is_empty()),
        ..AppConfig::default()
    })
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install CTRL+C handler: {err}");
    }
    info!("shutdown signal received");
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
