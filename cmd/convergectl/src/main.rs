mod snapshot;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pkg_actions::{SuiteConfig, TestContext, cluster_machines_by_role};
use pkg_classifier::{CertificateFingerprints, ExclusionRules, NodeRoles, verify_certificate_rotation};
use pkg_constants::paths::DEFAULT_CONFIG;
use pkg_quota::{ResourceQuotaAggregator, Scenario};
use pkg_state::StateStore;
use pkg_types::config::{SuiteConfigFile, load_config_file};
use pkg_types::object::ObservedObject;

#[derive(Parser, Debug)]
#[command(name = "convergectl", about = "Readiness checks and quota bookkeeping for cluster validation")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a snapshot of objects once and print the failing ones
    Pods {
        /// JSON or YAML snapshot file
        #[arg(long, short)]
        file: String,

        /// Name substrings to skip (overrides the config file)
        #[arg(long)]
        exclude: Vec<String>,

        /// Print the snapshot with podState annotations instead
        #[arg(long)]
        annotate: bool,
    },
    /// Load a snapshot into an in-memory store and poll it until every pod
    /// is ready
    Wait {
        #[arg(long, short)]
        file: String,

        #[arg(long)]
        exclude: Vec<String>,

        #[arg(long)]
        interval_secs: Option<u64>,

        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List the machines of a cluster carrying the given roles
    Machines {
        #[arg(long, short)]
        file: String,

        /// Cluster name (overrides the config file)
        #[arg(long)]
        cluster: Option<String>,

        /// Comma-separated roles: etcd, controlplane, worker
        #[arg(long, default_value = "")]
        roles: String,
    },
    /// Replay a quota scenario and print the resulting project report
    Quota {
        #[arg(long, short)]
        scenario: String,
    },
    /// Check that every certificate fingerprint changed after rotation
    Certs {
        /// JSON map node -> certificate type -> fingerprint, before rotation
        #[arg(long)]
        old: String,

        /// Same map after rotation
        #[arg(long)]
        new: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Merge: CLI args > config file > defaults.
fn resolve_config(path: &str, exclude: &[String]) -> Result<SuiteConfig> {
    let file_cfg: SuiteConfigFile = load_config_file(path)
        .with_context(|| format!("failed to load config file: {}", path))?;
    info!("Config file: {}", path);
    let mut config = SuiteConfig::from_file(&file_cfg);
    if !exclude.is_empty() {
        config.exclusions = ExclusionRules::new(exclude.iter().cloned());
    }
    Ok(config)
}

fn observe_snapshot(path: &str) -> Result<Vec<ObservedObject>> {
    snapshot::load(path)?
        .iter()
        .map(|entry| {
            ObservedObject::from_value(entry.kind, &entry.body)
                .with_context(|| format!("malformed {} in {}", entry.kind, path))
        })
        .collect()
}

/// Seed an in-memory store with every object of a snapshot file.
async fn load_store(path: &str) -> Result<StateStore> {
    let store = StateStore::new();
    for entry in snapshot::load(path)? {
        let observed = ObservedObject::from_value(entry.kind, &entry.body)
            .with_context(|| format!("malformed {} in {}", entry.kind, path))?;
        store
            .apply(entry.kind, observed.namespace(), observed.name(), entry.body)
            .await?;
    }
    info!("Loaded {} objects from {}", store.len().await, path);
    Ok(store)
}

fn read_fingerprints(path: &str) -> Result<CertificateFingerprints> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fingerprint file: {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("invalid fingerprint file: {}", path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match &cli.command {
        Commands::Pods {
            file,
            exclude,
            annotate,
        } => {
            let config = resolve_config(&cli.config, exclude)?;
            let classifier = config.classifier();
            let mut objects = observe_snapshot(file)?;
            let bad = if *annotate {
                let bad = classifier.classify_annotated(&mut objects);
                println!("{}", serde_json::to_string_pretty(&objects)?);
                bad
            } else {
                let bad = classifier.classify(&objects);
                println!("{}", serde_json::to_string_pretty(&bad.reasons())?);
                bad
            };
            info!("{} of {} objects not ready", bad.len(), objects.len());
            if !bad.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::Wait {
            file,
            exclude,
            interval_secs,
            timeout_secs,
        } => {
            let mut config = resolve_config(&cli.config, exclude)?;
            if let Some(secs) = interval_secs {
                config.poll.interval = Duration::from_secs(*secs);
            }
            if let Some(secs) = timeout_secs {
                config.poll.timeout = Duration::from_secs(*secs);
            }

            let store = load_store(file).await?;
            let ctx = TestContext::new("convergectl-wait", Arc::new(store), config);
            ctx.session.scope(|| ctx.verify_cluster_pods()).await?;
            println!("all cluster pods ready");
        }
        Commands::Machines {
            file,
            cluster,
            roles,
        } => {
            let config = resolve_config(&cli.config, &[])?;
            let cluster = cluster
                .clone()
                .or(config.cluster_name)
                .context("no cluster name given on the command line or in the config file")?;
            let roles: NodeRoles = roles.parse().map_err(|e: String| anyhow!(e))?;
            let store = load_store(file).await?;
            let machines = cluster_machines_by_role(&store, &cluster, roles).await?;
            for machine in &machines {
                println!("{}", machine.name());
            }
            info!("{} machines in cluster {} match {:?}", machines.len(), cluster, roles);
        }
        Commands::Quota { scenario } => {
            let scenario = Scenario::load(scenario)?;
            let mut agg = ResourceQuotaAggregator::new();
            scenario.replay(&mut agg)?;
            println!("{}", serde_json::to_string_pretty(&agg.report())?);
        }
        Commands::Certs { old, new } => {
            let before = read_fingerprints(old)?;
            let after = read_fingerprints(new)?;
            match verify_certificate_rotation(&before, &after) {
                Ok(()) => println!("all certificates rotated"),
                Err(e) => {
                    warn!("{}", e);
                    for cert in &e.unchanged {
                        println!("{}\t{}\t{}", cert.node, cert.cert_type, cert.fingerprint);
                    }
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
