use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vault_core::scanner::bytes_to_megabytes;
use vault_core::{CatalogEntry, CoreConfig, DateToken, DeviceNumber, RestoreManifest, VaultService};

#[derive(Parser)]
#[command(name = "vault")]
#[command(about = "Backup vault operator CLI")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the storage root of a customer
    Root {
        /// Customer identity (email)
        identity: String,
    },
    /// Create the storage root of a customer
    Provision {
        /// Customer identity (email)
        identity: String,
    },
    /// List the devices of a customer
    Devices {
        /// Customer identity (email)
        identity: String,
    },
    /// Show storage usage
    Usage {
        /// Customer identity (email)
        identity: String,
        /// Restrict to one device
        #[arg(long)]
        device: Option<DeviceNumber>,
    },
    /// List the catalog of a device
    Catalog {
        /// Customer identity (email)
        identity: String,
        /// Device number
        device: DeviceNumber,
    },
    /// Show the newest backup of a device
    Latest {
        /// Customer identity (email)
        identity: String,
        /// Device number
        device: DeviceNumber,
    },
    /// Print the path of one catalog file
    CatalogFile {
        /// Customer identity (email)
        identity: String,
        /// Device number
        device: DeviceNumber,
        /// Backup date (YYYYMMDD)
        date: DateToken,
        /// Catalog file name (`<backup>.katalog.enc`)
        name: String,
    },
    /// Store a part or marker file into a date bucket
    Store {
        /// Customer identity (email)
        identity: String,
        /// Device number
        device: DeviceNumber,
        /// Backup date (YYYYMMDD)
        date: DateToken,
        /// File to store
        file: PathBuf,
    },
    /// Assemble a restore archive from a manifest blob
    Restore {
        /// Customer identity (email)
        identity: String,
        /// Device number
        device: DeviceNumber,
        /// File holding the base64 manifest blob
        manifest_file: PathBuf,
    },
    /// Export the catalog markers of a device
    ExportCatalog {
        /// Customer identity (email)
        identity: String,
        /// Device number
        device: DeviceNumber,
    },
    /// Build a manifest blob from `timestamp;name` lines
    EncodeManifest {
        /// File with one `timestamp;name` pair per line
        pairs_file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vault_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!("vault command failed: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = Arc::new(CoreConfig::from_env()?);
    tracing::debug!(
        storage_dir = %cfg.storage_dir().display(),
        staging_dir = %cfg.staging_dir().display(),
        "configuration loaded"
    );
    let service = VaultService::new(cfg);

    match cli.command {
        Commands::Root { identity } => {
            println!("{}", service.customer_root(&identity).display());
        }
        Commands::Provision { identity } => {
            let root = service.provision_customer(&identity)?;
            println!("Provisioned {}", root.display());
        }
        Commands::Devices { identity } => {
            let devices = service.devices(&identity)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No devices found.");
            } else {
                for device in devices {
                    println!("{device}");
                }
            }
        }
        Commands::Usage {
            identity,
            device: Some(device),
        } => {
            let bytes = service.usage(&identity, Some(device))?;
            if cli.json {
                println!("{}", serde_json::json!({ "device": device, "bytes": bytes }));
            } else {
                println!("Device {device}: {bytes} bytes ({:.2} MB)", bytes_to_megabytes(bytes));
            }
        }
        Commands::Usage {
            identity,
            device: None,
        } => {
            let report = service.usage_report(&identity)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for usage in &report.devices {
                    println!(
                        "Device {}: {} bytes ({:.2} MB)",
                        usage.device,
                        usage.bytes,
                        bytes_to_megabytes(usage.bytes)
                    );
                }
                println!(
                    "Total: {} bytes ({:.2} MB)",
                    report.total_bytes,
                    report.total_megabytes()
                );
            }
        }
        Commands::Catalog { identity, device } => {
            let catalog = service.list_catalog(&identity, device)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else if catalog.is_empty() {
                println!("No backups found.");
            } else {
                catalog.iter().for_each(print_entry);
            }
        }
        Commands::Latest { identity, device } => match service.latest_backup(&identity, device)? {
            Some(entry) if cli.json => println!("{}", serde_json::to_string_pretty(&entry)?),
            Some(entry) => print_entry(&entry),
            None => println!("No backups found."),
        },
        Commands::CatalogFile {
            identity,
            device,
            date,
            name,
        } => match service.catalog_file(&identity, device, &date, &name)? {
            Some(marker) => println!("{}", marker.path.display()),
            None => anyhow::bail!("no catalog file '{name}' for {date}"),
        },
        Commands::Store {
            identity,
            device,
            date,
            file,
        } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("{} has no usable file name", file.display()))?
                .to_owned();
            let source =
                File::open(&file).with_context(|| format!("cannot open {}", file.display()))?;
            let stored = service.store_upload(&identity, device, &date, &name, source)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stored)?);
            } else {
                println!(
                    "Stored {} ({} bytes, sha256 {})",
                    stored.path.display(),
                    stored.size_bytes,
                    stored.sha256
                );
            }
        }
        Commands::Restore {
            identity,
            device,
            manifest_file,
        } => {
            let blob = fs::read(&manifest_file)
                .with_context(|| format!("cannot read {}", manifest_file.display()))?;
            let outcome = service.restore(&identity, device, &blob)?;
            println!(
                "Wrote {} ({} entries, {} not found)",
                outcome.path().display(),
                outcome.archive.entry_count(),
                outcome.skipped
            );
        }
        Commands::ExportCatalog { identity, device } => {
            let archive = service.export_catalog(&identity, device)?;
            println!(
                "Wrote {} ({} catalog files)",
                archive.path().display(),
                archive.entry_count()
            );
        }
        Commands::EncodeManifest { pairs_file } => {
            let text = fs::read_to_string(&pairs_file)
                .with_context(|| format!("cannot read {}", pairs_file.display()))?;
            let pairs = text
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    line.split_once(';')
                        .with_context(|| format!("line has no ';' separator: '{line}'"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            println!("{}", RestoreManifest::encode(pairs)?);
        }
    }

    Ok(())
}

fn print_entry(entry: &CatalogEntry) {
    if entry.is_empty() {
        println!("{}: (no catalog)", entry.date);
        return;
    }
    for (marker, bytes) in &entry.markers {
        println!(
            "{}: {} {:.2} MB",
            entry.date,
            marker,
            bytes_to_megabytes(*bytes)
        );
    }
}
