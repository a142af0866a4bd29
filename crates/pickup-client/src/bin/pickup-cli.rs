//! Waste pickup command line client
//!
//! Commands:
//! - health: Check that the backend is reachable
//! - item register/show: Manage disposal items
//! - qr: Generate (or fetch) an item's QR code and save the PNG
//! - scan: Confirm a pickup from a scanned code or a photo of one
//! - pickup create/advance/show: Manage pickup requests

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use pickup_client::{ClientConfig, HttpPickupApi, PickupSubsystem, ScanInput};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wastetrack_common::wire::RegisterItemRequest;
use wastetrack_common::{DisposalItemId, LabId, PickupId, PickupStatus, WeightUnit};

#[derive(Parser)]
#[command(name = "pickup-cli")]
#[command(about = "Waste pickup QR identity and confirmation client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the pickup API is reachable
    Health,

    /// Manage disposal items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },

    /// Generate the QR code of a disposal item
    Qr {
        /// Disposal item id
        id: DisposalItemId,

        /// Where to write the PNG image
        #[arg(short, long, default_value = "qr.png")]
        out: PathBuf,
    },

    /// Confirm a pickup by scanning a QR code
    Scan {
        /// Decoded QR payload
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        code: Option<String>,

        /// Photo (PNG or JPEG) containing the QR code
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Manage pickup requests
    Pickup {
        #[command(subcommand)]
        command: PickupCommands,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Register a disposal item
    Register {
        #[arg(long)]
        id: DisposalItemId,

        #[arg(long)]
        lab: LabId,

        /// Waste type name, e.g. "Formalin"
        #[arg(long)]
        waste_type: String,

        #[arg(long)]
        weight: Decimal,

        /// Weight unit (kg or L)
        #[arg(long, default_value = "kg")]
        unit: WeightUnit,

        /// Last day the item can stay on site (YYYY-MM-DD)
        #[arg(long)]
        available_until: Option<NaiveDate>,
    },

    /// Show a disposal item
    Show { id: DisposalItemId },
}

#[derive(Subcommand)]
enum PickupCommands {
    /// Request a pickup for stored items
    Create {
        #[arg(long)]
        lab: LabId,

        /// Requested date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Disposal item ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        items: Vec<DisposalItemId>,
    },

    /// Move a pickup request to a new status
    Advance {
        id: PickupId,

        #[arg(value_enum)]
        status: TargetStatus,
    },

    /// Show a pickup request
    Show { id: PickupId },
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetStatus {
    Requested,
    Processing,
    Completed,
    Canceled,
}

impl From<TargetStatus> for PickupStatus {
    fn from(status: TargetStatus) -> Self {
        match status {
            TargetStatus::Requested => PickupStatus::Requested,
            TargetStatus::Processing => PickupStatus::Processing,
            TargetStatus::Completed => PickupStatus::Completed,
            TargetStatus::Canceled => PickupStatus::Canceled,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,pickup_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::from_env()?;
    debug!("Using pickup API at {}", config.api_url);

    let http = Arc::new(HttpPickupApi::new(&config)?);
    let subsystem = PickupSubsystem::new(http.clone());

    match cli.command {
        Commands::Health => {
            let healthy = http.health_check().await?;
            println!("{}", if healthy { "ok" } else { "unhealthy" });
        }
        Commands::Item { command } => item(&http, command).await?,
        Commands::Qr { id, out } => qr(&http, &subsystem, id, out).await?,
        Commands::Scan { code, image } => scan(&subsystem, code, image).await?,
        Commands::Pickup { command } => pickup(&http, &subsystem, command).await?,
    }

    Ok(())
}

async fn item(http: &HttpPickupApi, command: ItemCommands) -> Result<()> {
    match command {
        ItemCommands::Register {
            id,
            lab,
            waste_type,
            weight,
            unit,
            available_until,
        } => {
            let item = http
                .register_item(&RegisterItemRequest {
                    id,
                    lab_id: lab,
                    waste_type_name: waste_type,
                    weight,
                    unit,
                    available_until,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        ItemCommands::Show { id } => {
            let item = http.get_item(id).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
    }
    Ok(())
}

async fn qr(
    http: &HttpPickupApi,
    subsystem: &PickupSubsystem,
    id: DisposalItemId,
    out: PathBuf,
) -> Result<()> {
    let item = http
        .get_item(id)
        .await
        .with_context(|| format!("Failed to load disposal item {}", id))?;

    let artifact = subsystem
        .qr_cache
        .get_or_create(id, &item.qr_metadata())
        .await?;

    std::fs::write(&out, &artifact.image)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    info!("QR code for disposal item {} saved to {}", id, out.display());
    println!("payload: {}", artifact.payload);
    println!("image:   {}", out.display());
    Ok(())
}

async fn scan(
    subsystem: &PickupSubsystem,
    code: Option<String>,
    image: Option<PathBuf>,
) -> Result<()> {
    let input = match (code, image) {
        (Some(code), _) => ScanInput::Code(code),
        (None, Some(path)) => ScanInput::Image(
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        (None, None) => anyhow::bail!("either --code or --image is required"),
    };

    let confirmation = subsystem.confirmation.confirm(input).await?;
    println!(
        "Disposal item {} is now {} ({})",
        confirmation.disposal_item_id, confirmation.new_status, confirmation.processed_at
    );
    Ok(())
}

async fn pickup(
    http: &HttpPickupApi,
    subsystem: &PickupSubsystem,
    command: PickupCommands,
) -> Result<()> {
    match command {
        PickupCommands::Create { lab, date, items } => {
            for id in &items {
                let item = http
                    .get_item(*id)
                    .await
                    .with_context(|| format!("Failed to load disposal item {}", id))?;
                subsystem.lifecycle.track(item).await?;
            }

            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let pickup = subsystem.pickups.create(lab, date, items).await?;
            println!("{}", serde_json::to_string_pretty(&pickup)?);
        }
        PickupCommands::Advance { id, status } => {
            let current = http
                .get_pickup(id)
                .await
                .with_context(|| format!("Failed to load pickup {}", id))?;
            subsystem.pickups.track(current).await;

            let pickup = subsystem.pickups.advance(id, status.into()).await?;
            println!("Pickup {} is now {}", pickup.id, pickup.status);
        }
        PickupCommands::Show { id } => {
            let pickup = http.get_pickup(id).await?;
            println!("{}", serde_json::to_string_pretty(&pickup)?);
        }
    }
    Ok(())
}
