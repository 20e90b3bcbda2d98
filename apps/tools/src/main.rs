use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use shared::{badge::admin_badge, domain::TrackingCode, protocol::TrackingSnapshot, view::TrackingView};
use storage::Storage;

/// Direct database access for operators. Writes made here bypass the server,
/// so open tracking views are not notified of them.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/tracking.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    SetAdminPassword {
        password: String,
        #[arg(long, default_value = "admin")]
        username: String,
    },
    ListShipments,
    Show {
        tracking_code: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::SetAdminPassword { password, username } => {
            if password.len() < 8 {
                return Err(anyhow!("admin password must be at least 8 characters"));
            }
            storage.set_admin_credential(&username, &password).await?;
            println!("stored credential for '{username}'");
        }
        Command::ListShipments => {
            for shipment in storage.list_shipments().await? {
                println!(
                    "{:>5}  {}  {:<24} {:?}  {}",
                    shipment.id.0,
                    shipment.tracking_code,
                    shipment.current_status,
                    admin_badge(&shipment.current_status, shipment.is_customs_held),
                    shipment.created_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Command::Show { tracking_code } => {
            let code = TrackingCode::parse(&tracking_code)
                .map_err(|e| anyhow!("'{tracking_code}' is not a tracking code: {e}"))?;
            let shipment = storage
                .load_public_shipment(&code)
                .await?
                .ok_or_else(|| anyhow!("no shipment with tracking code {code}"))?;
            let events = storage.list_public_events(&code).await?;
            let view = TrackingView::derive(TrackingSnapshot { shipment, events });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}
