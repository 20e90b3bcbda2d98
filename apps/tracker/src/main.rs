use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    watch_shipment, AdminClient, HttpTrackingSource, TrackingSource, TrackingState,
};
use futures::StreamExt;
use shared::{
    badge::admin_badge,
    domain::{MediaKind, ShipmentId, TrackingCode, DEFAULT_CURRENCY},
    protocol::{NewShipmentRequest, UpdateStatusRequest},
    status::StepState,
    view::TrackingView,
};

const ADMIN_PASSWORD_ENV: &str = "TRACKER_ADMIN_PASSWORD";

#[derive(Parser, Debug)]
#[command(about = "Track shipments and operate the tracking service")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a shipment once and print its tracking view.
    Show { tracking_code: String },
    /// Keep printing the tracking view as the shipment changes.
    Watch { tracking_code: String },
    /// Operator commands; require an admin login.
    Admin(AdminArgs),
}

#[derive(Args, Debug)]
struct AdminArgs {
    #[arg(long, default_value = "admin")]
    username: String,
    /// Falls back to the TRACKER_ADMIN_PASSWORD environment variable.
    #[arg(long)]
    password: Option<String>,
    #[command(subcommand)]
    command: AdminCommand,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    List,
    Stats,
    Create(CreateArgs),
    Status {
        shipment_id: i64,
        status: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lng: Option<f64>,
    },
    ToggleCustoms {
        shipment_id: i64,
    },
    Media {
        shipment_id: i64,
        path: PathBuf,
        #[arg(long)]
        kind: Option<String>,
    },
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    sender_name: String,
    #[arg(long)]
    sender_address: String,
    #[arg(long)]
    sender_country: String,
    #[arg(long)]
    sender_email: Option<String>,
    #[arg(long)]
    receiver_name: String,
    #[arg(long)]
    receiver_address: String,
    #[arg(long)]
    receiver_country: String,
    #[arg(long)]
    receiver_email: Option<String>,
    #[arg(long)]
    origin: String,
    #[arg(long)]
    destination: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    value: f64,
    #[arg(long, default_value = DEFAULT_CURRENCY)]
    currency: String,
    #[arg(long)]
    weight_kg: Option<f64>,
    #[arg(long)]
    shipping_fee: Option<f64>,
    #[arg(long)]
    days: Option<i64>,
}

impl From<CreateArgs> for NewShipmentRequest {
    fn from(args: CreateArgs) -> Self {
        NewShipmentRequest {
            sender_name: args.sender_name,
            sender_address: args.sender_address,
            sender_country: args.sender_country,
            sender_email: args.sender_email,
            receiver_name: args.receiver_name,
            receiver_address: args.receiver_address,
            receiver_country: args.receiver_country,
            receiver_email: args.receiver_email,
            origin: args.origin,
            destination: args.destination,
            package_description: args.description,
            package_value: args.value,
            currency: args.currency,
            weight_kg: args.weight_kg,
            shipping_fee: args.shipping_fee,
            days_of_package: args.days,
            eta: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Command::Show { tracking_code } => {
            let code = parse_code(&tracking_code)?;
            let source = HttpTrackingSource::new(cli.server_url);
            let snapshot = source.fetch(&code).await?;
            print!("{}", render(&TrackingView::derive(snapshot)));
        }
        Command::Watch { tracking_code } => {
            let code = parse_code(&tracking_code)?;
            let source: Arc<dyn TrackingSource> = Arc::new(HttpTrackingSource::new(cli.server_url));
            let watch = watch_shipment(source, code);
            let mut updates = watch.updates();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    next = updates.next() => match next {
                        Some(TrackingState::Loading) => eprintln!("loading..."),
                        Some(TrackingState::Ready(view)) => println!("{}", render(&view)),
                        Some(TrackingState::Failed(failure)) => {
                            return Err(anyhow!("tracking stopped: {failure:?}"));
                        }
                        None => break,
                    },
                }
            }
            watch.close();
        }
        Command::Admin(args) => run_admin(cli.server_url, args).await?,
    }

    Ok(())
}

async fn run_admin(server_url: String, args: AdminArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => std::env::var(ADMIN_PASSWORD_ENV)
            .with_context(|| format!("pass --password or set {ADMIN_PASSWORD_ENV}"))?,
    };
    let client = AdminClient::login(server_url, &args.username, &password).await?;

    match args.command {
        AdminCommand::List => {
            for shipment in client.list_shipments().await? {
                println!(
                    "{:>5}  {}  {:<24} {:<11} {} -> {}",
                    shipment.id.0,
                    shipment.tracking_code,
                    shipment.current_status,
                    format!(
                        "{:?}",
                        admin_badge(&shipment.current_status, shipment.is_customs_held)
                    )
                    .to_lowercase(),
                    shipment.origin,
                    shipment.destination,
                );
            }
        }
        AdminCommand::Stats => {
            let stats = client.stats().await?;
            println!(
                "total={} delivered={} customs_held={}",
                stats.total, stats.delivered, stats.customs_held
            );
        }
        AdminCommand::Create(create) => {
            let shipment = client.create_shipment(&create.into()).await?;
            println!(
                "created shipment_id={} tracking_code={}",
                shipment.id.0, shipment.tracking_code
            );
        }
        AdminCommand::Status {
            shipment_id,
            status,
            note,
            location,
            lat,
            lng,
        } => {
            let shipment = client
                .update_status(
                    ShipmentId(shipment_id),
                    &UpdateStatusRequest {
                        status,
                        note,
                        location,
                        lat,
                        lng,
                    },
                )
                .await?;
            println!(
                "{} is now '{}'",
                shipment.tracking_code, shipment.current_status
            );
        }
        AdminCommand::ToggleCustoms { shipment_id } => {
            let shipment = client.toggle_customs_hold(ShipmentId(shipment_id)).await?;
            let state = if shipment.is_customs_held {
                "held by customs"
            } else {
                "cleared"
            };
            println!("{} {state}", shipment.tracking_code);
        }
        AdminCommand::Media {
            shipment_id,
            path,
            kind,
        } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let mime_type = guess_mime(&path);
            let kind = match kind {
                Some(kind) => kind.parse::<MediaKind>().map_err(|e| anyhow!(e))?,
                None if mime_type.is_some_and(|m| m.starts_with("video/")) => MediaKind::Video,
                None => MediaKind::Image,
            };
            let filename = path.file_name().and_then(|name| name.to_str());
            let shipment = client
                .upload_media(ShipmentId(shipment_id), kind, filename, mime_type, bytes)
                .await?;
            if let Some(media) = shipment.media {
                println!("attached {} at {}", media.kind.as_str(), media.url);
            }
        }
    }

    Ok(())
}

fn parse_code(raw: &str) -> Result<TrackingCode> {
    TrackingCode::parse(raw).map_err(|e| anyhow!("'{raw}' is not a tracking code: {e}"))
}

fn guess_mime(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => return None,
    })
}

fn render(view: &TrackingView) -> String {
    let shipment = &view.shipment;
    let mut out = format!(
        "{}  {} -> {}\nstatus: {} [{}] {:.0}%\n{}\n",
        shipment.tracking_code,
        shipment.origin,
        shipment.destination,
        shipment.current_status,
        view.tone.color_token(),
        view.progress.percent,
        view.progress.description,
    );
    if let Some(notice) = &view.customs_notice {
        out.push_str(&format!("!! {notice}\n"));
    }
    for step in &view.progress.steps {
        let mark = match step.state {
            StepState::Completed => "x",
            StepState::Current => ">",
            StepState::Pending => " ",
        };
        out.push_str(&format!("  [{mark}] {}\n", step.label));
    }
    if let Some(eta) = shipment.eta {
        out.push_str(&format!("eta: {}\n", eta.format("%Y-%m-%d")));
    }
    out.push_str("history:\n");
    for event in &view.events {
        out.push_str(&format!(
            "  {}  {}{}{}\n",
            event.occurred_at.format("%Y-%m-%d %H:%M"),
            event.status,
            event
                .location
                .as_deref()
                .map(|l| format!(" @ {l}"))
                .unwrap_or_default(),
            event
                .note
                .as_deref()
                .map(|n| format!(" ({n})"))
                .unwrap_or_default(),
        ));
    }
    out.push_str(&format!("share: {}\n", view.share_path));
    out
}
