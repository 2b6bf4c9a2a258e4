//! device_admin - maintain the streaming device directory
//!
//! The controller only reads the directory; this tool is how rows get there
//! outside of the onboarding flow.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use streaming_controller::{DeviceClass, DeviceDirectory, DeviceRecord, SqliteDeviceDirectory};

#[derive(Parser, Debug)]
#[command(name = "device_admin", about = "Manage devices known to the streaming controller")]
struct Args {
    #[arg(long, env = "STREAMING_DB_PATH", default_value = "streaming_controller.db")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register or replace a device
    Add {
        #[arg(long)]
        device_id: String,
        /// camera or nvr
        #[arg(long)]
        device_type: DeviceClass,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Stream metadata as JSON, e.g. '{"rtsp_url":"rtsp://..."}'
        #[arg(long)]
        metadata: Option<String>,
    },

    /// List registered devices
    List {
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print one device as JSON (password redacted)
    Show {
        #[arg(long)]
        device_id: String,
    },

    /// Remove a device
    Remove {
        #[arg(long)]
        device_id: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let directory = SqliteDeviceDirectory::open(&args.db)?;

    match args.command {
        Command::Add {
            device_id,
            device_type,
            ip,
            port,
            username,
            password,
            metadata,
        } => {
            let metadata = metadata
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--metadata must be valid JSON")?;
            let record = DeviceRecord {
                host: ip,
                port,
                username,
                password,
                metadata,
                ..DeviceRecord::new(device_id, device_type)
            };
            directory.upsert_device(&record)?;
            println!("registered {} ({})", record.device_id, record.device_class);
        }
        Command::List { verbose } => {
            let devices = directory.list_devices()?;
            if devices.is_empty() {
                println!("no devices registered");
            }
            for device in devices {
                if verbose {
                    println!(
                        "{}\t{}\t{}\t{}",
                        device.device_id,
                        device.device_class,
                        device.host.as_deref().unwrap_or("-"),
                        device
                            .metadata
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                } else {
                    println!("{}\t{}", device.device_id, device.device_class);
                }
            }
        }
        Command::Show { device_id } => {
            let mut device = directory
                .get_device(&device_id)?
                .ok_or_else(|| anyhow!("device {} not found", device_id))?;
            if device.password.is_some() {
                device.password = Some("***".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&device)?);
        }
        Command::Remove { device_id } => {
            if directory.remove_device(&device_id)? {
                println!("removed {}", device_id);
            } else {
                return Err(anyhow!("device {} not found", device_id));
            }
        }
    }

    Ok(())
}
