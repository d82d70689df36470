//! Warden CLI - Command-line interface for the Warden security controller
//!
//! Issues host commands to the device, writes the user configuration and
//! drives the bench device served by `warden-daemon`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use warden_core::{AcpiState, BleRange, HostAction, HostCommand, SecurityLevel, UserConfig};
use warden_cli::WardenClient;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Host-side control of the Warden security controller", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host commands, answered while the device is unlocked
    #[command(subcommand)]
    Host(HostCommands),

    /// User configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Bench device stimuli
    #[command(subcommand)]
    Bench(BenchCommands),

    /// Check that the daemon is running
    Ping,
}

#[derive(Subcommand)]
enum HostCommands {
    /// Enroll the keyfob presented next
    Enroll,

    /// Remove the enrolled keyfob at an index
    Unenroll { index: u8 },

    /// Run a security check
    Check {
        /// 0: keyfob and proximity, 1: also admin keyfob and PIN
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        level: u8,
    },

    /// Regenerate the root of trust (requires level 1)
    RotRegen,

    /// Report a host power state
    State { state: StateArg },

    /// List enrolled keyfobs
    Keyfobs,

    /// Read or set the device clock
    Time {
        /// Seconds to set the clock to
        #[arg(long)]
        set: Option<u32>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Replace the user configuration
    Set {
        #[arg(long, value_enum, default_value_t = RangeArg::Medium)]
        range: RangeArg,

        #[arg(long, value_enum, default_value_t = ActionArg::Shutdown)]
        host_action: ActionArg,

        /// React to motion while proximity-locked
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        motion: bool,

        /// Require the PIN at boot
        #[arg(long)]
        ask_pin: bool,
    },
}

#[derive(Subcommand)]
enum BenchCommands {
    /// Press the power button
    Press {
        #[arg(long)]
        long: bool,
    },

    /// Present a valid keyfob
    Present {
        name: String,

        #[arg(long)]
        admin: bool,
    },

    /// Present a keyfob that fails authentication
    Reject,

    /// Move the keyfob in or out of range
    Proximity { range: ProximityArg },

    /// Shake the device
    Motion,

    /// Type a PIN at the next prompt
    Pin { digits: String },

    /// Provision the device PIN used by boot and level-1 checks
    Provision { digits: String },

    /// Show device status
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    S0,
    Standby,
    Hibernate,
    Shutdown,
    Reset,
}

impl From<StateArg> for AcpiState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::S0 => AcpiState::S0,
            StateArg::Standby => AcpiState::Standby,
            StateArg::Hibernate => AcpiState::Hibernate,
            StateArg::Shutdown => AcpiState::Shutdown,
            StateArg::Reset => AcpiState::Reset,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RangeArg {
    Near,
    Medium,
    Far,
}

impl From<RangeArg> for BleRange {
    fn from(arg: RangeArg) -> Self {
        match arg {
            RangeArg::Near => BleRange::Near,
            RangeArg::Medium => BleRange::Medium,
            RangeArg::Far => BleRange::Far,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    NoChange,
    Standby,
    Shutdown,
}

impl From<ActionArg> for HostAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::NoChange => HostAction::NoChange,
            ActionArg::Standby => HostAction::Standby,
            ActionArg::Shutdown => HostAction::Shutdown,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProximityArg {
    In,
    Out,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = match cli.socket {
        Some(path) => {
            debug!("Using daemon socket {:?}", path);
            WardenClient::with_socket_path(path)
        }
        None => WardenClient::new(),
    };

    match cli.command {
        Commands::Host(cmd) => handle_host_command(&client, cmd).await,
        Commands::Config(cmd) => handle_config_command(&client, cmd).await,
        Commands::Bench(cmd) => handle_bench_command(&client, cmd).await,
        Commands::Ping => {
            let version = client.ping().await.context("Daemon did not answer")?;
            println!("warden-daemon v{}", version);
            Ok(())
        }
    }
}

async fn handle_host_command(client: &WardenClient, cmd: HostCommands) -> Result<()> {
    match cmd {
        HostCommands::Enroll => {
            println!("Present the new keyfob to the reader...");
            client.host(HostCommand::EnrollKeyfob).await?;
            println!("Keyfob enrolled");
        }
        HostCommands::Unenroll { index } => {
            println!("Present an admin keyfob to confirm...");
            client.host(HostCommand::DeleteKeyfob { index }).await?;
            println!("Keyfob {} removed", index);
        }
        HostCommands::Check { level } => {
            let level = if level == 0 {
                SecurityLevel::Proximity
            } else {
                SecurityLevel::ProximityPin
            };
            client.host(HostCommand::SecurityCheck(level)).await?;
            println!("Security check passed");
        }
        HostCommands::RotRegen => {
            client.host(HostCommand::RegenerateRootOfTrust).await?;
            println!("Root of trust regenerated");
        }
        HostCommands::State { state } => {
            client.host(HostCommand::DeviceState(state.into())).await?;
            println!("State reported");
        }
        HostCommands::Keyfobs => {
            let entries = client.keyfobs().await?;
            if entries.is_empty() {
                println!("No keyfobs enrolled");
            }
            for (index, entry) in entries.iter().enumerate() {
                println!(
                    "{:>2}  {:<16} {}  {:?}",
                    index,
                    entry.name,
                    entry.serial.to_hex(),
                    entry.privilege
                );
            }
        }
        HostCommands::Time { set: Some(seconds) } => {
            client.host(HostCommand::SetTime(seconds)).await?;
            println!("Clock set to {}", seconds);
        }
        HostCommands::Time { set: None } => {
            println!("{}", client.time().await?);
        }
    }
    Ok(())
}

async fn handle_config_command(client: &WardenClient, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Set {
            range,
            host_action,
            motion,
            ask_pin,
        } => {
            let config = UserConfig {
                ble_range: range.into(),
                motion_reaction: motion,
                ask_pin_on_boot: ask_pin,
                ..UserConfig::default()
            }
            .with_host_action(host_action.into());
            client.set_config(config.clone()).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

async fn handle_bench_command(client: &WardenClient, cmd: BenchCommands) -> Result<()> {
    match cmd {
        BenchCommands::Press { long } => client.press(long).await?,
        BenchCommands::Present { name, admin } => client.present_keyfob(&name, admin).await?,
        BenchCommands::Reject => client.reject_keyfob().await?,
        BenchCommands::Proximity { range } => {
            client.set_proximity(matches!(range, ProximityArg::In)).await?
        }
        BenchCommands::Motion => client.motion().await?,
        BenchCommands::Pin { digits } => {
            if digits.len() != warden_core::PIN_LENGTH {
                bail!("PIN must be {} digits", warden_core::PIN_LENGTH);
            }
            client.enter_pin(&digits).await?
        }
        BenchCommands::Provision { digits } => {
            if digits.len() != warden_core::PIN_LENGTH {
                bail!("PIN must be {} digits", warden_core::PIN_LENGTH);
            }
            client.provision_pin(&digits).await?;
            println!("Device PIN provisioned");
        }
        BenchCommands::Status => {
            let status = client.status().await?;
            println!("State:        {}", status.state);
            println!("Host powered: {}", status.host_powered);
            println!("Host standby: {}", status.host_standby);
            println!("Host I/O:     {}", status.host_io_enabled);
            if let Some(screen) = status.screen {
                println!("Screen:       {}", screen);
            }
        }
    }
    Ok(())
}
