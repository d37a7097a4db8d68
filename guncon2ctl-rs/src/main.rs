/* guncon2ctl CLI: clap-driven client that talks to guncon2d over DBus to list guns, drive their
 * lifecycle and inspect or change calibration and output settings. */
mod dbus_client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dbus_client::{Bounds, GunconClient};

/// guncon2ctl: calibrate and control GunCon 2 light guns via the guncon2d DBus daemon.
#[derive(Parser)]
#[command(name = "guncon2ctl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected guns.
    List,

    /// Show detailed information about a gun.
    Info {
        /// Device index (0-based, from `guncon2ctl list`) or sysname.
        device: String,
    },

    /// Start reporting.
    Open {
        /// Device index or sysname.
        device: String,
    },

    /// Stop reporting.
    Close {
        /// Device index or sysname.
        device: String,
    },

    /// Pause reporting, as before system sleep.
    Suspend {
        /// Device index or sysname.
        device: String,
    },

    /// Resume reporting after `suspend`.
    Resume {
        /// Device index or sysname.
        device: String,
    },

    /// USB port-reset the gun.
    Reset {
        /// Device index or sysname.
        device: String,
    },

    /// Get or set the calibrated raw window.
    Calibration {
        /// Device index or sysname.
        device: String,
        /// New bounds: X_MIN X_MAX Y_MIN Y_MAX (omit to read current).
        #[arg(num_args = 4, value_names = ["X_MIN", "X_MAX", "Y_MIN", "Y_MAX"])]
        bounds: Option<Vec<u16>>,
    },

    /// Two-point calibration from a centre shot and a top-left shot.
    Calibrate {
        /// Device index or sysname.
        device: String,
        /// Raw position reported for the centre target, as X,Y.
        #[arg(long, value_parser = parse_point)]
        center_shot: (u16, u16),
        /// Raw position reported for the top-left target, as X,Y.
        #[arg(long, value_parser = parse_point)]
        topleft_shot: (u16, u16),
        /// Screen position of the centre target (half the resolution).
        #[arg(long, value_parser = parse_point, default_value = "160,120")]
        center_target: (u16, u16),
        /// Screen position of the top-left target.
        #[arg(long, value_parser = parse_point, default_value = "50,50")]
        topleft_target: (u16, u16),
    },

    /// Get or set raw-passthrough mode (on/off).
    Raw {
        /// Device index or sysname.
        device: String,
        /// New value: "on" or "off" (omit to read current).
        value: Option<String>,
    },

    /// Get or set off-screen trigger remapping to reload (on/off).
    #[command(name = "offscreen-reload")]
    OffscreenReload {
        /// Device index or sysname.
        device: String,
        /// New value: "on" or "off" (omit to read current).
        value: Option<String>,
    },

    /// Get or set the off-screen position policy (hold/zero).
    #[command(name = "offscreen-position")]
    OffscreenPosition {
        /// Device index or sysname.
        device: String,
        /// New policy: "hold" or "zero" (omit to read current).
        value: Option<String>,
    },

    /// Get or set resubmission after a read timeout (on/off).
    #[command(name = "resubmit-on-timeout")]
    ResubmitOnTimeout {
        /// Device index or sysname.
        device: String,
        /// New value: "on" or "off" (omit to read current).
        value: Option<String>,
    },

    /// Get or set the rescale output range.
    #[command(name = "output-range")]
    OutputRange {
        /// Device index or sysname.
        device: String,
        /// New X maximum (omit both to read current).
        x_max: Option<u16>,
        /// New Y maximum.
        #[arg(requires = "x_max")]
        y_max: Option<u16>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = GunconClient::connect()
        .await
        .context("Failed to connect to guncon2d on org.freedesktop.guncon2")?;

    match cli.command {
        Commands::List => cmd_list(&client).await,
        Commands::Info { device } => cmd_info(&client, &device).await,
        Commands::Open { device } => cmd_lifecycle(&client, &device, "Open").await,
        Commands::Close { device } => cmd_lifecycle(&client, &device, "Close").await,
        Commands::Suspend { device } => cmd_lifecycle(&client, &device, "Suspend").await,
        Commands::Resume { device } => cmd_lifecycle(&client, &device, "Resume").await,
        Commands::Reset { device } => cmd_lifecycle(&client, &device, "Reset").await,
        Commands::Calibration { device, bounds } => {
            cmd_calibration(&client, &device, bounds).await
        }
        Commands::Calibrate {
            device,
            center_shot,
            topleft_shot,
            center_target,
            topleft_target,
        } => {
            cmd_calibrate(
                &client,
                &device,
                center_shot,
                topleft_shot,
                center_target,
                topleft_target,
            )
            .await
        }
        Commands::Raw { device, value } => cmd_flag(&client, &device, "Raw", value).await,
        Commands::OffscreenReload { device, value } => {
            cmd_flag(&client, &device, "OffscreenReload", value).await
        }
        Commands::OffscreenPosition { device, value } => {
            cmd_offscreen_position(&client, &device, value).await
        }
        Commands::ResubmitOnTimeout { device, value } => {
            cmd_flag(&client, &device, "ResubmitOnTimeout", value).await
        }
        Commands::OutputRange {
            device,
            x_max,
            y_max,
        } => cmd_output_range(&client, &device, x_max, y_max).await,
    }
}

// ---------------------------------------------------------------------------
// Argument parsing helpers
// ---------------------------------------------------------------------------

/// Parse an `X,Y` pair.
fn parse_point(s: &str) -> Result<(u16, u16), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("Expected X,Y but got '{}'", s))?;
    let x = x.trim().parse().map_err(|e| format!("Invalid X '{}': {}", x, e))?;
    let y = y.trim().parse().map_err(|e| format!("Invalid Y '{}': {}", y, e))?;
    Ok((x, y))
}

fn parse_on_off(s: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Ok(true),
        "off" | "0" | "false" | "no" => Ok(false),
        _ => anyhow::bail!("Invalid value '{}'. Use 'on' or 'off'", s),
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn format_bounds(b: &Bounds) -> String {
    format!("x {}..={}  y {}..={}", b.x_min, b.x_max, b.y_min, b.y_max)
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_list(client: &GunconClient) -> Result<()> {
    let api = client.get_api_version().await.unwrap_or(-1);
    let devices = client.list_devices().await?;
    if devices.is_empty() {
        println!("No guns found. (API version {})", api);
        return Ok(());
    }
    println!("API version: {}", api);
    for (i, path) in devices.iter().enumerate() {
        let name = client.get_device_name(path).await.unwrap_or_default();
        let model = client.get_device_model(path).await.unwrap_or_default();
        let state = client.get_device_state(path).await.unwrap_or_default();
        println!("{}: {} ({}) [{}]", i, name, model, state);
    }
    Ok(())
}

async fn cmd_info(client: &GunconClient, device: &str) -> Result<()> {
    let path = client.resolve_device(device).await?;
    let name = client.get_device_name(&path).await?;
    let model = client.get_device_model(&path).await?;
    let phys = client.get_device_phys(&path).await?;
    let is_open = client.get_is_open(&path).await?;
    let state = client.get_device_state(&path).await?;
    let bounds = client.get_calibration(&path).await?;
    let (out_x, out_y) = client.get_output_range(&path).await?;
    let raw = client.get_bool_flag(&path, "Raw").await?;
    let reload = client.get_bool_flag(&path, "OffscreenReload").await?;
    let position = client.get_offscreen_position(&path).await?;
    let resubmit = client.get_bool_flag(&path, "ResubmitOnTimeout").await?;

    println!("Device:      {}", name);
    println!("Model:       {}", model);
    println!("Phys:        {}", phys);
    println!("Open:        {} ({})", if is_open { "yes" } else { "no" }, state);
    println!("Calibration: {}", format_bounds(&bounds));
    if raw {
        println!("Output:      raw");
    } else {
        println!("Output:      rescaled to 0..={} x 0..={}", out_x, out_y);
    }
    println!("Off-screen:  position {}, reload {}", position, on_off(reload));
    println!("Resubmit on timeout: {}", on_off(resubmit));
    Ok(())
}

async fn cmd_lifecycle(client: &GunconClient, device: &str, method: &str) -> Result<()> {
    let path = client.resolve_device(device).await?;
    client.call_lifecycle(&path, method).await?;
    let state = client.get_device_state(&path).await?;
    println!("{}: {}", method, state);
    Ok(())
}

async fn cmd_calibration(
    client: &GunconClient,
    device: &str,
    bounds: Option<Vec<u16>>,
) -> Result<()> {
    let path = client.resolve_device(device).await?;
    if let Some(values) = bounds {
        let [x_min, x_max, y_min, y_max] = values[..] else {
            anyhow::bail!("Expected X_MIN X_MAX Y_MIN Y_MAX");
        };
        client
            .set_calibration(
                &path,
                Bounds {
                    x_min,
                    x_max,
                    y_min,
                    y_max,
                },
            )
            .await?;
    }
    let current = client.get_calibration(&path).await?;
    println!("Calibration: {}", format_bounds(&current));
    Ok(())
}

async fn cmd_calibrate(
    client: &GunconClient,
    device: &str,
    center_shot: (u16, u16),
    topleft_shot: (u16, u16),
    center_target: (u16, u16),
    topleft_target: (u16, u16),
) -> Result<()> {
    let path = client.resolve_device(device).await?;
    let bounds = client
        .calibrate_two_point(&path, center_shot, topleft_shot, center_target, topleft_target)
        .await?;
    println!("Calibration: {}", format_bounds(&bounds));
    Ok(())
}

async fn cmd_flag(
    client: &GunconClient,
    device: &str,
    prop: &str,
    value: Option<String>,
) -> Result<()> {
    let path = client.resolve_device(device).await?;
    if let Some(v) = value {
        client.set_bool_flag(&path, prop, parse_on_off(&v)?).await?;
    }
    let current = client.get_bool_flag(&path, prop).await?;
    println!("{}: {}", prop, on_off(current));
    Ok(())
}

async fn cmd_offscreen_position(
    client: &GunconClient,
    device: &str,
    value: Option<String>,
) -> Result<()> {
    let path = client.resolve_device(device).await?;
    if let Some(v) = value {
        let policy = v.to_lowercase();
        anyhow::ensure!(
            policy == "hold" || policy == "zero",
            "Invalid policy '{}'. Use 'hold' or 'zero'",
            v
        );
        client.set_offscreen_position(&path, &policy).await?;
    }
    let current = client.get_offscreen_position(&path).await?;
    println!("OffscreenPosition: {}", current);
    Ok(())
}

async fn cmd_output_range(
    client: &GunconClient,
    device: &str,
    x_max: Option<u16>,
    y_max: Option<u16>,
) -> Result<()> {
    let path = client.resolve_device(device).await?;
    match (x_max, y_max) {
        (Some(x), Some(y)) => client.set_output_range(&path, x, y).await?,
        (None, None) => {}
        _ => anyhow::bail!("Give both X and Y maxima"),
    }
    let (x, y) = client.get_output_range(&path).await?;
    println!("OutputRange: 0..={} x 0..={}", x, y);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn point_parsing() {
        assert_eq!(parse_point("160,120"), Ok((160, 120)));
        assert_eq!(parse_point(" 50 , 50 "), Ok((50, 50)));
        assert!(parse_point("160").is_err());
        assert!(parse_point("160,-1").is_err());
    }

    #[test]
    fn on_off_parsing() {
        assert!(parse_on_off("ON").unwrap());
        assert!(!parse_on_off("0").unwrap());
        assert!(parse_on_off("maybe").is_err());
    }

    #[test]
    fn calibrate_defaults() {
        let cli = Cli::try_parse_from([
            "guncon2ctl",
            "calibrate",
            "0",
            "--center-shot",
            "400,120",
            "--topleft-shot",
            "250,60",
        ])
        .unwrap();
        let Commands::Calibrate {
            center_target,
            topleft_target,
            center_shot,
            ..
        } = cli.command
        else {
            panic!("wrong subcommand");
        };
        assert_eq!(center_shot, (400, 120));
        assert_eq!(center_target, (160, 120));
        assert_eq!(topleft_target, (50, 50));
    }

    #[test]
    fn calibration_takes_four_values() {
        let cli = Cli::try_parse_from(["guncon2ctl", "calibration", "0", "80", "734", "0", "240"])
            .unwrap();
        let Commands::Calibration { bounds, .. } = cli.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(bounds, Some(vec![80, 734, 0, 240]));

        assert!(Cli::try_parse_from(["guncon2ctl", "calibration", "0", "80", "734"]).is_err());
    }
}
