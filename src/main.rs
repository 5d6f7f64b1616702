use clap::{Parser, Subcommand};
use spabus_rs::{init_logger, log_info, Gateway, GatewayConfig, SpaError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spabus", version)]
#[command(about = "RS485 spa controller to cloud gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway with the given properties file
    Run {
        #[arg(short, long, default_value = "gateway.properties")]
        config: PathBuf,
    },
    /// Parse and validate a hex-encoded bus frame
    DecodeFrame {
        hex: String,
    },
    /// Load a properties file and print the resolved configuration
    CheckConfig {
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), SpaError> {
    init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => {
            let config = GatewayConfig::load(&config)?;
            log_info(&format!(
                "starting gateway {} on {}",
                config.gateway_serial, config.serial_port
            ));
            Gateway::new(config).run().await?;
        }
        Commands::DecodeFrame { hex } => {
            let bytes = hex::decode(hex.trim())
                .map_err(|e| SpaError::FrameParseError(format!("invalid hex: {e}")))?;
            spabus_rs::rs485::frame::verify_frame(&bytes)?;
            let (_, frame) = spabus_rs::parse_frame(&bytes)
                .map_err(|e| SpaError::FrameParseError(e.to_string()))?;
            log_info(&format!(
                "address=0x{:02X} control=0x{:02X} type=0x{:02X} payload={}",
                frame.address,
                frame.control,
                frame.packet_type,
                hex::encode(&frame.payload)
            ));
        }
        Commands::CheckConfig { config } => {
            let config = GatewayConfig::load(&config)?;
            log_info(&format!("{config:#?}"));
        }
    }

    Ok(())
}
