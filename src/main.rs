//! wgchan CLI - key tooling and self-test for the channel library
//!
//! Generates and derives keys in WireGuard's base64 format, validates channel
//! configuration files and runs an in-memory handshake between two channels.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use tracing_subscriber::{fmt, EnvFilter};
use zeroize::Zeroizing;

use wgchan::error::{ConfigError, ProtocolError};
use wgchan::loopback::{pump, settle, ManualClock};
use wgchan::{
    Channel, ChannelConfig, ChannelState, Identity, LoopbackHost, WgChanConfig, WgChanError,
};

/// wgchan - embeddable WireGuard channel endpoint
#[derive(Parser, Debug)]
#[command(name = "wgchan")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a new base64 private key
    Genkey,
    /// Read a base64 private key from stdin and print its public key
    Pubkey,
    /// Parse a channel configuration file and print a summary
    CheckConfig {
        /// Path to WireGuard-style configuration file
        config: PathBuf,
    },
    /// Run a handshake and data exchange between two in-memory channels
    Selftest {
        /// Also run through the retry path by dropping the first initiation
        #[arg(long)]
        drop_first: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", user_message(&e));
            exit_code(&e)
        }
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Genkey => {
            let identity = Identity::generate(&mut OsRng);
            println!("{}", BASE64.encode(identity.private_key_bytes().as_slice()));
            Ok(())
        }
        Command::Pubkey => {
            let mut input = Zeroizing::new(String::new());
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read private key from stdin")?;
            let bytes = Zeroizing::new(
                BASE64
                    .decode(input.trim())
                    .map_err(|_| invalid_key("private key"))?,
            );
            let private: Zeroizing<[u8; 32]> = Zeroizing::new(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| invalid_key("private key"))?,
            );
            let identity = Identity::from_private_bytes(&private);
            println!("{}", BASE64.encode(identity.public_key()));
            Ok(())
        }
        Command::CheckConfig { config } => {
            tracing::info!("Loading configuration from: {}", config.display());
            let parsed = WgChanConfig::from_file(&config).map_err(WgChanError::from)?;
            println!(
                "public key:           {}",
                BASE64.encode(parsed.identity.public_key())
            );
            println!(
                "peer:                 {}",
                BASE64.encode(parsed.channel.peer_public)
            );
            let psk = match parsed.channel.effective_psk() {
                Some(_) => "yes",
                None => "no",
            };
            println!("preshared key:        {}", psk);
            match parsed.channel.persistent_keepalive_interval() {
                Some(interval) => println!("persistent keepalive: {}s", interval.as_secs()),
                None => println!("persistent keepalive: off"),
            }
            println!("pad payloads:         {}", parsed.channel.pad_payloads);
            Ok(())
        }
        Command::Selftest { drop_first } => selftest(drop_first),
    }
}

fn invalid_key(field: &str) -> WgChanError {
    ConfigError::InvalidKey {
        field: field.to_string(),
    }
    .into()
}

/// Two channels wired back to back through loopback hosts
fn selftest(drop_first: bool) -> anyhow::Result<()> {
    let alice = Arc::new(Identity::generate(&mut OsRng));
    let bob = Arc::new(Identity::generate(&mut OsRng));
    let clock = ManualClock::new(0);

    let mut a = Channel::new(
        alice.clone(),
        ChannelConfig::new(*bob.public_key()),
        LoopbackHost::new(clock.clone(), rand::random()),
    )?;
    let mut b = Channel::new(
        bob,
        ChannelConfig::new(*alice.public_key()),
        LoopbackHost::new(clock.clone(), rand::random()),
    )?;
    a.init()?;
    b.init()?;
    b.accept()?;
    a.connect()?;

    if drop_first {
        a.ops_mut().outbox.clear();
        let wait = a.ops().last_timeout().context("no retry timer armed")?;
        tracing::info!("Dropped first initiation, waiting {} ms for retry", wait);
        clock.advance(wait);
        a.trigger_timeout()?;
    }

    settle(&mut a, &mut b)?;
    if a.state() != ChannelState::Established {
        bail!("initiator ended in state {}", a.state());
    }

    let payload = b"wgchan selftest";
    a.send(payload)?;
    pump(&mut a, &mut b)?;
    b.send(payload)?;
    pump(&mut b, &mut a)?;

    let ok = b.ops().delivered.last().map(Vec::as_slice) == Some(&payload[..])
        && a.ops().delivered.last().map(Vec::as_slice) == Some(&payload[..]);
    if !ok || b.state() != ChannelState::Established {
        bail!("payload did not survive the round trip");
    }

    println!("selftest passed: handshake, confirmation and data exchange in both directions");
    Ok(())
}

/// Get user-friendly error message
fn user_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<WgChanError>() {
        Some(WgChanError::Config(ConfigError::FileNotFound { path })) => {
            format!(
                "Configuration file not found: {}\n  \
                 Check the path and try again.",
                path
            )
        }
        Some(WgChanError::Config(ConfigError::InvalidKey { field })) => {
            format!(
                "Invalid {} in configuration.\n  \
                 Expected 32-byte base64-encoded key.",
                field
            )
        }
        Some(WgChanError::Protocol(ProtocolError::HandshakeTimeout { seconds })) => {
            format!("Handshake timed out after {}s.", seconds)
        }
        _ => format!("{:#}", error),
    }
}

/// Get exit code for error
fn exit_code(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<WgChanError>() {
        Some(WgChanError::Config(_)) => ExitCode::from(1),
        Some(WgChanError::Protocol(_)) => ExitCode::from(4),
        Some(WgChanError::Crypto(_)) => ExitCode::from(5),
        _ => ExitCode::from(255),
    }
}
