//! Serial Frame Monitor
//!
//! Opens a serial port, prints every received frame as hex and text, and sends
//! each line typed on stdin to the port. EOF on stdin closes the port.
//!
//! Usage:
//!   cargo run --example monitor -- [OPTIONS] [PORT]
//!
//! Options:
//!   --list            List available ports and exit
//!   --config FILE     Load link settings from a JSON file
//!   --baud RATE       Baud rate (default: 115200)
//!   --timeout MS      Inter-byte timeout in ms (default: 128)
//!   --buffer BYTES    Frame buffer capacity (default: 4096)
//!   --pass-through    Emit every arrival immediately, no timeout framing
//!   --echo            Write each received frame back to the port
//!
//! Set RUST_LOG=idleframe_core=debug for link diagnostics.

use anyhow::{bail, Context, Result};
use idleframe_core::{hex_string, list_ports, LinkConfig, SerialLink};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = LinkConfig::default();
    let mut port_name = None;
    let mut echo = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--list" => {
                let ports = list_ports();
                if ports.is_empty() {
                    println!("No serial ports found");
                }
                for port in ports {
                    println!("{}", port.label());
                }
                return Ok(());
            }
            "--config" => {
                i += 1;
                let path = args.get(i).context("--config needs a file")?;
                config = LinkConfig::load(Path::new(path))?;
            }
            "--baud" => {
                i += 1;
                config.port.baud_rate = args.get(i).context("--baud needs a value")?.parse()?;
            }
            "--timeout" => {
                i += 1;
                config.receive_timeout_ms =
                    args.get(i).context("--timeout needs a value")?.parse()?;
            }
            "--buffer" => {
                i += 1;
                config.buffer_capacity = args.get(i).context("--buffer needs a value")?.parse()?;
            }
            "--pass-through" => config.timeout_enabled = false,
            "--echo" => echo = true,
            arg if arg.starts_with("--") => bail!("unknown option {arg}"),
            arg => port_name = Some(arg.to_string()),
        }
        i += 1;
    }

    if let Some(name) = port_name {
        config.port.port_name = name;
    }
    if config.port.port_name.is_empty() {
        // Prefer a USB device over built-in UARTs
        let ports = list_ports();
        let port = ports
            .iter()
            .find(|p| p.usb().is_some())
            .or(ports.first())
            .context("no port given and none found")?;
        println!("Using {}", port.label());
        config.port.port_name = port.name.clone();
    }

    let link = Arc::new(SerialLink::new(config.clone()));
    let writer = Arc::downgrade(&link);
    link.subscribe(move |port, frame| {
        println!(
            "{port} [{} bytes] {}| {}",
            frame.len(),
            hex_string(&frame),
            String::from_utf8_lossy(&frame).escape_debug()
        );
        if echo {
            if let Some(link) = writer.upgrade() {
                if let Err(e) = link.write(&frame) {
                    eprintln!("echo failed: {e}");
                }
            }
        }
    });

    link.open()
        .with_context(|| format!("opening {}", config.port.port_name))?;
    println!(
        "Listening on {} at {} baud ({}), type a line to send it, Ctrl+D to quit",
        config.port.port_name,
        config.port.baud_rate,
        if config.timeout_enabled {
            format!("{}ms frame timeout", config.receive_timeout_ms)
        } else {
            "pass-through".to_string()
        }
    );

    for line in std::io::stdin().lock().lines() {
        link.write_line(&line?)?;
        if !link.is_open() {
            bail!("port {} went away", config.port.port_name);
        }
    }

    link.close();
    let stats = link.stats();
    println!(
        "Closed: {} frames, {} bytes in, {} bytes out, {} faults",
        stats.frames_emitted,
        stats.bytes_received,
        stats.bytes_sent,
        stats.overflow_faults + stats.short_read_faults + stats.io_faults
    );
    Ok(())
}
