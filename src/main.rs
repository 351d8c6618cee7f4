// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use tracing::info;

use gridseq::clock::timer::ThreadTimer;
use gridseq::engine::Engine;
use gridseq::{config, drivers, midi};

/// How often the realtime update loop runs in the simulator host.
const UPDATE_PERIOD: Duration = Duration::from_micros(500);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A hardware step sequencer engine and simulator."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the engine against the devices named in the given config.
    Run {
        /// The path to the engine config.
        config_path: String,
        /// Start the transport immediately.
        #[arg(long)]
        start: bool,
    },
    /// Lists the available MIDI input/output ports.
    MidiDevices {},
    /// Parses a config file and prints the resulting setup.
    Config {
        /// The path to the engine config.
        config_path: String,
    },
}

fn main() {
    // Default logging to off with gridseq at info level, overridable from the
    // environment.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off,gridseq=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config_path, start } => {
            let config = config::Engine::deserialize(Path::new(&config_path))?;
            let model = config.build_model();

            let clock_timer = Arc::new(ThreadTimer::new(2_000));
            let adc = drivers::get_adc(config.adc_device())?;
            let dac = drivers::get_dac(config.dac_device())?;
            let dio = drivers::get_dio(config.dio_device())?;
            let gate_output = drivers::get_gate_output(config.gate_device())?;
            let midi_port = midi::get_port(config.midi_device())?;
            let usb_midi_port = midi::get_port(config.usb_midi_device())?;

            let mut engine = Engine::new(
                model,
                clock_timer,
                adc,
                dac,
                dio,
                gate_output,
                midi_port,
                usb_midi_port,
            );
            engine.init();
            engine.set_message_handler(Some(Box::new(|text, duration_ms| {
                info!(message = text, duration_ms = duration_ms, "Message.");
            })));

            if start {
                engine.clock_start();
            }

            info!(
                midi = config.midi_device(),
                usb_midi = config.usb_midi_device(),
                "Engine running."
            );

            let sleeper = spin_sleep::SpinSleeper::default();
            loop {
                engine.update();
                sleeper.sleep(UPDATE_PERIOD);
            }
        }
        Commands::MidiDevices {} => {
            let ports = midi::list_ports()?;

            if ports.is_empty() {
                println!("No MIDI ports found.");
                return Ok(());
            }

            println!("MIDI ports:");
            for port in ports {
                println!("- {}", port);
            }
        }
        Commands::Config { config_path } => {
            let config = config::Engine::deserialize(Path::new(&config_path))?;
            println!("{:#?}", config);
        }
    }

    Ok(())
}
