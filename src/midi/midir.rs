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
use std::{collections::HashMap, error::Error, fmt, sync::Arc};

use crossbeam_channel::{bounded, Receiver, Sender};
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputPort};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use super::{MidiMessage, RecvFilter};

/// How many messages a port buffers before inbound data is dropped.
const RECV_QUEUE_SIZE: usize = 64;

/// A MIDI port backed by a host midir device.
pub struct Port {
    name: String,
    input_port: Option<MidiInputPort>,
    output_port: Option<MidiOutputPort>,
    filter: Arc<RwLock<Option<RecvFilter>>>,
    recv_tx: Sender<MidiMessage>,
    recv_rx: Receiver<MidiMessage>,
    input_connection: Mutex<Option<MidiInputConnection<()>>>,
    output_connection: Mutex<Option<midir::MidiOutputConnection>>,
}

impl Port {
    /// Opens the underlying connections. The input callback runs on midir's
    /// receive thread: it applies the byte filter and queues whole messages.
    fn open(&self) -> Result<(), Box<dyn Error>> {
        if let Some(input_port) = self.input_port.as_ref() {
            let input = MidiInput::new("gridseq input")?;
            let filter = self.filter.clone();
            let recv_tx = self.recv_tx.clone();

            let mut input_connection = self.input_connection.lock();
            *input_connection = Some(input.connect(
                input_port,
                "gridseq port",
                move |_, raw, _| {
                    // midir delivers framed messages. Run each byte through
                    // the filter and queue whatever survives as one message.
                    let mut kept = [0u8; 3];
                    let mut len = 0;
                    for &byte in raw {
                        let consumed = {
                            let filter = filter.read();
                            filter.as_ref().map(|f| f(byte)).unwrap_or(false)
                        };
                        if consumed {
                            continue;
                        }
                        if len < kept.len() {
                            kept[len] = byte;
                            len += 1;
                        }
                    }

                    if len == 0 {
                        return;
                    }
                    if let Some(message) = MidiMessage::new(&kept[..len]) {
                        let _ = recv_tx.try_send(message);
                    }
                },
                (),
            )?);
        } else {
            warn!(port = self.name, "No MIDI input, port is send only.");
        }

        if let Some(output_port) = self.output_port.as_ref() {
            let output = MidiOutput::new("gridseq output")?;
            let mut output_connection = self.output_connection.lock();
            *output_connection = Some(output.connect(output_port, "gridseq port")?);
        } else {
            warn!(port = self.name, "No MIDI output, port is receive only.");
        }

        info!(port = self.name, "Opened MIDI port.");
        Ok(())
    }
}

impl super::MidiPort for Port {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&self, message: &MidiMessage) -> bool {
        let mut output_connection = self.output_connection.lock();
        match output_connection.as_mut() {
            Some(connection) => connection.send(message.bytes()).is_ok(),
            None => false,
        }
    }

    fn recv(&self) -> Option<MidiMessage> {
        self.recv_rx.try_recv().ok()
    }

    fn set_recv_filter(&self, filter: Option<RecvFilter>) {
        *self.filter.write() = filter;
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut capabilities: Vec<String> = Vec::new();
        if self.input_port.is_some() {
            capabilities.push(String::from("Input"));
        }
        if self.output_port.is_some() {
            capabilities.push(String::from("Output"));
        }

        write!(f, "{} ({})", self.name, capabilities.join("/"))
    }
}

/// Lists midir ports and produces the MidiPort trait.
pub fn list() -> Result<Vec<Box<dyn super::MidiPort>>, Box<dyn Error>> {
    Ok(list_midir_ports()?
        .into_iter()
        .map(|port| {
            let port: Box<dyn super::MidiPort> = Box::new(port);
            port
        })
        .collect())
}

/// Lists midir ports.
fn list_midir_ports() -> Result<Vec<Port>, Box<dyn Error>> {
    let input = MidiInput::new("gridseq input listing")?;
    let output = MidiOutput::new("gridseq output listing")?;
    let input_ports = input.ports();
    let output_ports = output.ports();

    let mut ports: HashMap<String, Port> = HashMap::new();

    for port in input_ports {
        let name = input.port_name(&port)?;
        ports.entry(name.clone()).or_insert_with(|| new_port(&name)).input_port = Some(port);
    }

    for port in output_ports {
        let name = output.port_name(&port)?;
        ports.entry(name.clone()).or_insert_with(|| new_port(&name)).output_port = Some(port);
    }

    let mut sorted_ports = ports.into_iter().map(|entry| entry.1).collect::<Vec<Port>>();
    sorted_ports.sort_by_key(|port| port.name.clone());
    Ok(sorted_ports)
}

fn new_port(name: &str) -> Port {
    let (recv_tx, recv_rx) = bounded(RECV_QUEUE_SIZE);
    Port {
        name: name.to_string(),
        input_port: None,
        output_port: None,
        filter: Arc::new(RwLock::new(None)),
        recv_tx,
        recv_rx,
        input_connection: Mutex::new(None),
        output_connection: Mutex::new(None),
    }
}

/// Gets the given midir port and opens its connections.
pub fn get(name: &str) -> Result<Port, Box<dyn Error>> {
    let mut matches = list_midir_ports()?
        .into_iter()
        .filter(|port| port.name.contains(name))
        .collect::<Vec<Port>>();

    if matches.is_empty() {
        return Err(format!("no MIDI port found with name {}", name).into());
    }
    if matches.len() > 1 {
        return Err(format!(
            "found too many MIDI ports that match ({}), use a less ambiguous port name",
            matches
                .iter()
                .map(|port| port.name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }

    // We've verified that there's only one element in the vector, so this should be safe.
    let port = matches.swap_remove(0);
    port.open()?;
    Ok(port)
}
