// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! vpp-loopback: drive a component against the in-process loopback
//! accelerator.
//!
//! Usage:
//! ```bash
//! # 30 QCIF frames with default configuration
//! vpp-loopback
//!
//! # Configuration from ./conf/vpp.yaml, overlay enabled
//! vpp-loopback --config-dir ./conf --frames 120 --overlay
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};

use streamlib_vpp::{
    BufferFlags, BufferHeader, Command, CompletionMode, ComponentCallbacks, ComponentConfig,
    ComponentEvent, ComponentState, LoopbackAccelerator, PortIndex, VppComponent,
};

#[derive(Parser, Debug)]
#[command(name = "vpp-loopback")]
#[command(about = "Run frames through a VPP component backed by the loopback accelerator")]
#[command(version)]
struct Args {
    /// Directory containing vpp.yaml (defaults are used when absent)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Number of frames to process
    #[arg(long, default_value = "30")]
    frames: u32,

    /// Feed the overlay input alongside the primary input
    #[arg(long)]
    overlay: bool,

    /// Seconds to wait for any single event
    #[arg(long, default_value = "5")]
    timeout_secs: u64,
}

/// Everything the component hands back, funneled to the main thread.
enum Delivered {
    Event(ComponentEvent),
    Input(BufferHeader),
    Output(BufferHeader),
}

struct ChannelClient {
    tx: Sender<Delivered>,
}

impl ComponentCallbacks for ChannelClient {
    fn on_event(&self, event: ComponentEvent) {
        let _ = self.tx.send(Delivered::Event(event));
    }

    fn on_input_consumed(&self, buffer: BufferHeader) {
        let _ = self.tx.send(Delivered::Input(buffer));
    }

    fn on_output_ready(&self, buffer: BufferHeader) {
        let _ = self.tx.send(Delivered::Output(buffer));
    }
}

/// Buffers currently back in the client's hands, per port.
#[derive(Default)]
struct Pool {
    free: HashMap<PortIndex, Vec<BufferHeader>>,
    outputs_seen: HashMap<PortIndex, u32>,
    eos_seen: Vec<PortIndex>,
}

impl Pool {
    fn put(&mut self, buffer: BufferHeader) {
        self.free.entry(buffer.port()).or_default().push(buffer);
    }

    fn take(&mut self, port: PortIndex) -> Option<BufferHeader> {
        self.free.get_mut(&port).and_then(Vec::pop)
    }

    fn count(&self, port: PortIndex) -> usize {
        self.free.get(&port).map_or(0, Vec::len)
    }
}

struct Session {
    component: VppComponent,
    rx: Receiver<Delivered>,
    pool: Pool,
    timeout: Duration,
}

impl Session {
    /// Pump deliveries until `done` holds.
    fn pump_until(
        &mut self,
        what: &str,
        mut done: impl FnMut(&Pool) -> bool,
    ) -> anyhow::Result<()> {
        while !done(&self.pool) {
            let delivered = self
                .rx
                .recv_timeout(self.timeout)
                .with_context(|| format!("timed out waiting for {}", what))?;
            self.absorb(delivered)?;
        }
        Ok(())
    }

    fn absorb(&mut self, delivered: Delivered) -> anyhow::Result<()> {
        match delivered {
            Delivered::Input(buffer) => self.pool.put(buffer),
            Delivered::Output(buffer) => {
                tracing::debug!(
                    "{} ready: {} bytes, ts={}",
                    buffer.id(),
                    buffer.filled_len,
                    buffer.timestamp
                );
                if buffer.filled_len > 0 {
                    *self.pool.outputs_seen.entry(buffer.port()).or_default() += 1;
                }
                self.pool.put(buffer);
            }
            Delivered::Event(ComponentEvent::BufferFlag { port, flags }) => {
                tracing::info!("End of stream on {} ({:?})", port, flags);
                self.pool.eos_seen.push(port);
            }
            Delivered::Event(ComponentEvent::Error { severity, kind, detail }) => {
                bail!("component error ({:?} {}): {}", severity, kind, detail);
            }
            Delivered::Event(event) => tracing::debug!("Event {:?}", event),
        }
        Ok(())
    }

    fn transition(&mut self, to: ComponentState) -> anyhow::Result<()> {
        self.component.send_command(Command::SetState(to))?;
        let deadline = std::time::Instant::now() + self.timeout;
        while self.component.state() != to {
            if std::time::Instant::now() > deadline {
                bail!("timed out entering {}", to);
            }
            if let Ok(delivered) = self.rx.recv_timeout(Duration::from_millis(10)) {
                self.absorb(delivered)?;
            }
        }
        tracing::info!("Component is {}", to);
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config_dir {
        Some(dir) => ComponentConfig::load_or_default(dir),
        None => ComponentConfig::default(),
    };
    config.ports.overlay.enabled = args.overlay;
    let outputs: Vec<PortIndex> = [PortIndex::RgbOutput, PortIndex::YuvOutput]
        .into_iter()
        .filter(|&p| config.ports.get(p).enabled)
        .collect();
    if outputs.is_empty() {
        bail!("no output port enabled");
    }
    let inputs: Vec<PortIndex> = PortIndex::INPUTS
        .into_iter()
        .filter(|&p| config.ports.get(p).enabled)
        .collect();

    let (tx, rx) = crossbeam_channel::unbounded();
    let accelerator = LoopbackAccelerator::new(CompletionMode::Automatic)?;
    let component = VppComponent::builder()
        .with_config(config.clone())
        .with_bridge_arc(accelerator)
        .with_callbacks(ChannelClient { tx })
        .build()?;
    tracing::info!("Created {} ({})", component.name(), component.id());

    let mut session = Session {
        component,
        rx,
        pool: Pool::default(),
        timeout: Duration::from_secs(args.timeout_secs),
    };

    let mut allocated = 0;
    for port in PortIndex::ALL {
        let port_config = config.ports.get(port);
        if !port_config.enabled {
            continue;
        }
        for _ in 0..port_config.buffer_count {
            let buffer = session
                .component
                .allocate_buffer(port, port_config.buffer_size)?;
            session.pool.put(buffer);
            allocated += 1;
        }
    }

    session.transition(ComponentState::Idle)?;
    session.transition(ComponentState::Running)?;

    for &port in &outputs {
        while let Some(buffer) = session.pool.take(port) {
            session
                .component
                .return_output(buffer)
                .map_err(|r| anyhow::anyhow!(r.to_string()))?;
        }
    }

    for frame in 0..args.frames {
        for &port in &inputs {
            session.pump_until("a free input buffer", |pool| pool.count(port) > 0)?;
            let Some(mut buffer) = session.pool.take(port) else {
                bail!("no free buffer on {}", port);
            };
            let frame_bytes = session.component.config().ports.get(port).frame_bytes();
            let pattern = vec![(frame % 251) as u8; frame_bytes.min(buffer.capacity())];
            buffer.fill(&pattern);
            buffer.timestamp = i64::from(frame) * 33_333;
            buffer.flags = if frame + 1 == args.frames {
                BufferFlags::END_OF_STREAM
            } else {
                BufferFlags::empty()
            };
            session
                .component
                .submit_input(buffer)
                .map_err(|r| anyhow::anyhow!(r.to_string()))?;
        }

        let expected = frame + 1;
        session.pump_until("output buffers", |pool| {
            outputs
                .iter()
                .all(|p| pool.outputs_seen.get(p).copied().unwrap_or(0) >= expected)
        })?;
        if frame + 1 < args.frames {
            for &port in &outputs {
                while let Some(buffer) = session.pool.take(port) {
                    session
                        .component
                        .return_output(buffer)
                        .map_err(|r| anyhow::anyhow!(r.to_string()))?;
                }
            }
        }
    }

    session.pump_until("end of stream", |pool| {
        outputs.iter().all(|p| pool.eos_seen.contains(p))
    })?;

    session.transition(ComponentState::Idle)?;
    session.pump_until("every buffer", |pool| {
        pool.free.values().map(Vec::len).sum::<usize>() == allocated
    })?;

    for port in PortIndex::ALL {
        while let Some(buffer) = session.pool.take(port) {
            session
                .component
                .release_buffer(buffer)
                .map_err(|r| anyhow::anyhow!(r.to_string()))?;
        }
    }
    session.transition(ComponentState::Unloaded)?;

    for &port in &outputs {
        tracing::info!(
            "{}: {} frames",
            port,
            session.pool.outputs_seen.get(&port).copied().unwrap_or(0)
        );
    }
    Ok(())
}
