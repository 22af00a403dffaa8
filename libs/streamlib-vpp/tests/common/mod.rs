// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use streamlib_vpp::{
    BufferHeader, BufferId, BufferRejected, BufferSupplier, ColorFormat, CompletionMode,
    ComponentCallbacks, ComponentConfig, ComponentEvent, ComponentState, FaultKind,
    HandoffResult, LoopbackAccelerator, PeerComponent, PortDefinition, PortDirection, PortFormat,
    PortIndex, Result, VppComponent, VppError,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Configuration with short timeouts and the overlay disabled.
pub fn test_config() -> ComponentConfig {
    let mut config = ComponentConfig::default();
    config.name = "OMX.TI.VPP.test".to_string();
    config.ports.overlay.enabled = false;
    config.timeouts.worker_tick_ms = 10;
    config.timeouts.population_ms = 1_000;
    config.timeouts.accelerator_ack_ms = 300;
    config.timeouts.unload_ms = 300;
    config
}

// =============================================================================
// Recording client
// =============================================================================

#[derive(Default)]
struct Recorded {
    events: Vec<ComponentEvent>,
    inputs: Vec<BufferHeader>,
    outputs: Vec<BufferHeader>,
}

/// Client callbacks that keep everything the component hands back.
#[derive(Default)]
pub struct RecordingClient {
    recorded: Mutex<Recorded>,
    changed: Condvar,
}

impl ComponentCallbacks for RecordingClient {
    fn on_event(&self, event: ComponentEvent) {
        self.recorded.lock().events.push(event);
        self.changed.notify_all();
    }

    fn on_input_consumed(&self, buffer: BufferHeader) {
        self.recorded.lock().inputs.push(buffer);
        self.changed.notify_all();
    }

    fn on_output_ready(&self, buffer: BufferHeader) {
        self.recorded.lock().outputs.push(buffer);
        self.changed.notify_all();
    }
}

impl RecordingClient {
    fn wait(&self, mut ready: impl FnMut(&Recorded) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut recorded = self.recorded.lock();
        while !ready(&recorded) {
            if self.changed.wait_until(&mut recorded, deadline).timed_out() {
                return ready(&recorded);
            }
        }
        true
    }

    pub fn events(&self) -> Vec<ComponentEvent> {
        self.recorded.lock().events.clone()
    }

    pub fn wait_for_event(&self, expected: &ComponentEvent) -> bool {
        self.wait(|r| r.events.contains(expected))
    }

    pub fn wait_for_state(&self, state: ComponentState) -> bool {
        self.wait_for_event(&ComponentEvent::StateChanged(state))
    }

    /// Wait for the `n`-th occurrence of `expected`.
    pub fn wait_for_event_count(&self, expected: &ComponentEvent, n: usize) -> bool {
        self.wait(|r| r.events.iter().filter(|e| *e == expected).count() >= n)
    }

    pub fn wait_for_error(&self, kind: FaultKind) -> bool {
        self.wait(|r| {
            r.events
                .iter()
                .any(|e| matches!(e, ComponentEvent::Error { kind: k, .. } if *k == kind))
        })
    }

    pub fn errors(&self) -> Vec<FaultKind> {
        self.recorded
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ComponentEvent::Error { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn state_changes(&self) -> Vec<ComponentState> {
        self.recorded
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ComponentEvent::StateChanged(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Take `n` consumed input buffers of `port`, waiting for them to arrive.
    pub fn take_inputs(&self, port: PortIndex, n: usize) -> Vec<BufferHeader> {
        let arrived = self.wait(|r| r.inputs.iter().filter(|b| b.port() == port).count() >= n);
        assert!(arrived, "timed out waiting for {} inputs on {}", n, port);
        take_matching(&mut self.recorded.lock().inputs, port, n)
    }

    /// Take `n` filled output buffers of `port`, waiting for them to arrive.
    pub fn take_outputs(&self, port: PortIndex, n: usize) -> Vec<BufferHeader> {
        let arrived = self.wait(|r| r.outputs.iter().filter(|b| b.port() == port).count() >= n);
        assert!(arrived, "timed out waiting for {} outputs on {}", n, port);
        take_matching(&mut self.recorded.lock().outputs, port, n)
    }

    pub fn input_count(&self, port: PortIndex) -> usize {
        self.recorded
            .lock()
            .inputs
            .iter()
            .filter(|b| b.port() == port)
            .count()
    }

    pub fn output_count(&self, port: PortIndex) -> usize {
        self.recorded
            .lock()
            .outputs
            .iter()
            .filter(|b| b.port() == port)
            .count()
    }

    /// Buffers handed back and not yet taken.
    pub fn pending_buffers(&self) -> usize {
        let recorded = self.recorded.lock();
        recorded.inputs.len() + recorded.outputs.len()
    }

    /// Everything handed back so far.
    pub fn drain_buffers(&self) -> Vec<BufferHeader> {
        let mut recorded = self.recorded.lock();
        let mut buffers = std::mem::take(&mut recorded.inputs);
        buffers.append(&mut recorded.outputs);
        buffers
    }
}

fn take_matching(buffers: &mut Vec<BufferHeader>, port: PortIndex, n: usize) -> Vec<BufferHeader> {
    let mut taken = Vec::new();
    let mut i = 0;
    while i < buffers.len() && taken.len() < n {
        if buffers[i].port() == port {
            taken.push(buffers.remove(i));
        } else {
            i += 1;
        }
    }
    taken
}

// =============================================================================
// Component fixture
// =============================================================================

pub struct Fixture {
    pub component: VppComponent,
    pub client: Arc<RecordingClient>,
    pub accelerator: Arc<LoopbackAccelerator>,
}

impl Fixture {
    pub fn new(config: ComponentConfig, mode: CompletionMode) -> Self {
        init_tracing();
        let client = Arc::new(RecordingClient::default());
        let accelerator = LoopbackAccelerator::new(mode).unwrap();
        let component = VppComponent::builder()
            .with_config(config)
            .with_bridge_arc(accelerator.clone())
            .with_callbacks_arc(client.clone())
            .build()
            .unwrap();
        Self {
            component,
            client,
            accelerator,
        }
    }

    /// Allocate every buffer of every currently enabled port.
    pub fn allocate_all(&self) -> Vec<BufferHeader> {
        let mut buffers = Vec::new();
        for port in PortIndex::ALL {
            if !self.component.port_status(port).enabled {
                continue;
            }
            let config = self.component.config().ports.get(port).clone();
            for _ in 0..config.buffer_count {
                buffers.push(
                    self.component
                        .allocate_buffer(port, config.buffer_size)
                        .unwrap(),
                );
            }
        }
        buffers
    }

    /// Request `state` and wait for its next state-changed event.
    pub fn go(&self, state: ComponentState) {
        let event = ComponentEvent::StateChanged(state);
        let seen = self.client.events().iter().filter(|e| **e == event).count();
        self.component
            .send_command(streamlib_vpp::Command::SetState(state))
            .unwrap();
        assert!(
            self.client.wait_for_event_count(&event, seen + 1),
            "never reached {}",
            state
        );
    }

    /// Allocate everything and go to Running. Returns buffers by port.
    pub fn running(&self) -> Buffers {
        let buffers = Buffers::new(self.allocate_all());
        self.go(ComponentState::Idle);
        self.go(ComponentState::Running);
        buffers
    }

    /// Go to Idle, collect every buffer back, release them and unload.
    pub fn shut_down(&self, mut held: Vec<BufferHeader>) {
        self.go(ComponentState::Idle);
        let allocated: usize = PortIndex::ALL
            .iter()
            .map(|&p| self.component.ownership_census(p).total())
            .sum();
        assert!(
            eventually(|| held.len() + self.client.pending_buffers() == allocated),
            "buffers missing after Idle"
        );
        held.extend(self.client.drain_buffers());
        self.go_unloaded(held);
    }

    /// Request Unloaded, then release `held` while the transition waits.
    pub fn go_unloaded(&self, held: Vec<BufferHeader>) {
        self.component
            .send_command(streamlib_vpp::Command::SetState(ComponentState::Unloaded))
            .unwrap();
        for buffer in held {
            self.component.release_buffer(buffer).unwrap();
        }
        assert!(self.client.wait_for_state(ComponentState::Unloaded));
    }
}

/// Client-held buffers grouped by port.
pub struct Buffers {
    by_port: Vec<Vec<BufferHeader>>,
}

impl Buffers {
    pub fn new(buffers: Vec<BufferHeader>) -> Self {
        let mut by_port: Vec<Vec<BufferHeader>> = (0..PortIndex::COUNT).map(|_| Vec::new()).collect();
        for buffer in buffers {
            by_port[buffer.port().as_raw() as usize].push(buffer);
        }
        Self { by_port }
    }

    pub fn take(&mut self, port: PortIndex) -> BufferHeader {
        self.by_port[port.as_raw() as usize]
            .pop()
            .unwrap_or_else(|| panic!("no buffer left on {}", port))
    }

    pub fn try_take(&mut self, port: PortIndex) -> Option<BufferHeader> {
        self.by_port[port.as_raw() as usize].pop()
    }

    pub fn count(&self, port: PortIndex) -> usize {
        self.by_port[port.as_raw() as usize].len()
    }

    pub fn len(&self) -> usize {
        self.by_port.iter().map(Vec::len).sum()
    }

    pub fn put(&mut self, buffer: BufferHeader) {
        self.by_port[buffer.port().as_raw() as usize].push(buffer);
    }

    pub fn into_vec(self) -> Vec<BufferHeader> {
        self.by_port.into_iter().flatten().collect()
    }
}

pub fn submit(component: &VppComponent, buffer: BufferHeader) {
    if let Err(rejected) = component.submit_input(buffer) {
        panic!("{}", rejected);
    }
}

pub fn give_back(component: &VppComponent, buffer: BufferHeader) {
    if let Err(rejected) = component.return_output(buffer) {
        panic!("{}", rejected);
    }
}

/// Poll `ready` until it holds or the standard wait elapses.
pub fn eventually(mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    ready()
}

// =============================================================================
// Tunnel peer
// =============================================================================

/// Peer component that records every interaction and keeps delivered buffers.
pub struct MockPeer {
    pub name: String,
    pub direction: PortDirection,
    pub supplier: Mutex<Option<BufferSupplier>>,
    pub used: Mutex<Vec<BufferId>>,
    pub freed: Mutex<Vec<BufferId>>,
    /// Buffers delivered through `submit_input` or `return_output`.
    pub received: Mutex<Vec<BufferHeader>>,
    pub refuse_buffers: Mutex<bool>,
}

impl MockPeer {
    pub fn new(name: &str, direction: PortDirection) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            direction,
            supplier: Mutex::new(None),
            used: Mutex::new(Vec::new()),
            freed: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            refuse_buffers: Mutex::new(false),
        })
    }

    pub fn take_received(&self, n: usize) -> Vec<BufferHeader> {
        assert!(
            eventually(|| self.received.lock().len() >= n),
            "peer never received {} buffers",
            n
        );
        let mut received = self.received.lock();
        let rest = received.split_off(n);
        std::mem::replace(&mut *received, rest)
    }

    fn accept(&self, buffer: BufferHeader) -> HandoffResult {
        if *self.refuse_buffers.lock() {
            return Err(BufferRejected::new(
                buffer,
                VppError::Peer("peer refusing buffers".to_string()),
            ));
        }
        self.received.lock().push(buffer);
        Ok(())
    }
}

impl PeerComponent for MockPeer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn port_definition(&self, port: u32) -> Result<PortDefinition> {
        Ok(PortDefinition {
            port,
            direction: self.direction,
            format: PortFormat::Video {
                color: ColorFormat::Yuv420Planar,
            },
            frame_width: 176,
            frame_height: 144,
            buffer_count: 1,
            buffer_size: 176 * 144 * 3 / 2,
            enabled: true,
            populated: false,
        })
    }

    fn set_buffer_supplier(&self, _port: u32, supplier: BufferSupplier) -> Result<()> {
        *self.supplier.lock() = Some(supplier);
        Ok(())
    }

    fn use_buffer(&self, _port: u32, buffer: BufferId, _size: usize) -> Result<()> {
        self.used.lock().push(buffer);
        Ok(())
    }

    fn free_buffer(&self, _port: u32, buffer: BufferId) -> Result<()> {
        self.freed.lock().push(buffer);
        Ok(())
    }

    fn submit_input(&self, _port: u32, buffer: BufferHeader) -> HandoffResult {
        self.accept(buffer)
    }

    fn return_output(&self, _port: u32, buffer: BufferHeader) -> HandoffResult {
        self.accept(buffer)
    }
}
