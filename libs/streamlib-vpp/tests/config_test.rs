// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Configuration loading and component construction.

mod common;

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serial_test::serial;

use common::RecordingClient;
use streamlib_vpp::{
    ColorFormat, CompletionMode, ComponentConfig, ComponentState, LoopbackAccelerator,
    PortDirection, PortFormat, PortIndex, VppComponent, VppError,
};

const YAML: &str = "\
name: OMX.TI.VPP.camera
ports:
  input:
    frame_width: 320
    frame_height: 240
    buffer_count: 4
    buffer_size: 115200
  overlay:
    enabled: false
  rgb_output:
    color_format: rgb565
timeouts:
  population_ms: 250
";

fn loopback() -> Arc<LoopbackAccelerator> {
    LoopbackAccelerator::new(CompletionMode::Automatic).unwrap()
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_loaded_config_shapes_ports() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(ComponentConfig::FILE_NAME), YAML).unwrap();
    let config = ComponentConfig::load(dir.path()).unwrap();

    let component = VppComponent::builder()
        .with_config(config)
        .with_bridge_arc(loopback())
        .with_callbacks(RecordingClient::default())
        .build()
        .unwrap();

    assert_eq!(component.name(), "OMX.TI.VPP.camera");
    assert_eq!(component.state(), ComponentState::Unloaded);

    let input = component.port_definition(PortIndex::Input);
    assert_eq!(input.direction, PortDirection::Input);
    assert_eq!((input.frame_width, input.frame_height), (320, 240));
    assert_eq!(input.buffer_count, 4);
    assert_eq!(input.buffer_size, 115_200);
    assert!(!input.populated);

    let rgb = component.port_definition(PortIndex::RgbOutput);
    assert_eq!(rgb.direction, PortDirection::Output);
    assert_eq!(
        rgb.format,
        PortFormat::Video {
            color: ColorFormat::Rgb565
        }
    );
    assert!(!component.port_status(PortIndex::Overlay).enabled);
    assert_eq!(component.config().timeouts.population_ms, 250);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        ComponentConfig::load(dir.path()),
        Err(VppError::Configuration(_))
    ));
    assert_eq!(
        ComponentConfig::load_or_default(dir.path()),
        ComponentConfig::default()
    );
}

// =============================================================================
// Builder
// =============================================================================

#[test]
fn test_builder_requires_bridge_and_callbacks() {
    let no_bridge = VppComponent::builder()
        .with_callbacks(RecordingClient::default())
        .build();
    assert!(matches!(no_bridge, Err(VppError::Configuration(_))));

    let no_callbacks = VppComponent::builder().with_bridge_arc(loopback()).build();
    assert!(matches!(no_callbacks, Err(VppError::Configuration(_))));
}

#[test]
fn test_builder_validates_config() {
    let mut config = common::test_config();
    config.ports.yuv_output.buffer_count = 0;
    let result = VppComponent::builder()
        .with_config(config)
        .with_bridge_arc(loopback())
        .with_callbacks(RecordingClient::default())
        .build();
    assert!(matches!(result, Err(VppError::Configuration(_))));
}

#[test]
fn test_components_get_distinct_ids() {
    let build = || {
        VppComponent::builder()
            .with_config(common::test_config())
            .with_bridge_arc(loopback())
            .with_callbacks(RecordingClient::default())
            .build()
            .unwrap()
    };
    let (a, b) = (build(), build());
    assert_ne!(a.id(), b.id());
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
#[serial]
fn test_creation_is_logged_with_component_prefix() {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();

    let component = tracing::subscriber::with_default(subscriber, || {
        VppComponent::builder()
            .with_config(common::test_config())
            .with_bridge_arc(loopback())
            .with_callbacks(RecordingClient::default())
            .build()
            .unwrap()
    });

    let logged = String::from_utf8(capture.0.lock().clone()).unwrap();
    let expected = format!("[OMX.TI.VPP.test] Component {} created", component.id());
    assert!(logged.contains(&expected), "log was: {}", logged);
}
