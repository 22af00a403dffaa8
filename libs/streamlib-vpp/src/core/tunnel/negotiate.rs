// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One-time tunnel handshake electing the buffer supplier.

use crate::core::ports::{BufferSupplier, Port, PortDirection};
use crate::core::{Result, VppError};

use super::{Tunnel, TunnelRequest};

/// Connect or disconnect `port`.
///
/// Returns the supplier the tunnel settled on. The port is only modified
/// once every check and the peer round-trip succeeded.
///
/// # Errors
///
/// - [`VppError::TunnelingUnsupported`] if the peer name lacks `compatible_prefix`
/// - [`VppError::PortsNotCompatible`] if the peer port cannot feed this port
/// - [`VppError::Peer`] if the peer refuses the supplier setting
pub(crate) fn negotiate(
    port: &mut Port,
    request: Option<TunnelRequest>,
    compatible_prefix: &str,
) -> Result<BufferSupplier> {
    let Some(request) = request else {
        if port.tunnel.take().is_some() {
            tracing::debug!("{} tunnel cleared", port.index);
        }
        port.supplier = BufferSupplier::Unspecified;
        return Ok(BufferSupplier::Unspecified);
    };

    let peer_name = request.peer.name();
    if !peer_name.starts_with(compatible_prefix) {
        return Err(VppError::TunnelingUnsupported(format!(
            "peer '{}' is not a '{}' implementation",
            peer_name, compatible_prefix
        )));
    }

    let tunnel = Tunnel {
        peer: request.peer.clone(),
        peer_port: request.peer_port,
    };

    if port.index.direction() == PortDirection::Output {
        port.tunnel = Some(tunnel);
        tracing::debug!(
            "{} tunneled to {}:{}, supplier preference {:?}",
            port.index,
            peer_name,
            request.peer_port,
            port.supplier
        );
        return Ok(port.supplier);
    }

    let peer_def = request.peer.port_definition(request.peer_port)?;
    if peer_def.direction != PortDirection::Output {
        return Err(VppError::PortsNotCompatible(format!(
            "{}:{} is not an output port",
            peer_name, request.peer_port
        )));
    }
    if !port.format.is_compatible_with(&peer_def.format) {
        return Err(VppError::PortsNotCompatible(format!(
            "{} expects {:?}, {}:{} produces {:?}",
            port.index, port.format, peer_name, request.peer_port, peer_def.format
        )));
    }
    if port.format != peer_def.format {
        tracing::debug!(
            "{} accepting sub-format mismatch {:?} vs {:?}",
            port.index,
            port.format,
            peer_def.format
        );
    }

    let supplier = match request.supplier {
        BufferSupplier::Unspecified => BufferSupplier::Output,
        other => other,
    };

    request
        .peer
        .set_buffer_supplier(request.peer_port, supplier)
        .map_err(|e| {
            VppError::Peer(format!(
                "{}:{} rejected supplier {:?}: {}",
                peer_name, request.peer_port, supplier, e
            ))
        })?;

    port.tunnel = Some(tunnel);
    port.supplier = supplier;
    tracing::info!(
        "{} tunneled from {}:{}, supplier {:?}",
        port.index,
        peer_name,
        request.peer_port,
        supplier
    );
    Ok(supplier)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::core::config::PortsConfig;
    use crate::core::error::{BufferRejected, HandoffResult};
    use crate::core::ports::{
        BufferHeader, BufferId, ColorFormat, PortDefinition, PortFormat, PortIndex,
    };
    use crate::core::tunnel::PeerComponent;

    struct FakePeer {
        name: &'static str,
        format: PortFormat,
        refuse_supplier: bool,
        supplier_calls: Mutex<Vec<(u32, BufferSupplier)>>,
    }

    impl FakePeer {
        fn new(name: &'static str, format: PortFormat) -> Arc<Self> {
            Arc::new(Self {
                name,
                format,
                refuse_supplier: false,
                supplier_calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl PeerComponent for FakePeer {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn port_definition(&self, port: u32) -> Result<PortDefinition> {
            Ok(PortDefinition {
                port,
                direction: PortDirection::Output,
                format: self.format,
                frame_width: 176,
                frame_height: 144,
                buffer_count: 2,
                buffer_size: 1024,
                enabled: true,
                populated: false,
            })
        }

        fn set_buffer_supplier(&self, port: u32, supplier: BufferSupplier) -> Result<()> {
            if self.refuse_supplier {
                return Err(VppError::BadParameter("no".to_string()));
            }
            self.supplier_calls.lock().push((port, supplier));
            Ok(())
        }

        fn use_buffer(&self, _port: u32, _buffer: BufferId, _size: usize) -> Result<()> {
            Ok(())
        }

        fn free_buffer(&self, _port: u32, _buffer: BufferId) -> Result<()> {
            Ok(())
        }

        fn submit_input(&self, _port: u32, buffer: BufferHeader) -> HandoffResult {
            Err(BufferRejected::new(buffer, VppError::Peer("unused".to_string())))
        }

        fn return_output(&self, _port: u32, buffer: BufferHeader) -> HandoffResult {
            Err(BufferRejected::new(buffer, VppError::Peer("unused".to_string())))
        }
    }

    fn port(index: PortIndex) -> Port {
        Port::from_config(index, PortsConfig::default().get(index))
    }

    fn video(color: ColorFormat) -> PortFormat {
        PortFormat::Video { color }
    }

    #[test]
    fn test_null_peer_clears_tunnel() {
        let mut input = port(PortIndex::Input);
        let peer = FakePeer::new("OMX.TI.Camera", video(ColorFormat::CbYCrY));
        negotiate(&mut input, Some(TunnelRequest::new(peer, 1)), "OMX.TI.").unwrap();
        assert!(input.is_tunneled());

        assert_eq!(
            negotiate(&mut input, None, "OMX.TI.").unwrap(),
            BufferSupplier::Unspecified
        );
        assert!(!input.is_tunneled());
        assert_eq!(input.supplier, BufferSupplier::Unspecified);
    }

    #[test]
    fn test_foreign_peer_is_unsupported() {
        let mut input = port(PortIndex::Input);
        let peer = FakePeer::new("OMX.QCOM.Camera", video(ColorFormat::CbYCrY));
        assert!(matches!(
            negotiate(&mut input, Some(TunnelRequest::new(peer, 1)), "OMX.TI."),
            Err(VppError::TunnelingUnsupported(_))
        ));
        assert!(!input.is_tunneled());
    }

    #[test]
    fn test_output_port_reports_its_preference() {
        let mut out = port(PortIndex::YuvOutput);
        let peer = FakePeer::new("OMX.TI.Display", video(ColorFormat::CbYCrY));
        let supplier = negotiate(&mut out, Some(TunnelRequest::new(peer.clone(), 0)), "OMX.TI.").unwrap();
        assert_eq!(supplier, BufferSupplier::Input);
        assert!(out.is_tunneled());
        assert!(peer.supplier_calls.lock().is_empty());
    }

    #[test]
    fn test_input_defaults_to_output_supplier_and_tolerates_color_mismatch() {
        let mut input = port(PortIndex::Input);
        let peer = FakePeer::new("OMX.TI.Camera", video(ColorFormat::Rgb565));
        let supplier = negotiate(&mut input, Some(TunnelRequest::new(peer.clone(), 3)), "OMX.TI.").unwrap();
        assert_eq!(supplier, BufferSupplier::Output);
        assert_eq!(*peer.supplier_calls.lock(), vec![(3, BufferSupplier::Output)]);
        assert!(!input.is_supplier());
    }

    #[test]
    fn test_input_honors_peer_preference() {
        let mut input = port(PortIndex::Input);
        let peer = FakePeer::new("OMX.TI.Camera", video(ColorFormat::CbYCrY));
        let request = TunnelRequest::new(peer, 1).with_supplier(BufferSupplier::Input);
        assert_eq!(
            negotiate(&mut input, Some(request), "OMX.TI.").unwrap(),
            BufferSupplier::Input
        );
        assert!(input.is_supplier());
    }

    #[test]
    fn test_domain_mismatch_is_rejected() {
        let mut input = port(PortIndex::Input);
        let peer = FakePeer::new("OMX.TI.Audio", PortFormat::Audio { encoding: 2 });
        assert!(matches!(
            negotiate(&mut input, Some(TunnelRequest::new(peer, 0)), "OMX.TI."),
            Err(VppError::PortsNotCompatible(_))
        ));
    }

    #[test]
    fn test_peer_refusal_fails_and_leaves_port_untouched() {
        let mut input = port(PortIndex::Input);
        let peer = Arc::new(FakePeer {
            name: "OMX.TI.Camera",
            format: video(ColorFormat::CbYCrY),
            refuse_supplier: true,
            supplier_calls: Mutex::new(Vec::new()),
        });
        assert!(matches!(
            negotiate(&mut input, Some(TunnelRequest::new(peer, 0)), "OMX.TI."),
            Err(VppError::Peer(_))
        ));
        assert!(!input.is_tunneled());
        assert_eq!(input.supplier, BufferSupplier::Input);
    }
}
