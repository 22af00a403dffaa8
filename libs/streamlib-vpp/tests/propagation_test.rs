// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Metadata inheritance from inputs to the outputs derived from them.

mod common;

use std::time::Duration;

use common::{Fixture, give_back, submit, test_config};
use streamlib_vpp::{
    BufferFlags, Command, CompletionMode, ComponentEvent, ComponentId, ComponentState, FaultKind,
    Mark, MarkToken, PortIndex, StreamId,
};

#[test]
fn test_eos_reaches_first_completion_only() {
    let fx = Fixture::new(test_config(), CompletionMode::Automatic);
    let mut buffers = fx.running();

    for frame in 0..2 {
        give_back(&fx.component, buffers.take(PortIndex::RgbOutput));
        give_back(&fx.component, buffers.take(PortIndex::YuvOutput));
        let mut input = buffers.take(PortIndex::Input);
        input.timestamp = 1_000 + frame;
        if frame == 0 {
            input.flags = BufferFlags::END_OF_STREAM;
        }
        submit(&fx.component, input);

        for port in [PortIndex::RgbOutput, PortIndex::YuvOutput] {
            let output = fx.client.take_outputs(port, 1).remove(0);
            assert_eq!(output.timestamp, 1_000 + frame, "{} frame {}", port, frame);
            assert_eq!(
                output.flags.contains(BufferFlags::END_OF_STREAM),
                frame == 0,
                "{} frame {}",
                port,
                frame
            );
            buffers.put(output);
        }
        buffers.put(fx.client.take_inputs(PortIndex::Input, 1).remove(0));
    }

    assert_eq!(fx.component.propagation_in_use(PortIndex::Input), 0);
    fx.shut_down(buffers.into_vec());
}

#[test]
fn test_self_targeted_mark_becomes_event() {
    let fx = Fixture::new(test_config(), CompletionMode::Automatic);
    let mut buffers = fx.running();

    give_back(&fx.component, buffers.take(PortIndex::RgbOutput));
    give_back(&fx.component, buffers.take(PortIndex::YuvOutput));
    let mut input = buffers.take(PortIndex::Input);
    input.mark = Some(Mark {
        target: fx.component.id(),
        token: MarkToken(11),
    });
    submit(&fx.component, input);

    for port in [PortIndex::RgbOutput, PortIndex::YuvOutput] {
        assert!(fx.client.wait_for_event(&ComponentEvent::Mark {
            port,
            token: MarkToken(11),
        }));
        let output = fx.client.take_outputs(port, 1).remove(0);
        assert_eq!(output.mark, None);
        buffers.put(output);
    }
    fx.shut_down(buffers.into_vec());
}

#[test]
fn test_foreign_mark_travels_with_output() {
    let fx = Fixture::new(test_config(), CompletionMode::Automatic);
    let mut buffers = fx.running();
    let downstream = Mark {
        target: ComponentId::new(),
        token: MarkToken(99),
    };

    give_back(&fx.component, buffers.take(PortIndex::RgbOutput));
    give_back(&fx.component, buffers.take(PortIndex::YuvOutput));
    let mut input = buffers.take(PortIndex::Input);
    input.mark = Some(downstream);
    submit(&fx.component, input);

    for port in [PortIndex::RgbOutput, PortIndex::YuvOutput] {
        let output = fx.client.take_outputs(port, 1).remove(0);
        assert_eq!(output.mark, Some(downstream));
        buffers.put(output);
    }
    assert!(
        !fx.client
            .events()
            .iter()
            .any(|e| matches!(e, ComponentEvent::Mark { .. }))
    );
    fx.shut_down(buffers.into_vec());
}

#[test]
fn test_mark_buffer_command_tags_next_input() {
    let fx = Fixture::new(test_config(), CompletionMode::Automatic);
    let mut buffers = common::Buffers::new(fx.allocate_all());
    fx.go(ComponentState::Idle);

    // Queued ahead of the transition, so it is in place before any input.
    fx.component
        .send_command(Command::MarkBuffer {
            port: PortIndex::Input,
            mark: Mark {
                target: fx.component.id(),
                token: MarkToken(3),
            },
        })
        .unwrap();
    fx.go(ComponentState::Running);

    for _ in 0..2 {
        give_back(&fx.component, buffers.take(PortIndex::RgbOutput));
        give_back(&fx.component, buffers.take(PortIndex::YuvOutput));
        submit(&fx.component, buffers.take(PortIndex::Input));
        for port in [PortIndex::RgbOutput, PortIndex::YuvOutput] {
            buffers.put(fx.client.take_outputs(port, 1).remove(0));
        }
        buffers.put(fx.client.take_inputs(PortIndex::Input, 1).remove(0));
    }

    let marks = fx
        .client
        .events()
        .iter()
        .filter(|e| matches!(e, ComponentEvent::Mark { token: MarkToken(3), .. }))
        .count();
    assert_eq!(marks, 2, "one mark event per output, first frame only");
    fx.shut_down(buffers.into_vec());
}

#[test]
fn test_mark_on_output_port_rejected() {
    let fx = Fixture::new(test_config(), CompletionMode::Automatic);
    let result = fx.component.send_command(Command::MarkBuffer {
        port: PortIndex::RgbOutput,
        mark: Mark {
            target: fx.component.id(),
            token: MarkToken(1),
        },
    });
    assert!(matches!(result, Err(streamlib_vpp::VppError::BadPort(_))));
}

#[test]
fn test_ring_exhaustion_is_fatal() {
    let fx = Fixture::new(test_config(), CompletionMode::Manual);
    let mut buffers = fx.running();

    give_back(&fx.component, buffers.take(PortIndex::RgbOutput));
    give_back(&fx.component, buffers.take(PortIndex::YuvOutput));
    let mut input = buffers.take(PortIndex::Input);
    input.timestamp = 5;
    submit(&fx.component, input);
    assert!(common::eventually(|| fx.accelerator.queued(StreamId::Input) == 1));

    // The input comes back while both outputs still owe it a completion.
    assert!(fx.accelerator.complete(StreamId::Input, 0));
    let mut input = fx.client.take_inputs(PortIndex::Input, 1).remove(0);
    assert_eq!(fx.component.propagation_in_use(PortIndex::Input), 1);

    input.timestamp = 6;
    submit(&fx.component, input);
    assert!(fx.client.wait_for_error(FaultKind::PropagationRingExhausted));
    assert_eq!(fx.component.state(), ComponentState::Invalid);
    fx.client.take_inputs(PortIndex::Input, 1);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(fx.client.errors(), vec![FaultKind::PropagationRingExhausted]);
}

#[test]
fn test_manual_completions_inherit_in_order() {
    let mut config = test_config();
    config.ports.input.buffer_count = 2;
    let fx = Fixture::new(config, CompletionMode::Manual);
    let mut buffers = fx.running();

    for timestamp in [10, 20] {
        let mut input = buffers.take(PortIndex::Input);
        input.timestamp = timestamp;
        submit(&fx.component, input);
    }
    assert!(common::eventually(|| fx.accelerator.queued(StreamId::Input) == 2));
    assert_eq!(fx.component.propagation_in_use(PortIndex::Input), 2);

    // Only the RGB output completes, twice.
    let mut timestamps = Vec::new();
    for _ in 0..2 {
        give_back(&fx.component, buffers.take(PortIndex::RgbOutput));
        assert!(common::eventually(|| fx.accelerator.queued(StreamId::RgbOutput) == 1));
        assert!(fx.accelerator.complete(StreamId::RgbOutput, 8));
        let output = fx.client.take_outputs(PortIndex::RgbOutput, 1).remove(0);
        timestamps.push(output.timestamp);
        buffers.put(output);
    }
    assert_eq!(timestamps, vec![10, 20]);

    // YUV has not completed yet, so both records stay live.
    assert_eq!(fx.component.propagation_in_use(PortIndex::Input), 2);
}
