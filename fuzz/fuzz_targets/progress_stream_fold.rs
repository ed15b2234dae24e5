#![no_main]

use flow_stream::{
    decode_event, ExecutionProgressState, FrameReader, ProgressEvent, Reduction, StreamReducer,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut frames = FrameReader::new();
    let mut state = ExecutionProgressState::with_nodes(["trigger", "action"]);
    for line in frames.push(data) {
        let Some(event) = decode_event::<ProgressEvent>(ExecutionProgressState::PROTOCOL, &line)
        else {
            continue;
        };
        let was_terminated = state.is_terminated();
        if let Reduction::Terminated(summary) = state.apply(event) {
            assert!(!was_terminated);
            assert_eq!(&summary.node_statuses, state.node_statuses());
        }
        assert!(state.node_statuses().contains_key("trigger"));
    }
});
