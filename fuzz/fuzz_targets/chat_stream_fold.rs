#![no_main]

use std::collections::HashSet;

use flow_stream::{
    decode_event, ChatEvent, ChatSessionState, FrameReader, Reduction, StreamReducer,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut frames = FrameReader::new();
    let mut state = ChatSessionState::new();
    for line in frames.push(data) {
        let Some(event) = decode_event::<ChatEvent>(ChatSessionState::PROTOCOL, &line) else {
            continue;
        };
        let was_terminated = state.is_terminated();
        let reduction = state.apply(event);
        if was_terminated {
            assert!(matches!(reduction, Reduction::Ignored));
        }

        let mut identities = HashSet::new();
        for step in state.steps() {
            assert!(identities.insert(step.identity()), "duplicate step identity");
        }
    }
    let _ = frames.finish();
});
