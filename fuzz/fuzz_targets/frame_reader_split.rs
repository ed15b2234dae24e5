#![no_main]

use flow_stream::FrameReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split_seed, bytes)) = data.split_first() else {
        return;
    };
    let split = usize::from(split_seed) % (bytes.len() + 1);

    let mut whole = FrameReader::new();
    let expected = whole.push(bytes);

    let mut chunked = FrameReader::new();
    let mut lines = chunked.push(&bytes[..split]);
    lines.extend(chunked.push(&bytes[split..]));

    assert_eq!(lines, expected);
    assert_eq!(chunked.pending_len(), whole.pending_len());
    assert!(lines.iter().all(|line| !line.contains('\n')));
});
