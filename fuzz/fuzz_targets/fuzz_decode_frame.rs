#![no_main]

use libfuzzer_sys::fuzz_target;
use skribbl_presence::{decode, extract};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Never panics; anything that decodes is offered to the lobby gate.
    if let Some(frame) = decode(raw) {
        let _ = extract(&frame);

        // Named events re-encode to something that decodes to the same event.
        if frame.event_name().is_some() && !frame.is_binary {
            let again = decode(&frame.encode()).expect("re-encoded frame must decode");
            assert_eq!(again.event_name(), frame.event_name());
        }
    }
});
