#![no_main]

use libfuzzer_sys::fuzz_target;
use skribbl_presence::ChannelMessage;

fuzz_target!(|data: &[u8]| {
    // Raw-byte path, including serde_json's own UTF-8 validation.
    let _ = serde_json::from_slice::<ChannelMessage>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(msg) = ChannelMessage::parse(s) {
            if let Some(text) = msg.frame_text() {
                let _ = skribbl_presence::decode(text);
            }
        }
    }
});
