// Run with: cargo fuzz run fuzz_create_user_json
// Feeds raw JSON through deserialization and validation.
#![no_main]

use libfuzzer_sys::fuzz_target;
use signup::domain::{CreateUser, validate};

fuzz_target!(|data: &[u8]| {
    if let Ok(command) = serde_json::from_slice::<CreateUser>(data) {
        let _ = validate(&command);
    }
});
