// Run with: cargo fuzz run fuzz_user_email
// Looks for panics and timeouts in email parsing.
#![no_main]

use libfuzzer_sys::fuzz_target;
use signup::domain::UserEmail;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(email) = UserEmail::parse(s) {
            // Parsing never rewrites the address.
            assert_eq!(email.as_ref(), s);
        }
    }
});
